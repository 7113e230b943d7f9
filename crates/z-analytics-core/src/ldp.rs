//! k-ary randomized response and its debiasing.
//!
//! A client reports its true metric with probability
//! `p = e^ε / (e^ε + k - 1)` and each of the other `k - 1` metrics with
//! probability `q = 1 / (e^ε + k - 1)`. Since `p / q = e^ε`, any single report
//! satisfies ε-local differential privacy with respect to the true metric.
//!
//! The service cannot invert a single report, but in aggregate the expected
//! observed count of a metric is `n·q + true·(p - q)`, which [`RrParams::debias`]
//! solves for `true`. Ingest only tallies reports ([`tally_reports`]); the
//! correction ([`debias_tallies`]) runs once per closed day over the whole
//! day's tallies.

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::dimensions::{Dimensions, Increment};
use crate::entropy;
use crate::error::{PrivacyError, Result};
use crate::metric::Metric;

/// Parameters of k-ary randomized response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrParams {
    epsilon: f64,
    k: usize,
    p: f64,
    q: f64,
}

impl RrParams {
    /// Parameters for a domain of size `k` at privacy level `epsilon`.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::InvalidEpsilon` unless `epsilon` is finite and
    /// positive, and `PrivacyError::Configuration` if `k < 2`.
    pub fn new(epsilon: f64, k: usize) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(PrivacyError::InvalidEpsilon("client"));
        }
        if k < 2 {
            return Err(PrivacyError::Configuration(
                "randomized response needs at least two values".into(),
            ));
        }
        let e = epsilon.exp();
        #[allow(clippy::cast_precision_loss)]
        let denom = e + (k - 1) as f64;
        Ok(Self {
            epsilon,
            k,
            p: e / denom,
            q: 1.0 / denom,
        })
    }

    /// Parameters over the metric domain.
    ///
    /// # Errors
    ///
    /// See [`RrParams::new`].
    pub fn for_metrics(epsilon: f64) -> Result<Self> {
        Self::new(epsilon, Metric::DOMAIN_SIZE)
    }

    /// Privacy level.
    #[must_use]
    pub const fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Domain size.
    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }

    /// Probability of reporting the true value.
    #[must_use]
    pub const fn p(&self) -> f64 {
        self.p
    }

    /// Probability of reporting any one specific other value.
    #[must_use]
    pub const fn q(&self) -> f64 {
        self.q
    }

    /// Perturb a domain index.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::EntropyUnavailable` if the generator fails, and
    /// `PrivacyError::Configuration` if `true_index` is outside the domain.
    pub fn perturb_index<R>(&self, true_index: usize, rng: &mut R) -> Result<usize>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        if true_index >= self.k {
            return Err(PrivacyError::Configuration("value outside domain".into()));
        }
        if entropy::unit_f64(rng)? < self.p {
            return Ok(true_index);
        }
        let other = entropy::index(rng, self.k - 1)?;
        Ok(if other >= true_index { other + 1 } else { other })
    }

    /// Debiased estimate of the true count of one value.
    ///
    /// `observed` is how often the value was reported among `n` reports. The
    /// estimate is clamped to `[0, n]` and rounded to a whole count.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn debias(&self, observed: u64, n: u64) -> u64 {
        let n_f = n as f64;
        let estimate = (observed as f64 - n_f * self.q) / (self.p - self.q);
        estimate.clamp(0.0, n_f).round() as u64
    }
}

/// Perturb a metric with randomized response over the metric domain.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn perturb_metric<R>(params: &RrParams, metric: Metric, rng: &mut R) -> Result<Metric>
where
    R: RngCore + CryptoRng + ?Sized,
{
    if params.k() != Metric::DOMAIN_SIZE {
        return Err(PrivacyError::Configuration(
            "parameters do not match the metric domain".into(),
        ));
    }
    let index = params.perturb_index(metric.index(), rng)?;
    Metric::from_index(index)
        .ok_or_else(|| PrivacyError::Configuration("value outside domain".into()))
}

/// Count perturbed reports per (reported metric, dimension tuple).
///
/// This is all the service keeps of a report until its day is closed. No
/// correction happens here.
#[must_use]
pub fn tally_reports<'a, I>(reports: I) -> BTreeMap<(Metric, Dimensions), u64>
where
    I: IntoIterator<Item = &'a Increment>,
{
    let mut tallies = BTreeMap::new();
    for report in reports {
        *tallies
            .entry((report.metric, report.dimensions.clone()))
            .or_insert(0) += 1;
    }
    tallies
}

/// Debias one closed day of report tallies into bucket counts.
///
/// `tallies` must cover every report of the day, since `n` for a tuple is the
/// sum of its tallies over all metrics. Correcting a partial group (one
/// request, one report) biases every metric upwards. Every metric observed in
/// a tuple gets the clamped estimate from [`RrParams::debias`]; zero
/// estimates are omitted.
#[must_use]
pub fn debias_tallies(
    params: &RrParams,
    tallies: &BTreeMap<(Metric, Dimensions), u64>,
) -> BTreeMap<(Metric, Dimensions), u64> {
    let mut by_tuple: BTreeMap<&Dimensions, [u64; Metric::DOMAIN_SIZE]> = BTreeMap::new();
    for ((metric, dimensions), count) in tallies {
        by_tuple.entry(dimensions).or_insert([0; Metric::DOMAIN_SIZE])[metric.index()] += count;
    }

    let mut estimates = BTreeMap::new();
    for (dimensions, observed) in by_tuple {
        let n: u64 = observed.iter().sum();
        for metric in Metric::ALL {
            let seen = observed[metric.index()];
            if seen == 0 {
                continue;
            }
            let estimate = params.debias(seen, n);
            if estimate > 0 {
                estimates.insert((metric, dimensions.clone()), estimate);
            }
        }
    }
    estimates
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::entropy::testing::FailingRng;

    #[test]
    fn probabilities_sum_to_one_with_ratio_e_eps() {
        for epsilon in [0.1, 1.0, 2.0, 4.0] {
            let params = RrParams::for_metrics(epsilon).unwrap();
            let total = params.p() + 9.0 * params.q();
            assert!((total - 1.0).abs() < 1e-12);
            assert!((params.p() / params.q() - epsilon.exp()).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(RrParams::new(0.0, 10).is_err());
        assert!(RrParams::new(f64::NAN, 10).is_err());
        assert!(RrParams::new(-1.0, 10).is_err());
        assert!(RrParams::new(1.0, 1).is_err());
    }

    #[test]
    fn empirical_likelihood_ratio_is_bounded() {
        let epsilon = 1.0;
        let params = RrParams::for_metrics(epsilon).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let trials = 200_000;

        // Outputs seen for true value 0 and true value 1.
        let mut from_zero = [0u64; 10];
        let mut from_one = [0u64; 10];
        for _ in 0..trials {
            from_zero[params.perturb_index(0, &mut rng).unwrap()] += 1;
            from_one[params.perturb_index(1, &mut rng).unwrap()] += 1;
        }

        let bound = epsilon.exp() * 1.1;
        for j in 0..10 {
            let a = from_zero[j] as f64;
            let b = from_one[j] as f64;
            assert!(a / b <= bound, "output {j}: ratio {}", a / b);
            assert!(b / a <= bound, "output {j}: ratio {}", b / a);
        }
        let keep = from_zero[0] as f64 / f64::from(trials);
        assert!((keep - params.p()).abs() < 0.01);
    }

    #[test]
    fn debiasing_recovers_true_counts() {
        let params = RrParams::for_metrics(2.0).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1234);

        // 20k reports: 12k template_view, 6k message_sent, 2k delivery_failed.
        let truth = [
            (Metric::TemplateView, 12_000u64),
            (Metric::MessageSent, 6_000),
            (Metric::DeliveryFailed, 2_000),
        ];
        let n: u64 = truth.iter().map(|(_, c)| c).sum();
        let mut observed = [0u64; 10];
        for (metric, count) in truth {
            for _ in 0..count {
                let out = perturb_metric(&params, metric, &mut rng).unwrap();
                observed[out.index()] += 1;
            }
        }

        for (metric, count) in truth {
            let estimate = params.debias(observed[metric.index()], n);
            assert!(
                estimate.abs_diff(count) < 600,
                "{metric}: estimate {estimate}, truth {count}"
            );
        }
        let absent = params.debias(observed[Metric::OauthStarted.index()], n);
        assert!(absent < 600, "absent metric estimate {absent}");
    }

    #[test]
    fn debias_clamps_to_report_count() {
        let params = RrParams::for_metrics(1.0).unwrap();
        assert_eq!(params.debias(0, 100), 0);
        assert_eq!(params.debias(100, 100), 100);
        assert_eq!(params.debias(0, 0), 0);
    }

    #[test]
    fn tallies_group_by_metric_and_tuple() {
        let ca = Dimensions::sanitize([("jurisdiction", "CA")]).unwrap();
        let ny = Dimensions::sanitize([("jurisdiction", "NY")]).unwrap();
        let mut reports = vec![Increment::new(Metric::TemplateView, ca.clone()); 3];
        reports.push(Increment::new(Metric::TemplateUse, ny.clone()));

        let tallies = tally_reports(&reports);
        assert_eq!(tallies.get(&(Metric::TemplateView, ca)), Some(&3));
        assert_eq!(tallies.get(&(Metric::TemplateUse, ny)), Some(&1));
        assert_eq!(tallies.len(), 2);
    }

    #[test]
    fn day_tallies_debias_by_tuple() {
        let params = RrParams::for_metrics(6.0).unwrap();
        let ca = Dimensions::sanitize([("jurisdiction", "CA")]).unwrap();
        let ny = Dimensions::sanitize([("jurisdiction", "NY")]).unwrap();
        let tallies = BTreeMap::from([
            ((Metric::TemplateView, ca.clone()), 50),
            ((Metric::TemplateUse, ny.clone()), 1),
        ]);

        let estimates = debias_tallies(&params, &tallies);
        assert_eq!(estimates.get(&(Metric::TemplateView, ca)), Some(&50));
        assert_eq!(estimates.get(&(Metric::TemplateUse, ny)), Some(&1));
        assert_eq!(estimates.len(), 2);
    }

    #[test]
    fn single_report_requests_are_debiased_as_one_day() {
        let params = RrParams::for_metrics(2.0).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(50);
        let dims = Dimensions::sanitize([("jurisdiction", "OR")]).unwrap();

        // 1000 requests of one report each, merged the way the store merges them.
        let mut day: BTreeMap<(Metric, Dimensions), u64> = BTreeMap::new();
        for _ in 0..1000 {
            let reported = perturb_metric(&params, Metric::TemplateUse, &mut rng).unwrap();
            let request = [Increment::new(reported, dims.clone())];
            for (key, count) in tally_reports(&request) {
                *day.entry(key).or_insert(0) += count;
            }
        }
        assert_eq!(day.values().sum::<u64>(), 1000);

        let estimates = debias_tallies(&params, &day);
        let used = estimates[&(Metric::TemplateUse, dims.clone())];
        assert!(used >= 800, "estimate {used}, expected ~1000");
        let phantom: u64 = estimates
            .iter()
            .filter(|((metric, _), _)| *metric != Metric::TemplateUse)
            .map(|(_, count)| count)
            .sum();
        assert!(phantom < 300, "phantom estimate {phantom}");
    }

    #[test]
    fn entropy_failure_is_fatal() {
        let params = RrParams::for_metrics(2.0).unwrap();
        let result = perturb_metric(&params, Metric::TemplateView, &mut FailingRng);
        assert!(matches!(result, Err(PrivacyError::EntropyUnavailable)));
    }
}
