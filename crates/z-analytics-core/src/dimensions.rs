//! Dimensions and the dimension sanitizer.
//!
//! `Dimensions` is a closed record: one optional field per whitelisted
//! dimension. Unknown keys fail deserialization (`deny_unknown_fields`) and
//! every value is a validated type, so free text and per-user identifiers
//! cannot enter a bucket key.
//!
//! # Canonical key
//!
//! Buckets and snapshots are keyed by a canonical string with one slot per
//! field in fixed order, separated by `|`. Absent fields use the explicit
//! empty marker `~`, which no validated value can contain:
//!
//! ```text
//! tpl_1|CA|~|~|~
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DimensionError;
use crate::geo::{GeoHierarchy, GeoUnit};
use crate::ids::{ClientId, TemplateId};
use crate::metric::Metric;

/// Marker for an absent field in canonical keys.
pub const EMPTY_MARKER: &str = "~";

/// Field separator in canonical keys.
pub const KEY_SEPARATOR: char = '|';

/// Defines a closed wire enum with `as_str`/`parse` helpers that agree with serde.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $field:expr, { $($(#[$vmeta:meta])* $variant:ident => $wire:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every value of the enumeration.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Wire name.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            /// Parse a wire name.
            ///
            /// # Errors
            ///
            /// Returns `DimensionError::InvalidValue` naming the field, never the value.
            pub fn parse(value: &str) -> Result<Self, DimensionError> {
                match value {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(DimensionError::InvalidValue($field)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// How a message was delivered.
    DeliveryMethod, "delivery_method", {
        /// Plain email.
        Email => "email",
        /// Communicating With Congress web-form routing.
        Cwc => "cwc",
        /// Third-party web form.
        WebForm => "web_form",
        /// User's own mail client.
        Mailto => "mailto",
        /// Printed letter.
        Print => "print",
    }
);

wire_enum!(
    /// Sanitized referrer category. Raw referrer URLs are never accepted.
    ReferrerTag, "referrer", {
        /// No referrer.
        Direct => "direct",
        /// Search engine.
        Search => "search",
        /// Social network.
        Social => "social",
        /// Email campaign.
        Email => "email",
        /// Partner organization.
        Partner => "partner",
        /// Another page of the application.
        Internal => "internal",
        /// Anything else.
        Other => "other",
    }
);

wire_enum!(
    /// Categorized error type.
    ErrorCategory, "error_type", {
        /// Network failure.
        Network => "network",
        /// Input validation failure.
        Validation => "validation",
        /// Authentication failure.
        Auth => "auth",
        /// Timeout.
        Timeout => "timeout",
        /// Delivery backend failure.
        Delivery => "delivery",
        /// Content generation failure.
        Generation => "generation",
        /// Rate limited upstream.
        RateLimited => "rate_limited",
        /// Uncategorized.
        Unknown => "unknown",
    }
);

wire_enum!(
    /// Name of a dimension field, used for `group_by`.
    DimensionField, "group_by", {
        /// `template_id`.
        TemplateId => "template_id",
        /// `jurisdiction`.
        Jurisdiction => "jurisdiction",
        /// `delivery_method`.
        DeliveryMethod => "delivery_method",
        /// `referrer`.
        Referrer => "referrer",
        /// `error_type`.
        ErrorType => "error_type",
    }
);

/// The closed set of optional, low-cardinality dimension fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimensions {
    /// Template identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,

    /// Geographic unit (state, district, or a coarser unit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<GeoUnit>,

    /// Delivery method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_method: Option<DeliveryMethod>,

    /// Sanitized referrer tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<ReferrerTag>,

    /// Categorized error type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorCategory>,
}

impl Dimensions {
    /// Validate and normalize loosely-typed `(field, value)` pairs.
    ///
    /// Values are trimmed; jurisdiction codes are upper-cased and the other
    /// fields lower-cased before validation. Unknown or repeated keys are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns a `DimensionError` naming the offending field. The rejected
    /// value itself is never part of the error.
    pub fn sanitize<'a, I>(pairs: I) -> Result<Self, DimensionError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut dims = Self::default();
        for (key, value) in pairs {
            let field = DimensionField::parse(key.trim()).map_err(|_| DimensionError::UnknownField)?;
            if dims.get(field).is_some() {
                return Err(DimensionError::DuplicateField);
            }
            let value = value.trim();
            match field {
                DimensionField::TemplateId => {
                    dims.template_id = Some(
                        value
                            .to_ascii_lowercase()
                            .parse()
                            .map_err(|_| DimensionError::InvalidTemplateId)?,
                    );
                }
                DimensionField::Jurisdiction => {
                    dims.jurisdiction = Some(value.to_ascii_uppercase().parse()?);
                }
                DimensionField::DeliveryMethod => {
                    dims.delivery_method =
                        Some(DeliveryMethod::parse(&value.to_ascii_lowercase())?);
                }
                DimensionField::Referrer => {
                    dims.referrer = Some(ReferrerTag::parse(&value.to_ascii_lowercase())?);
                }
                DimensionField::ErrorType => {
                    dims.error_type = Some(ErrorCategory::parse(&value.to_ascii_lowercase())?);
                }
            }
        }
        Ok(dims)
    }

    /// Canonical slot value of a field, `None` when absent.
    #[must_use]
    pub fn get(&self, field: DimensionField) -> Option<String> {
        match field {
            DimensionField::TemplateId => self.template_id.as_ref().map(ToString::to_string),
            DimensionField::Jurisdiction => self.jurisdiction.as_ref().map(GeoUnit::code),
            DimensionField::DeliveryMethod => self.delivery_method.map(|v| v.as_str().into()),
            DimensionField::Referrer => self.referrer.map(|v| v.as_str().into()),
            DimensionField::ErrorType => self.error_type.map(|v| v.as_str().into()),
        }
    }

    /// Canonical key of this tuple.
    #[must_use]
    pub fn canonical(&self) -> String {
        DimensionField::ALL
            .iter()
            .map(|field| self.get(*field).unwrap_or_else(|| EMPTY_MARKER.to_string()))
            .collect::<Vec<_>>()
            .join(&KEY_SEPARATOR.to_string())
    }

    /// Decode a canonical key.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError::MalformedKey` if the slot count is wrong, or
    /// the field's validation error if a slot does not parse.
    pub fn from_canonical(key: &str) -> Result<Self, DimensionError> {
        let slots: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        if slots.len() != DimensionField::ALL.len() {
            return Err(DimensionError::MalformedKey);
        }
        let pairs = DimensionField::ALL
            .iter()
            .zip(slots)
            .filter(|(_, slot)| *slot != EMPTY_MARKER)
            .map(|(field, slot)| (field.as_str(), slot));
        Self::sanitize(pairs)
    }

    /// Keep only the grouped fields, clearing the rest.
    #[must_use]
    pub fn project(&self, group_by: &[DimensionField]) -> Self {
        let keep = |field: DimensionField| group_by.contains(&field);
        Self {
            template_id: self
                .template_id
                .clone()
                .filter(|_| keep(DimensionField::TemplateId)),
            jurisdiction: self
                .jurisdiction
                .clone()
                .filter(|_| keep(DimensionField::Jurisdiction)),
            delivery_method: self
                .delivery_method
                .filter(|_| keep(DimensionField::DeliveryMethod)),
            referrer: self.referrer.filter(|_| keep(DimensionField::Referrer)),
            error_type: self.error_type.filter(|_| keep(DimensionField::ErrorType)),
        }
    }

    /// Same tuple with the jurisdiction replaced.
    #[must_use]
    pub fn with_jurisdiction(&self, unit: GeoUnit) -> Self {
        Self {
            jurisdiction: Some(unit),
            ..self.clone()
        }
    }

    /// `true` if every field present in `filter` matches this tuple.
    ///
    /// A jurisdiction filter matches the unit itself or any unit beneath it.
    #[must_use]
    pub fn matches(&self, filter: &Self, hierarchy: &GeoHierarchy) -> bool {
        self.matches_except_jurisdiction(filter)
            && filter.jurisdiction.as_ref().map_or(true, |outer| {
                self.jurisdiction
                    .as_ref()
                    .is_some_and(|inner| hierarchy.contains(outer, inner))
            })
    }

    /// Like [`Dimensions::matches`], ignoring the filter's jurisdiction.
    #[must_use]
    pub fn matches_except_jurisdiction(&self, filter: &Self) -> bool {
        fn eq<T: PartialEq>(want: Option<&T>, have: Option<&T>) -> bool {
            want.map_or(true, |w| have == Some(w))
        }
        eq(filter.template_id.as_ref(), self.template_id.as_ref())
            && eq(filter.delivery_method.as_ref(), self.delivery_method.as_ref())
            && eq(filter.referrer.as_ref(), self.referrer.as_ref())
            && eq(filter.error_type.as_ref(), self.error_type.as_ref())
    }
}

/// A single write request. Lives only in transit and batch memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Increment {
    /// The (perturbed, once it leaves the client) metric.
    pub metric: Metric,
    /// Dimension tuple.
    #[serde(default)]
    pub dimensions: Dimensions,
}

impl Increment {
    /// Create an increment.
    #[must_use]
    pub fn new(metric: Metric, dimensions: Dimensions) -> Self {
        Self { metric, dimensions }
    }
}

/// Body of an ingest request: one client's batch of perturbed increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestBatch {
    /// Random per-install token. Only its keyed hash is kept, in memory.
    pub client_id: ClientId,
    /// Perturbed increments.
    pub increments: Vec<Increment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(pairs: &[(&str, &str)]) -> Dimensions {
        Dimensions::sanitize(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn sanitize_normalizes_values() {
        let d = dims(&[
            ("template_id", " TPL_1 "),
            ("jurisdiction", "ca"),
            ("delivery_method", "CWC"),
        ]);
        assert_eq!(d.template_id.unwrap().as_str(), "tpl_1");
        assert_eq!(d.jurisdiction.unwrap().code(), "CA");
        assert_eq!(d.delivery_method, Some(DeliveryMethod::Cwc));
    }

    #[test]
    fn one_district_has_one_canonical_key() {
        let short = dims(&[("jurisdiction", "ca-1")]);
        let padded = dims(&[("jurisdiction", "CA-01")]);
        assert_eq!(short, padded);
        assert_eq!(short.canonical(), "~|CA-01|~|~|~");
    }

    #[test]
    fn sanitize_rejects_unknown_and_duplicate_keys() {
        assert_eq!(
            Dimensions::sanitize([("email", "a@b.c")]),
            Err(DimensionError::UnknownField)
        );
        assert_eq!(
            Dimensions::sanitize([("referrer", "search"), ("referrer", "social")]),
            Err(DimensionError::DuplicateField)
        );
    }

    #[test]
    fn sanitize_error_never_contains_value() {
        let err = Dimensions::sanitize([("referrer", "https://secret.example/?u=42")]).unwrap_err();
        assert_eq!(err, DimensionError::InvalidValue("referrer"));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn canonical_key_uses_empty_marker() {
        let d = dims(&[("template_id", "tpl_1"), ("jurisdiction", "CA")]);
        assert_eq!(d.canonical(), "tpl_1|CA|~|~|~");
        assert_eq!(Dimensions::default().canonical(), "~|~|~|~|~");
    }

    #[test]
    fn canonical_key_roundtrip() {
        let d = dims(&[
            ("template_id", "tpl_9"),
            ("jurisdiction", "NY-10"),
            ("referrer", "partner"),
            ("error_type", "rate_limited"),
        ]);
        assert_eq!(Dimensions::from_canonical(&d.canonical()).unwrap(), d);
        assert_eq!(
            Dimensions::from_canonical("tpl_1|CA"),
            Err(DimensionError::MalformedKey)
        );
    }

    #[test]
    fn serde_rejects_unknown_fields() {
        let err = serde_json::from_str::<Dimensions>(r#"{"user_id":"u-1"}"#);
        assert!(err.is_err());
        let ok: Dimensions =
            serde_json::from_str(r#"{"template_id":"tpl_1","jurisdiction":"CA"}"#).unwrap();
        assert_eq!(ok.canonical(), "tpl_1|CA|~|~|~");
    }

    #[test]
    fn ingest_batch_rejects_unknown_metric() {
        let ok = r#"{"client_id":"0123456789abcdef","increments":[{"metric":"template_view","dimensions":{"jurisdiction":"CA"}}]}"#;
        let batch: IngestBatch = serde_json::from_str(ok).unwrap();
        assert_eq!(batch.increments[0].metric, Metric::TemplateView);

        let bad = r#"{"client_id":"0123456789abcdef","increments":[{"metric":"page_view"}]}"#;
        assert!(serde_json::from_str::<IngestBatch>(bad).is_err());
    }

    #[test]
    fn project_keeps_grouped_fields() {
        let d = dims(&[("template_id", "tpl_1"), ("jurisdiction", "CA-12"), ("referrer", "social")]);
        let p = d.project(&[DimensionField::Jurisdiction]);
        assert_eq!(p.canonical(), "~|CA-12|~|~|~");
    }

    #[test]
    fn jurisdiction_filter_matches_descendants() {
        let hierarchy = GeoHierarchy::new();
        let district = dims(&[("jurisdiction", "CA-12")]);
        assert!(district.matches(&dims(&[("jurisdiction", "CA")]), &hierarchy));
        assert!(district.matches(&dims(&[("jurisdiction", "R-WEST")]), &hierarchy));
        assert!(!district.matches(&dims(&[("jurisdiction", "NY")]), &hierarchy));
        assert!(!Dimensions::default().matches(&dims(&[("jurisdiction", "CA")]), &hierarchy));
    }
}
