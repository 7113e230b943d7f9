//! Core types and privacy mechanisms for z-analytics.
//!
//! This crate holds everything that does not touch I/O:
//!
//! - **Domain**: `Metric`, `Dimensions` (closed record + sanitizer), `GeoUnit`
//!   and the coarsening `GeoHierarchy`
//! - **Client-side privacy**: k-ary randomized response (`RrParams`) and
//!   debiasing of aggregated reports
//! - **Server-side privacy**: deterministic Laplace noise keyed per day
//!   (`NoiseSecret`, `DayKey`, `LaplaceMechanism`) and noise-first
//!   coarsening (`CoarseningEngine`)
//! - **Records**: `Snapshot`, `LedgerEntry`, `Tier`
//! - **Queries**: `QuerySpec` validation and `PrivacyMetadata`
//!
//! # Randomness
//!
//! Every random draw is bounded on `rand::RngCore + rand::CryptoRng` and goes
//! through `try_fill_bytes`. A failing generator yields
//! `PrivacyError::EntropyUnavailable`; nothing falls back to a weaker source.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod coarsen;
pub mod dimensions;
pub mod entropy;
pub mod error;
pub mod geo;
pub mod ids;
pub mod ldp;
pub mod metric;
pub mod noise;
pub mod privacy;
pub mod query;
pub mod records;

pub use coarsen::{Coarsened, CoarsenedRow, CoarseningEngine, NoisyLookup};
pub use dimensions::{
    DeliveryMethod, DimensionField, Dimensions, ErrorCategory, Increment, IngestBatch, ReferrerTag,
    EMPTY_MARKER,
};
pub use error::{DimensionError, PrivacyError, Result};
pub use geo::{GeoHierarchy, GeoLevel, GeoUnit, MetroMap, Region, StateCode};
pub use ids::{ClientId, IdError, RunId, TemplateId};
pub use ldp::{debias_tallies, perturb_metric, tally_reports, RrParams};
pub use metric::Metric;
pub use noise::{DayKey, LaplaceMechanism, NoiseSecret};
pub use privacy::PrivacyConfig;
pub use query::{Coverage, PrivacyMetadata, QueryResult, QuerySpec};
pub use records::{AggregateBucket, BucketKey, DayStatus, LedgerEntry, Snapshot, Tier};
