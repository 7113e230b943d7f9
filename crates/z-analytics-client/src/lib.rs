//! Z-Analytics Client SDK.
//!
//! Applications record events through a [`Reporter`], which perturbs each
//! increment with k-ary randomized response, enforces the local daily
//! contribution cap, and sends batches to the z-analytics service. Nothing
//! that leaves the process carries the true metric.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use z_analytics_client::{AnalyticsClient, ClientOptions, Metric, Reporter, ReporterConfig};
//!
//! # async fn example() -> Result<(), z_analytics_client::ClientError> {
//! let client = AnalyticsClient::with_options(
//!     "http://z-analytics.analytics.svc:8080",
//!     "your-service-api-key",
//!     ClientOptions::with_service_name("web-app"),
//! )?;
//!
//! let reporter = Reporter::new(Arc::new(client), ReporterConfig::default())?;
//! reporter.increment(
//!     Metric::TemplateUse,
//!     [("template_id", "tpl_1"), ("jurisdiction", "CA-12")],
//! )?;
//!
//! // Send whatever is still queued before exiting.
//! reporter.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod reporter;
mod tracker;
mod types;

pub use client::{AnalyticsClient, ClientOptions};
pub use error::ClientError;
pub use reporter::{generate_client_id, BatchSink, Reporter, ReporterConfig};
pub use tracker::ContributionTracker;
pub use types::*;
