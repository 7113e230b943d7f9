//! Z-Analytics HTTP API Service.
//!
//! This crate provides the HTTP API for z-analytics:
//!
//! - Batch ingestion with server-side contribution bounding and debiasing
//! - Daily snapshot materialization with a privacy budget ledger
//! - Queries over materialized snapshots with noise-first coarsening
//!
//! # Authentication
//!
//! 1. **Service API keys** (`x-api-key`) - ingest and query, used by the
//!    hosting application
//! 2. **Admin API keys** (`x-admin-key`) - materialization and the ledger,
//!    used by operators and the scheduler

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod limiter;
pub mod materialize;
pub mod query;
pub mod routes;
pub mod state;

pub use config::{ConfigError, ServiceConfig};
pub use error::ApiError;
pub use limiter::{CappedBatch, ContributionLimiter};
pub use materialize::{MaterializeError, MaterializeReport, Materializer, NoiseKeys};
pub use routes::create_router;
pub use state::AppState;
