//! # medq Server
//!
//! Clinic queue backend.
//!
//! ## Overview
//!
//! The server exposes the clinic queue engine over HTTP:
//!
//! - **Check-in**: create a priority-tiered queue entry for an appointment
//! - **Staff workflow**: call-next, call-specific, status transitions,
//!   missed-patient requeue
//! - **Position**: 1-indexed rank, wait estimate, and human-readable message
//! - **Live updates**: one SSE channel per appointment, re-pushed on every
//!   queue change
//!
//! ## Architecture
//!
//! Built on Axum; PostgreSQL is the system of record (an in-memory store
//! backs demo mode and tests). The engine lives in `medq-core`.

pub mod app_state;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;

pub use app_state::AppState;
pub use config::ServerConfig;
pub use errors::{AppError, AppResult};
