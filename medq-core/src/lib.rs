//! # medq-core
//!
//! The clinic queue engine and its collaborators:
//!
//! - [`engine::QueueEngine`] — the status state machine, ordering and
//!   position math, and every mutating queue operation.
//! - [`store::QueueStore`] — persistence contract for queue entries, with
//!   Postgres and in-memory implementations.
//! - [`appointments::AppointmentDirectory`] — read-only appointment lookup
//!   plus the two status updates the engine requests.
//! - [`notify::NotificationDispatcher`] — dispatch contract for "three
//!   away", "your turn", and confirmation messages.
//! - [`events::QueueEventBus`] — in-process publish/subscribe for
//!   clinic-changed notices.
//! - [`hub::LiveUpdateHub`] — per-appointment push channels re-fed on every
//!   relevant queue change.

pub mod appointments;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod notify;
pub mod store;

pub use appointments::{
    AppointmentDirectory, InMemoryAppointmentDirectory, PostgresAppointmentDirectory,
};
pub use engine::QueueEngine;
pub use error::{QueueError, Result};
pub use events::{QueueEvent, QueueEventBus};
pub use hub::{LiveUpdateHub, PositionUpdate};
pub use notify::{NotificationContext, NotificationDispatcher, TracingDispatcher};
pub use store::{InMemoryQueueStore, PostgresQueueStore, QueueStore};
