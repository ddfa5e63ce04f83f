//! `settle-queue` — debounced jobs with at-least-once dispatch.
//!
//! # Overview
//!
//! Callers enqueue a payload under a key with a delay; each enqueue for the
//! same key overwrites the payload and pushes the deadline out again, so a
//! burst of events collapses into one execution once the key goes quiet.
//!
//! | Component                 | Role                                                    |
//! |---------------------------|---------------------------------------------------------|
//! | [`store::JobStore`]       | Records + due/processing indexes, atomic moves          |
//! | [`enqueue::Enqueuer`]     | `now + delay` debounce writes                           |
//! | [`worker::Worker`]        | Claims due jobs, calls the [`worker::JobSink`], acks     |
//! | [`reaper::Reaper`]        | Returns claims past their visibility deadline to due    |
//!
//! Two stores ship: [`store::SqliteStore`] (durable, shareable between
//! processes) and [`store::MemoryStore`] (tests, single process).

pub mod db;
pub mod enqueue;
pub mod error;
pub mod reaper;
pub mod store;
pub mod types;
pub mod worker;

pub use enqueue::Enqueuer;
pub use error::{QueueError, Result};
pub use reaper::{Reaper, SweepReport};
pub use store::{JobStore, MemoryStore, SqliteStore};
pub use types::{BatchOutcome, Claim, DispatchedJob, JobRecord, JobState, QueueDepth};
pub use worker::{JobSink, Worker};
