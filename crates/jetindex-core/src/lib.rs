//! jetindex-core — foundation for the firehose ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! Connector → Frame Decoder → bounded queue → processing loop
//!                  │                              ├── RecordFilter    (allow-list + shape)
//!                  │                              ├── EntityMapper    (record → entity, privacy)
//!     BackpressureController gates reads          ├── EntityRepository (idempotent, transactional)
//!                                                 └── SequenceTracker (durable resume cursor)
//! ```

pub mod backpressure;
pub mod entity;
pub mod error;
pub mod filter;
pub mod mapper;
pub mod retry;
pub mod tracker;
pub mod types;

pub use backpressure::{BackpressureConfig, BackpressureController, FlowState, FlowTransition};
pub use entity::{Alliance, DomainEntity, EntityBody, Event, IdempotencyKey, Location, Post, Scene};
pub use error::{IndexerError, StorageError};
pub use filter::{RecordFilter, RejectReason};
pub use mapper::{EntityMapper, MapError};
pub use retry::{RetryConfig, RetryPolicy};
pub use tracker::{CursorStore, EntityRepository, SequenceTracker, WriteOutcome};
pub use types::{Collection, CommitEvent, CommitOp};
