//! jetindex-stream — the firehose connector.
//!
//! Orchestrates transport, decoding, queueing, backpressure,
//! reconnection, and checkpointing:
//!
//! ```text
//! FrameTransport → decode_frame → CommitQueue (bounded) → Pipeline
//!       ▲                             │                      ├── RecordFilter
//!       └── reads suspended while ────┘                      ├── EntityMapper
//!           BackpressureController is paused                 ├── EntityRepository
//!                                                            └── SequenceTracker
//! ```
//!
//! One reading task owns the transport and never blocks on persistence
//! I/O; processing tasks drain the queue. On transport failure the
//! connector reconnects with exponential backoff and resumes from the
//! last persisted cursor — re-delivery is absorbed by the repository's
//! idempotency.

pub mod config;
pub mod connector;
pub mod pipeline;
pub mod queue;
pub mod transport;
pub mod ws;

pub use config::ConnectorConfig;
pub use connector::{Connector, ConnectorHandle, ConnectorState};
pub use queue::{commit_queue, CommitQueue, SharedReceiver};
pub use transport::{FrameStream, FrameTransport, TransportError};
pub use ws::WsTransport;
