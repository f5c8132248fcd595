//! jetindex-codec — binary commit-frame decoder.
//!
//! Decodes the compact binary frames delivered by the firehose into
//! structured commit events. Only the CBOR subset needed for commit
//! messages is implemented: integers, byte strings, text, arrays, maps
//! with text keys, booleans, null, floats, and tag-42 links.
//!
//! Two hard rules, enforced throughout:
//! - Truncated or hostile input yields a typed [`DecodeError`], never a
//!   panic or an unbounded allocation.
//! - Unknown map fields are skipped, so newer upstream frame versions
//!   decode cleanly (forward compatible).

pub mod error;
pub mod frame;
pub mod value;

pub use error::DecodeError;
pub use frame::{decode_frame, Frame};
pub use value::{decode_value, Value};
