//! Core data model types: message records and their flags.

pub mod flags;
pub mod record;

pub use flags::MsgFlags;
pub use record::{FolderCounts, MessageRecord, MessageSummary};
