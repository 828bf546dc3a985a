//! Mailbox parsing: line classification, the streaming record scanner, and header metadata.

pub mod header;
pub mod line;
pub mod mbox;
