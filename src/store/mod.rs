//! Mailbox storage: the parsed-record cache and every operation that reads
//! or changes a mailbox file.

pub mod append;
pub mod compact;
pub mod extract;
pub mod mailbox;
pub mod reconcile;
pub mod registry;

pub use mailbox::MboxStore;
