//! `mboxstore` — a storage engine for flat mbox files.
//!
//! This crate indexes the records of an mbox file without loading it into
//! memory, serializes access between processes with file locks, keeps local
//! flag edits across external changes, and rewrites the file safely to
//! purge deleted messages or persist flags.

pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod parser;
pub mod store;
