//! Message records: byte ranges inside the mailbox plus cached metadata.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::flags::MsgFlags;

/// One message stored contiguously in the mailbox file.
///
/// Offsets are absolute byte positions. `header_offset` points at the
/// `From ` separator line, `content_offset` at the first body byte and
/// `end_offset` one past the last byte of the record.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// 1-based position in scan order.
    pub msgnum: u32,
    pub header_offset: u64,
    pub content_offset: u64,
    pub end_offset: u64,

    /// `Message-ID` header value, angle brackets included.
    pub message_id: Option<String>,

    /// First token after `From ` on the separator line.
    pub envelope_sender: Option<String>,

    /// Flags as the user currently sees them.
    pub current_flags: MsgFlags,

    /// Flags as of the last parse of the file.
    pub baseline_flags: MsgFlags,

    /// Set once the record has been extracted during this session.
    pub fetched: Option<PathBuf>,

    /// Raw `Subject:` value.
    pub subject: String,

    /// Raw `From:` value.
    pub from: String,

    /// Parsed `Date:` header, if any.
    pub date: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// A record with offsets only; metadata is filled in by the header pass.
    pub fn new(msgnum: u32, header_offset: u64) -> Self {
        Self {
            msgnum,
            header_offset,
            content_offset: header_offset,
            end_offset: header_offset,
            message_id: None,
            envelope_sender: None,
            current_flags: MsgFlags::fresh(),
            baseline_flags: MsgFlags::fresh(),
            fetched: None,
            subject: String::new(),
            from: String::new(),
            date: None,
        }
    }

    /// Total bytes, separator line included.
    pub fn len(&self) -> u64 {
        self.end_offset - self.header_offset
    }

    /// Whether the record spans zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of the header block, separator and terminating blank line included.
    pub fn header_len(&self) -> u64 {
        self.content_offset - self.header_offset
    }

    /// Bytes after the header block.
    pub fn body_len(&self) -> u64 {
        self.end_offset - self.content_offset
    }

    /// Hidden from enumeration, awaiting purge.
    pub fn is_really_deleted(&self) -> bool {
        self.current_flags.contains(MsgFlags::REALLY_DELETED)
    }

    /// Edited locally since the file was last parsed.
    pub fn is_edited(&self) -> bool {
        self.current_flags != self.baseline_flags
    }

    /// Has a flag change that a rewrite would persist.
    pub fn needs_sync(&self) -> bool {
        self.current_flags.differs_on_disk(self.baseline_flags)
    }

    /// The `(Message-ID, envelope sender)` pair, when both are known.
    pub fn fingerprint(&self) -> Option<(&str, &str)> {
        match (self.message_id.as_deref(), self.envelope_sender.as_deref()) {
            (Some(id), Some(sender)) if !id.is_empty() && !sender.is_empty() => {
                Some((id, sender))
            }
            _ => None,
        }
    }
}

/// Listing view handed to the folder layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageSummary {
    pub msgnum: u32,
    pub size: u64,
    pub flags: String,
    pub message_id: Option<String>,
    pub envelope_sender: Option<String>,
    pub subject: String,
    pub from: String,
    pub date: Option<DateTime<Utc>>,
}

impl From<&MessageRecord> for MessageSummary {
    fn from(record: &MessageRecord) -> Self {
        Self {
            msgnum: record.msgnum,
            size: record.len(),
            flags: record.current_flags.codes(),
            message_id: record.message_id.clone(),
            envelope_sender: record.envelope_sender.clone(),
            subject: record.subject.clone(),
            from: record.from.clone(),
            date: record.date,
        }
    }
}

/// Counts reported to the folder layer after a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FolderCounts {
    pub new: usize,
    pub unread: usize,
    pub total: usize,
    /// Highest message number handed out, including provisional appends.
    pub last_num: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_requires_both_parts() {
        let mut rec = MessageRecord::new(1, 0);
        assert!(rec.fingerprint().is_none());
        rec.message_id = Some("<x@y>".into());
        assert!(rec.fingerprint().is_none());
        rec.envelope_sender = Some("a@b".into());
        assert_eq!(rec.fingerprint(), Some(("<x@y>", "a@b")));
        rec.envelope_sender = Some(String::new());
        assert!(rec.fingerprint().is_none());
    }

    #[test]
    fn test_edit_tracking() {
        let mut rec = MessageRecord::new(1, 0);
        assert!(!rec.is_edited());
        rec.current_flags.insert(MsgFlags::SPAM);
        assert!(rec.is_edited());
        assert!(!rec.needs_sync());
        rec.current_flags.remove(MsgFlags::UNREAD);
        assert!(rec.needs_sync());
    }
}
