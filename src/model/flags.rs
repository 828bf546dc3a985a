//! Per-message flag set and its `Status` / `X-Status` header encoding.

use bitflags::bitflags;

bitflags! {
    /// Message flags kept in the record cache.
    ///
    /// The low half mirrors what can be written back into the mailbox via
    /// `Status:` / `X-Status:`; the rest lives only for the session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u32 {
        const NEW            = 1 << 0;
        const UNREAD         = 1 << 1;
        const MARKED         = 1 << 2;
        /// Pending delete (`X-Status: d`), still listed.
        const DELETED        = 1 << 3;
        const REPLIED        = 1 << 4;
        const FORWARDED      = 1 << 5;
        /// Hidden from enumeration and dropped by the next purge.
        const REALLY_DELETED = 1 << 6;

        const LOCKED         = 1 << 16;
        const SPAM           = 1 << 17;
        const QUEUED         = 1 << 25;
        const DRAFT          = 1 << 26;
    }
}

impl MsgFlags {
    /// Flags that survive a rewrite because they are encoded in the headers.
    ///
    /// `NEW` is not included: every rewritten record gets `O` (old).
    pub const PERSISTENT: MsgFlags = MsgFlags::UNREAD
        .union(MsgFlags::MARKED)
        .union(MsgFlags::DELETED)
        .union(MsgFlags::REPLIED)
        .union(MsgFlags::FORWARDED)
        .union(MsgFlags::REALLY_DELETED);

    /// Flags assigned to a record that carries no `Status:` header.
    pub fn fresh() -> Self {
        MsgFlags::NEW | MsgFlags::UNREAD
    }

    /// Apply a `Status:` header value (`R` seen, `O` old, `U` unread).
    pub fn apply_status(&mut self, value: &str) {
        if value.contains('R') {
            self.remove(MsgFlags::UNREAD);
        }
        if value.contains('O') {
            self.remove(MsgFlags::NEW);
        }
        if value.contains('U') {
            self.insert(MsgFlags::UNREAD);
        }
    }

    /// Apply an `X-Status:` header value.
    pub fn apply_x_status(&mut self, value: &str) {
        if value.contains('D') {
            self.insert(MsgFlags::REALLY_DELETED);
        }
        for (code, flag) in X_STATUS_CODES {
            if value.contains(*code) {
                self.insert(*flag);
            }
        }
    }

    /// Value for a freshly written `Status:` header.
    pub fn status_value(self) -> &'static str {
        if self.contains(MsgFlags::UNREAD) {
            "O"
        } else {
            "RO"
        }
    }

    /// Value for a freshly written `X-Status:` header, if one is needed.
    ///
    /// `D` is exclusive: a really-deleted record carries nothing else.
    pub fn x_status_value(self) -> Option<String> {
        if self.contains(MsgFlags::REALLY_DELETED) {
            return Some("D".to_string());
        }
        let value: String = X_STATUS_CODES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(code, _)| *code)
            .collect();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Whether two flag sets would encode to different status headers.
    pub fn differs_on_disk(self, other: MsgFlags) -> bool {
        (self & Self::PERSISTENT) != (other & Self::PERSISTENT)
    }

    /// Short human-readable code string, e.g. `"NU"` for new+unread.
    pub fn codes(self) -> String {
        const CODES: &[(char, MsgFlags)] = &[
            ('N', MsgFlags::NEW),
            ('U', MsgFlags::UNREAD),
            ('F', MsgFlags::MARKED),
            ('d', MsgFlags::DELETED),
            ('r', MsgFlags::REPLIED),
            ('f', MsgFlags::FORWARDED),
            ('D', MsgFlags::REALLY_DELETED),
            ('L', MsgFlags::LOCKED),
            ('S', MsgFlags::SPAM),
        ];
        CODES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(code, _)| *code)
            .collect()
    }

    /// Parse a flag name as accepted on the command line (`seen`, `marked`, …).
    pub fn from_name(name: &str) -> Option<Self> {
        let flag = match name.to_ascii_lowercase().as_str() {
            "new" => MsgFlags::NEW,
            "unread" => MsgFlags::UNREAD,
            "marked" | "flagged" => MsgFlags::MARKED,
            "deleted" => MsgFlags::DELETED,
            "replied" => MsgFlags::REPLIED,
            "forwarded" => MsgFlags::FORWARDED,
            "locked" => MsgFlags::LOCKED,
            "spam" => MsgFlags::SPAM,
            _ => return None,
        };
        Some(flag)
    }
}

/// `X-Status:` letters in the order they are written (after the exclusive `D`).
const X_STATUS_CODES: &[(char, MsgFlags)] = &[
    ('F', MsgFlags::MARKED),
    ('d', MsgFlags::DELETED),
    ('r', MsgFlags::REPLIED),
    ('f', MsgFlags::FORWARDED),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_decoding() {
        let mut flags = MsgFlags::fresh();
        flags.apply_status("RO");
        assert!(flags.is_empty());

        let mut flags = MsgFlags::fresh();
        flags.apply_status("O");
        assert_eq!(flags, MsgFlags::UNREAD);
    }

    #[test]
    fn test_x_status_decoding() {
        let mut flags = MsgFlags::empty();
        flags.apply_x_status("Fr");
        assert_eq!(flags, MsgFlags::MARKED | MsgFlags::REPLIED);

        let mut flags = MsgFlags::empty();
        flags.apply_x_status("D");
        assert!(flags.contains(MsgFlags::REALLY_DELETED));
    }

    #[test]
    fn test_status_encoding() {
        assert_eq!(MsgFlags::fresh().status_value(), "O");
        assert_eq!(MsgFlags::REPLIED.status_value(), "RO");
    }

    #[test]
    fn test_x_status_encoding() {
        assert_eq!(MsgFlags::empty().x_status_value(), None);
        assert_eq!(
            (MsgFlags::MARKED | MsgFlags::FORWARDED).x_status_value(),
            Some("Ff".to_string())
        );
        // D suppresses everything else
        assert_eq!(
            (MsgFlags::REALLY_DELETED | MsgFlags::MARKED | MsgFlags::REPLIED).x_status_value(),
            Some("D".to_string())
        );
    }

    #[test]
    fn test_session_flags_do_not_dirty() {
        let a = MsgFlags::UNREAD;
        assert!(!a.differs_on_disk(a | MsgFlags::SPAM | MsgFlags::NEW));
        assert!(a.differs_on_disk(a | MsgFlags::MARKED));
    }

    #[test]
    fn test_from_name() {
        assert_eq!(MsgFlags::from_name("Flagged"), Some(MsgFlags::MARKED));
        assert_eq!(MsgFlags::from_name("bogus"), None);
    }
}
