//! Carry local flag edits from a stale record list onto a reparsed one.
//!
//! Records are re-identified by their `(Message-ID, envelope sender)`
//! fingerprint, never by position: anything may have been inserted or
//! removed in between by another process.

use tracing::trace;

use crate::model::MessageRecord;

/// What happened to the locally edited records of the old list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Edits copied onto a matching new record.
    pub carried: usize,
    /// Edits dropped because the old record had no complete fingerprint.
    pub skipped: usize,
    /// Edits dropped because no new record carries the fingerprint any more.
    pub unmatched: usize,
}

/// Copy `current_flags` of every edited, fingerprinted record in `old` onto
/// the record of `new` with the same fingerprint.
///
/// `baseline_flags` of `new` are left as parsed from disk, so a carried edit
/// still shows up as pending. Records sharing a fingerprint are paired up in
/// file order: the n-th such record in `old` maps to the n-th one in `new`.
pub fn merge(old: &[MessageRecord], new: &mut [MessageRecord]) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let mut claimed = vec![false; new.len()];

    for record in old {
        let edited = record.is_edited();
        let Some(fingerprint) = record.fingerprint() else {
            if edited {
                outcome.skipped += 1;
            }
            continue;
        };

        let target = new
            .iter_mut()
            .zip(claimed.iter_mut())
            .find(|(r, taken)| !**taken && r.fingerprint() == Some(fingerprint));
        match target {
            Some((target, taken)) => {
                *taken = true;
                if !edited {
                    continue;
                }
                trace!(
                    old = record.msgnum,
                    new = target.msgnum,
                    flags = %record.current_flags.codes(),
                    "Carrying flag edit"
                );
                target.current_flags = record.current_flags;
                outcome.carried += 1;
            }
            None if edited => outcome.unmatched += 1,
            None => {}
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MsgFlags;

    fn record(msgnum: u32, offset: u64, id: Option<&str>, sender: Option<&str>) -> MessageRecord {
        let mut r = MessageRecord::new(msgnum, offset);
        r.message_id = id.map(str::to_string);
        r.envelope_sender = sender.map(str::to_string);
        r.current_flags = MsgFlags::UNREAD;
        r.baseline_flags = MsgFlags::UNREAD;
        r
    }

    #[test]
    fn test_edit_follows_fingerprint_to_new_offset() {
        let mut old = vec![record(1, 0, Some("X"), Some("a@b"))];
        old[0].current_flags.insert(MsgFlags::MARKED);

        let mut new = vec![
            record(1, 0, Some("Y"), Some("c@d")),
            record(2, 500, Some("X"), Some("a@b")),
        ];
        let outcome = merge(&old, &mut new);

        assert_eq!(outcome.carried, 1);
        assert!(new[1].current_flags.contains(MsgFlags::MARKED));
        assert!(!new[1].baseline_flags.contains(MsgFlags::MARKED));
        assert!(new[1].needs_sync());
        assert!(!new[0].current_flags.contains(MsgFlags::MARKED));
    }

    #[test]
    fn test_unfingerprinted_edits_are_skipped() {
        let mut old = vec![
            record(1, 0, None, Some("a@b")),
            record(2, 100, Some("Z"), None),
        ];
        old[0].current_flags.remove(MsgFlags::UNREAD);
        old[1].current_flags.insert(MsgFlags::REPLIED);

        let mut new = vec![record(1, 0, None, Some("a@b"))];
        let outcome = merge(&old, &mut new);

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.carried, 0);
        assert_eq!(new[0].current_flags, MsgFlags::UNREAD);
    }

    #[test]
    fn test_unedited_records_are_ignored() {
        let old = vec![record(1, 0, Some("X"), Some("a@b"))];
        let mut new = vec![record(1, 0, Some("X"), Some("a@b"))];
        new[0].current_flags = MsgFlags::empty();
        new[0].baseline_flags = MsgFlags::empty();

        assert_eq!(merge(&old, &mut new), ReconcileOutcome::default());
        assert_eq!(new[0].current_flags, MsgFlags::empty());
    }

    #[test]
    fn test_vanished_record_is_unmatched() {
        let mut old = vec![record(1, 0, Some("X"), Some("a@b"))];
        old[0].current_flags.insert(MsgFlags::DELETED);
        let mut new = vec![record(1, 0, Some("X"), Some("other@b"))];

        let outcome = merge(&old, &mut new);
        assert_eq!(outcome.unmatched, 1);
        assert!(!new[0].current_flags.contains(MsgFlags::DELETED));
    }

    #[test]
    fn test_duplicate_fingerprints_pair_in_order() {
        let mut old = vec![
            record(1, 0, Some("D"), Some("a@b")),
            record(2, 100, Some("D"), Some("a@b")),
        ];
        old[1].current_flags.insert(MsgFlags::MARKED);

        let mut new = vec![
            record(1, 0, Some("N"), Some("z@z")),
            record(2, 50, Some("D"), Some("a@b")),
            record(3, 150, Some("D"), Some("a@b")),
        ];
        let outcome = merge(&old, &mut new);

        assert_eq!(outcome.carried, 1);
        assert!(!new[1].current_flags.contains(MsgFlags::MARKED));
        assert!(new[2].current_flags.contains(MsgFlags::MARKED));
    }
}
