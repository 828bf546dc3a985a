//! Line classification for the mbox state machine.
//!
//! Classification is context-free: whether a `Text` line belongs to a
//! header or a body is decided by the parser state, not here.

/// What a single raw line (terminator included) looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `From ` at column zero: starts a new record.
    RecordStart,
    /// `>From `, `>>From `, … : quoted text, never a boundary.
    QuotedFrom,
    /// Empty line (`\n` or `\r\n`).
    Blank,
    /// Starts with a space or tab: header continuation when inside headers.
    Folded,
    /// Anything else.
    Text,
}

/// Classify one line.
pub fn classify(line: &[u8]) -> LineKind {
    if is_separator(line) {
        LineKind::RecordStart
    } else if is_quoted_from(line) {
        LineKind::QuotedFrom
    } else if is_blank(line) {
        LineKind::Blank
    } else if line.starts_with(b" ") || line.starts_with(b"\t") {
        LineKind::Folded
    } else {
        LineKind::Text
    }
}

/// Check whether a line is an mbox separator (`From ` at the very start).
pub fn is_separator(line: &[u8]) -> bool {
    line.starts_with(b"From ")
}

/// Check whether a line is a `>`-quoted `From ` line.
pub fn is_quoted_from(line: &[u8]) -> bool {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    quotes > 0 && line[quotes..].starts_with(b"From ")
}

/// Check whether a line is blank: nothing but its terminator.
pub fn is_blank(line: &[u8]) -> bool {
    matches!(line, b"\n" | b"\r\n" | b"")
}

/// Terminator used by a line: `"\r\n"`, `"\n"` or `""` at EOF.
pub fn line_ending(line: &[u8]) -> &'static [u8] {
    if line.ends_with(b"\r\n") {
        b"\r\n"
    } else if line.ends_with(b"\n") {
        b"\n"
    } else {
        b""
    }
}

/// Strip a leading UTF-8 byte order mark, if any.
pub fn strip_bom(line: &[u8]) -> &[u8] {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(line)
}

/// Iterate over the lines of a buffer, terminators included.
pub fn split_lines(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split_inclusive(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_separator() {
        assert!(is_separator(
            b"From user@example.com Thu Jan 01 00:00:00 2024\n"
        ));
        assert!(!is_separator(b"from user@example.com\n")); // lowercase
        assert!(!is_separator(b">From user@example.com\n")); // escaped
        assert!(!is_separator(b" From user@example.com\n"));
        assert!(!is_separator(b"Subject: From here\n"));
        assert!(!is_separator(b"From:someone\n"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(b"From a@b Mon Jan 1 00:00:00 2024\n"), LineKind::RecordStart);
        assert_eq!(classify(b">From evil\n"), LineKind::QuotedFrom);
        assert_eq!(classify(b">>>From evil\r\n"), LineKind::QuotedFrom);
        assert_eq!(classify(b"\n"), LineKind::Blank);
        assert_eq!(classify(b"\r\n"), LineKind::Blank);
        assert_eq!(classify(b"\tcontinued\n"), LineKind::Folded);
        assert_eq!(classify(b"Subject: x\n"), LineKind::Text);
        assert_eq!(classify(b">quoted reply\n"), LineKind::Text);
    }

    #[test]
    fn test_whitespace_only_is_not_blank() {
        assert!(!is_blank(b"  \n"));
        assert_eq!(classify(b"  \n"), LineKind::Folded);
    }

    #[test]
    fn test_line_ending() {
        assert_eq!(line_ending(b"abc\r\n"), b"\r\n");
        assert_eq!(line_ending(b"abc\n"), b"\n");
        assert_eq!(line_ending(b"abc"), b"");
    }

    #[test]
    fn test_split_lines_keeps_terminators() {
        let lines: Vec<&[u8]> = split_lines(b"a\nb\r\nc").collect();
        assert_eq!(lines, vec![&b"a\n"[..], &b"b\r\n"[..], &b"c"[..]]);
    }

    #[test]
    fn test_strip_bom() {
        let mut line = vec![0xEF, 0xBB, 0xBF];
        line.extend_from_slice(b"From user@example.com\n");
        assert!(is_separator(strip_bom(&line)));
    }
}
