//! Reading the last lines of a file without reading all of it.

use std::io::{self, Read, Seek, SeekFrom};

/// Average line length assumed before the first backwards seek.
const INITIAL_LINE_ESTIMATE: f64 = 74.0;
/// Growth applied to the estimate whenever a window holds too few lines.
const ESTIMATE_GROWTH: f64 = 1.3;

/// The trailing lines of a file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tail {
    lines: Vec<String>,
    has_more: bool,
    end: u64,
}

impl Tail {
    /// Returns the captured lines, oldest first.
    pub fn lines(&self) -> &[String] {
        self.lines.as_slice()
    }

    /// Returns `true` if the file holds content before the first captured
    /// line.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Byte offset the read stopped at, i.e. the file size as seen by it.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Joins the captured lines back into a single message.
    pub fn to_message(&self) -> String {
        self.lines.join("\n")
    }

    #[doc(hidden)]
    pub fn into_inner(self) -> (Vec<String>, bool) {
        let Tail { lines, has_more, .. } = self;

        (lines, has_more)
    }
}

/// Reads up to the last `n` lines of `reader`, leaving it positioned at the
/// end.
///
/// Seeks back `n` times an estimated line length and reads forward from
/// there, growing the estimate until enough complete lines are found or the
/// start of the file is reached. With very uneven line lengths this degrades
/// to reading the whole file, but never fails for that reason.
pub fn read_last_lines<R: Read + Seek>(reader: &mut R, n: usize) -> io::Result<Tail> {
    let end = reader.seek(SeekFrom::End(0))?;

    if n == 0 {
        return Ok(Tail {
            lines: Vec::new(),
            has_more: end > 0,
            end,
        });
    }

    let mut estimate = INITIAL_LINE_ESTIMATE;

    loop {
        // Float to int casts saturate, so a huge estimate just means "all".
        let span = (estimate * n as f64) as u64;
        let start = end.saturating_sub(span);

        // One byte before `start` tells whether the window begins on a line
        // boundary or in the middle of a line.
        let read_from = start.saturating_sub(1);
        reader.seek(SeekFrom::Start(read_from))?;
        let mut buf = Vec::new();
        reader.by_ref().take(end - read_from).read_to_end(&mut buf)?;
        let read_end = read_from + buf.len() as u64;

        let (on_boundary, window) = match buf.split_first() {
            Some((first, rest)) if start > 0 => (*first == b'\n', rest),
            _ => (true, buf.as_slice()),
        };

        let text = String::from_utf8_lossy(window);
        let mut lines: Vec<&str> = text.lines().collect();
        if !on_boundary && !lines.is_empty() {
            // Partial line
            lines.remove(0);
        }

        if lines.len() >= n || start == 0 {
            let has_more = lines.len() > n || start > 0;
            let lines = lines[lines.len().saturating_sub(n)..]
                .iter()
                .map(|line| line.to_string())
                .collect();

            return Ok(Tail {
                lines,
                has_more,
                end: read_end,
            });
        }

        estimate *= ESTIMATE_GROWTH;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LONG_LINE: &str =
        "A very long line that spans more than seventy four characters in length, and then some";

    fn tail_of(content: &str, n: usize) -> Tail {
        read_last_lines(&mut Cursor::new(content.as_bytes().to_vec()), n).unwrap()
    }

    #[test]
    fn test_fewer_lines_than_requested() {
        let tail = tail_of("foo\nbar\nbaz\n", 10);

        assert_eq!(tail.lines(), &["foo", "bar", "baz"]);
        assert!(!tail.has_more());
        assert_eq!(tail.end(), 12);
    }

    #[test]
    fn test_empty_file() {
        let tail = tail_of("", 10);

        assert!(tail.lines().is_empty());
        assert!(!tail.has_more());
        assert_eq!(tail.to_message(), "");
    }

    #[test]
    fn test_long_lines_grow_the_estimate() {
        let content = format!("{}\n", vec![LONG_LINE; 10].join("\n"));
        let tail = tail_of(&content, 1);

        assert_eq!(tail.lines(), &[LONG_LINE]);
        assert!(tail.has_more());
    }

    #[test]
    fn test_partial_leading_line_is_dropped() {
        let lines: Vec<String> = (0..200).map(|i| format!("line number {}", i)).collect();
        let content = format!("{}\n", lines.join("\n"));
        let tail = tail_of(&content, 5);

        assert_eq!(tail.lines(), &lines[195..]);
        assert!(tail.has_more());
        assert_eq!(tail.to_message(), lines[195..].join("\n"));
    }

    #[test]
    fn test_missing_trailing_newline() {
        let tail = tail_of("foo\nbar", 1);

        assert_eq!(tail.lines(), &["bar"]);
        assert!(tail.has_more());
    }

    #[test]
    fn test_zero_lines() {
        let mut cursor = Cursor::new(b"foo\nbar\n".to_vec());
        let tail = read_last_lines(&mut cursor, 0).unwrap();

        assert!(tail.lines().is_empty());
        assert!(tail.has_more());
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn test_leaves_reader_at_end() {
        let mut cursor = Cursor::new(b"foo\nbar\n".to_vec());
        let tail = read_last_lines(&mut cursor, 1).unwrap();

        assert_eq!(cursor.position(), tail.end());
        let (lines, has_more) = tail.into_inner();
        assert_eq!(lines, vec!["bar".to_string()]);
        assert!(has_more);
    }
}
