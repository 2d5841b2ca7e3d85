//! Line and number scanning over console output.
//!
//! The controller prints human-readable tables whose column widths drift
//! between firmware revisions, so nothing here relies on fixed offsets.
//! Two tokenizers are provided:
//!
//! - [`IntegerTokens`]: yields signed decimal integers found anywhere in a
//!   line, skipping every run of characters that cannot start a number.
//! - [`fields`]: whitespace-delimited columns, used where a reply has a
//!   documented column schema.

/// Split a raw reply into trimmed, non-empty lines.
///
/// The returned iterator is a view over `text`; clone it to restart.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> + Clone {
    text.split('\n').map(str::trim).filter(|line| !line.is_empty())
}

/// Whitespace-delimited columns of a single line.
pub fn fields(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// True when the first character of `line` is an ASCII digit.
pub fn starts_with_digit(line: &str) -> bool {
    line.as_bytes().first().is_some_and(u8::is_ascii_digit)
}

/// Iterator over the signed decimal integers of a line, in order.
///
/// A `-` only counts as a sign when a digit follows it; otherwise it is
/// skipped like any other separator. Values outside `i64` saturate.
#[derive(Debug, Clone)]
pub struct IntegerTokens<'a> {
    rest: &'a [u8],
}

impl<'a> IntegerTokens<'a> {
    pub fn new(line: &'a str) -> Self {
        Self {
            rest: line.as_bytes(),
        }
    }
}

impl Iterator for IntegerTokens<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            let (&first, tail) = self.rest.split_first()?;
            let negative = first == b'-' && tail.first().is_some_and(u8::is_ascii_digit);
            if !first.is_ascii_digit() && !negative {
                self.rest = tail;
                continue;
            }

            let digits_start = usize::from(negative);
            let digits_len = self.rest[digits_start..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            let end = digits_start + digits_len;
            let token = &self.rest[..end];
            self.rest = &self.rest[end..];

            let value = std::str::from_utf8(token)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(if negative { i64::MIN } else { i64::MAX });
            return Some(value);
        }
    }
}

/// Scan exactly four integers out of `line`.
///
/// Tokens beyond the fourth are ignored. Fewer than four is a decode
/// failure and yields `None`.
pub fn scan_four_integers(line: &str) -> Option<(i64, i64, i64, i64)> {
    let mut tokens = IntegerTokens::new(line);
    Some((tokens.next()?, tokens.next()?, tokens.next()?, tokens.next()?))
}

/// The integer written immediately before the first `marker` in `line`.
///
/// Returns `None` when the marker is missing or no digit precedes it.
pub fn extract_percent_before_marker(line: &str, marker: char) -> Option<u32> {
    let marker_at = line.find(marker)?;
    let head = &line.as_bytes()[..marker_at];
    let digits = head.iter().rev().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let start = marker_at - digits;
    // Saturate on absurdly long digit runs, matching the integer scanner.
    Some(line[start..marker_at].parse::<u32>().unwrap_or(u32::MAX))
}
