//! Low-allocation parsing of `<token> [frequency] [label]` lines.
//!
//! Fields are separated by runs of tabs or spaces. Splitting uses memchr2 so
//! the common two-column case is a single SIMD scan.

use crate::kmer::{KmerError, Result};
use crate::record::Record;
use memchr::memchr2;

/// Fast u64 parsing - no allocation, no error formatting.
///
/// Returns None if the input is empty, contains non-digit characters, or
/// does not fit in a u64.
#[inline(always)]
pub fn parse_u64_fast(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        let d = b.wrapping_sub(b'0');
        if d > 9 {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(d as u64)?;
    }
    Some(n)
}

/// Iterator over the non-empty fields of a line.
pub struct Fields<'a> {
    rest: &'a [u8],
}

impl<'a> Fields<'a> {
    #[inline]
    pub fn new(line: &'a [u8]) -> Self {
        Self { rest: line }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a [u8];

    #[inline]
    fn next(&mut self) -> Option<&'a [u8]> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            let (field, rest) = match memchr2(b'\t', b' ', self.rest) {
                Some(pos) => (&self.rest[..pos], &self.rest[pos + 1..]),
                None => (self.rest, &self.rest[self.rest.len()..]),
            };
            self.rest = rest;
            if !field.is_empty() {
                return Some(field);
            }
        }
    }
}

/// Return the first field of a line, the token, without allocating.
#[inline]
pub fn first_field(line: &[u8]) -> Option<&[u8]> {
    Fields::new(line).next()
}

/// Parse one data line into a record with an uppercase token.
///
/// Column rules:
/// - `token`
/// - `token frequency` when the second column is an unsigned integer,
///   otherwise `token label`
/// - `token frequency label`
pub fn parse_record(line: &str, record: u64) -> Result<Record> {
    let mut fields = Fields::new(line.as_bytes());

    let token = fields.next().ok_or_else(|| KmerError::Parse {
        record,
        message: "empty line".to_string(),
    })?;
    let second = fields.next();
    let third = fields.next();
    if fields.next().is_some() {
        return Err(KmerError::Parse {
            record,
            message: format!("expected at most 3 columns in '{}'", line),
        });
    }

    // `line` is a &str and the separators are ASCII, so each field slice
    // starts and ends on a char boundary.
    let text = |bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| KmerError::Parse {
                record,
                message: format!("invalid UTF-8 in field: {}", e),
            })
    };

    let mut out = Record::new(text(token)?.to_ascii_uppercase());
    match (second, third) {
        (None, _) => {}
        (Some(value), None) => match parse_u64_fast(value) {
            Some(frequency) => out.frequency = Some(frequency),
            None => out.label = Some(text(value)?),
        },
        (Some(value), Some(label)) => {
            let frequency = parse_u64_fast(value).ok_or_else(|| KmerError::Parse {
                record,
                message: format!("invalid frequency '{}'", String::from_utf8_lossy(value)),
            })?;
            out.frequency = Some(frequency);
            out.label = Some(text(label)?);
        }
    }
    Ok(out)
}

/// Check if a line should be skipped (blank or comment).
#[inline(always)]
pub fn should_skip_line(line: &[u8]) -> bool {
    line.first() == Some(&b'#') || line.iter().all(|b| b.is_ascii_whitespace())
}

/// Parse every data line of an in-memory table.
///
/// Records are numbered from 1, counting data lines only.
pub fn parse_records(content: &str) -> Result<Vec<Record>> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !should_skip_line(line.as_bytes()))
        .zip(1u64..)
        .map(|(line, record)| parse_record(line, record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64_fast() {
        assert_eq!(parse_u64_fast(b"12345"), Some(12345));
        assert_eq!(parse_u64_fast(b"0"), Some(0));
        assert_eq!(parse_u64_fast(b""), None);
        assert_eq!(parse_u64_fast(b"abc"), None);
        assert_eq!(parse_u64_fast(b"123abc"), None);
        assert_eq!(parse_u64_fast(b"-1"), None);
        assert_eq!(parse_u64_fast(b"18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_u64_fast(b"18446744073709551616"), None);
    }

    #[test]
    fn test_fields_collapse_separators() {
        let fields: Vec<&[u8]> = Fields::new(b"ACGT \t 12\t\tlbl ").collect();
        assert_eq!(fields, vec![&b"ACGT"[..], &b"12"[..], &b"lbl"[..]]);
        assert_eq!(first_field(b"  ACGT 1"), Some(&b"ACGT"[..]));
        assert_eq!(first_field(b""), None);
    }

    #[test]
    fn test_parse_record_columns() {
        assert_eq!(parse_record("acgt", 1).unwrap(), Record::new("ACGT"));
        assert_eq!(
            parse_record("ACGT\t9", 1).unwrap(),
            Record::new("ACGT").with_frequency(9)
        );
        assert_eq!(
            parse_record("ACGT\tsample", 1).unwrap(),
            Record::new("ACGT").with_label("sample")
        );
        assert_eq!(
            parse_record("ACGT 9 sample", 1).unwrap(),
            Record::new("ACGT").with_frequency(9).with_label("sample")
        );
    }

    #[test]
    fn test_parse_record_label_keeps_case() {
        let record = parse_record("acgt\t1\tSample_A", 1).unwrap();
        assert_eq!(record.token, "ACGT");
        assert_eq!(record.label.as_deref(), Some("Sample_A"));
    }

    #[test]
    fn test_parse_record_rejects_bad_frequency() {
        assert!(matches!(
            parse_record("ACGT\tx\tlabel", 7),
            Err(KmerError::Parse { record: 7, .. })
        ));
    }

    #[test]
    fn test_parse_record_rejects_extra_columns() {
        assert!(parse_record("ACGT\t1\ta\tb", 1).is_err());
        assert!(parse_record("   ", 1).is_err());
    }

    #[test]
    fn test_parse_record_accepts_multibyte_labels() {
        let record = parse_record("ACGT\t2\tlib_\u{e9}chantillon", 1).unwrap();
        assert_eq!(record.label.as_deref(), Some("lib_\u{e9}chantillon"));
    }

    #[test]
    fn test_parse_records_three_columns() {
        let records = parse_records("aaaa\t3\ts1\nAACC 5 s2\n").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], Record::new("AAAA").with_frequency(3).with_label("s1"));
        assert_eq!(records[1], Record::new("AACC").with_frequency(5).with_label("s2"));
    }

    #[test]
    fn test_parse_records_skips_comments_and_blank_lines() {
        let records = parse_records("# header\n\nACGT\t1\n\r\n").unwrap();
        assert_eq!(records, vec![Record::new("ACGT").with_frequency(1)]);
    }

    #[test]
    fn test_parse_records_crlf_line_endings() {
        let records = parse_records("ACGT\t2\r\nTTTT\t1\r\n").unwrap();
        assert_eq!(records[0].frequency, Some(2));
        assert_eq!(records[1].token, "TTTT");
    }

    #[test]
    fn test_parse_records_reports_data_line_number() {
        let err = parse_records("# c\nACGT\t1\n\nACGT\tx\ty\n").unwrap_err();
        match err {
            KmerError::Parse { record, .. } => assert_eq!(record, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_should_skip_line() {
        assert!(should_skip_line(b""));
        assert!(should_skip_line(b"#comment"));
        assert!(should_skip_line(b" \t"));
        assert!(!should_skip_line(b"ACGT\t1"));
    }
}
