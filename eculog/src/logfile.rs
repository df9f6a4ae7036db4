/// Per-file parsing: classify and extract every line of one file, in order, keeping full
/// provenance counts.
///
/// It's an important property of this layer that a bad line is counted and skipped, never fatal.
/// ECU capture rigs truncate lines, interleave bootloader noise with the structured log, and can
/// lose bytes around a reset; an analysis that died on the first such line would never finish on
/// real captures.  Only an I/O error on the input itself is returned as a hard error.
use crate::{classify_line, extract_record, FormatTag, LogRecord, Reject};

use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, warn};
use ustr::Ustr;

/// Line accounting for one file.  The conservation invariant is checked by the consumer:
/// parsed + rejected + unmatched == total, where generic is a sub-count of parsed.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    /// Every input line.
    pub total: u64,
    /// Lines that became records, including generic ones.
    pub parsed: u64,
    /// Parsed lines that matched only the generic catch-all.
    pub generic: u64,
    /// Lines whose descriptor matched but whose fields would not parse.
    pub rejected: u64,
    /// Lines matching no descriptor at all.
    pub unmatched: u64,
}

impl FileCounts {
    pub fn add(&mut self, other: &FileCounts) {
        self.total += other.total;
        self.parsed += other.parsed;
        self.generic += other.generic;
        self.rejected += other.rejected;
        self.unmatched += other.unmatched;
    }
}

/// The ordered parse of one file.  Records appear in encounter order; the timeline normalizer
/// depends on that.

#[derive(Debug)]
pub struct FileParse {
    pub source: Ustr,
    pub records: Vec<LogRecord>,
    pub counts: FileCounts,
}

/// Parse an ordered stream of lines attributed to `source`.  This is the real entry point; the
/// file variant below just feeds it.  Blank lines are counted as unmatched like any other
/// formatless line.

pub fn parse_lines<'a>(source: Ustr, lines: impl Iterator<Item = &'a str>) -> FileParse {
    let mut records = vec![];
    let mut counts = FileCounts::default();
    for (ix, line) in lines.enumerate() {
        counts.total += 1;
        let Some(tag) = classify_line(line) else {
            counts.unmatched += 1;
            continue;
        };
        match extract_record(line, tag, source, (ix + 1) as u32) {
            Ok(r) => {
                counts.parsed += 1;
                if r.tag == FormatTag::Generic {
                    counts.generic += 1;
                }
                records.push(r);
            }
            Err(Reject::MalformedRecord) => {
                debug!(file = source.as_str(), line = ix + 1, "malformed record");
                counts.rejected += 1;
            }
            Err(Reject::NoFormatMatched) => {
                counts.unmatched += 1;
            }
        }
    }
    if counts.rejected > 0 {
        warn!(
            file = source.as_str(),
            rejected = counts.rejected,
            "malformed records dropped"
        );
    }
    FileParse {
        source,
        records,
        counts,
    }
}

/// Parse a log file.  Returns an error only for I/O problems; parse problems are counted.

pub fn parse_logfile(file_name: &str) -> Result<FileParse> {
    let source = Ustr::from(file_name);
    let file = File::open(file_name)?;
    let mut lines = vec![];
    for line in BufReader::new(file).lines() {
        lines.push(line?);
    }
    Ok(parse_lines(source, lines.iter().map(|l| l.as_str())))
}

// This tests:
//  - conservation: parsed + rejected + unmatched == total
//  - the generic sub-count
//  - that records come out in encounter order with 1-based line numbers

#[test]
fn test_parse_lines_conservation() {
    let text = "\
2025-08-25 16:52:08.434 BZCU I 5ae0 SOA topic:PowertrainStatus len:128
bootloader noise, no clock
2025-08-25 16:52:09.000 BZCU I 1a2b [CPU_LOAD]:core load: 12.5, 34.0
2025-08-25 16:52:09.500 BZCU I 1a2b [CPU_LOAD]:core load: 1x.0
2025-08-25 16:52:10.000 BZCU I 0001 task watchdog fed

2025-08-25 16:52:11.000 BZCU I 5ae0 SOA topic:CabinTemp len:24";
    let p = parse_lines(Ustr::from("t.log"), text.lines());
    assert!(p.counts.total == 7);
    assert!(p.counts.parsed == 4);
    assert!(p.counts.generic == 1);
    assert!(p.counts.rejected == 1);
    assert!(p.counts.unmatched == 2);
    assert!(p.counts.parsed + p.counts.rejected + p.counts.unmatched == p.counts.total);
    assert!(p.records.len() == 4);
    assert!(p.records[0].line_no == 1);
    assert!(p.records[1].line_no == 3);
    assert!(p.records[2].line_no == 5);
    assert!(p.records[3].line_no == 7);
}

// This tests:
//  - an empty stream yields empty output, not an error

#[test]
fn test_parse_lines_empty() {
    let p = parse_lines(Ustr::from("t.log"), "".lines());
    assert!(p.counts == FileCounts::default());
    assert!(p.records.is_empty());
}
