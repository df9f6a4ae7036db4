/// Timeline normalizer: merge per-file record sequences into one globally ordered stream.
///
/// Each file is first resolved onto the shared TimePoint axis: wall readings become microseconds
/// since the epoch, monotonic readings microseconds since boot.  Within a file the resolved
/// times are forced non-decreasing:
///
/// - A backward step larger than the configured tolerance is taken to be a unit restart (the
///   clock reset).  The records from there on form a new sub-session, offset by the running
///   maximum plus a small gap so file order is preserved and the axis stays monotonic.
///
/// - A smaller backward step is a data-quality problem, not a restart; the record is clamped to
///   the running maximum (arrival-order placement) and the file is flagged as disordered.
///
/// No record is ever dropped for timestamp trouble.  The per-file sequences are then merged with
/// a stable k-way merge keyed by (time, file index, line number) - the tie-break encodes "file
/// arrival order, then original line order" - and the merged events get strictly increasing
/// sequence numbers.
use crate::dates::{wall_micros, TimePoint};
use crate::{AnalysisConfig, FileParse, LogRecord, RawClock};

use itertools::Itertools;
use tracing::{debug, warn};
use ustr::Ustr;

// Separation inserted between the last record of one sub-session and the first of the next.

const SUBSESSION_GAP: TimePoint = 1_000;

/// A LogRecord placed on the merged timeline.

#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    /// Strictly increasing across the merged stream.
    pub seq: u64,
    /// Resolved time on the shared axis.
    pub time: TimePoint,
    /// 0-based sub-session ordinal within the record's file.
    pub sub_session: u32,
    pub record: LogRecord,
}

/// What normalization learned about one file.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileNotes {
    pub source: Ustr,
    /// Number of sub-sessions observed; 0 for a file with no records.
    pub sub_sessions: u32,
    /// Small unexplained timestamp regressions were clamped to arrival order.
    pub disordered: bool,
    /// Resolved (earliest, latest) of the file's records.
    pub span: Option<(TimePoint, TimePoint)>,
}

#[derive(Debug)]
pub struct Timeline {
    pub events: Vec<NormalizedEvent>,
    pub notes: Vec<FileNotes>,
    /// The run contained both wall-clock and monotonic files; cross-domain ordering is stable
    /// but arbitrary.
    pub mixed_clocks: bool,
}

struct Placed {
    time: TimePoint,
    file_ix: u32,
    line_no: u32,
    sub: u32,
    record: LogRecord,
}

/// Merge the ordered per-file parses into the normalized stream.  File order in `files` is the
/// arrival order used for tie-breaking.

pub fn normalize(files: Vec<FileParse>, cfg: &AnalysisConfig) -> Timeline {
    let mut notes = vec![];
    let mut per_file: Vec<Vec<Placed>> = vec![];
    let mut wall_seen = false;
    let mut mono_seen = false;

    for (file_ix, fp) in files.into_iter().enumerate() {
        let source = fp.source;
        let mut placed: Vec<Placed> = Vec::with_capacity(fp.records.len());
        let mut offset: TimePoint = 0;
        let mut prev: Option<TimePoint> = None;
        let mut sub: u32 = 0;
        let mut disordered = false;

        for record in fp.records {
            let raw = match record.clock {
                RawClock::Wall(t) => {
                    wall_seen = true;
                    wall_micros(t)
                }
                RawClock::Mono(m) => {
                    mono_seen = true;
                    m
                }
            };
            let mut t = raw + offset;
            if let Some(p) = prev {
                if t < p {
                    if p - t > cfg.subsession_tolerance_micros {
                        sub += 1;
                        offset = p + SUBSESSION_GAP - raw;
                        t = p + SUBSESSION_GAP;
                        debug!(
                            file = source.as_str(),
                            line = record.line_no,
                            sub_session = sub,
                            "clock reset, starting sub-session"
                        );
                    } else {
                        disordered = true;
                        t = p;
                    }
                }
            }
            prev = Some(t);
            placed.push(Placed {
                time: t,
                file_ix: file_ix as u32,
                line_no: record.line_no,
                sub,
                record,
            });
        }

        if disordered {
            warn!(
                file = source.as_str(),
                "timestamp regressions clamped to arrival order"
            );
        }
        let span = match (placed.first(), placed.last()) {
            (Some(a), Some(b)) => Some((a.time, b.time)),
            _ => None,
        };
        notes.push(FileNotes {
            source,
            sub_sessions: if placed.is_empty() { 0 } else { sub + 1 },
            disordered,
            span,
        });
        per_file.push(placed);
    }

    let events = per_file
        .into_iter()
        .kmerge_by(|a, b| (a.time, a.file_ix, a.line_no) <= (b.time, b.file_ix, b.line_no))
        .enumerate()
        .map(|(ix, p)| NormalizedEvent {
            seq: ix as u64,
            time: p.time,
            sub_session: p.sub,
            record: p.record,
        })
        .collect();

    Timeline {
        events,
        notes,
        mixed_clocks: wall_seen && mono_seen,
    }
}

#[cfg(test)]
use crate::parse_lines;

#[cfg(test)]
fn file_of(name: &str, text: &str) -> FileParse {
    parse_lines(Ustr::from(name), text.lines())
}

// This tests:
//  - a large backward step starts a new sub-session offset past the running maximum
//  - times stay monotonic and sequence numbers are strictly increasing

#[test]
fn test_subsession_split() {
    let f = file_of(
        "a.log",
        "\
[100.000] SOA topic:A len:1
[105.000] SOA topic:A len:1
[1.000] SOA topic:A len:1
[2.000] SOA topic:A len:1",
    );
    let tl = normalize(vec![f], &AnalysisConfig::default());
    assert!(tl.events.len() == 4);
    assert!(tl.notes[0].sub_sessions == 2);
    assert!(!tl.notes[0].disordered);
    let times = tl.events.iter().map(|e| e.time).collect::<Vec<TimePoint>>();
    assert!(times == vec![100_000_000, 105_000_000, 105_000_000 + SUBSESSION_GAP, 106_000_000 + SUBSESSION_GAP]);
    assert!(tl.events.iter().map(|e| e.sub_session).collect::<Vec<u32>>() == vec![0, 0, 1, 1]);
    for w in tl.events.windows(2) {
        assert!(w[0].seq < w[1].seq);
        assert!(w[0].time <= w[1].time);
    }
}

// This tests:
//  - a small backward step is clamped, not split, and flags the file

#[test]
fn test_small_regression_clamped() {
    let f = file_of(
        "a.log",
        "\
[10.000] SOA topic:A len:1
[9.500] SOA topic:A len:1
[11.000] SOA topic:A len:1",
    );
    let tl = normalize(vec![f], &AnalysisConfig::default());
    assert!(tl.notes[0].sub_sessions == 1);
    assert!(tl.notes[0].disordered);
    let times = tl.events.iter().map(|e| e.time).collect::<Vec<TimePoint>>();
    assert!(times == vec![10_000_000, 10_000_000, 11_000_000]);
}

// This tests:
//  - ties across files break by file arrival order, then line order

#[test]
fn test_merge_tie_break() {
    let a = file_of(
        "a.log",
        "\
[5.000] SOA topic:A len:1
[5.000] SOA topic:B len:1",
    );
    let b = file_of("b.log", "[5.000] SOA topic:C len:1");
    let tl = normalize(vec![a, b], &AnalysisConfig::default());
    let order = tl
        .events
        .iter()
        .map(|e| (e.record.source.as_str(), e.record.line_no))
        .collect::<Vec<(&str, u32)>>();
    assert!(order == vec![("a.log", 1), ("a.log", 2), ("b.log", 1)]);
}

// This tests:
//  - cross-file interleave by time
//  - the mixed-clock flag when wall and monotonic files meet

#[test]
fn test_merge_interleave_and_mixed_clocks() {
    let a = file_of(
        "a.log",
        "\
2025-08-25 16:52:00.000 BZCU I 0001 SOA topic:A len:1
2025-08-25 16:52:02.000 BZCU I 0001 SOA topic:A len:1",
    );
    let b = file_of("b.log", "2025-08-25 16:52:01.000 BZCU I 0001 SOA topic:B len:1");
    let tl = normalize(vec![a, b], &AnalysisConfig::default());
    assert!(!tl.mixed_clocks);
    let order = tl
        .events
        .iter()
        .map(|e| e.record.source.as_str())
        .collect::<Vec<&str>>();
    assert!(order == vec!["a.log", "b.log", "a.log"]);

    let a = file_of("a.log", "2025-08-25 16:52:00.000 BZCU I 0001 SOA topic:A len:1");
    let b = file_of("b.log", "[1.000] SOA topic:B len:1");
    let tl = normalize(vec![a, b], &AnalysisConfig::default());
    assert!(tl.mixed_clocks);
    // Monotonic readings are small numbers on the shared axis and sort first.
    assert!(tl.events[0].record.source == Ustr::from("b.log"));
}

// This tests:
//  - an empty file gets a note with no span and contributes nothing

#[test]
fn test_empty_file() {
    let f = file_of("a.log", "");
    let tl = normalize(vec![f], &AnalysisConfig::default());
    assert!(tl.events.is_empty());
    assert!(tl.notes[0].sub_sessions == 0);
    assert!(tl.notes[0].span.is_none());
}
