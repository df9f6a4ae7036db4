/// Detect TRAP restarts in the normalized stream.
///
/// A restart signature is a marker record ("{TRAP-RST}:Reset Info:") optionally followed, within
/// a bounded lookahead, by cause evidence ("Reset Type:", "DEADD:", "Func<k>:") from the same
/// file.  Each marker opens its own scan context; contexts are tracked independently, so a
/// second marker arriving mid-lookahead starts a fresh window without disturbing the first.
/// Cause evidence closes the oldest open context from its file.  A context whose budget expires
/// - line budget counted in subsequent records from the same file, optional wall budget on the
/// normalized axis - is emitted with low confidence and cause Unknown.
///
/// Evidence never crosses files: restarts are per unit, and the merged stream interleaves files
/// freely.
use crate::format;

use eculog::{AnalysisConfig, NormalizedEvent, RecordPayload, TimePoint, TrapEvidence};
use anyhow::Result;
use std::collections::HashMap;
use std::io;
use ustr::Ustr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    PowerOn,
    Watchdog,
    SoftwareRequest,
    Trap,
    MemoryAccess,
    Unknown,
}

impl TrapCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrapCause::PowerOn => "power-on",
            TrapCause::Watchdog => "watchdog",
            TrapCause::SoftwareRequest => "software-request",
            TrapCause::Trap => "trap",
            TrapCause::MemoryAccess => "memory-access",
            TrapCause::Unknown => "unknown",
        }
    }
}

// Reset Type codes as emitted by the BZCU firmware family.

fn classify_reset_type(code: u32) -> TrapCause {
    match code {
        1 => TrapCause::PowerOn,
        2 => TrapCause::Watchdog,
        3 => TrapCause::SoftwareRequest,
        4 | 5 => TrapCause::Trap,
        _ => TrapCause::Unknown,
    }
}

fn classify_evidence(evidence: &TrapEvidence) -> (TrapCause, String) {
    match evidence {
        TrapEvidence::ResetType(code) => (classify_reset_type(*code), format!("reset type {code}")),
        TrapEvidence::DataAddress(addr) => {
            (TrapCause::MemoryAccess, format!("DEADD 0x{addr:08x}"))
        }
        TrapEvidence::FuncFrame { frame, addr } => {
            (TrapCause::Trap, format!("Func{frame} 0x{addr:08x}"))
        }
    }
}

/// One detected restart.  Created atomically when a scan context closes; never mutated.

#[derive(Debug, Clone, PartialEq)]
pub struct RestartEvent {
    /// Time and sequence number of the marker record.
    pub time: TimePoint,
    pub seq: u64,
    pub source: Ustr,
    pub cause: TrapCause,
    /// Human-readable evidence summary, empty for timeouts.
    pub detail: String,
    pub confidence: Confidence,
    /// The marker line payload, plus the cause line payload when one was matched.
    pub excerpt: String,
}

struct Context {
    source: Ustr,
    time: TimePoint,
    seq: u64,
    excerpt: Box<str>,
    lines_left: u32,
    deadline: Option<TimePoint>,
}

fn timeout_event(c: Context) -> RestartEvent {
    RestartEvent {
        time: c.time,
        seq: c.seq,
        source: c.source,
        cause: TrapCause::Unknown,
        detail: "".to_string(),
        confidence: Confidence::Low,
        excerpt: c.excerpt.into(),
    }
}

pub fn detect_restarts(events: &[NormalizedEvent], cfg: &AnalysisConfig) -> Vec<RestartEvent> {
    // Open contexts in marker order; the FIFO discipline is what pairs each cause with the
    // oldest signature still waiting.
    let mut open: Vec<Context> = vec![];
    let mut out: Vec<RestartEvent> = vec![];

    for e in events {
        // Wall-budget expiry first: a cause arriving after the deadline must not claim an
        // already-expired context.
        let mut i = 0;
        while i < open.len() {
            if open[i].deadline.map_or(false, |d| e.time > d) {
                out.push(timeout_event(open.remove(i)));
            } else {
                i += 1;
            }
        }

        if let RecordPayload::TrapCause { evidence, excerpt } = &e.record.payload {
            if let Some(ix) = open.iter().position(|c| c.source == e.record.source) {
                let c = open.remove(ix);
                let (cause, detail) = classify_evidence(evidence);
                out.push(RestartEvent {
                    time: c.time,
                    seq: c.seq,
                    source: c.source,
                    cause,
                    detail,
                    confidence: Confidence::High,
                    excerpt: format!("{} / {}", c.excerpt, excerpt),
                });
            }
            // No open context: trailing evidence of an already-closed signature, ignore.
        }

        let opened = if let RecordPayload::TrapMarker { excerpt } = &e.record.payload {
            open.push(Context {
                source: e.record.source,
                time: e.time,
                seq: e.seq,
                excerpt: excerpt.clone(),
                lines_left: cfg.trap_budget.lines,
                deadline: cfg.trap_budget.micros.map(|m| e.time + m),
            });
            true
        } else {
            false
        };

        // This record is one line of lookahead for every older context from the same file.
        if cfg.trap_budget.lines > 0 {
            let lim = open.len() - opened as usize;
            let mut i = 0;
            let mut scanned = 0;
            while scanned < lim {
                if open[i].source == e.record.source {
                    open[i].lines_left -= 1;
                    if open[i].lines_left == 0 {
                        out.push(timeout_event(open.remove(i)));
                        scanned += 1;
                        continue;
                    }
                }
                i += 1;
                scanned += 1;
            }
        }
    }

    // End of stream: whatever is still open never found its cause.
    for c in open.drain(..) {
        out.push(timeout_event(c));
    }

    out.sort_by_key(|r| (r.time, r.seq));
    out
}

pub fn print_traps(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    restarts: &[RestartEvent],
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = match fmt {
        Some(ref s) => s,
        None => FMT_DEFAULTS,
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, restarts, &());
    Ok(())
}

pub fn fmt_help() -> format::Help {
    let (formatters, aliases) = my_formatters();
    format::Help {
        fields: formatters.keys().cloned().collect::<Vec<String>>(),
        aliases: aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<(String, Vec<String>)>>(),
        defaults: FMT_DEFAULTS.to_string(),
    }
}

const FMT_DEFAULTS: &str = "time,file,cause,detail,confidence";

type TrapDatum<'a> = &'a RestartEvent;
type TrapCtx<'a> = &'a ();

fn my_formatters() -> (
    HashMap<String, &'static dyn Fn(TrapDatum, TrapCtx) -> String>,
    HashMap<String, Vec<String>>,
) {
    let mut formatters: HashMap<String, &'static dyn Fn(TrapDatum, TrapCtx) -> String> =
        HashMap::new();
    let mut aliases = HashMap::new();
    formatters.insert("time".to_string(), &format_time);
    formatters.insert("seq".to_string(), &format_seq);
    formatters.insert("file".to_string(), &format_file);
    formatters.insert("cause".to_string(), &format_cause);
    formatters.insert("detail".to_string(), &format_detail);
    formatters.insert("confidence".to_string(), &format_confidence);
    formatters.insert("excerpt".to_string(), &format_excerpt);
    aliases.insert(
        "all".to_string(),
        vec![
            "time".to_string(),
            "seq".to_string(),
            "file".to_string(),
            "cause".to_string(),
            "detail".to_string(),
            "confidence".to_string(),
            "excerpt".to_string(),
        ],
    );
    (formatters, aliases)
}

fn format_time(d: TrapDatum, _: TrapCtx) -> String {
    eculog::format_timepoint(d.time)
}

fn format_seq(d: TrapDatum, _: TrapCtx) -> String {
    format!("{}", d.seq)
}

fn format_file(d: TrapDatum, _: TrapCtx) -> String {
    d.source.to_string()
}

fn format_cause(d: TrapDatum, _: TrapCtx) -> String {
    d.cause.as_str().to_string()
}

fn format_detail(d: TrapDatum, _: TrapCtx) -> String {
    d.detail.clone()
}

fn format_confidence(d: TrapDatum, _: TrapCtx) -> String {
    d.confidence.as_str().to_string()
}

fn format_excerpt(d: TrapDatum, _: TrapCtx) -> String {
    d.excerpt.clone()
}

#[cfg(test)]
use eculog::{normalize, parse_lines, TrapBudget};

#[cfg(test)]
fn events_of_files(files: &[(&str, &str)]) -> Vec<NormalizedEvent> {
    let cfg = AnalysisConfig::default();
    let parses = files
        .iter()
        .map(|(name, text)| parse_lines(Ustr::from(name), text.lines()))
        .collect::<Vec<_>>();
    normalize(parses, &cfg).events
}

// This tests:
//  - restart detection, clean signature: marker then cause within budget yields exactly one
//    high-confidence event with the mapped cause

#[test]
fn test_clean_signature() {
    let events = events_of_files(&[(
        "a.log",
        "\
[10.000] {TRAP-RST}:Reset Info:
[10.001] {TRAP-RST}:Reset Type: 2",
    )]);
    let restarts = detect_restarts(&events, &AnalysisConfig::default());
    assert!(restarts.len() == 1);
    let r = &restarts[0];
    assert!(r.cause == TrapCause::Watchdog);
    assert!(r.confidence == Confidence::High);
    assert!(r.detail == "reset type 2");
    assert!(r.time == 10_000_000);
    assert!(r.excerpt.contains("Reset Info:") && r.excerpt.contains("Reset Type: 2"));
}

// This tests:
//  - restart detection, overlapping signatures: two markers closer together than the budget,
//    each followed by its own cause, yield two independent events with the right causes

#[test]
fn test_overlapping_signatures() {
    let events = events_of_files(&[(
        "a.log",
        "\
[10.000] {TRAP-RST}:Reset Info:
[10.001] {TRAP-RST}:Reset Info:
[10.002] {TRAP-RST}:Reset Type: 2
[10.003] {TRAP-RST}:DEADD: d0000010",
    )]);
    let restarts = detect_restarts(&events, &AnalysisConfig::default());
    assert!(restarts.len() == 2);
    assert!(restarts[0].time == 10_000_000);
    assert!(restarts[0].cause == TrapCause::Watchdog);
    assert!(restarts[0].confidence == Confidence::High);
    assert!(restarts[1].time == 10_001_000);
    assert!(restarts[1].cause == TrapCause::MemoryAccess);
    assert!(restarts[1].detail == "DEADD 0xd0000010");
    assert!(restarts[1].confidence == Confidence::High);
}

// This tests:
//  - line-budget expiry emits a low-confidence Unknown event
//  - trailing evidence after expiry is ignored

#[test]
fn test_line_budget_expiry() {
    let mut cfg = AnalysisConfig::default();
    cfg.trap_budget = TrapBudget {
        lines: 2,
        micros: None,
    };
    let events = events_of_files(&[(
        "a.log",
        "\
[10.000] {TRAP-RST}:Reset Info:
[10.001] status ok
[10.002] status ok
[10.003] {TRAP-RST}:Reset Type: 5",
    )]);
    let restarts = detect_restarts(&events, &cfg);
    assert!(restarts.len() == 1);
    assert!(restarts[0].cause == TrapCause::Unknown);
    assert!(restarts[0].confidence == Confidence::Low);
    assert!(restarts[0].detail == "");
}

// This tests:
//  - wall-budget expiry, including that a late cause cannot claim an expired context

#[test]
fn test_wall_budget_expiry() {
    let mut cfg = AnalysisConfig::default();
    cfg.trap_budget = TrapBudget {
        lines: 0,
        micros: Some(2_000_000),
    };
    let events = events_of_files(&[(
        "a.log",
        "\
[10.000] {TRAP-RST}:Reset Info:
[15.000] {TRAP-RST}:Reset Type: 5",
    )]);
    let restarts = detect_restarts(&events, &cfg);
    assert!(restarts.len() == 1);
    assert!(restarts[0].confidence == Confidence::Low);
    assert!(restarts[0].cause == TrapCause::Unknown);
}

// This tests:
//  - a marker with no cause is flushed at end of stream as a timeout

#[test]
fn test_end_of_stream_flush() {
    let events = events_of_files(&[("a.log", "[10.000] {TRAP-RST}:Reset Info:")]);
    let restarts = detect_restarts(&events, &AnalysisConfig::default());
    assert!(restarts.len() == 1);
    assert!(restarts[0].confidence == Confidence::Low);
}

// This tests:
//  - cause evidence never crosses files: b.log's cause cannot close a.log's signature

#[test]
fn test_evidence_stays_per_file() {
    let events = events_of_files(&[
        ("a.log", "[10.000] {TRAP-RST}:Reset Info:"),
        (
            "b.log",
            "\
[10.000] {TRAP-RST}:Reset Info:
[10.001] {TRAP-RST}:Reset Type: 1",
        ),
    ]);
    let restarts = detect_restarts(&events, &AnalysisConfig::default());
    assert!(restarts.len() == 2);
    let a = restarts.iter().find(|r| r.source == Ustr::from("a.log")).unwrap();
    let b = restarts.iter().find(|r| r.source == Ustr::from("b.log")).unwrap();
    assert!(a.confidence == Confidence::Low && a.cause == TrapCause::Unknown);
    assert!(b.confidence == Confidence::High && b.cause == TrapCause::PowerOn);
}
