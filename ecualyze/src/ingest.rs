/// Ingest orchestration: parse the input files, merge them into the normalized stream, and run
/// the analysis passes.
///
/// The two parallel granularities are independent.  Files are parsed concurrently - each worker
/// owns its file's records outright and nothing is shared - and the timeline merge is the single
/// synchronization point: it waits for every per-file parse to complete or fail.  Once the
/// stream exists, the three analyses are read-only consumers of the same immutable slice and run
/// on their own threads with no locking; each writes only its private accumulator.
///
/// Cancellation is cooperative and file-grained: the flag is checked as each parse task starts,
/// and an interrupted run fails as a whole, discarding partial per-file results rather than
/// merging them.
use crate::load;
use crate::report::{collect_identity, AnalysisResult, FileProvenance, Provenance};
use crate::soa;
use crate::trap;

use anyhow::{bail, Result};
use eculog::{normalize, parse_logfile, AnalysisConfig, FileCounts, FileParse, NormalizedEvent};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

pub struct Ingested {
    pub events: Vec<NormalizedEvent>,
    pub files: Vec<FileProvenance>,
    pub mixed_clocks: bool,
}

/// Parse `file_names` in parallel and merge.  Any unreadable file, or a cancellation, fails the
/// whole run.

pub fn ingest(
    file_names: &[String],
    cfg: &AnalysisConfig,
    cancel: &AtomicBool,
) -> Result<Ingested> {
    let parses = file_names
        .par_iter()
        .map(|name| {
            if cancel.load(Ordering::Relaxed) {
                bail!("Interrupted");
            }
            parse_logfile(name)
        })
        .collect::<Result<Vec<FileParse>>>()?;
    Ok(ingest_parses(parses, cfg))
}

/// The merge half of ingest, split out so callers with in-memory line streams (tests, mostly)
/// can skip the file system.

pub fn ingest_parses(parses: Vec<FileParse>, cfg: &AnalysisConfig) -> Ingested {
    let counts = parses.iter().map(|p| p.counts).collect::<Vec<FileCounts>>();
    let timeline = normalize(parses, cfg);
    let files = timeline
        .notes
        .iter()
        .zip(counts)
        .map(|(n, counts)| FileProvenance {
            source: n.source,
            counts,
            sub_sessions: n.sub_sessions,
            disordered: n.disordered,
            span: n.span,
        })
        .collect();
    Ingested {
        events: timeline.events,
        files,
        mixed_clocks: timeline.mixed_clocks,
    }
}

/// Run the three analysis passes over the normalized stream and assemble the result.  The
/// passes share the stream read-only and run concurrently; the result is built exactly once,
/// after all of them complete.

pub fn analyze(ing: &Ingested, cfg: &AnalysisConfig) -> AnalysisResult {
    let events = &ing.events;
    let (load_report, restarts, soa_stats) = thread::scope(|s| {
        let h_load = s.spawn(|| load::aggregate_load(events, cfg));
        let h_trap = s.spawn(|| trap::detect_restarts(events, cfg));
        let soa_stats = soa::aggregate_soa(events, cfg);
        (h_load.join().unwrap(), h_trap.join().unwrap(), soa_stats)
    });

    let mut totals = FileCounts::default();
    for f in &ing.files {
        totals.add(&f.counts);
    }
    let (project, baseline) = collect_identity(events);
    let provenance = Provenance {
        files: ing.files.clone(),
        totals,
        project,
        baseline,
        mixed_clocks: ing.mixed_clocks,
        empty_input: events.is_empty(),
    };
    AnalysisResult::assemble(load_report, restarts, soa_stats, provenance)
}

#[cfg(test)]
use eculog::parse_lines;
#[cfg(test)]
use ustr::Ustr;

#[cfg(test)]
fn ingest_text(files: &[(&str, &str)], cfg: &AnalysisConfig) -> Ingested {
    let parses = files
        .iter()
        .map(|(name, text)| parse_lines(Ustr::from(name), text.lines()))
        .collect::<Vec<FileParse>>();
    ingest_parses(parses, cfg)
}

#[cfg(test)]
const REALISTIC: &str = "\
2025-08-25 16:52:00.000 BZCU I 0001 RMR:BZCU_MAIN
2025-08-25 16:52:00.010 BZCU I 0001 SWVerNum : 0x010203
2025-08-25 16:52:01.000 BZCU I 1a2b [CPU_LOAD]:core load: 60.0, 10.0
2025-08-25 16:52:02.000 BZCU I 5ae0 SOA topic:PowertrainStatus len:128
garbage line without a clock
2025-08-25 16:52:03.000 BZCU I 5ae0 SOA topic:PowertrainStatus len:64
2025-08-25 16:52:04.000 BZCU I 1a2b [CPU_LOAD]:core load: 80.0, 1x0.0
2025-08-25 16:52:05.000 BZCU I 02c5 {TRAP-RST}:Reset Info:
2025-08-25 16:52:05.020 BZCU I 02c5 {TRAP-RST}:Reset Type: 5
2025-08-25 16:52:06.000 BZCU I 0001 task watchdog fed";

// This tests:
//  - the whole pipeline over a realistic capture: every section populated, conservation holds,
//    identity recovered from the stream

#[test]
fn test_analyze_end_to_end() {
    let cfg = AnalysisConfig::default();
    let ing = ingest_text(&[("t.log", REALISTIC)], &cfg);
    let result = analyze(&ing, &cfg);

    let p = result.provenance();
    assert!(p.totals.total == 10);
    assert!(p.totals.parsed + p.totals.rejected + p.totals.unmatched == p.totals.total);
    assert!(p.totals.rejected == 1);
    assert!(p.totals.unmatched == 1);
    assert!(p.project == Some(Ustr::from("BZCU")));
    assert!(p.baseline == Some(Ustr::from("0x010203")));
    assert!(!p.empty_input);

    assert!(result.load().cores.len() == 2);
    assert!(result.restarts().len() == 1);
    assert!(result.restarts()[0].cause == crate::trap::TrapCause::Trap);
    assert!(result.soa().len() == 1);
    assert!(result.soa()[0].message_count == 2);
}

// This tests:
//  - empty-input behavior: zero usable records yields a valid result with empty aggregates and
//    the empty_input flag, not a failure

#[test]
fn test_analyze_empty_input() {
    let cfg = AnalysisConfig::default();
    let ing = ingest_text(&[("t.log", "junk\nmore junk")], &cfg);
    let result = analyze(&ing, &cfg);
    let p = result.provenance();
    assert!(p.empty_input);
    assert!(p.totals.total == 2 && p.totals.unmatched == 2);
    assert!(result.load().samples.is_empty());
    assert!(result.restarts().is_empty());
    assert!(result.soa().is_empty());
}

// This tests:
//  - idempotence: two runs over identical input produce byte-identical JSON documents

#[test]
fn test_analyze_deterministic() {
    let cfg = AnalysisConfig::default();
    let files = [("a.log", REALISTIC), ("b.log", "[1.000] SOA topic:X len:9")];
    let one = analyze(&ingest_text(&files, &cfg), &cfg).json_string();
    let two = analyze(&ingest_text(&files, &cfg), &cfg).json_string();
    assert!(one == two);
    assert!(!one.is_empty());
}

// This tests:
//  - ingest over real files, and that a set cancellation flag aborts the run

#[test]
fn test_ingest_files_and_cancel() {
    let dir = std::env::temp_dir().join(format!("ecualyze-ingest-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("cap.log");
    std::fs::write(&path, REALISTIC).unwrap();
    let names = vec![path.to_string_lossy().into_owned()];

    let cfg = AnalysisConfig::default();
    let cancel = AtomicBool::new(false);
    let ing = ingest(&names, &cfg, &cancel).unwrap();
    assert!(ing.events.len() == 8);

    cancel.store(true, Ordering::Relaxed);
    assert!(ingest(&names, &cfg, &cancel).is_err());

    let _ = std::fs::remove_dir_all(&dir);
}
