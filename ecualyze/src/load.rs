/// Compute per-core load aggregates from the normalized stream.
///
/// Core-load records carry one percentage per core; samples are bucketed into fixed windows of
/// the configured size, aligned to the time axis origin, and each (core, window) bucket yields
/// one CoreLoadSample with the arithmetic mean of its samples.  Windows with no samples are
/// omitted, not synthesized as zero load.  Out-of-range values (negative, or above the high
/// cut-point) are clamped and the sample flagged, never rejected; by the time a value gets here
/// it has already survived strict parsing and a bad sensor reading is still evidence.
use crate::format;

use eculog::{AnalysisConfig, LoadThresholds, NormalizedEvent, RecordPayload, TimePoint, MICROS_PER_SEC};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadLevel {
    Normal,
    Medium,
    High,
}

impl LoadLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadLevel::Normal => "normal",
            LoadLevel::Medium => "medium",
            LoadLevel::High => "high",
        }
    }
}

/// Level classification is advisory metadata on the sample, a pure function of the mean against
/// the configured cut-points.

pub fn classify_load(load_pct: f32, t: &LoadThresholds) -> LoadLevel {
    if load_pct < t.normal {
        LoadLevel::Normal
    } else if load_pct < t.medium {
        LoadLevel::Medium
    } else {
        LoadLevel::High
    }
}

/// One core's load over one window.  Samples for a given core are non-overlapping and
/// time-ordered; window_end > window_start always.

#[derive(Debug, Clone, PartialEq)]
pub struct CoreLoadSample {
    pub core: u32,
    pub window_start: TimePoint,
    pub window_end: TimePoint,
    /// Arithmetic mean of the window's samples, after clamping.
    pub load_pct: f32,
    pub peak_pct: f32,
    pub samples: u32,
    /// At least one sample in the window was out of range and clamped.
    pub clamped: bool,
    pub level: LoadLevel,
}

/// Whole-run statistics for one core.

#[derive(Debug, Clone, PartialEq)]
pub struct CoreSummary {
    pub core: u32,
    pub avg_pct: f32,
    pub peak_pct: f32,
    /// Total duration of windows classified Medium or above.
    pub busy_secs: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadReport {
    /// Ordered by core, then window start.
    pub samples: Vec<CoreLoadSample>,
    /// Ordered by core.
    pub cores: Vec<CoreSummary>,
}

struct WindowAcc {
    sum: f64,
    peak: f32,
    n: u32,
    clamped: bool,
}

pub fn aggregate_load(events: &[NormalizedEvent], cfg: &AnalysisConfig) -> LoadReport {
    let w = cfg.window_micros;
    let ceiling = cfg.thresholds.high;

    // BTreeMap so samples come out ordered by (core, window) without a separate sort.
    let mut windows: BTreeMap<(u32, TimePoint), WindowAcc> = BTreeMap::new();
    for e in events {
        let RecordPayload::CoreLoad { loads } = &e.record.payload else {
            continue;
        };
        for (core, &raw) in loads.iter().enumerate() {
            let clamped = raw < 0.0 || raw > ceiling;
            let v = raw.clamp(0.0, ceiling);
            let start = e.time.div_euclid(w) * w;
            let acc = windows.entry((core as u32, start)).or_insert(WindowAcc {
                sum: 0.0,
                peak: 0.0,
                n: 0,
                clamped: false,
            });
            acc.sum += v as f64;
            acc.peak = f32::max(acc.peak, v);
            acc.n += 1;
            acc.clamped = acc.clamped || clamped;
        }
    }

    let mut samples = vec![];
    let mut cores: BTreeMap<u32, CoreSummary> = BTreeMap::new();
    for ((core, start), acc) in windows {
        let mean = (acc.sum / acc.n as f64) as f32;
        let level = classify_load(mean, &cfg.thresholds);
        samples.push(CoreLoadSample {
            core,
            window_start: start,
            window_end: start + w,
            load_pct: mean,
            peak_pct: acc.peak,
            samples: acc.n,
            clamped: acc.clamped,
            level,
        });
        let s = cores.entry(core).or_insert(CoreSummary {
            core,
            avg_pct: 0.0,
            peak_pct: 0.0,
            busy_secs: 0.0,
            samples: 0,
        });
        // avg_pct accumulates a sum here and is divided through below.
        s.avg_pct += acc.sum as f32;
        s.peak_pct = f32::max(s.peak_pct, acc.peak);
        s.samples += acc.n as u64;
        if level >= LoadLevel::Medium {
            s.busy_secs += w as f64 / MICROS_PER_SEC as f64;
        }
    }
    let cores = cores
        .into_values()
        .map(|mut s| {
            s.avg_pct /= s.samples as f32;
            s
        })
        .collect();

    LoadReport { samples, cores }
}

pub fn print_load(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    report: &LoadReport,
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = match fmt {
        Some(ref s) => s,
        None => FMT_DEFAULTS,
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, &report.samples, &());
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

const FMT_DEFAULTS: &str = "core,start,load,peak,samples,level";

type LoadDatum<'a> = &'a CoreLoadSample;
type LoadCtx<'a> = &'a ();

fn my_formatters() -> (
    HashMap<String, &'static dyn Fn(LoadDatum, LoadCtx) -> String>,
    HashMap<String, Vec<String>>,
) {
    let mut formatters: HashMap<String, &'static dyn Fn(LoadDatum, LoadCtx) -> String> =
        HashMap::new();
    let mut aliases = HashMap::new();
    formatters.insert("core".to_string(), &format_core);
    formatters.insert("start".to_string(), &format_start);
    formatters.insert("end".to_string(), &format_end);
    formatters.insert("load".to_string(), &format_load);
    formatters.insert("peak".to_string(), &format_peak);
    formatters.insert("samples".to_string(), &format_samples);
    formatters.insert("level".to_string(), &format_level);
    formatters.insert("clamped".to_string(), &format_clamped);
    aliases.insert(
        "all".to_string(),
        vec![
            "core".to_string(),
            "start".to_string(),
            "end".to_string(),
            "load".to_string(),
            "peak".to_string(),
            "samples".to_string(),
            "level".to_string(),
            "clamped".to_string(),
        ],
    );
    (formatters, aliases)
}

fn format_core(d: LoadDatum, _: LoadCtx) -> String {
    format!("{}", d.core)
}

fn format_start(d: LoadDatum, _: LoadCtx) -> String {
    eculog::format_timepoint(d.window_start)
}

fn format_end(d: LoadDatum, _: LoadCtx) -> String {
    eculog::format_timepoint(d.window_end)
}

fn format_load(d: LoadDatum, _: LoadCtx) -> String {
    format!("{:.2}", d.load_pct)
}

fn format_peak(d: LoadDatum, _: LoadCtx) -> String {
    format!("{:.2}", d.peak_pct)
}

fn format_samples(d: LoadDatum, _: LoadCtx) -> String {
    format!("{}", d.samples)
}

fn format_level(d: LoadDatum, _: LoadCtx) -> String {
    d.level.as_str().to_string()
}

fn format_clamped(d: LoadDatum, _: LoadCtx) -> String {
    if d.clamped { "yes".to_string() } else { "no".to_string() }
}

#[cfg(test)]
use eculog::{normalize, parse_lines};
#[cfg(test)]
use ustr::Ustr;

#[cfg(test)]
fn events_of(text: &str) -> Vec<NormalizedEvent> {
    let cfg = AnalysisConfig::default();
    normalize(vec![parse_lines(Ustr::from("t.log"), text.lines())], &cfg).events
}

// This tests:
//  - window mean exactness: samples [60, 80] in one 10s window yield exactly 70
//  - per-core explosion of the load vector

#[test]
fn test_window_mean() {
    let events = events_of(
        "\
[1.000] [CPU_LOAD]:core load: 60.0, 10.0
[9.000] [CPU_LOAD]:core load: 80.0, 20.0",
    );
    let report = aggregate_load(&events, &AnalysisConfig::default());
    assert!(report.samples.len() == 2);
    let c0 = &report.samples[0];
    assert!(c0.core == 0 && c0.window_start == 0 && c0.window_end == 10 * MICROS_PER_SEC);
    assert!(c0.load_pct == 70.0);
    assert!(c0.peak_pct == 80.0);
    assert!(c0.samples == 2);
    assert!(!c0.clamped);
    let c1 = &report.samples[1];
    assert!(c1.core == 1 && c1.load_pct == 15.0);
}

// This tests:
//  - empty windows are omitted, populated ones are ordered by core then window

#[test]
fn test_window_omission_and_order() {
    let events = events_of(
        "\
[1.000] [CPU_LOAD]:core load: 10.0
[35.000] [CPU_LOAD]:core load: 30.0",
    );
    let report = aggregate_load(&events, &AnalysisConfig::default());
    let windows = report
        .samples
        .iter()
        .map(|s| s.window_start / MICROS_PER_SEC)
        .collect::<Vec<TimePoint>>();
    assert!(windows == vec![0, 30]);
}

// This tests:
//  - threshold clamping: a 150% reading is clamped to the high cut and flagged, not rejected
//  - negative readings clamp to zero

#[test]
fn test_clamping() {
    let events = events_of("[1.000] [CPU_LOAD]:core load: 150.0, -5.0");
    let report = aggregate_load(&events, &AnalysisConfig::default());
    assert!(report.samples[0].load_pct == 100.0);
    assert!(report.samples[0].clamped);
    assert!(report.samples[0].level == LoadLevel::High);
    assert!(report.samples[1].load_pct == 0.0);
    assert!(report.samples[1].clamped);
}

// This tests:
//  - level classification at the cut-points
//  - busy time counts windows at Medium or above

#[test]
fn test_levels_and_summary() {
    assert!(classify_load(69.9, &LoadThresholds::default()) == LoadLevel::Normal);
    assert!(classify_load(70.0, &LoadThresholds::default()) == LoadLevel::Medium);
    assert!(classify_load(89.9, &LoadThresholds::default()) == LoadLevel::Medium);
    assert!(classify_load(90.0, &LoadThresholds::default()) == LoadLevel::High);

    let events = events_of(
        "\
[1.000] [CPU_LOAD]:core load: 95.0
[11.000] [CPU_LOAD]:core load: 75.0
[21.000] [CPU_LOAD]:core load: 10.0",
    );
    let report = aggregate_load(&events, &AnalysisConfig::default());
    assert!(report.cores.len() == 1);
    let s = &report.cores[0];
    assert!(s.avg_pct == 60.0);
    assert!(s.peak_pct == 95.0);
    assert!(s.busy_secs == 20.0);
    assert!(s.samples == 3);
}
