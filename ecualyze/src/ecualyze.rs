/// `ecualyze` -- Analyze ECU diagnostic log files
///
/// Run with --help for brief help.
///
/// Quirks
///
/// The --topic and --exclude-topic filters select *SOA records*, not lines: a filtered topic
/// still counts as a parsed line in the provenance totals, it just contributes nothing to the
/// communication statistics.  People expect the totals to shrink; they don't.
///
/// A directory argument is walked recursively and the files found become the run's "arrival
/// order" (sorted), which is also the tie-break order for records with equal timestamps.  Two
/// runs over the same tree therefore agree, but handing the same files as explicit arguments in
/// a different order is a different run and ties may break differently.
///
/// The --from and --to bounds are wall-clock times.  Records from captures with a monotonic
/// (seconds-since-boot) clock resolve to small values on the time axis and fall outside any
/// plausible wall-clock bound, so bounding a monotonic capture selects nothing.
mod files;
mod format;
mod ingest;
mod load;
mod metadata;
mod parse;
mod report;
mod soa;
mod trap;

use anyhow::{bail, Result};
use chrono::TimeZone;
use clap::{Args, Parser, Subcommand};
use eculog::{read_config_file, AnalysisConfig, LoadThresholds, TimePoint, MICROS_PER_SEC};
use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ustr::Ustr;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Run the full analysis and print a summary or the JSON document
    Analyze(AnalyzeCmdArgs),

    /// Print per-core load aggregates
    Load(ReportCmdArgs),

    /// Print detected restart events
    Traps(ReportCmdArgs),

    /// Print per-topic communication statistics
    Soa(ReportCmdArgs),

    /// Dump the normalized event stream
    Parse(ReportCmdArgs),

    /// Print per-file parse and timeline metadata
    Metadata(ReportCmdArgs),
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// JSON file with analysis options [default: compiled-in defaults]
    #[arg(long)]
    config_file: Option<String>,

    /// Select records at this wall time or later.  Format YYYY-MM-DD, or a full
    /// "YYYY-MM-DD HH:MM:SS" timestamp [default: no lower bound]
    #[arg(long, short)]
    from: Option<String>,

    /// Select records at this wall time or earlier [default: no upper bound]
    #[arg(long, short)]
    to: Option<String>,

    /// Log files or directories to analyze
    paths: Vec<String>,
}

#[derive(Args, Debug)]
pub struct TuneArgs {
    /// Load aggregation window in seconds
    #[arg(long)]
    window: Option<f64>,

    /// Load percent cut-points as normal,medium,high [default: 70,90,100]
    #[arg(long)]
    thresholds: Option<String>,

    /// Restart lookahead budget in lines
    #[arg(long)]
    trap_lookahead: Option<u32>,

    /// Restart lookahead budget in seconds
    #[arg(long)]
    trap_lookahead_secs: Option<f64>,

    /// Select this SOA topic (repeatable) [default: all]
    #[arg(long)]
    topic: Vec<String>,

    /// Exclude this SOA topic (repeatable) [default: none]
    #[arg(long)]
    exclude_topic: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PrintArgs {
    /// Select output fields and format, "help" for a list
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug)]
pub struct MetaArgs {
    /// Print internal progress information on stderr
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Args, Debug)]
pub struct ReportCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    tune_args: TuneArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct AnalyzeCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    tune_args: TuneArgs,

    /// Print the full result as one JSON document
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    meta_args: MetaArgs,
}

enum ReportKind {
    Load,
    Traps,
    Soa,
    Parse,
    Metadata,
}

fn main() {
    tracing_subscriber::fmt::init();
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("ecualyze: {e}");
            process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("ecualyze {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Analyze(args) => cmd_analyze(args),
        Commands::Load(args) => cmd_report(args, ReportKind::Load),
        Commands::Traps(args) => cmd_report(args, ReportKind::Traps),
        Commands::Soa(args) => cmd_report(args, ReportKind::Soa),
        Commands::Parse(args) => cmd_report(args, ReportKind::Parse),
        Commands::Metadata(args) => cmd_report(args, ReportKind::Metadata),
    }
}

fn cmd_analyze(args: AnalyzeCmdArgs) -> Result<()> {
    let cfg = build_config(&args.source_args, &args.tune_args)?;
    let ing = ingest_from_args(&args.source_args, &cfg, &args.meta_args)?;
    let result = ingest::analyze(&ing, &cfg);
    if args.json {
        println!("{}", result.json_string());
    } else {
        report::print_summary(&mut io::stdout(), &result)?;
    }
    Ok(())
}

fn cmd_report(args: ReportCmdArgs, kind: ReportKind) -> Result<()> {
    let fmt = &args.print_args.fmt;
    let help_shown = match kind {
        ReportKind::Load => format::maybe_help(fmt, load::fmt_help),
        ReportKind::Traps => format::maybe_help(fmt, trap::fmt_help),
        ReportKind::Soa => format::maybe_help(fmt, soa::fmt_help),
        ReportKind::Parse => format::maybe_help(fmt, parse::fmt_help),
        ReportKind::Metadata => format::maybe_help(fmt, metadata::fmt_help),
    };
    if help_shown {
        return Ok(());
    }

    let cfg = build_config(&args.source_args, &args.tune_args)?;
    let ing = ingest_from_args(&args.source_args, &cfg, &args.meta_args)?;
    let mut stdout = io::stdout();
    match kind {
        ReportKind::Load => {
            let report = load::aggregate_load(&ing.events, &cfg);
            load::print_load(&mut stdout, fmt, &report)
        }
        ReportKind::Traps => {
            let restarts = trap::detect_restarts(&ing.events, &cfg);
            trap::print_traps(&mut stdout, fmt, &restarts)
        }
        ReportKind::Soa => {
            let stats = soa::aggregate_soa(&ing.events, &cfg);
            soa::print_soa(&mut stdout, fmt, &stats)
        }
        ReportKind::Parse => parse::print_events(&mut stdout, fmt, &ing.events),
        ReportKind::Metadata => metadata::print_metadata(&mut stdout, fmt, &ing.files),
    }
}

fn ingest_from_args(
    source: &SourceArgs,
    cfg: &AnalysisConfig,
    meta: &MetaArgs,
) -> Result<ingest::Ingested> {
    if source.paths.is_empty() {
        bail!("No log files specified");
    }
    let from = match &source.from {
        Some(s) => parse_time_bound(s, false)?,
        None => TimePoint::MIN,
    };
    let to = match &source.to {
        Some(s) => parse_time_bound(s, true)?,
        None => TimePoint::MAX,
    };
    let file_names = files::find_logfiles(&source.paths)?;
    if file_names.is_empty() {
        bail!("No log files found under the given paths");
    }
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))?;
    let mut ing = ingest::ingest(&file_names, cfg, &cancel)?;
    // Record selection, not line selection: provenance totals are unaffected.
    if source.from.is_some() || source.to.is_some() {
        ing.events.retain(|e| e.time >= from && e.time <= to);
    }
    if meta.verbose {
        eprintln!(
            "{} events from {} files",
            ing.events.len(),
            file_names.len()
        );
    }
    Ok(ing)
}

// A bare date is the whole day: start of day for --from, end of day for --to.

fn parse_time_bound(s: &str, end_of_day: bool) -> Result<TimePoint> {
    if let Ok(t) = eculog::parse_timestamp(s) {
        return Ok(eculog::wall_micros(t));
    }
    let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") else {
        bail!("Unparseable time bound {s}")
    };
    let naive = if end_of_day {
        d.and_hms_opt(23, 59, 59).unwrap()
    } else {
        d.and_hms_opt(0, 0, 0).unwrap()
    };
    Ok(eculog::wall_micros(chrono::Utc.from_utc_datetime(&naive)))
}

fn build_config(source: &SourceArgs, tune: &TuneArgs) -> Result<AnalysisConfig> {
    let mut cfg = match &source.config_file {
        Some(f) => read_config_file(f)?,
        None => AnalysisConfig::default(),
    };
    if let Some(w) = tune.window {
        if !(w > 0.0) {
            bail!("--window must be positive");
        }
        cfg.window_micros = (w * MICROS_PER_SEC as f64) as i64;
    }
    if let Some(ref t) = tune.thresholds {
        cfg.thresholds = parse_thresholds(t)?;
    }
    if let Some(n) = tune.trap_lookahead {
        cfg.trap_budget.lines = n;
    }
    if let Some(s) = tune.trap_lookahead_secs {
        if !(s > 0.0) {
            bail!("--trap-lookahead-secs must be positive");
        }
        cfg.trap_budget.micros = Some((s * MICROS_PER_SEC as f64) as i64);
    }
    if cfg.trap_budget.lines == 0 && cfg.trap_budget.micros.is_none() {
        bail!("The trap lookahead budget cannot be empty");
    }
    for t in &tune.topic {
        cfg.topic_include.insert(Ustr::from(t));
    }
    for t in &tune.exclude_topic {
        cfg.topic_exclude.insert(Ustr::from(t));
    }
    Ok(cfg)
}

fn parse_thresholds(spec: &str) -> Result<LoadThresholds> {
    let parts = spec.split(',').collect::<Vec<&str>>();
    if parts.len() != 3 {
        bail!("--thresholds wants three values: normal,medium,high");
    }
    let normal = parts[0].trim().parse::<f32>()?;
    let medium = parts[1].trim().parse::<f32>()?;
    let high = parts[2].trim().parse::<f32>()?;
    if !(0.0 <= normal && normal <= medium && medium <= high) {
        bail!("--thresholds must be ordered 0 <= normal <= medium <= high");
    }
    Ok(LoadThresholds {
        normal,
        medium,
        high,
    })
}

// This tests:
//  - time bounds from a bare date and from a full timestamp

#[test]
fn test_parse_time_bound() {
    let lo = parse_time_bound("2025-08-25", false).unwrap();
    let hi = parse_time_bound("2025-08-25", true).unwrap();
    assert!(hi - lo == (86_400 - 1) * MICROS_PER_SEC);
    let t = parse_time_bound("2025-08-25 16:52:08", false).unwrap();
    assert!(lo < t && t < hi);
    assert!(parse_time_bound("today", false).is_err());
}

// This tests:
//  - threshold triple parsing and its ordering check

#[test]
fn test_parse_thresholds() {
    let t = parse_thresholds("60, 80, 95").unwrap();
    assert!(t.normal == 60.0 && t.medium == 80.0 && t.high == 95.0);
    assert!(parse_thresholds("60,80").is_err());
    assert!(parse_thresholds("95,80,60").is_err());
    assert!(parse_thresholds("a,b,c").is_err());
}

// This tests:
//  - CLI overrides land in the config, on top of defaults

#[test]
fn test_build_config_overrides() {
    let source = SourceArgs {
        config_file: None,
        from: None,
        to: None,
        paths: vec![],
    };
    let tune = TuneArgs {
        window: Some(2.5),
        thresholds: Some("50,60,70".to_string()),
        trap_lookahead: Some(7),
        trap_lookahead_secs: None,
        topic: vec!["A".to_string()],
        exclude_topic: vec!["B".to_string()],
    };
    let cfg = build_config(&source, &tune).unwrap();
    assert!(cfg.window_micros == 2_500_000);
    assert!(cfg.thresholds.high == 70.0);
    assert!(cfg.trap_budget.lines == 7);
    assert!(cfg.topic_selected(Ustr::from("A")));
    assert!(!cfg.topic_selected(Ustr::from("B")));
    assert!(!cfg.topic_selected(Ustr::from("C")));
}
