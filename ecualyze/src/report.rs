/// The analysis result: everything one run produces, assembled once after all passes complete
/// and immutable from then on.  This is the whole surface the reporting side sees; it renders
/// the result, it never reaches back into the pipeline.
///
/// The JSON export is built explicitly so the document layout is stable: field order is fixed,
/// collections are already deterministically ordered by their producers, and nothing in here
/// consults the wall clock.  Two runs over identical input yield byte-identical documents.
use crate::load::LoadReport;
use crate::soa::SoaTopicStat;
use crate::trap::RestartEvent;

use anyhow::Result;
use eculog::{FileCounts, MetaInfo, NormalizedEvent, RecordPayload, TimePoint};
use json::JsonValue;
use std::io::{self, Write};
use ustr::Ustr;

/// Parse and timeline outcome for one input file.

#[derive(Debug, Clone, Copy)]
pub struct FileProvenance {
    pub source: Ustr,
    pub counts: FileCounts,
    pub sub_sessions: u32,
    pub disordered: bool,
    pub span: Option<(TimePoint, TimePoint)>,
}

#[derive(Debug, Clone)]
pub struct Provenance {
    /// In input order.
    pub files: Vec<FileProvenance>,
    pub totals: FileCounts,
    /// Unit tag or RMR banner, whichever the stream yielded first.
    pub project: Option<Ustr>,
    /// Software baseline from the SWVerNum banner.
    pub baseline: Option<Ustr>,
    pub mixed_clocks: bool,
    /// No usable records across all files; aggregates are empty but the result is still valid.
    pub empty_input: bool,
}

pub struct AnalysisResult {
    load: LoadReport,
    restarts: Vec<RestartEvent>,
    soa: Vec<SoaTopicStat>,
    provenance: Provenance,
}

impl AnalysisResult {
    pub fn assemble(
        load: LoadReport,
        restarts: Vec<RestartEvent>,
        soa: Vec<SoaTopicStat>,
        provenance: Provenance,
    ) -> AnalysisResult {
        AnalysisResult {
            load,
            restarts,
            soa,
            provenance,
        }
    }

    pub fn load(&self) -> &LoadReport {
        &self.load
    }

    pub fn restarts(&self) -> &[RestartEvent] {
        &self.restarts
    }

    pub fn soa(&self) -> &[SoaTopicStat] {
        &self.soa
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn to_json(&self) -> JsonValue {
        let mut doc = JsonValue::new_object();

        let mut prov = JsonValue::new_object();
        prov["project"] = opt_str(self.provenance.project);
        prov["baseline"] = opt_str(self.provenance.baseline);
        prov["mixed_clocks"] = self.provenance.mixed_clocks.into();
        prov["empty_input"] = self.provenance.empty_input.into();
        prov["lines"] = counts_json(&self.provenance.totals);
        let mut files = vec![];
        for f in &self.provenance.files {
            let mut obj = JsonValue::new_object();
            obj["file"] = f.source.as_str().into();
            obj["lines"] = counts_json(&f.counts);
            obj["sub_sessions"] = f.sub_sessions.into();
            obj["disordered"] = f.disordered.into();
            if let Some((earliest, latest)) = f.span {
                obj["earliest"] = earliest.into();
                obj["latest"] = latest.into();
            }
            files.push(obj);
        }
        prov["files"] = files.into();
        doc["provenance"] = prov;

        let mut cores = vec![];
        for c in &self.load.cores {
            let mut obj = JsonValue::new_object();
            obj["core"] = c.core.into();
            obj["avg_pct"] = c.avg_pct.into();
            obj["peak_pct"] = c.peak_pct.into();
            obj["busy_secs"] = c.busy_secs.into();
            obj["samples"] = c.samples.into();
            cores.push(obj);
        }
        doc["cores"] = cores.into();

        let mut samples = vec![];
        for s in &self.load.samples {
            let mut obj = JsonValue::new_object();
            obj["core"] = s.core.into();
            obj["window_start"] = s.window_start.into();
            obj["window_end"] = s.window_end.into();
            obj["load_pct"] = s.load_pct.into();
            obj["peak_pct"] = s.peak_pct.into();
            obj["samples"] = s.samples.into();
            obj["clamped"] = s.clamped.into();
            obj["level"] = s.level.as_str().into();
            samples.push(obj);
        }
        doc["load_samples"] = samples.into();

        let mut restarts = vec![];
        for r in &self.restarts {
            let mut obj = JsonValue::new_object();
            obj["time"] = r.time.into();
            obj["seq"] = r.seq.into();
            obj["file"] = r.source.as_str().into();
            obj["cause"] = r.cause.as_str().into();
            obj["detail"] = r.detail.as_str().into();
            obj["confidence"] = r.confidence.as_str().into();
            obj["excerpt"] = r.excerpt.as_str().into();
            restarts.push(obj);
        }
        doc["restarts"] = restarts.into();

        let mut soa = vec![];
        for s in &self.soa {
            let mut obj = JsonValue::new_object();
            obj["topic"] = s.topic.as_str().into();
            obj["count"] = s.message_count.into();
            obj["bytes"] = s.total_bytes.into();
            obj["mean_interval_us"] = s.mean_interval_us.into();
            obj["max_interval_us"] = s.max_interval_us.into();
            soa.push(obj);
        }
        doc["soa"] = soa.into();

        doc
    }

    pub fn json_string(&self) -> String {
        json::stringify(self.to_json())
    }
}

fn opt_str(v: Option<Ustr>) -> JsonValue {
    match v {
        Some(s) => s.as_str().into(),
        None => JsonValue::Null,
    }
}

fn counts_json(c: &FileCounts) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["total"] = c.total.into();
    obj["parsed"] = c.parsed.into();
    obj["generic"] = c.generic.into();
    obj["rejected"] = c.rejected.into();
    obj["unmatched"] = c.unmatched.into();
    obj
}

/// First project and baseline identification in stream order.  The unit tag in the line header
/// outranks the RMR banner; the original logger stamps the former on every line and the latter
/// only at boot.

pub fn collect_identity(events: &[NormalizedEvent]) -> (Option<Ustr>, Option<Ustr>) {
    let mut project = None;
    let mut banner_project = None;
    let mut baseline = None;
    for e in events {
        if project.is_none() && !e.record.unit.is_empty() {
            project = Some(e.record.unit);
        }
        match &e.record.payload {
            RecordPayload::Meta(MetaInfo::Project(p)) => {
                if banner_project.is_none() {
                    banner_project = Some(*p);
                }
            }
            RecordPayload::Meta(MetaInfo::Baseline(v)) => {
                if baseline.is_none() {
                    baseline = Some(*v);
                }
            }
            _ => {}
        }
        if project.is_some() && baseline.is_some() {
            break;
        }
    }
    (project.or(banner_project), baseline)
}

/// Human-oriented run summary, the default rendering of the `analyze` command.

pub fn print_summary(output: &mut dyn io::Write, r: &AnalysisResult) -> Result<()> {
    let p = r.provenance();
    writeln!(
        output,
        "files: {}  lines: {} ({} parsed, {} rejected, {} unmatched)",
        p.files.len(),
        p.totals.total,
        p.totals.parsed,
        p.totals.rejected,
        p.totals.unmatched
    )?;
    if let Some(project) = p.project {
        writeln!(output, "project: {project}")?;
    }
    if let Some(baseline) = p.baseline {
        writeln!(output, "baseline: {baseline}")?;
    }
    if p.empty_input {
        writeln!(output, "no usable records")?;
        return Ok(());
    }
    if p.mixed_clocks {
        writeln!(output, "note: wall-clock and monotonic files mixed in this run")?;
    }
    for f in &p.files {
        if f.disordered {
            writeln!(output, "note: {} has unexplained timestamp regressions", f.source)?;
        }
        if f.sub_sessions > 1 {
            writeln!(output, "note: {} spans {} sub-sessions", f.source, f.sub_sessions)?;
        }
    }

    for c in &r.load().cores {
        writeln!(
            output,
            "core {}: avg {:.2}%  peak {:.2}%  busy {:.0}s  ({} samples)",
            c.core, c.avg_pct, c.peak_pct, c.busy_secs, c.samples
        )?;
    }
    writeln!(output, "restarts: {}", r.restarts().len())?;
    for e in r.restarts() {
        writeln!(
            output,
            "  {}  {} ({})  {}",
            eculog::format_timepoint(e.time),
            e.cause.as_str(),
            e.confidence.as_str(),
            e.detail
        )?;
    }
    let messages: u64 = r.soa().iter().map(|s| s.message_count).sum();
    let bytes: u64 = r.soa().iter().map(|s| s.total_bytes).sum();
    writeln!(
        output,
        "soa: {} topics, {} messages, {} bytes",
        r.soa().len(),
        messages,
        bytes
    )?;
    Ok(())
}
