/// Dump the normalized event stream: one row per event, with the resolved time, provenance, and
/// a short rendering of the typed payload.  Mostly useful for eyeballing what the classifier and
/// the timeline normalizer did to a troublesome capture.
use crate::format;

use eculog::{FormatTag, MetaInfo, NormalizedEvent, RecordPayload, TrapEvidence};
use anyhow::Result;
use std::collections::HashMap;
use std::io;

pub fn print_events(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    events: &[NormalizedEvent],
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = match fmt {
        Some(ref s) => s,
        None => FMT_DEFAULTS,
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, events, &());
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

const FMT_DEFAULTS: &str = "seq,time,file,format,info";

fn tag_name(tag: FormatTag) -> &'static str {
    match tag {
        FormatTag::TrapMarker => "trap-marker",
        FormatTag::TrapCause => "trap-cause",
        FormatTag::CoreLoad => "core-load",
        FormatTag::SoaMsg => "soa-msg",
        FormatTag::Meta => "meta",
        FormatTag::Generic => "generic",
    }
}

fn payload_info(payload: &RecordPayload) -> String {
    match payload {
        RecordPayload::TrapMarker { excerpt } => excerpt.to_string(),
        RecordPayload::TrapCause { evidence, .. } => match evidence {
            TrapEvidence::ResetType(code) => format!("reset type {code}"),
            TrapEvidence::DataAddress(addr) => format!("DEADD 0x{addr:08x}"),
            TrapEvidence::FuncFrame { frame, addr } => format!("Func{frame} 0x{addr:08x}"),
        },
        RecordPayload::CoreLoad { loads } => {
            let fields = loads
                .iter()
                .map(|v| format!("{v}"))
                .collect::<Vec<String>>();
            format!("loads {}", fields.join(","))
        }
        RecordPayload::SoaMsg { topic, bytes } => format!("{topic} {bytes}B"),
        RecordPayload::Meta(MetaInfo::Baseline(v)) => format!("baseline {v}"),
        RecordPayload::Meta(MetaInfo::Project(p)) => format!("project {p}"),
        RecordPayload::Generic => "".to_string(),
    }
}

type EventDatum<'a> = &'a NormalizedEvent;
type EventCtx<'a> = &'a ();

fn my_formatters() -> (
    HashMap<String, &'static dyn Fn(EventDatum, EventCtx) -> String>,
    HashMap<String, Vec<String>>,
) {
    let mut formatters: HashMap<String, &'static dyn Fn(EventDatum, EventCtx) -> String> =
        HashMap::new();
    let mut aliases = HashMap::new();
    formatters.insert("seq".to_string(), &format_seq);
    formatters.insert("time".to_string(), &format_time);
    formatters.insert("file".to_string(), &format_file);
    formatters.insert("line".to_string(), &format_line);
    formatters.insert("sub".to_string(), &format_sub);
    formatters.insert("unit".to_string(), &format_unit);
    formatters.insert("format".to_string(), &format_format);
    formatters.insert("info".to_string(), &format_info);
    aliases.insert(
        "all".to_string(),
        vec![
            "seq".to_string(),
            "time".to_string(),
            "file".to_string(),
            "line".to_string(),
            "sub".to_string(),
            "unit".to_string(),
            "format".to_string(),
            "info".to_string(),
        ],
    );
    (formatters, aliases)
}

fn format_seq(d: EventDatum, _: EventCtx) -> String {
    format!("{}", d.seq)
}

fn format_time(d: EventDatum, _: EventCtx) -> String {
    eculog::format_timepoint(d.time)
}

fn format_file(d: EventDatum, _: EventCtx) -> String {
    d.record.source.to_string()
}

fn format_line(d: EventDatum, _: EventCtx) -> String {
    format!("{}", d.record.line_no)
}

fn format_sub(d: EventDatum, _: EventCtx) -> String {
    format!("{}", d.sub_session)
}

fn format_unit(d: EventDatum, _: EventCtx) -> String {
    d.record.unit.to_string()
}

fn format_format(d: EventDatum, _: EventCtx) -> String {
    tag_name(d.record.tag).to_string()
}

fn format_info(d: EventDatum, _: EventCtx) -> String {
    payload_info(&d.record.payload)
}
