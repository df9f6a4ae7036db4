/// Print per-file parse and timeline metadata: line accounting, sub-session count, disorder
/// flag, and the resolved time span.  This is the first thing to look at when a capture parses
/// worse than expected.
use crate::format;
use crate::report::FileProvenance;

use anyhow::Result;
use std::collections::HashMap;
use std::io;

pub fn print_metadata(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    files: &[FileProvenance],
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = match fmt {
        Some(ref s) => s,
        None => FMT_DEFAULTS,
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, files, &());
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

const FMT_DEFAULTS: &str = "file,lines,parsed,rejected,unmatched,subsessions";

type MetaDatum<'a> = &'a FileProvenance;
type MetaCtx<'a> = &'a ();

fn my_formatters() -> (
    HashMap<String, &'static dyn Fn(MetaDatum, MetaCtx) -> String>,
    HashMap<String, Vec<String>>,
) {
    let mut formatters: HashMap<String, &'static dyn Fn(MetaDatum, MetaCtx) -> String> =
        HashMap::new();
    let mut aliases = HashMap::new();
    formatters.insert("file".to_string(), &format_file);
    formatters.insert("lines".to_string(), &format_lines);
    formatters.insert("parsed".to_string(), &format_parsed);
    formatters.insert("generic".to_string(), &format_generic);
    formatters.insert("rejected".to_string(), &format_rejected);
    formatters.insert("unmatched".to_string(), &format_unmatched);
    formatters.insert("subsessions".to_string(), &format_subsessions);
    formatters.insert("disordered".to_string(), &format_disordered);
    formatters.insert("earliest".to_string(), &format_earliest);
    formatters.insert("latest".to_string(), &format_latest);
    aliases.insert(
        "all".to_string(),
        vec![
            "file".to_string(),
            "lines".to_string(),
            "parsed".to_string(),
            "generic".to_string(),
            "rejected".to_string(),
            "unmatched".to_string(),
            "subsessions".to_string(),
            "disordered".to_string(),
            "earliest".to_string(),
            "latest".to_string(),
        ],
    );
    (formatters, aliases)
}

fn format_file(d: MetaDatum, _: MetaCtx) -> String {
    d.source.to_string()
}

fn format_lines(d: MetaDatum, _: MetaCtx) -> String {
    format!("{}", d.counts.total)
}

fn format_parsed(d: MetaDatum, _: MetaCtx) -> String {
    format!("{}", d.counts.parsed)
}

fn format_generic(d: MetaDatum, _: MetaCtx) -> String {
    format!("{}", d.counts.generic)
}

fn format_rejected(d: MetaDatum, _: MetaCtx) -> String {
    format!("{}", d.counts.rejected)
}

fn format_unmatched(d: MetaDatum, _: MetaCtx) -> String {
    format!("{}", d.counts.unmatched)
}

fn format_subsessions(d: MetaDatum, _: MetaCtx) -> String {
    format!("{}", d.sub_sessions)
}

fn format_disordered(d: MetaDatum, _: MetaCtx) -> String {
    if d.disordered { "yes".to_string() } else { "no".to_string() }
}

fn format_earliest(d: MetaDatum, _: MetaCtx) -> String {
    match d.span {
        Some((earliest, _)) => eculog::format_timepoint(earliest),
        None => "".to_string(),
    }
}

fn format_latest(d: MetaDatum, _: MetaCtx) -> String {
    match d.span {
        Some((_, latest)) => eculog::format_timepoint(latest),
        None => "".to_string(),
    }
}
