/// Generic formatting code for a set of rows extracted from a data structure, presented columnar,
/// as csv, or as json, with or without a header.
///
/// Every report command owns a table of named field formatters; the user picks fields and control
/// words with --fmt=field,...,control and the machinery here does the rest.  Unknown words in the
/// spec are collected and interpreted as control words, so adding a field to a table never breaks
/// an existing spec.
use anyhow::{bail, Result};
use csv;
use json;
use std::collections::{HashMap, HashSet};
use std::io;

pub struct Help {
    pub fields: Vec<String>,
    pub aliases: Vec<(String, Vec<String>)>,
    pub defaults: String,
}

/// If the spec asks for help, print the field catalog and return true; the command should then
/// do nothing else.

pub fn maybe_help<F>(fmt: &Option<String>, f: F) -> bool
where
    F: Fn() -> Help,
{
    let Some(s) = fmt else {
        return false;
    };
    if s.as_str() != "help" {
        return false;
    }
    let mut help = f();
    println!("Syntax:\n  --fmt=(field|alias|control),...");
    println!("\nFields:");
    help.fields.sort();
    for f in help.fields {
        println!("  {f}");
    }
    if !help.aliases.is_empty() {
        println!("\nAliases:");
        help.aliases.sort();
        for (name, mut fields) in help.aliases {
            fields.sort();
            println!("  {name} --> {}", fields.join(","));
        }
    }
    println!("\nDefaults:\n  {}", help.defaults);
    println!("\nControl:\n  csv\n  csvnamed\n  fixed\n  json\n  header\n  noheader\n  tag:<tagvalue>");
    true
}

/// Split `spec` into the known fields (expanding aliases) and the set of other words.  It is an
/// error to select zero fields.

pub fn parse_fields<'a, DataT, FmtT, CtxT>(
    spec: &'a str,
    formatters: &HashMap<String, FmtT>,
    aliases: &'a HashMap<String, Vec<String>>,
) -> Result<(Vec<&'a str>, HashSet<&'a str>)>
where
    FmtT: Fn(&DataT, CtxT) -> String,
    CtxT: Copy,
{
    let mut fields = vec![];
    let mut others = HashSet::new();
    for x in spec.split(',') {
        if formatters.contains_key(x) {
            fields.push(x);
        } else if let Some(expansion) = aliases.get(x) {
            for alias in expansion {
                if formatters.contains_key(alias) {
                    fields.push(alias.as_ref());
                } else {
                    others.insert(alias.as_ref());
                }
            }
        } else {
            others.insert(x);
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected")
    }
    Ok((fields, others))
}

pub struct FormatOptions {
    pub csv: bool,
    pub json: bool,
    pub fixed: bool,
    pub named: bool,  // csvnamed
    pub header: bool, // fixed output carries a header unless noheader; csv only on request
    pub tag: Option<String>,
}

pub fn standard_options(others: &HashSet<&str>) -> FormatOptions {
    let named = others.contains("csvnamed");
    let csv = others.contains("csv") || named;
    let json = others.contains("json") && !csv;
    let fixed = !csv && !json;
    let header = (fixed && !others.contains("noheader")) || (csv && others.contains("header"));
    let mut tag = None;
    for x in others {
        if let Some(t) = x.strip_prefix("tag:") {
            tag = Some(t.to_string());
            break;
        }
    }
    FormatOptions {
        csv,
        json,
        fixed,
        named,
        header,
        tag,
    }
}

/// Apply the selected field formatters to every datum and render.  Write errors are ignored;
/// they are routine for broken pipelines.

pub fn format_data<DataT, FmtT, CtxT>(
    output: &mut dyn io::Write,
    fields: &[&str],
    formatters: &HashMap<String, FmtT>,
    opts: &FormatOptions,
    data: &[DataT],
    ctx: CtxT,
) where
    FmtT: Fn(&DataT, CtxT) -> String,
    CtxT: Copy,
{
    let selected = fields
        .iter()
        .map(|kwd| formatters.get(*kwd).unwrap())
        .collect::<Vec<&FmtT>>();
    let rows = data
        .iter()
        .map(|x| selected.iter().map(|f| f(x, ctx)).collect::<Vec<String>>())
        .collect::<Vec<Vec<String>>>();

    if opts.csv {
        format_csv(output, fields, opts, &rows);
    } else if opts.json {
        format_json(output, fields, opts, &rows);
    } else {
        format_fixed_width(output, fields, opts, &rows);
    }
}

fn format_fixed_width(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    rows: &[Vec<String>],
) {
    let tagged = opts.tag.is_some() as usize;
    let mut widths = vec![0; fields.len() + tagged];
    if opts.header {
        for (i, kwd) in fields.iter().enumerate() {
            widths[i] = kwd.len();
        }
        if let Some(ref _tag) = opts.tag {
            widths[fields.len()] = "tag".len();
        }
    }
    for row in rows {
        for (i, val) in row.iter().enumerate() {
            widths[i] = usize::max(widths[i], val.len());
        }
        if let Some(ref tag) = opts.tag {
            widths[fields.len()] = usize::max(widths[fields.len()], tag.len());
        }
    }

    let mut emit = |cells: Vec<&str>| {
        let mut s = "".to_string();
        for (i, cell) in cells.iter().enumerate() {
            let w = widths[i];
            s += format!("{:w$}  ", cell).as_str();
        }
        let _ = output.write(s.trim_end().as_bytes());
        let _ = output.write(b"\n");
    };

    if opts.header {
        let mut cells = fields.to_vec();
        if opts.tag.is_some() {
            cells.push("tag");
        }
        emit(cells);
    }
    for row in rows {
        let mut cells = row.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
        if let Some(ref tag) = opts.tag {
            cells.push(tag);
        }
        emit(cells);
    }
}

fn format_csv(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    rows: &[Vec<String>],
) {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);
    if opts.header {
        let mut cells = fields.iter().map(|s| s.to_string()).collect::<Vec<String>>();
        if opts.tag.is_some() {
            cells.push("tag".to_string());
        }
        let _ = writer.write_record(cells);
    }
    for row in rows {
        let mut cells = vec![];
        for (i, val) in row.iter().enumerate() {
            if opts.named {
                cells.push(format!("{}={}", fields[i], val));
            } else {
                cells.push(val.clone());
            }
        }
        if let Some(ref tag) = opts.tag {
            if opts.named {
                cells.push(format!("tag={tag}"));
            } else {
                cells.push(tag.clone());
            }
        }
        let _ = writer.write_record(cells);
    }
    let _ = writer.flush();
}

fn format_json(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    rows: &[Vec<String>],
) {
    let mut objects = vec![];
    for row in rows {
        let mut obj = json::JsonValue::new_object();
        for (i, val) in row.iter().enumerate() {
            obj[fields[i]] = val.clone().into();
        }
        if let Some(ref tag) = opts.tag {
            obj["tag"] = tag.clone().into();
        }
        objects.push(obj);
    }
    let _ = output.write(json::stringify(objects).as_bytes());
}

#[cfg(test)]
fn catalog() -> HashMap<String, fn(&(u32, &'static str), ()) -> String> {
    let mut formatters: HashMap<String, fn(&(u32, &'static str), ()) -> String> = HashMap::new();
    formatters.insert("n".to_string(), |d, _| format!("{}", d.0));
    formatters.insert("name".to_string(), |d, _| d.1.to_string());
    formatters
}

// This tests:
//  - field selection, alias expansion, control word collection
//  - zero selected fields is an error

#[test]
fn test_parse_fields() {
    let formatters = catalog();
    let mut aliases = HashMap::new();
    aliases.insert("all".to_string(), vec!["n".to_string(), "name".to_string()]);
    let (fields, others) = parse_fields("all,csv,zap", &formatters, &aliases).unwrap();
    assert!(fields == vec!["n", "name"]);
    assert!(others.contains("csv") && others.contains("zap"));
    assert!(parse_fields("csv", &formatters, &aliases).is_err());
}

// This tests:
//  - the three renderers against the same rows

#[test]
fn test_format_data() {
    let formatters = catalog();
    let aliases = HashMap::new();
    let data = vec![(1u32, "one"), (2u32, "twotwo")];

    let (fields, others) = parse_fields("n,name", &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let mut out = Vec::new();
    format_data(&mut out, &fields, &formatters, &opts, &data, ());
    let text = String::from_utf8(out).unwrap();
    assert!(text == "n  name\n1  one\n2  twotwo\n");

    let (fields, others) = parse_fields("n,name,csvnamed", &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let mut out = Vec::new();
    format_data(&mut out, &fields, &formatters, &opts, &data, ());
    let text = String::from_utf8(out).unwrap();
    assert!(text == "n=1,name=one\nn=2,name=twotwo\n");

    let (fields, others) = parse_fields("n,json", &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let mut out = Vec::new();
    format_data(&mut out, &fields, &formatters, &opts, &data, ());
    let text = String::from_utf8(out).unwrap();
    assert!(text == r#"[{"n":"1"},{"n":"2"}]"#);
}
