/// Analysis configuration.
///
/// One immutable value, built up front and threaded through every component call.  Nothing in
/// the pipeline reads process-wide state; this is what keeps the per-file parse fan-out and the
/// parallel analysis passes safe, and what makes the components testable in isolation.
///
/// The optional config file is an object with the following named fields, all optional:
///
///   load_thresholds - object {normal, medium, high}, percent cut-points for the load level
///                     classification and the clamping ceiling
///   window_secs - number, the load aggregation window
///   trap_lookahead_lines - integer, the restart-signature lookahead budget in lines
///   trap_lookahead_secs - number, optional additional wall budget for the same lookahead
///   topic_include - array of strings, SOA topics to include (empty or absent: all)
///   topic_exclude - array of strings, SOA topics to drop
///   subsession_tolerance_secs - number, backward clock step that indicates a unit restart
///
/// Since the input is human-generated and fields are optional, this uses the generic JSON parser
/// followed by explicit decoding of the fields, rather than a derived strongly-typed parser.
use crate::dates::{TimePoint, MICROS_PER_SEC};

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use ustr::Ustr;

/// Percent cut-points: below `normal` is Normal, below `medium` is Medium, High above that.
/// `high` is also the ceiling out-of-range samples are clamped to.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadThresholds {
    pub normal: f32,
    pub medium: f32,
    pub high: f32,
}

impl Default for LoadThresholds {
    fn default() -> LoadThresholds {
        LoadThresholds {
            normal: 70.0,
            medium: 90.0,
            high: 100.0,
        }
    }
}

/// The restart-signature lookahead budget.  The line budget counts subsequent records from the
/// same file; the optional wall budget is measured on the normalized time axis.  Whichever
/// expires first times the signature out.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapBudget {
    pub lines: u32,
    pub micros: Option<TimePoint>,
}

impl Default for TrapBudget {
    fn default() -> TrapBudget {
        TrapBudget {
            lines: 50,
            micros: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub thresholds: LoadThresholds,
    pub window_micros: TimePoint,
    pub trap_budget: TrapBudget,
    pub topic_include: HashSet<Ustr>,
    pub topic_exclude: HashSet<Ustr>,
    pub subsession_tolerance_micros: TimePoint,
}

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
        AnalysisConfig {
            thresholds: LoadThresholds::default(),
            window_micros: 10 * MICROS_PER_SEC,
            trap_budget: TrapBudget::default(),
            topic_include: HashSet::new(),
            topic_exclude: HashSet::new(),
            subsession_tolerance_micros: 2 * MICROS_PER_SEC,
        }
    }
}

impl AnalysisConfig {
    /// Topic filtering: an empty include set means "all", the exclude set always wins.

    pub fn topic_selected(&self, topic: Ustr) -> bool {
        if self.topic_exclude.contains(&topic) {
            return false;
        }
        self.topic_include.is_empty() || self.topic_include.contains(&topic)
    }
}

/// Read a configuration file, filling in defaults for absent fields.

pub fn read_config_file(file_name: &str) -> Result<AnalysisConfig> {
    let file = File::open(file_name)?;
    let v = serde_json::from_reader(BufReader::new(file))?;
    decode_config(&v)
}

fn decode_config(v: &Value) -> Result<AnalysisConfig> {
    let Value::Object(fields) = v else {
        bail!("Expected an object value")
    };
    let mut cfg = AnalysisConfig::default();

    if let Some(t) = fields.get("load_thresholds") {
        let Value::Object(tf) = t else {
            bail!("Field 'load_thresholds' must be an object")
        };
        if let Some(n) = grab_f64_opt(tf, "normal")? {
            cfg.thresholds.normal = n as f32;
        }
        if let Some(n) = grab_f64_opt(tf, "medium")? {
            cfg.thresholds.medium = n as f32;
        }
        if let Some(n) = grab_f64_opt(tf, "high")? {
            cfg.thresholds.high = n as f32;
        }
    }
    if let Some(n) = grab_f64_opt(fields, "window_secs")? {
        cfg.window_micros = (n * MICROS_PER_SEC as f64) as TimePoint;
    }
    if let Some(n) = grab_u64_opt(fields, "trap_lookahead_lines")? {
        cfg.trap_budget.lines = u32::try_from(n)?;
    }
    if let Some(n) = grab_f64_opt(fields, "trap_lookahead_secs")? {
        cfg.trap_budget.micros = Some((n * MICROS_PER_SEC as f64) as TimePoint);
    }
    if let Some(ts) = grab_strings_opt(fields, "topic_include")? {
        cfg.topic_include = ts.iter().map(|s| Ustr::from(s)).collect();
    }
    if let Some(ts) = grab_strings_opt(fields, "topic_exclude")? {
        cfg.topic_exclude = ts.iter().map(|s| Ustr::from(s)).collect();
    }
    if let Some(n) = grab_f64_opt(fields, "subsession_tolerance_secs")? {
        cfg.subsession_tolerance_micros = (n * MICROS_PER_SEC as f64) as TimePoint;
    }

    if !(cfg.thresholds.normal <= cfg.thresholds.medium && cfg.thresholds.medium <= cfg.thresholds.high)
    {
        bail!("Load thresholds must be ordered normal <= medium <= high");
    }
    if cfg.window_micros <= 0 {
        bail!("Field 'window_secs' must be positive");
    }
    if cfg.trap_budget.lines == 0 && cfg.trap_budget.micros.is_none() {
        bail!("The trap lookahead budget cannot be empty");
    }

    Ok(cfg)
}

fn grab_f64_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<f64>> {
    match fields.get(name) {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(x) if x.is_finite() && x >= 0.0 => Ok(Some(x)),
            _ => bail!("Field '{name}' must have a nonnegative numeric value"),
        },
        Some(_) => bail!("Field '{name}' must have a numeric value"),
        None => Ok(None),
    }
}

fn grab_u64_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<u64>> {
    match fields.get(name) {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(x) => Ok(Some(x)),
            None => bail!("Field '{name}' must have an unsigned integer value"),
        },
        Some(_) => bail!("Field '{name}' must have an unsigned integer value"),
        None => Ok(None),
    }
}

fn grab_strings_opt(
    fields: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<Option<Vec<String>>> {
    match fields.get(name) {
        Some(Value::Array(xs)) => {
            let mut result = vec![];
            for x in xs {
                if let Value::String(s) = x {
                    result.push(s.clone());
                } else {
                    bail!("Field '{name}' must be an array of strings");
                }
            }
            Ok(Some(result))
        }
        Some(_) => bail!("Field '{name}' must be an array of strings"),
        None => Ok(None),
    }
}

// This tests:
//  - defaults for absent fields
//  - every recognized field
//  - type errors are hard errors

#[test]
fn test_decode_config() {
    let v: Value = serde_json::from_str("{}").unwrap();
    assert!(decode_config(&v).unwrap() == AnalysisConfig::default());

    let v: Value = serde_json::from_str(
        r#"{
             "load_thresholds": {"normal": 60, "medium": 80, "high": 95},
             "window_secs": 5,
             "trap_lookahead_lines": 10,
             "trap_lookahead_secs": 1.5,
             "topic_include": ["A", "B"],
             "topic_exclude": ["B"],
             "subsession_tolerance_secs": 3
           }"#,
    )
    .unwrap();
    let cfg = decode_config(&v).unwrap();
    assert!(cfg.thresholds.normal == 60.0 && cfg.thresholds.medium == 80.0);
    assert!(cfg.thresholds.high == 95.0);
    assert!(cfg.window_micros == 5 * MICROS_PER_SEC);
    assert!(cfg.trap_budget.lines == 10);
    assert!(cfg.trap_budget.micros == Some(1_500_000));
    assert!(cfg.topic_selected(Ustr::from("A")));
    assert!(!cfg.topic_selected(Ustr::from("B")));
    assert!(!cfg.topic_selected(Ustr::from("C")));
    assert!(cfg.subsession_tolerance_micros == 3 * MICROS_PER_SEC);

    let v: Value = serde_json::from_str(r#"{"window_secs": "fast"}"#).unwrap();
    assert!(decode_config(&v).is_err());
    let v: Value = serde_json::from_str(r#"{"load_thresholds": {"normal": 95, "medium": 80}}"#).unwrap();
    assert!(decode_config(&v).is_err());
}
