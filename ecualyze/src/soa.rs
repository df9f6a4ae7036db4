/// Per-topic communication statistics from the normalized stream.
///
/// One pass, one small accumulator per topic, lazily created the first time a topic is seen:
/// running message count, running byte total, and inter-arrival tracking against the previous
/// message of the same topic.  The first message of a topic contributes no interval.  Topic
/// filters from the configuration are applied before accumulation, so an excluded topic costs
/// nothing.
use crate::format;

use eculog::{AnalysisConfig, NormalizedEvent, RecordPayload, TimePoint, MICROS_PER_SEC};
use anyhow::Result;
use std::collections::HashMap;
use std::io;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq)]
pub struct SoaTopicStat {
    pub topic: Ustr,
    pub message_count: u64,
    pub total_bytes: u64,
    /// Mean inter-arrival interval in microseconds; 0 when fewer than two messages were seen.
    pub mean_interval_us: f64,
    pub max_interval_us: TimePoint,
}

struct TopicAcc {
    count: u64,
    bytes: u64,
    prev: TimePoint,
    interval_sum: i64,
    interval_count: u64,
    interval_max: TimePoint,
}

pub fn aggregate_soa(events: &[NormalizedEvent], cfg: &AnalysisConfig) -> Vec<SoaTopicStat> {
    let mut topics: HashMap<Ustr, TopicAcc> = HashMap::new();
    for e in events {
        let RecordPayload::SoaMsg { topic, bytes } = &e.record.payload else {
            continue;
        };
        if !cfg.topic_selected(*topic) {
            continue;
        }
        match topics.get_mut(topic) {
            Some(acc) => {
                let delta = e.time - acc.prev;
                acc.count += 1;
                acc.bytes += *bytes;
                acc.interval_sum += delta;
                acc.interval_count += 1;
                acc.interval_max = TimePoint::max(acc.interval_max, delta);
                acc.prev = e.time;
            }
            None => {
                topics.insert(
                    *topic,
                    TopicAcc {
                        count: 1,
                        bytes: *bytes,
                        prev: e.time,
                        interval_sum: 0,
                        interval_count: 0,
                        interval_max: 0,
                    },
                );
            }
        }
    }

    let mut stats = topics
        .into_iter()
        .map(|(topic, acc)| SoaTopicStat {
            topic,
            message_count: acc.count,
            total_bytes: acc.bytes,
            mean_interval_us: if acc.interval_count > 0 {
                acc.interval_sum as f64 / acc.interval_count as f64
            } else {
                0.0
            },
            max_interval_us: acc.interval_max,
        })
        .collect::<Vec<SoaTopicStat>>();
    stats.sort_by(|a, b| a.topic.cmp(&b.topic));
    stats
}

pub fn print_soa(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    stats: &[SoaTopicStat],
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = match fmt {
        Some(ref s) => s,
        None => FMT_DEFAULTS,
    };
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, stats, &());
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

const FMT_DEFAULTS: &str = "topic,count,bytes,mean_interval,max_interval";

type SoaDatum<'a> = &'a SoaTopicStat;
type SoaCtx<'a> = &'a ();

fn my_formatters() -> (
    HashMap<String, &'static dyn Fn(SoaDatum, SoaCtx) -> String>,
    HashMap<String, Vec<String>>,
) {
    let mut formatters: HashMap<String, &'static dyn Fn(SoaDatum, SoaCtx) -> String> =
        HashMap::new();
    let aliases = HashMap::new();
    formatters.insert("topic".to_string(), &format_topic);
    formatters.insert("count".to_string(), &format_count);
    formatters.insert("bytes".to_string(), &format_bytes);
    formatters.insert("mean_interval".to_string(), &format_mean_interval);
    formatters.insert("max_interval".to_string(), &format_max_interval);
    (formatters, aliases)
}

fn format_topic(d: SoaDatum, _: SoaCtx) -> String {
    d.topic.to_string()
}

fn format_count(d: SoaDatum, _: SoaCtx) -> String {
    format!("{}", d.message_count)
}

fn format_bytes(d: SoaDatum, _: SoaCtx) -> String {
    format!("{}", d.total_bytes)
}

fn format_mean_interval(d: SoaDatum, _: SoaCtx) -> String {
    format!("{:.3}s", d.mean_interval_us / MICROS_PER_SEC as f64)
}

fn format_max_interval(d: SoaDatum, _: SoaCtx) -> String {
    format!("{:.3}s", d.max_interval_us as f64 / MICROS_PER_SEC as f64)
}

#[cfg(test)]
use eculog::{normalize, parse_lines};

#[cfg(test)]
fn events_of(text: &str) -> Vec<NormalizedEvent> {
    let cfg = AnalysisConfig::default();
    normalize(vec![parse_lines(Ustr::from("t.log"), text.lines())], &cfg).events
}

// This tests:
//  - single-pass accuracy: sizes [10, 20, 30] at t [0, 5, 15] yield count 3, bytes 60,
//    mean interval 7.5s, max interval 10s

#[test]
fn test_single_pass_accuracy() {
    let events = events_of(
        "\
[0.000] SOA topic:A len:10
[5.000] SOA topic:A len:20
[15.000] SOA topic:A len:30",
    );
    let stats = aggregate_soa(&events, &AnalysisConfig::default());
    assert!(stats.len() == 1);
    let s = &stats[0];
    assert!(s.message_count == 3);
    assert!(s.total_bytes == 60);
    assert!(s.mean_interval_us == 7.5 * MICROS_PER_SEC as f64);
    assert!(s.max_interval_us == 10 * MICROS_PER_SEC);
}

// This tests:
//  - lazy initialization of topics seen for the first time, output sorted by name
//  - a single message yields no interval contribution

#[test]
fn test_lazy_topics_and_first_message() {
    let events = events_of(
        "\
[1.000] SOA topic:Zeta len:5
[2.000] SOA topic:Alpha len:7",
    );
    let stats = aggregate_soa(&events, &AnalysisConfig::default());
    assert!(stats.len() == 2);
    assert!(stats[0].topic == Ustr::from("Alpha"));
    assert!(stats[1].topic == Ustr::from("Zeta"));
    assert!(stats[0].mean_interval_us == 0.0);
    assert!(stats[0].max_interval_us == 0);
}

// This tests:
//  - include and exclude filters

#[test]
fn test_topic_filters() {
    let text = "\
[1.000] SOA topic:A len:1
[2.000] SOA topic:B len:1
[3.000] SOA topic:C len:1";
    let mut cfg = AnalysisConfig::default();
    cfg.topic_exclude.insert(Ustr::from("B"));
    let stats = aggregate_soa(&events_of(text), &cfg);
    assert!(stats.iter().map(|s| s.topic.as_str()).collect::<Vec<&str>>() == vec!["A", "C"]);

    let mut cfg = AnalysisConfig::default();
    cfg.topic_include.insert(Ustr::from("B"));
    let stats = aggregate_soa(&events_of(text), &cfg);
    assert!(stats.len() == 1 && stats[0].topic == Ustr::from("B"));
}
