/// Field extractor.
///
/// Given a line and the format tag the classifier assigned to it, produce a LogRecord or fail
/// with Reject::MalformedRecord.  Extraction is strict where the classifier is lax: a numeric
/// field parses as its declared type or the whole record is rejected, never silently defaulted.
/// The patterns are anchored on the payload markers the classifier probed for, so a rejection
/// here really means a recognized line with a bad value in it.
use crate::classify::{split_prefix, ClockText};
use crate::dates::{parse_mono_micros, parse_timestamp};
use crate::{FormatTag, LogRecord, MetaInfo, RawClock, RecordPayload, Reject, TrapEvidence};

use regex::Regex;
use std::sync::OnceLock;
use ustr::Ustr;

struct Patterns {
    reset_type: Regex,
    deadd: Regex,
    func: Regex,
    core_load: Regex,
    soa: Regex,
    baseline: Regex,
    project: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        reset_type: Regex::new(r"\{TRAP-RST\}:Reset Type:\s*(\S+)").unwrap(),
        deadd: Regex::new(r"\{TRAP-RST\}:DEADD:\s*(?:0x)?([0-9a-zA-Z]+)").unwrap(),
        func: Regex::new(r"\{TRAP-RST\}:Func(\d+):\s*0x([0-9a-zA-Z]+)").unwrap(),
        core_load: Regex::new(r"core\s+load:\s*(.*)").unwrap(),
        soa: Regex::new(r"SOA\s+topic:(\S+)\s+len:(\S+)").unwrap(),
        baseline: Regex::new(r"SWVerNum\s*:\s*(\S+)").unwrap(),
        project: Regex::new(r"RMR:([^;:,\s]+)").unwrap(),
    })
}

/// Extract a LogRecord from a classified line.  `tag` must be the value classify_line returned
/// for this line.

pub fn extract_record(
    line: &str,
    tag: FormatTag,
    source: Ustr,
    line_no: u32,
) -> Result<LogRecord, Reject> {
    let Some((clock_text, unit, payload)) = split_prefix(line) else {
        return Err(Reject::NoFormatMatched);
    };

    // The prefix is structurally a clock but the values can still be junk (month 13, and so on).
    let clock = match clock_text {
        ClockText::Wall(s) => match parse_timestamp(s) {
            Ok(t) => RawClock::Wall(t),
            Err(_) => {
                return Err(Reject::MalformedRecord);
            }
        },
        ClockText::Mono(s) => match parse_mono_micros(s) {
            Ok(t) => RawClock::Mono(t),
            Err(_) => {
                return Err(Reject::MalformedRecord);
            }
        },
    };

    let payload = match tag {
        FormatTag::TrapMarker => RecordPayload::TrapMarker {
            excerpt: Box::from(payload),
        },
        FormatTag::TrapCause => RecordPayload::TrapCause {
            evidence: extract_evidence(payload)?,
            excerpt: Box::from(payload),
        },
        FormatTag::CoreLoad => RecordPayload::CoreLoad {
            loads: extract_loads(payload)?,
        },
        FormatTag::SoaMsg => extract_soa(payload)?,
        FormatTag::Meta => RecordPayload::Meta(extract_meta(payload)?),
        FormatTag::Generic => RecordPayload::Generic,
    };

    Ok(LogRecord {
        clock,
        unit,
        source,
        line_no,
        tag,
        payload,
    })
}

fn extract_evidence(payload: &str) -> Result<TrapEvidence, Reject> {
    let p = patterns();
    if let Some(c) = p.reset_type.captures(payload) {
        let code = get_u32(&c[1])?;
        return Ok(TrapEvidence::ResetType(code));
    }
    if let Some(c) = p.func.captures(payload) {
        let frame = get_u32(&c[1])?;
        let addr = get_hex(&c[2])?;
        return Ok(TrapEvidence::FuncFrame { frame, addr });
    }
    if let Some(c) = p.deadd.captures(payload) {
        let addr = get_hex(&c[1])?;
        return Ok(TrapEvidence::DataAddress(addr));
    }
    Err(Reject::MalformedRecord)
}

// The load list may be followed by ", mcu_version: ..." on the same line; only the list itself
// is of interest.

fn extract_loads(payload: &str) -> Result<Vec<f32>, Reject> {
    let text = match payload.find("mcu_version") {
        Some(ix) => &payload[..ix],
        None => payload,
    };
    let Some(c) = patterns().core_load.captures(text) else {
        return Err(Reject::MalformedRecord);
    };
    let list = c[1].trim().trim_end_matches(',').trim_end();
    if list.is_empty() {
        return Err(Reject::MalformedRecord);
    }
    let mut loads = vec![];
    for field in list.split(',') {
        loads.push(get_f32(field.trim())?);
    }
    Ok(loads)
}

fn extract_soa(payload: &str) -> Result<RecordPayload, Reject> {
    let Some(c) = patterns().soa.captures(payload) else {
        return Err(Reject::MalformedRecord);
    };
    let topic = Ustr::from(&c[1]);
    let bytes = get_u64(&c[2])?;
    Ok(RecordPayload::SoaMsg { topic, bytes })
}

fn extract_meta(payload: &str) -> Result<MetaInfo, Reject> {
    let p = patterns();
    if let Some(c) = p.baseline.captures(payload) {
        return Ok(MetaInfo::Baseline(Ustr::from(&c[1])));
    }
    if let Some(c) = p.project.captures(payload) {
        return Ok(MetaInfo::Project(Ustr::from(&c[1])));
    }
    Err(Reject::MalformedRecord)
}

fn get_u32(s: &str) -> Result<u32, Reject> {
    s.parse::<u32>().map_err(|_| Reject::MalformedRecord)
}

fn get_u64(s: &str) -> Result<u64, Reject> {
    s.parse::<u64>().map_err(|_| Reject::MalformedRecord)
}

fn get_hex(s: &str) -> Result<u64, Reject> {
    u64::from_str_radix(s, 16).map_err(|_| Reject::MalformedRecord)
}

fn get_f32(s: &str) -> Result<f32, Reject> {
    match s.parse::<f32>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(Reject::MalformedRecord),
    }
}

#[cfg(test)]
use crate::dates::wall_micros;

#[cfg(test)]
fn extract_ok(line: &str) -> LogRecord {
    let tag = crate::classify_line(line).unwrap();
    extract_record(line, tag, Ustr::from("t.log"), 1).unwrap()
}

#[cfg(test)]
fn extract_err(line: &str) -> Reject {
    let tag = crate::classify_line(line).unwrap();
    extract_record(line, tag, Ustr::from("t.log"), 1).unwrap_err()
}

// This tests:
//  - core load extraction, including the mcu_version suffix
//  - strict rejection of a bad float in the list

#[test]
fn test_extract_core_load() {
    let r = extract_ok("2025-08-25 16:52:10.000 BZCU I 1a2b [CPU_LOAD]:core load: 12.5, 34.0, 8.1");
    assert!(r.unit == Ustr::from("BZCU"));
    if let RecordPayload::CoreLoad { loads } = &r.payload {
        assert!(*loads == vec![12.5, 34.0, 8.1]);
    } else {
        assert!(false);
    }
    let r = extract_ok("2025-08-25 16:52:10.000 BZCU I 1a2b core load: 50.0, mcu_version: 1.2.3");
    if let RecordPayload::CoreLoad { loads } = &r.payload {
        assert!(*loads == vec![50.0]);
    } else {
        assert!(false);
    }
    let e = extract_err("2025-08-25 16:52:10.000 BZCU I 1a2b [CPU_LOAD]:core load: 12.5, 3x.0");
    assert!(e == Reject::MalformedRecord);
}

// This tests:
//  - SOA topic and byte count extraction
//  - strict rejection of a bad byte count

#[test]
fn test_extract_soa() {
    let r = extract_ok("2025-08-25 16:52:08.434 BZCU I 5ae0 SOA topic:PowertrainStatus len:128");
    if let RecordPayload::SoaMsg { topic, bytes } = &r.payload {
        assert!(*topic == Ustr::from("PowertrainStatus"));
        assert!(*bytes == 128);
    } else {
        assert!(false);
    }
    let e = extract_err("2025-08-25 16:52:08.434 BZCU I 5ae0 SOA topic:PowertrainStatus len:lots");
    assert!(e == Reject::MalformedRecord);
}

// This tests:
//  - each kind of cause evidence
//  - rejection of a non-hex DEADD address

#[test]
fn test_extract_trap_evidence() {
    let r = extract_ok("2025-08-25 16:53:41.280 BZCU I 02c5 {TRAP-RST}:Reset Type: 5");
    assert!(matches!(
        r.payload,
        RecordPayload::TrapCause {
            evidence: TrapEvidence::ResetType(5),
            ..
        }
    ));
    let r = extract_ok("2025-08-25 16:53:41.281 BZCU I 02c5 {TRAP-RST}:DEADD: d0000010");
    assert!(matches!(
        r.payload,
        RecordPayload::TrapCause {
            evidence: TrapEvidence::DataAddress(0xd0000010),
            ..
        }
    ));
    let r = extract_ok("2025-08-25 16:53:41.282 BZCU I 02c5 {TRAP-RST}:Func2: 0x80001234");
    assert!(matches!(
        r.payload,
        RecordPayload::TrapCause {
            evidence: TrapEvidence::FuncFrame {
                frame: 2,
                addr: 0x80001234
            },
            ..
        }
    ));
    let e = extract_err("2025-08-25 16:53:41.281 BZCU I 02c5 {TRAP-RST}:DEADD: zz9");
    assert!(e == Reject::MalformedRecord);
}

// This tests:
//  - a structurally valid clock prefix with impossible field values is malformed, not unmatched

#[test]
fn test_extract_bad_clock_value() {
    let line = "2025-13-40 16:52:08.434 BZCU I 5ae0 SOA topic:CabinTemp len:24";
    let tag = crate::classify_line(line).unwrap();
    let e = extract_record(line, tag, Ustr::from("t.log"), 1).unwrap_err();
    assert!(e == Reject::MalformedRecord);
}

// This tests:
//  - the monotonic clock lands in the record as microseconds
//  - meta extraction for both banner forms

#[test]
fn test_extract_mono_and_meta() {
    let r = extract_ok("[  123.456] SOA topic:CabinTemp len:24");
    assert!(r.clock == RawClock::Mono(123_456_000));
    assert!(r.unit == Ustr::from(""));

    let r = extract_ok("2025-08-25 16:52:00.000 BZCU I 0001 SWVerNum : 0x010203");
    assert!(r.payload == RecordPayload::Meta(MetaInfo::Baseline(Ustr::from("0x010203"))));
    let r = extract_ok("2025-08-25 16:52:00.000 BZCU I 0001 RMR:BZCU_MAIN");
    assert!(r.payload == RecordPayload::Meta(MetaInfo::Project(Ustr::from("BZCU_MAIN"))));

    let r = extract_ok("2025-08-25 16:52:08.434 BZCU I 5ae0 SOA topic:CabinTemp len:24");
    if let RawClock::Wall(t) = r.clock {
        assert!(wall_micros(t) % 1_000_000 == 434_000);
    } else {
        assert!(false);
    }
}
