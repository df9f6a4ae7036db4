/// Line classifier.
///
/// A line is recognized if it starts with a clock prefix: either a wall-clock reading
/// ("2025-08-25 16:52:08.434", milliseconds optional) or a monotonic reading ("[  123.456]").
/// After the prefix most firmware revisions write a header - unit tag, severity letter, 4-digit
/// hex task id - and then the payload; the header is optional and some revisions omit it.
///
/// The payload is then probed against an ordered list of format descriptors, each a set of cheap
/// structural predicates; the first match wins, so the order of the table encodes priority.  A
/// payload matching no descriptor classifies as Generic: such lines are counted and placed on the
/// timeline but carry no analyzable fields.  A line without a clock prefix matches nothing at
/// all.
///
/// Classification is purely structural and has no side effects; field values are not validated
/// here.  A line can classify successfully and still be rejected by the extractor when a required
/// field fails to parse.
use crate::FormatTag;

use ustr::Ustr;

pub(crate) enum ClockText<'a> {
    Wall(&'a str),
    Mono(&'a str),
}

struct Descriptor {
    tag: FormatTag,
    probe: fn(&str) -> bool,
}

// Priority order.  The TRAP marker must precede the TRAP cause probe (a marker line also starts
// with the block prefix), and everything must precede Generic, which is not in the table.

const DESCRIPTORS: &[Descriptor] = &[
    Descriptor {
        tag: FormatTag::TrapMarker,
        probe: probe_trap_marker,
    },
    Descriptor {
        tag: FormatTag::TrapCause,
        probe: probe_trap_cause,
    },
    Descriptor {
        tag: FormatTag::CoreLoad,
        probe: probe_core_load,
    },
    Descriptor {
        tag: FormatTag::SoaMsg,
        probe: probe_soa,
    },
    Descriptor {
        tag: FormatTag::Meta,
        probe: probe_meta,
    },
];

/// Classify one raw line.  Returns the tag of the first matching descriptor, FormatTag::Generic
/// for a line that has a clock prefix but matches nothing, or None for a line with no usable
/// prefix at all.

pub fn classify_line(line: &str) -> Option<FormatTag> {
    let (_, _, payload) = split_prefix(line)?;
    for d in DESCRIPTORS {
        if (d.probe)(payload) {
            return Some(d.tag);
        }
    }
    Some(FormatTag::Generic)
}

fn probe_trap_marker(payload: &str) -> bool {
    payload.contains("{TRAP-RST}:Reset Info:")
}

fn probe_trap_cause(payload: &str) -> bool {
    payload.starts_with("{TRAP-RST}:")
        && (payload.contains("Reset Type:")
            || payload.contains("DEADD:")
            || payload.contains("{TRAP-RST}:Func"))
}

fn probe_core_load(payload: &str) -> bool {
    payload.contains("core load:")
}

fn probe_soa(payload: &str) -> bool {
    payload.starts_with("SOA ") && payload.contains("topic:") && payload.contains("len:")
}

fn probe_meta(payload: &str) -> bool {
    payload.starts_with("SWVerNum") || payload.starts_with("RMR:")
}

/// Split a line into clock text, unit tag, and payload.  Returns None if there is no clock
/// prefix.  Shared with the extractor so the two stages agree on what the payload is.

pub(crate) fn split_prefix(line: &str) -> Option<(ClockText, Ustr, &str)> {
    if let Some(lim) = wall_prefix_len(line) {
        let rest = line[lim..].strip_prefix(' ')?;
        let (unit, payload) = strip_header(rest);
        return Some((ClockText::Wall(&line[..lim]), unit, payload));
    }
    if let Some((reading, rest)) = mono_prefix(line) {
        let (unit, payload) = strip_header(rest);
        return Some((ClockText::Mono(reading), unit, payload));
    }
    None
}

// "YYYY-MM-DD HH:MM:SS" with optional ".mmm"; returns the prefix length.

fn wall_prefix_len(line: &str) -> Option<usize> {
    let b = line.as_bytes();
    if b.len() < 19 {
        return None;
    }
    for (i, &c) in b[..19].iter().enumerate() {
        let ok = match i {
            4 | 7 => c == b'-',
            10 => c == b' ',
            13 | 16 => c == b':',
            _ => c.is_ascii_digit(),
        };
        if !ok {
            return None;
        }
    }
    if b.len() >= 23 && b[19] == b'.' && b[20..23].iter().all(|c| c.is_ascii_digit()) {
        Some(23)
    } else {
        Some(19)
    }
}

// "[  123.456] payload".  The bracketed text must look numeric, which keeps payloads that start
// with a bracketed tag (e.g. "[CPU_LOAD]:...") from being mistaken for a clock.

fn mono_prefix(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?;
    let close = inner.find(']')?;
    let reading = inner[..close].trim();
    if reading.is_empty() || !reading.bytes().all(|c| c.is_ascii_digit() || c == b'.') {
        return None;
    }
    let rest = inner[close + 1..].strip_prefix(' ').unwrap_or(&inner[close + 1..]);
    Some((reading, rest))
}

// "BZCU I 02c5 payload" -> unit tag plus payload; lines without the header pass through with an
// empty unit.

fn strip_header(s: &str) -> (Ustr, &str) {
    let mut it = s.splitn(4, ' ');
    if let (Some(unit), Some(sev), Some(task), Some(rest)) = (it.next(), it.next(), it.next(), it.next())
    {
        if is_unit_tag(unit) && is_severity(sev) && is_task_id(task) {
            return (Ustr::from(unit), rest);
        }
    }
    (Ustr::from(""), s)
}

fn is_unit_tag(s: &str) -> bool {
    !s.is_empty()
        && s.as_bytes()[0].is_ascii_uppercase()
        && s.bytes().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_')
}

fn is_severity(s: &str) -> bool {
    s.len() == 1 && s.as_bytes()[0].is_ascii_uppercase()
}

fn is_task_id(s: &str) -> bool {
    s.len() == 4 && s.bytes().all(|c| c.is_ascii_hexdigit())
}

// This tests:
//  - every descriptor, through fully-formed lines
//  - the Generic fallback for an unknown payload
//  - rejection of lines without a clock prefix

#[test]
fn test_classify_basic() {
    let t = classify_line("2025-08-25 16:53:41.276 BZCU I 02c5 {TRAP-RST}:Reset Info:");
    assert!(t == Some(FormatTag::TrapMarker));
    let t = classify_line("2025-08-25 16:53:41.280 BZCU I 02c5 {TRAP-RST}:Reset Type: 5");
    assert!(t == Some(FormatTag::TrapCause));
    let t = classify_line("2025-08-25 16:53:41.281 BZCU I 02c5 {TRAP-RST}:DEADD: d0000010");
    assert!(t == Some(FormatTag::TrapCause));
    let t = classify_line("2025-08-25 16:53:41.282 BZCU I 02c5 {TRAP-RST}:Func0: 0x80001234");
    assert!(t == Some(FormatTag::TrapCause));
    let t = classify_line("2025-08-25 16:52:10.000 BZCU I 1a2b [CPU_LOAD]:core load: 12.5, 34.0, 8.1");
    assert!(t == Some(FormatTag::CoreLoad));
    let t = classify_line("2025-08-25 16:52:08.434 BZCU I 5ae0 SOA topic:PowertrainStatus len:128");
    assert!(t == Some(FormatTag::SoaMsg));
    let t = classify_line("2025-08-25 16:52:00.000 BZCU I 0001 SWVerNum : 0x010203");
    assert!(t == Some(FormatTag::Meta));
    let t = classify_line("2025-08-25 16:52:00.000 BZCU I 0001 RMR:BZCU_MAIN");
    assert!(t == Some(FormatTag::Meta));
    let t = classify_line("2025-08-25 16:52:01.000 BZCU I 0001 task watchdog fed");
    assert!(t == Some(FormatTag::Generic));
    assert!(classify_line("no clock here at all").is_none());
    assert!(classify_line("").is_none());
}

// This tests:
//  - priority: a marker line wins over the cause probe even though both match the block prefix

#[test]
fn test_classify_priority() {
    let t = classify_line("2025-08-25 16:53:41.276 BZCU I 02c5 {TRAP-RST}:Reset Info: DEADD: pending");
    assert!(t == Some(FormatTag::TrapMarker));
}

// This tests:
//  - the monotonic prefix, with and without a unit header
//  - that a payload-initial bracketed tag is not mistaken for a monotonic clock

#[test]
fn test_classify_mono_prefix() {
    let t = classify_line("[  123.456] BZCU I 1a2b SOA topic:CabinTemp len:24");
    assert!(t == Some(FormatTag::SoaMsg));
    let t = classify_line("[0.100] [CPU_LOAD]:core load: 1.0, 2.0");
    assert!(t == Some(FormatTag::CoreLoad));
    assert!(classify_line("[CPU_LOAD]:core load: 1.0, 2.0").is_none());
}

// This tests:
//  - unknown {TRAP-RST} detail lines (e.g. DIEAR) are Generic, not causes

#[test]
fn test_classify_trap_detail_not_cause() {
    let t = classify_line("2025-08-25 16:53:41.290 BZCU I 02c5 {TRAP-RST}:DIEAR: 00000000");
    assert!(t == Some(FormatTag::Generic));
}
