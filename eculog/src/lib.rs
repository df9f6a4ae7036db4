/// An ECU log is a semi-structured text log: each line carries a clock reading followed by a
/// payload in one of a small number of known layouts, and the various payload fields have specific
/// and documented meanings.  Log lines are found in *log files*; a capture session usually
/// produces several files, and a single file may span several *sub-sessions* if the unit restarted
/// (and its clock reset) while the file was being written.
///
/// Though the firmware writes lines in chronological order, this is an assumption that holds only
/// within a file and within a sub-session.  Files may overlap in time, different firmware
/// revisions emit different clock formats (wall-clock with an RTC, monotonic seconds-since-boot
/// without one), and a clock reset in mid-file makes raw timestamps regress.
///
/// This library has as its fundamental task to reconstruct one globally ordered event stream from
/// the raw files and to provide the configuration surface for the analyses that consume it.  The
/// task breaks down into a number of subtasks:
///
/// - Classify each raw line against an ordered table of format descriptors, or reject it.
///
/// - Extract typed fields from classified lines into LogRecord structures, rejecting records with
///   unparseable required fields.  Rejections are counted, never fatal.
///
/// - Resolve each file's clock readings onto a single comparable time axis, detecting sub-session
///   boundaries (large backward steps) and degrading gracefully on disordered files.
///
/// - Merge the per-file record sequences into one stream of NormalizedEvent, ordered by resolved
///   time with deterministic tie-breaking, carrying strictly increasing sequence numbers.
///
/// There is an important invariant on the merged stream:
///
/// - sequence numbers are strictly increasing, and resolved times are non-decreasing except
///   across an explicitly detected sub-session boundary
mod classify;
mod config;
mod dates;
mod extract;
mod logfile;
mod timeline;

use ustr::Ustr;

// Types and utilities for clock readings and the normalized time axis.

pub use dates::TimePoint;
pub use dates::Timestamp;
pub use dates::MICROS_PER_SEC;

// Parse a wall-clock reading, "2025-08-25 16:52:08.434".

pub use dates::parse_timestamp;

// Microseconds since the Unix epoch for a wall-clock reading.

pub use dates::wall_micros;

// Parse a monotonic reading, seconds with fractional part, into microseconds.

pub use dates::parse_mono_micros;

// Render a TimePoint for humans: wall-clock form when it is plausibly a wall time,
// seconds-since-boot otherwise.

pub use dates::format_timepoint;

// Classify one raw line against the ordered descriptor table.

pub use classify::classify_line;

// Extract a LogRecord from a line with a known format tag.

pub use extract::extract_record;

// Parse an ordered line stream (or a file) into records plus provenance counters.

pub use logfile::parse_lines;
pub use logfile::parse_logfile;
pub use logfile::FileCounts;
pub use logfile::FileParse;

// Merge per-file record sequences into the normalized stream.

pub use timeline::normalize;
pub use timeline::FileNotes;
pub use timeline::NormalizedEvent;
pub use timeline::Timeline;

// The immutable configuration value threaded through every component.

pub use config::read_config_file;
pub use config::AnalysisConfig;
pub use config::LoadThresholds;
pub use config::TrapBudget;

/// The clock reading as written by the firmware.  Units with an RTC stamp wall-clock time; units
/// without one stamp monotonic seconds since boot.  Both are resolved onto the shared TimePoint
/// axis by the timeline normalizer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawClock {
    /// Wall-clock reading.
    Wall(Timestamp),
    /// Monotonic reading, microseconds since boot.
    Mono(TimePoint),
}

/// Which format descriptor matched a line.  The order of the variants mirrors descriptor priority
/// but nothing depends on that; priority is encoded in the classifier's table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    TrapMarker,
    TrapCause,
    CoreLoad,
    SoaMsg,
    Meta,
    Generic,
}

/// Cause evidence carried by a `{TRAP-RST}` detail line.

#[derive(Debug, Clone, PartialEq)]
pub enum TrapEvidence {
    /// `Reset Type: <code>`, a firmware reset-reason code.
    ResetType(u32),
    /// `DEADD: <addr>`, the data address whose access trapped.
    DataAddress(u64),
    /// `Func<k>: 0x<addr>`, one frame of the captured call stack.
    FuncFrame { frame: u32, addr: u64 },
}

/// Project / baseline identification recovered from banner lines.  Feeds provenance only.

#[derive(Debug, Clone, PartialEq)]
pub enum MetaInfo {
    /// `SWVerNum : <ver>`
    Baseline(Ustr),
    /// `RMR:<project>`
    Project(Ustr),
}

/// The typed payload of a parsed line.  One variant per format descriptor; dispatch on this is
/// the whole of the "format handler" machinery, there is no trait hierarchy.
///
/// The raw line text is retained only for the TRAP variants, where the analyzers need an excerpt
/// for the emitted event; keeping it on every record would roughly double the memory footprint of
/// a large ingest for no consumer.

#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    TrapMarker {
        excerpt: Box<str>,
    },
    TrapCause {
        evidence: TrapEvidence,
        excerpt: Box<str>,
    },
    /// One load percentage per core; the core id is the position in the list.
    CoreLoad {
        loads: Vec<f32>,
    },
    SoaMsg {
        topic: Ustr,
        bytes: u64,
    },
    Meta(MetaInfo),
    /// Recognized line shape, unrecognized payload.  Counted and placed, ignored by analyzers.
    Generic,
}

/// One parsed log line.  Created by the extractor, immutable thereafter, owned by the timeline
/// normalizer until merged.  Space matters a little here (one of these per useful input line), so
/// strings are interned Ustr and line numbers are u32.

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// The clock reading as written, unresolved.
    pub clock: RawClock,

    /// The unit tag from the line header ("BZCU" etc), empty when the header carries none.
    /// Doubles as the project identification in provenance.
    pub unit: Ustr,

    /// Name of the originating file, for provenance.
    pub source: Ustr,

    /// 1-based line number within the originating file.
    pub line_no: u32,

    /// Which descriptor matched.
    pub tag: FormatTag,

    /// The typed fields.
    pub payload: RecordPayload,
}

/// Why a line did not become a LogRecord.  These are data, not errors: they are tallied into
/// provenance counters and the line is skipped.  A parse failure never aborts a run.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    /// No descriptor matched the line.
    NoFormatMatched,
    /// A descriptor matched but a required field would not parse.
    MalformedRecord,
}
