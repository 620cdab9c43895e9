//! Converters from JFR recordings to analysis artifacts.
//!
//! This crate turns recordings parsed by [`jfr_parse`] into one of three
//! outputs: an interactive HTML flame graph, collapsed stack text, or a
//! pprof protobuf profile. Already-collapsed text can also be rendered
//! straight to HTML.
//!
//! # Available Converters
//!
//! - [`jfr`] - Drive a recording through aggregation into any sample sink
//! - [`flame`] - Flame-graph tree and HTML emission
//! - [`collapsed`] - Collapsed stack text output
//! - [`pprof`] - pprof protobuf encoding
//!
//! # Example
//!
//! ```no_run
//! use jfr_parse::JfrReader;
//! use jfrconv::{flame::FlameGraph, jfr::JfrConverter, Arguments};
//! use std::fs::File;
//! use std::io::BufWriter;
//!
//! let args = Arguments::default();
//! let mut jfr = JfrReader::open("recording.jfr").unwrap();
//! let mut fg = FlameGraph::new(args.clone());
//! JfrConverter::new(&mut jfr, &args).convert(&mut fg).unwrap();
//! fg.dump(BufWriter::new(File::create("profile.html").unwrap())).unwrap();
//! ```

use jfr_parse::EventClass;
use regex::Regex;
use thiserror::Error;

pub mod aggregate;
pub mod classify;
pub mod collapsed;
pub mod flame;
pub mod jfr;
pub mod pprof;
pub mod resolve;

/// Errors that can occur during conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] jfr_parse::ParseError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("malformed collapsed input at line {line}")]
    MalformedCollapsed { line: usize },

    #[error("template marker '{0}' not found")]
    BadTemplate(&'static str),
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Conversion options shared by every output path.
///
/// `from`/`to` are milliseconds: an absolute epoch timestamp, an offset from
/// the start of the recording, or (when negative) an offset from its end.
/// Zero means unset.
#[derive(Debug, Clone)]
pub struct Arguments {
    pub title: String,
    pub highlight: Option<String>,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
    pub minwidth: f64,
    pub skip: usize,
    pub reverse: bool,
    pub alloc: bool,
    pub live: bool,
    pub lock: bool,
    pub threads: bool,
    pub classify: bool,
    pub total: bool,
    pub lines: bool,
    pub bci: bool,
    pub simple: bool,
    pub norm: bool,
    pub dot: bool,
    pub state: Option<String>,
    pub from: i64,
    pub to: i64,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            title: "Flame Graph".to_string(),
            highlight: None,
            include: None,
            exclude: None,
            minwidth: 0.0,
            skip: 0,
            reverse: false,
            alloc: false,
            live: false,
            lock: false,
            threads: false,
            classify: false,
            total: false,
            lines: false,
            bci: false,
            simple: false,
            norm: false,
            dot: false,
            state: None,
            from: 0,
            to: 0,
        }
    }
}

impl Arguments {
    /// The event class selected by the `alloc`/`live`/`lock` switches;
    /// execution samples by default.
    pub fn event_class(&self) -> EventClass {
        if self.live {
            EventClass::LiveObject
        } else if self.alloc {
            EventClass::AllocationSample
        } else if self.lock {
            EventClass::ContendedLock
        } else {
            EventClass::ExecutionSample
        }
    }
}

/// Compiles a frame-title filter. Patterns match whole titles, so `b` only
/// matches a frame named exactly `b`; use `.*b.*` for substring matching.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| ConvertError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// A consumer of resolved stack samples. Traces run root to leaf and carry
/// frame-type suffixes (`_[j]`, `_[i]`, ...) on their titles.
pub trait SampleSink {
    fn add_sample(&mut self, trace: &[String], weight: u64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_whole_title() {
        let re = compile_pattern("b").unwrap();
        assert!(re.is_match("b"));
        assert!(!re.is_match("abc"));

        let re = compile_pattern("java\\..*").unwrap();
        assert!(re.is_match("java.io.File.open"));
        assert!(!re.is_match("sun.nio.ch.Net.poll"));
    }

    #[test]
    fn bad_pattern_is_reported() {
        assert!(matches!(
            compile_pattern("("),
            Err(ConvertError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn event_class_selection() {
        let mut args = Arguments::default();
        assert_eq!(args.event_class(), EventClass::ExecutionSample);
        args.alloc = true;
        assert_eq!(args.event_class(), EventClass::AllocationSample);
        args.live = true;
        assert_eq!(args.event_class(), EventClass::LiveObject);
        args = Arguments {
            lock: true,
            ..Arguments::default()
        };
        assert_eq!(args.event_class(), EventClass::ContendedLock);
    }
}
