//! Parser for JDK Flight Recorder (JFR) chunked recordings.
//!
//! A JFR file is a sequence of self-describing chunks. Each chunk carries its
//! own metadata tree (type and field descriptions) and constant pools
//! (symbols, classes, methods, stack traces, threads) that events reference
//! by numeric ID. This library parses chunks sequentially and yields typed
//! events while accumulating the referenced dictionaries.
//!
//! # Example
//!
//! ```no_run
//! use jfr_parse::{EventClass, JfrReader};
//!
//! let mut jfr = JfrReader::open("recording.jfr").unwrap();
//! while jfr.next_chunk().unwrap() {
//!     while let Some(event) = jfr.read_event(EventClass::ExecutionSample).unwrap() {
//!         println!("tid={} stack={}", event.tid, event.stack_trace_id);
//!     }
//! }
//! ```

use thiserror::Error;

mod buffer;
mod event;
mod metadata;
mod pool;
mod reader;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use event::{Event, EventClass, EventKind};
pub use pool::{ClassRef, MethodRef, StackTrace};
pub use reader::JfrReader;

/// Frame execution-tier tags recorded in stack traces.
///
/// `NATIVE` is ambiguous: JDK Flight Recorder uses it for Java native
/// methods, while async-profiler recordings use it for C frames. A recording
/// whose `jdk.types.FrameType` table contains `KERNEL` is an async-profiler
/// recording.
pub mod frame {
    pub const INTERPRETED: u8 = 0;
    pub const JIT_COMPILED: u8 = 1;
    pub const INLINED: u8 = 2;
    pub const NATIVE: u8 = 3;
    pub const CPP: u8 = 4;
    pub const KERNEL: u8 = 5;
    pub const C1_COMPILED: u8 = 6;
}

/// Errors that can occur while parsing a recording.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a JFR file: bad chunk signature")]
    BadMagic,

    #[error("unsupported JFR version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("truncated data at offset {0}")]
    Truncated(usize),

    #[error("malformed record at offset {offset}: {message}")]
    MalformedRecord { offset: usize, message: &'static str },

    #[error("invalid string encoding tag {0}")]
    InvalidStringEncoding(u8),

    #[error("symbol with non-UTF-8 encoding tag {0}")]
    InvalidSymbolEncoding(u8),

    #[error("constant pool references unknown type {0}")]
    UnknownPoolType(i64),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(&'static str),
}

/// Result type for JFR parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;
