//! Chunk traversal and event extraction.

use std::collections::HashMap;
use std::path::Path;

use crate::buffer::ByteReader;
use crate::event::{Event, EventClass, EventKind};
use crate::metadata::TypeDescriptor;
use crate::pool::{ClassRef, MethodRef, StackTrace};
use crate::{ParseError, Result};

pub(crate) const CHUNK_HEADER_SIZE: usize = 68;
const CHUNK_SIGNATURE: u32 = 0x464c_5200; // "FLR\0"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    AtChunkStart,
    InChunk,
    Eof,
}

/// Cursor-style reader over a JFR recording.
///
/// `next_chunk` parses the next chunk's header, metadata, and constant pools
/// and positions the cursor at the first event record. `read_event` then
/// yields events of the requested class in file order and returns `None` at
/// the chunk boundary, so a caller can run per-chunk post-processing before
/// advancing.
///
/// The reader owns the symbol/class/method/stack-trace dictionaries for the
/// whole file: IDs are unique across chunks within one recording, so pools
/// from later chunks merge into the same maps.
pub struct JfrReader {
    pub(crate) buf: ByteReader,

    chunk_start: usize,
    chunk_end: usize,
    state: ReaderState,

    /// Earliest chunk start over the whole file, in epoch nanoseconds.
    pub start_nanos: i64,
    /// Latest chunk end over the whole file, in epoch nanoseconds.
    pub end_nanos: i64,
    /// Earliest chunk start in ticks.
    pub start_ticks: i64,
    /// Start of the current chunk, in epoch nanoseconds.
    pub chunk_start_nanos: i64,
    /// End of the current chunk, in epoch nanoseconds.
    pub chunk_end_nanos: i64,
    /// Start of the current chunk, in ticks.
    pub chunk_start_ticks: i64,
    /// Tick frequency of the current chunk.
    pub ticks_per_sec: i64,

    pub(crate) types: HashMap<i64, TypeDescriptor>,
    pub(crate) types_by_name: HashMap<String, i64>,
    pub(crate) string_pool: HashMap<i64, String>,
    pub(crate) enums: HashMap<String, HashMap<i32, String>>,

    /// Thread ID to thread name.
    pub threads: HashMap<i32, String>,
    pub classes: HashMap<i64, ClassRef>,
    pub symbols: HashMap<i64, Vec<u8>>,
    pub methods: HashMap<i64, MethodRef>,
    pub stack_traces: HashMap<i64, StackTrace>,

    // Event type IDs in the current chunk's metadata; -1 when absent.
    t_execution_sample: i64,
    t_native_method_sample: i64,
    t_alloc_in_tlab: i64,
    t_alloc_outside_tlab: i64,
    t_alloc_sample: i64,
    t_monitor_enter: i64,
    t_thread_park: i64,
    t_old_object: i64,
    t_live_object: i64,
}

impl JfrReader {
    /// Reads a recording from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(std::fs::read(path)?)
    }

    /// Wraps an in-memory recording.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let buf = ByteReader::new(data);
        if buf.len() < 4 || buf.u32_at(0)? != CHUNK_SIGNATURE {
            return Err(ParseError::BadMagic);
        }
        Ok(Self {
            buf,
            chunk_start: 0,
            chunk_end: 0,
            state: ReaderState::AtChunkStart,
            start_nanos: i64::MAX,
            end_nanos: i64::MIN,
            start_ticks: i64::MAX,
            chunk_start_nanos: 0,
            chunk_end_nanos: 0,
            chunk_start_ticks: 0,
            ticks_per_sec: 1_000_000_000,
            types: HashMap::new(),
            types_by_name: HashMap::new(),
            string_pool: HashMap::new(),
            enums: HashMap::new(),
            threads: HashMap::new(),
            classes: HashMap::new(),
            symbols: HashMap::new(),
            methods: HashMap::new(),
            stack_traces: HashMap::new(),
            t_execution_sample: -1,
            t_native_method_sample: -1,
            t_alloc_in_tlab: -1,
            t_alloc_outside_tlab: -1,
            t_alloc_sample: -1,
            t_monitor_enter: -1,
            t_thread_park: -1,
            t_old_object: -1,
            t_live_object: -1,
        })
    }

    /// Total recorded duration across all chunks seen so far.
    pub fn duration_nanos(&self) -> i64 {
        self.end_nanos - self.start_nanos
    }

    /// Advances to the next chunk, parsing its metadata and constant pools.
    /// Returns `false` at end of file. An incomplete trailing chunk (still
    /// being written, or cut off mid-flight) ends the file silently.
    pub fn next_chunk(&mut self) -> Result<bool> {
        if self.state == ReaderState::Eof {
            return Ok(false);
        }
        let pos = self.chunk_end;
        if pos + CHUNK_HEADER_SIZE > self.buf.len() {
            self.state = ReaderState::Eof;
            return Ok(false);
        }
        if self.buf.u32_at(pos)? != CHUNK_SIGNATURE {
            return Err(ParseError::BadMagic);
        }
        let major = self.buf.u16_at(pos + 4)?;
        let minor = self.buf.u16_at(pos + 6)?;
        if major != 2 {
            return Err(ParseError::UnsupportedVersion { major, minor });
        }

        let chunk_size = self.buf.i64_at(pos + 8)? as usize;
        if chunk_size < CHUNK_HEADER_SIZE {
            return Err(ParseError::MalformedRecord {
                offset: pos,
                message: "chunk size smaller than its header",
            });
        }
        if pos + chunk_size > self.buf.len() {
            self.state = ReaderState::Eof;
            return Ok(false);
        }
        let cp_offset = self.buf.i64_at(pos + 16)? as usize;
        let meta_offset = self.buf.i64_at(pos + 24)? as usize;
        if cp_offset == 0 || meta_offset == 0 {
            // Offsets are patched in when the chunk is finished.
            self.state = ReaderState::Eof;
            return Ok(false);
        }

        self.chunk_start_nanos = self.buf.i64_at(pos + 32)?;
        self.chunk_end_nanos = self.chunk_start_nanos + self.buf.i64_at(pos + 40)?;
        self.chunk_start_ticks = self.buf.i64_at(pos + 48)?;
        self.ticks_per_sec = self.buf.i64_at(pos + 56)?;
        self.start_nanos = self.start_nanos.min(self.chunk_start_nanos);
        self.end_nanos = self.end_nanos.max(self.chunk_end_nanos);
        self.start_ticks = self.start_ticks.min(self.chunk_start_ticks);

        self.chunk_start = pos;
        self.chunk_end = pos + chunk_size;

        self.types.clear();
        self.types_by_name.clear();
        self.read_metadata(pos + meta_offset)?;
        self.read_constant_pools(pos + cp_offset)?;
        self.cache_event_types();

        self.buf.set_pos(pos + CHUNK_HEADER_SIZE)?;
        self.state = ReaderState::InChunk;
        Ok(true)
    }

    /// Yields the next event of the requested class within the current
    /// chunk, skipping unmatched records by their length prefix. Returns
    /// `None` at the chunk boundary.
    pub fn read_event(&mut self, class: EventClass) -> Result<Option<Event>> {
        self.next_event(Some(class))
    }

    /// Yields the next event of any recognized class within the current
    /// chunk.
    pub fn read_any_event(&mut self) -> Result<Option<Event>> {
        self.next_event(None)
    }

    fn next_event(&mut self, class: Option<EventClass>) -> Result<Option<Event>> {
        if self.state != ReaderState::InChunk {
            return Ok(None);
        }
        while self.buf.pos() < self.chunk_end {
            let start = self.buf.pos();
            let size = self.buf.varint()? as usize;
            if size == 0 || start + size > self.chunk_end {
                return Err(ParseError::MalformedRecord {
                    offset: start,
                    message: "event size out of chunk bounds",
                });
            }
            let type_id = self.buf.varlong()?;
            let event = self.parse_event(type_id, class)?;
            self.buf.set_pos(start + size)?;
            if event.is_some() {
                return Ok(event);
            }
        }
        self.state = ReaderState::AtChunkStart;
        Ok(None)
    }

    fn parse_event(&mut self, type_id: i64, class: Option<EventClass>) -> Result<Option<Event>> {
        let wanted = |c| class.is_none() || class == Some(c);

        if type_id == self.t_execution_sample || type_id == self.t_native_method_sample {
            if wanted(EventClass::ExecutionSample) {
                return self.read_execution_sample().map(Some);
            }
        } else if type_id == self.t_alloc_in_tlab {
            if wanted(EventClass::AllocationSample) {
                return self.read_allocation_sample(true).map(Some);
            }
        } else if type_id == self.t_alloc_outside_tlab || type_id == self.t_alloc_sample {
            if wanted(EventClass::AllocationSample) {
                return self.read_allocation_sample(false).map(Some);
            }
        } else if type_id == self.t_monitor_enter || type_id == self.t_thread_park {
            if wanted(EventClass::ContendedLock) {
                return self.read_contended_lock().map(Some);
            }
        } else if (type_id == self.t_old_object || type_id == self.t_live_object)
            && wanted(EventClass::LiveObject)
        {
            return self.read_live_object().map(Some);
        }
        Ok(None)
    }

    fn read_execution_sample(&mut self) -> Result<Event> {
        let time = self.buf.varlong()?;
        let tid = self.buf.varint()?;
        let stack_trace_id = self.buf.varlong()?;
        let thread_state = self.buf.varint()?;
        Ok(Event {
            time,
            tid,
            stack_trace_id,
            kind: EventKind::ExecutionSample { thread_state },
        })
    }

    fn read_allocation_sample(&mut self, tlab: bool) -> Result<Event> {
        let time = self.buf.varlong()?;
        let tid = self.buf.varint()?;
        let stack_trace_id = self.buf.varlong()?;
        let class_id = self.buf.varlong()?;
        let allocation_size = self.buf.varlong()?;
        let tlab_size = if tlab { self.buf.varlong()? } else { 0 };
        Ok(Event {
            time,
            tid,
            stack_trace_id,
            kind: EventKind::AllocationSample {
                class_id,
                allocation_size,
                tlab_size,
            },
        })
    }

    fn read_contended_lock(&mut self) -> Result<Event> {
        let time = self.buf.varlong()?;
        let duration = self.buf.varlong()?;
        let tid = self.buf.varint()?;
        let stack_trace_id = self.buf.varlong()?;
        let class_id = self.buf.varlong()?;
        Ok(Event {
            time,
            tid,
            stack_trace_id,
            kind: EventKind::ContendedLock { class_id, duration },
        })
    }

    fn read_live_object(&mut self) -> Result<Event> {
        let time = self.buf.varlong()?;
        let tid = self.buf.varint()?;
        let stack_trace_id = self.buf.varlong()?;
        let class_id = self.buf.varlong()?;
        let allocation_size = self.buf.varlong()?;
        Ok(Event {
            time,
            tid,
            stack_trace_id,
            kind: EventKind::LiveObject {
                class_id,
                allocation_size,
            },
        })
    }

    fn cache_event_types(&mut self) {
        self.t_execution_sample = self.type_id("jdk.ExecutionSample");
        self.t_native_method_sample = self.type_id("jdk.NativeMethodSample");
        self.t_alloc_in_tlab = self.type_id("jdk.ObjectAllocationInNewTLAB");
        self.t_alloc_outside_tlab = self.type_id("jdk.ObjectAllocationOutsideTLAB");
        self.t_alloc_sample = self.type_id("jdk.ObjectAllocationSample");
        self.t_monitor_enter = self.type_id("jdk.JavaMonitorEnter");
        self.t_thread_park = self.type_id("jdk.ThreadPark");
        self.t_old_object = self.type_id("jdk.OldObjectSample");
        self.t_live_object = self.type_id("profiler.LiveObject");
    }

    pub(crate) fn type_id(&self, name: &str) -> i64 {
        self.types_by_name.get(name).copied().unwrap_or(-1)
    }

    /// Resolves an enum member's symbolic name, e.g. the frame type or
    /// thread state for an ordinal.
    pub fn get_enum_value(&self, type_name: &str, ordinal: i32) -> Option<&str> {
        self.enums
            .get(type_name)?
            .get(&ordinal)
            .map(String::as_str)
    }

    /// Finds the ordinal of an enum member by its symbolic name.
    pub fn get_enum_key(&self, type_name: &str, value: &str) -> Option<i32> {
        self.enums
            .get(type_name)?
            .iter()
            .find(|(_, v)| v.as_str() == value)
            .map(|(k, _)| *k)
    }

    /// Decodes a tagged string at the cursor. `None` stands for an absent
    /// string (tag 0) or a dangling string-pool reference.
    pub(crate) fn get_string(&mut self) -> Result<Option<String>> {
        match self.buf.u8()? {
            0 => Ok(None),
            1 => Ok(Some(String::new())),
            2 => {
                let id = self.buf.varlong()?;
                Ok(self.string_pool.get(&id).cloned())
            }
            3 => {
                let len = self.buf.varint()? as usize;
                let bytes = self.buf.bytes(len)?;
                Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
            }
            4 => {
                let len = self.buf.varint()? as usize;
                let mut units = Vec::with_capacity(len);
                for _ in 0..len {
                    units.push(self.buf.varint()? as u16);
                }
                Ok(Some(String::from_utf16_lossy(&units)))
            }
            5 => {
                let len = self.buf.varint()? as usize;
                let bytes = self.buf.bytes(len)?;
                Ok(Some(bytes.iter().map(|&b| b as char).collect()))
            }
            tag => Err(ParseError::InvalidStringEncoding(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ChunkBuilder;

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            JfrReader::new(b"GARBAGE!".to_vec()),
            Err(ParseError::BadMagic)
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut data = ChunkBuilder::new().build();
        data[4] = 0;
        data[5] = 1; // version 1.x
        let mut jfr = JfrReader::new(data).unwrap();
        assert!(matches!(
            jfr.next_chunk(),
            Err(ParseError::UnsupportedVersion { major: 1, .. })
        ));
    }

    #[test]
    fn empty_chunk_parses() {
        let data = ChunkBuilder::new().build();
        let mut jfr = JfrReader::new(data).unwrap();
        assert!(jfr.next_chunk().unwrap());
        assert_eq!(jfr.read_event(EventClass::ExecutionSample).unwrap(), None);
        assert!(!jfr.next_chunk().unwrap());
    }

    #[test]
    fn truncated_trailing_chunk_is_tolerated() {
        let mut data = ChunkBuilder::new()
            .execution_sample(100, 1, 1, 0)
            .build();
        let second = ChunkBuilder::new().build();
        data.extend_from_slice(&second[..40]);

        let mut jfr = JfrReader::new(data).unwrap();
        assert!(jfr.next_chunk().unwrap());
        let mut count = 0;
        while jfr.read_event(EventClass::ExecutionSample).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
        assert!(!jfr.next_chunk().unwrap());
    }

    #[test]
    fn reads_execution_samples_and_pools() {
        let data = ChunkBuilder::new()
            .symbol(1, b"Main")
            .symbol(2, b"run")
            .class(10, 1)
            .method(20, 10, 2)
            .stack_trace(30, &[(20, 5, 2, crate::frame::JIT_COMPILED)])
            .thread(7, "worker")
            .execution_sample(1000, 7, 30, 1)
            .execution_sample(2000, 7, 30, 1)
            .build();

        let mut jfr = JfrReader::new(data).unwrap();
        assert!(jfr.next_chunk().unwrap());

        let first = jfr.read_event(EventClass::ExecutionSample).unwrap().unwrap();
        assert_eq!(first.time, 1000);
        assert_eq!(first.tid, 7);
        assert_eq!(first.stack_trace_id, 30);
        assert_eq!(first.thread_state(), Some(1));

        let second = jfr.read_event(EventClass::ExecutionSample).unwrap().unwrap();
        assert_eq!(second.time, 2000);
        assert_eq!(jfr.read_event(EventClass::ExecutionSample).unwrap(), None);

        assert_eq!(jfr.symbols[&1], b"Main");
        assert_eq!(jfr.methods[&20].name, 2);
        assert_eq!(jfr.classes[&10].name, 1);
        let st = &jfr.stack_traces[&30];
        assert_eq!(st.methods, vec![20]);
        assert_eq!(st.locations, vec![(5 << 16) | 2]);
        assert_eq!(st.types, vec![crate::frame::JIT_COMPILED]);
        assert_eq!(jfr.threads[&7], "worker");
    }

    #[test]
    fn filters_by_event_class() {
        let data = ChunkBuilder::new()
            .execution_sample(1000, 1, 1, 0)
            .allocation_in_tlab(1500, 1, 1, 10, 64, 4096)
            .execution_sample(2000, 1, 1, 0)
            .build();

        let mut jfr = JfrReader::new(data).unwrap();
        assert!(jfr.next_chunk().unwrap());
        let mut allocs = 0;
        while let Some(e) = jfr.read_event(EventClass::AllocationSample).unwrap() {
            assert_eq!(
                e.kind,
                EventKind::AllocationSample {
                    class_id: 10,
                    allocation_size: 64,
                    tlab_size: 4096
                }
            );
            allocs += 1;
        }
        assert_eq!(allocs, 1);
    }

    #[test]
    fn read_any_event_yields_all_classes() {
        let data = ChunkBuilder::new()
            .execution_sample(1000, 1, 1, 0)
            .allocation_in_tlab(1500, 1, 1, 10, 64, 4096)
            .monitor_enter(1800, 1, 1, 10, 500)
            .build();

        let mut jfr = JfrReader::new(data).unwrap();
        assert!(jfr.next_chunk().unwrap());
        let mut count = 0;
        while jfr.read_any_event().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn enum_lookup_both_directions() {
        let data = ChunkBuilder::new().build();
        let mut jfr = JfrReader::new(data).unwrap();
        assert!(jfr.next_chunk().unwrap());

        assert_eq!(
            jfr.get_enum_value("jdk.types.ThreadState", 1),
            Some("STATE_RUNNABLE")
        );
        assert_eq!(
            jfr.get_enum_key("jdk.types.ThreadState", "STATE_RUNNABLE"),
            Some(1)
        );
        assert_eq!(jfr.get_enum_key("jdk.types.ThreadState", "STATE_BOGUS"), None);
        assert_eq!(jfr.get_enum_key("jdk.types.GCWhen", "ANY"), None);
    }

    #[test]
    fn multiple_chunks_merge_pools() {
        let mut data = ChunkBuilder::new()
            .symbol(1, b"A")
            .execution_sample(100, 1, 1, 0)
            .build();
        data.extend(
            ChunkBuilder::new()
                .symbol(2, b"B")
                .execution_sample(200, 1, 1, 0)
                .build(),
        );

        let mut jfr = JfrReader::new(data).unwrap();
        let mut chunks = 0;
        let mut events = 0;
        while jfr.next_chunk().unwrap() {
            chunks += 1;
            while jfr.read_event(EventClass::ExecutionSample).unwrap().is_some() {
                events += 1;
            }
        }
        assert_eq!(chunks, 2);
        assert_eq!(events, 2);
        assert!(jfr.symbols.contains_key(&1));
        assert!(jfr.symbols.contains_key(&2));
    }
}
