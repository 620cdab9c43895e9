//! In-memory assembly of single JFR chunks for tests.
//!
//! Mirrors the wire format the reader consumes: a 68-byte header, event
//! records, one checkpoint record holding the constant pools, and a metadata
//! record describing the types. Not part of the stable API; enabled by the
//! `testutil` feature for downstream test suites.

use std::collections::HashMap;

const T_STRING: i64 = 1;
const T_THREAD: i64 = 2;
const T_CLASS: i64 = 3;
const T_SYMBOL: i64 = 4;
const T_METHOD: i64 = 5;
const T_STACK_TRACE: i64 = 6;
const T_THREAD_STATE: i64 = 7;
const T_FRAME_TYPE: i64 = 8;
const T_LONG: i64 = 9;

const T_EXECUTION_SAMPLE: i64 = 100;
const T_ALLOC_IN_TLAB: i64 = 101;
const T_ALLOC_OUTSIDE_TLAB: i64 = 102;
const T_MONITOR_ENTER: i64 = 103;
const T_OLD_OBJECT: i64 = 104;

const CHUNK_HEADER_SIZE: usize = 68;

/// Builds one self-contained chunk with defaulted clocks: start at tick 0,
/// one tick per nanosecond, one second of recorded time.
pub struct ChunkBuilder {
    start_nanos: i64,
    duration_nanos: i64,
    start_ticks: i64,
    ticks_per_sec: i64,
    symbols: Vec<(i64, Vec<u8>)>,
    classes: Vec<(i64, i64)>,
    methods: Vec<(i64, i64, i64)>,
    stack_traces: Vec<(i64, Vec<(i64, i32, i32, u8)>)>,
    threads: Vec<(i64, String)>,
    thread_states: Vec<(i32, String)>,
    frame_types: Vec<(i32, String)>,
    events: Vec<u8>,
}

impl Default for ChunkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self {
            start_nanos: 1_700_000_000_000_000_000,
            duration_nanos: 1_000_000_000,
            start_ticks: 0,
            ticks_per_sec: 1_000_000_000,
            symbols: Vec::new(),
            classes: Vec::new(),
            methods: Vec::new(),
            stack_traces: Vec::new(),
            threads: Vec::new(),
            thread_states: vec![
                (0, "STATE_NEW".to_string()),
                (1, "STATE_RUNNABLE".to_string()),
                (2, "STATE_SLEEPING".to_string()),
            ],
            frame_types: vec![
                (0, "Interpreted".to_string()),
                (1, "JIT compiled".to_string()),
                (2, "Inlined".to_string()),
                (3, "Native".to_string()),
            ],
            events: Vec::new(),
        }
    }

    pub fn start_nanos(mut self, nanos: i64) -> Self {
        self.start_nanos = nanos;
        self
    }

    pub fn duration_nanos(mut self, nanos: i64) -> Self {
        self.duration_nanos = nanos;
        self
    }

    pub fn start_ticks(mut self, ticks: i64) -> Self {
        self.start_ticks = ticks;
        self
    }

    pub fn ticks_per_sec(mut self, ticks: i64) -> Self {
        self.ticks_per_sec = ticks;
        self
    }

    pub fn symbol(mut self, id: i64, bytes: &[u8]) -> Self {
        self.symbols.push((id, bytes.to_vec()));
        self
    }

    pub fn class(mut self, id: i64, name_symbol: i64) -> Self {
        self.classes.push((id, name_symbol));
        self
    }

    pub fn method(mut self, id: i64, class_id: i64, name_symbol: i64) -> Self {
        self.methods.push((id, class_id, name_symbol));
        self
    }

    /// Frames are `(method_id, line, bci, frame_type)`, leaf first.
    pub fn stack_trace(mut self, id: i64, frames: &[(i64, i32, i32, u8)]) -> Self {
        self.stack_traces.push((id, frames.to_vec()));
        self
    }

    pub fn thread(mut self, tid: i64, name: &str) -> Self {
        self.threads.push((tid, name.to_string()));
        self
    }

    pub fn thread_state(mut self, ordinal: i32, name: &str) -> Self {
        self.thread_states.push((ordinal, name.to_string()));
        self
    }

    pub fn frame_type(mut self, ordinal: i32, name: &str) -> Self {
        self.frame_types.push((ordinal, name.to_string()));
        self
    }

    pub fn execution_sample(mut self, time: i64, tid: i64, stack_id: i64, state: i32) -> Self {
        let mut payload = Vec::new();
        put_varlong(&mut payload, T_EXECUTION_SAMPLE);
        put_varlong(&mut payload, time);
        put_varlong(&mut payload, tid);
        put_varlong(&mut payload, stack_id);
        put_varlong(&mut payload, state as i64);
        self.events.extend(finish_record(&payload));
        self
    }

    pub fn allocation_in_tlab(
        mut self,
        time: i64,
        tid: i64,
        stack_id: i64,
        class_id: i64,
        size: i64,
        tlab_size: i64,
    ) -> Self {
        let mut payload = Vec::new();
        put_varlong(&mut payload, T_ALLOC_IN_TLAB);
        put_varlong(&mut payload, time);
        put_varlong(&mut payload, tid);
        put_varlong(&mut payload, stack_id);
        put_varlong(&mut payload, class_id);
        put_varlong(&mut payload, size);
        put_varlong(&mut payload, tlab_size);
        self.events.extend(finish_record(&payload));
        self
    }

    pub fn allocation_outside_tlab(
        mut self,
        time: i64,
        tid: i64,
        stack_id: i64,
        class_id: i64,
        size: i64,
    ) -> Self {
        let mut payload = Vec::new();
        put_varlong(&mut payload, T_ALLOC_OUTSIDE_TLAB);
        put_varlong(&mut payload, time);
        put_varlong(&mut payload, tid);
        put_varlong(&mut payload, stack_id);
        put_varlong(&mut payload, class_id);
        put_varlong(&mut payload, size);
        self.events.extend(finish_record(&payload));
        self
    }

    pub fn monitor_enter(
        mut self,
        time: i64,
        tid: i64,
        stack_id: i64,
        class_id: i64,
        duration: i64,
    ) -> Self {
        let mut payload = Vec::new();
        put_varlong(&mut payload, T_MONITOR_ENTER);
        put_varlong(&mut payload, time);
        put_varlong(&mut payload, duration);
        put_varlong(&mut payload, tid);
        put_varlong(&mut payload, stack_id);
        put_varlong(&mut payload, class_id);
        self.events.extend(finish_record(&payload));
        self
    }

    pub fn live_object(
        mut self,
        time: i64,
        tid: i64,
        stack_id: i64,
        class_id: i64,
        size: i64,
    ) -> Self {
        let mut payload = Vec::new();
        put_varlong(&mut payload, T_OLD_OBJECT);
        put_varlong(&mut payload, time);
        put_varlong(&mut payload, tid);
        put_varlong(&mut payload, stack_id);
        put_varlong(&mut payload, class_id);
        put_varlong(&mut payload, size);
        self.events.extend(finish_record(&payload));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let checkpoint = self.build_checkpoint();
        let metadata = self.build_metadata();

        let mut out = vec![0u8; CHUNK_HEADER_SIZE];
        out.extend_from_slice(&self.events);
        let cp_offset = out.len() as i64;
        out.extend_from_slice(&checkpoint);
        let meta_offset = out.len() as i64;
        out.extend_from_slice(&metadata);
        let chunk_size = out.len() as i64;

        out[0..4].copy_from_slice(b"FLR\0");
        out[4..6].copy_from_slice(&2u16.to_be_bytes());
        out[6..8].copy_from_slice(&0u16.to_be_bytes());
        out[8..16].copy_from_slice(&chunk_size.to_be_bytes());
        out[16..24].copy_from_slice(&cp_offset.to_be_bytes());
        out[24..32].copy_from_slice(&meta_offset.to_be_bytes());
        out[32..40].copy_from_slice(&self.start_nanos.to_be_bytes());
        out[40..48].copy_from_slice(&self.duration_nanos.to_be_bytes());
        out[48..56].copy_from_slice(&self.start_ticks.to_be_bytes());
        out[56..64].copy_from_slice(&self.ticks_per_sec.to_be_bytes());
        out[64..68].copy_from_slice(&0u32.to_be_bytes());
        out
    }

    fn build_checkpoint(&self) -> Vec<u8> {
        let mut pools: Vec<Vec<u8>> = Vec::new();

        if !self.threads.is_empty() {
            let mut p = Vec::new();
            put_varlong(&mut p, T_THREAD);
            put_varlong(&mut p, self.threads.len() as i64);
            for (tid, name) in &self.threads {
                put_varlong(&mut p, *tid);
                p.push(0); // no OS name
                put_varlong(&mut p, *tid); // OS thread id
                put_string(&mut p, name);
                put_varlong(&mut p, *tid); // Java thread id
            }
            pools.push(p);
        }
        if !self.classes.is_empty() {
            let mut p = Vec::new();
            put_varlong(&mut p, T_CLASS);
            put_varlong(&mut p, self.classes.len() as i64);
            for (id, name_symbol) in &self.classes {
                put_varlong(&mut p, *id);
                put_varlong(&mut p, 0); // class loader
                put_varlong(&mut p, *name_symbol);
                put_varlong(&mut p, 0); // package
                put_varlong(&mut p, 0); // modifiers
            }
            pools.push(p);
        }
        if !self.symbols.is_empty() {
            let mut p = Vec::new();
            put_varlong(&mut p, T_SYMBOL);
            put_varlong(&mut p, self.symbols.len() as i64);
            for (id, bytes) in &self.symbols {
                put_varlong(&mut p, *id);
                p.push(3);
                put_varlong(&mut p, bytes.len() as i64);
                p.extend_from_slice(bytes);
            }
            pools.push(p);
        }
        if !self.methods.is_empty() {
            let mut p = Vec::new();
            put_varlong(&mut p, T_METHOD);
            put_varlong(&mut p, self.methods.len() as i64);
            for (id, class_id, name_symbol) in &self.methods {
                put_varlong(&mut p, *id);
                put_varlong(&mut p, *class_id);
                put_varlong(&mut p, *name_symbol);
                put_varlong(&mut p, 0); // signature
                put_varlong(&mut p, 0); // modifiers
                put_varlong(&mut p, 0); // hidden
            }
            pools.push(p);
        }
        if !self.stack_traces.is_empty() {
            let mut p = Vec::new();
            put_varlong(&mut p, T_STACK_TRACE);
            put_varlong(&mut p, self.stack_traces.len() as i64);
            for (id, frames) in &self.stack_traces {
                put_varlong(&mut p, *id);
                put_varlong(&mut p, 0); // truncated
                put_varlong(&mut p, frames.len() as i64);
                for (method, line, bci, frame_type) in frames {
                    put_varlong(&mut p, *method);
                    put_varlong(&mut p, *line as i64);
                    put_varlong(&mut p, *bci as i64);
                    put_varlong(&mut p, *frame_type as i64);
                }
            }
            pools.push(p);
        }
        for (type_id, values) in [
            (T_THREAD_STATE, &self.thread_states),
            (T_FRAME_TYPE, &self.frame_types),
        ] {
            let mut p = Vec::new();
            put_varlong(&mut p, type_id);
            put_varlong(&mut p, values.len() as i64);
            for (ordinal, name) in values {
                put_varlong(&mut p, *ordinal as i64);
                put_string(&mut p, name);
            }
            pools.push(p);
        }

        let mut payload = Vec::new();
        put_varlong(&mut payload, 1); // checkpoint event type
        put_varlong(&mut payload, 0); // timestamp
        put_varlong(&mut payload, 0); // duration
        put_varlong(&mut payload, 0); // delta: end of chain
        put_varlong(&mut payload, 0); // flush flag
        put_varlong(&mut payload, pools.len() as i64);
        for pool in pools {
            payload.extend_from_slice(&pool);
        }
        finish_record(&payload)
    }

    fn build_metadata(&self) -> Vec<u8> {
        let mut w = MetaWriter::default();

        let classes = vec![
            w.class(T_STRING, "java.lang.String", &[]),
            w.class(
                T_THREAD,
                "java.lang.Thread",
                &[
                    ("osName", T_STRING, false),
                    ("osThreadId", T_LONG, false),
                    ("javaName", T_STRING, false),
                    ("javaThreadId", T_LONG, false),
                ],
            ),
            w.class(
                T_CLASS,
                "java.lang.Class",
                &[
                    ("classLoader", T_LONG, true),
                    ("name", T_SYMBOL, true),
                    ("package", T_LONG, true),
                    ("modifiers", T_LONG, false),
                ],
            ),
            w.class(T_SYMBOL, "jdk.types.Symbol", &[("string", T_STRING, false)]),
            w.class(
                T_METHOD,
                "jdk.types.Method",
                &[
                    ("type", T_CLASS, true),
                    ("name", T_SYMBOL, true),
                    ("descriptor", T_SYMBOL, true),
                    ("modifiers", T_LONG, false),
                    ("hidden", T_LONG, false),
                ],
            ),
            w.class(
                T_STACK_TRACE,
                "jdk.types.StackTrace",
                &[("truncated", T_LONG, false), ("frames", T_LONG, false)],
            ),
            w.class(
                T_THREAD_STATE,
                "jdk.types.ThreadState",
                &[("name", T_STRING, false)],
            ),
            w.class(
                T_FRAME_TYPE,
                "jdk.types.FrameType",
                &[("description", T_STRING, false)],
            ),
            w.class(T_EXECUTION_SAMPLE, "jdk.ExecutionSample", &[]),
            w.class(T_ALLOC_IN_TLAB, "jdk.ObjectAllocationInNewTLAB", &[]),
            w.class(T_ALLOC_OUTSIDE_TLAB, "jdk.ObjectAllocationOutsideTLAB", &[]),
            w.class(T_MONITOR_ENTER, "jdk.JavaMonitorEnter", &[]),
            w.class(T_OLD_OBJECT, "jdk.OldObjectSample", &[]),
        ];
        let metadata = w.element("metadata", &[], classes);
        let root = w.element("root", &[], vec![metadata]);

        let mut payload = Vec::new();
        put_varlong(&mut payload, 0); // metadata event type
        put_varlong(&mut payload, 0); // start time
        put_varlong(&mut payload, 0); // duration
        put_varlong(&mut payload, 0); // metadata id
        put_varlong(&mut payload, w.strings.len() as i64);
        for s in &w.strings {
            put_string(&mut payload, s);
        }
        payload.extend_from_slice(&root);
        finish_record(&payload)
    }
}

#[derive(Default)]
struct MetaWriter {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl MetaWriter {
    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    fn element(&mut self, name: &str, attrs: &[(&str, String)], children: Vec<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        let name = self.intern(name);
        put_varlong(&mut out, name);
        put_varlong(&mut out, attrs.len() as i64);
        for (key, value) in attrs {
            let key = self.intern(key);
            let value = self.intern(value);
            put_varlong(&mut out, key);
            put_varlong(&mut out, value);
        }
        put_varlong(&mut out, children.len() as i64);
        for child in children {
            out.extend_from_slice(&child);
        }
        out
    }

    fn class(&mut self, id: i64, name: &str, fields: &[(&str, i64, bool)]) -> Vec<u8> {
        let children = fields
            .iter()
            .map(|(fname, type_id, cp)| {
                let mut attrs = vec![
                    ("name", fname.to_string()),
                    ("class", type_id.to_string()),
                ];
                if *cp {
                    attrs.push(("constantPool", "true".to_string()));
                }
                self.element("field", &attrs, vec![])
            })
            .collect();
        self.element(
            "class",
            &[("id", id.to_string()), ("name", name.to_string())],
            children,
        )
    }
}

fn put_varlong(out: &mut Vec<u8>, v: i64) {
    let mut v = v as u64;
    for _ in 0..8 {
        if v < 0x80 {
            out.push(v as u8);
            return;
        }
        out.push((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn varlong_len(v: i64) -> usize {
    let mut buf = Vec::new();
    put_varlong(&mut buf, v);
    buf.len()
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.push(3);
    put_varlong(out, s.len() as i64);
    out.extend_from_slice(s.as_bytes());
}

/// Prepends the record's length prefix; the prefix counts itself.
fn finish_record(payload: &[u8]) -> Vec<u8> {
    let mut size_len = 1;
    loop {
        let total = (size_len + payload.len()) as i64;
        if varlong_len(total) == size_len {
            let mut out = Vec::with_capacity(total as usize);
            put_varlong(&mut out, total);
            out.extend_from_slice(payload);
            return out;
        }
        size_len += 1;
    }
}
