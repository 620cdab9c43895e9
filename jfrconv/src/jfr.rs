//! The JFR conversion driver: chunk iteration, event filtering and
//! aggregation, and trace building for the sample sinks.

use jfr_parse::{Event, EventClass, EventKind, JfrReader, StackTrace};
use log::{debug, warn};

use crate::aggregate::EventAggregator;
use crate::classify::categorize;
use crate::resolve::NameResolver;
use crate::{Arguments, Result, SampleSink};

/// Frame-type ordinal to collapsed-title suffix.
const FRAME_SUFFIX: [&str; 7] = ["_[0]", "_[j]", "_[i]", "", "", "_[k]", "_[1]"];

/// Timestamps below this are offsets from the recording start rather than
/// absolute epoch milliseconds.
const EPOCH_MS_THRESHOLD: i64 = 1_500_000_000_000;

/// One aggregated sample handed to a consumer: the representative event,
/// its resolved stack, and the accumulated weight (nanoseconds, bytes, or
/// a sample count, depending on the mode).
pub struct Sample<'a> {
    pub event: &'a Event,
    pub stack: &'a StackTrace,
    pub value: u64,
}

/// Drives a recording chunk by chunk through filtering and aggregation.
pub struct JfrConverter<'a> {
    jfr: &'a mut JfrReader,
    args: &'a Arguments,
    last_ticks: i64,
}

impl<'a> JfrConverter<'a> {
    pub fn new(jfr: &'a mut JfrReader, args: &'a Arguments) -> Self {
        Self {
            jfr,
            args,
            last_ticks: 0,
        }
    }

    /// Converts the whole recording into a sink of titled stack traces.
    pub fn convert<S: SampleSink>(&mut self, sink: &mut S) -> Result<()> {
        let args = self.args;
        self.for_each_sample(|resolver, sample| {
            let trace = build_trace(args, resolver, &sample);
            sink.add_sample(&trace, sample.value)
        })
    }

    /// Aggregates each chunk and feeds the surviving samples to `visit`.
    /// Samples with a dangling stack-trace ID are skipped.
    pub fn for_each_sample<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&mut NameResolver<'_>, Sample<'_>) -> Result<()>,
    {
        let event_class = self.args.event_class();
        let mut first_chunk = true;
        while self.jfr.next_chunk()? {
            if first_chunk {
                self.last_ticks = self.jfr.chunk_start_ticks;
                first_chunk = false;
            }
            let aggregated = self.collect_events(event_class)?;
            debug!(
                "chunk at {} ns: {} sample groups",
                self.jfr.chunk_start_nanos,
                aggregated.len()
            );

            let jfr: &JfrReader = self.jfr;
            let mut resolver = NameResolver::new(jfr, self.args);
            let ticks_to_nanos = 1e9 / jfr.ticks_per_sec as f64;
            let scale = self.args.total
                && matches!(
                    event_class,
                    EventClass::ExecutionSample | EventClass::ContendedLock
                )
                && ticks_to_nanos != 1.0;

            let mut dangling = 0u64;
            for (event, value) in aggregated.iter() {
                let Some(stack) = jfr.stack_traces.get(&event.stack_trace_id) else {
                    dangling += 1;
                    continue;
                };
                let value = if scale {
                    (value as f64 * ticks_to_nanos) as u64
                } else {
                    value
                };
                visit(
                    &mut resolver,
                    Sample {
                        event,
                        stack,
                        value,
                    },
                )?;
            }
            if dangling > 0 {
                warn!("skipped {} samples with dangling stack traces", dangling);
            }
        }
        Ok(())
    }

    /// Reads one chunk's events of the given class, applying the time
    /// window and thread-state filters, and groups them in an aggregator.
    fn collect_events(&mut self, event_class: EventClass) -> Result<EventAggregator> {
        let mut aggregator = EventAggregator::new(self.args.threads, self.args.total);

        let state_mask = self.thread_state_mask();
        let start_ticks = if self.args.from != 0 {
            self.to_ticks(self.args.from)
        } else {
            i64::MIN
        };
        let end_ticks = if self.args.to != 0 {
            self.to_ticks(self.args.to)
        } else {
            i64::MAX
        };
        let cpu = event_class == EventClass::ExecutionSample;

        while let Some(event) = self.jfr.read_event(event_class)? {
            if event.time < start_ticks || event.time > end_ticks {
                continue;
            }
            if let (Some(mask), Some(state)) = (state_mask, event.thread_state()) {
                if !(0..64).contains(&state) || mask & (1u64 << state) == 0 {
                    continue;
                }
            }
            let value = if cpu {
                // Execution samples weigh their distance to the previous
                // sample, accumulated in ticks and scaled at emission.
                let delta = (event.time - self.last_ticks).max(0) as u64;
                self.last_ticks = event.time;
                delta
            } else {
                event.value().max(0) as u64
            };
            aggregator.collect(event, value);
        }
        Ok(aggregator)
    }

    /// Resolves `--state` names against the recording's thread-state enum.
    /// With `--state` given, the mask applies even when empty: a recording
    /// without the enum rejects every sample.
    fn thread_state_mask(&self) -> Option<u64> {
        let state = self.args.state.as_deref()?;
        let mut mask = 0u64;
        for name in state.split(',') {
            let key = format!("STATE_{}", name.trim().to_uppercase());
            if let Some(ordinal) = self.jfr.get_enum_key("jdk.types.ThreadState", &key) {
                if (0..64).contains(&ordinal) {
                    mask |= 1 << ordinal;
                }
            }
        }
        Some(mask)
    }

    /// Converts a `--from`/`--to` millisecond value (absolute epoch, offset
    /// from start, or negative offset from end) into current-chunk ticks.
    fn to_ticks(&self, millis: i64) -> i64 {
        let mut nanos = millis * 1_000_000;
        if millis < 0 {
            nanos += self.jfr.end_nanos;
        } else if millis < EPOCH_MS_THRESHOLD {
            nanos += self.jfr.start_nanos;
        }
        ((nanos - self.jfr.chunk_start_nanos) as f64 * (self.jfr.ticks_per_sec as f64 / 1e9))
            as i64
            + self.jfr.chunk_start_ticks
    }
}

/// Builds the titled trace for one sample, root first: optional thread
/// frame, optional category frame, the stack itself with tier suffixes and
/// `:line`/`@bci` decorations, and the allocated class as the leaf.
fn build_trace(args: &Arguments, resolver: &mut NameResolver, sample: &Sample) -> Vec<String> {
    let stack = sample.stack;
    let class_id = sample.event.class_id();
    let mut trace = Vec::with_capacity(stack.methods.len() + 3);

    if args.threads {
        trace.push(resolver.thread_name(sample.event.tid));
    }
    if args.classify {
        trace.push(categorize(stack, resolver).title().to_string());
    }
    for i in (0..stack.methods.len()).rev() {
        let frame_type = stack.types[i];
        let mut name = resolver.method_name(stack.methods[i], frame_type);
        let location = stack.locations[i];
        if args.lines && location >> 16 != 0 {
            name.push_str(&format!(":{}", location >> 16));
        } else if args.bci && location & 0xffff != 0 {
            name.push_str(&format!("@{}", location & 0xffff));
        }
        name.push_str(FRAME_SUFFIX.get(frame_type as usize).copied().unwrap_or(""));
        trace.push(name);
    }
    if class_id != 0 {
        let suffix = match sample.event.kind {
            EventKind::AllocationSample { tlab_size: 0, .. } => "_[k]",
            _ => "_[i]",
        };
        trace.push(format!("{}{}", resolver.class_name(class_id), suffix));
    }
    trace
}
