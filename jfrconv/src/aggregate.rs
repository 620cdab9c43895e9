//! Coalescing of samples that share a stack trace.
//!
//! Many events differ only in their timestamp; aggregating them before name
//! resolution keeps the expensive work proportional to the number of unique
//! stacks. The table uses open addressing with linear probing and doubles
//! at a 2/3 load factor.

use jfr_parse::Event;

const INITIAL_CAPACITY: usize = 1024;

/// Accumulates a count and a value per (stack, thread?, class) group.
pub struct EventAggregator {
    threads: bool,
    total: bool,
    entries: Vec<Option<Entry>>,
    size: usize,
}

#[derive(Clone)]
struct Entry {
    event: Event,
    count: u64,
    value: u64,
}

impl EventAggregator {
    /// `threads` adds the thread ID to the grouping key; `total` selects the
    /// accumulated value over the sample count when iterating.
    pub fn new(threads: bool, total: bool) -> Self {
        Self {
            threads,
            total,
            entries: vec![None; INITIAL_CAPACITY],
            size: 0,
        }
    }

    /// Folds one event into its group. `value` is the event's weight in the
    /// converter's value domain (ticks, bytes, or nanoseconds).
    pub fn collect(&mut self, event: Event, value: u64) {
        let threads = self.threads;
        let mask = self.entries.len() - 1;
        let mut i = hash(threads, &event) as usize & mask;
        loop {
            match &mut self.entries[i] {
                Some(entry) if same_group(threads, &entry.event, &event) => {
                    entry.count += 1;
                    entry.value += value;
                    return;
                }
                Some(_) => i = (i + 1) & mask,
                slot @ None => {
                    *slot = Some(Entry {
                        event,
                        count: 1,
                        value,
                    });
                    self.size += 1;
                    if self.size * 3 >= self.entries.len() * 2 {
                        self.grow();
                    }
                    return;
                }
            }
        }
    }

    /// Yields each group's representative event and weight: the accumulated
    /// value with `total`, the sample count otherwise. Order is unspecified
    /// but deterministic for a given input.
    pub fn iter(&self) -> impl Iterator<Item = (&Event, u64)> {
        let total = self.total;
        self.entries
            .iter()
            .flatten()
            .map(move |entry| (&entry.event, if total { entry.value } else { entry.count }))
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn grow(&mut self) {
        let threads = self.threads;
        let doubled = self.entries.len() * 2;
        let old = std::mem::replace(&mut self.entries, vec![None; doubled]);
        let mask = self.entries.len() - 1;
        for entry in old.into_iter().flatten() {
            let mut i = hash(threads, &entry.event) as usize & mask;
            while self.entries[i].is_some() {
                i = (i + 1) & mask;
            }
            self.entries[i] = Some(entry);
        }
    }
}

fn same_group(threads: bool, a: &Event, b: &Event) -> bool {
    a.stack_trace_id == b.stack_trace_id
        && (!threads || a.tid == b.tid)
        && a.class_id() == b.class_id()
}

fn hash(threads: bool, event: &Event) -> u64 {
    let mut h = event.stack_trace_id as u64;
    if threads {
        h = h.wrapping_mul(31).wrapping_add(event.tid as u64);
    }
    h = h.wrapping_mul(31).wrapping_add(event.class_id() as u64);
    h.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
