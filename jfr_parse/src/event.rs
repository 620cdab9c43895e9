//! Typed events extracted from chunk bodies.

/// Event classes a caller can request from the reader. Each class covers the
/// recording type names listed in its variant documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// `jdk.ExecutionSample`, `jdk.NativeMethodSample`
    ExecutionSample,
    /// `jdk.ObjectAllocationInNewTLAB`, `jdk.ObjectAllocationOutsideTLAB`,
    /// `jdk.ObjectAllocationSample`
    AllocationSample,
    /// `jdk.JavaMonitorEnter`, `jdk.ThreadPark`
    ContendedLock,
    /// `jdk.OldObjectSample`, `profiler.LiveObject`
    LiveObject,
}

/// A decoded event: the common header plus the per-class payload.
///
/// `time` is a tick timestamp in the current chunk's tick domain;
/// `stack_trace_id` references the stack-trace constant pool and may dangle
/// (the recording can drop pool entries under pressure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time: i64,
    pub tid: i32,
    pub stack_trace_id: i64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ExecutionSample {
        thread_state: i32,
    },
    AllocationSample {
        class_id: i64,
        allocation_size: i64,
        tlab_size: i64,
    },
    ContendedLock {
        class_id: i64,
        duration: i64,
    },
    LiveObject {
        class_id: i64,
        allocation_size: i64,
    },
}

impl Event {
    /// The class of the allocated/contended object, or 0 for execution
    /// samples.
    pub fn class_id(&self) -> i64 {
        match self.kind {
            EventKind::ExecutionSample { .. } => 0,
            EventKind::AllocationSample { class_id, .. } => class_id,
            EventKind::ContendedLock { class_id, .. } => class_id,
            EventKind::LiveObject { class_id, .. } => class_id,
        }
    }

    /// Thread-state ordinal for execution samples.
    pub fn thread_state(&self) -> Option<i32> {
        match self.kind {
            EventKind::ExecutionSample { thread_state } => Some(thread_state),
            _ => None,
        }
    }

    /// The event's natural weight: allocation size in bytes, lock duration
    /// in ticks, or 1 for execution samples.
    pub fn value(&self) -> i64 {
        match self.kind {
            EventKind::ExecutionSample { .. } => 1,
            EventKind::AllocationSample {
                allocation_size, ..
            } => allocation_size,
            EventKind::ContendedLock { duration, .. } => duration,
            EventKind::LiveObject {
                allocation_size, ..
            } => allocation_size,
        }
    }
}
