//! Optional trace records (`spec.md` §4.5), emitted per instruction when
//! `runtime_metrics` is enabled. `trace_plan_stack` additionally threads
//! a plan reference through each record, left as an opaque string here
//! since the plan-printing format lives in `lucidb-core`.

use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    pub instruction_index: usize,
    pub operation: &'static str,
    pub duration: Duration,
    pub row_count: usize,
    pub error: Option<String>,
    pub plan_reference: Option<String>,
}

/// A sink collecting trace records during one statement's execution.
/// Plain `Mutex<Vec<_>>` -- trace volume is bounded by row/operator
/// count, not a hot path worth a lock-free structure.
#[derive(Default)]
pub struct TraceSink {
    records: Mutex<Vec<TraceRecord>>,
    next_index: std::sync::atomic::AtomicUsize,
}

impl TraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&self) -> usize {
        self.next_index.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    pub fn record(&self, record: TraceRecord) {
        self.records.lock().expect("trace sink lock poisoned").push(record);
    }

    pub fn into_records(self) -> Vec<TraceRecord> {
        self.records.into_inner().expect("trace sink lock poisoned")
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().expect("trace sink lock poisoned").clone()
    }
}
