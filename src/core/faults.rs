//! # Unhandled fault buffer.
//!
//! Faults nobody handled (handler failures, panics, aborted workflows) are
//! counted in a [`FaultSink`] by category; only the first fault of each
//! category is kept. The host drains the sink on a fixed interval and logs
//! one summary line per category.
//!
//! ```text
//! bus reporter ──┐
//! panic hook ────┼──► record(category, message) ──► { category → (count, first) }
//! verifier ──────┘                                          │
//!                         every 5 min: report_summary() ◄───┘ (drain + clear)
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{error, warn};

/// A single recorded fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Aggregate of one category at drain time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultSummary {
    pub category: String,
    pub count: usize,
    /// First recorded fault of the category.
    pub first: Fault,
}

#[derive(Debug)]
struct Tally {
    count: usize,
    first: Fault,
}

/// Per-category fault counter.
#[derive(Debug, Default)]
pub struct FaultSink {
    faults: Mutex<BTreeMap<String, Tally>>,
}

impl FaultSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> MutexGuard<'_, BTreeMap<String, Tally>> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a fault under `category`.
    pub fn record(&self, category: impl Into<String>, message: impl Into<String>) {
        let category = category.into();
        let message = message.into();
        warn!(category = %category, fault = %message, "unhandled fault recorded");
        self.faults()
            .entry(category)
            .and_modify(|t| t.count += 1)
            .or_insert_with(|| Tally {
                count: 1,
                first: Fault {
                    at: Utc::now(),
                    message,
                },
            });
    }

    /// Total number of faults recorded since the last drain.
    pub fn len(&self) -> usize {
        self.faults().values().map(|t| t.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the buffer and returns one summary per category, sorted by category.
    pub fn drain(&self) -> Vec<FaultSummary> {
        let drained = std::mem::take(&mut *self.faults());
        drained
            .into_iter()
            .map(|(category, Tally { count, first })| FaultSummary {
                category,
                count,
                first,
            })
            .collect()
    }

    /// Drains the buffer and logs one error entry per category.
    ///
    /// Returns the number of faults that were reported.
    pub fn report_summary(&self) -> usize {
        let summaries = self.drain();
        let mut total = 0;
        for s in &summaries {
            total += s.count;
            error!(
                category = %s.category,
                count = s.count,
                first_at = %s.first.at.to_rfc3339(),
                first = %s.first.message,
                "there are {} faults of '{}'",
                s.count,
                s.category
            );
        }
        total
    }

    /// Records every panic of the process under the `panic` category.
    ///
    /// The previously installed hook still runs afterwards.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let sink = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(sink) = sink.upgrade() {
                sink.record("panic", info.to_string());
            }
            previous(info);
        }));
    }
}
