use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Cluster-wide unique query identity: issuing instance, wall-clock
/// second, a process-clock sample, and a per-process counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId {
    pub instance: u64,
    pub time: u32,
    pub clock: u32,
    pub counter: u32,
}

impl QueryId {
    pub fn generate(instance: u64) -> Self {
        let now = Utc::now();
        Self {
            instance,
            time: now.timestamp() as u32,
            clock: now.timestamp_subsec_micros(),
            counter: NEXT_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.instance, self.time, self.clock, self.counter
        )
    }
}
