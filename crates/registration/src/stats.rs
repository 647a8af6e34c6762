use model::Reply;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Outcome of one triggered invocation of a registration.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Success,
    Failure(String),
    Aborted,
}

/// RegistrationStats are the counters of a registration's invocations.
/// They're updated concurrently by whichever task ran the invocation.
#[derive(Debug, Default)]
pub struct RegistrationStats {
    invocations: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    aborted: AtomicU64,
    total_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// StatsSnapshot is a point-in-time copy of RegistrationStats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub aborted: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
    pub last_error: Option<String>,
}

impl RegistrationStats {
    pub fn record(&self, duration: Duration, invocation: Invocation) {
        let ms = duration.as_millis() as u64;

        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_duration_ms.fetch_max(ms, Ordering::Relaxed);

        match invocation {
            Invocation::Success => self.successes.fetch_add(1, Ordering::Relaxed),
            Invocation::Aborted => self.aborted.fetch_add(1, Ordering::Relaxed),
            Invocation::Failure(error) => {
                *self.last_error.lock().unwrap() = Some(error);
                self.failures.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.invocations,
            &self.successes,
            &self.failures,
            &self.aborted,
            &self.total_duration_ms,
            &self.max_duration_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_error.lock().unwrap() = None;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
            max_duration_ms: self.max_duration_ms.load(Ordering::Relaxed),
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }
}

impl StatsSnapshot {
    /// Mean invocation duration, in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.invocations as f64
        }
    }

    pub fn to_reply(&self) -> Reply {
        let count = |n: u64| Reply::Integer(n as i64);

        Reply::Array(vec![
            "numTriggered".into(),
            count(self.invocations),
            "numSuccess".into(),
            count(self.successes),
            "numFailures".into(),
            count(self.failures),
            "numAborted".into(),
            count(self.aborted),
            "totalRunDurationMS".into(),
            count(self.total_duration_ms),
            "maxRunDurationMS".into(),
            count(self.max_duration_ms),
            "avgRunDurationMS".into(),
            Reply::Double(self.avg_duration_ms()),
            "lastError".into(),
            match &self.last_error {
                Some(error) => error.as_str().into(),
                None => Reply::Null,
            },
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_and_reset() {
        let stats = RegistrationStats::default();

        stats.record(Duration::from_millis(10), Invocation::Success);
        stats.record(Duration::from_millis(30), Invocation::Failure("oops".to_string()));
        stats.record(Duration::from_millis(5), Invocation::Aborted);

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                invocations: 3,
                successes: 1,
                failures: 1,
                aborted: 1,
                total_duration_ms: 45,
                max_duration_ms: 30,
                last_error: Some("oops".to_string()),
            }
        );
        assert_eq!(snapshot.avg_duration_ms(), 15.0);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_stats_reply() {
        let stats = RegistrationStats::default();
        stats.record(Duration::from_millis(4), Invocation::Success);

        insta::assert_snapshot!(stats.snapshot().to_reply(), @r###"
         1) "numTriggered"
         2) (integer) 1
         3) "numSuccess"
         4) (integer) 1
         5) "numFailures"
         6) (integer) 0
         7) "numAborted"
         8) (integer) 0
         9) "totalRunDurationMS"
        10) (integer) 4
        11) "maxRunDurationMS"
        12) (integer) 4
        13) "avgRunDurationMS"
        14) (double) 4
        15) "lastError"
        16) (nil)
        "###);
    }
}
