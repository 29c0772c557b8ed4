// src/clock.rs
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of "now". The engine's pure components take an explicit instant,
/// so this seam only matters at the trigger surface (HTTP handlers and the
/// periodic sweep task).
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually controlled clock for tests.
#[derive(Clone)]
pub struct TestClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(datetime_str: &str) -> Self {
        let dt = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Failed to parse datetime string in TestClock::new");
        Self {
            current_time: Arc::new(Mutex::new(dt.and_utc())),
        }
    }

    pub fn set_time(&self, datetime_str: &str) {
        *self.current_time.lock().unwrap() =
            NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
                .expect("Failed to parse datetime string in TestClock::set_time")
                .and_utc();
    }

    pub fn advance(&self, duration: Duration) {
        *self.current_time.lock().unwrap() += duration;
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.current_time.lock().unwrap()
    }
}
