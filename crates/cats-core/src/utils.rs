//! Small leaf utilities: big-endian uint helpers and the `Delay` rate
//! limiter. Both are read directly off the reference implementation's
//! `cats/v2/utils.py`; the `Delay` arithmetic (the `+0.01` fudge factor and
//! the no-sleep-on-first-call rule) is intentionally not "cleaned up" since
//! it is load-bearing for the throughput tests in §8 of the protocol docs.

use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::time::Instant;

/// Encode `value` as a big-endian unsigned integer in exactly `len` bytes.
///
/// # Panics
/// Panics if `value` does not fit in `len` bytes.
pub fn to_uint(value: u64, len: usize) -> Vec<u8> {
    let full = value.to_be_bytes();
    assert!(len <= 8, "to_uint supports at most 8 bytes");
    let start = 8 - len;
    assert!(
        full[..start].iter().all(|&b| b == 0),
        "value {value} does not fit in {len} bytes"
    );
    full[start..].to_vec()
}

/// Decode a big-endian unsigned integer from a byte slice of any length up
/// to 8 bytes.
pub fn from_uint(data: &[u8]) -> u64 {
    assert!(data.len() <= 8, "from_uint supports at most 8 bytes");
    let mut buf = [0u8; 8];
    buf[8 - data.len()..].copy_from_slice(data);
    u64::from_be_bytes(buf)
}

/// Surplus-based pacing: `speed` bytes/second, or 0 to disable pacing
/// entirely.
///
/// Mirrors `cats.v2.utils.Delay`: the first call after construction never
/// sleeps — it only seeds the running totals — and every later call folds
/// in a fixed `+0.01` second allowance for scheduler jitter before
/// converting the carried-over surplus into a sleep duration.
pub struct Delay {
    speed: u64,
    start: Instant,
    sent: f64,
    primed: bool,
}

impl Delay {
    pub fn new(speed: u64) -> Self {
        Self {
            speed,
            start: Instant::now(),
            sent: 0.0,
            primed: false,
        }
    }

    pub fn speed(&self) -> u64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: u64) {
        self.speed = speed;
    }

    /// Account for `length` more bytes sent, sleeping if the configured
    /// speed has been exceeded since the previous call.
    pub async fn delay(&mut self, length: u64) {
        if self.speed == 0 || length == 0 {
            return;
        }
        let now = Instant::now();
        if !self.primed {
            self.primed = true;
            self.start = now;
            self.sent = length as f64;
            return;
        }
        let seconds_passed = now.duration_since(self.start).as_secs_f64() + 0.01;
        self.start = now;
        self.sent = (length as f64 + self.sent - self.speed as f64 * seconds_passed).max(0.0);
        if self.sent <= 0.0 {
            return;
        }
        tokio::time::sleep(Duration::from_secs_f64(self.sent / self.speed as f64)).await;
    }
}

/// Redact sensitive-looking keys before a headers/payload map is written to
/// a debug log line, matching the reference implementation's `filter_json`.
pub fn redact_for_log(value: &Value) -> Value {
    let pattern = Regex::new(r"(?i)(password|secret|token|jwt|pwd|key|auth)").unwrap();
    redact_inner(value, &pattern)
}

fn redact_inner(value: &Value, pattern: &Regex) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if pattern.is_match(k) {
                    out.insert(k.clone(), Value::String("***".to_string()));
                } else {
                    out.insert(k.clone(), redact_inner(v, pattern));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_inner(v, pattern)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_uint_round_trips() {
        assert_eq!(to_uint(0x1234, 2), vec![0x12, 0x34]);
        assert_eq!(from_uint(&to_uint(0x1234, 2)), 0x1234);
        assert_eq!(to_uint(0, 4), vec![0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn to_uint_panics_on_overflow() {
        to_uint(0x1_0000, 2);
    }

    #[tokio::test]
    async fn delay_first_call_never_sleeps() {
        let mut delay = Delay::new(1024);
        let start = Instant::now();
        delay.delay(4096).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn delay_zero_speed_never_sleeps() {
        let mut delay = Delay::new(0);
        let start = Instant::now();
        delay.delay(4096).await;
        delay.delay(4096).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn redact_masks_sensitive_keys() {
        let value = serde_json::json!({"password": "hunter2", "name": "adam"});
        let redacted = redact_for_log(&value);
        assert_eq!(redacted["password"], "***");
        assert_eq!(redacted["name"], "adam");
    }
}
