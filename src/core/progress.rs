//! Progress normalization for transfer engines

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default minimum spacing between forwarded non-terminal events
pub const DEFAULT_PROGRESS_THROTTLE: Duration = Duration::from_secs(1);

/// Caller-supplied observer for progress events
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) -> anyhow::Result<()> + Send + Sync>;

/// Transfer status carried by a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Downloading,
    Finished,
    Error,
}

impl ProgressStatus {
    /// Terminal events bypass the throttle
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Finished | ProgressStatus::Error)
    }
}

/// Stable progress record delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    /// Always within `0.0..=100.0`
    pub percentage: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: u64,
    pub eta_secs: Option<u64>,
    pub filename: String,
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Normalize a raw engine callback.
    ///
    /// Numeric fields that fail coercion count as zero. Statuses other than
    /// downloading, finished and error are ignored.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let status = match raw.get("status").and_then(Value::as_str)? {
            "downloading" => ProgressStatus::Downloading,
            "finished" => ProgressStatus::Finished,
            "error" => ProgressStatus::Error,
            _ => return None,
        };

        let mut downloaded = coerce_number(raw.get("downloaded_bytes"));
        let mut total = coerce_number(raw.get("total_bytes"));
        if total <= 0.0 {
            total = coerce_number(raw.get("total_bytes_estimate"));
        }
        let speed = coerce_number(raw.get("speed"));
        let eta = coerce_number(raw.get("eta"));

        let percentage = match status {
            ProgressStatus::Finished => {
                downloaded = downloaded.max(total);
                total = total.max(downloaded);
                100.0
            }
            _ => compute_percentage(downloaded, total),
        };

        let filename = match raw.get("filename") {
            Some(Value::String(name)) => name.clone(),
            _ => String::new(),
        };

        let message = raw.get("error").map(|e| match e {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });

        Some(Self {
            status,
            percentage,
            downloaded_bytes: downloaded as u64,
            total_bytes: total as u64,
            speed_bytes_per_sec: speed as u64,
            eta_secs: (eta > 0.0).then_some(eta as u64),
            filename,
            message,
        })
    }

    /// Get human-readable speed string
    pub fn speed_string(&self) -> String {
        format_speed(self.speed_bytes_per_sec)
    }
}

/// Percentage of `downloaded` over `total`, clamped to `[0, 100]`; 0 when total is unknown
pub fn compute_percentage(downloaded: f64, total: f64) -> f64 {
    if total > 0.0 && downloaded.is_finite() && total.is_finite() {
        (downloaded / total * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Best-effort numeric coercion; anything unusable becomes zero
fn coerce_number(value: Option<&Value>) -> f64 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if number.is_finite() && number > 0.0 {
        number
    } else {
        0.0
    }
}

/// Adapter between a transfer engine and a caller-supplied observer.
///
/// Forwards at most one non-terminal event per throttle window and never
/// lets an observer failure (error or panic) reach the transfer.
pub struct ProgressHook {
    callback: Option<ProgressCallback>,
    throttle: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressHook {
    /// Create a hook around an optional observer
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            throttle: DEFAULT_PROGRESS_THROTTLE,
            last_emit: Mutex::new(None),
        }
    }

    /// Hook that drops every event
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Set the throttle window
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Whether an observer is attached
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    /// Handle one raw engine callback
    pub fn handle_raw(&self, raw: &Value) {
        if self.callback.is_none() {
            return;
        }
        if let Some(event) = ProgressEvent::from_raw(raw) {
            self.emit(event);
        }
    }

    /// Forward an already normalized event, subject to the throttle
    pub fn emit(&self, event: ProgressEvent) {
        if self.callback.is_none() {
            return;
        }

        {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            let due = last.map_or(true, |at| at.elapsed() >= self.throttle);
            if !due && !event.status.is_terminal() {
                return;
            }
            *last = Some(Instant::now());
        }

        self.deliver(&event);
    }

    fn deliver(&self, event: &ProgressEvent) {
        let Some(callback) = &self.callback else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Progress observer failed (ignored): {}", e),
            Err(_) => debug!("Progress observer panicked (ignored)"),
        }
    }
}

impl Default for ProgressHook {
    fn default() -> Self {
        Self::silent()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exp = (bytes_f64.ln() / THRESHOLD.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);

    let value = bytes_f64 / THRESHOLD.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.1} {}", value, UNITS[exp])
    }
}

/// Format bytes per second as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    if total_seconds < 60 {
        format!("{}s", total_seconds)
    } else if total_seconds < 3600 {
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        if seconds == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}m {}s", minutes, seconds)
        }
    } else {
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        if minutes == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_hook(throttle: Duration) -> (ProgressHook, Arc<Mutex<Vec<ProgressEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |event: &ProgressEvent| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        (ProgressHook::new(Some(callback)).with_throttle(throttle), seen)
    }

    #[test]
    fn test_from_raw_downloading() {
        let event = ProgressEvent::from_raw(&json!({
            "status": "downloading",
            "downloaded_bytes": 512,
            "total_bytes": 1024,
            "speed": 256.5,
            "eta": 2,
            "filename": "ep.mp4"
        }))
        .unwrap();

        assert_eq!(event.status, ProgressStatus::Downloading);
        assert_eq!(event.percentage, 50.0);
        assert_eq!(event.downloaded_bytes, 512);
        assert_eq!(event.total_bytes, 1024);
        assert_eq!(event.speed_bytes_per_sec, 256);
        assert_eq!(event.eta_secs, Some(2));
        assert_eq!(event.filename, "ep.mp4");
    }

    #[test]
    fn test_from_raw_coerces_garbage_to_zero() {
        let event = ProgressEvent::from_raw(&json!({
            "status": "downloading",
            "downloaded_bytes": "lots",
            "total_bytes": null,
            "total_bytes_estimate": "2048",
            "speed": {"nested": true},
            "filename": 42
        }))
        .unwrap();

        assert_eq!(event.downloaded_bytes, 0);
        assert_eq!(event.total_bytes, 2048);
        assert_eq!(event.speed_bytes_per_sec, 0);
        assert_eq!(event.percentage, 0.0);
        assert_eq!(event.filename, "");
    }

    #[test]
    fn test_percentage_is_clamped() {
        let over = ProgressEvent::from_raw(&json!({
            "status": "downloading",
            "downloaded_bytes": 5000,
            "total_bytes": 1000
        }))
        .unwrap();
        assert_eq!(over.percentage, 100.0);

        let negative = ProgressEvent::from_raw(&json!({
            "status": "downloading",
            "downloaded_bytes": -20,
            "total_bytes": 1000
        }))
        .unwrap();
        assert_eq!(negative.percentage, 0.0);

        for (d, t) in [(0.0, 0.0), (1.0, -1.0), (f64::NAN, 10.0), (3.0, 7.0)] {
            let p = compute_percentage(d, t);
            assert!((0.0..=100.0).contains(&p));
        }
    }

    #[test]
    fn test_finished_is_always_one_hundred_percent() {
        let event = ProgressEvent::from_raw(&json!({"status": "finished", "filename": "x.mp4"})).unwrap();
        assert_eq!(event.status, ProgressStatus::Finished);
        assert_eq!(event.percentage, 100.0);

        let event = ProgressEvent::from_raw(&json!({
            "status": "finished",
            "downloaded_bytes": 10,
            "total_bytes": 40
        }))
        .unwrap();
        assert_eq!(event.percentage, 100.0);
        assert_eq!(event.downloaded_bytes, 40);
    }

    #[test]
    fn test_unknown_status_ignored() {
        assert!(ProgressEvent::from_raw(&json!({"status": "started"})).is_none());
        assert!(ProgressEvent::from_raw(&json!({"downloaded_bytes": 1})).is_none());
    }

    #[test]
    fn test_throttle_drops_intermediate_but_keeps_terminal() {
        let (hook, seen) = recording_hook(Duration::from_secs(3600));

        for i in 0..10 {
            hook.handle_raw(&json!({"status": "downloading", "downloaded_bytes": i, "total_bytes": 10}));
        }
        hook.handle_raw(&json!({"status": "finished"}));
        hook.handle_raw(&json!({"status": "error", "error": "boom"}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].status, ProgressStatus::Downloading);
        assert_eq!(seen[1].status, ProgressStatus::Finished);
        assert_eq!(seen[2].status, ProgressStatus::Error);
        assert_eq!(seen[2].message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_zero_throttle_forwards_everything() {
        let (hook, seen) = recording_hook(Duration::ZERO);
        for i in 0..5 {
            hook.handle_raw(&json!({"status": "downloading", "downloaded_bytes": i}));
        }
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_observer_errors_and_panics_are_swallowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: ProgressCallback = Arc::new(move |event: &ProgressEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            if event.status == ProgressStatus::Finished {
                panic!("observer exploded");
            }
            anyhow::bail!("observer refused")
        });
        let hook = ProgressHook::new(Some(callback)).with_throttle(Duration::ZERO);

        hook.handle_raw(&json!({"status": "downloading"}));
        hook.handle_raw(&json!({"status": "finished"}));
        hook.handle_raw(&json!({"status": "downloading"}));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_silent_hook() {
        let hook = ProgressHook::silent();
        assert!(!hook.is_active());
        hook.handle_raw(&json!({"status": "finished"}));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
        assert_eq!(format_speed(2048), "2.0 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(3660)), "1h 1m");
    }
}
