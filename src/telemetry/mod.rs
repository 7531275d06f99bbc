//! Telemetry bus abstraction
//!
//! The bridge only ever asks the bus for a live sequence of values at one path.
//! [`LocalBus`] is the in-process implementation used by the binary (fed from
//! SignalK deltas, see [`delta`]) and by tests.

pub mod delta;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of each per-path broadcast channel
const PATH_CHANNEL_CAPACITY: usize = 64;

/// A single value observed at a telemetry path
#[derive(Debug, Clone, PartialEq)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PathValue {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            timestamp: None,
        }
    }

    /// Renders the value the way it is concatenated into a display command
    pub fn formatted(&self) -> String {
        format_value(&self.value)
    }
}

/// Source of live per-path value sequences
pub trait TelemetryBus: Send + Sync {
    fn subscribe(&self, path: &str) -> broadcast::Receiver<PathValue>;
}

/// In-memory bus with one broadcast channel per path
#[derive(Debug, Default)]
pub struct LocalBus {
    paths: RwLock<HashMap<String, broadcast::Sender<PathValue>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, path: &str) -> broadcast::Sender<PathValue> {
        if let Some(sender) = self.paths.read().get(path) {
            return sender.clone();
        }
        self.paths
            .write()
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(PATH_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes a value and returns how many subscribers saw it
    pub fn publish(&self, value: PathValue) -> usize {
        let sender = self.sender_for(&value.path);
        match sender.send(value) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(value)) => {
                trace!("No subscribers for {}", value.path);
                0
            }
        }
    }
}

impl TelemetryBus for LocalBus {
    fn subscribe(&self, path: &str) -> broadcast::Receiver<PathValue> {
        self.sender_for(path).subscribe()
    }
}

/// Stringifies a telemetry value for `keyword=value` concatenation
///
/// Numbers print like script string concatenation (see [`format_number`]),
/// strings are written without quotes, compound values as compact JSON.
/// Nothing is escaped.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Shortest round-trip form, plain decimal for `1e-6 <= |x| < 1e21`
///
/// Integral values carry no fraction (`12.0` becomes `12`). Outside the plain
/// range the exponent is always signed: `1e+21`, `1e-7`.
pub fn format_number(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    if !f.is_finite() {
        return if f.is_nan() {
            "NaN".to_string()
        } else if f > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }

    let magnitude = f.abs();
    if (1e-6..1e21).contains(&magnitude) {
        // f64 Display never switches to an exponent
        return format!("{}", f);
    }

    let exponential = format!("{:e}", f);
    match exponential.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => exponential,
    }
}
