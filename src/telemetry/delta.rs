//! SignalK delta feed
//!
//! Reads delta documents, one JSON object per line, and republishes the values
//! of the own vessel on a [`LocalBus`]:
//!
//! ```json
//! {"context":"vessels.self","updates":[{"timestamp":"2024-05-01T10:00:00Z",
//!   "values":[{"path":"electrical.batteries.1.voltage","value":12.6}]}]}
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LocalBus, PathValue};

#[derive(Debug, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub updates: Vec<Update>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub values: Vec<DeltaValue>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaValue {
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl Delta {
    /// Whether the delta describes the own vessel
    ///
    /// Deltas without a context are implicitly about the own vessel.
    pub fn is_self(&self, self_id: Option<&str>) -> bool {
        match self.context.as_deref() {
            None | Some("vessels.self") => true,
            Some(context) => match (context.strip_prefix("vessels."), self_id) {
                (Some(vessel), Some(id)) => vessel == id,
                _ => false,
            },
        }
    }

    pub fn into_values(self) -> impl Iterator<Item = PathValue> {
        self.updates.into_iter().flat_map(|update| {
            let timestamp = update.timestamp;
            update.values.into_iter().map(move |v| PathValue {
                path: v.path,
                value: v.value,
                timestamp,
            })
        })
    }
}

/// Pumps deltas from `reader` into `bus` until EOF or cancellation
///
/// Returns the number of values published.
pub async fn feed_from_reader<R>(
    reader: R,
    bus: Arc<LocalBus>,
    self_id: Option<String>,
    cancel: CancellationToken,
) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Delta feed cancelled");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Delta feed reached end of input");
                break;
            }
            Err(e) => {
                warn!("Failed to read delta line: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let delta: Delta = match serde_json::from_str(trimmed) {
            Ok(delta) => delta,
            Err(e) => {
                warn!("Skipping unparseable delta: {}", e);
                continue;
            }
        };

        if !delta.is_self(self_id.as_deref()) {
            debug!("Ignoring delta for context {:?}", delta.context);
            continue;
        }

        for value in delta.into_values() {
            bus.publish(value);
            published += 1;
        }
    }

    published
}
