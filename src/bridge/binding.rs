//! Display nodes and their path bindings, as used by a running session

use std::time::Duration;
use tracing::warn;

use crate::config::{NodeConfig, PathConfig};

/// Binds one telemetry path to one keyword on a display node
#[derive(Debug, Clone, PartialEq)]
pub struct PathBinding {
    pub node_name: String,
    pub path: String,
    pub keyword: String,
    /// Minimum time between two updates sent for this path
    pub interval: Duration,
}

impl PathBinding {
    pub fn from_config(node_name: &str, config: &PathConfig) -> Self {
        let interval = Duration::try_from_secs_f64(config.interval).unwrap_or_else(|_| {
            warn!(
                "Interval {} for {} is not a valid duration, sending every value",
                config.interval, config.path
            );
            Duration::ZERO
        });

        Self {
            node_name: node_name.to_string(),
            path: config.path.clone(),
            keyword: config.keyword.clone(),
            interval,
        }
    }
}

/// A display node with its page definitions and bindings
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayNode {
    pub name: String,
    pub pages: String,
    pub bindings: Vec<PathBinding>,
}

impl From<&NodeConfig> for DisplayNode {
    fn from(config: &NodeConfig) -> Self {
        Self {
            name: config.nodename.clone(),
            pages: config.pages.clone(),
            bindings: config
                .paths
                .iter()
                .map(|path| PathBinding::from_config(&config.nodename, path))
                .collect(),
        }
    }
}
