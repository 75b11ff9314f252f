use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::error::{RelayError, Result};

/// Installs the global tracing subscriber. `RUST_LOG` takes precedence over
/// the configured filter.
pub fn init_tracing(cfg: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_filter))
        .map_err(|err| RelayError::Config(format!("invalid log filter: {err}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cfg.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    installed.map_err(|err| RelayError::Config(format!("tracing already initialized: {err}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: String,
    pub timestamp: SystemTime,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub context: String,
    pub error: String,
}

const DEFAULT_CAPACITY: usize = 1024;

/// Bounded in-memory log of relay events; the oldest entries are dropped
/// once `capacity` is reached.
#[derive(Clone)]
pub struct TelemetryCollector {
    capacity: usize,
    events: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    failures: Arc<Mutex<VecDeque<FailureRecord>>>,
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

fn push_bounded<T>(queue: &Mutex<VecDeque<T>>, capacity: usize, item: T) {
    if let Ok(mut queue) = queue.lock() {
        if queue.len() == capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }
}

fn take_all<T>(queue: &Mutex<VecDeque<T>>) -> Vec<T> {
    queue
        .lock()
        .map(|mut guard| std::mem::take(&mut *guard).into())
        .unwrap_or_default()
}

impl TelemetryCollector {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Arc::new(Mutex::new(VecDeque::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn record(&self, kind: impl Into<String>, detail: serde_json::Value) {
        let event = TelemetryEvent {
            kind: kind.into(),
            timestamp: SystemTime::now(),
            detail,
        };
        push_bounded(&self.events, self.capacity, event);
    }

    pub fn record_failure(&self, context: impl Into<String>, error: impl Into<String>) {
        let failure = FailureRecord {
            context: context.into(),
            error: error.into(),
        };
        push_bounded(&self.failures, self.capacity, failure);
    }

    pub fn drain(&self) -> (Vec<TelemetryEvent>, Vec<FailureRecord>) {
        (take_all(&self.events), take_all(&self.failures))
    }
}
