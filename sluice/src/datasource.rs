//! External rule feeds: a converter contract plus a polled-file source that
//! pushes fresh rule sets into a rule sink. IO and parse failures keep the
//! active rule set and are only logged.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;

use crate::error::RuleError;

pub type ConvertError = Box<dyn std::error::Error + Send + Sync>;

/// Decodes a raw rule payload into a typed rule list.
pub trait Converter<T>: Send + Sync {
    fn convert(&self, raw: &str) -> Result<Vec<T>, ConvertError>;
}

/// JSON array payloads, the default wire shape for rule files.
pub struct JsonArrayConverter<T>(PhantomData<fn() -> T>);

impl<T> Default for JsonArrayConverter<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: DeserializeOwned> Converter<T> for JsonArrayConverter<T> {
    fn convert(&self, raw: &str) -> Result<Vec<T>, ConvertError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Where converted rules land, typically a rule manager's `load_rules`.
pub trait RuleSink<T>: Send + Sync {
    fn load(&self, rules: Vec<T>) -> Result<(), RuleError>;
}

impl<T, F> RuleSink<T> for F
where
    F: Fn(Vec<T>) -> Result<(), RuleError> + Send + Sync,
{
    fn load(&self, rules: Vec<T>) -> Result<(), RuleError> {
        self(rules)
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    fn wait_for(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        let _ = self.wakeup.wait_for(&mut stopped, timeout);
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wakeup.notify_all();
    }
}

/// Polls a rule file on a private worker thread and feeds every observed
/// change through a converter into a sink. The worker stops when the source
/// is dropped.
pub struct FileRuleSource {
    signal: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FileRuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRuleSource").finish()
    }
}

impl FileRuleSource {
    pub fn spawn<T, C, S>(
        path: impl Into<PathBuf>,
        poll_interval: Duration,
        converter: C,
        sink: S,
    ) -> Self
    where
        T: Send + 'static,
        C: Converter<T> + 'static,
        S: RuleSink<T> + 'static,
    {
        let path = path.into();
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });

        let worker_signal = Arc::clone(&signal);
        let worker = std::thread::Builder::new()
            .name("sluice-rule-source".into())
            .spawn(move || {
                let mut last_seen: Option<(SystemTime, u64)> = None;
                loop {
                    refresh(&path, &converter, &sink, &mut last_seen);
                    if worker_signal.wait_for(poll_interval) {
                        return;
                    }
                }
            })
            .ok();
        if worker.is_none() {
            tracing::warn!("failed to spawn rule source worker");
        }

        Self { signal, worker }
    }
}

impl Drop for FileRuleSource {
    fn drop(&mut self) {
        self.signal.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn refresh<T>(
    path: &PathBuf,
    converter: &dyn Converter<T>,
    sink: &dyn RuleSink<T>,
    last_seen: &mut Option<(SystemTime, u64)>,
) {
    // A missing file is not an event; the active rule set stays.
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    let stamp = (
        meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        meta.len(),
    );
    if *last_seen == Some(stamp) {
        return;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "rule file unreadable");
            return;
        }
    };

    match converter.convert(&raw) {
        Ok(rules) => {
            *last_seen = Some(stamp);
            if let Err(err) = sink.load(rules) {
                tracing::warn!(path = %path.display(), %err, "rule sink rejected the set");
            } else {
                tracing::debug!(path = %path.display(), "rules refreshed from file");
            }
        }
        Err(err) => {
            // Keep polling; a later write may fix the payload.
            *last_seen = Some(stamp);
            tracing::warn!(path = %path.display(), %err, "rule file unparsable");
        }
    }
}
