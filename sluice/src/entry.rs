use std::sync::Arc;
use std::time::Duration;

use crate::node::{ClusterNode, DefaultNode, StatisticNode};
use crate::param::ParamValue;
use crate::resource::Resource;
use crate::runtime::Sluice;

/// One live resource acquisition.
///
/// Exits release in reverse order of entry within a thread. Dropping an
/// entry without calling [`Entry::exit`] is reported as misuse and then
/// unwound best-effort so the statistics stay balanced.
#[derive(Debug)]
pub struct Entry {
    pub(crate) id: u64,
    pub(crate) runtime: Sluice,
    pub(crate) resource: Resource,
    pub(crate) node: Arc<DefaultNode>,
    pub(crate) origin_node: Option<Arc<StatisticNode>>,
    pub(crate) cluster: Option<Arc<ClusterNode>>,
    pub(crate) created_ms: u64,
    pub(crate) batch: u32,
    pub(crate) args: Vec<ParamValue>,
    pub(crate) thread_counted: bool,
    pub(crate) param_thread_counted: bool,
    pub(crate) wait: Option<Duration>,
    /// Detached entries never touch the thread-local entry stack and may be
    /// exited from any thread.
    pub(crate) detached: bool,
    pub(crate) error: Option<String>,
    pub(crate) exited: bool,
}

impl Entry {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// How long this acquisition was delayed while borrowing future
    /// capacity; `None` for plain admissions.
    pub fn wait_duration(&self) -> Option<Duration> {
        self.wait
    }

    /// Marks the guarded invocation as failed; the exception counters are
    /// incremented when the entry exits.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Completes the acquisition: records response time, releases the thread
    /// count and unwinds the pipeline.
    pub fn exit(mut self) {
        self.complete();
    }

    fn complete(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        self.runtime.clone().exit_entry(self);
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if !self.exited {
            tracing::warn!(
                resource = %self.resource,
                "entry dropped without exit; unwinding"
            );
            self.complete();
        }
    }
}
