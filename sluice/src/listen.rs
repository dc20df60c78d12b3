use std::sync::Arc;

use parking_lot::RwLock;

/// Callbacks notified with the freshly activated rule set after every
/// successful load. Listener panics are isolated from the loader.
pub(crate) struct ListenerSet<R> {
    listeners: RwLock<Vec<Arc<dyn Fn(&[R]) + Send + Sync>>>,
}

impl<R> Default for ListenerSet<R> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<R> std::fmt::Debug for ListenerSet<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("count", &self.listeners.read().len())
            .finish()
    }
}

impl<R> ListenerSet<R> {
    pub fn subscribe(&self, listener: impl Fn(&[R]) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn notify(&self, rules: &[R]) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(rules))).is_err()
            {
                tracing::warn!("rule-change listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_listener_sees_the_new_set() {
        let set: ListenerSet<u32> = ListenerSet::default();
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            set.subscribe(move |rules| {
                seen.fetch_add(rules.len(), Ordering::Relaxed);
            });
        }

        set.notify(&[1, 2, 3]);
        assert_eq!(seen.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let set: ListenerSet<u32> = ListenerSet::default();
        let seen = Arc::new(AtomicUsize::new(0));

        set.subscribe(|_| panic!("bad listener"));
        let counter = Arc::clone(&seen);
        set.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        set.notify(&[7]);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
