use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

enum TaskKind {
    Once(Box<dyn FnOnce() + Send>),
    Periodic {
        every: Duration,
        run: Box<dyn FnMut() + Send>,
    },
}

struct Task {
    deadline: Instant,
    seq: u64,
    kind: TaskKind,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Earliest deadline first in a max-heap.
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

struct TimerShared {
    queue: Mutex<BinaryHeap<Task>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

/// Single background thread driving deferred work: circuit-breaker window
/// resets and the periodic metric flush. Tasks run on the timer thread; a
/// panicking task is logged and dropped, never unwound into the worker.
pub(crate) struct Timer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.shared.queue.lock().len())
            .finish()
    }
}

impl Timer {
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("sluice-timer".into())
            .spawn(move || run_worker(worker_shared))
            .ok();
        if worker.is_none() {
            tracing::warn!("failed to spawn timer thread; deferred work is disabled");
        }

        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    pub fn schedule_once(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        self.push(Task {
            deadline: Instant::now() + delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            kind: TaskKind::Once(Box::new(f)),
        });
    }

    pub fn schedule_every(&self, every: Duration, f: impl FnMut() + Send + 'static) {
        self.push(Task {
            deadline: Instant::now() + every,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            kind: TaskKind::Periodic {
                every,
                run: Box::new(f),
            },
        });
    }

    fn push(&self, task: Task) {
        self.shared.queue.lock().push(task);
        self.shared.wakeup.notify_one();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wakeup.notify_one();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_worker(shared: Arc<TimerShared>) {
    loop {
        let mut queue = shared.queue.lock();
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let Some(deadline) = queue.peek().map(|t| t.deadline) else {
            shared.wakeup.wait(&mut queue);
            continue;
        };

        if deadline > Instant::now() {
            let _ = shared.wakeup.wait_until(&mut queue, deadline);
            continue;
        }

        let Some(task) = queue.pop() else { continue };
        drop(queue);

        match task.kind {
            TaskKind::Once(f) => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
                    tracing::warn!("timer task panicked");
                }
            }
            TaskKind::Periodic { every, mut run } => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run())).is_err() {
                    tracing::warn!("periodic timer task panicked; descheduled");
                    continue;
                }
                let seq = shared.seq.fetch_add(1, Ordering::Relaxed);
                shared.queue.lock().push(Task {
                    deadline: Instant::now() + every,
                    seq,
                    kind: TaskKind::Periodic { every, run },
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_shot_fires_after_the_delay() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        timer.schedule_once(Duration::from_millis(30), move || {
            flag.store(true, Ordering::Release);
        });

        std::thread::sleep(Duration::from_millis(10));
        assert!(!fired.load(Ordering::Acquire));
        std::thread::sleep(Duration::from_millis(60));
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn periodic_task_repeats() {
        let timer = Timer::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        timer.schedule_every(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        std::thread::sleep(Duration::from_millis(80));
        assert!(count.load(Ordering::Relaxed) >= 3);
    }

    #[test]
    fn earlier_deadlines_run_first() {
        let timer = Timer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, tag) in [(50u64, "late"), (10, "early")] {
            let order = Arc::clone(&order);
            timer.schedule_once(Duration::from_millis(delay), move || {
                order.lock().push(tag);
            });
        }

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*order.lock(), vec!["early", "late"]);
    }

    #[test]
    fn drop_stops_the_worker() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        timer.schedule_once(Duration::from_millis(50), move || {
            flag.store(true, Ordering::Release);
        });

        drop(timer);
        std::thread::sleep(Duration::from_millis(80));
        assert!(!fired.load(Ordering::Acquire), "task must not outlive the timer");
    }
}
