use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window restart budget shared by a pipeline and its supervisor.
///
/// A restart is granted iff fewer than `max_restarts` restarts were recorded
/// within the trailing `restart_timeout` window.
#[derive(Debug)]
pub(crate) struct RestartCounter {
    max_restarts: usize,
    restart_timeout: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RestartCounter {
    pub(crate) fn new(max_restarts: usize, restart_timeout: Duration) -> Self {
        RestartCounter {
            max_restarts,
            restart_timeout,
            timestamps: Mutex::new(VecDeque::with_capacity(max_restarts)),
        }
    }

    /// Records a restart attempt and reports whether it is within budget.
    pub(crate) fn restart(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap();
        while let Some(first) = timestamps.front() {
            if now.duration_since(*first) > self.restart_timeout {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() < self.max_restarts {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.timestamps.lock().unwrap().len()
    }
}
