//! Per-queue running flags, shared by the container and its pollers
//!
//! All reads and writes go through one lock. Each start of a queue gets a new
//! generation number; a poller keeps running only while the queue is RUNNING
//! under the generation it was started with, so a poller that outlived a timed
//! out stop can never run alongside its replacement.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Lifecycle of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueState::Stopped => "STOPPED",
            QueueState::Running => "RUNNING",
            QueueState::Stopping => "STOPPING",
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: QueueState,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct RunningState {
    queues: Mutex<HashMap<String, Entry>>,
}

impl RunningState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a queue in the STOPPED state (no-op if present)
    pub fn register(&self, name: &str) {
        self.queues.lock().entry(name.to_string()).or_insert(Entry {
            state: QueueState::Stopped,
            generation: 0,
        });
    }

    /// Flip a queue to RUNNING. Returns the new generation, or `None` if it was
    /// already running or is unknown.
    pub fn begin_start(&self, name: &str) -> Option<u64> {
        let mut queues = self.queues.lock();
        let entry = queues.get_mut(name)?;
        if entry.state == QueueState::Running {
            return None;
        }
        entry.state = QueueState::Running;
        entry.generation += 1;
        Some(entry.generation)
    }

    /// Flip a running queue to STOPPING. Returns the generation being stopped.
    pub fn begin_stop(&self, name: &str) -> Option<u64> {
        let mut queues = self.queues.lock();
        let entry = queues.get_mut(name)?;
        if entry.state != QueueState::Running {
            return None;
        }
        entry.state = QueueState::Stopping;
        Some(entry.generation)
    }

    /// Mark a stop complete, unless the queue was restarted meanwhile
    pub fn finish_stop(&self, name: &str, generation: u64) {
        if let Some(entry) = self.queues.lock().get_mut(name) {
            if entry.generation == generation && entry.state == QueueState::Stopping {
                entry.state = QueueState::Stopped;
            }
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state(name) == Some(QueueState::Running)
    }

    /// Whether the poller started with `generation` should keep going
    pub fn is_current(&self, name: &str, generation: u64) -> bool {
        self.queues
            .lock()
            .get(name)
            .map(|e| e.state == QueueState::Running && e.generation == generation)
            .unwrap_or(false)
    }

    pub fn state(&self, name: &str) -> Option<QueueState> {
        self.queues.lock().get(name).map(|e| e.state)
    }

    /// Names of running queues, sorted
    pub fn running_queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .lock()
            .iter()
            .filter(|(_, e)| e.state == QueueState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn any_running(&self) -> bool {
        self.queues
            .lock()
            .values()
            .any(|e| e.state == QueueState::Running)
    }

    /// Drop every entry; used at container teardown
    pub fn clear(&self) {
        self.queues.lock().clear();
    }
}
