//! Listener task registry (spec §4.G "Task registry"): long-lived handler
//! work (replication sessions) registers here to get a `taskID` and is kept
//! visible for 10 s past completion so `/_active_tasks` can still report it.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::actor::{Timer, TimerWheel};

/// How long a finished task stays visible to status queries.
pub const TASK_RETENTION: Duration = Duration::from_secs(10);

/// A stoppable long-running operation, e.g. a replication session.
pub struct Task {
    pub id: u64,
    pub kind: String,
    time_started: DateTime<Utc>,
    time_updated: Mutex<DateTime<Utc>>,
    finished: AtomicBool,
    stop_requested: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Task {
    pub fn bump(&self) {
        *self.time_updated.lock().unwrap() = Utc::now();
    }

    pub fn finish(&self, error: Option<String>) {
        *self.last_error.lock().unwrap() = error;
        self.bump();
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Requests cooperative cancellation (spec §5 "Cancellation": no forced
    /// cancellation, only a polled stop flag). Idempotent.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
pub struct TaskStatus {
    #[serde(rename = "taskID")]
    pub task_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "timeStarted")]
    pub time_started: DateTime<Utc>,
    #[serde(rename = "timeUpdated")]
    pub time_updated: DateTime<Utc>,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.id,
            kind: self.kind.clone(),
            time_started: self.time_started,
            time_updated: *self.time_updated.lock().unwrap(),
            finished: self.is_finished(),
            error: self.last_error.lock().unwrap().clone(),
        }
    }
}

/// Tracks in-flight and recently-finished tasks. Finished tasks are evicted
/// [`TASK_RETENTION`] after they finish, driven off the shared timer wheel.
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, Arc<Task>>>,
    timers: Arc<TimerWheel>,
}

impl TaskRegistry {
    pub fn new(timers: Arc<TimerWheel>) -> Arc<Self> {
        Arc::new(TaskRegistry { next_id: AtomicU64::new(1), tasks: Mutex::new(HashMap::new()), timers })
    }

    pub fn register(self: &Arc<Self>, kind: impl Into<String>) -> Arc<Task> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let task = Arc::new(Task {
            id,
            kind: kind.into(),
            time_started: now,
            time_updated: Mutex::new(now),
            finished: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            last_error: Mutex::new(None),
        });
        self.tasks.lock().unwrap().insert(id, task.clone());
        task
    }

    /// Marks `task` finished and schedules its eviction after the retention window.
    pub fn unregister(self: &Arc<Self>, task: &Arc<Task>, error: Option<String>) {
        task.finish(error);
        let registry = self.clone();
        let id = task.id;
        let timer = Timer::new(self.timers.clone(), move || {
            registry.tasks.lock().unwrap().remove(&id);
        });
        timer.fire_after(TASK_RETENTION);
        timer.auto_delete();
    }

    pub fn all(&self) -> Vec<TaskStatus> {
        let mut statuses: Vec<TaskStatus> = self.tasks.lock().unwrap().values().map(|t| t.status()).collect();
        statuses.sort_by_key(|s| s.task_id);
        statuses
    }

    /// Requests every unfinished task stop; the caller (listener shutdown)
    /// is responsible for waiting for the set to drain.
    pub fn stop_all(&self) {
        for task in self.tasks.lock().unwrap().values() {
            if !task.is_finished() {
                task.stop();
            }
        }
    }

    pub fn unfinished_count(&self) -> usize {
        self.tasks.lock().unwrap().values().filter(|t| !t.is_finished()).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_and_lists_a_task() {
        let timers = TimerWheel::new();
        let registry = TaskRegistry::new(timers);
        let task = registry.register("replicate");
        assert_eq!(registry.all().len(), 1);
        assert!(!task.is_finished());
        registry.unregister(&task, None);
        assert!(task.is_finished());
    }

    #[test]
    fn stop_all_marks_unfinished_tasks_stop_requested() {
        let timers = TimerWheel::new();
        let registry = TaskRegistry::new(timers);
        let task = registry.register("replicate");
        registry.stop_all();
        assert!(task.stop_requested());
    }

    #[test]
    fn unfinished_count_excludes_finished_tasks() {
        let timers = TimerWheel::new();
        let registry = TaskRegistry::new(timers);
        let t1 = registry.register("a");
        let _t2 = registry.register("b");
        registry.unregister(&t1, None);
        assert_eq!(registry.unfinished_count(), 1);
    }
}
