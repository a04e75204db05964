//! Pending-task lists and the order in which dispatchers take tasks from them.

use std::collections::VecDeque;
use std::fmt;

use crate::Task;

/// Owns the pending tasks of a [`Dispatcher`][crate::Dispatcher] and decides which one runs
/// next.
///
/// The dispatcher only ever calls these methods while holding its own lock, so
/// implementations need no synchronization of their own.
pub trait TaskSelector: Default + Send + 'static {
    /// Adds a newly admitted task to the pending list.
    fn push(&mut self, task: Task);

    /// Removes and returns the task that should run next, or `None` if nothing is pending.
    fn select_next(&mut self) -> Option<Task>;

    /// The number of pending tasks.
    fn len(&self) -> usize;

    /// Whether no tasks are pending.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First in, first out: the earliest admitted pending task runs next.
#[derive(Default)]
pub struct Fifo {
    tasks: VecDeque<Task>,
}

impl TaskSelector for Fifo {
    fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    fn select_next(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl fmt::Debug for Fifo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fifo")
            .field("pending", &self.tasks.len())
            .finish()
    }
}

/// Last in, first out: the most recently admitted pending task runs next.
#[derive(Default)]
pub struct Lifo {
    tasks: Vec<Task>,
}

impl TaskSelector for Lifo {
    fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    fn select_next(&mut self) -> Option<Task> {
        self.tasks.pop()
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl fmt::Debug for Lifo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifo")
            .field("pending", &self.tasks.len())
            .finish()
    }
}
