use serde::{Deserialize, Serialize};

use super::task::{Task, TaskId};

/// Where an insert lands when its id is not already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOrder {
    /// Append at the end, whatever the timestamp.
    #[default]
    Append,
    /// Keep the list sorted by `created_at`; equal or missing keys go last
    /// among their peers.
    ByCreatedAt,
}

/// In-memory mirror of the remote task collection, in display order.
///
/// Holds at most one task per id. Only the reconciler writes to it.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Replace everything, keeping the given order. Later duplicates of an
    /// id are dropped.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks.clear();
        for task in tasks {
            if self.position(&task.id).is_none() {
                self.tasks.push(task);
            }
        }
    }

    /// Insert a task. An existing entry with the same id is overwritten in
    /// place and keeps its position. Returns true if a new entry was added.
    pub fn insert(&mut self, task: Task, order: InsertOrder) -> bool {
        if let Some(idx) = self.position(&task.id) {
            self.tasks[idx] = task;
            return false;
        }

        match order {
            InsertOrder::Append => self.tasks.push(task),
            InsertOrder::ByCreatedAt => {
                // Option orders None first, so untimestamped rows sit at the
                // front and a None key is placed after them.
                let idx = self
                    .tasks
                    .partition_point(|t| t.created_at <= task.created_at);
                self.tasks.insert(idx, task);
            }
        }
        true
    }

    /// Replace the entry with the same id. Returns false if there is none.
    pub fn update(&mut self, task: Task) -> bool {
        match self.position(&task.id) {
            Some(idx) => {
                self.tasks[idx] = task;
                true
            }
            None => false,
        }
    }

    /// Remove the entry with this id, returning it if present.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let idx = self.position(id)?;
        Some(self.tasks.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn task(id: i64, title: &str, minute: u32) -> Task {
        let mut t = Task::key_only(TaskId::from(id));
        t.title = title.to_string();
        t.created_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap());
        t
    }

    fn titles(store: &TaskStore) -> Vec<&str> {
        store.snapshot().iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn replace_all_keeps_order_and_drops_duplicates() {
        let mut store = TaskStore::new();
        store.replace_all(vec![task(1, "A", 0), task(2, "B", 1), task(1, "A again", 2)]);
        assert_eq!(titles(&store), vec!["A", "B"]);
    }

    #[test]
    fn insert_existing_overwrites_in_place() {
        let mut store = TaskStore::new();
        store.replace_all(vec![task(1, "A", 0), task(2, "B", 1)]);
        assert!(!store.insert(task(1, "A2", 0), InsertOrder::Append));
        assert_eq!(titles(&store), vec!["A2", "B"]);
    }

    #[test]
    fn append_ignores_timestamps() {
        let mut store = TaskStore::new();
        store.replace_all(vec![task(1, "A", 5)]);
        store.insert(task(2, "early", 0), InsertOrder::Append);
        assert_eq!(titles(&store), vec!["A", "early"]);
    }

    #[test]
    fn sorted_insert_places_by_created_at() {
        let mut store = TaskStore::new();
        store.replace_all(vec![task(1, "A", 0), task(3, "C", 10)]);
        store.insert(task(2, "B", 5), InsertOrder::ByCreatedAt);
        store.insert(task(4, "D", 10), InsertOrder::ByCreatedAt);
        assert_eq!(titles(&store), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn update_and_remove_missing_are_noops() {
        let mut store = TaskStore::new();
        store.replace_all(vec![task(1, "A", 0)]);
        assert!(!store.update(task(9, "ghost", 0)));
        assert!(store.remove(&TaskId::from(9)).is_none());
        assert_eq!(titles(&store), vec!["A"]);
    }
}
