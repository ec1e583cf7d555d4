use crate::core::store::{InsertOrder, TaskStore};
use crate::core::task::{Task, TaskId};

use super::ChangeEvent;

/// Folds the bulk load, local mutation results and change feed events into
/// one task store.
///
/// Every operation is keyed by task id and idempotent, so a local success
/// and its feed echo converge whichever arrives first.
#[derive(Debug, Default)]
pub struct Reconciler {
    store: TaskStore,
    insert_order: InsertOrder,
}

impl Reconciler {
    pub fn new(insert_order: InsertOrder) -> Self {
        Self {
            store: TaskStore::new(),
            insert_order,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.snapshot()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Replace the store with a freshly loaded listing.
    pub fn load_initial(&mut self, tasks: Vec<Task>) {
        let loaded = tasks.len();
        self.store.replace_all(tasks);
        if self.store.len() != loaded {
            log::warn!(
                "Bulk load contained duplicate ids: {} rows, {} kept",
                loaded,
                self.store.len()
            );
        }
        log::info!("Loaded {} tasks", self.store.len());
    }

    pub fn apply_insert(&mut self, task: Task) {
        let id = task.id.clone();
        if self.store.insert(task, self.insert_order) {
            log::debug!("Inserted task {}", id);
        } else {
            log::debug!("Task {} already present, replaced in place", id);
        }
    }

    pub fn apply_update(&mut self, task: Task) {
        let id = task.id.clone();
        if self.store.update(task) {
            log::debug!("Updated task {}", id);
        } else {
            log::debug!("Ignoring update for unknown task {}", id);
        }
    }

    pub fn apply_delete(&mut self, task: Task) {
        match self.store.remove(&task.id) {
            Some(removed) => log::debug!("Deleted task {} ({})", removed.id, removed.title),
            None => log::debug!("Ignoring delete for unknown task {}", task.id),
        }
    }

    pub fn apply(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Insert(task) => self.apply_insert(task),
            ChangeEvent::Update(task) => self.apply_update(task),
            ChangeEvent::Delete(task) => self.apply_delete(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn task(id: i64, title: &str, minute: u32) -> Task {
        let mut t = Task::key_only(TaskId::from(id));
        t.title = title.to_string();
        t.user_id = Some("user-1".to_string());
        t.created_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 8, minute, 0).unwrap());
        t
    }

    fn titles(r: &Reconciler) -> Vec<&str> {
        r.tasks().iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn load_then_nothing_reproduces_listing() {
        let listing = vec![task(1, "A", 0), task(2, "B", 1), task(3, "C", 2)];
        let mut r = Reconciler::default();
        r.load_initial(listing.clone());
        assert_eq!(r.tasks(), listing.as_slice());
    }

    #[test]
    fn feed_scenario_insert_update_delete() {
        let mut r = Reconciler::default();
        r.load_initial(vec![task(1, "A", 0)]);

        r.apply(ChangeEvent::Insert(task(2, "B", 1)));
        assert_eq!(titles(&r), vec!["A", "B"]);

        r.apply(ChangeEvent::Update(task(1, "A2", 0)));
        assert_eq!(titles(&r), vec!["A2", "B"]);

        r.apply(ChangeEvent::Delete(Task::key_only(TaskId::from(2))));
        assert_eq!(titles(&r), vec!["A2"]);
    }

    #[test]
    fn optimistic_insert_then_feed_echo_keeps_one_entry() {
        let mut r = Reconciler::default();
        r.load_initial(vec![task(1, "A", 0)]);

        let created = task(3, "C", 5);
        r.apply_insert(created.clone());
        r.apply(ChangeEvent::Insert(created));

        let count = r.tasks().iter().filter(|t| t.id == TaskId::from(3)).count();
        assert_eq!(count, 1);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn duplicate_insert_matches_single_insert() {
        let mut once = Reconciler::default();
        once.apply_insert(task(1, "A", 0));

        let mut twice = Reconciler::default();
        twice.apply_insert(task(1, "A", 0));
        twice.apply_insert(task(1, "A", 0));

        assert_eq!(once.tasks(), twice.tasks());
    }

    #[test]
    fn update_of_unknown_id_changes_nothing() {
        let mut r = Reconciler::default();
        r.load_initial(vec![task(1, "A", 0)]);
        let before = r.tasks().to_vec();
        r.apply_update(task(2, "B", 1));
        assert_eq!(r.tasks(), before.as_slice());
    }

    #[test]
    fn delete_of_unknown_id_changes_nothing() {
        let mut r = Reconciler::default();
        r.load_initial(vec![task(1, "A", 0)]);
        let before = r.tasks().to_vec();
        r.apply_delete(Task::key_only(TaskId::from(2)));
        assert_eq!(r.tasks(), before.as_slice());
    }

    #[test]
    fn update_after_delete_is_ignored() {
        let mut r = Reconciler::default();
        r.load_initial(vec![task(1, "A", 0)]);
        r.apply_delete(Task::key_only(TaskId::from(1)));
        r.apply_update(task(1, "late", 0));
        assert!(r.is_empty());
    }

    #[test]
    fn sorted_policy_orders_feed_inserts() {
        let mut r = Reconciler::new(InsertOrder::ByCreatedAt);
        r.load_initial(vec![task(1, "A", 0), task(3, "C", 20)]);
        r.apply(ChangeEvent::Insert(task(2, "B", 10)));
        assert_eq!(titles(&r), vec!["A", "B", "C"]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(i64, u32),
        Update(i64, u32),
        Delete(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i64..5, 0u32..60).prop_map(|(id, m)| Op::Insert(id, m)),
            (0i64..5, 0u32..60).prop_map(|(id, m)| Op::Update(id, m)),
            (0i64..5).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn ids_stay_unique(ops in prop::collection::vec(op(), 0..64), sorted in any::<bool>()) {
            let order = if sorted { InsertOrder::ByCreatedAt } else { InsertOrder::Append };
            let mut r = Reconciler::new(order);
            for op in ops {
                match op {
                    Op::Insert(id, m) => r.apply_insert(task(id, "x", m)),
                    Op::Update(id, m) => r.apply_update(task(id, "y", m)),
                    Op::Delete(id) => r.apply_delete(Task::key_only(TaskId::from(id))),
                }
                let mut ids: Vec<&TaskId> = r.tasks().iter().map(|t| &t.id).collect();
                let total = ids.len();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);
            }
        }

        #[test]
        fn replaying_an_insert_is_idempotent(ops in prop::collection::vec(op(), 0..32), id in 0i64..5) {
            let mut r = Reconciler::default();
            for op in ops {
                match op {
                    Op::Insert(id, m) => r.apply_insert(task(id, "x", m)),
                    Op::Update(id, m) => r.apply_update(task(id, "y", m)),
                    Op::Delete(id) => r.apply_delete(Task::key_only(TaskId::from(id))),
                }
            }
            r.apply_insert(task(id, "echo", 30));
            let after_first = r.tasks().to_vec();
            r.apply_insert(task(id, "echo", 30));
            prop_assert_eq!(r.tasks(), after_first.as_slice());
        }
    }
}
