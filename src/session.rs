use std::sync::Arc;

use crate::core::store::InsertOrder;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::form::{EditSession, Submitted};
use crate::sync::auth::AuthContext;
use crate::sync::gateway::Gateway;
use crate::sync::realtime::{ChangeFeed, Subscription};
use crate::sync::reconcile::Reconciler;
use crate::sync::{FeedMessage, TableScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Apply successful creates and updates locally right away instead of
    /// waiting for the change feed to echo them.
    pub optimistic: bool,
    pub insert_order: InsertOrder,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            optimistic: true,
            insert_order: InsertOrder::Append,
        }
    }
}

/// One signed-in client: the local task list, the edit form and the live
/// change feed, driven from a single task.
pub struct TaskSession<G: Gateway> {
    gateway: Arc<G>,
    auth: AuthContext,
    options: SessionOptions,
    reconciler: Reconciler,
    form: EditSession,
    feed: Option<Subscription>,
}

impl<G: Gateway> TaskSession<G> {
    pub fn new(gateway: Arc<G>, auth: AuthContext, options: SessionOptions) -> Self {
        Self {
            gateway,
            auth,
            options,
            reconciler: Reconciler::new(options.insert_order),
            form: EditSession::new(),
            feed: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.reconciler.tasks()
    }

    pub fn form(&self) -> &EditSession {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut EditSession {
        &mut self.form
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn is_subscribed(&self) -> bool {
        self.feed.is_some()
    }

    /// Subscribe to the change feed (when given one), then load every task.
    ///
    /// Subscribing first means changes committed while the listing is in
    /// flight queue up and are reconciled right after it.
    pub async fn start<F: ChangeFeed + ?Sized>(
        &mut self,
        feed: Option<&F>,
        scope: &TableScope,
    ) -> Result<()> {
        if let Some(feed) = feed {
            self.feed = Some(feed.subscribe(scope, &self.auth)?);
        }
        self.refresh().await?;
        self.pump();
        Ok(())
    }

    /// Reload the whole list from the backend.
    pub async fn refresh(&mut self) -> Result<()> {
        let tasks = self.gateway.read_all(&self.auth).await?;
        self.reconciler.load_initial(tasks);
        Ok(())
    }

    /// Apply every feed message that is already waiting. Returns how many
    /// were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.feed.as_mut().and_then(|f| f.try_next()) {
            self.handle(message);
            handled += 1;
        }
        handled
    }

    /// Wait for the next feed message and apply it. Returns `None` when there
    /// is no feed or it has ended.
    pub async fn next_event(&mut self) -> Option<FeedMessage> {
        let message = self.feed.as_mut()?.next().await;
        match message {
            Some(message) => {
                self.handle(message.clone());
                Some(message)
            }
            None => {
                log::info!("Change feed ended");
                self.feed = None;
                None
            }
        }
    }

    fn handle(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::Change(event) => self.reconciler.apply(event),
            FeedMessage::Status(status) => log::debug!("Feed status reached session: {}", status),
        }
    }

    /// Start editing the stored task with this id.
    pub fn edit(&mut self, id: &TaskId) -> bool {
        match self.reconciler.get(id) {
            Some(task) => {
                self.form.begin_edit(task);
                true
            }
            None => {
                log::debug!("Cannot edit unknown task {}", id);
                false
            }
        }
    }

    pub fn cancel_edit(&mut self) {
        self.form.cancel();
    }

    /// Submit the form. With optimistic updates on, the result is applied
    /// locally as well as arriving later through the feed.
    pub async fn submit(&mut self) -> Result<Task> {
        let submitted = self.form.submit(self.gateway.as_ref(), &self.auth).await?;
        if self.options.optimistic {
            match &submitted {
                Submitted::Created(task) => self.reconciler.apply_insert(task.clone()),
                Submitted::Updated(task) => self.reconciler.apply_update(task.clone()),
            }
        }
        Ok(match submitted {
            Submitted::Created(task) | Submitted::Updated(task) => task,
        })
    }

    /// Delete a task. A missing id means the task was never persisted, so
    /// there is nothing to do.
    pub async fn delete(&mut self, id: Option<&TaskId>) -> Result<()> {
        let Some(id) = id else {
            log::debug!("Delete requested without a task id, ignoring");
            return Ok(());
        };
        self.gateway.delete(&self.auth, id).await?;
        self.reconciler.apply_delete(Task::key_only(id.clone()));
        Ok(())
    }

    /// Replace the auth context, e.g. after a token refresh.
    pub fn set_auth(&mut self, auth: AuthContext) {
        self.auth = auth;
    }

    /// Detach the change feed and wait for it to shut down.
    pub async fn close(mut self) {
        if let Some(feed) = self.feed.take() {
            feed.close().await;
        }
    }

    /// Look up a stored task, or fail with `NotFound` for callers that need
    /// one to exist.
    pub fn task(&self, id: &TaskId) -> Result<&Task> {
        self.reconciler
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))
    }
}
