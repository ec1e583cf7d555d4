use crate::core::task::{Draft, Task};
use crate::error::Result;
use crate::sync::auth::AuthContext;
use crate::sync::gateway::{Attachment, Gateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

/// The task being written or edited, plus a file waiting to be attached.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    draft: Draft,
    attachment: Option<Attachment>,
}

/// What a successful submit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Created(Task),
    Updated(Task),
}

impl Submitted {
    pub fn task(&self) -> &Task {
        match self {
            Self::Created(t) | Self::Updated(t) => t,
        }
    }
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> FormMode {
        if self.draft.is_persisted() {
            FormMode::Edit
        } else {
            FormMode::Create
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.draft.title = title.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.draft.description = description.into();
    }

    pub fn attach(&mut self, file: Attachment) {
        self.attachment = Some(file);
    }

    pub fn detach_file(&mut self) {
        self.attachment = None;
    }

    /// Switch to editing a copy of an existing task.
    pub fn begin_edit(&mut self, task: &Task) {
        self.draft = Draft::from(task);
        self.attachment = None;
    }

    /// Drop whatever was entered and go back to creating.
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.draft = Draft::default();
        self.attachment = None;
    }

    /// Upload the attachment if there is one, then create or update.
    ///
    /// A failed upload aborts before anything is written. On any failure
    /// the draft keeps what was entered so it can be submitted again.
    pub async fn submit<G: Gateway + ?Sized>(
        &mut self,
        gateway: &G,
        auth: &AuthContext,
    ) -> Result<Submitted> {
        // Refuse an anonymous create before anything reaches storage.
        if !self.draft.is_persisted() {
            auth.require_user()?;
        }

        if let Some(file) = self.attachment.clone() {
            let url = gateway.upload_file(auth, file).await?;
            self.draft.image_url = Some(url);
            self.attachment = None;
        }

        let submitted = match self.draft.id.clone() {
            Some(id) => {
                let task = gateway.update(auth, &id, self.draft.to_changes()).await?;
                Submitted::Updated(task)
            }
            None => {
                let user_id = auth.require_user()?;
                let task = gateway.create(auth, self.draft.to_new_task(user_id)).await?;
                Submitted::Created(task)
            }
        };

        self.reset();
        Ok(submitted)
    }
}
