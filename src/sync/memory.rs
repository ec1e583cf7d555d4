//! In-memory gateway used by the session and form tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::StatusCode;

use crate::core::task::{NewTask, Task, TaskChanges, TaskId};
use crate::error::{Error, Result};

use super::auth::AuthContext;
use super::gateway::{Attachment, Gateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    ReadAll,
    Update(TaskId),
    Delete(TaskId),
    Upload(String),
}

#[derive(Default)]
struct State {
    rows: Vec<Task>,
    next_id: i64,
    calls: Vec<Call>,
    fail_upload: bool,
    fail_writes: bool,
}

#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Task>) -> Self {
        let next_id = rows
            .iter()
            .filter_map(|t| t.id.as_str().parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            state: Mutex::new(State {
                rows,
                next_id,
                ..State::default()
            }),
        }
    }

    pub fn fail_uploads(&self) {
        self.state.lock().unwrap().fail_upload = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }
}

fn server_error() -> Error {
    Error::Server {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "simulated failure".to_string(),
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn create(&self, _auth: &AuthContext, task: NewTask) -> Result<Task> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create(task.title.clone()));
        if state.fail_writes {
            return Err(server_error());
        }
        state.next_id += 1;
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let created = Task {
            id: TaskId::from(state.next_id),
            title: task.title,
            description: task.description,
            image_url: task.image_url,
            user_id: Some(task.user_id),
            created_at: Some(base + Duration::minutes(state.next_id)),
        };
        state.rows.push(created.clone());
        Ok(created)
    }

    async fn read_all(&self, _auth: &AuthContext) -> Result<Vec<Task>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ReadAll);
        let mut rows = state.rows.clone();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn update(&self, _auth: &AuthContext, id: &TaskId, changes: TaskChanges) -> Result<Task> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Update(id.clone()));
        if state.fail_writes {
            return Err(server_error());
        }
        let row = state
            .rows
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| Error::Server {
                status: StatusCode::NOT_ACCEPTABLE,
                message: "JSON object requested, multiple (or no) rows returned".to_string(),
            })?;
        row.title = changes.title;
        row.description = changes.description;
        row.image_url = changes.image_url;
        Ok(row.clone())
    }

    async fn delete(&self, _auth: &AuthContext, id: &TaskId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(id.clone()));
        if state.fail_writes {
            return Err(server_error());
        }
        state.rows.retain(|t| &t.id != id);
        Ok(())
    }

    async fn upload_file(&self, _auth: &AuthContext, file: Attachment) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Upload(file.file_name.clone()));
        if state.fail_upload {
            return Err(Error::Upload("bucket not found".to_string()));
        }
        Ok(format!("https://cdn.example/tasks-images/{}-1", file.file_name))
    }
}
