use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier assigned by the remote store.
///
/// Backends hand these out as either integers or strings (uuid primary keys);
/// both forms are kept as their textual representation so equality is by
/// value regardless of encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<i64> for TaskId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Uint(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Int(n) => Self(n.to_string()),
            Raw::Uint(n) => Self(n.to_string()),
        })
    }
}

/// A row of the remote tasks table.
///
/// `user_id` and `created_at` are always set by the backend on rows it
/// returns, but delete notifications from the change feed only carry the
/// primary key, so both stay optional here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A task carrying only its key, as found in delete notifications.
    pub fn key_only(id: TaskId) -> Self {
        Self {
            id,
            title: String::new(),
            description: None,
            image_url: None,
            user_id: None,
            created_at: None,
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payload for creating a task. The backend fills in `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub user_id: String,
}

/// The fields an update may touch. `user_id` and `created_at` are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskChanges {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// A task being written in the edit form. Without an id it has never been
/// persisted and must not enter the task store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub id: Option<TaskId>,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
}

impl Draft {
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn to_new_task(&self, user_id: &str) -> NewTask {
        NewTask {
            title: self.title.clone(),
            description: Some(self.description.clone()),
            image_url: self.image_url.clone(),
            user_id: user_id.to_string(),
        }
    }

    pub fn to_changes(&self) -> TaskChanges {
        TaskChanges {
            title: self.title.clone(),
            description: Some(self.description.clone()),
            image_url: self.image_url.clone(),
        }
    }
}

impl From<&Task> for Draft {
    fn from(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            image_url: task.image_url.clone(),
        }
    }
}
