use std::path::Path;

use async_trait::async_trait;

use crate::core::task::{NewTask, Task, TaskChanges, TaskId};
use crate::error::Result;

use super::auth::AuthContext;

/// A local file waiting to be uploaded alongside a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its content type from the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let content_type = content_type_for(&file_name).to_string();
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Request/response access to the remote task collection and its file
/// storage. Every call carries the caller's auth context explicitly.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create(&self, auth: &AuthContext, task: NewTask) -> Result<Task>;

    /// All tasks, ascending by `created_at`.
    async fn read_all(&self, auth: &AuthContext) -> Result<Vec<Task>>;

    async fn update(&self, auth: &AuthContext, id: &TaskId, changes: TaskChanges) -> Result<Task>;

    async fn delete(&self, auth: &AuthContext, id: &TaskId) -> Result<()>;

    /// Store the file and return its public URL.
    async fn upload_file(&self, auth: &AuthContext, file: Attachment) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("cat.PNG"), "image/png");
        assert_eq!(content_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("taskboard-{}.gif", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"GIF89a").unwrap();
        let attachment = Attachment::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(attachment.content_type, "image/gif");
        assert_eq!(attachment.bytes, b"GIF89a");
        assert!(attachment.file_name.ends_with(".gif"));
    }
}
