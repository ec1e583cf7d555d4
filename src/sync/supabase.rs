use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};

use crate::core::task::{NewTask, Task, TaskChanges, TaskId};
use crate::error::{Error, Result};

use super::auth::AuthContext;
use super::gateway::{Attachment, Gateway};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const RETURN_REPRESENTATION: &str = "return=representation";

pub(crate) fn build_http() -> Result<Client> {
    Client::builder().build().map_err(Error::from)
}

/// Return the response body for a success status, or turn the backend's
/// error body into `Error::Server`.
pub(crate) async fn check_response(resp: Response) -> Result<String> {
    let status = resp.status();
    let text = resp.text().await?;
    if status.is_success() {
        return Ok(text);
    }
    Err(Error::Server {
        status,
        message: error_message(&text),
    })
}

/// Pull the human-readable part out of a backend error body. The REST,
/// auth and storage services each use a different field.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    ["message", "error_description", "msg", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Object path for an uploaded file: the original name made URL-safe, with
/// a millisecond timestamp appended so repeated uploads do not collide.
fn object_path(file_name: &str, millis: i64) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}", safe, millis)
}

/// REST and storage client for a hosted backend project.
#[derive(Clone)]
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    table: String,
    bucket: String,
    http: Client,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str, table: &str, bucket: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            table: table.to_string(),
            bucket: bucket.to_string(),
            http: build_http()?,
        })
    }

    fn rows_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn authed(&self, builder: RequestBuilder, auth: &AuthContext) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(&auth.access_token)
    }
}

#[async_trait]
impl Gateway for SupabaseClient {
    async fn create(&self, auth: &AuthContext, task: NewTask) -> Result<Task> {
        let resp = self
            .authed(self.http.post(self.rows_url()), auth)
            .header("Prefer", RETURN_REPRESENTATION)
            .header(ACCEPT, SINGLE_OBJECT)
            .json(&task)
            .send()
            .await
            .inspect_err(|e| log::error!("Error adding task: {}", e))?;
        let text = check_response(resp)
            .await
            .inspect_err(|e| log::error!("Error adding task: {}", e))?;
        let created: Task = serde_json::from_str(&text)
            .inspect_err(|e| log::error!("Error adding task: {}", e))?;
        log::info!("Created task {} ({})", created.id, created.title);
        Ok(created)
    }

    async fn read_all(&self, auth: &AuthContext) -> Result<Vec<Task>> {
        let resp = self
            .authed(self.http.get(self.rows_url()), auth)
            .query(&[("select", "*"), ("order", "created_at.asc")])
            .send()
            .await
            .inspect_err(|e| log::error!("Error reading tasks: {}", e))?;
        let text = check_response(resp)
            .await
            .inspect_err(|e| log::error!("Error reading tasks: {}", e))?;
        let tasks: Vec<Task> = serde_json::from_str(&text)
            .inspect_err(|e| log::error!("Error reading tasks: {}", e))?;
        log::debug!("Read {} tasks", tasks.len());
        Ok(tasks)
    }

    async fn update(&self, auth: &AuthContext, id: &TaskId, changes: TaskChanges) -> Result<Task> {
        let resp = self
            .authed(self.http.patch(self.rows_url()), auth)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", RETURN_REPRESENTATION)
            .header(ACCEPT, SINGLE_OBJECT)
            .json(&changes)
            .send()
            .await
            .inspect_err(|e| log::error!("Error updating task: {}", e))?;
        let text = check_response(resp)
            .await
            .inspect_err(|e| log::error!("Error updating task: {}", e))?;
        let updated: Task = serde_json::from_str(&text)
            .inspect_err(|e| log::error!("Error updating task: {}", e))?;
        log::info!("Updated task {}", updated.id);
        Ok(updated)
    }

    async fn delete(&self, auth: &AuthContext, id: &TaskId) -> Result<()> {
        let resp = self
            .authed(self.http.delete(self.rows_url()), auth)
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await
            .inspect_err(|e| log::error!("Error deleting task: {}", e))?;
        check_response(resp)
            .await
            .inspect_err(|e| log::error!("Error deleting task: {}", e))?;
        log::info!("Deleted task {}", id);
        Ok(())
    }

    async fn upload_file(&self, auth: &AuthContext, file: Attachment) -> Result<String> {
        let path = object_path(&file.file_name, chrono::Utc::now().timestamp_millis());
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);

        let sent = self
            .authed(self.http.post(&url), auth)
            .header(CONTENT_TYPE, file.content_type.as_str())
            .body(file.bytes)
            .send()
            .await;
        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                log::error!("Error uploading image: {}", e);
                return Err(Error::Upload(e.to_string()));
            }
        };
        if let Err(e) = check_response(resp).await {
            log::error!("Error uploading image: {}", e);
            return Err(Error::Upload(e.to_string()));
        }

        let public = self.public_url(&path);
        log::info!("Uploaded {} -> {}", file.file_name, public);
        Ok(public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn signed_in() -> AuthContext {
        AuthContext {
            access_token: "jwt-abc".to_string(),
            refresh_token: None,
            user_id: Some("user-1".to_string()),
            email: None,
        }
    }

    fn client(server: &mockito::ServerGuard) -> SupabaseClient {
        SupabaseClient::new(&server.url(), "anon", "tasks", "tasks-images").unwrap()
    }

    #[tokio::test]
    async fn read_all_orders_by_created_at() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/tasks")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "*".into()),
                Matcher::UrlEncoded("order".into(), "created_at.asc".into()),
            ]))
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer jwt-abc")
            .with_status(200)
            .with_body(r#"[
                {"id":1,"title":"A","description":"","image_url":null,"user_id":"user-1","created_at":"2025-01-01T00:00:00+00:00"},
                {"id":2,"title":"B","description":null,"image_url":null,"user_id":"user-1","created_at":"2025-01-02T00:00:00+00:00"}
            ]"#)
            .create_async()
            .await;

        let tasks = client(&server).read_all(&signed_in()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "A");
        assert_eq!(tasks[1].id, TaskId::from(2));
    }

    #[tokio::test]
    async fn create_requests_single_representation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/tasks")
            .match_header("prefer", RETURN_REPRESENTATION)
            .match_header("accept", SINGLE_OBJECT)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "title": "C",
                "user_id": "user-1"
            })))
            .with_status(201)
            .with_body(r#"{"id":3,"title":"C","description":"","image_url":null,"user_id":"user-1","created_at":"2025-01-03T00:00:00+00:00"}"#)
            .create_async()
            .await;

        let new_task = NewTask {
            title: "C".to_string(),
            description: Some(String::new()),
            image_url: None,
            user_id: "user-1".to_string(),
        };
        let created = client(&server).create(&signed_in(), new_task).await.unwrap();
        mock.assert_async().await;
        assert_eq!(created.id, TaskId::from(3));
    }

    #[tokio::test]
    async fn update_filters_by_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/rest/v1/tasks")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.1".into()))
            .match_body(Matcher::Json(serde_json::json!({
                "title": "A2",
                "description": "more",
                "image_url": null
            })))
            .with_status(200)
            .with_body(r#"{"id":1,"title":"A2","description":"more","image_url":null,"user_id":"user-1","created_at":"2025-01-01T00:00:00+00:00"}"#)
            .create_async()
            .await;

        let changes = TaskChanges {
            title: "A2".to_string(),
            description: Some("more".to_string()),
            image_url: None,
        };
        let updated = client(&server)
            .update(&signed_in(), &TaskId::from(1), changes)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(updated.title, "A2");
    }

    #[tokio::test]
    async fn delete_maps_server_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/rest/v1/tasks")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.9".into()))
            .with_status(401)
            .with_body(r#"{"code":"42501","message":"permission denied for table tasks"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .delete(&signed_in(), &TaskId::from(9))
            .await
            .unwrap_err();
        assert!(err.is_remote());
        match err {
            Error::Server { status, message } => {
                assert_eq!(status.as_u16(), 401);
                assert_eq!(message, "permission denied for table tasks");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_all_rejects_malformed_rows() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/tasks")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"not":"a list"}"#)
            .create_async()
            .await;

        let err = client(&server).read_all(&signed_in()).await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert!(!err.is_remote());
    }

    #[tokio::test]
    async fn upload_returns_public_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex(r"^/storage/v1/object/tasks-images/cat\.png-\d+$".into()))
            .match_header("content-type", "image/png")
            .with_status(200)
            .with_body(r#"{"Key":"tasks-images/cat.png-1"}"#)
            .create_async()
            .await;

        let file = Attachment::new("cat.png", "image/png", vec![0x89, b'P', b'N', b'G']);
        let url = client(&server).upload_file(&signed_in(), file).await.unwrap();
        mock.assert_async().await;
        let prefix = format!("{}/storage/v1/object/public/tasks-images/cat.png-", server.url());
        assert!(url.starts_with(&prefix), "{url}");
    }

    #[tokio::test]
    async fn upload_failure_is_reported_as_upload_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Any)
            .with_status(413)
            .with_body(r#"{"statusCode":"413","error":"Payload too large","message":"The object exceeded the maximum allowed size"}"#)
            .create_async()
            .await;

        let file = Attachment::new("big.png", "image/png", vec![0; 16]);
        let err = client(&server).upload_file(&signed_in(), file).await.unwrap_err();
        assert!(matches!(err, Error::Upload(ref m) if m.contains("maximum allowed size")));
    }

    #[test]
    fn object_path_is_url_safe() {
        assert_eq!(object_path("my cat.png", 17), "my_cat.png-17");
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message("gateway timeout\n"), "gateway timeout");
        assert_eq!(error_message(r#"{"msg":"Email rate limit exceeded"}"#), "Email rate limit exceeded");
    }
}
