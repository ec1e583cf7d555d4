use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::{Error, Result};

use super::supabase::{check_response, build_http};

/// Identity attached to every backend request.
///
/// Either an anonymous context carrying only the project's public key, or a
/// signed-in user's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl AuthContext {
    pub fn anonymous(anon_key: &str) -> Self {
        Self {
            access_token: anon_key.to_string(),
            refresh_token: None,
            user_id: None,
            email: None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }

    /// The signed-in user's id, required to create tasks.
    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .ok_or_else(|| Error::Auth("not signed in".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    access_token: String,
    refresh_token: Option<String>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
}

impl From<SessionResponse> for AuthContext {
    fn from(s: SessionResponse) -> Self {
        Self {
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            user_id: Some(s.user.id),
            email: s.user.email,
        }
    }
}

/// Password sign-in, sign-up and session refresh against the backend's auth
/// service. The current session is published on a watch channel.
pub struct AuthClient {
    base_url: String,
    anon_key: String,
    http: Client,
    state: watch::Sender<Option<AuthContext>>,
}

impl AuthClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let (state, _) = watch::channel(None);
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http: build_http()?,
            state,
        })
    }

    /// Subscribe to session changes. The receiver sees `None` while signed out.
    pub fn watch(&self) -> watch::Receiver<Option<AuthContext>> {
        self.state.subscribe()
    }

    /// The current session, or an anonymous context.
    pub fn current(&self) -> AuthContext {
        self.state
            .borrow()
            .clone()
            .unwrap_or_else(|| AuthContext::anonymous(&self.anon_key))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthContext> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let body = serde_json::json!({ "email": email, "password": password });
        let ctx = self.token_request(&url, &body).await.inspect_err(|e| {
            log::error!("Error signing in: {}", e);
        })?;
        log::info!("Signed in as {}", ctx.email.as_deref().unwrap_or(email));
        self.state.send_replace(Some(ctx.clone()));
        Ok(ctx)
    }

    /// Register a new account. Returns the session when the backend signs the
    /// user in immediately, or `None` when email confirmation is pending.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthContext>> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .inspect_err(|e| log::error!("Error signing up: {}", e))?;
        let text = check_response(resp).await.inspect_err(|e| {
            log::error!("Error signing up: {}", e);
        })?;

        let value: serde_json::Value = serde_json::from_str(&text)
            .inspect_err(|e| log::error!("Error signing up: {}", e))?;
        if value.get("access_token").is_none() {
            log::info!("Signed up {}, awaiting email confirmation", email);
            return Ok(None);
        }

        let ctx: AuthContext = serde_json::from_value::<SessionResponse>(value)
            .inspect_err(|e| log::error!("Error signing up: {}", e))?
            .into();
        log::info!("Signed up and signed in as {}", email);
        self.state.send_replace(Some(ctx.clone()));
        Ok(Some(ctx))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthContext> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let ctx = self.token_request(&url, &body).await.inspect_err(|e| {
            log::error!("Error refreshing session: {}", e);
        })?;
        log::debug!("Session refreshed");
        self.state.send_replace(Some(ctx.clone()));
        Ok(ctx)
    }

    pub async fn sign_out(&self, auth: &AuthContext) -> Result<()> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&auth.access_token)
            .send()
            .await?;
        // Clear locally even when the server rejects the token.
        self.state.send_replace(None);
        check_response(resp).await.inspect_err(|e| {
            log::error!("Error signing out: {}", e);
        })?;
        log::info!("Signed out");
        Ok(())
    }

    async fn token_request(&self, url: &str, body: &serde_json::Value) -> Result<AuthContext> {
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;
        let text = check_response(resp).await?;
        let session: SessionResponse = serde_json::from_str(&text)?;
        Ok(session.into())
    }
}
