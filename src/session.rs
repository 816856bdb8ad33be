//! Signed-in identity and role gating.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult, AUTH_FAILED, AUTH_NO_SESSION};
use crate::model::{decode_rows, Role, UserProfile, PROFILES};
use crate::store::{Embed, RecordStore, RestStore, Select};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// Extra profile fields attached to an auth sign-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignUpMeta {
    pub nama: String,
    pub role: String,
    pub kelurahan_id: String,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user(&self) -> AppResult<Option<SessionUser>>;
    async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionUser>;
    async fn sign_out(&self) -> AppResult<()>;
    /// Create an auth account. Returns the new user's id when the backend
    /// reports one.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        meta: &SignUpMeta,
    ) -> AppResult<Option<String>>;
    async fn reset_password(&self, email: &str) -> AppResult<()>;
}

/// Profile of the signed-in user as shown in the page header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub nama: String,
    pub role: Option<Role>,
    pub kelurahan: Option<String>,
}

impl Identity {
    pub fn can_open_admin(&self) -> bool {
        self.role.is_some_and(Role::can_open_admin)
    }

    pub fn header_label(&self) -> String {
        format!(
            "{} - Koordinator Kelurahan {}",
            self.nama,
            self.kelurahan.as_deref().unwrap_or("...")
        )
    }
}

/// Resolve the current user's profile row. `None` when nobody is signed in
/// or the user has no profile.
pub async fn load_identity(
    store: &dyn RecordStore,
    session: &dyn SessionProvider,
) -> AppResult<Option<Identity>> {
    let Some(user) = session.current_user().await? else {
        return Ok(None);
    };
    let rows = store
        .select(
            &Select::from(PROFILES)
                .eq("id", user.id.clone())
                .embed(Embed::kelurahan_name()),
        )
        .await?;
    let profile = decode_rows::<UserProfile>(rows)?.into_iter().next();
    Ok(profile.map(|p| Identity {
        user_id: user.id,
        role: p.role(),
        kelurahan: p.kelurahan.map(|k| k.name),
        nama: p.nama,
    }))
}

/// Fixed users for tests and offline CLI runs.
#[derive(Debug, Default)]
pub struct StaticSession {
    accounts: Mutex<HashMap<String, (String, SessionUser)>>,
    current: RwLock<Option<SessionUser>>,
}

impl StaticSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: SessionUser) -> Self {
        let session = Self::default();
        *session.current.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
        session
    }

    pub fn with_account(self, email: &str, password: &str, id: &str) -> Self {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                email.to_lowercase(),
                (
                    password.to_string(),
                    SessionUser {
                        id: id.to_string(),
                        email: email.to_string(),
                    },
                ),
            );
        self
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn current_user(&self) -> AppResult<Option<SessionUser>> {
        Ok(self.current.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionUser> {
        let user = {
            let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            match accounts.get(&email.to_lowercase()) {
                Some((stored, user)) if stored == password => user.clone(),
                _ => {
                    return Err(AppError::new(AUTH_FAILED, "Invalid login credentials")
                        .with_context("email", email.to_string()))
                }
            }
        };
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
        Ok(user)
    }

    async fn sign_out(&self) -> AppResult<()> {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _meta: &SignUpMeta,
    ) -> AppResult<Option<String>> {
        let key = email.to_lowercase();
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if accounts.contains_key(&key) {
            return Err(AppError::new(AUTH_FAILED, "User already registered")
                .with_context("email", email.to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        accounts.insert(
            key,
            (
                password.to_string(),
                SessionUser {
                    id: id.clone(),
                    email: email.to_string(),
                },
            ),
        );
        Ok(Some(id))
    }

    async fn reset_password(&self, email: &str) -> AppResult<()> {
        if email.trim().is_empty() {
            return Err(AppError::new(
                AUTH_FAILED,
                "Mohon isi email terlebih dahulu untuk reset password.",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: SessionUser,
}

#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Supabase GoTrue endpoints under `/auth/v1`.
#[derive(Debug)]
pub struct RestAuth {
    client: Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<(String, SessionUser)>>,
    store: Option<Arc<RestStore>>,
}

impl RestAuth {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::from(e).with_context("operation", "http_client"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            session: RwLock::new(None),
            store: None,
        })
    }

    /// Keep the data store's bearer token in step with this session.
    pub fn with_store(mut self, store: Arc<RestStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn token(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(token, _)| token.clone())
    }

    fn headers(&self, bearer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", v);
        }
        let bearer = bearer.unwrap_or(&self.api_key);
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {bearer}")) {
            headers.insert(AUTHORIZATION, v);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn set_session(&self, value: Option<(String, SessionUser)>) {
        if let Some(store) = &self.store {
            store.set_access_token(value.as_ref().map(|(token, _)| token.clone()));
        }
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = value;
    }

    async fn post(&self, path: &str, bearer: Option<&str>, body: &Value) -> AppResult<Value> {
        let response = self
            .client
            .post(self.url(path))
            .headers(self.headers(bearer))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let body: AuthErrorBody = serde_json::from_str(&text).unwrap_or_default();
            let message = body
                .msg
                .or(body.message)
                .or(body.error_description)
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::new(AUTH_FAILED, message)
                .with_context("status", status.as_u16().to_string())
                .with_context("endpoint", path.to_string()));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl SessionProvider for RestAuth {
    async fn current_user(&self) -> AppResult<Option<SessionUser>> {
        let Some(token) = self.token() else {
            return Ok(None);
        };
        let response = self
            .client
            .get(self.url("user"))
            .headers(self.headers(Some(&token)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!(target: "pipadmin", event = "session_expired");
            self.set_session(None);
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json::<SessionUser>().await?))
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionUser> {
        let body = json!({ "email": email, "password": password });
        let value = self
            .post("token?grant_type=password", None, &body)
            .await
            .map_err(|e| e.with_context("operation", "sign_in"))?;
        let token: TokenResponse = serde_json::from_value(value)?;
        info!(target: "pipadmin", event = "sign_in", user_id = %token.user.id);
        let user = token.user.clone();
        self.set_session(Some((token.access_token, token.user)));
        Ok(user)
    }

    async fn sign_out(&self) -> AppResult<()> {
        let Some(token) = self.token() else {
            return Err(AppError::new(AUTH_NO_SESSION, "No active session"));
        };
        let result = self.post("logout", Some(&token), &Value::Null).await;
        self.set_session(None);
        result.map(|_| ())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        meta: &SignUpMeta,
    ) -> AppResult<Option<String>> {
        let body = json!({ "email": email, "password": password, "data": meta });
        let value = self
            .post("signup", self.token().as_deref(), &body)
            .await
            .map_err(|e| e.with_context("operation", "sign_up"))?;
        // Confirmed projects answer with a session, unconfirmed ones with the bare user.
        let id = value
            .get("user")
            .and_then(|u| u.get("id"))
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(id)
    }

    async fn reset_password(&self, email: &str) -> AppResult<()> {
        if email.trim().is_empty() {
            return Err(AppError::new(
                AUTH_FAILED,
                "Mohon isi email terlebih dahulu untuk reset password.",
            ));
        }
        self.post("recover", None, &json!({ "email": email }))
            .await
            .map(|_| ())
            .map_err(|e| e.with_context("operation", "reset_password"))
    }
}
