//! OAuth2 token management against the identity service
//!
//! One [`TokenManager`] per credential set. The cached token sits behind an
//! async mutex, so at most one grant or refresh is in flight per manager;
//! callers that were waiting on the lock reuse whatever the winner obtained.

use crate::error::{ApiError, PlatformError, Result};
use crate::http::{Body, HttpSend, Method, RawRequest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cfstack_config::{Credentials, OAuthClient};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tokens are treated as expired this long before the server says so.
const EXPIRY_SLACK: Duration = Duration::from_secs(30);

/// Assumed lifetime when the token response has no `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Grant used to obtain the first token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    Password { username: String, password: String },
    ClientCredentials,
    /// One-time SSO passcode. Cannot be replayed once exchanged.
    Passcode(String),
}

impl From<Credentials> for Grant {
    fn from(c: Credentials) -> Self {
        match c {
            Credentials::Password { username, password } => Grant::Password { username, password },
            Credentials::ClientCredentials { .. } => Grant::ClientCredentials,
            Credentials::SsoPasscode { passcode } => Grant::Passcode(passcode),
        }
    }
}

impl Grant {
    fn form(&self) -> Vec<(String, String)> {
        match self {
            Grant::Password { username, password } => vec![
                ("grant_type".into(), "password".into()),
                ("username".into(), username.clone()),
                ("password".into(), password.clone()),
            ],
            Grant::ClientCredentials => vec![("grant_type".into(), "client_credentials".into())],
            Grant::Passcode(code) => vec![
                ("grant_type".into(), "password".into()),
                ("passcode".into(), code.clone()),
            ],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::ClientCredentials => "client_credentials",
            Grant::Passcode(_) => "passcode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Instant,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Access/refresh pair persisted between runs
#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Default)]
struct TokenState {
    token: Option<Token>,
    passcode_used: bool,
}

pub struct TokenManager {
    http: Arc<dyn HttpSend>,
    token_url: String,
    client: OAuthClient,
    grant: Grant,
    state: Mutex<TokenState>,
    store_path: Option<PathBuf>,
}

impl TokenManager {
    /// `auth_base` is the identity service root; `/oauth/token` is appended.
    pub fn new(
        http: Arc<dyn HttpSend>,
        auth_base: &str,
        client: OAuthClient,
        grant: Grant,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/token", auth_base.trim_end_matches('/')),
            client,
            grant,
            state: Mutex::new(TokenState::default()),
            store_path: None,
        }
    }

    pub fn with_store(mut self, path: Option<PathBuf>) -> Self {
        self.store_path = path;
        self
    }

    /// Obtain the first token.
    ///
    /// A refresh token from the token store is tried before the configured
    /// grant.
    pub async fn authenticate(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(stored) = self.load_store().await
            && let Some(refresh) = stored.refresh_token
        {
            match self.request_token(refresh_form(&refresh)).await {
                Ok(token) => {
                    info!(client = %self.client.id, "reused stored refresh token");
                    self.save_store(&token).await;
                    state.token = Some(token);
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "stored refresh token rejected, using configured grant"),
            }
        }

        let token = self.run_grant(&mut state).await?;
        state.token = Some(token);
        Ok(())
    }

    /// Current access token, refreshed first if it has expired.
    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.token
            && !token.is_expired()
        {
            return Ok(token.access_token.clone());
        }
        debug!(client = %self.client.id, "token missing or expired");
        self.refresh_locked(&mut state).await
    }

    /// Refresh after the platform rejected `stale` with a 401.
    ///
    /// If another task already replaced `stale`, the newer token is returned
    /// without contacting the identity service.
    pub async fn refresh_after_rejection(&self, stale: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.token
            && token.access_token != stale
        {
            return Ok(token.access_token.clone());
        }
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String> {
        let refresh = state.token.as_ref().and_then(|t| t.refresh_token.clone());
        let result = match refresh {
            Some(refresh) => self.request_token(refresh_form(&refresh)).await,
            None => self.run_grant(state).await,
        };
        match result {
            Ok(token) => {
                let access = token.access_token.clone();
                self.save_store(&token).await;
                state.token = Some(token);
                Ok(access)
            }
            Err(e) => {
                state.token = None;
                Err(match e {
                    ApiError::Unauthenticated(_) => e,
                    other => ApiError::Unauthenticated(other.to_string()),
                })
            }
        }
    }

    async fn run_grant(&self, state: &mut TokenState) -> Result<Token> {
        if let Grant::Passcode(_) = self.grant {
            if state.passcode_used {
                return Err(ApiError::Unauthenticated(
                    "the SSO passcode has already been used; supply a new one".into(),
                ));
            }
            state.passcode_used = true;
        }
        let token = self
            .request_token(self.grant.form())
            .await
            .map_err(|e| ApiError::Unauthenticated(e.to_string()))?;
        info!(client = %self.client.id, grant = self.grant.name(), "obtained token");
        self.save_store(&token).await;
        Ok(token)
    }

    async fn request_token(&self, form: Vec<(String, String)>) -> Result<Token> {
        let basic = BASE64.encode(format!("{}:{}", self.client.id, self.client.secret));
        let request = RawRequest {
            method: Method::Post,
            url: self.token_url.clone(),
            headers: vec![
                ("Authorization".into(), format!("Basic {}", basic)),
                ("Accept".into(), "application/json".into()),
            ],
            body: Body::Form(form),
        };
        let response = self.http.send(&request).await?;
        if !response.is_success() {
            let err = PlatformError::from_body(response.status, &response.body);
            return Err(ApiError::Unauthenticated(err.to_string()));
        }
        let body: TokenResponse = response.json()?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        Ok(Token {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_SLACK),
        })
    }

    async fn load_store(&self) -> Option<StoredTokens> {
        let path = self.store_path.as_ref()?;
        let data = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&data) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable token store");
                None
            }
        }
    }

    async fn save_store(&self, token: &Token) {
        let Some(path) = &self.store_path else {
            return;
        };
        let stored = StoredTokens {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
        };
        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let data = serde_json::to_vec_pretty(&stored)?;
            tokio::fs::write(path, data).await?;
            Ok::<_, ApiError>(())
        };
        if let Err(e) = write.await {
            warn!(path = %path.display(), error = %e, "failed to write token store");
        }
    }
}

fn refresh_form(refresh: &str) -> Vec<(String, String)> {
    vec![
        ("grant_type".into(), "refresh_token".into()),
        ("refresh_token".into(), refresh.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use serde_json::json;

    fn client() -> OAuthClient {
        OAuthClient {
            id: "cf".into(),
            secret: String::new(),
        }
    }

    fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
        json!({"access_token": access, "refresh_token": refresh, "expires_in": 600, "token_type": "bearer"})
    }

    #[tokio::test]
    async fn test_password_grant_form() {
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a1", Some("r1")));
        let mgr = TokenManager::new(
            fake.sender(),
            "https://uaa.example.com/",
            client(),
            Grant::Password {
                username: "admin".into(),
                password: "pw".into(),
            },
        );

        mgr.authenticate().await.unwrap();
        assert_eq!(mgr.access_token().await.unwrap(), "a1");

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://uaa.example.com/oauth/token");
        // "cf:" with an empty secret
        assert_eq!(requests[0].header("authorization"), Some("Basic Y2Y6"));
        let Body::Form(form) = &requests[0].body else {
            panic!("expected form body");
        };
        assert!(form.contains(&("grant_type".into(), "password".into())));
        assert!(form.contains(&("username".into(), "admin".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_refreshed() {
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a1", Some("r1")));
        fake.respond("POST", "/oauth/token", 200, token_body("a2", Some("r2")));
        let mgr = TokenManager::new(fake.sender(), "https://uaa", client(), Grant::ClientCredentials);

        mgr.authenticate().await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(mgr.access_token().await.unwrap(), "a2");

        let Body::Form(form) = &fake.requests()[1].body else {
            panic!("expected form body");
        };
        assert!(form.contains(&("grant_type".into(), "refresh_token".into())));
        assert!(form.contains(&("refresh_token".into(), "r1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_expiry_assumes_default_lifetime() {
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, json!({"access_token": "a1", "refresh_token": "r1"}));
        fake.respond("POST", "/oauth/token", 200, token_body("a2", Some("r2")));
        let mgr = TokenManager::new(fake.sender(), "https://uaa", client(), Grant::ClientCredentials);

        mgr.authenticate().await.unwrap();
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(mgr.access_token().await.unwrap(), "a1");
        assert_eq!(mgr.access_token().await.unwrap(), "a1");
        assert_eq!(fake.requests().len(), 1);

        tokio::time::advance(DEFAULT_LIFETIME).await;
        assert_eq!(mgr.access_token().await.unwrap(), "a2");
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_rejection_reuses_newer_token() {
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a1", Some("r1")));
        fake.respond("POST", "/oauth/token", 200, token_body("a2", Some("r2")));
        let mgr = TokenManager::new(fake.sender(), "https://uaa", client(), Grant::ClientCredentials);
        mgr.authenticate().await.unwrap();

        assert_eq!(mgr.refresh_after_rejection("a1").await.unwrap(), "a2");
        // A second task holding the same stale token does not refresh again.
        assert_eq!(mgr.refresh_after_rejection("a1").await.unwrap(), "a2");
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_unauthenticated() {
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a1", Some("r1")));
        fake.respond(
            "POST",
            "/oauth/token",
            400,
            json!({"error": "invalid_token", "error_description": "Invalid refresh token"}),
        );
        let mgr = TokenManager::new(fake.sender(), "https://uaa", client(), Grant::ClientCredentials);
        mgr.authenticate().await.unwrap();

        let err = mgr.refresh_after_rejection("a1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(ref m) if m.contains("Invalid refresh token")));
    }

    #[tokio::test]
    async fn test_passcode_is_not_replayed() {
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a1", None));
        let mgr = TokenManager::new(
            fake.sender(),
            "https://uaa",
            client(),
            Grant::Passcode("one-time".into()),
        );
        mgr.authenticate().await.unwrap();

        let err = mgr.refresh_after_rejection("a1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(_)));
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_token_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a1", Some("r1")));
        let mgr = TokenManager::new(
            fake.sender(),
            "https://uaa",
            client(),
            Grant::Passcode("one-time".into()),
        )
        .with_store(Some(path.clone()));
        mgr.authenticate().await.unwrap();
        assert!(path.exists());

        // A new process reuses the stored refresh token instead of the passcode.
        let fake = FakePlatform::new();
        fake.respond("POST", "/oauth/token", 200, token_body("a2", Some("r2")));
        let mgr = TokenManager::new(
            fake.sender(),
            "https://uaa",
            client(),
            Grant::Passcode("stale".into()),
        )
        .with_store(Some(path));
        mgr.authenticate().await.unwrap();
        assert_eq!(mgr.access_token().await.unwrap(), "a2");
        let Body::Form(form) = &fake.requests()[0].body else {
            panic!("expected form body");
        };
        assert!(form.contains(&("refresh_token".into(), "r1".into())));
    }
}
