//! Access credentials for the publishing target

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{PipelineError, PipelineResult};

pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";
pub const REDIRECT_URI: &str = "http://localhost";

/// Tokens expiring within this margin count as expired
const EXPIRY_MARGIN_SECONDS: i64 = 10;

/// An issued access credential, persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + ChronoDuration::seconds(EXPIRY_MARGIN_SECONDS),
            None => false,
        }
    }
}

/// Storage of the access credential between runs
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> PipelineResult<Token>;

    async fn save(&self, token: &Token) -> PipelineResult<()>;

    fn is_expired(&self, token: &Token, now: DateTime<Utc>) -> bool {
        token.expired_at(now)
    }
}

/// Token kept in a JSON file readable only by its owner
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> PipelineResult<Token> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PipelineError::Credential(format!(
                "cannot read token file {}: {} (run `clipforge login`)",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            PipelineError::Credential(format!("invalid token file {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, token: &Token) -> PipelineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(token)
            .map_err(|e| PipelineError::Credential(format!("cannot encode token: {}", e)))?;
        tokio::fs::write(&self.path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        debug!("💾 Saved token to {}", self.path.display());
        Ok(())
    }
}

/// Installed-application client secret
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub installed: InstalledApp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledApp {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ClientSecret {
    pub fn from_json(content: &str) -> PipelineResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| PipelineError::Credential(format!("invalid client secret: {}", e)))
    }

    pub async fn load(path: &Path) -> PipelineResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::Credential(format!(
                "cannot read client secret {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<String>, now: DateTime<Utc>) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry: self.expires_in.map(|secs| now + ChronoDuration::seconds(secs)),
        }
    }
}

/// Authorization-code flow against the client secret's endpoints
pub struct OAuthClient {
    secret: InstalledApp,
    client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(secret: ClientSecret) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            secret: secret.installed,
            client,
        })
    }

    /// Consent page the user opens to obtain an authorization code
    pub fn authorization_url(&self) -> PipelineResult<String> {
        let scopes = format!("{} {}", UPLOAD_SCOPE, READONLY_SCOPE);
        let url = url::Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
                ("scope", scopes.as_str()),
                ("access_type", "offline"),
                ("state", "state-token"),
            ],
        )
        .map_err(|e| PipelineError::Credential(format!("invalid auth uri: {}", e)))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> PipelineResult<Token> {
        let params = [
            ("code", code),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "authorization_code"),
        ];
        self.request_token(&params, None).await
    }

    /// New access token from the refresh token of `token`
    pub async fn refresh(&self, token: &Token) -> PipelineResult<Token> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            PipelineError::Credential("token expired and has no refresh token".to_string())
        })?;

        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];
        self.request_token(&params, token.refresh_token.clone()).await
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
        previous_refresh: Option<String>,
    ) -> PipelineResult<Token> {
        let response = self
            .client
            .post(&self.secret.token_uri)
            .form(params)
            .send()
            .await
            .map_err(|e| PipelineError::Credential(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Credential(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Credential(format!("invalid token response: {}", e)))?;
        Ok(parsed.into_token(previous_refresh, Utc::now()))
    }
}

/// Interactive login: print the consent URL, read the code, store the token
pub async fn login(client_secret_file: &Path, store: &dyn CredentialStore) -> anyhow::Result<()> {
    use anyhow::Context;
    use tokio::io::{AsyncBufReadExt, BufReader};

    let secret = ClientSecret::load(client_secret_file).await?;
    let oauth = OAuthClient::new(secret)?;

    println!("Go to the following link in your browser then type the authorization code:");
    println!("{}", oauth.authorization_url()?);

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read authorization code")?;
    let code = line.trim();
    if code.is_empty() {
        anyhow::bail!("No authorization code entered");
    }

    let token = oauth.exchange_code(code).await?;
    store.save(&token).await?;
    info!("🔑 Login complete, token saved");
    Ok(())
}
