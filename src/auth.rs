//! Provider authentication.
//!
//! Two flavours are supported: `serviceaccount`, which signs a JWT assertion
//! with a key file and exchanges it for an access token, and `interactive`,
//! which borrows the token of the locally logged-in `gcloud` user.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CloudqlError, CloudqlResult};
use crate::transport::{HttpRequest, HttpTransport, process_response};

pub const AUTH_INTERACTIVE: &str = "interactive";
pub const AUTH_SERVICE_ACCOUNT: &str = "serviceaccount";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Credentials state for one provider in a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthCtx {
    pub scopes: Vec<String>,
    /// `interactive` or `serviceaccount`.
    pub auth_type: String,
    /// Principal, once known.
    pub id: String,
    pub key_file_path: Option<PathBuf>,
    pub active: bool,
}

impl AuthCtx {
    pub fn new(scopes: Vec<String>, key_file_path: Option<PathBuf>) -> Self {
        let auth_type = if key_file_path.is_some() {
            AUTH_SERVICE_ACCOUNT
        } else {
            AUTH_INTERACTIVE
        };
        Self {
            scopes,
            auth_type: auth_type.to_string(),
            id: String::new(),
            key_file_path,
            active: false,
        }
    }

    /// Requested type if recognised, else service account when a key file is set.
    pub fn infer_auth_type(&self, requested: &str) -> &'static str {
        match requested.to_ascii_lowercase().as_str() {
            AUTH_SERVICE_ACCOUNT => AUTH_SERVICE_ACCOUNT,
            AUTH_INTERACTIVE => AUTH_INTERACTIVE,
            _ if self.key_file_path.is_some() => AUTH_SERVICE_ACCOUNT,
            _ => AUTH_INTERACTIVE,
        }
    }

    pub fn activate(&mut self, principal: &str, auth_type: &str) {
        self.active = true;
        self.auth_type = auth_type.to_string();
        if !principal.is_empty() {
            self.id = principal.to_string();
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Scopes to request, defaulting to cloud-platform.
    pub fn effective_scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            vec![DEFAULT_SCOPE.to_string()]
        } else {
            self.scopes.clone()
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "{}:{}",
            self.infer_auth_type(&self.auth_type),
            self.key_file_path
                .as_deref()
                .map(Path::display)
                .map(|d| d.to_string())
                .unwrap_or_default()
        )
    }
}

/// Bearer token with its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > Utc::now()
    }
}

/// Obtains tokens and identities for an [`AuthCtx`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn access_token(&self, ctx: &AuthCtx) -> CloudqlResult<AccessToken>;

    /// Who the credentials belong to.
    async fn principal(&self, ctx: &AuthCtx) -> CloudqlResult<String>;

    async fn revoke(&self, ctx: &AuthCtx) -> CloudqlResult<()>;
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

fn read_key_file(path: Option<&Path>) -> CloudqlResult<ServiceAccountKey> {
    let path = path.ok_or_else(|| {
        CloudqlError::Auth("service account auth requires a key file path".to_string())
    })?;
    let content = std::fs::read_to_string(path).map_err(|e| {
        CloudqlError::Auth(format!(
            "could not read service account key file '{}': {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| CloudqlError::Auth(format!("invalid service account key file: {}", e)))
}

/// Google credentials: service account keys and the `gcloud` CLI.
pub struct GoogleAuthenticator {
    transport: Arc<dyn HttpTransport>,
    tokens: DashMap<String, AccessToken>,
}

impl GoogleAuthenticator {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            tokens: DashMap::new(),
        }
    }

    async fn service_account_token(&self, ctx: &AuthCtx) -> CloudqlResult<AccessToken> {
        let key = read_key_file(ctx.key_file_path.as_deref())?;
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: ctx.effective_scopes().join(" "),
            aud: token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CloudqlError::Auth(format!("invalid private key: {}", e)))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| CloudqlError::Auth(format!("could not sign assertion: {}", e)))?;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_GRANT_TYPE)
            .append_pair("assertion", &assertion)
            .finish();
        let mut request = HttpRequest::new("POST", token_uri)
            .with_header("Content-Type", "application/x-www-form-urlencoded");
        request.body = Some(form.into_bytes());

        let response = self.transport.execute(&request).await?;
        let body = process_response(&response)
            .map_err(|e| CloudqlError::Auth(format!("token exchange failed: {}", e)))?;
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| CloudqlError::Auth(format!("unexpected token response: {}", e)))?;
        tracing::debug!("Obtained service account token for {}", key.client_email);

        Ok(AccessToken {
            token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        })
    }
}

async fn gcloud(args: &[&str]) -> CloudqlResult<String> {
    let output = tokio::process::Command::new("gcloud")
        .args(args)
        .output()
        .await
        .map_err(|e| CloudqlError::Auth(format!("could not run gcloud: {}", e)))?;
    if !output.status.success() {
        return Err(CloudqlError::Auth(format!(
            "gcloud {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl Authenticator for GoogleAuthenticator {
    async fn access_token(&self, ctx: &AuthCtx) -> CloudqlResult<AccessToken> {
        let cache_key = ctx.cache_key();
        if let Some(cached) = self.tokens.get(&cache_key) {
            if cached.is_fresh() {
                return Ok(cached.clone());
            }
        }

        let token = match ctx.infer_auth_type(&ctx.auth_type) {
            AUTH_SERVICE_ACCOUNT => self.service_account_token(ctx).await?,
            _ => {
                let token = gcloud(&["auth", "print-access-token"]).await?;
                if token.is_empty() {
                    return Err(CloudqlError::Auth(
                        "not authenticated; run 'gcloud auth login' or configure a key file"
                            .to_string(),
                    ));
                }
                AccessToken {
                    token,
                    expires_at: Utc::now() + ChronoDuration::minutes(30),
                }
            }
        };
        self.tokens.insert(cache_key, token.clone());
        Ok(token)
    }

    async fn principal(&self, ctx: &AuthCtx) -> CloudqlResult<String> {
        match ctx.infer_auth_type(&ctx.auth_type) {
            AUTH_SERVICE_ACCOUNT => Ok(read_key_file(ctx.key_file_path.as_deref())?.client_email),
            _ => {
                let account = gcloud(&["config", "get-value", "account"]).await?;
                if account.is_empty() {
                    return Err(CloudqlError::Auth("not authenticated".to_string()));
                }
                Ok(account)
            }
        }
    }

    async fn revoke(&self, ctx: &AuthCtx) -> CloudqlResult<()> {
        match ctx.auth_type.to_ascii_lowercase().as_str() {
            AUTH_SERVICE_ACCOUNT => Err(CloudqlError::Auth(
                "service account credentials cannot be revoked; remove the key file instead"
                    .to_string(),
            )),
            AUTH_INTERACTIVE => {
                gcloud(&["auth", "revoke"]).await?;
                self.tokens.remove(&ctx.cache_key());
                Ok(())
            }
            other => Err(CloudqlError::Auth(format!(
                "Auth revoke for Google failed; improper auth method: \"{}\" specified",
                other
            ))),
        }
    }
}

/// Fixed credentials, for tests and offline use.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    token: String,
    principal: String,
}

impl StaticAuthenticator {
    pub fn new(token: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            principal: principal.into(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn access_token(&self, _ctx: &AuthCtx) -> CloudqlResult<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }

    async fn principal(&self, _ctx: &AuthCtx) -> CloudqlResult<String> {
        Ok(self.principal.clone())
    }

    async fn revoke(&self, ctx: &AuthCtx) -> CloudqlResult<()> {
        if ctx.auth_type == AUTH_SERVICE_ACCOUNT {
            return Err(CloudqlError::Auth(
                "service account credentials cannot be revoked; remove the key file instead"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    fn key_file() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/service_account.json")
    }

    #[test]
    fn test_infer_auth_type() {
        let interactive = AuthCtx::new(vec![], None);
        assert_eq!(interactive.auth_type, AUTH_INTERACTIVE);
        assert_eq!(interactive.infer_auth_type(""), AUTH_INTERACTIVE);
        assert_eq!(interactive.infer_auth_type("ServiceAccount"), AUTH_SERVICE_ACCOUNT);

        let sa = AuthCtx::new(vec![], Some(key_file()));
        assert_eq!(sa.infer_auth_type(""), AUTH_SERVICE_ACCOUNT);
        assert_eq!(sa.effective_scopes(), vec![DEFAULT_SCOPE.to_string()]);
    }

    #[test]
    fn test_activate_keeps_existing_principal() {
        let mut ctx = AuthCtx::new(vec![], None);
        ctx.activate("me@example.com", AUTH_INTERACTIVE);
        ctx.activate("", AUTH_INTERACTIVE);
        assert!(ctx.active);
        assert_eq!(ctx.id, "me@example.com");
        ctx.deactivate();
        assert!(!ctx.active);
    }

    #[tokio::test]
    async fn test_service_account_exchange_is_cached() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "POST",
            "https://oauth2.googleapis.com/token",
            200,
            json!({"access_token": "ya29.test", "expires_in": 3600, "token_type": "Bearer"}),
        );
        let auth = GoogleAuthenticator::new(transport.clone());
        let ctx = AuthCtx::new(vec![], Some(key_file()));

        let token = auth.access_token(&ctx).await.unwrap();
        assert_eq!(token.token, "ya29.test");
        auth.access_token(&ctx).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        let form = String::from_utf8(sent[0].body.clone().unwrap()).unwrap();
        assert!(form.starts_with("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion="));

        assert_eq!(
            auth.principal(&ctx).await.unwrap(),
            "cloudql-test@testing-project.iam.gserviceaccount.com"
        );
        assert!(auth.revoke(&ctx).await.is_err());
    }
}
