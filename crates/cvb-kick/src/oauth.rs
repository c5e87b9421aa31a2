//! Kick OAuth 2.1: authorization URL with PKCE (S256), code exchange and
//! refresh grants against `id.kick.com`.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cvb_core::{domain::TokenGrant, errors::Error, ports::AuthService, Result};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{http_client, snippet};

pub const DEFAULT_SCOPES: &[&str] = &["user:read", "channel:read", "events:subscribe", "chat:write"];

#[derive(Clone, Debug)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_base: String,
    pub scopes: Vec<String>,
}

impl OAuthSettings {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        auth_base: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            auth_base: auth_base.into().trim_end_matches('/').to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        Self::from_verifier(random_token(32))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Unguessable value for the OAuth `state` parameter.
pub fn random_state() -> String {
    random_token(16)
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

impl From<TokenResponse> for TokenGrant {
    fn from(r: TokenResponse) -> Self {
        TokenGrant {
            access_token: r.access_token,
            refresh_token: r.refresh_token.filter(|t| !t.is_empty()),
            expires_in: r.expires_in,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KickOAuth {
    settings: OAuthSettings,
    http: reqwest::Client,
}

impl KickOAuth {
    pub fn new(settings: OAuthSettings, timeout: Duration) -> Result<Self> {
        Ok(Self {
            settings,
            http: http_client(timeout)?,
        })
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// URL the broadcaster is redirected to in order to grant access.
    pub fn authorization_url(&self, state: &str, pkce: &PkcePair) -> Result<String> {
        let scope = self.settings.scopes.join(" ");
        let url = reqwest::Url::parse_with_params(
            &format!("{}/oauth/authorize", self.settings.auth_base),
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid KICK_AUTH_BASE: {e}")))?;
        Ok(url.into())
    }

    /// Trade an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenGrant> {
        let grant = self
            .token_request(
                "authorization_code",
                &[
                    ("grant_type", "authorization_code"),
                    ("client_id", self.settings.client_id.as_str()),
                    ("client_secret", self.settings.client_secret.as_str()),
                    ("redirect_uri", self.settings.redirect_uri.as_str()),
                    ("code_verifier", code_verifier),
                    ("code", code),
                ],
            )
            .await?;
        info!(expires_in = grant.expires_in, "authorization code exchanged");
        Ok(grant)
    }

    async fn token_request(&self, grant: &str, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let resp = self
            .http
            .post(format!("{}/oauth/token", self.settings.auth_base))
            .form(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("kick token request error: {e}")))?;

        let status = resp.status();
        debug!(grant, status = status.as_u16(), "token endpoint response");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "kick {grant} grant failed: {status} {}",
                snippet(&body)
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("kick token json error: {e}")))?;
        Ok(token.into())
    }
}

#[async_trait]
impl AuthService for KickOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}
