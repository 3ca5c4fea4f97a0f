use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Deserialize;

use super::{AuthError, AuthMethod, Credential, Identity, IdentityVerifier};
use crate::config::GoogleConfig;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_API_URL: &str = "https://oauth2.googleapis.com";
const SCOPES: &str = "openid email profile";

/// Google sign-in: the authorization-code redirect flow, and ID tokens
/// posted by the Google Identity Services button.
pub struct Google {
    client: Client,
    config: GoogleConfig,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Claims as echoed back by the tokeninfo endpoint.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

impl Google {
    pub fn new(config: GoogleConfig) -> Result<Self, reqwest::Error> {
        Self::with_api_url(config, GOOGLE_API_URL)
    }

    pub fn with_api_url(config: GoogleConfig, api_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            config,
            api_url: api_url.trim_end_matches('/').into(),
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let (Some(secret), Some(redirect_uri)) = (
            self.config.client_secret.as_deref(),
            self.config.redirect_uri.as_deref(),
        ) else {
            return Err(AuthError::NotConfigured("Google redirect"));
        };

        let response = self
            .client
            .post(format!("{}/token", self.api_url))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", secret),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("google token exchange failed: {e}");
                AuthError::Network(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("google refused authorization code: {status} {text}");
            return Err(AuthError::Rejected(format!("token exchange: {status}")));
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| {
            error!("couldn't parse google token response: {e}");
            AuthError::Parse(e.to_string())
        })?;

        tokens
            .id_token
            .ok_or_else(|| AuthError::Parse("token response without id_token".into()))
    }

    async fn check_id_token(&self, id_token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .get(format!("{}/tokeninfo", self.api_url))
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("google tokeninfo request failed: {e}");
                AuthError::Network(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            info!("google rejected id token: {status}");
            return Err(AuthError::Rejected(format!("tokeninfo: {status}")));
        }

        let info: TokenInfo = response.json().await.map_err(|e| {
            error!("couldn't parse google tokeninfo: {e}");
            AuthError::Parse(e.to_string())
        })?;

        if info.aud != self.config.client_id {
            warn!("google id token for {} has audience {}", info.sub, info.aud);
            return Err(AuthError::AudienceMismatch);
        }

        debug!("google id token accepted for {}", info.sub);

        Ok(Identity {
            id: info.sub,
            email: info.email,
            name: info.name,
            picture: info.picture,
            method: AuthMethod::Google,
        })
    }
}

#[async_trait]
impl IdentityVerifier for Google {
    async fn verify(&self, credential: Credential) -> Result<Identity, AuthError> {
        let id_token = match credential {
            Credential::IdToken(token) => token,
            Credential::AuthorizationCode(code) => self.exchange_code(&code).await?,
        };

        self.check_id_token(&id_token).await
    }

    fn authorization_url(&self, state: &str) -> Option<String> {
        let redirect_uri = self.config.redirect_uri.as_deref()?;

        Some(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&prompt=select_account",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
        ))
    }
}
