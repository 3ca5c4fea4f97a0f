use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{AuthError, AuthMethod, Credential, Identity, IdentityVerifier};
use crate::config::FirebaseConfig;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// ID tokens minted by the Firebase client SDK, e.g. after phone sign-in in
/// the browser.
pub struct Firebase {
    client: Client,
    config: FirebaseConfig,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    aud: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<Account>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    phone_number: Option<String>,
}

/// Reads the payload of a JWT. The signature is not checked here.
fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let reject = |why: &str| AuthError::Rejected(format!("malformed token: {why}"));

    let segments: Vec<&str> = token.split('.').collect();
    let [_header, payload, _signature] = segments.as_slice() else {
        return Err(reject("expected three segments"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| {
            debug!("couldn't decode token payload: {e}");
            reject("payload isn't base64url")
        })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        debug!("couldn't parse token claims: {e}");
        reject("payload isn't json")
    })
}

impl Firebase {
    pub fn new(config: FirebaseConfig) -> Result<Self, reqwest::Error> {
        Self::with_api_url(config, IDENTITY_TOOLKIT_URL)
    }

    pub fn with_api_url(config: FirebaseConfig, api_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            config,
            api_url: api_url.trim_end_matches('/').into(),
        })
    }

    async fn lookup(&self, id_token: &str) -> Result<Account, AuthError> {
        let response = self
            .client
            .post(format!("{}/accounts:lookup", self.api_url))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&json!({ "idToken": id_token }))
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("firebase lookup failed: {e}");
                AuthError::Network(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            info!("firebase rejected id token: {status}");
            return Err(AuthError::Rejected(format!("accounts:lookup: {status}")));
        }

        let found: LookupResponse = response.json().await.map_err(|e| {
            error!("couldn't parse firebase lookup: {e}");
            AuthError::Parse(e.to_string())
        })?;

        found
            .users
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::Rejected("no account for token".into()))
    }
}

#[async_trait]
impl IdentityVerifier for Firebase {
    async fn verify(&self, credential: Credential) -> Result<Identity, AuthError> {
        let Credential::IdToken(id_token) = credential else {
            return Err(AuthError::Rejected("firebase only accepts id tokens".into()));
        };

        let claims = decode_claims(&id_token)?;
        if claims.aud != self.config.project_id {
            warn!("firebase token for project {} rejected", claims.aud);
            return Err(AuthError::AudienceMismatch);
        }

        let account = self.lookup(&id_token).await?;
        debug!("firebase token accepted for {}", account.local_id);

        let method = match (&account.phone_number, &account.email) {
            (Some(_), None) => AuthMethod::Phone,
            _ => AuthMethod::Firebase,
        };

        Ok(Identity {
            id: account.local_id,
            email: account.email,
            name: account.display_name.or(account.phone_number),
            picture: account.photo_url,
            method,
        })
    }
}
