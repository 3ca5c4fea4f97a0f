//! Sign-in, delegated to third parties.
//!
//! Nothing here checks a signature: Google's and Firebase's hosted endpoints
//! decide whether a token is genuine, and we only compare its audience to
//! our own configuration before trusting the fields they hand back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod firebase;
pub use firebase::Firebase;

mod google;
pub use google::Google;

mod phone;
pub use phone::{LogSms, PhoneAuth, SmsSender, Twilio};
#[cfg(test)]
pub use phone::test::Outbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Google,
    Firebase,
    Phone,
}

/// Who the provider says the user is. Fields are copied from the provider
/// without interpretation.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub method: AuthMethod,
}

pub enum Credential {
    IdToken(String),
    AuthorizationCode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0} sign-in is not configured")]
    NotConfigured(&'static str),
    #[error("Sign-in was rejected")]
    Rejected(String),
    #[error("Sign-in token was issued for a different application")]
    AudienceMismatch,
    #[error("Could not reach the sign-in provider")]
    Network(#[source] reqwest::Error),
    #[error("Unexpected response from the sign-in provider")]
    Parse(String),

    #[error("Please enter a phone number in international format, e.g. +15551234567")]
    InvalidPhone,
    #[error("No code was requested for this number")]
    NoCode,
    #[error("The code has expired, please request a new one")]
    Expired,
    #[error("Too many attempts, please try again later")]
    TooManyAttempts,
    #[error("Too many codes requested, please try again later")]
    TooManySends,
    #[error("Incorrect code")]
    WrongCode,
    #[error("Could not send the code")]
    SmsFailed(String),
}

impl AuthError {
    /// Whether the user (rather than a provider or our configuration) is at fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            Self::NotConfigured(_) | Self::Network(_) | Self::Parse(_) | Self::SmsFailed(_)
        )
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: Credential) -> Result<Identity, AuthError>;

    /// Where to send the browser to start a redirect-based sign-in, if the
    /// provider supports one.
    fn authorization_url(&self, _state: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_json_skips_missing_fields() {
        let who = Identity {
            id: "phone:+447700900123".into(),
            email: None,
            name: Some("+447700900123".into()),
            picture: None,
            method: AuthMethod::Phone,
        };

        let json = serde_json::to_value(&who).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "phone:+447700900123",
                "name": "+447700900123",
                "method": "phone",
            })
        );
    }
}
