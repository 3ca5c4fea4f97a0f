use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AuthError, AuthMethod, Identity};
use crate::config::TwilioConfig;
use crate::time::Timestamp;

const TWILIO_API_URL: &str = "https://api.twilio.com";
pub const CODE_TTL: Duration = Duration::from_secs(5 * 60);
pub const MAX_ATTEMPTS: u32 = 3;
/// Codes that may be requested for one number before its entry expires.
pub const MAX_SENDS: u32 = 3;

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), AuthError>;
}

/// Twilio's Messages API.
pub struct Twilio {
    client: Client,
    config: TwilioConfig,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    message: String,
}

impl Twilio {
    pub fn new(config: TwilioConfig) -> Result<Self, reqwest::Error> {
        Self::with_api_url(config, TWILIO_API_URL)
    }

    pub fn with_api_url(config: TwilioConfig, api_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            config,
            api_url: api_url.trim_end_matches('/').into(),
        })
    }
}

#[async_trait]
impl SmsSender for Twilio {
    async fn send(&self, to: &str, body: &str) -> Result<(), AuthError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_url, self.config.account_sid
        );

        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("twilio request failed: {e}");
                AuthError::SmsFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<TwilioError>()
                .await
                .map(|e| e.message)
                .unwrap_or_default();
            error!("twilio refused message to {to}: {status} {message}");
            return Err(AuthError::SmsFailed(format!("{status} {message}")));
        }

        debug!("sms sent to {to}");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them. Only for demos.
pub struct LogSms;

#[async_trait]
impl SmsSender for LogSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), AuthError> {
        warn!("demo sms to {to}: {body}");
        Ok(())
    }
}

/// Accepts "+44 7700 900-123" style input, returns "+447700900123".
pub fn normalize_phone(raw: &str) -> Result<String, AuthError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    let digits = compact.strip_prefix('+').ok_or(AuthError::InvalidPhone)?;

    if (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(compact)
    } else {
        Err(AuthError::InvalidPhone)
    }
}

struct Pending {
    /// Empty until the first code has gone out.
    digest: String,
    expires: Timestamp,
    failed: u32,
    sends: u32,
}

/// Server-side one-time codes sent by SMS.
///
/// Only a digest of each code is held. A number has at most one live code;
/// requesting another replaces it but keeps the count of wrong guesses, and
/// each send pushes the entry's expiry back. Once locked by wrong guesses or
/// too many sends, a number stays locked until its entry expires.
pub struct PhoneAuth {
    sender: Arc<dyn SmsSender>,
    pending: Mutex<HashMap<String, Pending>>,
    ttl: Duration,
}

fn new_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn now() -> Timestamp {
    Timestamp::now().unwrap_or_default()
}

impl PhoneAuth {
    pub fn new(sender: Arc<dyn SmsSender>) -> Self {
        Self::with_ttl(sender, CODE_TTL)
    }

    pub fn with_ttl(sender: Arc<dyn SmsSender>, ttl: Duration) -> Self {
        Self {
            sender,
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn send_code(&self, phone: &str) -> Result<(), AuthError> {
        let phone = normalize_phone(phone)?;

        {
            let now = now();
            let mut pending = self.pending.lock().await;
            pending.retain(|_, p| !p.expires.has_passed(now));

            let entry = pending.entry(phone.clone()).or_insert_with(|| Pending {
                digest: String::new(),
                expires: now.after(self.ttl),
                failed: 0,
                sends: 0,
            });
            if entry.failed >= MAX_ATTEMPTS {
                info!("refusing code for {phone}: locked by wrong guesses");
                return Err(AuthError::TooManyAttempts);
            }
            if entry.sends >= MAX_SENDS {
                warn!("refusing code for {phone}: {MAX_SENDS} already sent");
                return Err(AuthError::TooManySends);
            }
            entry.sends += 1;
        }

        let code = new_code();
        self.sender
            .send(
                &phone,
                &format!("Your fairweather verification code is {code}"),
            )
            .await?;

        let now = now();
        let digest = sha256::digest(code.as_str());
        let mut pending = self.pending.lock().await;
        let entry = pending.entry(phone.clone()).or_insert_with(|| Pending {
            digest: String::new(),
            expires: now,
            failed: 0,
            sends: 1,
        });
        entry.digest = digest;
        entry.expires = now.after(self.ttl);

        info!("verification code sent to {phone}");
        Ok(())
    }

    pub async fn verify_code(&self, phone: &str, code: &str) -> Result<Identity, AuthError> {
        let phone = normalize_phone(phone)?;
        let mut pending = self.pending.lock().await;

        let entry = pending.get_mut(&phone).ok_or(AuthError::NoCode)?;

        if entry.expires.has_passed(now()) {
            pending.remove(&phone);
            info!("code for {phone} expired");
            return Err(AuthError::Expired);
        }
        if entry.failed >= MAX_ATTEMPTS {
            return Err(AuthError::TooManyAttempts);
        }
        if entry.digest.is_empty() {
            return Err(AuthError::NoCode);
        }

        if entry.digest != sha256::digest(code.trim()) {
            entry.failed += 1;
            if entry.failed >= MAX_ATTEMPTS {
                warn!("too many wrong codes for {phone}");
                return Err(AuthError::TooManyAttempts);
            }
            info!("wrong code for {phone} ({} of {MAX_ATTEMPTS})", entry.failed);
            return Err(AuthError::WrongCode);
        }

        pending.remove(&phone);
        info!("{phone} verified");

        Ok(Identity {
            id: format!("phone:{phone}"),
            email: None,
            name: Some(phone),
            picture: None,
            method: AuthMethod::Phone,
        })
    }
}
