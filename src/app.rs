use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use warp::http;

use crate::auth::{AuthError, Credential, Identity, IdentityVerifier, PhoneAuth};
use crate::config::FirebaseConfig;
use crate::location::{Location, RenameError, Saved};
use crate::render::Templates;
use crate::session::{Session, SessionId, SessionStore};
use crate::weather::{WeatherReport, WeatherSource};

pub struct App {
    weather: Arc<dyn WeatherSource>,
    sessions: Arc<dyn SessionStore>,
    google: Option<Arc<dyn IdentityVerifier>>,
    firebase: Option<Arc<dyn IdentityVerifier>>,
    phone: Option<PhoneAuth>,
    sign_in: SignInOptions,
    templates: Templates,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Something went wrong")]
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<&Error> for http::StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::BadRequest(_) => http::StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => http::StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => http::StatusCode::NOT_FOUND,
            Error::Unavailable(_) => http::StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_) => http::StatusCode::BAD_GATEWAY,
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        let message = e.to_string();
        match e {
            AuthError::InvalidPhone => Self::BadRequest(message),
            AuthError::NotConfigured(_) => Self::Unavailable(message),
            AuthError::Network(_) | AuthError::Parse(_) | AuthError::SmsFailed(_) => {
                Self::Upstream(message)
            }
            _ => Self::Unauthorized(message),
        }
    }
}

/// What the sign-in page may offer. Everything here is public: the Google
/// client id and Firebase web key are meant to be embedded in pages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignInOptions {
    pub google_client_id: Option<String>,
    pub google_redirect: bool,
    pub firebase: Option<FirebaseWeb>,
    pub phone_codes: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirebaseWeb {
    pub api_key: String,
    pub project_id: String,
    pub auth_domain: String,
}

impl SignInOptions {
    pub fn any(&self) -> bool {
        self.google_client_id.is_some() || self.firebase.is_some() || self.phone_codes
    }
}

/// One request's view of its session. Loaded before the handler runs and
/// written back (or destroyed) after it.
pub struct Visit {
    pub id: SessionId,
    pub session: Session,
    fresh: bool,
    ended: bool,
    /// Who the session belonged to when it was loaded.
    loaded_as: Option<String>,
}

impl Visit {
    pub fn end(&mut self) {
        self.ended = true;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CookieUpdate {
    Keep,
    Set(SessionId),
    Clear,
}

#[derive(Debug, Default, Deserialize)]
pub struct CitySubmission {
    #[serde(default)]
    pub city: String,
    /// Checkbox: present when ticked.
    pub save: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Page {
    pub city: String,
    pub weather: Option<WeatherReport>,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub favorites: Vec<Location>,
    pub user: Option<Identity>,
    pub sign_in_available: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteRequest {
    pub city: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EditRequest {
    pub city: String,
    #[serde(alias = "name")]
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub credential: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PhoneSendRequest {
    pub phone: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PhoneVerifyRequest {
    pub phone: Option<String>,
    pub code: Option<String>,
    /// From the Firebase client SDK, instead of a server-side code.
    pub id_token: Option<String>,
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::BadRequest(format!("{what} is required")))
    } else {
        Ok(value)
    }
}

impl App {
    pub fn new(
        weather: Arc<dyn WeatherSource>,
        sessions: Arc<dyn SessionStore>,
        templates: Templates,
    ) -> Self {
        Self {
            weather,
            sessions,
            google: None,
            firebase: None,
            phone: None,
            sign_in: SignInOptions::default(),
            templates,
        }
    }

    pub fn with_google(
        mut self,
        verifier: Arc<dyn IdentityVerifier>,
        client_id: String,
        redirect: bool,
    ) -> Self {
        self.google = Some(verifier);
        self.sign_in.google_client_id = Some(client_id);
        self.sign_in.google_redirect = redirect;
        self
    }

    pub fn with_firebase(mut self, verifier: Arc<dyn IdentityVerifier>, config: &FirebaseConfig) -> Self {
        self.firebase = Some(verifier);
        self.sign_in.firebase = Some(FirebaseWeb {
            api_key: config.api_key.clone(),
            project_id: config.project_id.clone(),
            auth_domain: config
                .auth_domain
                .clone()
                .unwrap_or_else(|| format!("{}.firebaseapp.com", config.project_id)),
        });
        self
    }

    pub fn with_phone(mut self, phone: PhoneAuth) -> Self {
        self.phone = Some(phone);
        self.sign_in.phone_codes = true;
        self
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    pub fn sign_in_options(&self) -> &SignInOptions {
        &self.sign_in
    }

    fn google(&self) -> Result<&dyn IdentityVerifier> {
        self.google
            .as_deref()
            .ok_or_else(|| Error::Unavailable("Google sign-in is not configured".into()))
    }

    fn firebase(&self) -> Result<&dyn IdentityVerifier> {
        self.firebase
            .as_deref()
            .ok_or_else(|| Error::Unavailable("Firebase sign-in is not configured".into()))
    }

    fn phone(&self) -> Result<&PhoneAuth> {
        self.phone
            .as_ref()
            .ok_or_else(|| Error::Unavailable("Phone sign-in is not configured".into()))
    }
}

impl App {
    pub async fn begin(&self, cookie: Option<&str>) -> Visit {
        if let Some(cookie) = cookie {
            match cookie.parse::<SessionId>() {
                Ok(id) => match self.sessions.load(&id).await {
                    Some(session) => {
                        return Visit {
                            id,
                            loaded_as: session.identity().map(|who| who.id.clone()),
                            session,
                            fresh: false,
                            ended: false,
                        }
                    }
                    None => debug!("session {id} unknown or expired, starting afresh"),
                },
                Err(()) => warn!("ignoring malformed session cookie"),
            }
        }

        let id = SessionId::new();
        debug!("new session {id}");
        Visit {
            id,
            session: Session::default(),
            fresh: true,
            ended: false,
            loaded_as: None,
        }
    }

    pub async fn finish(&self, visit: Visit) -> CookieUpdate {
        let Visit {
            id,
            session,
            fresh,
            ended,
            loaded_as,
        } = visit;

        if ended {
            self.sessions.remove(&id).await;
            return CookieUpdate::Clear;
        }

        // a change of identity gets a new id, so an id known before sign-in
        // never grants the signed-in session
        let now_as = session.identity().map(|who| who.id.as_str());
        if !fresh && now_as != loaded_as.as_deref() {
            self.sessions.remove(&id).await;
            let rotated = SessionId::new();
            debug!("session {id} replaced by {rotated} on sign-in");
            self.sessions.save(rotated, session).await;
            return CookieUpdate::Set(rotated);
        }

        self.sessions.save(id, session).await;

        if fresh {
            CookieUpdate::Set(id)
        } else {
            CookieUpdate::Keep
        }
    }
}

impl App {
    pub fn page(&self, session: &Session) -> Page {
        Page {
            favorites: session.favorites().iter().cloned().collect(),
            user: session.identity().cloned(),
            sign_in_available: self.sign_in.any(),
            ..Default::default()
        }
    }

    pub async fn index(&self, session: &mut Session, submission: Option<CitySubmission>) -> Page {
        let Some(submission) = submission else {
            return self.page(session);
        };

        let city = submission.city.trim().to_string();

        let (weather, error, notice) = match self.weather.current(&city).await {
            Ok(report) => {
                let notice = submission.save.is_some().then(|| {
                    let label = submission
                        .display_name
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .unwrap_or(&report.location);

                    let saved = session
                        .favorites_mut()
                        .add_or_update(&city, label, report.temp_c);
                    info!("{:?} favourite \"{label}\" ({city})", saved);

                    match saved {
                        Saved::Added => format!("Saved {label}"),
                        Saved::Updated => format!("Updated {label}"),
                    }
                });
                (Some(report), None, notice)
            }
            Err(e) => {
                debug!("no weather for \"{city}\": {e}");
                (None, Some(e.to_string()), None)
            }
        };

        Page {
            city,
            weather,
            error,
            notice,
            ..self.page(session)
        }
    }

    pub fn delete_location(&self, session: &mut Session, req: DeleteRequest) -> Result<()> {
        let city = required(&req.city, "City")?;
        let name = required(&req.name, "Name")?;

        match session.favorites_mut().delete(city, name) {
            Some(_) => {
                info!("deleted favourite \"{name}\" ({city})");
                Ok(())
            }
            None => Err(Error::NotFound("Location not found".into())),
        }
    }

    pub fn edit_location(&self, session: &mut Session, req: EditRequest) -> Result<()> {
        let city = required(&req.city, "City")?;
        let old_name = required(&req.old_name, "Name")?;

        session
            .favorites_mut()
            .rename(city, old_name, &req.new_name)
            .map(|()| info!("renamed favourite \"{old_name}\" ({city}) to \"{}\"", req.new_name.trim()))
            .map_err(|e| match e {
                RenameError::NotFound => Error::NotFound(e.to_string()),
                RenameError::EmptyName | RenameError::NameTaken(_) => Error::BadRequest(e.to_string()),
            })
    }
}

impl App {
    fn sign_in(&self, session: &mut Session, identity: Identity) -> Identity {
        info!("{} signed in via {:?}", identity.id, identity.method);
        session.sign_in(identity.clone());
        identity
    }

    /// Starts the redirect flow, returning Google's consent page.
    pub fn google_authorize(&self, session: &mut Session) -> Result<String> {
        let google = self.google()?;
        let state = session.begin_oauth();

        google.authorization_url(&state).ok_or_else(|| {
            Error::Unavailable("Google redirect sign-in is not configured".into())
        })
    }

    pub async fn google_callback(&self, session: &mut Session, query: CallbackQuery) -> Result<Identity> {
        let google = self.google()?;

        if let Some(error) = query.error {
            info!("google sign-in abandoned: {error}");
            session.finish_oauth("");
            return Err(Error::Unauthorized("Google sign-in was cancelled".into()));
        }

        let state = query.state.unwrap_or_default();
        if !session.finish_oauth(&state) {
            warn!("google callback with unexpected state");
            return Err(Error::Unauthorized("Sign-in expired, please try again".into()));
        }

        let code = query
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::BadRequest("Authorization code is required".into()))?;

        let identity = google.verify(Credential::AuthorizationCode(code)).await?;
        Ok(self.sign_in(session, identity))
    }

    pub async fn google_token(&self, session: &mut Session, req: TokenRequest) -> Result<Identity> {
        let google = self.google()?;
        let token = required(&req.credential, "Credential")?;

        let identity = google.verify(Credential::IdToken(token.into())).await?;
        Ok(self.sign_in(session, identity))
    }

    pub async fn phone_send(&self, req: PhoneSendRequest) -> Result<()> {
        let phone = self.phone()?;
        let number = required(&req.phone, "Phone number")?;

        phone.send_code(number).await.map_err(|e| {
            if !e.is_rejection() {
                error!("couldn't send code: {e:?}");
            }
            e.into()
        })
    }

    pub async fn phone_verify(&self, session: &mut Session, req: PhoneVerifyRequest) -> Result<Identity> {
        let identity = match req.id_token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => {
                self.firebase()?
                    .verify(Credential::IdToken(token.into()))
                    .await?
            }
            None => {
                let phone = self.phone()?;
                let number = required(req.phone.as_deref().unwrap_or_default(), "Phone number")?;
                let code = required(req.code.as_deref().unwrap_or_default(), "Code")?;

                phone.verify_code(number, code).await?
            }
        };

        Ok(self.sign_in(session, identity))
    }
}
