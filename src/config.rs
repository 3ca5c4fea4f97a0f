use log::{info, warn};

use crate::args::Args;

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    /// Secret and redirect uri are only needed for the redirect flow; the
    /// sign-in button works with the client id alone.
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub auth_domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub enum SmsConfig {
    Twilio(TwilioConfig),
    /// Codes are logged rather than sent.
    Demo,
}

/// Optional sign-in providers. A provider whose options are missing is
/// switched off rather than stopping the server.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub google: Option<GoogleConfig>,
    pub firebase: Option<FirebaseConfig>,
    pub sms: Option<SmsConfig>,
}

/// All of the named options, or nothing. Logs why a feature is off.
fn complete<const N: usize>(feature: &str, options: [(&str, Option<&String>); N]) -> Option<[String; N]> {
    let missing: Vec<_> = options
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();

    if missing.len() == N {
        info!("{feature} disabled: not configured");
        return None;
    }
    if !missing.is_empty() {
        warn!("{feature} disabled: missing {}", missing.join(", "));
        return None;
    }

    Some(options.map(|(_, v)| v.cloned().unwrap_or_default()))
}

impl Config {
    pub fn from_args(args: &Args) -> Self {
        let google = complete("google sign-in", [("GOOGLE_CLIENT_ID", args.google_client_id.as_ref())])
            .map(|[client_id]| GoogleConfig {
                client_id,
                client_secret: args.google_client_secret.clone(),
                redirect_uri: args.google_redirect_uri.clone(),
            });
        if let Some(ref google) = google {
            if google.client_secret.is_none() || google.redirect_uri.is_none() {
                warn!("google redirect sign-in disabled: GOOGLE_CLIENT_SECRET and GOOGLE_REDIRECT_URI needed");
            }
        }

        let firebase = complete(
            "firebase sign-in",
            [
                ("FIREBASE_API_KEY", args.firebase_api_key.as_ref()),
                ("FIREBASE_PROJECT_ID", args.firebase_project_id.as_ref()),
            ],
        )
        .map(|[api_key, project_id]| FirebaseConfig {
            api_key,
            project_id,
            auth_domain: args.firebase_auth_domain.clone(),
        });

        let twilio = complete(
            "sms codes",
            [
                ("TWILIO_ACCOUNT_SID", args.twilio_account_sid.as_ref()),
                ("TWILIO_AUTH_TOKEN", args.twilio_auth_token.as_ref()),
                ("TWILIO_PHONE_NUMBER", args.twilio_phone_number.as_ref()),
            ],
        )
        .map(|[account_sid, auth_token, from_number]| TwilioConfig {
            account_sid,
            auth_token,
            from_number,
        });

        let sms = match twilio {
            Some(twilio) => Some(SmsConfig::Twilio(twilio)),
            None if args.phone_demo => {
                warn!("PHONE_DEMO set: one-time codes will be written to the log");
                Some(SmsConfig::Demo)
            }
            None => None,
        };

        Self {
            google,
            firebase,
            sms,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args() -> Args {
        Args::with_weather_key("k")
    }

    fn twilio(args: &mut Args) {
        args.twilio_account_sid = Some("AC1".into());
        args.twilio_auth_token = Some("t".into());
        args.twilio_phone_number = Some("+15550000000".into());
    }

    #[test]
    fn nothing_configured() {
        let config = Config::from_args(&args());

        assert!(config.google.is_none());
        assert!(config.firebase.is_none());
        assert!(config.sms.is_none());
    }

    #[test]
    fn partial_twilio_is_disabled() {
        let mut args = args();
        twilio(&mut args);
        args.twilio_phone_number = None;

        assert!(Config::from_args(&args).sms.is_none());
    }

    #[test]
    fn complete_providers() {
        let mut args = args();
        args.google_client_id = Some("cid".into());
        args.firebase_api_key = Some("fk".into());
        args.firebase_project_id = Some("proj".into());
        twilio(&mut args);

        let config = Config::from_args(&args);

        let google = config.google.unwrap();
        assert_eq!(google.client_id, "cid");
        assert_eq!(google.client_secret, None);
        assert_eq!(config.firebase.unwrap().project_id, "proj");
        assert!(matches!(config.sms, Some(SmsConfig::Twilio(ref t)) if t.from_number == "+15550000000"));
    }

    #[test]
    fn firebase_needs_project() {
        let mut args = args();
        args.firebase_api_key = Some("fk".into());

        assert!(Config::from_args(&args).firebase.is_none());
    }

    #[test]
    fn demo_sms_only_without_twilio() {
        let mut args = args();
        args.phone_demo = true;
        assert!(matches!(Config::from_args(&args).sms, Some(SmsConfig::Demo)));

        twilio(&mut args);
        assert!(matches!(Config::from_args(&args).sms, Some(SmsConfig::Twilio(_))));
    }

    #[test]
    fn complete_reports_all_or_nothing() {
        let a = String::from("a");
        let b = String::from("b");

        assert_eq!(complete("x", [("A", Some(&a)), ("B", Some(&b))]), Some(["a".into(), "b".into()]));
        assert_eq!(complete("x", [("A", Some(&a)), ("B", None)]), None);
        assert_eq!(complete::<2>("x", [("A", None), ("B", None)]), None);
    }
}
