use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;

/// Every option can also come from the environment (or a `.env` file).
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Whether clients connect over https.
    /// If so, the sessionid cookie is sent as a secure cookie.
    #[arg(short, long, env = "FAIRWEATHER_SECURE")]
    secure: bool,

    /// The address to listen on. By default just the IPv4 loopback.
    #[arg(short, long, env = "FAIRWEATHER_ADDRESS")]
    address: Option<String>,

    /// The port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 10000)]
    port: u16,

    /// weatherapi.com key. Required.
    #[arg(long, env = "WEATHER_API_KEY", hide_env_values = true)]
    pub weather_api_key: String,

    #[arg(long, env = "WEATHER_API_URL", default_value = "https://api.weatherapi.com/v1")]
    pub weather_api_url: String,

    /// Days of forecast to request.
    #[arg(long, env = "FORECAST_DAYS", default_value_t = 3)]
    pub forecast_days: u8,

    /// Seconds a session survives without requests.
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = 24 * 60 * 60)]
    session_ttl: u64,

    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,
    /// Must match a redirect URI registered with Google, e.g.
    /// https://example.com/auth/google/callback
    #[arg(long, env = "GOOGLE_REDIRECT_URI")]
    pub google_redirect_uri: Option<String>,

    #[arg(long, env = "FIREBASE_API_KEY", hide_env_values = true)]
    pub firebase_api_key: Option<String>,
    #[arg(long, env = "FIREBASE_PROJECT_ID")]
    pub firebase_project_id: Option<String>,
    #[arg(long, env = "FIREBASE_AUTH_DOMAIN")]
    pub firebase_auth_domain: Option<String>,

    #[arg(long, env = "TWILIO_ACCOUNT_SID")]
    pub twilio_account_sid: Option<String>,
    #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
    pub twilio_auth_token: Option<String>,
    #[arg(long, env = "TWILIO_PHONE_NUMBER")]
    pub twilio_phone_number: Option<String>,

    /// Log one-time codes instead of texting them, when Twilio isn't set up.
    #[arg(long, env = "PHONE_DEMO")]
    pub phone_demo: bool,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }
}

#[cfg(test)]
impl Args {
    /// Defaults plus a weather key, without reading argv or the environment.
    pub fn with_weather_key(key: &str) -> Self {
        Self {
            secure: false,
            address: None,
            port: 10000,
            weather_api_key: key.into(),
            weather_api_url: "https://api.weatherapi.com/v1".into(),
            forecast_days: 3,
            session_ttl: 24 * 60 * 60,
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            firebase_api_key: None,
            firebase_project_id: None,
            firebase_auth_domain: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_phone_number: None,
            phone_demo: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// These tests are the only ones that read the environment.
    fn clear_env() {
        for var in ["WEATHER_API_KEY", "PORT", "FAIRWEATHER_ADDRESS", "FAIRWEATHER_SECURE"] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn weather_key_is_required() {
        clear_env();

        assert!(Args::try_parse_from(["fairweather"]).is_err());
    }

    #[test]
    fn defaults() {
        clear_env();

        let args = Args::try_parse_from(["fairweather", "--weather-api-key", "k"]).unwrap();

        assert_eq!(args.addr().unwrap(), "127.0.0.1:10000".parse().unwrap());
        assert_eq!(args.weather_api_key, "k");
        assert!(!args.secure());
        assert_eq!(args.session_ttl(), Duration::from_secs(86400));
    }

    #[test]
    fn address_and_port() {
        let args = Args::try_parse_from([
            "fairweather",
            "--weather-api-key",
            "k",
            "-a",
            "0.0.0.0",
            "-p",
            "8080",
        ])
        .unwrap();

        assert_eq!(args.addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
    }
}
