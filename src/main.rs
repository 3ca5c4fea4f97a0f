use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use warp::Filter;

mod app;
mod args;
mod auth;
mod config;
mod location;
mod render;
mod routes;
mod session;
mod time;
mod weather;

use app::App;
use args::Args;
use auth::{Firebase, Google, LogSms, PhoneAuth, SmsSender, Twilio};
use config::{Config, SmsConfig};
use render::Templates;
use session::MemoryStore;
use weather::WeatherApi;

fn fail(what: &str, e: impl std::fmt::Display) -> ! {
    error!("{what}: {e}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // a missing .env is fine
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let args = Args::parse();
    let config = Config::from_args(&args);

    let addr = args.addr().unwrap_or_else(|e| fail("invalid address", e));

    let weather = WeatherApi::new(
        &args.weather_api_url,
        args.weather_api_key.clone(),
        args.forecast_days,
    )
    .unwrap_or_else(|e| fail("couldn't create weather client", e));
    let templates = Templates::new().unwrap_or_else(|e| fail("couldn't load templates", e));

    let mut app = App::new(
        Arc::new(weather),
        Arc::new(MemoryStore::new(args.session_ttl())),
        templates,
    );

    if let Some(google) = config.google {
        let client_id = google.client_id.clone();
        let redirect = google.client_secret.is_some() && google.redirect_uri.is_some();
        let verifier = Google::new(google).unwrap_or_else(|e| fail("couldn't create google client", e));

        app = app.with_google(Arc::new(verifier), client_id, redirect);
        info!("google sign-in enabled{}", if redirect { " (with redirect)" } else { "" });
    }

    if let Some(firebase) = config.firebase {
        let verifier = Firebase::new(firebase.clone())
            .unwrap_or_else(|e| fail("couldn't create firebase client", e));

        app = app.with_firebase(Arc::new(verifier), &firebase);
        info!("firebase sign-in enabled for {}", firebase.project_id);
    }

    if let Some(sms) = config.sms {
        let sender: Arc<dyn SmsSender> = match sms {
            SmsConfig::Twilio(twilio) => {
                Arc::new(Twilio::new(twilio).unwrap_or_else(|e| fail("couldn't create twilio client", e)))
            }
            SmsConfig::Demo => Arc::new(LogSms),
        };

        app = app.with_phone(PhoneAuth::new(sender));
        info!("phone sign-in enabled");
    }

    let routes = routes::routes(Arc::new(app), args.secure()).with(warp::log("fairweather"));

    info!("listening on {addr}");
    warp::serve(routes).run(addr).await;
}
