use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::Client;
use serde::Deserialize;

use super::{Category, FetchError, WeatherReport, WeatherSource};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// weatherapi.com forecast client.
#[derive(Debug, Clone)]
pub struct WeatherApi {
    client: Client,
    base_url: String,
    key: String,
    days: u8,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: ApiLocation,
    current: ApiCurrent,
    #[serde(default)]
    forecast: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    name: String,
    country: String,
    #[serde(default)]
    tz_id: String,
    #[serde(default)]
    localtime: String,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    temp_c: f64,
    condition: ApiCondition,
    humidity: u32,
    wind_kph: f64,
    feelslike_c: f64,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl WeatherApi {
    pub fn new(base_url: &str, key: String, days: u8) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
            key,
            days,
        })
    }
}

impl From<ForecastResponse> for WeatherReport {
    fn from(resp: ForecastResponse) -> Self {
        let ForecastResponse {
            location,
            current,
            forecast,
        } = resp;

        Self {
            location: format!("{}, {}", location.name, location.country),
            temp_c: current.temp_c,
            category: Category::from_condition(&current.condition.text),
            condition: current.condition.text,
            humidity: current.humidity,
            wind_kph: current.wind_kph,
            feels_like_c: current.feelslike_c,
            forecast,
            tz_id: location.tz_id,
            local_time: location.localtime,
        }
    }
}

#[async_trait]
impl WeatherSource for WeatherApi {
    async fn current(&self, city: &str) -> Result<WeatherReport, FetchError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(FetchError::NoCity);
        }

        debug!("fetching forecast for \"{city}\"");

        let days = self.days.to_string();
        let response = self
            .client
            .get(format!("{}/forecast.json", self.base_url))
            .query(&[
                ("key", self.key.as_str()),
                ("q", city),
                ("days", &days),
                ("aqi", "no"),
                ("alerts", "no"),
            ])
            .send()
            .await
            .map_err(|e| {
                // the url carries the api key
                let e = e.without_url();
                error!("weather request for \"{city}\" failed: {e}");
                FetchError::Network(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            let e = e.without_url();
            error!("reading weather response for \"{city}\": {e}");
            FetchError::Network(e)
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("Something went wrong (HTTP {})", status.as_u16()));

            info!("weather service refused \"{city}\": {status}, {message}");
            return Err(FetchError::Api(message));
        }

        let parsed: ForecastResponse = serde_json::from_str(&body).map_err(|e| {
            error!("couldn't parse forecast for \"{city}\": {e}");
            FetchError::Parse(e.to_string())
        })?;

        Ok(parsed.into())
    }
}
