use async_trait::async_trait;
use serde::Serialize;

mod category;
pub use category::Category;

mod client;
pub use client::WeatherApi;

/// Current conditions for a city, reshaped for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    /// "<name>, <country>"
    pub location: String,
    pub temp_c: f64,
    pub condition: String,
    pub humidity: u32,
    pub wind_kph: f64,
    pub feels_like_c: f64,
    pub category: Category,
    /// The provider's forecast object, untouched.
    pub forecast: serde_json::Value,
    pub tz_id: String,
    pub local_time: String,
}

/// Every failure carries a single line that can be shown to the user as-is.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Please enter a city")]
    NoCity,
    #[error("Could not reach weather service")]
    Network(#[source] reqwest::Error),
    #[error("{0}")]
    Api(String),
    #[error("Unexpected response from weather service")]
    Parse(String),
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, city: &str) -> Result<WeatherReport, FetchError>;
}
