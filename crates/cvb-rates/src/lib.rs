//! Exchange-rate adapter (`exchangerate-api.com` v4 `latest` endpoint).

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use cvb_core::{currency::CurrencyCode, errors::Error, ports::RateService, Result};
use serde::Deserialize;

#[derive(Clone, Debug)]
pub struct ExchangeRateClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    rates: HashMap<String, serde_json::Value>,
}

impl ExchangeRateClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl RateService for ExchangeRateClient {
    /// Rates keyed by target code. An unknown base yields an empty map rather
    /// than an error so the caller can report the missing rate.
    async fn latest_rates(&self, base: &CurrencyCode) -> Result<HashMap<String, f64>> {
        let resp = self
            .http
            .get(format!("{}/{base}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::External(format!("rates request error: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(HashMap::new());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "rates lookup failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: LatestResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("rates json error: {e}")))?;

        // Rates occasionally arrive as strings.
        Ok(v.rates
            .into_iter()
            .filter_map(|(code, rate)| {
                let rate = match rate {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }?;
                rate.is_finite().then_some((code, rate))
            })
            .collect())
    }
}
