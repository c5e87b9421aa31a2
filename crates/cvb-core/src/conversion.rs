use std::sync::Arc;

use tracing::debug;

use crate::{currency::CurrencyCode, ports::RateService, Result};

/// Converts amounts with the latest rate from the rate service.
pub struct ConversionEngine {
    rates: Arc<dyn RateService>,
}

impl ConversionEngine {
    pub fn new(rates: Arc<dyn RateService>) -> Self {
        Self { rates }
    }

    /// Returns the chat reply.
    ///
    /// Unknown currency codes are reported as `Ok` text without calling the
    /// rate service; only transport/remote failures are `Err`.
    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<String> {
        let Some(from_code) = CurrencyCode::parse(from) else {
            return Ok(format!("Unknown currency (from) {}", from.trim().to_uppercase()));
        };
        let Some(to_code) = CurrencyCode::parse(to) else {
            return Ok(format!("Unknown currency (to) {}", to.trim().to_uppercase()));
        };

        debug!(from = %from_code, to = %to_code, "fetching rate");
        let rates = self.rates.latest_rates(&from_code).await?;
        let Some(rate) = rates.get(to_code.as_str()).copied() else {
            return Ok(format!("No exchange rate from {from_code} to {to_code}"));
        };

        let result = round_cents(amount * rate);
        Ok(format!("{amount} {from_code} is {result:.2} {to_code}"))
    }
}

/// Two decimals, halves rounded away from zero.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
