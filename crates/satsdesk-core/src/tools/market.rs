//! Bitcoin market-data tools.
//!
//! Live spot price from CoinGecko and recommended on-chain fee rates from
//! mempool.space. Both are read-only, cacheable, and live in the `market`
//! category.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::Tool;
use crate::config::MarketConfig;

fn build_http_client(config: &MarketConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent("satsdesk/0.1")
        .build()
}

// ── Types ──────────────────────────────────────────────────────────

/// `/simple/price` body: `{"bitcoin": {"usd": 50000.0, "usd_24h_change": 1.2}}`.
type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    fastest_fee: f64,
    half_hour_fee: f64,
    hour_fee: f64,
    #[serde(default)]
    economy_fee: Option<f64>,
    #[serde(default)]
    minimum_fee: Option<f64>,
}

fn price_from_response(body: &SimplePriceResponse, currency: &str) -> anyhow::Result<Value> {
    let quote = body
        .get("bitcoin")
        .context("response has no 'bitcoin' entry")?;
    let price = quote
        .get(currency)
        .copied()
        .flatten()
        .with_context(|| format!("no bitcoin price quoted in '{currency}'"))?;
    let change = quote
        .get(&format!("{currency}_24h_change"))
        .copied()
        .flatten();

    Ok(json!({
        "asset": "bitcoin",
        "currency": currency,
        "price": price,
        "change24h": change,
    }))
}

fn fees_to_value(fees: &RecommendedFees) -> Value {
    json!({
        "unit": "sat/vB",
        "fastest": fees.fastest_fee,
        "halfHour": fees.half_hour_fee,
        "hour": fees.hour_fee,
        "economy": fees.economy_fee,
        "minimum": fees.minimum_fee,
    })
}

// ── BitcoinPriceTool ───────────────────────────────────────────────

/// Current BTC spot price in a fiat currency.
pub struct BitcoinPriceTool {
    client: reqwest::Client,
    base_url: String,
}

impl BitcoinPriceTool {
    pub fn new(config: &MarketConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.coingecko_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Tool for BitcoinPriceTool {
    fn name(&self) -> &str {
        "get_bitcoin_price"
    }

    fn description(&self) -> &str {
        "Current bitcoin spot price and 24h change. Args: {\"vs_currency\": \"usd\"}."
    }

    fn category(&self) -> &str {
        "market"
    }

    fn tags(&self) -> Vec<String> {
        vec!["bitcoin".into(), "price".into(), "market-data".into()]
    }

    fn cacheable(&self) -> bool {
        true
    }

    fn ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let currency = args
            .get("vs_currency")
            .and_then(|v| v.as_str())
            .unwrap_or("usd")
            .to_lowercase();

        debug!(currency, "Fetching bitcoin price");

        let body: SimplePriceResponse = self
            .client
            .get(format!("{}/simple/price", self.base_url))
            .query(&[
                ("ids", "bitcoin"),
                ("vs_currencies", currency.as_str()),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("CoinGecko returned an unexpected body")?;

        price_from_response(&body, &currency)
    }
}

// ── FeeEstimateTool ────────────────────────────────────────────────

/// Recommended fee rates for the next blocks.
pub struct FeeEstimateTool {
    client: reqwest::Client,
    base_url: String,
}

impl FeeEstimateTool {
    pub fn new(config: &MarketConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.mempool_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Tool for FeeEstimateTool {
    fn name(&self) -> &str {
        "get_fee_estimates"
    }

    fn description(&self) -> &str {
        "Recommended bitcoin transaction fee rates in sat/vB."
    }

    fn category(&self) -> &str {
        "market"
    }

    fn tags(&self) -> Vec<String> {
        vec!["bitcoin".into(), "fees".into(), "mempool".into()]
    }

    fn cacheable(&self) -> bool {
        true
    }

    fn ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        debug!("Fetching recommended fees");

        let fees: RecommendedFees = self
            .client
            .get(format!("{}/v1/fees/recommended", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("mempool.space returned an unexpected body")?;

        Ok(fees_to_value(&fees))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_from_response() {
        let body: SimplePriceResponse =
            serde_json::from_str(r#"{"bitcoin": {"usd": 50000.5, "usd_24h_change": -1.25}}"#).unwrap();
        let v = price_from_response(&body, "usd").unwrap();
        assert_eq!(v["price"], 50000.5);
        assert_eq!(v["change24h"], -1.25);
        assert_eq!(v["currency"], "usd");
    }

    #[test]
    fn test_price_missing_currency() {
        let body: SimplePriceResponse = serde_json::from_str(r#"{"bitcoin": {"usd": 1.0}}"#).unwrap();
        let err = price_from_response(&body, "eur").unwrap_err();
        assert!(err.to_string().contains("eur"));
        assert!(price_from_response(&HashMap::new(), "usd").is_err());
    }

    #[test]
    fn test_fees_to_value() {
        let fees: RecommendedFees = serde_json::from_str(
            r#"{"fastestFee": 21, "halfHourFee": 15, "hourFee": 9, "economyFee": 4, "minimumFee": 2}"#,
        )
        .unwrap();
        let v = fees_to_value(&fees);
        assert_eq!(v["fastest"], 21.0);
        assert_eq!(v["economy"], 4.0);
        assert_eq!(v["unit"], "sat/vB");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let config = MarketConfig {
            coingecko_url: "http://127.0.0.1:9".into(),
            mempool_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
        };
        let price = BitcoinPriceTool::new(&config).unwrap();
        assert!(price.execute(json!({})).await.is_err());
        let fees = FeeEstimateTool::new(&config).unwrap();
        assert!(fees.execute(json!({})).await.is_err());
    }
}
