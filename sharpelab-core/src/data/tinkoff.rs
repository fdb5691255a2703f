//! Tinkoff Invest REST provider.
//!
//! Talks to the public REST gateway of the Invest API: `InstrumentsService/Shares`
//! for the share listing and `MarketDataService/GetCandles` for history. Long
//! windows are split into chunks no wider than the resolution's request span.
//!
//! No retries and no pacing here: the acquisition gate above decides when a
//! request may go out, and any failure surfaces as [`DataError::Acquisition`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{DataError, MarketDataProvider};
use crate::domain::{Bar, InstrumentRecord, Resolution, Series};

pub const DEFAULT_BASE_URL: &str =
    "https://invest-public-api.tinkoff.ru/rest/tinkoff.public.invest.api.contract.v1";

/// Price as the API encodes it: integer units plus nanos.
#[derive(Debug, Clone, Deserialize)]
struct Quotation {
    #[serde(default)]
    units: String,
    #[serde(default)]
    nano: i32,
}

impl Quotation {
    fn to_f64(self) -> Result<f64, String> {
        let units: i64 = if self.units.is_empty() {
            0
        } else {
            self.units
                .parse()
                .map_err(|e| format!("bad quotation units '{}': {e}", self.units))?
        };
        Ok(units as f64 + f64::from(self.nano) / 1e9)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SharesRequest {
    instrument_status: &'static str,
}

#[derive(Debug, Deserialize)]
struct SharesResponse {
    #[serde(default)]
    instruments: Vec<ShareInfo>,
}

#[derive(Debug, Deserialize)]
struct ShareInfo {
    ticker: String,
    figi: String,
    #[serde(default)]
    sector: String,
    #[serde(default)]
    currency: String,
}

#[derive(Debug, Serialize)]
struct CandlesRequest<'a> {
    figi: &'a str,
    from: String,
    to: String,
    interval: &'static str,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    open: Quotation,
    high: Quotation,
    low: Quotation,
    close: Quotation,
    #[serde(default)]
    volume: String,
    time: DateTime<Utc>,
}

fn interval_name(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Hourly => "CANDLE_INTERVAL_HOUR",
        Resolution::Daily => "CANDLE_INTERVAL_DAY",
        Resolution::FifteenMinute => "CANDLE_INTERVAL_15_MIN",
        Resolution::OneMinute => "CANDLE_INTERVAL_1_MIN",
    }
}

/// Split `[from, to]` into consecutive windows of at most `span`.
fn request_windows(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    span: chrono::Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut start = from;
    while start < to {
        let end = (start + span).min(to);
        windows.push((start, end));
        start = end;
    }
    windows
}

fn parse_shares(body: &str) -> Result<Vec<InstrumentRecord>, String> {
    let resp: SharesResponse =
        serde_json::from_str(body).map_err(|e| format!("unexpected shares payload: {e}"))?;
    Ok(resp
        .instruments
        .into_iter()
        .map(|s| InstrumentRecord {
            ticker: s.ticker,
            instrument_id: s.figi,
            sector: s.sector,
            currency: s.currency,
        })
        .collect())
}

fn parse_candles(body: &str) -> Result<Series, String> {
    let resp: CandlesResponse =
        serde_json::from_str(body).map_err(|e| format!("unexpected candles payload: {e}"))?;
    resp.candles
        .into_iter()
        .map(|c| {
            let volume = if c.volume.is_empty() {
                0
            } else {
                c.volume
                    .parse()
                    .map_err(|e| format!("bad volume '{}': {e}", c.volume))?
            };
            Ok(Bar {
                time: c.time,
                open: c.open.to_f64()?,
                high: c.high.to_f64()?,
                low: c.low.to_f64()?,
                close: c.close.to_f64()?,
                volume,
            })
        })
        .collect()
}

/// Tinkoff Invest market-data provider.
pub struct TinkoffProvider {
    client: reqwest::blocking::Client,
    token: String,
    base_url: String,
}

impl TinkoffProvider {
    pub fn new(token: impl Into<String>) -> Result<Self, DataError> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::acquisition("http client", e))?;
        Ok(Self {
            client,
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn post<B: Serialize>(&self, method: &str, body: &B) -> Result<String, DataError> {
        let url = format!("{}/{method}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .map_err(|e| DataError::acquisition(method, e))?;

        let status = resp.status();
        let text = resp.text().map_err(|e| DataError::acquisition(method, e))?;
        if !status.is_success() {
            return Err(DataError::acquisition(method, format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

impl MarketDataProvider for TinkoffProvider {
    fn name(&self) -> &str {
        "tinkoff"
    }

    fn list_shares(&self) -> Result<Vec<InstrumentRecord>, DataError> {
        let method = "InstrumentsService/Shares";
        let body = self.post(
            method,
            &SharesRequest {
                instrument_status: "INSTRUMENT_STATUS_BASE",
            },
        )?;
        parse_shares(&body).map_err(|e| DataError::acquisition(method, e))
    }

    fn fetch_candles(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Series, DataError> {
        let method = "MarketDataService/GetCandles";
        let mut bars = Series::new();
        for (start, end) in request_windows(from, to, resolution.max_request_span()) {
            let body = self.post(
                method,
                &CandlesRequest {
                    figi: instrument_id,
                    from: start.to_rfc3339(),
                    to: end.to_rfc3339(),
                    interval: interval_name(resolution),
                },
            )?;
            let chunk = parse_candles(&body).map_err(|e| DataError::acquisition(method, e))?;
            debug!(instrument_id, %start, %end, candles = chunk.len(), "candle chunk");
            bars.extend(chunk);
        }
        Ok(bars)
    }
}
