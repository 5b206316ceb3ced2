use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;

use super::{ApiKey, LookupError, send_with_retry, title_candidates, year_distance};

const SERVICE: &str = "omdb";
const DEFAULT_BASE_URL: &str = "https://www.omdbapi.com/";

/// Raw OMDb title record. OMDb reports absent fields as `"N/A"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OmdbRecord {
    #[serde(rename = "Year", default)]
    pub year: Option<String>,
    #[serde(rename = "Plot", default)]
    pub plot: Option<String>,
    #[serde(rename = "Director", default)]
    pub director: Option<String>,
    #[serde(rename = "Actors", default)]
    pub actors: Option<String>,
    #[serde(rename = "Response", default)]
    pub response: Option<String>,
}

/// Fields Stage B may write for a matched movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmdbMatch {
    pub plot: Option<String>,
    pub director: Option<String>,
    pub actors: Option<String>,
}

impl From<OmdbRecord> for OmdbMatch {
    fn from(record: OmdbRecord) -> Self {
        Self {
            plot: present(record.plot),
            director: present(record.director),
            actors: present(record.actors),
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && value != "N/A")
}

pub trait OmdbApi {
    /// Exact-title lookup. `Ok(None)` when OMDb answers `Response: False`.
    fn fetch_title(&self, title: &str, year: Option<i32>) -> Result<Option<OmdbRecord>, LookupError>;
}

pub struct OmdbClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
    retries: u32,
}

impl OmdbClient {
    pub fn new(api_key: ApiKey, timeout: Duration, retries: u32) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, timeout, retries)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: ApiKey,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build omdb http client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            retries,
        })
    }
}

impl OmdbApi for OmdbClient {
    fn fetch_title(&self, title: &str, year: Option<i32>) -> Result<Option<OmdbRecord>, LookupError> {
        let mut params = vec![
            ("t", title.to_string()),
            ("type", "movie".to_string()),
            ("plot", "short".to_string()),
        ];
        if let Some(year) = year {
            params.push(("y", year.to_string()));
        }

        let response = send_with_retry(SERVICE, self.retries, || {
            self.client
                .get(&self.base_url)
                .header("Accept", "application/json")
                .query(&params)
                .query(&[("apikey", self.api_key.expose())])
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status {
                service: SERVICE,
                status: status.as_u16(),
            });
        }

        let record: OmdbRecord = response.json().map_err(|err| LookupError::Decode {
            service: SERVICE,
            message: err.to_string(),
        })?;

        if record.response.as_deref() == Some("True") {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }
}

/// Two passes over the title candidates: first with the year filter,
/// accepting only an in-range year; then without it, keeping the record
/// whose year is closest.
pub fn find_match(
    api: &dyn OmdbApi,
    title: &str,
    year: Option<i32>,
) -> Result<Option<OmdbMatch>, LookupError> {
    let candidates = title_candidates(title);

    for candidate in &candidates {
        if let Some(record) = api.fetch_title(candidate, year)? {
            if year_distance(record.year.as_deref(), year) == Some(0) {
                return Ok(Some(record.into()));
            }
        }
    }

    let mut best: Option<(u32, OmdbRecord)> = None;
    for candidate in &candidates {
        let Some(record) = api.fetch_title(candidate, None)? else {
            continue;
        };
        let Some(distance) = year_distance(record.year.as_deref(), year) else {
            continue;
        };

        if best.as_ref().is_none_or(|(best_distance, _)| distance < *best_distance) {
            best = Some((distance, record));
        }
        if distance == 0 {
            break;
        }
    }

    Ok(best.map(|(_, record)| record.into()))
}
