//! Clients and title-matching logic for the external movie metadata services.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use tracing::debug;

pub mod omdb;
pub mod tmdb;

static YEAR_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})").expect("year regex is valid"));
static POSSESSIVE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z .'-]+?'s\s+(.*)$").expect("possessive regex is valid"));

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// API key that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl FromStr for ApiKey {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(value.trim().to_string()))
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Failure of a single lookup. Stages treat these as row-level and move on.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("request to {service} failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },
    #[error("failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

/// Search strings to try for a dataset title, most literal first.
///
/// `"Usual Suspects, The"` also yields `"The Usual Suspects"`, parentheticals
/// yield both their inside and outside, and `&`/`and` are swapped.
pub fn title_candidates(title: &str) -> Vec<String> {
    let trimmed = title.trim();
    let mut out = vec![trimmed.to_string()];

    if let Some(open) = trimmed.find('(') {
        if let Some(close_offset) = trimmed[open + 1..].find(')') {
            let close = open + 1 + close_offset;
            let inner = trimmed[open + 1..close].trim();
            if !inner.is_empty() {
                out.push(inner.to_string());
            }
            let outer = trimmed[..open].trim_end();
            if !outer.is_empty() {
                out.push(outer.to_string());
            }
        }
    }

    if let Some((base, suffix)) = trimmed.rsplit_once(", ") {
        if !suffix.is_empty() {
            out.push(format!("{suffix} {base}"));
        }
    }

    if let Some((before, after)) = trimmed.split_once(':') {
        for part in [before.trim(), after.trim()] {
            if !part.is_empty() {
                out.push(part.to_string());
            }
        }
    }

    if let Some(rest) = POSSESSIVE_PREFIX
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim())
        .filter(|value| !value.is_empty())
    {
        out.push(rest.to_string());
    }

    let mut variants = Vec::new();
    for candidate in &out {
        if candidate.contains('&') {
            variants.push(candidate.replace('&', "and"));
        }
        if candidate.contains(" and ") {
            variants.push(candidate.replace(" and ", " & "));
        }
    }
    out.extend(variants);

    let mut seen = std::collections::HashSet::new();
    out.into_iter()
        .filter(|candidate| !candidate.is_empty())
        .filter(|candidate| seen.insert(candidate.to_lowercase()))
        .collect()
}

/// Parses `"1995"`, `"1995-10-30"` or `"2001–2004"` into an inclusive range.
pub fn year_range(raw: Option<&str>) -> Option<(i32, i32)> {
    let years = YEAR_TOKEN
        .captures_iter(raw?)
        .filter_map(|captures| captures.get(1)?.as_str().parse::<i32>().ok())
        .collect::<Vec<i32>>();

    match years.as_slice() {
        [] => None,
        [single] => Some((*single, *single)),
        [first, second, ..] => Some((*first.min(second), *first.max(second))),
    }
}

/// Distance in years from `target` to the range in `raw`; 0 inside the range.
/// `None` when the range cannot be parsed. A missing target matches anything.
pub fn year_distance(raw: Option<&str>, target: Option<i32>) -> Option<u32> {
    let Some(target) = target else {
        return Some(0);
    };
    let (start, end) = year_range(raw)?;
    if (start..=end).contains(&target) {
        Some(0)
    } else {
        Some(target.abs_diff(start).min(target.abs_diff(end)))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// Sends the request built by `build`, retrying transient failures up to
/// `retries` times with exponential backoff. Non-retryable statuses are
/// returned to the caller.
pub(crate) fn send_with_retry(
    service: &'static str,
    retries: u32,
    build: impl Fn() -> RequestBuilder,
) -> Result<Response, LookupError> {
    let mut last_error = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            thread::sleep(RETRY_BASE_DELAY * 2_u32.pow(attempt - 1));
        }

        match build().send() {
            Ok(response) if is_retryable_status(response.status()) => {
                debug!(service, status = %response.status(), attempt, "retrying lookup");
                last_error = Some(LookupError::Status {
                    service,
                    status: response.status().as_u16(),
                });
            }
            Ok(response) => return Ok(response),
            Err(err) if err.is_timeout() || err.is_connect() || err.is_request() => {
                debug!(service, error = %err, attempt, "retrying lookup");
                last_error = Some(LookupError::Transport {
                    service,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                return Err(LookupError::Transport {
                    service,
                    message: err.to_string(),
                });
            }
        }
    }

    Err(last_error.unwrap_or(LookupError::Transport {
        service,
        message: "no attempt was made".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Answers every request with `503` and counts the requests.
    fn unavailable_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let url = format!("http://{}/", listener.local_addr().expect("address should resolve"));
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let mut request = Vec::new();
                let mut buf = [0_u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(
                    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
            }
        });

        (url, requests)
    }

    #[test]
    fn retries_count_excludes_the_first_attempt() {
        let (url, requests) = unavailable_server();
        let client = reqwest::blocking::Client::new();

        let result = send_with_retry("test", 2, || client.get(&url));

        assert!(matches!(
            result,
            Err(LookupError::Status { status: 503, .. })
        ));
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_retries_sends_once() {
        let (url, requests) = unavailable_server();
        let client = reqwest::blocking::Client::new();

        assert!(send_with_retry("test", 0, || client.get(&url)).is_err());
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn candidates_cover_article_suffix_and_parentheticals() {
        let candidates = title_candidates("City of Lost Children, The (Cité des enfants perdus, La)");
        assert_eq!(candidates[0], "City of Lost Children, The (Cité des enfants perdus, La)");
        assert!(candidates.contains(&"Cité des enfants perdus, La".to_string()));
        assert!(candidates.contains(&"City of Lost Children, The".to_string()));

        let candidates = title_candidates("Usual Suspects, The");
        assert_eq!(candidates, vec!["Usual Suspects, The", "The Usual Suspects"]);
    }

    #[test]
    fn candidates_split_on_colon_and_strip_possessive() {
        let candidates = title_candidates("Wes Craven's New Nightmare");
        assert!(candidates.contains(&"New Nightmare".to_string()));

        let candidates = title_candidates("Star Wars: Episode IV");
        assert!(candidates.contains(&"Star Wars".to_string()));
        assert!(candidates.contains(&"Episode IV".to_string()));
    }

    #[test]
    fn candidates_swap_ampersand_and_dedupe_case_insensitively() {
        let candidates = title_candidates("Romeo & Juliet");
        assert_eq!(candidates, vec!["Romeo & Juliet", "Romeo and Juliet"]);

        let candidates = title_candidates("Heat: heat");
        assert_eq!(candidates, vec!["Heat: heat", "Heat"]);
    }

    #[test]
    fn year_range_parses_dates_and_ranges() {
        assert_eq!(year_range(Some("1995-10-30")), Some((1995, 1995)));
        assert_eq!(year_range(Some("2004–2001")), Some((2001, 2004)));
        assert_eq!(year_range(Some("N/A")), None);
        assert_eq!(year_range(None), None);
    }

    #[test]
    fn year_distance_is_zero_inside_range() {
        assert_eq!(year_distance(Some("1995"), Some(1995)), Some(0));
        assert_eq!(year_distance(Some("2001-2004"), Some(2003)), Some(0));
        assert_eq!(year_distance(Some("1995"), Some(1998)), Some(3));
        assert_eq!(year_distance(Some("unknown"), Some(1998)), None);
        assert_eq!(year_distance(None, None), Some(0));
    }

    #[test]
    fn api_key_never_prints_its_value() {
        let key = ApiKey::from_str("super-secret").expect("parse is infallible");
        assert_eq!(format!("{key}"), "***");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.expose(), "super-secret");
    }
}
