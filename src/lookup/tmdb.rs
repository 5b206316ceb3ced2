use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::{ApiKey, LookupError, send_with_retry, title_candidates, year_distance};

const SERVICE: &str = "tmdb";
const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const CAST_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbSearchResult {
    pub id: i64,
    #[serde(default)]
    pub release_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TmdbSearchPage {
    #[serde(default)]
    results: Vec<TmdbSearchResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbCastMember {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub character: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbCrewMember {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbCredits {
    #[serde(default)]
    pub cast: Vec<TmdbCastMember>,
    #[serde(default)]
    pub crew: Vec<TmdbCrewMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbDetails {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub credits: TmdbCredits,
}

/// Fields Stage A writes for a matched movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmdbMatch {
    pub tmdb_id: i64,
    pub title: Option<String>,
    pub overview: String,
    pub release_date: Option<String>,
    pub director: Option<String>,
    pub cast: Option<String>,
}

pub trait TmdbApi {
    fn search_movie(
        &self,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<TmdbSearchResult>, LookupError>;

    /// `Ok(None)` when the id is unknown to the service.
    fn movie_details(&self, tmdb_id: i64) -> Result<Option<TmdbDetails>, LookupError>;
}

pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
    retries: u32,
}

impl TmdbClient {
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
            .context("failed to build tmdb http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retries,
        })
    }

    // v4 read tokens are JWTs and go in a bearer header; v3 keys go in the query.
    fn uses_bearer_token(&self) -> bool {
        self.api_key.expose().starts_with("eyJ")
    }

    fn get(&self, url: &str, params: &[(&str, String)]) -> Result<Option<reqwest::blocking::Response>, LookupError> {
        let response = send_with_retry(SERVICE, self.retries, || {
            let request = self
                .client
                .get(url)
                .header("Accept", "application/json")
                .query(params);
            if self.uses_bearer_token() {
                request.bearer_auth(self.api_key.expose())
            } else {
                request.query(&[("api_key", self.api_key.expose())])
            }
        })?;

        match response.status() {
            StatusCode::OK => Ok(Some(response)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(LookupError::Status {
                service: SERVICE,
                status: status.as_u16(),
            }),
        }
    }
}

impl TmdbApi for TmdbClient {
    fn search_movie(
        &self,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<TmdbSearchResult>, LookupError> {
        let mut params = vec![
            ("query", query.to_string()),
            ("include_adult", "true".to_string()),
        ];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }

        let url = format!("{}/search/movie", self.base_url);
        let Some(response) = self.get(&url, &params)? else {
            return Ok(Vec::new());
        };

        let page: TmdbSearchPage = response.json().map_err(|err| LookupError::Decode {
            service: SERVICE,
            message: err.to_string(),
        })?;
        Ok(page.results)
    }

    fn movie_details(&self, tmdb_id: i64) -> Result<Option<TmdbDetails>, LookupError> {
        let url = format!("{}/movie/{}", self.base_url, tmdb_id);
        let params = [("append_to_response", "credits".to_string())];
        let Some(response) = self.get(&url, &params)? else {
            return Ok(None);
        };

        let details = response.json().map_err(|err| LookupError::Decode {
            service: SERVICE,
            message: err.to_string(),
        })?;
        Ok(Some(details))
    }
}

/// Result closest to `target_year`; the first result when no year is known.
pub fn pick_best(results: &[TmdbSearchResult], target_year: Option<i32>) -> Option<&TmdbSearchResult> {
    if target_year.is_none() {
        return results.first();
    }

    results.iter().min_by_key(|result| {
        year_distance(result.release_date.as_deref(), target_year).unwrap_or(u32::MAX)
    })
}

pub fn extract_director(credits: &TmdbCredits) -> Option<String> {
    credits
        .crew
        .iter()
        .filter(|member| member.job.as_deref() == Some("Director"))
        .find_map(|member| member.name.clone().filter(|name| !name.trim().is_empty()))
}

/// Top-billed cast as `Name (Character)`, comma separated.
pub fn cast_with_roles(credits: &TmdbCredits) -> Option<String> {
    let items = credits
        .cast
        .iter()
        .take(CAST_LIMIT)
        .filter_map(|member| {
            let name = member.name.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
            match member.character.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                Some(character) => Some(format!("{name} ({character})")),
                None => Some(name.to_string()),
            }
        })
        .collect::<Vec<String>>();

    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}

/// Tries each title candidate until a search hits, then fetches details.
pub fn find_match(
    api: &dyn TmdbApi,
    title: &str,
    year: Option<i32>,
) -> Result<Option<TmdbMatch>, LookupError> {
    for candidate in title_candidates(title) {
        let results = api.search_movie(&candidate, year)?;
        let Some(best) = pick_best(&results, year) else {
            continue;
        };

        let Some(details) = api.movie_details(best.id)? else {
            return Ok(None);
        };

        return Ok(Some(TmdbMatch {
            tmdb_id: details.id,
            director: extract_director(&details.credits),
            cast: cast_with_roles(&details.credits),
            title: details.title,
            overview: details.overview.unwrap_or_default(),
            release_date: details.release_date.filter(|value| !value.trim().is_empty()),
        }));
    }

    Ok(None)
}


#[cfg(test)]
mod tests {
    use super::fakes::FakeTmdb;
    use super::*;

    fn result(id: i64, release: Option<&str>) -> TmdbSearchResult {
        TmdbSearchResult {
            id,
            release_date: release.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn pick_best_prefers_closest_release_year() {
        let results = vec![
            result(1, Some("2010-01-01")),
            result(2, None),
            result(3, Some("1996-05-01")),
        ];
        assert_eq!(pick_best(&results, Some(1995)).map(|r| r.id), Some(3));
        assert_eq!(pick_best(&results, None).map(|r| r.id), Some(1));
        assert!(pick_best(&[], Some(1995)).is_none());
    }

    #[test]
    fn credits_extraction_formats_director_and_roles() {
        let credits = TmdbCredits {
            cast: vec![
                TmdbCastMember {
                    name: Some("Tom Hanks".to_string()),
                    character: Some("Woody (voice)".to_string()),
                },
                TmdbCastMember {
                    name: Some("Tim Allen".to_string()),
                    character: None,
                },
                TmdbCastMember {
                    name: None,
                    character: Some("Nobody".to_string()),
                },
            ],
            crew: vec![
                TmdbCrewMember {
                    name: Some("Bonnie Arnold".to_string()),
                    job: Some("Producer".to_string()),
                },
                TmdbCrewMember {
                    name: Some("John Lasseter".to_string()),
                    job: Some("Director".to_string()),
                },
            ],
        };

        assert_eq!(extract_director(&credits).as_deref(), Some("John Lasseter"));
        assert_eq!(
            cast_with_roles(&credits).as_deref(),
            Some("Tom Hanks (Woody (voice)), Tim Allen")
        );
        assert_eq!(cast_with_roles(&TmdbCredits::default()), None);
    }

    #[test]
    fn find_match_falls_through_candidates_until_a_hit() {
        let fake = FakeTmdb::default().with_movie("The Usual Suspects", 629, "1995-07-19", "A boat explodes.");

        let found = find_match(&fake, "Usual Suspects, The", Some(1995))
            .expect("lookup should succeed")
            .expect("second candidate should match");
        assert_eq!(found.tmdb_id, 629);
        assert_eq!(found.overview, "A boat explodes.");
        assert_eq!(found.director.as_deref(), Some("Director of The Usual Suspects"));
        assert_eq!(fake.queries.borrow().len(), 2);
    }

    #[test]
    fn find_match_returns_none_when_nothing_matches() {
        let fake = FakeTmdb::default();
        assert!(find_match(&fake, "Unknown Film", None)
            .expect("lookup should succeed")
            .is_none());
    }

    #[test]
    fn find_match_propagates_transport_errors() {
        let fake = FakeTmdb {
            unreachable: true,
            ..FakeTmdb::default()
        };
        assert!(matches!(
            find_match(&fake, "Heat", Some(1995)),
            Err(LookupError::Transport { .. })
        ));
    }
}
