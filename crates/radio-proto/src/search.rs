//! Random station search against the radio-browser.info API.
//!
//! A request fans out one query per language across the configured mirror
//! servers, merges whatever comes back, shuffles it and hands out the first
//! station that is not the one currently playing.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::pick::Picker;
use crate::protocol::Station;

#[async_trait]
pub trait StationSearch: Send + Sync {
    /// A random station whose id is not `exclude`.
    async fn random_station(&self, exclude: Option<&str>) -> Result<Station, SearchError>;
}

/// Keep asking `search` until it yields a station other than `exclude`,
/// at most `max_attempts` times.
pub async fn find_distinct(
    search: &dyn StationSearch,
    exclude: Option<&str>,
    max_attempts: u32,
) -> Result<Station, SearchError> {
    for attempt in 1..=max_attempts.max(1) {
        match search.random_station(exclude).await {
            Ok(station) if Some(station.id.as_str()) == exclude => {
                debug!("search: attempt {} returned the current station, retrying", attempt);
            }
            Ok(station) => return Ok(station),
            Err(SearchError::OnlyExcluded) => {
                debug!("search: attempt {} found only the current station", attempt);
            }
            Err(e) => return Err(e),
        }
    }
    Err(SearchError::OnlyExcluded)
}

pub struct RadioBrowser {
    client: reqwest::Client,
    servers: Vec<String>,
    sort_fields: Vec<String>,
    languages: Vec<String>,
    limit: u32,
    languages_per_search: usize,
    picker: Mutex<Picker>,
}

/// One fan-out query.
#[derive(Debug, Clone, PartialEq)]
struct Query {
    server: String,
    language: String,
    order: String,
    reverse: bool,
}

impl RadioBrowser {
    pub fn new(
        config: &SearchConfig,
        languages: Vec<String>,
        picker: Picker,
    ) -> anyhow::Result<Self> {
        if config.servers.is_empty() {
            anyhow::bail!("no radio-browser servers configured");
        }
        if languages.is_empty() {
            anyhow::bail!("no search languages configured");
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("pirate-radio/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            servers: config.servers.clone(),
            sort_fields: config.sort_fields.clone(),
            languages,
            limit: config.limit,
            languages_per_search: config.languages_per_search.max(1),
            picker: Mutex::new(picker),
        })
    }

    fn plan_queries(&self) -> Vec<Query> {
        let mut picker = match self.picker.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut languages = self.languages.clone();
        picker.shuffle(&mut languages);
        let selected: Vec<String> = if languages.len() > self.languages_per_search {
            languages.truncate(self.languages_per_search);
            languages
        } else {
            // Too few languages to go around: one query per server,
            // repeating languages as needed
            (0..self.servers.len())
                .filter_map(|_| picker.pick(&self.languages).cloned())
                .collect()
        };

        selected
            .into_iter()
            .enumerate()
            .map(|(i, language)| Query {
                server: self.servers[i % self.servers.len()].clone(),
                language,
                order: picker
                    .pick(&self.sort_fields)
                    .cloned()
                    .unwrap_or_else(|| "random".to_string()),
                reverse: picker.coin(),
            })
            .collect()
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Station>, SearchError> {
        let url = format!("https://{}/json/stations/search", query.server);
        let mut params = vec![
            ("limit", self.limit.to_string()),
            ("order", query.order.clone()),
            ("language", query.language.clone()),
            ("hidebroken", "true".to_string()),
        ];
        if query.reverse {
            params.push(("reverse", "true".to_string()));
        }
        let stations: Vec<Station> = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(stations)
    }
}

#[async_trait]
impl StationSearch for RadioBrowser {
    async fn random_station(&self, exclude: Option<&str>) -> Result<Station, SearchError> {
        let queries = self.plan_queries();
        let results = join_all(queries.iter().map(|q| self.run_query(q))).await;

        let mut found = Vec::new();
        for (query, result) in queries.iter().zip(results) {
            match result {
                Ok(stations) => {
                    debug!(
                        "search: {} [{}] returned {} stations",
                        query.server,
                        query.language,
                        stations.len()
                    );
                    found.extend(stations.into_iter().filter(|s| !s.url.is_empty()));
                }
                Err(e) => warn!("search: {} [{}] failed: {}", query.server, query.language, e),
            }
        }

        if found.is_empty() {
            return Err(SearchError::NotFound);
        }

        {
            let mut picker = match self.picker.lock() {
                Ok(p) => p,
                Err(poisoned) => poisoned.into_inner(),
            };
            picker.shuffle(&mut found);
        }

        let station = pick_distinct(found, exclude).ok_or(SearchError::OnlyExcluded)?;
        info!("search: picked {} ({})", station.name, station.id);
        Ok(station)
    }
}

fn pick_distinct(stations: Vec<Station>, exclude: Option<&str>) -> Option<Station> {
    stations
        .into_iter()
        .find(|s| exclude.map_or(true, |id| s.id != id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        ids: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StationSearch for Scripted {
        async fn random_station(&self, _exclude: Option<&str>) -> Result<Station, SearchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.ids.get(n) {
                Some(id) => Ok(Station::new(id, id, "http://x", "")),
                None => Err(SearchError::NotFound),
            }
        }
    }

    #[tokio::test]
    async fn test_find_distinct_skips_current() {
        let search = Scripted {
            ids: vec!["cur", "cur", "next"],
            calls: AtomicUsize::new(0),
        };
        let station = find_distinct(&search, Some("cur"), 5).await.unwrap();
        assert_eq!(station.id, "next");
        assert_eq!(search.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_find_distinct_gives_up_after_budget() {
        let search = Scripted {
            ids: vec!["cur"; 10],
            calls: AtomicUsize::new(0),
        };
        let err = find_distinct(&search, Some("cur"), 3).await.unwrap_err();
        assert!(matches!(err, SearchError::OnlyExcluded));
        assert_eq!(search.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_find_distinct_propagates_not_found() {
        let search = Scripted {
            ids: vec![],
            calls: AtomicUsize::new(0),
        };
        let err = find_distinct(&search, None, 3).await.unwrap_err();
        assert!(matches!(err, SearchError::NotFound));
    }

    #[test]
    fn test_pick_distinct() {
        let stations = vec![
            Station::new("a", "1", "http://a", ""),
            Station::new("b", "2", "http://b", ""),
        ];
        assert_eq!(pick_distinct(stations.clone(), Some("1")).unwrap().id, "2");
        assert_eq!(pick_distinct(stations, None).unwrap().id, "1");
        let only = vec![Station::new("a", "1", "http://a", "")];
        assert!(pick_distinct(only, Some("1")).is_none());
    }

    #[test]
    fn test_plan_queries_spreads_over_servers() {
        let config = SearchConfig::default();
        let languages = vec!["english".to_string()];
        let rb = RadioBrowser::new(&config, languages, Picker::new(Some(1))).unwrap();
        let queries = rb.plan_queries();
        assert_eq!(queries.len(), 3);
        let servers: Vec<_> = queries.iter().map(|q| q.server.as_str()).collect();
        assert_eq!(
            servers,
            vec![
                "de1.api.radio-browser.info",
                "at1.api.radio-browser.info",
                "nl1.api.radio-browser.info"
            ]
        );
        assert!(queries.iter().all(|q| q.language == "english"));
    }

    #[test]
    fn test_plan_queries_caps_languages() {
        let config = SearchConfig::default();
        let languages: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        let rb = RadioBrowser::new(&config, languages, Picker::new(Some(9))).unwrap();
        let queries = rb.plan_queries();
        assert_eq!(queries.len(), 3);
        let mut langs: Vec<_> = queries.iter().map(|q| q.language.clone()).collect();
        langs.sort();
        langs.dedup();
        assert_eq!(langs.len(), 3);
    }
}
