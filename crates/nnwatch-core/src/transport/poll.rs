// HTTP polling: one fetch per domain endpoint, issued as a concurrent batch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::debug;

use super::machine::PollHealth;
use crate::protocol::{Domain, Tab};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("server returned status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ok(Value),
    /// 404: the backend is up but does not serve this domain (yet).
    NotFound,
    Failed(FetchError),
}

impl From<Result<Value, FetchError>> for FetchOutcome {
    fn from(result: Result<Value, FetchError>) -> Self {
        match result {
            Ok(v) => FetchOutcome::Ok(v),
            Err(FetchError::Status(404)) => FetchOutcome::NotFound,
            Err(e) => FetchOutcome::Failed(e),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, domain: Domain) -> Result<Value, FetchError>;
}

/// `{base}/{domain}.json?t={millis}`; the query defeats intermediate caches.
pub fn endpoint_url(base_url: &str, domain: Domain, millis: i64) -> String {
    format!(
        "{}/{}?t={millis}",
        base_url.trim_end_matches('/'),
        domain.file_name()
    )
}

pub struct HttpFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        HttpFetcher {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, domain: Domain) -> Result<Value, FetchError> {
        let url = endpoint_url(&self.base_url, domain, Utc::now().timestamp_millis());
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        // Plain-text bodies (a raw log tail) are handed on as a JSON string.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Domains polled on each tick: training always, plus whatever the opened
/// tabs display.
pub fn polled_domains(opened: &BTreeSet<Tab>) -> Vec<Domain> {
    Domain::ALL
        .into_iter()
        .filter(|d| {
            *d == Domain::Training || opened.iter().any(|tab| tab.domains().contains(d))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollBatch {
    pub results: Vec<(Domain, FetchOutcome)>,
}

impl PollBatch {
    pub fn health(&self) -> PollHealth {
        if self.results.is_empty() {
            return PollHealth::Unknown;
        }
        let reachable = self
            .results
            .iter()
            .any(|(_, o)| matches!(o, FetchOutcome::Ok(_) | FetchOutcome::NotFound));
        if reachable {
            PollHealth::Ok
        } else {
            PollHealth::Failing
        }
    }
}

/// Fetch every domain concurrently, each bounded by `timeout`.
pub async fn run_batch(
    fetcher: Arc<dyn Fetcher>,
    domains: Vec<Domain>,
    timeout: Duration,
) -> PollBatch {
    let requests = domains.into_iter().map(|domain| {
        let fetcher = Arc::clone(&fetcher);
        async move {
            let outcome = match tokio::time::timeout(timeout, fetcher.fetch(domain)).await {
                Ok(result) => FetchOutcome::from(result),
                Err(_elapsed) => FetchOutcome::Failed(FetchError::Timeout),
            };
            debug!(
                domain = domain.as_str(),
                ok = matches!(outcome, FetchOutcome::Ok(_)),
                "poll result"
            );
            (domain, outcome)
        }
    });
    PollBatch {
        results: join_all(requests).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowFetcher;

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, domain: Domain) -> Result<Value, FetchError> {
            match domain {
                Domain::Training => Ok(json!({"games": 1})),
                Domain::Elo => Err(FetchError::Status(404)),
                Domain::Tournaments => Err(FetchError::Status(502)),
                Domain::Logs => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(json!([]))
                }
            }
        }
    }

    #[test]
    fn endpoint_url_shape() {
        assert_eq!(
            endpoint_url("http://host:8000/", Domain::Logs, 42),
            "http://host:8000/logs.json?t=42"
        );
        assert_eq!(
            endpoint_url("http://host", Domain::Training, 7),
            "http://host/training.json?t=7"
        );
    }

    #[test]
    fn training_is_always_polled() {
        let opened = BTreeSet::from([Tab::Heatmap]);
        assert_eq!(polled_domains(&opened), vec![Domain::Training]);

        let opened = BTreeSet::from([Tab::Overview, Tab::Logs, Tab::Elo]);
        assert_eq!(
            polled_domains(&opened),
            vec![Domain::Training, Domain::Elo, Domain::Logs]
        );
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(FetchOutcome::from(Err(FetchError::Status(404))), FetchOutcome::NotFound);
        assert_eq!(
            FetchOutcome::from(Err(FetchError::Status(500))),
            FetchOutcome::Failed(FetchError::Status(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_runs_concurrently_with_timeouts() {
        let domains = Domain::ALL.to_vec();
        let batch = run_batch(Arc::new(SlowFetcher), domains, DEFAULT_FETCH_TIMEOUT).await;
        let by_domain = |d: Domain| {
            batch
                .results
                .iter()
                .find(|(x, _)| *x == d)
                .map(|(_, o)| o.clone())
        };

        assert!(matches!(by_domain(Domain::Training), Some(FetchOutcome::Ok(_))));
        assert_eq!(by_domain(Domain::Elo), Some(FetchOutcome::NotFound));
        assert_eq!(
            by_domain(Domain::Tournaments),
            Some(FetchOutcome::Failed(FetchError::Status(502)))
        );
        assert_eq!(
            by_domain(Domain::Logs),
            Some(FetchOutcome::Failed(FetchError::Timeout))
        );
        assert_eq!(batch.health(), PollHealth::Ok);
    }

    #[test]
    fn batch_health() {
        let failing = PollBatch {
            results: vec![(Domain::Training, FetchOutcome::Failed(FetchError::Timeout))],
        };
        assert_eq!(failing.health(), PollHealth::Failing);
        let missing_only = PollBatch {
            results: vec![(Domain::Training, FetchOutcome::NotFound)],
        };
        assert_eq!(missing_only.health(), PollHealth::Ok);
        assert_eq!(PollBatch { results: vec![] }.health(), PollHealth::Unknown);
    }
}
