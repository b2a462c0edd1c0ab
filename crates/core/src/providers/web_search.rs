use crate::config::FallbackConfig;
use crate::models::{ExternalResult, Query};
use crate::traits::FallbackRetriever;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone)]
struct GoogleSearch {
    endpoint: String,
    api_key: String,
    engine_id: String,
}

/// Web search fallback: Google Programmable Search when credentials are
/// configured, DuckDuckGo Instant Answers otherwise (or when Google fails).
///
/// Each attempt is bounded by `attempt_timeout`; a failed attempt is retried
/// once after `retry_delay`.
pub struct WebSearchRetriever {
    client: Client,
    duckduckgo_endpoint: String,
    google: Option<GoogleSearch>,
    attempt_timeout: Duration,
    retry_delay: Duration,
    max_results: usize,
}

impl WebSearchRetriever {
    pub fn new(config: &FallbackConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.attempt_timeout_ms))
            .user_agent(concat!("fallback-rag/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let google = match (&config.google_api_key, &config.google_engine_id) {
            (Some(api_key), Some(engine_id)) if !api_key.is_empty() && !engine_id.is_empty() => {
                Some(GoogleSearch {
                    endpoint: config.google_endpoint.clone(),
                    api_key: api_key.clone(),
                    engine_id: engine_id.clone(),
                })
            }
            _ => None,
        };

        Ok(Self {
            client,
            duckduckgo_endpoint: config.duckduckgo_endpoint.clone(),
            google,
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_results: config.max_results.max(1),
        })
    }

    async fn search_once(&self, query: &str) -> Result<Vec<ExternalResult>, PipelineError> {
        if let Some(google) = &self.google {
            match self.google_search(google, query).await {
                Ok(results) if !results.is_empty() => return Ok(results),
                Ok(_) => tracing::debug!("google search returned no results, trying duckduckgo"),
                Err(error) => tracing::warn!(%error, "google search failed, trying duckduckgo"),
            }
        }

        self.duckduckgo_search(query).await
    }

    async fn google_search(
        &self,
        google: &GoogleSearch,
        query: &str,
    ) -> Result<Vec<ExternalResult>, PipelineError> {
        let url = Url::parse_with_params(
            &google.endpoint,
            &[
                ("key", google.api_key.as_str()),
                ("cx", google.engine_id.as_str()),
                ("q", query),
            ],
        )?;

        let payload = self.fetch_json(url, "google").await?;
        Ok(parse_google(&payload))
    }

    async fn duckduckgo_search(&self, query: &str) -> Result<Vec<ExternalResult>, PipelineError> {
        let url = Url::parse_with_params(
            &self.duckduckgo_endpoint,
            &[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
            ],
        )?;

        let payload = self.fetch_json(url, "duckduckgo").await?;
        Ok(parse_duckduckgo(&payload))
    }

    async fn fetch_json(&self, url: Url, backend: &str) -> Result<Value, PipelineError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(PipelineError::FallbackUnavailable(format!(
                "{backend} search failed: {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await?;
        Ok(payload)
    }
}

#[async_trait]
impl FallbackRetriever for WebSearchRetriever {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn search(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExternalResult>, PipelineError> {
        let text = query.raw_text.trim();
        let mut last_error =
            PipelineError::FallbackUnavailable("search was not attempted".to_string());

        for attempt in 1..=2u32 {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcome = tokio::time::timeout(self.attempt_timeout, self.search_once(text)) => {
                    outcome
                }
            };

            match outcome {
                Ok(Ok(mut results)) => {
                    if results.is_empty() {
                        return Err(PipelineError::FallbackUnavailable(
                            "web search returned no results".to_string(),
                        ));
                    }
                    results.truncate(self.max_results);
                    tracing::debug!(attempt, results = results.len(), "web search succeeded");
                    return Ok(results);
                }
                Ok(Err(error)) => last_error = error,
                Err(_) => {
                    last_error = PipelineError::FallbackUnavailable(format!(
                        "web search attempt timed out after {}ms",
                        self.attempt_timeout.as_millis()
                    ));
                }
            }

            if attempt == 1 {
                tracing::warn!(error = %last_error, "web search attempt failed, retrying once");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        Err(last_error)
    }
}

pub fn parse_google(payload: &Value) -> Vec<ExternalResult> {
    let items = payload
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::new();
    for item in items {
        let title = item.get("title").and_then(Value::as_str).unwrap_or("");
        let url = item.get("link").and_then(Value::as_str).unwrap_or("");
        let snippet = item.get("snippet").and_then(Value::as_str).unwrap_or("");
        if !title.is_empty() && !url.is_empty() {
            results.push(ExternalResult {
                title: title.to_string(),
                text: if snippet.is_empty() { title } else { snippet }.to_string(),
                url: url.to_string(),
            });
        }
    }
    results
}

pub fn parse_duckduckgo(payload: &Value) -> Vec<ExternalResult> {
    let mut results = Vec::new();

    let abstract_text = payload.get("AbstractText").and_then(Value::as_str).unwrap_or("");
    let abstract_url = payload.get("AbstractURL").and_then(Value::as_str).unwrap_or("");
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        let heading = payload
            .get("Heading")
            .and_then(Value::as_str)
            .filter(|heading| !heading.is_empty())
            .unwrap_or_else(|| abstract_text.split(" - ").next().unwrap_or(abstract_text));
        results.push(ExternalResult {
            title: heading.to_string(),
            text: abstract_text.to_string(),
            url: abstract_url.to_string(),
        });
    }

    if let Some(answer) = payload.get("Answer").and_then(Value::as_str) {
        if !answer.is_empty() {
            results.push(ExternalResult {
                title: "Instant answer".to_string(),
                text: answer.to_string(),
                url: String::new(),
            });
        }
    }

    if let Some(items) = payload.get("Results").and_then(Value::as_array) {
        collect_topics(items, &mut results);
    }
    if let Some(items) = payload.get("RelatedTopics").and_then(Value::as_array) {
        collect_topics(items, &mut results);
    }

    results
}

fn collect_topics(items: &[Value], results: &mut Vec<ExternalResult>) {
    for item in items {
        if let Some(topics) = item.get("Topics").and_then(Value::as_array) {
            collect_topics(topics, results);
            continue;
        }
        let text = item.get("Text").and_then(Value::as_str).unwrap_or("");
        let url = item.get("FirstURL").and_then(Value::as_str).unwrap_or("");
        if text.is_empty() || url.is_empty() {
            continue;
        }
        results.push(ExternalResult {
            title: text.split(" - ").next().unwrap_or(text).to_string(),
            text: text.to_string(),
            url: url.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn query(text: &str) -> Query {
        Query::new(text, &CharacterNgramEmbedder::default()).unwrap()
    }

    fn config(endpoint: String, attempt_timeout_ms: u64) -> FallbackConfig {
        FallbackConfig {
            duckduckgo_endpoint: endpoint,
            attempt_timeout_ms,
            retry_delay_ms: 10,
            ..FallbackConfig::default()
        }
    }

    /// Accepts connections and never answers, counting each attempt.
    async fn silent_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (format!("http://{address}/"), accepted)
    }

    /// Answers every request with `status` and the same JSON body, counting
    /// requests.
    async fn stub_server(status: &'static str, body: Value) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        let body = body.to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buffer = vec![0u8; 4096];
                    let _ = socket.read(&mut buffer).await;
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (format!("http://{address}/"), served)
    }

    async fn json_server(body: Value) -> String {
        stub_server("200 OK", body).await.0
    }

    fn with_google(google_endpoint: String, duckduckgo_endpoint: String) -> FallbackConfig {
        FallbackConfig {
            google_endpoint,
            google_api_key: Some("key".to_string()),
            google_engine_id: Some("engine".to_string()),
            ..config(duckduckgo_endpoint, 2_000)
        }
    }

    fn mars_topics() -> Value {
        json!({
            "RelatedTopics": [
                { "Text": "Mars - fourth planet", "FirstURL": "https://duckduckgo.com/Mars" }
            ]
        })
    }

    #[test]
    fn duckduckgo_abstract_and_nested_topics_are_parsed() {
        let payload = json!({
            "Heading": "Mars",
            "AbstractText": "Mars is the fourth planet from the Sun.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Mars",
            "RelatedTopics": [
                {
                    "Text": "Olympus Mons - a volcano on Mars",
                    "FirstURL": "https://duckduckgo.com/Olympus_Mons"
                },
                {
                    "Topics": [
                        { "Text": "Phobos - a moon", "FirstURL": "https://duckduckgo.com/Phobos" }
                    ]
                },
                { "Text": "", "FirstURL": "https://duckduckgo.com/empty" }
            ]
        });

        let results = parse_duckduckgo(&payload);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Mars");
        assert_eq!(results[1].title, "Olympus Mons");
        assert_eq!(results[2].url, "https://duckduckgo.com/Phobos");
    }

    #[test]
    fn google_items_without_link_are_skipped() {
        let payload = json!({
            "items": [
                {
                    "title": "CPI 2023",
                    "link": "https://example.org/cpi",
                    "snippet": "CPI rose 4.1%"
                },
                { "title": "no link" }
            ]
        });
        let results = parse_google(&payload);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "CPI rose 4.1%");
    }

    #[tokio::test]
    async fn successful_search_truncates_results() {
        let endpoint = json_server(json!({
            "RelatedTopics": [
                { "Text": "A - first", "FirstURL": "https://example.org/a" },
                { "Text": "B - second", "FirstURL": "https://example.org/b" },
                { "Text": "C - third", "FirstURL": "https://example.org/c" }
            ]
        }))
        .await;
        let retriever = WebSearchRetriever::new(&FallbackConfig {
            max_results: 2,
            ..config(endpoint, 2_000)
        })
        .unwrap();

        let results = retriever
            .search(&query("capital of mars"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://example.org/a");
    }

    #[tokio::test]
    async fn empty_results_are_unavailable() {
        let endpoint = json_server(json!({ "RelatedTopics": [] })).await;
        let retriever = WebSearchRetriever::new(&config(endpoint, 2_000)).unwrap();
        let error = retriever
            .search(&query("capital of mars"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::FallbackUnavailable(_)));
    }

    #[tokio::test]
    async fn failing_google_falls_through_to_duckduckgo() {
        let (google, google_hits) =
            stub_server("503 Service Unavailable", json!({ "error": "quota" })).await;
        let (duckduckgo, duckduckgo_hits) = stub_server("200 OK", mars_topics()).await;
        let retriever = WebSearchRetriever::new(&with_google(google, duckduckgo)).unwrap();

        let results = retriever
            .search(&query("capital of mars"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://duckduckgo.com/Mars");
        assert_eq!(google_hits.load(Ordering::SeqCst), 1);
        assert_eq!(duckduckgo_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_google_results_fall_through_to_duckduckgo() {
        let (google, google_hits) = stub_server("200 OK", json!({ "items": [] })).await;
        let (duckduckgo, duckduckgo_hits) = stub_server("200 OK", mars_topics()).await;
        let retriever = WebSearchRetriever::new(&with_google(google, duckduckgo)).unwrap();

        let results = retriever
            .search(&query("capital of mars"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results[0].title, "Mars");
        assert_eq!(google_hits.load(Ordering::SeqCst), 1);
        assert_eq!(duckduckgo_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn google_results_skip_duckduckgo() {
        let (google, _) = stub_server(
            "200 OK",
            json!({
                "items": [
                    { "title": "Mars", "link": "https://example.org/mars", "snippet": "No capital" }
                ]
            }),
        )
        .await;
        let (duckduckgo, duckduckgo_hits) = stub_server("200 OK", mars_topics()).await;
        let retriever = WebSearchRetriever::new(&with_google(google, duckduckgo)).unwrap();

        let results = retriever
            .search(&query("capital of mars"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results[0].url, "https://example.org/mars");
        assert_eq!(duckduckgo_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hung_backend_is_retried_exactly_once() {
        let (endpoint, accepted) = silent_server().await;
        let retriever = WebSearchRetriever::new(&config(endpoint, 100)).unwrap();

        let error = retriever
            .search(&query("capital of mars"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            PipelineError::FallbackUnavailable(message) if message.contains("timed out")
        ));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_search() {
        let (endpoint, _accepted) = silent_server().await;
        let retriever = WebSearchRetriever::new(&config(endpoint, 10_000)).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let error = retriever.search(&query("capital of mars"), &cancel).await.unwrap_err();
        assert!(matches!(error, PipelineError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
