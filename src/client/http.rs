//! REST client for hosted search indexes (Algolia v1 API).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{DestinationIndex, PageStream, SourceIndex};
use crate::config::IndexConfig;
use crate::error::{FerryError, Result};
use crate::models::{Page, Record, SettingsBlob};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const APP_ID_HEADER: &str = "X-Algolia-Application-Id";
const API_KEY_HEADER: &str = "X-Algolia-API-Key";

/// One index on a hosted application
#[derive(Clone)]
pub struct AlgoliaIndex {
    http: reqwest::Client,
    read_host: String,
    write_host: String,
    index: String,
}

impl std::fmt::Debug for AlgoliaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgoliaIndex")
            .field("read_host", &self.read_host)
            .field("index", &self.index)
            .finish()
    }
}

/// Failed request, before it is mapped to a source or destination error
#[derive(Debug)]
struct RequestFailure {
    message: String,
    retryable: bool,
}

impl From<reqwest::Error> for RequestFailure {
    fn from(e: reqwest::Error) -> Self {
        Self {
            retryable: e.is_timeout() || e.is_connect() || e.is_request(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BrowseResponse {
    #[serde(default)]
    hits: Vec<Record>,
    #[serde(default)]
    cursor: Option<String>,
}

enum BrowseState {
    Start(String),
    Cursor(String),
    Done,
}

impl AlgoliaIndex {
    /// Build a client for one index. `headers` are added to every request.
    pub fn new(config: &IndexConfig, headers: &BTreeMap<String, String>) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(APP_ID_HEADER, header_value(&config.app_id)?);
        default_headers.insert(API_KEY_HEADER, header_value(&config.api_key)?);
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FerryError::Config(format!("invalid header name {name:?}: {e}")))?;
            default_headers.insert(name, header_value(value)?);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let (read_host, write_host) = match config.host.as_deref() {
            Some(host) => (normalize_host(host), normalize_host(host)),
            None => (
                format!("https://{}-dsn.algolia.net", config.app_id),
                format!("https://{}.algolia.net", config.app_id),
            ),
        };

        Ok(Self {
            http,
            read_host,
            write_host,
            index: config.index.clone(),
        })
    }

    fn url(&self, host: &str, suffix: &str) -> String {
        format!(
            "{}/1/indexes/{}/{}",
            host,
            urlencoding::encode(&self.index),
            suffix
        )
    }

    async fn request(
        &self,
        method: Method,
        url: String,
        body: Option<&Value>,
    ) -> std::result::Result<Value, RequestFailure> {
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RequestFailure {
                message: format!("{} returned {}: {}", url, status, text.trim()),
                retryable: is_retryable_status(status),
            });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SourceIndex for AlgoliaIndex {
    fn name(&self) -> &str {
        &self.index
    }

    fn browse(&self, request_options: &Map<String, Value>) -> PageStream {
        let params = browse_params(request_options);
        let index = self.clone();

        stream::try_unfold(BrowseState::Start(params), move |state| {
            let index = index.clone();
            async move {
                let body = match state {
                    BrowseState::Start(params) => json!({ "params": params }),
                    BrowseState::Cursor(cursor) => json!({ "cursor": cursor }),
                    BrowseState::Done => return Ok(None),
                };

                let url = index.url(&index.read_host, "browse");
                let value = index
                    .request(Method::POST, url, Some(&body))
                    .await
                    .map_err(|f| FerryError::SourceFetch(f.message))?;
                let resp: BrowseResponse = serde_json::from_value(value)
                    .map_err(|e| FerryError::SourceFetch(format!("bad browse response: {e}")))?;

                let next = match resp.cursor {
                    Some(cursor) if !cursor.is_empty() => BrowseState::Cursor(cursor),
                    _ => BrowseState::Done,
                };
                Ok::<_, FerryError>(Some((Page::new(resp.hits), next)))
            }
        })
        .boxed()
    }

    async fn get_settings(&self) -> Result<SettingsBlob> {
        let url = self.url(&self.read_host, "settings");
        self.request(Method::GET, url, None)
            .await
            .map_err(|f| FerryError::SettingsReplication(f.message))
    }
}

#[async_trait]
impl DestinationIndex for AlgoliaIndex {
    fn name(&self) -> &str {
        &self.index
    }

    async fn add_objects(&self, records: &[Record]) -> Result<()> {
        let url = self.url(&self.write_host, "batch");
        let body = batch_body(records);
        self.request(Method::POST, url, Some(&body))
            .await
            .map(|_| ())
            .map_err(|f| FerryError::DestinationWrite {
                message: f.message,
                retryable: f.retryable,
            })
    }

    async fn set_settings(&self, settings: &SettingsBlob) -> Result<()> {
        let url = self.url(&self.write_host, "settings");
        self.request(Method::PUT, url, Some(settings))
            .await
            .map(|_| ())
            .map_err(|f| FerryError::SettingsReplication(f.message))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| FerryError::Config(format!("invalid header value: {e}")))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Encode browse options as a query string. Every attribute is retrieved
/// unless the options say otherwise.
fn browse_params(request_options: &Map<String, Value>) -> String {
    let mut options = Map::new();
    options.insert("attributesToRetrieve".into(), Value::String("*".into()));
    for (key, value) in request_options {
        options.insert(key.clone(), value.clone());
    }

    options
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Records carrying an `objectID` are upserted, the rest get generated ids.
fn batch_body(records: &[Record]) -> Value {
    let requests: Vec<Value> = records
        .iter()
        .map(|record| {
            let action = if record.get("objectID").is_some() {
                "updateObject"
            } else {
                "addObject"
            };
            json!({ "action": action, "body": record })
        })
        .collect();
    json!({ "requests": requests })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_config(index: &str) -> IndexConfig {
        IndexConfig {
            app_id: "APP123".into(),
            api_key: "secret".into(),
            index: index.into(),
            host: None,
        }
    }

    #[test]
    fn test_default_hosts() {
        let index = AlgoliaIndex::new(&index_config("products"), &BTreeMap::new()).unwrap();
        assert_eq!(
            index.url(&index.read_host, "browse"),
            "https://APP123-dsn.algolia.net/1/indexes/products/browse"
        );
        assert_eq!(
            index.url(&index.write_host, "batch"),
            "https://APP123.algolia.net/1/indexes/products/batch"
        );
    }

    #[test]
    fn test_host_override_and_encoded_index() {
        let mut config = index_config("my index/v2");
        config.host = Some("http://localhost:8080/".into());
        let index = AlgoliaIndex::new(&config, &BTreeMap::new()).unwrap();
        assert_eq!(
            index.url(&index.write_host, "settings"),
            "http://localhost:8080/1/indexes/my%20index%2Fv2/settings"
        );
    }

    #[test]
    fn test_invalid_extra_header_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let result = AlgoliaIndex::new(&index_config("products"), &headers);
        assert!(matches!(result, Err(FerryError::Config(_))));
    }

    #[test]
    fn test_browse_params_default_retrieves_everything() {
        assert_eq!(browse_params(&Map::new()), "attributesToRetrieve=%2A");
    }

    #[test]
    fn test_browse_params_request_options_override() {
        let mut options = Map::new();
        options.insert("attributesToRetrieve".into(), json!(["objectID", "title"]));
        options.insert("filters".into(), json!("brand:acme"));

        let params = browse_params(&options);
        assert!(params.contains("attributesToRetrieve=%5B%22objectID%22%2C%22title%22%5D"));
        assert!(params.contains("filters=brand%3Aacme"));
        assert!(!params.contains("%2A"));
    }

    #[test]
    fn test_batch_body_actions() {
        let records = vec![json!({"objectID": "1", "title": "a"}), json!({"title": "b"})];
        let body = batch_body(&records);
        let requests = body["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["action"], "updateObject");
        assert_eq!(requests[0]["body"]["objectID"], "1");
        assert_eq!(requests[1]["action"], "addObject");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    mod server {
        use super::*;
        use futures::TryStreamExt;
        use wiremock::matchers::{body_json, body_partial_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const INDEX_PATH: &str = "/1/indexes/products";

        fn index_for(server: &MockServer) -> AlgoliaIndex {
            let mut config = index_config("products");
            config.host = Some(server.uri());
            let mut headers = BTreeMap::new();
            headers.insert("X-Forwarded-For".to_string(), "10.0.0.7".to_string());
            AlgoliaIndex::new(&config, &headers).unwrap()
        }

        fn authenticated(m: wiremock::MockBuilder) -> wiremock::MockBuilder {
            m.and(header("X-Algolia-Application-Id", "APP123"))
                .and(header("X-Algolia-API-Key", "secret"))
                .and(header("X-Forwarded-For", "10.0.0.7"))
        }

        #[tokio::test]
        async fn test_browse_follows_cursor_until_exhausted() {
            let server = MockServer::start().await;
            authenticated(Mock::given(method("POST")))
                .and(path(format!("{INDEX_PATH}/browse")))
                .and(body_partial_json(json!({"params": "attributesToRetrieve=%2A"})))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "hits": [{"objectID": "1"}, {"objectID": "2"}],
                    "cursor": "page-2"
                })))
                .expect(1)
                .mount(&server)
                .await;
            authenticated(Mock::given(method("POST")))
                .and(path(format!("{INDEX_PATH}/browse")))
                .and(body_json(json!({"cursor": "page-2"})))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({"hits": [{"objectID": "3"}]})),
                )
                .expect(1)
                .mount(&server)
                .await;

            let pages: Vec<Page> = index_for(&server)
                .browse(&Map::new())
                .try_collect()
                .await
                .unwrap();

            assert_eq!(pages.iter().map(Page::len).collect::<Vec<_>>(), vec![2, 1]);
            assert_eq!(pages[1].hits[0]["objectID"], "3");
        }

        #[tokio::test]
        async fn test_browse_error_is_source_fetch() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path(format!("{INDEX_PATH}/browse")))
                .respond_with(ResponseTemplate::new(403).set_body_string("invalid key"))
                .mount(&server)
                .await;

            let result: Result<Vec<Page>> =
                index_for(&server).browse(&Map::new()).try_collect().await;

            match result {
                Err(FerryError::SourceFetch(message)) => assert!(message.contains("403")),
                other => panic!("expected SourceFetch, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_batch_sends_headers_and_records() {
            let server = MockServer::start().await;
            authenticated(Mock::given(method("POST")))
                .and(path(format!("{INDEX_PATH}/batch")))
                .and(body_json(batch_body(&[json!({"objectID": "1"})])))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskID": 1})))
                .expect(1)
                .mount(&server)
                .await;

            index_for(&server)
                .add_objects(&[json!({"objectID": "1"})])
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_batch_server_error_is_retryable() {
            for (status, retryable) in [(503u16, true), (429, true), (400, false)] {
                let server = MockServer::start().await;
                Mock::given(method("POST"))
                    .and(path(format!("{INDEX_PATH}/batch")))
                    .respond_with(ResponseTemplate::new(status))
                    .mount(&server)
                    .await;

                let err = index_for(&server)
                    .add_objects(&[json!({"objectID": "1"})])
                    .await
                    .unwrap_err();

                let flagged = matches!(
                    err,
                    FerryError::DestinationWrite { retryable: r, .. } if r == retryable
                );
                assert!(flagged, "status {status}: {err:?}");
                assert_eq!(err.is_retryable(), retryable);
            }
        }

        #[tokio::test]
        async fn test_settings_round_trip_through_both_clients() {
            let settings = json!({"searchableAttributes": ["title"]});
            let server = MockServer::start().await;
            authenticated(Mock::given(method("GET")))
                .and(path(format!("{INDEX_PATH}/settings")))
                .respond_with(ResponseTemplate::new(200).set_body_json(settings.clone()))
                .expect(1)
                .mount(&server)
                .await;
            authenticated(Mock::given(method("PUT")))
                .and(path(format!("{INDEX_PATH}/settings")))
                .and(body_json(settings.clone()))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskID": 2})))
                .expect(1)
                .mount(&server)
                .await;

            let source = index_for(&server);
            let destination = index_for(&server);
            crate::settings::replicate_settings(&source, &destination)
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_browse_response_without_cursor() {
        let resp: BrowseResponse =
            serde_json::from_value(json!({"hits": [{"objectID": "1"}], "nbHits": 1})).unwrap();
        assert_eq!(resp.hits.len(), 1);
        assert!(resp.cursor.is_none());
    }
}
