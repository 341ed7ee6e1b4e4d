//! Client for the engine server's `POST /api/search` endpoint.

use crate::aggregate::{aggregate, RawResultPayload};
use crate::error::{Error, Result};
use crate::model::{AggregatedResultSet, ArchiveDescriptor, SearchRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub const SEARCH_PATH: &str = "/api/search";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8888";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchBody {
    pub query: String,
    /// Archive indices in their string form, as the web client sends them.
    pub archives: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl SearchBody {
    /// Validate a submission at the request-building boundary. The CLI path
    /// validates separately; this runs regardless of what the caller checked.
    pub fn from_request(request: &SearchRequest) -> Result<Self> {
        if request.archive_ids.is_empty() {
            return Err(Error::UserInput("Please select at least one archive.".into()));
        }
        if request.query.trim().is_empty() {
            return Err(Error::UserInput("Please enter a search query.".into()));
        }
        if let Some(id) = request
            .archive_ids
            .iter()
            .find(|id| ArchiveDescriptor::by_id(**id).is_none())
        {
            return Err(Error::UserInput(format!("Unknown archive index {id}.")));
        }
        Ok(Self {
            query: request.query.clone(),
            archives: request
                .archive_ids
                .iter()
                .map(u32::to_string)
                .collect(),
        })
    }
}

pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("forarchives/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }

    /// Submit a search and aggregate whatever payload comes back.
    pub async fn search(&self, request: &SearchRequest) -> Result<AggregatedResultSet> {
        let body = SearchBody::from_request(request)?;
        let url = self.endpoint();
        info!(url = %url, query = %body.query, archives = body.archives.len(), "submitting search");

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(status = status.as_u16(), bytes = text.len(), "search response");
        let payload = parse_reply(status.as_u16(), status.is_success(), &text)?;
        if payload.is_empty() {
            debug!("server returned no result entries");
        }
        Ok(aggregate(&payload))
    }
}

fn parse_reply(status: u16, success: bool, body: &str) -> Result<RawResultPayload> {
    let reply: Option<SearchReply> = serde_json::from_str(body).ok();
    if let Some(msg) = reply.as_ref().and_then(|r| r.error.clone()) {
        return Err(Error::Server {
            status,
            message: msg,
        });
    }
    if !success {
        return Err(Error::Server {
            status,
            message: body.trim().to_string(),
        });
    }
    match reply {
        Some(r) => Ok(RawResultPayload::from_value(r.results.unwrap_or(Value::Null))),
        None => Err(Error::Server {
            status,
            message: "response is not a JSON object".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_serializes_archives_as_strings() {
        let req = SearchRequest::new("q", [2, 0]);
        let body = SearchBody::from_request(&req).unwrap();
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"query": "q", "archives": ["0", "2"]})
        );
    }

    #[test]
    fn zero_archives_is_user_input_error() {
        let req = SearchRequest::new("q", Vec::<u32>::new());
        assert!(matches!(
            SearchBody::from_request(&req),
            Err(Error::UserInput(_))
        ));
    }

    #[test]
    fn unknown_archive_is_user_input_error() {
        let req = SearchRequest::new("q", [0, 99]);
        assert!(matches!(
            SearchBody::from_request(&req),
            Err(Error::UserInput(_))
        ));
    }

    #[test]
    fn reply_with_results() {
        let payload = parse_reply(200, true, r#"{"results": ["moe", {"num": 1}]}"#).unwrap();
        let set = aggregate(&payload);
        assert_eq!(set.posts[0].source, "moe");
    }

    #[test]
    fn reply_with_error_body() {
        let err = parse_reply(200, true, r#"{"error": "list index out of range"}"#).unwrap_err();
        assert!(matches!(err, Error::Server { status: 200, ref message } if message == "list index out of range"));
        let err = parse_reply(500, false, r#"{"error": "boom"}"#).unwrap_err();
        assert!(matches!(err, Error::Server { status: 500, .. }));
    }

    #[test]
    fn reply_non_success_without_json() {
        let err = parse_reply(502, false, "Bad Gateway").unwrap_err();
        assert!(matches!(err, Error::Server { status: 502, ref message } if message == "Bad Gateway"));
    }

    #[test]
    fn reply_without_results_is_empty() {
        let payload = parse_reply(200, true, "{}").unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn endpoint_joins_cleanly() {
        let client = SearchClient::new("http://localhost:8888/").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8888/api/search");
    }
}
