//! Rule-document fetcher for the backend's GraphQL API.

use super::collaborators::{ContextFiltersFetcher, FetchOutcome};
use super::error::ContextFiltersError;
use super::refresh::{RefetchHintKind, RefetchIntervalHint};
use super::rules::RawContextFilters;
use async_trait::async_trait;
use ctxwire_config::ContextFiltersConfig;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const GRAPHQL_PATH: &str = ".api/graphql?ContextFilters";

pub const CONTEXT_FILTERS_QUERY: &str =
    "query ContextFilters { site { codyContextFilters(version: V1) { raw } } }";

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

pub struct GraphqlContextFiltersFetcher {
    client: reqwest::Client,
    endpoint: Url,
    access_token: Option<String>,
    config: ContextFiltersConfig,
}

impl GraphqlContextFiltersFetcher {
    /// `instance_url` is the backend root, e.g. `https://sourcegraph.example.com/`.
    pub fn new(
        client: reqwest::Client,
        instance_url: &Url,
        access_token: Option<String>,
        config: ContextFiltersConfig,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            endpoint: instance_url.join(GRAPHQL_PATH)?,
            access_token,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn query(&self) -> Result<Option<RawContextFilters>, ContextFiltersError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "query": CONTEXT_FILTERS_QUERY, "variables": {} }));
        if let Some(token) = self.access_token.as_deref() {
            let value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|err| ContextFiltersError::Backend(format!("invalid access token: {err}")))?;
            request = request.header(AUTHORIZATION, value);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ContextFiltersError::Network(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ContextFiltersError::Network(err.to_string()))?;

        let parsed = serde_json::from_str::<GraphqlResponse>(&text);
        if let Ok(GraphqlResponse {
            errors: Some(errors),
            ..
        }) = &parsed
            && let Some(error) = classify_errors(errors)
        {
            return Err(error);
        }

        if !status.is_success() {
            return Err(ContextFiltersError::Http {
                status: status.as_u16(),
            });
        }

        let response = parsed.map_err(|err| ContextFiltersError::MalformedResponse(err.to_string()))?;
        extract_raw(response.data)
    }

    fn hint_for(&self, result: &Result<Option<RawContextFilters>, ContextFiltersError>) -> RefetchIntervalHint {
        let kind = match result {
            Ok(_) => RefetchHintKind::Success,
            Err(ContextFiltersError::UnsupportedBackend) => RefetchHintKind::Permanent,
            Err(ContextFiltersError::Network(_) | ContextFiltersError::Cancelled) => {
                RefetchHintKind::Ephemeral
            }
            Err(_) => RefetchHintKind::Transient,
        };
        RefetchIntervalHint::from_config(kind, &self.config)
    }
}

fn classify_errors(errors: &[GraphqlError]) -> Option<ContextFiltersError> {
    let first = errors.first()?;
    let unsupported = errors.iter().any(|error| {
        error.message.contains("Cannot query field") && error.message.contains("codyContextFilters")
    });
    if unsupported {
        debug!("backend predates context filters");
        return Some(ContextFiltersError::UnsupportedBackend);
    }
    Some(ContextFiltersError::Backend(first.message.clone()))
}

fn extract_raw(data: Option<Value>) -> Result<Option<RawContextFilters>, ContextFiltersError> {
    let filters = data
        .as_ref()
        .and_then(|data| data.get("site"))
        .and_then(|site| site.get("codyContextFilters"))
        .ok_or_else(|| {
            ContextFiltersError::MalformedResponse("missing site.codyContextFilters".to_string())
        })?;

    match filters.get("raw") {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value::<RawContextFilters>(raw.clone())
            .map(Some)
            .map_err(|err| ContextFiltersError::MalformedResponse(err.to_string())),
    }
}

#[async_trait]
impl ContextFiltersFetcher for GraphqlContextFiltersFetcher {
    async fn fetch_context_filters(&self, cancel: CancellationToken) -> FetchOutcome {
        let filters = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ContextFiltersError::Cancelled),
            result = self.query() => result,
        };

        if let Err(error) = &filters
            && !matches!(error, ContextFiltersError::UnsupportedBackend)
        {
            warn!(endpoint = %self.endpoint, error = %error, "context filters request failed");
        }

        let hint = self.hint_for(&filters);
        FetchOutcome { filters, hint }
    }
}
