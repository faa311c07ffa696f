//! Upstream endpoint construction and request dispatch.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Content type sent with every upstream request body.
pub const UPSTREAM_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Build the regional endpoint URL for a resolved backend model.
///
/// Models in the `meta` family are served through the OpenAPI-style chat
/// completions endpoint; everything else goes to the publisher-scoped
/// `streamRawPredict` endpoint. `base` overrides the regional origin, which
/// keeps the path shape intact while pointing elsewhere.
pub fn endpoint_url(base: Option<&str>, location: &str, project_id: &str, model: &str) -> String {
    let origin = match base {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("https://{location}-aiplatform.googleapis.com"),
    };
    if model.starts_with("meta") {
        format!(
            "{origin}/v1beta1/projects/{project_id}/locations/{location}/endpoints/openapi/chat/completions"
        )
    } else {
        format!(
            "{origin}/v1/projects/{project_id}/locations/{location}/publishers/anthropic/models/{model}:streamRawPredict"
        )
    }
}

/// Send one request to the upstream endpoint.
///
/// Returns the response with its body unread so the caller can stream it.
/// Connection errors and non-2xx statuses both surface as `Upstream`.
pub async fn dispatch(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
    body: &Value,
) -> Result<reqwest::Response, RelayError> {
    let response = client
        .post(url)
        .bearer_auth(access_token)
        // header() appends rather than replaces; the charset form must go on
        // before json() inserts a bare application/json.
        .header(reqwest::header::CONTENT_TYPE, UPSTREAM_CONTENT_TYPE)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            warn!(url = %url, error = %e, "Upstream request failed");
            RelayError::Upstream(format!("request failed: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!(url = %url, status = %status, "Upstream returned error status");
        return Err(RelayError::Upstream(format!("upstream status {status}")));
    }

    debug!(url = %url, status = %status, "Upstream request accepted");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_for_publisher_models() {
        let url = endpoint_url(None, "us-east5", "proj-1", "claude-3-5-sonnet@20240620");
        assert_eq!(
            url,
            "https://us-east5-aiplatform.googleapis.com/v1/projects/proj-1/locations/us-east5/publishers/anthropic/models/claude-3-5-sonnet@20240620:streamRawPredict"
        );
    }

    #[test]
    fn test_endpoint_url_for_meta_models() {
        let url = endpoint_url(None, "us-central1", "proj-2", "meta/llama3-405b-instruct-maas");
        assert_eq!(
            url,
            "https://us-central1-aiplatform.googleapis.com/v1beta1/projects/proj-2/locations/us-central1/endpoints/openapi/chat/completions"
        );
    }

    #[test]
    fn test_endpoint_url_base_override() {
        let url = endpoint_url(
            Some("http://127.0.0.1:4120/"),
            "europe-west1",
            "proj-3",
            "claude-3-opus",
        );
        assert_eq!(
            url,
            "http://127.0.0.1:4120/v1/projects/proj-3/locations/europe-west1/publishers/anthropic/models/claude-3-opus:streamRawPredict"
        );
    }
}
