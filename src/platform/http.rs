//! HTTP plumbing shared by the platform clients

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::PlatformError;
use crate::report::OutcomeStatus;

const USER_AGENT_VALUE: &str = concat!("repowarden/", env!("CARGO_PKG_VERSION"));

/// Build a client with the platform's default headers and a finite timeout
pub(crate) fn build_client(
    mut headers: HeaderMap,
    timeout: Duration,
) -> Result<Client, PlatformError> {
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(PlatformError::from)
}

/// Header value holding a secret
pub(crate) fn secret_header(value: &str) -> Result<HeaderValue, PlatformError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        PlatformError::InvalidCredentials(
            "credential contains characters not allowed in an HTTP header".to_string(),
        )
    })?;
    header.set_sensitive(true);
    Ok(header)
}

pub(crate) fn parse_api_base(api_base: &str) -> Result<Url, PlatformError> {
    let url = Url::parse(api_base)
        .map_err(|_| PlatformError::InvalidApiBase(api_base.to_string()))?;

    if url.cannot_be_a_base() {
        return Err(PlatformError::InvalidApiBase(api_base.to_string()));
    }

    Ok(url)
}

/// Append path segments to the API base, percent-encoding each one.
///
/// A `/` inside a segment is encoded, so `group/project` stays one segment.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Interpret the response to a mutating call.
///
/// Any 2xx/3xx is applied; everything else becomes a failure carrying the
/// response body. Only a failure to read the body is an error.
pub(crate) async fn outcome_from_response(response: Response) -> Result<OutcomeStatus, PlatformError> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(OutcomeStatus::Applied);
    }

    let body = response.text().await?;
    Ok(OutcomeStatus::failed(format!(
        "HTTP {}: {}",
        status.as_u16(),
        body.trim()
    )))
}

/// Decode a listing page, turning any non-2xx response into an error
pub(crate) async fn read_page<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(PlatformError::Api {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| PlatformError::Decode(e.to_string()))
}
