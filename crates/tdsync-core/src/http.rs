use crate::error::{Result, SyncError};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;

pub(crate) fn client() -> Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("tdsync/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Join a base URL and an API prefix without doubling slashes.
pub(crate) fn api_root(base_url: &str, prefix: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), prefix)
}

/// GitLab addresses namespaced paths as a single URL-encoded segment.
pub(crate) fn encode_path(path: &str) -> String {
    path.replace('/', "%2F")
}

/// Map non-success responses onto the error taxonomy. `what` names the
/// requested resource for `NotFound`.
pub(crate) fn ensure_success(resp: Response, service: &'static str, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = status.as_u16();
    let body = resp.text().unwrap_or_default();
    let mut message = error_message(&body);
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("no response body").to_string();
    }
    Err(match code {
        401 | 403 => SyncError::Auth {
            service,
            status: code,
            message,
        },
        404 => SyncError::NotFound {
            what: what.to_string(),
            message,
        },
        _ => SyncError::Api {
            service,
            status: code,
            message,
        },
    })
}

pub(crate) fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let body = resp.text()?;
    Ok(serde_json::from_str(&body)?)
}

/// Pull a human-readable message out of a GitLab or Thunderdome error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    for key in ["message", "error", "error_description"] {
        match value.get(key) {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_namespaced_paths() {
        assert_eq!(encode_path("acme/platform/api"), "acme%2Fplatform%2Fapi");
        assert_eq!(encode_path("acme"), "acme");
    }

    #[test]
    fn api_root_trims_trailing_slash() {
        assert_eq!(api_root("https://gitlab.com/", "/api/v4"), "https://gitlab.com/api/v4");
        assert_eq!(api_root("https://gitlab.com", "/api/v4"), "https://gitlab.com/api/v4");
    }

    #[test]
    fn extracts_messages_from_known_shapes() {
        assert_eq!(error_message(r#"{"message":"401 Unauthorized"}"#), "401 Unauthorized");
        assert_eq!(
            error_message(r#"{"success":false,"error":"INVALID_API_KEY"}"#),
            "INVALID_API_KEY"
        );
        assert_eq!(
            error_message(r#"{"message":{"weight":["is invalid"]}}"#),
            r#"{"weight":["is invalid"]}"#
        );
        assert_eq!(error_message("  plain text \n"), "plain text");
    }
}
