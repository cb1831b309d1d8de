use crate::error::DevModeError;
use std::io::Read;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    /// Path plus query string, e.g. `/VAADIN/app.js?v=3`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Sends `request` to `base_url` and returns the upstream answer unchanged.
/// HTTP error statuses are part of the answer, only transport failures are
/// errors.
pub(crate) fn forward(
    agent: &ureq::Agent,
    base_url: &str,
    request: &ProxyRequest,
) -> Result<ProxyResponse, DevModeError> {
    let url = format!("{base_url}{}", request.path);
    let mut upstream = agent.request(&request.method, &url);
    for (name, value) in &request.headers {
        if !is_hop_by_hop(name) {
            upstream = upstream.set(name, value);
        }
    }

    let result = if request.body.is_empty() {
        upstream.call()
    } else {
        upstream.send_bytes(&request.body)
    };

    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => {
            return Err(DevModeError::Proxy(transport.to_string()));
        }
    };

    read_response(response)
}

fn read_response(response: ureq::Response) -> Result<ProxyResponse, DevModeError> {
    let status = response.status();
    let mut headers = Vec::new();
    for name in response.headers_names() {
        if is_hop_by_hop(&name) {
            continue;
        }
        for value in response.all(&name) {
            headers.push((name.clone(), value.to_string()));
        }
    }

    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|err| DevModeError::Proxy(err.to_string()))?;

    Ok(ProxyResponse { status, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_headers_are_filtered_case_insensitively() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("x-request-id"));
    }

    #[test]
    fn response_header_lookup_ignores_case() {
        let response = ProxyResponse {
            status: 200,
            headers: vec![("content-type".into(), "text/javascript".into())],
            body: Vec::new(),
        };
        assert_eq!(response.header("Content-Type"), Some("text/javascript"));
        assert_eq!(response.header("etag"), None);
    }
}
