//! RTMP endpoint URL parsing.

use url::Url;

use crate::error::TransportError;
use crate::{TransportResult, DEFAULT_RTMP_PORT};

/// A parsed `rtmp://host[:port]/app[/]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpEndpoint {
    pub host: String,
    pub port: u16,
    pub app: String,
}

impl RtmpEndpoint {
    pub fn parse(url: &str) -> TransportResult<Self> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        match parsed.scheme() {
            "rtmp" => {}
            "rtmps" => return Err(TransportError::UnsupportedScheme("rtmps".to_string())),
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "URL must start with rtmp://, got {}://",
                    other
                )))
            }
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_RTMP_PORT);
        let app = parsed.path().trim_matches('/').to_string();

        if app.is_empty() {
            return Err(TransportError::InvalidUrl(
                "Missing application name in URL path".to_string(),
            ));
        }

        Ok(Self { host, port, app })
    }

    /// `host:port` for the TCP connect.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
