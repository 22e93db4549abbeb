// Gateway REST client
//
// Wraps `reqwest::Client` with deCONZ URL construction and error-envelope
// unwrapping. The bridge only ever reads from the gateway: resource
// listings for the poller and `config` for stream discovery.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::gateway::models::{EndpointSnapshot, ErrorItem, GatewayConfig};
use crate::transport::TransportConfig;

/// HTTP client for a deCONZ gateway.
///
/// `base_url` is the authenticated API root, e.g.
/// `http://192.168.1.118/api/B9FAF065F0/`. Resource paths are joined onto it,
/// so it always carries a trailing slash.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GatewayClient {
    /// Create a new gateway client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a gateway client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
        }
    }

    /// Build the API root from a gateway address and API key:
    /// `{gateway}/api/{key}/`.
    pub fn api_root(gateway: &Url, api_key: &str) -> Result<Url, Error> {
        Ok(with_trailing_slash(gateway.clone()).join(&format!("api/{api_key}/"))?)
    }

    /// The API root all requests are relative to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List every endpoint of a resource class, keyed by local id.
    ///
    /// `GET {base}/{resource_class}`
    pub async fn list(
        &self,
        resource_class: &str,
    ) -> Result<BTreeMap<String, EndpointSnapshot>, Error> {
        let url = self.base_url.join(resource_class)?;
        debug!(resource_class, "listing endpoints");
        self.get(url).await
    }

    /// Gateway configuration, including the event WebSocket port.
    ///
    /// `GET {base}/config`
    pub async fn gateway_config(&self) -> Result<GatewayConfig, Error> {
        let url = self.base_url.join("config")?;
        self.get(url).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        // deCONZ answers errors with an array, usually alongside 403/404.
        if body.trim_start().starts_with('[') {
            if let Some(err) = parse_error_envelope(&body) {
                return Err(err);
            }
        }

        if !status.is_success() {
            return Err(Error::Gateway {
                kind: status.as_u16(),
                address: String::new(),
                description: format!("HTTP {status}"),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

fn parse_error_envelope(body: &str) -> Option<Error> {
    let items: Vec<ErrorItem> = serde_json::from_str(body).ok()?;
    let first = items.into_iter().next()?;
    Some(Error::Gateway {
        kind: first.error.kind,
        address: first.error.address,
        description: first.error.description,
    })
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
