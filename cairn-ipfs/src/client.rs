//! Block get/put/provide over an external content-addressed service.
//!
//! Reads go through the gateway and are verified against their CID;
//! writes go through the node write API and are verified client-side
//! before they leave the process. A server that answers a put with a
//! different CID is logged, not trusted and not fatal.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cairn_core::{check_cid, Cid, Error, Result};

use crate::pin::RemotePinner;

/// Block service configuration.
#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// Read gateway base URL. Required; unreachability is fatal.
    pub gateway_url: String,
    /// Node write API base URL. Optional; unreachability downgrades.
    pub api_url: Option<String>,
    /// Remote pinning service base URL.
    pub remote_pin_url: Option<String>,
    /// Ask for put capability.
    pub want_put: bool,
    /// Ask for remote-pin capability (requires put).
    pub want_pin: bool,
    /// Ask for provide capability (requires pin).
    pub want_provide: bool,
    /// Minimum delay between remote pin requests.
    pub pin_min_delay: Duration,
    /// Consecutive pin failures that trip the breaker.
    pub pin_breaker_threshold: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl IpfsConfig {
    /// Configuration with only the read gateway.
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            api_url: None,
            remote_pin_url: None,
            want_put: false,
            want_pin: false,
            want_provide: false,
            pin_min_delay: Duration::from_millis(200),
            pin_breaker_threshold: 5,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Enable writes through a node API.
    pub fn with_api(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self.want_put = true;
        self
    }

    /// Enable the remote pin side channel.
    pub fn with_remote_pin(mut self, url: impl Into<String>) -> Self {
        self.remote_pin_url = Some(url.into());
        self.want_pin = true;
        self
    }

    /// Enable providing after pin.
    pub fn with_provide(mut self) -> Self {
        self.want_provide = true;
        self
    }
}

/// What the client is actually allowed to do, resolved at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Blocks may be written to the node API.
    pub put: bool,
    /// Successful puts are mirrored to the remote pin service.
    pub pin: bool,
    /// Written blocks are announced to the routing system.
    pub provide: bool,
}

impl Capabilities {
    /// Resolve the capability ladder: put needs a reachable write API,
    /// pin needs put plus a pin endpoint, provide needs pin.
    pub fn resolve(config: &IpfsConfig, api_reachable: bool) -> Self {
        let put = config.want_put && config.api_url.is_some() && api_reachable;
        let pin = config.want_pin && put && config.remote_pin_url.is_some();
        let provide = config.want_provide && pin;
        Self { put, pin, provide }
    }
}

/// Client for the content-addressed block service.
pub struct BlockClient {
    http: reqwest::Client,
    config: IpfsConfig,
    capabilities: Capabilities,
    pinner: Option<RemotePinner>,
}

impl BlockClient {
    /// Probe the endpoints and build the client.
    ///
    /// Gateway unreachability is a fatal `Config` error. Write API
    /// unreachability only downgrades capabilities.
    pub async fn connect(config: IpfsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;

        // Any HTTP response proves the gateway answers; only transport
        // failures are fatal.
        http.get(config.gateway_url.trim_end_matches('/'))
            .send()
            .await
            .map_err(|e| Error::config(format!("block gateway unreachable: {e}")))?;

        let api_reachable = match (&config.api_url, config.want_put) {
            (Some(api_url), true) => {
                let probe = http
                    .post(format!("{}/api/v0/version", api_url.trim_end_matches('/')))
                    .send()
                    .await;
                match probe {
                    Ok(response) if response.status().is_success() => true,
                    Ok(response) => {
                        warn!(status = %response.status(), "write api refused probe, writes disabled");
                        false
                    }
                    Err(e) => {
                        warn!(error = %e, "write api unreachable, writes disabled");
                        false
                    }
                }
            }
            _ => false,
        };

        let capabilities = Capabilities::resolve(&config, api_reachable);
        info!(?capabilities, "block client ready");

        let pinner = if capabilities.pin {
            config.remote_pin_url.as_ref().map(|url| {
                RemotePinner::new(
                    http.clone(),
                    url.clone(),
                    config.pin_min_delay,
                    config.pin_breaker_threshold,
                )
            })
        } else {
            None
        };

        Ok(Self {
            http,
            config,
            capabilities,
            pinner,
        })
    }

    /// Resolved capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Fetch and verify a block, honoring `cancel` while in flight.
    pub async fn get(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let url = format!("{}/ipfs/{cid}", self.config.gateway_url.trim_end_matches('/'));
        let request = self
            .http
            .get(url)
            .header("Accept", "application/vnd.ipld.raw")
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request => {
                response.map_err(|e| Error::transport(format!("block fetch {cid}: {e}")))?
            }
        };
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(Error::not_found(format!("block {cid}")));
        }
        if !status.is_success() {
            return Err(Error::transport(format!("block fetch {cid}: http {status}")));
        }
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.bytes() => {
                body.map_err(|e| Error::transport(format!("block fetch {cid}: {e}")))?
            }
        };
        let data = body.to_vec();
        check_cid(&data, cid)?;
        Ok(data)
    }

    /// Write a block to the node API and queue a remote pin.
    ///
    /// No-op when the put capability is off. The bytes are verified
    /// before they are sent; a `CidMismatch` here is the caller's bug.
    pub async fn put(&self, cid: &Cid, data: &[u8]) -> Result<()> {
        if !self.capabilities.put {
            debug!(%cid, "put skipped, capability off");
            return Ok(());
        }
        check_cid(data, cid)?;
        let api_url = self
            .config
            .api_url
            .as_ref()
            .ok_or_else(|| Error::config("put capability without api url"))?;
        let url = format!(
            "{}/api/v0/block/put?cid-codec=dag-cbor&mhtype=sha2-256&pin=true",
            api_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("block");
        let form = reqwest::multipart::Form::new().part("data", part);
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::transport(format!("block put {cid}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!("block put {cid}: http {status}")));
        }
        let reply: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("block put {cid}: {e}")))?;
        if let Some(key) = reply.get("Key").and_then(|k| k.as_str()) {
            if key != cid.to_string() {
                warn!(%cid, server_cid = key, "server disagreed about the block cid");
            }
        }

        if let Some(pinner) = &self.pinner {
            pinner.enqueue(*cid);
        }
        Ok(())
    }

    /// Announce a block to the routing system. Fire and forget.
    pub async fn provide(&self, cid: &Cid) {
        if !self.capabilities.provide {
            return;
        }
        let Some(api_url) = self.config.api_url.as_ref() else {
            return;
        };
        let url = format!(
            "{}/api/v0/routing/provide?arg={cid}",
            api_url.trim_end_matches('/')
        );
        match self.http.post(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(%cid, "block provided");
            }
            Ok(response) => debug!(%cid, status = %response.status(), "provide rejected"),
            Err(e) => debug!(%cid, error = %e, "provide failed"),
        }
    }

    /// The remote-pin breaker, when the side channel is configured.
    pub fn pin_breaker(&self) -> Option<&crate::pin::CircuitBreaker> {
        self.pinner.as_ref().map(|p| p.breaker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> IpfsConfig {
        IpfsConfig::new("http://gw.example")
            .with_api("http://api.example")
            .with_remote_pin("http://pins.example")
            .with_provide()
    }

    #[test]
    fn capability_ladder() {
        let config = full_config();
        let caps = Capabilities::resolve(&config, true);
        assert_eq!(
            caps,
            Capabilities {
                put: true,
                pin: true,
                provide: true
            }
        );

        // Unreachable write API downgrades everything.
        let caps = Capabilities::resolve(&config, false);
        assert_eq!(caps, Capabilities::default());
    }

    #[test]
    fn pin_requires_put_and_provide_requires_pin() {
        // No API at all: nothing is granted.
        let mut config = IpfsConfig::new("http://gw.example").with_provide();
        config.want_pin = true;
        let caps = Capabilities::resolve(&config, true);
        assert_eq!(caps, Capabilities::default());

        // Put without a pin endpoint: provide stays off.
        let config = IpfsConfig::new("http://gw.example")
            .with_api("http://api.example")
            .with_provide();
        let caps = Capabilities::resolve(&config, true);
        assert!(caps.put);
        assert!(!caps.pin);
        assert!(!caps.provide);
    }
}
