//! HTTP health and JSON-RPC probes against the node.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::core::hex::parse_hex_u64;

/// Abstraction over the network so phase logic can run against fakes.
pub trait HttpProbe {
    /// Issue a GET and return the HTTP status code.
    fn get_status(&self, url: &str) -> Result<u16>;
    /// Issue a JSON-RPC call and return its `result` value.
    fn rpc(&self, url: &str, method: &str, params: Value) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// The only header field the orchestrator reads.
#[derive(Debug, Deserialize)]
struct Header {
    number: String,
}

/// Blocking HTTP client.
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(concat!("orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpProbe for HttpClient {
    fn get_status(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status().as_u16();
        trace!(url, status, "GET finished");
        Ok(status)
    }

    fn rpc(&self, url: &str, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .with_context(|| format!("send {method} to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{method} returned HTTP {status}");
        }
        let body: RpcResponse = response
            .json()
            .with_context(|| format!("decode {method} response"))?;
        decode_rpc(method, body)
    }
}

fn decode_rpc(method: &str, body: RpcResponse) -> Result<Value> {
    if let Some(err) = body.error {
        bail!("{method} failed: {} ({})", err.message, err.code);
    }
    body.result
        .filter(|value| !value.is_null())
        .with_context(|| format!("{method} returned no result"))
}

/// Whether `url` answers with a 2xx status.
pub fn is_healthy<H: HttpProbe>(http: &H, url: &str) -> Result<bool> {
    let status = http.get_status(url)?;
    Ok((200..300).contains(&status))
}

/// Whether any HTTP response comes back from `url`.
pub fn is_reachable<H: HttpProbe>(http: &H, url: &str) -> bool {
    match http.get_status(url) {
        Ok(status) => {
            debug!(url, status, "reachable");
            true
        }
        Err(err) => {
            debug!(url, err = %format!("{err:#}"), "unreachable");
            false
        }
    }
}

/// Current best block height, or `None` if unavailable or malformed.
pub fn read_block_height<H: HttpProbe>(http: &H, rpc_url: &str) -> Option<u64> {
    let result = match http.rpc(rpc_url, "chain_getHeader", json!([])) {
        Ok(result) => result,
        Err(err) => {
            debug!(err = %format!("{err:#}"), "block height unavailable");
            return None;
        }
    };
    let header: Header = serde_json::from_value(result).ok()?;
    let height = parse_hex_u64(&header.number);
    if height.is_none() {
        debug!(number = %header.number, "malformed block number");
    }
    height
}
