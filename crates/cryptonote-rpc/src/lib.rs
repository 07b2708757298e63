//! cryptonote-rpc
//!
//! Minimal, blocking HTTP client for a CryptoNote daemon's public endpoints.
//! Endpoints used:
//! - GET  /getheight
//! - POST /getinfo
//! - POST /getrandom_outs
//! - POST /sendrawtransaction
//!
//! [`RpcNodeClient`] adapts the client to the wallet core's `NodeClient`
//! boundary: requests complete inline and invoke the completion callback
//! before returning.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use log::warn;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use cryptonote_wallet_core::{NodeCallback, NodeClient, NodeError, RandomOutputEntry, RandomOutsForAmount};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url parse: {0}")]
    Url(#[from] url::ParseError),
    #[error("daemon returned error: {0}")]
    Daemon(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone)]
pub struct CryptoNoteRpc {
    base: Url,
    client: Client,
    auth_header: Option<HeaderValue>,
}

#[derive(Debug, Deserialize)]
pub struct GetHeightResponse {
    pub height: u64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct GetInfoResponse {
    pub height: u64,
    #[serde(default)]
    pub min_fee: u64,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct GetRandomOutsRequest<'a> {
    amounts: &'a [u64],
    outs_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RandomOutEntry {
    pub global_amount_index: u64,
    /// Hex-encoded 32-byte output key.
    pub out_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RandomOutsForAmountEntry {
    pub amount: u64,
    pub outs: Vec<RandomOutEntry>,
}

#[derive(Debug, Deserialize)]
pub struct GetRandomOutsResponse {
    pub outs: Vec<RandomOutsForAmountEntry>,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct SendRawTransactionRequest<'a> {
    tx_as_hex: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SendRawTransactionResponse {
    pub status: String,
}

impl CryptoNoteRpc {
    /// Create a new client. `base` like "http://127.0.0.1:32348".
    /// Optional basic auth via (user, pass).
    pub fn new(base: &str, auth: Option<(String, String)>) -> Result<Self, RpcError> {
        let base = Url::parse(base)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .default_headers(headers)
            .build()?;

        let auth_header = match auth {
            Some((user, pass)) => {
                let token = format!("{user}:{pass}");
                let encoded = general_purpose::STANDARD.encode(token);
                let header_value = HeaderValue::from_str(&format!("Basic {encoded}"))
                    .map_err(|e| RpcError::Decode(format!("auth header encode: {e}")))?;
                Some(header_value)
            }
            None => None,
        };

        Ok(Self { base, client, auth_header })
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(auth) = &self.auth_header {
            headers.insert(AUTHORIZATION, auth.clone());
        }
        headers
    }

    fn ensure_status_ok(status: &str, context: &str) -> Result<(), RpcError> {
        if status == "OK" {
            return Ok(());
        }
        Err(RpcError::Daemon(format!("{context} returned status {status}")))
    }

    fn post<P, R>(&self, path: &str, payload: &P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.base.join(path)?;
        let response = self
            .client
            .post(url)
            .headers(self.auth_headers())
            .json(payload)
            .send()?;
        if !response.status().is_success() {
            return Err(RpcError::Daemon(format!("{path} HTTP {}", response.status())));
        }
        Ok(response.json()?)
    }

    pub fn get_height(&self) -> Result<u64, RpcError> {
        let url = self.base.join("/getheight")?;
        let response = self.client.get(url).headers(self.auth_headers()).send()?;
        if !response.status().is_success() {
            return Err(RpcError::Daemon(format!("/getheight HTTP {}", response.status())));
        }
        let parsed: GetHeightResponse = response.json()?;
        Self::ensure_status_ok(&parsed.status, "/getheight")?;
        Ok(parsed.height)
    }

    pub fn get_info(&self) -> Result<GetInfoResponse, RpcError> {
        let parsed: GetInfoResponse = self.post("/getinfo", &serde_json::json!({}))?;
        Self::ensure_status_ok(&parsed.status, "/getinfo")?;
        Ok(parsed)
    }

    pub fn get_random_outs(
        &self,
        amounts: &[u64],
        outs_count: u64,
    ) -> Result<GetRandomOutsResponse, RpcError> {
        let parsed: GetRandomOutsResponse =
            self.post("/getrandom_outs", &GetRandomOutsRequest { amounts, outs_count })?;
        Self::ensure_status_ok(&parsed.status, "/getrandom_outs")?;
        Ok(parsed)
    }

    pub fn send_raw_transaction(&self, tx_as_hex: &str) -> Result<(), RpcError> {
        let parsed: SendRawTransactionResponse =
            self.post("/sendrawtransaction", &SendRawTransactionRequest { tx_as_hex })?;
        Self::ensure_status_ok(&parsed.status, "/sendrawtransaction")
    }
}

fn decode_out_key(out_key: &str) -> Result<[u8; 32], RpcError> {
    let bytes = hex::decode(out_key).map_err(|e| RpcError::Decode(format!("out_key: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| RpcError::Decode("out_key must be 32 bytes".into()))
}

fn convert_random_outs(response: GetRandomOutsResponse) -> Result<Vec<RandomOutsForAmount>, RpcError> {
    response
        .outs
        .into_iter()
        .map(|entry| {
            let outs = entry
                .outs
                .iter()
                .map(|out| {
                    Ok(RandomOutputEntry {
                        global_amount_index: out.global_amount_index,
                        out_key: decode_out_key(&out.out_key)?,
                    })
                })
                .collect::<Result<Vec<_>, RpcError>>()?;
            Ok(RandomOutsForAmount { amount: entry.amount, outs })
        })
        .collect()
}

/// `NodeClient` backed by the daemon RPC. Height and minimal fee reads fall
/// back to the last known values when the daemon is unreachable.
pub struct RpcNodeClient {
    rpc: CryptoNoteRpc,
    last_height: AtomicU32,
    last_minimal_fee: AtomicU64,
}

impl RpcNodeClient {
    pub fn new(rpc: CryptoNoteRpc) -> Self {
        RpcNodeClient {
            rpc,
            last_height: AtomicU32::new(0),
            last_minimal_fee: AtomicU64::new(0),
        }
    }
}

impl NodeClient for RpcNodeClient {
    fn get_random_outs_by_amounts(
        &self,
        amounts: Vec<u64>,
        outs_count: u64,
        callback: NodeCallback<Vec<RandomOutsForAmount>>,
    ) {
        let result = self
            .rpc
            .get_random_outs(&amounts, outs_count)
            .and_then(convert_random_outs)
            .map_err(|e| NodeError(e.to_string()));
        callback(result);
    }

    fn relay_transaction(&self, transaction_blob: Vec<u8>, callback: NodeCallback<()>) {
        let result = self
            .rpc
            .send_raw_transaction(&hex::encode(transaction_blob))
            .map_err(|e| NodeError(e.to_string()));
        callback(result);
    }

    fn last_known_block_height(&self) -> u32 {
        match self.rpc.get_height() {
            Ok(height) => {
                let height = height as u32;
                self.last_height.store(height, Ordering::Relaxed);
                height
            }
            Err(error) => {
                warn!("get_height failed, using cached height: {error}");
                self.last_height.load(Ordering::Relaxed)
            }
        }
    }

    fn minimal_fee(&self) -> u64 {
        match self.rpc.get_info() {
            Ok(info) => {
                self.last_minimal_fee.store(info.min_fee, Ordering::Relaxed);
                info.min_fee
            }
            Err(error) => {
                warn!("get_info failed, using cached minimal fee: {error}");
                self.last_minimal_fee.load(Ordering::Relaxed)
            }
        }
    }
}
