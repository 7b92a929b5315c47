//! HTTP ledger client for WhatsOnChain-style APIs.
//!
//! - `GET  {base}/tx/{txid}/hex` returns the raw transaction as hex text.
//! - `POST {base}/tx/raw` with `{"txhex": "..."}` returns the txid as a JSON
//!   string. Any non-2xx answer is a rejection and its body is the reason.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::LedgerClient;
use super::types::TxId;
use crate::error::{FtError, FtResult, Rejection};

#[derive(Serialize)]
struct BroadcastBody<'a> {
    txhex: &'a str,
}

/// Ledger client over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str) -> FtResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FtError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_raw_transaction(&self, txid: &TxId) -> FtResult<Vec<u8>> {
        let url = format!("{}/tx/{}/hex", self.base_url, txid);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FtError::Ledger(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FtError::Ledger(format!("unreadable response: {e}")))?;
        if !status.is_success() {
            return Err(FtError::Ledger(format!("fetch {} failed ({}): {}", txid, status, body)));
        }
        hex::decode(body.trim().trim_matches('"'))
            .map_err(|e| FtError::Ledger(format!("invalid transaction hex for {}: {e}", txid)))
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> FtResult<TxId> {
        let url = format!("{}/tx/raw", self.base_url);
        let txhex = hex::encode(raw_tx);
        let resp = self
            .http
            .post(&url)
            .json(&BroadcastBody { txhex: &txhex })
            .send()
            .await
            .map_err(|e| FtError::Ledger(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FtError::Ledger(format!("unreadable response: {e}")))?;
        if !status.is_success() {
            warn!(%status, reason = %body, "ledger rejected transaction");
            return Err(FtError::BroadcastRejected(Rejection::new(body)));
        }
        let txid = TxId::from_hex(body.trim().trim_matches('"'))
            .map_err(|e| FtError::Ledger(format!("unexpected broadcast response: {e}")))?;
        debug!(%txid, bytes = raw_tx.len(), "broadcast accepted");
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_trimmed() {
        let client = HttpLedgerClient::new("https://api.whatsonchain.com/v1/bsv/test/").unwrap();
        assert_eq!(client.base_url, "https://api.whatsonchain.com/v1/bsv/test");
    }

    #[tokio::test]
    async fn test_unreachable_ledger_is_ledger_error() {
        // Port 9 (discard) on localhost is reliably closed in test sandboxes.
        let client = HttpLedgerClient::new("http://127.0.0.1:9").unwrap();
        let err = client.broadcast(&[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, FtError::Ledger(_)), "got {err:?}");
    }
}
