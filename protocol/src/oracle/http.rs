//! HTTP oracle endpoint for satotx-style signer services.
//!
//! - `POST {prefix}/utxo/{txid}/{index}` with `{"txHex"}` attests existence.
//! - `POST {prefix}/utxo-spend-by/{txid}/{index}/{byTxid}` with
//!   `{"txHex", "byTxHex"}` attests a spend.
//!
//! Both answer `{"code": 0, "msg": "", "data": {"payload", "sigBE", "padding", ...}}`.
//! A non-zero code is a refusal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use super::client::OracleEndpoint;
use super::types::{OracleAttestation, OutputRef, RabinSignature, SpendingTxRef};
use crate::error::{FtError, FtResult};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExistenceBody {
    tx_hex: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpendBody {
    tx_hex: String,
    by_tx_hex: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<SignedData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedData {
    payload: String,
    sig_be: String,
    padding: String,
}

/// A single satotx signer.
#[derive(Debug, Clone)]
pub struct SatotxEndpoint {
    http: reqwest::Client,
    api_prefix: String,
    index: usize,
}

impl SatotxEndpoint {
    /// `index` is the signer's position in the roster, used in error reports.
    pub fn new(api_prefix: &str, index: usize) -> FtResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FtError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, api_prefix: api_prefix.trim_end_matches('/').to_string(), index })
    }

    async fn post<B: Serialize + Sync>(&self, url: String, body: &B) -> FtResult<OracleAttestation> {
        let resp = self.http.post(&url).json(body).send().await.map_err(|e| {
            FtError::OracleUnreachable { index: self.index, reason: e.to_string() }
        })?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(FtError::OracleUnreachable {
                index: self.index,
                reason: format!("HTTP {}", status),
            });
        }
        let envelope: Envelope = resp.json().await.map_err(|e| FtError::OracleRejected {
            index: self.index,
            reason: format!("invalid response: {e}"),
        })?;
        self.attestation(envelope)
    }

    fn attestation(&self, envelope: Envelope) -> FtResult<OracleAttestation> {
        let rejected = |reason: String| FtError::OracleRejected { index: self.index, reason };
        if envelope.code != 0 {
            warn!(oracle = self.index, code = envelope.code, msg = %envelope.msg, "oracle refused to sign");
            return Err(rejected(format!("code {}: {}", envelope.code, envelope.msg)));
        }
        let data = envelope.data.ok_or_else(|| rejected("response carries no data".into()))?;
        let payload = hex::decode(&data.payload).map_err(|e| rejected(format!("payload: {e}")))?;
        let padding = hex::decode(&data.padding).map_err(|e| rejected(format!("padding: {e}")))?;
        let signature =
            RabinSignature::from_be_hex(&data.sig_be).map_err(|e| rejected(e.to_string()))?;
        Ok(OracleAttestation { oracle_index: self.index, payload, signature, padding })
    }
}

#[async_trait]
impl OracleEndpoint for SatotxEndpoint {
    async fn attest_existence(&self, output: &OutputRef) -> FtResult<OracleAttestation> {
        let url = format!(
            "{}/utxo/{}/{}",
            self.api_prefix, output.outpoint.txid, output.outpoint.index
        );
        self.post(url, &ExistenceBody { tx_hex: hex::encode(&output.raw_tx) }).await
    }

    async fn attest_spend(
        &self,
        prev: &OutputRef,
        spending: &SpendingTxRef,
    ) -> FtResult<OracleAttestation> {
        let url = format!(
            "{}/utxo-spend-by/{}/{}/{}",
            self.api_prefix, prev.outpoint.txid, prev.outpoint.index, spending.txid
        );
        let body = SpendBody {
            tx_hex: hex::encode(&prev.raw_tx),
            by_tx_hex: hex::encode(&spending.raw_tx),
        };
        self.post(url, &body).await
    }
}
