//! Oracle coordination.
//!
//! Each proof carries signatures from a fixed pair of oracles out of the
//! roster of three. The pair is baked into the on-chain verifiers, so it is
//! chosen once at construction and never per call.
//!
//! Calls go out concurrently but results are always arranged in selection
//! order: verifiers read the parallel arrays positionally.

use async_trait::async_trait;
use futures::future::try_join;
use std::sync::Arc;
use tracing::debug;

use super::types::{OracleAttestation, OutputRef, RabinSignature, SpendingTxRef};
use crate::config::{validate_oracle_selection, ORACLE_QUORUM, ORACLE_ROSTER_SIZE};
use crate::error::{FtError, FtResult};

/// One oracle service.
///
/// Implementations fail with `OracleUnreachable` on transport errors and
/// `OracleRejected` when the oracle answers but declines.
#[async_trait]
pub trait OracleEndpoint: Send + Sync {
    /// Attest that `output` exists unspent.
    async fn attest_existence(&self, output: &OutputRef) -> FtResult<OracleAttestation>;

    /// Attest that `prev` was spent by `spending`.
    async fn attest_spend(
        &self,
        prev: &OutputRef,
        spending: &SpendingTxRef,
    ) -> FtResult<OracleAttestation>;
}

// ---------------------------------------------------------------------------
// AttestationPair
// ---------------------------------------------------------------------------

/// Attestations from the selected oracles about one fact, in selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationPair {
    attestations: [OracleAttestation; ORACLE_QUORUM],
}

impl AttestationPair {
    pub fn new(attestations: [OracleAttestation; ORACLE_QUORUM]) -> Self {
        Self { attestations }
    }

    /// Stand-in for the first issuance, which has no prior genesis spend to
    /// attest: a one-byte zero message, zero paddings and zero signatures.
    pub fn sentinel(selected: [usize; ORACLE_QUORUM]) -> Self {
        let blank = |oracle_index| OracleAttestation {
            oracle_index,
            payload: vec![0x00],
            signature: RabinSignature::ZERO,
            padding: vec![0x00],
        };
        Self { attestations: [blank(selected[0]), blank(selected[1])] }
    }

    /// The attested message. All selected oracles sign the same one.
    pub fn message(&self) -> &[u8] {
        &self.attestations[0].payload
    }

    pub fn paddings(&self) -> [&[u8]; ORACLE_QUORUM] {
        [&self.attestations[0].padding, &self.attestations[1].padding]
    }

    pub fn signatures(&self) -> [RabinSignature; ORACLE_QUORUM] {
        [self.attestations[0].signature, self.attestations[1].signature]
    }

    pub fn indices(&self) -> [usize; ORACLE_QUORUM] {
        [self.attestations[0].oracle_index, self.attestations[1].oracle_index]
    }

    pub fn attestations(&self) -> &[OracleAttestation] {
        &self.attestations
    }
}

/// Attestations for several inputs flattened into the three parallel byte
/// arrays route-check verifiers consume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedAttestations {
    /// Messages, one per input.
    pub messages: Vec<u8>,
    /// `len(2, LE) ‖ padding` for every input and every oracle.
    pub paddings: Vec<u8>,
    /// 128-byte little-endian signatures for every input and every oracle.
    pub signatures: Vec<u8>,
}

impl PackedAttestations {
    pub fn pack(pairs: &[AttestationPair]) -> FtResult<Self> {
        let mut packed = Self::default();
        for pair in pairs {
            packed.messages.extend_from_slice(pair.message());
            for att in pair.attestations() {
                let len = u16::try_from(att.padding.len()).map_err(|_| {
                    FtError::OracleRejected {
                        index: att.oracle_index,
                        reason: format!("padding of {} bytes is too long", att.padding.len()),
                    }
                })?;
                packed.paddings.extend_from_slice(&len.to_le_bytes());
                packed.paddings.extend_from_slice(&att.padding);
                packed.signatures.extend_from_slice(&att.signature.to_le_bytes());
            }
        }
        Ok(packed)
    }
}

// ---------------------------------------------------------------------------
// OracleSignatureClient
// ---------------------------------------------------------------------------

/// Requests attestations from the configured oracle pair.
#[derive(Clone)]
pub struct OracleSignatureClient {
    roster: Vec<Arc<dyn OracleEndpoint>>,
    selected: [usize; ORACLE_QUORUM],
}

impl OracleSignatureClient {
    /// Fails with `Configuration` unless the roster has exactly three
    /// entries and `selected` names two distinct positions in it.
    pub fn new(
        roster: Vec<Arc<dyn OracleEndpoint>>,
        selected: [usize; ORACLE_QUORUM],
    ) -> FtResult<Self> {
        if roster.len() != ORACLE_ROSTER_SIZE {
            return Err(FtError::Configuration(format!(
                "oracle roster must have {} entries, got {}",
                ORACLE_ROSTER_SIZE,
                roster.len()
            )));
        }
        validate_oracle_selection(&selected, roster.len())?;
        Ok(Self { roster, selected })
    }

    pub fn selected(&self) -> [usize; ORACLE_QUORUM] {
        self.selected
    }

    pub async fn attest_existence(&self, output: &OutputRef) -> FtResult<AttestationPair> {
        let [a, b] = self.selected;
        let (first, second) = try_join(
            self.roster[a].attest_existence(output),
            self.roster[b].attest_existence(output),
        )
        .await?;
        debug!(outpoint = %output.outpoint, "existence attested");
        self.pair(first, second)
    }

    pub async fn attest_spend(
        &self,
        prev: &OutputRef,
        spending: &SpendingTxRef,
    ) -> FtResult<AttestationPair> {
        let [a, b] = self.selected;
        let (first, second) = try_join(
            self.roster[a].attest_spend(prev, spending),
            self.roster[b].attest_spend(prev, spending),
        )
        .await?;
        debug!(outpoint = %prev.outpoint, by = %spending.txid, "spend attested");
        self.pair(first, second)
    }

    fn pair(
        &self,
        mut first: OracleAttestation,
        mut second: OracleAttestation,
    ) -> FtResult<AttestationPair> {
        first.oracle_index = self.selected[0];
        second.oracle_index = self.selected[1];
        if first.payload != second.payload {
            return Err(FtError::OracleRejected {
                index: self.selected[1],
                reason: "attested message differs from the other oracle's".into(),
            });
        }
        Ok(AttestationPair::new([first, second]))
    }
}

impl std::fmt::Debug for OracleSignatureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleSignatureClient")
            .field("roster", &self.roster.len())
            .field("selected", &self.selected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{OutPoint, TxId};
    use parking_lot::Mutex;

    /// Answers with a message derived from the request and records call order.
    struct Scripted {
        id: u8,
        fail: Option<fn(usize) -> FtError>,
        calls: Arc<Mutex<Vec<u8>>>,
    }

    #[async_trait]
    impl OracleEndpoint for Scripted {
        async fn attest_existence(&self, output: &OutputRef) -> FtResult<OracleAttestation> {
            self.answer(output.outpoint.index as u8)
        }

        async fn attest_spend(
            &self,
            prev: &OutputRef,
            _spending: &SpendingTxRef,
        ) -> FtResult<OracleAttestation> {
            self.answer(prev.outpoint.index as u8)
        }
    }

    impl Scripted {
        fn answer(&self, tag: u8) -> FtResult<OracleAttestation> {
            self.calls.lock().push(self.id);
            if let Some(fail) = self.fail {
                return Err(fail(self.id as usize));
            }
            Ok(OracleAttestation {
                oracle_index: 99,
                payload: vec![tag, 0xee],
                signature: RabinSignature::from_le_bytes([self.id + 1; 128]),
                padding: vec![self.id; 3],
            })
        }
    }

    fn roster(fail: Option<fn(usize) -> FtError>) -> (Vec<Arc<dyn OracleEndpoint>>, Arc<Mutex<Vec<u8>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let roster = (0..3u8)
            .map(|id| {
                Arc::new(Scripted { id, fail: if id == 2 { fail } else { None }, calls: calls.clone() })
                    as Arc<dyn OracleEndpoint>
            })
            .collect();
        (roster, calls)
    }

    fn output() -> OutputRef {
        OutputRef { outpoint: OutPoint::new(TxId::from_bytes([1; 32]), 4), raw_tx: vec![] }
    }

    fn spend() -> SpendingTxRef {
        SpendingTxRef { txid: TxId::from_bytes([2; 32]), raw_tx: vec![] }
    }

    #[test]
    fn test_invalid_selection_is_config_error() {
        let (r, _) = roster(None);
        assert!(matches!(
            OracleSignatureClient::new(r.clone(), [0, 0]),
            Err(FtError::Configuration(_))
        ));
        assert!(OracleSignatureClient::new(r.clone(), [0, 3]).is_err());
        assert!(OracleSignatureClient::new(r[..2].to_vec(), [0, 1]).is_err());
    }

    #[tokio::test]
    async fn test_results_follow_selection_order() {
        let (r, _) = roster(None);
        let client = OracleSignatureClient::new(r, [2, 0]).unwrap();
        let pair = client.attest_spend(&output(), &spend()).await.unwrap();
        assert_eq!(pair.indices(), [2, 0]);
        assert_eq!(pair.message(), &[4, 0xee]);
        assert_eq!(pair.paddings(), [&[2u8, 2, 2][..], &[0u8, 0, 0][..]]);
        assert_eq!(pair.signatures()[0].to_le_bytes()[0], 3);
    }

    #[tokio::test]
    async fn test_oracle_failure_propagates() {
        fn refused(index: usize) -> FtError {
            FtError::OracleUnreachable { index, reason: "connection refused".into() }
        }
        let (r, calls) = roster(Some(refused as fn(usize) -> FtError));
        let client = OracleSignatureClient::new(r, [0, 2]).unwrap();
        let err = client.attest_existence(&output()).await.unwrap_err();
        assert!(matches!(err, FtError::OracleUnreachable { index: 2, .. }));
        // No retries.
        assert_eq!(calls.lock().iter().filter(|id| **id == 2).count(), 1);
    }

    #[test]
    fn test_packing_layout() {
        let a = OracleAttestation {
            oracle_index: 0,
            payload: vec![0xaa],
            signature: RabinSignature::from_le_bytes([1; 128]),
            padding: vec![9, 9],
        };
        let b = OracleAttestation { oracle_index: 1, padding: vec![], ..a.clone() };
        let pair = AttestationPair::new([a, b]);
        let packed = PackedAttestations::pack(&[pair.clone(), pair]).unwrap();
        assert_eq!(packed.messages, vec![0xaa, 0xaa]);
        assert_eq!(packed.paddings, vec![2, 0, 9, 9, 0, 0, 2, 0, 9, 9, 0, 0]);
        assert_eq!(packed.signatures.len(), 4 * 128);
    }

    #[test]
    fn sentinel_is_all_zero() {
        let s = AttestationPair::sentinel([0, 1]);
        assert_eq!(s.message(), &[0x00]);
        assert!(s.signatures().iter().all(|sig| sig.is_zero()));
        assert_eq!(s.indices(), [0, 1]);
    }
}
