//! Unlock proofs for the three contract kinds.
//!
//! A proof is the argument list of the verifier's public function, encoded
//! as one data push per argument, in declaration order. The verifier pops
//! them back off the stack and checks each against the preimage.
//!
//! Integers go in as non-negative script numbers; byte strings, signatures and hashes as
//! plain pushes; Rabin signatures always as 128 little-endian bytes.

use crate::config::ADDRESS_HASH_LEN;
use crate::ledger::script::ScriptBuilder;
use crate::oracle::{AttestationPair, PackedAttestations};

fn push_pair(mut builder: ScriptBuilder, pair: &AttestationPair) -> ScriptBuilder {
    builder = builder.push(pair.message());
    for padding in pair.paddings() {
        builder = builder.push(padding);
    }
    for signature in pair.signatures() {
        builder = builder.push(&signature.to_le_bytes());
    }
    for index in pair.indices() {
        builder = builder.uint(index as u64);
    }
    builder
}

// ---------------------------------------------------------------------------
// Genesis
// ---------------------------------------------------------------------------

/// Arguments unlocking a genesis contract during an issue.
#[derive(Debug, Clone)]
pub struct GenesisUnlock<'a> {
    pub preimage: Vec<u8>,
    /// Issuer signature over the input's sighash.
    pub issuer_signature: Vec<u8>,
    /// Proof of custody of the previous genesis output (sentinel on the
    /// first issue).
    pub attestation: &'a AttestationPair,
    /// Satoshis of the renewed genesis output, 0 when issuance closes.
    pub genesis_value: u64,
    pub token_script: &'a [u8],
    pub token_value: u64,
    pub change_pubkey_hash: [u8; ADDRESS_HASH_LEN],
    /// 0 when the change was folded into the fee.
    pub change_value: u64,
}

impl GenesisUnlock<'_> {
    pub fn to_script(&self) -> Vec<u8> {
        let builder = ScriptBuilder::new()
            .push(&self.preimage)
            .push(&self.issuer_signature);
        push_pair(builder, self.attestation)
            .uint(self.genesis_value)
            .push(self.token_script)
            .uint(self.token_value)
            .push(&self.change_pubkey_hash)
            .uint(self.change_value)
            .into_bytes()
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Arguments unlocking one token input of a transfer.
#[derive(Debug, Clone)]
pub struct TokenUnlock<'a> {
    pub preimage: Vec<u8>,
    /// Every outpoint the transfer spends, serialized back to back.
    pub prevouts: &'a [u8],
    /// Proof that this input's parent output was spent into it.
    pub attestation: &'a AttestationPair,
    /// Where the route-check input sits in the transfer.
    pub route_check_input: u32,
    pub route_check_raw_tx: &'a [u8],
    /// Output of the route-check transaction being spent.
    pub route_check_output: u32,
    pub token_outputs: usize,
    /// Owner and amount recorded in the parent output.
    pub prev_owner: [u8; ADDRESS_HASH_LEN],
    pub prev_amount: u64,
    pub sender_public_key: &'a [u8],
    pub sender_signature: Vec<u8>,
}

impl TokenUnlock<'_> {
    pub fn to_script(&self) -> Vec<u8> {
        let builder = ScriptBuilder::new().push(&self.preimage).push(self.prevouts);
        push_pair(builder, self.attestation)
            .uint(self.route_check_input as u64)
            .push(self.route_check_raw_tx)
            .uint(self.route_check_output as u64)
            .uint(self.token_outputs as u64)
            .push(&self.prev_owner)
            .uint(self.prev_amount)
            .push(self.sender_public_key)
            .push(&self.sender_signature)
            .into_bytes()
    }
}

// ---------------------------------------------------------------------------
// Route check
// ---------------------------------------------------------------------------

/// Arguments unlocking the route-check input of a transfer.
///
/// All per-input data is packed in token input order, which is also the
/// order of the inputs in the transfer.
#[derive(Debug, Clone)]
pub struct RouteCheckUnlock<'a> {
    pub preimage: Vec<u8>,
    pub token_inputs: usize,
    /// Locking script of the token inputs (they share one code part).
    pub token_script: &'a [u8],
    pub prevouts: &'a [u8],
    pub attestations: &'a PackedAttestations,
    /// Roster positions of the signing oracles.
    pub oracle_indices: [usize; 2],
    pub input_owners: &'a [[u8; ADDRESS_HASH_LEN]],
    pub input_amounts: &'a [u64],
    /// Satoshis of each token output.
    pub output_values: &'a [u64],
    pub change_value: u64,
    pub change_pubkey_hash: [u8; ADDRESS_HASH_LEN],
}

impl RouteCheckUnlock<'_> {
    pub fn to_script(&self) -> Vec<u8> {
        let owners: Vec<u8> = self.input_owners.iter().flatten().copied().collect();
        let amounts: Vec<u8> = self.input_amounts.iter().flat_map(|a| a.to_le_bytes()).collect();
        let values: Vec<u8> = self.output_values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut builder = ScriptBuilder::new()
            .push(&self.preimage)
            .uint(self.token_inputs as u64)
            .push(self.token_script)
            .push(self.prevouts)
            .push(&self.attestations.messages)
            .push(&self.attestations.paddings)
            .push(&self.attestations.signatures);
        for index in self.oracle_indices {
            builder = builder.uint(index as u64);
        }
        builder
            .push(&owners)
            .push(&amounts)
            .push(&values)
            .uint(self.change_value)
            .push(&self.change_pubkey_hash)
            .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::script::{OP_0, OP_1};

    #[test]
    fn genesis_unlock_starts_with_preimage() {
        let pair = AttestationPair::sentinel([0, 1]);
        let script = GenesisUnlock {
            preimage: vec![0xaa; 3],
            issuer_signature: vec![0x30; 2],
            attestation: &pair,
            genesis_value: 0,
            token_script: &[0x51],
            token_value: 1,
            change_pubkey_hash: [0; 20],
            change_value: 0,
        }
        .to_script();
        assert_eq!(&script[..4], &[0x03, 0xaa, 0xaa, 0xaa]);
        assert_eq!(&script[4..7], &[0x02, 0x30, 0x30]);
        // Ends with the change pkh push and a zero change value.
        assert_eq!(script[script.len() - 1], OP_0);
        assert_eq!(script[script.len() - 22], 20);
    }

    #[test]
    fn top_bit_amounts_stay_positive() {
        let pair = AttestationPair::sentinel([0, 1]);
        let owner = [7u8; 20];
        let script = TokenUnlock {
            preimage: vec![1],
            prevouts: &[2],
            attestation: &pair,
            route_check_input: 3,
            route_check_raw_tx: &[4],
            route_check_output: 0,
            token_outputs: 2,
            prev_owner: owner,
            prev_amount: u64::MAX,
            sender_public_key: &[5; 33],
            sender_signature: vec![6],
        }
        .to_script();
        let mut owner_push = vec![20u8];
        owner_push.extend_from_slice(&owner);
        let at = script
            .windows(owner_push.len())
            .position(|w| w == owner_push.as_slice())
            .unwrap()
            + owner_push.len();
        let mut expected = vec![9u8];
        expected.extend_from_slice(&[0xff; 8]);
        expected.push(0x00);
        assert_eq!(&script[at..at + expected.len()], expected.as_slice());
    }

    #[test]
    fn route_check_packs_amounts_little_endian() {
        let packed = PackedAttestations::default();
        let script = RouteCheckUnlock {
            preimage: vec![1],
            token_inputs: 1,
            token_script: &[0x51],
            prevouts: &[2],
            attestations: &packed,
            oracle_indices: [0, 1],
            input_owners: &[[7; 20]],
            input_amounts: &[0x0102],
            output_values: &[],
            change_value: 0,
            change_pubkey_hash: [9; 20],
        }
        .to_script();
        let amounts = [0x08, 0x02, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(script.windows(amounts.len()).any(|w| w == amounts));
        // Second oracle index encodes as OP_1.
        assert!(script.contains(&OP_1));
    }
}
