//! # Token Metadata Codec
//!
//! Every genesis and token output ends in a fixed-width trailer, pushed
//! after an `OP_RETURN` so the verifier code never executes it:
//!
//! ```text
//! locking script = code ‖ OP_RETURN ‖ push(trailer)
//!
//! trailer (token, 128 bytes)                  trailer (genesis, 108 bytes)
//! ┌──────────────────────┬─────┐              same, without the first field
//! │ verifier code hash   │  20 │
//! │ name (zero padded)   │  20 │
//! │ symbol (zero padded) │  10 │
//! │ decimals             │   1 │
//! │ owner address hash   │  20 │
//! │ amount (LE)          │   8 │
//! │ token id             │  36 │  reversed genesis txid ‖ index (LE)
//! │ genesis flag         │   1 │  1 = genesis, 0 = token
//! │ token type (LE)      │   4 │
//! │ protocol tag         │   8 │  "sensible"
//! └──────────────────────┴─────┘
//! ```
//!
//! Decoding works from the end of the script: the genesis flag sits at a
//! fixed distance from the end in both layouts, and it tells us how far back
//! the trailer starts. Callers can therefore hand us either a bare trailer or
//! a whole locking script.

use serde::{Deserialize, Serialize};

use crate::config::{
    ADDRESS_HASH_LEN, CODE_HASH_LEN, GENESIS_TRAILER_LEN, PROTOCOL_TAG, PROTOCOL_TAG_LEN,
    TOKEN_ID_LEN, TOKEN_NAME_LEN, TOKEN_SYMBOL_LEN, TOKEN_TRAILER_LEN, TOKEN_TYPE_FUNGIBLE,
    TOKEN_TYPE_LEN,
};
use crate::crypto::hash::hash160;
use crate::error::{FtError, FtResult};
use crate::ledger::script::{push_header_len, ScriptBuilder, OP_RETURN};
use crate::ledger::{OutPoint, TxId};

// ---------------------------------------------------------------------------
// TokenId
// ---------------------------------------------------------------------------

/// Identity of a token type: the outpoint of its genesis output.
///
/// Before the first issuance the genesis output cannot know its own txid,
/// so it carries the all-zero [`PLACEHOLDER`](Self::PLACEHOLDER). The first
/// issuance substitutes the real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId {
    pub txid: TxId,
    pub index: u32,
}

impl TokenId {
    pub const PLACEHOLDER: TokenId = TokenId { txid: TxId::ZERO, index: 0 };

    pub fn is_placeholder(&self) -> bool {
        self.txid.is_zero() && self.index == 0
    }

    pub fn to_bytes(&self) -> [u8; TOKEN_ID_LEN] {
        OutPoint::new(self.txid, self.index).to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> FtResult<Self> {
        if bytes.len() != TOKEN_ID_LEN {
            return Err(FtError::MalformedMetadata(format!(
                "token id must be {} bytes, got {}",
                TOKEN_ID_LEN,
                bytes.len()
            )));
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[32..]);
        Ok(Self { txid: TxId::from_bytes(txid), index: u32::from_le_bytes(index) })
    }
}

impl From<OutPoint> for TokenId {
    fn from(op: OutPoint) -> Self {
        Self { txid: op.txid, index: op.index }
    }
}

// ---------------------------------------------------------------------------
// TokenMetadata
// ---------------------------------------------------------------------------

/// Which of the two trailer layouts a script carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataKind {
    Genesis,
    Token,
}

impl MetadataKind {
    pub fn trailer_len(self) -> usize {
        match self {
            MetadataKind::Genesis => GENESIS_TRAILER_LEN,
            MetadataKind::Token => TOKEN_TRAILER_LEN,
        }
    }
}

/// The decoded trailer of a genesis or token output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub kind: MetadataKind,
    /// HASH160 of the genesis script this token descends from. Always zero
    /// for genesis metadata, which has no slot for it.
    pub verifier_code_hash: [u8; CODE_HASH_LEN],
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub owner: [u8; ADDRESS_HASH_LEN],
    pub amount: u64,
    pub token_id: TokenId,
    pub token_type: u32,
}

impl TokenMetadata {
    /// Metadata for a fresh genesis output: no owner, no amount, placeholder id.
    pub fn genesis(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            kind: MetadataKind::Genesis,
            verifier_code_hash: [0u8; CODE_HASH_LEN],
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
            owner: [0u8; ADDRESS_HASH_LEN],
            amount: 0,
            token_id: TokenId::PLACEHOLDER,
            token_type: TOKEN_TYPE_FUNGIBLE,
        }
    }

    /// Token metadata minted from this genesis metadata.
    pub fn mint(
        &self,
        verifier_code_hash: [u8; CODE_HASH_LEN],
        owner: [u8; ADDRESS_HASH_LEN],
        amount: u64,
    ) -> Self {
        Self {
            kind: MetadataKind::Token,
            verifier_code_hash,
            owner,
            amount,
            ..self.clone()
        }
    }

    /// Same token, new owner and amount.
    pub fn reassign(&self, owner: [u8; ADDRESS_HASH_LEN], amount: u64) -> Self {
        Self { owner, amount, ..self.clone() }
    }

    pub fn is_genesis(&self) -> bool {
        self.kind == MetadataKind::Genesis
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

fn write_padded(out: &mut Vec<u8>, value: &str, width: usize, field: &str) -> FtResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(FtError::MalformedMetadata(format!(
            "{} is {} bytes, limit is {}",
            field,
            bytes.len(),
            width
        )));
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), 0);
    Ok(())
}

fn read_padded(bytes: &[u8], field: &str) -> FtResult<String> {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|_| FtError::MalformedMetadata(format!("{} is not valid UTF-8", field)))
}

/// Encode `meta` into its trailer bytes (108 or 128 bytes).
pub fn encode(meta: &TokenMetadata) -> FtResult<Vec<u8>> {
    if meta.kind == MetadataKind::Genesis && meta.verifier_code_hash != [0u8; CODE_HASH_LEN] {
        return Err(FtError::MalformedMetadata(
            "genesis metadata cannot carry a verifier code hash".into(),
        ));
    }
    let mut out = Vec::with_capacity(meta.kind.trailer_len());
    if meta.kind == MetadataKind::Token {
        out.extend_from_slice(&meta.verifier_code_hash);
    }
    write_padded(&mut out, &meta.name, TOKEN_NAME_LEN, "name")?;
    write_padded(&mut out, &meta.symbol, TOKEN_SYMBOL_LEN, "symbol")?;
    out.push(meta.decimals);
    out.extend_from_slice(&meta.owner);
    out.extend_from_slice(&meta.amount.to_le_bytes());
    out.extend_from_slice(&meta.token_id.to_bytes());
    out.push(match meta.kind {
        MetadataKind::Genesis => 1,
        MetadataKind::Token => 0,
    });
    out.extend_from_slice(&meta.token_type.to_le_bytes());
    out.extend_from_slice(PROTOCOL_TAG);
    debug_assert_eq!(out.len(), meta.kind.trailer_len());
    Ok(out)
}

/// Which layout the bytes end with, by reading the genesis flag.
fn kind_of(bytes: &[u8]) -> FtResult<MetadataKind> {
    if bytes.len() < GENESIS_TRAILER_LEN {
        return Err(FtError::MalformedMetadata(format!(
            "{} bytes is shorter than any trailer",
            bytes.len()
        )));
    }
    if &bytes[bytes.len() - PROTOCOL_TAG_LEN..] != PROTOCOL_TAG {
        return Err(FtError::MalformedMetadata("missing protocol tag".into()));
    }
    let flag = bytes[bytes.len() - PROTOCOL_TAG_LEN - TOKEN_TYPE_LEN - 1];
    let kind = match flag {
        1 => MetadataKind::Genesis,
        0 => MetadataKind::Token,
        other => {
            return Err(FtError::MalformedMetadata(format!("unknown genesis flag {}", other)))
        }
    };
    if bytes.len() < kind.trailer_len() {
        return Err(FtError::MalformedMetadata(format!(
            "{} bytes is shorter than a {:?} trailer",
            bytes.len(),
            kind
        )));
    }
    Ok(kind)
}

/// Split `n` bytes off the front of `cursor`.
fn take<'a>(cursor: &mut &'a [u8], n: usize) -> &'a [u8] {
    let whole: &'a [u8] = *cursor;
    let (head, tail) = whole.split_at(n);
    *cursor = tail;
    head
}

/// Decode the trailer at the end of `bytes`, which may be a bare trailer or
/// a complete locking script.
pub fn decode(bytes: &[u8]) -> FtResult<TokenMetadata> {
    let kind = kind_of(bytes)?;
    let mut t = &bytes[bytes.len() - kind.trailer_len()..];
    let t = &mut t;

    let mut verifier_code_hash = [0u8; CODE_HASH_LEN];
    if kind == MetadataKind::Token {
        verifier_code_hash.copy_from_slice(take(t, CODE_HASH_LEN));
    }
    let name = read_padded(take(t, TOKEN_NAME_LEN), "name")?;
    let symbol = read_padded(take(t, TOKEN_SYMBOL_LEN), "symbol")?;
    let decimals = take(t, 1)[0];
    let mut owner = [0u8; ADDRESS_HASH_LEN];
    owner.copy_from_slice(take(t, ADDRESS_HASH_LEN));
    let mut amount = [0u8; 8];
    amount.copy_from_slice(take(t, 8));
    let token_id = TokenId::from_bytes(take(t, TOKEN_ID_LEN))?;
    let _flag = take(t, 1);
    let mut token_type = [0u8; 4];
    token_type.copy_from_slice(take(t, TOKEN_TYPE_LEN));

    Ok(TokenMetadata {
        kind,
        verifier_code_hash,
        name,
        symbol,
        decimals,
        owner,
        amount: u64::from_le_bytes(amount),
        token_id,
        token_type: u32::from_le_bytes(token_type),
    })
}

// ---------------------------------------------------------------------------
// Contract scripts
// ---------------------------------------------------------------------------

/// `code ‖ OP_RETURN ‖ push(encode(meta))`
pub fn contract_script(code: &[u8], meta: &TokenMetadata) -> FtResult<Vec<u8>> {
    let trailer = encode(meta)?;
    Ok(ScriptBuilder::with_capacity(code.len() + trailer.len() + 3)
        .raw(code)
        .opcode(OP_RETURN)
        .push(&trailer)
        .into_bytes())
}

/// Everything in `script` before the trailer bytes: the verifier code plus
/// the `OP_RETURN` and push header.
pub fn code_part(script: &[u8]) -> FtResult<&[u8]> {
    let kind = kind_of(script)?;
    let code_end = script.len() - kind.trailer_len();
    let header = 1 + push_header_len(kind.trailer_len());
    if code_end < header || script[code_end - header] != OP_RETURN {
        return Err(FtError::MalformedMetadata("trailer is not pushed after OP_RETURN".into()));
    }
    Ok(&script[..code_end])
}

/// HASH160 of [`code_part`]. Two outputs share a code hash exactly when they
/// are governed by the same verifier.
pub fn code_hash(script: &[u8]) -> FtResult<[u8; CODE_HASH_LEN]> {
    Ok(hash160(code_part(script)?))
}

/// Replace the trailer of `script` with `meta`, keeping the code part
/// byte-for-byte. The replacement must use the same layout.
pub fn replace_metadata(script: &[u8], meta: &TokenMetadata) -> FtResult<Vec<u8>> {
    let current = kind_of(script)?;
    if current != meta.kind {
        return Err(FtError::MalformedMetadata(format!(
            "cannot replace {:?} trailer with {:?} metadata",
            current, meta.kind
        )));
    }
    let code = code_part(script)?;
    let trailer = encode(meta)?;
    let mut out = Vec::with_capacity(code.len() + trailer.len());
    out.extend_from_slice(code);
    out.extend_from_slice(&trailer);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> TokenMetadata {
        TokenMetadata::genesis("Coin", "COIN", 8)
            .mint([0xcc; 20], [0x11; 20], 1_000_000)
    }

    #[test]
    fn test_genesis_trailer_is_108_bytes() {
        let bytes = encode(&TokenMetadata::genesis("Coin", "COIN", 8)).unwrap();
        assert_eq!(bytes.len(), 108);
        assert_eq!(&bytes[100..], b"sensible");
        assert_eq!(bytes[95], 1);
    }

    #[test]
    fn test_token_trailer_field_offsets() {
        let meta = token();
        let bytes = encode(&meta).unwrap();
        assert_eq!(bytes.len(), 128);
        assert_eq!(&bytes[..20], &[0xcc; 20]);
        assert_eq!(&bytes[20..24], b"Coin");
        assert_eq!(&bytes[24..40], &[0u8; 16]);
        assert_eq!(&bytes[40..44], b"COIN");
        assert_eq!(bytes[50], 8);
        assert_eq!(&bytes[51..71], &[0x11; 20]);
        assert_eq!(&bytes[71..79], &1_000_000u64.to_le_bytes());
        assert_eq!(bytes[115], 0);
        assert_eq!(&bytes[116..120], &1u32.to_le_bytes());
    }

    #[test]
    fn test_decode_inverts_encode() {
        for meta in [TokenMetadata::genesis("Name", "SYM", 0), token()] {
            assert_eq!(decode(&encode(&meta).unwrap()).unwrap(), meta);
        }
    }

    #[test]
    fn test_decode_from_full_script() {
        let script = contract_script(&[0x51, 0x52, 0x53], &token()).unwrap();
        assert_eq!(decode(&script).unwrap(), token());
    }

    #[test]
    fn test_max_width_name_and_symbol() {
        let meta = TokenMetadata::genesis("abcdefghijklmnopqrst", "ABCDEFGHIJ", 2);
        assert_eq!(decode(&encode(&meta).unwrap()).unwrap(), meta);
    }

    #[test]
    fn test_oversized_name_rejected() {
        let meta = TokenMetadata::genesis("abcdefghijklmnopqrstu", "S", 2);
        assert!(matches!(encode(&meta), Err(FtError::MalformedMetadata(_))));
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(decode(&[0u8; 60]), Err(FtError::MalformedMetadata(_))));
    }

    #[test]
    fn test_bad_tag_rejected() {
        let mut bytes = encode(&token()).unwrap();
        let n = bytes.len();
        bytes[n - 1] = b'X';
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut bytes = encode(&token()).unwrap();
        bytes[115] = 7;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_token_flag_on_genesis_sized_input_rejected() {
        let mut bytes = encode(&TokenMetadata::genesis("a", "b", 0)).unwrap();
        bytes[95] = 0;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_invalid_utf8_name_rejected() {
        let mut bytes = encode(&token()).unwrap();
        bytes[20] = 0xff;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn replace_keeps_code_and_code_hash() {
        let code = vec![0x01, 0x02, 0x03, 0x04];
        let script = contract_script(&code, &token()).unwrap();
        let updated = replace_metadata(&script, &token().reassign([0x22; 20], 5)).unwrap();
        assert_eq!(code_part(&updated).unwrap(), code_part(&script).unwrap());
        assert_eq!(code_hash(&updated).unwrap(), code_hash(&script).unwrap());
        let meta = decode(&updated).unwrap();
        assert_eq!(meta.owner, [0x22; 20]);
        assert_eq!(meta.amount, 5);
    }

    #[test]
    fn test_replace_across_layouts_rejected() {
        let script = contract_script(&[0x51], &TokenMetadata::genesis("a", "b", 0)).unwrap();
        assert!(replace_metadata(&script, &token()).is_err());
    }

    #[test]
    fn code_part_ends_with_return_and_push_header() {
        let script = contract_script(&[0x51], &token()).unwrap();
        assert_eq!(code_part(&script).unwrap(), &[0x51, OP_RETURN, 0x4c, 128]);
    }

    #[test]
    fn genesis_with_code_hash_rejected() {
        let mut meta = TokenMetadata::genesis("a", "b", 0);
        meta.verifier_code_hash = [1u8; 20];
        assert!(encode(&meta).is_err());
    }

    #[test]
    fn placeholder_token_id() {
        assert!(TokenId::PLACEHOLDER.is_placeholder());
        assert_eq!(TokenId::PLACEHOLDER.to_bytes(), [0u8; 36]);
        let id = TokenId { txid: TxId::from_bytes([3u8; 32]), index: 0 };
        assert!(!id.is_placeholder());
        assert_eq!(TokenId::from_bytes(&id.to_bytes()).unwrap(), id);
    }
}
