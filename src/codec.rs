//! # Column Codecs
//!
//! Pure functions that pack the variable-length pieces of a block or
//! transaction into the fixed relational columns and back. No I/O here.
//!
//! ## The delimiter scheme
//!
//! Text-form lists join entries with `"||"` and carry an *empty leading
//! delimiter*: a two-element list encodes as `"||a||b"`. Decoders split
//! on `"||"` and discard the first segment. The scheme predates this
//! crate and is frozen by the data already on disk.
//!
//! ## The segment blob
//!
//! Superblock segments use a fixed-header binary form instead: per entry,
//! an 8-byte little-endian block number, a 4-byte little-endian checksum
//! length, then the checksum bytes. Decoding walks the buffer until
//! exhausted; a buffer that ends mid-record is corrupt and yields
//! [`CodecError::TruncatedSegments`].
//!
//! ## The payload transform
//!
//! Transaction payloads are stored byte-reversed. This is a storage-order
//! transform only: it is involutive, provides no confidentiality, and is
//! kept solely because the on-disk format already uses it.
//!
//! All decoders are total: malformed input returns a [`CodecError`],
//! never a panic.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use primitive_types::U256;

use crate::error::CodecError;
use crate::types::{BlockSignature, SuperBlockSegment};

/// Entry delimiter for text-form lists.
const LIST_DELIMITER: &str = "||";

/// Separator between the two halves of a `key:value` entry.
const PAIR_SEPARATOR: char = ':';

/// Stored in place of a signer reference that is absent.
const NO_SIGNER_SENTINEL: &str = "0";

/// Fixed bytes preceding each segment checksum: u64 block number plus
/// i32 length.
const SEGMENT_HEADER_LEN: usize = 8 + 4;

// ---------------------------------------------------------------------------
// Transaction-id lists
// ---------------------------------------------------------------------------

/// Encodes an ordered transaction-id list into the delimited text form.
///
/// The empty list encodes as the empty string.
pub fn encode_tx_ids(ids: &[String]) -> String {
    let mut out = String::new();
    for id in ids {
        out.push_str(LIST_DELIMITER);
        out.push_str(id);
    }
    out
}

/// Decodes a delimited transaction-id list.
///
/// Infallible: ids are opaque strings, so any input splits cleanly. The
/// leading empty segment produced by the encoding is discarded.
pub fn decode_tx_ids(encoded: &str) -> Vec<String> {
    encoded
        .split(LIST_DELIMITER)
        .skip(1)
        .map(str::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// Signature lists
// ---------------------------------------------------------------------------

/// Encodes a signature set as `base64(signer):base64(signature)` entries.
///
/// An absent signer reference is stored as the literal sentinel `"0"`
/// (not base64 of anything) and decodes back to `None`.
pub fn encode_signatures(sigs: &[BlockSignature]) -> String {
    let mut out = String::new();
    for sig in sigs {
        let signer = match &sig.signer {
            Some(bytes) => B64.encode(bytes),
            None => NO_SIGNER_SENTINEL.to_string(),
        };
        out.push_str(LIST_DELIMITER);
        out.push_str(&signer);
        out.push(PAIR_SEPARATOR);
        out.push_str(&B64.encode(&sig.signature));
    }
    out
}

/// Decodes a delimited signature list.
pub fn decode_signatures(encoded: &str) -> Result<Vec<BlockSignature>, CodecError> {
    let mut sigs = Vec::new();
    for entry in encoded.split(LIST_DELIMITER).skip(1) {
        let (signer_part, sig_part) = split_pair(entry)?;
        let signer = if signer_part == NO_SIGNER_SENTINEL {
            None
        } else {
            Some(decode_b64(signer_part, entry)?)
        };
        sigs.push(BlockSignature {
            signer,
            signature: decode_b64(sig_part, entry)?,
        });
    }
    Ok(sigs)
}

// ---------------------------------------------------------------------------
// Address/amount lists
// ---------------------------------------------------------------------------

/// Encodes an ordered address-to-amount mapping as
/// `base58(address):base64(amount_bytes)` entries.
pub fn encode_address_amounts(map: &BTreeMap<Vec<u8>, U256>) -> String {
    let mut out = String::new();
    for (address, amount) in map {
        out.push_str(LIST_DELIMITER);
        out.push_str(&bs58::encode(address).into_string());
        out.push(PAIR_SEPARATOR);
        out.push_str(&B64.encode(amount_to_bytes(amount)));
    }
    out
}

/// Decodes a delimited address-to-amount mapping.
pub fn decode_address_amounts(encoded: &str) -> Result<BTreeMap<Vec<u8>, U256>, CodecError> {
    let mut map = BTreeMap::new();
    for entry in encoded.split(LIST_DELIMITER).skip(1) {
        let (addr_part, amount_part) = split_pair(entry)?;
        let address = bs58::decode(addr_part)
            .into_vec()
            .map_err(|_| CodecError::Base58 {
                entry: entry.to_string(),
            })?;
        let amount = amount_from_bytes(&decode_b64(amount_part, entry)?)?;
        map.insert(address, amount);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Superblock segments
// ---------------------------------------------------------------------------

/// Encodes superblock segments into the fixed-header binary form.
pub fn encode_superblock_segments(segments: &BTreeMap<u64, SuperBlockSegment>) -> Vec<u8> {
    let mut out = Vec::new();
    for segment in segments.values() {
        out.extend_from_slice(&segment.block_num.to_le_bytes());
        out.extend_from_slice(&(segment.checksum.len() as i32).to_le_bytes());
        out.extend_from_slice(&segment.checksum);
    }
    out
}

/// Decodes a superblock segment blob, walking record by record until the
/// buffer is exhausted. Truncation anywhere is a fatal framing error.
pub fn decode_superblock_segments(
    bytes: &[u8],
) -> Result<BTreeMap<u64, SuperBlockSegment>, CodecError> {
    let mut segments = BTreeMap::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let header_end = offset + SEGMENT_HEADER_LEN;
        let truncated = |at: usize, needed: usize| CodecError::TruncatedSegments {
            offset: at,
            needed,
            len: bytes.len(),
        };
        let num_bytes: [u8; 8] = bytes
            .get(offset..offset + 8)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| truncated(offset, SEGMENT_HEADER_LEN))?;
        let len_bytes: [u8; 4] = bytes
            .get(offset + 8..header_end)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| truncated(offset, SEGMENT_HEADER_LEN))?;
        let block_num = u64::from_le_bytes(num_bytes);
        let checksum_len = usize::try_from(i32::from_le_bytes(len_bytes))
            .map_err(|_| truncated(offset, SEGMENT_HEADER_LEN))?;
        let checksum = bytes
            .get(header_end..header_end + checksum_len)
            .ok_or(CodecError::TruncatedSegments {
                offset: header_end,
                needed: checksum_len,
                len: bytes.len(),
            })?;
        segments.insert(
            block_num,
            SuperBlockSegment::new(block_num, checksum.to_vec()),
        );
        offset = header_end + checksum_len;
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Payload transform
// ---------------------------------------------------------------------------

/// Applies the storage-order transform to a payload: reverses the byte
/// sequence. Involutive; apply once on write, once on read.
pub fn shuffle_payload(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

/// Reverses the storage-order transform. Identical to
/// [`shuffle_payload`]; the separate name keeps call sites honest about
/// direction.
pub fn unshuffle_payload(bytes: &[u8]) -> Vec<u8> {
    shuffle_payload(bytes)
}

// ---------------------------------------------------------------------------
// Amount bytes
// ---------------------------------------------------------------------------

/// Minimal little-endian byte form of an amount. Zero encodes as one
/// zero byte so that every amount has a non-empty representation.
pub(crate) fn amount_to_bytes(amount: &U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    amount.to_little_endian(&mut buf);
    let significant = 32 - buf.iter().rev().take_while(|b| **b == 0).count();
    buf[..significant.max(1)].to_vec()
}

/// Parses the minimal little-endian byte form back into an amount.
pub(crate) fn amount_from_bytes(bytes: &[u8]) -> Result<U256, CodecError> {
    if bytes.len() > 32 {
        return Err(CodecError::AmountOverflow { len: bytes.len() });
    }
    Ok(U256::from_little_endian(bytes))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Splits a `key:value` entry, rejecting entries without a separator.
fn split_pair(entry: &str) -> Result<(&str, &str), CodecError> {
    entry
        .split_once(PAIR_SEPARATOR)
        .ok_or_else(|| CodecError::MalformedEntry {
            entry: entry.to_string(),
        })
}

fn decode_b64(part: &str, entry: &str) -> Result<Vec<u8>, CodecError> {
    B64.decode(part).map_err(|source| CodecError::Base64 {
        entry: entry.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
