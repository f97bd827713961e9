//! Utility modules for the keyed pseudorandom functions and byte-level
//! encodings used by the OXT index.

/// Keyed PRFs and the masking of (document id, operation) pairs
pub mod prf {
  use hmac::{Hmac, Mac};
  use serde::{Deserialize, Serialize};
  use sha2::Sha256;
  use std::convert::TryFrom;

  use crate::errors::{SseError, SseResult};

  type HmacSha256 = Hmac<Sha256>;

  /// Output length of `prf_bytes`
  pub const MAC_LEN: usize = 32;
  /// Largest document id that fits in a masked posting value, the
  /// remaining byte carries the operation flag
  pub const MAX_ID_LEN: usize = MAC_LEN - 1;

  const ADDRESS_SUFFIX: u8 = 0x00;
  const VALUE_SUFFIX: u8 = 0x01;

  /// The `Operation` recorded alongside each posting. Deletions are
  /// new postings, nothing is ever removed from the index.
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Operation {
    Delete = 0,
    Add = 1,
  }

  impl Operation {
    pub fn as_byte(self) -> u8 {
      self as u8
    }
  }

  impl TryFrom<u8> for Operation {
    type Error = SseError;

    fn try_from(b: u8) -> SseResult<Self> {
      match b {
        0 => Ok(Operation::Delete),
        1 => Ok(Operation::Add),
        _ => Err(SseError::InvalidInput(format!(
          "operation flag must be 0 or 1, got {}",
          b
        ))),
      }
    }
  }

  /// HMAC-SHA256 keyed PRF. Any non-empty key is accepted.
  pub fn prf_bytes(key: &[u8], message: &[u8]) -> SseResult<[u8; MAC_LEN]> {
    if key.is_empty() {
      return Err(SseError::Key("PRF key must not be empty".into()));
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
      .map_err(|e| SseError::Key(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
  }

  /// XORs the first `id.len()` bytes of `mac` with `id` and the final
  /// byte with the operation flag.
  pub fn xor_mask_with_op(
    mac: &[u8; MAC_LEN],
    id: &[u8],
    op: Operation,
  ) -> SseResult<[u8; MAC_LEN]> {
    if id.len() > MAX_ID_LEN {
      return Err(SseError::InvalidInput(format!(
        "document id must be at most {} bytes, got {}",
        MAX_ID_LEN,
        id.len()
      )));
    }
    let mut result = *mac;
    for (r, b) in result.iter_mut().zip(id.iter()) {
      *r ^= b;
    }
    result[MAX_ID_LEN] ^= op.as_byte();
    Ok(result)
  }

  /// Inverse of `xor_mask_with_op`. Ids are zero-padded to 31 bytes by
  /// the mask, so trailing zero bytes are stripped from the result.
  pub fn unmask_with_op(
    mac: &[u8; MAC_LEN],
    val: &[u8],
  ) -> SseResult<(Vec<u8>, Operation)> {
    if val.len() != MAC_LEN {
      return Err(SseError::Encoding(format!(
        "masked value must be {} bytes, got {}",
        MAC_LEN,
        val.len()
      )));
    }
    let mut id: Vec<u8> = mac[..MAX_ID_LEN]
      .iter()
      .zip(val[..MAX_ID_LEN].iter())
      .map(|(m, v)| m ^ v)
      .collect();
    while id.last() == Some(&0) {
      id.pop();
    }
    let op = Operation::try_from(mac[MAX_ID_LEN] ^ val[MAX_ID_LEN])
      .map_err(|_| {
        SseError::Encoding("operation flag did not unmask to 0 or 1".into())
      })?;
    Ok((id, op))
  }

  /// Big-endian bytes of `v` without leading zeros (empty for zero)
  pub fn minimal_be_bytes(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
  }

  /// `keyword || version`, the per-update input shared by the address,
  /// value and alpha derivations
  pub fn keyword_version(keyword: &str, version: u64) -> Vec<u8> {
    let mut out = keyword.as_bytes().to_vec();
    out.extend(minimal_be_bytes(version));
    out
  }

  pub fn address_input(wwc: &[u8]) -> Vec<u8> {
    with_suffix(wwc, ADDRESS_SUFFIX)
  }

  pub fn value_input(wwc: &[u8]) -> Vec<u8> {
    with_suffix(wwc, VALUE_SUFFIX)
  }

  /// `id || op`, the input to the id-side alpha component
  pub fn id_op_input(id: &[u8], op: Operation) -> Vec<u8> {
    with_suffix(id, op.as_byte())
  }

  fn with_suffix(prefix: &[u8], suffix: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 1);
    out.extend_from_slice(prefix);
    out.push(suffix);
    out
  }
}

/// Functionality related to manipulation of data formats that are used
pub mod format {
  use crate::errors::{SseError, SseResult};
  use std::convert::TryInto;

  pub fn base64_from_bytes(bytes: &[u8]) -> String {
    base64::encode(bytes)
  }

  pub fn bytes_from_base64(s: &str) -> SseResult<Vec<u8>> {
    Ok(base64::decode(s)?)
  }

  pub fn fixed_bytes_from_slice<const N: usize>(
    bytes: &[u8],
  ) -> SseResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
      SseError::Encoding(format!(
        "unexpected byte length: expected {}, got {}",
        N,
        bytes.len()
      ))
    })
  }
}
