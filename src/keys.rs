//! Client-only secret key material and its on-disk form.
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::BufReader;

use crate::errors::{SseError, SseResult};
use crate::group::GroupParams;
use crate::utils::format::{base64_from_bytes, bytes_from_base64};

/// Length of freshly generated keys
pub const KEY_LEN: usize = 32;
/// Shortest key accepted when loading existing material
pub const MIN_KEY_LEN: usize = 16;

/// The `KeyMaterial` struct holds the four independent PRF keys and the
/// group they are used with. It never leaves the client.
///
/// - `kt` derives TSet addresses and posting masks
/// - `kx` derives the keyword side of cross-tags
/// - `ky` derives the (id, op) side of cross-tags
/// - `kz` blinds the per-version alpha values
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
  kt: Vec<u8>,
  kx: Vec<u8>,
  ky: Vec<u8>,
  kz: Vec<u8>,
  group: GroupParams,
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
  keys: Vec<String>,
  group: GroupParams,
}

impl KeyMaterial {
  /// Samples four fresh keys from the OS RNG
  pub fn generate(group: GroupParams) -> Self {
    Self {
      kt: generate_key(),
      kx: generate_key(),
      ky: generate_key(),
      kz: generate_key(),
      group,
    }
  }

  pub fn from_keys(keys: [Vec<u8>; 4], group: GroupParams) -> SseResult<Self> {
    for (i, k) in keys.iter().enumerate() {
      if k.len() < MIN_KEY_LEN {
        return Err(SseError::Key(format!(
          "key {} is {} bytes, at least {} required",
          i,
          k.len(),
          MIN_KEY_LEN
        )));
      }
    }
    let [kt, kx, ky, kz] = keys;
    Ok(Self {
      kt,
      kx,
      ky,
      kz,
      group,
    })
  }

  /// Load keys from a JSON file written by `write_to_file`
  pub fn load(path: &str) -> SseResult<Self> {
    let reader = BufReader::new(fs::File::open(path)?);
    let kf: KeyFile = serde_json::from_reader(reader)?;
    if kf.keys.len() != 4 {
      return Err(SseError::Key(format!(
        "expected 4 keys in {}, found {}",
        path,
        kf.keys.len()
      )));
    }
    let decoded = kf
      .keys
      .iter()
      .map(|k| bytes_from_base64(k))
      .collect::<SseResult<Vec<Vec<u8>>>>()?;
    let keys: [Vec<u8>; 4] = decoded
      .try_into()
      .map_err(|_| SseError::Key("expected exactly 4 keys".into()))?;
    Self::from_keys(keys, kf.group)
  }

  /// Writes the keys (base64) and group parameters as JSON to file
  pub fn write_to_file(&self, path: &str) -> SseResult<()> {
    let kf = KeyFile {
      keys: [&self.kt, &self.kx, &self.ky, &self.kz]
        .iter()
        .map(|k| base64_from_bytes(k))
        .collect(),
      group: self.group.clone(),
    };
    Ok(serde_json::to_writer(&fs::File::create(path)?, &kf)?)
  }

  pub fn kt(&self) -> &[u8] {
    &self.kt
  }

  pub fn kx(&self) -> &[u8] {
    &self.kx
  }

  pub fn ky(&self) -> &[u8] {
    &self.ky
  }

  pub fn kz(&self) -> &[u8] {
    &self.kz
  }

  pub fn group_params(&self) -> &GroupParams {
    &self.group
  }
}

// Keys are never printed
impl fmt::Debug for KeyMaterial {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("KeyMaterial")
      .field("group", &self.group)
      .finish_non_exhaustive()
  }
}

fn generate_key() -> Vec<u8> {
  let mut key = vec![0u8; KEY_LEN];
  OsRng.fill_bytes(&mut key);
  key
}
