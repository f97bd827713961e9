use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

// SseResult returns a result of a given type or an `SseError`, which
// covers every failure the encrypted index core can surface
pub type SseResult<T> = Result<T, SseError>;

/// `SseError` encapsulates the possible failure cases of the update,
/// search and decrypt operations.
///
/// Bloom filter false positives are not represented here: they only
/// ever inflate a match count and are part of the documented behaviour
/// of a probabilistic XSet.
#[derive(Debug)]
pub enum SseError {
  /// Malformed or wrong-length secret key
  Key(String),
  /// Malformed bytes while decoding a posting, token or group element
  Encoding(String),
  /// A driving-term address that must exist was absent from the TSet
  LookupMiss { version: u64 },
  /// Caller supplied input that the protocol cannot express
  InvalidInput(String),
  /// Search entries handed to the reconciler out of version order
  OutOfOrder { expected: u64, found: u64 },
  /// Failure reported by an external store backend
  Store(String),
  Serde(bincode::Error),
  Json(serde_json::Error),
  Io(std::io::Error),
}

impl Display for SseError {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    match self {
      SseError::Key(s) => write!(f, "Invalid key material: {}", s),
      SseError::Encoding(s) => write!(f, "Encoding error: {}", s),
      SseError::LookupMiss { version } => write!(
        f,
        "Posting for driving term version {} is missing, counter and index are out of sync",
        version
      ),
      SseError::InvalidInput(s) => write!(f, "Invalid input: {}", s),
      SseError::OutOfOrder { expected, found } => write!(
        f,
        "Search entries must be processed in increasing version order, expected {}, found {}",
        expected, found
      ),
      SseError::Store(s) => write!(f, "Store unavailable: {}", s),
      SseError::Serde(e) => {
        write!(f, "Error occurred during serialization of data: {}.", e)
      }
      SseError::Json(e) => {
        write!(f, "Error occurred during JSON serialization of data: {}.", e)
      }
      SseError::Io(e) => write!(f, "I/O error: {}", e),
    }
  }
}

impl Error for SseError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      SseError::Serde(e) => Some(e),
      SseError::Json(e) => Some(e),
      SseError::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<bincode::Error> for SseError {
  fn from(e: bincode::Error) -> Self {
    SseError::Serde(e)
  }
}

impl From<serde_json::Error> for SseError {
  fn from(e: serde_json::Error) -> Self {
    SseError::Json(e)
  }
}

impl From<std::io::Error> for SseError {
  fn from(e: std::io::Error) -> Self {
    SseError::Io(e)
  }
}

impl From<base64::DecodeError> for SseError {
  fn from(e: base64::DecodeError) -> Self {
    SseError::Encoding(format!("invalid base64: {}", e))
  }
}
