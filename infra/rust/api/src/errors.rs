//! The `errors` module provides a set of errors for exposing to client-
//! and server-side implementations.

use crate::rpc::RPCError;
use oxt_sse::errors::SseError;
use std::{error::Error, fmt};

// ServiceError encapsulates the possible error cases of the encrypted
// search service APIs
#[derive(Debug)]
pub enum ServiceError {
  Sse(SseError),
  DatasetError(String, String),
  WireFormatError(String),
  Rpc(RPCError),
  SerdeError(serde_json::Error),
  IoError(std::io::Error),
}

impl Error for ServiceError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      ServiceError::Sse(e) => Some(e),
      ServiceError::Rpc(e) => Some(e),
      ServiceError::SerdeError(e) => Some(e),
      ServiceError::IoError(e) => Some(e),
      _ => None,
    }
  }
}

impl fmt::Display for ServiceError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ServiceError::Sse(e) => {
        write!(f, "Error occurred in underlying encrypted index: {}.", e)
      }
      ServiceError::DatasetError(path, s) => write!(
        f,
        "Error occurred reading dataset file at path {}, error: {}.",
        path, s
      ),
      ServiceError::WireFormatError(s) => {
        write!(f, "Error occurred decoding a wire message: {}.", s)
      }
      ServiceError::Rpc(e) => write!(f, "{}", e),
      ServiceError::SerdeError(e) => {
        write!(f, "Error occurred during serialization of data: {}.", e)
      }
      ServiceError::IoError(e) => write!(f, "I/O error: {}.", e),
    }
  }
}

impl From<SseError> for ServiceError {
  fn from(e: SseError) -> Self {
    ServiceError::Sse(e)
  }
}

impl From<RPCError> for ServiceError {
  fn from(e: RPCError) -> Self {
    ServiceError::Rpc(e)
  }
}

impl From<base64::DecodeError> for ServiceError {
  fn from(e: base64::DecodeError) -> Self {
    ServiceError::WireFormatError(format!("invalid base64: {}", e))
  }
}

impl From<serde_json::Error> for ServiceError {
  fn from(e: serde_json::Error) -> Self {
    ServiceError::SerdeError(e)
  }
}

impl From<std::io::Error> for ServiceError {
  fn from(e: std::io::Error) -> Self {
    ServiceError::IoError(e)
  }
}
