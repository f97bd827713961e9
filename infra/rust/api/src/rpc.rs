//! The `rpc` module dictates a message format for requesting and
//! receiving data between the client and the server. The RPC format
//! uses JSONRPC version 2.0.
//!
//! # Example usage
//!
//! ```
//! # use oxt_service_api::api::*;
//! # use oxt_service_api::rpc::*;
//! # let group = RistrettoGroup;
//! # let keys = KeyMaterial::generate(group.params());
//! # let mut client = Client::new(keys, group).unwrap();
//! # let mut server = Server::new(
//! #   group,
//! #   MemoryEdb::new(XSetConfig::Exact).unwrap(),
//! #   SearchConfig::default(),
//! # ).unwrap();
//! // client-side...
//! let ids = vec!["doc1".to_string()];
//! let um = client_prepare_update(&mut client, "alice", &ids, Operation::Add).unwrap();
//! let cur = ClientUpdateRequest::new(um);
//!
//! // server-side...
//! cur.validate().unwrap();
//! let applied = server_apply_update(&mut server, cur.params.unwrap()).unwrap();
//! let sur = ServerUpdateResponse::new(applied, cur.id);
//!
//! // client-side...
//! sur.validate(cur.id).unwrap();
//! let query = vec!["alice".to_string()];
//! let (sm, state) = client_prepare_search(&client, &query).unwrap();
//! let csr = ClientSearchRequest::new(sm);
//!
//! // server-side...
//! csr.validate().unwrap();
//! let resp = server_calculate_response(&server, csr.params.unwrap()).unwrap();
//! let ssr = ServerSearchResponse::new(resp, csr.id);
//!
//! // client-side...
//! ssr.validate(csr.id).unwrap();
//! let ids = client_process_output(&client, &state, ssr.result.unwrap()).unwrap();
//! assert_eq!(ids, vec!["doc1"]);
//! ```
use crate::api::{SearchRequestMessage, SearchResponseMessage, UpdateMessage};
pub use errors::RPCError;
use serde::{Deserialize, Serialize};

const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_UPDATE: &str = "update";
pub const METHOD_SEARCH: &str = "search";

pub trait ValidateRequest {
  fn validate(&self) -> Result<(), RPCError>;
}
pub trait ValidateResponse {
  fn validate(&self, req_id: usize) -> Result<(), RPCError>;
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ClientUpdateRequest {
  pub jsonrpc: String,
  pub method: String,
  pub params: Option<UpdateMessage>,
  pub id: usize,
}
impl ClientUpdateRequest {
  pub fn new(um: UpdateMessage) -> Self {
    Self {
      params: Some(um),
      ..Default::default()
    }
  }
}
impl Default for ClientUpdateRequest {
  fn default() -> ClientUpdateRequest {
    ClientUpdateRequest {
      jsonrpc: JSONRPC_VERSION.into(),
      method: METHOD_UPDATE.into(),
      params: None,
      id: 1,
    }
  }
}
impl ValidateRequest for ClientUpdateRequest {
  fn validate(&self) -> Result<(), RPCError> {
    validate_header(&self.jsonrpc, &self.method, METHOD_UPDATE)?;
    match &self.params {
      None => Err(RPCError::RequestParamsValidation(
        "No update message enclosed".into(),
      )),
      Some(um) => um.check_shape().map_err(RPCError::RequestParamsValidation),
    }
  }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct UpdateResult {
  pub applied: usize,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ServerUpdateResponse {
  pub jsonrpc: String,
  pub result: Option<UpdateResult>,
  pub error: Option<ResponseError>,
  pub id: usize,
}
impl ServerUpdateResponse {
  pub fn new(applied: usize, id: usize) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.into(),
      id,
      result: Some(UpdateResult { applied }),
      error: None,
    }
  }

  pub fn error(resp_err: ResponseError, id: usize) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.into(),
      id,
      result: None,
      error: Some(resp_err),
    }
  }
}
impl ValidateResponse for ServerUpdateResponse {
  fn validate(&self, req_id: usize) -> Result<(), RPCError> {
    validate_response(&self.jsonrpc, self.id, req_id, &self.error)?;
    if self.result.is_none() {
      return Err(RPCError::ResultValidation("No result object".into()));
    }
    Ok(())
  }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ClientSearchRequest {
  pub jsonrpc: String,
  pub method: String,
  pub params: Option<SearchRequestMessage>,
  pub id: usize,
}
impl ClientSearchRequest {
  pub fn new(sm: SearchRequestMessage) -> Self {
    Self {
      params: Some(sm),
      ..Default::default()
    }
  }
}
impl Default for ClientSearchRequest {
  fn default() -> ClientSearchRequest {
    ClientSearchRequest {
      jsonrpc: JSONRPC_VERSION.into(),
      method: METHOD_SEARCH.into(),
      params: None,
      id: 1,
    }
  }
}
impl ValidateRequest for ClientSearchRequest {
  fn validate(&self) -> Result<(), RPCError> {
    validate_header(&self.jsonrpc, &self.method, METHOD_SEARCH)?;
    let sm = self.params.as_ref().ok_or_else(|| {
      RPCError::RequestParamsValidation("No search message enclosed".into())
    })?;
    if sm.conjunct_size == 0 {
      return Err(RPCError::RequestParamsValidation(
        "Conjunct size must be at least 1".into(),
      ));
    } else if sm.stokens.len() != sm.xtokens.len() {
      return Err(RPCError::RequestParamsValidation(format!(
        "{} search tokens but {} cross-token lists",
        sm.stokens.len(),
        sm.xtokens.len()
      )));
    }
    Ok(())
  }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ServerSearchResponse {
  pub jsonrpc: String,
  pub result: Option<SearchResponseMessage>,
  pub error: Option<ResponseError>,
  pub id: usize,
}
impl ServerSearchResponse {
  pub fn new(resp: SearchResponseMessage, id: usize) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.into(),
      id,
      result: Some(resp),
      error: None,
    }
  }

  pub fn error(resp_err: ResponseError, id: usize) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.into(),
      id,
      result: None,
      error: Some(resp_err),
    }
  }
}
impl ValidateResponse for ServerSearchResponse {
  fn validate(&self, req_id: usize) -> Result<(), RPCError> {
    validate_response(&self.jsonrpc, self.id, req_id, &self.error)?;
    if self.result.is_none() {
      return Err(RPCError::ResultValidation("No result object".into()));
    }
    Ok(())
  }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ResponseError {
  pub code: i32,
  pub message: String,
}
impl ResponseError {
  pub fn parse_error(e: serde_json::Error) -> ResponseError {
    ResponseError {
      code: -32700,
      message: format!("Failed to parse request: {}", e),
    }
  }

  pub fn request_validation_error(e: RPCError) -> ResponseError {
    ResponseError {
      code: -32600,
      message: e.to_string(),
    }
  }

  pub fn update_internal() -> ResponseError {
    ResponseError {
      code: -32602,
      message: "Failed to apply update".into(),
    }
  }

  pub fn search_internal() -> ResponseError {
    ResponseError {
      code: -32602,
      message: "Failed to respond to search".into(),
    }
  }

  pub fn client_input() -> ResponseError {
    ResponseError {
      code: -32602,
      message: "Failed to decode client message".into(),
    }
  }
}

fn validate_header(
  jsonrpc: &str,
  method: &str,
  expected: &str,
) -> Result<(), RPCError> {
  if jsonrpc != JSONRPC_VERSION {
    return Err(RPCError::VersionValidation(jsonrpc.to_string()));
  } else if method != expected {
    return Err(RPCError::RequestParamsValidation(format!(
      "Unexpected method {}, expected {}",
      method, expected
    )));
  }
  Ok(())
}

fn validate_response(
  jsonrpc: &str,
  id: usize,
  req_id: usize,
  error: &Option<ResponseError>,
) -> Result<(), RPCError> {
  if jsonrpc != JSONRPC_VERSION {
    return Err(RPCError::VersionValidation(jsonrpc.to_string()));
  } else if id != req_id {
    return Err(RPCError::IDValidation(req_id, id));
  } else if let Some(e) = error {
    return Err(RPCError::Response(e.code, e.message.clone()));
  }
  Ok(())
}

mod errors {
  #[derive(Debug)]
  pub enum RPCError {
    VersionValidation(String),
    RequestParamsValidation(String),
    ResultValidation(String),
    IDValidation(usize, usize),
    Response(i32, String),
  }

  impl std::error::Error for RPCError {}

  impl std::fmt::Display for RPCError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
      match self {
        RPCError::VersionValidation(s) => write!(
          f,
          "JSONRPC: request version ({}) is incorrect, should be '2.0'.",
          s
        ),
        RPCError::RequestParamsValidation(s) => {
          write!(f, "JSONRPC: bad request params error, {}", s)
        }
        RPCError::IDValidation(id1, id2) => write!(
          f,
          "JSONRPC: bad response id error, request_id = {}, response_id = {}",
          id1, id2
        ),
        RPCError::ResultValidation(s) => {
          write!(f, "JSONRPC: bad response result error, {}", s)
        }
        RPCError::Response(c, s) => write!(
          f,
          "JSONRPC: response returned error, code: {}, message: {}",
          c, s
        ),
      }
    }
  }
}
