use crate::configs::ServerConfig;

use log::{error, info};
use oxt_service_api::{
  api::{
    server_apply_update, server_calculate_response, GroupParams, MemoryEdb,
    ModpGroup, RistrettoGroup, SearchRequestMessage, SearchResponseMessage,
    Server, UpdateMessage,
  },
  errors::ServiceError,
  rpc::{
    ClientSearchRequest, ClientUpdateRequest, ResponseError,
    ServerSearchResponse, ServerUpdateResponse, ValidateRequest,
  },
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

const SNAPSHOT_FILE: &str = "edb.bin";
const GROUP_FILE: &str = "group.json";
const ENCODING_FAILURE: &str = r#"{"jsonrpc":"2.0","result":null,"error":{"code":-32603,"message":"Failed to encode response"},"id":0}"#;

/// The encrypted index held by the server, for the group selected at
/// start-up
pub enum EncryptedIndex {
  Modp(Server<ModpGroup, MemoryEdb>),
  Ristretto(Server<RistrettoGroup, MemoryEdb>),
}

impl EncryptedIndex {
  /// Loads the snapshot from the data directory when one exists,
  /// otherwise starts from an empty index
  pub fn open(confs: &ServerConfig) -> Result<Self, ServiceError> {
    let dir = Path::new(&confs.data_dir);
    if !dir.is_dir() {
      fs::create_dir_all(dir)?;
    }
    check_group(&dir.join(GROUP_FILE), &confs.group)?;

    let snapshot = snapshot_path(confs);
    let edb = match snapshot.to_str() {
      Some(path) if snapshot.is_file() => {
        println!(">> reading index snapshot from {}", path);
        MemoryEdb::from_file(path)?
      }
      _ => {
        println!(">> no snapshot found, starting from an empty index");
        MemoryEdb::new(confs.xset)?
      }
    };

    Ok(match &confs.group {
      GroupParams::Ristretto => EncryptedIndex::Ristretto(Server::new(
        RistrettoGroup,
        edb,
        confs.search,
      )?),
      params => EncryptedIndex::Modp(Server::new(
        ModpGroup::from_params(params)?,
        edb,
        confs.search,
      )?),
    })
  }

  pub fn apply_update(&mut self, um: UpdateMessage) -> Result<usize, ServiceError> {
    match self {
      EncryptedIndex::Modp(s) => server_apply_update(s, um),
      EncryptedIndex::Ristretto(s) => server_apply_update(s, um),
    }
  }

  pub fn search(
    &self,
    sm: SearchRequestMessage,
  ) -> Result<SearchResponseMessage, ServiceError> {
    match self {
      EncryptedIndex::Modp(s) => server_calculate_response(s, sm),
      EncryptedIndex::Ristretto(s) => server_calculate_response(s, sm),
    }
  }

  pub fn persist(&self, path: &Path) -> Result<(), ServiceError> {
    let path = path.to_str().ok_or_else(|| {
      ServiceError::WireFormatError("snapshot path is not valid UTF-8".into())
    })?;
    let store = match self {
      EncryptedIndex::Modp(s) => s.get_store(),
      EncryptedIndex::Ristretto(s) => s.get_store(),
    };
    Ok(store.write_to_file(path)?)
  }
}

pub fn snapshot_path(confs: &ServerConfig) -> PathBuf {
  Path::new(&confs.data_dir).join(SNAPSHOT_FILE)
}

// An index encrypted under one group cannot be searched under another
fn check_group(path: &Path, group: &GroupParams) -> Result<(), ServiceError> {
  if path.is_file() {
    let stored: GroupParams = serde_json::from_str(&fs::read_to_string(path)?)?;
    if stored != *group {
      return Err(ServiceError::WireFormatError(format!(
        "data directory holds an index for {:?}, configured group differs",
        stored
      )));
    }
  } else {
    fs::write(path, serde_json::to_string(group)?)?;
  }
  Ok(())
}

pub fn update_result_encoded(
  client_payload: &str,
  index: &RwLock<EncryptedIndex>,
  snapshot: &Path,
) -> String {
  let cur: ClientUpdateRequest = match serde_json::from_str(client_payload) {
    Ok(c) => c,
    Err(e) => {
      return encode(&ServerUpdateResponse::error(
        ResponseError::parse_error(e),
        0,
      ))
    }
  };
  if let Err(e) = cur.validate() {
    return encode(&ServerUpdateResponse::error(
      ResponseError::request_validation_error(e),
      cur.id,
    ));
  }
  let um = match cur.params {
    Some(um) => um,
    None => {
      return encode(&ServerUpdateResponse::error(
        ResponseError::client_input(),
        cur.id,
      ))
    }
  };

  let start = Instant::now();
  let mut guard = match index.write() {
    Ok(g) => g,
    Err(_) => {
      error!("index lock poisoned");
      return encode(&ServerUpdateResponse::error(
        ResponseError::update_internal(),
        cur.id,
      ));
    }
  };
  let applied = match guard.apply_update(um) {
    Ok(applied) => applied,
    Err(ServiceError::Sse(e)) => {
      error!("update rejected: {}", e);
      return encode(&ServerUpdateResponse::error(
        ResponseError::update_internal(),
        cur.id,
      ));
    }
    Err(e) => {
      error!("update failed: {}", e);
      return encode(&ServerUpdateResponse::error(
        ResponseError::client_input(),
        cur.id,
      ));
    }
  };
  // The postings are live in memory at this point, so the update is
  // reported as applied and the client advances its counter. Only the
  // on-disk snapshot lags behind until the next successful write.
  if let Err(e) = guard.persist(snapshot) {
    error!("update applied but snapshot write to {:?} failed: {}", snapshot, e);
  }
  println!("> Applied {} postings in {:?}", applied, start.elapsed());
  encode(&ServerUpdateResponse::new(applied, cur.id))
}

pub fn search_result_encoded(
  client_payload: &str,
  index: &RwLock<EncryptedIndex>,
) -> String {
  let csr: ClientSearchRequest = match serde_json::from_str(client_payload) {
    Ok(c) => c,
    Err(e) => {
      return encode(&ServerSearchResponse::error(
        ResponseError::parse_error(e),
        0,
      ))
    }
  };
  if let Err(e) = csr.validate() {
    return encode(&ServerSearchResponse::error(
      ResponseError::request_validation_error(e),
      csr.id,
    ));
  }
  let sm = match csr.params {
    Some(sm) => sm,
    None => {
      return encode(&ServerSearchResponse::error(
        ResponseError::client_input(),
        csr.id,
      ))
    }
  };
  println!(
    "> Search over {} driving-term postings, conjunct size {}",
    sm.stokens.len(),
    sm.conjunct_size
  );

  let start = Instant::now();
  let result = match index.read() {
    Ok(guard) => guard.search(sm),
    Err(_) => {
      error!("index lock poisoned");
      return encode(&ServerSearchResponse::error(
        ResponseError::search_internal(),
        csr.id,
      ));
    }
  };
  match result {
    Ok(resp) => {
      info!("search answered in {:?}", start.elapsed());
      encode(&ServerSearchResponse::new(resp, csr.id))
    }
    Err(e) => {
      error!("search failed: {}", e);
      encode(&ServerSearchResponse::error(
        ResponseError::search_internal(),
        csr.id,
      ))
    }
  }
}

fn encode<T: Serialize>(resp: &T) -> String {
  serde_json::to_string(resp).unwrap_or_else(|_| ENCODING_FAILURE.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use oxt_service_api::api::{
    client_prepare_search, client_prepare_update, client_process_output,
    Client, KeyMaterial, Operation, SearchConfig, XSetConfig,
  };
  use oxt_service_api::rpc::ValidateResponse;

  fn test_configs(name: &str) -> ServerConfig {
    ServerConfig {
      port: "0".into(),
      data_dir: std::env::temp_dir()
        .join(format!("oxt-server-{}-{}", name, std::process::id()))
        .to_str()
        .unwrap()
        .to_string(),
      xset: XSetConfig::Exact,
      group: GroupParams::Ristretto,
      search: SearchConfig {
        threads: 2,
        max_concurrency: 2,
      },
    }
  }

  #[test]
  fn update_then_search_over_json() {
    let confs = test_configs("roundtrip");
    let index = RwLock::new(EncryptedIndex::open(&confs).unwrap());
    let keys = KeyMaterial::generate(GroupParams::Ristretto);
    let mut client = Client::new(keys, RistrettoGroup).unwrap();

    let ids = vec!["doc1".to_string()];
    for w in ["alice", "bob"] {
      let um = client_prepare_update(&mut client, w, &ids, Operation::Add)
        .unwrap();
      let req = serde_json::to_string(&ClientUpdateRequest::new(um)).unwrap();
      let resp = update_result_encoded(&req, &index, &snapshot_path(&confs));
      let resp: ServerUpdateResponse = serde_json::from_str(&resp).unwrap();
      resp.validate(1).unwrap();
    }

    // the snapshot written by the update reloads into an equal index
    let reopened = RwLock::new(EncryptedIndex::open(&confs).unwrap());

    let query = vec!["alice".to_string(), "bob".to_string()];
    let (sm, state) = client_prepare_search(&client, &query).unwrap();
    let req = serde_json::to_string(&ClientSearchRequest::new(sm)).unwrap();
    let resp: ServerSearchResponse =
      serde_json::from_str(&search_result_encoded(&req, &reopened)).unwrap();
    resp.validate(1).unwrap();
    let found =
      client_process_output(&client, &state, resp.result.unwrap()).unwrap();
    fs::remove_dir_all(&confs.data_dir).unwrap();
    assert_eq!(found, ids);
  }

  #[test]
  fn snapshot_failure_keeps_applied_update() {
    let confs = test_configs("unwritable");
    let index = RwLock::new(EncryptedIndex::open(&confs).unwrap());
    let keys = KeyMaterial::generate(GroupParams::Ristretto);
    let mut client = Client::new(keys, RistrettoGroup).unwrap();

    // a directory cannot be opened as the snapshot file
    let unwritable = Path::new(&confs.data_dir).to_path_buf();
    let ids = vec!["doc1".to_string()];
    let um =
      client_prepare_update(&mut client, "alice", &ids, Operation::Add).unwrap();
    let req = serde_json::to_string(&ClientUpdateRequest::new(um)).unwrap();
    let resp: ServerUpdateResponse =
      serde_json::from_str(&update_result_encoded(&req, &index, &unwritable))
        .unwrap();
    resp.validate(1).unwrap();
    assert_eq!(resp.result.unwrap().applied, 1);

    let query = vec!["alice".to_string()];
    let (sm, state) = client_prepare_search(&client, &query).unwrap();
    let req = serde_json::to_string(&ClientSearchRequest::new(sm)).unwrap();
    let resp: ServerSearchResponse =
      serde_json::from_str(&search_result_encoded(&req, &index)).unwrap();
    let found =
      client_process_output(&client, &state, resp.result.unwrap()).unwrap();
    fs::remove_dir_all(&confs.data_dir).unwrap();
    assert_eq!(found, ids);
  }

  #[test]
  fn malformed_requests_get_error_responses() {
    let confs = test_configs("malformed");
    let index = RwLock::new(EncryptedIndex::open(&confs).unwrap());
    let resp: ServerSearchResponse =
      serde_json::from_str(&search_result_encoded("{", &index)).unwrap();
    assert_eq!(resp.error.unwrap().code, -32700);

    let req = serde_json::to_string(&ClientSearchRequest::default()).unwrap();
    let resp: ServerSearchResponse =
      serde_json::from_str(&search_result_encoded(&req, &index)).unwrap();
    assert_eq!(resp.error.unwrap().code, -32600);

    let mut other = confs.clone();
    other.group = GroupParams::oakley_768();
    assert!(EncryptedIndex::open(&other).is_err());
    fs::remove_dir_all(&confs.data_dir).unwrap();
  }
}
