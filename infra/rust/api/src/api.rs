//! The `api` module provides server and client functions for running
//! the encrypted search service. Byte strings produced by the core are
//! carried as base64 so that every message is plain JSON.

pub use oxt_sse::api::{
  Client, EdbStore, Group, GroupParams, KeyMaterial, MemoryEdb, ModpGroup,
  Operation, PlaintextRecord, QueryState, RistrettoGroup, SearchConfig,
  SearchEntry, SearchMessage, Server, UpdateBatch, UpdateCounter, XSetConfig,
};
use oxt_sse::api::Posting;
use oxt_sse::utils::format::{base64_from_bytes, bytes_from_base64};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// A single TSet write as sent over the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingMessage {
  pub address: String,
  pub val: String,
  pub alpha: String,
  pub alpha_del: String,
}

/// The delete-side cross-tag of one posting and whether the server
/// revokes (`Delete`) or clears (`Add`) it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationMessage {
  pub tag: String,
  pub op: Operation,
}

/// The message containing an encrypted update batch that a client
/// sends to the server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
  pub postings: Vec<PostingMessage>,
  pub xtags: Vec<String>,
  pub revocations: Vec<RevocationMessage>,
}
impl From<&UpdateBatch> for UpdateMessage {
  fn from(batch: &UpdateBatch) -> Self {
    Self {
      postings: batch
        .postings
        .iter()
        .map(|(address, p)| PostingMessage {
          address: base64_from_bytes(address),
          val: base64_from_bytes(&p.val),
          alpha: base64_from_bytes(&p.alpha),
          alpha_del: base64_from_bytes(&p.alpha_del),
        })
        .collect(),
      xtags: batch.xtags.iter().map(|x| base64_from_bytes(x)).collect(),
      revocations: batch
        .revocations
        .iter()
        .map(|(tag, op)| RevocationMessage {
          tag: base64_from_bytes(tag),
          op: *op,
        })
        .collect(),
    }
  }
}
impl UpdateMessage {
  pub fn len(&self) -> usize {
    self.postings.len()
  }

  pub fn is_empty(&self) -> bool {
    self.postings.is_empty()
  }

  /// Every posting carries one revocation entry, and at most one
  /// add-side cross-tag
  pub fn check_shape(&self) -> Result<(), String> {
    if self.revocations.len() != self.postings.len()
      || self.xtags.len() > self.postings.len()
    {
      return Err(format!(
        "{} postings with {} cross-tags and {} revocations",
        self.postings.len(),
        self.xtags.len(),
        self.revocations.len()
      ));
    }
    Ok(())
  }

  pub fn into_batch(self) -> Result<UpdateBatch, ServiceError> {
    self.check_shape().map_err(ServiceError::WireFormatError)?;
    let postings = self
      .postings
      .iter()
      .map(|p| {
        Ok((
          bytes_from_base64(&p.address)?,
          Posting {
            val: bytes_from_base64(&p.val)?,
            alpha: bytes_from_base64(&p.alpha)?,
            alpha_del: bytes_from_base64(&p.alpha_del)?,
          },
        ))
      })
      .collect::<Result<Vec<_>, ServiceError>>()?;
    let revocations = self
      .revocations
      .iter()
      .map(|r| Ok((bytes_from_base64(&r.tag)?, r.op)))
      .collect::<Result<Vec<_>, ServiceError>>()?;
    Ok(UpdateBatch {
      postings,
      xtags: decode_all(&self.xtags)?,
      revocations,
    })
  }
}

/// The search tokens and cross-tokens of a conjunctive query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequestMessage {
  pub stokens: Vec<String>,
  pub xtokens: Vec<Vec<String>>,
  pub conjunct_size: usize,
}
impl From<&SearchMessage> for SearchRequestMessage {
  fn from(msg: &SearchMessage) -> Self {
    Self {
      stokens: msg.stokens.iter().map(|s| base64_from_bytes(s)).collect(),
      xtokens: msg
        .xtokens
        .iter()
        .map(|xs| xs.iter().map(|x| base64_from_bytes(x)).collect())
        .collect(),
      conjunct_size: msg.conjunct_size,
    }
  }
}
impl SearchRequestMessage {
  pub fn into_search_message(self) -> Result<SearchMessage, ServiceError> {
    Ok(SearchMessage {
      stokens: decode_all(&self.stokens)?,
      xtokens: self
        .xtokens
        .iter()
        .map(|xs| decode_all(xs))
        .collect::<Result<Vec<_>, ServiceError>>()?,
      conjunct_size: self.conjunct_size,
    })
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEntryMessage {
  pub j: u64,
  pub val: String,
  pub cnt: usize,
}

// The server response consists of one entry per search token, in the
// order the tokens were sent
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponseMessage {
  pub entries: Vec<SearchEntryMessage>,
}
impl From<&[SearchEntry]> for SearchResponseMessage {
  fn from(entries: &[SearchEntry]) -> Self {
    Self {
      entries: entries
        .iter()
        .map(|e| SearchEntryMessage {
          j: e.j,
          val: base64_from_bytes(&e.val),
          cnt: e.cnt,
        })
        .collect(),
    }
  }
}
impl SearchResponseMessage {
  pub fn into_entries(self) -> Result<Vec<SearchEntry>, ServiceError> {
    self
      .entries
      .into_iter()
      .map(|e| {
        Ok(SearchEntry {
          j: e.j,
          val: bytes_from_base64(&e.val)?,
          cnt: e.cnt,
        })
      })
      .collect()
  }
}

/// Encrypts updates of `ids` under `keyword` for sending to the server
pub fn client_prepare_update<G: Group>(
  client: &mut Client<G>,
  keyword: &str,
  ids: &[String],
  op: Operation,
) -> Result<UpdateMessage, ServiceError> {
  let batch = client.update_many(keyword, ids, op)?;
  Ok(UpdateMessage::from(&batch))
}

/// Encrypts the bulk plaintext dataset for the initial upload
pub fn client_prepare_setup<G: Group>(
  client: &mut Client<G>,
  records: Vec<PlaintextRecord>,
) -> Result<(UpdateMessage, usize), ServiceError> {
  let batch = client.setup(records)?;
  Ok((UpdateMessage::from(&batch), batch.payload_size()))
}

pub fn client_prepare_search<G: Group>(
  client: &Client<G>,
  query: &[String],
) -> Result<(SearchRequestMessage, QueryState), ServiceError> {
  let (msg, state) = client.prepare_search(query)?;
  Ok((SearchRequestMessage::from(&msg), state))
}

pub fn server_apply_update<G: Group, S: EdbStore>(
  server: &mut Server<G, S>,
  msg: UpdateMessage,
) -> Result<usize, ServiceError> {
  let batch = msg.into_batch()?;
  Ok(server.update(batch)?)
}

pub fn server_calculate_response<G: Group, S: EdbStore>(
  server: &Server<G, S>,
  msg: SearchRequestMessage,
) -> Result<SearchResponseMessage, ServiceError> {
  let entries = server.search(&msg.into_search_message()?)?;
  debug!("responding with {} search entries", entries.len());
  Ok(SearchResponseMessage::from(entries.as_slice()))
}

pub fn client_process_output<G: Group>(
  client: &Client<G>,
  state: &QueryState,
  resp: SearchResponseMessage,
) -> Result<Vec<String>, ServiceError> {
  let entries = resp.into_entries()?;
  Ok(client.decrypt(state, &entries)?)
}

fn decode_all(encoded: &[String]) -> Result<Vec<Vec<u8>>, ServiceError> {
  encoded
    .iter()
    .map(|s| bytes_from_base64(s).map_err(ServiceError::from))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn messages_survive_json_transport() {
    let group = RistrettoGroup;
    let keys = KeyMaterial::generate(group.params());
    let mut client = Client::new(keys, group).unwrap();
    let mut server = Server::new(
      group,
      MemoryEdb::new(XSetConfig::Exact).unwrap(),
      SearchConfig {
        threads: 2,
        max_concurrency: 2,
      },
    )
    .unwrap();

    let records = vec![
      PlaintextRecord {
        keyword: "alice".into(),
        ids: strings(&["doc1", "doc2"]),
      },
      PlaintextRecord {
        keyword: "bob".into(),
        ids: strings(&["doc1"]),
      },
    ];
    let (update, size) = client_prepare_setup(&mut client, records).unwrap();
    assert!(size > 0);
    let update: UpdateMessage =
      serde_json::from_str(&serde_json::to_string(&update).unwrap()).unwrap();
    assert_eq!(server_apply_update(&mut server, update).unwrap(), 3);

    let query = strings(&["alice", "bob"]);
    let (req, state) = client_prepare_search(&client, &query).unwrap();
    let req: SearchRequestMessage =
      serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
    let resp = server_calculate_response(&server, req).unwrap();
    let resp: SearchResponseMessage =
      serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
    assert_eq!(
      client_process_output(&client, &state, resp).unwrap(),
      strings(&["doc1"])
    );
  }

  #[test]
  fn malformed_update_messages_are_rejected() {
    let msg = UpdateMessage {
      postings: vec![PostingMessage {
        address: "not base64!".into(),
        val: String::new(),
        alpha: String::new(),
        alpha_del: String::new(),
      }],
      xtags: vec![String::new()],
      revocations: vec![RevocationMessage {
        tag: String::new(),
        op: Operation::Add,
      }],
    };
    assert!(msg.into_batch().is_err());

    let unbalanced = UpdateMessage {
      postings: vec![],
      xtags: vec![base64_from_bytes(&[1, 2, 3])],
      revocations: vec![],
    };
    assert!(matches!(
      unbalanced.into_batch(),
      Err(ServiceError::WireFormatError(_))
    ));
  }
}
