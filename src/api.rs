/// The `api` module is the public entry point for the OXT encrypted
/// index: the `Client` owns keys and counters and produces update
/// batches, search tokens and final results; the `Server` owns the
/// encrypted index and evaluates searches over it.
pub use crate::db::{
  EdbStore, MemoryEdb, Posting, UpdateCounter, XSetConfig,
};
use crate::errors::{SseError, SseResult};
pub use crate::group::{Group, GroupParams, ModpGroup, RistrettoGroup};
use crate::group::prf_exponent;
pub use crate::keys::KeyMaterial;
pub use crate::utils::prf::Operation;
use crate::utils::prf::{
  address_input, id_op_input, keyword_version, prf_bytes, unmask_with_op,
  value_input, xor_mask_with_op, MAX_ID_LEN,
};

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str;

/// Bound on driving-term postings in flight at once in the matcher
pub const DEFAULT_MAX_CONCURRENCY: usize = 200;

/// A `PlaintextRecord` is one entry of the bulk plaintext source: a
/// keyword and the documents that contain it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaintextRecord {
  pub keyword: String,
  pub ids: Vec<String>,
}

/// The `UpdateBatch` holds the encrypted writes produced by the client
/// for one or more updates, ready to be applied to an `EdbStore`.
///
/// `xtags` carries the add-side cross-tag of every `Add` posting.
/// `revocations` carries, for every posting in order, the delete-side
/// cross-tag of its (keyword, id) pair: a `Delete` revokes it and an
/// `Add` clears it again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBatch {
  pub postings: Vec<(Vec<u8>, Posting)>,
  pub xtags: Vec<Vec<u8>>,
  pub revocations: Vec<(Vec<u8>, Operation)>,
}
impl UpdateBatch {
  pub fn len(&self) -> usize {
    self.postings.len()
  }

  pub fn is_empty(&self) -> bool {
    self.postings.is_empty()
  }

  pub fn extend(&mut self, other: UpdateBatch) {
    self.postings.extend(other.postings);
    self.xtags.extend(other.xtags);
    self.revocations.extend(other.revocations);
  }

  /// Total bytes of postings and cross-tags in the batch
  pub fn payload_size(&self) -> usize {
    let postings: usize = self
      .postings
      .iter()
      .map(|(addr, p)| {
        addr.len() + p.val.len() + p.alpha.len() + p.alpha_del.len()
      })
      .sum();
    let xtags: usize = self.xtags.iter().map(Vec::len).sum();
    let revocations: usize = self.revocations.iter().map(|(t, _)| t.len()).sum();
    postings + xtags + revocations
  }

  fn check_shape(&self) -> SseResult<()> {
    if self.revocations.len() != self.postings.len()
      || self.xtags.len() > self.postings.len()
    {
      return Err(SseError::InvalidInput(format!(
        "{} postings with {} cross-tags and {} revocations",
        self.postings.len(),
        self.xtags.len(),
        self.revocations.len()
      )));
    }
    Ok(())
  }
}

/// The `SearchMessage` is what the client sends to the server for a
/// conjunctive query: one search token per driving-term version and,
/// per version, one cross-token per remaining keyword.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMessage {
  pub stokens: Vec<Vec<u8>>,
  pub xtokens: Vec<Vec<Vec<u8>>>,
  pub conjunct_size: usize,
}

/// Client-side state kept between token generation and decryption
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
  driving_term: String,
  n: u64,
  conjunct_size: usize,
}
impl QueryState {
  pub fn get_driving_term(&self) -> &str {
    &self.driving_term
  }

  /// Number of driving-term postings the server must return
  pub fn get_num_postings(&self) -> u64 {
    self.n
  }

  pub fn get_conjunct_size(&self) -> usize {
    self.conjunct_size
  }
}

/// A `SearchEntry` is the server's verdict on one driving-term posting:
/// its version `j`, the masked value, and how many conjuncts matched
/// (the driving term itself counts as one).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEntry {
  pub j: u64,
  pub val: Vec<u8>,
  pub cnt: usize,
}

/// The `Client` is the context object owning the key material, the
/// group and the per-keyword update counters.
#[derive(Debug)]
pub struct Client<G: Group> {
  keys: KeyMaterial,
  group: G,
  counter: UpdateCounter,
}
impl<G: Group> Client<G> {
  /// Fails if `keys` were generated for a different group
  pub fn new(keys: KeyMaterial, group: G) -> SseResult<Self> {
    if *keys.group_params() != group.params() {
      return Err(SseError::Key(
        "key material was generated for a different group".into(),
      ));
    }
    Ok(Self {
      keys,
      group,
      counter: UpdateCounter::new(),
    })
  }

  /// Resume from a previously persisted counter
  pub fn with_counter(mut self, counter: UpdateCounter) -> Self {
    self.counter = counter;
    self
  }

  pub fn get_counter(&self) -> &UpdateCounter {
    &self.counter
  }

  pub fn get_keys(&self) -> &KeyMaterial {
    &self.keys
  }

  pub fn get_group(&self) -> &G {
    &self.group
  }

  /// Encrypts a single (keyword, id, op) update
  pub fn update(
    &mut self,
    keyword: &str,
    id: &str,
    op: Operation,
  ) -> SseResult<UpdateBatch> {
    self.update_many(keyword, &[id.to_string()], op)
  }

  /// Encrypts one update per id for `keyword`, sharing the keyword-level
  /// derivations. All ids are checked before any counter is touched, so
  /// a rejected call leaves the client unchanged.
  pub fn update_many(
    &mut self,
    keyword: &str,
    ids: &[String],
    op: Operation,
  ) -> SseResult<UpdateBatch> {
    if let Some(id) = ids.iter().find(|id| id.len() > MAX_ID_LEN) {
      return Err(SseError::InvalidInput(format!(
        "document id {:?} exceeds {} bytes",
        id, MAX_ID_LEN
      )));
    }
    let c = prf_exponent(&self.group, self.keys.kx(), keyword.as_bytes())?;

    let mut batch = UpdateBatch {
      postings: Vec::with_capacity(ids.len()),
      xtags: Vec::with_capacity(ids.len()),
      revocations: Vec::with_capacity(ids.len()),
    };
    for id in ids {
      let version = self.counter.increment(keyword);
      let wwc = keyword_version(keyword, version);

      let address = prf_bytes(self.keys.kt(), &address_input(&wwc))?;
      let mask = prf_bytes(self.keys.kt(), &value_input(&wwc))?;
      let val = xor_mask_with_op(&mask, id.as_bytes(), op)?;

      // both sides are blinded so that the server can test whether the
      // id is currently deleted under a cross keyword
      let y_add = self.id_exponent(id, Operation::Add)?;
      let y_del = self.id_exponent(id, Operation::Delete)?;
      let z_inv = self
        .group
        .inverse(&prf_exponent(&self.group, self.keys.kz(), &wwc)?)?;
      let alpha = self.group.mul(&y_add, &z_inv);
      let alpha_del = self.group.mul(&y_del, &z_inv);

      batch.postings.push((
        address.to_vec(),
        Posting {
          val: val.to_vec(),
          alpha: self.group.scalar_to_bytes(&alpha),
          alpha_del: self.group.scalar_to_bytes(&alpha_del),
        },
      ));
      if op == Operation::Add {
        batch.xtags.push(self.cross_tag(&c, &y_add));
      }
      batch.revocations.push((self.cross_tag(&c, &y_del), op));
    }
    debug!(
      "encrypted {} {:?} updates, keyword now at version {}",
      ids.len(),
      op,
      self.counter.get(keyword)
    );
    Ok(batch)
  }

  fn id_exponent(&self, id: &str, op: Operation) -> SseResult<G::Scalar> {
    prf_exponent(&self.group, self.keys.ky(), &id_op_input(id.as_bytes(), op))
  }

  fn cross_tag(&self, c: &G::Scalar, y: &G::Scalar) -> Vec<u8> {
    let xtag = self.group.exp_generator(&self.group.mul(c, y));
    self.group.element_to_bytes(&xtag)
  }

  /// Builds the initial index from the bulk plaintext source. Ids are
  /// deduplicated per record and inserted as `Add` postings.
  pub fn setup<I>(&mut self, records: I) -> SseResult<UpdateBatch>
  where
    I: IntoIterator<Item = PlaintextRecord>,
  {
    let mut batch = UpdateBatch::default();
    let mut keywords = 0;
    for record in records {
      let mut seen = HashSet::new();
      let ids: Vec<String> = record
        .ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();
      if ids.len() != record.ids.len() {
        warn!(
          "dropped {} duplicate ids from a bulk record",
          record.ids.len() - ids.len()
        );
      }
      batch.extend(self.update_many(&record.keyword, &ids, Operation::Add)?);
      keywords += 1;
    }
    info!(
      "encrypted {} postings for {} keywords ({} bytes)",
      batch.len(),
      keywords,
      batch.payload_size()
    );
    Ok(batch)
  }

  /// Picks the keyword with the fewest updates. Ties go to the keyword
  /// listed first.
  pub fn select_driving_term<'a>(
    &self,
    query: &'a [String],
  ) -> SseResult<(&'a str, u64)> {
    validate_query(query)?;
    let mut best: Option<(&str, u64)> = None;
    for w in query {
      let n = self.counter.get(w);
      match best {
        Some((_, m)) if m <= n => {}
        _ => best = Some((w.as_str(), n)),
      }
    }
    best.ok_or_else(|| SseError::InvalidInput("empty query".into()))
  }

  /// Generates search and cross-tokens for a conjunctive query of one or
  /// more distinct keywords, together with the state needed to decrypt
  /// the server's answer
  pub fn prepare_search(
    &self,
    query: &[String],
  ) -> SseResult<(SearchMessage, QueryState)> {
    let (w1, n) = self.select_driving_term(query)?;
    debug!(
      "driving term selected with {} postings for a {}-keyword query",
      n,
      query.len()
    );

    // keyword-side exponents are shared by every version j
    let cross_exponents = query
      .iter()
      .filter(|w| w.as_str() != w1)
      .map(|w| prf_exponent(&self.group, self.keys.kx(), w.as_bytes()))
      .collect::<SseResult<Vec<G::Scalar>>>()?;

    let tokens = (1..=n)
      .into_par_iter()
      .map(|j| -> SseResult<(Vec<u8>, Vec<Vec<u8>>)> {
        let wwc = keyword_version(w1, j);
        let stoken = prf_bytes(self.keys.kt(), &address_input(&wwc))?;
        let z = prf_exponent(&self.group, self.keys.kz(), &wwc)?;
        let mut xtokens: Vec<Vec<u8>> = cross_exponents
          .iter()
          .map(|c| {
            let xtoken = self.group.exp_generator(&self.group.mul(c, &z));
            self.group.element_to_bytes(&xtoken)
          })
          .collect();
        xtokens.shuffle(&mut rand::thread_rng());
        Ok((stoken.to_vec(), xtokens))
      })
      .collect::<SseResult<Vec<_>>>()?;
    let (stokens, xtokens): (Vec<Vec<u8>>, Vec<Vec<Vec<u8>>>) =
      tokens.into_iter().unzip();

    Ok((
      SearchMessage {
        stokens,
        xtokens,
        conjunct_size: query.len(),
      },
      QueryState {
        driving_term: w1.to_string(),
        n,
        conjunct_size: query.len(),
      },
    ))
  }

  /// Decrypts the server's search entries and folds the add/delete
  /// history into the final id list.
  ///
  /// Entries must arrive with versions exactly `1..=n` in increasing
  /// order, anything else is rejected: folding out of order would let a
  /// delete run before the add it cancels.
  pub fn decrypt(
    &self,
    state: &QueryState,
    entries: &[SearchEntry],
  ) -> SseResult<Vec<String>> {
    if entries.len() as u64 != state.n {
      return Err(SseError::InvalidInput(format!(
        "expected {} search entries, got {}",
        state.n,
        entries.len()
      )));
    }
    for (expected, e) in (1u64..).zip(entries.iter()) {
      if e.j != expected {
        return Err(SseError::OutOfOrder {
          expected,
          found: e.j,
        });
      }
    }

    // unmasking is independent per entry, the fold below is not
    let unmasked = entries
      .par_iter()
      .map(|e| -> SseResult<(Vec<u8>, Operation, usize)> {
        let wwc = keyword_version(&state.driving_term, e.j);
        let mask = prf_bytes(self.keys.kt(), &value_input(&wwc))?;
        let (id, op) = unmask_with_op(&mask, &e.val)?;
        Ok((id, op, e.cnt))
      })
      .collect::<SseResult<Vec<_>>>()?;

    let mut result: Vec<String> = Vec::new();
    for (id, op, cnt) in unmasked {
      let id = str::from_utf8(&id)
        .map_err(|e| SseError::Encoding(format!("id is not utf-8: {}", e)))?;
      match op {
        Operation::Add if cnt == state.conjunct_size => {
          if !result.iter().any(|r| r == id) {
            result.push(id.to_string());
          }
        }
        // a delete only needs the driving term to match
        Operation::Delete if cnt > 0 => result.retain(|r| r != id),
        _ => {}
      }
    }
    Ok(result)
  }
}

/// Search tuning for the server. `threads` sizes the matcher's worker
/// pool, `max_concurrency` caps how many driving-term postings are
/// scheduled onto it at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
  pub threads: usize,
  pub max_concurrency: usize,
}
impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      threads: rayon::current_num_threads(),
      max_concurrency: DEFAULT_MAX_CONCURRENCY,
    }
  }
}

/// The `Server` holds the encrypted index and answers searches with a
/// bounded worker pool.
pub struct Server<G: Group, S: EdbStore> {
  group: G,
  store: S,
  pool: rayon::ThreadPool,
  window: usize,
}
impl<G: Group, S: EdbStore> Server<G, S> {
  pub fn new(group: G, store: S, config: SearchConfig) -> SseResult<Self> {
    if config.threads == 0 || config.max_concurrency == 0 {
      return Err(SseError::InvalidInput(format!(
        "threads and max_concurrency must be positive, got {} and {}",
        config.threads, config.max_concurrency
      )));
    }
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(config.threads)
      .build()
      .map_err(|e| SseError::Store(format!("cannot start worker pool: {}", e)))?;
    Ok(Self {
      group,
      store,
      pool,
      window: config.max_concurrency,
    })
  }

  pub fn get_store(&self) -> &S {
    &self.store
  }

  pub fn into_store(self) -> S {
    self.store
  }

  /// Applies an update batch, returning the number of postings written.
  /// Revocations are applied in batch order.
  pub fn update(&mut self, batch: UpdateBatch) -> SseResult<usize> {
    batch.check_shape()?;
    let n = batch.len();
    for (address, posting) in batch.postings {
      self.store.put(address, posting)?;
    }
    for xtag in &batch.xtags {
      self.store.xset_insert(xtag)?;
    }
    for (tag, op) in &batch.revocations {
      match op {
        Operation::Delete => self.store.revoke(tag)?,
        Operation::Add => self.store.restore(tag)?,
      }
    }
    debug!("applied update batch of {} postings", n);
    Ok(n)
  }

  /// Looks up every driving-term posting and counts the cross keywords
  /// that hold the posting's id: its add-side cross-tag is in the XSet
  /// and its delete-side cross-tag is not revoked. Postings are matched
  /// in windows of `max_concurrency`. The output keeps the order of the
  /// search tokens.
  pub fn search(&self, msg: &SearchMessage) -> SseResult<Vec<SearchEntry>> {
    if msg.conjunct_size == 0 {
      return Err(SseError::InvalidInput("empty conjunction".into()));
    }
    if msg.stokens.len() != msg.xtokens.len() {
      return Err(SseError::InvalidInput(format!(
        "{} search tokens but {} cross-token lists",
        msg.stokens.len(),
        msg.xtokens.len()
      )));
    }
    if let Some(xs) = msg
      .xtokens
      .iter()
      .find(|xs| xs.len() != msg.conjunct_size - 1)
    {
      return Err(SseError::InvalidInput(format!(
        "expected {} cross-tokens per version, got {}",
        msg.conjunct_size - 1,
        xs.len()
      )));
    }

    let mut entries: Vec<SearchEntry> = Vec::with_capacity(msg.stokens.len());
    let windows = msg
      .stokens
      .chunks(self.window)
      .zip(msg.xtokens.chunks(self.window));
    for (stokens, xtokens) in windows {
      let offset = entries.len();
      let matched = self.pool.install(|| {
        stokens
          .par_iter()
          .zip(xtokens.par_iter())
          .enumerate()
          .map(|(idx, (stoken, xs))| self.match_posting(offset + idx, stoken, xs))
          .collect::<SseResult<Vec<SearchEntry>>>()
      })?;
      entries.extend(matched);
    }
    debug!(
      "matched {} postings, {} with every conjunct",
      entries.len(),
      entries
        .iter()
        .filter(|e| e.cnt == msg.conjunct_size)
        .count()
    );
    Ok(entries)
  }

  fn match_posting(
    &self,
    idx: usize,
    stoken: &[u8],
    xtokens: &[Vec<u8>],
  ) -> SseResult<SearchEntry> {
    let j = idx as u64 + 1;
    let posting = self
      .store
      .get(stoken)?
      .ok_or(SseError::LookupMiss { version: j })?;
    let alpha = self.group.scalar_from_bytes(&posting.alpha)?;
    let alpha_del = self.group.scalar_from_bytes(&posting.alpha_del)?;
    let matched = xtokens
      .iter()
      .map(|x| -> SseResult<bool> {
        let xtoken = self.group.element_from_bytes(x)?;
        if !self.store.xset_contains(&self.blind(&xtoken, &alpha))? {
          return Ok(false);
        }
        Ok(!self.store.is_revoked(&self.blind(&xtoken, &alpha_del))?)
      })
      .collect::<SseResult<Vec<bool>>>()?;
    Ok(SearchEntry {
      j,
      val: posting.val,
      cnt: 1 + matched.into_iter().filter(|m| *m).count(),
    })
  }

  fn blind(&self, xtoken: &G::Element, alpha: &G::Scalar) -> Vec<u8> {
    self.group.element_to_bytes(&self.group.exp(xtoken, alpha))
  }
}

fn validate_query(query: &[String]) -> SseResult<()> {
  if query.is_empty() {
    return Err(SseError::InvalidInput(
      "query needs at least one keyword".into(),
    ));
  }
  let mut seen = HashSet::new();
  if let Some(dup) = query.iter().find(|w| !seen.insert(w.as_str())) {
    return Err(SseError::InvalidInput(format!(
      "keyword {:?} repeated in query",
      dup
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::XSet;

  fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
  }

  fn new_pair<G: Group>(
    group: G,
    xset: XSetConfig,
  ) -> (Client<G>, Server<G, MemoryEdb>) {
    let keys = KeyMaterial::generate(group.params());
    let client = Client::new(keys, group.clone()).unwrap();
    let server = Server::new(
      group,
      MemoryEdb::new(xset).unwrap(),
      SearchConfig {
        threads: 2,
        max_concurrency: 4,
      },
    )
    .unwrap();
    (client, server)
  }

  fn search<G: Group>(
    client: &Client<G>,
    server: &Server<G, MemoryEdb>,
    q: &[&str],
  ) -> Vec<String> {
    let (msg, state) = client.prepare_search(&ids(q)).unwrap();
    let entries = server.search(&msg).unwrap();
    client.decrypt(&state, &entries).unwrap()
  }

  fn apply<G: Group>(
    client: &mut Client<G>,
    server: &mut Server<G, MemoryEdb>,
    w: &str,
    id: &str,
    op: Operation,
  ) {
    let batch = client.update(w, id, op).unwrap();
    server.update(batch).unwrap();
  }

  fn concrete_scenario<G: Group>(group: G) {
    let (mut client, mut server) = new_pair(group, XSetConfig::Exact);
    apply(&mut client, &mut server, "alice", "doc1", Operation::Add);
    apply(&mut client, &mut server, "bob", "doc1", Operation::Add);
    apply(&mut client, &mut server, "alice", "doc2", Operation::Add);

    assert_eq!(search(&client, &server, &["alice", "bob"]), ids(&["doc1"]));
    assert_eq!(
      sorted(search(&client, &server, &["alice"])),
      ids(&["doc1", "doc2"])
    );

    apply(&mut client, &mut server, "alice", "doc1", Operation::Delete);
    assert!(search(&client, &server, &["alice", "bob"]).is_empty());
    assert_eq!(search(&client, &server, &["alice"]), ids(&["doc2"]));
  }

  #[test]
  fn concrete_scenario_modp() {
    concrete_scenario(ModpGroup::oakley_768());
  }

  #[test]
  fn concrete_scenario_ristretto() {
    concrete_scenario(RistrettoGroup);
  }

  #[test]
  fn single_keyword_round_trip() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    apply(&mut client, &mut server, "w", "id-42", Operation::Add);
    assert_eq!(search(&client, &server, &["w"]), ids(&["id-42"]));
  }

  #[test]
  fn add_then_delete_cancels() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    apply(&mut client, &mut server, "w", "id", Operation::Add);
    apply(&mut client, &mut server, "w", "other", Operation::Add);
    apply(&mut client, &mut server, "w", "id", Operation::Delete);
    assert_eq!(search(&client, &server, &["w"]), ids(&["other"]));
  }

  #[test]
  fn conjunction_is_the_intersection() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    let w1: Vec<String> = (0..20).map(|i| format!("doc{}", i)).collect();
    let w2: Vec<String> = (10..40).map(|i| format!("doc{}", i)).collect();
    let w3: Vec<String> = (15..60).map(|i| format!("doc{}", i)).collect();
    for (w, list) in [("w1", &w1), ("w2", &w2), ("w3", &w3)] {
      let batch = client.update_many(w, list, Operation::Add).unwrap();
      server.update(batch).unwrap();
    }
    let expected: Vec<String> = (10..20).map(|i| format!("doc{}", i)).collect();
    assert_eq!(sorted(search(&client, &server, &["w2", "w1"])), sorted(expected));

    let expected3: Vec<String> = (15..20).map(|i| format!("doc{}", i)).collect();
    assert_eq!(
      sorted(search(&client, &server, &["w3", "w2", "w1"])),
      sorted(expected3)
    );

    // deleting from a non-driving keyword removes the id from the result
    let batch = client
      .update_many("w2", &ids(&["doc11"]), Operation::Delete)
      .unwrap();
    server.update(batch).unwrap();
    let result = sorted(search(&client, &server, &["w1", "w2"]));
    assert!(!result.contains(&"doc11".to_string()));
    assert_eq!(result.len(), 9);
  }

  #[test]
  fn setup_from_records_deduplicates_ids() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    let records = vec![
      PlaintextRecord {
        keyword: "red".into(),
        ids: ids(&["a", "b", "a", "c"]),
      },
      PlaintextRecord {
        keyword: "car".into(),
        ids: ids(&["b", "c", "d"]),
      },
    ];
    let batch = client.setup(records).unwrap();
    assert_eq!(batch.len(), 6);
    assert_eq!(batch.xtags.len(), 6);
    assert_eq!(batch.revocations.len(), 6);
    assert!(batch.payload_size() > 0);
    assert_eq!(client.get_counter().get("red"), 3);
    server.update(batch).unwrap();
    assert_eq!(
      sorted(search(&client, &server, &["red", "car"])),
      ids(&["b", "c"])
    );
  }

  #[test]
  fn driving_term_is_least_frequent() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    let rare = ids(&["x1", "x2", "x3"]);
    let common: Vec<String> = (0..500).map(|i| format!("c{}", i)).collect();
    server
      .update(client.update_many("rare", &rare, Operation::Add).unwrap())
      .unwrap();
    server
      .update(client.update_many("common", &common, Operation::Add).unwrap())
      .unwrap();

    let q = ids(&["common", "rare"]);
    let (msg, state) = client.prepare_search(&q).unwrap();
    assert_eq!(state.get_driving_term(), "rare");
    assert_eq!(msg.stokens.len(), 3);
    assert!(msg.xtokens.iter().all(|x| x.len() == 1));
    assert!(server.search(&msg).unwrap().len() == 3);
  }

  #[test]
  fn reconciler_requires_increasing_versions() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    apply(&mut client, &mut server, "w", "id", Operation::Add);
    apply(&mut client, &mut server, "w", "id", Operation::Delete);

    let (msg, state) = client.prepare_search(&ids(&["w"])).unwrap();
    let entries = server.search(&msg).unwrap();
    assert!(client.decrypt(&state, &entries).unwrap().is_empty());

    // delete before add would leave the id in place, so it is refused
    let mut permuted = entries.clone();
    permuted.swap(0, 1);
    match client.decrypt(&state, &permuted) {
      Err(SseError::OutOfOrder { expected, found }) => {
        assert_eq!((expected, found), (1, 2));
      }
      other => panic!("expected OutOfOrder, got {:?}", other),
    }
  }

  // Add needs every conjunct, Delete needs only the driving term
  #[test]
  fn delete_and_add_thresholds_differ() {
    let (client, _server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    let state = QueryState {
      driving_term: "w".into(),
      n: 3,
      conjunct_size: 3,
    };
    let entry = |j: u64, id: &str, op: Operation, cnt: usize| {
      let wwc = keyword_version("w", j);
      let mask = prf_bytes(client.get_keys().kt(), &value_input(&wwc)).unwrap();
      SearchEntry {
        j,
        val: xor_mask_with_op(&mask, id.as_bytes(), op).unwrap().to_vec(),
        cnt,
      }
    };
    // "b" matched only 2 of 3 conjuncts: not added
    let entries = vec![
      entry(1, "a", Operation::Add, 3),
      entry(2, "a", Operation::Delete, 1),
      entry(3, "b", Operation::Add, 2),
    ];
    assert!(client.decrypt(&state, &entries).unwrap().is_empty());

    let entries = vec![
      entry(1, "a", Operation::Add, 3),
      entry(2, "a", Operation::Delete, 0),
      entry(3, "b", Operation::Add, 3),
    ];
    assert_eq!(client.decrypt(&state, &entries).unwrap(), ids(&["a", "b"]));
  }

  #[test]
  fn missing_posting_is_a_lookup_miss() {
    let (mut client, server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    // counter advances but the batch never reaches the server
    client.update("w", "id", Operation::Add).unwrap();
    let (msg, _) = client.prepare_search(&ids(&["w"])).unwrap();
    assert!(matches!(
      server.search(&msg),
      Err(SseError::LookupMiss { version: 1 })
    ));
  }

  #[test]
  fn unknown_keyword_yields_empty_result() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    apply(&mut client, &mut server, "w", "id", Operation::Add);
    assert!(search(&client, &server, &["w", "nope"]).is_empty());
  }

  #[test]
  fn readding_on_a_cross_keyword_restores_the_match() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    apply(&mut client, &mut server, "w1", "doc1", Operation::Add);
    apply(&mut client, &mut server, "w2", "doc1", Operation::Add);
    apply(&mut client, &mut server, "w2", "doc1", Operation::Delete);
    assert!(search(&client, &server, &["w1", "w2"]).is_empty());

    apply(&mut client, &mut server, "w2", "doc1", Operation::Add);
    assert_eq!(search(&client, &server, &["w1", "w2"]), ids(&["doc1"]));
    assert_eq!(search(&client, &server, &["w2", "w1"]), ids(&["doc1"]));
    assert_eq!(server.get_store().get_revoked_len(), 0);

    // delete and re-add inside a single batch
    let mut batch = client.update("w1", "doc1", Operation::Delete).unwrap();
    batch.extend(client.update("w1", "doc1", Operation::Add).unwrap());
    server.update(batch).unwrap();
    assert_eq!(search(&client, &server, &["w2", "w1"]), ids(&["doc1"]));
  }

  #[test]
  fn batches_with_missing_revocations_are_rejected() {
    let (mut client, mut server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    let mut batch = client.update("w", "id", Operation::Add).unwrap();
    batch.revocations.clear();
    assert!(matches!(
      server.update(batch),
      Err(SseError::InvalidInput(_))
    ));
    assert_eq!(server.get_store().get_tset_len(), 0);
  }

  #[test]
  fn windows_keep_token_order() {
    let keys = KeyMaterial::generate(GroupParams::Ristretto);
    let mut client = Client::new(keys, RistrettoGroup).unwrap();
    let mut server = Server::new(
      RistrettoGroup,
      MemoryEdb::new(XSetConfig::Exact).unwrap(),
      SearchConfig {
        threads: 2,
        max_concurrency: 3,
      },
    )
    .unwrap();
    let docs: Vec<String> = (0..10).map(|i| format!("doc{}", i)).collect();
    server
      .update(client.update_many("w", &docs, Operation::Add).unwrap())
      .unwrap();
    let (msg, state) = client.prepare_search(&ids(&["w"])).unwrap();
    let entries = server.search(&msg).unwrap();
    assert_eq!(
      entries.iter().map(|e| e.j).collect::<Vec<u64>>(),
      (1..=10).collect::<Vec<u64>>()
    );
    assert_eq!(client.decrypt(&state, &entries).unwrap(), docs);

    let zero = SearchConfig {
      threads: 2,
      max_concurrency: 0,
    };
    let edb = MemoryEdb::new(XSetConfig::Exact).unwrap();
    assert!(Server::new(RistrettoGroup, edb, zero).is_err());
  }

  #[test]
  fn invalid_inputs_are_rejected() {
    let (mut client, server) = new_pair(RistrettoGroup, XSetConfig::Exact);
    assert!(client.prepare_search(&[]).is_err());
    assert!(client.prepare_search(&ids(&["a", "a"])).is_err());
    assert!(matches!(
      client.select_driving_term(&[]),
      Err(SseError::InvalidInput(_))
    ));

    let long_id = "x".repeat(MAX_ID_LEN + 1);
    assert!(client.update("w", &long_id, Operation::Add).is_err());
    assert_eq!(client.get_counter().get("w"), 0);

    let bad = SearchMessage {
      stokens: vec![vec![0; 32]],
      xtokens: vec![vec![]],
      conjunct_size: 2,
    };
    assert!(matches!(server.search(&bad), Err(SseError::InvalidInput(_))));
  }

  #[test]
  fn keys_for_another_group_are_rejected() {
    let keys = KeyMaterial::generate(GroupParams::Ristretto);
    assert!(Client::new(keys, ModpGroup::oakley_768()).is_err());
  }

  // Bloom false positives may only add matches, never drop one
  #[test]
  fn bloom_at_capacity_returns_every_true_match() {
    let (mut client, mut server) = new_pair(
      RistrettoGroup,
      XSetConfig::Bloom {
        capacity: 4000,
        fp_rate: 0.01,
      },
    );
    let docs: Vec<String> = (0..2000).map(|i| format!("d{}", i)).collect();
    let records = ["a", "b"].iter().map(|w| PlaintextRecord {
      keyword: w.to_string(),
      ids: docs.clone(),
    });
    server.update(client.setup(records).unwrap()).unwrap();
    assert_eq!(server.get_store().get_xset().len(), 4000);

    let result = sorted(search(&client, &server, &["a", "b"]));
    assert_eq!(result, sorted(docs.clone()));

    let small: Vec<String> = (0..50).map(|i| format!("d{}", i)).collect();
    server
      .update(client.update_many("c", &small, Operation::Add).unwrap())
      .unwrap();
    assert_eq!(sorted(search(&client, &server, &["a", "b", "c"])), sorted(small));
  }
}
