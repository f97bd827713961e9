use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufReader, BufWriter};

use log::info;
use serde::{Deserialize, Serialize};

use crate::errors::{SseError, SseResult};

/// A TSet entry: the masked (id, op) value and two blinded exponents
/// the server uses to recompute cross-tags. `alpha` maps a cross-token
/// onto the id's add-side tag, which lives in the XSet. `alpha_del`
/// maps it onto the delete-side tag, which is looked up in the exact
/// revocation set. Postings are written once and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
  pub val: Vec<u8>,
  pub alpha: Vec<u8>,
  pub alpha_del: Vec<u8>,
}

/// The `XSet` trait is the membership structure for cross-tags.
/// Implementations may be probabilistic: `contains` can return false
/// positives but never false negatives.
pub trait XSet: Send + Sync {
  fn insert(&mut self, tag: &[u8]);
  fn contains(&self, tag: &[u8]) -> bool;
  /// Number of insertions performed
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Exact membership, zero false positives, memory grows with the index
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExactXSet {
  tags: HashSet<Vec<u8>>,
}

impl XSet for ExactXSet {
  fn insert(&mut self, tag: &[u8]) {
    self.tags.insert(tag.to_vec());
  }

  fn contains(&self, tag: &[u8]) -> bool {
    self.tags.contains(tag)
  }

  fn len(&self) -> usize {
    self.tags.len()
  }
}

// Seeds for the second hash used in double hashing
const BLOOM_SEEDS: (u64, u64, u64, u64) = (
  0x243f_6a88_85a3_08d3,
  0x1319_8a2e_0370_7344,
  0xa409_3822_299f_31d0,
  0x082e_fa98_ec4e_6c89,
);

/// Bloom filter with bounded memory. Sized from an expected capacity
/// and target false-positive rate; inserting more than `capacity` tags
/// raises the observed rate above the target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BloomXSet {
  bits: Vec<u64>,
  num_bits: u64,
  num_hashes: u32,
  inserted: usize,
}

impl BloomXSet {
  /// Sizes the filter with `m = -n ln(r) / ln(2)^2` bits and
  /// `k = ln(2) m / n` hash functions
  pub fn with_estimates(capacity: usize, fp_rate: f64) -> SseResult<Self> {
    if capacity == 0 || !(fp_rate > 0.0 && fp_rate < 1.0) {
      return Err(SseError::InvalidInput(format!(
        "bloom filter needs capacity > 0 and 0 < rate < 1, got {} and {}",
        capacity, fp_rate
      )));
    }
    let n = capacity as f64;
    let ln2 = std::f64::consts::LN_2;
    let num_bits = (-n * fp_rate.ln() / (ln2 * ln2)).ceil().max(64.0) as u64;
    let num_hashes = (ln2 * num_bits as f64 / n).ceil().max(1.0) as u32;
    let words = ((num_bits + 63) / 64) as usize;
    Ok(Self {
      bits: vec![0u64; words],
      num_bits,
      num_hashes,
      inserted: 0,
    })
  }

  pub fn get_num_bits(&self) -> u64 {
    self.num_bits
  }

  pub fn get_num_hashes(&self) -> u32 {
    self.num_hashes
  }

  /// Expected false-positive rate given the insertions made so far
  pub fn estimated_fp_rate(&self) -> f64 {
    let k = self.num_hashes as f64;
    let exponent = -k * self.inserted as f64 / self.num_bits as f64;
    (1.0 - exponent.exp()).powf(k)
  }

  fn bit_indices(&self, tag: &[u8]) -> impl Iterator<Item = u64> {
    let h1 = seahash::hash(tag);
    let (a, b, c, d) = BLOOM_SEEDS;
    // odd step so that successive probes do not collapse
    let h2 = seahash::hash_seeded(tag, a, b, c, d) | 1;
    let m = self.num_bits;
    (0..self.num_hashes as u64)
      .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
  }
}

impl XSet for BloomXSet {
  fn insert(&mut self, tag: &[u8]) {
    let indices: Vec<u64> = self.bit_indices(tag).collect();
    for idx in indices {
      self.bits[(idx / 64) as usize] |= 1u64 << (idx % 64);
    }
    self.inserted += 1;
  }

  fn contains(&self, tag: &[u8]) -> bool {
    self
      .bit_indices(tag)
      .all(|idx| self.bits[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0)
  }

  fn len(&self) -> usize {
    self.inserted
  }
}

/// Selects the XSet backend at configuration time
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum XSetConfig {
  Exact,
  Bloom { capacity: usize, fp_rate: f64 },
}

pub const DEFAULT_XSET_CAPACITY: usize = 1_000_000;
pub const DEFAULT_XSET_FP_RATE: f64 = 0.01;

impl Default for XSetConfig {
  fn default() -> Self {
    XSetConfig::Bloom {
      capacity: DEFAULT_XSET_CAPACITY,
      fp_rate: DEFAULT_XSET_FP_RATE,
    }
  }
}

/// Runtime-selected XSet, so that stores and snapshots do not need to
/// be generic over the backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum XSetBackend {
  Exact(ExactXSet),
  Bloom(BloomXSet),
}

impl XSetBackend {
  pub fn new(config: XSetConfig) -> SseResult<Self> {
    Ok(match config {
      XSetConfig::Exact => XSetBackend::Exact(ExactXSet::default()),
      XSetConfig::Bloom { capacity, fp_rate } => {
        XSetBackend::Bloom(BloomXSet::with_estimates(capacity, fp_rate)?)
      }
    })
  }
}

impl XSet for XSetBackend {
  fn insert(&mut self, tag: &[u8]) {
    match self {
      XSetBackend::Exact(x) => x.insert(tag),
      XSetBackend::Bloom(x) => x.insert(tag),
    }
  }

  fn contains(&self, tag: &[u8]) -> bool {
    match self {
      XSetBackend::Exact(x) => x.contains(tag),
      XSetBackend::Bloom(x) => x.contains(tag),
    }
  }

  fn len(&self) -> usize {
    match self {
      XSetBackend::Exact(x) => x.len(),
      XSetBackend::Bloom(x) => x.len(),
    }
  }
}

/// The `EdbStore` trait is the key-value boundary behind which the
/// encrypted index is persisted. Backends report their own failures as
/// `SseError::Store`, the core propagates them unchanged.
pub trait EdbStore: Send + Sync {
  /// Stores a posting; its fields become visible together
  fn put(&mut self, address: Vec<u8>, posting: Posting) -> SseResult<()>;
  fn get(&self, address: &[u8]) -> SseResult<Option<Posting>>;
  fn xset_insert(&mut self, tag: &[u8]) -> SseResult<()>;
  fn xset_contains(&self, tag: &[u8]) -> SseResult<bool>;

  /// Marks a delete-side cross-tag as revoked. The revocation set must
  /// be exact: a false positive here would hide a live id.
  fn revoke(&mut self, tag: &[u8]) -> SseResult<()>;
  /// Clears a revocation, a no-op when the tag was never revoked
  fn restore(&mut self, tag: &[u8]) -> SseResult<()>;
  fn is_revoked(&self, tag: &[u8]) -> SseResult<bool>;
}

/// In-memory encrypted index: the TSet as a hash map, the XSet as the
/// configured backend and the revocation set as a hash set
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEdb {
  tset: HashMap<Vec<u8>, Posting>,
  xset: XSetBackend,
  revoked: HashSet<Vec<u8>>,
}

impl MemoryEdb {
  pub fn new(config: XSetConfig) -> SseResult<Self> {
    Ok(Self {
      tset: HashMap::new(),
      xset: XSetBackend::new(config)?,
      revoked: HashSet::new(),
    })
  }

  /// Load a snapshot written by `write_to_file`
  pub fn from_file(path: &str) -> SseResult<Self> {
    let reader = BufReader::new(fs::File::open(path)?);
    let edb: Self = bincode::deserialize_from(reader)?;
    info!(
      "loaded index snapshot from {}: {} postings, {} cross-tags",
      path,
      edb.get_tset_len(),
      edb.xset.len()
    );
    Ok(edb)
  }

  /// Write the TSet and XSet (including Bloom filter bits and
  /// parameters) to file
  pub fn write_to_file(&self, path: &str) -> SseResult<()> {
    let writer = BufWriter::new(fs::File::create(path)?);
    bincode::serialize_into(writer, self)?;
    info!(
      "wrote index snapshot to {}: {} postings",
      path,
      self.get_tset_len()
    );
    Ok(())
  }

  pub fn get_tset_len(&self) -> usize {
    self.tset.len()
  }

  pub fn get_xset(&self) -> &XSetBackend {
    &self.xset
  }

  pub fn get_revoked_len(&self) -> usize {
    self.revoked.len()
  }
}

impl EdbStore for MemoryEdb {
  fn put(&mut self, address: Vec<u8>, posting: Posting) -> SseResult<()> {
    self.tset.insert(address, posting);
    Ok(())
  }

  fn get(&self, address: &[u8]) -> SseResult<Option<Posting>> {
    Ok(self.tset.get(address).cloned())
  }

  fn xset_insert(&mut self, tag: &[u8]) -> SseResult<()> {
    self.xset.insert(tag);
    Ok(())
  }

  fn xset_contains(&self, tag: &[u8]) -> SseResult<bool> {
    Ok(self.xset.contains(tag))
  }

  fn revoke(&mut self, tag: &[u8]) -> SseResult<()> {
    self.revoked.insert(tag.to_vec());
    Ok(())
  }

  fn restore(&mut self, tag: &[u8]) -> SseResult<()> {
    self.revoked.remove(tag);
    Ok(())
  }

  fn is_revoked(&self, tag: &[u8]) -> SseResult<bool> {
    Ok(self.revoked.contains(tag))
  }
}

/// `UpdateCounter` tracks, per keyword, how many updates have ever been
/// issued. Versions start at 1 and never decrease.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateCounter {
  counts: HashMap<String, u64>,
}

impl UpdateCounter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load the counter from a JSON map file
  pub fn load(path: &str) -> SseResult<Self> {
    let reader = BufReader::new(fs::File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
  }

  pub fn write_to_file(&self, path: &str) -> SseResult<()> {
    Ok(serde_json::to_writer_pretty(&fs::File::create(path)?, self)?)
  }

  /// Number of postings written for `keyword`, 0 if never updated
  pub fn get(&self, keyword: &str) -> u64 {
    self.counts.get(keyword).copied().unwrap_or(0)
  }

  /// Bumps the counter and returns the new version
  pub fn increment(&mut self, keyword: &str) -> u64 {
    let c = self.counts.entry(keyword.to_string()).or_insert(0);
    *c += 1;
    *c
  }

  pub fn len(&self) -> usize {
    self.counts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.counts.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand_core::{OsRng, RngCore};

  fn random_tag() -> Vec<u8> {
    let mut tag = vec![0u8; 32];
    OsRng.fill_bytes(&mut tag);
    tag
  }

  #[test]
  fn exact_xset_has_no_false_positives() {
    let mut xset = ExactXSet::default();
    let tags: Vec<Vec<u8>> = (0..1000).map(|_| random_tag()).collect();
    for t in &tags {
      xset.insert(t);
    }
    assert!(tags.iter().all(|t| xset.contains(t)));
    assert!((0..1000).all(|_| !xset.contains(&random_tag())));
  }

  #[test]
  fn bloom_xset_false_positive_rate_is_bounded() {
    let capacity = 10_000;
    let rate = 0.01;
    let mut bloom = BloomXSet::with_estimates(capacity, rate).unwrap();
    let members: Vec<Vec<u8>> = (0..capacity).map(|_| random_tag()).collect();
    for t in &members {
      bloom.insert(t);
    }
    // no false negatives
    assert!(members.iter().all(|t| bloom.contains(t)));

    let probes = 10 * capacity;
    let positives = (0..probes).filter(|_| bloom.contains(&random_tag())).count();
    let observed = positives as f64 / probes as f64;
    assert!(
      observed < rate * 2.0 && observed > rate / 4.0,
      "observed false-positive rate {} too far from {}",
      observed,
      rate
    );
    assert!((bloom.estimated_fp_rate() - rate).abs() < rate);
  }

  #[test]
  fn bloom_rejects_degenerate_parameters() {
    assert!(BloomXSet::with_estimates(0, 0.01).is_err());
    assert!(BloomXSet::with_estimates(100, 0.0).is_err());
    assert!(BloomXSet::with_estimates(100, 1.0).is_err());
  }

  #[test]
  fn memory_edb_snapshot_round_trip() {
    for config in [
      XSetConfig::Exact,
      XSetConfig::Bloom {
        capacity: 1000,
        fp_rate: 0.01,
      },
    ] {
      let mut edb = MemoryEdb::new(config).unwrap();
      let tag = random_tag();
      let posting = Posting {
        val: vec![1; 32],
        alpha: vec![2; 16],
        alpha_del: vec![3; 16],
      };
      edb.put(b"addr".to_vec(), posting.clone()).unwrap();
      edb.xset_insert(&tag).unwrap();
      edb.revoke(b"gone").unwrap();

      let path = std::env::temp_dir()
        .join(format!("oxt-edb-{}-{:?}", std::process::id(), config));
      edb.write_to_file(path.to_str().unwrap()).unwrap();
      let loaded = MemoryEdb::from_file(path.to_str().unwrap()).unwrap();
      std::fs::remove_file(&path).unwrap();

      assert_eq!(loaded.get(b"addr").unwrap(), Some(posting));
      assert_eq!(loaded.get(b"missing").unwrap(), None);
      assert!(loaded.xset_contains(&tag).unwrap());
      assert!(loaded.is_revoked(b"gone").unwrap());
      assert_eq!(loaded.get_tset_len(), 1);
    }
  }

  #[test]
  fn revocations_are_exact_and_reversible() {
    let mut edb = MemoryEdb::new(XSetConfig::default()).unwrap();
    let tags: Vec<Vec<u8>> = (0..1000).map(|_| random_tag()).collect();
    for t in &tags {
      edb.revoke(t).unwrap();
    }
    assert!((0..1000).all(|_| !edb.is_revoked(&random_tag()).unwrap()));

    edb.restore(&tags[0]).unwrap();
    edb.restore(b"never revoked").unwrap();
    assert!(!edb.is_revoked(&tags[0]).unwrap());
    assert!(edb.is_revoked(&tags[1]).unwrap());
    assert_eq!(edb.get_revoked_len(), 999);
  }

  #[test]
  fn counter_versions_start_at_one_and_persist() {
    let mut counter = UpdateCounter::new();
    assert_eq!(counter.get("alice"), 0);
    assert_eq!(counter.increment("alice"), 1);
    assert_eq!(counter.increment("alice"), 2);
    assert_eq!(counter.increment("bob"), 1);

    let path = std::env::temp_dir()
      .join(format!("oxt-counter-{}.json", std::process::id()));
    counter.write_to_file(path.to_str().unwrap()).unwrap();
    let loaded = UpdateCounter::load(path.to_str().unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, counter);
    assert_eq!(loaded.get("alice"), 2);
  }
}
