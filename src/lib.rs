//! An implementation of conjunctive dynamic searchable symmetric
//! encryption based on oblivious cross-tags (OXT).
//!
//! A client holding four PRF keys encrypts `(keyword, document id,
//! add/delete)` updates into a TSet of versioned postings and an XSet of
//! cross-tags. To search a conjunction of keywords, the client picks the
//! least-frequent keyword as the driving term and sends one search token
//! per driving-term posting plus cross-tokens for the other keywords.
//! The server counts, per posting, the keywords whose cross-tag it can
//! recompute, and the client folds the decrypted add/delete history into
//! the final set of document ids.
//!
//! ```
//! use oxt_sse::api::*;
//!
//! let group = RistrettoGroup;
//! let keys = KeyMaterial::generate(group.params());
//! let mut client = Client::new(keys, group).unwrap();
//! let mut server = Server::new(
//!   group,
//!   MemoryEdb::new(XSetConfig::Exact).unwrap(),
//!   SearchConfig::default(),
//! )
//! .unwrap();
//!
//! server.update(client.update("alice", "doc1", Operation::Add).unwrap()).unwrap();
//! server.update(client.update("bob", "doc1", Operation::Add).unwrap()).unwrap();
//!
//! let query = vec!["alice".to_string(), "bob".to_string()];
//! let (msg, state) = client.prepare_search(&query).unwrap();
//! let entries = server.search(&msg).unwrap();
//! assert_eq!(client.decrypt(&state, &entries).unwrap(), vec!["doc1"]);
//! ```
pub mod api;
pub mod db;
pub mod errors;
pub mod group;
pub mod keys;
pub mod utils;
