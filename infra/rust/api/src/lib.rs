//! The oxt-service-api crate builds the message layer for running the
//! OXT encrypted index as a client/server service. The underlying
//! cryptographic mechanism lives in the `oxt-sse` crate; this crate
//! only moves its outputs across the wire.
//!
//! # Example usage
//!
//! ## Index setup
//!
//! The client reads the plaintext dataset, encrypts it into a single
//! update message and sends it to the server, which applies it to its
//! encrypted index.
//!
//! ```
//! # use oxt_service_api::api::*;
//! # use oxt_service_api::dataset::parse_text_records;
//! let group = RistrettoGroup;
//! let keys = KeyMaterial::generate(group.params());
//! let mut client = Client::new(keys, group).unwrap();
//! let mut server = Server::new(
//!   group,
//!   MemoryEdb::new(XSetConfig::default()).unwrap(),
//!   SearchConfig::default(),
//! )
//! .unwrap();
//!
//! let records = parse_text_records("2\nred\n2\ncar1\ncar2\nfast\n1\ncar2\n").unwrap();
//! let (um, _payload_size) = client_prepare_setup(&mut client, records).unwrap();
//!
//! // send um to server...
//!
//! assert_eq!(server_apply_update(&mut server, um).unwrap(), 3);
//!
//! // the client keeps its counter for later searches
//! assert_eq!(client.get_counter().get("red"), 2);
//! ```
//!
//! ## Conjunctive search
//!
//! ```
//! # use oxt_service_api::api::*;
//! # use oxt_service_api::dataset::parse_queries;
//! # let group = RistrettoGroup;
//! # let keys = KeyMaterial::generate(group.params());
//! # let mut client = Client::new(keys, group).unwrap();
//! # let mut server = Server::new(
//! #   group,
//! #   MemoryEdb::new(XSetConfig::Exact).unwrap(),
//! #   SearchConfig::default(),
//! # )
//! # .unwrap();
//! # let ids = vec!["car2".to_string()];
//! # let um = client_prepare_update(&mut client, "red", &ids, Operation::Add).unwrap();
//! # server_apply_update(&mut server, um).unwrap();
//! # let um = client_prepare_update(&mut client, "fast", &ids, Operation::Add).unwrap();
//! # server_apply_update(&mut server, um).unwrap();
//! let queries = parse_queries("red#fast\n");
//! let (sm, state) = client_prepare_search(&client, &queries[0]).unwrap();
//!
//! // send sm to server...
//!
//! let resp = server_calculate_response(&server, sm).unwrap();
//!
//! // return resp to client...
//!
//! let ids = client_process_output(&client, &state, resp).unwrap();
//! assert_eq!(ids, vec!["car2"]);
//! ```

pub mod api;
pub mod dataset;
pub mod errors;
pub mod rpc;
