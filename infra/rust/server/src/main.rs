mod configs;
mod edb;

use crate::edb::EncryptedIndex;
use actix_cors::Cors;
use actix_web::{post, web, App, HttpServer};
use std::path::PathBuf;
use std::sync::RwLock;

// Setup uploads carry the whole encrypted dataset in one request
const PAYLOAD_LIMIT: usize = 268_435_456;

struct ServerState {
  index: RwLock<EncryptedIndex>,
  snapshot: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  env_logger::Builder::from_env(
    env_logger::Env::default().default_filter_or("info"),
  )
  .init();

  let confs = match configs::get_env_configs() {
    Ok(confs) => confs,
    Err(err) => panic!("{}", err),
  };

  println!("> Init instance with configs: {:?}", confs);

  let index = match EncryptedIndex::open(&confs) {
    Ok(index) => index,
    Err(err) => panic!("Failed to open encrypted index: {}", err),
  };
  let server_state = web::Data::new(ServerState {
    index: RwLock::new(index),
    snapshot: edb::snapshot_path(&confs),
  });

  HttpServer::new(move || {
    let cors = Cors::permissive();

    App::new()
      .app_data(server_state.clone())
      .app_data(web::PayloadConfig::new(PAYLOAD_LIMIT))
      .wrap(cors)
      .service(update)
      .service(search)
  })
  .bind("0.0.0.0:".to_string() + &confs.port)?
  .run()
  .await
}

#[post("/update")]
async fn update(body: String, data: web::Data<ServerState>) -> String {
  println!("> Update received");
  web::block(move || {
    edb::update_result_encoded(&body, &data.index, &data.snapshot)
  })
  .await
  .unwrap_or_else(|e| internal_error(&e.to_string()))
}

#[post("/search")]
async fn search(body: String, data: web::Data<ServerState>) -> String {
  println!("> Search received");
  web::block(move || edb::search_result_encoded(&body, &data.index))
    .await
    .unwrap_or_else(|e| internal_error(&e.to_string()))
}

fn internal_error(reason: &str) -> String {
  log::error!("request handler failed: {}", reason);
  serde_json::json!({
    "jsonrpc": "2.0",
    "result": null,
    "error": { "code": -32603, "message": "Internal error" },
    "id": 0,
  })
  .to_string()
}
