use oxt_service_api::api::{GroupParams, SearchConfig, XSetConfig};
use oxt_sse::db::{DEFAULT_XSET_CAPACITY, DEFAULT_XSET_FP_RATE};
use std::{env, fmt};

pub const DEFAULT_DATA_DIR: &str = "edb_data";

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub port: String,
  pub data_dir: String,
  pub xset: XSetConfig,
  pub group: GroupParams,
  pub search: SearchConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfigErr {
  reason: String,
}

impl fmt::Display for ServerConfigErr {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "Server configs error: {}", self.reason)
  }
}

impl ServerConfigErr {
  fn throw(reason: &str) -> Self {
    Self {
      reason: reason.to_string(),
    }
  }
}

pub fn get_env_configs() -> Result<ServerConfig, ServerConfigErr> {
  configs_from(|key| env::var(key).ok())
}

fn configs_from<F>(lookup: F) -> Result<ServerConfig, ServerConfigErr>
where
  F: Fn(&str) -> Option<String>,
{
  let port = match lookup("PORT") {
    Some(v) => v,
    None => return Err(ServerConfigErr::throw("PORT should be provided")),
  };

  let data_dir =
    lookup("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

  let xset = match lookup("XSET").as_deref() {
    Some("exact") => XSetConfig::Exact,
    Some("bloom") | None => XSetConfig::Bloom {
      capacity: parse_or(&lookup, "XSET_CAPACITY", DEFAULT_XSET_CAPACITY)?,
      fp_rate: parse_or(&lookup, "XSET_FP_RATE", DEFAULT_XSET_FP_RATE)?,
    },
    Some(other) => {
      return Err(ServerConfigErr::throw(&format!(
        "XSET should be `exact` or `bloom`, got `{}`",
        other
      )))
    }
  };

  let group = match lookup("GROUP").as_deref() {
    Some("modp") | None => GroupParams::rfc3526_2048(),
    Some("ristretto") => GroupParams::Ristretto,
    Some(other) => {
      return Err(ServerConfigErr::throw(&format!(
        "GROUP should be `modp` or `ristretto`, got `{}`",
        other
      )))
    }
  };

  let defaults = SearchConfig::default();
  let search = SearchConfig {
    threads: parse_or(&lookup, "SEARCH_THREADS", defaults.threads)?,
    max_concurrency: parse_or(
      &lookup,
      "MAX_CONCURRENCY",
      defaults.max_concurrency,
    )?,
  };

  Ok(ServerConfig {
    port,
    data_dir,
    xset,
    group,
    search,
  })
}

fn parse_or<F, T>(
  lookup: &F,
  key: &str,
  default: T,
) -> Result<T, ServerConfigErr>
where
  F: Fn(&str) -> Option<String>,
  T: std::str::FromStr,
  T::Err: fmt::Display,
{
  match lookup(key) {
    Some(v) => v.trim().parse().map_err(|e| {
      ServerConfigErr::throw(&format!("Invalid {} ({}): {}", key, v, e))
    }),
    None => Ok(default),
  }
}
