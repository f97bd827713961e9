use std::env;

const DEFAULT_NUM_KEYWORDS_EXP: &str = "6";
const DEFAULT_IDS_PER_KEYWORD: &str = "64";
const DEFAULT_CONJUNCT_SIZE: &str = "2";

/// Workload shape for benchmarks: `num_keywords` keywords, each with
/// `ids_per_keyword` documents, queried in conjunctions of
/// `conjunct_size` keywords
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CLIFlags {
  pub num_keywords: usize,
  pub ids_per_keyword: usize,
  pub conjunct_size: usize,
}

/// Reads `SSE_NUM_KEYWORDS_EXP`, `SSE_IDS_PER_KEYWORD` and
/// `SSE_CONJUNCT_SIZE`, falling back to defaults when unset
pub fn parse_from_env() -> Result<CLIFlags, String> {
  build_flags(
    &env_or("SSE_NUM_KEYWORDS_EXP", DEFAULT_NUM_KEYWORDS_EXP),
    &env_or("SSE_IDS_PER_KEYWORD", DEFAULT_IDS_PER_KEYWORD),
    &env_or("SSE_CONJUNCT_SIZE", DEFAULT_CONJUNCT_SIZE),
  )
}

pub fn parse_exp_to_usize(v: &str) -> Result<usize, String> {
  let exp: u32 = parse_usize(v)? as u32;
  2_usize
    .checked_pow(exp)
    .ok_or_else(|| format!("2^{} does not fit in usize", exp))
}

fn build_flags(
  num_keywords_exp: &str,
  ids_per_keyword: &str,
  conjunct_size: &str,
) -> Result<CLIFlags, String> {
  let flags = CLIFlags {
    num_keywords: parse_exp_to_usize(num_keywords_exp)?,
    ids_per_keyword: parse_usize(ids_per_keyword)?,
    conjunct_size: parse_usize(conjunct_size)?,
  };
  if flags.conjunct_size == 0 || flags.conjunct_size > flags.num_keywords {
    return Err(format!(
      "conjunct size must be in [1, {}], got {}",
      flags.num_keywords, flags.conjunct_size
    ));
  }
  Ok(flags)
}

fn env_or(key: &str, default: &str) -> String {
  env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_usize(v: &str) -> Result<usize, String> {
  v.trim()
    .parse()
    .map_err(|e| format!("cannot parse {:?} as an integer: {}", v, e))
}
