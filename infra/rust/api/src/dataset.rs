//! Readers for the bulk plaintext dataset and for query files.
//!
//! Datasets are either a JSON array of `{"keyword": .., "ids": [..]}`
//! records, or a line-oriented text file: the number of keywords, then
//! for each keyword its name, the number of ids and one id per line.
//!
//! Query files hold one conjunctive query per line, keywords separated
//! by `#`.

use log::info;
use std::fs;
use std::path::Path;

use crate::api::PlaintextRecord;
use crate::errors::ServiceError;

const QUERY_SEPARATOR: char = '#';

/// Loads a dataset, choosing the format from the file extension
/// (`.json` for JSON, anything else for the text format)
pub fn load_records(path: &str) -> Result<Vec<PlaintextRecord>, ServiceError> {
  let content = fs::read_to_string(path)?;
  let is_json = Path::new(path)
    .extension()
    .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
  let records = if is_json {
    serde_json::from_str(&content)
      .map_err(|e| ServiceError::DatasetError(path.into(), e.to_string()))?
  } else {
    parse_text_records(&content)
      .map_err(|e| ServiceError::DatasetError(path.into(), e))?
  };
  info!("read {} keyword records from {}", records.len(), path);
  Ok(records)
}

pub fn parse_text_records(content: &str) -> Result<Vec<PlaintextRecord>, String> {
  let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
  let mut next = |what: &str| {
    lines
      .next()
      .ok_or_else(|| format!("unexpected end of file while reading {}", what))
  };
  let num_keywords = parse_count(next("keyword count")?)?;

  // counts come from the file, so nothing is preallocated from them
  let mut records = Vec::new();
  for _ in 0..num_keywords {
    let keyword = next("keyword")?.to_string();
    let n = parse_count(next("id count")?)?;
    let mut ids = Vec::new();
    for _ in 0..n {
      ids.push(next("document id")?.to_string());
    }
    records.push(PlaintextRecord { keyword, ids });
  }
  Ok(records)
}

pub fn load_queries(path: &str) -> Result<Vec<Vec<String>>, ServiceError> {
  Ok(parse_queries(&fs::read_to_string(path)?))
}

/// Blank lines and empty keywords are skipped
pub fn parse_queries(content: &str) -> Vec<Vec<String>> {
  content
    .lines()
    .map(|line| {
      line
        .split(QUERY_SEPARATOR)
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>()
    })
    .filter(|q| !q.is_empty())
    .collect()
}

fn parse_count(line: &str) -> Result<usize, String> {
  line
    .parse()
    .map_err(|e| format!("expected a count, found {:?}: {}", line, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn text_records_are_parsed_in_order() {
    let content = "2\nalice\n2\ndoc1\ndoc2\n\nbob\n1\ndoc1\n";
    let records = parse_text_records(content).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].keyword, "alice");
    assert_eq!(records[0].ids, vec!["doc1", "doc2"]);
    assert_eq!(records[1].ids, vec!["doc1"]);
  }

  #[test]
  fn truncated_text_records_are_rejected() {
    assert!(parse_text_records("2\nalice\n3\ndoc1\n").is_err());
    assert!(parse_text_records("one\n").is_err());
    assert!(parse_text_records("").is_err());
  }

  #[test]
  fn oversized_counts_fail_without_allocating() {
    let content = format!("{}\nalice\n1\ndoc1\n", usize::MAX);
    assert!(parse_text_records(&content).is_err());
    let content = format!("1\nalice\n{}\ndoc1\n", usize::MAX);
    assert!(parse_text_records(&content).is_err());
  }

  #[test]
  fn query_lines_split_on_separator() {
    let queries = parse_queries("alice#bob\n\ncarol\n dave # eve #\n");
    assert_eq!(
      queries,
      vec![
        vec!["alice".to_string(), "bob".to_string()],
        vec!["carol".to_string()],
        vec!["dave".to_string(), "eve".to_string()],
      ]
    );
  }

  #[test]
  fn json_datasets_load_by_extension() {
    let path = std::env::temp_dir()
      .join(format!("oxt-dataset-{}.json", std::process::id()));
    fs::write(&path, r#"[{"keyword": "alice", "ids": ["doc1"]}]"#).unwrap();
    let records = load_records(path.to_str().unwrap()).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(
      records,
      vec![PlaintextRecord {
        keyword: "alice".into(),
        ids: vec!["doc1".into()],
      }]
    );
  }
}
