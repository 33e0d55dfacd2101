//! Narrowing the collected items: `--filter` and `--shard`.

use anyhow::{anyhow, Result};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub enum Filter {
  All,
  Glob(GlobMatcher),
  Regex(Regex),
}

/// A pattern is tried as a glob first; anything `globset` rejects is compiled as a regex.
pub fn build_filter(pattern: Option<&str>) -> Result<Filter> {
  let Some(raw) = pattern else {
    return Ok(Filter::All);
  };
  if let Ok(glob) = Glob::new(raw) {
    return Ok(Filter::Glob(glob.compile_matcher()));
  }
  let regex = Regex::new(raw).map_err(|err| anyhow!("invalid filter `{raw}`: {err}"))?;
  Ok(Filter::Regex(regex))
}

impl Filter {
  pub fn matches(&self, nodeid: &str) -> bool {
    match self {
      Filter::All => true,
      Filter::Glob(glob) => glob.is_match(nodeid),
      Filter::Regex(re) => re.is_match(nodeid),
    }
  }
}

/// Keeps every `total`-th item starting at `index`, over the collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shard {
  pub index: usize,
  pub total: usize,
}

impl Shard {
  pub fn includes(&self, idx: usize) -> bool {
    idx % self.total == self.index
  }

  pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
    items
      .into_iter()
      .enumerate()
      .filter(|(idx, _)| self.includes(*idx))
      .map(|(_, item)| item)
      .collect()
  }
}

impl FromStr for Shard {
  type Err = String;

  fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
    let Some((index_raw, total_raw)) = raw.split_once('/') else {
      return Err("shard must be in the form <index>/<total>".into());
    };
    let index: usize = index_raw
      .parse()
      .map_err(|err| format!("invalid shard index `{index_raw}`: {err}"))?;
    let total: usize = total_raw
      .parse()
      .map_err(|err| format!("invalid shard total `{total_raw}`: {err}"))?;
    if total == 0 {
      return Err("shard total must be greater than zero".into());
    }
    if index >= total {
      return Err(format!(
        "shard index must be less than total ({index} >= {total})"
      ));
    }
    Ok(Self { index, total })
  }
}
