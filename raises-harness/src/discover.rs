use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
  /// Forward-slash path used as the prefix of every node id in the file.
  pub id: String,
  pub path: PathBuf,
}

fn is_declaration(path: &Path) -> bool {
  matches!(
    path.extension().and_then(|ext| ext.to_str()),
    Some("yaml" | "yml")
  )
}

/// Collects declaration files from `paths`; directories are walked recursively.
pub fn discover_files(paths: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
  let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();

  for root in paths {
    if root.is_file() {
      found.insert(normalize_id(root), root.clone());
      continue;
    }
    if !root.is_dir() {
      bail!("test path not found: {}", root.display());
    }

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
      if !entry.file_type().is_file() {
        continue;
      }
      let path = entry.into_path();
      if !is_declaration(&path) {
        continue;
      }
      found.insert(normalize_id(&path), path);
    }
  }

  if found.is_empty() {
    bail!("no test files (*.yaml, *.yml) found");
  }

  Ok(
    found
      .into_iter()
      .map(|(id, path)| DiscoveredFile { id, path })
      .collect(),
  )
}

fn normalize_id(path: &Path) -> String {
  let mut id = path.to_string_lossy().into_owned();
  if id.contains('\\') {
    id = id.replace('\\', "/");
  }
  id.strip_prefix("./").map(str::to_string).unwrap_or(id)
}

pub fn read_utf8_file(path: &Path) -> Result<String> {
  std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
