// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence: load/save JSON to disk with atomic writes.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

/// Load a JSON snapshot from `path`. Returns `Ok(None)` if the file does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&contents)?;
    Ok(Some(value))
}

/// Save a JSON snapshot to `path` atomically (write tmp + rename).
pub fn save<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
        s: String,
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample { n: 7, s: "hi".to_owned() };

        save(&path, &value).unwrap();
        let loaded: Option<Sample> = load(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = load(&path).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        save(&path, &Sample { n: 1, s: "a".to_owned() }).unwrap();
        save(&path, &Sample { n: 2, s: "b".to_owned() }).unwrap();

        let loaded: Option<Sample> = load(&path).unwrap();
        assert_eq!(loaded, Some(Sample { n: 2, s: "b".to_owned() }));
        assert!(!path.with_extension("tmp").exists());
    }
}
