// SPDX-License-Identifier: Apache-2.0

//! Artifact store for machine-readable outputs.
//!
//! One file per logical result: raw metric query responses, cold/warm start
//! summaries, load-test request logs, cost reports. Downstream analysis
//! consumes these files; nothing in the orchestrator reads them back except
//! tests.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ArtifactError;

/// JSON/raw artifact writer over an output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| ArtifactError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a value as pretty-printed JSON. Returns the created path.
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ArtifactError> {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|e| ArtifactError::Io {
            path: path.clone(),
            source: e,
        })?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(path)
    }

    /// Persist raw text (request logs). Returns the created path.
    pub fn save_raw(&self, name: &str, content: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.dir.join(name);
        fs::write(&path, content).map_err(|e| ArtifactError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Load a previously saved JSON artifact.
    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArtifactError> {
        let path = self.dir.join(name);
        let file = File::open(&path).map_err(|e| ArtifactError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_reader(file)?)
    }

    /// All artifact paths, sorted by name.
    pub fn list(&self) -> Result<Vec<PathBuf>, ArtifactError> {
        let mut paths = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| ArtifactError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| ArtifactError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        value: f64,
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let sample = Sample {
            name: "duration".to_string(),
            value: 12.5,
        };
        let path = store.save_json("function_duration.json", &sample).unwrap();
        assert!(path.exists());

        let loaded: Sample = store.load_json("function_duration.json").unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_save_raw_and_list() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        store
            .save_raw("function_load.csv", "offset_ms,elapsed_ms,status,success\n")
            .unwrap();
        store.save_raw("service_load.csv", "").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].ends_with("function_load.csv"));
    }
}
