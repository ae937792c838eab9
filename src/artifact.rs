// src/artifact.rs
//
// Policy artifact serialization.
//
// An artifact is two sibling files derived from one extension-less path:
//   <path>.bin   portable full-precision weight record
//   <path>.json  metadata (input/output shape) plus a fixed format tag
//
// Saving never moves or mutates the model: the record is taken from a
// clone, so device placement is identical before and after the call.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::paths::DataRoot;

/// Fixed `id` tag naming the serialization format in the metadata sidecar.
pub const ARTIFACT_FORMAT_ID: &str = "burn-record";

/// Extension the weight recorder appends to the artifact path.
pub const MODEL_EXT: &str = "bin";

/// Shape metadata written next to the weight record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Observation encoding the network expects ("dict": features + mask).
    pub input_type: String,
    /// Feature-vector length.
    pub num_inputs: usize,
    /// Action count (actor output dimension).
    pub num_outputs: usize,
}

impl ArtifactMetadata {
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            input_type: "dict".to_string(),
            num_inputs,
            num_outputs,
        }
    }
}

/// Paths produced by a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to record policy weights: {0}")]
    Record(#[from] RecorderError),
    #[error("failed to write policy metadata: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode policy metadata: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialization capability bundled with a loaded engine.
///
/// Returned by the loader as part of [`crate::loader::LoadedEngine`] instead
/// of being attached to anything at runtime; callers that hold an engine
/// hold the saver too.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicySaver;

impl PolicySaver {
    pub fn new() -> Self {
        Self
    }

    /// Write `<path>.bin` and `<path>.json` for `model`.
    ///
    /// The metadata file contains every field of `metadata` plus
    /// `"id": "burn-record"`. `path` must not carry an extension.
    pub fn save<B: Backend, M: Module<B>>(
        &self,
        model: &M,
        metadata: &ArtifactMetadata,
        path: &Path,
    ) -> Result<SavedArtifact, ArtifactError> {
        DataRoot::ensure_parent(path)?;

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model.clone().save_file(path.to_path_buf(), &recorder)?;

        let mut doc = match serde_json::to_value(metadata)? {
            JsonValue::Object(map) => map,
            other => {
                // Metadata is a struct; anything else is a programming error.
                let mut map = serde_json::Map::new();
                map.insert("metadata".to_string(), other);
                map
            }
        };
        doc.insert(
            "id".to_string(),
            JsonValue::String(ARTIFACT_FORMAT_ID.to_string()),
        );

        let metadata_path = path.with_extension("json");
        fs::write(
            &metadata_path,
            serde_json::to_string_pretty(&JsonValue::Object(doc))?,
        )?;

        Ok(SavedArtifact {
            model_path: path.with_extension(MODEL_EXT),
            metadata_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_serializes_expected_keys() {
        let meta = ArtifactMetadata::new(12, 5);
        let v = serde_json::to_value(&meta).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj["input_type"], "dict");
        assert_eq!(obj["num_inputs"], 12);
        assert_eq!(obj["num_outputs"], 5);
        assert!(!obj.contains_key("id"));
    }
}
