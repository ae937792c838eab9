// src/paths.rs
//
// Data-root layout for dynagym.
//
// Everything the harness writes — policy artifacts, metric streams — lives
// under a single data root, keyed by the MDP identifier:
//
//   <root>/<mdp_identifier>/<artifact_name>.{bin,json}
//   <root>/<mdp_identifier>/train_logs/<run_name>.jsonl
//
// The root is resolved once at startup: explicit CLI path, then the
// DYNAGYM_DATA_ROOT environment variable, then ./dynagym_data.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no explicit data root is given.
pub const DATA_ROOT_ENV: &str = "DYNAGYM_DATA_ROOT";

/// Default data root relative to the working directory.
pub const DEFAULT_DATA_ROOT: &str = "dynagym_data";

/// Subdirectory (per MDP identifier) holding metric streams.
pub const TRAIN_LOG_DIR: &str = "train_logs";

/// Resolved root directory for all harness outputs.
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    /// Resolve the data root with precedence: explicit > env > default.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let root = match explicit {
            Some(p) => p.to_path_buf(),
            None => env::var_os(DATA_ROOT_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT)),
        };
        Self { root }
    }

    /// Build a root at an exact path (used by tests).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join path components under the root.
    pub fn filepath(&self, parts: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        for part in parts {
            path.push(part);
        }
        path
    }

    /// Path of the best-policy artifact for an MDP, without extension.
    /// The saver appends `.bin` / `.json`.
    pub fn policy_path(&self, mdp_identifier: &str, artifact_name: &str) -> PathBuf {
        self.filepath(&[mdp_identifier, artifact_name])
    }

    /// Path of a metric stream for an MDP.
    pub fn train_log_path(&self, mdp_identifier: &str, run_name: &str) -> PathBuf {
        self.filepath(&[mdp_identifier, TRAIN_LOG_DIR, &format!("{run_name}.jsonl")])
    }

    /// Create the parent directory of `path` if it does not exist yet.
    pub fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filepath_joins_parts_under_root() {
        let root = DataRoot::at("/tmp/dg");
        let p = root.filepath(&["joint_replenishment", "ppo_policy"]);
        assert_eq!(p, PathBuf::from("/tmp/dg/joint_replenishment/ppo_policy"));
    }

    #[test]
    fn train_log_path_is_keyed_by_identifier() {
        let root = DataRoot::at("/tmp/dg");
        let p = root.train_log_path("mdp_x", "run1");
        assert_eq!(p, PathBuf::from("/tmp/dg/mdp_x/train_logs/run1.jsonl"));
    }

    #[test]
    fn explicit_root_wins_over_default() {
        let root = DataRoot::resolve(Some(Path::new("/explicit")));
        assert_eq!(root.root(), Path::new("/explicit"));
    }
}
