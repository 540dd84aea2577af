// Run Workspace
// Output directory layout and cache-hit detection under a run root

use crate::cache::key::CacheKey;
use crate::node::result::resolve_in_dir;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Marker written after a job exits successfully
pub const SUCCESS_MARKER: &str = ".dagsweep_success";

/// Per-job record of the resolved binding
pub const JOB_CONFIG_FILE: &str = "job_config.json";

/// Errors that can occur with workspace operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize job config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown cache policy '{0}', expected never, primary_exists or success_marker")]
    UnknownPolicy(String),
}

/// When an existing output directory counts as a finished job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Always run
    #[default]
    Never,
    /// The primary output file exists
    PrimaryExists,
    /// The success marker written after exit 0 exists
    SuccessMarker,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CachePolicy::Never => "never",
            CachePolicy::PrimaryExists => "primary_exists",
            CachePolicy::SuccessMarker => "success_marker",
        };
        f.write_str(name)
    }
}

impl FromStr for CachePolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "never" => Ok(CachePolicy::Never),
            "primary_exists" | "primary" => Ok(CachePolicy::PrimaryExists),
            "success_marker" | "marker" => Ok(CachePolicy::SuccessMarker),
            _ => Err(CacheError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Root directory shared by every job of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `~/.cache/dagsweep`
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dagsweep")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<node>/<node>_id_<key>`
    pub fn node_dir(&self, node: &str, key: &CacheKey) -> PathBuf {
        self.root.join(node).join(key.dir_name(node))
    }

    /// Absolute location of an output declared relative to `node_dir`
    pub fn resolve_out_path(&self, node_dir: &Path, rel: &str) -> PathBuf {
        resolve_in_dir(node_dir, rel)
    }

    /// Whether the job in `node_dir` can be reused under `policy`
    pub fn is_cached(&self, policy: CachePolicy, node_dir: &Path, primary: Option<&str>) -> bool {
        match policy {
            CachePolicy::Never => false,
            CachePolicy::PrimaryExists => match primary {
                Some(rel) => self.resolve_out_path(node_dir, rel).exists(),
                None => false,
            },
            CachePolicy::SuccessMarker => node_dir.join(SUCCESS_MARKER).is_file(),
        }
    }

    pub fn ensure_dir(&self, node_dir: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(node_dir).map_err(|source| CacheError::Io {
            path: node_dir.to_path_buf(),
            source,
        })
    }

    /// Write `job_config.json` into `node_dir`
    pub fn write_job_config<T: Serialize>(
        &self,
        node_dir: &Path,
        config: &T,
    ) -> Result<PathBuf, CacheError> {
        self.ensure_dir(node_dir)?;
        let path = node_dir.join(JOB_CONFIG_FILE);
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&path, json).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn mark_success(&self, node_dir: &Path) -> Result<(), CacheError> {
        let path = node_dir.join(SUCCESS_MARKER);
        fs::write(&path, b"").map_err(|source| CacheError::Io { path, source })
    }

    /// Remove a stale success marker before re-running a job
    pub fn clear_success(&self, node_dir: &Path) -> Result<(), CacheError> {
        let path = node_dir.join(SUCCESS_MARKER);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn key() -> CacheKey {
        CacheKey::compute("predict", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new())
    }

    #[test]
    fn test_node_dir_layout() {
        let ws = Workspace::new("/runs");
        let key = key();
        let dir = ws.node_dir("predict", &key);
        assert_eq!(
            dir,
            PathBuf::from(format!("/runs/predict/predict_id_{}", key))
        );
        assert_eq!(ws.resolve_out_path(&dir, "."), dir);
        assert_eq!(ws.resolve_out_path(&dir, "/abs/x"), PathBuf::from("/abs/x"));
    }

    #[test]
    fn test_cache_policies() {
        let temp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(temp.path());
        let dir = ws.node_dir("predict", &key());
        ws.ensure_dir(&dir).unwrap();

        assert!(!ws.is_cached(CachePolicy::Never, &dir, Some("out.json")));
        assert!(!ws.is_cached(CachePolicy::PrimaryExists, &dir, Some("out.json")));
        assert!(!ws.is_cached(CachePolicy::SuccessMarker, &dir, Some("out.json")));

        fs::write(dir.join("out.json"), "{}").unwrap();
        assert!(ws.is_cached(CachePolicy::PrimaryExists, &dir, Some("out.json")));
        assert!(!ws.is_cached(CachePolicy::PrimaryExists, &dir, None));
        assert!(!ws.is_cached(CachePolicy::SuccessMarker, &dir, Some("out.json")));

        ws.mark_success(&dir).unwrap();
        assert!(ws.is_cached(CachePolicy::SuccessMarker, &dir, None));
        assert!(!ws.is_cached(CachePolicy::Never, &dir, Some("out.json")));

        ws.clear_success(&dir).unwrap();
        ws.clear_success(&dir).unwrap();
        assert!(!ws.is_cached(CachePolicy::SuccessMarker, &dir, None));
    }

    #[test]
    fn test_write_job_config() {
        let temp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(temp.path());
        let dir = temp.path().join("n").join("n_id_x");

        let path = ws
            .write_job_config(&dir, &serde_json::json!({"node": "n"}))
            .unwrap();
        assert_eq!(path, dir.join(JOB_CONFIG_FILE));
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("\"node\""));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("never".parse::<CachePolicy>().unwrap(), CachePolicy::Never);
        assert_eq!(
            "primary-exists".parse::<CachePolicy>().unwrap(),
            CachePolicy::PrimaryExists
        );
        assert_eq!(
            "success_marker".parse::<CachePolicy>().unwrap(),
            CachePolicy::SuccessMarker
        );
        assert!("sometimes".parse::<CachePolicy>().is_err());

        let policy: CachePolicy = serde_yaml::from_str("primary_exists").unwrap();
        assert_eq!(policy, CachePolicy::PrimaryExists);
        assert_eq!(CachePolicy::default().to_string(), "never");
    }
}
