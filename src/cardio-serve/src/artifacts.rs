use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{Error, Result};

/// Default root under which every batch run gets its own folder.
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

/// Completed runs kept on disk before the oldest ones are removed.
pub const DEFAULT_KEEP_RUNS: usize = 10;

/// The plots produced by a batch run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    ConfusionMatrix,
    RocCurve,
    SamplePredictions,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::ConfusionMatrix,
        ArtifactKind::RocCurve,
        ArtifactKind::SamplePredictions,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ArtifactKind::ConfusionMatrix => "confusion_matrix",
            ArtifactKind::RocCurve => "roc_curve",
            ArtifactKind::SamplePredictions => "sample_predictions",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::ConfusionMatrix => "confusion_matrix.png",
            ArtifactKind::RocCurve => "roc_curve.png",
            ArtifactKind::SamplePredictions => "sample_predictions.png",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ArtifactKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| Error::UnknownArtifact(s.to_owned()))
    }
}

/// Identifier of one batch run, safe to use as a directory name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(String);

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl RunId {
    /// Timestamp plus a process-wide sequence number.
    pub fn generate() -> Self {
        let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        RunId(format!(
            "{}-{:06}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            seq
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.len() <= 64
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if valid {
            Ok(RunId(s.to_owned()))
        } else {
            Err(Error::UnknownArtifact(s.to_owned()))
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-run plot folders plus the completed runs, newest last.
///
/// Only the last `keep` published runs stay on disk. Runs that are still
/// being rendered are not tracked and never pruned.
pub struct ArtifactStore {
    root: PathBuf,
    keep: usize,
    published: RwLock<VecDeque<RunId>>,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        ArtifactStore {
            root: root.into(),
            keep: DEFAULT_KEEP_RUNS,
            published: RwLock::new(VecDeque::new()),
        }
    }

    /// Keep at most `keep` completed runs, never fewer than one.
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    /// Create the folder of a fresh run.
    pub fn begin_run(&self) -> Result<(RunId, PathBuf)> {
        let run = RunId::generate();
        let dir = self.run_dir(&run);
        fs::create_dir_all(&dir)?;
        Ok((run, dir))
    }

    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.as_str())
    }

    pub fn path(&self, run: &RunId, kind: ArtifactKind) -> PathBuf {
        self.run_dir(run).join(kind.file_name())
    }

    /// Make `run` the one served by the unscoped download route and remove
    /// the runs that fall out of the retention window.
    pub fn publish(&self, run: &RunId) {
        let expired: Vec<RunId> = {
            let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
            published.push_back(run.clone());
            let excess = published.len().saturating_sub(self.keep);
            published.drain(..excess).collect()
        };
        info!("Published artifacts of run {}", run);

        for old in &expired {
            debug!("Pruning artifacts of run {}", old);
            self.discard(old);
        }
    }

    /// Remove the folder of a run.
    pub fn discard(&self, run: &RunId) {
        let dir = self.run_dir(run);
        if let Err(err) = fs::remove_dir_all(&dir) {
            warn!("Could not remove {}: {}", dir.display(), err);
        }
    }

    pub fn latest(&self) -> Option<RunId> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    /// Path of an artifact of `run` if it exists on disk.
    pub fn find(&self, run: &RunId, kind: ArtifactKind) -> Option<PathBuf> {
        let path = self.path(run, kind);
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }

    pub fn find_latest(&self, kind: ArtifactKind) -> Option<PathBuf> {
        self.latest().and_then(|run| self.find(&run, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parses_known_keys_only() {
        for kind in &ArtifactKind::ALL {
            assert_eq!(kind.key().parse::<ArtifactKind>().unwrap(), *kind);
        }
        let err = "weights".parse::<ArtifactKind>().unwrap_err();
        assert_eq!(err.kind(), "unknown_artifact");
    }

    #[test]
    fn run_ids_are_unique_and_parseable() {
        let ids: HashSet<RunId> = (0..100).map(|_| RunId::generate()).collect();
        assert_eq!(ids.len(), 100);
        for id in &ids {
            assert_eq!(&id.as_str().parse::<RunId>().unwrap(), id);
        }
    }

    #[test]
    fn rejects_path_like_run_ids() {
        for bad in &["", "..", "../etc", "a/b", "run.png", "x\\y"] {
            assert!(bad.parse::<RunId>().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn latest_is_only_set_by_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.find_latest(ArtifactKind::RocCurve).is_none());

        let (run, run_dir) = store.begin_run().unwrap();
        fs::write(run_dir.join("roc_curve.png"), b"png").unwrap();
        assert!(store.find_latest(ArtifactKind::RocCurve).is_none());
        assert!(store.find(&run, ArtifactKind::RocCurve).is_some());

        store.publish(&run);
        assert_eq!(
            store.find_latest(ArtifactKind::RocCurve),
            Some(store.path(&run, ArtifactKind::RocCurve))
        );
        assert!(store.find_latest(ArtifactKind::ConfusionMatrix).is_none());
    }

    #[test]
    fn discard_removes_the_run_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (run, run_dir) = store.begin_run().unwrap();
        fs::write(run_dir.join("confusion_matrix.png"), b"png").unwrap();

        store.discard(&run);
        assert!(!run_dir.exists());
        assert!(store.latest().is_none());
    }

    #[test]
    fn only_the_newest_runs_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).with_retention(3);

        let mut runs = Vec::new();
        for _ in 0..5 {
            let (run, run_dir) = store.begin_run().unwrap();
            fs::write(run_dir.join("roc_curve.png"), b"png").unwrap();
            store.publish(&run);
            runs.push(run);
        }

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
        for run in &runs[..2] {
            assert!(!store.run_dir(run).exists());
            assert!(store.find(run, ArtifactKind::RocCurve).is_none());
        }
        for run in &runs[2..] {
            assert!(store.find(run, ArtifactKind::RocCurve).is_some());
        }
        assert_eq!(store.latest(), runs.last().cloned());
    }

    #[test]
    fn unpublished_runs_survive_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).with_retention(0);

        let (pending, pending_dir) = store.begin_run().unwrap();
        for _ in 0..3 {
            let (run, _) = store.begin_run().unwrap();
            store.publish(&run);
        }

        assert!(pending_dir.is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        assert_ne!(store.latest(), Some(pending));
    }
}
