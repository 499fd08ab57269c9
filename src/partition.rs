use crate::config::ReadLayout;
use crate::read::Mate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Identity and local namespace of one unit of parallel work.
///
/// The task index doubles as the partition key seen by the merge stage. Every
/// local path is derived from (task, job), so concurrently running partitions of
/// the same job, or of different jobs sharing a temp dir, never collide.
#[derive(Debug, Clone)]
pub struct PartitionContext {
    pub task: u32,
    pub job: u32,
    pub layout: ReadLayout,
    tmp_dir: PathBuf,
}

impl PartitionContext {
    pub fn new(task: u32, job: u32, layout: ReadLayout, tmp_dir: impl Into<PathBuf>) -> Self {
        PartitionContext {
            task,
            job,
            layout,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Local staging file holding this partition's reads for `mate`
    pub fn staging_path(&self, mate: Mate) -> PathBuf {
        let name = match mate {
            Mate::First => format!("BigBWA-{}-{}.fq", self.task, self.job),
            Mate::Second => format!("BigBWA-{}_2-{}.fq", self.task, self.job),
        };
        self.tmp_dir.join(name)
    }

    /// Local SAM file written by the final alignment step
    pub fn local_output_path(&self) -> PathBuf {
        self.tmp_dir
            .join(format!("Output{}-{}.sam", self.task, self.job))
    }

    /// Local `.sai` index artifact produced by `bwa aln` for `mate`
    pub fn index_artifact_path(&self, mate: Mate) -> PathBuf {
        let name = match mate {
            Mate::First => format!("Output{}-{}.sai", self.task, self.job),
            Mate::Second => format!("Output{}-2-{}.sai", self.task, self.job),
        };
        self.tmp_dir.join(name)
    }

    /// Name of the published alignment records in durable storage
    pub fn durable_output_name(&self) -> String {
        format!("Output{}.sam", self.task)
    }

    /// Name of the published input echo in durable storage.
    ///
    /// Single-end partitions have one echo without a mate suffix.
    pub fn durable_input_name(&self, mate: Mate) -> String {
        match (self.layout, mate) {
            (ReadLayout::Single, _) => format!("Input{}.fq", self.task),
            (ReadLayout::Paired, Mate::First) => format!("Input{}_1.fq", self.task),
            (ReadLayout::Paired, Mate::Second) => format!("Input{}_2.fq", self.task),
        }
    }
}

/// Pointer from a partition key to its published alignment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOutputRef {
    pub partition: u32,
    pub path: PathBuf,
}

/// Outcome of removing a partition's local files
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Scoped owner of every local path a partition creates.
///
/// Paths are deleted exactly once: either by an explicit [`ScratchFiles::cleanup`]
/// or when the guard is dropped on an error or unwinding path. Files that were
/// never created are counted as missing, and deletion errors are logged instead of
/// returned.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
    released: bool,
}

impl ScratchFiles {
    pub fn new() -> Self {
        ScratchFiles::default()
    }

    /// Register a path for deletion. Registering the same path twice is a no-op.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn cleanup(mut self) -> CleanupReport {
        self.remove_all()
    }

    fn remove_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.released {
            return report;
        }
        self.released = true;

        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => {
                    debug!("Removed local file {}", path.display());
                    report.removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    warn!("Failed to remove local file {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        if !self.released {
            let report = self.remove_all();
            debug!(
                "Scratch cleanup on early exit: {} removed, {} missing, {} failed",
                report.removed, report.missing, report.failed
            );
        }
    }
}
