use crate::partition::{CleanupReport, PartitionContext, ScratchFiles};
use crate::read::Mate;
use crate::stager::StagedInputs;
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What a successful publish left behind
#[derive(Debug)]
pub struct PublishReport {
    /// Durable copies, final output first
    pub copied: Vec<PathBuf>,
    pub cleanup: CleanupReport,
}

impl PublishReport {
    /// Durable path of the partition's alignment records
    pub fn output(&self) -> &Path {
        &self.copied[0]
    }
}

/// Copies partition results into durable storage and clears local scratch
#[derive(Debug, Clone)]
pub struct ResultPublisher {
    output_dir: PathBuf,
}

impl ResultPublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        ResultPublisher {
            output_dir: output_dir.into(),
        }
    }

    /// Publish the final SAM file and echo the staged reads.
    ///
    /// `scratch` is consumed: its paths are deleted whether or not the copies
    /// succeed, so the caller must not need any local file afterwards. Publishing
    /// a partition again after it succeeded keeps the durable copies and is not an
    /// error.
    pub fn publish(
        &self,
        ctx: &PartitionContext,
        final_output: &Path,
        staged: &StagedInputs,
        scratch: ScratchFiles,
    ) -> io::Result<PublishReport> {
        let mut copied = Vec::with_capacity(3);

        let durable_output = self.output_dir.join(ctx.durable_output_name());
        self.copy(ctx, final_output, &durable_output)?;
        copied.push(durable_output);

        for (mate, path) in [Mate::First, Mate::Second]
            .into_iter()
            .filter_map(|mate| staged.path(mate).map(|path| (mate, path)))
        {
            let durable_input = self.output_dir.join(ctx.durable_input_name(mate));
            self.copy(ctx, path, &durable_input)?;
            copied.push(durable_input);
        }

        let cleanup = scratch.cleanup();
        info!(
            "Partition {}: published {} files, removed {} local files",
            ctx.task,
            copied.len(),
            cleanup.removed
        );

        Ok(PublishReport { copied, cleanup })
    }

    fn copy(&self, ctx: &PartitionContext, from: &Path, to: &Path) -> io::Result<()> {
        // A repeated publish finds the local file gone and the durable copy in place
        if !from.exists() && to.is_file() {
            debug!(
                "Partition {}: {} already published to {}",
                ctx.task,
                from.display(),
                to.display()
            );
            return Ok(());
        }

        let bytes = fs::copy(from, to).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "Partition {}: failed to publish '{}' to '{}': {}",
                    ctx.task,
                    from.display(),
                    to.display(),
                    e
                ),
            )
        })?;
        debug!("Copied {} ({} bytes) to {}", from.display(), bytes, to.display());
        Ok(())
    }
}
