// Alignment command: split a fragment file, align every partition with BWA and
// optionally merge the partition outputs
//
// Partitions run in parallel on the global rayon pool. A failing partition is
// reported but never cancels its siblings.

use crate::advisor::{effective_split_size, SplitSizeHint, DEFAULT_BLOCK_SIZE};
use crate::commands::merge::merge_manifest;
use crate::config::JobConfig;
use crate::input_split::{compute_splits, open_split};
use crate::invoker::{AlignmentEngine, ExternalEngine};
use crate::merge::{MergeManifest, MergeStats};
use crate::partition::PartitionContext;
use crate::pipeline::{run_partition, PartitionOutcome};
use crate::publisher::ResultPublisher;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

/// Name of the merge manifest written next to the partition outputs
pub const MANIFEST_NAME: &str = "references.bin";
/// Name of the merged SAM file
pub const FINAL_OUTPUT_NAME: &str = "FinalOutput.sam";

/// What a completed job produced
#[derive(Debug)]
pub struct JobSummary {
    pub partitions: usize,
    pub reads: u64,
    pub outcomes: Vec<PartitionOutcome>,
    /// Set when the job ran with the merge stage
    pub manifest: Option<PathBuf>,
    pub merged: Option<MergeStats>,
}

/// Run alignment command with the configured `bwa` executable
pub fn run_align(config: &JobConfig) -> io::Result<JobSummary> {
    let engine = ExternalEngine::new(&config.engine);
    debug!("Using alignment engine {}", engine.program().display());
    run_align_with(config, &engine)
}

/// Run alignment command with any engine
pub fn run_align_with<E>(config: &JobConfig, engine: &E) -> io::Result<JobSummary>
where
    E: AlignmentEngine + Sync + ?Sized,
{
    config.validate()?;
    let start_time = Instant::now();

    fs::create_dir_all(&config.output_dir)?;

    let total_bytes = fs::metadata(&config.input)?.len();
    let hint = config
        .partitions
        .map(|desired| SplitSizeHint::for_partitions(total_bytes, desired));
    let split_size = effective_split_size(hint, DEFAULT_BLOCK_SIZE);
    let splits = compute_splits(&config.input, split_size)?;

    if splits.is_empty() {
        warn!("Input '{}' is empty, nothing to align", config.input.display());
    }
    if let Some(desired) = config.partitions {
        if splits.len() as u64 != desired.get() {
            info!(
                "[align] Requested {} partitions, input splits into {}",
                desired,
                splits.len()
            );
        }
    }
    info!(
        "[align] {:.3}s {} bytes in {} partitions of ~{} bytes, {:?} on {}",
        start_time.elapsed().as_secs_f64(),
        total_bytes,
        splits.len(),
        split_size,
        config.variant(),
        config.index_path.display()
    );

    let publisher = ResultPublisher::new(&config.output_dir);
    let results: Vec<(u32, io::Result<PartitionOutcome>)> = splits
        .par_iter()
        .map(|split| {
            let ctx = PartitionContext::new(split.index, config.job_id, config.layout, &config.tmp_dir);
            let result = open_split(&config.input, split)
                .and_then(|reads| run_partition(&ctx, config, reads, engine, &publisher));
            (split.index, result)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (task, result) in results {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("Partition {} failed: {}", task, e);
                failed.push(task);
            }
        }
    }
    let reads: u64 = outcomes.iter().map(|outcome| outcome.reads).sum();

    info!(
        "[align] {:.3}s {} of {} partitions aligned ({} reads)",
        start_time.elapsed().as_secs_f64(),
        outcomes.len(),
        splits.len(),
        reads
    );

    let mut manifest_path = None;
    let mut merged = None;
    if config.use_reducer {
        let manifest = MergeManifest {
            expected_partitions: splits.len() as u32,
            references: outcomes
                .iter()
                .filter_map(|outcome| outcome.reference.clone())
                .collect(),
        };
        let path = config.output_dir.join(MANIFEST_NAME);
        manifest.save(&path)?;
        manifest_path = Some(path);

        if failed.is_empty() {
            let stats = merge_manifest(&manifest, &config.output_dir.join(FINAL_OUTPUT_NAME))?;
            info!(
                "[align] {:.3}s merged {} partition outputs",
                start_time.elapsed().as_secs_f64(),
                stats.files
            );
            merged = Some(stats);
        } else {
            warn!(
                "Skipping merge: {} partition(s) failed, rerun `merge` once they are fixed",
                failed.len()
            );
        }
    }

    if !failed.is_empty() {
        return Err(io::Error::other(format!(
            "{} of {} partitions failed: {:?}",
            failed.len(),
            splits.len(),
            failed
        )));
    }

    Ok(JobSummary {
        partitions: splits.len(),
        reads,
        outcomes,
        manifest: manifest_path,
        merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, ReadLayout};
    use crate::plan::InvocationStep;
    use std::num::NonZeroU64;
    use std::path::Path;
    use tempfile::TempDir;

    /// Echoes the first line of each staged input as a SAM record
    struct EchoEngine {
        fail_task: Option<u32>,
    }

    impl AlignmentEngine for EchoEngine {
        fn execute(&self, step: &InvocationStep) -> io::Result<()> {
            let output = step.output();
            let name = output.file_name().unwrap().to_string_lossy().into_owned();
            if let Some(task) = self.fail_task {
                if name.starts_with(&format!("Output{}-", task)) {
                    return Err(io::Error::other("simulated crash"));
                }
            }
            let mut sam = String::from("@SQ\tSN:chr1\tLN:100\n");
            for arg in step.args().iter().filter(|arg| arg.ends_with(".fq")) {
                let staged = fs::read_to_string(arg)?;
                for name in staged.lines().step_by(4) {
                    sam.push_str(&format!("{}\t0\tchr1\t1\t60\n", name));
                }
            }
            fs::write(output, sam)
        }
    }

    fn setup(reads: usize) -> io::Result<(TempDir, JobConfig)> {
        let dir = TempDir::new()?;
        let input = dir.path().join("reads.txt");
        let content: String = (0..reads)
            .map(|i| format!("r{:03}<sep>ACGT<sep>+<sep>IIII\n", i))
            .collect();
        fs::write(&input, content)?;
        let tmp = dir.path().join("tmp");
        fs::create_dir(&tmp)?;

        let config = JobConfig {
            input,
            output_dir: dir.path().join("out"),
            index_path: dir.path().join("ref.fa"),
            algorithm: Algorithm::Mem,
            layout: ReadLayout::Single,
            use_reducer: true,
            partitions: NonZeroU64::new(4),
            tmp_dir: tmp,
            job_id: 7,
            ..JobConfig::default()
        };
        Ok((dir, config))
    }

    fn is_empty_dir(path: &Path) -> io::Result<bool> {
        Ok(fs::read_dir(path)?.next().is_none())
    }

    #[test]
    fn test_align_and_merge() -> io::Result<()> {
        let (_dir, config) = setup(40)?;
        let summary = run_align_with(&config, &EchoEngine { fail_task: None })?;

        assert_eq!(summary.partitions, 4);
        assert_eq!(summary.reads, 40);
        assert_eq!(summary.merged.map(|stats| stats.records), Some(40));
        assert!(config.output_dir.join(MANIFEST_NAME).is_file());
        assert!(is_empty_dir(&config.tmp_dir)?);

        let merged = fs::read_to_string(config.output_dir.join(FINAL_OUTPUT_NAME))?;
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines.len(), 41);
        assert!(lines[0].starts_with("@SQ"));
        let names: Vec<&str> = lines[1..].iter().map(|l| l.split('\t').next().unwrap()).collect();
        let expected: Vec<String> = (0..40).map(|i| format!("r{:03}", i)).collect();
        assert_eq!(names, expected);

        // Partition outputs are consumed by the merge, staged inputs stay
        for task in 0..4 {
            assert!(!config.output_dir.join(format!("Output{}.sam", task)).exists());
            assert!(config.output_dir.join(format!("Input{}.fq", task)).exists());
        }
        Ok(())
    }

    #[test]
    fn test_without_reducer_outputs_stay_separate() -> io::Result<()> {
        let (_dir, mut config) = setup(10)?;
        config.use_reducer = false;
        config.partitions = NonZeroU64::new(2);

        let summary = run_align_with(&config, &EchoEngine { fail_task: None })?;
        assert_eq!(summary.partitions, 2);
        assert!(summary.manifest.is_none());
        assert!(summary.merged.is_none());
        assert!(!config.output_dir.join(FINAL_OUTPUT_NAME).exists());
        assert!(config.output_dir.join("Output0.sam").is_file());
        assert!(config.output_dir.join("Output1.sam").is_file());
        Ok(())
    }

    #[test]
    fn test_failed_partition_skips_merge() -> io::Result<()> {
        let (_dir, config) = setup(40)?;
        let err = run_align_with(&config, &EchoEngine { fail_task: Some(2) }).unwrap_err();
        assert!(err.to_string().contains("1 of 4 partitions failed"));

        // Siblings still published, nothing merged, scratch cleared
        for task in [0, 1, 3] {
            assert!(config.output_dir.join(format!("Output{}.sam", task)).is_file());
        }
        assert!(!config.output_dir.join("Output2.sam").exists());
        assert!(!config.output_dir.join(FINAL_OUTPUT_NAME).exists());
        assert!(is_empty_dir(&config.tmp_dir)?);

        let manifest = MergeManifest::load(&config.output_dir.join(MANIFEST_NAME))?;
        assert_eq!(manifest.expected_partitions, 4);
        assert_eq!(manifest.references.len(), 3);
        Ok(())
    }

    #[test]
    fn test_invalid_config_runs_nothing() -> io::Result<()> {
        let (_dir, mut config) = setup(4)?;
        config.index_path = PathBuf::new();
        let err = run_align_with(&config, &EchoEngine { fail_task: None }).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!config.output_dir.exists());
        Ok(())
    }
}
