use crate::config::JobConfig;
use crate::invoker::{execute_plan, AlignmentEngine};
use crate::partition::{PartitionContext, PartitionOutputRef, ScratchFiles};
use crate::plan::plan;
use crate::publisher::{PublishReport, ResultPublisher};
use crate::read::Fragment;
use crate::stager::ReadStager;
use log::{debug, info};
use std::io::{self, BufRead};
use std::time::Instant;

/// Result of one successfully processed partition
#[derive(Debug)]
pub struct PartitionOutcome {
    pub task: u32,
    /// Reads staged per mate file
    pub reads: u64,
    pub publish: PublishReport,
    /// Present when the job merges partition outputs
    pub reference: Option<PartitionOutputRef>,
}

/// Stage, align and publish one partition.
///
/// `reads` yields one fragment per line. All local files of the partition are
/// owned by a single [`ScratchFiles`] guard, so they are removed on every exit
/// path, including errors from any stage.
pub fn run_partition<R, E>(
    ctx: &PartitionContext,
    config: &JobConfig,
    reads: R,
    engine: &E,
    publisher: &ResultPublisher,
) -> io::Result<PartitionOutcome>
where
    R: BufRead,
    E: AlignmentEngine + ?Sized,
{
    let start_time = Instant::now();
    let mut scratch = ScratchFiles::new();

    let mut stager = ReadStager::open(ctx, &mut scratch)?;
    for line in reads.lines() {
        let line = line?;
        stager.append_fragment(&Fragment::parse(&line, ctx.layout.is_paired())?)?;
    }
    let staged = stager.finish()?;
    debug!(
        "[partition {}] {:.3}s staged {} reads",
        ctx.task,
        start_time.elapsed().as_secs_f64(),
        staged.reads
    );

    let plan = plan(
        config.variant(),
        ctx,
        &config.index_path,
        &staged.inputs,
        config.bwa_threads,
        config.effective_read_group(),
    )?;
    for artifact in plan.local_artifacts() {
        scratch.track(artifact);
    }

    execute_plan(engine, &plan).map_err(|e| {
        io::Error::new(e.kind(), format!("Partition {}: {}", ctx.task, e))
    })?;

    let publish = publisher.publish(ctx, &plan.final_output, &staged.inputs, scratch)?;
    let reference = config.use_reducer.then(|| PartitionOutputRef {
        partition: ctx.task,
        path: publish.output().to_path_buf(),
    });

    info!(
        "[partition {}] {:.3}s aligned {} reads with {:?}",
        ctx.task,
        start_time.elapsed().as_secs_f64(),
        staged.reads,
        config.variant()
    );

    Ok(PartitionOutcome {
        task: ctx.task,
        reads: staged.reads,
        publish,
        reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, ReadLayout};
    use crate::plan::{InvocationStep, SubCommand};
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes a one-header SAM for every step and can fail on one subcommand
    struct FakeEngine {
        fail_on: Option<SubCommand>,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl FakeEngine {
        fn new(fail_on: Option<SubCommand>) -> Self {
            FakeEngine {
                fail_on,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl AlignmentEngine for FakeEngine {
        fn execute(&self, step: &InvocationStep) -> io::Result<()> {
            self.seen.lock().unwrap().push(step.args().to_vec());
            fs::write(step.output(), "@SQ\tSN:chr1\tLN:100\nread\t0\tchr1\t1\t60\n")?;
            if self.fail_on == Some(step.subcommand()) {
                return Err(io::Error::other("bwa crashed"));
            }
            Ok(())
        }
    }

    fn config(tmp: &Path, out: &Path, algorithm: Algorithm, layout: ReadLayout) -> JobConfig {
        JobConfig {
            index_path: tmp.join("ref.fa"),
            output_dir: out.to_path_buf(),
            tmp_dir: tmp.to_path_buf(),
            algorithm,
            layout,
            ..JobConfig::default()
        }
    }

    fn local_files(dir: &Path) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<_>>()?;
        names.sort();
        Ok(names)
    }

    const PAIRED_INPUT: &str = "@a/1<sep>AC<sep>+<sep>II<part>@a/2<sep>GT<sep>+<sep>JJ\n\
                                @b/1<sep>CC<sep>+<sep>II<part>@b/2<sep>GG<sep>+<sep>JJ\n";

    #[test]
    fn test_paired_mem_partition() -> io::Result<()> {
        let tmp = TempDir::new()?;
        let out = TempDir::new()?;
        let mut config = config(tmp.path(), out.path(), Algorithm::Mem, ReadLayout::Paired);
        config.use_reducer = true;
        config.bwa_threads = std::num::NonZeroUsize::new(4);
        let ctx = PartitionContext::new(3, 11, ReadLayout::Paired, tmp.path());
        let engine = FakeEngine::new(None);

        let outcome = run_partition(
            &ctx,
            &config,
            Cursor::new(PAIRED_INPUT),
            &engine,
            &ResultPublisher::new(out.path()),
        )?;

        assert_eq!(outcome.reads, 2);
        assert_eq!(
            outcome.reference,
            Some(PartitionOutputRef {
                partition: 3,
                path: out.path().join("Output3.sam"),
            })
        );
        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0][..6], &["bwa", "mem", "-f", ctx.local_output_path().to_str().unwrap(), "-t", "4"]);

        assert_eq!(local_files(tmp.path())?, Vec::<String>::new());
        assert_eq!(
            local_files(out.path())?,
            vec!["Input3_1.fq", "Input3_2.fq", "Output3.sam"]
        );
        Ok(())
    }

    #[test]
    fn test_no_reference_without_reducer() -> io::Result<()> {
        let tmp = TempDir::new()?;
        let out = TempDir::new()?;
        let config = config(tmp.path(), out.path(), Algorithm::Bwasw, ReadLayout::Single);
        let ctx = PartitionContext::new(0, 11, ReadLayout::Single, tmp.path());

        let outcome = run_partition(
            &ctx,
            &config,
            Cursor::new("@a<sep>AC<sep>+<sep>II\n"),
            &FakeEngine::new(None),
            &ResultPublisher::new(out.path()),
        )?;
        assert!(outcome.reference.is_none());
        assert_eq!(local_files(out.path())?, vec!["Input0.fq", "Output0.sam"]);
        Ok(())
    }

    #[test]
    fn test_engine_failure_removes_partial_artifacts() -> io::Result<()> {
        let tmp = TempDir::new()?;
        let out = TempDir::new()?;
        let config = config(tmp.path(), out.path(), Algorithm::Aln, ReadLayout::Paired);
        let ctx = PartitionContext::new(1, 11, ReadLayout::Paired, tmp.path());
        let engine = FakeEngine::new(Some(SubCommand::Sampe));

        let err = run_partition(
            &ctx,
            &config,
            Cursor::new(PAIRED_INPUT),
            &engine,
            &ResultPublisher::new(out.path()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Partition 1"));

        // Both aln runs and the failed sampe ran; nothing survives locally or is published
        assert_eq!(engine.seen.lock().unwrap().len(), 3);
        assert_eq!(local_files(tmp.path())?, Vec::<String>::new());
        assert_eq!(local_files(out.path())?, Vec::<String>::new());
        Ok(())
    }

    #[test]
    fn test_bad_fragment_fails_partition_and_cleans_up() -> io::Result<()> {
        let tmp = TempDir::new()?;
        let out = TempDir::new()?;
        let config = config(tmp.path(), out.path(), Algorithm::Mem, ReadLayout::Paired);
        let ctx = PartitionContext::new(2, 11, ReadLayout::Paired, tmp.path());
        let engine = FakeEngine::new(None);

        let result = run_partition(
            &ctx,
            &config,
            Cursor::new("@a/1<sep>AC<sep>+<sep>II\n"),
            &engine,
            &ResultPublisher::new(out.path()),
        );
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert!(engine.seen.lock().unwrap().is_empty());
        assert_eq!(local_files(tmp.path())?, Vec::<String>::new());
        Ok(())
    }
}
