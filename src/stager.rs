use crate::partition::{PartitionContext, ScratchFiles};
use crate::read::{Fragment, Mate, ReadRecord};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Local files holding one partition's reads, in the order the aligner takes them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedInputs {
    Single(PathBuf),
    Paired(PathBuf, PathBuf),
}

impl StagedInputs {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            StagedInputs::Single(path) => vec![path.as_path()],
            StagedInputs::Paired(mate1, mate2) => vec![mate1.as_path(), mate2.as_path()],
        }
    }

    pub fn path(&self, mate: Mate) -> Option<&Path> {
        match (self, mate) {
            (StagedInputs::Single(path), Mate::First) => Some(path.as_path()),
            (StagedInputs::Single(_), Mate::Second) => None,
            (StagedInputs::Paired(mate1, _), Mate::First) => Some(mate1.as_path()),
            (StagedInputs::Paired(_, mate2), Mate::Second) => Some(mate2.as_path()),
        }
    }
}

/// Result of staging a partition
#[derive(Debug)]
pub struct StagedReads {
    pub inputs: StagedInputs,
    /// Reads written per mate file
    pub reads: u64,
}

/// Buffers a partition's reads into its local staging file(s).
///
/// Mate 1 and mate 2 files receive reads in input order, so the n-th read of
/// each file belongs to the same fragment.
pub struct ReadStager {
    writers: Vec<BufWriter<File>>,
    counts: [u64; 2],
    inputs: StagedInputs,
}

impl ReadStager {
    /// Create the staging file(s) for `ctx`.
    ///
    /// Each path is handed to `scratch` before it is created, so a partially
    /// staged partition is still cleaned up.
    pub fn open(ctx: &PartitionContext, scratch: &mut ScratchFiles) -> io::Result<Self> {
        let inputs = if ctx.layout.is_paired() {
            StagedInputs::Paired(ctx.staging_path(Mate::First), ctx.staging_path(Mate::Second))
        } else {
            StagedInputs::Single(ctx.staging_path(Mate::First))
        };

        let mut writers = Vec::with_capacity(2);
        for path in inputs.paths() {
            scratch.track(path);
            let file = File::create(path).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!(
                        "Partition {}: failed to create staging file '{}': {}",
                        ctx.task,
                        path.display(),
                        e
                    ),
                )
            })?;
            writers.push(BufWriter::new(file));
        }

        Ok(ReadStager {
            writers,
            counts: [0, 0],
            inputs,
        })
    }

    /// Write the lines of `record` to the stream of `mate`
    pub fn append(&mut self, record: &ReadRecord, mate: Mate) -> io::Result<()> {
        let writer = self.writers.get_mut(mate.index()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot stage a second mate for a single-end partition",
            )
        })?;

        for line in record.lines() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        self.counts[mate.index()] += 1;
        Ok(())
    }

    /// Stage every read of one fragment
    pub fn append_fragment(&mut self, fragment: &Fragment) -> io::Result<()> {
        match fragment {
            Fragment::Single(read) => self.append(read, Mate::First),
            Fragment::Paired(mate1, mate2) => {
                self.append(mate1, Mate::First)?;
                self.append(mate2, Mate::Second)
            }
        }
    }

    /// Flush and close the staging file(s)
    pub fn finish(self) -> io::Result<StagedReads> {
        for mut writer in self.writers {
            writer.flush()?;
        }

        if let StagedInputs::Paired(..) = self.inputs {
            if self.counts[0] != self.counts[1] {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Mate files out of sync: {} reads for mate 1, {} for mate 2",
                        self.counts[0], self.counts[1]
                    ),
                ));
            }
        }

        Ok(StagedReads {
            inputs: self.inputs,
            reads: self.counts[0],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadLayout;
    use std::fs;
    use tempfile::TempDir;

    const READ_1: &str = "@r1/1<sep>ACGT<sep>+<sep>IIII<part>@r1/2<sep>TGCA<sep>+<sep>JJJJ";
    const READ_2: &str = "@r2/1<sep>GGGG<sep>+<sep>KKKK<part>@r2/2<sep>CCCC<sep>+<sep>LLLL";
    const READ_3: &str = "@r3/1<sep>AAAA<sep>+<sep>MMMM<part>@r3/2<sep>TTTT<sep>+<sep>NNNN";

    #[test]
    fn test_paired_staging_keeps_mates_aligned() -> io::Result<()> {
        let dir = TempDir::new()?;
        let ctx = PartitionContext::new(0, 42, ReadLayout::Paired, dir.path());
        let mut scratch = ScratchFiles::new();

        let mut stager = ReadStager::open(&ctx, &mut scratch)?;
        for line in [READ_1, READ_2, READ_3] {
            stager.append_fragment(&Fragment::parse(line, true)?)?;
        }
        let staged = stager.finish()?;
        assert_eq!(staged.reads, 3);

        let mate1 = fs::read_to_string(staged.inputs.path(Mate::First).unwrap())?;
        let mate2 = fs::read_to_string(staged.inputs.path(Mate::Second).unwrap())?;
        let mate1: Vec<&str> = mate1.lines().collect();
        let mate2: Vec<&str> = mate2.lines().collect();
        assert_eq!(mate1.len(), 12);
        assert_eq!(mate2.len(), 12);

        for (read_idx, (h1, h2)) in mate1.iter().step_by(4).zip(mate2.iter().step_by(4)).enumerate() {
            assert_eq!(h1.trim_end_matches("/1"), h2.trim_end_matches("/2"));
            assert_eq!(*h1, format!("@r{}/1", read_idx + 1));
        }

        assert_eq!(scratch.paths().len(), 2);
        Ok(())
    }

    #[test]
    fn test_single_staging_writes_lines_verbatim() -> io::Result<()> {
        let dir = TempDir::new()?;
        let ctx = PartitionContext::new(1, 9, ReadLayout::Single, dir.path());
        let mut scratch = ScratchFiles::new();

        let mut stager = ReadStager::open(&ctx, &mut scratch)?;
        stager.append_fragment(&Fragment::parse("@a<sep>AC<sep>+<sep>II", false)?)?;
        stager.append_fragment(&Fragment::parse("@b<sep>GT<sep>+<sep>JJ", false)?)?;
        let staged = stager.finish()?;

        assert_eq!(staged.inputs, StagedInputs::Single(ctx.staging_path(Mate::First)));
        let content = fs::read_to_string(ctx.staging_path(Mate::First))?;
        assert_eq!(content, "@a\nAC\n+\nII\n@b\nGT\n+\nJJ\n");
        assert!(!ctx.staging_path(Mate::Second).exists());
        Ok(())
    }

    #[test]
    fn test_second_mate_on_single_layout_fails() -> io::Result<()> {
        let dir = TempDir::new()?;
        let ctx = PartitionContext::new(0, 1, ReadLayout::Single, dir.path());
        let mut scratch = ScratchFiles::new();
        let mut stager = ReadStager::open(&ctx, &mut scratch)?;

        let record = ReadRecord::new(vec!["@a", "AC", "+", "II"]);
        let err = stager.append(&record, Mate::Second).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        Ok(())
    }

    #[test]
    fn test_unbalanced_mates_are_rejected() -> io::Result<()> {
        let dir = TempDir::new()?;
        let ctx = PartitionContext::new(0, 1, ReadLayout::Paired, dir.path());
        let mut scratch = ScratchFiles::new();
        let mut stager = ReadStager::open(&ctx, &mut scratch)?;

        stager.append(&ReadRecord::new(vec!["@a", "AC", "+", "II"]), Mate::First)?;
        let err = stager.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // The guard still owns both staging files
        drop(scratch);
        assert!(!ctx.staging_path(Mate::First).exists());
        assert!(!ctx.staging_path(Mate::Second).exists());
        Ok(())
    }

    #[test]
    fn test_open_fails_for_missing_tmp_dir() {
        let ctx = PartitionContext::new(0, 1, ReadLayout::Single, "/nonexistent/bigbwa/tmp");
        let mut scratch = ScratchFiles::new();
        assert!(ReadStager::open(&ctx, &mut scratch).is_err());
    }
}
