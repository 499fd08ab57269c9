// Prepare command: turn FASTQ files into the one-fragment-per-line input of `align`

use crate::read::{join_fragment, LINES_PER_READ, LINE_SEPARATOR, MATE_SEPARATOR};
use log::info;
use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Instant;

/// Open a FASTQ file, reading BGZF-compressed input for `.gz`/`.bgz` names
fn open_fastq(path: &Path, num_threads: NonZeroUsize) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("Failed to open FASTQ file '{}': {}", path.display(), e),
        )
    })?;

    let name = path.to_string_lossy();
    let reader: Box<dyn io::Read> = if [".gz", ".bgz"].iter().any(|e| name.ends_with(e)) {
        Box::new(bgzf::io::MultithreadedReader::with_worker_count(num_threads, file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Read the next record as its four lines, `None` at a clean end of file
fn next_record(reader: &mut dyn BufRead, path: &Path) -> io::Result<Option<Vec<String>>> {
    let mut lines = Vec::with_capacity(LINES_PER_READ);
    let mut line = String::new();
    while lines.len() < LINES_PER_READ {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.contains(LINE_SEPARATOR) || trimmed.contains(MATE_SEPARATOR) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "'{}' contains a reserved separator in line '{}'",
                    path.display(),
                    trimmed
                ),
            ));
        }
        lines.push(trimmed.to_string());
    }

    match lines.len() {
        0 => Ok(None),
        LINES_PER_READ => Ok(Some(lines)),
        n => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Truncated FASTQ record at end of '{}' ({} of {} lines)",
                path.display(),
                n,
                LINES_PER_READ
            ),
        )),
    }
}

/// Run prepare command. Returns the number of fragments written.
pub fn run_prepare(
    mate1: &Path,
    mate2: Option<&Path>,
    output: &Path,
    num_threads: NonZeroUsize,
) -> io::Result<u64> {
    let start_time = Instant::now();
    let mut reader1 = open_fastq(mate1, num_threads)?;
    let mut reader2 = match mate2 {
        Some(path) => Some((open_fastq(path, num_threads)?, path)),
        None => None,
    };
    let mut writer = BufWriter::new(File::create(output)?);

    let mut fragments = 0u64;
    loop {
        let first = next_record(reader1.as_mut(), mate1)?;
        let line = match reader2.as_mut() {
            None => match first {
                Some(read) => join_fragment(&read, None),
                None => break,
            },
            Some((reader, path)) => match (first, next_record(reader.as_mut(), *path)?) {
                (Some(read1), Some(read2)) => join_fragment(&read1, Some(&read2)),
                (None, None) => break,
                (Some(_), None) | (None, Some(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Mate files '{}' and '{}' have different read counts (diverged after {} reads)",
                            mate1.display(),
                            path.display(),
                            fragments
                        ),
                    ));
                }
            },
        };
        writeln!(writer, "{}", line)?;
        fragments += 1;
    }
    writer.flush()?;

    info!(
        "[prepare] {:.3}s wrote {} {} fragments to {}",
        start_time.elapsed().as_secs_f64(),
        fragments,
        if reader2.is_some() { "paired" } else { "single" },
        output.display()
    );
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::Fragment;
    use std::fs;
    use tempfile::TempDir;

    fn threads() -> NonZeroUsize {
        NonZeroUsize::new(1).unwrap()
    }

    #[test]
    fn test_prepare_paired() -> io::Result<()> {
        let dir = TempDir::new()?;
        let fq1 = dir.path().join("r_1.fq");
        let fq2 = dir.path().join("r_2.fq");
        fs::write(&fq1, "@a/1\nACGT\n+\nIIII\n@b/1\nGGGG\n+\nJJJJ\n")?;
        fs::write(&fq2, "@a/2\nTTTT\n+\nKKKK\r\n@b/2\nCCCC\n+\nLLLL")?;
        let out = dir.path().join("reads.txt");

        assert_eq!(run_prepare(&fq1, Some(fq2.as_path()), &out, threads())?, 2);
        let text = fs::read_to_string(&out)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "@a/1<sep>ACGT<sep>+<sep>IIII<part>@a/2<sep>TTTT<sep>+<sep>KKKK"
        );
        match Fragment::parse(lines[1], true)? {
            Fragment::Paired(first, second) => {
                assert_eq!(first.lines(), ["@b/1", "GGGG", "+", "JJJJ"]);
                assert_eq!(second.lines(), ["@b/2", "CCCC", "+", "LLLL"]);
            }
            other => panic!("expected paired fragment, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_prepare_single() -> io::Result<()> {
        let dir = TempDir::new()?;
        let fq = dir.path().join("r.fq");
        fs::write(&fq, "@a\nACGT\n+\nIIII\n")?;
        let out = dir.path().join("reads.txt");

        assert_eq!(run_prepare(&fq, None, &out, threads())?, 1);
        assert_eq!(fs::read_to_string(&out)?, "@a<sep>ACGT<sep>+<sep>IIII\n");
        Ok(())
    }

    #[test]
    fn test_mismatched_and_truncated_inputs_fail() -> io::Result<()> {
        let dir = TempDir::new()?;
        let fq1 = dir.path().join("r_1.fq");
        let fq2 = dir.path().join("r_2.fq");
        let out = dir.path().join("reads.txt");

        fs::write(&fq1, "@a/1\nACGT\n+\nIIII\n@b/1\nGGGG\n+\nJJJJ\n")?;
        fs::write(&fq2, "@a/2\nTTTT\n+\nKKKK\n")?;
        let err = run_prepare(&fq1, Some(fq2.as_path()), &out, threads()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("different read counts"));

        fs::write(&fq1, "@a\nACGT\n+\n")?;
        let err = run_prepare(&fq1, None, &out, threads()).unwrap_err();
        assert!(err.to_string().contains("Truncated"));

        fs::write(&fq1, "@a<part>\nACGT\n+\nIIII\n")?;
        assert!(run_prepare(&fq1, None, &out, threads()).is_err());
        Ok(())
    }
}
