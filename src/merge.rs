use crate::partition::PartitionOutputRef;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// SAM header lines start with this byte
pub const HEADER_MARKER: u8 = b'@';

/// Counts of what the merge wrote
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub files: usize,
    pub header_lines: usize,
    pub records: usize,
}

/// Everything needed to re-run the merge stage after the partitions finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeManifest {
    /// Partition keys `0..expected_partitions` must all be present
    pub expected_partitions: u32,
    pub references: Vec<PartitionOutputRef>,
}

impl MergeManifest {
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| io::Error::other(format!("Failed to serialize merge manifest: {:?}", e)))?;
        writer.flush()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(
            |e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Failed to deserialize merge manifest '{}': {:?}",
                        path.display(),
                        e
                    ),
                )
            },
        )
    }
}

/// Index partition references by key; a key may appear only once
pub fn collect_references<I>(references: I) -> io::Result<FxHashMap<u32, PathBuf>>
where
    I: IntoIterator<Item = PartitionOutputRef>,
{
    let mut by_key = FxHashMap::default();
    for reference in references {
        if let Some(previous) = by_key.insert(reference.partition, reference.path) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Partition {} has more than one output (already had '{}')",
                    reference.partition,
                    previous.display()
                ),
            ));
        }
    }
    Ok(by_key)
}

/// Concatenate partition outputs `0..expected` in key order into `writer`.
///
/// The first file is copied whole; from every later file the header lines are
/// dropped. Source files are deleted only after the whole output has been
/// written and flushed, so a failed merge leaves every source in place. A missing
/// or unexpected key fails the merge before any file is read.
pub fn merge_outputs<W: Write>(
    references: &FxHashMap<u32, PathBuf>,
    expected: u32,
    writer: &mut W,
) -> io::Result<MergeStats> {
    check_references(references, expected)?;

    let mut stats = MergeStats::default();
    let mut line = Vec::new();
    for key in 0..expected {
        let path = &references[&key];
        let keep_header = key == 0;
        let mut reader = BufReader::new(File::open(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to open output of partition {} '{}': {}", key, path.display(), e),
            )
        })?);

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.first() == Some(&HEADER_MARKER) {
                if !keep_header {
                    continue;
                }
                stats.header_lines += 1;
            } else {
                stats.records += 1;
            }
            writer.write_all(&line)?;
            if line.last() != Some(&b'\n') {
                writer.write_all(b"\n")?;
            }
        }
        stats.files += 1;
    }
    writer.flush()?;

    // Sources go only once every record is in the flushed output
    for key in 0..expected {
        let path = &references[&key];
        match fs::remove_file(path) {
            Ok(()) => debug!("Merged and removed {}", path.display()),
            Err(e) => warn!("Failed to remove merged file {}: {}", path.display(), e),
        }
    }

    info!(
        "Merged {} partition outputs: {} header lines, {} records",
        stats.files, stats.header_lines, stats.records
    );
    Ok(stats)
}

fn check_references(references: &FxHashMap<u32, PathBuf>, expected: u32) -> io::Result<()> {
    let missing: Vec<u32> = (0..expected)
        .filter(|key| !references.contains_key(key))
        .collect();
    if !missing.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Missing output for partition(s) {:?} of {}; refusing to merge",
                missing, expected
            ),
        ));
    }

    let mut unexpected: Vec<u32> = references
        .keys()
        .copied()
        .filter(|&key| key >= expected)
        .collect();
    if !unexpected.is_empty() {
        unexpected.sort_unstable();
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Unexpected partition key(s) {:?}, only 0..{} were dispatched",
                unexpected, expected
            ),
        ));
    }

    for key in 0..expected {
        let path = &references[&key];
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Output of partition {} '{}' not found", key, path.display()),
            ));
        }
    }

    Ok(())
}
