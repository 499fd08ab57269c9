use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// The last split may be up to 10% larger than the split size instead of leaving a
/// tiny trailing split
pub const SPLIT_SLOP: f64 = 1.1;

/// Byte range of the input assigned to one partition.
///
/// Ranges start at the beginning of a line and end just after a newline (or at
/// end of file), so no fragment line is ever cut in two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSplit {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl InputSplit {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Cut `path` into line-aligned splits of roughly `split_size` bytes
pub fn compute_splits(path: &Path, split_size: u64) -> io::Result<Vec<InputSplit>> {
    let split_size = split_size.max(1);
    let total = std::fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);

    let mut splits = Vec::new();
    let mut line = Vec::new();
    let mut start = 0;
    while start < total {
        let remaining = total - start;
        let end = if remaining as f64 / split_size as f64 > SPLIT_SLOP {
            // Extend the cut to the end of the line holding its last byte
            let last_byte = start + split_size - 1;
            reader.seek(SeekFrom::Start(last_byte))?;
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            last_byte + read as u64
        } else {
            total
        };

        splits.push(InputSplit {
            index: splits.len() as u32,
            start,
            end,
        });
        start = end;
    }

    Ok(splits)
}

/// Reader over exactly the lines of `split`
pub fn open_split(path: &Path, split: &InputSplit) -> io::Result<impl BufRead> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(split.start))?;
    Ok(BufReader::new(file.take(split.len())))
}
