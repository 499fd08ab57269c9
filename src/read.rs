use std::io;

/// Separator between the lines of one read inside a fragment line
pub const LINE_SEPARATOR: &str = "<sep>";

/// Separator between mate 1 and mate 2 inside a paired fragment line
pub const MATE_SEPARATOR: &str = "<part>";

/// Number of lines that make up one FASTQ read
pub const LINES_PER_READ: usize = 4;

/// Mate index of a read within its fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mate {
    First,
    Second,
}

impl Mate {
    pub fn index(self) -> usize {
        match self {
            Mate::First => 0,
            Mate::Second => 1,
        }
    }
}

/// One sequencing read as the ordered lines the aligner expects.
///
/// Lines are kept exactly as received; nothing checks that a record is a
/// well-formed FASTQ entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord<'a> {
    lines: Vec<&'a str>,
}

impl<'a> ReadRecord<'a> {
    pub fn new(lines: Vec<&'a str>) -> Self {
        ReadRecord { lines }
    }

    /// Split a `<sep>`-joined read back into its lines
    pub fn from_joined(joined: &'a str) -> Self {
        ReadRecord {
            lines: joined.split(LINE_SEPARATOR).collect(),
        }
    }

    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }
}

/// The unit carried by one input line: a single read, or both mates of a pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment<'a> {
    Single(ReadRecord<'a>),
    Paired(ReadRecord<'a>, ReadRecord<'a>),
}

impl<'a> Fragment<'a> {
    /// Parse one input line.
    ///
    /// Paired lines must contain a `<part>` separator; anything after a second
    /// separator belongs to mate 2 unchanged.
    pub fn parse(line: &'a str, paired: bool) -> io::Result<Self> {
        if !paired {
            return Ok(Fragment::Single(ReadRecord::from_joined(line)));
        }

        match line.split_once(MATE_SEPARATOR) {
            Some((mate1, mate2)) => Ok(Fragment::Paired(
                ReadRecord::from_joined(mate1),
                ReadRecord::from_joined(mate2),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Paired fragment without '{}' separator: '{}'",
                    MATE_SEPARATOR,
                    truncate_for_display(line)
                ),
            )),
        }
    }
}

/// Render one fragment line in the `<sep>`/`<part>` format
pub fn join_fragment(mate1: &[String], mate2: Option<&[String]>) -> String {
    let mut line = mate1.join(LINE_SEPARATOR);
    if let Some(mate2) = mate2 {
        line.push_str(MATE_SEPARATOR);
        line.push_str(&mate2.join(LINE_SEPARATOR));
    }
    line
}

fn truncate_for_display(line: &str) -> &str {
    match line.char_indices().nth(80) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
