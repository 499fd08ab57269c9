use crate::plan::Variant;
use log::warn;
use std::io;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::{Path, PathBuf};

/// BWA algorithm selected for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Mem,
    Aln,
    Bwasw,
}

impl Algorithm {
    /// Parse algorithm from string: "mem", "aln" or "bwasw"
    pub fn parse(s: &str) -> io::Result<Self> {
        match s.to_lowercase().as_str() {
            "mem" => Ok(Algorithm::Mem),
            "aln" => Ok(Algorithm::Aln),
            "bwasw" => Ok(Algorithm::Bwasw),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unknown algorithm: '{}'. Valid: mem, aln, bwasw", other),
            )),
        }
    }
}

/// Whether fragments carry one read or both mates of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadLayout {
    #[default]
    Paired,
    Single,
}

impl ReadLayout {
    /// Parse layout from string: "paired" or "single"
    pub fn parse(s: &str) -> io::Result<Self> {
        match s.to_lowercase().as_str() {
            "paired" => Ok(ReadLayout::Paired),
            "single" => Ok(ReadLayout::Single),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unknown read layout: '{}'. Valid: paired, single", other),
            )),
        }
    }

    pub fn is_paired(self) -> bool {
        self == ReadLayout::Paired
    }
}

/// Configuration for one alignment job
pub struct JobConfig {
    /// Fragment file to split (one fragment per line)
    pub input: PathBuf,
    /// Directory standing in for durable storage
    pub output_dir: PathBuf,
    /// BWA index prefix
    pub index_path: PathBuf,
    pub algorithm: Algorithm,
    pub layout: ReadLayout,
    /// Emit partition references and merge them into one SAM file
    pub use_reducer: bool,
    /// Threads handed to `bwa mem -t`
    pub bwa_threads: Option<NonZeroUsize>,
    /// Read-group header line handed to `-R`/`-r`
    pub read_group: Option<String>,
    /// Desired number of partitions; framework default splitting when unset
    pub partitions: Option<NonZeroU64>,
    /// Local directory for staging files and intermediate artifacts
    pub tmp_dir: PathBuf,
    /// Alignment engine executable
    pub engine: PathBuf,
    /// Job identifier used to namespace local files
    pub job_id: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            input: PathBuf::new(),
            output_dir: PathBuf::new(),
            index_path: PathBuf::new(),
            algorithm: Algorithm::Mem,
            layout: ReadLayout::Paired,
            use_reducer: false,
            bwa_threads: None,
            read_group: None,
            partitions: None,
            tmp_dir: std::env::temp_dir(),
            engine: PathBuf::from("bwa"),
            job_id: std::process::id(),
        }
    }
}

impl JobConfig {
    /// Alignment variant implied by algorithm and layout
    pub fn variant(&self) -> Variant {
        Variant::resolve(self.algorithm, self.layout)
    }

    /// Read group to pass to the engine, if one was given and is non-empty
    pub fn effective_read_group(&self) -> Option<&str> {
        self.read_group.as_deref().filter(|rg| !rg.is_empty())
    }

    /// Check everything that can be checked before any partition is dispatched
    pub fn validate(&self) -> io::Result<()> {
        if self.index_path.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No index has been provided. Aborting.",
            ));
        }
        if !bwa_index_exists(&self.index_path) {
            warn!(
                "BWA index files for '{}' not found (expected {}.bwt)",
                self.index_path.display(),
                self.index_path.display()
            );
        }

        if !self.input.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Input file '{}' not found", self.input.display()),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "An output directory must be provided",
            ));
        }
        if self.output_dir.exists() && self.output_dir.read_dir()?.next().is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "Output directory '{}' already exists and is not empty",
                    self.output_dir.display()
                ),
            ));
        }

        if !self.tmp_dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Temporary directory '{}' does not exist", self.tmp_dir.display()),
            ));
        }

        match self.read_group.as_deref() {
            Some("") => warn!("Empty read group header given, ignoring it"),
            Some(rg) if !rg.starts_with("@RG") => {
                warn!("Read group header '{}' does not start with @RG", rg)
            }
            _ => {}
        }

        if self.bwa_threads.is_some() && self.algorithm != Algorithm::Mem {
            warn!("BWA threads are only passed to bwa mem, ignoring them");
        }

        Ok(())
    }
}

fn bwa_index_exists(index_path: &Path) -> bool {
    let mut bwt = index_path.as_os_str().to_owned();
    bwt.push(".bwt");
    Path::new(&bwt).exists()
}
