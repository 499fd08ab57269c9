use bigbwa::commands::align::run_align;
use bigbwa::commands::merge::run_merge;
use bigbwa::commands::prepare::run_prepare;
use bigbwa::config::{Algorithm, JobConfig, ReadLayout};
use clap::Parser;
use log::info;
use rayon::ThreadPoolBuilder;
use std::io;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Number of threads for parallel processing (partitions aligned at once).
    #[clap(short = 't', long, value_parser, default_value_t = default_threads())]
    num_threads: NonZeroUsize,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

fn default_threads() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

/// Split FASTQ reads into partitions, align each with BWA and merge the results.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Align a fragment file partition by partition
    Align {
        #[clap(flatten)]
        common: CommonOpts,

        /// Fragment file, one read or read pair per line (see `prepare`)
        #[clap(short = 'i', long, value_parser)]
        input: PathBuf,

        /// Output directory for partition results; must not exist or be empty
        #[clap(short = 'o', long, value_parser)]
        output_dir: PathBuf,

        /// BWA index prefix
        #[clap(short = 'x', long, value_parser)]
        index: PathBuf,

        /// BWA algorithm: mem, aln or bwasw
        #[clap(short = 'a', long, value_parser, default_value = "mem")]
        algorithm: String,

        /// Read layout: paired or single
        #[clap(short = 'l', long, value_parser, default_value = "paired")]
        layout: String,

        /// Merge partition outputs into a single FinalOutput.sam
        #[clap(short = 'r', long, action)]
        use_reducer: bool,

        /// Threads for each `bwa mem` run
        #[clap(long, value_parser)]
        bwa_threads: Option<NonZeroUsize>,

        /// Read group header line, e.g. '@RG\tID:foo\tSM:bar'
        #[clap(long, value_parser)]
        read_group: Option<String>,

        /// Desired number of partitions (default: one per 128 MiB of input)
        #[clap(short = 'n', long, value_parser)]
        partitions: Option<NonZeroU64>,

        /// Local directory for staged reads and intermediate files
        #[clap(long, value_parser)]
        tmp_dir: Option<PathBuf>,

        /// Path to the bwa executable
        #[clap(long, value_parser, default_value = "bwa")]
        bwa_path: PathBuf,

        /// Job identifier used in local file names (default: process id)
        #[clap(long, value_parser)]
        job_id: Option<u32>,
    },
    /// Convert FASTQ files into a fragment file
    Prepare {
        #[clap(flatten)]
        common: CommonOpts,

        /// FASTQ file with first mates (or single-end reads); .gz/.bgz read as BGZF
        #[clap(short = '1', long, value_parser)]
        mate1: PathBuf,

        /// FASTQ file with second mates
        #[clap(short = '2', long, value_parser)]
        mate2: Option<PathBuf>,

        /// Output fragment file
        #[clap(short = 'o', long, value_parser)]
        output: PathBuf,
    },
    /// Merge partition outputs listed in a manifest
    Merge {
        #[clap(flatten)]
        common: CommonOpts,

        /// Manifest written by `align --use-reducer`
        #[clap(short = 'm', long, value_parser)]
        manifest: PathBuf,

        /// Merged SAM file
        #[clap(short = 'o', long, value_parser)]
        output: PathBuf,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Align {
            common,
            input,
            output_dir,
            index,
            algorithm,
            layout,
            use_reducer,
            bwa_threads,
            read_group,
            partitions,
            tmp_dir,
            bwa_path,
            job_id,
        } => {
            initialize(&common)?;
            let defaults = JobConfig::default();
            let config = JobConfig {
                input,
                output_dir,
                index_path: index,
                algorithm: Algorithm::parse(&algorithm)?,
                layout: ReadLayout::parse(&layout)?,
                use_reducer,
                bwa_threads,
                read_group,
                partitions,
                tmp_dir: tmp_dir.unwrap_or(defaults.tmp_dir),
                engine: bwa_path,
                job_id: job_id.unwrap_or(defaults.job_id),
            };
            let summary = run_align(&config)?;
            info!(
                "Aligned {} reads in {} partitions into {}",
                summary.reads,
                summary.partitions,
                config.output_dir.display()
            );
        }
        Args::Prepare {
            common,
            mate1,
            mate2,
            output,
        } => {
            initialize(&common)?;
            run_prepare(&mate1, mate2.as_deref(), &output, common.num_threads)?;
        }
        Args::Merge {
            common,
            manifest,
            output,
        } => {
            initialize(&common)?;
            run_merge(&manifest, &output)?;
        }
    }

    Ok(())
}

fn initialize(common: &CommonOpts) -> io::Result<()> {
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    // Configure thread pool
    ThreadPoolBuilder::new()
        .num_threads(common.num_threads.into())
        .build_global()
        .map_err(|e| io::Error::other(format!("Failed to build thread pool: {}", e)))
}
