// Invocation planning for the BWA alignment engine
//
// Every BWA run is described as an immutable, ordered argument list built and
// checked by `EngineCommandBuilder`. BWA parses its arguments positionally, so the
// order produced here is the order the engine receives.

use crate::config::{Algorithm, ReadLayout};
use crate::partition::PartitionContext;
use crate::read::Mate;
use crate::stager::StagedInputs;
use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Program name placed in argv[0] of every step
pub const ENGINE_NAME: &str = "bwa";

pub const OUTPUT_FLAG: &str = "-f";
pub const THREADS_FLAG: &str = "-t";
/// Read group flag of `bwa mem`
pub const MEM_READ_GROUP_FLAG: &str = "-R";
/// Read group flag of `bwa sampe`
pub const SAMPE_READ_GROUP_FLAG: &str = "-r";

/// Alignment strategy of a job, with the layout wherever it changes the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// `bwa mem`, one step for either layout
    Mem,
    /// `bwa bwasw`, one step for either layout
    Bwasw,
    /// `bwa aln` per mate, then `bwa sampe`
    AlnPaired,
    /// `bwa aln`, then `bwa samse`
    AlnSingle,
}

impl Variant {
    pub fn resolve(algorithm: Algorithm, layout: ReadLayout) -> Self {
        match (algorithm, layout) {
            (Algorithm::Mem, _) => Variant::Mem,
            (Algorithm::Bwasw, _) => Variant::Bwasw,
            (Algorithm::Aln, ReadLayout::Paired) => Variant::AlnPaired,
            (Algorithm::Aln, ReadLayout::Single) => Variant::AlnSingle,
        }
    }
}

/// BWA subcommands the orchestrator knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand {
    Mem,
    Bwasw,
    Aln,
    Sampe,
    Samse,
}

impl SubCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            SubCommand::Mem => "mem",
            SubCommand::Bwasw => "bwasw",
            SubCommand::Aln => "aln",
            SubCommand::Sampe => "sampe",
            SubCommand::Samse => "samse",
        }
    }

    /// Accepted number of positional inputs after the index
    fn input_range(self) -> (usize, usize) {
        match self {
            SubCommand::Mem | SubCommand::Bwasw => (1, 2),
            SubCommand::Aln => (1, 1),
            // sai + fastq
            SubCommand::Samse => (2, 2),
            // sai1 + sai2 + fastq1 + fastq2
            SubCommand::Sampe => (4, 4),
        }
    }

    fn allowed_options(self) -> &'static [&'static str] {
        match self {
            SubCommand::Mem => &[THREADS_FLAG, MEM_READ_GROUP_FLAG],
            SubCommand::Sampe => &[SAMPE_READ_GROUP_FLAG],
            SubCommand::Bwasw | SubCommand::Aln | SubCommand::Samse => &[],
        }
    }
}

impl fmt::Display for SubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One engine run: its full argument list and the file it is expected to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationStep {
    subcommand: SubCommand,
    args: Vec<String>,
    output: PathBuf,
}

impl InvocationStep {
    pub fn subcommand(&self) -> SubCommand {
        self.subcommand
    }

    /// Complete argument list, starting with the engine name
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Arguments after the engine name, as passed to the executable
    pub fn engine_args(&self) -> &[String] {
        &self.args[1..]
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl fmt::Display for InvocationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Builds an [`InvocationStep`], rejecting argument lists that do not match the
/// shape `bwa <sub> -f <out> [options] <index> <inputs...>` for the subcommand.
#[derive(Debug)]
pub struct EngineCommandBuilder {
    subcommand: SubCommand,
    output: Option<PathBuf>,
    options: Vec<(&'static str, String)>,
    index: Option<PathBuf>,
    inputs: Vec<PathBuf>,
}

impl EngineCommandBuilder {
    pub fn new(subcommand: SubCommand) -> Self {
        EngineCommandBuilder {
            subcommand,
            output: None,
            options: Vec::new(),
            index: None,
            inputs: Vec::new(),
        }
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn option(mut self, flag: &'static str, value: impl Into<String>) -> Self {
        self.options.push((flag, value.into()));
        self
    }

    pub fn index(mut self, path: impl Into<PathBuf>) -> Self {
        self.index = Some(path.into());
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn build(self) -> io::Result<InvocationStep> {
        let sub = self.subcommand;
        let output = self.output.ok_or_else(|| shape_error(sub, "missing output path"))?;
        let index = self.index.ok_or_else(|| shape_error(sub, "missing index path"))?;

        let (min_inputs, max_inputs) = sub.input_range();
        if self.inputs.len() < min_inputs || self.inputs.len() > max_inputs {
            return Err(shape_error(
                sub,
                &format!(
                    "expected {}..={} input files, got {}",
                    min_inputs,
                    max_inputs,
                    self.inputs.len()
                ),
            ));
        }

        for (i, (flag, value)) in self.options.iter().enumerate() {
            if !sub.allowed_options().contains(flag) {
                return Err(shape_error(sub, &format!("option {} is not accepted", flag)));
            }
            if value.is_empty() {
                return Err(shape_error(sub, &format!("option {} has an empty value", flag)));
            }
            if self.options[..i].iter().any(|(seen, _)| seen == flag) {
                return Err(shape_error(sub, &format!("option {} given twice", flag)));
            }
        }

        let mut args = Vec::with_capacity(5 + 2 * self.options.len() + self.inputs.len());
        args.push(ENGINE_NAME.to_string());
        args.push(sub.as_str().to_string());
        args.push(OUTPUT_FLAG.to_string());
        args.push(path_arg(&output)?);
        for (flag, value) in self.options {
            args.push(flag.to_string());
            args.push(value);
        }
        args.push(path_arg(&index)?);
        for input in &self.inputs {
            args.push(path_arg(input)?);
        }

        Ok(InvocationStep {
            subcommand: sub,
            args,
            output,
        })
    }
}

fn shape_error(sub: SubCommand, msg: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Invalid bwa {} invocation: {}", sub, msg),
    )
}

fn path_arg(path: &Path) -> io::Result<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Path is not valid UTF-8: {}", path.display()),
        )
    })
}

/// Ordered engine runs for one partition
#[derive(Debug, Clone)]
pub struct AlignmentPlan {
    pub steps: Vec<InvocationStep>,
    /// SAM file written by the last step
    pub final_output: PathBuf,
    /// `.sai` files consumed by the pairing/resolution step
    pub intermediates: Vec<PathBuf>,
}

impl AlignmentPlan {
    /// Every local file the plan may create
    pub fn local_artifacts(&self) -> impl Iterator<Item = &Path> {
        self.intermediates
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.final_output.as_path()))
    }
}

/// Build the engine runs for one partition.
///
/// `threads` only reaches `bwa mem`; a read group only reaches `bwa mem` and
/// `bwa sampe`, and only when non-empty.
pub fn plan(
    variant: Variant,
    ctx: &PartitionContext,
    index: &Path,
    staged: &StagedInputs,
    threads: Option<NonZeroUsize>,
    read_group: Option<&str>,
) -> io::Result<AlignmentPlan> {
    let read_group = read_group.filter(|rg| !rg.is_empty());
    let final_output = ctx.local_output_path();

    let steps = match (variant, staged) {
        (Variant::Mem, _) => {
            let mut builder = EngineCommandBuilder::new(SubCommand::Mem).output(&final_output);
            if let Some(threads) = threads {
                builder = builder.option(THREADS_FLAG, threads.to_string());
            }
            if let Some(rg) = read_group {
                builder = builder.option(MEM_READ_GROUP_FLAG, rg);
            }
            vec![with_reads(builder.index(index), staged).build()?]
        }
        (Variant::Bwasw, _) => {
            let builder = EngineCommandBuilder::new(SubCommand::Bwasw)
                .output(&final_output)
                .index(index);
            vec![with_reads(builder, staged).build()?]
        }
        (Variant::AlnPaired, StagedInputs::Paired(mate1, mate2)) => {
            let sai1 = ctx.index_artifact_path(Mate::First);
            let sai2 = ctx.index_artifact_path(Mate::Second);

            let mut pairing = EngineCommandBuilder::new(SubCommand::Sampe).output(&final_output);
            if let Some(rg) = read_group {
                pairing = pairing.option(SAMPE_READ_GROUP_FLAG, rg);
            }

            vec![
                aln_step(&sai1, index, mate1)?,
                aln_step(&sai2, index, mate2)?,
                pairing
                    .index(index)
                    .input(&sai1)
                    .input(&sai2)
                    .input(mate1)
                    .input(mate2)
                    .build()?,
            ]
        }
        (Variant::AlnSingle, StagedInputs::Single(reads)) => {
            let sai = ctx.index_artifact_path(Mate::First);
            vec![
                aln_step(&sai, index, reads)?,
                EngineCommandBuilder::new(SubCommand::Samse)
                    .output(&final_output)
                    .index(index)
                    .input(&sai)
                    .input(reads)
                    .build()?,
            ]
        }
        (Variant::AlnPaired, StagedInputs::Single(_))
        | (Variant::AlnSingle, StagedInputs::Paired(..)) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Partition {}: variant {:?} does not match the staged read layout",
                    ctx.task, variant
                ),
            ));
        }
    };

    let intermediates = steps
        .iter()
        .filter(|step| step.subcommand() == SubCommand::Aln)
        .map(|step| step.output().to_path_buf())
        .collect();

    Ok(AlignmentPlan {
        steps,
        final_output,
        intermediates,
    })
}

fn aln_step(sai: &Path, index: &Path, reads: &Path) -> io::Result<InvocationStep> {
    EngineCommandBuilder::new(SubCommand::Aln)
        .output(sai)
        .index(index)
        .input(reads)
        .build()
}

fn with_reads(builder: EngineCommandBuilder, staged: &StagedInputs) -> EngineCommandBuilder {
    staged
        .paths()
        .into_iter()
        .fold(builder, |builder, path| builder.input(path))
}
