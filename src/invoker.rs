use crate::plan::{AlignmentPlan, InvocationStep};
use log::{debug, info};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

/// Lines of engine stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;
/// Longer stderr lines are cut to this many bytes
const STDERR_LINE_BYTES: usize = 1024;

/// Something that can run one planned BWA step to completion
pub trait AlignmentEngine {
    /// Run `step` synchronously. The step's output file must exist on success.
    fn execute(&self, step: &InvocationStep) -> io::Result<()>;
}

/// Runs BWA as a child process
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    program: PathBuf,
    prefix_args: Vec<OsString>,
}

impl ExternalEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ExternalEngine {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Run BWA through a launcher, e.g. `sh wrapper.sh` or `singularity exec img bwa`
    pub fn with_prefix<I, S>(program: impl Into<PathBuf>, prefix_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        ExternalEngine {
            program: program.into(),
            prefix_args: prefix_args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl AlignmentEngine for ExternalEngine {
    fn execute(&self, step: &InvocationStep) -> io::Result<()> {
        debug!("Executing: {}", step);
        let start = Instant::now();

        // Every step writes through `-f`; stdout is discarded
        let mut child = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(step.engine_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to start alignment engine '{}': {}",
                        self.program.display(),
                        e
                    ),
                )
            })?;

        let tail = match child.stderr.take() {
            Some(stderr) => StderrTail::read_from(stderr),
            None => Ok(StderrTail::default()),
        };
        let status = child.wait()?;
        let tail = tail?;

        if !status.success() {
            return Err(io::Error::other(format!(
                "bwa {} failed with {}: {}",
                step.subcommand(),
                status,
                tail.render()
            )));
        }

        if !step.output().exists() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "bwa {} exited successfully but did not write '{}'",
                    step.subcommand(),
                    step.output().display()
                ),
            ));
        }

        debug!(
            "bwa {} finished in {:.3}s; stderr: {}",
            step.subcommand(),
            start.elapsed().as_secs_f64(),
            tail.render()
        );
        Ok(())
    }
}

/// Run the steps of `plan` in order, abandoning the remaining steps at the first failure
pub fn execute_plan<E: AlignmentEngine + ?Sized>(engine: &E, plan: &AlignmentPlan) -> io::Result<()> {
    let total = plan.steps.len();
    for (i, step) in plan.steps.iter().enumerate() {
        info!("Step {}/{}: bwa {}", i + 1, total, step.subcommand());
        engine.execute(step)?;
    }
    Ok(())
}

/// Last lines of an engine's stderr, bounded in line count and line length
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    current: Vec<u8>,
}

impl StderrTail {
    fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut tail = StderrTail::default();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => tail.push(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if !tail.current.is_empty() {
            tail.end_line();
        }
        Ok(tail)
    }

    fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' {
                self.end_line();
            } else if self.current.len() < STDERR_LINE_BYTES {
                self.current.push(byte);
            }
        }
    }

    fn end_line(&mut self) {
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines
            .push_back(String::from_utf8_lossy(&self.current).into_owned());
        self.current.clear();
    }

    fn render(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}
