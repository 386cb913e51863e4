//! The ancestral reconstruction engine.
//!
//! Inference happens in three calls to an engine: build ancestral haplotypes
//! from the samples, match the ancestors against each other into a tree
//! sequence, then match the samples against that tree sequence.
//! [`InferenceEngine`] is that interface; [`CommandEngine`] drives an external
//! program that implements it on the command line.
//!
//! The command protocol, one process per stage:
//!
//! ```text
//! <program> [args..] generate-ancestors --samples S --output A --threads T
//! <program> [args..] match-ancestors --samples S --ancestors A \
//!     --recombination-rates R --mutation-rate M --precision P --threads T --output O
//! <program> [args..] match-samples --samples S --ancestors-trees AT \
//!     --recombination-rates R --mutation-rate M --precision P --threads T --output O
//! ```
//!
//! `R` holds one rate per line, `AT` and `O` are tree sequences in the
//! format of [`TreeSequence::dump`].

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use thiserror::Error;

use crate::file::OutputFile;
use crate::rates::RateArray;
use crate::samples::SampleData;
use crate::trees::{TreeSequence, TreeSequenceError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{program} {command}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        command: String,
        status: String,
        stderr: String,
    },
    #[error("engine did not write {0}")]
    MissingOutput(PathBuf),
    #[error("sample data has no path for the engine to read")]
    NoSamplePath,
    #[error("{0}")]
    TreeSequence(#[from] TreeSequenceError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// Parameters of the two matching stages.
#[derive(Clone, Copy, Debug)]
pub struct MatchParams<'a> {
    pub recombination_rates: &'a RateArray,
    pub mutation_rate: f64,
    pub precision: u32,
    /// Worker threads; 0 lets the engine decide.
    pub num_threads: usize,
}

pub trait InferenceEngine {
    /// Handle to a generated ancestor set.
    type Ancestors;

    /// Build the ancestors of `samples`, storing them at `path`.
    fn generate_ancestors(
        &mut self,
        samples: &SampleData,
        num_threads: usize,
        path: &Path,
    ) -> Result<Self::Ancestors, EngineError>;

    /// Match the ancestors against each other.
    fn match_ancestors(
        &mut self,
        samples: &SampleData,
        ancestors: &Self::Ancestors,
        params: &MatchParams<'_>,
    ) -> Result<TreeSequence, EngineError>;

    /// Match the samples against the ancestors' tree sequence.
    fn match_samples(
        &mut self,
        samples: &SampleData,
        ancestors_ts: &TreeSequence,
        params: &MatchParams<'_>,
    ) -> Result<TreeSequence, EngineError>;
}

/// An ancestor set written by an external engine.
#[derive(Clone, Debug, PartialEq)]
pub struct AncestorFile {
    pub path: PathBuf,
}

/// Runs an external program once per stage.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
    /// Set when the engine created its own scratch directory; dropping it
    /// removes the directory.
    _temp_dir: Option<TempDir>,
}

impl CommandEngine {
    /// Create an engine that exchanges files through `scratch_dir`.
    ///
    /// # Arguments
    ///
    /// * `program`: the engine executable, looked up on `PATH` if not a path.
    /// * `args`: arguments placed before the stage name on every call.
    /// * `scratch_dir`: directory for the rate and tree sequence files
    ///   exchanged with the program. It is created if missing and is owned by
    ///   the caller: the engine never removes it.
    pub fn new(
        program: &str,
        args: Vec<String>,
        scratch_dir: impl AsRef<Path>,
    ) -> Result<Self, EngineError> {
        fs::create_dir_all(scratch_dir.as_ref())?;
        Ok(Self {
            program: program.to_string(),
            args,
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
            _temp_dir: None,
        })
    }

    /// Like [`CommandEngine::new`], with a fresh `tsinfer-rates-*` scratch
    /// directory under the system temp directory that is removed when the
    /// engine is dropped.
    pub fn with_temp_scratch(program: &str, args: Vec<String>) -> Result<Self, EngineError> {
        let temp_dir = tempfile::Builder::new()
            .prefix("tsinfer-rates-")
            .tempdir()?;
        log::debug!("engine scratch directory {}", temp_dir.path().display());
        Ok(Self {
            program: program.to_string(),
            args,
            scratch_dir: temp_dir.path().to_path_buf(),
            _temp_dir: Some(temp_dir),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn run(&self, command: &str, options: Vec<OsString>) -> Result<(), EngineError> {
        log::debug!("running {} {:?} {} {:?}", self.program, self.args, command, options);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .args(&options)
            .output()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(EngineError::Failed {
                program: self.program.clone(),
                command: command.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            log::debug!("{} {}: {}", self.program, command, stderr);
        }
        Ok(())
    }

    fn write_rates(&self, rates: &RateArray) -> Result<PathBuf, EngineError> {
        let path = self.scratch_dir.join("recombination_rates.txt");
        let mut writer = OutputFile::new(&path, None).writer()?;
        for rate in rates.values() {
            writeln!(writer, "{}", rate)?;
        }
        writer.flush()?;
        Ok(path)
    }

    fn match_options(
        &self,
        samples: &SampleData,
        params: &MatchParams<'_>,
        output: &Path,
    ) -> Result<Vec<OsString>, EngineError> {
        let rates = self.write_rates(params.recombination_rates)?;
        Ok(vec![
            "--samples".into(),
            sample_path(samples)?.into(),
            "--recombination-rates".into(),
            rates.into(),
            "--mutation-rate".into(),
            params.mutation_rate.to_string().into(),
            "--precision".into(),
            params.precision.to_string().into(),
            "--threads".into(),
            params.num_threads.to_string().into(),
            "--output".into(),
            output.into(),
        ])
    }

    fn load_output(path: &Path) -> Result<TreeSequence, EngineError> {
        if !path.exists() {
            return Err(EngineError::MissingOutput(path.to_path_buf()));
        }
        Ok(TreeSequence::load(path)?)
    }
}

fn sample_path(samples: &SampleData) -> Result<PathBuf, EngineError> {
    samples
        .path()
        .map(Path::to_path_buf)
        .ok_or(EngineError::NoSamplePath)
}

impl InferenceEngine for CommandEngine {
    type Ancestors = AncestorFile;

    fn generate_ancestors(
        &mut self,
        samples: &SampleData,
        num_threads: usize,
        path: &Path,
    ) -> Result<AncestorFile, EngineError> {
        let options = vec![
            "--samples".into(),
            sample_path(samples)?.into(),
            "--output".into(),
            path.into(),
            "--threads".into(),
            num_threads.to_string().into(),
        ];
        self.run("generate-ancestors", options)?;
        if !path.exists() {
            return Err(EngineError::MissingOutput(path.to_path_buf()));
        }
        Ok(AncestorFile {
            path: path.to_path_buf(),
        })
    }

    fn match_ancestors(
        &mut self,
        samples: &SampleData,
        ancestors: &AncestorFile,
        params: &MatchParams<'_>,
    ) -> Result<TreeSequence, EngineError> {
        let output = self.scratch_dir.join("match_ancestors.trees");
        let mut options = self.match_options(samples, params, &output)?;
        options.push("--ancestors".into());
        options.push(ancestors.path.clone().into());
        self.run("match-ancestors", options)?;
        Self::load_output(&output)
    }

    fn match_samples(
        &mut self,
        samples: &SampleData,
        ancestors_ts: &TreeSequence,
        params: &MatchParams<'_>,
    ) -> Result<TreeSequence, EngineError> {
        let ancestors_trees = self.scratch_dir.join("ancestors.trees");
        ancestors_ts.dump(&ancestors_trees)?;
        let output = self.scratch_dir.join("match_samples.trees");
        let mut options = self.match_options(samples, params, &output)?;
        options.push("--ancestors-trees".into());
        options.push(ancestors_trees.into());
        self.run("match-samples", options)?;
        Self::load_output(&output)
    }
}
