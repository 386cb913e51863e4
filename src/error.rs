//! Errors for an inference run.
//!
//! Lower layers keep their own error types ([`RecMapError`], [`FileError`],
//! [`TreeSequenceError`], [`EngineError`]); [`InferError`] gathers them together
//! with the run-level failure classes. Every variant is fatal to a run.

use std::io;
use thiserror::Error;

use crate::engine::EngineError;
use crate::file::FileError;
use crate::pipeline::Stage;
use crate::recmap::RecMapError;
use crate::trees::TreeSequenceError;

#[derive(Error, Debug)]
pub enum InferError {
    /// Bad input filename, missing input, malformed settings.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// An external resource (the genetic map service) could not be reached.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    /// A rate that feeds a logarithm is zero, negative or not finite.
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    #[error("Engine failure during {stage}: {source}")]
    Engine {
        stage: Stage,
        #[source]
        source: EngineError,
    },
    #[error("Invalid sample data: {0}")]
    SampleData(String),
    #[error("Recombination map error: {0}")]
    RecMap(#[from] RecMapError),
    #[error("Tree sequence error: {0}")]
    TreeSequence(#[from] TreeSequenceError),
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl InferError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn degeneracy(message: impl Into<String>) -> Self {
        Self::NumericDegeneracy(message.into())
    }

    pub fn sample_data(message: impl Into<String>) -> Self {
        Self::SampleData(message.into())
    }
}
