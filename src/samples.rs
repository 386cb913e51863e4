//! Sample data: the sites, inference flags and genotypes a run infers from.
//!
//! On disk this is a tab-delimited file ending in `.samples` (optionally
//! gzip-compressed), with `#key<TAB>value` metadata lines on top:
//!
//! ```text
//! #sequence_length	10000
//! position	inference	genotypes
//! 0	1	0101100010
//! 100	1	0011000110
//! ```
//!
//! Each genotype string has one allele digit per sample, with `.` or `-`
//! for missing data.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::InferError;
use crate::file::{InputFile, OutputFile};

pub const SAMPLES_SUFFIX: &str = ".samples";

/// Genotype code for missing data.
pub const MISSING_DATA: i8 = -1;

/// Strip the `.samples` suffix from `path`, giving the prefix all other run
/// files are named from.
pub fn samples_prefix(path: &Path) -> Result<String, InferError> {
    let path_str = path.to_string_lossy();
    path_str
        .strip_suffix(SAMPLES_SUFFIX)
        .map(|prefix| prefix.to_string())
        .ok_or_else(|| {
            InferError::configuration(format!(
                "Sample data file must end with '{}' (got '{}')",
                SAMPLES_SUFFIX, path_str
            ))
        })
}

#[derive(Debug, Serialize, Deserialize)]
struct SiteRecord {
    position: f64,
    inference: u8,
    genotypes: String,
}

#[derive(Clone, Debug)]
pub struct SampleData {
    path: Option<PathBuf>,
    sequence_length: f64,
    positions: Vec<f64>,
    inference: Vec<bool>,
    genotypes: Vec<Vec<i8>>,
    num_samples: usize,
}

impl SampleData {
    /// Build in-memory sample data, validating site order and genotypes.
    ///
    /// # Arguments
    ///
    /// * `sequence_length`: length of the sequence the sites lie on.
    /// * `positions`: strictly increasing site positions in `[0, sequence_length)`.
    /// * `inference`: whether each site is used for inference.
    /// * `genotypes`: one row per site with an allele per sample, each an
    ///   allele digit `0..=9` or [`MISSING_DATA`].
    pub fn new(
        sequence_length: f64,
        positions: Vec<f64>,
        inference: Vec<bool>,
        genotypes: Vec<Vec<i8>>,
    ) -> Result<Self, InferError> {
        if !sequence_length.is_finite() || sequence_length <= 0.0 {
            return Err(InferError::sample_data(format!(
                "sequence length must be positive, got {}",
                sequence_length
            )));
        }
        if positions.len() != inference.len() || positions.len() != genotypes.len() {
            return Err(InferError::sample_data(format!(
                "{} positions, {} inference flags and {} genotype rows",
                positions.len(),
                inference.len(),
                genotypes.len()
            )));
        }
        for (i, &position) in positions.iter().enumerate() {
            if !position.is_finite() || position < 0.0 || position >= sequence_length {
                return Err(InferError::sample_data(format!(
                    "site {} at {} lies outside [0, {})",
                    i, position, sequence_length
                )));
            }
            if i > 0 && position <= positions[i - 1] {
                return Err(InferError::sample_data(format!(
                    "site positions not strictly increasing at site {} ({})",
                    i, position
                )));
            }
        }
        let num_samples = genotypes.first().map_or(0, |row| row.len());
        if let Some(i) = genotypes.iter().position(|row| row.len() != num_samples) {
            return Err(InferError::sample_data(format!(
                "site {} has {} genotypes, expected {}",
                i,
                genotypes[i].len(),
                num_samples
            )));
        }
        for (i, row) in genotypes.iter().enumerate() {
            if let Some(&g) = row.iter().find(|&&g| g != MISSING_DATA && !(0..=9).contains(&g)) {
                return Err(InferError::sample_data(format!(
                    "site {} has invalid genotype code {}",
                    i, g
                )));
            }
        }
        Ok(Self {
            path: None,
            sequence_length,
            positions,
            inference,
            genotypes,
            num_samples,
        })
    }

    /// Attach the path this data is (or will be) stored at.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read a `.samples` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InferError> {
        let path = path.as_ref();
        samples_prefix(path)?;
        if !path.exists() {
            return Err(InferError::configuration(format!(
                "sample data file '{}' does not exist",
                path.display()
            )));
        }
        let input_file = InputFile::new(path);

        let mut sequence_length = None;
        for entry in input_file.collect_metadata("#")? {
            let mut fields = entry.split_whitespace();
            if fields.next() == Some("sequence_length") {
                let value = fields.next().unwrap_or_default();
                sequence_length = Some(value.parse::<f64>().map_err(|_| {
                    InferError::sample_data(format!("invalid sequence_length '{}'", value))
                })?);
            }
        }
        let sequence_length = sequence_length
            .ok_or_else(|| InferError::sample_data("missing #sequence_length metadata"))?;

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .comment(Some(b'#'))
            .from_reader(input_file.reader()?);

        let mut positions = Vec::new();
        let mut inference = Vec::new();
        let mut genotypes = Vec::new();
        for result in rdr.deserialize() {
            let record: SiteRecord = result?;
            positions.push(record.position);
            inference.push(record.inference != 0);
            genotypes.push(parse_genotypes(&record.genotypes, positions.len() - 1)?);
        }

        log::debug!(
            "read {} sites from {} (sequence length {})",
            positions.len(),
            path.display(),
            sequence_length
        );
        Ok(Self::new(sequence_length, positions, inference, genotypes)?.with_path(path))
    }

    /// Write this data as a `.samples` file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), InferError> {
        let output = OutputFile::new(
            path,
            Some(vec![format!("sequence_length\t{}", self.sequence_length)]),
        );
        let mut writer = output.writer()?;
        writeln!(writer, "position\tinference\tgenotypes")?;
        for ((position, &inference), row) in self
            .positions
            .iter()
            .zip(&self.inference)
            .zip(&self.genotypes)
        {
            let calls: String = row
                .iter()
                .map(|&g| {
                    if g == MISSING_DATA {
                        '.'
                    } else {
                        char::from(b'0' + g as u8)
                    }
                })
                .collect();
            writeln!(writer, "{}\t{}\t{}", position, inference as u8, calls)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn num_sites(&self) -> usize {
        self.positions.len()
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn inference(&self) -> &[bool] {
        &self.inference
    }

    /// Positions of the sites flagged for inference.
    pub fn inference_positions(&self) -> Vec<f64> {
        self.positions
            .iter()
            .zip(&self.inference)
            .filter(|&(_, &keep)| keep)
            .map(|(&p, _)| p)
            .collect()
    }

    pub fn num_inference_sites(&self) -> usize {
        self.inference.iter().filter(|&&keep| keep).count()
    }

    /// Allele calls of every sample at site `site`.
    pub fn genotypes(&self, site: usize) -> Option<&[i8]> {
        self.genotypes.get(site).map(|row| row.as_slice())
    }
}

fn parse_genotypes(calls: &str, site: usize) -> Result<Vec<i8>, InferError> {
    calls
        .chars()
        .map(|c| match c {
            '.' | '-' => Ok(MISSING_DATA),
            c => c.to_digit(10).map(|d| d as i8).ok_or_else(|| {
                InferError::sample_data(format!("site {} has invalid genotype '{}'", site, c))
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_samples_prefix() {
        assert_eq!(
            samples_prefix(Path::new("data/chr20.samples")).unwrap(),
            "data/chr20"
        );
        assert!(matches!(
            samples_prefix(Path::new("data/chr20.vcf")),
            Err(InferError::Configuration(_))
        ));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("toy.samples");
        let data = SampleData::new(
            1000.0,
            vec![10.0, 250.0, 900.0],
            vec![true, false, true],
            vec![vec![0, 1, 1], vec![1, MISSING_DATA, 0], vec![0, 0, 1]],
        )
        .unwrap();
        data.write(&path).unwrap();

        let loaded = SampleData::load(&path).unwrap();
        assert_eq!(loaded.path(), Some(path.as_path()));
        assert_eq!(loaded.sequence_length(), 1000.0);
        assert_eq!(loaded.num_samples(), 3);
        assert_eq!(loaded.num_sites(), 3);
        assert_eq!(loaded.inference_positions(), vec![10.0, 900.0]);
        assert_eq!(loaded.num_inference_sites(), 2);
        assert_eq!(loaded.genotypes(1).unwrap(), &[1, MISSING_DATA, 0]);
    }

    #[test]
    fn test_load_rejects_bad_input() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SampleData::load(dir.path().join("absent.samples")),
            Err(InferError::Configuration(_))
        ));
        assert!(matches!(
            SampleData::load(dir.path().join("input.vcf")),
            Err(InferError::Configuration(_))
        ));

        let unsorted = SampleData::new(100.0, vec![5.0, 5.0], vec![true, true], vec![vec![0], vec![1]]);
        assert!(matches!(unsorted, Err(InferError::SampleData(_))));
        let ragged = SampleData::new(100.0, vec![5.0, 6.0], vec![true, true], vec![vec![0], vec![1, 0]]);
        assert!(matches!(ragged, Err(InferError::SampleData(_))));
        let outside = SampleData::new(100.0, vec![100.0], vec![true], vec![vec![0]]);
        assert!(matches!(outside, Err(InferError::SampleData(_))));
    }

    #[test]
    fn test_rejects_unwritable_genotypes() {
        for code in [-2, 12] {
            let data = SampleData::new(100.0, vec![5.0], vec![true], vec![vec![0, code, 1]]);
            assert!(matches!(data, Err(InferError::SampleData(_))), "code {}", code);
        }
        let edges = SampleData::new(100.0, vec![5.0], vec![true], vec![vec![0, 9, MISSING_DATA]]);
        assert!(edges.is_ok());
    }
}
