use csv::ReaderBuilder;
use genomap::{GenomeMap, GenomeMapError};
use indexmap::map::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use super::file::{FileError, InputFile};
use super::numeric::{cumsum, interp1d};

/// The float type for recombination rates and map positions.
pub type RateFloat = f64;

/// The integer type for genomic positions of map markers.
pub type Position = u64;

/// HapMap rates are in cM/Mb; this brings them to Morgans per basepair.
pub const CM_MB_CONVERSION: RateFloat = 1e-8;

#[derive(Error, Debug)]
pub enum RecMapError {
    #[error("HapMap parsing error: {0}")]
    HapMapParsingError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("File reading error: {0}")]
    FileError(#[from] FileError),
    #[error("Missing field")]
    MissingField,
    #[error("Failed to parse a column of a HapMap file: {0}")]
    ParseError(String),
    #[error("Improper Rate value, either NaN or negative ({0})")]
    ImproperRate(String),
    #[error("Chromosome key '{0}' does not exist")]
    NoChrom(String),
    #[error("HapMap file not sorted ({0})")]
    HapMapNotSorted(String),
    #[error("Rate map needs {0} rates for its breakpoints, got {1}")]
    RateCount(usize, usize),
    #[error("Cannot interpolate the map position at {0}")]
    Interpolation(f64),
    #[error("GenomeMap Error: error updating GenomeMap")]
    GenomeMapError(#[from] GenomeMapError),
}

/// Storage and methods for a single chromosome's recombination rates and marker positions.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RateMap {
    /// The n+1 genomic positions of the breakpoints, starting at zero.
    pub ends: Vec<Position>,
    /// The n rates in Morgans per basepair; `rates[i]` applies to `[ends[i], ends[i+1])`.
    pub rates: Vec<RateFloat>,
    /// The n+1 cumulative map positions (in Morgans) at each breakpoint.
    pub map_pos: Vec<RateFloat>,
}

impl RateMap {
    pub fn new() -> Self {
        Self {
            ends: Vec::new(),
            rates: Vec::new(),
            map_pos: Vec::new(),
        }
    }

    /// Build a rate map from breakpoints and the rates between them, computing
    /// the cumulative map positions.
    pub fn from_breakpoints(
        ends: Vec<Position>,
        rates: Vec<RateFloat>,
    ) -> Result<Self, RecMapError> {
        if ends.len() != rates.len() + 1 {
            return Err(RecMapError::RateCount(ends.len().saturating_sub(1), rates.len()));
        }
        if let Some(pair) = ends.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(RecMapError::HapMapNotSorted(format!(
                "{} follows {}",
                pair[1], pair[0]
            )));
        }
        if let Some(rate) = rates.iter().find(|r| r.is_nan() || **r < 0.0) {
            return Err(RecMapError::ImproperRate(rate.to_string()));
        }
        let mut rate_map = RateMap {
            ends,
            rates,
            map_pos: Vec::new(),
        };
        rate_map.calc_cumulative_mass();
        Ok(rate_map)
    }

    /// Returns the spans (i.e. widths) in basepairs between each breakpoint.
    pub fn span(&self) -> Vec<Position> {
        self.ends.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    /// Returns the map length (Morgans) of each interval.
    pub fn mass(&self) -> Vec<RateFloat> {
        self.rates
            .iter()
            .zip(self.span().iter())
            .map(|(&x, &y)| x * y as RateFloat)
            .collect()
    }

    /// Calculate the cumulative map length at each breakpoint.
    pub fn calc_cumulative_mass(&mut self) {
        if self.ends.is_empty() {
            self.map_pos.clear();
            return;
        }
        let mut map_pos = vec![0.0];
        map_pos.extend(cumsum(&self.mass(), 0.0));
        self.map_pos = map_pos;
    }

    /// Calculate the total map length
    pub fn total_map_length(&self) -> Option<&RateFloat> {
        self.map_pos.last()
    }

    /// Convert physical positions to genetic map positions (Morgans) by linear
    /// interpolation.
    ///
    /// Positions before the first or after the last breakpoint take the
    /// first or last map position.
    pub fn physical_to_genetic(&self, positions: &[f64]) -> Result<Array1<RateFloat>, RecMapError> {
        let ends: Vec<f64> = self.ends.iter().map(|&e| e as f64).collect();
        let genetic: Vec<RateFloat> = positions
            .iter()
            .map(|&p| interp1d(&ends, &self.map_pos, p).ok_or(RecMapError::Interpolation(p)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Array1::from_vec(genetic))
    }
}

pub struct RecMap {
    pub map: GenomeMap<RateMap>,
}

impl RecMap {
    /// Create a new [`RecMap`] from a HapMap-formatted recombination map file.
    ///
    /// This method also supports reading directly from a gzip-compressed file.
    ///
    /// The HapMap recombination format looks like:
    ///
    /// ```text
    /// Chromosome      Position(bp)    Rate(cM/Mb)     Map(cM)
    /// chr1    55550   2.981822        0.000000
    /// chr1    82571   2.082414        0.080572
    /// chr1    88169   2.081358        0.092229
    /// ```
    ///
    /// The rate on each row applies from that row's position up to the next
    /// row. A zero-rate interval is added at the start of a chromosome that does
    /// not begin at zero, and the last interval is extended to the chromosome
    /// length when `seqlens` has one. The map column, if present, is ignored;
    /// map positions are recomputed from the rates.
    pub fn from_hapmap(
        filepath: impl AsRef<Path>,
        seqlens: &IndexMap<String, Position>,
    ) -> Result<RecMap, RecMapError> {
        let input_file = InputFile::new(filepath);

        // read one line to check for headers
        let has_header = input_file.has_header("Chromosome")?;

        let buf_reader = input_file.reader()?;

        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(has_header)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(buf_reader);

        let mut rec_map: GenomeMap<RateMap> = GenomeMap::new();

        for result in rdr.records() {
            let record = result?;

            let chrom = record.get(0).ok_or(RecMapError::MissingField)?.to_string();

            let end_str = record.get(1).ok_or(RecMapError::MissingField)?;
            let end: Position = end_str.trim().parse().map_err(|_| {
                RecMapError::ParseError(format!("Failed to parse position from string: {}", end_str))
            })?;

            let rate_str = record.get(2).ok_or(RecMapError::MissingField)?;
            let rate: RateFloat = rate_str.trim().parse().map_err(|_| {
                RecMapError::ParseError(format!("Failed to parse rate from string: {}", rate_str))
            })?;

            if !rate.is_finite() || rate < 0.0 {
                return Err(RecMapError::ImproperRate(format!("{}:{}", chrom, end)));
            }
            let rate = CM_MB_CONVERSION * rate;

            // Until the chromosome is finalized each end carries the rate of
            // the interval that starts there.
            if let Some(chrom_entry) = rec_map.get_mut(&chrom) {
                if let Some(&last_end) = chrom_entry.ends.last() {
                    if end <= last_end {
                        return Err(RecMapError::HapMapNotSorted(format!("{}:{}", chrom, end)));
                    }
                }
                chrom_entry.ends.push(end);
                chrom_entry.rates.push(rate);
            } else {
                let mut new_rate_map = RateMap::new();
                if end != 0 {
                    new_rate_map.ends.push(0);
                    new_rate_map.rates.push(0.0);
                }
                new_rate_map.ends.push(end);
                new_rate_map.rates.push(rate);
                rec_map.insert(&chrom, new_rate_map)?;
            }
        }

        let names: Vec<String> = rec_map.iter().map(|(name, _)| name.clone()).collect();
        for name in names {
            let chrom_entry = rec_map
                .get_mut(&name)
                .ok_or_else(|| RecMapError::NoChrom(name.clone()))?;
            let last_end = chrom_entry.ends.last().copied().unwrap_or(0);
            match seqlens.get(&name) {
                Some(&seq_len) if seq_len > last_end => chrom_entry.ends.push(seq_len),
                Some(&seq_len) => {
                    if seq_len < last_end {
                        log::warn!(
                            "{} map extends to {} beyond the sequence length {}",
                            name,
                            last_end,
                            seq_len
                        );
                    }
                    chrom_entry.rates.pop();
                }
                None => {
                    chrom_entry.rates.pop();
                }
            }
            chrom_entry.calc_cumulative_mass();
        }

        Ok(RecMap { map: rec_map })
    }

    /// Return the number of chromosomes in the recombination map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Return if the recombination map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over chromosome name and [`RateMap`] tuples.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RateMap)> {
        self.map.iter()
    }

    /// The [`RateMap`] of chromosome `name`.
    pub fn chromosome(&self, name: &str) -> Result<&RateMap, RecMapError> {
        self.map
            .get(name)
            .ok_or_else(|| RecMapError::NoChrom(name.to_string()))
    }

    /// Interpolate the recombination map positions at the specified physical positions.
    ///
    /// # Arguments
    ///  * `chrom`: the chromosome name.
    ///  * `positions`: the physical positions to estimate map positions at.
    pub fn interpolate_map_positions(
        &self,
        chrom: &str,
        positions: &[f64],
    ) -> Result<Array1<RateFloat>, RecMapError> {
        self.chromosome(chrom)?.physical_to_genetic(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{assert_float_eq, assert_floats_eq, cumsum, diff};

    fn read_hapmap() -> RecMap {
        let seqlens = indexmap::indexmap! {
            "chr20".to_string() => 100_000,
        };
        RecMap::from_hapmap("tests/data/genetic_map_GRCh37_chr20.txt", &seqlens).unwrap()
    }

    #[test]
    fn test_hapmap_read() {
        let rm = read_hapmap();
        assert_eq!(rm.len(), 1);
        assert!(!rm.is_empty());
        let chr20 = rm.chromosome("chr20").unwrap();
        // padded start, four markers, extended end
        assert_eq!(chr20.ends, vec![0, 10_000, 20_000, 50_000, 60_000, 100_000]);
        assert_eq!(chr20.rates.len(), 5);
        assert_eq!(chr20.map_pos.len(), chr20.ends.len());
        assert_float_eq(chr20.rates[1], 1e-8, 1e-20);
        // 10kb at 1 cM/Mb + 30kb at 2 cM/Mb + 10kb at 0.5 cM/Mb + 40kb at 0
        assert_float_eq(*chr20.total_map_length().unwrap(), 7.5e-4, 1e-15);
        assert!(matches!(rm.chromosome("chr1"), Err(RecMapError::NoChrom(_))));
    }

    #[test]
    fn test_physical_to_genetic_interpolates() {
        let rate_map = RateMap::from_breakpoints(vec![0, 100, 200], vec![0.01, 0.02]).unwrap();
        assert_floats_eq(&rate_map.map_pos, &[0.0, 1.0, 3.0], 1e-12);
        let genetic = rate_map
            .physical_to_genetic(&[0.0, 50.0, 100.0, 150.0, 250.0])
            .unwrap();
        assert_floats_eq(genetic.as_slice().unwrap(), &[0.0, 0.5, 1.0, 2.0, 3.0], 1e-12);
    }

    #[test]
    fn test_genetic_positions_roundtrip_through_diff() {
        let rm = read_hapmap();
        let positions = vec![500.0, 12_000.0, 12_001.0, 33_333.0, 59_999.0, 75_000.0];
        let genetic = rm.interpolate_map_positions("chr20", &positions).unwrap();
        let genetic = genetic.as_slice().unwrap();
        let rebuilt = cumsum(&diff(genetic), genetic[0]);
        assert_floats_eq(&rebuilt, &genetic[1..], 1e-15);
    }

    #[test]
    fn test_improper_breakpoints() {
        assert!(matches!(
            RateMap::from_breakpoints(vec![0, 10], vec![]),
            Err(RecMapError::RateCount(1, 0))
        ));
        assert!(matches!(
            RateMap::from_breakpoints(vec![0, 10, 10], vec![0.1, 0.1]),
            Err(RecMapError::HapMapNotSorted(_))
        ));
        assert!(matches!(
            RateMap::from_breakpoints(vec![0, 10], vec![-1.0]),
            Err(RecMapError::ImproperRate(_))
        ));
    }
}
