//! Per-site recombination probabilities for inference.
//!
//! A [`RateArray`] has one entry per inference site: a leading `0.0`
//! followed by the distance between each pair of adjacent sites. Distances
//! are genetic (Morgans, from a recombination map) when the sample file names
//! a chromosome, and physical distances scaled by the sequence length
//! otherwise.

use ndarray::{s, Array1, ArrayView1};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::InferError;
use crate::mapservice::{GeneticMapService, MapServiceError};
use crate::numeric::{cumsum, diff, mean, median, quantile};
use crate::recmap::Position;
use crate::samples::{samples_prefix, SampleData};

const CHROM_PATTERN: &str = r"(chr\d+)";

static CHROM_RE: OnceLock<Regex> = OnceLock::new();

#[derive(Clone, Debug, PartialEq)]
pub struct RateArray(Array1<f64>);

impl RateArray {
    /// Build from the rates between adjacent sites, adding the leading sentinel.
    pub fn from_interval_rates(rates: &[f64]) -> Self {
        let mut values = Vec::with_capacity(rates.len() + 1);
        values.push(0.0);
        values.extend_from_slice(rates);
        RateArray(Array1::from_vec(values))
    }

    /// Build from cumulative site coordinates, dividing each successive
    /// difference by `scale`. No sites gives an empty array.
    pub fn from_coordinates(coordinates: &[f64], scale: f64) -> Self {
        if coordinates.is_empty() {
            return RateArray(Array1::zeros(0));
        }
        let deltas: Vec<f64> = diff(coordinates).into_iter().map(|d| d / scale).collect();
        Self::from_interval_rates(&deltas)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// The rates between adjacent sites, without the sentinel.
    pub fn interval_rates(&self) -> ArrayView1<'_, f64> {
        if self.0.is_empty() {
            self.0.view()
        } else {
            self.0.slice(s![1..])
        }
    }

    fn interval_vec(&self) -> Vec<f64> {
        self.interval_rates().to_vec()
    }

    pub fn median(&self) -> Option<f64> {
        median(&self.interval_vec())
    }

    pub fn mean(&self) -> Option<f64> {
        mean(&self.interval_vec())
    }

    pub fn quantile(&self, q: f64) -> Option<f64> {
        quantile(&self.interval_vec(), q)
    }

    /// The smallest interval rate, with its index in the full array.
    pub fn min(&self) -> Option<(usize, f64)> {
        self.interval_rates()
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &r)| match best {
                Some((_, b)) if b <= r => best,
                _ => Some((i + 1, r)),
            })
    }

    /// A copy with every interval rate below `floor` raised to it.
    pub fn with_floor(&self, floor: f64) -> Self {
        let mut values = self.0.clone();
        for value in values.iter_mut().skip(1) {
            if *value < floor {
                *value = floor;
            }
        }
        RateArray(values)
    }

    /// Re-accumulate the rates into site coordinates starting at `origin`.
    pub fn cumulative(&self, origin: f64) -> Vec<f64> {
        if self.0.is_empty() {
            return Vec::new();
        }
        let mut coordinates = vec![origin];
        coordinates.extend(cumsum(&self.interval_vec(), origin));
        coordinates
    }
}

/// The first `chr<digits>` token in `identifier`, if any.
pub fn chromosome_token(identifier: &str) -> Option<String> {
    let re = CHROM_RE
        .get_or_init(|| Regex::new(CHROM_PATTERN).expect("chromosome pattern is a valid regex"));
    re.captures(identifier)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Converts the inference sites of a sample file into a [`RateArray`].
pub struct CoordinateMapper<'a, M: GeneticMapService> {
    maps: &'a M,
}

impl<'a, M: GeneticMapService> CoordinateMapper<'a, M> {
    pub fn new(maps: &'a M) -> Self {
        Self { maps }
    }

    /// Compute the rate array for the inference sites of `samples`.
    ///
    /// Fails with a configuration error when the sample file does not end in
    /// `.samples`, and with resource-unavailable when a chromosome map is
    /// needed but cannot be obtained.
    pub fn recombination_rates(&self, samples: &SampleData) -> Result<RateArray, InferError> {
        let identifier = match samples.path() {
            Some(path) => {
                samples_prefix(path)?;
                path.to_string_lossy().into_owned()
            }
            None => String::new(),
        };
        let positions = samples.inference_positions();

        match chromosome_token(&identifier) {
            Some(chrom) => {
                log::info!(
                    "Using {} from the genetic map service for the recombination map",
                    chrom
                );
                let genetic = self.genetic_positions(&chrom, samples, &positions)?;
                Ok(RateArray::from_coordinates(&genetic, 1.0))
            }
            None => {
                log::info!("No chromosome in '{}', using physical distances", identifier);
                Ok(RateArray::from_coordinates(
                    &positions,
                    samples.sequence_length(),
                ))
            }
        }
    }

    /// Genetic map positions (Morgans) of `positions` on `chrom`.
    pub fn genetic_positions(
        &self,
        chrom: &str,
        samples: &SampleData,
        positions: &[f64],
    ) -> Result<Vec<f64>, InferError> {
        let unavailable =
            |e: MapServiceError| InferError::ResourceUnavailable(format!("{}: {}", chrom, e));
        if !self.maps.is_cached(chrom) {
            self.maps.download(chrom).map_err(unavailable)?;
        }
        let sequence_length = samples.sequence_length().ceil() as Position;
        let rate_map = self
            .maps
            .chromosome_map(chrom, sequence_length)
            .map_err(|e| match e {
                MapServiceError::RecMap(e) => InferError::RecMap(e),
                other => unavailable(other),
            })?;
        log::debug!(
            "{} map length {:?} Morgans over {} breakpoints",
            chrom,
            rate_map.total_map_length(),
            rate_map.ends.len()
        );
        Ok(rate_map.physical_to_genetic(positions)?.to_vec())
    }
}
