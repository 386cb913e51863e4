//! Drive tree sequence inference with rates taken from a recombination map.
//!
//! A run reads a `.samples` file, turns the positions of its inference sites
//! into per-interval recombination probabilities ([`RateArray`]), picks the
//! matching precision from those rates, runs the three inference stages of an
//! [`InferenceEngine`] and summarizes the inferred genealogy as a
//! [`ResultRecord`].
//!
//! When the sample file name names a chromosome (`sim_chr20.samples`), the
//! rates are distances along that chromosome's genetic map, fetched through
//! a [`GeneticMapService`]. Otherwise they are physical distances scaled by
//! the sequence length.
//!
//! ```no_run
//! use tsinfer_rates::prelude::*;
//!
//! let settings = Settings::load(None).expect("could not read settings");
//! let samples = SampleData::load("sim_chr20.samples").expect("cannot read samples");
//! let maps = settings.map_service();
//! let mut engine = settings.engine().expect("cannot set up engine");
//!
//! let record = infer(&samples, &InferenceConfig::default(), &maps, &mut engine)
//!                  .expect("inference failed");
//! println!("{} trees, KC distance {:?}", record.num_trees, record.kc_distance);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod mapservice;
mod numeric;
pub mod pipeline;
pub mod precision;
pub mod rates;
pub mod recmap;
pub mod samples;
pub mod stats;
pub mod trees;

pub use config::{InferenceConfig, Settings};
pub use engine::{CommandEngine, InferenceEngine};
pub use error::InferError;
pub use mapservice::{GeneticMapService, HapMapCache};
pub use pipeline::{InferenceParams, StagedPipeline};
pub use rates::{CoordinateMapper, RateArray};
pub use samples::SampleData;
pub use stats::ResultRecord;
pub use trees::TreeSequence;

pub mod prelude {
    pub use crate::config::{InferenceConfig, Settings};
    pub use crate::engine::{CommandEngine, InferenceEngine};
    pub use crate::error::InferError;
    pub use crate::mapservice::{GeneticMapService, HapMapCache};
    pub use crate::rates::RateArray;
    pub use crate::samples::SampleData;
    pub use crate::stats::ResultRecord;
    pub use crate::infer;
}

/// Run inference on `samples` and write `<prefix>.results` next to them.
pub fn infer<M: GeneticMapService, E: InferenceEngine>(
    samples: &SampleData,
    config: &InferenceConfig,
    maps: &M,
    engine: &mut E,
) -> Result<ResultRecord, InferError> {
    config.validate()?;
    let mut rates = CoordinateMapper::new(maps).recombination_rates(samples)?;
    if let Some(floor) = config.min_rate {
        log::info!("raising recombination rates below {} to it", floor);
        rates = rates.with_floor(floor);
    }
    let params = InferenceParams::derive(config, &rates)?;
    let output = StagedPipeline::new(engine, samples, &rates, &params).run()?;
    let record = stats::summarize(&output, &params)?;
    stats::write_results(output.paths.results(), &record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::RecordingEngine;
    use crate::pipeline::Stage;
    use crate::trees::tests::{one_tree, two_trees};
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_infer_physical_positions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.samples");
        SampleData::new(
            10000.0,
            vec![0.0, 100.0, 300.0, 500.0, 2000.0, 9999.0],
            vec![true, true, false, true, true, true],
            vec![vec![0, 1, 1]; 6],
        )
        .unwrap()
        .write(&path)
        .unwrap();
        let samples = SampleData::load(&path).unwrap();
        let maps = HapMapCache::new(
            dir.path().join("maps"),
            "HapMapII_GRCh37",
            None,
            Duration::from_secs(1),
        );
        let mut engine = RecordingEngine::new(one_tree(), two_trees());
        two_trees().dump(dir.path().join("sim.trees")).unwrap();

        let record = infer(&samples, &InferenceConfig::default(), &maps, &mut engine).unwrap();
        assert_eq!(engine.calls.len(), 3);
        assert_eq!(engine.calls[2], Stage::SamplesMatched);
        assert_eq!(record.precision, 7);
        assert_eq!(record.num_trees, 2);
        assert_eq!(record.kc_distance, Some(0.0));

        let results = fs::read_to_string(dir.path().join("sim.results")).unwrap();
        assert!(results.starts_with("0.1\t0.01\t7\t6\t0\t2\t0.0\t"));
        assert!(dir.path().join("sim_ma0.1_ms0.01_p7.trees").exists());
    }

    #[test]
    fn test_infer_config_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.samples");
        let samples = SampleData::new(
            10.0,
            vec![1.0, 2.0, 3.0],
            vec![true; 3],
            vec![vec![0, 1]; 3],
        )
        .unwrap()
        .with_path(&path);
        let maps = HapMapCache::new(dir.path(), "HapMapII_GRCh37", None, Duration::from_secs(1));
        let mut engine = RecordingEngine::new(one_tree(), one_tree());

        // a floor far above every rate still runs
        let config = InferenceConfig {
            min_rate: Some(0.5),
            precision: Some(4),
            ..InferenceConfig::default()
        };
        let record = infer(&samples, &config, &maps, &mut engine).unwrap();
        assert_eq!(record.precision, 4);

        let bad = InferenceConfig {
            ma_mut_rate: -1.0,
            ..InferenceConfig::default()
        };
        assert!(matches!(
            infer(&samples, &bad, &maps, &mut engine),
            Err(InferError::Configuration(_))
        ));
    }
}
