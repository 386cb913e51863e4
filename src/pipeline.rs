//! The three inference stages and the files they leave behind.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::InferenceConfig;
use crate::engine::{EngineError, InferenceEngine, MatchParams};
use crate::error::InferError;
use crate::numeric::format_float;
use crate::precision::select_precision;
use crate::rates::RateArray;
use crate::samples::{samples_prefix, SampleData};
use crate::trees::TreeSequence;

/// The stage a run has reached, named by what the stage produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    AncestorsGenerated,
    AncestorsMatched,
    SamplesMatched,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AncestorsGenerated => "generate ancestors",
            Stage::AncestorsMatched => "match ancestors",
            Stage::SamplesMatched => "match samples",
        };
        write!(f, "{}", name)
    }
}

/// Parameters derived once per run from the configuration and the rates.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceParams {
    /// Median recombination rate, ignoring the sentinel.
    pub base_recombination_probability: f64,
    pub ma_mut_rate: f64,
    pub ms_mut_rate: f64,
    pub precision: u32,
    pub num_threads: usize,
}

impl InferenceParams {
    pub fn derive(config: &InferenceConfig, rates: &RateArray) -> Result<Self, InferError> {
        let precision = select_precision(
            rates,
            config.ma_mut_rate,
            config.ms_mut_rate,
            config.precision,
        )?;
        let base = rates.median().ok_or_else(|| {
            InferError::degeneracy("fewer than two inference sites, no base recombination rate")
        })?;
        Ok(InferenceParams {
            base_recombination_probability: base,
            ma_mut_rate: config.ma_mut_rate,
            ms_mut_rate: config.ms_mut_rate,
            precision,
            num_threads: config.num_threads,
        })
    }

    /// Mutation rate for matching ancestors.
    pub fn ancestors_mutation_rate(&self) -> f64 {
        self.base_recombination_probability * self.ma_mut_rate
    }

    /// Mutation rate for matching samples.
    pub fn samples_mutation_rate(&self) -> f64 {
        self.base_recombination_probability * self.ms_mut_rate
    }
}

/// File names of one run.
///
/// With input `data/sim_chr20.samples` the prefix is `data/sim_chr20`; stage
/// artifacts share the inference prefix `data/sim_chr20_ma0.1_ms0.01_p7`.
/// The multipliers print like Python floats, so `1.0` keeps its `.0` and
/// `0.00001` becomes `1e-05`.
#[derive(Clone, Debug, PartialEq)]
pub struct RunPaths {
    prefix: String,
    inference_prefix: String,
}

impl RunPaths {
    pub fn new(samples_path: &Path, params: &InferenceParams) -> Result<Self, InferError> {
        let prefix = samples_prefix(samples_path)?;
        let inference_prefix = format!(
            "{}_ma{}_ms{}_p{}",
            prefix,
            format_float(params.ma_mut_rate),
            format_float(params.ms_mut_rate),
            params.precision
        );
        Ok(RunPaths {
            prefix,
            inference_prefix,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn inference_prefix(&self) -> &str {
        &self.inference_prefix
    }

    fn with_suffix(base: &str, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", base, suffix))
    }

    pub fn ancestors(&self) -> PathBuf {
        Self::with_suffix(&self.inference_prefix, ".ancestors")
    }

    pub fn ancestors_trees(&self) -> PathBuf {
        Self::with_suffix(&self.inference_prefix, ".atrees")
    }

    pub fn trees(&self) -> PathBuf {
        Self::with_suffix(&self.inference_prefix, ".trees")
    }

    /// The simulated genealogy the samples came from, if one was kept.
    pub fn ground_truth(&self) -> PathBuf {
        Self::with_suffix(&self.prefix, ".trees")
    }

    pub fn results(&self) -> PathBuf {
        Self::with_suffix(&self.prefix, ".results")
    }
}

/// What a completed run hands to the statistics.
#[derive(Debug)]
pub struct PipelineOutput {
    pub inferred: TreeSequence,
    pub paths: RunPaths,
    /// Process CPU seconds from the start of the first stage to the end of
    /// the last, including reaped child processes.
    pub cpu_time: f64,
}

/// Runs the three stages in order, persisting each artifact before the next
/// stage starts. The first failure ends the run; files already written are
/// left in place.
pub struct StagedPipeline<'a, E: InferenceEngine> {
    engine: &'a mut E,
    samples: &'a SampleData,
    rates: &'a RateArray,
    params: &'a InferenceParams,
}

impl<'a, E: InferenceEngine> StagedPipeline<'a, E> {
    pub fn new(
        engine: &'a mut E,
        samples: &'a SampleData,
        rates: &'a RateArray,
        params: &'a InferenceParams,
    ) -> Self {
        StagedPipeline {
            engine,
            samples,
            rates,
            params,
        }
    }

    pub fn run(mut self) -> Result<PipelineOutput, InferError> {
        let samples_path = self
            .samples
            .path()
            .ok_or_else(|| InferError::configuration("sample data was not loaded from a file"))?;
        let paths = RunPaths::new(samples_path, self.params)?;
        self.log_rates();

        let engine_error =
            |stage: Stage| move |source: EngineError| InferError::Engine { stage, source };
        let match_params = |mutation_rate: f64| MatchParams {
            recombination_rates: self.rates,
            mutation_rate,
            precision: self.params.precision,
            num_threads: self.params.num_threads,
        };

        let start = process_cpu_time();

        log::info!("Starting generate ancestors");
        let ancestors = self
            .engine
            .generate_ancestors(self.samples, self.params.num_threads, &paths.ancestors())
            .map_err(engine_error(Stage::AncestorsGenerated))?;
        log::info!("GA done, wrote {}", paths.ancestors().display());

        let ancestors_ts = self
            .engine
            .match_ancestors(
                self.samples,
                &ancestors,
                &match_params(self.params.ancestors_mutation_rate()),
            )
            .map_err(engine_error(Stage::AncestorsMatched))?;
        ancestors_ts.dump(paths.ancestors_trees())?;
        log::info!("MA done, wrote {}", paths.ancestors_trees().display());

        let inferred = self
            .engine
            .match_samples(
                self.samples,
                &ancestors_ts,
                &match_params(self.params.samples_mutation_rate()),
            )
            .map_err(engine_error(Stage::SamplesMatched))?;
        inferred.dump(paths.trees())?;
        log::info!("MS done, wrote {}", paths.trees().display());

        let cpu_time = process_cpu_time() - start;
        log::debug!("inference took {:.3}s of CPU time", cpu_time);
        Ok(PipelineOutput {
            inferred,
            paths,
            cpu_time,
        })
    }

    fn log_rates(&self) {
        let summary = |value: Option<f64>| value.unwrap_or(f64::NAN);
        log::info!(
            "Inferring {} sites: mean rate {}, median {}, min {}, 2.5% quantile {}",
            self.rates.len().saturating_sub(1),
            summary(self.rates.mean()),
            summary(self.rates.median()),
            summary(self.rates.min().map(|(_, rate)| rate)),
            summary(self.rates.quantile(0.025)),
        );
        log::info!(
            "mutation rates {} (ancestors), {} (samples), precision {}",
            self.params.ancestors_mutation_rate(),
            self.params.samples_mutation_rate(),
            self.params.precision
        );
    }
}

/// CPU seconds used by this process and its reaped children.
#[cfg(unix)]
pub fn process_cpu_time() -> f64 {
    fn seconds(time: libc::timeval) -> f64 {
        time.tv_sec as f64 + time.tv_usec as f64 * 1e-6
    }
    let mut total = 0.0;
    for who in [libc::RUSAGE_SELF, libc::RUSAGE_CHILDREN] {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
        // SAFETY: getrusage fills the struct when it returns 0.
        let usage = unsafe {
            if libc::getrusage(who, usage.as_mut_ptr()) != 0 {
                continue;
            }
            usage.assume_init()
        };
        total += seconds(usage.ru_utime) + seconds(usage.ru_stime);
    }
    total
}

#[cfg(not(unix))]
pub fn process_cpu_time() -> f64 {
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::RecordingEngine;
    use crate::numeric::assert_float_eq;
    use crate::trees::tests::{one_tree, two_trees};
    use tempfile::tempdir;

    fn config() -> InferenceConfig {
        InferenceConfig::default()
    }

    fn samples_in(dir: &Path) -> SampleData {
        let path = dir.join("sim_chr20.samples");
        let samples = SampleData::new(
            10000.0,
            vec![0.0, 100.0, 500.0, 2000.0, 9999.0],
            vec![true; 5],
            vec![vec![0, 1, 0, 1, 1, 0, 0, 1, 0, 1]; 5],
        )
        .unwrap();
        samples.write(&path).unwrap();
        samples.with_path(&path)
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::AncestorsMatched.to_string(), "match ancestors");
    }

    #[test]
    fn test_params_and_paths() {
        let rates = RateArray::from_interval_rates(&[0.01, 0.04, 0.15, 0.7999]);
        let params = InferenceParams::derive(&config(), &rates).unwrap();
        assert_float_eq(params.base_recombination_probability, 0.095, 1e-12);
        assert_eq!(params.precision, 7);
        assert_float_eq(params.ancestors_mutation_rate(), 0.0095, 1e-12);
        assert_float_eq(params.samples_mutation_rate(), 0.00095, 1e-12);

        let paths = RunPaths::new(Path::new("data/sim_chr20.samples"), &params).unwrap();
        assert_eq!(paths.prefix(), "data/sim_chr20");
        assert_eq!(paths.ancestors(), PathBuf::from("data/sim_chr20_ma0.1_ms0.01_p7.ancestors"));
        assert_eq!(paths.ancestors_trees(), PathBuf::from("data/sim_chr20_ma0.1_ms0.01_p7.atrees"));
        assert_eq!(paths.trees(), PathBuf::from("data/sim_chr20_ma0.1_ms0.01_p7.trees"));
        assert_eq!(paths.ground_truth(), PathBuf::from("data/sim_chr20.trees"));
        assert_eq!(paths.results(), PathBuf::from("data/sim_chr20.results"));

        assert!(matches!(
            RunPaths::new(Path::new("data/sim.vcf"), &params),
            Err(InferError::Configuration(_))
        ));
    }

    #[test]
    fn test_paths_format_multipliers_as_python() {
        let params = InferenceParams {
            base_recombination_probability: 0.095,
            ma_mut_rate: 1.0,
            ms_mut_rate: 1e-5,
            precision: 12,
            num_threads: 0,
        };
        let paths = RunPaths::new(Path::new("sim_chr20.samples"), &params).unwrap();
        assert_eq!(paths.inference_prefix(), "sim_chr20_ma1.0_ms1e-05_p12");
        assert_eq!(paths.trees(), PathBuf::from("sim_chr20_ma1.0_ms1e-05_p12.trees"));
    }

    #[test]
    fn test_precision_override() {
        let rates = RateArray::from_interval_rates(&[0.01, 0.04]);
        let config = InferenceConfig {
            precision: Some(2),
            ..InferenceConfig::default()
        };
        assert_eq!(InferenceParams::derive(&config, &rates).unwrap().precision, 2);
    }

    #[test]
    fn test_run_calls_stages_in_order() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir().unwrap();
        let samples = samples_in(dir.path());
        let rates = RateArray::from_coordinates(samples.positions(), 10000.0);
        let params = InferenceParams::derive(&config(), &rates).unwrap();
        let mut engine = RecordingEngine::new(two_trees(), one_tree());

        let output = StagedPipeline::new(&mut engine, &samples, &rates, &params)
            .run()
            .unwrap();
        assert_eq!(
            engine.calls,
            vec![
                Stage::AncestorsGenerated,
                Stage::AncestorsMatched,
                Stage::SamplesMatched
            ]
        );
        assert!(engine.saw_ancestors_ts);
        assert_eq!(
            engine.mutation_rates,
            vec![params.ancestors_mutation_rate(), params.samples_mutation_rate()]
        );
        assert_eq!(engine.precisions, vec![params.precision; 2]);
        assert_eq!(output.inferred, one_tree());
        assert!(output.cpu_time >= 0.0);

        let paths = &output.paths;
        assert!(paths.ancestors().exists());
        assert_eq!(TreeSequence::load(paths.ancestors_trees()).unwrap(), two_trees());
        assert_eq!(TreeSequence::load(paths.trees()).unwrap(), one_tree());
    }

    #[test]
    fn test_failure_stops_later_stages() {
        let dir = tempdir().unwrap();
        let samples = samples_in(dir.path());
        let rates = RateArray::from_coordinates(samples.positions(), 10000.0);
        let params = InferenceParams::derive(&config(), &rates).unwrap();
        let mut engine = RecordingEngine::new(two_trees(), one_tree());
        engine.fail_at = Some(Stage::AncestorsMatched);

        let result = StagedPipeline::new(&mut engine, &samples, &rates, &params).run();
        match result {
            Err(InferError::Engine { stage, .. }) => assert_eq!(stage, Stage::AncestorsMatched),
            other => panic!("expected engine failure, got {:?}", other),
        }
        assert_eq!(
            engine.calls,
            vec![Stage::AncestorsGenerated, Stage::AncestorsMatched]
        );
        let paths = RunPaths::new(samples.path().unwrap(), &params).unwrap();
        // the ancestors stay behind, nothing later is written
        assert!(paths.ancestors().exists());
        assert!(!paths.ancestors_trees().exists());
        assert!(!paths.trees().exists());
    }

    #[test]
    fn test_cpu_time_is_monotone() {
        let a = process_cpu_time();
        let mut x = 0u64;
        for i in 0..100_000u64 {
            x = std::hint::black_box(x.wrapping_mul(31).wrapping_add(i));
        }
        assert!(process_cpu_time() >= a);
    }
}
