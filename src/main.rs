use clap::Parser;
use std::path::PathBuf;
use tsinfer_rates::config::{DEFAULT_MA_MUT_RATE, DEFAULT_MS_MUT_RATE};
use tsinfer_rates::prelude::*;

const INFO: &str = "\
tsinfer-rates: infer tree sequences with recombination map derived rates

Runs the generate ancestors, match ancestors and match samples stages of the
configured engine on a .samples file and writes a one-line summary of the
inferred tree sequence to <prefix>.results.";

#[derive(Parser)]
#[clap(name = "tsinfer-rates")]
#[clap(about = INFO)]
struct Cli {
    /// Increase log verbosity (-d debug, -dd trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// the input sample file, ending in .samples
    #[arg(required = true)]
    samples: PathBuf,

    /// multiplier of the base rate giving the match ancestors mutation rate
    #[arg(short = 'A', long, default_value_t = DEFAULT_MA_MUT_RATE)]
    match_ancestors_mrate: f64,

    /// multiplier of the base rate giving the match samples mutation rate
    #[arg(short = 'S', long, default_value_t = DEFAULT_MS_MUT_RATE)]
    match_samples_mrate: f64,

    /// matching precision (computed from the rates if not set)
    #[arg(short, long)]
    precision: Option<u32>,

    /// number of engine threads, 0 for the engine's default
    #[arg(short = 't', long, default_value_t = 0)]
    num_threads: usize,

    /// raise recombination rates below this value to it
    #[arg(long)]
    min_rate: Option<f64>,

    /// settings file (TOML); defaults to config.toml in the user config directory
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_logging(debug: u8) {
    let level = match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run() -> Result<(), InferError> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = InferenceConfig {
        ma_mut_rate: cli.match_ancestors_mrate,
        ms_mut_rate: cli.match_samples_mrate,
        precision: cli.precision,
        num_threads: cli.num_threads,
        min_rate: cli.min_rate,
    };
    let settings = Settings::load(cli.config.as_deref())?;
    let samples = SampleData::load(&cli.samples)?;
    log::info!(
        "Loaded {} samples at {} sites ({} for inference) from {}",
        samples.num_samples(),
        samples.num_sites(),
        samples.num_inference_sites(),
        cli.samples.display()
    );

    let maps = settings.map_service();
    let mut engine = settings.engine()?;
    let record = infer(&samples, &config, &maps, &mut engine)?;
    log::info!(
        "{} edges, {} mutations, {} trees in {:.2}s CPU",
        record.edges,
        record.mutations,
        record.num_trees,
        record.elapsed_cpu_time
    );
    Ok(())
}

fn main() {
    match run() {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
