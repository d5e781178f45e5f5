extern crate chrono;
extern crate clap;
extern crate flate2;
extern crate itertools;
extern crate log;
extern crate rand;
extern crate rand_chacha;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;
extern crate simplelog;

pub mod utils;

use clap::Parser;
use log::*;
use rand::thread_rng;
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use simplelog::*;
use std::fs::File;

use utils::cli;
use utils::config::{build_config_from_args, read_config_yaml};
use utils::file_tools::check_parent;
use utils::runner::run_pcr;

fn main() {
    // parse the arguments from the command line
    let args = cli::Cli::parse();
    // log filter
    let level_filter = match args.log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => panic!(
            "Unknown log level, please set to one of \
            Trace, Debug, Info, Warn, Error, or Off (case insensitive)."
        ),
    };
    // --log records every per-read decision, which means debug level in the
    // log file whatever the terminal shows
    let file_filter = if args.log_decisions {
        LevelFilter::Debug
    } else {
        level_filter
    };
    // Check that the parent dir exists
    let log_destination = check_parent(&args.log_dest).unwrap();
    // Set up the logger for the run
    CombinedLogger::init(vec![
        #[cfg(feature = "termcolor")]
        TermLogger::new(
            level_filter,
            Config::default(),
            TerminalMode::Stdout,
            ColorChoice::Always,
        ),
        #[cfg(not(feature = "termcolor"))]
        SimpleLogger::new(level_filter, Config::default()),
        WriteLogger::new(
            file_filter,
            Config::default(),
            File::create(log_destination).unwrap(),
        ),
    ])
    .unwrap();
    info!("Begin processing");
    // set up the config struct based on whether there was an input config. Input config
    // overrides any other inputs.
    let config = if args.config != "" {
        info!("Using Configuration file input: {}", &args.config);
        read_config_yaml(args.config)
    } else {
        info!("Using command line arguments.");
        debug!("Command line args: {:?}", &args);
        build_config_from_args(args)
    };
    // Generate the RNG used for this run. If a seed was given, use that, or else
    // use thread_rng to generate a random seed, then seed a ChaCha20 RNG with it.
    let seed: u64;
    if !config.rng_seed.is_none() {
        seed = config.rng_seed.unwrap();
    } else {
        // We pick a random u64 to use as a seed
        let mut seed_rng = thread_rng();
        seed = seed_rng.next_u64();
    }
    info!("Branch choices will use the seed: {}", seed);
    let rng: ChaCha20Rng = SeedableRng::seed_from_u64(seed);
    // run the in-silico pcr pipeline
    if let Err(error) = run_pcr(config, rng) {
        panic!("rusty-pcr encountered a problem: {:?}", error)
    }
}
