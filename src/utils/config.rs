// This is the run configuration for this particular run, which holds the parameters needed by
// the various phases. It is built with a ConfigBuilder, which can take either a config yaml
// file or command line arguments and turn them into the configuration.

use log::{info, warn};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::string::String;

use super::cli::Cli;

#[derive(Debug)]
pub struct RunConfiguration {
    // This struct holds all the parameters for this particular run. It is derived from input
    // either from a configuration file or from command line inputs. This is not built directly
    // in the code, but is constructed by a builder to enable default values.
    //
    // read_files: the input read files, in order. With paired input, even indexes are the R1
    // side and odd indexes the R2 side.
    // output_file: the fasta file the amplicons are written to.
    // forward_primer / reverse_primer: the two PCR primers, IUPAC codes allowed.
    // paired: whether the files are treated as (R1, R2) pairs.
    // strict: paired-only; a filter kMer must have been seen on both sides of a pair.
    // min_length: minimum amplicon length to report; 0 means full-length amplicons only.
    // max_length: maximum amplicon length to report; 0 means unlimited.
    // min_depth: the floor used when the depth summary is computed.
    // max_read_length: input reads longer than this are truncated; 0 leaves them unchanged.
    // save_tag: when set, the selected read set is written to <tag>_selected_reads.fasta.
    // write_stats: whether to write the run statistics JSON next to the output.
    // rng_seed: seed for the branch-choice RNG; None draws one from entropy.
    pub read_files: Vec<String>,
    pub output_file: String,
    pub forward_primer: String,
    pub reverse_primer: String,
    pub paired: bool,
    pub strict: bool,
    pub min_length: usize,
    pub max_length: usize,
    pub min_depth: i32,
    pub max_read_length: usize,
    pub save_tag: Option<String>,
    pub write_stats: bool,
    pub rng_seed: Option<u64>,
}

#[allow(dead_code)]
impl RunConfiguration {
    // The purpose of this function is to redirect you to the ConfigBuilder
    pub fn build() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

// The config builder allows us to construct a config in multiple different ways, depending
// on the input.
pub struct ConfigBuilder {
    pub read_files: Vec<String>,
    pub output_file: Option<String>,
    pub forward_primer: Option<String>,
    pub reverse_primer: Option<String>,
    // None means decide from the file count: an even number of files pairs up
    pub paired: Option<bool>,
    pub strict: bool,
    pub min_length: usize,
    pub max_length: usize,
    pub min_depth: i32,
    pub max_read_length: usize,
    pub save_tag: Option<String>,
    pub write_stats: bool,
    pub rng_seed: Option<u64>,
}

impl ConfigBuilder {
    pub fn new() -> ConfigBuilder {
        ConfigBuilder {
            // Setting default values
            read_files: Vec::new(),
            output_file: None,
            forward_primer: None,
            reverse_primer: None,
            paired: None,
            strict: false,
            min_length: 0,
            max_length: 0,
            min_depth: 2,
            max_read_length: 0,
            save_tag: None,
            write_stats: false,
            rng_seed: None,
        }
    }

    fn resolved_paired(&self) -> bool {
        match self.paired {
            Some(paired) => paired,
            None => self.read_files.len() >= 2 && self.read_files.len() % 2 == 0,
        }
    }

    pub fn check_and_print_config(&self) {
        // This does a final check of the configuration for valid items. It will print info
        // messages of the items, to work as a record and to assist in debugging any issues
        // that come up.
        if self.read_files.is_empty() {
            panic!("No read files were specified.")
        }
        if self.output_file.is_none() {
            panic!("No output file was specified.")
        }
        if self.forward_primer.is_none() || self.reverse_primer.is_none() {
            panic!("Both -f FORWARD_PRIMER and -r REVERSE_PRIMER are required.")
        }
        if self.min_length != 0 && self.min_length < 40 {
            panic!("Minimum length must be at least 40 (got {})", self.min_length)
        }
        if self.max_length != 0 && self.max_length < 40 {
            panic!("Maximum length must be at least 40 (got {})", self.max_length)
        }
        if self.min_depth < 1 {
            panic!("Minimum depth must be at least 1 (got {})", self.min_depth)
        }
        let paired = self.resolved_paired();
        if paired && self.read_files.len() % 2 != 0 {
            panic!(
                "Paired mode needs an even number of read files (got {})",
                self.read_files.len()
            )
        }
        if self.strict && !paired {
            panic!("Strict mode requires paired input files.")
        }
        info!(
            "Running rusty-pcr on {} read file(s) with...",
            self.read_files.len()
        );
        info!("  >forward primer: {}", self.forward_primer.clone().unwrap());
        info!("  >reverse primer: {}", self.reverse_primer.clone().unwrap());
        info!("  >paired: {}", paired);
        if self.strict {
            info!("  >strict cross-file filtering")
        }
        if self.min_length > 0 {
            info!("  >minimum amplicon length: {}", self.min_length)
        }
        if self.max_length > 0 {
            info!("  >maximum amplicon length: {}", self.max_length)
        }
        info!("  >minimum depth: {}", self.min_depth);
        if self.max_read_length > 0 {
            info!("  >reads truncated to: {}", self.max_read_length)
        }
        if self.save_tag.is_some() {
            info!(
                "  >saving selected reads with tag: {}",
                self.save_tag.clone().unwrap()
            )
        }
        if self.rng_seed.is_some() {
            info!("  >rng seed: {}", self.rng_seed.unwrap())
        }
        info!("Output file: {}", self.output_file.clone().unwrap());
    }

    // Function to build the actual configuration.
    pub fn build(self) -> RunConfiguration {
        let paired = self.resolved_paired();
        RunConfiguration {
            read_files: self.read_files,
            output_file: self.output_file.unwrap(),
            forward_primer: self.forward_primer.unwrap(),
            reverse_primer: self.reverse_primer.unwrap(),
            paired,
            strict: self.strict,
            min_length: self.min_length,
            max_length: self.max_length,
            min_depth: self.min_depth,
            max_read_length: self.max_read_length,
            save_tag: self.save_tag,
            write_stats: self.write_stats,
            rng_seed: self.rng_seed,
        }
    }
}

fn generate_error(key: &str, key_type: &str, value: &Value) -> String {
    format!(
        "Input {} could not be converted to {}: {:?}",
        key, key_type, value
    )
}

pub fn read_config_yaml(yaml: String) -> Box<RunConfiguration> {
    // Reads an input configuration file from yaml using the serde package. Then sets the
    // parameters based on the inputs. A "." value means to use the default value.

    // Opens file for reading
    let f = fs::File::open(yaml);
    let file = match f {
        Ok(l) => l,
        Err(error) => panic!("Problem reading the config file: {}", error),
    };
    // Uses serde_yaml to read the file into a HashMap
    let scrape_config: HashMap<String, Value> =
        serde_yaml::from_reader(file).expect("Could not read values");
    let mut config_builder = ConfigBuilder::new();
    for (key, value) in scrape_config {
        if value.as_str() == Some(".") {
            continue;
        }
        match key.as_str() {
            "read_files" => {
                let files = value
                    .as_sequence()
                    .expect(&generate_error(&key, "list of files", &value));
                config_builder.read_files = files
                    .iter()
                    .map(|f| f.as_str().expect("read_files must be strings").to_string())
                    .collect();
            }
            "output_file" => {
                config_builder.output_file =
                    Some(value.as_str().unwrap().to_string())
            }
            "forward_primer" => {
                config_builder.forward_primer =
                    Some(value.as_str().unwrap().to_string())
            }
            "reverse_primer" => {
                config_builder.reverse_primer =
                    Some(value.as_str().unwrap().to_string())
            }
            "paired" => {
                config_builder.paired = Some(
                    value
                        .as_bool()
                        .expect(&generate_error(&key, "boolean", &value)),
                )
            }
            "strict" => {
                config_builder.strict = value
                    .as_bool()
                    .expect(&generate_error(&key, "boolean", &value))
            }
            "min_length" => {
                config_builder.min_length = value
                    .as_u64()
                    .expect(&generate_error(&key, "integer", &value))
                    as usize
            }
            "max_length" => {
                config_builder.max_length = value
                    .as_u64()
                    .expect(&generate_error(&key, "integer", &value))
                    as usize
            }
            "min_depth" => {
                config_builder.min_depth = value
                    .as_i64()
                    .expect(&generate_error(&key, "integer", &value))
                    as i32
            }
            "max_read_length" => {
                config_builder.max_read_length = value
                    .as_u64()
                    .expect(&generate_error(&key, "integer", &value))
                    as usize
            }
            "save_tag" => {
                config_builder.save_tag = Some(value.as_str().unwrap().to_string())
            }
            "write_stats" => {
                config_builder.write_stats = value
                    .as_bool()
                    .expect(&generate_error(&key, "boolean", &value))
            }
            "rng_seed" => {
                config_builder.rng_seed = Some(
                    value
                        .as_u64()
                        .expect(&generate_error(&key, "integer", &value)),
                )
            }
            _ => {
                warn!("Unknown configuration key ignored: {}", key);
                continue;
            }
        }
    }
    let _ = &config_builder.check_and_print_config();
    Box::new(config_builder.build())
}

pub fn build_config_from_args(args: Cli) -> Box<RunConfiguration> {
    // Takes in a bunch of args from a clap CLI and builds a config based on that. More CLI
    // options will need additional items entered here, to add them to the config so they can
    // be implemented.

    // Create the ConfigBuilder object with default values
    let mut config_builder = ConfigBuilder::new();
    // The final positional argument is the output file; everything before it is input
    if args.files.len() < 2 {
        panic!("Need at least one read file and the output file name.");
    }
    let mut files = args.files;
    config_builder.output_file = files.pop();
    config_builder.read_files = files;
    if args.forward_primer != "" {
        config_builder.forward_primer = Some(args.forward_primer);
    }
    if args.reverse_primer != "" {
        config_builder.reverse_primer = Some(args.reverse_primer);
    }
    if args.paired && args.unpaired {
        panic!("--paired and --unpaired are mutually exclusive.");
    }
    if args.paired {
        config_builder.paired = Some(true);
    } else if args.unpaired {
        config_builder.paired = Some(false);
    }
    config_builder.strict = args.strict;
    config_builder.min_length = args.min_length;
    config_builder.max_length = args.max_length;
    config_builder.min_depth = args.min_depth;
    config_builder.max_read_length = args.max_read_length;
    if args.save_tag != "" {
        config_builder.save_tag = Some(args.save_tag);
    }
    config_builder.write_stats = args.stats;
    config_builder.rng_seed = args.seed;

    let _ = &config_builder.check_and_print_config();
    Box::new(config_builder.build())
}
