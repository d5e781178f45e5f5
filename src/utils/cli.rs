// The clap interface for rusty-pcr. Read files and the output name arrive
// as positional arguments; primers and the filtering knobs are options. A
// YAML run configuration can stand in for everything except the logging
// options, which stay on the command line so a broken config file can still
// be diagnosed from the log it produces.

extern crate clap;

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Cli {
    /*
    Command line interface for rusty-pcr. The current configuration items allowed are listed
    below, please add to the list below as new things are added (then update this message when
    the options are stable).

    config <String> = path to a YAML run configuration; when given, its values replace the
        other non-logging options below.

    files <Vec<String>> = one or more read files (fasta or fastq, optionally gzipped),
        followed by the output fasta file name as the final positional argument.
    forward_primer <String> = the forward PCR primer, IUPAC degenerate codes allowed.
    reverse_primer <String> = the reverse PCR primer, IUPAC degenerate codes allowed.
    paired/unpaired = force paired or unpaired treatment of the read files. By default an
        even number of files is treated as (R1, R2) pairs.
    strict = with paired files, only keep filter kMers seen on both sides of a pair.
    min <usize> = minimum amplicon length to report. 0 means only full-length amplicons
        (those that reached a terminal primer) are reported. If set, must be at least 40.
    max <usize> = maximum amplicon length to report. 0 means unlimited. If set, must be at
        least 40.
    mindepth <i32> = minimum kMer depth used when the depth summary is computed. Default 2.
    maxreadlength <usize> = truncate input reads to this many bases. 0 means leave them be.
    save <String> = write the selected read set to <TAG>_selected_reads.fasta.
    stats = write run statistics as JSON next to the output file.
    seed <u64> = seed for the branch-choice RNG, for reproducible runs.

    The following commands are independent of the config and not affected by it one way or another:
    log = record every cleaning, extension and dropping decision in the log file.
    log_level <String> = Set a log level for the run. Everything at and above the level chosen
        will be displayed in both logs. See simplelog docs for more info:
        https://docs.rs/simplelog/latest/simplelog/enum.Level.html
    log_dest <String> = Full path filename where to write the log.
     */
    #[arg(short='C', long="config-yaml", default_value_t=String::new(),
    help="Path to a YAML run configuration; its values replace every \
    non-logging option given here")]
    pub config: String,

    // All of these arguments are overridden by the config file
    #[arg(required=false, num_args=0..,
    help="One or more read files, then the output fasta file name")]
    pub files: Vec<String>,
    #[arg(short='f', long="forward-primer", default_value_t=String::new())]
    pub forward_primer: String,
    #[arg(short='r', long="reverse-primer", default_value_t=String::new())]
    pub reverse_primer: String,
    #[arg(long="paired", default_value_t=false)]
    pub paired: bool,
    #[arg(long="unpaired", default_value_t=false)]
    pub unpaired: bool,
    #[arg(long="strict", default_value_t=false)]
    pub strict: bool,
    #[arg(long="min", default_value_t=0)]
    pub min_length: usize,
    #[arg(long="max", default_value_t=0)]
    pub max_length: usize,
    #[arg(long="mindepth", default_value_t=2)]
    pub min_depth: i32,
    #[arg(long="maxreadlength", default_value_t=0)]
    pub max_read_length: usize,
    #[arg(long="save", default_value_t=String::new())]
    pub save_tag: String,
    #[arg(long="stats", default_value_t=false)]
    pub stats: bool,
    #[arg(long="seed")]
    pub seed: Option<u64>,

    // These options relate to the logging features and are not overridden by a config
    #[arg(long="log", default_value_t=false,
    help="Log every cleaning, extension and dropping decision (debug level)")]
    pub log_decisions: bool,
    #[arg(long="log-level", default_value_t=String::from("Info"),
    help="Enter one of Trace, Debug, Info, Warn, Error, Off")]
    pub log_level: String,
    #[arg(long="log-dest", default_value_t=String::from("rusty_pcr.log"),
    help="Full path and name to log file")]
    pub log_dest: String,
}

// The Cli struct carries no logic of its own; the config builder tests
// exercise every field.
