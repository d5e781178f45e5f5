// Run statistics. Counters are filled in as the pipeline runs and written
// as JSON next to the output when --stats is given; a short summary is
// logged at the end of every run either way.

use chrono::Local;
use log::info;
use serde::Serialize;
use std::io;
use std::io::Write;

use super::file_tools::open_output;

#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub started_at: String,
    pub files_read: usize,
    pub reads_total: usize,
    pub reads_tagged_fp: usize,
    pub reads_tagged_fp_prime: usize,
    pub reads_tagged_rp: usize,
    pub reads_tagged_rp_prime: usize,
    pub filter_kmers: usize,
    pub refined_filter_kmers: usize,
    pub ending_filter_kmers: usize,
    pub reads_selected: usize,
    pub distinct_kmers: usize,
    pub noise_level: i32,
    pub mean_depth: i32,
    pub starting_reads: usize,
    pub starting_reads_substituted: usize,
    pub starting_reads_truncated: usize,
    pub starting_reads_rejected: usize,
    pub starting_reads_rescued: usize,
    pub starting_reads_dropped_short: usize,
    pub extensions: usize,
    pub reached_terminal: usize,
    pub coin_tosses: usize,
    pub cache_hits: usize,
    pub dropped_no_terminal: usize,
    pub dropped_short: usize,
    pub dropped_long: usize,
    pub distinct_amplicons: usize,
    pub amplicon_abundances: Vec<usize>,
}

impl RunStats {
    pub fn new() -> RunStats {
        RunStats {
            started_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ..Default::default()
        }
    }

    pub fn write_json(&self, filename: &str) -> io::Result<()> {
        let mut outfile = open_output(filename)?;
        let json = serde_json::to_string_pretty(self)?;
        writeln!(&mut outfile, "{}", json)?;
        info!("Wrote run statistics to {}", filename);
        Ok(())
    }

    pub fn log_summary(&self) {
        info!(
            "Reads: {} in, {} primer-tagged, {} selected",
            self.reads_total,
            self.reads_tagged_fp
                + self.reads_tagged_fp_prime
                + self.reads_tagged_rp
                + self.reads_tagged_rp_prime,
            self.reads_selected
        );
        info!(
            "Starting reads: {} ({} rescued, {} rejected, {} too short)",
            self.starting_reads,
            self.starting_reads_rescued,
            self.starting_reads_rejected,
            self.starting_reads_dropped_short
        );
        info!(
            "Extensions: {} run, {} reached a terminal primer, {} coin tosses",
            self.extensions, self.reached_terminal, self.coin_tosses
        );
        info!(
            "Dropped: {} without terminal, {} short, {} long",
            self.dropped_no_terminal, self.dropped_short, self.dropped_long
        );
        info!("Distinct amplicons: {}", self.distinct_amplicons);
    }
}
