// Post-extension trimming and the output writer. Strips the leading
// starting primer and the trailing terminal primer, applies the length
// gates, flips reverse-seeded amplicons back onto the forward strand, then
// dereplicates identical amplicons into abundance counts before writing.

use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::io;

use super::extension::ExtensionOutcome;
use super::fasta_tools::write_amplicons;
use super::kmer_tools::{pack, reverse_complement_seq};
use super::primer_tools::PrimerVariantSet;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TrimStats {
    pub dropped_no_terminal: usize,
    pub dropped_short: usize,
    pub dropped_long: usize,
    pub kept: usize,
}

// Trims one extended read. Returns the inter-primer sequence and whether a
// terminal primer was found (and stripped) at the tail.
fn trim_extended(
    outcome: &ExtensionOutcome,
    primers: &PrimerVariantSet,
    observed_primers: &HashSet<String>,
) -> (String, bool) {
    let m = primers.primer_length;
    let mut seq = outcome.sequence.clone();
    if seq.len() >= m && observed_primers.contains(&seq[..m]) {
        seq.drain(..m);
    }
    let mut full_length = false;
    if seq.len() >= m {
        let (tail, valid) = pack(seq.as_bytes(), seq.len() - m, m);
        if valid && primers.terminating.contains(&tail) {
            seq.truncate(seq.len() - m);
            full_length = true;
        }
    }
    (seq, full_length)
}

// Applies the primer strips and length gates to every extension, flips
// reverse-seeded amplicons onto the forward strand, then aggregates
// identical sequences into counts. The returned list is sorted deepest
// first so the R-numbers are stable run to run.
pub fn collect_amplicons(
    outcomes: &[(ExtensionOutcome, bool)],
    primers: &PrimerVariantSet,
    observed_primers: &HashSet<String>,
    min_length: usize,
    max_length: usize,
) -> (Vec<(String, usize)>, TrimStats) {
    let mut stats = TrimStats::default();
    let mut abundance: HashMap<String, usize> = HashMap::new();
    for (outcome, reverse_oriented) in outcomes {
        let (mut seq, full_length) = trim_extended(outcome, primers, observed_primers);
        if max_length > 0 && seq.len() > max_length {
            debug!("Dropping {}-base amplicon: over the length cap", seq.len());
            stats.dropped_long += 1;
            continue;
        }
        if min_length > 0 {
            if seq.len() < min_length {
                debug!("Dropping {}-base amplicon: under the length floor", seq.len());
                stats.dropped_short += 1;
                continue;
            }
        } else if !full_length {
            debug!(
                "Dropping {}-base amplicon: no terminal primer reached",
                seq.len()
            );
            stats.dropped_no_terminal += 1;
            continue;
        }
        if *reverse_oriented {
            seq = reverse_complement_seq(&seq);
        }
        stats.kept += 1;
        *abundance.entry(seq).or_insert(0) += 1;
    }

    let mut amplicons: Vec<(String, usize)> = abundance.into_iter().collect();
    amplicons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    (amplicons, stats)
}

// Writes the dereplicated amplicons as R1, R2, ... and logs the abundances.
pub fn write_output(amplicons: &[(String, usize)], output_file: &str) -> io::Result<()> {
    let sequences: Vec<String> = amplicons.iter().map(|(seq, _)| seq.clone()).collect();
    for (index, (seq, count)) in amplicons.iter().enumerate() {
        info!("R{}: {} bases, abundance {}", index + 1, seq.len(), count);
    }
    write_amplicons(&sequences, output_file)
}
