// The region filter: a growing set of 32-mer strings covering the reads that
// lie between the primers. Seeded from primer-carrying reads, grown by
// repeatedly selecting reads whose first 32-mer already hits the filter, and
// stopped when an iteration adds nothing or explodes (which means growth has
// walked out past a terminal primer into the flanking genome).

use log::{debug, info};
use std::collections::HashSet;

use super::fasta_tools::SeqRecord;
use super::kmer_tools::{reverse_complement_seq, KMER_LEN};
use super::primer_tools::PrimerTag;

const HOMOPOLYMER_RUN: usize = 10;
// how many start offsets the final selection pass probes
const SELECTION_WINDOW: usize = 5;

// True if the first ten bases of the kMer are a single-letter run. Such
// kMers terminate tiling: low-complexity sequence connects unrelated loci.
pub fn has_homopolymer_start(kmer: &str) -> bool {
    let bytes = kmer.as_bytes();
    if bytes.len() < HOMOPOLYMER_RUN {
        return false;
    }
    let first = bytes[0];
    bytes[..HOMOPOLYMER_RUN].iter().all(|b| *b == first)
}

// Tiles one read into the filter, left to right, stopping at the first
// kMer that contains an N, starts a homopolymer, or is already in the
// ending filter. Returns the number of new kMers added.
pub fn tile_read(
    seq: &str,
    filter: &mut HashSet<String>,
    ending_filter: &HashSet<String>,
) -> usize {
    let mut added = 0;
    if seq.len() < KMER_LEN {
        return 0;
    }
    for offset in 0..=seq.len() - KMER_LEN {
        let kmer = &seq[offset..offset + KMER_LEN];
        if kmer.bytes().any(|b| b == b'N') {
            break;
        }
        if has_homopolymer_start(kmer) {
            break;
        }
        if ending_filter.contains(kmer) {
            break;
        }
        if filter.insert(kmer.to_string()) {
            added += 1;
        }
    }
    added
}

// Builds the starting filter for one input side (R1 or R2). Primer-carrying
// reads seed the filter; the loop then selects any unprocessed read whose
// first 32-mer hits the current filter and tiles it in. Growth stops when an
// iteration selects nothing, or when it selects more than twice as many
// reads as the previous one (the runaway that signals we have left the
// amplicon). There is no fixed iteration cap.
pub fn build_side_filter(
    reads: &[&SeqRecord],
    tags: &[Option<PrimerTag>],
    ending_filter: &HashSet<String>,
) -> HashSet<String> {
    let mut filter: HashSet<String> = HashSet::new();
    let mut processed = vec![false; reads.len()];

    let mut previous_count = 0;
    for (i, read) in reads.iter().enumerate() {
        if tags[i].is_some() {
            tile_read(&read.seq, &mut filter, ending_filter);
            processed[i] = true;
            previous_count += 1;
        }
    }
    info!(
        "Region filter seeded from {} primer reads: {} kMers",
        previous_count,
        filter.len()
    );

    let mut iteration = 0;
    loop {
        iteration += 1;
        let mut selected_this_pass = 0;
        for (i, read) in reads.iter().enumerate() {
            if processed[i] || read.seq.len() < KMER_LEN {
                continue;
            }
            if filter.contains(&read.seq[..KMER_LEN]) {
                tile_read(&read.seq, &mut filter, ending_filter);
                processed[i] = true;
                selected_this_pass += 1;
            }
        }
        debug!(
            "Filter iteration {}: {} reads selected, filter size {}",
            iteration,
            selected_this_pass,
            filter.len()
        );
        if selected_this_pass == 0 {
            break;
        }
        if selected_this_pass > 2 * previous_count {
            info!(
                "Filter growth stopped at iteration {}: {} reads selected after {} (runaway)",
                iteration, selected_this_pass, previous_count
            );
            break;
        }
        previous_count = selected_this_pass;
    }
    filter
}

// Canonical culling and the strict cross-file requirement. Every kMer must
// appear in both orientations somewhere in the union; in strict mode each
// kMer (in either orientation) must additionally have been seen on both
// sides of a paired input.
pub fn refine_filters(side_filters: &[HashSet<String>], strict: bool) -> HashSet<String> {
    let mut union: HashSet<String> = HashSet::new();
    for side in side_filters {
        union.extend(side.iter().cloned());
    }
    let before = union.len();

    let mut refined: HashSet<String> = HashSet::new();
    for kmer in &union {
        let rc = reverse_complement_seq(kmer);
        if !union.contains(&rc) {
            continue;
        }
        if strict && side_filters.len() == 2 {
            let in_both = side_filters.iter().all(|side| {
                side.contains(kmer.as_str()) || side.contains(rc.as_str())
            });
            if !in_both {
                continue;
            }
        }
        refined.insert(kmer.clone());
    }
    info!(
        "Filter refinement: {} of {} kMers kept{}",
        refined.len(),
        before,
        if strict { " (strict)" } else { "" }
    );
    refined
}

// The final selection pass. A read is kept iff one of its first five kMer
// start offsets hits the refined filter.
pub fn read_is_selected(read: &SeqRecord, filter: &HashSet<String>) -> bool {
    let seq = &read.seq;
    if seq.len() < KMER_LEN {
        return false;
    }
    let last_offset = (seq.len() - KMER_LEN).min(SELECTION_WINDOW - 1);
    for offset in 0..=last_offset {
        if filter.contains(&seq[offset..offset + KMER_LEN]) {
            return true;
        }
    }
    false
}
