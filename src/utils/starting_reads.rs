// Starting-read preparation. Every retained primer-carrying read is cleaned
// against the denoised depth table (repairing or truncating around error
// kMers), short reads are grown forward until they can anchor the context
// tables, and reads that lost their primer to a sequencing error are rescued
// by matching the observed start-of-region signatures.

use log::debug;
use std::collections::{HashMap, HashSet};

use super::context_table::ContextTables;
use super::depth_table::{close, DepthTable};
use super::fasta_tools::SeqRecord;
use super::kmer_tools::{incremental_pack, pack, unpack, KMER_LEN};
use super::primer_tools::substitution_variants;

// length of the start-of-region signature recorded after the primer
pub const REGION_ANCHOR_LEN: usize = 40;
const MAX_CONSECUTIVE_CHANGES: usize = 2;

// One extension seed. Reads seeded from the reverse primer run along the
// opposite strand, so their amplicons are flipped back onto the forward
// strand at output time; the flag carries that through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartingRead {
    pub seq: String,
    pub reverse_oriented: bool,
}

#[derive(Debug, Default)]
pub struct PreparedReads {
    // primer-first sequences ready for extension
    pub starting_reads: Vec<StartingRead>,
    // the 40-mers observed immediately after a starting primer, each
    // remembering which strand its seeds run along
    pub start_of_region: HashMap<String, bool>,
    // primer prefixes actually observed on cleaned starting reads,
    // consulted again when the final amplicons are trimmed
    pub observed_primers: HashSet<String>,
    pub cleaned: usize,
    pub substituted: usize,
    pub truncated: usize,
    pub rejected: usize,
    pub rescued: usize,
    pub dropped_short: usize,
}

enum CleanOutcome {
    Kept(Vec<u8>),
    Rejected,
}

// Checks that a candidate kMer ending at window_end has pair support at
// every applicable pair length.
fn pair_supported(
    read: &[u8],
    window_end: usize,
    candidate: u64,
    contexts: &ContextTables,
) -> bool {
    for table in contexts.tables() {
        let span = table.pair_length;
        if span > window_end {
            break;
        }
        let (first, valid) = pack(read, window_end - span, KMER_LEN);
        if !valid {
            return false;
        }
        if !table.contains(first, candidate) {
            return false;
        }
    }
    true
}

// Walks the read left to right looking for depth drops. A drop at the first
// kMer is attacked with every single and double substitution; later drops
// with last-base variants only. An unfixable first kMer rejects the read,
// an unfixable later kMer truncates it there.
fn clean_read(
    seq: &str,
    depths: &DepthTable,
    contexts: &ContextTables,
    stats: &mut PreparedReads,
) -> CleanOutcome {
    let mut read = seq.as_bytes().to_vec();
    // reads are truncated at the first N: a degenerate base can be neither
    // packed nor repaired by depth evidence
    if let Some(n_pos) = read.iter().position(|b| !matches!(b, b'A' | b'C' | b'G' | b'T')) {
        read.truncate(n_pos);
    }
    if read.len() < KMER_LEN {
        return CleanOutcome::Rejected;
    }

    let mut previous_depth = 0i32;
    let mut consecutive_changes = 0usize;
    let mut offset = 0usize;
    while offset + KMER_LEN <= read.len() {
        let (kmer, _) = pack(&read, offset, KMER_LEN);
        let depth = depths.depth_of(kmer);
        let triggered = depth < depths.noise_level
            || (previous_depth > 0 && !close(depth, previous_depth));
        if !triggered {
            previous_depth = depth;
            consecutive_changes = 0;
            offset += 1;
            continue;
        }

        // enumerate repair candidates
        let variants: Vec<u64> = if offset == 0 {
            substitution_variants(&read[..KMER_LEN], 2)
                .iter()
                .map(|v| pack(v, 0, KMER_LEN).0)
                .collect()
        } else {
            super::kmer_tools::last_base_variants(kmer, KMER_LEN).to_vec()
        };
        let mut deepest_mer = 0u64;
        let mut deepest_depth = 0i32;
        for variant in variants {
            let variant_depth = depths.depth_of(variant);
            if variant_depth == 0 {
                continue;
            }
            if !pair_supported(&read, offset + KMER_LEN, variant, contexts) {
                continue;
            }
            if variant_depth > deepest_depth {
                deepest_depth = variant_depth;
                deepest_mer = variant;
            }
        }

        if deepest_depth == 0 {
            // no viable variant at all
            if offset == 0 {
                return CleanOutcome::Rejected;
            }
            read.truncate(offset + KMER_LEN - 1);
            stats.truncated += 1;
            break;
        }

        if deepest_mer == kmer {
            // the original is the best supported form; the drop stands
            previous_depth = depth;
            consecutive_changes = 0;
            offset += 1;
            continue;
        }

        let following_depth = {
            let next_offset = offset + KMER_LEN;
            if next_offset + KMER_LEN <= read.len() {
                depths.depth_of(pack(&read, next_offset, KMER_LEN).0)
            } else {
                0
            }
        };
        let substitute = depth <= deepest_depth / 20
            && !close(depth, previous_depth)
            && !close(depth, following_depth)
            && depth < depths.mean_depth / 2
            && deepest_depth >= depths.noise_level;
        if substitute {
            let repaired = unpack(deepest_mer, KMER_LEN);
            read[offset..offset + KMER_LEN].copy_from_slice(repaired.as_bytes());
            debug!(
                "Cleaned kMer at offset {}: depth {} -> {}",
                offset, depth, deepest_depth
            );
            stats.substituted += 1;
            consecutive_changes += 1;
            if consecutive_changes > MAX_CONSECUTIVE_CHANGES {
                if offset == 0 {
                    return CleanOutcome::Rejected;
                }
                read.truncate(offset + KMER_LEN - 1);
                stats.truncated += 1;
                break;
            }
            previous_depth = deepest_depth;
            offset += 1;
        } else if depth > 0 {
            // a real low-frequency form; leave it alone
            previous_depth = depth;
            consecutive_changes = 0;
            offset += 1;
        } else {
            // the original was culled and nothing may replace it
            if offset == 0 {
                return CleanOutcome::Rejected;
            }
            read.truncate(offset + KMER_LEN - 1);
            stats.truncated += 1;
            break;
        }
    }
    CleanOutcome::Kept(read)
}

// Grows a short read forward one base at a time. Each step keeps the
// candidates that survive the denoising thresholds and full pair support,
// then extends only on a near-unanimous winner or a depth that tracks the
// previous step.
fn extend_short(
    read: &mut Vec<u8>,
    target_len: usize,
    depths: &DepthTable,
    contexts: &ContextTables,
) {
    if read.len() < KMER_LEN {
        return;
    }
    let (mut last_kmer, valid) = pack(read, read.len() - KMER_LEN, KMER_LEN);
    if !valid {
        return;
    }
    let mut previous_depth = depths.depth_of(last_kmer);
    while read.len() < target_len {
        let mut alive: Vec<(u8, u64, i32)> = Vec::new();
        let mut deepest_depth = 0i32;
        for base in [b'A', b'C', b'G', b'T'] {
            let (candidate, _) = incremental_pack(last_kmer, base, KMER_LEN);
            let depth = depths.depth_of(candidate);
            if depth > 0 {
                deepest_depth = deepest_depth.max(depth);
                alive.push((base, candidate, depth));
            }
        }
        let mut survivors: Vec<(u8, u64, i32)> = Vec::new();
        for (base, candidate, depth) in alive {
            let is_noise = depth < depths.noise_level
                || (deepest_depth > depth
                    && depth < deepest_depth / 100
                    && depth < depths.mean_depth / 2);
            if !is_noise && pair_supported(read, read.len() + 1, candidate, contexts) {
                survivors.push((base, candidate, depth));
            }
        }
        if survivors.is_empty() {
            break;
        }
        let total: i32 = survivors.iter().map(|(_, _, d)| *d).sum();
        let (base, candidate, depth) = *survivors
            .iter()
            .max_by_key(|(_, _, d)| *d)
            .unwrap();
        let dominant = depth as i64 * 100 >= total as i64 * 98;
        let tracking = depth >= depths.noise_level && close(depth, previous_depth);
        if !dominant && !tracking {
            break;
        }
        read.push(base);
        last_kmer = candidate;
        previous_depth = depth;
    }
}

// Prepares the full starting-read set: cleans and length-extends the
// primer-first candidates from both primer sides, records the
// start-of-region anchors, then sweeps the remaining reads for rescuable
// partial-primer starts.
pub fn prepare_starting_reads(
    candidates: &[StartingRead],
    other_reads: &[&SeqRecord],
    depths: &DepthTable,
    contexts: &ContextTables,
    primer_length: usize,
) -> PreparedReads {
    let mut prepared = PreparedReads::default();
    let target_len = REGION_ANCHOR_LEN + primer_length;
    let mut rejected_seqs: Vec<String> = Vec::new();

    for candidate in candidates {
        match clean_read(&candidate.seq, depths, contexts, &mut prepared) {
            CleanOutcome::Rejected => {
                debug!(
                    "Starting read rejected at its first kMer: {}",
                    candidate.seq
                );
                prepared.rejected += 1;
                rejected_seqs.push(candidate.seq.clone());
            }
            CleanOutcome::Kept(mut read) => {
                if read.len() < target_len {
                    extend_short(&mut read, target_len, depths, contexts);
                }
                if read.len() < target_len {
                    debug!(
                        "Starting read dropped: {} bases after cleaning, need {}",
                        read.len(),
                        target_len
                    );
                    prepared.dropped_short += 1;
                    continue;
                }
                let read = String::from_utf8(read).unwrap();
                prepared
                    .observed_primers
                    .insert(read[..primer_length].to_string());
                prepared.start_of_region.insert(
                    read[primer_length..primer_length + REGION_ANCHOR_LEN].to_string(),
                    candidate.reverse_oriented,
                );
                prepared.cleaned += 1;
                prepared.starting_reads.push(StartingRead {
                    seq: read,
                    reverse_oriented: candidate.reverse_oriented,
                });
            }
        }
    }

    // rescue: a read whose first few bases are a primer remnant followed by
    // a known start-of-region anchor restarts at that anchor, on the
    // anchor's strand
    if !prepared.start_of_region.is_empty() {
        let rejected_records: Vec<SeqRecord> = rejected_seqs
            .iter()
            .map(|seq| SeqRecord::new("rejected", seq))
            .collect();
        let rescue_pool = other_reads
            .iter()
            .copied()
            .chain(rejected_records.iter());
        for read in rescue_pool {
            let seq = &read.seq;
            if seq.len() < REGION_ANCHOR_LEN {
                continue;
            }
            let max_p = primer_length.min(seq.len() - REGION_ANCHOR_LEN);
            for p in 0..max_p {
                let reverse_oriented = match prepared
                    .start_of_region
                    .get(&seq[p..p + REGION_ANCHOR_LEN])
                {
                    Some(orientation) => *orientation,
                    None => continue,
                };
                if let CleanOutcome::Kept(mut rescued) =
                    clean_read(&seq[p..], depths, contexts, &mut prepared)
                {
                    if rescued.len() < REGION_ANCHOR_LEN {
                        extend_short(&mut rescued, REGION_ANCHOR_LEN, depths, contexts);
                    }
                    if rescued.len() >= REGION_ANCHOR_LEN {
                        debug!("Rescued a partial-primer read at offset {}", p);
                        prepared.rescued += 1;
                        prepared.starting_reads.push(StartingRead {
                            seq: String::from_utf8(rescued).unwrap(),
                            reverse_oriented,
                        });
                    }
                }
                break;
            }
        }
    }
    prepared
}
