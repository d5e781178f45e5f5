// The depth table: canonical packed 32-mer -> observed count, built by
// tiling the selected reads, plus the two derived thresholds the rest of the
// pipeline reads constantly. noise_level is the depth below which a kMer is
// a candidate sequencing error; mean_depth anchors the "is this drop real"
// comparisons. The denoising pass rewrites counts in place: error kMers go
// to zero and their counts move onto the deepest last-base variant.

use log::{debug, info};
use std::collections::HashMap;

use super::fasta_tools::SeqRecord;
use super::kmer_tools::{canonical, last_base_variants, packed_windows, unpack, KMER_LEN};

// Two depths are close when the larger is no more than twice the smaller.
// Zero is never close to anything.
pub fn close(a: i32, b: i32) -> bool {
    if a <= 0 || b <= 0 {
        return false;
    }
    let (max, min) = if a > b { (a, b) } else { (b, a) };
    max - min <= max / 2
}

#[derive(Debug)]
pub struct DepthTable {
    counts: HashMap<u64, i32>,
    pub min_depth: i32,
    pub noise_level: i32,
    pub mean_depth: i32,
}

impl DepthTable {
    // Tiles every selected read and counts canonical 32-mers. kMers with an
    // N are skipped silently; the read is kept.
    pub fn build(reads: &[&SeqRecord], min_depth: i32) -> DepthTable {
        let mut counts: HashMap<u64, i32> = HashMap::new();
        for read in reads {
            for window in packed_windows(&read.seq, KMER_LEN).into_iter().flatten() {
                *counts.entry(canonical(window, KMER_LEN)).or_insert(0) += 1;
            }
        }
        let mut table = DepthTable {
            counts,
            min_depth,
            noise_level: min_depth,
            mean_depth: 0,
        };
        table.compute_levels();
        info!(
            "Depth table built: {} distinct kMers, noise level {}, mean depth {}",
            table.counts.len(),
            table.noise_level,
            table.mean_depth
        );
        table
    }

    // Depth of a kMer in either orientation.
    pub fn depth_of(&self, kmer: u64) -> i32 {
        *self
            .counts
            .get(&canonical(kmer, KMER_LEN))
            .unwrap_or(&0)
    }

    pub fn distinct_kmers(&self) -> usize {
        self.counts.len()
    }

    fn set_depth(&mut self, kmer: u64, depth: i32) {
        self.counts.insert(canonical(kmer, KMER_LEN), depth);
    }

    fn add_depth(&mut self, kmer: u64, depth: i32) {
        *self
            .counts
            .entry(canonical(kmer, KMER_LEN))
            .or_insert(0) += depth;
    }

    // The deepest of the four last-base variants of a kMer.
    pub fn deepest_variant(&self, kmer: u64) -> (u64, i32) {
        let mut deepest_mer = kmer;
        let mut deepest_depth = 0;
        for variant in last_base_variants(kmer, KMER_LEN) {
            let depth = self.depth_of(variant);
            if depth > deepest_depth {
                deepest_depth = depth;
                deepest_mer = variant;
            }
        }
        (deepest_mer, deepest_depth)
    }

    // Harmonic mean of the counts at or above min_depth, and the thresholds
    // derived from it. Called after the build and again after denoising.
    fn compute_levels(&mut self) {
        let mut reciprocal_sum = 0.0f64;
        let mut n = 0u64;
        for count in self.counts.values() {
            if *count >= self.min_depth {
                reciprocal_sum += 1.0 / *count as f64;
                n += 1;
            }
        }
        let mean = if n > 0 { n as f64 / reciprocal_sum } else { 0.0 };
        self.noise_level = self.min_depth.max((mean / 10.0) as i32);
        self.mean_depth = (mean.round() as i32).max(5 * self.noise_level);
    }

    // The denoising pass. Walks each selected read left to right watching
    // for depth drops. A drop that does not recover one kMer-span later and
    // has no support is culled: the count moves onto the deepest last-base
    // variant and the cull propagates rightward until depth rises again.
    pub fn denoise(&mut self, reads: &[&SeqRecord]) {
        let mut culled = 0usize;
        for read in reads {
            culled += self.denoise_read(&read.seq);
        }
        self.compute_levels();
        info!(
            "Denoising culled {} kMers; noise level {}, mean depth {}",
            culled, self.noise_level, self.mean_depth
        );
    }

    fn denoise_read(&mut self, seq: &str) -> usize {
        let windows = packed_windows(seq, KMER_LEN);
        let mut culled = 0usize;
        let mut previous_depth = 0i32;
        let mut i = 0usize;
        while i < windows.len() {
            let kmer = match windows[i] {
                Some(kmer) => kmer,
                None => {
                    i += 1;
                    continue;
                }
            };
            let depth = self.depth_of(kmer);
            if depth == 0 {
                i += 1;
                continue;
            }
            // climbing or level depth is never an error signature
            if close(depth, previous_depth) || depth > previous_depth {
                previous_depth = depth;
                i += 1;
                continue;
            }
            // a drop that persists one full kMer-span later is a genuine
            // low-frequency sequence, not an error
            if let Some(Some(following)) = windows.get(i + KMER_LEN) {
                if close(depth, self.depth_of(*following)) {
                    previous_depth = depth;
                    i += 1;
                    continue;
                }
            }
            let (deepest_mer, deepest_depth) = self.deepest_variant(kmer);
            let is_noise = depth < self.noise_level;
            let is_dwarfed = deepest_depth > depth
                && depth < deepest_depth / 100
                && depth < self.mean_depth / 2;
            if !is_noise && !is_dwarfed {
                previous_depth = depth;
                i += 1;
                continue;
            }
            debug!(
                "Culling kMer {} depth {} (deepest variant depth {})",
                unpack(kmer, KMER_LEN),
                depth,
                deepest_depth
            );
            self.set_depth(kmer, 0);
            if deepest_mer != kmer && deepest_depth > depth {
                self.add_depth(deepest_mer, depth);
            }
            culled += 1;
            // propagate the cull downstream until the depth rises back
            // above the culled depth
            let culled_depth = depth;
            let mut j = i + 1;
            while j < windows.len() {
                let downstream = match windows[j] {
                    Some(kmer) => kmer,
                    None => break,
                };
                let downstream_depth = self.depth_of(downstream);
                if downstream_depth > culled_depth {
                    break;
                }
                if downstream_depth == 0 {
                    j += 1;
                    continue;
                }
                let (alt_mer, alt_depth) = self.deepest_variant(downstream);
                self.set_depth(downstream, 0);
                culled += 1;
                if alt_mer != downstream && alt_depth > downstream_depth {
                    self.add_depth(alt_mer, downstream_depth);
                    j += 1;
                    break;
                }
                j += 1;
            }
            i = j;
        }
        culled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::kmer_tools::pack;

    const BACKBONE: &str = "AGCTTAGGCATCGTACCGATGCAACTGGATCCATGGTTACGCGTAGGCTTAACCGGATCAGTCCATAGGTTCAAGCTAGG";

    fn records(copies: usize, seq: &str) -> Vec<SeqRecord> {
        (0..copies)
            .map(|i| SeqRecord::new(&format!("r{}", i), seq))
            .collect()
    }

    #[test]
    fn test_close() {
        assert!(close(10, 10));
        assert!(close(10, 5));
        assert!(close(5, 10));
        assert!(!close(10, 4));
        assert!(!close(1, 3));
        assert!(!close(0, 10));
        assert!(!close(10, 0));
    }

    #[test]
    fn test_build_counts_both_strands_together() {
        let forward = records(3, BACKBONE);
        let reverse = records(
            2,
            &crate::utils::kmer_tools::reverse_complement_seq(BACKBONE),
        );
        let mut all: Vec<&SeqRecord> = forward.iter().collect();
        all.extend(reverse.iter());
        let table = DepthTable::build(&all, 2);
        let (kmer, _) = pack(BACKBONE.as_bytes(), 0, 32);
        // 3 forward + 2 reverse copies land on the same canonical key
        assert_eq!(table.depth_of(kmer), 5);
        assert_eq!(
            table.depth_of(crate::utils::kmer_tools::reverse_complement(kmer, 32)),
            5
        );
    }

    #[test]
    fn test_levels_from_uniform_counts() {
        let reads = records(4, BACKBONE);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let table = DepthTable::build(&refs, 2);
        // every kMer appears exactly 4 times, so the harmonic mean is 4
        assert_eq!(table.noise_level, 2);
        assert_eq!(table.mean_depth, 10);
    }

    #[test]
    fn test_kmers_with_n_are_skipped() {
        let seq = format!("{}N{}", &BACKBONE[..20], &BACKBONE[20..60]);
        let reads = records(1, &seq);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let table = DepthTable::build(&refs, 2);
        // windows overlapping the N contributed nothing, the rest did
        let (straddling, _) = pack(BACKBONE.as_bytes(), 10, 32);
        assert_eq!(table.depth_of(straddling), 0);
        let windows = packed_windows(&seq, 32);
        let valid = windows.iter().flatten().count();
        assert_eq!(table.distinct_kmers(), valid);
    }

    #[test]
    fn test_denoise_culls_singleton_error() {
        // twenty clean copies and one read with a substitution mid-way
        let mut seqs = records(20, BACKBONE);
        let mut error_seq = BACKBONE.as_bytes().to_vec();
        let error_pos = 45;
        error_seq[error_pos] = if error_seq[error_pos] == b'A' { b'C' } else { b'A' };
        let error_seq = String::from_utf8(error_seq).unwrap();
        seqs.push(SeqRecord::new("err", &error_seq));
        let refs: Vec<&SeqRecord> = seqs.iter().collect();
        let mut table = DepthTable::build(&refs, 2);

        let first_error_offset = error_pos - 31;
        let (error_kmer, _) = pack(error_seq.as_bytes(), first_error_offset, 32);
        let (true_kmer, _) = pack(BACKBONE.as_bytes(), first_error_offset, 32);
        assert_eq!(table.depth_of(error_kmer), 1);
        assert_eq!(table.depth_of(true_kmer), 20);

        table.denoise(&refs);
        // the error trough is gone and the first culled count was moved
        // onto its deepest variant, the true kMer
        assert_eq!(table.depth_of(error_kmer), 0);
        assert_eq!(table.depth_of(true_kmer), 21);
        for offset in first_error_offset..=error_pos {
            let (kmer, valid) = pack(error_seq.as_bytes(), offset, 32);
            if valid {
                assert_eq!(table.depth_of(kmer), 0, "offset {}", offset);
            }
        }
        // clean kMers away from the error are untouched; the error read's
        // clean prefix still counts toward them
        let (clean, _) = pack(BACKBONE.as_bytes(), 0, 32);
        assert_eq!(table.depth_of(clean), 21);
    }

    #[test]
    fn test_denoise_keeps_low_frequency_variant() {
        // a five-copy minor sequence that shares its first 40 bases with a
        // twenty-copy major one, then diverges for good. Walking a minor
        // read shows a sharp drop at offset 9, but the drop persists a full
        // kMer-span later, which marks it a real low-frequency variant.
        let major = records(20, BACKBONE);
        let minor_seq = format!(
            "{}{}",
            &BACKBONE[..40],
            "TACGATTGCCAGTTCGAAGGCTTAGCCTAGACGTTCAGGT"
        );
        let minor = records(5, &minor_seq);
        let mut all: Vec<&SeqRecord> = major.iter().collect();
        all.extend(minor.iter());
        let mut table = DepthTable::build(&all, 2);
        table.denoise(&all);
        let (minor_kmer, _) = pack(minor_seq.as_bytes(), 30, 32);
        assert_eq!(table.depth_of(minor_kmer), 5);
        // the shared prefix kept its stacked depth too
        let (shared, _) = pack(BACKBONE.as_bytes(), 0, 32);
        assert_eq!(table.depth_of(shared), 25);
    }
}
