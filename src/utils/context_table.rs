// Context tables: for each pair length L, a table of hashed 32-mer pairs
// (p, p + L - 32) seen in the selected reads. A pair hash is an L-mer
// fingerprint; the extension engine and the read cleaner use it to ask "has
// this candidate kMer ever been seen L bases downstream of that one", which
// disambiguates branches that depth alone cannot.

use log::info;
use std::collections::HashMap;

use super::depth_table::DepthTable;
use super::fasta_tools::SeqRecord;
use super::kmer_tools::{canonical, packed_windows, KMER_LEN};

// the shortest pair span, and the spacing between successive spans
pub const FIRST_PAIR_LENGTH: usize = 40;
pub const PAIR_LENGTH_STEP: usize = 8;

// Order-sensitive would be wrong here: a pair and its reverse-strand image
// must land on the same key, which the double canonical guarantees.
pub fn hash_pair(first: u64, second: u64) -> u64 {
    canonical(
        canonical(first, KMER_LEN) ^ canonical(second, KMER_LEN),
        KMER_LEN,
    )
}

#[derive(Debug)]
pub struct ContextTable {
    pub pair_length: usize,
    counts: HashMap<u64, i32>,
}

impl ContextTable {
    pub fn contains(&self, first: u64, second: u64) -> bool {
        self.counts.contains_key(&hash_pair(first, second))
    }

    pub fn distinct_pairs(&self) -> usize {
        self.counts.len()
    }
}

#[derive(Debug)]
pub struct ContextTables {
    tables: Vec<ContextTable>,
}

impl ContextTables {
    // Builds one table per pair length 40, 48, ... up to the longest read.
    // Pairs with a denoised-to-zero endpoint are skipped: a culled kMer must
    // not keep vouching for extensions through its old contexts.
    pub fn build(
        reads: &[&SeqRecord],
        depths: &DepthTable,
        longest_read: usize,
    ) -> ContextTables {
        let mut tables: Vec<ContextTable> = Vec::new();
        let mut pair_length = FIRST_PAIR_LENGTH;
        while pair_length <= longest_read {
            tables.push(ContextTable {
                pair_length,
                counts: HashMap::new(),
            });
            pair_length += PAIR_LENGTH_STEP;
        }

        for read in reads {
            let windows = packed_windows(&read.seq, KMER_LEN);
            for table in tables.iter_mut() {
                let span = table.pair_length;
                if read.seq.len() < span {
                    continue;
                }
                for p in 0..=read.seq.len() - span {
                    let first = windows[p];
                    let second = windows[p + span - KMER_LEN];
                    let (first, second) = match (first, second) {
                        (Some(a), Some(b)) => (a, b),
                        _ => continue,
                    };
                    if depths.depth_of(first) == 0 || depths.depth_of(second) == 0 {
                        continue;
                    }
                    *table.counts.entry(hash_pair(first, second)).or_insert(0) += 1;
                }
            }
        }
        for table in &tables {
            info!(
                "Context table L={}: {} distinct pairs",
                table.pair_length,
                table.counts.len()
            );
        }
        ContextTables { tables }
    }

    // Tables in ascending pair-length order.
    pub fn tables(&self) -> &[ContextTable] {
        &self.tables
    }

    pub fn pair_lengths(&self) -> Vec<usize> {
        self.tables.iter().map(|t| t.pair_length).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::kmer_tools::{pack, reverse_complement};

    const BACKBONE: &str = "AGCTTAGGCATCGTACCGATGCAACTGGATCCATGGTTACGCGTAGGCTTAACCGGATCAGTCCATAGGTTCAAGCTAGG";

    fn table_fixture() -> (Vec<SeqRecord>, DepthTable) {
        let reads: Vec<SeqRecord> = (0..4)
            .map(|i| SeqRecord::new(&format!("r{}", i), BACKBONE))
            .collect();
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let depths = DepthTable::build(&refs, 2);
        (reads, depths)
    }

    #[test]
    fn test_pair_lengths_ladder() {
        let (reads, depths) = table_fixture();
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let tables = ContextTables::build(&refs, &depths, 80);
        assert_eq!(tables.pair_lengths(), vec![40, 48, 56, 64, 72, 80]);
        let short = ContextTables::build(&refs, &depths, 39);
        assert!(short.pair_lengths().is_empty());
    }

    #[test]
    fn test_observed_pairs_are_found() {
        let (reads, depths) = table_fixture();
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let tables = ContextTables::build(&refs, &depths, 80);
        let (first, _) = pack(BACKBONE.as_bytes(), 0, 32);
        let (second, _) = pack(BACKBONE.as_bytes(), 8, 32);
        // the pair at offsets (0, 8) spans L = 40
        assert!(tables.tables()[0].contains(first, second));
        // an unobserved pairing misses
        let (elsewhere, _) = pack(BACKBONE.as_bytes(), 17, 32);
        assert!(!tables.tables()[0].contains(first, elsewhere));
    }

    #[test]
    fn test_hash_pair_is_strand_symmetric() {
        let (a, _) = pack(BACKBONE.as_bytes(), 0, 32);
        let (b, _) = pack(BACKBONE.as_bytes(), 8, 32);
        let a_rc = reverse_complement(a, 32);
        let b_rc = reverse_complement(b, 32);
        // the reverse-strand read presents the pair as (rc(b), rc(a))
        assert_eq!(hash_pair(a, b), hash_pair(b_rc, a_rc));
    }

    #[test]
    fn test_denoised_endpoints_are_skipped() {
        // twenty clean copies plus one read with a substitution; after
        // denoising, pairs touching the culled error kMers must not be
        // recorded even though the error read is still in the input
        let mut reads: Vec<SeqRecord> = (0..20)
            .map(|i| SeqRecord::new(&format!("r{}", i), BACKBONE))
            .collect();
        let mut error_seq = BACKBONE.as_bytes().to_vec();
        error_seq[45] = b'A'; // reference base here is G
        let error_seq = String::from_utf8(error_seq).unwrap();
        reads.push(SeqRecord::new("err", &error_seq));
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let mut depths = DepthTable::build(&refs, 2);
        depths.denoise(&refs);

        let tables = ContextTables::build(&refs, &depths, 80);
        let (error_first, _) = pack(error_seq.as_bytes(), 14, 32);
        let (error_second, _) = pack(error_seq.as_bytes(), 22, 32);
        assert_eq!(depths.depth_of(error_first), 0);
        assert!(!tables.tables()[0].contains(error_first, error_second));
        // clean pairs from the same reads are present
        let (clean_first, _) = pack(BACKBONE.as_bytes(), 14, 32);
        let (clean_second, _) = pack(BACKBONE.as_bytes(), 22, 32);
        assert!(tables.tables()[0].contains(clean_first, clean_second));
    }
}
