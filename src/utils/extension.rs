// The extension engine. Each starting read grows one base at a time through
// the kMer graph: the four possible next kMers are pruned by depth, then by
// context-pair support at increasing pair lengths, and when more than one
// survives, a recursive look-ahead extends a copy down every branch to see
// which ones reach a terminal primer. A loop trap of visited kMers and a
// recursion ceiling of 20 keep every path finite.

use log::debug;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use std::collections::{HashMap, HashSet};

use super::context_table::ContextTables;
use super::depth_table::DepthTable;
use super::kmer_tools::{incremental_pack, pack, KMER_LEN};
use super::primer_tools::PrimerVariantSet;

const MAX_RECURSION_DEPTH: usize = 20;
const NEXT_BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOutcome {
    pub sequence: String,
    pub reached_terminal: bool,
    pub coin_tossed: bool,
}

pub struct Extender<'a> {
    depths: &'a DepthTable,
    contexts: &'a ContextTables,
    primers: &'a PrimerVariantSet,
    // prefix -> (full extension, reached terminal); deterministic results only
    cache: HashMap<String, (String, bool)>,
    rng: ChaCha20Rng,
    pub coin_tosses: usize,
    pub cache_hits: usize,
}

#[derive(Clone, Copy)]
struct Candidate {
    base: u8,
    kmer: u64,
    depth: i32,
}

impl<'a> Extender<'a> {
    pub fn new(
        depths: &'a DepthTable,
        contexts: &'a ContextTables,
        primers: &'a PrimerVariantSet,
        rng: ChaCha20Rng,
    ) -> Extender<'a> {
        Extender {
            depths,
            contexts,
            primers,
            cache: HashMap::new(),
            rng,
            coin_tosses: 0,
            cache_hits: 0,
        }
    }

    // Extends one starting read to its end. On success the sequence ends
    // exactly at the terminal primer's last base.
    pub fn extend_starting_read(&mut self, starting_read: &str) -> ExtensionOutcome {
        let mut trap: HashSet<u64> = HashSet::new();
        let (sequence, reached_terminal, coin_tossed) =
            self.extend(starting_read.to_string(), &mut trap, 0);
        debug!(
            "Extension of {}-base read: {} bases, terminal {}{}",
            starting_read.len(),
            sequence.len(),
            reached_terminal,
            if coin_tossed { ", coin tossed" } else { "" }
        );
        ExtensionOutcome {
            sequence,
            reached_terminal,
            coin_tossed,
        }
    }

    fn extend(
        &mut self,
        mut read: String,
        trap: &mut HashSet<u64>,
        depth_level: usize,
    ) -> (String, bool, bool) {
        loop {
            if read.len() < KMER_LEN {
                return (read, false, false);
            }
            let (kmer, valid) = pack(read.as_bytes(), read.len() - KMER_LEN, KMER_LEN);
            if !valid {
                return (read, false, false);
            }
            if !trap.insert(kmer) {
                // already visited on this path
                return (read, false, false);
            }
            if self.primers.ends_with_terminal(kmer) {
                return (read, true, false);
            }

            // the four possible continuations and their depths
            let mut alive: Vec<Candidate> = Vec::with_capacity(4);
            let mut deepest = 0i32;
            for base in NEXT_BASES {
                let (next, _) = incremental_pack(kmer, base, KMER_LEN);
                let depth = self.depths.depth_of(next);
                if depth > 0 {
                    deepest = deepest.max(depth);
                    alive.push(Candidate {
                        base,
                        kmer: next,
                        depth,
                    });
                }
            }
            if alive.is_empty() {
                return (read, false, false);
            }
            alive.retain(|c| {
                !(c.depth < self.depths.noise_level
                    && c.depth < deepest / 20
                    && c.depth < self.depths.mean_depth / 2)
            });
            if alive.len() == 1 {
                read.push(alive[0].base as char);
                continue;
            }

            // context pruning at ascending pair lengths; an over-aggressive
            // length reverts to the survivors of the one before it
            let mut survivors = alive;
            for table in self.contexts.tables() {
                if survivors.len() <= 1 {
                    break;
                }
                let span = table.pair_length;
                if read.len() < span {
                    break;
                }
                let first_offset = read.len() - span + 1;
                let (first, valid) = pack(read.as_bytes(), first_offset, KMER_LEN);
                if !valid {
                    continue;
                }
                let filtered: Vec<Candidate> = survivors
                    .iter()
                    .copied()
                    .filter(|c| table.contains(first, c.kmer))
                    .collect();
                if filtered.is_empty() {
                    break;
                }
                if filtered.len() == 1 && filtered[0].depth < self.depths.noise_level {
                    break;
                }
                survivors = filtered;
            }
            if survivors.len() == 1 {
                read.push(survivors[0].base as char);
                continue;
            }

            if depth_level >= MAX_RECURSION_DEPTH {
                // too deep to look ahead; give up on this branch
                return (read, false, false);
            }

            // look-ahead: run every surviving branch to completion
            let mut branches: Vec<(Candidate, String, bool, bool)> =
                Vec::with_capacity(survivors.len());
            for candidate in &survivors {
                let mut trial = read.clone();
                trial.push(candidate.base as char);
                let cached = self
                    .cache
                    .get(&trial)
                    .map(|(extension, reached)| (extension.clone(), *reached));
                if let Some((extension, reached)) = cached {
                    self.cache_hits += 1;
                    branches.push((*candidate, extension, reached, false));
                    continue;
                }
                let mut branch_trap = trap.clone();
                let (extension, reached, tossed) =
                    self.extend(trial.clone(), &mut branch_trap, depth_level + 1);
                if !tossed {
                    self.cache.insert(trial, (extension.clone(), reached));
                }
                branches.push((*candidate, extension, reached, tossed));
            }

            let terminal_count = branches.iter().filter(|(_, _, reached, _)| *reached).count();
            return match terminal_count {
                1 => {
                    let (_, extension, _, tossed) = branches
                        .into_iter()
                        .find(|(_, _, reached, _)| *reached)
                        .unwrap();
                    (extension, true, tossed)
                }
                0 => {
                    // nothing terminates; report the longest run anyway
                    let (_, extension, _, tossed) = branches
                        .into_iter()
                        .max_by_key(|(_, extension, _, _)| extension.len())
                        .unwrap();
                    (extension, false, tossed)
                }
                _ => {
                    // several branches terminate; choose in proportion to
                    // their depths and mark the result coin-tossed
                    let reaching: Vec<&(Candidate, String, bool, bool)> = branches
                        .iter()
                        .filter(|(_, _, reached, _)| *reached)
                        .collect();
                    let total: i32 = reaching.iter().map(|(c, _, _, _)| c.depth).sum();
                    let mut pick = self.rng.gen_range(0..total);
                    let mut chosen = reaching[reaching.len() - 1];
                    for branch in &reaching {
                        pick -= branch.0.depth;
                        if pick < 0 {
                            chosen = *branch;
                            break;
                        }
                    }
                    self.coin_tosses += 1;
                    (chosen.1.clone(), true, true)
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fasta_tools::SeqRecord;
    use crate::utils::kmer_tools::reverse_complement_seq;
    use rand::SeedableRng;

    const FWD: &str = "GTGCCAGCAGCCGCGG";
    const REV: &str = "GGACTACGAGGGTATC";
    const REGION: &str = "TACGATTGCCAGTTCGAAGGCTTAGCCTAGACGTTCAGGTTGACCATGGAGTCCTTAAGCGATC";
    const FLANK: &str = "CAGGTAACCTTGAGCTAGGTACCGATTCAGGA";

    fn genome() -> String {
        format!("{}{}{}{}", FWD, REGION, reverse_complement_seq(REV), FLANK)
    }

    fn fixture(seqs: &[String], copies: usize) -> (Vec<SeqRecord>, usize) {
        let mut reads = Vec::new();
        let mut longest = 0;
        for seq in seqs {
            longest = longest.max(seq.len());
            for i in 0..copies {
                reads.push(SeqRecord::new(&format!("r{}", i), seq));
            }
        }
        (reads, longest)
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(17)
    }

    #[test]
    fn test_single_path_reaches_terminal() {
        let genome = genome();
        let (reads, longest) = fixture(&[genome.clone()], 20);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let depths = DepthTable::build(&refs, 2);
        let contexts = ContextTables::build(&refs, &depths, longest);
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut extender = Extender::new(&depths, &contexts, &primers, rng());

        let outcome = extender.extend_starting_read(&genome[..56]);
        assert!(outcome.reached_terminal);
        assert!(!outcome.coin_tossed);
        // the extension ends exactly at the terminal primer's last base
        let amplicon_end = FWD.len() + REGION.len() + REV.len();
        assert_eq!(outcome.sequence, genome[..amplicon_end]);
    }

    #[test]
    fn test_dead_end_returns_unreached() {
        let genome = genome();
        let (reads, longest) = fixture(&[genome.clone()], 20);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let depths = DepthTable::build(&refs, 2);
        let contexts = ContextTables::build(&refs, &depths, longest);
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut extender = Extender::new(&depths, &contexts, &primers, rng());

        // the last 32 bases of the genome: nothing lies beyond them
        let tail = genome[genome.len() - 32..].to_string();
        let outcome = extender.extend_starting_read(&tail);
        assert!(!outcome.reached_terminal);
        assert_eq!(outcome.sequence, tail);
    }

    #[test]
    fn test_loop_trap_terminates_repeats() {
        // a tandem repeat with no way out: the extension must stop once it
        // revisits a kMer on its own path
        let unit = "TACGATTGCCAGTTCGAAGG";
        let repeat_genome = format!("{}{}", FWD, unit.repeat(6));
        let (reads, longest) = fixture(&[repeat_genome.clone()], 20);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let depths = DepthTable::build(&refs, 2);
        let contexts = ContextTables::build(&refs, &depths, longest);
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut extender = Extender::new(&depths, &contexts, &primers, rng());

        let outcome = extender.extend_starting_read(&repeat_genome[..48]);
        assert!(!outcome.reached_terminal);
        // bounded: one trip around the repeat, not an endless walk
        assert!(outcome.sequence.len() <= repeat_genome.len() + unit.len());
    }

    #[test]
    fn test_context_pruning_follows_the_right_strain() {
        // two strains share a 36-base stretch flanked by distinct sequence;
        // the pair tables must carry each extension through its own strain
        let common = "GTTGACCATGGAGTCCTTAAGCGATCCAGGTAACCT";
        let strain_a = format!("{}TACGATTG{}ACCGATTCAGGATTCGA", FWD, common);
        let strain_b = format!("{}CCAGTTCG{}TGAGCTAGGTCCATAGG", FWD, common);
        let (reads, longest) = fixture(&[strain_a.clone(), strain_b.clone()], 20);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let depths = DepthTable::build(&refs, 2);
        let contexts = ContextTables::build(&refs, &depths, longest);
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut extender = Extender::new(&depths, &contexts, &primers, rng());

        let outcome_a = extender.extend_starting_read(&strain_a[..60]);
        assert_eq!(outcome_a.sequence, strain_a);
        assert!(!outcome_a.coin_tossed);
        let outcome_b = extender.extend_starting_read(&strain_b[..60]);
        assert_eq!(outcome_b.sequence, strain_b);
        assert!(!outcome_b.coin_tossed);
    }

    #[test]
    fn test_equal_variants_reach_terminal_by_coin_toss() {
        // two amplicon variants differing at one base, equally abundant;
        // both branches reach the terminal primer, so the pick is a toss
        let terminal = reverse_complement_seq(REV);
        let prefix = format!("{}{}", FWD, &REGION[..30]);
        let variant_a = format!("{}A{}{}{}", prefix, &REGION[31..], terminal, FLANK);
        let variant_b = format!("{}G{}{}{}", prefix, &REGION[31..], terminal, FLANK);
        let (reads, longest) = fixture(&[variant_a.clone(), variant_b.clone()], 20);
        let refs: Vec<&SeqRecord> = reads.iter().collect();
        let depths = DepthTable::build(&refs, 2);
        let contexts = ContextTables::build(&refs, &depths, longest);
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut extender = Extender::new(&depths, &contexts, &primers, rng());

        let outcome = extender.extend_starting_read(&prefix);
        assert!(outcome.reached_terminal);
        assert!(outcome.coin_tossed);
        let amplicon_end = variant_a.len() - FLANK.len();
        let expected_a = &variant_a[..amplicon_end];
        let expected_b = &variant_b[..amplicon_end];
        assert!(
            outcome.sequence == expected_a || outcome.sequence == expected_b,
            "unexpected extension {}",
            outcome.sequence
        );
        assert_eq!(extender.coin_tosses, 1);
    }
}
