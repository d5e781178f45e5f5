// Primer variant expansion and the primer scan over reads.
//
// A primer arrives as an IUPAC string (degenerate codes allowed). The
// effective match length M is the shorter of the two primers; both are
// trimmed on the right to M bases and split into a 5' head of M - 15 bases
// and a 3' core of 15 bases. The head tolerates up to min(H/2, 2)
// substitutions, the core up to 2. Every concrete expansion of every
// tolerated substitution pattern becomes one packed M-mer in the variant
// sets, so a read can be matched with a single hash probe per window.

use itertools::Itertools;
use log::info;
use std::collections::HashSet;

use super::fasta_tools::SeqRecord;
use super::kmer_tools::{incremental_pack, reverse_complement, KMER_LEN};

const CORE_LEN: usize = 15;
const MISMATCH_CAP: usize = 2;

// Primer location tags. The prime forms mean the primer was found near the
// end of the read (as a terminating match) rather than the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimerTag {
    FP,
    FPPrime,
    RP,
    RPPrime,
}

impl PrimerTag {
    // The header suffix contract between the scan phase and selection.
    pub fn suffix(&self) -> &'static str {
        match self {
            PrimerTag::FP => ";FP",
            PrimerTag::FPPrime => ";FP'",
            PrimerTag::RP => ";RP",
            PrimerTag::RPPrime => ";RP'",
        }
    }

    pub fn from_header(header: &str) -> Option<PrimerTag> {
        if header.ends_with(";FP'") {
            Some(PrimerTag::FPPrime)
        } else if header.ends_with(";RP'") {
            Some(PrimerTag::RPPrime)
        } else if header.ends_with(";FP") {
            Some(PrimerTag::FP)
        } else if header.ends_with(";RP") {
            Some(PrimerTag::RP)
        } else {
            None
        }
    }
}

// The packed primer variant sets shared by the scan, the extension engine
// and the trimmer. Built once at startup, read-only after.
#[derive(Debug)]
pub struct PrimerVariantSet {
    // effective match length M
    pub primer_length: usize,
    // every accepted starting form (forward and reverse primer variants)
    pub starting: HashSet<u64>,
    // reverse complements of the starting forms
    pub terminating: HashSet<u64>,
    // forward-primer variants in both orientations, for FP vs RP labelling
    pub forward_forms: HashSet<u64>,
}

fn iupac_expansions(code: u8) -> Result<&'static [u8], String> {
    match code.to_ascii_uppercase() {
        b'A' => Ok(b"A"),
        b'C' => Ok(b"C"),
        b'G' => Ok(b"G"),
        b'T' | b'U' => Ok(b"T"),
        b'R' => Ok(b"AG"),
        b'Y' => Ok(b"CT"),
        b'S' => Ok(b"CG"),
        b'W' => Ok(b"AT"),
        b'K' => Ok(b"GT"),
        b'M' => Ok(b"AC"),
        b'B' => Ok(b"CGT"),
        b'D' => Ok(b"AGT"),
        b'H' => Ok(b"ACT"),
        b'V' => Ok(b"ACG"),
        b'N' => Ok(b"ACGT"),
        other => Err(format!("Invalid primer base: {:?}", other as char)),
    }
}

// All concrete ACGT strings consistent with an IUPAC primer.
pub fn expand_iupac(primer: &str) -> Result<Vec<Vec<u8>>, String> {
    let mut per_position: Vec<Vec<u8>> = Vec::with_capacity(primer.len());
    for code in primer.bytes() {
        per_position.push(iupac_expansions(code)?.to_vec());
    }
    Ok(per_position
        .into_iter()
        .multi_cartesian_product()
        .collect())
}

// All sequences within the given Hamming distance of seq, seq included.
// Also used by the starting-read cleaner to repair a damaged first kMer.
pub(crate) fn substitution_variants(seq: &[u8], max_mismatches: usize) -> Vec<Vec<u8>> {
    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
    let mut variants: Vec<Vec<u8>> = vec![seq.to_vec()];
    if max_mismatches >= 1 {
        for i in 0..seq.len() {
            for base in BASES {
                if base == seq[i] {
                    continue;
                }
                let mut variant = seq.to_vec();
                variant[i] = base;
                variants.push(variant);
            }
        }
    }
    if max_mismatches >= 2 {
        for i in 0..seq.len() {
            for j in i + 1..seq.len() {
                for base_i in BASES {
                    if base_i == seq[i] {
                        continue;
                    }
                    for base_j in BASES {
                        if base_j == seq[j] {
                            continue;
                        }
                        let mut variant = seq.to_vec();
                        variant[i] = base_i;
                        variant[j] = base_j;
                        variants.push(variant);
                    }
                }
            }
        }
    }
    variants
}

// Packs an M-base window, failing on any non-ACGT base. Variant strings are
// all concrete so this cannot fail for them.
fn pack_window(seq: &[u8], m: usize) -> Option<u64> {
    let (kmer, valid) = super::kmer_tools::pack(seq, 0, m);
    if valid {
        Some(kmer)
    } else {
        None
    }
}

// Expands one primer into its packed mismatch variants: IUPAC expansion,
// then head variants crossed with core variants.
fn expand_primer_variants(primer: &str, m: usize) -> Result<HashSet<u64>, String> {
    let trimmed = &primer[..m];
    let head_len = m - CORE_LEN;
    let head_cap = (head_len / 2).min(MISMATCH_CAP);
    let mut packed: HashSet<u64> = HashSet::new();
    for expansion in expand_iupac(trimmed)? {
        let head_variants = substitution_variants(&expansion[..head_len], head_cap);
        let core_variants = substitution_variants(&expansion[head_len..], MISMATCH_CAP);
        for head in &head_variants {
            for core in &core_variants {
                let mut window = head.clone();
                window.extend_from_slice(core);
                if let Some(kmer) = pack_window(&window, m) {
                    packed.insert(kmer);
                }
            }
        }
    }
    Ok(packed)
}

impl PrimerVariantSet {
    // Builds the starting, terminating and forward-form sets from the two
    // IUPAC primers.
    pub fn build(forward: &str, reverse: &str) -> Result<PrimerVariantSet, String> {
        if forward.is_empty() || reverse.is_empty() {
            return Err("Both a forward and a reverse primer are required".to_string());
        }
        let m = forward.len().min(reverse.len());
        if m <= CORE_LEN {
            return Err(format!(
                "Primers must be longer than {} bases (shortest given was {})",
                CORE_LEN, m
            ));
        }
        if m > KMER_LEN {
            return Err(format!(
                "Primer match length {} exceeds the {}-base window",
                m, KMER_LEN
            ));
        }

        let forward_variants = expand_primer_variants(forward, m)?;
        let reverse_variants = expand_primer_variants(reverse, m)?;

        let mut starting: HashSet<u64> = HashSet::new();
        starting.extend(&forward_variants);
        starting.extend(&reverse_variants);

        let terminating: HashSet<u64> = starting
            .iter()
            .map(|kmer| reverse_complement(*kmer, m))
            .collect();

        let mut forward_forms: HashSet<u64> = forward_variants.clone();
        forward_forms.extend(
            forward_variants
                .iter()
                .map(|kmer| reverse_complement(*kmer, m)),
        );

        info!(
            "Primer variant sets built: {} starting, {} terminating forms (match length {})",
            starting.len(),
            terminating.len(),
            m
        );
        Ok(PrimerVariantSet {
            primer_length: m,
            starting,
            terminating,
            forward_forms,
        })
    }

    // True if the last primer_length bases of a packed 32-mer are one of the
    // terminating primer forms. The extension engine asks this of the final
    // 32-mer of a growing read, so a hit means the read now ends exactly at
    // a terminal primer's last base.
    pub fn ends_with_terminal(&self, kmer: u64) -> bool {
        let tail = kmer << (2 * (KMER_LEN - self.primer_length));
        self.terminating.contains(&tail)
    }
}

// Scans one read for the first primer hit. A starting hit trims the read to
// begin at the primer and tags it FP or RP. A terminating hit trims the read
// to end at the primer, tags it FP' or RP', and records the 32-mer ending at
// the primer's last base in the ending filter. The first hit of either kind
// wins; a read with no hit is left untouched.
pub fn scan_read(
    read: &mut SeqRecord,
    primers: &PrimerVariantSet,
    ending_filter: &mut HashSet<String>,
) -> Option<PrimerTag> {
    let m = primers.primer_length;
    let bytes = read.seq.as_bytes().to_vec();
    if bytes.len() < m {
        return None;
    }
    let mut kmer: u64 = 0;
    let mut valid_run = 0usize;
    for i in 0..bytes.len() {
        let (next, ok) = incremental_pack(kmer, bytes[i], m);
        kmer = next;
        valid_run = if ok { valid_run + 1 } else { 0 };
        if valid_run < m {
            continue;
        }
        let pos = i + 1 - m;
        if primers.starting.contains(&kmer) {
            let tag = if primers.forward_forms.contains(&kmer) {
                PrimerTag::FP
            } else {
                PrimerTag::RP
            };
            read.seq = read.seq[pos..].to_string();
            read.header.push_str(tag.suffix());
            return Some(tag);
        }
        if primers.terminating.contains(&kmer) {
            let tag = if primers.forward_forms.contains(&kmer) {
                PrimerTag::FPPrime
            } else {
                PrimerTag::RPPrime
            };
            let end = pos + m;
            if end >= KMER_LEN {
                let ending_mer = &read.seq[end - KMER_LEN..end];
                if !ending_mer.bytes().any(|b| b == b'N') {
                    ending_filter.insert(ending_mer.to_string());
                }
            }
            read.seq = read.seq[..end].to_string();
            read.header.push_str(tag.suffix());
            return Some(tag);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::kmer_tools::{pack, reverse_complement_seq, unpack};

    // 16 concrete bases followed by nothing degenerate: head of 1, core 15.
    const FWD: &str = "GTGCCAGCAGCCGCGG";
    const REV: &str = "GGACTACGAGGGTATC";

    #[test]
    fn test_expand_iupac_degeneracy() {
        let expansions = expand_iupac("AY").unwrap();
        let strings: Vec<String> = expansions
            .iter()
            .map(|e| String::from_utf8(e.clone()).unwrap())
            .collect();
        assert_eq!(strings, vec!["AC", "AT"]);
    }

    #[test]
    fn test_expand_iupac_rejects_junk() {
        assert!(expand_iupac("ACGX").is_err());
    }

    #[test]
    fn test_substitution_variant_counts() {
        // 4 bases, up to 2 mismatches: 1 + 4*3 + C(4,2)*9 = 67
        let variants = substitution_variants(b"ACGT", 2);
        assert_eq!(variants.len(), 67);
        // distance 1 only: 1 + 12
        assert_eq!(substitution_variants(b"ACGT", 1).len(), 13);
        assert_eq!(substitution_variants(b"ACGT", 0).len(), 1);
    }

    #[test]
    fn test_build_rejects_short_primer() {
        assert!(PrimerVariantSet::build("ACGTACGTACGT", REV).is_err());
        assert!(PrimerVariantSet::build("", REV).is_err());
    }

    #[test]
    fn test_variant_sets_contain_expected_forms() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        assert_eq!(primers.primer_length, 16);
        let (fwd_packed, _) = pack(FWD.as_bytes(), 0, 16);
        let (rev_packed, _) = pack(REV.as_bytes(), 0, 16);
        assert!(primers.starting.contains(&fwd_packed));
        assert!(primers.starting.contains(&rev_packed));
        assert!(primers.forward_forms.contains(&fwd_packed));
        assert!(!primers.forward_forms.contains(&rev_packed));
        // terminating set holds the RCs
        let rc_fwd = reverse_complement_seq(FWD);
        let (rc_packed, _) = pack(rc_fwd.as_bytes(), 0, 16);
        assert!(primers.terminating.contains(&rc_packed));
        // a single mismatch in the core is tolerated
        let mut mismatched = FWD.as_bytes().to_vec();
        mismatched[8] = b'T';
        let (mm_packed, _) = pack(&mismatched, 0, 16);
        assert!(primers.starting.contains(&mm_packed));
    }

    #[test]
    fn test_scan_tags_forward_start() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut ending = HashSet::new();
        let mut read = SeqRecord::new("r1", &format!("TTAA{}CCCCGGGGAAAATTTT", FWD));
        let tag = scan_read(&mut read, &primers, &mut ending);
        assert_eq!(tag, Some(PrimerTag::FP));
        assert!(read.seq.starts_with(FWD));
        assert!(read.header.ends_with(";FP"));
        assert!(ending.is_empty());
    }

    #[test]
    fn test_scan_tags_reverse_start() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut ending = HashSet::new();
        let mut read = SeqRecord::new("r2", &format!("{}CCCCGGGGAAAATTTT", REV));
        let tag = scan_read(&mut read, &primers, &mut ending);
        assert_eq!(tag, Some(PrimerTag::RP));
        assert!(read.header.ends_with(";RP"));
    }

    #[test]
    fn test_scan_tags_terminal_and_fills_ending_filter() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut ending = HashSet::new();
        let rc_rev = reverse_complement_seq(REV);
        // 24 bases of lead, then the terminal primer, then trailing sequence
        let lead = "ACACACACACACACACACACACAC";
        let mut read = SeqRecord::new("r3", &format!("{}{}GGGGTTTT", lead, rc_rev));
        let tag = scan_read(&mut read, &primers, &mut ending);
        assert_eq!(tag, Some(PrimerTag::RPPrime));
        assert_eq!(read.seq, format!("{}{}", lead, rc_rev));
        assert!(read.header.ends_with(";RP'"));
        assert_eq!(ending.len(), 1);
        let ending_mer = ending.iter().next().unwrap();
        assert_eq!(ending_mer.len(), 32);
        assert!(read.seq.ends_with(ending_mer.as_str()));
    }

    #[test]
    fn test_scan_terminal_forward_is_fp_prime() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut ending = HashSet::new();
        let rc_fwd = reverse_complement_seq(FWD);
        let lead = "ACACACACACACACACACACACAC";
        let mut read = SeqRecord::new("r4", &format!("{}{}", lead, rc_fwd));
        let tag = scan_read(&mut read, &primers, &mut ending);
        assert_eq!(tag, Some(PrimerTag::FPPrime));
        assert!(read.header.ends_with(";FP'"));
    }

    #[test]
    fn test_scan_no_hit_defers_read() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let mut ending = HashSet::new();
        let mut read = SeqRecord::new("r5", "ACACACACACACACACACACACACACACACAC");
        let tag = scan_read(&mut read, &primers, &mut ending);
        assert_eq!(tag, None);
        assert_eq!(read.header, "r5");
        assert_eq!(read.seq.len(), 32);
    }

    #[test]
    fn test_ends_with_terminal() {
        let primers = PrimerVariantSet::build(FWD, REV).unwrap();
        let rc_rev = reverse_complement_seq(REV);
        let window = format!("AAAAAAAAAAAAAAAA{}", rc_rev);
        let (kmer, valid) = pack(window.as_bytes(), 0, 32);
        assert!(valid);
        assert!(primers.ends_with_terminal(kmer));
        let (other, _) = pack("ACACACACACACACACACACACACACACACAC".as_bytes(), 0, 32);
        assert!(!primers.ends_with_terminal(other));
        assert_eq!(unpack(kmer, 32), window);
    }

    #[test]
    fn test_tag_from_header() {
        assert_eq!(PrimerTag::from_header("x;FP"), Some(PrimerTag::FP));
        assert_eq!(PrimerTag::from_header("x;FP'"), Some(PrimerTag::FPPrime));
        assert_eq!(PrimerTag::from_header("x;RP"), Some(PrimerTag::RP));
        assert_eq!(PrimerTag::from_header("x;RP'"), Some(PrimerTag::RPPrime));
        assert_eq!(PrimerTag::from_header("x"), None);
    }
}
