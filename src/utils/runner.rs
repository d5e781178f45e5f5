// The pipeline driver. Wires the phases together in order: read loading,
// primer scan, region-filter growth and refinement, final selection, depth
// and context table construction, starting-read preparation, extension, and
// the trim/emit pass. Each phase consumes the previous one's output in full
// before the next begins.

use log::{info, warn};
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;
use std::io;

use super::config::RunConfiguration;
use super::context_table::ContextTables;
use super::depth_table::DepthTable;
use super::extension::{Extender, ExtensionOutcome};
use super::fasta_tools::{read_fasta, write_reads, SeqRecord};
use super::fastq_tools::read_fastq;
use super::file_tools::{detect_format, SequenceFormat};
use super::kmer_tools::reverse_complement_seq;
use super::output::{collect_amplicons, write_output};
use super::primer_tools::{scan_read, PrimerTag, PrimerVariantSet};
use super::region_filter::{build_side_filter, read_is_selected, refine_filters};
use super::starting_reads::{prepare_starting_reads, StartingRead};
use super::stats::RunStats;

// Loads one read file, fasta or fastq, decided by its first character.
fn load_read_file(filename: &str, max_read_length: usize) -> io::Result<Vec<SeqRecord>> {
    let mut records = match detect_format(filename)? {
        SequenceFormat::Fasta => read_fasta(filename)?,
        SequenceFormat::Fastq => read_fastq(filename)?,
    };
    if max_read_length > 0 {
        for record in records.iter_mut() {
            if record.seq.len() > max_read_length {
                record.seq.truncate(max_read_length);
            }
        }
    }
    Ok(records)
}

pub fn run_pcr(config: Box<RunConfiguration>, rng: ChaCha20Rng) -> io::Result<RunStats> {
    let mut stats = RunStats::new();

    // Phase 1: load every read into memory, remembering which pair side
    // each file belongs to
    let sides = if config.paired { 2 } else { 1 };
    let mut reads: Vec<SeqRecord> = Vec::new();
    let mut read_sides: Vec<usize> = Vec::new();
    for (file_index, filename) in config.read_files.iter().enumerate() {
        let side = if config.paired { file_index % 2 } else { 0 };
        let records = load_read_file(filename, config.max_read_length)?;
        info!("Loaded {} reads from {}", records.len(), filename);
        stats.files_read += 1;
        read_sides.extend(std::iter::repeat(side).take(records.len()));
        reads.extend(records);
    }
    stats.reads_total = reads.len();
    if reads.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "No reads found in the input files",
        ));
    }

    // Phase 2: primer variant sets and the primer scan. Reads are tagged
    // and trimmed in place; terminal neighborhoods seed the ending filter.
    let primers = PrimerVariantSet::build(&config.forward_primer, &config.reverse_primer)
        .map_err(|message| io::Error::new(io::ErrorKind::InvalidInput, message))?;
    let mut ending_filter: HashSet<String> = HashSet::new();
    let mut tags: Vec<Option<PrimerTag>> = Vec::with_capacity(reads.len());
    for read in reads.iter_mut() {
        let tag = scan_read(read, &primers, &mut ending_filter);
        match tag {
            Some(PrimerTag::FP) => stats.reads_tagged_fp += 1,
            Some(PrimerTag::FPPrime) => stats.reads_tagged_fp_prime += 1,
            Some(PrimerTag::RP) => stats.reads_tagged_rp += 1,
            Some(PrimerTag::RPPrime) => stats.reads_tagged_rp_prime += 1,
            None => {}
        }
        tags.push(tag);
    }
    stats.ending_filter_kmers = ending_filter.len();
    info!(
        "Primer scan: {} FP, {} FP', {} RP, {} RP' of {} reads",
        stats.reads_tagged_fp,
        stats.reads_tagged_fp_prime,
        stats.reads_tagged_rp,
        stats.reads_tagged_rp_prime,
        stats.reads_total
    );

    // Phase 3: grow one region filter per pair side, then refine
    let mut side_filters: Vec<HashSet<String>> = Vec::with_capacity(sides);
    for side in 0..sides {
        let side_reads: Vec<&SeqRecord> = reads
            .iter()
            .zip(&read_sides)
            .filter(|(_, s)| **s == side)
            .map(|(read, _)| read)
            .collect();
        let side_tags: Vec<Option<PrimerTag>> = tags
            .iter()
            .zip(&read_sides)
            .filter(|(_, s)| **s == side)
            .map(|(tag, _)| *tag)
            .collect();
        side_filters.push(build_side_filter(&side_reads, &side_tags, &ending_filter));
    }
    stats.filter_kmers = side_filters.iter().map(|f| f.len()).sum();
    let refined = refine_filters(&side_filters, config.strict);
    stats.refined_filter_kmers = refined.len();
    drop(side_filters);

    // Phase 4: final selection, and orientation normalization so every
    // starting read runs primer-first left to right. The tag earned during
    // the scan travels as a header suffix, which is the contract read here.
    // The prime tags mean the primer sits at the read's far end, so those
    // reads are reverse-complemented to put it in front.
    let mut selected: Vec<SeqRecord> = Vec::new();
    let mut selected_tags: Vec<Option<PrimerTag>> = Vec::new();
    for read in &reads {
        if !read_is_selected(read, &refined) {
            continue;
        }
        let tag = PrimerTag::from_header(&read.header);
        let mut record = read.clone();
        if tag == Some(PrimerTag::FPPrime) || tag == Some(PrimerTag::RPPrime) {
            record.seq = reverse_complement_seq(&record.seq);
        }
        selected.push(record);
        selected_tags.push(tag);
    }
    stats.reads_selected = selected.len();
    info!("Selected {} reads for the amplicon tables", selected.len());
    if let Some(tag) = &config.save_tag {
        write_reads(&selected, &format!("{}_selected_reads.fasta", tag))?;
    }
    drop(refined);
    drop(reads);
    drop(tags);

    // Phase 5: depth table, denoising, context tables
    let selected_refs: Vec<&SeqRecord> = selected.iter().collect();
    let mut depths = DepthTable::build(&selected_refs, config.min_depth);
    depths.denoise(&selected_refs);
    stats.distinct_kmers = depths.distinct_kmers();
    stats.noise_level = depths.noise_level;
    stats.mean_depth = depths.mean_depth;
    let longest_read = selected.iter().map(|r| r.seq.len()).max().unwrap_or(0);
    let contexts = ContextTables::build(&selected_refs, &depths, longest_read);

    // Phase 6: starting-read preparation. Every primer-tagged read seeds an
    // extension: forward-primer reads run the forward strand, reverse-primer
    // reads the opposite one, so a locus covered from only one side still
    // assembles.
    let mut candidates: Vec<StartingRead> = Vec::new();
    let mut other_reads: Vec<&SeqRecord> = Vec::new();
    for (read, tag) in selected.iter().zip(&selected_tags) {
        match tag {
            Some(PrimerTag::FP) | Some(PrimerTag::FPPrime) => {
                candidates.push(StartingRead {
                    seq: read.seq.clone(),
                    reverse_oriented: false,
                })
            }
            Some(PrimerTag::RP) | Some(PrimerTag::RPPrime) => {
                candidates.push(StartingRead {
                    seq: read.seq.clone(),
                    reverse_oriented: true,
                })
            }
            None => other_reads.push(read),
        }
    }
    let prepared = prepare_starting_reads(
        &candidates,
        &other_reads,
        &depths,
        &contexts,
        primers.primer_length,
    );
    stats.starting_reads = prepared.starting_reads.len();
    stats.starting_reads_substituted = prepared.substituted;
    stats.starting_reads_truncated = prepared.truncated;
    stats.starting_reads_rejected = prepared.rejected;
    stats.starting_reads_rescued = prepared.rescued;
    stats.starting_reads_dropped_short = prepared.dropped_short;
    info!(
        "Prepared {} starting reads ({} rescued)",
        prepared.starting_reads.len(),
        prepared.rescued
    );
    if prepared.starting_reads.is_empty() {
        warn!("No starting reads survived preparation; writing an empty output.");
    }

    // Phase 7: extension. Each outcome keeps its seed's strand so the
    // writer can flip reverse-seeded amplicons back onto the forward strand.
    let mut extender = Extender::new(&depths, &contexts, &primers, rng);
    let mut outcomes: Vec<(ExtensionOutcome, bool)> =
        Vec::with_capacity(prepared.starting_reads.len());
    for starting_read in &prepared.starting_reads {
        let outcome = extender.extend_starting_read(&starting_read.seq);
        if outcome.reached_terminal {
            stats.reached_terminal += 1;
        }
        outcomes.push((outcome, starting_read.reverse_oriented));
    }
    stats.extensions = outcomes.len();
    stats.coin_tosses = extender.coin_tosses;
    stats.cache_hits = extender.cache_hits;
    info!(
        "Extended {} starting reads; {} reached a terminal primer",
        stats.extensions, stats.reached_terminal
    );

    // Phase 8: trim, dereplicate, emit
    let (amplicons, trim_stats) = collect_amplicons(
        &outcomes,
        &primers,
        &prepared.observed_primers,
        config.min_length,
        config.max_length,
    );
    stats.dropped_no_terminal = trim_stats.dropped_no_terminal;
    stats.dropped_short = trim_stats.dropped_short;
    stats.dropped_long = trim_stats.dropped_long;
    stats.distinct_amplicons = amplicons.len();
    stats.amplicon_abundances = amplicons.iter().map(|(_, count)| *count).collect();
    write_output(&amplicons, &config.output_file)?;

    if config.write_stats {
        stats.write_json(&format!("{}_stats.json", config.output_file))?;
    }
    stats.log_summary();
    Ok(stats)
}
