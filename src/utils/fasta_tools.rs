// This library contains tools needed to process fasta files as input and
// output. Input records may span any number of sequence lines; output
// amplicons are written one sequence per line under running >Rn headers.

use log::info;
use std::io;
use std::io::{BufRead, Write};

use super::file_tools::{open_output, open_reader};

// One input read. The tag a primer scan may assign (";FP", ";FP'", ";RP",
// ";RP'") is carried as a header suffix, which is the contract between the
// scan phase and the selection phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub header: String,
    pub seq: String,
}

impl SeqRecord {
    pub fn new(header: &str, seq: &str) -> SeqRecord {
        SeqRecord {
            header: header.to_string(),
            seq: seq.to_uppercase(),
        }
    }
}

// Reads a whole fasta file into memory. Sequence lines belonging to one
// record are concatenated and uppercased.
pub fn read_fasta(fasta_path: &str) -> io::Result<Vec<SeqRecord>> {
    info!("Reading fasta: {}", fasta_path);
    let mut records: Vec<SeqRecord> = Vec::new();
    let mut current_header = String::new();
    let mut current_seq = String::new();
    let mut in_record = false;

    let reader = open_reader(fasta_path)?;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if line.starts_with('>') {
            if in_record {
                records.push(SeqRecord::new(&current_header, &current_seq));
            }
            current_header = line.strip_prefix('>').unwrap().to_string();
            current_seq = String::new();
            in_record = true;
        } else if in_record {
            current_seq.push_str(line.trim());
        }
    }
    // Need to pick up the last one
    if in_record {
        records.push(SeqRecord::new(&current_header, &current_seq));
    }
    Ok(records)
}

// Writes the final amplicons. Headers are sequential R1, R2, ... and each
// sequence goes on a single line.
pub fn write_amplicons(sequences: &[String], output_file: &str) -> io::Result<()> {
    let mut outfile = open_output(output_file)?;
    for (index, seq) in sequences.iter().enumerate() {
        writeln!(&mut outfile, ">R{}", index + 1)?;
        writeln!(&mut outfile, "{}", seq)?;
    }
    info!("Wrote {} amplicons to {}", sequences.len(), output_file);
    Ok(())
}

// Writes an intermediate read set, headers included. Used by the --save
// option to dump the reads selected for the depth tables.
pub fn write_reads(reads: &[SeqRecord], output_file: &str) -> io::Result<()> {
    let mut outfile = open_output(output_file)?;
    for read in reads {
        writeln!(&mut outfile, ">{}", read.header)?;
        writeln!(&mut outfile, "{}", read.seq)?;
    }
    info!("Wrote {} reads to {}", reads.len(), output_file);
    Ok(())
}
