// This library reads fastq input. Records are the standard four lines:
// @header, sequence, +, quality. Quality scores play no part in the
// assembly, so they are read and dropped.

use log::{info, warn};
use std::io;
use std::io::BufRead;

use super::fasta_tools::SeqRecord;
use super::file_tools::open_reader;

// Reads a whole fastq file into memory, keeping header and sequence only.
pub fn read_fastq(fastq_path: &str) -> io::Result<Vec<SeqRecord>> {
    info!("Reading fastq: {}", fastq_path);
    let mut records: Vec<SeqRecord> = Vec::new();
    let reader = open_reader(fastq_path)?;
    let mut lines = reader.lines();

    while let Some(header_line) = lines.next() {
        let header_line = header_line?;
        let header_line = header_line.trim_end();
        if header_line.is_empty() {
            continue;
        }
        if !header_line.starts_with('@') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Malformed fastq record in {}: expected @header, found {:?}",
                    fastq_path, header_line
                ),
            ));
        }
        let seq_line = match lines.next() {
            Some(line) => line?,
            None => {
                warn!("Truncated fastq record at end of {}", fastq_path);
                break;
            }
        };
        // the plus line and the quality line round out the record
        let plus = lines.next();
        let qual = lines.next();
        if plus.is_none() || qual.is_none() {
            warn!("Truncated fastq record at end of {}", fastq_path);
            break;
        }
        plus.unwrap()?;
        qual.unwrap()?;
        records.push(SeqRecord::new(
            header_line.strip_prefix('@').unwrap(),
            seq_line.trim_end(),
        ));
    }
    Ok(records)
}
