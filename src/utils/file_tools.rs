// Various file tools needed throughout the code. Read files may be plain
// text or gzip compressed; compression is detected from the gzip magic bytes
// rather than the file name, so renamed files still open.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// The two read file formats. Which one a file holds is decided once, at
// open, from the first non-blank character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFormat {
    Fasta,
    Fastq,
}

fn is_gzipped(filename: &str) -> io::Result<bool> {
    let mut file = File::open(filename)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    Ok(n == 2 && magic == GZIP_MAGIC)
}

// Opens a read file as a buffered line source, transparently decompressing
// gzip input.
pub fn open_reader(filename: &str) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(filename)?;
    if is_gzipped(filename)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

// Peeks at the first non-blank character to decide the file format:
// '>' is FASTA, '@' is FASTQ.
pub fn detect_format(filename: &str) -> io::Result<SequenceFormat> {
    let reader = open_reader(filename)?;
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return match trimmed.as_bytes()[0] {
            b'>' => Ok(SequenceFormat::Fasta),
            b'@' => Ok(SequenceFormat::Fastq),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Unrecognized sequence file format in {} (first character {:?})",
                    filename, other as char
                ),
            )),
        };
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Sequence file {} is empty", filename),
    ))
}

// Creates (or truncates) an output file for writing.
pub fn open_output(filename: &str) -> io::Result<File> {
    File::create(filename)
}

// checks that the parent dir exists and then if so creates the Path object
// open and ready to write. A bare file name has an empty parent, which means
// the current directory.
pub fn check_parent(filename: &str) -> io::Result<&Path> {
    let file_path = Path::new(filename);
    let parent = file_path.parent().unwrap();
    assert!(parent.as_os_str().is_empty() || parent.exists());
    Ok(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_plain_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fasta");
        std::fs::write(&path, ">r1\nACGT\n").unwrap();
        let reader = open_reader(path.to_str().unwrap()).unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec![">r1", "ACGT"]);
    }

    #[test]
    fn test_gzip_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fasta.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b">r1\nACGT\n").unwrap();
        encoder.finish().unwrap();
        let reader = open_reader(path.to_str().unwrap()).unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec![">r1", "ACGT"]);
    }

    #[test]
    fn test_detect_format() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("a.fa");
        std::fs::write(&fasta, "\n>r1\nACGT\n").unwrap();
        assert_eq!(
            detect_format(fasta.to_str().unwrap()).unwrap(),
            SequenceFormat::Fasta
        );
        let fastq = dir.path().join("a.fq");
        std::fs::write(&fastq, "@r1\nACGT\n+\nFFFF\n").unwrap();
        assert_eq!(
            detect_format(fastq.to_str().unwrap()).unwrap(),
            SequenceFormat::Fastq
        );
    }

    #[test]
    fn test_detect_format_rejects_junk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.txt");
        std::fs::write(&path, "hello\n").unwrap();
        assert!(detect_format(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(open_reader("no_such_file.fa").is_err());
    }

    #[test]
    fn test_check_parent_bare_filename() {
        check_parent("run.log").unwrap();
    }

    #[test]
    #[should_panic]
    fn test_check_parent_fail() {
        let filename = "fake_dir/test.fa";
        check_parent(filename).unwrap();
    }
}
