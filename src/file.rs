//! Plaintext and gzip-compressed file input and output.
//!
//! Sample-data files, HapMap recombination maps and dumped genealogies may all
//! be gzip-compressed. [`InputFile`] sniffs the gzip magic bytes so callers never
//! have to care, and [`OutputFile`] compresses whenever the path ends in `.gz`.
//!
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("file '{0}' does not exist")]
    NotFound(PathBuf),
}

/// Check if a file is gzipped by looking for the magic numbers.
///
/// Files shorter than two bytes are treated as plaintext.
fn is_gzipped_file(file_path: &Path) -> io::Result<bool> {
    let mut file = File::open(file_path)?;
    let mut buffer = [0; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// An input file that may or may not be gzip-compressed.
pub struct InputFile {
    pub filepath: PathBuf,
}

impl InputFile {
    pub fn new(filepath: impl AsRef<Path>) -> Self {
        Self {
            filepath: filepath.as_ref().to_path_buf(),
        }
    }

    /// Opens the file and returns a buffered reader, decompressing if the
    /// content is gzip.
    pub fn reader(&self) -> Result<BufReader<Box<dyn Read>>, FileError> {
        if !self.filepath.exists() {
            return Err(FileError::NotFound(self.filepath.clone()));
        }
        let file = File::open(&self.filepath)?;
        let reader: Box<dyn Read> = if is_gzipped_file(&self.filepath)? {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(BufReader::new(reader))
    }

    /// Checks if the first line of the file starts with the expected header.
    pub fn has_header(&self, expect: &str) -> Result<bool, FileError> {
        let mut buf_reader = self.reader()?;
        let mut first_line = String::new();
        buf_reader.read_line(&mut first_line)?;
        Ok(first_line.starts_with(expect))
    }

    /// Collect the leading lines that start with `comment`, with the comment
    /// marker and trailing newline stripped.
    ///
    /// Reading stops at the first line that is not a comment.
    pub fn collect_metadata(&self, comment: &str) -> Result<Vec<String>, FileError> {
        let buf_reader = self.reader()?;
        let mut metadata = Vec::new();
        for line in buf_reader.lines() {
            let line = line?;
            match line.strip_prefix(comment) {
                Some(rest) => metadata.push(rest.trim_end().to_string()),
                None => break,
            }
        }
        Ok(metadata)
    }
}

/// An output file, gzip-compressed when the path ends with `.gz`.
pub struct OutputFile {
    pub filepath: PathBuf,
    pub header: Option<Vec<String>>,
}

impl OutputFile {
    /// Constructs a new `OutputFile`.
    ///
    /// # Arguments
    ///
    /// * `filepath` - the output path; a `.gz` extension enables compression.
    /// * `header` - optional lines written first, each prefixed by `#`.
    pub fn new(filepath: impl AsRef<Path>, header: Option<Vec<String>>) -> Self {
        Self {
            filepath: filepath.as_ref().to_path_buf(),
            header,
        }
    }

    /// Opens the file for writing and writes the header, if any.
    pub fn writer(&self) -> Result<Box<dyn Write>, io::Error> {
        let is_gzip = self
            .filepath
            .extension()
            .map_or(false, |ext| ext == "gz");
        let mut writer: Box<dyn Write> = if is_gzip {
            Box::new(BufWriter::new(GzEncoder::new(
                File::create(&self.filepath)?,
                Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(File::create(&self.filepath)?))
        };
        if let Some(entries) = &self.header {
            for entry in entries {
                writeln!(writer, "#{}", entry)?;
            }
        }
        Ok(writer)
    }
}
