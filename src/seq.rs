// Typed reads and batched sequence sources.
//
// A run is tied to one input format; every read flowing through the pipeline
// carries the same variant as the opened source. The FASTQ source ships
// in-tree (gzip detected by extension, multiple files read back to back);
// SFF/SAM/BAM parsing belongs to external collaborators that feed the same
// `SequenceSource` trait.

use std::fmt;
use std::fs::File;
use std::io;

use bio::io::fastq;
use flate2::read::MultiGzDecoder;

use crate::error::{MapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFormat {
    Fastq,
    Sff,
    Sam,
    Bam,
}

impl SeqFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fastq" | "fq" => Ok(SeqFormat::Fastq),
            "sff" => Ok(SeqFormat::Sff),
            "sam" => Ok(SeqFormat::Sam),
            "bam" => Ok(SeqFormat::Bam),
            other => Err(MapError::OutOfRange(format!(
                "read format is unrecognized: {other}"
            ))),
        }
    }
}

impl fmt::Display for SeqFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeqFormat::Fastq => "fastq",
            SeqFormat::Sff => "sff",
            SeqFormat::Sam => "sam",
            SeqFormat::Bam => "bam",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct FastqRead {
    pub name: String,
    pub bases: Vec<u8>,
    pub quals: Vec<u8>,
}

/// Flow-space read: bases plus the flowgram and run metadata needed for the
/// FZ auxiliary tag and read-group synthesis. Key-sequence trimming is
/// assumed to already be reflected in `bases`.
#[derive(Debug, Clone)]
pub struct SffRead {
    pub name: String,
    pub bases: Vec<u8>,
    pub quals: Vec<u8>,
    pub flowgram: Vec<u16>,
    pub flow_order: String,
    pub key_seq: String,
    pub clip_qual: (i32, i32),
    pub clip_adapter: (i32, i32),
}

#[derive(Debug, Clone)]
pub struct SamRead {
    pub name: String,
    pub bases: Vec<u8>,
    pub quals: Vec<u8>,
}

/// A sequencing read, tagged by input format.
#[derive(Debug, Clone)]
pub enum Read {
    Fastq(FastqRead),
    Sff(SffRead),
    Sam(SamRead),
    Bam(SamRead),
}

impl Read {
    pub fn format(&self) -> SeqFormat {
        match self {
            Read::Fastq(_) => SeqFormat::Fastq,
            Read::Sff(_) => SeqFormat::Sff,
            Read::Sam(_) => SeqFormat::Sam,
            Read::Bam(_) => SeqFormat::Bam,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Read::Fastq(r) => &r.name,
            Read::Sff(r) => &r.name,
            Read::Sam(r) | Read::Bam(r) => &r.name,
        }
    }

    pub fn bases(&self) -> &[u8] {
        match self {
            Read::Fastq(r) => &r.bases,
            Read::Sff(r) => &r.bases,
            Read::Sam(r) | Read::Bam(r) => &r.bases,
        }
    }

    pub fn quals(&self) -> &[u8] {
        match self {
            Read::Fastq(r) => &r.quals,
            Read::Sff(r) => &r.quals,
            Read::Sam(r) | Read::Bam(r) => &r.quals,
        }
    }

    /// Flowgram intensities for flow-space variants.
    pub fn flowgram(&self) -> Option<&[u16]> {
        match self {
            Read::Sff(r) => Some(&r.flowgram),
            Read::Fastq(_) | Read::Sam(_) | Read::Bam(_) => None,
        }
    }

    pub fn is_flow_space(&self) -> bool {
        matches!(self, Read::Sff(_))
    }

    /// Reverse-complement the bases and reverse the qualities in place.
    ///
    /// Printing a reverse-strand record applies this transiently and undoes
    /// it afterwards; callers never observe a permanently mutated read.
    pub fn reverse_complement(&mut self) {
        let (bases, quals) = match self {
            Read::Fastq(r) => (&mut r.bases, &mut r.quals),
            Read::Sff(r) => (&mut r.bases, &mut r.quals),
            Read::Sam(r) | Read::Bam(r) => (&mut r.bases, &mut r.quals),
        };
        bases.reverse();
        for b in bases.iter_mut() {
            *b = complement(*b);
        }
        quals.reverse();
    }
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        other => other,
    }
}

/// A restartable-per-file producer of read batches.
///
/// `read_batch` advances a shared cursor and is serialized by the driver; an
/// empty batch signals exhaustion.
pub trait SequenceSource: Send {
    fn format(&self) -> SeqFormat;
    fn read_batch(&mut self, cap: usize) -> Result<Vec<Read>>;
}

/// FASTQ-backed source over one or more files, read back to back.
pub struct FastqSource {
    paths: Vec<String>,
    next_path: usize,
    records: Option<fastq::Records<io::BufReader<Box<dyn io::Read + Send>>>>,
}

impl FastqSource {
    pub fn new(paths: &[String]) -> Result<Self> {
        if paths.is_empty() {
            return Err(MapError::CommandLineArgument(
                "no read files specified".to_string(),
            ));
        }
        let mut src = FastqSource {
            paths: paths.to_vec(),
            next_path: 0,
            records: None,
        };
        src.advance_file()?;
        Ok(src)
    }

    fn advance_file(&mut self) -> Result<bool> {
        if self.next_path >= self.paths.len() {
            self.records = None;
            return Ok(false);
        }
        let path = &self.paths[self.next_path];
        self.next_path += 1;
        let file = File::open(path)?;
        let reader: Box<dyn io::Read + Send> = if path.ends_with(".gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        log::debug!("Reading {path}");
        self.records = Some(fastq::Reader::new(reader).records());
        Ok(true)
    }
}

impl SequenceSource for FastqSource {
    fn format(&self) -> SeqFormat {
        SeqFormat::Fastq
    }

    fn read_batch(&mut self, cap: usize) -> Result<Vec<Read>> {
        let mut batch = Vec::with_capacity(cap.min(1024));
        while batch.len() < cap {
            let Some(records) = self.records.as_mut() else {
                break;
            };
            match records.next() {
                Some(Ok(record)) => {
                    batch.push(Read::Fastq(FastqRead {
                        name: record.id().to_string(),
                        bases: record.seq().to_vec(),
                        quals: record.qual().to_vec(),
                    }));
                }
                Some(Err(e)) => {
                    return Err(MapError::Io(io::Error::new(io::ErrorKind::InvalidData, e)));
                }
                None => {
                    // current file exhausted, restart on the next one
                    if !self.advance_file()? {
                        break;
                    }
                }
            }
        }
        Ok(batch)
    }
}

/// In-memory source, used by tests and by collaborators that materialize
/// reads themselves (e.g. an SFF or BAM reader living outside this crate).
pub struct VecSource {
    format: SeqFormat,
    reads: std::collections::VecDeque<Read>,
}

impl VecSource {
    pub fn new(format: SeqFormat, reads: Vec<Read>) -> Result<Self> {
        if let Some(bad) = reads.iter().find(|r| r.format() != format) {
            return Err(MapError::OutOfRange(format!(
                "read {} does not match the source format {format}",
                bad.name()
            )));
        }
        Ok(VecSource {
            format,
            reads: reads.into(),
        })
    }
}

impl SequenceSource for VecSource {
    fn format(&self) -> SeqFormat {
        self.format
    }

    fn read_batch(&mut self, cap: usize) -> Result<Vec<Read>> {
        let n = cap.min(self.reads.len());
        Ok(self.reads.drain(..n).collect())
    }
}

/// Open the source for a run. Only FASTQ reading ships in-tree.
pub fn open_source(format: SeqFormat, paths: &[String]) -> Result<Box<dyn SequenceSource>> {
    match format {
        SeqFormat::Fastq => Ok(Box::new(FastqSource::new(paths)?)),
        SeqFormat::Sff | SeqFormat::Sam | SeqFormat::Bam => Err(MapError::OutOfRange(format!(
            "reading {format} input requires an external reader"
        ))),
    }
}
