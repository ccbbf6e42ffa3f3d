//! Reading and writing record files.
//!
//! The format is line oriented: `;` starts a comment, records are printed in
//! zone-file style with strvis-escaped owner names, and NSEC3 files carry a
//! `;;;; label_counter = 0x<hex>` checkpoint line for resuming. Files ending
//! in `.gz` are read and written gzip-compressed.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lazy_static::lazy_static;
use n3map_proto::Name;
use regex::Regex;

use crate::error::{Error, Result};
use crate::log::Logger;
use crate::records::{nsec3_from_text, nsec_from_text, Nsec3Record, NsecRecord};
use crate::Stats;

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"^\s*([;#].*)?$").unwrap();
    static ref LABEL_COUNTER: Regex =
        Regex::new(r"^;;;; label_counter\s*=\s*0x([0-9a-fA-F]+)").unwrap();
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

/// A writable record file (or stdout).
pub struct RrFile {
    writer: Option<Box<dyn Write + Send>>,
    path: Option<PathBuf>,
}

impl RrFile {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let writer: Box<dyn Write + Send> = if is_gzip(path) {
            Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
        } else {
            Box::new(BufWriter::new(file))
        };
        Ok(Self {
            writer: Some(writer),
            path: Some(path.to_path_buf()),
        })
    }

    /// A record stream to stdout (`-o -`).
    pub fn stdout() -> Self {
        Self {
            writer: Some(Box::new(std::io::stdout())),
            path: None,
        }
    }

    fn out(&mut self) -> &mut Box<dyn Write + Send> {
        self.writer.as_mut().expect("record file already closed")
    }

    pub fn write_header(&mut self, zone: &Name, title: &str) -> Result<()> {
        let banner = ";".repeat(80);
        let zonestr = format!(" zone: {}", zone);
        writeln!(self.out(), "{}", banner)?;
        writeln!(self.out(), ";{}", center(&zonestr, 79))?;
        writeln!(self.out(), ";{}", center(title, 79))?;
        writeln!(self.out(), "{}", banner)?;
        Ok(())
    }

    pub fn write_record(&mut self, record: &impl std::fmt::Display) -> Result<()> {
        writeln!(self.out(), "{}", record)?;
        Ok(())
    }

    pub fn write_number_of_rrs(&mut self, n: usize) -> Result<()> {
        writeln!(self.out(), "; number of records = {}", n)?;
        Ok(())
    }

    pub fn write_label_counter(&mut self, label_counter: u64) -> Result<()> {
        writeln!(self.out(), ";;;; label_counter = 0x{:x}", label_counter)?;
        Ok(())
    }

    pub fn write_stats(&mut self, stats: &Stats) -> Result<()> {
        let queries = stats.queries.load(std::sync::atomic::Ordering::Relaxed);
        let tested = stats.tested_hashes.load(std::sync::atomic::Ordering::Relaxed);
        writeln!(self.out(), "\n;; statistics")?;
        writeln!(self.out(), "; queries = {}", queries)?;
        if tested > 0 {
            writeln!(self.out(), "; tested_hashes = {}", tested)?;
        }
        Ok(())
    }

    /// Flushes and closes the file; further writes are a programming error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for RrFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn center(s: &str, width: usize) -> String {
    if s.len() >= width {
        return s.to_string();
    }
    let pad = (width - s.len()) / 2;
    let mut line = " ".repeat(pad);
    line.push_str(s);
    // trailing padding is stripped anyway
    line
}

/// The backup name used by `--continue`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("~");
    PathBuf::from(name)
}

/// Moves an existing record file aside before it is rewritten.
pub fn into_backup(path: &Path) -> Result<()> {
    std::fs::rename(path, backup_path(path))?;
    Ok(())
}

pub fn unlink_backup(path: &Path, logger: &Logger) {
    if let Err(e) = std::fs::remove_file(backup_path(path)) {
        logger.debug2(format!("failed to unlink backup file: {}", e));
    }
}

/// A readable record file.
pub struct RrReader {
    reader: Box<dyn BufRead>,
    filename: String,
    /// The last `;;;; label_counter` checkpoint seen while reading.
    pub label_counter: Option<u64>,
}

impl RrReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn BufRead> = if is_gzip(path) {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self {
            reader,
            filename: path.display().to_string(),
            label_counter: None,
        })
    }

    fn parse_error(&self, line: usize, msg: impl Into<String>) -> Error {
        Error::FileParse {
            file: self.filename.clone(),
            line,
            msg: msg.into(),
        }
    }

    fn read_records<R>(
        &mut self,
        parse: impl Fn(&str) -> Result<R>,
        accept_label_counter: bool,
    ) -> Result<Vec<R>> {
        let mut records = Vec::new();
        let mut line = String::new();
        let mut line_no = 0;
        loop {
            line.clear();
            line_no += 1;
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end_matches('\n');
            if accept_label_counter {
                if let Some(caps) = LABEL_COUNTER.captures(trimmed) {
                    let value = u64::from_str_radix(caps.get(1).unwrap().as_str(), 16)
                        .map_err(|_| {
                            self.parse_error(line_no, "cannot parse label counter value")
                        })?;
                    self.label_counter = Some(value);
                    continue;
                }
            }
            if COMMENT.is_match(trimmed) {
                continue;
            }
            match parse(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => return Err(self.parse_error(line_no, e.to_string())),
            }
        }
        Ok(records)
    }

    /// Reads all NSEC records of the file.
    pub fn nsec_reader(&mut self, logger: &Arc<Logger>) -> Result<Vec<NsecRecord>> {
        logger.info(format!("reading NSEC RRs from {}", self.filename));
        self.read_records(nsec_from_text, false)
    }

    /// Reads all NSEC3 records of the file, capturing the label counter
    /// checkpoint along the way.
    pub fn nsec3_reader(&mut self, logger: &Arc<Logger>) -> Result<Vec<Nsec3Record>> {
        logger.info(format!("reading NSEC3 RRs from {}", self.filename));
        self.read_records(nsec3_from_text, true)
    }
}
