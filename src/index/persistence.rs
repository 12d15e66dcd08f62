//! Flat-file catalog format
//!
//! One record per line: `id|title|authors|year|path`, newline-terminated.
//! Every save rewrites the whole file. Fields are not escaped, so a value
//! containing `|` cannot round-trip.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::types::{DocumentId, DocumentRecord, NewDocument};

const FIELD_SEPARATOR: char = '|';

/// Records recovered from a persisted catalog
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<DocumentRecord>,
    /// Lines that did not parse and were dropped
    pub skipped: usize,
}

/// Parse a single persisted line. Returns `None` for anything malformed.
pub fn parse_line(line: &str) -> Option<DocumentRecord> {
    let line = line.trim_end_matches(['\n', '\r']);
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() != 5 {
        return None;
    }

    let id: DocumentId = fields[0].trim().parse().ok()?;
    if id == 0 || fields[1..].iter().any(|f| f.is_empty()) {
        return None;
    }

    Some(DocumentRecord::new(
        id,
        NewDocument::new(fields[1], fields[2], fields[3], fields[4].trim()),
    ))
}

/// Format a record as a persisted line (without the trailing newline)
pub fn format_line(record: &DocumentRecord) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        record.id, record.title, record.authors, record.year, record.path
    )
}

/// Read every well-formed record from `reader`, dropping malformed lines.
pub fn read_records<R: BufRead>(reader: R) -> io::Result<LoadedRecords> {
    let mut loaded = LoadedRecords::default();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(record) => loaded.records.push(record),
            None => loaded.skipped += 1,
        }
    }
    Ok(loaded)
}

/// Write all records, one per line.
pub fn write_records<W: Write>(mut writer: W, records: &[DocumentRecord]) -> io::Result<()> {
    for record in records {
        writeln!(writer, "{}", format_line(record))?;
    }
    writer.flush()
}

/// Load records from a catalog file.
pub fn load_file(path: &Path) -> io::Result<LoadedRecords> {
    let file = File::open(path)?;
    read_records(BufReader::new(file))
}

/// Rewrite the catalog file with `records`.
///
/// Writes a sibling temp file and renames it over the target, so a failed
/// save leaves the previous file intact.
pub fn save_file(path: &Path, records: &[DocumentRecord]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        write_records(&mut writer, records)?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}
