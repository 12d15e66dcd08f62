//! Line-oriented keyword scanning over document files
//!
//! A line matches when it contains the keyword as a plain, case-sensitive
//! substring. Files are read as bytes so non-UTF-8 content is scanned
//! lossily instead of failing.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

fn line_matches(line: &[u8], keyword: &str) -> bool {
    String::from_utf8_lossy(line).contains(keyword)
}

/// Whether any line of `reader` contains `keyword`. Stops at the first match.
pub fn contains_keyword<R: BufRead>(reader: R, keyword: &str) -> io::Result<bool> {
    for line in reader.split(b'\n') {
        if line_matches(&line?, keyword) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Number of lines of `reader` containing `keyword`.
pub fn count_matching_lines<R: BufRead>(reader: R, keyword: &str) -> io::Result<usize> {
    let mut count = 0;
    for line in reader.split(b'\n') {
        if line_matches(&line?, keyword) {
            count += 1;
        }
    }
    Ok(count)
}

/// Whether the file at `path` contains `keyword`.
///
/// An unreadable file is treated as not matching.
pub fn file_contains(path: &Path, keyword: &str) -> bool {
    File::open(path)
        .and_then(|file| contains_keyword(BufReader::new(file), keyword))
        .unwrap_or(false)
}

/// Number of lines in the file at `path` containing `keyword`.
pub fn file_line_count(path: &Path, keyword: &str) -> io::Result<usize> {
    let file = File::open(path)?;
    count_matching_lines(BufReader::new(file), keyword)
}
