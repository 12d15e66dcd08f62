//! Line-count worker
//!
//! Counts the lines of one document that contain a keyword, on a dedicated
//! blocking task. Any failure to run or read yields a count of zero.

use std::path::PathBuf;

use tracing::warn;

use super::scanner;

/// Count matching lines in the file at `path`.
pub async fn count_lines(path: PathBuf, keyword: String) -> usize {
    let shown = path.display().to_string();
    let joined = tokio::task::spawn_blocking(move || scanner::file_line_count(&path, &keyword)).await;

    match joined {
        Ok(Ok(count)) => count,
        Ok(Err(e)) => {
            warn!("Line count failed to read {}: {}", shown, e);
            0
        }
        Err(e) => {
            warn!("Line count worker for {} failed: {}", shown, e);
            0
        }
    }
}
