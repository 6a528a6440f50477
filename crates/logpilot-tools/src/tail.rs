//! Bounded log-tail retrieval.
//!
//! Scans backward from end-of-file in fixed-size chunks, counting newline
//! boundaries, so the last `n` lines of an arbitrarily large file can be
//! read without loading the whole file. The backward scan is purely an I/O
//! optimization: the result matches a full forward read.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_BYTES: u64 = 8 * 1024;

/// Return the last `n` lines of `path` in original (oldest-first) order.
///
/// A file with fewer than `n` lines comes back whole; `n = 0` is an empty
/// result; a final line without a trailing newline is included exactly once.
/// Invalid UTF-8 is replaced rather than rejected, since log files are not
/// always clean.
pub fn tail(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    // Suffix of the file accumulated so far, grown chunk by chunk from the
    // end until it spans at least n line boundaries (or the whole file).
    let mut suffix: Vec<u8> = Vec::new();
    let mut pos = len;
    while pos > 0 {
        let read_len = CHUNK_BYTES.min(pos);
        pos -= read_len;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; read_len as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&suffix);
        suffix = chunk;

        if boundary_count(&suffix) >= n {
            break;
        }
    }

    let text = String::from_utf8_lossy(&suffix);
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if suffix.last() == Some(&b'\n') {
        // The trailing newline terminates the last line, it does not start
        // an empty one.
        lines.pop();
    }
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].to_vec())
}

/// Newlines acting as boundaries between retained lines: a newline at the
/// very end of the suffix only terminates the final line.
fn boundary_count(suffix: &[u8]) -> usize {
    let total = suffix.iter().filter(|&&b| b == b'\n').count();
    if suffix.last() == Some(&b'\n') {
        total - 1
    } else {
        total
    }
}
