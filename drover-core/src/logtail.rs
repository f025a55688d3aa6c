//! Reading the end of worker log files

use crate::error::Result;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// At most this many trailing bytes are read from a log file
const MAX_TAIL_BYTES: u64 = 64 * 1024;

/// Last `lines` lines of the file at `path`.
///
/// Returns `None` if the file does not exist or holds no text.
pub async fn tail_lines(path: &Path, lines: usize) -> Result<Option<String>> {
    if lines == 0 {
        return Ok(None);
    }

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata().await?.len();
    let start = len.saturating_sub(MAX_TAIL_BYTES);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await?;

    let text = String::from_utf8_lossy(&buf);
    let mut all: Vec<&str> = text.split_terminator('\n').collect();
    // The first line may be cut in half by the byte window.
    if start > 0 && all.len() > 1 {
        all.remove(0);
    }

    let keep = &all[all.len().saturating_sub(lines)..];
    let tail = keep.join("\n");
    let tail = tail.trim_end();

    if tail.is_empty() {
        Ok(None)
    } else {
        Ok(Some(tail.to_string()))
    }
}
