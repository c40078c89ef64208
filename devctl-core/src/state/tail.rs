use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const DEFAULT_TAIL_LINES: usize = 20;
pub const DEFAULT_TAIL_BYTES: u64 = 2 << 20;

/// Returns the last `n` lines of `path`, reading at most `max_bytes` from
/// its end. When the read starts mid-file the first, partial line is dropped.
/// Zero for either limit selects the default.
pub fn tail_lines(path: &Path, n: usize, max_bytes: u64) -> io::Result<Vec<String>> {
    let n = if n == 0 { DEFAULT_TAIL_LINES } else { n };
    let max_bytes = if max_bytes == 0 { DEFAULT_TAIL_BYTES } else { max_bytes };

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.log");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();
        assert_eq!(tail_lines(&path, 2, 0).unwrap(), ["c", "d"]);
        assert_eq!(tail_lines(&path, 10, 0).unwrap(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn drops_partial_first_line_when_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "first line\nsecond\nthird\n").unwrap();
        // the window starts inside "second"
        assert_eq!(tail_lines(&path, 10, 10).unwrap(), ["third"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(tail_lines(Path::new("/nonexistent/devctl.log"), 5, 0).is_err());
    }
}
