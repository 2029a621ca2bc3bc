//! Append-only score records.
//!
//! One flat UTF-8 text file per metric family, one decimal value per line,
//! newline-terminated, no header. Re-running an evaluation appends another
//! line; nothing is ever rewritten.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{EvalError, Result};
use crate::scorer::Metric;

/// Sink for run summaries.
pub trait ResultLog {
    fn append(&self, metric: Metric, value: f64) -> Result<()>;
}

/// Decimal text of a recorded value. Shortest representation that parses
/// back to the same `f64`.
pub fn format_value(value: f64) -> String {
    format!("{value:?}")
}

/// Append-mode handle a record line is written through.
trait AppendTarget: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `line` with a single `write` call. A short write or failed sync
/// removes the partial line, but only while the file still ends with it.
fn append_line<T: AppendTarget>(target: &mut T, line: &[u8]) -> io::Result<()> {
    let before = target.len()?;
    let (written, failure) = match target.write(line) {
        Ok(n) if n == line.len() => match target.sync() {
            Ok(()) => return Ok(()),
            Err(e) => (n, e),
        },
        Ok(n) => (
            n,
            io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {n} of {} bytes", line.len()),
            ),
        ),
        Err(e) => (0, e),
    };
    if written == 0 {
        return Err(failure);
    }

    let rollback = match target.len() {
        Ok(len) if len == before + written as u64 => target.truncate(before),
        Ok(_) => {
            return Err(io::Error::new(
                failure.kind(),
                format!("{failure}; file grew concurrently, {written} partial bytes left in place"),
            ))
        }
        Err(e) => Err(e),
    };
    match rollback {
        Ok(()) => Err(failure),
        Err(e) => Err(io::Error::new(
            failure.kind(),
            format!("{failure}; rollback of {written} bytes failed: {e}"),
        )),
    }
}

/// Records under a directory: `<dir>/clip_s.txt`, `<dir>/lpips_vgg.txt`.
#[derive(Debug, Clone)]
pub struct FileResultLog {
    dir: PathBuf,
}

impl FileResultLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, metric: Metric) -> PathBuf {
        self.dir.join(metric.record_file())
    }

    /// Every value recorded so far for `metric`, oldest first.
    pub fn history(&self, metric: Metric) -> Result<Vec<f64>> {
        let path = self.path_for(metric);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EvalError::read(&path, e)),
        };

        let mut values = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| EvalError::read(&path, e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = line
                .parse::<f64>()
                .map_err(|e| EvalError::read(&path, format!("bad line '{line}': {e}")))?;
            values.push(value);
        }
        Ok(values)
    }

    fn write_line(path: &Path, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        append_line(&mut file, line.as_bytes())
    }
}

impl ResultLog for FileResultLog {
    fn append(&self, metric: Metric, value: f64) -> Result<()> {
        let path = self.path_for(metric);
        let persist = |source: std::io::Error| EvalError::Persist {
            path: path.clone(),
            source,
        };

        if !self.dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&self.dir).map_err(persist)?;
        }

        let line = format!("{}\n", format_value(value));
        Self::write_line(&path, &line).map_err(persist)?;

        debug!(path = %path.display(), value, "Appended run summary");
        Ok(())
    }
}

/// In-memory recorder for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryResultLog {
    entries: Mutex<Vec<(Metric, f64)>>,
}

impl MemoryResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Metric, f64)> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResultLog for MemoryResultLog {
    fn append(&self, metric: Metric, value: f64) -> Result<()> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push((metric, value)),
            Err(poisoned) => poisoned.into_inner().push((metric, value)),
        }
        Ok(())
    }
}

impl<T: ResultLog + ?Sized> ResultLog for &T {
    fn append(&self, metric: Metric, value: f64) -> Result<()> {
        (**self).append(metric, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_round_trip_through_text() {
        for v in [0.8, 1.0, 0.123456789012345, 1e-7, 0.0] {
            assert_eq!(format_value(v).parse::<f64>().unwrap(), v);
        }
        assert_eq!(format_value(0.8), "0.8");
    }

    #[test]
    fn append_creates_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileResultLog::new(dir.path().join("records"));
        log.append(Metric::Embedding, 0.91).unwrap();

        let text = std::fs::read_to_string(log.path_for(Metric::Embedding)).unwrap();
        assert_eq!(text, "0.91\n");
        assert!(!log.path_for(Metric::Perceptual).exists());
    }

    #[test]
    fn sequential_appends_never_touch_prior_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileResultLog::new(dir.path());
        std::fs::write(log.path_for(Metric::Perceptual), "0.5\n").unwrap();

        log.append(Metric::Perceptual, 0.25).unwrap();
        log.append(Metric::Perceptual, 0.125).unwrap();

        let text = std::fs::read_to_string(log.path_for(Metric::Perceptual)).unwrap();
        assert_eq!(text, "0.5\n0.25\n0.125\n");
        assert_eq!(log.history(Metric::Perceptual).unwrap(), vec![0.5, 0.25, 0.125]);
    }

    #[test]
    fn history_of_missing_record_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileResultLog::new(dir.path());
        assert!(log.history(Metric::Embedding).unwrap().is_empty());
    }

    #[test]
    fn unwritable_location_is_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let log = FileResultLog::new(blocker.join("records"));
        let err = log.append(Metric::Embedding, 0.5).unwrap_err();
        assert!(matches!(err, EvalError::Persist { .. }));
    }

    /// In-memory target that accepts at most `accept` bytes per write.
    #[derive(Default)]
    struct Target {
        data: Vec<u8>,
        accept: Option<usize>,
        fail_sync: bool,
        fail_truncate: bool,
        /// Bytes another writer appends right after ours
        interleaved: Vec<u8>,
    }

    impl Write for Target {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.accept.map_or(buf.len(), |a| a.min(buf.len()));
            self.data.extend_from_slice(&buf[..n]);
            self.data.extend_from_slice(&self.interleaved);
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space"));
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendTarget for Target {
        fn len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::new(io::ErrorKind::Other, "sync failed"));
            }
            Ok(())
        }
    }

    fn target(existing: &str) -> Target {
        Target {
            data: existing.as_bytes().to_vec(),
            ..Target::default()
        }
    }

    #[test]
    fn short_write_is_rolled_back() {
        let mut t = target("0.5\n");
        t.accept = Some(2);
        let err = append_line(&mut t, b"0.25\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(t.data, b"0.5\n");
    }

    #[test]
    fn failed_sync_drops_whole_line() {
        let mut t = target("0.5\n");
        t.fail_sync = true;
        let err = append_line(&mut t, b"0.25\n").unwrap_err();
        assert!(err.to_string().contains("sync failed"), "{err}");
        assert_eq!(t.data, b"0.5\n");
    }

    #[test]
    fn concurrent_append_is_not_truncated() {
        let mut t = target("0.5\n");
        t.accept = Some(2);
        t.interleaved = b"0.75\n".to_vec();
        let err = append_line(&mut t, b"0.25\n").unwrap_err();
        assert!(err.to_string().contains("concurrently"), "{err}");
        assert_eq!(t.data, b"0.5\n0.0.75\n");
    }

    #[test]
    fn failed_rollback_is_reported() {
        let mut t = target("0.5\n");
        t.accept = Some(2);
        t.fail_truncate = true;
        let err = append_line(&mut t, b"0.25\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert!(err.to_string().contains("rollback of 2 bytes failed: read-only"), "{err}");
    }

    #[test]
    fn nothing_written_returns_write_error() {
        let mut t = target("");
        t.accept = Some(0);
        let err = append_line(&mut t, b"0.25\n").unwrap_err();
        assert_eq!(err.to_string(), "no space");
        assert!(t.data.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_device_is_an_error() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        assert!(FileResultLog::write_line(full, "0.5\n").is_err());
    }

    #[test]
    fn memory_log_keeps_order() {
        let log = MemoryResultLog::new();
        log.append(Metric::Embedding, 0.1).unwrap();
        log.append(Metric::Perceptual, 0.2).unwrap();
        assert_eq!(
            log.entries(),
            vec![(Metric::Embedding, 0.1), (Metric::Perceptual, 0.2)]
        );
    }
}
