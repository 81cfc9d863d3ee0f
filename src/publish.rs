/// Prometheus text rendering and atomic publish
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::{METRIC_NAME, PAYLOAD_CAPACITY, TMP_SUFFIX};
use crate::error::ExporterError;
use crate::histogram::HistogramSnapshot;

/// Writes snapshots to a fixed path via a sibling temporary file.
pub struct Publisher {
    path: PathBuf,
    tmp_path: PathBuf,
    payload: String,
}

impl Publisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        Publisher {
            path,
            tmp_path: PathBuf::from(tmp),
            payload: String::with_capacity(PAYLOAD_CAPACITY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Render `snapshot` and replace the published file with it.
    ///
    /// Readers see either the previous file or the new one in full. On failure
    /// the previous file is left as it was.
    pub fn publish(&mut self, snapshot: &HistogramSnapshot) -> Result<(), ExporterError> {
        render_exposition(&mut self.payload, snapshot);

        if let Err(source) = write_file(&self.tmp_path, self.payload.as_bytes()) {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(ExporterError::Publish {
                path: self.tmp_path.clone(),
                source,
            });
        }

        fs::rename(&self.tmp_path, &self.path).map_err(|source| ExporterError::Publish {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), bytes = self.payload.len(), "published snapshot");
        Ok(())
    }
}

/// Create or truncate `path`, write `data`, and close it.
fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(data)?;
    // Dropping the inner file here closes it before the caller renames.
    writer.into_inner().map_err(|err| err.into_error())?;
    Ok(())
}

/// Render `snapshot` as a cumulative histogram in the Prometheus text format.
///
/// ```text
/// tcp_rtt_ms_bucket{le="10"} 1
/// ...
/// tcp_rtt_ms_bucket{le="+Inf"} 3
/// tcp_rtt_ms_count 3
/// tcp_rtt_ms_sum 1520
/// ```
pub fn render_exposition(out: &mut String, snapshot: &HistogramSnapshot) {
    out.clear();
    out.reserve(PAYLOAD_CAPACITY);

    let mut cumulative = 0u64;
    for (threshold, count) in snapshot.cumulative_counts() {
        cumulative = count;
        push_bucket_line(out, |s| itoa_u64(s, u64::from(threshold)), cumulative);
    }
    cumulative += snapshot.overflow;
    push_bucket_line(out, |s| s.push_str("+Inf"), cumulative);

    out.push_str(METRIC_NAME);
    out.push_str("_count ");
    itoa_u64(out, cumulative);
    out.push('\n');

    out.push_str(METRIC_NAME);
    out.push_str("_sum ");
    // Infallible for String.
    let _ = write!(out, "{}", snapshot.sum_ms);
    out.push('\n');
}

#[inline]
fn push_bucket_line(out: &mut String, le: impl FnOnce(&mut String), value: u64) {
    out.push_str(METRIC_NAME);
    out.push_str("_bucket{le=\"");
    le(out);
    out.push_str("\"} ");
    itoa_u64(out, value);
    out.push('\n');
}

#[inline]
fn itoa_u64(s: &mut String, mut n: u64) {
    if n == 0 {
        s.push('0');
        return;
    }
    let mut buf = [b'0'; 20];
    let mut i = 20;
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }
    for &digit in &buf[i..] {
        s.push(digit as char);
    }
}
