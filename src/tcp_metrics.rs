/// RTT sampling from `ip tcp_metrics show`
use std::io::{self, BufRead, BufReader};
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, warn};

use crate::constants::{IP_COMMAND_ARGS, IP_COMMAND_PATH};
use crate::error::{ExporterError, RttParseError};
use crate::histogram::RttHistogram;

/// Field marker preceding the RTT value in a tcp_metrics line
const RTT_MARKER: &[u8] = b" rtt ";

/// Unit suffix of the RTT value
const MICROS_SUFFIX: &[u8] = b"us";

/// Counters for a single sampling pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleStats {
    /// Lines read from the command
    pub lines: u64,
    /// Lines that produced a measurement
    pub accepted: u64,
    /// Lines with an `rtt ...us` field that failed to parse
    pub malformed: u64,
}

/// External command producing one TCP destination per line.
pub struct Sampler {
    program: String,
    args: Vec<String>,
}

impl Sampler {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Sampler {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `/bin/ip tcp_metrics show`
    pub fn ip_tcp_metrics() -> Self {
        Self::new(IP_COMMAND_PATH, &IP_COMMAND_ARGS)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the command once and fold every RTT it reports into `histogram`.
    ///
    /// The child is always reaped, including when reading its output fails.
    /// Its exit status is not checked.
    pub fn sample(&self, histogram: &mut RttHistogram) -> Result<SampleStats, ExporterError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| ExporterError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the reader closes the pipe before we wait on the child.
        let folded = match child.stdout.take() {
            Some(stdout) => fold_lines(BufReader::new(stdout), histogram)
                .map_err(ExporterError::from),
            None => Err(ExporterError::MissingStdout {
                program: self.program.clone(),
            }),
        };

        let waited = child.wait();
        settle(&self.program, folded, waited)
    }
}

/// Combine the read result with the reap result. A read error wins over a
/// wait error.
fn settle(
    program: &str,
    folded: Result<SampleStats, ExporterError>,
    waited: io::Result<ExitStatus>,
) -> Result<SampleStats, ExporterError> {
    let status = match waited {
        Ok(status) => status,
        Err(source) => {
            folded?;
            return Err(ExporterError::Wait {
                program: program.to_string(),
                source,
            });
        }
    };
    if !status.success() {
        debug!(program, %status, "command exited unsuccessfully");
    }
    folded
}

/// Read `reader` to exhaustion, recording each parsed RTT as soon as it is seen.
///
/// Malformed RTT values are logged and skipped.
pub fn fold_lines<R: BufRead>(
    mut reader: R,
    histogram: &mut RttHistogram,
) -> io::Result<SampleStats> {
    let mut stats = SampleStats::default();
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        stats.lines += 1;

        match parse_rtt_line(&line) {
            Ok(Some(rtt_ms)) => {
                histogram.record(rtt_ms);
                stats.accepted += 1;
            }
            Ok(None) => {}
            Err(err) => {
                stats.malformed += 1;
                warn!(
                    error = %err,
                    line = %String::from_utf8_lossy(trim_eol(&line)),
                    "skipping line"
                );
            }
        }
    }

    Ok(stats)
}

/// Extract the RTT in milliseconds from one tcp_metrics line.
///
/// Returns `Ok(None)` for lines without an `rtt` field or whose value is not
/// in microseconds.
pub fn parse_rtt_line(line: &[u8]) -> Result<Option<f64>, RttParseError> {
    let line = trim_eol(line);
    let Some(pos) = find_subslice(line, RTT_MARKER) else {
        return Ok(None);
    };

    let Some(token) = first_token(&line[pos + RTT_MARKER.len()..]) else {
        return Ok(None);
    };

    let Some(digits) = token.strip_suffix(MICROS_SUFFIX) else {
        return Ok(None);
    };

    let micros = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| RttParseError::InvalidMicros {
            token: String::from_utf8_lossy(token).into_owned(),
        })?;

    Ok(Some(micros as f64 / 1000.0))
}

/// First whitespace-delimited token, skipping leading whitespace
fn first_token(data: &[u8]) -> Option<&[u8]> {
    let start = data.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = &data[start..];
    let end = rest
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[inline]
fn trim_eol(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE_OUTPUT: &str = "\
10.0.0.1 age 1.204sec cwnd 10 rtt 22500us rttvar 11250us source 10.0.0.2
10.0.0.3 age 12.5sec tw_ts 0/0 ts_recent_age 0 rtt 5000us rttvar 2500us source 10.0.0.2
fe80::1 age 3sec cwnd 10 source fe80::2
10.0.0.4 age 1sec rtt 1500000us rttvar 750000us source 10.0.0.2
";

    #[test]
    fn test_parse_rtt_line_valid() {
        let line = b"10.0.0.1 age 1.204sec cwnd 10 rtt 22500us rttvar 11250us source 10.0.0.2";
        assert_eq!(parse_rtt_line(line), Ok(Some(22.5)));
    }

    #[test]
    fn test_parse_rtt_line_no_rtt_field() {
        let line = b"10.0.0.1 age 1.204sec cwnd 10 source 10.0.0.2";
        assert_eq!(parse_rtt_line(line), Ok(None));
    }

    #[test]
    fn test_parse_rtt_line_wrong_unit() {
        let line = b"10.0.0.1 age 1sec rtt 5ms rttvar 2ms";
        assert_eq!(parse_rtt_line(line), Ok(None));
    }

    #[test]
    fn test_parse_rtt_line_rttvar_alone_is_not_rtt() {
        let line = b"10.0.0.1 age 1sec rttvar 2500us source 10.0.0.2";
        assert_eq!(parse_rtt_line(line), Ok(None));
    }

    #[test]
    fn test_parse_rtt_line_marker_at_end() {
        assert_eq!(parse_rtt_line(b"10.0.0.1 rtt "), Ok(None));
        assert_eq!(parse_rtt_line(b"10.0.0.1 rtt    \n"), Ok(None));
    }

    #[test]
    fn test_parse_rtt_line_value_at_end_of_line() {
        assert_eq!(parse_rtt_line(b"10.0.0.1 rtt 1000us\n"), Ok(Some(1.0)));
        assert_eq!(parse_rtt_line(b"10.0.0.1 rtt 1000us\r\n"), Ok(Some(1.0)));
    }

    #[test]
    fn test_parse_rtt_line_keeps_fraction() {
        assert_eq!(parse_rtt_line(b"x rtt 1us"), Ok(Some(0.001)));
        assert_eq!(parse_rtt_line(b"x rtt 0us"), Ok(Some(0.0)));
    }

    #[test]
    fn test_parse_rtt_line_non_numeric() {
        assert_eq!(
            parse_rtt_line(b"10.0.0.1 rtt abcus rttvar 1us"),
            Err(RttParseError::InvalidMicros {
                token: "abcus".to_string()
            })
        );
    }

    #[test]
    fn test_parse_rtt_line_bare_suffix_is_malformed() {
        assert!(parse_rtt_line(b"10.0.0.1 rtt us").is_err());
    }

    #[test]
    fn test_parse_rtt_line_negative_is_malformed() {
        assert!(parse_rtt_line(b"10.0.0.1 rtt -5us").is_err());
    }

    #[test]
    fn test_parse_rtt_line_non_utf8_elsewhere() {
        let line = b"\xff\xfe host rtt 3000us";
        assert_eq!(parse_rtt_line(line), Ok(Some(3.0)));
    }

    #[test]
    fn test_parse_rtt_line_beyond_u64_is_malformed() {
        assert!(parse_rtt_line(b"x rtt 18446744073709551616us").is_err());
        assert_eq!(
            parse_rtt_line(b"x rtt 18446744073709551615us"),
            Ok(Some(u64::MAX as f64 / 1000.0))
        );
    }

    #[test]
    fn test_first_token_skips_leading_whitespace() {
        assert_eq!(first_token(b"  \t22500us rttvar"), Some(&b"22500us"[..]));
        assert_eq!(first_token(b"   "), None);
        assert_eq!(first_token(b""), None);
    }

    #[test]
    fn test_fold_lines_records_measurements() {
        let mut hist = RttHistogram::new();
        let stats = fold_lines(Cursor::new(SAMPLE_OUTPUT), &mut hist).unwrap();
        assert_eq!(
            stats,
            SampleStats {
                lines: 4,
                accepted: 3,
                malformed: 0
            }
        );
        let snap = hist.snapshot();
        assert_eq!(snap.bucket_counts[0], 1);
        assert_eq!(snap.bucket_counts[2], 1);
        assert_eq!(snap.overflow, 1);
        assert_eq!(snap.sum_ms, 1527.5);
    }

    #[test]
    fn test_fold_lines_skips_malformed_and_continues() {
        let input = "a rtt 12xus\nb rtt 2000us\n";
        let mut hist = RttHistogram::new();
        let stats = fold_lines(Cursor::new(input), &mut hist).unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(hist.total(), 1);
    }

    #[test]
    fn test_fold_lines_last_line_without_newline() {
        let mut hist = RttHistogram::new();
        let stats = fold_lines(Cursor::new("a rtt 2000us"), &mut hist).unwrap();
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[test]
    fn test_fold_lines_empty_input() {
        let mut hist = RttHistogram::new();
        let stats = fold_lines(Cursor::new(""), &mut hist).unwrap();
        assert_eq!(stats, SampleStats::default());
        assert_eq!(hist.total(), 0);
    }

    #[test]
    fn test_sample_runs_command() {
        let sampler = Sampler::new(
            "/bin/sh",
            &["-c", "printf 'x rtt 5000us\\ny rtt 15000us\\n'"],
        );
        let mut hist = RttHistogram::new();
        let stats = sampler.sample(&mut hist).unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(hist.snapshot().sum_ms, 20.0);
    }

    #[test]
    fn test_sample_ignores_exit_status() {
        let sampler = Sampler::new("/bin/sh", &["-c", "echo 'x rtt 1000us'; exit 3"]);
        let mut hist = RttHistogram::new();
        let stats = sampler.sample(&mut hist).unwrap();
        assert_eq!(stats.accepted, 1);
    }

    #[test]
    fn test_sample_no_output() {
        let sampler = Sampler::new("/bin/sh", &["-c", "exit 1"]);
        let mut hist = RttHistogram::new();
        let stats = sampler.sample(&mut hist).unwrap();
        assert_eq!(stats, SampleStats::default());
    }

    #[test]
    fn test_sample_missing_binary_is_spawn_error() {
        let sampler = Sampler::new("/nonexistent/ip", &["tcp_metrics", "show"]);
        let mut hist = RttHistogram::new();
        let err = sampler.sample(&mut hist).unwrap_err();
        assert!(matches!(err, ExporterError::Spawn { .. }));
        assert_eq!(hist.total(), 0);
    }

    #[test]
    fn test_settle_wait_failure_is_wait_error() {
        let folded = Ok(SampleStats::default());
        let waited = Err(io::Error::new(io::ErrorKind::Other, "no child"));
        let err = settle("/bin/ip", folded, waited).unwrap_err();
        assert!(matches!(err, ExporterError::Wait { .. }));
        assert!(err.to_string().starts_with("failed to wait for /bin/ip"));
    }

    #[test]
    fn test_settle_read_error_wins_over_wait_error() {
        let folded = Err(ExporterError::Read(io::Error::new(io::ErrorKind::Other, "pipe")));
        let waited = Err(io::Error::new(io::ErrorKind::Other, "no child"));
        let err = settle("/bin/ip", folded, waited).unwrap_err();
        assert!(matches!(err, ExporterError::Read(_)));
    }

    #[test]
    fn test_settle_nonzero_exit_keeps_stats() {
        use std::os::unix::process::ExitStatusExt;

        let stats = SampleStats {
            lines: 2,
            accepted: 1,
            malformed: 0,
        };
        let waited = Ok(ExitStatus::from_raw(3 << 8));
        assert_eq!(settle("/bin/ip", Ok(stats), waited).unwrap(), stats);
    }

    #[test]
    fn test_ip_tcp_metrics_command() {
        let sampler = Sampler::ip_tcp_metrics();
        assert_eq!(sampler.program(), "/bin/ip");
        assert_eq!(sampler.args, vec!["tcp_metrics", "show"]);
    }
}
