/// External command reporting the kernel TCP metrics cache
pub const IP_COMMAND_PATH: &str = "/bin/ip";

/// Arguments passed to the ip command
pub const IP_COMMAND_ARGS: [&str; 2] = ["tcp_metrics", "show"];

/// Upper bounds of the histogram buckets in milliseconds, ascending
pub const RTT_BUCKETS_MS: [u32; 9] = [10, 20, 30, 50, 100, 200, 300, 500, 1000];

/// Number of finite buckets
pub const BUCKET_COUNT: usize = RTT_BUCKETS_MS.len();

/// Published file, read by the node exporter textfile collector
pub const OUTPUT_PATH: &str = "/run/nodeexp/tcp_rtt_ms.prom";

/// Suffix appended to the output path for the not-yet-renamed snapshot
pub const TMP_SUFFIX: &str = ".tmp";

/// Seconds between publish cycles
pub const PUBLISH_INTERVAL_SECS: u64 = 3600;

/// Metric family name used in the exposition text
pub const METRIC_NAME: &str = "tcp_rtt_ms";

/// Initial capacity for the rendered exposition text
pub const PAYLOAD_CAPACITY: usize = 512;
