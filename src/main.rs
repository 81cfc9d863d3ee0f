use std::thread;
use std::time::Duration;

use tracing::{error, info};

mod constants;
mod error;
mod histogram;
mod logging;
mod publish;
mod tcp_metrics;

use constants::*;
use error::ExporterError;
use histogram::RttHistogram;
use publish::Publisher;
use tcp_metrics::{SampleStats, Sampler};

/// One sample pass followed by one publish of the full-history histogram.
fn run_cycle(
    sampler: &Sampler,
    histogram: &mut RttHistogram,
    publisher: &mut Publisher,
) -> Result<SampleStats, ExporterError> {
    let stats = sampler.sample(histogram)?;
    publisher.publish(&histogram.snapshot())?;
    Ok(stats)
}

fn main() -> Result<(), ExporterError> {
    logging::init_logging("info");

    let interval = Duration::from_secs(PUBLISH_INTERVAL_SECS);
    let sampler = Sampler::ip_tcp_metrics();
    let mut publisher = Publisher::new(OUTPUT_PATH);
    let mut histogram = RttHistogram::new();

    info!(
        command = sampler.program(),
        output = %publisher.path().display(),
        tmp = %publisher.tmp_path().display(),
        interval_secs = interval.as_secs(),
        "starting tcp rtt exporter"
    );

    loop {
        match run_cycle(&sampler, &mut histogram, &mut publisher) {
            Ok(stats) => info!(
                lines = stats.lines,
                accepted = stats.accepted,
                malformed = stats.malformed,
                total = histogram.total(),
                "cycle complete"
            ),
            Err(err) => {
                error!(error = %err, "cycle failed");
                return Err(err);
            }
        }

        thread::sleep(interval);
    }
}
