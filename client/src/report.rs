use std::fmt::{self, Display, Formatter};

use sampler::RequestSampler;

/// One-line sampling summary:
///
/// `SKTEST;<ip>;<code>;<name lookup>;<connect>;<first byte>;<total>`
///
/// The four per-phase figures are arithmetic means of the accumulated
/// sums over the configured request count. The historical consumers of
/// this line call them medians; the computed statistic always was a mean
/// and the line keeps producing it unchanged.
pub struct StatusLine {
    pub ip: String,
    pub response_code: u16,
    pub name_lookup: f64,
    pub connect: f64,
    pub start_transfer: f64,
    pub total: f64,
}

impl StatusLine {
    pub fn from_sampler<T>(sampler: &RequestSampler<T>, request_count: i32) -> Self {
        StatusLine {
            ip: sampler.last_connection_ip().to_string(),
            response_code: sampler.response_code(),
            name_lookup: mean(sampler.total_name_lookup_time(), request_count),
            connect: mean(sampler.total_connect_time(), request_count),
            start_transfer: mean(sampler.total_start_transfer_time(), request_count),
            total: mean(sampler.total_transfer_time(), request_count),
        }
    }
}

/// Non-positive counts run no requests, so there is nothing to average.
fn mean(sum: f64, count: i32) -> f64 {
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

impl Display for StatusLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SKTEST;{};{};{:.6};{:.6};{:.6};{:.6}",
            self.ip,
            self.response_code,
            self.name_lookup,
            self.connect,
            self.start_transfer,
            self.total
        )
    }
}
