use std::net::SocketAddr;

use async_trait::async_trait;
use hyper::Uri;

pub mod sampler;
pub mod transport;

pub use sampler::RequestSampler;
pub use transport::{HyperTransport, TransportOptions};

/// Elapsed-time milestones for one GET, in fractional seconds.
///
/// Every field is measured from the instant the attempt started, so on a
/// successful attempt `name_lookup <= connect <= start_transfer <= total`.
/// On a reused connection the lookup and connect milestones record the
/// (near-zero) elapsed time at which those phases were skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    /// Time until name resolution finished.
    pub name_lookup: f64,
    /// Time until the TCP connection was established.
    pub connect: f64,
    /// Time until the first byte of the response arrived.
    pub start_transfer: f64,
    /// Time until the response body was fully received.
    pub total: f64,
}

/// Everything observed for one completed GET.
#[derive(Debug, Clone, Default)]
pub struct RequestAttempt {
    /// Final HTTP status code, after redirects.
    pub status: u16,
    /// IP address of the server the response came from, when known.
    pub remote_ip: Option<String>,
    /// Full response body.
    pub body: String,
    /// Raw response header block, status line included.
    pub headers: String,
    pub timing: PhaseTimings,
}

/// A failure while performing a single GET attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL has no host: {0}")]
    MissingHost(String),
    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),
    #[error("name lookup failed for {host}: {source}")]
    NameLookup {
        host: String,
        source: std::io::Error,
    },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("HTTP transfer failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid redirect location: {0:?}")]
    InvalidRedirect(String),
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
}

/// Errors surfaced by the sampler itself.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// The transport could not be constructed.
    #[error("unable to initialize HTTP transport: {0}")]
    Init(String),
    /// A repetition failed; the sampling run was aborted.
    #[error(transparent)]
    Transfer(#[from] TransportError),
}

/// One blocking GET against a URL with a fixed set of extra header lines.
///
/// [`RequestSampler`] drives this once per repetition. Implementations may
/// reuse connections between calls; `&mut self` leaves room for that.
#[async_trait]
pub trait HttpTransport {
    async fn get(
        &mut self,
        url: &Uri,
        headers: &[String],
    ) -> Result<RequestAttempt, TransportError>;
}
