use hyper::Uri;

use crate::{HttpTransport, PhaseTimings, SamplerError};

/// Running sums of the four per-request phases, in seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingTotals {
    pub name_lookup: f64,
    pub connect: f64,
    pub start_transfer: f64,
    pub total: f64,
}

impl TimingTotals {
    fn reset(&mut self) {
        *self = TimingTotals::default();
    }

    fn add(&mut self, timing: &PhaseTimings) {
        self.name_lookup += timing.name_lookup;
        self.connect += timing.connect;
        self.start_transfer += timing.start_transfer;
        self.total += timing.total;
    }
}

/// Issues a fixed number of identical GET requests against one URL and
/// accumulates the per-phase timings across all of them.
///
/// The sampler keeps the last response's status code, body, raw header
/// block and server IP, plus the four timing sums. The sums are raw
/// accumulated totals; dividing by the configured count to obtain a mean
/// is the caller's business. Not meant for concurrent use.
pub struct RequestSampler<T> {
    transport: T,
    headers: Vec<String>,
    request_count: i32,
    totals: TimingTotals,
    response_code: u16,
    ip: String,
    body: String,
    response_headers: String,
    last_error: Option<String>,
}

impl<T> RequestSampler<T> {
    pub fn new(transport: T) -> Self {
        RequestSampler {
            transport,
            headers: Vec::new(),
            request_count: 1,
            totals: TimingTotals::default(),
            response_code: 0,
            ip: String::new(),
            body: String::new(),
            response_headers: String::new(),
            last_error: None,
        }
    }

    /// Appends one raw header line ("Name: Value") to the list sent with
    /// every repetition. The line is not validated here; a malformed line
    /// surfaces as an error from [`get`](RequestSampler::get).
    pub fn add_header<S: Into<String>>(&mut self, line: S) {
        self.headers.push(line.into());
    }

    /// Sets how many repetitions the next [`get`](RequestSampler::get)
    /// performs. The sign is not validated: zero and negative counts are
    /// accepted and run no requests at all.
    pub fn set_request_count(&mut self, count: i32) {
        self.request_count = count;
    }

    /// Body of the last response.
    pub fn response_body(&self) -> &str {
        &self.body
    }

    /// Raw header block of the last response.
    pub fn response_headers(&self) -> &str {
        &self.response_headers
    }

    /// IP address of the last-used connection. Empty until a run has
    /// completed; kept at its previous value when the transport could not
    /// report an address.
    pub fn last_connection_ip(&self) -> &str {
        &self.ip
    }

    /// Message of the most recent failure. Only meaningful after a failed
    /// [`get`](RequestSampler::get) call.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Status code of the last response, 0 before any response was seen.
    pub fn response_code(&self) -> u16 {
        self.response_code
    }

    pub fn total_name_lookup_time(&self) -> f64 {
        self.totals.name_lookup
    }

    pub fn total_connect_time(&self) -> f64 {
        self.totals.connect
    }

    pub fn total_start_transfer_time(&self) -> f64 {
        self.totals.start_transfer
    }

    pub fn total_transfer_time(&self) -> f64 {
        self.totals.total
    }
}

impl<T: HttpTransport> RequestSampler<T> {
    /// Runs the configured number of GETs against `url`, sequentially and
    /// on one transport.
    ///
    /// The four timing sums are reset at the start of every call; they are
    /// never cumulative across calls. The first failing repetition aborts
    /// the run: the error is stored and returned, and the sums keep
    /// whatever the earlier successful repetitions accumulated.
    pub async fn get(&mut self, url: &Uri) -> Result<(), SamplerError> {
        self.totals.reset();
        let mut last_ip = None;
        for repetition in 0..self.request_count {
            log::debug!(
                "request {}/{} to {}",
                repetition + 1,
                self.request_count,
                url
            );
            match self.transport.get(url, &self.headers).await {
                Ok(attempt) => {
                    self.totals.add(&attempt.timing);
                    self.response_code = attempt.status;
                    self.body = attempt.body;
                    self.response_headers = attempt.headers;
                    if attempt.remote_ip.is_some() {
                        last_ip = attempt.remote_ip;
                    }
                }
                Err(err) => {
                    let err = SamplerError::from(err);
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            }
        }
        if let Some(ip) = last_ip {
            self.ip = ip;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use hyper::Uri;

    use super::RequestSampler;
    use crate::{HttpTransport, PhaseTimings, RequestAttempt, TransportError};

    #[derive(Default)]
    struct MockTransport {
        script: VecDeque<Result<RequestAttempt, TransportError>>,
        seen_headers: Vec<Vec<String>>,
    }

    impl MockTransport {
        fn scripted(script: Vec<Result<RequestAttempt, TransportError>>) -> Self {
            MockTransport {
                script: script.into(),
                seen_headers: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(
            &mut self,
            _url: &Uri,
            headers: &[String],
        ) -> Result<RequestAttempt, TransportError> {
            self.seen_headers.push(headers.to_vec());
            self.script.pop_front().expect("no scripted attempt left")
        }
    }

    fn attempt(name_lookup: f64, connect: f64, start_transfer: f64, total: f64) -> RequestAttempt {
        RequestAttempt {
            status: 200,
            remote_ip: Some("192.0.2.1".to_string()),
            body: "ok".to_string(),
            headers: "HTTP/1.1 200 OK\r\n\r\n".to_string(),
            timing: PhaseTimings {
                name_lookup,
                connect,
                start_transfer,
                total,
            },
        }
    }

    fn failure() -> TransportError {
        TransportError::NoAddress("unreachable.test".to_string())
    }

    fn url() -> Uri {
        Uri::from_static("http://example.test/")
    }

    #[tokio::test]
    async fn accumulates_sums_over_all_repetitions() {
        let transport = MockTransport::scripted(vec![
            Ok(attempt(0.01, 0.02, 0.03, 0.04)),
            Ok(attempt(0.02, 0.03, 0.04, 0.05)),
            Ok(attempt(0.03, 0.04, 0.05, 0.06)),
        ]);
        let mut sampler = RequestSampler::new(transport);
        sampler.set_request_count(3);
        sampler.get(&url()).await.unwrap();
        assert!((sampler.total_name_lookup_time() - 0.06).abs() < 1e-12);
        assert!((sampler.total_connect_time() - 0.09).abs() < 1e-12);
        assert!((sampler.total_start_transfer_time() - 0.12).abs() < 1e-12);
        assert!((sampler.total_transfer_time() - 0.15).abs() < 1e-12);
        assert_eq!(sampler.response_code(), 200);
        assert_eq!(sampler.last_connection_ip(), "192.0.2.1");
    }

    #[tokio::test]
    async fn zero_request_count_runs_no_requests() {
        let mut sampler = RequestSampler::new(MockTransport::default());
        sampler.set_request_count(0);
        sampler.get(&url()).await.unwrap();
        assert!(sampler.transport.seen_headers.is_empty());
        assert_eq!(sampler.total_transfer_time(), 0.0);
        assert_eq!(sampler.response_code(), 0);
        assert_eq!(sampler.last_connection_ip(), "");
    }

    #[tokio::test]
    async fn negative_request_count_runs_no_requests() {
        let mut sampler = RequestSampler::new(MockTransport::default());
        sampler.set_request_count(-3);
        sampler.get(&url()).await.unwrap();
        assert!(sampler.transport.seen_headers.is_empty());
    }

    #[tokio::test]
    async fn failure_aborts_run_and_keeps_partial_sums() {
        let transport = MockTransport::scripted(vec![
            Ok(attempt(0.01, 0.01, 0.01, 0.01)),
            Ok(attempt(0.02, 0.02, 0.02, 0.02)),
            Err(failure()),
        ]);
        let mut sampler = RequestSampler::new(transport);
        sampler.set_request_count(3);
        let err = sampler.get(&url()).await.unwrap_err();
        assert!(err.to_string().contains("unreachable.test"));
        assert_eq!(sampler.last_error(), Some(err.to_string().as_str()));
        // Sums from the two completed repetitions survive the abort.
        assert!((sampler.total_name_lookup_time() - 0.03).abs() < 1e-12);
        assert!((sampler.total_transfer_time() - 0.03).abs() < 1e-12);
    }

    #[tokio::test]
    async fn sums_reset_at_the_start_of_each_get() {
        let transport = MockTransport::scripted(vec![
            Ok(attempt(0.05, 0.05, 0.05, 0.05)),
            Ok(attempt(0.01, 0.01, 0.01, 0.01)),
        ]);
        let mut sampler = RequestSampler::new(transport);
        sampler.get(&url()).await.unwrap();
        assert!((sampler.total_name_lookup_time() - 0.05).abs() < 1e-12);
        sampler.get(&url()).await.unwrap();
        assert!((sampler.total_name_lookup_time() - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn headers_reach_the_transport_in_insertion_order() {
        let transport = MockTransport::scripted(vec![
            Ok(attempt(0.0, 0.0, 0.0, 0.0)),
            Ok(attempt(0.0, 0.0, 0.0, 0.0)),
        ]);
        let mut sampler = RequestSampler::new(transport);
        sampler.add_header("X-Test: 1");
        sampler.add_header("X-Other: a");
        sampler.add_header("X-Test: 2");
        sampler.set_request_count(2);
        sampler.get(&url()).await.unwrap();
        let expected = vec![
            "X-Test: 1".to_string(),
            "X-Other: a".to_string(),
            "X-Test: 2".to_string(),
        ];
        assert_eq!(sampler.transport.seen_headers, vec![expected.clone(), expected]);
    }

    #[tokio::test]
    async fn ip_is_kept_when_the_transport_cannot_report_one() {
        let mut without_ip = attempt(0.0, 0.0, 0.0, 0.0);
        without_ip.remote_ip = None;
        let transport = MockTransport::scripted(vec![
            Ok(attempt(0.0, 0.0, 0.0, 0.0)),
            Ok(without_ip),
        ]);
        let mut sampler = RequestSampler::new(transport);
        sampler.get(&url()).await.unwrap();
        assert_eq!(sampler.last_connection_ip(), "192.0.2.1");
        sampler.get(&url()).await.unwrap();
        assert_eq!(sampler.last_connection_ip(), "192.0.2.1");
    }

    #[tokio::test]
    async fn last_response_metadata_comes_from_the_final_repetition() {
        let mut second = attempt(0.0, 0.0, 0.0, 0.0);
        second.status = 404;
        second.body = "gone".to_string();
        second.headers = "HTTP/1.1 404 Not Found\r\n\r\n".to_string();
        let transport =
            MockTransport::scripted(vec![Ok(attempt(0.0, 0.0, 0.0, 0.0)), Ok(second)]);
        let mut sampler = RequestSampler::new(transport);
        sampler.set_request_count(2);
        sampler.get(&url()).await.unwrap();
        assert_eq!(sampler.response_code(), 404);
        assert_eq!(sampler.response_body(), "gone");
        assert!(sampler.response_headers().starts_with("HTTP/1.1 404"));
    }
}
