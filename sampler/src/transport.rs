use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use hyper::body::HttpBody;
use hyper::client::conn::{self, SendRequest};
use hyper::header::{HeaderName, HeaderValue, HOST, LOCATION, USER_AGENT};
use hyper::{Body, Request, Response, StatusCode, Uri};
use tokio::net::{lookup_host, TcpStream};

use crate::{HttpTransport, PhaseTimings, RequestAttempt, SamplerError, TransportError};

const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Value sent in the User-Agent header of every request.
    pub user_agent: String,
    /// Upper bound on redirects followed within one attempt.
    pub max_redirects: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        TransportOptions {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// [`HttpTransport`] over hyper's connection-level client.
///
/// The high-level `hyper::Client` hides when a name is resolved and when a
/// socket is connected; driving the connection by hand is what makes the
/// per-phase milestones observable. One connection is cached between calls
/// and reused while the peer keeps it open, so repetitions against the
/// same host behave like a keep-alive session.
pub struct HyperTransport {
    user_agent: HeaderValue,
    max_redirects: usize,
    pooled: Option<PooledConnection>,
}

struct PooledConnection {
    authority: (String, u16),
    sender: SendRequest<Body>,
    remote: SocketAddr,
}

impl HyperTransport {
    pub fn new(options: TransportOptions) -> Result<Self, SamplerError> {
        let user_agent = HeaderValue::from_str(&options.user_agent).map_err(|err| {
            SamplerError::Init(format!(
                "invalid user agent {:?}: {err}",
                options.user_agent
            ))
        })?;
        Ok(HyperTransport {
            user_agent,
            max_redirects: options.max_redirects,
            pooled: None,
        })
    }

    /// Returns a usable connection to `host:port`, reusing the cached one
    /// when it matches and is still alive. Records the name-lookup and
    /// connect milestones against `started`.
    async fn checkout(
        &mut self,
        host: &str,
        port: u16,
        started: Instant,
        timing: &mut PhaseTimings,
    ) -> Result<PooledConnection, TransportError> {
        if let Some(mut pooled) = self.pooled.take() {
            if pooled.authority == (host.to_string(), port) && std::future::poll_fn(|cx| pooled.sender.poll_ready(cx))
                    .await
                    .is_ok()
            {
                log::debug!("reusing connection to {}", pooled.remote);
                timing.name_lookup = started.elapsed().as_secs_f64();
                timing.connect = started.elapsed().as_secs_f64();
                return Ok(pooled);
            }
        }
        let addr = lookup_host((host, port))
            .await
            .map_err(|source| TransportError::NameLookup {
                host: host.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::NoAddress(host.to_string()))?;
        timing.name_lookup = started.elapsed().as_secs_f64();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        timing.connect = started.elapsed().as_secs_f64();
        log::debug!("connected to {addr}");
        let (sender, connection) = conn::handshake(stream).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("connection terminated: {err}");
            }
        });
        Ok(PooledConnection {
            authority: (host.to_string(), port),
            sender,
            remote: addr,
        })
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn get(
        &mut self,
        url: &Uri,
        headers: &[String],
    ) -> Result<RequestAttempt, TransportError> {
        let header_list = headers
            .iter()
            .map(|line| parse_header_line(line))
            .collect::<Result<Vec<_>, _>>()?;
        let started = Instant::now();
        let mut timing = PhaseTimings::default();
        let mut target = url.clone();
        let mut redirects = 0;
        loop {
            match target.scheme_str() {
                Some("http") | None => {}
                Some(other) => {
                    return Err(TransportError::UnsupportedScheme(other.to_string()))
                }
            }
            let host = target
                .host()
                .ok_or_else(|| TransportError::MissingHost(target.to_string()))?
                .to_string();
            let port = target.port_u16().unwrap_or(80);
            let mut pooled = self.checkout(&host, port, started, &mut timing).await?;
            let request = build_request(&target, &self.user_agent, &header_list)?;
            let response = pooled.sender.send_request(request).await?;
            timing.start_transfer = started.elapsed().as_secs_f64();
            if let Some(location) = redirect_target(&response) {
                if redirects >= self.max_redirects {
                    return Err(TransportError::TooManyRedirects(self.max_redirects));
                }
                redirects += 1;
                let next = resolve_location(&target, &location)?;
                log::debug!("following redirect to {next}");
                drain_body(response).await?;
                self.pooled = Some(pooled);
                target = next;
                continue;
            }
            let (parts, mut body) = response.into_parts();
            let mut buffer = String::new();
            while let Some(chunk) = body.data().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
            timing.total = started.elapsed().as_secs_f64();
            let remote = pooled.remote;
            self.pooled = Some(pooled);
            return Ok(RequestAttempt {
                status: parts.status.as_u16(),
                remote_ip: Some(remote.ip().to_string()),
                body: buffer,
                headers: render_headers(&parts),
                timing,
            });
        }
    }
}

/// Splits a raw "Name: Value" line at the first colon. Both sides are
/// trimmed; anything hyper rejects fails the whole attempt.
fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let invalid = || TransportError::InvalidHeader(line.to_string());
    let (name, value) = line.split_once(':').ok_or_else(invalid)?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((name, value))
}

fn build_request(
    target: &Uri,
    user_agent: &HeaderValue,
    extra: &[(HeaderName, HeaderValue)],
) -> Result<Request<Body>, TransportError> {
    let host = target.host().unwrap_or_default();
    let host_value = match target.port_u16() {
        Some(port) if port != 80 => format!("{host}:{port}"),
        _ => host.to_string(),
    };
    let path = target
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let mut request = Request::get(path)
        .header(
            HOST,
            HeaderValue::from_str(&host_value)
                .map_err(|_| TransportError::MissingHost(target.to_string()))?,
        )
        .header(USER_AGENT, user_agent.clone())
        .body(Body::empty())?;
    // The first extra line naming a default header replaces it; repeated
    // lines for the same name stay duplicates in the order given.
    let mut seen = HashSet::new();
    for (name, value) in extra {
        if seen.insert(name.clone()) && request.headers().contains_key(name) {
            request.headers_mut().insert(name.clone(), value.clone());
        } else {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }
    Ok(request)
}

fn redirect_target(response: &Response<Body>) -> Option<String> {
    match response.status() {
        StatusCode::MOVED_PERMANENTLY
        | StatusCode::FOUND
        | StatusCode::SEE_OTHER
        | StatusCode::TEMPORARY_REDIRECT
        | StatusCode::PERMANENT_REDIRECT => response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        _ => None,
    }
}

fn resolve_location(base: &Uri, location: &str) -> Result<Uri, TransportError> {
    let invalid = || TransportError::InvalidRedirect(location.to_string());
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.parse().map_err(|_| invalid());
    }
    let path_and_query = if location.starts_with('/') {
        location.to_string()
    } else {
        let base_path = base.path();
        let dir = match base_path.rfind('/') {
            Some(i) => &base_path[..=i],
            None => "/",
        };
        format!("{dir}{location}")
    };
    let mut builder = Uri::builder().path_and_query(path_and_query.as_str());
    if let Some(scheme) = base.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = base.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build().map_err(|_| invalid())
}

/// Reads a response to the end without keeping the bytes, so the
/// connection becomes reusable again.
async fn drain_body(response: Response<Body>) -> Result<(), TransportError> {
    let mut body = response.into_body();
    while let Some(chunk) = body.data().await {
        chunk?;
    }
    Ok(())
}

fn render_headers(parts: &hyper::http::response::Parts) -> String {
    let mut raw = format!("{:?} {}\r\n", parts.version, parts.status);
    for (name, value) in &parts.headers {
        raw.push_str(name.as_str());
        raw.push_str(": ");
        raw.push_str(&String::from_utf8_lossy(value.as_bytes()));
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");
    raw
}
