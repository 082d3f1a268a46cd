use clap::Parser;
use hyper::Uri;

#[derive(Parser, Clone)]
#[command(version, about = "Samples HTTP GET latency and prints a one-line breakdown", long_about = None)]
pub struct Args {
    #[arg(short = 'u', long = "url", value_name = "url", value_parser = parse_target_url)]
    pub target_url: Uri,
    /// Number of requests to sample; the printed figures are the per-phase
    /// means over this many requests.
    #[arg(
        short = 'n',
        long = "requests",
        default_value_t = 1,
        allow_negative_numbers = true
    )]
    pub request_count: i32,
    /// Extra header line ("Name: Value"), may be given multiple times.
    #[arg(short = 'H', long = "header", value_name = "line")]
    pub headers: Vec<String>,
}

fn parse_target_url(s: &str) -> Result<Uri, String> {
    if s.is_empty() {
        return Err("URL must not be empty".to_string());
    }
    // A bare host is taken as plain HTTP, the way curl would.
    let normalized = if s.contains("://") {
        s.to_string()
    } else {
        format!("http://{s}")
    };
    normalized
        .parse::<Uri>()
        .map_err(|err| format!("{s}: {err}"))
}
