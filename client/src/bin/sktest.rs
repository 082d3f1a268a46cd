use clap::Parser;

use client::args::Args;
use client::report::StatusLine;
use sampler::{HyperTransport, RequestSampler, TransportOptions};

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let transport = match HyperTransport::new(TransportOptions::default()) {
        Ok(transport) => transport,
        Err(err) => {
            // Initialization failure is reported but, as in the historical
            // tool, does not change the exit code.
            eprintln!("{err}");
            return;
        }
    };

    let mut sampler = RequestSampler::new(transport);
    for line in &args.headers {
        log::debug!("extra header: {line}");
        sampler.add_header(line.clone());
    }
    sampler.set_request_count(args.request_count);

    match sampler.get(&args.target_url).await {
        Ok(()) => {
            println!("{}", StatusLine::from_sampler(&sampler, args.request_count));
        }
        Err(_) => {
            // Both lines go to stdout and the process still exits 0; the
            // historical consumers of this output depend on that.
            println!("Test aborted!");
            println!("{}", sampler.last_error().unwrap_or_default());
        }
    }
}
