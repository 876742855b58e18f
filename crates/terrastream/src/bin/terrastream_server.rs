//! # TERRASTREAM Server
//!
//! Headless TCP server over the flat reference terrain.
//!
//! ```bash
//! terrastream_server [config.toml] [--duration-secs N]
//! RUST_LOG=debug terrastream_server terrastream.toml
//! ```

use std::process::ExitCode;
use std::time::{Duration, Instant};

use terrastream::{init_logging, reference_server, StreamingConfig};
use terrastream_core::StreamResult;
use terrastream_networking::TcpServer;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
    config: Option<String>,
    duration: Option<Duration>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        duration: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--duration-secs" => {
                let value = iter.next().ok_or("--duration-secs needs a value")?;
                let secs: u64 = value.parse().map_err(|e| format!("--duration-secs {value}: {e}"))?;
                args.duration = Some(Duration::from_secs(secs));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path => args.config = Some(path.to_owned()),
        }
    }
    Ok(args)
}

fn run(args: &Args) -> StreamResult<()> {
    let config = match &args.config {
        Some(path) => StreamingConfig::load(path)?,
        None => StreamingConfig::default(),
    };
    let server = reference_server(&config)?;
    let mut listener = TcpServer::bind(config.server.bind.as_str(), std::sync::Arc::clone(&server))?;
    log::info!("TERRASTREAM server listening on {}", listener.local_addr());

    let started = Instant::now();
    loop {
        std::thread::sleep(STATS_INTERVAL);
        if let Err(e) = server.maintain() {
            log::warn!("World maintenance failed: {}", e);
        }
        let stats = server.stats();
        log::info!(
            "clients {} | jobs queued {} active {} done {} dropped {} | sent {} surfaces {} heights | skipped {} | chunks {} surfaces {}",
            stats.connections,
            stats.queued_jobs,
            stats.active_jobs,
            stats.jobs_completed,
            stats.jobs_dropped,
            stats.surfaces_sent,
            stats.heights_sent,
            stats.requests_skipped,
            stats.loaded_chunks,
            stats.cached_surfaces
        );
        if args.duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
    }

    listener.shutdown();
    server.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: terrastream_server [config.toml] [--duration-secs N]");
            return ExitCode::from(2);
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
