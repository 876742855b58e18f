//! # TERRASTREAM Client
//!
//! Headless client: walks the viewer along +x and prints frame statistics.
//!
//! ```bash
//! terrastream_client [config.toml] [--local] [--frames N]
//! ```
//!
//! `--local` starts an in-process server and talks to it over the loopback
//! transport; otherwise the client connects to `server.bind` over TCP.

use std::process::ExitCode;
use std::time::Duration;

use terrastream::{init_logging, reference_server, ClientSession, StreamingConfig};
use terrastream_core::{ChunkCoord, StreamResult, CHUNK_SIZE};
use terrastream_networking::{ClientTransport, LoopbackTransport, TcpClientTransport};
use terrastream_rendering::HeadlessBackend;

const FRAME_TIME: Duration = Duration::from_millis(16);
const FRAMES_PER_STEP: u64 = 30;
const FRAMES_PER_REPORT: u64 = 60;

struct Args {
    config: Option<String>,
    local: bool,
    frames: u64,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        local: false,
        frames: 600,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--local" => args.local = true,
            "--frames" => {
                let value = iter.next().ok_or("--frames needs a value")?;
                args.frames = value.parse().map_err(|e| format!("--frames {value}: {e}"))?;
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path => args.config = Some(path.to_owned()),
        }
    }
    Ok(args)
}

#[allow(clippy::cast_possible_wrap)]
fn walk<T: ClientTransport>(config: &StreamingConfig, transport: T, frames: u64) -> StreamResult<()> {
    let mut session = ClientSession::start(config, HeadlessBackend::new(), transport)?;
    let ground = ChunkCoord::from_voxel(0, 0, config.server.ground_level);
    let mut viewer = ground;
    session.move_viewer(viewer)?;

    for frame in 1..=frames {
        if frame % FRAMES_PER_STEP == 0 {
            viewer = viewer.offset(1, 0, 0);
            session.move_viewer(viewer)?;
        }
        let stats = session.frame()?;
        if frame % FRAMES_PER_REPORT == 0 {
            let cache = session.scene().cache().stats();
            let transport = session.transport_stats();
            println!(
                "frame {frame:5} | viewer {viewer} | draws {:3} (opaque {}, transparent {}) | tracked {} | pending meshes {} | probes visible {} | cache {} surfaces | rx {} KiB",
                stats.draw_calls,
                stats.opaque_chunks,
                stats.transparent_chunks,
                stats.tracked_chunks,
                stats.pending_meshes,
                stats.occlusion.visible,
                cache.surfaces,
                transport.bytes_received / 1024,
            );
        }
        std::thread::sleep(FRAME_TIME);
    }

    log::info!(
        "Walked {} chunks in {} frames ({} voxels)",
        viewer.x - ground.x,
        session.frames(),
        (viewer.x - ground.x) * CHUNK_SIZE as i32
    );
    session.close();
    Ok(())
}

fn run(args: &Args) -> StreamResult<()> {
    let config = match &args.config {
        Some(path) => StreamingConfig::load(path)?,
        None => StreamingConfig::default(),
    };
    if args.local {
        let server = reference_server(&config)?;
        let transport = LoopbackTransport::connect(&server);
        walk(&config, transport, args.frames)?;
        server.shutdown();
        Ok(())
    } else {
        let transport = TcpClientTransport::connect(config.server.bind.as_str())?;
        walk(&config, transport, args.frames)
    }
}

fn main() -> ExitCode {
    init_logging();
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: terrastream_client [config.toml] [--local] [--frames N]");
            return ExitCode::from(2);
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Client failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
