//! Client sessions against a reference server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use terrastream::{reference_server, ClientSession, StreamingConfig};
use terrastream_core::{ChunkCoord, StreamResult};
use terrastream_networking::{ClientTransport, LoopbackTransport, TcpClientTransport, TcpServer};
use terrastream_rendering::{FrameStats, HeadlessBackend, ProbeState};

fn small_world() -> StreamingConfig {
    StreamingConfig::from_toml_str(
        r#"
        [view]
        radius = 4

        [client]
        mesh_workers = 1

        [server]
        bind = "127.0.0.1:0"
        workers = 2
        ground_level = 40
        "#,
    )
    .expect("config")
}

/// Runs frames until `done` or a timeout; returns the last stats.
fn run_until<T, F>(session: &mut ClientSession<HeadlessBackend, T>, mut done: F) -> FrameStats
where
    T: ClientTransport,
    F: FnMut(&ClientSession<HeadlessBackend, T>, &FrameStats) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stats = session.frame().expect("frame");
        if done(session, &stats) {
            return stats;
        }
        assert!(Instant::now() < deadline, "timed out; last frame {stats:?}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_local_session_draws_ground() -> StreamResult<()> {
    let config = small_world();
    let server = reference_server(&config)?;
    let transport = LoopbackTransport::connect(&server);
    let mut session = ClientSession::start(&config, HeadlessBackend::new(), transport)?;

    let ground = ChunkCoord::new(0, 0, 2);
    session.move_viewer(ground)?;
    let stats = run_until(&mut session, |s, stats| s.is_connected() && stats.opaque_chunks > 0);
    assert!(stats.draw_calls >= stats.opaque_chunks);
    assert!(session.scene().has_meshes(ground));

    // Chunks above the terrain are air and never requested as surfaces.
    let sky = ChunkCoord::new(0, 0, 3);
    run_until(&mut session, |s, _| s.scene().probe_state(sky) == Some(ProbeState::Air));
    assert!(session.client().known_version(sky).is_none());
    assert_eq!(server.stats().jobs_dropped, 0);

    session.close();
    Ok(())
}

#[test]
fn test_walking_keeps_memory_bounded() -> StreamResult<()> {
    let mut config = small_world();
    config.cache.surface_capacity = 16;
    config.cache.light_capacity = 16;
    config.cache.prune_interval_ms = 5;
    let server = reference_server(&config)?;
    let mut session = ClientSession::start(&config, HeadlessBackend::new(), LoopbackTransport::connect(&server))?;

    let mut viewer = ChunkCoord::new(0, 0, 2);
    session.move_viewer(viewer)?;
    for _ in 0..6 {
        run_until(&mut session, |_, stats| stats.opaque_chunks > 0);
        viewer = viewer.offset(1, 0, 0);
        session.move_viewer(viewer)?;
    }
    session.scene().cache().cleanup();
    let cache = session.scene().cache().stats();
    assert!(cache.surfaces <= 16 && cache.lights <= 16, "{cache:?}");
    assert!(session.scene().is_in_view(viewer));
    assert!(!session.scene().is_in_view(ChunkCoord::new(0, 0, 2).offset(-1, 0, 0)));
    Ok(())
}

#[test]
fn test_tcp_session() -> StreamResult<()> {
    let config = small_world();
    let server = reference_server(&config)?;
    let mut listener = TcpServer::bind(config.server.bind.as_str(), Arc::clone(&server))?;
    let transport = TcpClientTransport::connect(listener.local_addr())?;
    let mut session = ClientSession::start(&config, HeadlessBackend::new(), transport)?;

    session.move_viewer(ChunkCoord::new(3, -2, 2))?;
    run_until(&mut session, |s, stats| s.is_connected() && stats.opaque_chunks > 0);
    assert!(session.transport_stats().bytes_received > 0);

    session.close();
    listener.shutdown();
    Ok(())
}

#[test]
fn test_walking_back_redraws_evicted_chunks() -> StreamResult<()> {
    let mut config = small_world();
    config.cache.surface_capacity = 4;
    config.cache.light_capacity = 4;
    let server = reference_server(&config)?;
    let mut session = ClientSession::start(&config, HeadlessBackend::new(), LoopbackTransport::connect(&server))?;

    let ground = ChunkCoord::new(0, 0, 2);
    session.move_viewer(ground)?;
    run_until(&mut session, |s, _| s.scene().has_meshes(ground));

    let away = ground.offset(20, 0, 0);
    session.move_viewer(away)?;
    let block: Vec<ChunkCoord> = (-1..=1)
        .flat_map(|dx| (-1..=1).flat_map(move |dy| (-1..=1).map(move |dz| away.offset(dx, dy, dz))))
        .collect();
    run_until(&mut session, |s, _| block.iter().all(|&pos| s.scene().has_meshes(pos)));
    assert!(!session.scene().is_in_view(ground));
    session.scene().cache().cleanup();
    assert!(!session.scene().cache().contains_pair(ground));

    // The scene finds nothing cached and has to ask the server again.
    session.move_viewer(ground)?;
    let stats = run_until(&mut session, |s, stats| s.scene().has_meshes(ground) && stats.opaque_chunks > 0);
    assert!(stats.draw_calls >= stats.opaque_chunks);
    session.close();
    Ok(())
}
