//! Thin CLI orchestrator: wires the ring-buffer engine, the ALSA driver
//! back-end, the MIDI device layer, and the mDNS/control-surface session
//! into one running process.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rt_audio_core::audio::backend::Direction;
use rt_audio_core::audio::{AudioPacket, DriverRegistry, RingBufferEngine};
use rt_audio_core::config::RtConfig;
use rt_audio_core::error::Result;
use rt_audio_core::midi::MidiDevice;
use rt_audio_core::surface::{ControlSurfaceSession, MdnsResponder, ServiceDescriptor};

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Register the platform's native device back-end. ALSA is unix-only; on
/// other targets the registry carries no hardware driver and the ring
/// buffer runs headless.
#[cfg(unix)]
fn register_hardware_driver(registry: &mut DriverRegistry, cfg: &rt_audio_core::config::AlsaConfig) {
    match rt_audio_core::audio::AlsaBackend::enumerate(cfg.periods_per_buffer, cfg.poll_timeout_ms) {
        Ok(backend) => {
            let (begin, end) = registry.register_driver(Arc::new(backend));
            tracing::info!(begin, end, "registered ALSA driver");
        }
        Err(e) => tracing::warn!(error = %e, "ALSA enumeration failed, running without a hardware driver"),
    }
}

#[cfg(not(unix))]
fn register_hardware_driver(_registry: &mut DriverRegistry, _cfg: &rt_audio_core::config::AlsaConfig) {
    tracing::warn!("no hardware driver back-end available on this platform");
}

/// Set up the first registered device on the ring-buffer engine and start
/// it, feeding captured packets straight into the input side of the ring.
/// Logged and skipped on failure rather than aborting startup — the
/// mDNS/control-surface side of the process is useful without audio too.
fn start_first_device(registry: &DriverRegistry, engine: &Arc<RingBufferEngine>) {
    if registry.total_device_count() == 0 {
        return;
    }
    let dev_idx = 0usize;
    let label = registry.device_label(dev_idx).unwrap_or_else(|_| "<unknown>".to_string());
    let sample_rate = match registry.sample_rate(dev_idx) {
        Ok(sr) => sr,
        Err(e) => {
            tracing::warn!(error = %e, "could not query sample rate, skipping device");
            return;
        }
    };
    let in_ch = registry.channel_count(dev_idx, Direction::Input).unwrap_or(0);
    let out_ch = registry.channel_count(dev_idx, Direction::Output).unwrap_or(0);
    let in_fpc = registry.frames_per_cycle(dev_idx, Direction::Input).unwrap_or(256);
    let out_fpc = registry.frames_per_cycle(dev_idx, Direction::Output).unwrap_or(256);
    let dsp_frame_count = in_fpc.max(out_fpc).max(1);

    if let Err(e) = engine.setup(dev_idx, sample_rate, dsp_frame_count, 4, in_ch as usize, in_fpc, out_ch as usize, out_fpc) {
        tracing::warn!(error = %e, device = label, "ring buffer setup failed");
        return;
    }

    let engine_for_cb = engine.clone();
    let callback: rt_audio_core::audio::backend::DriverCallback = Arc::new(move |packet: &mut AudioPacket<'_>| {
        let dev_idx = packet.device_idx as usize;
        let packets = [AudioPacket::new(
            packet.device_idx,
            packet.begin_channel,
            packet.channel_count,
            packet.frame_count,
            packet.bytes,
            packet.timestamp,
        )];
        let _ = engine_for_cb.update_input(dev_idx, &packets);
    });

    if let Err(e) = registry.setup(dev_idx, sample_rate, dsp_frame_count, callback) {
        tracing::warn!(error = %e, device = label, "driver setup failed");
        return;
    }
    if let Err(e) = registry.start(dev_idx) {
        tracing::warn!(error = %e, device = label, "driver start failed");
        return;
    }
    tracing::info!(device = label, sample_rate, in_ch, out_ch, "audio device started");
}

fn open_midi() -> Option<MidiDevice> {
    match MidiDevice::open("rt-audio-core", 256) {
        Ok(device) => {
            tracing::info!(name = device.name(), in_ports = device.input_port_count(), "MIDI device opened");
            Some(device)
        }
        Err(e) => {
            tracing::warn!(error = %e, "no MIDI device available");
            None
        }
    }
}

fn start_mdns(cfg: &rt_audio_core::config::MdnsConfig) -> Option<Arc<MdnsResponder>> {
    let descriptor = ServiceDescriptor {
        instance_name: cfg.service_name.clone(),
        service_type: cfg.service_type.clone(),
        domain: cfg.domain.clone(),
        host_name: hostname_or_default(),
        port: cfg.port,
        txt_fields: Vec::new(),
    };
    match MdnsResponder::create(descriptor) {
        Ok(responder) => {
            let responder = Arc::new(responder);
            if let Err(e) = responder.announce() {
                tracing::warn!(error = %e, "initial mDNS announce failed");
            }
            Some(responder)
        }
        Err(e) => {
            tracing::warn!(error = %e, "mDNS responder unavailable");
            None
        }
    }
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "rt-audio-core".to_string())
}

/// Accept at most one control-surface peer at a time and drive its
/// handshake/heartbeat state machine, per the single-connected-peer
/// invariant the listener (not the session) is responsible for enforcing.
fn run_control_surface_loop(cfg: rt_audio_core::config::ControlSurfaceConfig) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, cfg.tcp_port))?;
    listener.set_nonblocking(true)?;
    tracing::info!(port = cfg.tcp_port, "control surface listening");

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "control surface peer connected");
                let inet = match peer.ip() {
                    std::net::IpAddr::V4(v4) => v4,
                    std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };
                let mut session = ControlSurfaceSession::new([0u8; 6], inet, cfg.channel_count, 500);
                if let Err(e) = drive_session(stream, &mut session) {
                    tracing::warn!(error = %e, "control surface session ended");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn drive_session(mut stream: std::net::TcpStream, session: &mut ControlSurfaceSession) -> Result<()> {
    use std::io::{Read, Write};
    stream.set_nonblocking(true)?;
    let mut last_tick = Instant::now();
    let mut buf = [0u8; 256];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                if let Some(reply) = session.receive(&buf[..n])? {
                    stream.write_all(&reply)?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        let now = Instant::now();
        let dt = now.duration_since(last_tick);
        last_tick = now;
        if let rt_audio_core::surface::TickOutcome::Send(bytes) = session.tick(dt) {
            stream.write_all(&bytes)?;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let config = RtConfig::load_default()?;
    tracing::info!("rt-audio-core starting up");

    let mut registry = DriverRegistry::new();
    register_hardware_driver(&mut registry, &config.alsa);

    let engine = Arc::new(RingBufferEngine::create(
        config.ring_buffer.device_count.max(registry.total_device_count()).max(1),
        config.ring_buffer.meter_window_ms,
    ));
    start_first_device(&registry, &engine);

    let _midi = open_midi();
    let _responder = start_mdns(&config.mdns);

    run_control_surface_loop(config.control_surface)?;
    Ok(())
}
