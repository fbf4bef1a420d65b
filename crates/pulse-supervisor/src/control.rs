//! OSC control input
//!
//! UDP listener translating control messages into command packets:
//! - `/mod/<module_id>/<param_name> <float>` → set-parameter
//! - `/gate/<module_id> <bool|int>` → gate (truthy is on)
//! - `/test` → a canned burst exercising the default patch
//!
//! Messages for unknown modules still enter the ring; the worker drops them
//! at decode. Malformed OSC is counted and ignored.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use rosc::{OscMessage, OscPacket, OscType};

use pulse_core::CommandPacket;

use crate::CommandBus;

/// Cold-path control-input counters
#[derive(Debug, Default)]
pub struct ControlStats {
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
}

/// OSC listener thread handle
pub struct ControlInput {
    stop: Arc<AtomicBool>,
    stats: Arc<ControlStats>,
    thread: Option<JoinHandle<()>>,
    local_addr: std::net::SocketAddr,
}

impl ControlInput {
    /// Bind `addr` and start the listener thread.
    pub fn start(addr: &str, bus: Arc<CommandBus>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let local_addr = socket.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ControlStats::default());

        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);
        let thread = std::thread::Builder::new()
            .name("pulse-osc".into())
            .spawn(move || {
                log::info!("OSC listening on {local_addr}");
                let mut buf = [0u8; rosc::decoder::MTU];
                while !thread_stop.load(Ordering::Acquire) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, _peer)) => {
                            match rosc::decoder::decode_udp(&buf[..len]) {
                                Ok((_, packet)) => {
                                    handle_packet(packet, &bus, &thread_stats);
                                }
                                Err(e) => {
                                    log::debug!("undecodable OSC datagram: {e}");
                                    thread_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            log::warn!("OSC socket error: {e}");
                            break;
                        }
                    }
                }
                log::info!("OSC listener stopped");
            })
            .expect("spawn OSC thread");

        Ok(Self {
            stop,
            stats,
            thread: Some(thread),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ControlStats {
        &self.stats
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ControlInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_packet(packet: OscPacket, bus: &CommandBus, stats: &ControlStats) {
    match packet {
        OscPacket::Message(message) => handle_message(message, bus, stats),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                handle_packet(inner, bus, stats);
            }
        }
    }
}

fn handle_message(message: OscMessage, bus: &CommandBus, stats: &ControlStats) {
    stats.messages_received.fetch_add(1, Ordering::Relaxed);

    let parts: Vec<&str> = message.addr.trim_matches('/').split('/').collect();
    let handled = match parts.as_slice() {
        ["mod", module, param] => float_arg(&message.args)
            .and_then(|value| CommandPacket::set_float(module, param, value).ok())
            .map(|packet| bus.send(&packet))
            .is_some(),
        ["gate", module] => truthy_arg(&message.args)
            .and_then(|on| CommandPacket::gate(module, on).ok())
            .map(|packet| bus.send(&packet))
            .is_some(),
        ["test"] => {
            // A canned burst that makes the default patch audible.
            for packet in [
                CommandPacket::set_float("osc", "freq", 440.0),
                CommandPacket::set_float("osc", "gain", 0.3),
                CommandPacket::gate("env", true),
            ]
            .into_iter()
            .flatten()
            {
                bus.send(&packet);
            }
            true
        }
        _ => false,
    };

    if !handled {
        log::debug!("ignored OSC message: {} {:?}", message.addr, message.args);
        stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

fn float_arg(args: &[OscType]) -> Option<f64> {
    match args.first()? {
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        _ => None,
    }
}

fn truthy_arg(args: &[OscType]) -> Option<bool> {
    match args.first()? {
        OscType::Bool(v) => Some(*v),
        OscType::Int(v) => Some(*v != 0),
        OscType::Long(v) => Some(*v != 0),
        OscType::Float(v) => Some(*v != 0.0),
        OscType::Double(v) => Some(*v != 0.0),
        _ => None,
    }
}
