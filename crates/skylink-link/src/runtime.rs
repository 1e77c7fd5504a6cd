//! # Router Runtime
//!
//! Owns the `skylink-router` worker thread that drives a [`RouterState`].
//!
//! **Hot path** (outbound packets) uses a lock-free SPSC ring buffer (`rtrb`).
//! **Control path** (local control, forced profile, relay changes, shutdown)
//! uses a bounded crossbeam channel. Everything the router produces for local
//! consumers comes back on a bounded delivery channel.
//!
//! Dropping the runtime shuts the worker down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use quanta::Instant;
use skylink_wire::ipc::LocalControl;

use crate::adaptive::{OverwriteState, PeerReport, VideoProfile};
use crate::config::RouterConfig;
use crate::error::RelayConfigError;
use crate::radio::RadioPort;
use crate::relay::RelayParams;
use crate::router::{Delivery, RouterState, RouterStats};

const CONTROL_CAPACITY: usize = 64;
/// Packets handed to the router per send call.
const OUTBOUND_BATCH: usize = 64;
const MIN_IDLE_WAIT: Duration = Duration::from_micros(100);

/// Error returned when a packet cannot be queued for the worker.
#[derive(Debug, PartialEq, Eq)]
pub enum OutboundError {
    Full,
    Disconnected,
}

/// Sealed packet waiting for sequencing and transmission.
struct OutboundPacket {
    data: BytesMut,
}

enum ControlMessage {
    Local(LocalControl),
    ForceProfile(Option<VideoProfile>),
    RelayParams {
        params: RelayParams,
        reply: Sender<Result<(), RelayConfigError>>,
    },
    PeerReport(PeerReport),
    CommandSent(u32),
    KeyframeRequest(Option<u32>),
    Shutdown,
}

/// Thread-safe handle to the router worker.
pub struct RouterRuntime {
    packet_tx: rtrb::Producer<OutboundPacket>,
    control_tx: Sender<ControlMessage>,
    deliveries: Receiver<Delivery>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<RouterStats>>,
    snapshot: Arc<ArcSwap<OverwriteState>>,
    watchdog: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RouterRuntime {
    /// Spawn the worker over `ports`.
    pub fn start(config: RouterConfig, ports: Vec<Box<dyn RadioPort>>) -> anyhow::Result<Self> {
        let capacity = config.runtime.outbound_capacity.max(1);
        let (packet_tx, packet_rx) = rtrb::RingBuffer::new(capacity);
        let (control_tx, control_rx) = bounded(CONTROL_CAPACITY);
        let (delivery_tx, deliveries) = bounded(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(RouterStats::default()));
        let watchdog = Arc::new(AtomicU64::new(0));

        let started = Instant::now();
        let state = RouterState::new(&config, ports, started);
        let snapshot = state.snapshot_handle();

        let worker = Worker {
            state,
            packet_rx,
            control_rx,
            delivery_tx,
            stats: stats.clone(),
            shutdown: shutdown.clone(),
            watchdog: watchdog.clone(),
            started,
            loop_wait: config.runtime.loop_wait.max(MIN_IDLE_WAIT),
            stats_interval: config.runtime.stats_interval,
            deliveries_dropped: 0,
        };
        let handle = thread::Builder::new()
            .name("skylink-router".into())
            .spawn(move || worker.run())?;

        tracing::info!(vehicle_id = config.pairing.local_vehicle_id, "router runtime started");
        Ok(Self {
            packet_tx,
            control_tx,
            deliveries,
            shutdown,
            stats,
            snapshot,
            watchdog,
            handle: Some(handle),
        })
    }

    /// Queue a sealed packet. Returns immediately.
    pub fn try_send_packet(&mut self, data: BytesMut) -> Result<(), OutboundError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(OutboundError::Disconnected);
        }
        self.packet_tx
            .push(OutboundPacket { data })
            .map_err(|_| OutboundError::Full)
    }

    pub fn local_control(&self, msg: LocalControl) -> anyhow::Result<()> {
        self.control(ControlMessage::Local(msg))
    }

    pub fn force_profile(&self, profile: Option<VideoProfile>) -> anyhow::Result<()> {
        self.control(ControlMessage::ForceProfile(profile))
    }

    pub fn peer_report(&self, report: PeerReport) -> anyhow::Result<()> {
        self.control(ControlMessage::PeerReport(report))
    }

    pub fn note_command_sent(&self, counter: u32) -> anyhow::Result<()> {
        self.control(ControlMessage::CommandSent(counter))
    }

    pub fn request_keyframe_interval(&self, interval_ms: Option<u32>) -> anyhow::Result<()> {
        self.control(ControlMessage::KeyframeRequest(interval_ms))
    }

    /// Apply relay parameters and wait for the worker's verdict.
    pub fn set_relay_params(&self, params: RelayParams) -> anyhow::Result<()> {
        let (reply, verdict) = bounded(1);
        self.control(ControlMessage::RelayParams { params, reply })?;
        verdict
            .recv()
            .map_err(|e| anyhow::anyhow!("router worker gone: {}", e))??;
        Ok(())
    }

    fn control(&self, msg: ControlMessage) -> anyhow::Result<()> {
        self.control_tx
            .send(msg)
            .map_err(|e| anyhow::anyhow!("Failed to reach router worker: {}", e))
    }

    /// Receiving end for everything the router delivers locally.
    pub fn deliveries(&self) -> &Receiver<Delivery> {
        &self.deliveries
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<RouterStats>> {
        self.stats.clone()
    }

    /// Latest adaptive overwrite state.
    pub fn overwrite_state(&self) -> Arc<OverwriteState> {
        self.snapshot.load_full()
    }

    /// Milliseconds since start at the worker's last loop iteration.
    pub fn last_active_ms(&self) -> u64 {
        self.watchdog.load(Ordering::Relaxed)
    }

    /// Gracefully shuts down the worker thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control_tx.try_send(ControlMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("router runtime stopped");
        }
    }
}

impl Drop for RouterRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    state: RouterState,
    packet_rx: rtrb::Consumer<OutboundPacket>,
    control_rx: Receiver<ControlMessage>,
    delivery_tx: Sender<Delivery>,
    stats: Arc<Mutex<RouterStats>>,
    shutdown: Arc<AtomicBool>,
    watchdog: Arc<AtomicU64>,
    started: Instant,
    loop_wait: Duration,
    stats_interval: Duration,
    deliveries_dropped: u64,
}

impl Worker {
    fn run(mut self) {
        let mut last_stats = self.started;
        let mut idle_wait = MIN_IDLE_WAIT;

        loop {
            let now = Instant::now();
            self.watchdog.store(
                now.saturating_duration_since(self.started).as_millis() as u64,
                Ordering::Relaxed,
            );

            let sent = self.drain_outbound(now);
            let received = self.state.poll_ports(now);
            let busy = sent > 0 || !received.is_empty();
            self.deliver(received);
            let ticked = self.state.tick(now);
            self.deliver(ticked);

            if now.saturating_duration_since(last_stats) >= self.stats_interval {
                if let Ok(mut s) = self.stats.lock() {
                    *s = self.state.stats();
                }
                last_stats = now;
            }

            // Bounded wait: short while traffic flows, backing off to
            // `loop_wait` when idle.
            idle_wait = if busy {
                MIN_IDLE_WAIT
            } else {
                (idle_wait * 2).min(self.loop_wait)
            };
            let msg = if self.packet_rx.slots() > 0 {
                self.control_rx.try_recv().map_err(|_| RecvTimeoutError::Timeout)
            } else {
                self.control_rx.recv_timeout(idle_wait)
            };
            match msg {
                Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(msg) => {
                    idle_wait = MIN_IDLE_WAIT;
                    self.handle_control(msg, Instant::now());
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
        }
        if let Ok(mut s) = self.stats.lock() {
            *s = self.state.stats();
        }
    }

    fn drain_outbound(&mut self, now: Instant) -> usize {
        let mut total = 0;
        loop {
            let mut batch = Vec::with_capacity(OUTBOUND_BATCH);
            while batch.len() < OUTBOUND_BATCH {
                match self.packet_rx.pop() {
                    Ok(p) => batch.push(p.data),
                    Err(_) => break,
                }
            }
            if batch.is_empty() {
                return total;
            }
            total += batch.len();
            self.state.send(batch, now);
        }
    }

    fn handle_control(&mut self, msg: ControlMessage, now: Instant) {
        let out = match msg {
            ControlMessage::Local(local) => self.state.handle_local_control(local, now),
            ControlMessage::ForceProfile(profile) => self.state.force_profile(profile, now),
            ControlMessage::RelayParams { params, reply } => {
                let result = self.state.apply_relay_params(params);
                let (out, verdict) = match result {
                    Ok(out) => (out, Ok(())),
                    Err(e) => (Vec::new(), Err(e)),
                };
                let _ = reply.send(verdict);
                out
            }
            ControlMessage::PeerReport(report) => {
                self.state.record_peer_report(report, now);
                Vec::new()
            }
            ControlMessage::CommandSent(counter) => {
                self.state.note_command_sent(counter, now);
                Vec::new()
            }
            ControlMessage::KeyframeRequest(ms) => {
                self.state.request_keyframe_interval(ms);
                Vec::new()
            }
            ControlMessage::Shutdown => Vec::new(),
        };
        self.deliver(out);
    }

    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for d in deliveries {
            match self.delivery_tx.try_send(d) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.deliveries_dropped += 1;
                    if self.deliveries_dropped.is_power_of_two() {
                        tracing::warn!(dropped = self.deliveries_dropped, "delivery channel full");
                    }
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}
