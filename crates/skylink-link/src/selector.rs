//! # Radio Link Selector (TX)
//!
//! Decides which interfaces carry an outgoing frame and at what data rate.
//!
//! ## Eligibility
//!
//! A link is skipped when it is disabled, cannot transmit, lacks the video or
//! data capability the frame needs, or is reserved for relaying and the frame
//! is not ping-only. A ping reply goes out only on the link the ping arrived
//! on. Serial interfaces never carry video or retransmissions and get the
//! frame in short form.
//!
//! ## Rate smoothing
//!
//! Per interface and frame class, a lower rate is held back for a grace window
//! before it takes effect; a higher rate applies at once.

use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use serde::Serialize;
use skylink_wire::stats::{InterfaceTxStats, StreamCounters};
use skylink_wire::wire::{packet_type, stream_slot, ChainIter, PingReply, MAX_RADIO_STREAMS};

use crate::error::SelectError;
use crate::radio::{DataRate, RadioTopology};

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// How long a rate decrease is held at the previous rate.
    pub rate_decrease_hold: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            rate_decrease_hold: Duration::from_millis(200),
        }
    }
}

// ─── Frame Summary ──────────────────────────────────────────────────────────

/// What the selector needs to know about a chained frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub is_video: bool,
    pub retransmitted: bool,
    /// Every packet in the frame is a ping or ping reply.
    pub only_ping: bool,
    /// Link a contained ping reply must go back on.
    pub ping_reply_link: Option<usize>,
    pub bytes_per_stream: [u64; MAX_RADIO_STREAMS],
    pub packets_per_stream: [u32; MAX_RADIO_STREAMS],
}

impl FrameSummary {
    /// Walk the chained packets of `frame`. Structurally broken tails are
    /// ignored; the frame was built locally.
    pub fn inspect(frame: &Bytes) -> Self {
        let mut summary = FrameSummary {
            only_ping: true,
            ..Default::default()
        };
        let mut any = false;
        for item in ChainIter::new(frame.clone()) {
            let Ok(item) = item else { break };
            any = true;
            let h = &item.packet.header;
            if h.is_video_stream() {
                summary.is_video = true;
            }
            if h.retransmitted {
                summary.retransmitted = true;
            }
            if !packet_type::is_ping(h.packet_type) {
                summary.only_ping = false;
            }
            if h.packet_type == packet_type::PING_CLOCK_REPLY {
                let mut body = item.packet.payload();
                if let Some(reply) = PingReply::decode(&mut body) {
                    summary.ping_reply_link = Some(reply.radio_link_id as usize);
                }
            }
            let s = stream_slot(h.stream_id);
            summary.bytes_per_stream[s] += item.packet.raw.len() as u64;
            summary.packets_per_stream[s] += 1;
        }
        summary.only_ping &= any;
        summary
    }
}

// ─── Selection ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTarget {
    pub interface: usize,
    pub link: usize,
    pub rate: DataRate,
    /// Send as short packets (serial radio).
    pub short_form: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct RateMemory {
    last: DataRate,
    /// When a pending decrease was first requested.
    decrease_since: Option<Instant>,
}

impl RateMemory {
    fn smooth(&mut self, wanted: DataRate, hold: Duration, now: Instant) -> DataRate {
        if !self.last.is_set() || wanted.effective_bps() >= self.last.effective_bps() {
            self.last = wanted;
            self.decrease_since = None;
            return wanted;
        }
        let since = *self.decrease_since.get_or_insert(now);
        if now.saturating_duration_since(since) < hold {
            return self.last;
        }
        self.last = wanted;
        self.decrease_since = None;
        wanted
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectorStats {
    pub interfaces: Vec<InterfaceTxStats>,
    pub links: Vec<StreamCounters>,
    pub streams: [StreamCounters; MAX_RADIO_STREAMS],
    pub dropped_no_target: u64,
}

pub struct LinkSelector {
    config: SelectorConfig,
    /// `[video, data]` rate memory per interface.
    rates: Vec<[RateMemory; 2]>,
    stats: SelectorStats,
}

impl LinkSelector {
    pub fn new(config: SelectorConfig, topology: &RadioTopology) -> Self {
        let mut selector = LinkSelector {
            config,
            rates: Vec::new(),
            stats: SelectorStats::default(),
        };
        selector.resize(topology);
        selector
    }

    /// Track a topology whose interface or link count changed.
    pub fn resize(&mut self, topology: &RadioTopology) {
        let n = topology.interfaces.len();
        self.rates.resize(n, [RateMemory::default(); 2]);
        self.stats.interfaces.resize(n, InterfaceTxStats::default());
        let links = topology.links.iter().map(|l| l.id + 1).max().unwrap_or(0);
        self.stats.links.resize(links, StreamCounters::default());
    }

    pub fn stats(&self) -> &SelectorStats {
        &self.stats
    }

    /// Pick targets for `frame`.
    ///
    /// `adaptive_video_rate` is the rate published by the adaptive controller
    /// for video frames (if it has one).
    pub fn select_targets(
        &mut self,
        topology: &RadioTopology,
        frame: &FrameSummary,
        adaptive_video_rate: Option<DataRate>,
        now: Instant,
    ) -> Result<Vec<TxTarget>, SelectError> {
        if self.rates.len() < topology.interfaces.len() {
            self.resize(topology);
        }
        let mut targets = Vec::new();

        for link in &topology.links {
            let caps = link.caps;
            if caps.is_disabled() || !caps.can_transmit() {
                continue;
            }
            if frame.is_video && !caps.can_transmit_video() {
                continue;
            }
            if !frame.is_video && !caps.can_transmit_data() {
                continue;
            }
            if caps.is_relay_only() && !frame.only_ping {
                continue;
            }
            if let Some(pinned) = frame.ping_reply_link {
                if pinned != link.id {
                    continue;
                }
            }

            for &idx in &link.interfaces {
                let Some(iface) = topology.interface(idx) else {
                    continue;
                };
                if !iface.caps.can_transmit() {
                    continue;
                }
                let serial = iface.caps.is_serial();
                if serial && (frame.is_video || frame.retransmitted) {
                    continue;
                }

                let (wanted, class) = if serial {
                    (iface.current_rate, 1)
                } else if frame.is_video {
                    let rate = iface
                        .manual_video_rate
                        .or(adaptive_video_rate)
                        .unwrap_or(link.video_rate);
                    (rate, 0)
                } else {
                    (link.data_frame_rate(adaptive_video_rate), 1)
                };

                // Retransmitted video goes out at the current rate without
                // touching the smoothing state.
                let rate = if frame.is_video && frame.retransmitted {
                    wanted
                } else {
                    self.rates[idx][class].smooth(wanted, self.config.rate_decrease_hold, now)
                };

                targets.push(TxTarget {
                    interface: idx,
                    link: link.id,
                    rate,
                    short_form: serial,
                });
            }
        }

        if targets.is_empty() {
            self.stats.dropped_no_target += 1;
            tracing::debug!(
                video = frame.is_video,
                only_ping = frame.only_ping,
                "no eligible radio interface for frame"
            );
            return Err(SelectError::NoEligibleInterface);
        }
        Ok(targets)
    }

    /// Count a frame actually written to `target`.
    pub fn record_sent(&mut self, target: &TxTarget, frame: &FrameSummary, bytes: usize) {
        if let Some(s) = self.stats.interfaces.get_mut(target.interface) {
            s.frames += 1;
            s.bytes += bytes as u64;
            s.last_rate = target.rate.0;
            if frame.is_video {
                s.video_frames += 1;
            } else {
                s.data_frames += 1;
            }
        }
        if let Some(l) = self.stats.links.get_mut(target.link) {
            l.record(bytes);
        }
    }

    /// Count a frame once per stream, regardless of how many interfaces it
    /// went out on.
    pub fn record_streams(&mut self, frame: &FrameSummary) {
        for (s, counters) in self.stats.streams.iter_mut().enumerate() {
            counters.packets += frame.packets_per_stream[s] as u64;
            counters.bytes += frame.bytes_per_stream[s];
        }
    }
}
