//! Ordered, acknowledged delivery over an unreliable datagram link

use crate::protocol::Packet;
use crate::timer::Tick;
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct InFlight {
    packet: Packet,
    sent_at: Tick,
}

/// One end of a reliable link between the host and a peer.
///
/// Sequence numbers start at 1. The receiving side releases packets strictly
/// in sequence order, buffering anything that arrives early and dropping
/// anything already seen, and acknowledges cumulatively. The sending side
/// keeps every packet until it is acknowledged and resends it every
/// `resend_after` ticks.
#[derive(Debug, Clone)]
pub struct ReliableLink {
    next_seq: u32,
    in_flight: BTreeMap<u32, InFlight>,
    delivered_up_to: u32,
    early: BTreeMap<u32, Packet>,
    ack_pending: bool,
    resend_after: u32,
}

impl ReliableLink {
    pub fn new(resend_after: u32) -> Self {
        Self {
            next_seq: 1,
            in_flight: BTreeMap::new(),
            delivered_up_to: 0,
            early: BTreeMap::new(),
            ack_pending: false,
            resend_after: resend_after.max(1),
        }
    }

    /// Assigns the next sequence number and keeps a copy for resending.
    pub fn wrap(&mut self, packet: Packet, now: Tick) -> Packet {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(
            seq,
            InFlight {
                packet: packet.clone(),
                sent_at: now,
            },
        );
        Packet::Reliable {
            seq,
            payload: Box::new(packet),
        }
    }

    /// Accepts one reliable packet and returns whatever is now deliverable in order.
    pub fn receive(&mut self, seq: u32, payload: Packet) -> Vec<Packet> {
        self.ack_pending = true;

        if seq <= self.delivered_up_to || self.early.contains_key(&seq) {
            debug!("Dropping duplicate reliable packet {}", seq);
            return Vec::new();
        }
        self.early.insert(seq, payload);

        let mut ready = Vec::new();
        while let Some(packet) = self.early.remove(&(self.delivered_up_to + 1)) {
            self.delivered_up_to += 1;
            ready.push(packet);
        }
        ready
    }

    /// Forgets everything the other side has confirmed.
    pub fn acknowledge(&mut self, up_to: u32) {
        self.in_flight.retain(|seq, _| *seq > up_to);
    }

    /// Cumulative ack to send back, if anything arrived since the last one.
    pub fn take_ack(&mut self) -> Option<Packet> {
        if !self.ack_pending {
            return None;
        }
        self.ack_pending = false;
        Some(Packet::Ack {
            up_to: self.delivered_up_to,
        })
    }

    /// Packets that went unacknowledged for too long, re-wrapped for sending.
    pub fn resends(&mut self, now: Tick) -> Vec<Packet> {
        let resend_after = self.resend_after;
        self.in_flight
            .iter_mut()
            .filter(|(_, entry)| now.saturating_sub(entry.sent_at) >= resend_after)
            .map(|(seq, entry)| {
                entry.sent_at = now;
                Packet::Reliable {
                    seq: *seq,
                    payload: Box::new(entry.packet.clone()),
                }
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn delivered_up_to(&self) -> u32 {
        self.delivered_up_to
    }
}
