//! The session host: membership, entity lifecycle, authority and routing
//!
//! The host runs no gameplay. It owns the session tick, allocates entity ids,
//! decides who owns what, checks that state updates come from the owner,
//! routes remote calls by scope, and broadcasts a snapshot every tick.
//! Everything here is synchronous; [`crate::network`] feeds it datagrams and
//! ships whatever it queues.

use crate::peer_manager::{Peer, PeerManager};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::authority::successor;
use shared::protocol::timestamp_millis;
use shared::rpc::{route, Delivery, Route};
use shared::{
    props, CaptureState, EntityId, EntityKind, Envelope, GamePhase, JoinFailure, Packet, PeerId,
    PropertyStore, ReplicationError, Rpc, SessionConfig, Tick, TickTimer, World, PROTOCOL_VERSION,
};
use std::f32::consts::TAU;
use std::net::SocketAddr;

pub struct SessionHost {
    config: SessionConfig,
    world: World,
    peers: PeerManager,
    outgoing: Vec<(SocketAddr, Packet)>,
    rng: StdRng,
}

impl SessionHost {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic host for tests.
    pub fn with_seed(config: SessionConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SessionConfig, rng: StdRng) -> Self {
        let mut host = Self {
            world: World::new(None, config.tick_rate),
            peers: PeerManager::new(config.max_players, config.reliable_resend_ticks),
            outgoing: Vec::new(),
            rng,
            config,
        };
        host.spawn_world();
        host
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    pub fn current_tick(&self) -> Tick {
        self.world.tick()
    }

    pub fn player_of(&self, peer: PeerId) -> Option<EntityId> {
        self.peers.get(peer).and_then(|peer| peer.player)
    }

    /// Takes every datagram queued since the last call.
    pub fn drain_outgoing(&mut self) -> Vec<(SocketAddr, Packet)> {
        std::mem::take(&mut self.outgoing)
    }

    /// Creates the game manager, every course with its flag and every
    /// obstacle, all unassigned.
    fn spawn_world(&mut self) {
        let manager = self.world.spawn(
            EntityKind::GameManager,
            None,
            PropertyStore::new()
                .with(props::PHASE, GamePhase::Waiting)
                .with(props::MATCH_TIMER, TickTimer::NONE)
                .with(props::COUNTDOWN_TIMER, TickTimer::NONE)
                .with(props::READY_COUNT, 0i64)
                .with(props::TOTAL_COUNT, 0i64)
                .with(props::ALL_READY, false)
                .with(props::SLOTS, vec![None::<EntityId>; self.config.max_players])
                .with(props::STANDINGS, Vec::<shared::Standing>::new()),
        );
        debug!("Game manager is {}", manager);

        let layouts = self.config.layout.courses.clone();
        for (index, layout) in layouts.iter().enumerate() {
            let segments = layout.roll_segments(&mut self.rng);
            let course = self.world.spawn(
                EntityKind::Course,
                None,
                PropertyStore::new()
                    .with(props::DIRECTION, 0i64)
                    .with(props::IN_GAME, false)
                    .with(props::HEIGHT, layout.lower_limit)
                    .with(props::SEGMENTS, segments)
                    .with(props::FLAG, None::<EntityId>)
                    .with(props::LAYOUT_INDEX, index as i64),
            );
            let flag = self.world.spawn(
                EntityKind::Flag,
                None,
                PropertyStore::new()
                    .with(props::CAPTURE, CaptureState::Free)
                    .with(props::HOLDER, None::<EntityId>)
                    .with(props::GENERATION, 0i64)
                    .with(props::COURSE, course)
                    .with(props::POSITION, layout.flag_position),
            );
            let _ = self.world.overwrite(course, props::FLAG, flag);
        }

        let obstacles = self.config.layout.obstacles.clone();
        for (index, layout) in obstacles.iter().enumerate() {
            let phase = self.rng.gen_range(0.0..TAU);
            self.world.spawn(
                EntityKind::Obstacle,
                None,
                PropertyStore::new()
                    .with(props::OSCILLATION, phase)
                    .with(props::POSITION, layout.position_at(phase))
                    .with(props::LAYOUT_INDEX, index as i64),
            );
        }

        info!(
            "Session ready: {} courses, {} obstacles, {} player slots, {} Hz",
            layouts.len(),
            obstacles.len(),
            self.config.max_players,
            self.config.tick_rate
        );
    }

    /// Processes one datagram from `addr`.
    pub fn handle_packet(&mut self, addr: SocketAddr, packet: Packet) {
        if let Packet::Join {
            client_version,
            name,
        } = packet
        {
            self.handle_join(addr, client_version, &name);
            return;
        }

        let Some(sender) = self.peers.find_by_addr(addr) else {
            debug!("Ignoring packet from unknown address {}", addr);
            return;
        };
        let now = self.world.tick();
        self.peers.touch(sender, now);
        self.handle_peer_packet(sender, packet);
    }

    fn handle_peer_packet(&mut self, sender: PeerId, packet: Packet) {
        match packet {
            Packet::Leave => self.depart(sender),
            Packet::StateUpdate { entity, props, .. } => {
                self.apply_state_update(sender, entity, &props)
            }
            Packet::Rpc(envelope) => self.route_rpc(sender, envelope),
            Packet::Despawn { entity } => {
                if self.world.owner(entity) == Some(sender) {
                    self.despawn_entity(entity);
                } else {
                    warn!("{} may not despawn {}", sender, entity);
                }
            }
            Packet::Reliable { seq, payload } => {
                let released = match self.peers.get_mut(sender) {
                    Some(peer) => peer.link.receive(seq, *payload),
                    None => return,
                };
                for packet in released {
                    if matches!(packet, Packet::Reliable { .. }) {
                        warn!("Nested reliable packet from {}", sender);
                        continue;
                    }
                    self.handle_peer_packet(sender, packet);
                }
            }
            Packet::Ack { up_to } => {
                if let Some(peer) = self.peers.get_mut(sender) {
                    peer.link.acknowledge(up_to);
                }
            }
            other => warn!("Unexpected packet from {}: {:?}", sender, other),
        }
    }

    fn handle_join(&mut self, addr: SocketAddr, client_version: u32, name: &str) {
        if let Some(existing) = self.peers.find_by_addr(addr) {
            if let Some(player) = self.player_of(existing) {
                debug!("Repeated join from {}, resending welcome", existing);
                self.send_to_addr(
                    addr,
                    Packet::Joined {
                        peer: existing,
                        player,
                        config: self.config.clone(),
                    },
                );
            }
            return;
        }

        if client_version != PROTOCOL_VERSION {
            warn!(
                "Rejecting {} from {}: protocol {} (expected {})",
                name, addr, client_version, PROTOCOL_VERSION
            );
            self.send_to_addr(
                addr,
                Packet::JoinRejected {
                    reason: JoinFailure::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        actual: client_version,
                    },
                },
            );
            return;
        }

        let now = self.world.tick();
        let Some(peer_id) = self.peers.add_peer(addr, name, now) else {
            warn!("Rejecting {} from {}: session full", name, addr);
            self.send_to_addr(
                addr,
                Packet::JoinRejected {
                    reason: JoinFailure::SessionFull {
                        max_players: self.config.max_players,
                    },
                },
            );
            return;
        };

        let player = self.world.spawn(
            EntityKind::Player,
            Some(peer_id),
            PropertyStore::new()
                .with(props::NAME, name)
                .with(props::START_INDEX, -1i64)
                .with(props::POSITION, [0.0f32, 0.0, 0.0])
                .with(props::ON_START_POINT, false)
                .with(props::HELD_FLAG, None::<EntityId>)
                .with(props::HELD_GENERATION, 0i64)
                .with(props::SCORE, 0i64)
                .with(props::IS_WINNER, false)
                .with(props::IS_MASTER, false)
                .with(props::EXPLODED, false)
                .with(props::EXPLOSION_TIMER, TickTimer::NONE)
                .with(props::ATTACKING, false),
        );
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.player = Some(player);
        }

        let unassigned = self.world.authority().unassigned();
        if !unassigned.is_empty() {
            info!("{} now coordinates {} world entities", peer_id, unassigned.len());
        }
        for entity in unassigned {
            let _ = self.world.assign(entity, Some(peer_id));
        }

        self.send_to_addr(
            addr,
            Packet::Joined {
                peer: peer_id,
                player,
                config: self.config.clone(),
            },
        );
    }

    fn apply_state_update(&mut self, sender: PeerId, entity: EntityId, props: &PropertyStore) {
        let phase_before = self.phase_of(entity);

        match self.world.apply_authoritative(sender, entity, props) {
            Ok(_) => {
                let phase_after = self.phase_of(entity);
                if phase_before != phase_after {
                    if let Some(phase) = phase_after {
                        info!("Session phase is now {:?} (tick {})", phase, self.world.tick());
                    }
                }
            }
            Err(error @ ReplicationError::NotAuthority { .. }) => {
                warn!("Rejected state update from {}: {}", sender, error)
            }
            Err(error) => debug!("Dropped state update from {}: {}", sender, error),
        }
    }

    fn phase_of(&self, entity: EntityId) -> Option<GamePhase> {
        match self.world.kind(entity) {
            Some(EntityKind::GameManager) => self.world.get(entity, props::PHASE),
            _ => None,
        }
    }

    fn route_rpc(&mut self, sender: PeerId, mut envelope: Envelope) {
        envelope.sender = Some(sender);
        let target = envelope.target;

        let decision = route(
            &envelope,
            sender,
            self.world.contains(target),
            self.world.owner(target),
            &self.peers.peer_ids(),
        );

        match decision {
            Route::Deliver(recipients) => {
                for peer in recipients {
                    self.send(peer, Packet::Rpc(envelope.clone()));
                }
            }
            Route::Drop(reason) => warn!(
                "Dropping {} from {} to {}: {}",
                envelope.descriptor().name,
                sender,
                target,
                reason
            ),
        }
    }

    /// Removes a peer that left on its own.
    pub fn depart(&mut self, peer: PeerId) {
        if let Some(peer) = self.peers.remove_peer(peer) {
            self.handle_departure(peer);
        }
    }

    fn handle_departure(&mut self, peer: Peer) {
        if let Some(player) = peer.player {
            self.despawn_entity(player);
        }

        let heir = successor(self.peers.peer_ids());
        self.world.handle_departure(peer.id, heir);
    }

    /// Tears an entity down, releasing the flag a player was holding first.
    fn despawn_entity(&mut self, entity: EntityId) {
        if self.world.kind(entity) == Some(EntityKind::Player) {
            let held: Option<EntityId> = self.world.get::<Option<EntityId>>(entity, props::HELD_FLAG).flatten();
            if let Some(flag) = held {
                let generation = self
                    .world
                    .get::<i64>(entity, props::HELD_GENERATION)
                    .unwrap_or(0) as u32;
                let _ = self.world.overwrite(entity, props::HELD_FLAG, None::<EntityId>);
                self.release_flag(flag, generation, entity);
            }
        }

        if self.world.despawn(entity).is_some() {
            info!("Despawned {} at tick {}", entity, self.world.tick());
        }
    }

    fn release_flag(&mut self, flag: EntityId, generation: u32, holder: EntityId) {
        let departing_owner = self.world.owner(holder);
        let flag_owner = match self.world.owner(flag) {
            Some(owner) if Some(owner) != departing_owner => Some(owner),
            _ => successor(
                self.peers
                    .peer_ids()
                    .into_iter()
                    .filter(|peer| Some(*peer) != departing_owner),
            ),
        };

        let Some(flag_owner) = flag_owner else {
            debug!("No one left to release {}", flag);
            return;
        };

        info!("Releasing {} held by {} (generation {})", flag, holder, generation);
        self.send(
            flag_owner,
            Packet::Rpc(Envelope::new(
                flag,
                Rpc::DropFlag {
                    generation: Some(generation),
                },
            )),
        );
    }

    /// Advances the session by one tick and broadcasts the snapshot.
    pub fn tick(&mut self) -> Tick {
        let now = self.world.tick();
        let timeout_ticks = self.world.clock().ticks_for(self.config.peer_timeout_secs);
        for peer in self.peers.check_timeouts(now, timeout_ticks) {
            self.handle_departure(peer);
        }

        let tick = self.world.clock_mut().advance();
        self.world.authority_mut().clear_finished_handoffs(tick);

        for peer in self.peers.peers_mut() {
            for packet in peer.link.resends(tick) {
                self.outgoing.push((peer.addr, packet));
            }
            if let Some(ack) = peer.link.take_ack() {
                self.outgoing.push((peer.addr, ack));
            }
        }

        let snapshot = Packet::Snapshot {
            tick,
            timestamp: timestamp_millis(),
            entities: self.world.snapshot(),
        };
        for (_, addr) in self.peers.addrs() {
            self.outgoing.push((addr, snapshot.clone()));
        }

        if tick % (self.config.tick_rate * 10).max(1) == 0 && !self.peers.is_empty() {
            debug!(
                "Tick {}: {} peers, {} entities",
                tick,
                self.peers.len(),
                self.world.len()
            );
        }
        tick
    }

    /// Queues a packet for a peer on the channel its class asks for.
    fn send(&mut self, peer: PeerId, packet: Packet) {
        let now = self.world.tick();
        let Some(peer) = self.peers.get_mut(peer) else {
            return;
        };
        let packet = match packet.delivery() {
            Delivery::Reliable => peer.link.wrap(packet, now),
            Delivery::Unreliable => packet,
        };
        self.outgoing.push((peer.addr, packet));
    }

    fn send_to_addr(&mut self, addr: SocketAddr, packet: Packet) {
        self.outgoing.push((addr, packet));
    }
}
