//! A session peer: local replica, owned-entity simulation and message routing
//!
//! The peer is synchronous. Whoever drives it feeds packets in with
//! [`Peer::handle_packet`], calls [`Peer::step`] once per new session tick and
//! [`Peer::render`] once per displayed frame, and ships whatever
//! [`Peer::drain_outgoing`] returns to the session host.

use crate::behaviours::flag::{authoritative_claim, FlagClaim};
use crate::behaviours::{handle_rpc, step_entity, LocalState, SimContext};
use crate::input::InputFrame;
use crate::presentation::PresentationEvent;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::channel::ReliableLink;
use shared::dispatch::{ChangeDispatcher, DispatchOutcome};
use shared::prediction::PredictionStatus;
use shared::rpc::{Delivery, TargetScope};
use shared::{
    props, EntityId, EntityKind, Envelope, GamePhase, JoinFailure, Packet, PropValue, Rpc,
    SessionConfig, Standing, Tick, World, PROTOCOL_VERSION,
};

/// How often a player without a start point asks the game manager again.
const ANNOUNCE_INTERVAL_SECS: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Connecting,
    Joined,
    /// Terminal: the session could not be joined.
    Failed(JoinFailure),
    Left,
}

pub struct Peer {
    name: String,
    status: SessionStatus,
    config: SessionConfig,
    world: World,
    player: Option<EntityId>,
    dispatcher: ChangeDispatcher,
    link: ReliableLink,
    inbox: Vec<Envelope>,
    outgoing: Vec<Packet>,
    local: LocalState,
    rng: StdRng,
    last_simulated: Option<Tick>,
    last_snapshot_tick: Option<Tick>,
    announced_at: Option<Tick>,
}

impl Peer {
    pub fn new(name: &str) -> Self {
        Self::with_rng(name, StdRng::from_entropy())
    }

    /// Deterministic peer for tests.
    pub fn with_seed(name: &str, seed: u64) -> Self {
        Self::with_rng(name, StdRng::seed_from_u64(seed))
    }

    fn with_rng(name: &str, rng: StdRng) -> Self {
        let config = SessionConfig::default();
        let mut dispatcher = ChangeDispatcher::new();
        register_observers(&mut dispatcher);

        Self {
            name: name.to_string(),
            status: SessionStatus::Connecting,
            world: World::new(None, config.tick_rate),
            link: ReliableLink::new(config.reliable_resend_ticks),
            config,
            player: None,
            dispatcher,
            inbox: Vec::new(),
            outgoing: Vec::new(),
            local: LocalState::default(),
            rng,
            last_simulated: None,
            last_snapshot_tick: None,
            announced_at: None,
        }
    }

    pub fn join_packet(&self) -> Packet {
        Packet::Join {
            client_version: PROTOCOL_VERSION,
            name: self.name.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The player entity the host spawned for this peer.
    pub fn player(&self) -> Option<EntityId> {
        self.player
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The flag as this peer shows it: a pending local claim wins over the
    /// replicated state.
    pub fn flag_view(&self, flag: EntityId) -> FlagClaim {
        let authoritative = authoritative_claim(&self.world, flag);
        match self.local.predictions.get(&flag) {
            Some(prediction) => *prediction.resolve(&authoritative),
            None => authoritative,
        }
    }

    /// Processes one packet from the host. Returns true when a session tick
    /// arrived that has not been simulated yet.
    pub fn handle_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Joined {
                peer,
                player,
                config,
            } => {
                if self.status == SessionStatus::Connecting {
                    info!("Joined as {} with player {}", peer, player);
                    self.world.set_local_peer(peer);
                    self.world.set_tick_rate(config.tick_rate);
                    self.link = ReliableLink::new(config.reliable_resend_ticks);
                    self.config = config;
                    self.player = Some(player);
                    self.status = SessionStatus::Joined;
                }
                false
            }
            Packet::JoinRejected { reason } => {
                if self.status == SessionStatus::Connecting {
                    warn!("Join rejected ({}): {}", reason.reason_code(), reason);
                    self.status = SessionStatus::Failed(reason);
                }
                false
            }
            Packet::Snapshot { tick, entities, .. } => {
                if self.status != SessionStatus::Joined {
                    return false;
                }
                let Some(outcome) = self.world.apply_snapshot(tick, &entities) else {
                    return false;
                };
                self.last_snapshot_tick = Some(tick);

                for entity in &outcome.despawned {
                    self.local.predictions.remove(entity);
                }
                if let Some(player) = self.player {
                    if outcome.despawned.contains(&player) {
                        warn!("Host removed our player {}", player);
                        self.status = SessionStatus::Left;
                    }
                }
                self.last_simulated != Some(tick)
            }
            Packet::Rpc(envelope) => {
                self.inbox.push(envelope);
                false
            }
            Packet::Reliable { seq, payload } => {
                let mut new_tick = false;
                for packet in self.link.receive(seq, *payload) {
                    if matches!(packet, Packet::Reliable { .. }) {
                        warn!("Nested reliable packet from host");
                        continue;
                    }
                    new_tick |= self.handle_packet(packet);
                }
                new_tick
            }
            Packet::Ack { up_to } => {
                self.link.acknowledge(up_to);
                false
            }
            other => {
                warn!("Unexpected packet from host: {:?}", other);
                false
            }
        }
    }

    /// Runs one simulation step for the latest session tick.
    ///
    /// Does nothing until a snapshot arrived, and at most once per tick.
    pub fn step(&mut self, input: &InputFrame) -> bool {
        let tick = self.world.tick();
        if self.status != SessionStatus::Joined
            || self.last_snapshot_tick.is_none()
            || self.last_simulated == Some(tick)
        {
            return false;
        }
        self.last_simulated = Some(tick);

        let applied = self.world.flush_deferred();
        if applied > 0 {
            debug!("Applied {} writes queued during a hand-off", applied);
        }

        let inbox = std::mem::take(&mut self.inbox);
        let mut outbox = Vec::new();
        {
            let mut ctx = SimContext {
                world: &mut self.world,
                config: &self.config,
                input,
                outbox: &mut outbox,
                local: &mut self.local,
                rng: &mut self.rng,
            };
            for envelope in inbox {
                handle_rpc(&mut ctx, envelope);
            }
            for entity in ctx.world.owned_entities() {
                if ctx.world.is_frozen(entity) {
                    continue;
                }
                step_entity(&mut ctx, entity);
            }
        }

        if let Some(announcement) = self.announcement(tick) {
            outbox.push(announcement);
        }
        self.route_outbox(outbox);

        self.dispatch();
        self.send_state_updates(tick);
        self.flush_link(tick);
        true
    }

    /// Per-frame pass: ages predictions and reports what changed.
    pub fn render(&mut self, frame_dt: f32) {
        let mut reverted = Vec::new();
        for (flag, prediction) in self.local.predictions.iter_mut() {
            let authoritative = authoritative_claim(&self.world, *flag);
            if let PredictionStatus::Reverted(_) = prediction.advance(frame_dt, &authoritative) {
                reverted.push(*flag);
            }
        }
        for flag in reverted {
            info!("Claim on {} expired without confirmation", flag);
            self.local
                .events
                .push(PresentationEvent::PredictionReverted { flag });
        }

        self.dispatch();
    }

    pub fn drain_events(&mut self) -> Vec<PresentationEvent> {
        std::mem::take(&mut self.local.events)
    }

    pub fn drain_outgoing(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn leave(&mut self) {
        if self.status == SessionStatus::Joined {
            info!("Leaving session");
            self.outgoing.push(Packet::Leave);
        }
        self.status = SessionStatus::Left;
    }

    /// Gives up on a join the host never answered.
    pub fn join_timed_out(&mut self) {
        if self.status == SessionStatus::Connecting {
            warn!("No answer from host, giving up");
            self.status = SessionStatus::Failed(JoinFailure::Timeout);
        }
    }

    /// Asks the host to remove an entity this peer owns.
    pub fn request_despawn(&mut self, entity: EntityId) -> bool {
        if !self.world.is_authority(entity) {
            return false;
        }
        let tick = self.world.tick();
        self.send_to_host(Packet::Despawn { entity }, tick);
        true
    }

    /// `PlayerJoined` for our own player while it still has no start point.
    fn announcement(&mut self, tick: Tick) -> Option<Envelope> {
        let player = self.player?;
        let manager = self.world.first_of(EntityKind::GameManager)?;
        let seated = self
            .world
            .get::<i64>(player, props::START_INDEX)
            .map_or(false, |index| index >= 0);
        if seated {
            return None;
        }

        let interval = self.world.clock().ticks_for(ANNOUNCE_INTERVAL_SECS);
        if let Some(last) = self.announced_at {
            if tick.saturating_sub(last) < interval {
                return None;
            }
        }
        self.announced_at = Some(tick);
        Some(Envelope::new(manager, Rpc::PlayerJoined { player }))
    }

    fn route_outbox(&mut self, outbox: Vec<Envelope>) {
        let tick = self.world.tick();
        let local = self.world.local_peer();

        for mut envelope in outbox {
            envelope.sender = local;
            match envelope.descriptor().target {
                TargetScope::AuthorityOnly if self.world.is_authority(envelope.target) => {
                    self.inbox.push(envelope);
                }
                TargetScope::AuthorityOnly => self.send_to_host(Packet::Rpc(envelope), tick),
                TargetScope::All => {
                    self.inbox.push(envelope.clone());
                    self.send_to_host(Packet::Rpc(envelope), tick);
                }
            }
        }
    }

    fn send_to_host(&mut self, packet: Packet, tick: Tick) {
        let packet = match packet.delivery() {
            Delivery::Reliable => self.link.wrap(packet, tick),
            Delivery::Unreliable => packet,
        };
        self.outgoing.push(packet);
    }

    fn dispatch(&mut self) {
        let outcome = self.dispatcher.dispatch(&mut self.world);
        self.absorb(outcome);
    }

    fn absorb(&mut self, outcome: DispatchOutcome) {
        for event in outcome.events {
            if event.kind == EntityKind::Flag
                && event.previous.is_some()
                && (event.property == props::CAPTURE || event.property == props::HOLDER)
            {
                if let Some(prediction) = self.local.predictions.get_mut(&event.entity) {
                    prediction.observe_authoritative();
                }
            }
            self.local.events.push(PresentationEvent::Changed {
                entity: event.entity,
                kind: event.kind,
                property: event.property,
                previous: event.previous,
                current: event.current,
            });
        }
        for entity in outcome.despawned {
            self.local.predictions.remove(&entity);
            self.local.events.push(PresentationEvent::Despawned { entity });
        }
    }

    fn send_state_updates(&mut self, tick: Tick) {
        for entity in self.world.owned_entities() {
            if self.world.is_frozen(entity) {
                continue;
            }
            if let Some(props) = self.world.props(entity) {
                self.outgoing.push(Packet::StateUpdate {
                    tick,
                    entity,
                    props: props.clone(),
                });
            }
        }
    }

    fn flush_link(&mut self, tick: Tick) {
        if let Some(ack) = self.link.take_ack() {
            self.outgoing.push(ack);
        }
        let resends = self.link.resends(tick);
        self.outgoing.extend(resends);
    }
}

/// Reactions every peer has to the session phase, applied to its own player.
fn register_observers(dispatcher: &mut ChangeDispatcher) {
    dispatcher.observe(EntityKind::GameManager, props::PHASE, |event, world, ctx| {
        let Some(player) = world.local_player() else {
            return;
        };
        match event.current {
            PropValue::Phase(GamePhase::Waiting) => {
                ctx.set(player, props::SCORE, 0i64);
                ctx.set(player, props::HELD_FLAG, None::<EntityId>);
            }
            PropValue::Phase(GamePhase::Active) => {
                ctx.set(player, props::IS_WINNER, false);
            }
            PropValue::Phase(GamePhase::Results) => {
                let standings: Vec<Standing> =
                    world.get(event.entity, props::STANDINGS).unwrap_or_default();
                let winner = standings
                    .iter()
                    .any(|standing| standing.player == player && standing.winner);
                ctx.set(player, props::IS_WINNER, winner);
            }
            _ => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{CaptureState, PeerId, PropertyStore};

    const ME: PeerId = PeerId(1);
    const OTHER: PeerId = PeerId(2);

    /// A host-side world to produce snapshots from.
    struct Source {
        world: World,
        manager: EntityId,
        flag: EntityId,
        player: EntityId,
        other_player: EntityId,
    }

    impl Source {
        fn new(manager_owner: PeerId) -> Self {
            let mut world = World::new(None, 10);
            let manager = world.spawn(
                EntityKind::GameManager,
                Some(manager_owner),
                PropertyStore::new()
                    .with(props::PHASE, GamePhase::Active)
                    .with(props::STANDINGS, Vec::<Standing>::new()),
            );
            let flag = world.spawn(
                EntityKind::Flag,
                Some(OTHER),
                PropertyStore::new()
                    .with(props::CAPTURE, CaptureState::Free)
                    .with(props::HOLDER, None::<EntityId>)
                    .with(props::GENERATION, 0i64),
            );
            let player = world.spawn(
                EntityKind::Player,
                Some(ME),
                PropertyStore::new()
                    .with(props::START_INDEX, 0i64)
                    .with(props::POSITION, [10.0f32, 0.0, 0.0])
                    .with(props::SCORE, 4i64)
                    .with(props::HELD_FLAG, None::<EntityId>)
                    .with(props::IS_WINNER, false),
            );
            let other_player = world.spawn(
                EntityKind::Player,
                Some(OTHER),
                PropertyStore::new().with(props::START_INDEX, 1i64),
            );
            Self {
                world,
                manager,
                flag,
                player,
                other_player,
            }
        }

        fn snapshot(&mut self) -> Packet {
            let tick = self.world.clock_mut().advance();
            Packet::Snapshot {
                tick,
                timestamp: 0,
                entities: self.world.snapshot(),
            }
        }
    }

    fn joined_peer(source: &Source) -> Peer {
        let mut peer = Peer::with_seed("tester", 1);
        let mut config = SessionConfig::default();
        config.tick_rate = 10;
        peer.handle_packet(Packet::Joined {
            peer: ME,
            player: source.player,
            config,
        });
        peer
    }

    #[test]
    fn test_join_and_reject() {
        let source = Source::new(OTHER);
        let peer = joined_peer(&source);
        assert_eq!(peer.status(), &SessionStatus::Joined);
        assert_eq!(peer.world().local_peer(), Some(ME));
        assert_eq!(peer.player(), Some(source.player));

        let mut rejected = Peer::with_seed("late", 1);
        rejected.handle_packet(Packet::JoinRejected {
            reason: JoinFailure::SessionFull { max_players: 2 },
        });
        assert_eq!(
            rejected.status(),
            &SessionStatus::Failed(JoinFailure::SessionFull { max_players: 2 })
        );
    }

    #[test]
    fn test_join_timeout_is_terminal() {
        let mut peer = Peer::with_seed("lonely", 1);
        peer.join_timed_out();
        assert_eq!(peer.status(), &SessionStatus::Failed(JoinFailure::Timeout));
        assert!(!peer.step(&InputFrame::idle()));
    }

    #[test]
    fn test_one_step_per_tick() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        assert!(!peer.step(&InputFrame::idle()));

        let snapshot = source.snapshot();
        assert!(peer.handle_packet(snapshot.clone()));
        assert!(peer.step(&InputFrame::idle()));
        assert!(!peer.step(&InputFrame::idle()));

        assert!(!peer.handle_packet(snapshot));
        assert!(peer.handle_packet(source.snapshot()));
        assert!(peer.step(&InputFrame::idle()));
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        let old = source.snapshot();
        let new = source.snapshot();

        assert!(peer.handle_packet(new));
        assert!(!peer.handle_packet(old));
        assert_eq!(peer.world().tick(), 2);
    }

    #[test]
    fn test_state_update_sent_for_owned_entities_only() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());

        let updated: Vec<EntityId> = peer
            .drain_outgoing()
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::StateUpdate { entity, .. } => Some(entity),
                _ => None,
            })
            .collect();
        assert_eq!(updated, vec![source.player]);
    }

    #[test]
    fn test_remote_claim_goes_out_reliably_and_is_predicted() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());

        let mut input = InputFrame::idle();
        input.contacts = vec![source.flag];
        peer.step(&input);

        let claims: Vec<Packet> = peer
            .drain_outgoing()
            .into_iter()
            .filter(|packet| matches!(packet, Packet::Reliable { .. }))
            .collect();
        assert_eq!(claims.len(), 1);
        match &claims[0] {
            Packet::Reliable { seq, payload } => {
                assert_eq!(*seq, 1);
                assert!(matches!(
                    payload.as_ref(),
                    Packet::Rpc(Envelope {
                        rpc: Rpc::ClaimFlag { .. },
                        sender: Some(ME),
                        ..
                    })
                ));
            }
            _ => unreachable!(),
        }
        assert_eq!(peer.flag_view(source.flag).state, CaptureState::Held);
    }

    #[test]
    fn test_unconfirmed_claim_reverts() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        let mut input = InputFrame::idle();
        input.contacts = vec![source.flag];
        peer.step(&input);
        peer.drain_events();

        peer.render(1.0);
        assert_eq!(peer.flag_view(source.flag).state, CaptureState::Held);
        peer.render(1.5);
        assert_eq!(peer.flag_view(source.flag).state, CaptureState::Free);
        assert!(peer
            .drain_events()
            .contains(&PresentationEvent::PredictionReverted { flag: source.flag }));
    }

    #[test]
    fn test_authoritative_change_clears_prediction() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        let mut input = InputFrame::idle();
        input.contacts = vec![source.flag];
        peer.step(&input);

        source
            .world
            .overwrite(source.flag, props::CAPTURE, CaptureState::Held)
            .unwrap();
        source
            .world
            .overwrite(source.flag, props::HOLDER, source.other_player)
            .unwrap();
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());

        let view = peer.flag_view(source.flag);
        assert_eq!(view.holder, Some(source.other_player));
    }

    #[test]
    fn test_rpc_to_own_entity_stays_local() {
        let mut source = Source::new(ME);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());
        peer.drain_outgoing();

        // A call for our own player goes through the inbox, not the host.
        peer.route_outbox(vec![Envelope::new(
            source.player,
            Rpc::AssignStartingPoint { index: 3 },
        )]);
        assert!(peer.drain_outgoing().is_empty());

        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());
        assert_eq!(peer.world().get::<i64>(source.player, props::START_INDEX), Some(3));
    }

    #[test]
    fn test_unseated_player_announces_itself() {
        let mut source = Source::new(OTHER);
        source
            .world
            .overwrite(source.player, props::START_INDEX, -1i64)
            .unwrap();
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());

        let announced = peer.drain_outgoing().into_iter().any(|packet| match packet {
            Packet::Reliable { payload, .. } => matches!(
                *payload,
                Packet::Rpc(Envelope {
                    rpc: Rpc::PlayerJoined { .. },
                    ..
                })
            ),
            _ => false,
        });
        assert!(announced);

        // Not again on the very next tick.
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());
        let again = peer.drain_outgoing().into_iter().any(|packet| {
            matches!(packet, Packet::Reliable { seq, .. } if seq > 1)
        });
        assert!(!again);
    }

    #[test]
    fn test_waiting_resets_own_score() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());
        assert_eq!(peer.world().get::<i64>(source.player, props::SCORE), Some(4));

        source
            .world
            .overwrite(source.manager, props::PHASE, GamePhase::Waiting)
            .unwrap();
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());
        assert_eq!(peer.world().get::<i64>(source.player, props::SCORE), Some(0));
    }

    #[test]
    fn test_results_marks_own_winner() {
        let mut source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());

        source
            .world
            .overwrite(
                source.manager,
                props::STANDINGS,
                vec![Standing {
                    player: source.player,
                    name: "tester".to_string(),
                    score: 4,
                    winner: true,
                }],
            )
            .unwrap();
        source
            .world
            .overwrite(source.manager, props::PHASE, GamePhase::Results)
            .unwrap();
        peer.handle_packet(source.snapshot());
        peer.step(&InputFrame::idle());
        assert_eq!(
            peer.world().get::<bool>(source.player, props::IS_WINNER),
            Some(true)
        );
    }

    #[test]
    fn test_leave_sends_leave_once() {
        let source = Source::new(OTHER);
        let mut peer = joined_peer(&source);
        peer.leave();
        peer.leave();
        assert_eq!(peer.drain_outgoing(), vec![Packet::Leave]);
        assert_eq!(peer.status(), &SessionStatus::Left);
    }
}
