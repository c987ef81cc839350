//! Remote calls between peers
//!
//! Every call declares who may send it, who receives it and how it travels.
//! The session host enforces the first two when routing; the third picks the
//! channel.

use crate::game::CaptureState;
use crate::ids::{EntityId, PeerId};
use serde::{Deserialize, Serialize};

/// Who may send a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceScope {
    Any,
    /// Only the authority of the target entity.
    AuthorityOnly,
}

/// Who runs the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetScope {
    /// The current authority of the target entity.
    AuthorityOnly,
    /// Every peer, the sender included.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcDescriptor {
    pub name: &'static str,
    pub source: SourceScope,
    pub target: TargetScope,
    pub delivery: Delivery,
}

/// Lifecycle hooks of a course, invoked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseCommand {
    StartGame,
    EndGame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rpc {
    /// To the game manager: a player entered the session and wants a start slot.
    PlayerJoined { player: EntityId },
    /// To a player: the start slot it was given.
    AssignStartingPoint { index: u8 },
    /// To a flag: a player touched it.
    ClaimFlag { player: EntityId },
    /// To a player: the flag is now yours.
    CollectFlag { flag: EntityId, generation: u32 },
    /// To a flag: its holder brought it home.
    DepositFlag { player: EntityId, generation: u32 },
    /// To a flag: back to free. With a generation, only if it still matches.
    DropFlag { generation: Option<u32> },
    /// To a flag: set by a course that does not own the flag.
    ResetFlag { state: CaptureState },
    Course(CourseCommand),
    /// From a player to everyone. Purely cosmetic.
    Attack { origin: [f32; 3], direction: [f32; 3] },
}

impl Rpc {
    pub fn descriptor(&self) -> RpcDescriptor {
        let (name, source, target, delivery) = match self {
            Rpc::PlayerJoined { .. } => (
                "player_joined",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::AssignStartingPoint { .. } => (
                "assign_starting_point",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::ClaimFlag { .. } => (
                "claim_flag",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::CollectFlag { .. } => (
                "collect_flag",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::DepositFlag { .. } => (
                "deposit_flag",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::DropFlag { .. } => (
                "drop_flag",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::ResetFlag { .. } => (
                "reset_flag",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::Course(CourseCommand::StartGame) => (
                "start_game",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::Course(CourseCommand::EndGame) => (
                "end_game",
                SourceScope::Any,
                TargetScope::AuthorityOnly,
                Delivery::Reliable,
            ),
            Rpc::Attack { .. } => (
                "attack",
                SourceScope::AuthorityOnly,
                TargetScope::All,
                Delivery::Unreliable,
            ),
        };
        RpcDescriptor {
            name,
            source,
            target,
            delivery,
        }
    }
}

/// An addressed call. `sender` is stamped by the session host on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Option<PeerId>,
    pub target: EntityId,
    pub rpc: Rpc,
}

impl Envelope {
    pub fn new(target: EntityId, rpc: Rpc) -> Self {
        Self {
            sender: None,
            target,
            rpc,
        }
    }

    pub fn descriptor(&self) -> RpcDescriptor {
        self.rpc.descriptor()
    }
}

/// Where the session host sends an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Deliver to exactly these peers.
    Deliver(Vec<PeerId>),
    /// Discard, with the reason.
    Drop(&'static str),
}

/// Routing decision for an envelope arriving from `sender`.
///
/// `owner` is the target's authority at arrival time, `None` when the target
/// is unassigned. `known` says whether the target exists at all.
pub fn route(
    envelope: &Envelope,
    sender: PeerId,
    known: bool,
    owner: Option<PeerId>,
    peers: &[PeerId],
) -> Route {
    if !known {
        return Route::Drop("unknown target entity");
    }

    let descriptor = envelope.descriptor();
    if descriptor.source == SourceScope::AuthorityOnly && owner != Some(sender) {
        return Route::Drop("sender is not the authority of the target");
    }

    match descriptor.target {
        TargetScope::AuthorityOnly => match owner {
            Some(owner) => Route::Deliver(vec![owner]),
            None => Route::Drop("target has no authority"),
        },
        TargetScope::All => Route::Deliver(
            peers
                .iter()
                .copied()
                .filter(|peer| *peer != sender)
                .collect(),
        ),
    }
}
