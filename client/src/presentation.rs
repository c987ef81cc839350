//! Hook for whatever renders the session
//!
//! Presenters only observe. They receive every change the dispatcher
//! reports plus the cosmetic events that never touch replicated state.

use log::{debug, info};
use shared::{props, EntityId, EntityKind, PropValue};

#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    Changed {
        entity: EntityId,
        kind: EntityKind,
        property: String,
        previous: Option<PropValue>,
        current: PropValue,
    },
    Despawned {
        entity: EntityId,
    },
    Attack {
        player: EntityId,
        origin: [f32; 3],
        direction: [f32; 3],
    },
    /// A local guess about a flag expired without the authority agreeing.
    PredictionReverted {
        flag: EntityId,
    },
}

pub trait Presenter {
    fn present(&mut self, event: &PresentationEvent);
}

/// Writes notable events to the log.
#[derive(Debug, Default)]
pub struct LogPresenter {
    presented: u64,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Presenter for LogPresenter {
    fn present(&mut self, event: &PresentationEvent) {
        self.presented += 1;

        match event {
            PresentationEvent::Changed {
                entity,
                kind,
                property,
                current,
                ..
            } => match (kind, property.as_str()) {
                (EntityKind::GameManager, props::PHASE)
                | (EntityKind::GameManager, props::STANDINGS)
                | (EntityKind::Player, props::SCORE)
                | (EntityKind::Player, props::IS_WINNER)
                | (EntityKind::Flag, props::CAPTURE) => {
                    info!("{:?} {} {} = {:?}", kind, entity, property, current)
                }
                _ => debug!("{:?} {} {} = {:?}", kind, entity, property, current),
            },
            PresentationEvent::Despawned { entity } => info!("{} despawned", entity),
            PresentationEvent::Attack { player, .. } => debug!("{} attacks", player),
            PresentationEvent::PredictionReverted { flag } => {
                info!("Claim on {} was not confirmed", flag)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_presenter_counts_events() {
        let mut presenter = LogPresenter::new();
        presenter.present(&PresentationEvent::Despawned {
            entity: EntityId(1),
        });
        presenter.present(&PresentationEvent::PredictionReverted { flag: EntityId(2) });
        assert_eq!(presenter.presented(), 2);
    }
}
