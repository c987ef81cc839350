//! Optimistic local overlays on top of replicated values

/// Outcome of advancing a prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionStatus<T> {
    /// No overlay active.
    Idle,
    /// Overlay still waiting for the authority.
    Pending,
    /// Timed out while agreeing with the authority.
    Confirmed,
    /// Timed out while disagreeing; the overlay value is dropped.
    Reverted(T),
}

/// A locally predicted value that falls back to the authoritative one.
///
/// The overlay lives until an authoritative change is observed or the timeout
/// runs out, whichever comes first.
#[derive(Debug, Clone)]
pub struct Predicted<T> {
    overlay: Option<T>,
    remaining: f32,
    timeout: f32,
}

impl<T: Clone + PartialEq> Predicted<T> {
    pub fn new(timeout_secs: f32) -> Self {
        Self {
            overlay: None,
            remaining: 0.0,
            timeout: timeout_secs.max(0.0),
        }
    }

    pub fn predict(&mut self, value: T) {
        self.overlay = Some(value);
        self.remaining = self.timeout;
    }

    pub fn is_active(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn overlay(&self) -> Option<&T> {
        self.overlay.as_ref()
    }

    /// The value to show: the overlay while it lives, otherwise `authoritative`.
    pub fn resolve<'a>(&'a self, authoritative: &'a T) -> &'a T {
        self.overlay.as_ref().unwrap_or(authoritative)
    }

    /// The authority spoke; drop the overlay.
    pub fn observe_authoritative(&mut self) {
        self.overlay = None;
        self.remaining = 0.0;
    }

    pub fn advance(&mut self, dt: f32, authoritative: &T) -> PredictionStatus<T> {
        let Some(overlay) = self.overlay.as_ref() else {
            return PredictionStatus::Idle;
        };

        self.remaining -= dt;
        if self.remaining > 0.0 {
            return PredictionStatus::Pending;
        }

        let status = if overlay == authoritative {
            PredictionStatus::Confirmed
        } else {
            PredictionStatus::Reverted(overlay.clone())
        };
        self.overlay = None;
        status
    }
}
