//! Typed values carried by replicated properties

use crate::game::{CaptureState, GamePhase, Standing};
use crate::ids::EntityId;
use crate::timer::TickTimer;
use serde::{Deserialize, Serialize};

/// Every type a replicated property can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Text(String),
    Vec3([f32; 3]),
    Entity(Option<EntityId>),
    Slots(Vec<Option<EntityId>>),
    Timer(TickTimer),
    Phase(GamePhase),
    Capture(CaptureState),
    Standings(Vec<Standing>),
    Segments(Vec<u8>),
}

/// Typed read out of a [`PropValue`]. Returns `None` on a type mismatch.
pub trait FromProp: Sized {
    fn from_prop(value: &PropValue) -> Option<Self>;
}

macro_rules! prop_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PropValue {
                fn from(value: $ty) -> Self {
                    PropValue::$variant(value)
                }
            }

            impl FromProp for $ty {
                fn from_prop(value: &PropValue) -> Option<Self> {
                    match value {
                        PropValue::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

prop_conversions! {
    bool => Bool,
    i64 => Int,
    f32 => Float,
    String => Text,
    [f32; 3] => Vec3,
    Option<EntityId> => Entity,
    Vec<Option<EntityId>> => Slots,
    TickTimer => Timer,
    GamePhase => Phase,
    CaptureState => Capture,
    Vec<Standing> => Standings,
    Vec<u8> => Segments,
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.to_string())
    }
}

impl From<EntityId> for PropValue {
    fn from(value: EntityId) -> Self {
        PropValue::Entity(Some(value))
    }
}

/// Euclidean distance between two points.
pub fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_typed_reads() {
        assert_eq!(bool::from_prop(&PropValue::Bool(true)), Some(true));
        assert_eq!(i64::from_prop(&PropValue::Int(7)), Some(7));
        assert_eq!(
            GamePhase::from_prop(&PropValue::Phase(GamePhase::Results)),
            Some(GamePhase::Results)
        );
        assert_eq!(
            Option::<EntityId>::from_prop(&PropValue::from(EntityId(9))),
            Some(Some(EntityId(9)))
        );
    }

    #[test]
    fn test_type_mismatch_reads_none() {
        assert_eq!(i64::from_prop(&PropValue::Bool(true)), None);
        assert_eq!(String::from_prop(&PropValue::Int(1)), None);
    }

    #[test]
    fn test_equality_drives_change_detection() {
        assert_eq!(PropValue::from("abc"), PropValue::Text("abc".to_string()));
        assert_ne!(PropValue::Float(1.0), PropValue::Float(1.5));
        assert_ne!(PropValue::Int(1), PropValue::Float(1.0));
    }

    #[test]
    fn test_distance() {
        assert_approx_eq!(distance([0.0, 0.0, 0.0], [3.0, 0.0, 4.0]), 5.0, 1e-6);
        assert_approx_eq!(distance([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]), 0.0, 1e-6);
    }
}
