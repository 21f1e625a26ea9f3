use crate::geometry::Ring;

/// Frozen pairing of one region's rings. Produced by the pairing pass,
/// consumed by the interpolator.
#[derive(Debug, Clone, PartialEq)]
pub struct RingPlan {
    pub pairs: Vec<RingPair>,
    /// Either source geometry was already multi-part.
    pub multi_source: bool,
}

/// Rings are closed. A pair never lacks both sides.
#[derive(Debug, Clone, PartialEq)]
pub enum RingPair {
    Matched { from: Ring, to: Ring },
    /// Only in the regular geography; shrinks away toward the cartogram.
    Disappearing { from: Ring },
    /// Only in the cartogram; grows in from the regular state.
    Appearing { to: Ring },
}

impl RingPair {
    pub fn from_ring(&self) -> Option<&Ring> {
        match self {
            RingPair::Matched { from, .. } | RingPair::Disappearing { from } => Some(from),
            RingPair::Appearing { .. } => None,
        }
    }

    pub fn to_ring(&self) -> Option<&Ring> {
        match self {
            RingPair::Matched { to, .. } | RingPair::Appearing { to } => Some(to),
            RingPair::Disappearing { .. } => None,
        }
    }
}
