use crate::geometry::{self, Coord, Geometry, Ring};
use crate::plan::{RingPair, RingPlan};

/// Pairs the outer rings of two geometries. `None` when neither side has a
/// usable ring.
pub fn diff(from: Option<&Geometry>, to: Option<&Geometry>) -> Option<RingPlan> {
    let from_rings = extract_rings(from);
    let to_rings = extract_rings(to);

    if from_rings.is_empty() && to_rings.is_empty() {
        return None;
    }

    let multi_source = from.is_some_and(Geometry::is_multi) || to.is_some_and(Geometry::is_multi);

    Some(RingPlan {
        pairs: pair_rings(from_rings, to_rings),
        multi_source,
    })
}

/// Closed outer rings with at least three vertices.
pub fn extract_rings(geometry: Option<&Geometry>) -> Vec<Ring> {
    let Some(geometry) = geometry else {
        return Vec::new();
    };

    geometry
        .outer_rings()
        .into_iter()
        .filter(|ring| geometry::open(ring).len() >= 3)
        .map(|ring| {
            let mut ring = ring.clone();
            geometry::close_ring(&mut ring);
            ring
        })
        .collect()
}

/// Mean of the closed ring's vertices, so the start vertex counts twice.
pub fn ring_centroid(ring: &[Coord]) -> Option<Coord> {
    if geometry::is_closed(ring) {
        return geometry::vertex_mean(ring);
    }

    let mut closed = ring.to_vec();
    geometry::close_ring(&mut closed);
    geometry::vertex_mean(&closed)
}

fn distance_sq(a: Option<Coord>, b: Option<Coord>) -> f64 {
    match (a, b) {
        (Some([ax, ay]), Some([bx, by])) => (ax - bx).powi(2) + (ay - by).powi(2),
        _ => f64::INFINITY,
    }
}

/// Greedy nearest-centroid matching in `from` order. Each `to` ring is
/// claimed at most once; on equal distance the earlier `to` ring wins.
/// Unclaimed `to` rings follow as appearing pairs.
pub fn pair_rings(from: Vec<Ring>, to: Vec<Ring>) -> Vec<RingPair> {
    let to_centroids: Vec<Option<Coord>> = to.iter().map(|r| ring_centroid(r)).collect();
    let mut to_slots: Vec<Option<Ring>> = to.into_iter().map(Some).collect();
    let mut pairs = Vec::with_capacity(from.len() + to_slots.len());

    for from_ring in from {
        let centroid = ring_centroid(&from_ring);
        let mut best: Option<(usize, f64)> = None;

        for (j, slot) in to_slots.iter().enumerate() {
            if slot.is_none() {
                continue;
            }

            let d = distance_sq(centroid, to_centroids[j]);

            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((j, d));
            }
        }

        match best.and_then(|(j, _)| to_slots[j].take()) {
            Some(to_ring) => pairs.push(RingPair::Matched {
                from: from_ring,
                to: to_ring,
            }),
            None => pairs.push(RingPair::Disappearing { from: from_ring }),
        }
    }

    pairs.extend(to_slots.into_iter().flatten().map(|to| RingPair::Appearing { to }));
    pairs
}
