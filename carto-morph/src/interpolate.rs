use crate::geometry::{self, Coord, Geometry, GeometryType, Ring};
use crate::pairing;
use crate::plan::{RingPair, RingPlan};

/// Orphan rings are hidden this close to their synthesized endpoint.
pub const VISIBILITY_EPSILON: f64 = 1e-3;

/// Placeholder side as a fraction of the source ring's bounding-box span.
const PLACEHOLDER_SCALE: f64 = 0.02;
const MIN_PLACEHOLDER_SIZE: f64 = 1e-6;

/// Densification never grows a ring much past this many vertices.
pub const MAX_DENSIFIED_VERTICES: usize = 4096;

/// NaN clamps to 0.
pub fn clamp_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

/// Small closed square at the ring's centroid, 2% of its span.
pub fn placeholder_ring(ring: &[Coord]) -> Ring {
    let pts = geometry::open(ring);
    let [cx, cy] = pairing::ring_centroid(ring).unwrap_or([0.0, 0.0]);
    let span = geometry::Extent::of_coords(pts.iter().copied())
        .map(|e| e.width().max(e.height()))
        .unwrap_or(0.0);
    let half = (span * PLACEHOLDER_SCALE).max(MIN_PLACEHOLDER_SIZE) / 2.0;

    vec![
        [cx - half, cy - half],
        [cx + half, cy - half],
        [cx + half, cy + half],
        [cx - half, cy + half],
        [cx - half, cy - half],
    ]
}

/// Boundary morph between two closed rings.
///
/// Both rings are resampled to the same vertex count by splitting their
/// longest edges, the target is re-wound and rotated to the start offset with
/// the least squared displacement, and intermediate frames blend linearly.
/// The endpoints return the original rings untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RingMorph {
    from: Ring,
    to: Ring,
    from_points: Vec<Coord>,
    to_points: Vec<Coord>,
}

impl RingMorph {
    pub fn new(from: &[Coord], to: &[Coord], max_segment_length: Option<f64>) -> Self {
        let mut from_points = geometry::open(from).to_vec();
        let mut to_points = geometry::open(to).to_vec();

        if let Some(max) = max_segment_length.filter(|m| m.is_finite() && *m > 0.0) {
            densify(&mut from_points, max);
            densify(&mut to_points, max);
        }

        let (short, long) = if from_points.len() < to_points.len() {
            (&mut from_points, &to_points)
        } else {
            (&mut to_points, &from_points)
        };
        let missing = long.len() - short.len();
        add_points(short, missing);

        if geometry::signed_area(&from_points) * geometry::signed_area(&to_points) < 0.0 {
            to_points.reverse();
        }

        let offset = best_rotation(&from_points, &to_points);
        to_points.rotate_left(offset);

        let mut from = from.to_vec();
        let mut to = to.to_vec();
        geometry::close_ring(&mut from);
        geometry::close_ring(&mut to);

        Self {
            from,
            to,
            from_points,
            to_points,
        }
    }

    pub fn at(&self, t: f64) -> Ring {
        let t = clamp_factor(t);

        if t <= 0.0 {
            return self.from.clone();
        }

        if t >= 1.0 {
            return self.to.clone();
        }

        let mut ring: Ring = self
            .from_points
            .iter()
            .zip(&self.to_points)
            .map(|([ax, ay], [bx, by])| [ax + (bx - ax) * t, ay + (by - ay) * t])
            .collect();

        geometry::close_ring(&mut ring);
        ring
    }

    pub fn vertex_count(&self) -> usize {
        self.from_points.len()
    }
}

fn segment_length([ax, ay]: Coord, [bx, by]: Coord) -> f64 {
    ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt()
}

/// Splits every edge longer than `max` into equal parts. `max` is raised when
/// the perimeter would need more than `MAX_DENSIFIED_VERTICES` vertices.
fn densify(points: &mut Vec<Coord>, max: f64) {
    let n = points.len();

    if n < 2 || n >= MAX_DENSIFIED_VERTICES {
        return;
    }

    let perimeter: f64 = (0..n)
        .map(|i| segment_length(points[i], points[(i + 1) % n]))
        .filter(|len| len.is_finite())
        .sum();
    let max = max.max(perimeter / (MAX_DENSIFIED_VERTICES - n) as f64);

    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let len = segment_length(a, b);
        out.push(a);

        if len.is_finite() && len > max {
            let parts = (len / max).ceil() as usize;

            for k in 1..parts {
                let t = k as f64 / parts as f64;
                out.push([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
            }
        }
    }

    *points = out;
}

/// Inserts `count` midpoints, one at a time, into the current longest edge.
fn add_points(points: &mut Vec<Coord>, count: usize) {
    for _ in 0..count {
        let n = points.len();

        if n == 0 {
            return;
        }

        let longest = (0..n)
            .map(|i| (i, segment_length(points[i], points[(i + 1) % n])))
            .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0;

        let a = points[longest];
        let b = points[(longest + 1) % n];
        points.insert(longest + 1, [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]);
    }
}

/// Start offset of `to` minimizing total squared distance to `from`.
fn best_rotation(from: &[Coord], to: &[Coord]) -> usize {
    let n = from.len().min(to.len());
    let mut best = (0, f64::INFINITY);

    for offset in 0..n {
        let cost: f64 = (0..n)
            .map(|i| {
                let [ax, ay] = from[i];
                let [bx, by] = to[(i + offset) % n];
                (bx - ax).powi(2) + (by - ay).powi(2)
            })
            .sum();

        if cost < best.1 {
            best = (offset, cost);
        }
    }

    best.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Always,
    /// Hidden once the factor passes `1 - ε`.
    UntilEnd,
    /// Hidden while the factor is below `ε`.
    AfterStart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RingInterpolator {
    morph: RingMorph,
    visibility: Visibility,
}

impl RingInterpolator {
    pub fn from_pair(pair: &RingPair, max_segment_length: Option<f64>) -> Self {
        match pair {
            RingPair::Matched { from, to } => Self {
                morph: RingMorph::new(from, to, max_segment_length),
                visibility: Visibility::Always,
            },
            RingPair::Disappearing { from } => Self {
                morph: RingMorph::new(from, &placeholder_ring(from), max_segment_length),
                visibility: Visibility::UntilEnd,
            },
            RingPair::Appearing { to } => Self {
                morph: RingMorph::new(&placeholder_ring(to), to, max_segment_length),
                visibility: Visibility::AfterStart,
            },
        }
    }

    pub fn interpolate(&self, factor: f64) -> Ring {
        self.morph.at(factor)
    }

    pub fn is_visible(&self, factor: f64) -> bool {
        let factor = clamp_factor(factor);

        match self.visibility {
            Visibility::Always => true,
            Visibility::UntilEnd => factor <= 1.0 - VISIBILITY_EPSILON,
            Visibility::AfterStart => factor >= VISIBILITY_EPSILON,
        }
    }
}

/// All ring interpolators of one region.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryInterpolator {
    rings: Vec<RingInterpolator>,
    multi_source: bool,
}

impl GeometryInterpolator {
    pub fn from_plan(plan: &RingPlan, max_segment_length: Option<f64>) -> Self {
        Self {
            rings: plan
                .pairs
                .iter()
                .map(|pair| RingInterpolator::from_pair(pair, max_segment_length))
                .collect(),
            multi_source: plan.multi_source,
        }
    }

    /// `Polygon` for a single pair from single-part sources.
    pub fn geometry_type(&self) -> GeometryType {
        if self.rings.len() == 1 && !self.multi_source {
            GeometryType::Polygon
        } else {
            GeometryType::MultiPolygon
        }
    }

    pub fn ring_interpolators(&self) -> &[RingInterpolator] {
        &self.rings
    }

    /// Visible, closed rings with at least four vertices.
    pub fn interpolate(&self, factor: f64) -> Vec<Ring> {
        let factor = clamp_factor(factor);

        self.rings
            .iter()
            .filter(|ring| ring.is_visible(factor))
            .map(|ring| {
                let mut out = ring.interpolate(factor);
                geometry::close_ring(&mut out);
                out
            })
            .filter(|ring| ring.len() >= 4)
            .collect()
    }

    /// `None` once every ring is hidden or collapsed.
    pub fn geometry(&self, factor: f64) -> Option<Geometry> {
        let rings = self.interpolate(factor);

        if rings.is_empty() {
            return None;
        }

        let kind = if rings.len() == 1 && !self.multi_source {
            GeometryType::Polygon
        } else {
            GeometryType::MultiPolygon
        };

        Some(Geometry::from_rings(rings, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Ring {
        vec![[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]
    }

    fn triangle() -> Ring {
        vec![[0.0, 0.0], [4.0, 0.0], [2.0, 3.0], [0.0, 0.0]]
    }

    fn max_step(a: &Ring, b: &Ring) -> f64 {
        a.iter()
            .zip(b)
            .map(|(p, q)| segment_length(*p, *q))
            .fold(0.0, f64::max)
    }

    #[test]
    fn endpoints_reproduce_sources() {
        let morph = RingMorph::new(&triangle(), &square(10.0, 10.0, 2.0), None);

        assert_eq!(morph.at(0.0), triangle());
        assert_eq!(morph.at(1.0), square(10.0, 10.0, 2.0));
        assert_eq!(morph.at(-3.0), triangle());
        assert_eq!(morph.at(7.0), square(10.0, 10.0, 2.0));
    }

    #[test]
    fn endpoints_close_open_input() {
        let open = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        let morph = RingMorph::new(&open, &square(0.0, 0.0, 1.0), None);

        assert_eq!(morph.at(0.0).len(), 4);
        assert_eq!(morph.at(0.0).first(), morph.at(0.0).last());
    }

    #[test]
    fn resampling_equalizes_vertex_counts() {
        let morph = RingMorph::new(&triangle(), &square(0.0, 0.0, 4.0), None);
        assert_eq!(morph.vertex_count(), 4);

        let mid = morph.at(0.5);
        assert_eq!(mid.len(), 5);
        assert_eq!(mid.first(), mid.last());
    }

    #[test]
    fn densify_respects_max_segment() {
        let morph = RingMorph::new(&square(0.0, 0.0, 10.0), &square(0.0, 0.0, 10.0), Some(2.5));
        assert_eq!(morph.vertex_count(), 16);

        let ring = morph.at(0.5);
        for pair in ring.windows(2) {
            assert!(segment_length(pair[0], pair[1]) <= 2.5 + 1e-9);
        }
    }

    #[test]
    fn densify_is_capped_for_tiny_segments() {
        let morph = RingMorph::new(&square(0.0, 0.0, 10.0), &triangle(), Some(1e-9));

        assert!(morph.vertex_count() <= MAX_DENSIFIED_VERTICES + 4);
        assert!(morph.vertex_count() > 1000);
    }

    #[test]
    fn identical_rings_stay_put() {
        let morph = RingMorph::new(&square(0.0, 0.0, 1.0), &square(0.0, 0.0, 1.0), None);
        assert_eq!(morph.at(0.5), square(0.0, 0.0, 1.0));
    }

    #[test]
    fn opposite_winding_is_aligned() {
        let mut reversed = square(0.0, 0.0, 1.0);
        reversed.reverse();
        let morph = RingMorph::new(&square(0.0, 0.0, 1.0), &reversed, None);

        assert_eq!(morph.at(0.5), square(0.0, 0.0, 1.0));
    }

    #[test]
    fn continuous_in_factor() {
        let morph = RingMorph::new(&triangle(), &square(5.0, 5.0, 3.0), None);
        let mut prev = morph.at(0.01);

        for i in 2..100 {
            let next = morph.at(i as f64 / 100.0);
            assert!(max_step(&prev, &next) < 0.5, "jump at step {i}");
            prev = next;
        }
    }

    #[test]
    fn placeholder_is_small_square_at_centroid() {
        let ring = placeholder_ring(&square(0.0, 0.0, 100.0));

        assert_eq!(ring.len(), 5);
        assert!(segment_length(ring[0], [39.0, 39.0]) < 1e-9);
        assert!(segment_length(ring[2], [41.0, 41.0]) < 1e-9);
    }

    #[test]
    fn placeholder_has_minimum_size() {
        let point = vec![[3.0, 3.0], [3.0, 3.0], [3.0, 3.0], [3.0, 3.0]];
        let ring = placeholder_ring(&point);

        assert!(ring[2][0] - ring[0][0] > 0.0);
    }

    #[test]
    fn disappearing_ring_hides_near_end() {
        let pair = RingPair::Disappearing {
            from: square(0.0, 0.0, 10.0),
        };
        let ring = RingInterpolator::from_pair(&pair, None);

        assert!(ring.is_visible(0.0));
        assert!(ring.is_visible(0.5));
        assert!(ring.is_visible(1.0 - VISIBILITY_EPSILON));
        assert!(!ring.is_visible(1.0 - VISIBILITY_EPSILON / 2.0));
        assert!(!ring.is_visible(1.0));

        let mid = ring.interpolate(0.5);
        let span = geometry::Extent::of_coords(mid.iter().copied()).unwrap();
        assert!(span.width() < 10.0 && span.width() > 0.2);
    }

    #[test]
    fn appearing_ring_hides_near_start() {
        let pair = RingPair::Appearing {
            to: square(0.0, 0.0, 10.0),
        };
        let ring = RingInterpolator::from_pair(&pair, None);

        assert!(!ring.is_visible(0.0));
        assert!(!ring.is_visible(VISIBILITY_EPSILON / 2.0));
        assert!(ring.is_visible(VISIBILITY_EPSILON));
        assert!(ring.is_visible(1.0));
        assert_eq!(ring.interpolate(1.0), square(0.0, 0.0, 10.0));
    }

    #[test]
    fn matched_ring_always_visible() {
        let pair = RingPair::Matched {
            from: square(0.0, 0.0, 1.0),
            to: square(1.0, 1.0, 1.0),
        };
        let ring = RingInterpolator::from_pair(&pair, None);

        assert!((0..=10).all(|i| ring.is_visible(i as f64 / 10.0)));
    }

    #[test]
    fn geometry_type_follows_sources() {
        let single = Geometry::Polygon(vec![square(0.0, 0.0, 1.0)]);
        let plan = pairing::diff(Some(&single), Some(&single)).unwrap();
        let interp = GeometryInterpolator::from_plan(&plan, None);

        assert_eq!(interp.geometry_type(), GeometryType::Polygon);
        assert!(matches!(interp.geometry(0.3), Some(Geometry::Polygon(_))));

        let multi = Geometry::MultiPolygon(vec![
            vec![square(0.0, 0.0, 1.0)],
            vec![square(5.0, 0.0, 1.0)],
        ]);
        let plan = pairing::diff(Some(&single), Some(&multi)).unwrap();
        let interp = GeometryInterpolator::from_plan(&plan, None);

        assert_eq!(interp.geometry_type(), GeometryType::MultiPolygon);
        match interp.geometry(1.0) {
            Some(Geometry::MultiPolygon(polys)) => assert_eq!(polys.len(), 2),
            other => panic!("expected MultiPolygon, got {other:?}"),
        }
        match interp.geometry(0.0) {
            Some(Geometry::MultiPolygon(polys)) => assert_eq!(polys.len(), 1),
            other => panic!("expected MultiPolygon, got {other:?}"),
        }
    }

    #[test]
    fn fully_hidden_region_has_no_geometry() {
        let single = Geometry::Polygon(vec![square(0.0, 0.0, 1.0)]);
        let plan = pairing::diff(Some(&single), None).unwrap();
        let interp = GeometryInterpolator::from_plan(&plan, None);

        assert!(interp.geometry(0.5).is_some());
        assert!(interp.geometry(1.0).is_none());
    }

    #[test]
    fn nan_factor_clamps_to_regular() {
        assert_eq!(clamp_factor(f64::NAN), 0.0);
        assert_eq!(clamp_factor(1.5), 1.0);
    }
}
