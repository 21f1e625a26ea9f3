use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Coord = [f64; 2];
pub type Ring = Vec<Coord>;
pub type RegionId = String;
pub type Properties = serde_json::Map<String, Value>;
/// One tabular record, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    Polygon,
    MultiPolygon,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawGeometry")]
pub enum Geometry {
    /// Outer ring first, holes after.
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
    GeometryCollection(Vec<Geometry>),
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Option<Value>,
    #[serde(default)]
    geometries: Option<Vec<Geometry>>,
}

impl TryFrom<RawGeometry> for Geometry {
    type Error = String;

    fn try_from(raw: RawGeometry) -> Result<Self, Self::Error> {
        let coordinates = || raw.coordinates.clone().ok_or("missing coordinates");

        match raw.kind.as_str() {
            "Polygon" => {
                let rings: Vec<Vec<Vec<f64>>> =
                    serde_json::from_value(coordinates()?).map_err(|e| e.to_string())?;
                polygon_rings(rings).map(Geometry::Polygon)
            }
            "MultiPolygon" => {
                let polygons: Vec<Vec<Vec<Vec<f64>>>> =
                    serde_json::from_value(coordinates()?).map_err(|e| e.to_string())?;
                polygons
                    .into_iter()
                    .map(polygon_rings)
                    .collect::<Result<_, _>>()
                    .map(Geometry::MultiPolygon)
            }
            "GeometryCollection" => Ok(Geometry::GeometryCollection(
                raw.geometries.unwrap_or_default(),
            )),
            other => Err(format!("unsupported geometry type `{other}`")),
        }
    }
}

/// Altitude and any further ordinates are dropped.
fn position(values: Vec<f64>) -> Result<Coord, String> {
    match values[..] {
        [x, y, ..] => Ok([x, y]),
        _ => Err(format!("position needs at least two numbers, got {}", values.len())),
    }
}

fn polygon_rings(rings: Vec<Vec<Vec<f64>>>) -> Result<Vec<Ring>, String> {
    rings
        .into_iter()
        .map(|ring| ring.into_iter().map(position).collect::<Result<Ring, String>>())
        .collect()
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Geometry", 2)?;

        match self {
            Geometry::Polygon(rings) => {
                state.serialize_field("type", "Polygon")?;
                state.serialize_field("coordinates", rings)?;
            }
            Geometry::MultiPolygon(polygons) => {
                state.serialize_field("type", "MultiPolygon")?;
                state.serialize_field("coordinates", polygons)?;
            }
            Geometry::GeometryCollection(geometries) => {
                state.serialize_field("type", "GeometryCollection")?;
                state.serialize_field("geometries", geometries)?;
            }
        }

        state.end()
    }
}

impl Geometry {
    /// Wraps rings as outer boundaries. `MultiPolygon` gets one polygon per ring.
    pub fn from_rings(mut rings: Vec<Ring>, kind: GeometryType) -> Self {
        match kind {
            GeometryType::Polygon if rings.len() == 1 => Geometry::Polygon(rings),
            GeometryType::Polygon if rings.is_empty() => Geometry::Polygon(Vec::new()),
            GeometryType::Polygon => Geometry::Polygon(vec![rings.swap_remove(0)]),
            GeometryType::MultiPolygon => {
                Geometry::MultiPolygon(rings.into_iter().map(|r| vec![r]).collect())
            }
        }
    }

    pub fn outer_rings(&self) -> Vec<&Ring> {
        match self {
            Geometry::Polygon(rings) => rings.first().into_iter().collect(),
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().filter_map(|rings| rings.first()).collect()
            }
            Geometry::GeometryCollection(geometries) => {
                geometries.iter().flat_map(Geometry::outer_rings).collect()
            }
        }
    }

    /// Anything other than a plain `Polygon` counts as multi-part.
    pub fn is_multi(&self) -> bool {
        !matches!(self, Geometry::Polygon(_))
    }

    pub fn map_coords(&self, f: &impl Fn(Coord) -> Coord) -> Geometry {
        let map_ring = |ring: &Ring| ring.iter().map(|&c| f(c)).collect::<Ring>();

        match self {
            Geometry::Polygon(rings) => Geometry::Polygon(rings.iter().map(map_ring).collect()),
            Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(map_ring).collect())
                    .collect(),
            ),
            Geometry::GeometryCollection(geometries) => Geometry::GeometryCollection(
                geometries.iter().map(|g| g.map_coords(f)).collect(),
            ),
        }
    }

    fn coords(&self) -> Box<dyn Iterator<Item = Coord> + '_> {
        match self {
            Geometry::Polygon(rings) => Box::new(rings.iter().flatten().copied()),
            Geometry::MultiPolygon(polygons) => {
                Box::new(polygons.iter().flatten().flatten().copied())
            }
            Geometry::GeometryCollection(geometries) => {
                Box::new(geometries.iter().flat_map(Geometry::coords))
            }
        }
    }

    /// Area-weighted centroid of the outer rings, falling back to the vertex
    /// mean when every ring is degenerate.
    pub fn centroid(&self) -> Option<Coord> {
        let rings = self.outer_rings();
        let mut area_sum = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;

        for ring in &rings {
            if let Some((area, [x, y])) = area_centroid(ring) {
                area_sum += area;
                cx += x * area;
                cy += y * area;
            }
        }

        if area_sum.abs() > f64::EPSILON {
            return Some([cx / area_sum, cy / area_sum]);
        }

        let all: Vec<Coord> = rings.into_iter().flat_map(|r| open(r).iter().copied()).collect();
        vertex_mean(&all)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_id"
    )]
    pub id: Option<RegionId>,
    #[serde(default, deserialize_with = "deserialize_properties")]
    pub properties: Properties,
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Coord>,
}

impl Feature {
    pub fn new(id: impl Into<RegionId>, properties: Properties, geometry: Geometry) -> Self {
        Self {
            id: Some(id.into()),
            properties,
            geometry,
            centroid: None,
        }
    }

    pub fn with_centroid(mut self) -> Self {
        self.centroid = self.geometry.centroid();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn extent(&self) -> Option<Extent> {
        Extent::of_coords(self.features.iter().flat_map(|f| f.geometry.coords()))
    }
}

/// Axis-aligned bounds `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl From<[f64; 4]> for Extent {
    fn from([min_x, min_y, max_x, max_y]: [f64; 4]) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

impl From<Extent> for [f64; 4] {
    fn from(e: Extent) -> Self {
        [e.min_x, e.min_y, e.max_x, e.max_y]
    }
}

impl Extent {
    /// Bounds over finite coordinates only; `None` if there are none.
    pub fn of_coords(coords: impl IntoIterator<Item = Coord>) -> Option<Self> {
        coords
            .into_iter()
            .filter(|[x, y]| x.is_finite() && y.is_finite())
            .fold(None, |acc: Option<Extent>, [x, y]| {
                Some(match acc {
                    None => Extent::from([x, y, x, y]),
                    Some(e) => Extent {
                        min_x: e.min_x.min(x),
                        min_y: e.min_y.min(y),
                        max_x: e.max_x.max(x),
                        max_y: e.max_y.max(y),
                    },
                })
            })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Finite with a positive area.
    pub fn is_usable(&self) -> bool {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());

        finite && self.width() > 0.0 && self.height() > 0.0
    }

    pub fn contains(&self, [x, y]: Coord) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// String ids pass through; numbers use their JSON rendering.
pub fn region_id(value: &Value) -> Option<RegionId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn is_closed(ring: &[Coord]) -> bool {
    matches!((ring.first(), ring.last()), (Some(a), Some(b)) if a == b)
}

/// Appends the first vertex when the ring is not already closed.
pub fn close_ring(ring: &mut Ring) {
    if let Some(&first) = ring.first() {
        if !is_closed(ring) || ring.len() == 1 {
            ring.push(first);
        }
    }
}

/// The ring without its closing vertex.
pub fn open(ring: &[Coord]) -> &[Coord] {
    if ring.len() > 1 && is_closed(ring) {
        &ring[..ring.len() - 1]
    } else {
        ring
    }
}

/// Arithmetic mean of the finite vertices.
pub fn vertex_mean(coords: &[Coord]) -> Option<Coord> {
    let (n, sx, sy) = coords
        .iter()
        .filter(|[x, y]| x.is_finite() && y.is_finite())
        .fold((0usize, 0.0, 0.0), |(n, sx, sy), [x, y]| (n + 1, sx + x, sy + y));

    (n > 0).then(|| [sx / n as f64, sy / n as f64])
}

/// Shoelace area, positive for counter-clockwise rings.
pub fn signed_area(ring: &[Coord]) -> f64 {
    let pts = open(ring);
    let n = pts.len();

    if n < 3 {
        return 0.0;
    }

    (0..n)
        .map(|i| {
            let [x0, y0] = pts[i];
            let [x1, y1] = pts[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum::<f64>()
        / 2.0
}

fn area_centroid(ring: &[Coord]) -> Option<(f64, Coord)> {
    let pts = open(ring);
    let n = pts.len();
    let area = signed_area(ring);

    if n < 3 || !area.is_finite() || area.abs() <= f64::EPSILON {
        return None;
    }

    let (mut cx, mut cy) = (0.0, 0.0);

    for i in 0..n {
        let [x0, y0] = pts[i];
        let [x1, y1] = pts[(i + 1) % n];
        let cross = x0 * y1 - x1 * y0;
        cx += (x0 + x1) * cross;
        cy += (y0 + y1) * cross;
    }

    let scale = 1.0 / (6.0 * area);
    Some((area.abs(), [cx * scale, cy * scale]))
}

fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RegionId>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(region_id))
}

fn deserialize_properties<'de, D: Deserializer<'de>>(d: D) -> Result<Properties, D::Error> {
    Ok(Option::<Properties>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Ring {
        vec![[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]
    }

    #[test]
    fn altitude_is_dropped() {
        let raw = json!({
            "type": "Feature",
            "properties": {"code": "A"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0, 0, 5], [1, 0, 5], [1, 1, 5.5], [0, 0, 5]]]
            }
        });
        let feature: Feature = serde_json::from_value(raw).unwrap();

        assert_eq!(
            feature.geometry,
            Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]])
        );

        let multi = json!({
            "type": "MultiPolygon",
            "coordinates": [[[[2, 3, 1, 9], [4, 3, 1, 9], [4, 4, 1, 9]]]]
        });
        let geometry: Geometry = serde_json::from_value(multi).unwrap();
        assert_eq!(geometry.outer_rings()[0][0], [2.0, 3.0]);
    }

    #[test]
    fn short_position_is_rejected() {
        let raw = json!({"type": "Polygon", "coordinates": [[[0, 0], [1], [1, 1], [0, 0]]]});
        assert!(serde_json::from_value::<Geometry>(raw).is_err());
    }

    #[test]
    fn parses_feature_collection() {
        let raw = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "id": 7,
                    "properties": {"code": "A"},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": null,
                    "geometry": {
                        "type": "MultiPolygon",
                        "coordinates": [
                            [[[0, 0], [1, 0], [1, 1], [0, 0]]],
                            [[[5, 5], [6, 5], [6, 6], [5, 5]]]
                        ]
                    }
                }
            ]
        });
        let fc: FeatureCollection = serde_json::from_value(raw).unwrap();

        assert_eq!(fc.len(), 2);
        assert_eq!(fc.features[0].id.as_deref(), Some("7"));
        assert!(fc.features[1].properties.is_empty());
        assert_eq!(fc.features[1].geometry.outer_rings().len(), 2);
        assert!(fc.features[1].geometry.is_multi());
    }

    #[test]
    fn rejects_unsupported_geometry() {
        let raw = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Point", "coordinates": [0, 0]}
        });
        assert!(serde_json::from_value::<Feature>(raw).is_err());
    }

    #[test]
    fn serializes_geojson_tags() {
        let geometry = Geometry::Polygon(vec![square(0.0, 0.0, 1.0)]);
        let feature = Feature::new("A", Properties::new(), geometry);
        let value = serde_json::to_value(FeatureCollection::new(vec![feature])).unwrap();

        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"][0]["type"], "Feature");
        assert_eq!(value["features"][0]["geometry"]["type"], "Polygon");
        assert!(value["features"][0].get("centroid").is_none());
    }

    #[test]
    fn close_ring_appends_first_vertex() {
        let mut ring = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        close_ring(&mut ring);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[3], [0.0, 0.0]);

        close_ring(&mut ring);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn centroid_of_square() {
        let geometry = Geometry::Polygon(vec![square(2.0, 4.0, 2.0)]);
        let [x, y] = geometry.centroid().unwrap();

        assert!((x - 3.0).abs() < 1e-12);
        assert!((y - 5.0).abs() < 1e-12);
    }

    #[test]
    fn centroid_weights_by_area() {
        let geometry = Geometry::MultiPolygon(vec![
            vec![square(0.0, 0.0, 2.0)],
            vec![square(10.0, 0.0, 1.0)],
        ]);
        let [x, _] = geometry.centroid().unwrap();

        // (1 * 4 + 10.5 * 1) / 5
        assert!((x - 2.9).abs() < 1e-12);
    }

    #[test]
    fn vertex_mean_skips_non_finite() {
        let mean = vertex_mean(&[[0.0, 0.0], [f64::NAN, 1.0], [2.0, 2.0]]).unwrap();
        assert_eq!(mean, [1.0, 1.0]);
        assert!(vertex_mean(&[]).is_none());
    }

    #[test]
    fn extent_of_collection() {
        let fc = FeatureCollection::new(vec![
            Feature::new("A", Properties::new(), Geometry::Polygon(vec![square(0.0, 0.0, 1.0)])),
            Feature::new("B", Properties::new(), Geometry::Polygon(vec![square(3.0, -1.0, 1.0)])),
        ]);
        let extent = fc.extent().unwrap();

        assert_eq!(<[f64; 4]>::from(extent), [0.0, -1.0, 4.0, 1.0]);
        assert!(extent.is_usable());
        assert!(FeatureCollection::default().extent().is_none());
    }

    #[test]
    fn from_rings_picks_type() {
        let single = Geometry::from_rings(vec![square(0.0, 0.0, 1.0)], GeometryType::Polygon);
        assert!(matches!(single, Geometry::Polygon(ref r) if r.len() == 1));

        let multi = Geometry::from_rings(
            vec![square(0.0, 0.0, 1.0), square(2.0, 0.0, 1.0)],
            GeometryType::MultiPolygon,
        );
        assert!(matches!(multi, Geometry::MultiPolygon(ref p) if p.len() == 2));
    }
}
