use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::delimited::RecordTokenizer;
use crate::enrich::{coerce_number, number_value};
use crate::error::{MorphError, Result};
use crate::geometry::{Extent, Feature, FeatureCollection, Geometry, Properties, Row, region_id};

const GEOJSON_TYPES: [&str; 2] = ["FeatureCollection", "Feature"];

pub const MAX_CELL_PADDING: f64 = 0.49;

#[derive(Debug, Clone)]
pub enum CartogramInput {
    Geometry(FeatureCollection),
    RecordRows(Vec<Row>),
    DelimitedText(String),
    RecordsWrapper(Vec<Row>),
}

impl CartogramInput {
    /// Decides the input kind from loosely typed JSON. Strings are treated as
    /// delimited text.
    pub fn sniff(value: Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(CartogramInput::DelimitedText(text)),
            Value::Array(items) => Ok(CartogramInput::RecordRows(rows_of(items)?)),
            Value::Object(mut obj) => {
                let kind = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_default();

                if GEOJSON_TYPES.contains(&kind.as_str()) {
                    let collection = if kind == "Feature" {
                        FeatureCollection::new(vec![serde_json::from_value(Value::Object(obj))?])
                    } else {
                        serde_json::from_value(Value::Object(obj))?
                    };

                    return Ok(CartogramInput::Geometry(collection));
                }

                match obj.remove("records") {
                    Some(Value::Array(items)) => {
                        Ok(CartogramInput::RecordsWrapper(rows_of(items)?))
                    }
                    _ => Err(MorphError::UnsupportedCartogramInput(format!(
                        "object without recognized `type` or `records` (type = {kind:?})"
                    ))),
                }
            }
            other => Err(MorphError::UnsupportedCartogramInput(format!(
                "expected object, array or text, got {other}"
            ))),
        }
    }
}

fn rows_of(items: Vec<Value>) -> Result<Vec<Row>> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            _ => Err(MorphError::UnsupportedCartogramInput(format!(
                "record {i} is not an object"
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOrientation {
    /// Row 0 sits at the top of the extent.
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColOrientation {
    /// Column 0 sits at the left of the extent.
    #[default]
    Left,
    Right,
}

/// Extra properties derived from the source record, merged last.
pub type PropertyMapper = Arc<dyn Fn(&Row) -> Properties + Send + Sync>;

#[derive(Clone)]
pub struct GridOptions {
    /// Falls back to the regular geography's bounding box.
    pub extent: Option<Extent>,
    /// Fraction of each cell's width and height removed symmetrically.
    pub cell_padding: f64,
    pub row_orientation: RowOrientation,
    pub col_orientation: ColOrientation,
    pub row_field: String,
    pub col_field: String,
    /// Falls back to the engine's join column.
    pub key_field: Option<String>,
    pub include_source_properties: bool,
    pub property_mapper: Option<PropertyMapper>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            extent: None,
            cell_padding: 0.05,
            row_orientation: RowOrientation::Top,
            col_orientation: ColOrientation::Left,
            row_field: "row".into(),
            col_field: "col".into(),
            key_field: None,
            include_source_properties: false,
            property_mapper: None,
        }
    }
}

impl fmt::Debug for GridOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridOptions")
            .field("extent", &self.extent)
            .field("cell_padding", &self.cell_padding)
            .field("row_orientation", &self.row_orientation)
            .field("col_orientation", &self.col_orientation)
            .field("row_field", &self.row_field)
            .field("col_field", &self.col_field)
            .field("key_field", &self.key_field)
            .field("include_source_properties", &self.include_source_properties)
            .field("property_mapper", &self.property_mapper.is_some())
            .finish()
    }
}

/// Inputs shared by every normalization path.
pub struct NormalizeContext<'a> {
    pub regular: &'a FeatureCollection,
    pub key_field: &'a str,
    pub join_property: &'a str,
    pub options: &'a GridOptions,
    pub tokenizer: &'a dyn RecordTokenizer,
}

pub fn normalize(input: &CartogramInput, ctx: &NormalizeContext<'_>) -> Result<FeatureCollection> {
    let records = match input {
        CartogramInput::Geometry(collection) => return Ok(collection.clone()),
        CartogramInput::RecordRows(rows) | CartogramInput::RecordsWrapper(rows) => rows.clone(),
        CartogramInput::DelimitedText(text) => ctx.tokenizer.tokenize(text)?,
    };

    let extent = ctx
        .options
        .extent
        .or_else(|| ctx.regular.extent())
        .filter(Extent::is_usable)
        .ok_or(MorphError::UnresolvableExtent)?;

    build_grid(&records, ctx.key_field, ctx.join_property, extent, ctx.options)
}

struct GridCell<'a> {
    key: String,
    row: f64,
    col: f64,
    source: &'a Row,
}

/// One padded square per record, laid out over `extent`.
pub fn build_grid(
    records: &[Row],
    key_field: &str,
    join_property: &str,
    extent: Extent,
    options: &GridOptions,
) -> Result<FeatureCollection> {
    if records.is_empty() {
        return Err(MorphError::EmptyGrid);
    }

    if !extent.is_usable() {
        return Err(MorphError::UnresolvableExtent);
    }

    let cells = records
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let index_of = |field: &str| {
                source
                    .get(field)
                    .and_then(coerce_number)
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| MorphError::NonNumericGridIndex {
                        index,
                        field: field.to_string(),
                    })
            };

            let key = source
                .get(key_field)
                .and_then(region_id)
                .ok_or_else(|| MorphError::MissingGridKey {
                    index,
                    field: key_field.to_string(),
                })?;

            Ok(GridCell {
                key,
                row: index_of(&options.row_field)?,
                col: index_of(&options.col_field)?,
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (min_row, max_row) = range(cells.iter().map(|c| c.row));
    let (min_col, max_col) = range(cells.iter().map(|c| c.col));
    let row_count = max_row - min_row + 1.0;
    let col_count = max_col - min_col + 1.0;

    if !row_count.is_finite() || row_count < 1.0 {
        return Err(MorphError::DegenerateGrid { axis: "row" });
    }

    if !col_count.is_finite() || col_count < 1.0 {
        return Err(MorphError::DegenerateGrid { axis: "col" });
    }

    let cell_w = extent.width() / col_count;
    let cell_h = extent.height() / row_count;
    let padding = options.cell_padding.clamp(0.0, MAX_CELL_PADDING);
    let pad_x = cell_w * padding;
    let pad_y = cell_h * padding;

    let features = cells
        .into_iter()
        .map(|cell| {
            let r = cell.row - min_row;
            let c = cell.col - min_col;

            let x0 = match options.col_orientation {
                ColOrientation::Left => extent.min_x + c * cell_w,
                ColOrientation::Right => extent.max_x - (c + 1.0) * cell_w,
            };
            let y0 = match options.row_orientation {
                RowOrientation::Top => extent.max_y - (r + 1.0) * cell_h,
                RowOrientation::Bottom => extent.min_y + r * cell_h,
            };

            let (left, right) = (x0 + pad_x, x0 + cell_w - pad_x);
            let (bottom, top) = (y0 + pad_y, y0 + cell_h - pad_y);
            let ring = vec![
                [left, bottom],
                [right, bottom],
                [right, top],
                [left, top],
                [left, bottom],
            ];

            let mut properties = if options.include_source_properties {
                cell.source.clone()
            } else {
                Properties::new()
            };

            properties.insert(join_property.to_string(), Value::String(cell.key.clone()));
            properties.insert("grid_row".into(), number_value(cell.row));
            properties.insert("grid_col".into(), number_value(cell.col));

            if let Some(mapper) = &options.property_mapper {
                properties.extend(mapper(cell.source));
            }

            Feature::new(cell.key, properties, Geometry::Polygon(vec![ring]))
        })
        .collect::<Vec<_>>();

    debug!(cells = features.len(), rows = row_count, cols = col_count, "built grid cartogram");

    Ok(FeatureCollection::new(features))
}

fn range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::delimited::Rfc4180;
    use crate::geometry::Coord;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn unit_extent() -> Extent {
        Extent::from([0.0, 0.0, 10.0, 10.0])
    }

    fn cell_bounds(feature: &Feature) -> Extent {
        let ring = feature.geometry.outer_rings()[0];
        Extent::of_coords(ring.iter().copied()).unwrap()
    }

    fn grid_records() -> Vec<Row> {
        vec![
            row(json!({"code": "A", "row": 0, "col": 0})),
            row(json!({"code": "B", "row": 0, "col": 1})),
            row(json!({"code": "C", "row": 1, "col": 0})),
            row(json!({"code": "D", "row": 1, "col": 1})),
        ]
    }

    #[test]
    fn sniff_recognizes_each_shape() {
        let geo = json!({"type": "FeatureCollection", "features": []});
        assert!(matches!(CartogramInput::sniff(geo).unwrap(), CartogramInput::Geometry(_)));

        let rows = json!([{"code": "A", "row": 0, "col": 0}]);
        assert!(matches!(
            CartogramInput::sniff(rows).unwrap(),
            CartogramInput::RecordRows(r) if r.len() == 1
        ));

        let wrapped = json!({"records": [{"code": "A", "row": 0, "col": 0}]});
        assert!(matches!(
            CartogramInput::sniff(wrapped).unwrap(),
            CartogramInput::RecordsWrapper(_)
        ));

        let text = json!("code,row,col\nA,0,0\n");
        assert!(matches!(CartogramInput::sniff(text).unwrap(), CartogramInput::DelimitedText(_)));
    }

    #[test]
    fn sniff_rejects_other_shapes() {
        assert!(matches!(
            CartogramInput::sniff(json!(42)),
            Err(MorphError::UnsupportedCartogramInput(_))
        ));
        assert!(matches!(
            CartogramInput::sniff(json!({"type": "Topology"})),
            Err(MorphError::UnsupportedCartogramInput(_))
        ));
        assert!(CartogramInput::sniff(json!([1, 2])).is_err());
    }

    #[test]
    fn sniff_wraps_single_feature() {
        let feature = json!({
            "type": "Feature",
            "properties": {"code": "A"},
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}
        });

        match CartogramInput::sniff(feature).unwrap() {
            CartogramInput::Geometry(fc) => assert_eq!(fc.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cells_stay_inside_extent_and_do_not_overlap() {
        let options = GridOptions {
            cell_padding: 0.1,
            ..GridOptions::default()
        };
        let fc = build_grid(&grid_records(), "code", "code", unit_extent(), &options).unwrap();
        let bounds: Vec<Extent> = fc.features.iter().map(cell_bounds).collect();

        for b in &bounds {
            assert!(unit_extent().contains([b.min_x, b.min_y]));
            assert!(unit_extent().contains([b.max_x, b.max_y]));
            assert!((b.width() - 4.0).abs() < 1e-9);
        }

        for (i, a) in bounds.iter().enumerate() {
            for b in &bounds[i + 1..] {
                let overlap_x = a.min_x < b.max_x && b.min_x < a.max_x;
                let overlap_y = a.min_y < b.max_y && b.min_y < a.max_y;
                assert!(!(overlap_x && overlap_y), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn orientation_flags_flip_axes() {
        let records = grid_records();
        let top_left =
            build_grid(&records, "code", "code", unit_extent(), &GridOptions::default()).unwrap();
        let a = cell_bounds(&top_left.features[0]);
        assert!(a.min_x < 5.0 && a.min_y > 5.0, "row 0 col 0 should be top-left, got {a:?}");

        let flipped = GridOptions {
            row_orientation: RowOrientation::Bottom,
            col_orientation: ColOrientation::Right,
            ..GridOptions::default()
        };
        let bottom_right = build_grid(&records, "code", "code", unit_extent(), &flipped).unwrap();
        let a = cell_bounds(&bottom_right.features[0]);
        assert!(a.min_x > 5.0 && a.max_y < 5.0, "row 0 col 0 should be bottom-right, got {a:?}");
    }

    #[test]
    fn cell_ring_is_closed_square() {
        let records = grid_records();
        let fc = build_grid(&records[..1], "code", "code", unit_extent(), &GridOptions::default())
            .unwrap();
        let ring: &Vec<Coord> = fc.features[0].geometry.outer_rings()[0];

        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn properties_and_mapper() {
        let options = GridOptions {
            include_source_properties: true,
            property_mapper: Some(Arc::new(|r: &Row| {
                let mut p = Properties::new();
                let id = r.get("id").and_then(Value::as_str).unwrap_or_default();
                p.insert("label".into(), json!(format!("cell-{id}")));
                p
            })),
            ..GridOptions::default()
        };
        let records = vec![row(json!({"id": "X", "r": "2", "c": 3, "extra": true}))];
        let options = GridOptions {
            row_field: "r".into(),
            col_field: "c".into(),
            ..options
        };
        let fc = build_grid(&records, "id", "code", unit_extent(), &options).unwrap();
        let props = &fc.features[0].properties;

        assert_eq!(fc.features[0].id.as_deref(), Some("X"));
        assert_eq!(props["code"], "X");
        assert_eq!(props["grid_row"], 2);
        assert_eq!(props["grid_col"], 3);
        assert_eq!(props["extra"], true);
        assert_eq!(props["label"], "cell-X");
    }

    #[test]
    fn configuration_errors() {
        let extent = unit_extent();
        let options = GridOptions::default();

        assert!(matches!(
            build_grid(&[], "code", "code", extent, &options),
            Err(MorphError::EmptyGrid)
        ));

        let bad = vec![row(json!({"code": "A", "row": "x", "col": 0}))];
        assert!(matches!(
            build_grid(&bad, "code", "code", extent, &options),
            Err(MorphError::NonNumericGridIndex { index: 0, .. })
        ));

        let keyless = vec![row(json!({"row": 0, "col": 0}))];
        assert!(matches!(
            build_grid(&keyless, "code", "code", extent, &options),
            Err(MorphError::MissingGridKey { .. })
        ));

        let flat = Extent::from([0.0, 0.0, 0.0, 10.0]);
        assert!(matches!(
            build_grid(&grid_records(), "code", "code", flat, &options),
            Err(MorphError::UnresolvableExtent)
        ));
    }

    #[test]
    fn normalize_text_uses_regular_extent() {
        let regular = FeatureCollection::new(vec![Feature::new(
            "A",
            Properties::new(),
            Geometry::Polygon(vec![vec![
                [0.0, 0.0],
                [4.0, 0.0],
                [4.0, 2.0],
                [0.0, 2.0],
                [0.0, 0.0],
            ]]),
        )]);
        let options = GridOptions::default();
        let ctx = NormalizeContext {
            regular: &regular,
            key_field: "code",
            join_property: "code",
            options: &options,
            tokenizer: &Rfc4180::default(),
        };
        let input = CartogramInput::DelimitedText("code,row,col\nA,0,0\nB,0,1\n".into());
        let fc = normalize(&input, &ctx).unwrap();

        assert_eq!(fc.len(), 2);
        let b = cell_bounds(&fc.features[1]);
        assert!(b.min_x >= 2.0 && b.max_x <= 4.0);
    }

    #[test]
    fn excel_text_with_byte_order_mark_builds_grid() {
        let rows = Rfc4180::default().tokenize("\u{feff}code,row,col\nA,0,0\n").unwrap();
        let fc = build_grid(&rows, "code", "code", unit_extent(), &GridOptions::default()).unwrap();

        assert_eq!(fc.features[0].id.as_deref(), Some("A"));
        assert_eq!(fc.features[0].properties["code"], "A");
    }

    #[test]
    fn normalize_without_extent_fails() {
        let regular = FeatureCollection::default();
        let options = GridOptions::default();
        let ctx = NormalizeContext {
            regular: &regular,
            key_field: "code",
            join_property: "code",
            options: &options,
            tokenizer: &Rfc4180::default(),
        };
        let input = CartogramInput::RecordRows(grid_records());

        assert!(matches!(normalize(&input, &ctx), Err(MorphError::UnresolvableExtent)));
    }
}
