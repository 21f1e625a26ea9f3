use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{MorphError, Result};
use crate::geometry::{Feature, FeatureCollection, Properties, RegionId, Row, region_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statistic {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    UniqueCount,
    /// Deduplicated raw values.
    Array,
    /// One `{column}_{value}` count column per distinct value.
    Categories,
    /// Accepted in configuration, contributes nothing.
    Unsupported(String),
}

impl From<&str> for Statistic {
    fn from(kind: &str) -> Self {
        match kind {
            "sum" => Statistic::Sum,
            "mean" => Statistic::Mean,
            "min" => Statistic::Min,
            "max" => Statistic::Max,
            "count" => Statistic::Count,
            "unique_count" => Statistic::UniqueCount,
            "array" => Statistic::Array,
            "categories" => Statistic::Categories,
            other => Statistic::Unsupported(other.to_string()),
        }
    }
}

/// `(values, feature) -> value`, evaluated per feature at merge time.
pub type Reducer = Arc<dyn Fn(&[Value], &Feature) -> Value + Send + Sync>;

#[derive(Clone)]
pub enum Aggregation {
    Statistic(Statistic),
    Custom(Reducer),
}

impl From<Statistic> for Aggregation {
    fn from(stat: Statistic) -> Self {
        Aggregation::Statistic(stat)
    }
}

impl fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Statistic(stat) => write!(f, "{stat:?}"),
            Aggregation::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Column to aggregation, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct AggregationSpec {
    columns: Vec<(String, Aggregation)>,
}

impl AggregationSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, aggregation: impl Into<Aggregation>) -> Self {
        self.columns.push((column.into(), aggregation.into()));
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Aggregation)> {
        self.columns.iter().map(|(c, a)| (c.as_str(), a))
    }

    pub fn first_column(&self) -> Option<&str> {
        self.columns.first().map(|(c, _)| c.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Integral values become JSON integers so they compare equal to literals.
pub fn number_value(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Value::from(v as i64)
    } else {
        serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn category_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rows grouped by join key, groups in first-seen order.
pub fn group_rows<'a>(rows: &'a [Row], join_column: &str) -> Vec<(RegionId, Vec<&'a Row>)> {
    let mut index: HashMap<RegionId, usize> = HashMap::new();
    let mut groups: Vec<(RegionId, Vec<&Row>)> = Vec::new();
    let mut keyless = 0usize;

    for row in rows {
        let Some(key) = row.get(join_column).and_then(region_id) else {
            keyless += 1;
            continue;
        };

        match index.get(&key) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }

    if keyless > 0 {
        debug!(keyless, column = join_column, "rows without join key ignored");
    }

    groups
}

fn column_values<'a>(group: &[&'a Row], column: &str) -> Vec<&'a Value> {
    group
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|v| is_present(v))
        .collect()
}

fn apply_statistic(stat: &Statistic, column: &str, group: &[&Row], out: &mut Properties) {
    let values = column_values(group, column);
    let numbers = || values.iter().filter_map(|v| coerce_number(v)).collect::<Vec<f64>>();

    match stat {
        Statistic::Sum => {
            let sum: f64 = values.iter().map(|v| coerce_number(v).unwrap_or(0.0)).sum();
            out.insert(column.into(), number_value(sum));
        }
        Statistic::Mean => {
            let nums = numbers();

            if !nums.is_empty() {
                let mean = nums.iter().sum::<f64>() / nums.len() as f64;
                out.insert(column.into(), number_value(mean));
            }
        }
        Statistic::Min => {
            if let Some(min) = numbers().into_iter().reduce(f64::min) {
                out.insert(column.into(), number_value(min));
            }
        }
        Statistic::Max => {
            if let Some(max) = numbers().into_iter().reduce(f64::max) {
                out.insert(column.into(), number_value(max));
            }
        }
        Statistic::Count => {
            out.insert(column.into(), Value::from(group.len()));
        }
        Statistic::UniqueCount => {
            let distinct: HashSet<String> = values.iter().map(|v| v.to_string()).collect();
            out.insert(column.into(), Value::from(distinct.len()));
        }
        Statistic::Array => {
            let mut seen = HashSet::new();
            let unique: Vec<Value> = values
                .iter()
                .filter(|v| seen.insert(v.to_string()))
                .map(|&v| v.clone())
                .collect();
            out.insert(column.into(), Value::Array(unique));
        }
        Statistic::Categories => {
            let mut counts: Vec<(String, u64)> = Vec::new();

            for value in &values {
                let label = category_label(value);

                match counts.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((label, 1)),
                }
            }

            for (label, n) in counts {
                out.insert(format!("{column}_{label}"), Value::from(n));
            }
        }
        Statistic::Unsupported(kind) => {
            debug!(column, kind = kind.as_str(), "unsupported statistic ignored");
        }
    }
}

/// Built-in statistics per key. Custom reducers need the feature and run
/// during the merge.
pub fn aggregate(
    rows: &[Row],
    join_column: &str,
    spec: &AggregationSpec,
) -> HashMap<RegionId, Properties> {
    group_rows(rows, join_column)
        .into_iter()
        .map(|(key, group)| {
            let mut props = Properties::new();

            for (column, aggregation) in spec.columns() {
                if let Aggregation::Statistic(stat) = aggregation {
                    apply_statistic(stat, column, &group, &mut props);
                }
            }

            (key, props)
        })
        .collect()
}

/// Min-max scales every all-numeric column to [0, 1] across keys. Constant
/// columns map to 0.5.
pub fn normalize_columns(aggregated: &mut HashMap<RegionId, Properties>) {
    let columns: HashSet<String> = aggregated.values().flat_map(|p| p.keys().cloned()).collect();

    for column in columns {
        let values: Option<Vec<f64>> = aggregated
            .values()
            .filter_map(|p| p.get(&column))
            .map(Value::as_f64)
            .collect();

        let Some(values) = values else {
            continue;
        };

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;

        for props in aggregated.values_mut() {
            if let Some(slot) = props.get_mut(&column) {
                let v = slot.as_f64().unwrap_or(min);
                let scaled = if span > 0.0 { (v - min) / span } else { 0.5 };
                *slot = number_value(scaled);
            }
        }
    }
}

/// Join configuration for one enrichment pass.
#[derive(Debug, Clone, Copy)]
pub struct Enrichment<'a> {
    /// Key column on the tabular side.
    pub join_column: &'a str,
    /// Key property on the geometry side.
    pub join_property: &'a str,
    pub spec: &'a AggregationSpec,
    pub normalize: bool,
}

impl Enrichment<'_> {
    /// Every output feature has its id set from the join property (or its
    /// existing id). A feature with neither is a configuration error.
    pub fn apply(&self, collection: &FeatureCollection, rows: &[Row]) -> Result<FeatureCollection> {
        let mut aggregated = if rows.is_empty() {
            HashMap::new()
        } else {
            aggregate(rows, self.join_column, self.spec)
        };

        if self.normalize {
            normalize_columns(&mut aggregated);
        }

        let groups: HashMap<RegionId, Vec<&Row>> = if rows.is_empty() {
            HashMap::new()
        } else {
            group_rows(rows, self.join_column).into_iter().collect()
        };

        let mut unmatched = 0usize;
        let mut features = Vec::with_capacity(collection.len());

        for (index, feature) in collection.features.iter().enumerate() {
            let key = feature
                .properties
                .get(self.join_property)
                .and_then(region_id)
                .or_else(|| feature.id.clone())
                .ok_or_else(|| MorphError::MissingJoinProperty {
                    index,
                    property: self.join_property.to_string(),
                })?;

            let mut enriched = feature.clone();
            enriched.id = Some(key.clone());

            match (aggregated.get(&key), groups.get(&key)) {
                (Some(props), Some(group)) => {
                    enriched.properties.extend(props.clone());

                    for (column, aggregation) in self.spec.columns() {
                        if let Aggregation::Custom(reducer) = aggregation {
                            let values: Vec<Value> =
                                column_values(group, column).into_iter().cloned().collect();
                            let value = reducer(&values, feature);
                            enriched.properties.insert(column.to_string(), value);
                        }
                    }
                }
                _ => unmatched += 1,
            }

            features.push(enriched);
        }

        if !rows.is_empty() {
            debug!(
                features = features.len(),
                keys = groups.len(),
                unmatched,
                "enriched feature collection"
            );
        }

        Ok(FeatureCollection::new(features))
    }
}
