use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cartogram::{self, CartogramInput, GridOptions, NormalizeContext};
use crate::delimited::{RecordTokenizer, Rfc4180};
use crate::enrich::{AggregationSpec, Enrichment};
use crate::error::{LoadError, MorphError, Result};
use crate::geometry::{Feature, FeatureCollection, RegionId, Row};
use crate::interpolate::{self, GeometryInterpolator};
use crate::pairing;
use crate::projection::{self, Projection};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Zero-argument async loader for external rows.
pub type DataLoader =
    Box<dyn Fn() -> BoxFuture<std::result::Result<Vec<Row>, LoadError>> + Send + Sync>;

pub const MORPH_FACTOR_PROPERTY: &str = "morph_factor";

#[derive(Default)]
pub enum DataSource {
    #[default]
    None,
    Inline(Vec<Row>),
    /// Called at most once per engine unless the data is invalidated.
    Loader(DataLoader),
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::None => f.write_str("None"),
            DataSource::Inline(rows) => write!(f, "Inline({} rows)", rows.len()),
            DataSource::Loader(_) => f.write_str("Loader"),
        }
    }
}

#[derive(Clone)]
pub struct MorphConfig {
    /// Key column on the tabular side.
    pub join_column: String,
    /// Key property on the geometry side.
    pub join_property: String,
    pub aggregation: AggregationSpec,
    pub normalize: bool,
    /// Property reported in the summary. Defaults to the first aggregated column.
    pub primary_metric: Option<String>,
    pub grid: GridOptions,
    /// Densify boundaries before resampling. `None` keeps source vertices only.
    pub max_segment_length: Option<f64>,
    pub tokenizer: Arc<dyn RecordTokenizer>,
}

impl Default for MorphConfig {
    fn default() -> Self {
        Self {
            join_column: "code".into(),
            join_property: "code".into(),
            aggregation: AggregationSpec::default(),
            normalize: false,
            primary_metric: None,
            grid: GridOptions::default(),
            max_segment_length: None,
            tokenizer: Arc::new(Rfc4180::default()),
        }
    }
}

impl fmt::Debug for MorphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MorphConfig")
            .field("join_column", &self.join_column)
            .field("join_property", &self.join_property)
            .field("aggregation", &self.aggregation)
            .field("normalize", &self.normalize)
            .field("primary_metric", &self.primary_metric)
            .field("grid", &self.grid)
            .field("max_segment_length", &self.max_segment_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSummary {
    pub id: RegionId,
    pub primary_metric: Option<Value>,
    pub raw_feature: Feature,
}

/// Everything derived by one preparation. Never mutated afterwards.
struct Prepared {
    regular: FeatureCollection,
    cartogram: FeatureCollection,
    regular_lookup: HashMap<RegionId, Feature>,
    cartogram_lookup: HashMap<RegionId, Feature>,
    interpolators: Vec<(RegionId, GeometryInterpolator)>,
    summary: HashMap<RegionId, RegionSummary>,
}

/// Morphs a regular geography into its cartogram.
///
/// `prepare` is the only mutator and takes `&mut self`, so a single engine
/// can never be prepared concurrently. Every accessor hands out an owned
/// copy of the prepared state.
pub struct MorphEngine {
    regular: FeatureCollection,
    cartogram: CartogramInput,
    data: DataSource,
    projection: Arc<dyn Projection>,
    config: MorphConfig,
    rows: Option<Arc<Vec<Row>>>,
    prepared: Option<Arc<Prepared>>,
}

impl MorphEngine {
    pub fn new(
        regular: FeatureCollection,
        cartogram: CartogramInput,
        data: DataSource,
        projection: Arc<dyn Projection>,
        config: MorphConfig,
    ) -> Result<Self> {
        if regular.is_empty() {
            return Err(MorphError::MissingGeometry);
        }

        if let Some(max) = config.max_segment_length.filter(|m| !m.is_finite() || *m <= 0.0) {
            return Err(MorphError::InvalidSegmentLength(max));
        }

        Ok(Self {
            regular,
            cartogram,
            data,
            projection,
            config,
            rows: None,
            prepared: None,
        })
    }

    pub fn config(&self) -> &MorphConfig {
        &self.config
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Forgets memoized external rows so the next preparation loads again.
    pub fn invalidate_data(&mut self) {
        self.rows = None;
    }

    /// Rebuilds all derived state. On failure the previously prepared state,
    /// if any, stays in place.
    pub async fn prepare(&mut self) -> Result<()> {
        info!(regions = self.regular.len(), "preparing morph");

        let rows = self.resolve_rows().await?;
        let prepared = self.build(&rows)?;

        info!(
            regular = prepared.regular.len(),
            cartogram = prepared.cartogram.len(),
            interpolated = prepared.interpolators.len(),
            "morph prepared"
        );

        self.prepared = Some(Arc::new(prepared));
        Ok(())
    }

    async fn resolve_rows(&mut self) -> Result<Arc<Vec<Row>>> {
        if let Some(rows) = &self.rows {
            return Ok(Arc::clone(rows));
        }

        let rows = match &self.data {
            DataSource::None => Vec::new(),
            DataSource::Inline(rows) => rows.clone(),
            DataSource::Loader(load) => {
                debug!("loading external rows");
                load().await.map_err(MorphError::DataLoad)?
            }
        };

        debug!(rows = rows.len(), "external rows resolved");

        let rows = Arc::new(rows);
        self.rows = Some(Arc::clone(&rows));
        Ok(rows)
    }

    fn build(&self, rows: &[Row]) -> Result<Prepared> {
        let config = &self.config;
        let key_field = config.grid.key_field.as_deref().unwrap_or(&config.join_column);

        let cartogram_raw = cartogram::normalize(
            &self.cartogram,
            &NormalizeContext {
                regular: &self.regular,
                key_field,
                join_property: &config.join_property,
                options: &config.grid,
                tokenizer: config.tokenizer.as_ref(),
            },
        )?;

        let enrichment = Enrichment {
            join_column: &config.join_column,
            join_property: &config.join_property,
            spec: &config.aggregation,
            normalize: config.normalize,
        };
        let regular = enrichment.apply(&self.regular, rows)?;
        let cartogram = enrichment.apply(&cartogram_raw, rows)?;

        let regular = self.project(&regular);
        let cartogram = self.project(&cartogram);

        let regular_lookup = lookup(&regular);
        let cartogram_lookup = lookup(&cartogram);

        let mut seen = HashSet::new();
        let mut interpolators = Vec::new();

        for feature in &regular.features {
            let Some(id) = feature.id.clone() else {
                continue;
            };

            if !seen.insert(id.clone()) {
                warn!(region = id.as_str(), "duplicate region id, keeping first");
                continue;
            }

            let to = cartogram_lookup.get(&id).map(|f| &f.geometry);

            match pairing::diff(Some(&feature.geometry), to) {
                Some(plan) => interpolators.push((
                    id,
                    GeometryInterpolator::from_plan(&plan, config.max_segment_length),
                )),
                None => debug!(region = id.as_str(), "no usable rings, region skipped"),
            }
        }

        let cartogram_only = cartogram_lookup
            .keys()
            .filter(|id| !regular_lookup.contains_key(*id))
            .count();

        if cartogram_only > 0 {
            debug!(
                cartogram_only,
                "cartogram regions without a regular counterpart are not morphed"
            );
        }

        let metric = config
            .primary_metric
            .as_deref()
            .or_else(|| config.aggregation.first_column());

        let summary = regular_lookup
            .iter()
            .map(|(id, feature)| {
                let primary_metric = metric.and_then(|m| feature.properties.get(m)).cloned();
                let entry = RegionSummary {
                    id: id.clone(),
                    primary_metric,
                    raw_feature: feature.clone(),
                };
                (id.clone(), entry)
            })
            .collect();

        Ok(Prepared {
            regular,
            cartogram,
            regular_lookup,
            cartogram_lookup,
            interpolators,
            summary,
        })
    }

    fn project(&self, collection: &FeatureCollection) -> FeatureCollection {
        let mut projected = projection::project_collection(collection, self.projection.as_ref());

        for feature in &mut projected.features {
            feature.centroid = feature.geometry.centroid();
        }

        projected
    }

    fn state(&self) -> Result<&Prepared> {
        self.prepared.as_deref().ok_or(MorphError::NotPrepared)
    }

    pub fn regular_collection(&self) -> Result<FeatureCollection> {
        Ok(self.state()?.regular.clone())
    }

    pub fn cartogram_collection(&self) -> Result<FeatureCollection> {
        Ok(self.state()?.cartogram.clone())
    }

    pub fn regular_lookup(&self) -> Result<HashMap<RegionId, Feature>> {
        Ok(self.state()?.regular_lookup.clone())
    }

    pub fn cartogram_lookup(&self) -> Result<HashMap<RegionId, Feature>> {
        Ok(self.state()?.cartogram_lookup.clone())
    }

    pub fn summary(&self) -> Result<HashMap<RegionId, RegionSummary>> {
        Ok(self.state()?.summary.clone())
    }

    /// Morphed regions in regular-geography order.
    pub fn region_ids(&self) -> Result<Vec<RegionId>> {
        Ok(self
            .state()?
            .interpolators
            .iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    /// Regions whose rings are all hidden at `factor` are left out.
    pub fn interpolated_collection(&self, factor: f64) -> Result<FeatureCollection> {
        let state = self.state()?;
        let factor = interpolate::clamp_factor(factor);

        let features = state
            .interpolators
            .iter()
            .filter_map(|(id, interp)| {
                let geometry = interp.geometry(factor)?;
                let mut properties = state
                    .regular_lookup
                    .get(id)
                    .map(|f| f.properties.clone())
                    .unwrap_or_default();

                properties.insert(MORPH_FACTOR_PROPERTY.into(), Value::from(factor));

                Some(Feature::new(id.clone(), properties, geometry).with_centroid())
            })
            .collect();

        Ok(FeatureCollection::new(features))
    }

    pub fn interpolated_lookup(&self, factor: f64) -> Result<HashMap<RegionId, Feature>> {
        Ok(lookup(&self.interpolated_collection(factor)?))
    }
}

/// First feature wins on duplicate ids.
fn lookup(collection: &FeatureCollection) -> HashMap<RegionId, Feature> {
    let mut map = HashMap::with_capacity(collection.len());

    for feature in &collection.features {
        if let Some(id) = &feature.id {
            map.entry(id.clone()).or_insert_with(|| feature.clone());
        }
    }

    map
}
