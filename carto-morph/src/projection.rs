use std::f64::consts::PI;

use crate::geometry::{Coord, Feature, FeatureCollection, Geometry};

/// Maps source coordinates to longitude/latitude. Output is not range checked.
pub trait Projection: Send + Sync {
    fn to_geo(&self, coord: Coord) -> Coord;
}

impl<F> Projection for F
where
    F: Fn(Coord) -> Coord + Send + Sync,
{
    fn to_geo(&self, coord: Coord) -> Coord {
        self(coord)
    }
}

/// Input already in longitude/latitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Projection for Identity {
    fn to_geo(&self, coord: Coord) -> Coord {
        coord
    }
}

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Inverse of spherical Web Mercator (EPSG:3857 metres).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl Projection for WebMercator {
    fn to_geo(&self, [x, y]: Coord) -> Coord {
        let lng = (x / WEB_MERCATOR_RADIUS).to_degrees();
        let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        [lng, lat]
    }
}

/// Inverse ellipsoidal Transverse Mercator (Snyder, USGS PP 1395, eqs. 8-18..8-25).
#[derive(Debug, Clone, Copy)]
pub struct TransverseMercator {
    pub semi_major: f64,
    pub inverse_flattening: f64,
    /// Degrees.
    pub origin_lat: f64,
    /// Degrees.
    pub central_meridian: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercator {
    const WGS84_A: f64 = 6_378_137.0;
    const WGS84_INV_F: f64 = 298.257_223_563;

    pub fn utm(zone: u8, north: bool) -> Self {
        Self {
            semi_major: Self::WGS84_A,
            inverse_flattening: Self::WGS84_INV_F,
            origin_lat: 0.0,
            central_meridian: f64::from(zone) * 6.0 - 183.0,
            scale: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }
    }

    /// OSGB36 National Grid. Output stays on the Airy 1830 datum.
    pub fn british_national_grid() -> Self {
        Self {
            semi_major: 6_377_563.396,
            inverse_flattening: 299.324_964_6,
            origin_lat: 49.0,
            central_meridian: -2.0,
            scale: 0.999_601_271_7,
            false_easting: 400_000.0,
            false_northing: -100_000.0,
        }
    }

    fn e2(&self) -> f64 {
        let f = 1.0 / self.inverse_flattening;
        f * (2.0 - f)
    }

    fn meridian_arc(&self, phi: f64) -> f64 {
        let e2 = self.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        self.semi_major
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
    }
}

impl Projection for TransverseMercator {
    fn to_geo(&self, [x, y]: Coord) -> Coord {
        let a = self.semi_major;
        let k0 = self.scale;
        let e2 = self.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let m = self.meridian_arc(self.origin_lat.to_radians()) + (y - self.false_northing) / k0;
        let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let root = (1.0 - e2).sqrt();
        let e1 = (1.0 - root) / (1.0 + root);

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = a / w.sqrt();
        let r1 = a * (1.0 - e2) / w.powf(1.5);
        let d = (x - self.false_easting) / (n1 * k0);

        let lat = phi1
            - (n1 * tan1 / r1)
                * (d.powi(2) / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);

        let lng = self.central_meridian.to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / cos1;

        [lng.to_degrees(), lat.to_degrees()]
    }
}

pub fn project_geometry(geometry: &Geometry, projection: &dyn Projection) -> Geometry {
    geometry.map_coords(&|c| projection.to_geo(c))
}

/// Projects the geometry and any centroid already attached.
pub fn project_feature(feature: &Feature, projection: &dyn Projection) -> Feature {
    Feature {
        id: feature.id.clone(),
        properties: feature.properties.clone(),
        geometry: project_geometry(&feature.geometry, projection),
        centroid: feature.centroid.map(|c| projection.to_geo(c)),
    }
}

pub fn project_collection(
    collection: &FeatureCollection,
    projection: &dyn Projection,
) -> FeatureCollection {
    FeatureCollection::new(
        collection
            .features
            .iter()
            .map(|f| project_feature(f, projection))
            .collect(),
    )
}
