//! Coordinate reference systems: WGS84 geographic and UTM zones.
//!
//! UTM uses the Krüger series for the transverse Mercator projection, which is
//! accurate to well below a millimetre inside a zone.

use serde::{Deserialize, Serialize};

use crate::types::{Point, ShoreError, ShoreResult};

const WGS84_A: f64 = 6_378_137.0; // WGS84 semi-major axis
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Supported coordinate reference systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG:4326, x = longitude, y = latitude (degrees)
    Geographic,
    /// WGS84 / UTM zone (EPSG:326zz north, 327zz south)
    Utm { zone: u8, north: bool },
}

impl Crs {
    pub fn from_epsg(epsg: u32) -> ShoreResult<Self> {
        match epsg {
            4326 => Ok(Crs::Geographic),
            32601..=32660 => Ok(Crs::Utm { zone: (epsg - 32600) as u8, north: true }),
            32701..=32760 => Ok(Crs::Utm { zone: (epsg - 32700) as u8, north: false }),
            other => Err(ShoreError::Config(format!(
                "Unsupported spatial reference EPSG:{} (only 4326 and WGS84 UTM zones)",
                other
            ))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Geographic => 4326,
            Crs::Utm { zone, north: true } => 32600 + *zone as u32,
            Crs::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    /// UTM zone containing a lon/lat position
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8;
        Crs::Utm { zone, north: lat >= 0.0 }
    }

    /// Project to lon/lat degrees
    pub fn to_geographic(&self, p: Point) -> Point {
        match self {
            Crs::Geographic => p,
            Crs::Utm { zone, north } => {
                let (lon, lat) = utm_inverse(p.x, p.y, *zone, *north);
                Point::new(lon, lat)
            }
        }
    }

    /// Project from lon/lat degrees into this system
    pub fn from_geographic(&self, p: Point) -> Point {
        match self {
            Crs::Geographic => p,
            Crs::Utm { zone, north } => {
                let (e, n) = utm_forward(p.x, p.y, *zone, *north);
                Point::new(e, n)
            }
        }
    }
}

/// Reproject a single point
pub fn transform(p: Point, from: Crs, to: Crs) -> Point {
    if from == to {
        p
    } else {
        to.from_geographic(from.to_geographic(p))
    }
}

/// Reproject a point sequence between EPSG codes
pub fn transform_points(points: &[Point], from_epsg: u32, to_epsg: u32) -> ShoreResult<Vec<Point>> {
    if from_epsg == to_epsg {
        return Ok(points.to_vec());
    }
    let from = Crs::from_epsg(from_epsg)?;
    let to = Crs::from_epsg(to_epsg)?;
    Ok(points.iter().map(|p| transform(*p, from, to)).collect())
}

struct KrugerSeries {
    a_rect: f64,
    n: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

fn kruger() -> KrugerSeries {
    let n = WGS84_F / (2.0 - WGS84_F);
    let n2 = n * n;
    let n3 = n2 * n;
    KrugerSeries {
        a_rect: WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
        n,
        alpha: [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
            61.0 * n3 / 240.0,
        ],
        beta: [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
            n2 / 48.0 + n3 / 15.0,
            17.0 * n3 / 480.0,
        ],
        delta: [
            2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
            7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
            56.0 * n3 / 15.0,
        ],
    }
}

fn central_meridian(zone: u8) -> f64 {
    (zone as f64 * 6.0 - 183.0).to_radians()
}

fn utm_forward(lon: f64, lat: f64, zone: u8, north: bool) -> (f64, f64) {
    let k = kruger();
    let phi = lat.to_radians();
    let dlambda = lon.to_radians() - central_meridian(zone);

    let c = 2.0 * k.n.sqrt() / (1.0 + k.n);
    let t = (phi.sin().atanh() - c * (c * phi.sin()).atanh()).sinh();
    let xi_p = t.atan2(dlambda.cos());
    let eta_p = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_p;
    let mut eta = eta_p;
    for (j, alpha) in k.alpha.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        xi += alpha * (m * xi_p).sin() * (m * eta_p).cosh();
        eta += alpha * (m * xi_p).cos() * (m * eta_p).sinh();
    }

    let easting = UTM_FALSE_EASTING + UTM_K0 * k.a_rect * eta;
    let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
    let northing = false_northing + UTM_K0 * k.a_rect * xi;
    (easting, northing)
}

fn utm_inverse(easting: f64, northing: f64, zone: u8, north: bool) -> (f64, f64) {
    let k = kruger();
    let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
    let xi = (northing - false_northing) / (UTM_K0 * k.a_rect);
    let eta = (easting - UTM_FALSE_EASTING) / (UTM_K0 * k.a_rect);

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, beta) in k.beta.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        xi_p -= beta * (m * xi).sin() * (m * eta).cosh();
        eta_p -= beta * (m * xi).cos() * (m * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in k.delta.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        phi += delta * (m * chi).sin();
    }
    let lambda = central_meridian(zone) + eta_p.sinh().atan2(xi_p.cos());

    (lambda.to_degrees(), phi.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_epsg_roundtrip_codes() {
        assert_eq!(Crs::from_epsg(32756).unwrap(), Crs::Utm { zone: 56, north: false });
        assert_eq!(Crs::Utm { zone: 31, north: true }.epsg(), 32631);
        assert!(Crs::from_epsg(3857).is_err());
    }

    #[test]
    fn test_utm_central_meridian_equator() {
        // On the central meridian at the equator easting is the false easting
        let utm = Crs::Utm { zone: 31, north: true };
        let p = utm.from_geographic(Point::new(3.0, 0.0));
        assert_abs_diff_eq!(p.x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_utm_meridian_arc() {
        // Northing on the central meridian is k0 times the meridian arc (4 984 944.378 m to 45N)
        let utm = Crs::utm_for(-75.0, 45.0);
        assert_eq!(utm, Crs::Utm { zone: 18, north: true });
        let p = utm.from_geographic(Point::new(-75.0, 45.0));
        assert_abs_diff_eq!(p.x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, UTM_K0 * 4_984_944.378, epsilon = 0.01);
    }

    #[test]
    fn test_utm_southern_zone() {
        let utm = Crs::utm_for(151.3, -33.72);
        assert_eq!(utm, Crs::Utm { zone: 56, north: false });
        let p = utm.from_geographic(Point::new(151.3, -33.72));
        assert_abs_diff_eq!(p.x, 342_486.5, epsilon = 1.0);
        assert_abs_diff_eq!(p.y, 6_267_591.7, epsilon = 1.0);
    }

    #[test]
    fn test_forward_inverse_consistency() {
        let utm = Crs::Utm { zone: 56, north: false };
        let geo = Point::new(151.28, -33.71);
        let back = utm.to_geographic(utm.from_geographic(geo));
        assert_abs_diff_eq!(back.x, geo.x, epsilon = 1e-9);
        assert_abs_diff_eq!(back.y, geo.y, epsilon = 1e-9);
    }
}
