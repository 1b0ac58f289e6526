/// Catchment polygons and station membership.
///
/// Catchments are read from a GeoJSON FeatureCollection of Polygon or
/// MultiPolygon features in the station coordinate system. A station is a
/// member when it lies inside an exterior ring and outside that ring's
/// holes, or within `buffer_m` of any ring edge.

use serde_json::Value;
use std::path::Path;

use super::AnalysisError;
use crate::model::Station;

type Ring = Vec<(f64, f64)>;

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Ring,
    pub holes: Vec<Ring>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catchment {
    pub name: String,
    pub polygons: Vec<Polygon>,
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Even-odd ray casting; points exactly on an edge may go either way.
fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

fn ring_distance(ring: &[(f64, f64)], x: f64, y: f64) -> f64 {
    ring.windows(2)
        .map(|w| segment_distance((x, y), w[0], w[1]))
        .chain(match (ring.first(), ring.last()) {
            (Some(first), Some(last)) if ring.len() > 1 => Some(segment_distance((x, y), *last, *first)),
            _ => None,
        })
        .fold(f64::INFINITY, f64::min)
}

impl Polygon {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }

    /// Distance from the point to the nearest ring edge.
    pub fn boundary_distance(&self, x: f64, y: f64) -> f64 {
        std::iter::once(&self.exterior)
            .chain(&self.holes)
            .map(|r| ring_distance(r, x, y))
            .fold(f64::INFINITY, f64::min)
    }
}

impl Catchment {
    pub fn contains(&self, x: f64, y: f64, buffer_m: f64) -> bool {
        self.polygons.iter().any(|p| {
            p.contains(x, y) || (buffer_m > 0.0 && p.boundary_distance(x, y) <= buffer_m)
        })
    }

    /// Member stations, in the order given.
    pub fn filter_stations<'a>(&self, stations: &'a [Station], buffer_m: f64) -> Vec<&'a Station> {
        stations
            .iter()
            .filter(|s| self.contains(s.x, s.y, buffer_m))
            .collect()
    }

    pub fn member_ids(&self, stations: &[Station], buffer_m: f64) -> Vec<String> {
        self.filter_stations(stations, buffer_m)
            .into_iter()
            .map(|s| s.id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// GeoJSON
// ---------------------------------------------------------------------------

fn geometry_error(feature: usize, message: &str) -> AnalysisError {
    AnalysisError::Geometry(format!("feature {}: {}", feature, message))
}

fn parse_ring(value: &Value, feature: usize) -> Result<Ring, AnalysisError> {
    let points = value
        .as_array()
        .ok_or_else(|| geometry_error(feature, "ring is not an array"))?;
    points
        .iter()
        .map(|p| match p.as_array().map(|c| (c.first().and_then(Value::as_f64), c.get(1).and_then(Value::as_f64))) {
            Some((Some(x), Some(y))) => Ok((x, y)),
            _ => Err(geometry_error(feature, "position is not [x, y]")),
        })
        .collect()
}

fn parse_polygon(value: &Value, feature: usize) -> Result<Polygon, AnalysisError> {
    let rings = value
        .as_array()
        .ok_or_else(|| geometry_error(feature, "polygon is not an array of rings"))?;
    let mut rings = rings.iter().map(|r| parse_ring(r, feature));
    let exterior = rings
        .next()
        .ok_or_else(|| geometry_error(feature, "polygon has no exterior ring"))??;
    Ok(Polygon {
        exterior,
        holes: rings.collect::<Result<_, _>>()?,
    })
}

fn property_name(properties: &Value, field: &str) -> Option<String> {
    match properties.get(field)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_catchments(text: &str, name_field: &str) -> Result<Vec<Catchment>, AnalysisError> {
    let doc: Value = serde_json::from_str(text)?;
    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::Geometry("not a FeatureCollection".to_string()))?;

    let mut catchments = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let name = feature
            .get("properties")
            .and_then(|p| property_name(p, name_field))
            .ok_or_else(|| geometry_error(i, &format!("no '{}' property", name_field)))?;
        let geometry = feature
            .get("geometry")
            .ok_or_else(|| geometry_error(i, "no geometry"))?;
        let coordinates = geometry
            .get("coordinates")
            .ok_or_else(|| geometry_error(i, "no coordinates"))?;
        let polygons = match geometry.get("type").and_then(Value::as_str) {
            Some("Polygon") => vec![parse_polygon(coordinates, i)?],
            Some("MultiPolygon") => coordinates
                .as_array()
                .ok_or_else(|| geometry_error(i, "multipolygon is not an array"))?
                .iter()
                .map(|p| parse_polygon(p, i))
                .collect::<Result<_, _>>()?,
            other => {
                return Err(geometry_error(
                    i,
                    &format!("unsupported geometry type {:?}", other.unwrap_or("none")),
                ));
            }
        };
        catchments.push(Catchment { name, polygons });
    }
    Ok(catchments)
}

pub fn read_catchments(path: &Path, name_field: &str) -> Result<Vec<Catchment>, AnalysisError> {
    let text = std::fs::read_to_string(path)?;
    parse_catchments(&text, name_field)
}
