//! Map coordinates for result rows.

use serde_json::Value as Json;

use crate::query::normalize::is_geometry_column;
use crate::query::Row;

/// Derives a (longitude, latitude) pair for a row.
///
/// Numeric `longitude`/`latitude` columns win. Otherwise the parsed
/// geometry column, matched in any letter case, is reduced to a single point.
pub fn derive_coordinates(row: &Row) -> Option<(f64, f64)> {
    let explicit = row
        .get("longitude")
        .and_then(Json::as_f64)
        .zip(row.get("latitude").and_then(Json::as_f64));
    if explicit.is_some() {
        return explicit;
    }

    row.iter()
        .find(|(column, _)| is_geometry_column(column))
        .and_then(|(_, geometry)| representative_point(geometry))
}

/// Reduces a GeoJSON geometry to one point.
///
/// A Point yields its coordinates. A Polygon yields the mean of the vertices
/// of its first ring, and a MultiPolygon the mean of the first ring of its
/// first polygon. The mean is taken over the vertices as listed, closing
/// vertex included; it is not an area centroid.
pub fn representative_point(geometry: &Json) -> Option<(f64, f64)> {
    let coordinates = geometry.get("coordinates")?;

    let point = match geometry.get("type")?.as_str()? {
        "Point" => position(coordinates)?,
        "Polygon" => ring_mean(coordinates.get(0)?)?,
        "MultiPolygon" => ring_mean(coordinates.get(0)?.get(0)?)?,
        _ => return None,
    };

    (point.0.is_finite() && point.1.is_finite()).then_some(point)
}

fn position(value: &Json) -> Option<(f64, f64)> {
    Some((value.get(0)?.as_f64()?, value.get(1)?.as_f64()?))
}

fn ring_mean(ring: &Json) -> Option<(f64, f64)> {
    let vertices = ring
        .as_array()?
        .iter()
        .map(position)
        .collect::<Option<Vec<_>>>()?;
    if vertices.is_empty() {
        return None;
    }

    let n = vertices.len() as f64;
    let (sum_x, sum_y) = vertices
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    Some((sum_x / n, sum_y / n))
}
