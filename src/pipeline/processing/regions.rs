//! Reference geography: region polygons and containment tests.

use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::BOUNDARY_TOLERANCE_DEG;

/// `(longitude, latitude)`, GeoJSON axis order.
pub type Point = (f64, f64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    fn from_points<'a>(points: impl Iterator<Item = &'a Point>) -> Option<Self> {
        let mut bbox: Option<BoundingBox> = None;
        for &(lon, lat) in points {
            bbox = Some(match bbox {
                None => BoundingBox {
                    min_lon: lon,
                    min_lat: lat,
                    max_lon: lon,
                    max_lat: lat,
                },
                Some(b) => BoundingBox {
                    min_lon: b.min_lon.min(lon),
                    min_lat: b.min_lat.min(lat),
                    max_lon: b.max_lon.max(lon),
                    max_lat: b.max_lat.max(lat),
                },
            });
        }
        bbox
    }

    fn contains(&self, (lon, lat): Point) -> bool {
        lon >= self.min_lon - BOUNDARY_TOLERANCE_DEG
            && lon <= self.max_lon + BOUNDARY_TOLERANCE_DEG
            && lat >= self.min_lat - BOUNDARY_TOLERANCE_DEG
            && lat <= self.max_lat + BOUNDARY_TOLERANCE_DEG
    }
}

/// Exterior ring plus optional holes. Rings are closed implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>, holes: Vec<Vec<Point>>) -> Self {
        Self { exterior, holes }
    }

    /// Boundary points (including hole edges) count as inside.
    pub fn contains(&self, point: Point) -> bool {
        if on_ring_edge(&self.exterior, point) {
            return true;
        }
        if !ring_contains(&self.exterior, point) {
            return false;
        }
        for hole in &self.holes {
            if on_ring_edge(hole, point) {
                return true;
            }
            if ring_contains(hole, point) {
                return false;
            }
        }
        true
    }
}

/// Even-odd ray casting.
fn ring_contains(ring: &[Point], (x, y): Point) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_ring_edge(ring: &[Point], point: Point) -> bool {
    let n = ring.len();
    if n < 2 {
        return false;
    }
    (0..n).any(|i| distance_to_segment(point, ring[i], ring[(i + 1) % n]) <= BOUNDARY_TOLERANCE_DEG)
}

fn distance_to_segment((px, py): Point, (ax, ay): Point, (bx, by): Point) -> f64 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// A named boundary from the reference geography.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub region_id: String,
    pub name: String,
    pub polygons: Vec<Polygon>,
    bbox: BoundingBox,
}

impl Region {
    /// Returns `None` when no polygon has a usable exterior ring.
    pub fn new(region_id: String, name: String, polygons: Vec<Polygon>) -> Option<Self> {
        let polygons: Vec<Polygon> = polygons
            .into_iter()
            .filter(|p| p.exterior.len() >= 3)
            .collect();
        let bbox = BoundingBox::from_points(polygons.iter().flat_map(|p| p.exterior.iter()))?;
        Some(Self {
            region_id,
            name,
            polygons,
            bbox,
        })
    }

    pub fn contains(&self, point: Point) -> bool {
        self.bbox.contains(point) && self.polygons.iter().any(|p| p.contains(point))
    }
}

/// Read-only region collection in canonical order (ascending `region_id`).
///
/// The order is fixed when the set is built, so lookups do not depend on the
/// order features appeared in the source file. When a point lies on a shared
/// boundary, the first region in this order wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSet {
    regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(mut regions: Vec<Region>) -> Self {
        regions.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        Self { regions }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn contains_id(&self, region_id: &str) -> bool {
        self.regions
            .binary_search_by(|r| r.region_id.as_str().cmp(region_id))
            .is_ok()
    }

    /// First region in canonical order containing the point.
    pub fn locate(&self, point: Point) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(point))
    }

    /// Build a region set from a GeoJSON `FeatureCollection`.
    ///
    /// `id_property` and `name_property` name the feature properties holding
    /// the stable identifier and display name. Features without an id or
    /// without Polygon/MultiPolygon geometry are skipped.
    pub fn from_geojson(doc: &Value, id_property: &str, name_property: &str) -> Result<Self, String> {
        if doc.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err("document is not a GeoJSON FeatureCollection".to_string());
        }
        let features = doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| "FeatureCollection has no features array".to_string())?;

        let mut regions = Vec::with_capacity(features.len());
        let mut skipped = 0usize;
        for (idx, feature) in features.iter().enumerate() {
            let props = feature.get("properties");
            let region_id = props
                .and_then(|p| p.get(id_property))
                .and_then(property_to_string);
            let Some(region_id) = region_id else {
                debug!(feature = idx, id_property, "Skipping feature without id");
                skipped += 1;
                continue;
            };
            let name = props
                .and_then(|p| p.get(name_property))
                .and_then(property_to_string)
                .unwrap_or_else(|| region_id.clone());

            let polygons = match feature.get("geometry").map(parse_geometry) {
                Some(Ok(polygons)) => polygons,
                Some(Err(reason)) => {
                    debug!(feature = idx, %reason, "Skipping feature with unusable geometry");
                    skipped += 1;
                    continue;
                }
                None => {
                    skipped += 1;
                    continue;
                }
            };
            match Region::new(region_id, name, polygons) {
                Some(region) => regions.push(region),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, kept = regions.len(), "Some region features were skipped");
        }
        if regions.is_empty() {
            return Err("no usable polygon features".to_string());
        }
        Ok(Self::new(regions))
    }
}

fn property_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_geometry(geometry: &Value) -> Result<Vec<Polygon>, String> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry without type")?;
    let coords = geometry.get("coordinates").ok_or("geometry without coordinates")?;
    match kind {
        "Polygon" => Ok(vec![parse_polygon(coords)?]),
        "MultiPolygon" => coords
            .as_array()
            .ok_or("MultiPolygon coordinates must be an array")?
            .iter()
            .map(parse_polygon)
            .collect(),
        other => Err(format!("unsupported geometry type {}", other)),
    }
}

fn parse_polygon(coords: &Value) -> Result<Polygon, String> {
    let rings = coords.as_array().ok_or("polygon coordinates must be an array")?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings.next().ok_or("polygon without rings")??;
    let holes = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn parse_ring(ring: &Value) -> Result<Vec<Point>, String> {
    let positions = ring.as_array().ok_or("ring must be an array")?;
    let mut points: Vec<Point> = positions
        .iter()
        .map(|pos| {
            let lon = pos.get(0).and_then(Value::as_f64);
            let lat = pos.get(1).and_then(Value::as_f64);
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok((lon, lat)),
                _ => Err("position must hold two numbers".to_string()),
            }
        })
        .collect::<Result<_, _>>()?;
    // GeoJSON repeats the first position; the containment test closes rings itself
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(id: &str, x0: f64, y0: f64, size: f64) -> Region {
        Region::new(
            id.to_string(),
            format!("Region {}", id),
            vec![Polygon::new(
                vec![(x0, y0), (x0 + size, y0), (x0 + size, y0 + size), (x0, y0 + size)],
                vec![],
            )],
        )
        .unwrap()
    }

    #[test]
    fn point_inside_and_outside() {
        let region = square("A", 0.0, 0.0, 1.0);
        assert!(region.contains((0.5, 0.5)));
        assert!(!region.contains((1.5, 0.5)));
        assert!(!region.contains((-0.0001, 0.5)));
    }

    #[test]
    fn boundary_counts_as_inside() {
        let region = square("A", 0.0, 0.0, 1.0);
        assert!(region.contains((1.0, 0.5)));
        assert!(region.contains((0.0, 0.0)));
        assert!(region.contains((1.0 + 1e-12, 0.5)));
    }

    #[test]
    fn holes_are_excluded() {
        let donut = Region::new(
            "D".to_string(),
            "Donut".to_string(),
            vec![Polygon::new(
                vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)],
                vec![vec![(1.0, 1.0), (3.0, 1.0), (3.0, 3.0), (1.0, 3.0)]],
            )],
        )
        .unwrap();
        assert!(donut.contains((0.5, 0.5)));
        assert!(!donut.contains((2.0, 2.0)));
        assert!(donut.contains((1.0, 2.0)));
    }

    #[test]
    fn shared_edge_goes_to_lowest_region_id() {
        // Supplied out of order on purpose
        let set = RegionSet::new(vec![square("B", 1.0, 0.0, 1.0), square("A", 0.0, 0.0, 1.0)]);
        let hit = set.locate((1.0, 0.5)).unwrap();
        assert_eq!(hit.region_id, "A");
        assert_eq!(set.locate((1.5, 0.5)).unwrap().region_id, "B");
        assert!(set.locate((5.0, 5.0)).is_none());
    }

    #[test]
    fn parses_feature_collection() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"GEOID": "27053", "NAME": "Hennepin"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"GEOID": 27123, "NAME": "Ramsey"},
                    "geometry": {"type": "MultiPolygon", "coordinates": [
                        [[[2.0, 0.0], [3.0, 0.0], [3.0, 1.0], [2.0, 0.0]]],
                        [[[4.0, 0.0], [5.0, 0.0], [5.0, 1.0], [4.0, 0.0]]]
                    ]}
                },
                {
                    "type": "Feature",
                    "properties": {"NAME": "No id"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"GEOID": "99999"},
                    "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
                }
            ]
        });
        let set = RegionSet::from_geojson(&doc, "GEOID", "NAME").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains_id("27053"));
        assert!(set.contains_id("27123"));
        let ramsey = set.iter().find(|r| r.region_id == "27123").unwrap();
        assert_eq!(ramsey.polygons.len(), 2);
        assert_eq!(ramsey.polygons[0].exterior.len(), 3);
    }

    #[test]
    fn rejects_non_feature_collections() {
        assert!(RegionSet::from_geojson(&json!({"type": "Feature"}), "GEOID", "NAME").is_err());
        let empty = json!({"type": "FeatureCollection", "features": []});
        assert!(RegionSet::from_geojson(&empty, "GEOID", "NAME").is_err());
    }
}
