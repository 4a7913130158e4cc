use crate::types::{float_key, Boundary};
use anyhow::{anyhow, Context, Result};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Market polygons keyed by geographic join key. Immutable once loaded.
pub struct BoundaryCollection {
    join_property: String,
    boundaries: Vec<Boundary>,
    by_key: HashMap<String, usize>,
}

impl BoundaryCollection {
    pub fn new(join_property: &str, boundaries: Vec<Boundary>) -> Self {
        let mut by_key = HashMap::with_capacity(boundaries.len());
        for (i, boundary) in boundaries.iter().enumerate() {
            if by_key.insert(boundary.key.clone(), i).is_some() {
                warn!(key = %boundary.key, "duplicate boundary key, keeping the last feature");
            }
        }

        Self {
            join_property: join_property.to_string(),
            boundaries,
            by_key,
        }
    }

    pub fn join_property(&self) -> &str {
        &self.join_property
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Boundary> {
        self.by_key.get(key).map(|&i| &self.boundaries[i])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// GeoJSON features for `keys`, each tagged with the join property. Unknown keys are skipped.
    pub fn to_feature_collection<'a, I>(&self, keys: I) -> FeatureCollection
    where
        I: IntoIterator<Item = &'a str>,
    {
        let features = keys
            .into_iter()
            .filter_map(|key| self.get(key))
            .map(|boundary| {
                let mut properties = JsonObject::new();
                properties.insert(
                    self.join_property.clone(),
                    serde_json::Value::String(boundary.key.clone()),
                );
                Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(&boundary.geometry))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

/// Loads boundary polygons from a GeoJSON FeatureCollection.
pub fn load_boundaries(path: &Path, join_property: &str) -> Result<BoundaryCollection> {
    let boundaries = load_geojson(path, join_property)?;
    info!(path = %path.display(), features = boundaries.len(), "loaded market boundaries");
    Ok(BoundaryCollection::new(join_property, boundaries))
}

fn load_geojson(path: &Path, join_property: &str) -> Result<Vec<Boundary>> {
    let file = File::open(path).with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("Boundary GeoJSON must be a FeatureCollection")),
    };

    let mut boundaries = Vec::new();
    for feature in collection.features {
        let key = match feature.properties.as_ref().and_then(|props| props.get(join_property)) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) if n.is_f64() => {
                n.as_f64().map(float_key).unwrap_or_else(|| n.to_string())
            }
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => continue,
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let converted: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geometry for {}: {:?}", key, e))?;
                match converted {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            }
            None => continue,
        };

        boundaries.push(Boundary { key, geometry });
    }
    Ok(boundaries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::column_keys;
    use geo::polygon;
    use std::io::Write;

    pub(crate) fn square(key: &str, x: f64, y: f64) -> Boundary {
        Boundary {
            key: key.to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: x, y: y),
                (x: x + 1.0, y: y),
                (x: x + 1.0, y: y + 1.0),
                (x: x, y: y + 1.0),
                (x: x, y: y),
            ]]),
        }
    }

    pub(crate) fn collection() -> BoundaryCollection {
        BoundaryCollection::new(
            "GEOID",
            vec![square("10180", 0.0, 0.0), square("10420", 5.0, 5.0)],
        )
    }

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"GEOID": "10180"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": {"GEOID": 10420},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[5,5],[6,5],[6,6],[5,6],[5,5]]]]}},
            {"type": "Feature", "properties": {"GEOID": "99"},
             "geometry": {"type": "Point", "coordinates": [3, 3]}},
            {"type": "Feature", "properties": {"NAME": "no id"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}
        ]
    }"#;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_polygon_features_from_geojson() {
        let file = write_temp(".geojson", GEOJSON);
        let boundaries = load_boundaries(file.path(), "GEOID").unwrap();

        assert_eq!(boundaries.len(), 2);
        assert!(boundaries.contains_key("10180"));
        assert!(boundaries.contains_key("10420"));
        assert!(!boundaries.contains_key("99"));
    }

    #[test]
    fn rejects_non_collections_and_other_formats() {
        let file = write_temp(".geojson", r#"{"type": "Point", "coordinates": [0, 0]}"#);
        assert!(load_boundaries(file.path(), "GEOID").is_err());

        let file = write_temp(".kml", "<kml/>");
        assert!(load_boundaries(file.path(), "GEOID").is_err());
    }

    #[test]
    fn float_join_properties_match_integer_table_keys() {
        let file = write_temp(
            ".geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"GEOID": 10180.0},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
                {"type": "Feature", "properties": {"GEOID": 12.5},
                 "geometry": {"type": "Polygon", "coordinates": [[[2,2],[3,2],[3,3],[2,3],[2,2]]]}}
            ]}"#,
        );
        let boundaries = load_boundaries(file.path(), "GEOID").unwrap();

        let table = polars::df!("msa_number" => &[10180i64]).unwrap();
        let table_key = column_keys(&table, "msa_number").unwrap()[0].clone().unwrap();
        assert!(boundaries.contains_key(&table_key));
        assert!(boundaries.contains_key("12.5"));
        assert!(!boundaries.contains_key("10180.0"));
    }

    #[test]
    fn feature_collection_carries_join_property() {
        let boundaries = collection();
        let fc = boundaries.to_feature_collection(["10420", "missing"]);

        assert_eq!(fc.features.len(), 1);
        let props = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(props.get("GEOID"), Some(&serde_json::json!("10420")));
    }
}
