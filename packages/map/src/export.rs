//! `GeoJSON` export of rendered markers.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value, feature::Id};

use crate::markers::Marker;

/// Converts one marker into a point feature.
///
/// Geometry is `[lng, lat]`; the marker key becomes the feature id and
/// everything else about the marker goes into `properties`.
#[must_use]
pub fn marker_feature(marker: &Marker) -> Feature {
    let mut properties = match serde_json::to_value(marker) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => JsonObject::new(),
    };
    properties.remove("position");
    properties.remove("key");

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![
            marker.position.lng,
            marker.position.lat,
        ]))),
        id: Some(Id::String(marker.key.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Converts a rendered marker list into a `FeatureCollection`, preserving
/// order.
#[must_use]
pub fn feature_collection(markers: &[Marker]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: markers.iter().map(marker_feature).collect(),
        foreign_members: None,
    }
}
