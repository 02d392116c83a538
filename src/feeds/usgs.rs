//! USGS earthquake GeoJSON summary feed.

use serde_json::Value;

use super::{json_str, json_text, source_id, Source};
use crate::event::{AlertLevel, CanonicalEvent};

pub const DEFAULT_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/4.5_day.geojson";

pub struct UsgsSource {
    url: String,
}

impl UsgsSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Default for UsgsSource {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

/// "10km SW of Tokyo, Japan" -> "Tokyo, Japan". Places without a distance
/// prefix are returned unchanged.
pub fn strip_distance_prefix(place: &str) -> &str {
    match place.find(" of ") {
        Some(pos) => place[pos + 4..].trim(),
        None => place,
    }
}

/// Trailing region of a place name: "Tokyo, Japan" -> "Japan".
fn region(place: &str) -> &str {
    match place.rfind(", ") {
        Some(pos) => place[pos + 2..].trim(),
        None => place,
    }
}

impl Source for UsgsSource {
    fn tag(&self) -> &'static str {
        "usgs"
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn normalize(&self, record: &Value) -> Option<CanonicalEvent> {
        record.as_object()?;
        let props = record.get("properties").filter(|p| p.is_object())?;
        let id = source_id(self.tag(), record.get("id").and_then(json_text));
        let magnitude = props.get("mag").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        let place = json_str(props, "place").unwrap_or("Unknown");
        let title = strip_distance_prefix(place);
        CanonicalEvent::new(
            &id,
            "EQ",
            title,
            region(title),
            magnitude,
            AlertLevel::from_magnitude(magnitude),
        )
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokyo_quake_is_red_with_stripped_title() {
        let record = json!({
            "id": "us7000abcd",
            "properties": { "mag": 7.2, "place": "10km SW of Tokyo" }
        });
        let ev = UsgsSource::default().normalize(&record).unwrap();
        assert_eq!(ev.id.as_str(), "usgs_us7000abcd");
        assert_eq!(ev.title.as_str(), "Tokyo");
        assert_eq!(ev.alert_level, AlertLevel::Red);
        assert_eq!(ev.kind.as_str(), "EQ");
    }

    #[test]
    fn missing_id_uses_unknown_fallback() {
        let record = json!({ "properties": { "mag": 4.6, "place": "Fiji region" } });
        let ev = UsgsSource::default().normalize(&record).unwrap();
        assert_eq!(ev.id.as_str(), "usgs_unknown");
        assert_eq!(ev.title.as_str(), "Fiji region");
        assert_eq!(ev.alert_level, AlertLevel::Green);
    }

    #[test]
    fn region_is_last_comma_part() {
        let record = json!({
            "id": "x",
            "properties": { "mag": 5.6, "place": "45 km NNE of Hualien City, Taiwan" }
        });
        let ev = UsgsSource::default().normalize(&record).unwrap();
        assert_eq!(ev.title.as_str(), "Hualien City, Taiwan");
        assert_eq!(ev.origin.as_str(), "Taiwan");
        assert_eq!(ev.alert_level, AlertLevel::Orange);
    }

    #[test]
    fn record_without_properties_is_skipped() {
        assert!(UsgsSource::default().normalize(&json!({"id": "x"})).is_none());
    }
}
