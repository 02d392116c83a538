//! NASA EONET open natural-event catalogue. No numeric severity; every open
//! event is reported at Orange.

use serde_json::Value;

use super::{json_str, json_text, source_id, Source};
use crate::event::{AlertLevel, CanonicalEvent};

pub const DEFAULT_URL: &str = "https://eonet.gsfc.nasa.gov/api/v3/events?status=open&limit=5";

pub struct EonetSource {
    url: String,
}

impl EonetSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Default for EonetSource {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

fn category_code(category: &str) -> &'static str {
    match category {
        "wildfires" => "WF",
        "volcanoes" => "VO",
        "severeStorms" => "TC",
        "floods" => "FL",
        "landslides" => "LS",
        "drought" => "DR",
        "earthquakes" => "EQ",
        "seaLakeIce" => "IC",
        _ => "EV",
    }
}

impl Source for EonetSource {
    fn tag(&self) -> &'static str {
        "eonet"
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn records<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        doc.get("events")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }

    fn normalize(&self, record: &Value) -> Option<CanonicalEvent> {
        record.as_object()?;
        let id = source_id(self.tag(), record.get("id").and_then(json_text));
        let category = record
            .get("categories")
            .and_then(Value::as_array)
            .and_then(|c| c.first());
        let code = category
            .and_then(|c| json_str(c, "id"))
            .map(category_code)
            .unwrap_or("EV");
        let origin = category.and_then(|c| json_str(c, "title")).unwrap_or("EONET");
        let title = json_str(record, "title").unwrap_or("Unknown Event");
        CanonicalEvent::new(&id, code, title, origin, 0.0, AlertLevel::Orange).ok()
    }
}
