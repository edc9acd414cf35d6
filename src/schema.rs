use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FeedError;

/// The five item collections carried by every feed frame.
///
/// The serde names are the wire field names, so the same enum is used
/// in configuration files (`"categories": ["seed_stock"]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockCategory {
    #[serde(rename = "seed_stock")]
    Seed,
    #[serde(rename = "gear_stock")]
    Gear,
    #[serde(rename = "egg_stock")]
    Egg,
    #[serde(rename = "cosmetic_stock")]
    Cosmetic,
    #[serde(rename = "eventshop_stock")]
    EventShop,
}

impl StockCategory {
    pub const ALL: [StockCategory; 5] = [
        StockCategory::Seed,
        StockCategory::Gear,
        StockCategory::Egg,
        StockCategory::Cosmetic,
        StockCategory::EventShop,
    ];

    /// Human readable section title.
    pub fn label(self) -> &'static str {
        match self {
            StockCategory::Seed => "Seeds",
            StockCategory::Gear => "Gear",
            StockCategory::Egg => "Eggs",
            StockCategory::Cosmetic => "Cosmetics",
            StockCategory::EventShop => "Event Shop",
        }
    }
}

// ------------------------------------------------------------
// Snapshot
// ------------------------------------------------------------
//
// The normalized, immutable view of one inbound frame.
//
// IMPORTANT:
// - A snapshot is built from scratch for every frame and shared
//   as `Arc<Snapshot>`. Nothing mutates it after publication.
// - Consumers detect "new data arrived" by comparing
//   `sequence_id`, never by comparing contents.
//
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    pub seed_stock: Vec<Item>,
    pub gear_stock: Vec<Item>,
    pub egg_stock: Vec<Item>,
    pub cosmetic_stock: Vec<Item>,
    pub eventshop_stock: Vec<Item>,
    pub weather: Vec<WeatherCondition>,

    /// When the client built this snapshot
    pub captured_at: DateTime<Utc>,

    /// Strictly increasing per client, even for identical payloads
    pub sequence_id: SequenceId,
}

impl Snapshot {
    pub fn items(&self, category: StockCategory) -> &[Item] {
        match category {
            StockCategory::Seed => &self.seed_stock,
            StockCategory::Gear => &self.gear_stock,
            StockCategory::Egg => &self.egg_stock,
            StockCategory::Cosmetic => &self.cosmetic_stock,
            StockCategory::EventShop => &self.eventshop_stock,
        }
    }

    pub fn item_count(&self) -> usize {
        StockCategory::ALL.iter().map(|c| self.items(*c).len()).sum()
    }
}

/// Token distinguishing one published snapshot from the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SequenceId(pub u64);

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ------------------------------------------------------------
// Item
// ------------------------------------------------------------
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Item {
    /// Stable upstream identifier (`item_id`)
    pub id: String,

    /// Display name (`display_name`)
    pub name: String,

    /// Units in stock. Negative wire values are clamped to 0.
    pub quantity: u64,

    /// Icon reference, passed through untouched
    pub icon: String,

    /// Start of the validity window, if the upstream sent a parsable one
    pub available_from: Option<DateTime<Utc>>,

    /// End of the validity window
    pub available_until: Option<DateTime<Utc>>,
}

// ------------------------------------------------------------
// Weather condition
// ------------------------------------------------------------
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeatherCondition {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub active: bool,
}

// ------------------------------------------------------------
// Wire format
// ------------------------------------------------------------
//
// Raw upstream frame. Every collection is optional on the wire;
// absent and `null` both decode to an empty Vec.
//
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FeedFrame {
    #[serde(deserialize_with = "null_as_default")]
    pub seed_stock: Vec<WireItem>,
    #[serde(deserialize_with = "null_as_default")]
    pub gear_stock: Vec<WireItem>,
    #[serde(deserialize_with = "null_as_default")]
    pub egg_stock: Vec<WireItem>,
    #[serde(deserialize_with = "null_as_default")]
    pub cosmetic_stock: Vec<WireItem>,
    #[serde(deserialize_with = "null_as_default")]
    pub eventshop_stock: Vec<WireItem>,
    #[serde(deserialize_with = "null_as_default")]
    pub weather: Vec<WireWeather>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireItem {
    #[serde(deserialize_with = "null_as_default")]
    pub item_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(deserialize_with = "lenient_quantity")]
    pub quantity: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub icon: String,
    #[serde(rename = "Date_Start")]
    pub date_start: Option<String>,
    #[serde(rename = "Date_End")]
    pub date_end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireWeather {
    #[serde(deserialize_with = "null_as_default")]
    pub weather_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub weather_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub icon: String,
    #[serde(deserialize_with = "null_as_default")]
    pub active: bool,
}

impl FeedFrame {
    /// Decodes one raw frame.
    ///
    /// Accepts any UTF-8 JSON object. Unknown fields are ignored.
    /// Anything that is not an object (arrays, scalars, garbage) is a
    /// `FeedError::Parse`.
    pub fn decode(raw: &[u8]) -> Result<Self, FeedError> {
        let value: serde_json::Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(FeedError::Parse(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(FeedFrame::deserialize(value)?)
    }

    /// Builds a fresh snapshot. Consumes the frame so no storage is
    /// shared with any earlier snapshot.
    pub fn into_snapshot(self, sequence_id: SequenceId, captured_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            seed_stock: convert_items(self.seed_stock),
            gear_stock: convert_items(self.gear_stock),
            egg_stock: convert_items(self.egg_stock),
            cosmetic_stock: convert_items(self.cosmetic_stock),
            eventshop_stock: convert_items(self.eventshop_stock),
            weather: self
                .weather
                .into_iter()
                .map(|w| WeatherCondition {
                    id: w.weather_id,
                    name: w.weather_name,
                    icon: w.icon,
                    active: w.active,
                })
                .collect(),
            captured_at,
            sequence_id,
        }
    }
}

fn convert_items(raw: Vec<WireItem>) -> Vec<Item> {
    raw.into_iter()
        .map(|i| Item {
            id: i.item_id,
            name: i.display_name,
            quantity: i.quantity,
            icon: i.icon,
            available_from: parse_instant(i.date_start.as_deref()),
            available_until: parse_instant(i.date_end.as_deref()),
        })
        .collect()
}

/// Lenient RFC 3339 parse. Empty or malformed text is simply "unknown".
fn parse_instant(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Integer quantity; negatives become 0, fractional values are truncated.
fn lenient_quantity<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(n) = Option::<serde_json::Number>::deserialize(d)? else {
        return Ok(0);
    };
    if let Some(q) = n.as_u64() {
        return Ok(q);
    }
    if n.is_i64() {
        return Ok(0);
    }
    Ok(n.as_f64().map_or(0, |f| if f > 0.0 { f as u64 } else { 0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_of(raw: &str) -> Snapshot {
        FeedFrame::decode(raw.as_bytes())
            .unwrap()
            .into_snapshot(SequenceId(1), Utc::now())
    }

    #[test]
    fn carrot_seed_frame_fills_only_seed_stock() {
        let snap = snapshot_of(
            r#"{"seed_stock":[{"item_id":"s1","display_name":"Carrot Seed","quantity":5,"icon":"x","Date_Start":"","Date_End":""}]}"#,
        );

        assert_eq!(snap.seed_stock.len(), 1);
        let carrot = &snap.seed_stock[0];
        assert_eq!(carrot.id, "s1");
        assert_eq!(carrot.name, "Carrot Seed");
        assert_eq!(carrot.quantity, 5);
        assert_eq!(carrot.icon, "x");
        assert_eq!(carrot.available_from, None);
        assert_eq!(carrot.available_until, None);

        assert!(snap.gear_stock.is_empty());
        assert!(snap.egg_stock.is_empty());
        assert!(snap.cosmetic_stock.is_empty());
        assert!(snap.eventshop_stock.is_empty());
        assert!(snap.weather.is_empty());
    }

    #[test]
    fn empty_object_and_nulls_decode_to_empty_collections() {
        for raw in [
            "{}",
            r#"{"seed_stock":null,"gear_stock":null,"egg_stock":null,"cosmetic_stock":null,"eventshop_stock":null,"weather":null}"#,
        ] {
            let snap = snapshot_of(raw);
            assert_eq!(snap.item_count(), 0);
            assert!(snap.weather.is_empty());
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let snap = snapshot_of(r#"{"discord_invite":"x","weather":[{"weather_id":"rain","weather_name":"Rain","icon":"r","active":true,"duration":300}]}"#);
        assert_eq!(
            snap.weather,
            vec![WeatherCondition {
                id: "rain".into(),
                name: "Rain".into(),
                icon: "r".into(),
                active: true,
            }]
        );
    }

    #[test]
    fn negative_and_fractional_quantities_are_clamped() {
        let snap = snapshot_of(
            r#"{"gear_stock":[{"item_id":"g1","quantity":-3},{"item_id":"g2","quantity":2.9},{"item_id":"g3"}]}"#,
        );
        let q: Vec<u64> = snap.gear_stock.iter().map(|i| i.quantity).collect();
        assert_eq!(q, vec![0, 2, 0]);
    }

    #[test]
    fn validity_window_parses_rfc3339_and_tolerates_garbage() {
        let snap = snapshot_of(
            r#"{"egg_stock":[{"item_id":"e1","Date_Start":"2025-06-01T10:00:00Z","Date_End":"soon"}]}"#,
        );
        let egg = &snap.egg_stock[0];
        assert_eq!(
            egg.available_from.map(|d| d.to_rfc3339()),
            Some("2025-06-01T10:00:00+00:00".to_string())
        );
        assert_eq!(egg.available_until, None);
    }

    #[test]
    fn non_object_frames_are_parse_errors() {
        for raw in ["not json", "[1,2,3]", "42", "null", r#""hello""#] {
            match FeedFrame::decode(raw.as_bytes()) {
                Err(FeedError::Parse(_)) => {}
                other => panic!("{raw}: expected parse error, got {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_collection_type_is_a_parse_error() {
        assert!(matches!(
            FeedFrame::decode(br#"{"seed_stock":"lots"}"#),
            Err(FeedError::Parse(_))
        ));
    }

    #[test]
    fn items_accessor_maps_every_category() {
        let snap = snapshot_of(
            r#"{"seed_stock":[{"item_id":"a"}],"gear_stock":[{"item_id":"b"}],"egg_stock":[{"item_id":"c"}],"cosmetic_stock":[{"item_id":"d"}],"eventshop_stock":[{"item_id":"e"}]}"#,
        );
        let ids: Vec<&str> = StockCategory::ALL
            .iter()
            .map(|c| snap.items(*c)[0].id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(snap.item_count(), 5);
    }

    #[test]
    fn category_uses_wire_names_in_config() {
        let cats: Vec<StockCategory> =
            serde_json::from_str(r#"["eventshop_stock","egg_stock"]"#).unwrap();
        assert_eq!(cats, vec![StockCategory::EventShop, StockCategory::Egg]);
    }
}
