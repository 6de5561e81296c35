use crate::error::BookingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Property,
    Vehicle,
    Tour,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Vehicle => "vehicle",
            Self::Tour => "tour",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "property" => Ok(Self::Property),
            "vehicle" => Ok(Self::Vehicle),
            "tour" => Ok(Self::Tour),
            other => Err(BookingError::InvalidRequest(format!(
                "unknown item type '{}'",
                other
            ))),
        }
    }
}

/// Reference to a listing owned by the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookableItemRef {
    pub item_type: ItemType,
    pub item_id: String,
}

impl BookableItemRef {
    pub fn new(item_type: ItemType, item_id: impl Into<String>) -> Self {
        Self {
            item_type,
            item_id: item_id.into(),
        }
    }

    /// Stable key used to group reservations of the same item.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BookableItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.item_type, self.item_id)
    }
}

impl FromStr for BookableItemRef {
    type Err = BookingError;

    /// Parses `property/42` style references.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.trim().split_once('/').ok_or_else(|| {
            BookingError::InvalidRequest(format!("expected '<type>/<id>', got '{}'", s))
        })?;
        if id.is_empty() {
            return Err(BookingError::InvalidRequest(format!(
                "missing item id in '{}'",
                s
            )));
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    Night,
    Day,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    #[default]
    Flat,
    PerDay,
}

/// A purchasable add-on listed on an item (insurance, child seat, lunch...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOption {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub price_type: PriceType,
}

/// Pricing data read from the catalog at quote time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub item: BookableItemRef,
    pub price: Decimal,
    #[serde(default)]
    pub extra_guest_price: Option<Decimal>,
    pub currency: String,
    pub price_unit: PriceUnit,
    #[serde(default)]
    pub options: Vec<ItemOption>,
    #[serde(default)]
    pub max_guests: Option<u32>,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

impl ItemSnapshot {
    pub fn option(&self, id: &str) -> Option<&ItemOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_ref_parse_and_display() {
        let item: BookableItemRef = "property/42".parse().unwrap();
        assert_eq!(item.item_type, ItemType::Property);
        assert_eq!(item.item_id, "42");
        assert_eq!(item.to_string(), "property/42");
    }

    #[test]
    fn test_item_ref_rejects_garbage() {
        assert!("boat/1".parse::<BookableItemRef>().is_err());
        assert!("vehicle".parse::<BookableItemRef>().is_err());
        assert!("vehicle/".parse::<BookableItemRef>().is_err());
    }

    #[test]
    fn test_snapshot_deserialization_defaults() {
        let json = r#"{
            "item": {"item_type": "vehicle", "item_id": "7"},
            "price": "2500",
            "currency": "THB",
            "price_unit": "day"
        }"#;
        let snapshot: ItemSnapshot = serde_json::from_str(json).unwrap();
        assert!(snapshot.published);
        assert!(snapshot.options.is_empty());
        assert_eq!(snapshot.extra_guest_price, None);
    }
}
