//! Cached inventory entities and their keys

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::non_blank;

/// Warehouse assumed for stock-level ids that carry no warehouse component
pub const DEFAULT_WAREHOUSE: &str = "default";

/// Entity types as named by the sync protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Item,
    StockLevel,
    Checkout,
    PickList,
}

impl EntityType {
    /// Every entity type tracked by the delta sync
    pub const ALL: [Self; 4] = [Self::Item, Self::StockLevel, Self::Checkout, Self::PickList];

    /// Wire name, also used in sync-meta keys
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Item => "ITEM",
            Self::StockLevel => "STOCK_LEVEL",
            Self::Checkout => "CHECKOUT",
            Self::PickList => "PICK_LIST",
        }
    }

    /// Local cache table holding entities of this type
    pub const fn cache_table(self) -> CacheTable {
        match self {
            Self::Item => CacheTable::Items,
            Self::StockLevel => CacheTable::StockLevels,
            Self::Checkout => CacheTable::Checkouts,
            Self::PickList => CacheTable::PickLists,
        }
    }

    /// Map a client-side entity type name onto the wire vocabulary.
    ///
    /// Unknown names fall back to [`EntityType::Item`].
    pub fn from_local(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stock" | "stock_level" | "stock_levels" | "stocklevel" => Self::StockLevel,
            "checkout" | "checkouts" => Self::Checkout,
            "pick_list" | "pick_lists" | "picklist" | "picklists" => Self::PickList,
            _ => Self::Item,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local cache tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTable {
    Items,
    StockLevels,
    Checkouts,
    PickLists,
}

impl CacheTable {
    pub const ALL: [Self; 4] = [
        Self::Items,
        Self::StockLevels,
        Self::Checkouts,
        Self::PickLists,
    ];

    /// SQL table name
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::StockLevels => "stock_levels",
            Self::Checkouts => "checkouts",
            Self::PickLists => "pick_lists",
        }
    }

    pub const fn entity_type(self) -> EntityType {
        match self {
            Self::Items => EntityType::Item,
            Self::StockLevels => EntityType::StockLevel,
            Self::Checkouts => EntityType::Checkout,
            Self::PickLists => EntityType::PickList,
        }
    }

    /// Derive the cache key from an entity payload.
    ///
    /// Stock levels are keyed by `itemId` + `warehouseId`; every other table
    /// by `id`. Snake-case field names are accepted as well.
    pub fn key_of(self, data: &Value) -> Result<EntityKey> {
        match self {
            Self::StockLevels => {
                let item_id = string_field(data, &["itemId", "item_id"]);
                let warehouse_id = string_field(data, &["warehouseId", "warehouse_id"]);
                match (item_id, warehouse_id) {
                    (Some(item_id), Some(warehouse_id)) => {
                        Ok(EntityKey::composite(item_id, warehouse_id))
                    }
                    _ => Err(Error::InvalidInput(
                        "stock level requires itemId and warehouseId".into(),
                    )),
                }
            }
            _ => string_field(data, &["id"]).map(EntityKey::Id).ok_or_else(|| {
                Error::InvalidInput(format!("{} entity requires an id", self.table_name()))
            }),
        }
    }

    /// Key for a pulled change: the payload wins, the wire entity id is the fallback.
    pub fn key_for_change(self, entity_id: &str, data: &Value) -> Result<EntityKey> {
        self.key_of(data)
            .or_else(|_| EntityKey::from_entity_id(self, entity_id))
    }
}

impl fmt::Display for CacheTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for CacheTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "items" | "item" => Ok(Self::Items),
            "stock_levels" | "stock_level" | "stock" => Ok(Self::StockLevels),
            "checkouts" | "checkout" => Ok(Self::Checkouts),
            "pick_lists" | "pick_list" | "picklists" => Ok(Self::PickLists),
            other => Err(Error::InvalidInput(format!("unknown cache table: {other}"))),
        }
    }
}

/// Primary key of a cached entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Id(String),
    Composite {
        item_id: String,
        warehouse_id: String,
    },
}

impl EntityKey {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn composite(item_id: impl Into<String>, warehouse_id: impl Into<String>) -> Self {
        Self::Composite {
            item_id: item_id.into(),
            warehouse_id: warehouse_id.into(),
        }
    }

    /// Parse a wire `entityId` for the given table.
    ///
    /// Stock-level ids use `<itemId>:<warehouseId>`; a bare item id maps to
    /// [`DEFAULT_WAREHOUSE`].
    pub fn from_entity_id(table: CacheTable, entity_id: &str) -> Result<Self> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entity id must not be empty".into()));
        }

        match table {
            CacheTable::StockLevels => Ok(match entity_id.split_once(':') {
                Some((item_id, warehouse_id)) => Self::composite(item_id, warehouse_id),
                None => Self::composite(entity_id, DEFAULT_WAREHOUSE),
            }),
            _ => Ok(Self::id(entity_id)),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.write_str(id),
            Self::Composite {
                item_id,
                warehouse_id,
            } => write!(f, "{item_id}:{warehouse_id}"),
        }
    }
}

/// A server-authoritative entity held in the local cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub key: EntityKey,
    /// Opaque domain payload, overwritten wholesale on every put
    pub data: Value,
    /// When the payload was written locally (Unix ms)
    pub cached_at: i64,
}

fn string_field(data: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match data.get(*name)? {
        Value::String(value) => non_blank(value).map(|_| value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_type_from_local_defaults_to_item() {
        assert_eq!(EntityType::from_local("stock"), EntityType::StockLevel);
        assert_eq!(EntityType::from_local("pick-list"), EntityType::PickList);
        assert_eq!(EntityType::from_local("Checkout"), EntityType::Checkout);
        assert_eq!(EntityType::from_local("location"), EntityType::Item);
    }

    #[test]
    fn test_entity_type_wire_name() {
        let json = serde_json::to_string(&EntityType::StockLevel).unwrap();
        assert_eq!(json, "\"STOCK_LEVEL\"");
        assert_eq!(EntityType::PickList.cache_table(), CacheTable::PickLists);
    }

    #[test]
    fn test_key_of_item_requires_id() {
        let key = CacheTable::Items.key_of(&json!({"id": "item-1"})).unwrap();
        assert_eq!(key, EntityKey::id("item-1"));
        assert!(CacheTable::Items.key_of(&json!({"sku": "X"})).is_err());
    }

    #[test]
    fn test_key_of_stock_level_is_composite() {
        let key = CacheTable::StockLevels
            .key_of(&json!({"itemId": "item-1", "warehouse_id": "wh-2", "quantity": 4}))
            .unwrap();
        assert_eq!(key, EntityKey::composite("item-1", "wh-2"));
        assert_eq!(key.to_string(), "item-1:wh-2");
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let key = CacheTable::Checkouts.key_of(&json!({"id": 17})).unwrap();
        assert_eq!(key, EntityKey::id("17"));
    }

    #[test]
    fn test_key_for_change_falls_back_to_entity_id() {
        let key = CacheTable::StockLevels
            .key_for_change("item-42", &json!({"delta": -5}))
            .unwrap();
        assert_eq!(key, EntityKey::composite("item-42", DEFAULT_WAREHOUSE));

        let key = CacheTable::Items
            .key_for_change("item-9", &Value::Null)
            .unwrap();
        assert_eq!(key, EntityKey::id("item-9"));
    }

    #[test]
    fn test_cache_table_parse() {
        assert_eq!("stock".parse::<CacheTable>().unwrap(), CacheTable::StockLevels);
        assert_eq!("pick-lists".parse::<CacheTable>().unwrap(), CacheTable::PickLists);
        assert!("tickets".parse::<CacheTable>().is_err());
    }
}
