//! Map storage and checksum serving.
//!
//! Clients cache maps on disk and revalidate them with `GetMapCrc` before
//! falling back to a full `GetMap` transfer, so the store serves both a
//! cheap checksum lookup and the full tile payload.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::common::error::StorageError;
use crate::protocol::packets::messages::MapPayload;

/// A stored map with its precomputed checksum.
#[derive(Debug, Clone)]
pub struct MapRecord {
    pub name: String,
    pub payload: MapPayload,
    pub checksum: u32,
}

impl MapRecord {
    pub fn new(name: String, payload: MapPayload) -> Self {
        let checksum = map_checksum(&payload);
        MapRecord {
            name,
            payload,
            checksum,
        }
    }
}

/// Checksum over the map contents a client caches.
///
/// FNV-1a over the version, dimensions, and tile data in LE byte order.
/// Both sides must compute this identically or clients will re-download
/// maps forever.
pub fn map_checksum(payload: &MapPayload) -> u32 {
    const OFFSET_BASIS: u32 = 0x811C_9DC5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    let mut mix = |bytes: &[u8]| {
        for byte in bytes {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(PRIME);
        }
    };
    mix(&payload.version.to_le_bytes());
    mix(&payload.width.to_le_bytes());
    mix(&payload.height.to_le_bytes());
    for tile in &payload.tiles {
        mix(&tile.to_le_bytes());
    }
    hash
}

/// Storage seam for maps. Lookups are case-insensitive on map name.
#[async_trait]
pub trait MapStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Option<MapRecord>, StorageError>;

    async fn checksum(&self, name: &str) -> Result<Option<u32>, StorageError>;
}

/// Hash-map backed store for development and tests.
#[derive(Default)]
pub struct InMemoryMaps {
    maps: RwLock<HashMap<String, MapRecord>>,
}

impl InMemoryMaps {
    pub fn new() -> Self {
        InMemoryMaps::default()
    }

    pub async fn insert(&self, record: MapRecord) {
        let mut maps = self.maps.write().await;
        maps.insert(record.name.to_lowercase(), record);
    }
}

#[async_trait]
impl MapStore for InMemoryMaps {
    async fn fetch(&self, name: &str) -> Result<Option<MapRecord>, StorageError> {
        let maps = self.maps.read().await;
        Ok(maps.get(&name.to_lowercase()).cloned())
    }

    async fn checksum(&self, name: &str) -> Result<Option<u32>, StorageError> {
        let maps = self.maps.read().await;
        Ok(maps.get(&name.to_lowercase()).map(|record| record.checksum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> MapPayload {
        MapPayload {
            version: 1,
            width: 4,
            height: 4,
            tiles: (0..16).collect(),
        }
    }

    #[test]
    fn checksum_is_content_sensitive() {
        let base = sample_payload();
        let mut tweaked = base.clone();
        tweaked.tiles[3] = 99;
        assert_ne!(map_checksum(&base), map_checksum(&tweaked));

        let mut resized = base.clone();
        resized.width = 8;
        assert_ne!(map_checksum(&base), map_checksum(&resized));

        assert_eq!(map_checksum(&base), map_checksum(&base.clone()));
    }

    #[tokio::test]
    async fn store_round_trip_and_missing_map() {
        let store = InMemoryMaps::new();
        store
            .insert(MapRecord::new("Overworld".into(), sample_payload()))
            .await;

        let record = store.fetch("overworld").await.unwrap().unwrap();
        assert_eq!(record.payload, sample_payload());
        assert_eq!(
            store.checksum("OVERWORLD").await.unwrap(),
            Some(record.checksum)
        );
        assert!(store.fetch("dungeon").await.unwrap().is_none());
        assert!(store.checksum("dungeon").await.unwrap().is_none());
    }
}
