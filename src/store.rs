//! Player persistence seam.
//!
//! The engine only ever sees the `PlayerStore` trait: get/put keyed by
//! player id, each call atomic on its own but with no transaction across
//! calls. Read-modify-write cycles are serialized by the engine's
//! per-player locks, not here. The in-memory map is the reference
//! implementation; an embedded KV or SQL table would slot in behind the
//! same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::Player;

/// Surfaced to callers as `StorageUnavailable`; the engine never retries
/// internally (retry policy belongs to the storage adapter).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Player>, StoreError>;
    async fn put(&self, player: Player) -> Result<(), StoreError>;
    /// Full scan, used only by leaderboard/export reads.
    async fn all(&self) -> Result<Vec<Player>, StoreError>;
}

/// Reference store: a map behind an async RwLock.
#[derive(Default)]
pub struct MemoryStore {
    players: RwLock<HashMap<String, Player>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Player>, StoreError> {
        Ok(self.players.read().await.get(id).cloned())
    }

    async fn put(&self, player: Player) -> Result<(), StoreError> {
        self.players.write().await.insert(player.id.clone(), player);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Player>, StoreError> {
        Ok(self.players.read().await.values().cloned().collect())
    }
}
