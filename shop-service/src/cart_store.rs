use async_trait::async_trait;
use dashmap::DashMap;
use shared::Cart;
use uuid::Uuid;

use crate::error::AppResult;

/// Session-keyed cart storage. Carts are never written to the database.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// The stored cart, or an empty one for an unknown session.
    async fn get(&self, session: Uuid) -> AppResult<Cart>;
    async fn put(&self, session: Uuid, cart: Cart) -> AppResult<()>;
    async fn delete(&self, session: Uuid) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCartStore {
    carts: DashMap<Uuid, Cart>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn get(&self, session: Uuid) -> AppResult<Cart> {
        Ok(self
            .carts
            .get(&session)
            .map(|cart| cart.value().clone())
            .unwrap_or_default())
    }

    async fn put(&self, session: Uuid, cart: Cart) -> AppResult<()> {
        if cart.is_empty() {
            self.carts.remove(&session);
        } else {
            self.carts.insert(session, cart);
        }
        Ok(())
    }

    async fn delete(&self, session: Uuid) -> AppResult<()> {
        self.carts.remove(&session);
        Ok(())
    }
}
