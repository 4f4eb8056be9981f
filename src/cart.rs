use crate::error::VeristoreError;
use crate::order::OrderItem;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One cart line. Lines are keyed by (product_id, variant): the same
/// product in two sizes is two separate lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub variant: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub requires_verification: bool,
}

impl CartItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// Shared shopping cart. Interior mutability so the storefront, the
/// checkout path, and the persistence task can all hold a handle.
pub struct CartStore {
    items: RwLock<Vec<CartItem>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    pub fn from_items(items: Vec<CartItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Add a line, merging quantities when the (product_id, variant) key
    /// already exists.
    pub fn add(&self, item: CartItem) {
        let mut items = self.items.write();
        match items
            .iter_mut()
            .find(|i| i.product_id == item.product_id && i.variant == item.variant)
        {
            Some(existing) => {
                existing.quantity += item.quantity;
                debug!(
                    "Merged cart line {}/{} to quantity {}",
                    existing.product_id, existing.variant, existing.quantity
                );
            }
            None => {
                debug!("Added cart line {}/{}", item.product_id, item.variant);
                items.push(item);
            }
        }
    }

    /// Set a line's quantity. Zero removes the line entirely rather than
    /// leaving a zero-quantity row behind.
    pub fn update_quantity(&self, product_id: &str, variant: &str, quantity: u32) {
        let mut items = self.items.write();
        if quantity == 0 {
            items.retain(|i| !(i.product_id == product_id && i.variant == variant));
            return;
        }
        if let Some(item) = items
            .iter_mut()
            .find(|i| i.product_id == product_id && i.variant == variant)
        {
            item.quantity = quantity;
        }
    }

    pub fn remove(&self, product_id: &str, variant: &str) {
        self.items
            .write()
            .retain(|i| !(i.product_id == product_id && i.variant == variant));
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }

    pub fn items(&self) -> Vec<CartItem> {
        self.items.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Total number of units across all lines
    pub fn unit_count(&self) -> u32 {
        self.items.read().iter().map(|i| i.quantity).sum()
    }

    pub fn total(&self) -> f64 {
        self.items.read().iter().map(|i| i.line_total()).sum()
    }

    /// True when any line carries a verification-required product
    pub fn requires_verification(&self) -> bool {
        self.items.read().iter().any(|i| i.requires_verification)
    }

    /// Snapshot the cart as order lines for checkout
    pub fn to_order_items(&self) -> Vec<OrderItem> {
        self.items
            .read()
            .iter()
            .map(|i| OrderItem {
                product_id: i.product_id.clone(),
                name: i.name.clone(),
                variant: i.variant.clone(),
                quantity: i.quantity,
                unit_price: i.unit_price,
                requires_verification: i.requires_verification,
            })
            .collect()
    }
}

impl Default for CartStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable cart snapshot so the cart survives restarts
#[async_trait]
pub trait CartPersistence: Send + Sync {
    async fn load(&self) -> Result<Vec<CartItem>, VeristoreError>;
    async fn save(&self, items: &[CartItem]) -> Result<(), VeristoreError>;
}

/// JSON-file persistence at the configured cart path
pub struct JsonCartPersistence {
    path: PathBuf,
}

impl JsonCartPersistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CartPersistence for JsonCartPersistence {
    /// A missing or unreadable snapshot yields an empty cart; a corrupt one
    /// is logged and discarded rather than blocking startup.
    async fn load(&self) -> Result<Vec<CartItem>, VeristoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<CartItem>>(&bytes) {
                Ok(items) => {
                    info!("Loaded {} cart line(s) from {:?}", items.len(), self.path);
                    Ok(items)
                }
                Err(e) => {
                    warn!("Discarding corrupt cart snapshot at {:?}: {}", self.path, e);
                    Ok(Vec::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, items: &[CartItem]) -> Result<(), VeristoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(items)?;
        tokio::fs::write(&self.path, json).await?;
        debug!("Saved {} cart line(s) to {:?}", items.len(), self.path);
        Ok(())
    }
}
