use crate::config::VerificationConfig;
use crate::error::{BackendError, PaymentError, UploadError};
use crate::media::RecordedArtifact;
use crate::order::{Order, PaymentMethod};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;
use tracing::{debug, info, warn};

/// Catalog entry consumed by the storefront
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub variants: Vec<String>,
    pub stock_by_variant: HashMap<String, u32>,
    pub requires_verification: bool,
    pub age_restricted: bool,
}

/// Product catalog collaborator
#[async_trait::async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn list_products(&self) -> Vec<Product>;
    async fn get_product(&self, id: &str) -> Option<Product>;
}

/// In-memory catalog used by the demo binary and the tests
pub struct InMemoryCatalog {
    products: RwLock<Vec<Product>>,
}

impl InMemoryCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: RwLock::new(products),
        }
    }

    pub fn with_demo_products() -> Self {
        let mut premium_stock = HashMap::new();
        premium_stock.insert("standard".to_string(), 3);

        let mut casual_stock = HashMap::new();
        casual_stock.insert("M".to_string(), 10);
        casual_stock.insert("L".to_string(), 4);

        Self::new(vec![
            Product {
                id: "prod-premium".to_string(),
                name: "Collector edition".to_string(),
                price: 299.99,
                variants: vec!["standard".to_string()],
                stock_by_variant: premium_stock,
                requires_verification: true,
                age_restricted: true,
            },
            Product {
                id: "prod-casual".to_string(),
                name: "Everyday tee".to_string(),
                price: 49.99,
                variants: vec!["M".to_string(), "L".to_string()],
                stock_by_variant: casual_stock,
                requires_verification: false,
                age_restricted: false,
            },
        ])
    }
}

#[async_trait::async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn list_products(&self) -> Vec<Product> {
        self.products.read().clone()
    }

    async fn get_product(&self, id: &str) -> Option<Product> {
        self.products.read().iter().find(|p| p.id == id).cloned()
    }
}

/// How a successful charge settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentReceiptStatus {
    /// Funds captured
    Completed,
    /// Accepted but settles later (cash on delivery, bank redirect)
    PendingSettlement,
}

#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub status: PaymentReceiptStatus,
}

/// Method-specific details handed to the gateway. Card numbers never enter
/// the core; only a masked form travels through.
#[derive(Debug, Clone)]
pub enum PaymentDetails {
    Card { masked_number: String },
    BankRedirect { bank_code: String },
    MobileCode { code: String },
    CashOnDelivery,
}

/// Opaque payment gateway collaborator. The coordinator only consumes the
/// success/failure contract.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        amount: f64,
        method: PaymentMethod,
        details: &PaymentDetails,
    ) -> Result<PaymentReceipt, PaymentError>;
}

/// Deterministic stand-in for the real gateway. Declines can be scripted
/// per call; mobile codes are format-checked the way the real flow does.
pub struct MockPaymentGateway {
    decline_next: Mutex<Option<PaymentError>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self {
            decline_next: Mutex::new(None),
        }
    }

    pub fn decline_next(&self, code: &str, reason: &str) {
        *self.decline_next.lock() = Some(PaymentError {
            code: code.to_string(),
            reason: reason.to_string(),
        });
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(
        &self,
        amount: f64,
        method: PaymentMethod,
        details: &PaymentDetails,
    ) -> Result<PaymentReceipt, PaymentError> {
        if let Some(err) = self.decline_next.lock().take() {
            warn!("Mock gateway declining charge of {}: {}", amount, err);
            return Err(err);
        }

        if let PaymentDetails::MobileCode { code } = details {
            if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
                return Err(PaymentError {
                    code: "INVALID_MOBILE_CODE".to_string(),
                    reason: "The one-time payment code must be 6 digits".to_string(),
                });
            }
        }

        let status = match method {
            PaymentMethod::CashOnDelivery | PaymentMethod::BankRedirect => {
                PaymentReceiptStatus::PendingSettlement
            }
            _ => PaymentReceiptStatus::Completed,
        };

        let receipt = PaymentReceipt {
            payment_id: format!("PAY-{}", Uuid::new_v4()),
            status,
        };
        info!(
            "Mock gateway charged {:.2} via {:?} -> {}",
            amount, method, receipt.payment_id
        );
        Ok(receipt)
    }
}

/// Order persistence collaborator
#[async_trait::async_trait]
pub trait OrderBackend: Send + Sync {
    /// Persist a new order. The stored record is authoritative from this
    /// point on; the client-minted id is only a placeholder until this
    /// call acknowledges.
    async fn create_order(&self, order: Order) -> Result<Order, BackendError>;

    async fn get_order(&self, order_id: &str) -> Result<Order, BackendError>;

    async fn list_my_orders(&self) -> Result<Vec<Order>, BackendError>;

    /// Persist a mutated order record (status or verification changes)
    async fn update_order(&self, order: Order) -> Result<Order, BackendError>;
}

/// In-memory order backend with a scriptable outage switch for
/// retryable-error tests.
pub struct InMemoryOrderBackend {
    orders: RwLock<HashMap<String, Order>>,
    insertion_order: RwLock<Vec<String>>,
    outage: AtomicBool,
}

impl InMemoryOrderBackend {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            insertion_order: RwLock::new(Vec::new()),
            outage: AtomicBool::new(false),
        }
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn check_outage(&self) -> Result<(), BackendError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable {
                details: "order backend unreachable".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryOrderBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OrderBackend for InMemoryOrderBackend {
    async fn create_order(&self, order: Order) -> Result<Order, BackendError> {
        self.check_outage()?;
        debug!("Storing order {}", order.id);
        self.insertion_order.write().push(order.id.clone());
        self.orders.write().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BackendError> {
        self.check_outage()?;
        self.orders
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn list_my_orders(&self) -> Result<Vec<Order>, BackendError> {
        self.check_outage()?;
        let orders = self.orders.read();
        Ok(self
            .insertion_order
            .read()
            .iter()
            .filter_map(|id| orders.get(id).cloned())
            .collect())
    }

    async fn update_order(&self, order: Order) -> Result<Order, BackendError> {
        self.check_outage()?;
        let mut orders = self.orders.write();
        if !orders.contains_key(&order.id) {
            return Err(BackendError::NotFound {
                order_id: order.id.clone(),
            });
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }
}

/// Destination for recorded verification artifacts
#[async_trait::async_trait]
pub trait UploadSink: Send + Sync {
    /// Upload one artifact for an order. Returns the assigned verification
    /// id on acknowledgment.
    async fn upload_artifact(
        &self,
        order_id: &str,
        artifact: &RecordedArtifact,
    ) -> Result<String, UploadError>;
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub order_id: String,
    pub verification_id: String,
    pub mime_type: String,
    pub size_bytes: usize,
}

/// In-memory upload sink enforcing the mime allow-list and size cap
pub struct MemoryUploadSink {
    config: VerificationConfig,
    uploads: RwLock<Vec<StoredUpload>>,
    fail_next: Mutex<Option<UploadError>>,
}

impl MemoryUploadSink {
    pub fn new(config: VerificationConfig) -> Self {
        Self {
            config,
            uploads: RwLock::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, error: UploadError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn uploads(&self) -> Vec<StoredUpload> {
        self.uploads.read().clone()
    }

    fn base_mime(mime_type: &str) -> &str {
        mime_type.split(';').next().unwrap_or(mime_type)
    }
}

#[async_trait::async_trait]
impl UploadSink for MemoryUploadSink {
    async fn upload_artifact(
        &self,
        order_id: &str,
        artifact: &RecordedArtifact,
    ) -> Result<String, UploadError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }

        let base = Self::base_mime(&artifact.mime_type);
        if !self.config.allowed_mime_types.iter().any(|m| m == base) {
            return Err(UploadError::UnsupportedType {
                mime_type: artifact.mime_type.clone(),
            });
        }

        if artifact.size_bytes() > self.config.max_upload_bytes {
            return Err(UploadError::TooLarge {
                size: artifact.size_bytes(),
                max: self.config.max_upload_bytes,
            });
        }

        let verification_id = format!("VER-{}", Uuid::new_v4());
        info!(
            "Stored verification artifact for order {} ({} bytes) as {}",
            order_id,
            artifact.size_bytes(),
            verification_id
        );
        self.uploads.write().push(StoredUpload {
            order_id: order_id.to_string(),
            verification_id: verification_id.clone(),
            mime_type: artifact.mime_type.clone(),
            size_bytes: artifact.size_bytes(),
        });
        Ok(verification_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn artifact(mime: &str, size: usize) -> RecordedArtifact {
        RecordedArtifact {
            data: Bytes::from(vec![0u8; size]),
            mime_type: mime.to_string(),
            duration: Duration::from_secs(8),
        }
    }

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = InMemoryCatalog::with_demo_products();
        assert_eq!(catalog.list_products().await.len(), 2);

        let product = catalog.get_product("prod-premium").await.unwrap();
        assert!(product.requires_verification);
        assert!(catalog.get_product("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_gateway_mobile_code_validation() {
        let gateway = MockPaymentGateway::new();

        let err = gateway
            .charge(
                10.0,
                PaymentMethod::MobileCode,
                &PaymentDetails::MobileCode {
                    code: "12ab".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_MOBILE_CODE");

        let receipt = gateway
            .charge(
                10.0,
                PaymentMethod::MobileCode,
                &PaymentDetails::MobileCode {
                    code: "123456".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.status, PaymentReceiptStatus::Completed);
    }

    #[tokio::test]
    async fn test_gateway_scripted_decline() {
        let gateway = MockPaymentGateway::new();
        gateway.decline_next("CARD_DECLINED", "declined");

        let err = gateway
            .charge(
                10.0,
                PaymentMethod::Card,
                &PaymentDetails::Card {
                    masked_number: "**** 0000".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "CARD_DECLINED");

        // Decline applies to one call only.
        assert!(gateway
            .charge(
                10.0,
                PaymentMethod::Card,
                &PaymentDetails::Card {
                    masked_number: "**** 4242".to_string(),
                },
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_upload_sink_mime_allow_list() {
        let sink = MemoryUploadSink::new(VerificationConfig::default());

        let id = sink
            .upload_artifact("ORD-1", &artifact("video/webm;codecs=vp9", 1024))
            .await
            .unwrap();
        assert!(id.starts_with("VER-"));

        let err = sink
            .upload_artifact("ORD-1", &artifact("image/png", 1024))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn test_upload_sink_size_cap() {
        let config = VerificationConfig {
            max_upload_bytes: 512,
            ..VerificationConfig::default()
        };
        let sink = MemoryUploadSink::new(config);

        let err = sink
            .upload_artifact("ORD-1", &artifact("video/webm", 1024))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
    }
}
