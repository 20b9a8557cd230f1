use std::sync::Arc;

use agora_types::UserId;
use agora_types::frames::{ModerationAction, ServerFrame};

use crate::config::GatewayConfig;
use crate::delivery::{Delivery, DeliveryEngine};
use crate::handshake::TokenVerifier;
use crate::registry::ConnectionRegistry;
use crate::router::EventRouter;
use crate::store::MessageStore;

/// One relay instance: its own registry plus everything a connection needs.
///
/// Cheap to clone; handed to every socket task and HTTP handler.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    registry: ConnectionRegistry,
    delivery: DeliveryEngine,
    router: EventRouter,
    verifier: TokenVerifier,
    store: Arc<dyn MessageStore>,
    config: GatewayConfig,
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>, verifier: TokenVerifier, config: GatewayConfig) -> Self {
        let registry = ConnectionRegistry::new();
        let delivery = DeliveryEngine::new(registry.clone());
        let router = EventRouter::new(store.clone(), delivery.clone());

        Self {
            inner: Arc::new(RelayInner {
                registry,
                delivery,
                router,
                verifier,
                store,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.inner.verifier
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Push a server-originated frame to one user.
    pub fn deliver(&self, user_id: &UserId, frame: &ServerFrame) -> Delivery {
        self.inner.delivery.deliver(user_id, frame)
    }

    pub fn notify_moderation(
        &self,
        user_id: &UserId,
        content_type: String,
        content_id: String,
        action: ModerationAction,
    ) -> Delivery {
        self.inner
            .router
            .notify_moderation(user_id, content_type, content_id, action)
    }
}
