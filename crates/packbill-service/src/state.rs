//! Application state.

use std::sync::Arc;
use std::time::Duration;

use packbill_packer::PackerProcess;
use packbill_store::Store;

use crate::config::ServiceConfig;
use crate::gateway::{GatewayClient, PaymentGateway};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Payment gateway (optional; payment endpoints fail without it).
    pub gateway: Option<Arc<dyn PaymentGateway>>,

    /// External packing process.
    pub packer: PackerProcess,
}

impl AppState {
    /// Create a new application state, building the gateway client from config.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let gateway = config
            .gateway_key_id
            .as_ref()
            .zip(config.gateway_key_secret.as_ref())
            .and_then(|(key_id, key_secret)| {
                match GatewayClient::new(
                    &config.gateway_base_url,
                    key_id,
                    key_secret,
                    Duration::from_secs(config.gateway_timeout_seconds),
                ) {
                    Ok(client) => {
                        tracing::info!(base_url = %config.gateway_base_url, "Payment gateway enabled");
                        Some(Arc::new(client) as Arc<dyn PaymentGateway>)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create gateway client");
                        None
                    }
                }
            });

        if gateway.is_none() {
            tracing::warn!("Payment gateway not configured - payments will not be available");
        }

        Self::with_gateway(store, config, gateway)
    }

    /// Create a state with an explicit gateway implementation.
    #[must_use]
    pub fn with_gateway(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let packer = PackerProcess::new(
            config.packer_program.clone(),
            config.packer_args.clone(),
            Duration::from_secs(config.packer_timeout_seconds),
        );

        Self {
            store,
            config,
            gateway,
            packer,
        }
    }

    /// Check if the payment gateway is configured.
    #[must_use]
    pub fn has_gateway(&self) -> bool {
        self.gateway.is_some()
    }
}
