use std::sync::Arc;

use postbond::{AnyGateway, AnyNotifier, CapabilitySigner, Engine, WebhookIngestor};

/// Shared application state for the relay server.
pub struct AppState {
    pub engine: Arc<Engine<AnyGateway>>,
    pub ingestor: WebhookIngestor<AnyGateway, AnyNotifier>,
    /// Verifies the `e`/`s` pair on receiver action links.
    pub signer: CapabilitySigner,
    /// Base for the redirect issued after a successful action.
    pub public_base_url: String,
    /// Shared secret for the external sweep trigger. Mandatory in `main`;
    /// `None` here makes the sweep endpoint answer 500 rather than run open.
    pub sweep_secret: Option<Vec<u8>>,
    /// Separate bearer token for /metrics (never a payment secret).
    pub metrics_token: Option<Vec<u8>>,
}
