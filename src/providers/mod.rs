pub mod log;
pub mod webhook;

pub use log::LogDeliverer;
pub use webhook::WebhookDeliverer;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::interfaces::delivery::Deliverer;

/// Picks the webhook deliverer when a URL is configured and the log
/// deliverer otherwise.
pub fn deliverer_from_config(config: &Config) -> Result<Arc<dyn Deliverer>> {
    match config.delivery.webhook_url() {
        Some(url) => Ok(Arc::new(WebhookDeliverer::new(url, config.delivery.timeout())?)),
        None => Ok(Arc::new(LogDeliverer)),
    }
}
