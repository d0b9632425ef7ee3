use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::interfaces::delivery::Deliverer;

/// Writes each reminder to the log instead of sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDeliverer;

#[async_trait]
impl Deliverer for LogDeliverer {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, owner_id: &str, message: &str) -> Result<()> {
        info!(target: "reminder_bot::delivery", owner_id, message, "reminder due");
        Ok(())
    }
}
