use async_trait::async_trait;

use crate::error::Result;

/// Sends a reminder message to its owner over whatever transport the host
/// application uses. Errors are reported back to the scheduler, which logs
/// them and moves on.
#[async_trait]
pub trait Deliverer: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, owner_id: &str, message: &str) -> Result<()>;
}
