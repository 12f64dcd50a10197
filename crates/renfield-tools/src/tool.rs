use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use renfield_core::types::ToolDescriptor;

use crate::error::Result;

/// A single callable operation exposed by a provider (§4.2, §4.3).
///
/// Implementations are provided by the concrete tool-provider adapters,
/// which are out of scope here — the Registry only needs this seam to
/// treat every provider uniformly.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn call(&self, arguments: serde_json::Value, cancel: CancellationToken) -> Result<serde_json::Value>;
}
