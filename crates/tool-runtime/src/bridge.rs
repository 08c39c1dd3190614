//! Bridge adapter: wraps a non-streaming `CompletionModel` into a `ModelGateway`.
//!
//! Providers that can only return whole responses implement the smaller
//! trait; the bridge replays each response as a synthetic event sequence so
//! the loop treats both kinds the same way. Native streaming providers should
//! implement `ModelGateway` directly.

use async_trait::async_trait;
use futures::stream;
use tracing::debug;

use crate::provider::{EventStream, GatewayError, ModelGateway, ModelRequest, ModelResponse};

/// Minimal blocking model interface: one request in, one response out.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError>;
}

pub struct BlockingGateway {
    inner: Box<dyn CompletionModel>,
    name: String,
}

impl BlockingGateway {
    /// Create a bridge from any `CompletionModel`.
    pub fn new(inner: Box<dyn CompletionModel>, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }
}

#[async_trait]
impl ModelGateway for BlockingGateway {
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, GatewayError> {
        let response = self.inner.complete(request).await?;
        debug!(
            gateway = %self.name,
            tool_calls = response.tool_calls.len(),
            "Replaying blocking response as events"
        );
        Ok(Box::pin(stream::iter(response.into_events().into_iter().map(Ok))))
    }

    async fn send(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        self.inner.complete(request).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
