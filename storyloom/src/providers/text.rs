use async_trait::async_trait;
use serde_json::Value;

use super::ProviderResult;

/// Large language model producing JSON that follows a schema.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Generate a structured result for `prompt`.
    ///
    /// Output that does not parse as JSON is reported as `ProviderError::Malformed`.
    /// Conformance to `schema` is checked by the caller.
    async fn generate_structured(&self, prompt: &str, schema: &Value) -> ProviderResult<Value>;
}
