//! Prompt helpers backed by a language model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProviderResult;

/// Turns a song request into a music-provider prompt.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    fn name(&self) -> &str;

    /// `params` is the full request bag, unknown fields included.
    async fn enhance(&self, params: &Value) -> ProviderResult<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub child_name: String,
    pub age_months: u32,
}

/// Topic and category inferred from a free-text video request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub title: String,
    pub theme_topic: String,
    pub theme_category: String,
    pub enhanced_prompt: String,
    #[serde(default)]
    pub educational_goal: Option<String>,
}

#[async_trait]
pub trait PromptAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> ProviderResult<PromptAnalysis>;
}
