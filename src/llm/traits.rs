//! LLM 客户端抽象
//!
//! 核心只需要「给一段对话，返回文本」；具体后端（OpenAI 兼容、本地模型等）由上层实现并按模型名绑定。

use async_trait::async_trait;

use crate::agent::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回模型输出文本
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 当前绑定的模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }
}
