//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 返回预置回复，或预置错误；记录收到的最后一段 prompt，便于断言 prompt 形状。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::agent::Message;
use crate::llm::LlmClient;

/// Mock 客户端：固定回复 / 固定错误
#[derive(Debug)]
pub struct MockLlmClient {
    reply: Result<String, String>,
    last_prompt: Mutex<Option<String>>,
}

impl MockLlmClient {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Ok(text.into()),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            reply: Err(error.into()),
            last_prompt: Mutex::new(None),
        }
    }

    /// 最近一次调用时最后一条消息的内容
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut slot) = self.last_prompt.lock() {
            *slot = messages.last().map(|m| m.content().to_string());
        }
        self.reply.clone()
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
