//! 생성 모듈 - 답변 생성 (외부 협력자)
//!
//! 검색된 청크를 컨텍스트로 묶어 채팅 모델에 전달합니다.
//! 파이프라인과의 계약은 "관련도 순으로 정렬된 청크 목록 +
//! 컨텍스트 길이 예산"뿐이고, 생성 자체는 OpenAI 호환
//! chat/completions API(Moonshot)에 위임합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::knowledge::HybridSearchResult;

// ============================================================================
// GenerationConfig
// ============================================================================

/// Moonshot chat/completions 엔드포인트
/// ref: https://platform.moonshot.ai/docs/api/chat
const CHAT_COMPLETIONS_URL: &str = "https://api.moonshot.ai/v1/chat/completions";

/// 답변 생성 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// 채팅 모델 이름
    pub model: String,
    /// 샘플링 온도
    pub temperature: f32,
    /// 응답 최대 토큰
    pub max_tokens: u32,
    /// 컨텍스트 길이 예산 (문자 수)
    pub context_budget: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "kimi-k2-0711-preview".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
            context_budget: 2048,
        }
    }
}

// ============================================================================
// Context Assembly
// ============================================================================

/// 검색 결과를 컨텍스트 문자열로 조립
///
/// 청크마다 메타데이터 헤더(요리명/분류/난이도)를 붙이고, 관련도 순으로
/// 누적 길이가 예산을 넘을 때까지 포함합니다. 예산을 넘기는 청크까지는
/// 포함하고 그 다음부터 중단합니다.
pub fn build_context(results: &[HybridSearchResult], budget_chars: usize) -> String {
    if results.is_empty() {
        tracing::warn!("Empty retrieval result - answer may be ungrounded");
        return String::new();
    }

    let mut parts = Vec::new();
    let mut total_chars = 0usize;

    for (i, result) in results.iter().enumerate() {
        let meta = &result.chunk.metadata;
        let block = format!(
            "레시피 {} | 요리명: {} | 분류: {} | 난이도: {}\n{}",
            i + 1,
            meta.dish_name,
            meta.category,
            meta.difficulty,
            result.chunk.text
        );

        total_chars += block.chars().count();
        parts.push(block);

        if total_chars > budget_chars {
            tracing::debug!(
                "Context budget reached after {} of {} chunks",
                i + 1,
                results.len()
            );
            break;
        }
    }

    let separator = format!("\n{}\n", "=".repeat(50));
    parts.join(&separator)
}

// ============================================================================
// ChatClient
// ============================================================================

/// OpenAI 호환 채팅 클라이언트 (Moonshot)
pub struct ChatClient {
    api_key: String,
    client: reqwest::Client,
    config: GenerationConfig,
}

/// chat/completions 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// chat/completions 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatClient {
    /// 새 채팅 클라이언트 생성
    pub fn new(api_key: String, config: GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            config,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성 (MOONSHOT_API_KEY)
    pub fn from_env(config: GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("MOONSHOT_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                RagError::Config(
                    "MOONSHOT_API_KEY not set - answer generation unavailable".to_string(),
                )
            })?;
        Self::new(api_key, config)
    }

    /// 질문 + 검색 결과로 답변 생성
    pub async fn answer(
        &self,
        question: &str,
        results: &[HybridSearchResult],
    ) -> Result<String> {
        let context = build_context(results, self.config.context_budget);

        let system = "당신은 미슐랭 3스타 셰프 수준의 전문 요리 어시스턴트입니다. \
                      주어진 레시피 정보에 근거해서 상세하고 전문적으로 답변하세요. \
                      정보가 부족하면 부족하다고 솔직하게 말하세요.";

        let user = format!(
            "사용자의 질문:\n{}\n\n관련 레시피 정보:\n{}",
            question, context
        );

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        tracing::info!("Generating answer with {}", self.config.model);

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read chat response body")?;

        if !status.is_success() {
            anyhow::bail!("Chat API error ({}): {}", status, body);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse chat response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Chat response contained no choices"))
    }
}

/// 채팅 API 키 존재 여부 확인
pub fn has_chat_key() -> bool {
    std::env::var("MOONSHOT_API_KEY")
        .map(|k| !k.is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
