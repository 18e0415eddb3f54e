//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 시맨틱 검색을 위한 임베딩 프로바이더입니다.
//! 동일한 입력 + 동일한 설정이면 항상 동일한 벡터를 반환해야 합니다
//! (인덱스 저장/복원과 검색 재현성의 전제 조건).
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&EmbeddingConfig::default())?;
//! let embedding = embedder.embed("西红柿炒鸡蛋").await?;
//! ```

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::RagError;

// ============================================================================
// EmbeddingConfig
// ============================================================================

/// 기본 임베딩 차원 (gemini-embedding-001)
pub const DEFAULT_DIMENSION: usize = 768;

/// 해시 임베딩 기본 차원 (오프라인/테스트용)
pub const HASH_DIMENSION: usize = 256;

/// 임베딩 설정
///
/// 벡터 인덱스 매니페스트에 그대로 저장되어, 빌드 시점과 질의 시점의
/// 설정 일치를 검증하는 데 사용됩니다. normalize는 벡터 의미를 바꾸는
/// 플래그이므로 반드시 양쪽이 같아야 합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// 프로바이더 종류 ("gemini" | "hash")
    pub provider: String,
    /// 모델 이름
    pub model: String,
    /// 벡터 차원
    pub dimension: usize,
    /// L2 정규화 적용 여부
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-embedding-001".to_string(),
            dimension: DEFAULT_DIMENSION,
            normalize: true,
        }
    }
}

impl EmbeddingConfig {
    /// 오프라인 설정 (네트워크 없이 동작하는 해시 임베딩)
    pub fn offline() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "token-hash".to_string(),
            dimension: HASH_DIMENSION,
            normalize: true,
        }
    }
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 차원 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

/// 호출 간 최소 딜레이 (무료 티어 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    config: EmbeddingConfig,
    last_request: Mutex<Option<Instant>>,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `config` - 임베딩 설정 (차원은 768, 1536, 3072 중 선택)
    pub fn new(api_key: String, config: EmbeddingConfig) -> Result<Self> {
        if ![768, 1536, 3072].contains(&config.dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                config.dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(config: EmbeddingConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, config)
    }

    /// 버스트 방지를 위한 최소 딜레이 적용
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            let min_delay = Duration::from_millis(MIN_DELAY_MS);
            if elapsed < min_delay {
                tokio::time::sleep(min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.config.dimension]);
        }

        let request = EmbedRequest {
            model: format!("models/{}", self.config.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: Some(self.config.dimension),
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (429 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            self.throttle().await;

            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            // 성공
            if status.is_success() {
                let embed_response: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;

                let mut values = embed_response.embedding.values;
                if self.config.normalize {
                    l2_normalize(&mut values);
                }
                return Ok(values);
            }

            // 429 Rate Limit 에러 - 재시도
            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                    anyhow::bail!(
                        "Gemini API error ({}): {}",
                        error.error.status,
                        error.error.message
                    );
                }
                anyhow::bail!("Gemini API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Hash Embedding (offline)
// ============================================================================

/// 토큰 해싱 기반 결정적 임베딩
///
/// 공백 기준 토큰을 해시해 고정 차원 벡터에 누적합니다.
/// 네트워크가 없는 환경과 테스트에서 사용하며, 프로세스를 넘어
/// 결정적입니다 (DefaultHasher는 고정 키 SipHash).
#[derive(Debug)]
pub struct HashEmbedding {
    config: EmbeddingConfig,
}

impl HashEmbedding {
    /// 설정으로 생성
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    /// 기본 오프라인 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(EmbeddingConfig::offline())
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let dim = self.config.dimension;
        let mut values = vec![0.0f32; dim];

        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();

            let idx = (h as usize) % dim;
            // 상위 비트로 토큰별 기여에 변화를 줌
            let weight = 0.5 + ((h >> 32) as u32 as f32) / (u32::MAX as f32);
            values[idx] += weight;
        }

        if self.config.normalize {
            l2_normalize(&mut values);
        }

        Ok(values)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            tracing::debug!("Using API key from GEMINI_API_KEY");
            return Ok(key);
        }
    }

    if let Ok(key) = std::env::var("GOOGLE_AI_API_KEY") {
        if !key.is_empty() {
            tracing::debug!("Using API key from GOOGLE_AI_API_KEY");
            return Ok(key);
        }
    }

    Err(RagError::Config(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable."
            .to_string(),
    )
    .into())
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                return true;
            }
        }
    }
    false
}

// ============================================================================
// Helper Functions
// ============================================================================

/// L2 정규화 (영벡터는 그대로 둠)
pub(crate) fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
///
/// gemini 프로바이더는 API 키가 없으면 설정 오류로 즉시 실패합니다.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => {
            tracing::info!(
                "Using hash embedding (dimension: {}, offline)",
                config.dimension
            );
            Ok(Arc::new(HashEmbedding::new(config.clone())))
        }
        "gemini" => {
            let embedder = GeminiEmbedding::from_env(config.clone())?;
            tracing::info!(
                "Using Gemini API embedding (model: {}, dimension: {})",
                config.model,
                config.dimension
            );
            Ok(Arc::new(embedder))
        }
        other => Err(RagError::Config(format!("unknown embedding provider: {}", other)).into()),
    }
}

// ============================================================================
// Tests
// ============================================================================
