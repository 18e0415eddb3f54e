//! 설정 모듈
//!
//! 코퍼스 경로, 인덱스 경로, 검색 파라미터, 임베딩/생성 하위 설정을
//! 하나의 구조체로 모읍니다. 값은 기본값 + `COOK_RAG_*` 환경변수로
//! 결정됩니다.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingConfig;
use crate::generation::GenerationConfig;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.cook-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cook-rag")
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// 레시피 마크다운 코퍼스 루트
    pub data_dir: PathBuf,
    /// 벡터 인덱스 저장 디렉토리
    pub index_dir: PathBuf,
    /// 최종 반환 결과 수
    pub top_k: usize,
    /// 벡터 검색 팬아웃 (top_k와 독립)
    pub vector_fan_out: usize,
    /// 키워드 검색 팬아웃 (top_k와 독립)
    pub lexical_fan_out: usize,
    /// 임베딩 설정
    pub embedding: EmbeddingConfig,
    /// 답변 생성 설정
    pub generation: GenerationConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_root = get_data_dir();
        Self {
            data_dir: PathBuf::from("./data"),
            index_dir: data_root.join("index"),
            top_k: 3,
            vector_fan_out: 5,
            lexical_fan_out: 5,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl RagConfig {
    /// 환경변수를 반영한 설정 생성
    ///
    /// - `COOK_RAG_DATA_DIR`: 코퍼스 루트
    /// - `COOK_RAG_INDEX_DIR`: 인덱스 디렉토리
    /// - `COOK_RAG_TOP_K`: 반환 결과 수
    /// - `COOK_RAG_OFFLINE`: 1이면 해시 임베딩 사용 (네트워크 없음)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("COOK_RAG_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(dir) = std::env::var("COOK_RAG_INDEX_DIR") {
            if !dir.is_empty() {
                config.index_dir = PathBuf::from(dir);
            }
        }

        if let Ok(k) = std::env::var("COOK_RAG_TOP_K") {
            if let Ok(k) = k.parse::<usize>() {
                if k > 0 {
                    config.top_k = k;
                }
            }
        }

        if is_offline_env() {
            config.embedding = EmbeddingConfig::offline();
        }

        config
    }
}

/// 오프라인 모드 여부 (COOK_RAG_OFFLINE=1 또는 true)
pub fn is_offline_env() -> bool {
    std::env::var("COOK_RAG_OFFLINE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RagConfig::default();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.vector_fan_out, 5);
        assert_eq!(config.lexical_fan_out, 5);
        assert!(config.index_dir.ends_with("index"));
    }

    #[test]
    fn test_data_dir_suffix() {
        let dir = get_data_dir();
        assert!(dir.ends_with(".cook-rag"));
    }
}
