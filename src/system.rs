//! 시스템 파사드 - 파이프라인 조립
//!
//! 적재 -> 청킹 -> 인덱스 구축(또는 재사용) -> 검색기 생성의
//! 1회성 빌드 단계를 묶습니다. 질의 단계는 여기서 만든
//! HybridRetriever를 반복 사용합니다.

use std::sync::Arc;

use anyhow::Result;

use crate::config::RagConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::RagError;
use crate::knowledge::{
    DocumentChunker, DocumentLoader, HybridRetriever, LexicalIndex, RetrieverConfig, VectorIndex,
};

// ============================================================================
// Types
// ============================================================================

/// 빌드 단계 통계
#[derive(Debug, Clone, Default)]
pub struct CorpusStats {
    /// 적재된 문서 수
    pub documents: usize,
    /// 인덱싱된 청크 수
    pub chunks: usize,
    /// 적재 단계에서 건너뛴 파일 수
    pub load_failures: usize,
    /// 분할 폴백이 발생한 문서 수
    pub chunk_failures: usize,
    /// 저장된 벡터 인덱스를 재사용했는지
    pub reused_index: bool,
}

/// 빌드 완료 상태
pub struct PreparedIndex {
    pub retriever: HybridRetriever,
    pub stats: CorpusStats,
}

// ============================================================================
// RagSystem
// ============================================================================

/// 레시피 RAG 시스템
///
/// 생성 시점에 임베딩 프로바이더를 확정합니다
/// (API 키 누락 등 설정 오류는 여기서 즉시 실패).
pub struct RagSystem {
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RagSystem {
    /// 설정으로 시스템 생성
    pub fn new(config: RagConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self { config, embedder })
    }

    /// 설정 접근
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// 지식 베이스 준비
    ///
    /// 저장된 벡터 인덱스가 유효하면 재사용하고, 아니면 코퍼스를
    /// 적재/청킹해 새로 구축합니다. 키워드 인덱스는 어느 경로든
    /// 벡터 인덱스와 동일한 청크 집합으로 만들어집니다.
    pub async fn prepare(&self, force_rebuild: bool) -> Result<PreparedIndex> {
        if !force_rebuild {
            if let Some(prepared) = self.try_reuse().await? {
                return Ok(prepared);
            }
        }

        self.build_fresh().await
    }

    /// 저장된 인덱스 재사용 시도
    ///
    /// 인덱스가 없거나 호환되지 않으면 None (새로 구축).
    async fn try_reuse(&self) -> Result<Option<PreparedIndex>> {
        let vector = match VectorIndex::load(
            &self.config.index_dir,
            self.embedder.clone(),
            &self.config.embedding,
        )
        .await?
        {
            Some(v) => v,
            None => return Ok(None),
        };

        // 키워드 인덱스는 저장된 청크 집합에서 재구축 (융합 키 일치 보장)
        let chunks = vector.chunks().await?;
        if chunks.is_empty() {
            tracing::warn!("Loaded vector index is empty - rebuilding from corpus");
            return Ok(None);
        }

        let documents = {
            let mut paths: Vec<&str> =
                chunks.iter().map(|c| c.metadata.source_path.as_str()).collect();
            paths.sort();
            paths.dedup();
            paths.len()
        };

        let lexical = LexicalIndex::build(&chunks)?;
        let chunk_count = chunks.len();
        let retriever = HybridRetriever::new(vector, lexical, self.retriever_config()).await?;

        tracing::info!("Reusing persisted index ({} chunks)", chunk_count);

        Ok(Some(PreparedIndex {
            retriever,
            stats: CorpusStats {
                documents,
                chunks: chunk_count,
                load_failures: 0,
                chunk_failures: 0,
                reused_index: true,
            },
        }))
    }

    /// 코퍼스에서 전체 재구축
    async fn build_fresh(&self) -> Result<PreparedIndex> {
        let mut loader = DocumentLoader::new(&self.config.data_dir);
        let load_report = loader.load()?;

        if loader.documents().is_empty() {
            return Err(RagError::Config(format!(
                "no markdown documents under {}",
                self.config.data_dir.display()
            ))
            .into());
        }

        let chunker = DocumentChunker::with_defaults();
        let batch = chunker.chunk_documents(loader.documents())?;

        let vector = VectorIndex::open(
            &self.config.index_dir,
            self.embedder.clone(),
            &self.config.embedding,
        )
        .await?;
        vector.build(&batch.chunks).await?;
        vector.save().await?;

        let lexical = LexicalIndex::build(&batch.chunks)?;

        let stats = CorpusStats {
            documents: loader.documents().len(),
            chunks: batch.chunks.len(),
            load_failures: load_report.failures.len(),
            chunk_failures: batch.failures.len(),
            reused_index: false,
        };

        let retriever = HybridRetriever::new(vector, lexical, self.retriever_config()).await?;

        Ok(PreparedIndex { retriever, stats })
    }

    fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            vector_fan_out: self.config.vector_fan_out,
            lexical_fan_out: self.config.lexical_fan_out,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
