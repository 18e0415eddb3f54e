//! 하이브리드 검색 - 벡터 + 키워드 RRF 융합
//!
//! RRF (Reciprocal Rank Fusion) 알고리즘으로 벡터 검색(LanceDB)과
//! 키워드 검색(FTS5)의 랭킹을 하나로 합칩니다. 융합 키는 청크 id이며,
//! 두 인덱스가 같은 청크 집합으로 구축되었음을 전제합니다.
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;

use anyhow::Result;

use super::chunker::Chunk;
use super::lexical::{LexicalHit, LexicalIndex};
use super::vector::{VectorHit, VectorIndex};
use crate::error::RagError;

/// RRF 감쇠 상수
///
/// 리스트 깊숙한 곳의 순위 차이가 스코어에 주는 영향을 평탄화합니다.
const RRF_K: f32 = 60.0;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과가 나온 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    /// 벡터 검색에서만 등장
    Vector,
    /// 키워드 검색에서만 등장
    Lexical,
    /// 양쪽 모두 등장 (스코어 합산)
    Hybrid,
}

/// 융합된 검색 결과
///
/// 청크는 불변이므로 융합 스코어는 결과 쪽에 붙습니다.
#[derive(Debug, Clone)]
pub struct HybridSearchResult {
    /// 매칭된 청크
    pub chunk: Chunk,
    /// RRF 융합 스코어 (클수록 관련 높음)
    pub rrf_score: f32,
    /// 검색 경로
    pub method: SearchMethod,
}

/// 검색 팬아웃 설정
///
/// 각 하위 검색이 융합 전에 가져오는 후보 수입니다. top_k와 독립이며
/// 보통 top_k 이상으로 둡니다.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub vector_fan_out: usize,
    pub lexical_fan_out: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            vector_fan_out: 5,
            lexical_fan_out: 5,
        }
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 구축 완료된 벡터 인덱스와 비어 있지 않은 키워드 인덱스를
/// 요구합니다 (2단계 생성 - 전제 조건 미충족 시 즉시 실패).
pub struct HybridRetriever {
    vector: VectorIndex,
    lexical: LexicalIndex,
    config: RetrieverConfig,
}

impl HybridRetriever {
    /// 새 하이브리드 검색기 생성
    pub async fn new(
        vector: VectorIndex,
        lexical: LexicalIndex,
        config: RetrieverConfig,
    ) -> Result<Self> {
        if !vector.is_ready().await {
            return Err(RagError::NotReady("vector index not ready - build or load it first").into());
        }
        if lexical.is_empty() {
            return Err(RagError::EmptyInput("empty corpus - lexical index has no chunks").into());
        }

        Ok(Self {
            vector,
            lexical,
            config,
        })
    }

    /// 하이브리드 검색 (RRF 융합)
    ///
    /// 두 하위 검색을 동시에 실행하고, 결과 랭킹을 RRF로 합쳐
    /// 상위 top_k를 반환합니다. 한쪽이 비면 남은 쪽만으로 진행하고,
    /// 양쪽 다 비면 빈 결과입니다.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<HybridSearchResult>> {
        tracing::debug!("Hybrid search: \"{}\" (top_k={})", query, top_k);

        let (vector_results, lexical_results) = tokio::join!(
            self.vector.search(query, self.config.vector_fan_out),
            async { self.lexical.search(query, self.config.lexical_fan_out) },
        );
        let vector_hits = vector_results?;
        let lexical_hits = lexical_results?;

        let mut fused = rrf_fuse(&vector_hits, &lexical_hits);
        fused.truncate(top_k);

        tracing::debug!(
            "Hybrid search done: {} vector + {} lexical -> {} fused",
            vector_hits.len(),
            lexical_hits.len(),
            fused.len()
        );
        Ok(fused)
    }

    /// 내부 벡터 인덱스 접근
    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector
    }

    /// 내부 키워드 인덱스 접근
    pub fn lexical_index(&self) -> &LexicalIndex {
        &self.lexical
    }
}

// ============================================================================
// RRF Fusion
// ============================================================================

/// RRF (Reciprocal Rank Fusion)
///
/// 순위 r(0-기반)의 결과에 `1 / (K + r + 1)`을 부여하고 청크 id로
/// 스코어를 합산합니다. 동점은 먼저 등장한 쪽이 앞서며, 벡터 리스트를
/// 먼저 병합하므로 벡터 결과가 우선합니다.
fn rrf_fuse(vector_hits: &[VectorHit], lexical_hits: &[LexicalHit]) -> Vec<HybridSearchResult> {
    struct FusedEntry {
        chunk: Chunk,
        score: f32,
        first_seen: usize,
        in_vector: bool,
        in_lexical: bool,
    }

    let mut entries: HashMap<&str, FusedEntry> = HashMap::new();
    let mut order = 0usize;

    // 벡터 결과 먼저 병합
    for (rank, hit) in vector_hits.iter().enumerate() {
        let rrf_score = 1.0 / (RRF_K + rank as f32 + 1.0);
        let entry = entries.entry(hit.chunk.id.as_str()).or_insert_with(|| {
            let e = FusedEntry {
                chunk: hit.chunk.clone(),
                score: 0.0,
                first_seen: order,
                in_vector: false,
                in_lexical: false,
            };
            order += 1;
            e
        });
        entry.score += rrf_score;
        entry.in_vector = true;
    }

    // 키워드 결과 병합
    for (rank, hit) in lexical_hits.iter().enumerate() {
        let rrf_score = 1.0 / (RRF_K + rank as f32 + 1.0);
        let entry = entries.entry(hit.chunk.id.as_str()).or_insert_with(|| {
            let e = FusedEntry {
                chunk: hit.chunk.clone(),
                score: 0.0,
                first_seen: order,
                in_vector: false,
                in_lexical: false,
            };
            order += 1;
            e
        });
        entry.score += rrf_score;
        entry.in_lexical = true;
    }

    let mut fused: Vec<FusedEntry> = entries.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.first_seen.cmp(&b.first_seen))
    });

    fused
        .into_iter()
        .map(|entry| {
            let method = match (entry.in_vector, entry.in_lexical) {
                (true, true) => SearchMethod::Hybrid,
                (true, false) => SearchMethod::Vector,
                _ => SearchMethod::Lexical,
            };
            HybridSearchResult {
                chunk: entry.chunk,
                rrf_score: entry.score,
                method,
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
