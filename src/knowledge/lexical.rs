//! 키워드 인덱스 - SQLite FTS5 (BM25)
//!
//! 청크 본문 전체에 대한 단어 빈도 기반 랭킹 구조입니다.
//! 구축이 저렴하므로 영속화하지 않고, 코퍼스 버전이 바뀔 때마다
//! 벡터 인덱스와 같은 청크 집합으로 다시 만듭니다 (융합 불변 조건).
//! source: https://www.sqlite.org/fts5.html

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::chunker::Chunk;
use crate::error::RagError;

// ============================================================================
// Types
// ============================================================================

/// 키워드 검색 결과
#[derive(Debug, Clone)]
pub struct LexicalHit {
    /// 매칭된 청크
    pub chunk: Chunk,
    /// 관련도 스코어 (bm25 부호 반전, 클수록 관련 높음)
    pub score: f32,
}

// ============================================================================
// LexicalIndex
// ============================================================================

/// 인메모리 FTS5 키워드 인덱스
///
/// 생성 후에는 읽기 전용입니다. 재구축은 새 인스턴스로 교체합니다.
#[derive(Debug)]
pub struct LexicalIndex {
    conn: Arc<Mutex<Connection>>,
    chunks: HashMap<String, Chunk>,
}

impl LexicalIndex {
    /// 청크 집합에서 인덱스 구축
    ///
    /// 빈 목록은 empty-input 에러입니다.
    pub fn build(chunks: &[Chunk]) -> Result<Self> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput("lexical index requires at least one chunk").into());
        }

        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;

        conn.execute(
            "CREATE VIRTUAL TABLE chunks_fts USING fts5(chunk_id UNINDEXED, body)",
            [],
        )
        .context("Failed to create FTS5 table")?;

        let mut map = HashMap::with_capacity(chunks.len());

        {
            let mut stmt = conn
                .prepare("INSERT INTO chunks_fts (chunk_id, body) VALUES (?1, ?2)")
                .context("Failed to prepare FTS5 insert")?;

            for chunk in chunks {
                stmt.execute(params![chunk.id, chunk.text])
                    .context("Failed to insert chunk into FTS5")?;
                map.insert(chunk.id.clone(), chunk.clone());
            }
        }

        tracing::debug!("Built lexical index over {} chunks", chunks.len());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            chunks: map,
        })
    }

    /// 인덱싱된 청크 수
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// BM25 키워드 검색
    ///
    /// 관련도 순(최상위 우선)으로 최대 k건 반환합니다.
    /// 정제 후 빈 쿼리이거나 매칭이 없으면 빈 목록입니다.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let escaped_query = escape_fts5_query(query);
        if escaped_query.is_empty() {
            return Ok(vec![]);
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn
            .prepare(
                "SELECT chunk_id, bm25(chunks_fts) AS bm25_score
                 FROM chunks_fts
                 WHERE chunks_fts MATCH ?1
                 ORDER BY bm25(chunks_fts)
                 LIMIT ?2",
            )
            .context("Failed to prepare FTS5 search")?;

        let rows = stmt
            .query_map(params![escaped_query, k as i64], |row| {
                let chunk_id: String = row.get(0)?;
                let bm25_score: f64 = row.get(1)?;
                Ok((chunk_id, bm25_score))
            })
            .context("Failed to run FTS5 search")?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk_id, bm25_score) = row?;
            if let Some(chunk) = self.chunks.get(&chunk_id) {
                // bm25는 작을수록 관련이 높으므로 부호를 뒤집어 통일
                hits.push(LexicalHit {
                    chunk: chunk.clone(),
                    score: -(bm25_score as f32),
                });
            }
        }

        Ok(hits)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// FTS5 쿼리 이스케이프
///
/// 특수 문자를 제거하고 단어만 추출합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts5_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::loader::{Category, Difficulty, RecipeMetadata};

    fn make_chunk(id: &str, text: &str, batch_index: usize) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: RecipeMetadata {
                source_path: format!("/data/{}.md", id),
                dish_name: id.to_string(),
                category: Category::Other,
                difficulty: Difficulty::Unknown,
            },
            batch_index,
            chunk_size: text.chars().count(),
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            make_chunk("c1", "tomato and egg stir fry with scallions", 0),
            make_chunk("c2", "fresh tomato salad with olive oil", 1),
            make_chunk("c3", "chicken broth simmered for hours", 2),
        ]
    }

    #[test]
    fn test_build_and_search() {
        let index = LexicalIndex::build(&sample_chunks()).unwrap();
        assert_eq!(index.len(), 3);

        let hits = index.search("tomato", 10).unwrap();
        assert_eq!(hits.len(), 2);

        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"c2"));
    }

    #[test]
    fn test_build_empty_fails() {
        let result = LexicalIndex::build(&[]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty input"));
    }

    #[test]
    fn test_search_no_match() {
        let index = LexicalIndex::build(&sample_chunks()).unwrap();
        let hits = index.search("dumplings", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_sanitized_to_empty() {
        let index = LexicalIndex::build(&sample_chunks()).unwrap();
        let hits = index.search("!!! ???", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_respects_limit() {
        let index = LexicalIndex::build(&sample_chunks()).unwrap();
        let hits = index.search("tomato", 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_scores_descending() {
        let index = LexicalIndex::build(&sample_chunks()).unwrap();
        let hits = index.search("tomato salad", 10).unwrap();
        assert!(!hits.is_empty());

        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // 두 단어 모두 포함한 c2가 최상위
        assert_eq!(hits[0].chunk.id, "c2");
    }

    #[test]
    fn test_escape_fts5_query() {
        assert_eq!(escape_fts5_query("hello world"), "hello world");
        assert_eq!(escape_fts5_query("  "), "");
        assert_eq!(escape_fts5_query("hello:world"), "helloworld");
        assert_eq!(escape_fts5_query("test-query_123"), "test-query_123");
    }
}
