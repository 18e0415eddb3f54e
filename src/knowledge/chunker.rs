//! 청킹 모듈 - 구조 기반 텍스트 분할
//!
//! 문서를 헤딩 계층(레벨 1~3)을 따라 검색 단위로 나눕니다.
//! 레벨 1은 요리명, 레벨 2는 주요 섹션, 레벨 3은 하위 섹션에
//! 해당하며, 헤딩 텍스트는 청크 본문 안에 그대로 남습니다.
//! 청크 식별자/순번/크기는 이 모듈만 기록합니다.

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use super::loader::Document;
use crate::error::RagError;

// ============================================================================
// Chunk
// ============================================================================

/// 검색 단위 청크
///
/// 생성 이후 변경되지 않습니다. 메타데이터는 원본 문서에서 상속됩니다.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 프로세스 내 고유 식별자 (UUID v4)
    pub id: String,
    /// 청크 본문 (헤딩 포함)
    pub text: String,
    /// 상속된 문서 메타데이터
    pub metadata: super::loader::RecipeMetadata,
    /// 방출 배치 내 0-기반 순번
    pub batch_index: usize,
    /// 본문 길이 (문자 수)
    pub chunk_size: usize,
}

/// 개별 문서 분할 실패 기록 (문서는 통째로 한 청크로 폴백됨)
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub source_path: String,
    pub reason: String,
}

/// 청킹 결과 배치
#[derive(Debug, Default)]
pub struct ChunkBatch {
    pub chunks: Vec<Chunk>,
    pub failures: Vec<ChunkFailure>,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 분할 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 섹션 문자열로 분할
    fn split(&self, text: &str) -> Result<Vec<String>>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// 헤딩 패턴 (레벨 1~3)
fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,3})\s+").expect("valid heading regex"))
}

/// Markdown 인식 청커
///
/// 코드 블록 내부의 #은 헤딩으로 취급하지 않습니다.
/// 첫 헤딩 이전의 전문(前文)은 자체 섹션이 됩니다.
pub struct MarkdownChunker;

impl MarkdownChunker {
    pub fn new() -> Self {
        Self
    }

    /// 본문에 레벨 1~3 헤딩이 존재하는지 (코드 블록 제외)
    pub fn has_structure(text: &str) -> bool {
        let mut in_code_block = false;
        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                continue;
            }
            if !in_code_block && heading_re().is_match(line) {
                return true;
            }
        }
        false
    }
}

impl Default for MarkdownChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for MarkdownChunker {
    fn split(&self, text: &str) -> Result<Vec<String>> {
        let mut sections = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            // 코드 블록 추적
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            // 코드 블록 밖에서 헤딩을 만나면 새 섹션 시작
            if !in_code_block && heading_re().is_match(line) && !current.trim().is_empty() {
                sections.push(current.trim().to_string());
                current = String::new();
            }

            current.push_str(line);
            current.push('\n');
        }

        if !current.trim().is_empty() {
            sections.push(current.trim().to_string());
        }

        Ok(sections)
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// DocumentChunker
// ============================================================================

/// 문서 목록 -> 청크 배치 변환 단계
///
/// 분할 전략은 교체 가능하지만, 식별자/순번/크기 부여는
/// 항상 여기서 일어납니다.
pub struct DocumentChunker {
    splitter: Box<dyn Chunker>,
}

impl DocumentChunker {
    /// 분할 전략 지정 생성
    pub fn new(splitter: Box<dyn Chunker>) -> Self {
        Self { splitter }
    }

    /// 기본 Markdown 분할로 생성
    pub fn with_defaults() -> Self {
        Self::new(Box::new(MarkdownChunker::new()))
    }

    /// 문서 목록을 청크 배치로 분할
    ///
    /// 규칙:
    /// - 빈 문서 목록이면 not-ready 에러
    /// - 헤딩이 전혀 없는 문서는 경고 후 문서 전체를 한 청크로 방출
    /// - 분할 실패 문서는 기록 후 문서 전체를 한 청크로 폴백
    /// - 출력은 문서 순회 순서와 문서 내 헤딩 순서를 유지
    pub fn chunk_documents(&self, documents: &[Document]) -> Result<ChunkBatch> {
        if documents.is_empty() {
            return Err(RagError::NotReady("no documents loaded - call load first").into());
        }

        let mut batch = ChunkBatch::default();
        let mut batch_index = 0usize;

        for doc in documents {
            let sections = if !MarkdownChunker::has_structure(&doc.content) {
                tracing::warn!(
                    "No heading structure in {} - emitting whole document as one chunk",
                    doc.metadata.source_path
                );
                vec![doc.content.trim().to_string()]
            } else {
                match self.splitter.split(&doc.content) {
                    Ok(sections) if !sections.is_empty() => sections,
                    Ok(_) => vec![doc.content.trim().to_string()],
                    Err(e) => {
                        tracing::error!(
                            "Failed to split {} with {}: {} - falling back to whole document",
                            doc.metadata.source_path,
                            self.splitter.name(),
                            e
                        );
                        batch.failures.push(ChunkFailure {
                            source_path: doc.metadata.source_path.clone(),
                            reason: e.to_string(),
                        });
                        vec![doc.content.trim().to_string()]
                    }
                }
            };

            for text in sections {
                if text.is_empty() {
                    continue;
                }
                let chunk_size = text.chars().count();
                batch.chunks.push(Chunk {
                    id: Uuid::new_v4().to_string(),
                    text,
                    metadata: doc.metadata.clone(),
                    batch_index,
                    chunk_size,
                });
                batch_index += 1;
            }
        }

        tracing::info!(
            "Chunked {} documents into {} chunks ({} fallbacks)",
            documents.len(),
            batch.chunks.len(),
            batch.failures.len()
        );

        Ok(batch)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::loader::{Category, Difficulty, RecipeMetadata};
    use std::collections::HashSet;

    fn make_doc(name: &str, content: &str) -> Document {
        Document {
            content: content.to_string(),
            metadata: RecipeMetadata {
                source_path: format!("/data/meat_dish/{}.md", name),
                dish_name: name.to_string(),
                category: Category::MeatDish,
                difficulty: Difficulty::Easy,
            },
        }
    }

    #[test]
    fn test_split_on_heading_levels() {
        let chunker = MarkdownChunker::new();
        let text =
            "# 西红柿炒鸡蛋\n\n简介。\n\n## 原料\n\n西红柿、鸡蛋\n\n### 备注\n\n用熟透的西红柿。";
        let sections = chunker.split(text).unwrap();

        assert_eq!(sections.len(), 3);
        assert!(sections[0].starts_with("# 西红柿炒鸡蛋"));
        assert!(sections[1].starts_with("## 原料"));
        assert!(sections[2].starts_with("### 备注"));
    }

    #[test]
    fn test_deep_headings_stay_inline() {
        let chunker = MarkdownChunker::new();
        let text = "# Title\n\n#### not a split point\n\ncontent";
        let sections = chunker.split(text).unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].contains("#### not a split point"));
    }

    #[test]
    fn test_code_fence_not_split() {
        let chunker = MarkdownChunker::new();
        let text = "# Title\n\n```\n# comment inside code\n```\n\n## Section\n\nbody";
        let sections = chunker.split(text).unwrap();

        assert_eq!(sections.len(), 2);
        assert!(sections[0].contains("# comment inside code"));
    }

    #[test]
    fn test_preamble_before_first_heading() {
        let chunker = MarkdownChunker::new();
        let text = "intro line\n\n# Title\n\nbody";
        let sections = chunker.split(text).unwrap();

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], "intro line");
    }

    #[test]
    fn test_has_structure() {
        assert!(MarkdownChunker::has_structure("# title"));
        assert!(MarkdownChunker::has_structure("text\n## section"));
        assert!(!MarkdownChunker::has_structure("plain text only"));
        assert!(!MarkdownChunker::has_structure("```\n# inside code\n```"));
        // 레벨 4 이상은 구조로 보지 않음
        assert!(!MarkdownChunker::has_structure("#### deep only"));
    }

    #[test]
    fn test_chunk_documents_basic() {
        let chunker = DocumentChunker::with_defaults();
        let docs = vec![
            make_doc(
                "tomato_egg",
                "# 西红柿炒鸡蛋\n\n## 原料\n\n西红柿\n\n## 步骤\n\n炒",
            ),
            make_doc("plain", "레시피 없음 - 헤딩도 없음"),
        ];

        let batch = chunker.chunk_documents(&docs).unwrap();

        // 헤딩 문서는 3청크, 헤딩 없는 문서는 정확히 1청크
        assert_eq!(batch.chunks.len(), 4);
        assert!(batch.chunks.len() >= docs.len());
        assert!(batch.failures.is_empty());

        // 순번은 배치 전체에서 0부터 연속 증가
        for (i, chunk) in batch.chunks.iter().enumerate() {
            assert_eq!(chunk.batch_index, i);
            assert_eq!(chunk.chunk_size, chunk.text.chars().count());
        }

        // 문서 순회 순서 + 문서 내 헤딩 순서 유지
        assert!(batch.chunks[0].text.starts_with("# 西红柿炒鸡蛋"));
        assert!(batch.chunks[1].text.starts_with("## 原料"));
        assert!(batch.chunks[2].text.starts_with("## 步骤"));
        assert_eq!(batch.chunks[3].metadata.dish_name, "plain");
    }

    #[test]
    fn test_chunk_ids_unique() {
        let chunker = DocumentChunker::with_defaults();
        let docs: Vec<Document> = (0..10)
            .map(|i| make_doc(&format!("dish{}", i), "# A\n\n## B\n\nbody\n\n## C\n\nbody"))
            .collect();

        let batch = chunker.chunk_documents(&docs).unwrap();

        let ids: HashSet<&str> = batch.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), batch.chunks.len());
    }

    #[test]
    fn test_chunk_inherits_metadata() {
        let chunker = DocumentChunker::with_defaults();
        let docs = vec![make_doc("tomato_egg", "# A\n\n## B\n\nbody")];

        let batch = chunker.chunk_documents(&docs).unwrap();
        for chunk in &batch.chunks {
            assert_eq!(chunk.metadata.category, Category::MeatDish);
            assert_eq!(chunk.metadata.dish_name, "tomato_egg");
        }
    }

    #[test]
    fn test_empty_documents_not_ready() {
        let chunker = DocumentChunker::with_defaults();
        let result = chunker.chunk_documents(&[]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not ready"));
    }

    #[test]
    fn test_failing_splitter_falls_back() {
        struct BrokenChunker;
        impl Chunker for BrokenChunker {
            fn split(&self, _text: &str) -> Result<Vec<String>> {
                anyhow::bail!("splitter exploded")
            }
            fn name(&self) -> &'static str {
                "BrokenChunker"
            }
        }

        let chunker = DocumentChunker::new(Box::new(BrokenChunker));
        let docs = vec![make_doc("dish", "# A\n\n## B\n\nbody")];

        let batch = chunker.chunk_documents(&docs).unwrap();

        // 문서는 유실되지 않고 통째로 한 청크
        assert_eq!(batch.chunks.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.failures[0].reason.contains("splitter exploded"));
    }
}
