//! Knowledge 모듈 - 레시피 코퍼스 준비 + 하이브리드 검색
//!
//! - Loader: 마크다운 코퍼스 적재 및 메타데이터 부여
//! - Chunker: 헤딩 계층 기반 분할 + 청크 식별자 부여
//! - Vector: LanceDB 벡터 인덱스 (영속화)
//! - Lexical: 인메모리 FTS5 키워드 인덱스
//! - Hybrid: RRF 알고리즘으로 두 검색 결과 통합

mod chunker;
mod hybrid;
mod lexical;
mod loader;
mod vector;

// Re-exports
pub use chunker::{Chunk, ChunkBatch, ChunkFailure, Chunker, DocumentChunker, MarkdownChunker};
pub use hybrid::{HybridRetriever, HybridSearchResult, RetrieverConfig, SearchMethod};
pub use lexical::{LexicalHit, LexicalIndex};
pub use loader::{
    Category, Difficulty, Document, DocumentLoader, LoadFailure, LoadReport, RecipeMetadata,
};
pub use vector::{IndexManifest, VectorHit, VectorIndex};
