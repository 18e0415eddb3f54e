//! cook-rag - 레시피 QA를 위한 로컬 하이브리드 RAG 파이프라인
//!
//! 마크다운 레시피 코퍼스를 적재해 헤딩 구조로 청킹하고,
//! LanceDB 벡터 검색 + SQLite FTS5 키워드 검색을 RRF로 융합해
//! 답변 생성의 근거 청크를 찾습니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod knowledge;
pub mod system;

// Re-exports
pub use config::{get_data_dir, RagConfig};
pub use embedding::{
    create_embedder, has_api_key, EmbeddingConfig, EmbeddingProvider, GeminiEmbedding,
    HashEmbedding,
};
pub use error::RagError;
pub use generation::{build_context, has_chat_key, ChatClient, GenerationConfig};
pub use knowledge::{
    Category, Chunk, ChunkBatch, Chunker, Difficulty, Document, DocumentChunker, DocumentLoader,
    HybridRetriever, HybridSearchResult, LexicalHit, LexicalIndex, MarkdownChunker,
    RecipeMetadata, RetrieverConfig, SearchMethod, VectorHit, VectorIndex,
};
pub use system::{CorpusStats, PreparedIndex, RagSystem};
