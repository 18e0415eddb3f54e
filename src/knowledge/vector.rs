//! 벡터 인덱스 - LanceDB 기반 시맨틱 검색
//!
//! 청크 임베딩을 LanceDB 테이블에 저장하고 ANN 검색을 제공합니다.
//! 임베딩 계산이 비용의 대부분이므로 build/add는 배치 연산이고,
//! 실행 간 재사용을 위해 영속화(매니페스트 포함)가 필수입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use super::loader::{Category, Difficulty, RecipeMetadata};
use crate::embedding::{EmbeddingConfig, EmbeddingProvider};
use crate::error::RagError;

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

/// 매니페스트 파일 이름 (임베딩 설정 호환성 검증용)
const MANIFEST_FILE: &str = "manifest.json";

// ============================================================================
// Types
// ============================================================================

/// 인덱스 매니페스트
///
/// 빌드 시점의 임베딩 설정을 기록합니다. load 시점의 설정과
/// 일치하지 않으면 인덱스를 재사용할 수 없습니다 (재구축 신호).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding: EmbeddingConfig,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

/// 벡터 검색 결과
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// 매칭된 청크
    pub chunk: Chunk,
    /// 유사도 스코어 (0.0 ~ 1.0, 클수록 유사)
    pub similarity: f32,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스
///
/// 질의 단계에서는 읽기 전용입니다. build는 기존 테이블을 통째로
/// 교체하므로, 질의 중 재구축은 교체-후-공개 방식으로만 합니다.
pub struct VectorIndex {
    db: Connection,
    index_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
}

impl VectorIndex {
    /// 인덱스 디렉토리 열기 (없으면 생성)
    ///
    /// 연결만 수립하며, 테이블 존재 여부는 확인하지 않습니다.
    pub async fn open(
        index_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        if embedder.dimension() != config.dimension {
            return Err(RagError::Config(format!(
                "embedder dimension {} does not match config dimension {}",
                embedder.dimension(),
                config.dimension
            ))
            .into());
        }

        if !index_dir.exists() {
            tokio::fs::create_dir_all(index_dir)
                .await
                .context("Failed to create index directory")?;
        }

        let path_str = index_dir
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            index_dir: index_dir.to_path_buf(),
            embedder,
            config: config.clone(),
        })
    }

    /// 저장된 인덱스 로드
    ///
    /// 경로/매니페스트/테이블이 없거나, 매니페스트가 손상되었거나,
    /// 임베딩 설정이 맞지 않으면 모두 "인덱스 없음"으로 취급해
    /// `Ok(None)`을 반환합니다 (호출자는 새로 구축). 원인은 로그로 남깁니다.
    pub async fn load(
        index_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
    ) -> Result<Option<Self>> {
        if !index_dir.exists() {
            tracing::info!("No vector index at {} - build required", index_dir.display());
            return Ok(None);
        }

        let manifest_path = index_dir.join(MANIFEST_FILE);
        let manifest_raw = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    "No readable manifest at {}: {} - treating as no index",
                    manifest_path.display(),
                    e
                );
                return Ok(None);
            }
        };

        let manifest: IndexManifest = match serde_json::from_str(&manifest_raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(
                    "Corrupted index manifest at {}: {} - treating as no index",
                    manifest_path.display(),
                    e
                );
                return Ok(None);
            }
        };

        if manifest.embedding != *config {
            tracing::error!(
                "Index embedding config mismatch (stored: {}/{}d, requested: {}/{}d) - rebuild required",
                manifest.embedding.model,
                manifest.embedding.dimension,
                config.model,
                config.dimension
            );
            return Ok(None);
        }

        let index = Self::open(index_dir, embedder, config).await?;
        if !index.table_exists().await {
            tracing::warn!(
                "Manifest present but table missing at {} - treating as no index",
                index_dir.display()
            );
            return Ok(None);
        }

        tracing::info!(
            "Loaded vector index from {} ({} chunks)",
            index_dir.display(),
            manifest.chunk_count
        );
        Ok(Some(index))
    }

    /// 인덱스 구축 (기존 인덱스 교체)
    ///
    /// 모든 청크를 임베딩해 새 테이블을 만듭니다.
    /// 빈 청크 목록은 empty-input 에러입니다.
    pub async fn build(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput("cannot build vector index from zero chunks").into());
        }

        tracing::info!("Embedding {} chunks for vector index", chunks.len());
        let embeddings = self.embed_chunks(chunks).await?;
        let batch = self.chunks_to_batch(chunks, &embeddings)?;
        let schema = batch.schema();

        if self.table_exists().await {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop previous table")?;
        }

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(TABLE_NAME, batches)
            .execute()
            .await
            .context("Failed to create table")?;

        tracing::info!("Built vector index with {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// 기존 인덱스에 청크 추가
    ///
    /// 전체 재구축 없이 임베딩 후 덧붙입니다. build 이전에는 실패합니다.
    pub async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        if !self.table_exists().await {
            return Err(RagError::NotInitialized.into());
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embed_chunks(chunks).await?;
        let batch = self.chunks_to_batch(chunks, &embeddings)?;
        let schema = batch.schema();

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(batches)
            .execute()
            .await
            .context("Failed to add chunks to table")?;

        tracing::info!("Added {} chunks to vector index", chunks.len());
        Ok(chunks.len())
    }

    /// 시맨틱 검색
    ///
    /// 쿼리를 같은 프로바이더로 임베딩해 유사도 상위 k개 청크를
    /// 반환합니다. 인덱스가 없으면 에러 로그 후 빈 결과를 반환합니다
    /// (선택적 캐시 호출자의 흐름을 끊지 않기 위해).
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>> {
        if !self.table_exists().await {
            tracing::error!("Vector index not built or loaded - returning empty result");
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let results = table
            .vector_search(query_embedding)
            .context("Failed to create vector search")?
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = Vec::new();
        for batch in batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let chunk = decode_chunk(&batch, i)?;
                // 거리를 유사도로 변환 (L2 거리 -> 0~1 근사)
                let similarity = 1.0 / (1.0 + distances.value(i));
                hits.push(VectorHit { chunk, similarity });
            }
        }

        Ok(hits)
    }

    /// 매니페스트 저장
    ///
    /// 벡터 데이터는 쓰기 시점에 이미 디스크에 있으므로,
    /// 여기서는 load가 검증할 임베딩 설정 기록을 남깁니다.
    pub async fn save(&self) -> Result<()> {
        let manifest = IndexManifest {
            embedding: self.config.clone(),
            chunk_count: self.count().await?,
            created_at: Utc::now(),
        };

        let manifest_path = self.index_dir.join(MANIFEST_FILE);
        let raw = serde_json::to_string_pretty(&manifest)
            .context("Failed to serialize index manifest")?;
        std::fs::write(&manifest_path, raw).context("Failed to write index manifest")?;

        tracing::info!(
            "Saved index manifest to {} ({} chunks)",
            manifest_path.display(),
            manifest.chunk_count
        );
        Ok(())
    }

    /// 저장된 전체 청크 덤프 (batch_index 순)
    ///
    /// 영속화된 인덱스를 재사용할 때, 키워드 인덱스를 동일한 청크
    /// 집합에서 다시 만들기 위해 사용합니다 (융합 불변 조건 유지).
    pub async fn chunks(&self) -> Result<Vec<Chunk>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for dump")?;

        let total = table.count_rows(None).await.context("Failed to count rows")?;

        let results = table
            .query()
            .limit(total)
            .execute()
            .await
            .context("Failed to scan table")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut chunks = Vec::with_capacity(total);
        for batch in batches {
            for i in 0..batch.num_rows() {
                chunks.push(decode_chunk(&batch, i)?);
            }
        }

        chunks.sort_by_key(|c| c.batch_index);
        Ok(chunks)
    }

    /// 인덱싱된 청크 수
    pub async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    /// 검색 가능 상태 여부
    pub async fn is_ready(&self) -> bool {
        self.table_exists().await
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    /// 청크 본문 배치 임베딩 + 차원 검증
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed chunks")?;

        for embedding in &embeddings {
            if embedding.len() != self.config.dimension {
                anyhow::bail!(
                    "Embedding dimension mismatch: got {}, expected {}",
                    embedding.len(),
                    self.config.dimension
                );
            }
        }

        Ok(embeddings)
    }

    /// 테이블 스키마 생성
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("source_path", DataType::Utf8, false),
            Field::new("dish_name", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("difficulty", DataType::Utf8, false),
            Field::new("batch_index", DataType::Int32, false),
            Field::new("chunk_size", DataType::Int32, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.config.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 청크 + 임베딩을 Arrow RecordBatch로 변환
    fn chunks_to_batch(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<RecordBatch> {
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let source_paths: Vec<&str> = chunks
            .iter()
            .map(|c| c.metadata.source_path.as_str())
            .collect();
        let dish_names: Vec<&str> = chunks
            .iter()
            .map(|c| c.metadata.dish_name.as_str())
            .collect();
        let categories: Vec<&str> = chunks.iter().map(|c| c.metadata.category.label()).collect();
        let difficulties: Vec<&str> = chunks
            .iter()
            .map(|c| c.metadata.difficulty.label())
            .collect();
        let batch_indices: Vec<i32> = chunks.iter().map(|c| c.batch_index as i32).collect();
        let chunk_sizes: Vec<i32> = chunks.iter().map(|c| c.chunk_size as i32).collect();

        let embeddings_flat: Vec<f32> = embeddings.iter().flatten().copied().collect();
        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.config.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(source_paths)),
                Arc::new(StringArray::from(dish_names)),
                Arc::new(StringArray::from(categories)),
                Arc::new(StringArray::from(difficulties)),
                Arc::new(Int32Array::from(batch_indices)),
                Arc::new(Int32Array::from(chunk_sizes)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자열 컬럼에서 한 값 추출
fn batch_str<'a>(batch: &'a RecordBatch, name: &str, row: usize) -> Result<&'a str> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|a| a.value(row))
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// 정수 컬럼에서 한 값 추출
fn batch_i32(batch: &RecordBatch, name: &str, row: usize) -> Result<i32> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .map(|a| a.value(row))
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// RecordBatch 한 행을 Chunk로 복원
fn decode_chunk(batch: &RecordBatch, row: usize) -> Result<Chunk> {
    let category_label = batch_str(batch, "category", row)?;
    let difficulty_label = batch_str(batch, "difficulty", row)?;

    Ok(Chunk {
        id: batch_str(batch, "id", row)?.to_string(),
        text: batch_str(batch, "text", row)?.to_string(),
        metadata: RecipeMetadata {
            source_path: batch_str(batch, "source_path", row)?.to_string(),
            dish_name: batch_str(batch, "dish_name", row)?.to_string(),
            category: Category::from_label(category_label).unwrap_or(Category::Other),
            difficulty: Difficulty::from_label(difficulty_label).unwrap_or(Difficulty::Unknown),
        },
        batch_index: batch_i32(batch, "batch_index", row)? as usize,
        chunk_size: batch_i32(batch, "chunk_size", row)? as usize,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::loader::{Category, Difficulty};
    use tempfile::TempDir;

    fn offline_setup() -> (Arc<dyn EmbeddingProvider>, EmbeddingConfig) {
        let config = EmbeddingConfig::offline();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedding::new(config.clone()));
        (embedder, config)
    }

    fn make_chunk(id: &str, text: &str, batch_index: usize) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: RecipeMetadata {
                source_path: format!("/data/meat_dish/{}.md", id),
                dish_name: id.to_string(),
                category: Category::MeatDish,
                difficulty: Difficulty::Easy,
            },
            batch_index,
            chunk_size: text.chars().count(),
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            make_chunk("c1", "tomato and egg stir fry", 0),
            make_chunk("c2", "fresh tomato salad", 1),
            make_chunk("c3", "chicken broth simmered slowly", 2),
        ]
    }

    #[tokio::test]
    async fn test_build_and_search() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        let built = index.build(&sample_chunks()).await.unwrap();
        assert_eq!(built, 3);
        assert_eq!(index.count().await.unwrap(), 3);
        assert!(index.is_ready().await);

        let hits = index.search("tomato salad", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        // 가장 유사한 것이 앞에
        assert!(hits[0].similarity >= hits[1].similarity);
        assert_eq!(hits[0].chunk.id, "c2");
    }

    #[tokio::test]
    async fn test_build_empty_fails() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        let result = index.build(&[]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty input"));
    }

    #[tokio::test]
    async fn test_add_before_build_fails() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        let result = index.add(&sample_chunks()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_add_appends() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        index.build(&sample_chunks()).await.unwrap();
        index
            .add(&[make_chunk("c4", "braised pork belly", 3)])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_search_without_index_is_soft() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        // 에러가 아니라 빈 결과
        let hits = index.search("anything", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_build_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        index.build(&sample_chunks()).await.unwrap();
        index
            .build(&[make_chunk("solo", "only one chunk now", 0)])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();

        let before = {
            let index = VectorIndex::open(dir.path(), embedder.clone(), &config)
                .await
                .unwrap();
            index.build(&sample_chunks()).await.unwrap();
            index.save().await.unwrap();
            index.search("tomato", 2).await.unwrap()
        };

        let loaded = VectorIndex::load(dir.path(), embedder, &config)
            .await
            .unwrap()
            .expect("index should load");

        let after = loaded.search("tomato", 2).await.unwrap();

        let before_ids: Vec<&str> = before.iter().map(|h| h.chunk.id.as_str()).collect();
        let after_ids: Vec<&str> = after.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(before_ids, after_ids);
    }

    #[tokio::test]
    async fn test_load_missing_path_returns_none() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();

        let missing = dir.path().join("never_built");
        let loaded = VectorIndex::load(&missing, embedder, &config).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupted_manifest_returns_none() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();

        let index = VectorIndex::open(dir.path(), embedder.clone(), &config)
            .await
            .unwrap();
        index.build(&sample_chunks()).await.unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "not json at all").unwrap();

        let loaded = VectorIndex::load(dir.path(), embedder, &config).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_incompatible_config_returns_none() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();

        let index = VectorIndex::open(dir.path(), embedder.clone(), &config)
            .await
            .unwrap();
        index.build(&sample_chunks()).await.unwrap();
        index.save().await.unwrap();

        // 정규화 플래그가 다르면 벡터 의미가 달라지므로 재사용 불가
        let mut other = config.clone();
        other.normalize = false;
        let other_embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(HashEmbedding::new(other.clone()));

        let loaded = VectorIndex::load(dir.path(), other_embedder, &other)
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_chunks_dump_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (embedder, config) = offline_setup();
        let index = VectorIndex::open(dir.path(), embedder, &config).await.unwrap();

        let source = sample_chunks();
        index.build(&source).await.unwrap();

        let dumped = index.chunks().await.unwrap();
        assert_eq!(dumped.len(), source.len());

        for (original, restored) in source.iter().zip(dumped.iter()) {
            assert_eq!(original.id, restored.id);
            assert_eq!(original.text, restored.text);
            assert_eq!(original.metadata, restored.metadata);
            assert_eq!(original.batch_index, restored.batch_index);
            assert_eq!(original.chunk_size, restored.chunk_size);
        }
    }
}
