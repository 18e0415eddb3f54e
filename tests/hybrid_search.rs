//! 파이프라인 통합 테스트
//!
//! 해시 임베딩(결정적, 네트워크 없음)으로 임시 코퍼스를 적재해
//! 적재 -> 청킹 -> 이중 인덱스 -> RRF 융합까지 끝에서 끝으로 검증합니다.

use std::fs;
use std::path::Path;

use cook_rag::{Category, EmbeddingConfig, RagConfig, RagSystem};
use tempfile::TempDir;

fn write_file(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn offline_config(data_dir: &Path, index_dir: &Path) -> RagConfig {
    RagConfig {
        data_dir: data_dir.to_path_buf(),
        index_dir: index_dir.to_path_buf(),
        embedding: EmbeddingConfig::offline(),
        ..RagConfig::default()
    }
}

/// 시나리오 코퍼스: 토마토 요리 둘 + 무관한 국물 요리 하나
fn seed_corpus(dir: &Path) {
    write_file(
        dir,
        "meat_dish/tomato_and_egg.md",
        "# 西红柿炒鸡蛋\n\n预估烹饪难度：★\n\n## 原料\n\ntomato and egg\n\n## 步骤\n\nstir fry the tomato with egg",
    );
    write_file(
        dir,
        "vegetable_dish/tomato_salad.md",
        "# 凉拌西红柿\n\n## 原料\n\ntomato salad with sugar\n\n## 步骤\n\nslice the tomato and serve cold",
    );
    write_file(
        dir,
        "soup/chicken_broth.md",
        "# 鸡汤\n\n## 原料\n\nchicken broth bones\n\n## 步骤\n\nsimmer the chicken slowly",
    );
}

#[tokio::test]
async fn test_tomato_scenario_ranks_tomato_dishes_first() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    seed_corpus(data.path());

    let system = RagSystem::new(offline_config(data.path(), index.path())).unwrap();
    let prepared = system.prepare(false).await.unwrap();

    // 문서 3건, 각각 헤딩 구조 -> 청크는 문서 수 이상
    assert_eq!(prepared.stats.documents, 3);
    assert!(prepared.stats.chunks >= 3);

    let results = prepared.retriever.search("tomato", 2).await.unwrap();
    assert_eq!(results.len(), 2);

    // 상위 2건은 토마토 요리에서 나와야 함
    for result in &results {
        let category = result.chunk.metadata.category;
        assert!(
            category == Category::MeatDish || category == Category::VegetableDish,
            "unexpected category in top results: {}",
            category
        );
        assert_ne!(category, Category::Soup);
    }

    // 난이도 메타데이터가 검색 결과까지 전달됨
    let meat = results
        .iter()
        .find(|r| r.chunk.metadata.category == Category::MeatDish);
    if let Some(meat) = meat {
        assert_eq!(meat.chunk.metadata.difficulty.label(), "very_easy");
    }
}

#[tokio::test]
async fn test_search_is_idempotent() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    seed_corpus(data.path());

    let system = RagSystem::new(offline_config(data.path(), index.path())).unwrap();
    let prepared = system.prepare(false).await.unwrap();

    let first = prepared.retriever.search("tomato salad", 5).await.unwrap();
    let second = prepared.retriever.search("tomato salad", 5).await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.chunk.id, b.chunk.id);
        assert_eq!(a.rrf_score, b.rrf_score);
    }
}

#[tokio::test]
async fn test_top_k_overshoot_returns_all_without_padding() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    seed_corpus(data.path());

    let system = RagSystem::new(offline_config(data.path(), index.path())).unwrap();
    let prepared = system.prepare(false).await.unwrap();

    let results = prepared.retriever.search("tomato", 100).await.unwrap();

    // 패딩 없이 실제 융합 결과만
    assert!(!results.is_empty());
    assert!(results.len() <= prepared.stats.chunks);

    let mut ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), results.len());
}

#[tokio::test]
async fn test_persisted_index_reuse_gives_same_results() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    seed_corpus(data.path());

    let config = offline_config(data.path(), index.path());

    let fresh_ids: Vec<String> = {
        let system = RagSystem::new(config.clone()).unwrap();
        let prepared = system.prepare(false).await.unwrap();
        assert!(!prepared.stats.reused_index);

        prepared
            .retriever
            .search("tomato", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.id)
            .collect()
    };

    // 두 번째 준비는 저장된 인덱스를 재사용하고 동일한 결과를 내야 함
    let system = RagSystem::new(config).unwrap();
    let prepared = system.prepare(false).await.unwrap();
    assert!(prepared.stats.reused_index);

    let reused_ids: Vec<String> = prepared
        .retriever
        .search("tomato", 2)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.chunk.id)
        .collect();

    assert_eq!(fresh_ids, reused_ids);
}

#[tokio::test]
async fn test_lexical_miss_still_returns_vector_side() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    seed_corpus(data.path());

    let system = RagSystem::new(offline_config(data.path(), index.path())).unwrap();
    let prepared = system.prepare(false).await.unwrap();

    // 코퍼스에 없는 단어: 키워드 쪽은 0건이지만 벡터 쪽 결과로 채워짐
    let results = prepared.retriever.search("mystery casserole", 3).await.unwrap();
    assert!(!results.is_empty());

    // 기호만 있는 쿼리: 키워드 쿼리는 정제 후 비어도 실패하지 않음
    let results = prepared.retriever.search("???", 3).await.unwrap();
    assert!(results.len() <= 3);
}

#[tokio::test]
async fn test_headingless_document_still_retrievable() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();

    // 헤딩 없는 문서도 통째로 한 청크가 되어 검색에 잡혀야 함
    write_file(
        data.path(),
        "meat_dish/scribble.md",
        "braised pork belly with soy sauce and rock sugar",
    );
    write_file(
        data.path(),
        "soup/chicken_broth.md",
        "# 鸡汤\n\n## 原料\n\nchicken broth",
    );

    let system = RagSystem::new(offline_config(data.path(), index.path())).unwrap();
    let prepared = system.prepare(false).await.unwrap();

    assert_eq!(prepared.stats.documents, 2);

    let results = prepared.retriever.search("braised pork", 3).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.metadata.dish_name, "scribble");
}
