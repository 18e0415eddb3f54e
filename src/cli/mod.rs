//! CLI 모듈
//!
//! cook-rag CLI 명령어 정의 및 구현.
//! 인터랙티브 루프, 환경변수 설정, 인자 파싱은 전부 이 계층의
//! 관심사이며 핵심 파이프라인에는 들어가지 않습니다.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RagConfig;
use crate::embedding::has_api_key;
use crate::generation::{has_chat_key, ChatClient};
use crate::knowledge::{HybridRetriever, SearchMethod, VectorIndex};
use crate::system::{PreparedIndex, RagSystem};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "cook-rag")]
#[command(version, about = "레시피 QA 하이브리드 RAG 시스템", long_about = None)]
pub struct Cli {
    /// 레시피 코퍼스 루트 (기본: COOK_RAG_DATA_DIR 또는 ./data)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 벡터 인덱스 디렉토리 (기본: COOK_RAG_INDEX_DIR)
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 코퍼스를 적재하고 인덱스를 구축
    Build {
        /// 저장된 인덱스가 있어도 강제로 재구축
        #[arg(long)]
        force: bool,
    },

    /// 검색만 수행 (답변 생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short = 'k', long, default_value = "5")]
        limit: usize,
    },

    /// 질문 하나에 답변
    Ask {
        /// 사용자 질문
        question: String,

        /// 근거로 쓸 결과 개수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// 인터랙티브 질의응답 루프
    Chat,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.index_dir {
        config.index_dir = dir;
    }

    match cli.command {
        Commands::Build { force } => cmd_build(config, force).await,
        Commands::Search { query, limit } => cmd_search(config, &query, limit).await,
        Commands::Ask { question, top_k } => cmd_ask(config, &question, top_k).await,
        Commands::Chat => cmd_chat(config).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱스 구축 명령어 (build)
async fn cmd_build(config: RagConfig, force: bool) -> Result<()> {
    println!("[*] 코퍼스 적재 및 인덱스 구축 중: {}", config.data_dir.display());

    let system = RagSystem::new(config).context("RagSystem 초기화 실패")?;
    let prepared = system.prepare(force).await.context("인덱스 구축 실패")?;

    if prepared.stats.reused_index {
        println!("[OK] 저장된 인덱스 재사용 ({} 청크)", prepared.stats.chunks);
    } else {
        println!(
            "[OK] 구축 완료: 문서 {} 건 -> 청크 {} 개",
            prepared.stats.documents, prepared.stats.chunks
        );
        if prepared.stats.load_failures > 0 {
            println!("[!] 적재 실패로 건너뛴 파일: {} 건", prepared.stats.load_failures);
        }
        if prepared.stats.chunk_failures > 0 {
            println!("[!] 분할 폴백 문서: {} 건", prepared.stats.chunk_failures);
        }
    }

    Ok(())
}

/// 검색 명령어 (search)
///
/// 하이브리드 검색 결과를 답변 생성 없이 그대로 보여줍니다.
async fn cmd_search(config: RagConfig, query: &str, limit: usize) -> Result<()> {
    println!("[*] 검색 중: \"{}\"", query);

    let system = RagSystem::new(config).context("RagSystem 초기화 실패")?;
    let prepared = system.prepare(false).await.context("인덱스 준비 실패")?;

    let results = prepared
        .retriever
        .search(query, limit)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    print_results(&results);

    Ok(())
}

/// 단일 질문 명령어 (ask)
async fn cmd_ask(config: RagConfig, question: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(config.top_k);
    let generation = config.generation.clone();

    let chat = ChatClient::from_env(generation).context("ChatClient 초기화 실패")?;

    let system = RagSystem::new(config).context("RagSystem 초기화 실패")?;
    let prepared = system.prepare(false).await.context("인덱스 준비 실패")?;

    println!("[*] 검색 중: \"{}\"", question);
    let results = prepared
        .retriever
        .search(question, top_k)
        .await
        .context("검색 실패")?;

    println!("[*] 답변 생성 중...\n");
    let answer = chat.answer(question, &results).await.context("답변 생성 실패")?;

    println!("{}", answer);
    Ok(())
}

/// 인터랙티브 루프 명령어 (chat)
///
/// 인덱스는 한 번만 준비하고 질문마다 검색 + 생성을 반복합니다.
/// 개별 질문의 실패는 루프를 끊지 않습니다.
async fn cmd_chat(config: RagConfig) -> Result<()> {
    let top_k = config.top_k;
    let generation = config.generation.clone();

    let chat = ChatClient::from_env(generation).context("ChatClient 초기화 실패")?;

    let system = RagSystem::new(config).context("RagSystem 초기화 실패")?;
    println!("[*] 지식 베이스 준비 중...");
    let PreparedIndex { retriever, stats } =
        system.prepare(false).await.context("인덱스 준비 실패")?;

    println!("[OK] 준비 완료 ({} 청크)", stats.chunks);
    println!();
    println!("레시피 질의응답을 시작합니다. 'quit' 또는 'exit'로 종료합니다.");

    let stdin = std::io::stdin();
    loop {
        print!("\n질문> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line).context("입력 읽기 실패")? == 0 {
            break; // EOF
        }

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if ["quit", "exit", "종료"].contains(&question.to_lowercase().as_str()) {
            break;
        }

        match answer_one(&retriever, &chat, question, top_k).await {
            Ok(answer) => println!("\n{}", answer),
            Err(e) => {
                tracing::error!("Failed to answer question: {:#}", e);
                println!("[!] 오류: {}", e);
            }
        }
    }

    println!("이용해 주셔서 감사합니다!");
    Ok(())
}

/// 질문 하나 처리 (검색 + 생성)
async fn answer_one(
    retriever: &HybridRetriever,
    chat: &ChatClient,
    question: &str,
    top_k: usize,
) -> Result<String> {
    let results = retriever.search(question, top_k).await?;
    chat.answer(question, &results).await
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("cook-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 코퍼스 디렉토리: {}", config.data_dir.display());
    println!("[*] 인덱스 디렉토리: {}", config.index_dir.display());
    println!(
        "[*] 임베딩: {} ({}차원, normalize={})",
        config.embedding.model, config.embedding.dimension, config.embedding.normalize
    );

    if has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정 (GEMINI_API_KEY)");
    }

    if has_chat_key() {
        println!("[OK] 채팅 API 키: 설정됨");
    } else {
        println!("[!] 채팅 API 키: 미설정 (MOONSHOT_API_KEY)");
    }

    // 저장된 인덱스 확인 (없으면 재구축 안내만)
    match crate::embedding::create_embedder(&config.embedding) {
        Ok(embedder) => {
            match VectorIndex::load(&config.index_dir, embedder, &config.embedding).await {
                Ok(Some(index)) => {
                    let count = index.count().await.unwrap_or(0);
                    println!("[OK] 저장된 벡터 인덱스: {} 청크", count);
                }
                Ok(None) => {
                    println!("[!] 저장된 인덱스 없음 - `cook-rag build`로 구축하세요");
                }
                Err(e) => {
                    println!("[!] 인덱스 확인 실패: {}", e);
                }
            }
        }
        Err(e) => {
            tracing::debug!("Embedder unavailable for status check: {}", e);
            println!("[!] 임베딩 프로바이더를 만들 수 없어 인덱스 확인을 건너뜁니다");
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 검색 결과 출력
fn print_results(results: &[crate::knowledge::HybridSearchResult]) {
    for (i, result) in results.iter().enumerate() {
        let method_str = match result.method {
            SearchMethod::Vector => "VEC",
            SearchMethod::Lexical => "LEX",
            SearchMethod::Hybrid => "HYB",
        };

        let meta = &result.chunk.metadata;
        println!(
            "{}. [{}] [점수: {:.4}] {} ({}, {})",
            i + 1,
            method_str,
            result.rrf_score,
            meta.dish_name,
            meta.category,
            meta.difficulty
        );
        println!("   내용: {}", truncate_text(&result.chunk.text, 200));
        println!();
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
