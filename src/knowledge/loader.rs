//! 문서 로더 - 레시피 코퍼스 적재 및 메타데이터 부여
//!
//! 코퍼스 루트 아래의 마크다운 파일을 재귀적으로 찾아 문서로 만듭니다.
//! 파일 하나가 문서 하나이며, 적재 시점에 경로/내용에서 메타데이터
//! (분류, 요리명, 난이도)를 한 번 유도한 뒤에는 변경하지 않습니다.
//! 개별 파일의 읽기 실패는 기록하고 건너뜁니다 - 전체 스캔은 계속됩니다.

use std::path::{Path, PathBuf};

use anyhow::Result;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

// ============================================================================
// Category
// ============================================================================

/// 요리 분류
///
/// 코퍼스 디렉토리 구조에서 유도되는 고정 분류입니다.
/// 경로 세그먼트가 키워드 테이블과 일치하지 않으면 Other입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Aquatic,
    Breakfast,
    Condiment,
    Dessert,
    Drink,
    MeatDish,
    SemiFinished,
    Soup,
    Staple,
    VegetableDish,
    Other,
}

/// 경로 세그먼트 키워드 -> 분류 매핑 (첫 매칭 우선)
const CATEGORY_KEYWORDS: &[(&str, Category)] = &[
    ("aquatic", Category::Aquatic),
    ("breakfast", Category::Breakfast),
    ("condiment", Category::Condiment),
    ("dessert", Category::Dessert),
    ("drink", Category::Drink),
    ("meat", Category::MeatDish),
    ("semi-finished", Category::SemiFinished),
    ("soup", Category::Soup),
    ("staple", Category::Staple),
    ("vegetable", Category::VegetableDish),
];

impl Category {
    /// 표시용 라벨
    pub fn label(&self) -> &'static str {
        match self {
            Category::Aquatic => "aquatic",
            Category::Breakfast => "breakfast",
            Category::Condiment => "condiment",
            Category::Dessert => "dessert",
            Category::Drink => "drink",
            Category::MeatDish => "meat_dish",
            Category::SemiFinished => "semi_finished",
            Category::Soup => "soup",
            Category::Staple => "staple",
            Category::VegetableDish => "vegetable_dish",
            Category::Other => "other",
        }
    }

    /// 라벨에서 복원 (벡터 테이블 디코딩용)
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "aquatic" => Some(Category::Aquatic),
            "breakfast" => Some(Category::Breakfast),
            "condiment" => Some(Category::Condiment),
            "dessert" => Some(Category::Dessert),
            "drink" => Some(Category::Drink),
            "meat_dish" => Some(Category::MeatDish),
            "semi_finished" => Some(Category::SemiFinished),
            "soup" => Some(Category::Soup),
            "staple" => Some(Category::Staple),
            "vegetable_dish" => Some(Category::VegetableDish),
            "other" => Some(Category::Other),
            _ => None,
        }
    }

    /// 상대 경로의 세그먼트를 위에서부터 훑어 분류 결정
    ///
    /// 세그먼트가 키워드를 포함하면 매칭으로 봅니다 (예: "meat_dish"는
    /// "meat"에 매칭). 아무것도 매칭되지 않으면 Other.
    pub fn from_path(relative_path: &Path) -> Self {
        for component in relative_path.components() {
            let segment = component.as_os_str().to_string_lossy().to_lowercase();
            for (keyword, category) in CATEGORY_KEYWORDS {
                if segment.contains(keyword) {
                    return *category;
                }
            }
        }
        Category::Other
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Difficulty
// ============================================================================

/// 별점 글리프 (레시피 본문의 난이도 마커)
const STAR: char = '★';

/// 요리 난이도
///
/// 본문의 별점 마커(★ 1~5개)에서 유도되는 5단계 순서 열거형입니다.
/// 마커가 없으면 Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Unknown,
    VeryEasy,
    Easy,
    Normal,
    Hard,
    VeryHard,
}

impl Difficulty {
    /// 표시용 라벨
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Unknown => "unknown",
            Difficulty::VeryEasy => "very_easy",
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
            Difficulty::VeryHard => "very_hard",
        }
    }

    /// 라벨에서 복원 (벡터 테이블 디코딩용)
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "unknown" => Some(Difficulty::Unknown),
            "very_easy" => Some(Difficulty::VeryEasy),
            "easy" => Some(Difficulty::Easy),
            "normal" => Some(Difficulty::Normal),
            "hard" => Some(Difficulty::Hard),
            "very_hard" => Some(Difficulty::VeryHard),
            _ => None,
        }
    }

    /// 별 개수 -> 난이도 (1~5, 그 이상은 5로 클램프)
    pub fn from_stars(count: usize) -> Self {
        match count {
            0 => Difficulty::Unknown,
            1 => Difficulty::VeryEasy,
            2 => Difficulty::Easy,
            3 => Difficulty::Normal,
            4 => Difficulty::Hard,
            _ => Difficulty::VeryHard,
        }
    }

    /// 본문에서 첫 번째 ★ 연속 구간을 찾아 난이도 결정
    pub fn from_content(content: &str) -> Self {
        let mut run = 0usize;
        for ch in content.chars() {
            if ch == STAR {
                run += 1;
            } else if run > 0 {
                break;
            }
        }
        Self::from_stars(run)
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Document Types
// ============================================================================

/// 문서 메타데이터
///
/// 적재 시점에 한 번 유도되고 이후 청크로 그대로 상속됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    /// 원본 파일 경로
    pub source_path: String,
    /// 요리명 (파일명 stem)
    pub dish_name: String,
    /// 분류 (경로 세그먼트에서 유도)
    pub category: Category,
    /// 난이도 (별점 마커에서 유도)
    pub difficulty: Difficulty,
}

/// 코퍼스 문서 (마크다운 파일 하나)
#[derive(Debug, Clone)]
pub struct Document {
    /// 원문 내용
    pub content: String,
    /// 메타데이터
    pub metadata: RecipeMetadata,
}

/// 개별 파일 적재 실패 기록
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 적재 결과 리포트
///
/// 성공 개수와 실패 목록을 함께 담아, 건너뛴 파일이
/// 로그로만 남지 않고 호출자에게도 보이게 합니다.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub failures: Vec<LoadFailure>,
}

// ============================================================================
// DocumentLoader
// ============================================================================

/// 문서 로더
///
/// load를 다시 호출하면 이전 문서 목록은 버려지고 새로 채워집니다.
pub struct DocumentLoader {
    data_dir: PathBuf,
    documents: Vec<Document>,
}

impl DocumentLoader {
    /// 코퍼스 루트로 로더 생성
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            documents: Vec::new(),
        }
    }

    /// 마지막 load 결과 접근
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// 코퍼스 적재
    ///
    /// 마크다운 파일을 재귀 탐색해 문서 목록을 새로 만듭니다.
    /// 개별 파일의 실패는 리포트에 기록하고 계속 진행합니다.
    pub fn load(&mut self) -> Result<LoadReport> {
        if !self.data_dir.is_dir() {
            return Err(RagError::Config(format!(
                "data directory not found: {}",
                self.data_dir.display()
            ))
            .into());
        }

        tracing::info!("Loading documents from {}", self.data_dir.display());

        let mut md_files = Vec::new();
        let walker = WalkBuilder::new(&self.data_dir).build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("md"))
                .unwrap_or(false)
            {
                md_files.push(path.to_path_buf());
            }
        }

        // 순회 순서를 결정적으로 유지
        md_files.sort();

        let mut documents = Vec::with_capacity(md_files.len());
        let mut report = LoadReport::default();

        for path in md_files {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let metadata = self.enrich(&path, &content);
                    documents.push(Document { content, metadata });
                }
                Err(e) => {
                    tracing::error!("Failed to load document {}: {}", path.display(), e);
                    report.failures.push(LoadFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.loaded = documents.len();
        tracing::info!(
            "Loaded {} documents ({} skipped)",
            report.loaded,
            report.failures.len()
        );

        // 이전 결과 교체
        self.documents = documents;
        Ok(report)
    }

    /// 경로와 내용에서 메타데이터 유도
    fn enrich(&self, path: &Path, content: &str) -> RecipeMetadata {
        let relative = path.strip_prefix(&self.data_dir).unwrap_or(path);

        let dish_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        RecipeMetadata {
            source_path: path.to_string_lossy().to_string(),
            dish_name,
            category: Category::from_path(relative),
            difficulty: Difficulty::from_content(content),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
