//! Record extraction from rendered pages
//!
//! Each source site gets a [`SourceStrategy`] that maps its HTML onto a
//! fixed set of record shapes. The coordinator only talks to the trait, so
//! supporting a new site means adding a strategy and registering it.

pub mod fields;
mod truyenfull;

pub use truyenfull::TruyenFull;

use crate::crawler::{FetchError, RenderedPage};
use crate::storage::StoryStatus;
use crate::UrlResult;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Record shapes a strategy can extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetShape {
    StoryMetadata,
    ChapterIndex,
    ChapterContent,
}

impl fmt::Display for TargetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StoryMetadata => "story metadata",
            Self::ChapterIndex => "chapter index",
            Self::ChapterContent => "chapter content",
        };
        f.write_str(name)
    }
}

/// Errors raised while extracting a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Missing required field '{field}' in {shape}")]
    MissingField {
        shape: TargetShape,
        field: &'static str,
    },

    #[error("Expected a {expected} record, got {found}")]
    UnexpectedShape {
        expected: TargetShape,
        found: TargetShape,
    },
}

/// Story landing page fields
#[derive(Debug, Clone, PartialEq)]
pub struct StoryMetadata {
    pub title: String,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    pub status: StoryStatus,
    pub cover_url: String,
}

/// A numbered chapter link from the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRef {
    pub number: u32,
    pub title: String,
    pub url: Url,
}

/// One page of a story's chapter index
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterIndex {
    /// Chapters in page order
    pub chapters: Vec<ChapterRef>,
    /// Number of index pages, at least 1
    pub total_pages: u32,
    /// Links whose chapter number could not be determined
    pub skipped_links: u32,
}

/// A chapter page's text
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterContent {
    pub title: String,
    /// Normalized text, paragraphs separated by a blank line
    pub content: String,
    /// Number shown on the page, if any
    pub number: Option<u32>,
}

/// A story entry on a category listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ListedStory {
    pub title: String,
    pub url: Url,
    pub author: String,
    pub latest_chapter: String,
}

/// One page of a category listing
#[derive(Debug, Clone, PartialEq)]
pub struct StoryListing {
    pub stories: Vec<ListedStory>,
    pub total_pages: u32,
}

/// An extracted record
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    StoryMetadata(StoryMetadata),
    ChapterIndex(ChapterIndex),
    ChapterContent(ChapterContent),
}

impl Record {
    pub fn shape(&self) -> TargetShape {
        match self {
            Self::StoryMetadata(_) => TargetShape::StoryMetadata,
            Self::ChapterIndex(_) => TargetShape::ChapterIndex,
            Self::ChapterContent(_) => TargetShape::ChapterContent,
        }
    }
}

/// A record type tied to one target shape
pub trait ShapedRecord: Sized {
    const SHAPE: TargetShape;

    fn from_record(record: Record) -> Option<Self>;
}

impl ShapedRecord for StoryMetadata {
    const SHAPE: TargetShape = TargetShape::StoryMetadata;

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::StoryMetadata(meta) => Some(meta),
            _ => None,
        }
    }
}

impl ShapedRecord for ChapterIndex {
    const SHAPE: TargetShape = TargetShape::ChapterIndex;

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::ChapterIndex(index) => Some(index),
            _ => None,
        }
    }
}

impl ShapedRecord for ChapterContent {
    const SHAPE: TargetShape = TargetShape::ChapterContent;

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::ChapterContent(content) => Some(content),
            _ => None,
        }
    }
}

/// Site-specific extraction rules
pub trait SourceStrategy: Send + Sync {
    /// Short identifier used in logs
    fn id(&self) -> &'static str;

    /// Returns true if this strategy understands pages from `url`
    fn matches(&self, url: &Url) -> bool;

    fn story_metadata(&self, page: &RenderedPage) -> Result<StoryMetadata, ParseError>;

    fn chapter_index(&self, page: &RenderedPage) -> Result<ChapterIndex, ParseError>;

    fn chapter_content(&self, page: &RenderedPage) -> Result<ChapterContent, ParseError>;

    fn story_listing(&self, page: &RenderedPage) -> Result<StoryListing, ParseError>;

    /// URL of page `page` (1-based) of a story's chapter index
    fn index_page_url(&self, story_url: &Url, page: u32) -> UrlResult<Url>;

    /// URL of page `page` (1-based) of a category listing
    fn listing_page_url(&self, category_url: &Url, page: u32) -> UrlResult<Url>;
}

/// Runs the strategy for the requested shape
pub fn extract(
    strategy: &dyn SourceStrategy,
    page: &RenderedPage,
    shape: TargetShape,
) -> Result<Record, ParseError> {
    match shape {
        TargetShape::StoryMetadata => strategy.story_metadata(page).map(Record::StoryMetadata),
        TargetShape::ChapterIndex => strategy.chapter_index(page).map(Record::ChapterIndex),
        TargetShape::ChapterContent => strategy.chapter_content(page).map(Record::ChapterContent),
    }
}

/// Runs [`extract`] for `T`'s shape and returns the concrete record
pub fn extract_as<T: ShapedRecord>(
    strategy: &dyn SourceStrategy,
    page: &RenderedPage,
) -> Result<T, ParseError> {
    let record = extract(strategy, page, T::SHAPE)?;
    let found = record.shape();
    T::from_record(record).ok_or(ParseError::UnexpectedShape {
        expected: T::SHAPE,
        found,
    })
}

/// Strategies keyed by the sites they match
#[derive(Clone)]
pub struct SourceRegistry {
    strategies: Vec<Arc<dyn SourceStrategy>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registry with every built-in strategy
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TruyenFull::new()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn SourceStrategy>) {
        self.strategies.push(strategy);
    }

    /// Finds the strategy for a URL
    ///
    /// An unsupported site is a `Fatal` fetch error: nothing can be done
    /// with its pages.
    pub fn for_url(&self, url: &Url) -> Result<Arc<dyn SourceStrategy>, FetchError> {
        self.strategies
            .iter()
            .find(|s| s.matches(url))
            .cloned()
            .ok_or_else(|| FetchError::Fatal {
                url: url.to_string(),
                detail: "no extraction strategy for this site".to_string(),
            })
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.strategies.iter().map(|s| s.id()).collect();
        f.debug_struct("SourceRegistry").field("strategies", &ids).finish()
    }
}
