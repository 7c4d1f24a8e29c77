//! Extraction rules for truyenfull sites

use crate::crawler::RenderedPage;
use crate::extract::fields::{all_texts, element_text, resolve_href, selector, FieldRule};
use crate::extract::{
    ChapterContent, ChapterIndex, ChapterRef, ListedStory, ParseError, SourceStrategy,
    StoryListing, StoryMetadata, TargetShape,
};
use crate::storage::StoryStatus;
use crate::url::source_host;
use crate::{UrlError, UrlResult};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use url::Url;

static RE_TITLE_NUMBER: OnceLock<Regex> = OnceLock::new();
static RE_URL_NUMBER: OnceLock<Regex> = OnceLock::new();
static RE_PAGE_NUMBER: OnceLock<Regex> = OnceLock::new();
static RE_CHROME_LINE: OnceLock<Regex> = OnceLock::new();

const TITLE: FieldRule = FieldRule::text("title", &["h3.title", "h1.title", ".title"]).required();
const COVER: FieldRule = FieldRule::attr("cover_url", &[".book img", ".info-holder img"], "src");
const AUTHOR: FieldRule = FieldRule::text("author", &["a[itemprop=author]", ".author a"]);
const STATUS: FieldRule = FieldRule::text("status", &[".text-success", ".text-primary"]);
const DESCRIPTION: FieldRule = FieldRule::text(
    "description",
    &[".desc-text", ".desc", "div[itemprop=description]"],
);

const CHAPTER_TITLE: FieldRule =
    FieldRule::text("title", &[".chapter-title", "h2 a.chapter-title", ".chapter-c h2"]);

const LISTING_LINK: FieldRule =
    FieldRule::attr("url", &["h3.truyen-title a", ".truyen-title a"], "href").required();
const LISTING_TITLE: FieldRule =
    FieldRule::text("title", &["h3.truyen-title a", ".truyen-title a"]).required();
const LISTING_AUTHOR: FieldRule = FieldRule::text("author", &[".author", "span.author"]);
const LISTING_LATEST: FieldRule =
    FieldRule::text("latest_chapter", &[".text-info a", ".chapter-text"]);

const INFO_BLOCK: &str = ".info, .info-holder";
const GENRES: &str = "a[itemprop=genre], .genre a";
/// Tried in order; the first that matches any link is used
const CHAPTER_LINKS: &[&str] = &[".list-chapter a", "#list-chapter a"];
const CONTENT_BLOCK: &[&str] = &["#chapter-c", ".chapter-c", ".chapter-content"];
const CHROME: &str = ".ads, script, style, noscript, iframe, ins, .hidden, [style*='display:none'], [style*='display: none']";
const LISTING_ROWS: &str = ".list-truyen .row, .list-truyen-item";

/// Block-level tags whose boundaries become line breaks
const BLOCK_TAGS: &[&str] = &["p", "div", "h1", "h2", "h3", "h4", "li", "blockquote"];

/// Strategy for truyenfull.vision and its mirrors
#[derive(Debug, Default, Clone)]
pub struct TruyenFull;

impl TruyenFull {
    pub fn new() -> Self {
        Self
    }
}

/// Finds a chapter number in a link title ("Chương 12: ...") or its URL
/// (".../chuong-12/")
pub fn chapter_number(title: &str, url: &str) -> Option<u32> {
    let by_title = RE_TITLE_NUMBER
        .get_or_init(|| Regex::new(r"(?i)(?:chương|chapter)\s*(\d+)").expect("valid regex"));
    if let Some(n) = by_title
        .captures(title)
        .and_then(|c| c[1].parse::<u32>().ok())
    {
        return Some(n);
    }

    let by_url = RE_URL_NUMBER.get_or_init(|| Regex::new(r"chuong-(\d+)").expect("valid regex"));
    by_url
        .captures(url)
        .and_then(|c| c[1].parse::<u32>().ok())
}

/// Reads the number of pages from a pagination block
///
/// Prefers the hidden `#total-page` input, then the largest `trang-N` link.
fn total_pages(document: &Html) -> u32 {
    if let Some(input) = selector("input#total-page").and_then(|s| document.select(&s).next()) {
        if let Some(n) = input
            .value()
            .attr("value")
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            return n.max(1);
        }
    }

    let page_re =
        RE_PAGE_NUMBER.get_or_init(|| Regex::new(r"trang-(\d+)").expect("valid regex"));
    let Some(links) = selector(".pagination a[href]") else {
        return 1;
    };
    document
        .select(&links)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page_re.captures(href))
        .filter_map(|c| c[1].parse::<u32>().ok())
        .max()
        .unwrap_or(1)
        .max(1)
}

fn is_chrome_line(line: &str) -> bool {
    let chrome = RE_CHROME_LINE.get_or_init(|| {
        Regex::new(
            r"(?i)^(bạn đang đọc truyện|nguồn:|truyện được lấy tại|chương (trước|tiếp)|(prev|next) chapter)|truyenfull\.(vn|vision|io|com)",
        )
        .expect("valid regex")
    });
    chrome.is_match(line)
}

/// Walks the content block, emitting text with line breaks at `<br>` and
/// block boundaries and skipping chrome elements
fn collect_text(element: ElementRef<'_>, chrome: &Selector, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let mut last_space = out.ends_with(' ');
            for ch in text.chars() {
                if ch.is_whitespace() {
                    if !last_space {
                        out.push(' ');
                        last_space = true;
                    }
                } else {
                    out.push(ch);
                    last_space = false;
                }
            }
            continue;
        }

        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        if chrome.matches(&child_el) {
            continue;
        }

        let name = child_el.value().name();
        if name == "br" {
            out.push('\n');
            continue;
        }

        let block = BLOCK_TAGS.contains(&name);
        if block {
            out.push('\n');
        }
        collect_text(child_el, chrome, out);
        if block {
            out.push('\n');
        }
    }
}

/// Normalizes chapter body text
///
/// Lines are trimmed with inner whitespace collapsed, empty and chrome lines
/// are dropped, and the remaining paragraphs are joined by one blank line.
pub fn normalize_content(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty() && !is_chrome_line(line))
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl SourceStrategy for TruyenFull {
    fn id(&self) -> &'static str {
        "truyenfull"
    }

    fn matches(&self, url: &Url) -> bool {
        source_host(url)
            .map(|host| host.starts_with("truyenfull."))
            .unwrap_or(false)
    }

    fn story_metadata(&self, page: &RenderedPage) -> Result<StoryMetadata, ParseError> {
        let document = Html::parse_document(&page.html);
        let shape = TargetShape::StoryMetadata;

        let title = TITLE.extract(&document, shape)?;
        let cover = COVER.extract(&document, shape)?;
        let cover_url = resolve_href(&cover, &page.url)
            .map(|u| u.to_string())
            .unwrap_or_default();
        let description = DESCRIPTION.extract(&document, shape)?;

        let info = selector(INFO_BLOCK).and_then(|s| document.select(&s).next());
        let (author, genres, status_text) = match info {
            Some(info) => (
                AUTHOR.extract_in(info, shape)?,
                all_texts(info, GENRES),
                STATUS.extract_in(info, shape)?,
            ),
            None => (String::new(), Vec::new(), String::new()),
        };

        let status_text = status_text.to_lowercase();
        let status = if status_text.contains("hoàn") || status_text.contains("full") {
            StoryStatus::Complete
        } else {
            StoryStatus::Ongoing
        };

        Ok(StoryMetadata {
            title,
            author,
            description,
            genres,
            status,
            cover_url,
        })
    }

    fn chapter_index(&self, page: &RenderedPage) -> Result<ChapterIndex, ParseError> {
        let document = Html::parse_document(&page.html);
        let mut chapters = Vec::new();
        let mut skipped_links = 0;

        let links = CHAPTER_LINKS
            .iter()
            .filter_map(|raw| selector(raw))
            .find(|s| document.select(s).next().is_some());

        if let Some(links) = links {
            for link in document.select(&links) {
                let href = link.value().attr("href").unwrap_or_default();
                let Some(url) = resolve_href(href, &page.url) else {
                    skipped_links += 1;
                    continue;
                };
                let title = element_text(link);
                match chapter_number(&title, url.as_str()) {
                    Some(number) if number > 0 => chapters.push(ChapterRef { number, title, url }),
                    _ => skipped_links += 1,
                }
            }
        }

        if chapters.is_empty() {
            let field = if skipped_links > 0 {
                "chapter_number"
            } else {
                "chapters"
            };
            return Err(ParseError::MissingField {
                shape: TargetShape::ChapterIndex,
                field,
            });
        }

        Ok(ChapterIndex {
            chapters,
            total_pages: total_pages(&document),
            skipped_links,
        })
    }

    fn chapter_content(&self, page: &RenderedPage) -> Result<ChapterContent, ParseError> {
        let document = Html::parse_document(&page.html);
        let shape = TargetShape::ChapterContent;

        let title = CHAPTER_TITLE.extract(&document, shape)?;
        let number = chapter_number(&title, page.url.as_str());

        let block = CONTENT_BLOCK
            .iter()
            .filter_map(|raw| selector(raw))
            .find_map(|s| document.select(&s).next());

        let mut raw = String::new();
        if let (Some(block), Some(chrome)) = (block, selector(CHROME)) {
            collect_text(block, &chrome, &mut raw);
        }

        let content = normalize_content(&raw);
        if content.is_empty() {
            return Err(ParseError::MissingField {
                shape,
                field: "content",
            });
        }

        Ok(ChapterContent {
            title,
            content,
            number,
        })
    }

    fn story_listing(&self, page: &RenderedPage) -> Result<StoryListing, ParseError> {
        let document = Html::parse_document(&page.html);
        let shape = TargetShape::StoryMetadata;
        let mut stories: Vec<ListedStory> = Vec::new();

        if let Some(rows) = selector(LISTING_ROWS) {
            for row in document.select(&rows) {
                // Rows without a story link are ads or headers
                let (Ok(href), Ok(title)) = (
                    LISTING_LINK.extract_in(row, shape),
                    LISTING_TITLE.extract_in(row, shape),
                ) else {
                    continue;
                };
                let Some(url) = resolve_href(&href, &page.url) else {
                    continue;
                };
                if stories.iter().any(|s| s.url == url) {
                    continue;
                }
                stories.push(ListedStory {
                    title,
                    url,
                    author: LISTING_AUTHOR.extract_in(row, shape)?,
                    latest_chapter: LISTING_LATEST.extract_in(row, shape)?,
                });
            }
        }

        Ok(StoryListing {
            stories,
            total_pages: total_pages(&document),
        })
    }

    fn index_page_url(&self, story_url: &Url, page: u32) -> UrlResult<Url> {
        paged_url(story_url, page)
    }

    fn listing_page_url(&self, category_url: &Url, page: u32) -> UrlResult<Url> {
        paged_url(category_url, page)
    }
}

/// `{base}/trang-{n}/`, or the base itself for the first page
fn paged_url(base: &Url, page: u32) -> UrlResult<Url> {
    if page <= 1 {
        return Ok(base.clone());
    }
    let mut dir = base.clone();
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir.join(&format!("trang-{}/", page))
        .map_err(|e| UrlError::Parse(e.to_string()))
}
