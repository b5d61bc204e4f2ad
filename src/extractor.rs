use scraper::{ElementRef, Html, Selector};

use crate::article::{parse_date, ArticleRecord, ExtractedArticle};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::HttpFetcher;

const MAX_DESCRIPTION_CHARS: usize = 220;

/// Fetches an article page and pulls its SEO metadata.
pub struct Extractor {
    fetcher: HttpFetcher,
    default_author: String,
    title_suffix: String,
}

impl Extractor {
    pub fn new(fetcher: HttpFetcher, config: &Config) -> Self {
        Self {
            fetcher,
            default_author: config.channel.default_author.clone(),
            title_suffix: config.channel.title_suffix.clone(),
        }
    }

    pub async fn extract(&self, url: &str) -> Result<ArticleRecord> {
        let html = self.fetcher.fetch_html(url).await?;
        let article = parse_article(&html, url, &self.default_author, &self.title_suffix)?;
        Ok(ArticleRecord::from_extracted(url, article))
    }
}

pub fn parse_article(
    html: &str,
    url: &str,
    default_author: &str,
    title_suffix: &str,
) -> Result<ExtractedArticle> {
    let document = Html::parse_document(html);
    let page = Page { document: &document };

    let og_title = page.meta_property("og:title");
    let html_title = page.first_text("title");
    if og_title.is_none() && html_title.is_none() && !page.has_structured_metadata() {
        return Err(Error::parse(url, "no title or article metadata found"));
    }

    let title = og_title
        .map(|t| strip_suffix(&t, title_suffix))
        .or(html_title)
        .unwrap_or_else(|| url.to_string());

    let description = page
        .itemprop_content("description")
        .or_else(|| page.meta_property("og:description"))
        .or_else(|| page.meta_name("description"))
        .or_else(|| page.first_paragraph())
        .or_else(|| page.itemprop_content("headline"))
        .map(|d| truncate_description(&d))
        .unwrap_or_default();

    let author = page
        .meta_property("article:author")
        .or_else(|| page.itemprop_content_or_text("author"))
        .unwrap_or_else(|| default_author.to_string());

    let published_at = page
        .itemprop_content("datePublished")
        .or_else(|| page.meta_property("article:published_time"))
        .and_then(|raw| parse_date(&raw));
    let modified_at = page
        .itemprop_content("dateModified")
        .or_else(|| page.meta_property("article:modified_time"))
        .and_then(|raw| parse_date(&raw))
        .or(published_at);

    let image = page.meta_property("og:image").map(|i| shrink_squarespace(&i));

    Ok(ExtractedArticle {
        title,
        description,
        author,
        image,
        published_at,
        modified_at,
    })
}

struct Page<'a> {
    document: &'a Html,
}

impl Page<'_> {
    fn select_first(&self, css: &str) -> Option<ElementRef<'_>> {
        let selector = Selector::parse(css).ok()?;
        self.document.select(&selector).next()
    }

    fn content_of(element: ElementRef<'_>) -> Option<String> {
        element
            .value()
            .attr("content")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    fn text_of(element: ElementRef<'_>) -> Option<String> {
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }

    fn meta_property(&self, property: &str) -> Option<String> {
        self.select_first(&format!(r#"meta[property="{}"]"#, property))
            .and_then(Self::content_of)
    }

    fn meta_name(&self, name: &str) -> Option<String> {
        self.select_first(&format!(r#"meta[name="{}"]"#, name))
            .and_then(Self::content_of)
    }

    fn itemprop_content(&self, prop: &str) -> Option<String> {
        self.select_first(&format!(r#"[itemprop="{}"]"#, prop))
            .and_then(Self::content_of)
    }

    /// `<meta itemprop=author content=..>` or `<span itemprop=author>Name</span>`
    fn itemprop_content_or_text(&self, prop: &str) -> Option<String> {
        let element = self.select_first(&format!(r#"[itemprop="{}"]"#, prop))?;
        Self::content_of(element).or_else(|| Self::text_of(element))
    }

    fn first_text(&self, css: &str) -> Option<String> {
        self.select_first(css).and_then(Self::text_of)
    }

    fn first_paragraph(&self) -> Option<String> {
        self.first_text("article p").or_else(|| self.first_text("p"))
    }

    fn has_structured_metadata(&self) -> bool {
        self.select_first(r#"meta[property^="og:"]"#).is_some()
            || self.select_first("[itemprop]").is_some()
    }
}

fn strip_suffix(title: &str, suffix: &str) -> String {
    let title = title.trim();
    if suffix.is_empty() {
        return title.to_string();
    }
    title.strip_suffix(suffix).unwrap_or(title).trim().to_string()
}

fn truncate_description(description: &str) -> String {
    let description = description.trim();
    if description.chars().count() <= MAX_DESCRIPTION_CHARS {
        return description.to_string();
    }
    let mut truncated: String = description.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Squarespace serves a lighter rendition with `?format=800w`.
pub fn shrink_squarespace(url: &str) -> String {
    if !url.contains("squarespace") {
        return url.to_string();
    }
    let base = url.split_once('?').map(|(base, _)| base).unwrap_or(url);
    format!("{}?format=800w", base)
}
