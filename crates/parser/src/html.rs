use scraper::{Html, Selector};
use url::Url;

/// Title, author, description, keywords, publish time, and resolved
/// outbound links pulled from one parsed document.
pub struct HtmlResult {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub publish_time: Option<String>,
    pub links: Vec<String>,
}

pub fn parse_html(html_str: &str, document_url: &Url) -> HtmlResult {
    let document = Html::parse_document(html_str);
    let base = resolve_base(&document, document_url);

    HtmlResult {
        title: extract_title(&document),
        author: extract_author(&document),
        description: extract_description(&document),
        keywords: extract_meta_content(&document, "keywords"),
        publish_time: extract_publish_time(&document),
        links: extract_links(&document, &base),
    }
}

/// `<base href>` overrides the document URL for link resolution when present
/// and itself resolvable against it.
fn resolve_base(document: &Html, document_url: &Url) -> Url {
    selector("base[href]")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| document_url.join(href).ok())
        .unwrap_or_else(|| document_url.clone())
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn text_of(document: &Html, sel: &str) -> Option<String> {
    let text = selector(sel)
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn attr_of(document: &Html, sel: &str, attr: &str) -> Option<String> {
    selector(sel)
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_meta_content(document: &Html, name: &str) -> Option<String> {
    attr_of(document, &format!("meta[name='{name}']"), "content")
}

fn extract_meta_property(document: &Html, property: &str) -> Option<String> {
    attr_of(document, &format!("meta[property='{property}']"), "content")
}

fn extract_title(document: &Html) -> Option<String> {
    text_of(document, "title").or_else(|| extract_meta_property(document, "og:title"))
}

fn extract_author(document: &Html) -> Option<String> {
    extract_meta_content(document, "author")
        .or_else(|| extract_meta_property(document, "article:author"))
        .or_else(|| text_of(document, "a[rel='author']"))
}

fn extract_description(document: &Html) -> Option<String> {
    extract_meta_content(document, "description")
        .or_else(|| extract_meta_property(document, "og:description"))
}

fn extract_publish_time(document: &Html) -> Option<String> {
    extract_meta_property(document, "article:published_time")
        .or_else(|| attr_of(document, "time[datetime]", "datetime"))
        .or_else(|| attr_of(document, "meta[itemprop='datePublished']", "content"))
}

fn is_crawlable_scheme(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    !(lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
        || lower.starts_with('#'))
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Some(sel) = selector("a[href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                push_resolved(&mut links, base, href);
            }
        }
    }
    if let Some(sel) = selector("img[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push_resolved(&mut links, base, src);
            }
        }
    }

    links
}

fn push_resolved(links: &mut Vec<String>, base: &Url, raw: &str) {
    if !is_crawlable_scheme(raw) {
        return;
    }
    if let Ok(resolved) = base.join(raw) {
        links.push(resolved.to_string());
    }
}
