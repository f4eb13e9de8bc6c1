pub mod html;

use crawlhub_core::{FetchResponse, PageMetadataFields};
use url::Url;

/// Soft ceiling applied to every extracted text field before storage.
const FIELD_TRUNCATE_BYTES: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub metadata: PageMetadataFields,
    pub links: Vec<String>,
}

fn is_html_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

/// Non-HTML responses carry no extractable metadata or links.
pub fn extract(resp: &FetchResponse) -> ExtractResult {
    if !is_html_content_type(resp.content_type.as_deref()) {
        return ExtractResult::default();
    }

    let Ok(document_url) = Url::parse(&resp.final_url) else {
        return ExtractResult::default();
    };

    let body = String::from_utf8_lossy(&resp.body);
    let parsed = html::parse_html(&body, &document_url);

    ExtractResult {
        metadata: PageMetadataFields {
            title: parsed.title.map(|s| truncate_soft(&s)),
            author: parsed.author.map(|s| truncate_soft(&s)),
            description: parsed.description.map(|s| truncate_soft(&s)),
            keywords: parsed.keywords.map(|s| truncate_soft(&s)),
            publish_time: parsed.publish_time.map(|s| truncate_soft(&s)),
        },
        links: parsed.links,
    }
}

/// Truncates to at most `FIELD_TRUNCATE_BYTES` bytes without splitting a
/// UTF-8 code point.
fn truncate_soft(s: &str) -> String {
    let s = s.trim();
    if s.len() <= FIELD_TRUNCATE_BYTES {
        return s.to_string();
    }
    let mut end = FIELD_TRUNCATE_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn html_response(body: &str) -> FetchResponse {
        FetchResponse {
            final_url: "https://example.com/page".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            response_time_seconds: 0.01,
        }
    }

    #[test]
    fn non_html_content_type_yields_empty_result() {
        let resp = FetchResponse {
            final_url: "https://example.com/data.json".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: b"{}".to_vec(),
            content_type: Some("application/json".to_string()),
            response_time_seconds: 0.01,
        };
        let r = extract(&resp);
        assert!(r.metadata.title.is_none());
        assert!(r.links.is_empty());
    }

    #[test]
    fn extracts_title_and_links() {
        let resp = html_response(
            r#"<html><head><title>Hello</title></head>
               <body><a href="/a">a</a><a href="/b">b</a></body></html>"#,
        );
        let r = extract(&resp);
        assert_eq!(r.metadata.title.as_deref(), Some("Hello"));
        assert_eq!(
            r.links,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string()
            ]
        );
    }

    #[test]
    fn truncates_long_fields() {
        let long = "x".repeat(2000);
        let resp = html_response(&format!(
            r#"<html><head><title>{long}</title></head></html>"#
        ));
        let r = extract(&resp);
        assert_eq!(r.metadata.title.unwrap().len(), FIELD_TRUNCATE_BYTES);
    }
}
