//! WordPress WXR (eXtended RSS) export parsing.
//!
//! The export nests comments under `<item>` elements as `<wp:comment>`
//! children. Ordinary comments on `post` and `page` items are imported;
//! pingbacks and trackbacks are counted and dropped. Note the WXR format does not
//! carry `comment_agent`; that field is recovered separately from a raw SQL
//! dump (see [`crate::wp`]).

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use roxmltree::{Document, Node};

/// One comment lifted out of the export, ready for the new store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedComment {
    pub legacy_id: i64,
    pub legacy_parent_id: i64,
    pub post_slug: String,
    pub author: String,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub author_ip: Option<String>,
    pub content: String,
    /// ISO-8601 UTC, derived from `comment_date_gmt`.
    pub created_at: String,
    /// `public` or `pending`.
    pub status: String,
}

/// Parse result plus the counters the operator wants to see.
#[derive(Debug, Clone, Default)]
pub struct WxrImport {
    pub comments: Vec<ImportedComment>,
    pub items_seen: usize,
    /// Items that are neither posts nor pages (attachments, nav menus).
    pub skipped_items: usize,
    pub missing_slug: usize,
    pub skipped_non_comments: usize,
}

pub fn load_wxr(path: &Path) -> Result<WxrImport> {
    let xml = fs::read_to_string(path)
        .with_context(|| format!("failed to read WXR file {}", path.display()))?;
    parse_wxr(&xml).with_context(|| format!("failed to parse WXR file {}", path.display()))
}

pub fn parse_wxr(xml: &str) -> Result<WxrImport> {
    let document = Document::parse(xml).context("invalid XML")?;
    let channel = document
        .descendants()
        .find(|node| node.tag_name().name() == "channel");
    let Some(channel) = channel else {
        bail!("not a WXR export: missing <channel>");
    };

    let mut import = WxrImport::default();
    for item in channel
        .children()
        .filter(|node| node.tag_name().name() == "item")
    {
        import.items_seen += 1;
        let post_type = child_text(&item, "post_type").unwrap_or_default();
        if post_type != "post" && post_type != "page" {
            import.skipped_items += 1;
            continue;
        }
        let Some(post_slug) = extract_post_slug(&item) else {
            import.missing_slug += 1;
            continue;
        };

        for comment in item
            .children()
            .filter(|node| node.tag_name().name() == "comment")
        {
            let comment_type = child_text(&comment, "comment_type").unwrap_or_default();
            if !comment_type.is_empty() && comment_type != "comment" {
                import.skipped_non_comments += 1;
                continue;
            }
            let Some(legacy_id) = child_int(&comment, "comment_id") else {
                import.skipped_non_comments += 1;
                continue;
            };
            import.comments.push(ImportedComment {
                legacy_id,
                legacy_parent_id: child_int(&comment, "comment_parent").unwrap_or(0),
                post_slug: post_slug.clone(),
                author: child_text(&comment, "comment_author").unwrap_or_default(),
                author_email: non_empty(child_text(&comment, "comment_author_email")),
                author_url: non_empty(child_text(&comment, "comment_author_url")),
                author_ip: non_empty(child_text(&comment, "comment_author_IP")),
                content: sanitize_content(
                    &child_text(&comment, "comment_content").unwrap_or_default(),
                ),
                created_at: to_iso_date(
                    child_text(&comment, "comment_date_gmt").as_deref(),
                    child_text(&comment, "comment_date").as_deref(),
                ),
                status: map_status(child_text(&comment, "comment_approved").as_deref()),
            });
        }
    }
    Ok(import)
}

/// Order comments so every parent precedes its children: top-level first,
/// then replies by nesting depth. Cycles are cut off rather than recursed.
pub fn sort_for_insert(comments: &[ImportedComment]) -> Vec<ImportedComment> {
    use std::collections::{HashMap, HashSet};

    let by_id: HashMap<i64, &ImportedComment> =
        comments.iter().map(|c| (c.legacy_id, c)).collect();

    fn depth(
        comment: &ImportedComment,
        by_id: &HashMap<i64, &ImportedComment>,
        visited: &mut HashSet<i64>,
    ) -> usize {
        if comment.legacy_parent_id == 0 || !visited.insert(comment.legacy_id) {
            return 0;
        }
        match by_id.get(&comment.legacy_parent_id) {
            Some(parent) => 1 + depth(parent, by_id, visited),
            None => 1,
        }
    }

    let mut ordered: Vec<(usize, &ImportedComment)> = comments
        .iter()
        .map(|c| (depth(c, &by_id, &mut HashSet::new()), c))
        .collect();
    ordered.sort_by_key(|(d, c)| (*d, c.legacy_id));
    ordered.into_iter().map(|(_, c)| c.clone()).collect()
}

// Concatenated text of the first child element with this local name,
// namespace ignored (WXR mixes plain and wp:-prefixed tags).
fn child_text(node: &Node, name: &str) -> Option<String> {
    let child = node
        .children()
        .find(|child| child.tag_name().name() == name)?;
    let mut text = String::new();
    for part in child.children() {
        if let Some(value) = part.text() {
            text.push_str(value);
        }
    }
    Some(text.trim().to_string())
}

fn child_int(node: &Node, name: &str) -> Option<i64> {
    child_text(node, name)?.parse().ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Post slug from the item `<link>` (trailing number), falling back to the
/// percent-decoded `<wp:post_name>` (often URL-encoded Chinese).
fn extract_post_slug(item: &Node) -> Option<String> {
    if let Some(link) = child_text(item, "link") {
        if let Some(found) = trailing_number_re().captures(&link) {
            return Some(found[1].to_string());
        }
    }
    let post_name = child_text(item, "post_name")?;
    if post_name.is_empty() {
        return None;
    }
    Some(percent_decode(&post_name))
}

fn trailing_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d+)(?:/[^/]*)?$").expect("static regex"))
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        // A `%` not followed by two hex digits (the next byte may be part of
        // a multibyte character) is passed through untouched.
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (
                hex_value(bytes[i + 1]),
                hex_value(bytes[i + 2]),
            ) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// `2024-11-20 04:25:38` (GMT) becomes `2024-11-20T04:25:38Z`. Falls back to
/// the local-time column when the GMT one is absent.
fn to_iso_date(date_gmt: Option<&str>, date_local: Option<&str>) -> String {
    let picked = [date_gmt, date_local]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|d| !d.is_empty())
        .unwrap_or("");
    if picked.is_empty() {
        return String::new();
    }
    format!("{}Z", picked.replacen(' ', "T", 1))
}

fn map_status(approved: Option<&str>) -> String {
    if approved == Some("1") {
        "public".to_string()
    } else {
        "pending".to_string()
    }
}

/// Remove dangerous markup before the content enters the new store:
/// script/style/iframe/object/embed blocks, inline event handlers, and
/// `javascript:` URLs.
pub fn sanitize_content(content: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static EMBED: OnceLock<Regex> = OnceLock::new();
    static HANDLERS: OnceLock<Regex> = OnceLock::new();
    static JS_PROTO: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(
            r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<iframe\b[^>]*>.*?</iframe>|<object\b[^>]*>.*?</object>",
        )
        .expect("static regex")
    });
    let embed = EMBED.get_or_init(|| Regex::new(r"(?i)<embed\b[^>]*>").expect("static regex"));
    let handlers = HANDLERS
        .get_or_init(|| Regex::new(r#"(?i)\son\w+\s*=\s*["'][^"']*["']"#).expect("static regex"));
    let js_proto = JS_PROTO.get_or_init(|| Regex::new(r"(?i)javascript:").expect("static regex"));

    let cleaned = blocks.replace_all(content, "");
    let cleaned = embed.replace_all(&cleaned, "");
    let cleaned = handlers.replace_all(&cleaned, "");
    let cleaned = js_proto.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:wp="http://wordpress.org/export/1.2/">
<channel>
  <title>blog</title>
  <item>
    <title>A post</title>
    <link>https://s5s5.me/4234</link>
    <wp:post_type>post</wp:post_type>
    <wp:post_name>4234</wp:post_name>
    <wp:comment>
      <wp:comment_id>101</wp:comment_id>
      <wp:comment_author><![CDATA[mi]]></wp:comment_author>
      <wp:comment_author_email>mi@example.com</wp:comment_author_email>
      <wp:comment_author_url></wp:comment_author_url>
      <wp:comment_author_IP>127.0.0.1</wp:comment_author_IP>
      <wp:comment_date>2024-11-20 12:25:38</wp:comment_date>
      <wp:comment_date_gmt>2024-11-20 04:25:38</wp:comment_date_gmt>
      <wp:comment_content><![CDATA[nice post <script>alert(1)</script>]]></wp:comment_content>
      <wp:comment_approved>1</wp:comment_approved>
      <wp:comment_type></wp:comment_type>
      <wp:comment_parent>0</wp:comment_parent>
    </wp:comment>
    <wp:comment>
      <wp:comment_id>102</wp:comment_id>
      <wp:comment_author>bot</wp:comment_author>
      <wp:comment_type>pingback</wp:comment_type>
    </wp:comment>
  </item>
  <item>
    <title>A page</title>
    <link>https://s5s5.me/about</link>
    <wp:post_type>page</wp:post_type>
  </item>
</channel>
</rss>"#;

    #[test]
    fn parses_comments_and_skips_pingbacks() {
        let import = parse_wxr(SAMPLE).expect("parse");
        assert_eq!(import.items_seen, 2);
        assert_eq!(import.skipped_items, 0);
        // The sample's page item has no slug source.
        assert_eq!(import.missing_slug, 1);
        assert_eq!(import.skipped_non_comments, 1);
        assert_eq!(import.comments.len(), 1);

        let comment = &import.comments[0];
        assert_eq!(comment.legacy_id, 101);
        assert_eq!(comment.post_slug, "4234");
        assert_eq!(comment.author, "mi");
        assert_eq!(comment.author_email.as_deref(), Some("mi@example.com"));
        assert!(comment.author_url.is_none());
        assert_eq!(comment.created_at, "2024-11-20T04:25:38Z");
        assert_eq!(comment.status, "public");
        assert_eq!(comment.content, "nice post");
    }

    #[test]
    fn invalid_xml_is_an_error() {
        assert!(parse_wxr("<rss><channel>").is_err());
        assert!(parse_wxr("<root/>").is_err());
    }

    #[test]
    fn slug_prefers_trailing_link_number() {
        let xml = SAMPLE.replace("<wp:post_name>4234</wp:post_name>", "");
        let import = parse_wxr(&xml).expect("parse");
        assert_eq!(import.comments[0].post_slug, "4234");
    }

    #[test]
    fn page_comments_are_imported() {
        let xml = SAMPLE.replace(
            "<wp:post_type>page</wp:post_type>",
            "<wp:post_type>page</wp:post_type>\n    \
             <wp:post_name>about</wp:post_name>\n    \
             <wp:comment>\n      \
             <wp:comment_id>501</wp:comment_id>\n      \
             <wp:comment_author>vi</wp:comment_author>\n      \
             <wp:comment_approved>1</wp:comment_approved>\n      \
             <wp:comment_parent>0</wp:comment_parent>\n    \
             </wp:comment>",
        );
        let import = parse_wxr(&xml).expect("parse");
        assert_eq!(import.skipped_items, 0);
        assert_eq!(import.comments.len(), 2);
        let page_comment = import
            .comments
            .iter()
            .find(|c| c.legacy_id == 501)
            .expect("page comment");
        assert_eq!(page_comment.post_slug, "about");
        assert_eq!(page_comment.status, "public");
    }

    #[test]
    fn attachment_items_are_skipped() {
        let xml = SAMPLE.replace(
            "<wp:post_type>page</wp:post_type>",
            "<wp:post_type>attachment</wp:post_type>",
        );
        let import = parse_wxr(&xml).expect("parse");
        assert_eq!(import.skipped_items, 1);
        assert_eq!(import.comments.len(), 1);
    }

    #[test]
    fn slug_falls_back_to_decoded_post_name() {
        let xml = SAMPLE
            .replace("<link>https://s5s5.me/4234</link>", "")
            .replace(
                "<wp:post_name>4234</wp:post_name>",
                "<wp:post_name>%E4%BD%A0%E5%A5%BD</wp:post_name>",
            );
        let import = parse_wxr(&xml).expect("parse");
        assert_eq!(import.comments[0].post_slug, "你好");
    }

    #[test]
    fn percent_decode_leaves_non_hex_sequences_alone() {
        assert_eq!(percent_decode("%E4%BD%A0"), "你");
        // A stray `%` directly before multibyte text must not split a
        // character.
        assert_eq!(percent_decode("%中文"), "%中文");
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn slug_with_stray_percent_survives() {
        let xml = SAMPLE
            .replace("<link>https://s5s5.me/4234</link>", "")
            .replace(
                "<wp:post_name>4234</wp:post_name>",
                "<wp:post_name>%中文</wp:post_name>",
            );
        let import = parse_wxr(&xml).expect("parse");
        assert_eq!(import.comments[0].post_slug, "%中文");
    }

    #[test]
    fn sanitize_strips_dangerous_markup() {
        let dirty = "a<style>p{}</style> <img src=\"x.png\" onerror='alert(1)'> \
                     <a href=\"javascript:go()\">b</a><embed src=\"f.swf\">";
        let clean = sanitize_content(dirty);
        assert!(!clean.contains("<style>"));
        assert!(!clean.contains("onerror"));
        assert!(!clean.contains("javascript:"));
        assert!(!clean.contains("<embed"));
        assert!(clean.contains("<img src=\"x.png\">"));
        assert!(clean.contains("<a href=\"go()\">b</a>"));
    }

    #[test]
    fn parents_sort_before_children() {
        let base = parse_wxr(SAMPLE).expect("parse").comments[0].clone();
        let mut reply = base.clone();
        reply.legacy_id = 200;
        reply.legacy_parent_id = 101;
        let mut nested = base.clone();
        nested.legacy_id = 300;
        nested.legacy_parent_id = 200;

        let ordered = sort_for_insert(&[nested, reply.clone(), base.clone()]);
        let ids: Vec<i64> = ordered.iter().map(|c| c.legacy_id).collect();
        assert_eq!(ids, vec![101, 200, 300]);
    }

    #[test]
    fn parent_cycles_do_not_recurse_forever() {
        let template = parse_wxr(SAMPLE).expect("parse").comments[0].clone();
        let mut a = template.clone();
        a.legacy_id = 1;
        a.legacy_parent_id = 2;
        let mut b = template;
        b.legacy_id = 2;
        b.legacy_parent_id = 1;
        let ordered = sort_for_insert(&[a, b]);
        assert_eq!(ordered.len(), 2);
    }
}
