//! Best-effort HTML to Markdown conversion for legacy comment bodies.
//!
//! Comments written before the migration carry a small, predictable tag set
//! (WordPress filtered everything else at submission time), so this converts
//! exactly that set and leaves anything it does not recognize in place where
//! the `comments check` report will flag it. Conversion is gated on
//! [`has_html_tags`] so plain-text and already-Markdown bodies pass through
//! byte-identical; running the converter on Markdown would mangle its
//! punctuation.

use regex::Captures;

use crate::cleanup::re;

/// Does the body contain one of the HTML tags we know how to convert?
/// Bare `<` / `>` (math, quoted code) do not count.
pub fn has_html_tags(content: &str) -> bool {
    re!(
        r"(?i)<(?:a|p|br|div|span|strong|b|em|i|u|code|pre|blockquote|img|ul|ol|li|h[1-6]|table|tr|td|th)[\s>/]"
    )
    .is_match(content)
}

/// Convert a legacy HTML comment body to Markdown. Returns the input
/// unchanged when it carries no recognizable HTML.
pub fn html_to_markdown(content: &str) -> String {
    if !has_html_tags(content) {
        return content.to_string();
    }

    let mut text = content.to_string();

    // Fenced code blocks first so later inline passes cannot touch their
    // contents.
    text = re!(r"(?is)<pre[^>]*>\s*<code[^>]*>(.*?)</code>\s*</pre>")
        .replace_all(&text, |caps: &Captures| fence(&caps[1]))
        .into_owned();
    text = re!(r"(?is)<pre[^>]*>(.*?)</pre>")
        .replace_all(&text, |caps: &Captures| fence(&caps[1]))
        .into_owned();

    text = re!(r"(?i)<br\s*/?>").replace_all(&text, "\n").into_owned();

    text = re!(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>")
        .replace_all(&text, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n{} {}\n", "#".repeat(level), caps[2].trim())
        })
        .into_owned();

    text = re!(r"(?is)<blockquote[^>]*>(.*?)</blockquote>")
        .replace_all(&text, |caps: &Captures| {
            let quoted: Vec<String> = caps[1]
                .trim()
                .lines()
                .map(|line| format!("> {}", line.trim()))
                .collect();
            format!("\n{}\n", quoted.join("\n"))
        })
        .into_owned();

    text = re!(r"(?is)<(ul|ol)[^>]*>(.*?)</(?:ul|ol)>")
        .replace_all(&text, |caps: &Captures| {
            let ordered = caps[1].eq_ignore_ascii_case("ol");
            let mut lines = Vec::new();
            for (index, item) in re!(r"(?is)<li[^>]*>(.*?)</li>")
                .captures_iter(&caps[2])
                .enumerate()
            {
                let body = item[1].trim().to_string();
                if ordered {
                    lines.push(format!("{}. {body}", index + 1));
                } else {
                    lines.push(format!("- {body}"));
                }
            }
            format!("\n{}\n", lines.join("\n"))
        })
        .into_owned();

    text = re!(r#"(?is)<a\s+[^>]*href=["']([^"']*)["'][^>]*>(.*?)</a>"#)
        .replace_all(&text, "[$2]($1)")
        .into_owned();

    text = re!(r"(?i)<img\s+[^>]*>")
        .replace_all(&text, |caps: &Captures| {
            let tag = &caps[0];
            let src = re!(r#"(?i)src=["']([^"']*)["']"#)
                .captures(tag)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            let alt = re!(r#"(?i)alt=["']([^"']*)["']"#)
                .captures(tag)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            format!("![{alt}]({src})")
        })
        .into_owned();

    text = re!(r"(?is)<(?:strong|b)\b[^>]*>(.*?)</(?:strong|b)>")
        .replace_all(&text, "**$1**")
        .into_owned();
    text = re!(r"(?is)<(?:em|i)\b[^>]*>(.*?)</(?:em|i)>")
        .replace_all(&text, "*$1*")
        .into_owned();
    text = re!(r"(?is)<code[^>]*>(.*?)</code>")
        .replace_all(&text, "`$1`")
        .into_owned();

    // Paragraph boundaries become blank lines; leftover wrapper tags drop
    // while their content stays.
    text = re!(r"(?i)</p>").replace_all(&text, "\n\n").into_owned();
    text = re!(r"(?i)<p[^>]*>").replace_all(&text, "").into_owned();
    text = re!(r"(?i)</?(?:div|span|u)[^>]*>")
        .replace_all(&text, "")
        .into_owned();

    let text = unescape_entities(&text);
    collapse_blank_lines(text.trim())
}

fn fence(code: &str) -> String {
    let body = unescape_entities(code.trim_matches('\n'));
    format!("\n```\n{body}\n```\n")
}

fn unescape_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_blank_lines(text: &str) -> String {
    re!(r"\n{3,}").replace_all(text, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(html_to_markdown("just text, a < b"), "just text, a < b");
        assert!(!has_html_tags("a < b and c > d"));
    }

    #[test]
    fn existing_markdown_is_untouched() {
        let md = "**bold** and [a link](https://example.com)\n\n- item";
        assert_eq!(html_to_markdown(md), md);
    }

    #[test]
    fn links_and_emphasis_convert() {
        assert_eq!(
            html_to_markdown(r#"see <a href="https://s5s5.me/1">this</a> — <strong>nice</strong>"#),
            "see [this](https://s5s5.me/1) — **nice**"
        );
    }

    #[test]
    fn line_breaks_and_paragraphs() {
        assert_eq!(
            html_to_markdown("<p>first<br/>second</p><p>third</p>"),
            "first\nsecond\n\nthird"
        );
    }

    #[test]
    fn code_blocks_are_fenced_and_unescaped() {
        assert_eq!(
            html_to_markdown("<pre><code>if (a &lt; b) { go(); }</code></pre>"),
            "```\nif (a < b) { go(); }\n```"
        );
    }

    #[test]
    fn inline_code_converts() {
        assert_eq!(html_to_markdown("run <code>ls -la</code> now"), "run `ls -la` now");
    }

    #[test]
    fn unordered_list_converts() {
        assert_eq!(
            html_to_markdown("<ul><li>one</li><li>two</li></ul>"),
            "- one\n- two"
        );
    }

    #[test]
    fn ordered_list_numbers_items() {
        assert_eq!(
            html_to_markdown("<ol><li>first</li><li>second</li></ol>"),
            "1. first\n2. second"
        );
    }

    #[test]
    fn blockquote_prefixes_lines() {
        assert_eq!(
            html_to_markdown("<blockquote>line one\nline two</blockquote>"),
            "> line one\n> line two"
        );
    }

    #[test]
    fn headings_become_atx() {
        assert_eq!(html_to_markdown("<h2>Title</h2>rest"), "## Title\nrest");
    }

    #[test]
    fn image_attributes_in_any_order() {
        assert_eq!(
            html_to_markdown(r#"<img alt="pic" src="/assets/a.png">"#),
            "![pic](/assets/a.png)"
        );
        assert_eq!(
            html_to_markdown(r#"<img src="/assets/b.png">"#),
            "![](/assets/b.png)"
        );
    }

    #[test]
    fn entities_unescape_after_conversion() {
        assert_eq!(html_to_markdown("<p>a &amp; b &quot;c&quot;</p>"), "a & b \"c\"");
    }
}
