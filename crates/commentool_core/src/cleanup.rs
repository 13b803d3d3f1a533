//! Ad-hoc rewrite passes over stored comment bodies.
//!
//! Each pass is a pure text transformation; the store driver decides what to
//! do with the result (preview vs. write-back). Passes are deliberately
//! narrow: they fix one historical artifact of the WordPress era each.

use regex::{Captures, Regex};

// Compile-once regex, keyed by call site.
macro_rules! re {
    ($pattern:literal) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($pattern).expect("static regex"))
    }};
}
pub(crate) use re;

/// phpBB-era smiley filenames and their Unicode replacements.
const SMILEY_EMOJI: &[(&str, &str)] = &[
    ("icon_smile.gif", "🙂"),
    ("icon_biggrin.gif", "😀"),
    ("icon_wink.gif", "😉"),
    ("icon_lol.gif", "😂"),
    ("icon_sad.gif", "🙁"),
    ("icon_cry.gif", "😢"),
    ("icon_surprised.gif", "😮"),
    ("icon_eek.gif", "😲"),
    ("icon_confused.gif", "😕"),
    ("icon_cool.gif", "😎"),
    ("icon_mad.gif", "😠"),
    ("icon_evil.gif", "👿"),
    ("icon_twisted.gif", "😈"),
    ("icon_razz.gif", "😛"),
    ("icon_redface.gif", "😳"),
    ("icon_neutral.gif", "😐"),
    ("icon_mrgreen.gif", "😁"),
    ("icon_rolleyes.gif", "🙄"),
    ("icon_exclaim.gif", "❗"),
    ("icon_question.gif", "❓"),
    ("icon_idea.gif", "💡"),
    ("icon_arrow.gif", "➡️"),
    ("icon_star.gif", "⭐️"),
];

fn emoji_for(filename: &str) -> Option<&'static str> {
    SMILEY_EMOJI
        .iter()
        .find(|(name, _)| *name == filename)
        .map(|(_, emoji)| *emoji)
}

/// Replace smiley image references (Markdown and `<img>` forms) under
/// `/assets/images/smilies/` with the matching emoji. Unknown filenames are
/// left untouched so nothing is silently lost.
pub fn replace_smilies(content: &str) -> String {
    let replaced = re!(r"!\[[^\]]*\]\(/?assets/images/smilies/([^)\s]+)\)").replace_all(
        content,
        |caps: &Captures| match emoji_for(&caps[1]) {
            Some(emoji) => emoji.to_string(),
            None => caps[0].to_string(),
        },
    );
    re!(r#"<img\s+[^>]*src=["']/?assets/images/smilies/([^"'>\s]+)["'][^>]*>"#)
        .replace_all(&replaced, |caps: &Captures| match emoji_for(&caps[1]) {
            Some(emoji) => emoji.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Non-breaking spaces (raw U+00A0 or `&nbsp;`) become plain spaces.
pub fn replace_nbsp(content: &str) -> String {
    content.replace('\u{a0}', " ").replace("&nbsp;", " ")
}

/// `[@name](#comment-123)` mention links flatten to plain `@name`. The
/// anchors stopped resolving after the migration.
pub fn flatten_mention_links(content: &str) -> String {
    re!(r"\[(@[^\]]+)\]\(#comment-[^)]+\)")
        .replace_all(content, "$1")
        .into_owned()
}

/// Root-relative Markdown image paths gain the `/assets` prefix the new blog
/// serves uploads from. Paths already under `/assets/` are untouched.
pub fn prefix_image_paths(content: &str) -> String {
    re!(r"!\[([^\]]*)\]\((/[^)\s]+)\)")
        .replace_all(content, |caps: &Captures| {
            let path = &caps[2];
            if path.starts_with("/assets/") {
                caps[0].to_string()
            } else {
                format!("![{}](/assets{})", &caps[1], path)
            }
        })
        .into_owned()
}

/// Literal (non-regex) substring replacement with an occurrence count.
pub fn literal_replace(content: &str, pattern: &str, replacement: &str) -> (String, usize) {
    if pattern.is_empty() {
        return (content.to_string(), 0);
    }
    let count = content.matches(pattern).count();
    (content.replace(pattern, replacement), count)
}

/// Regex replacement with an occurrence count. The replacement string uses
/// the usual `$1` capture syntax.
pub fn regex_replace(content: &str, pattern: &Regex, replacement: &str) -> (String, usize) {
    let count = pattern.find_iter(content).count();
    (
        pattern.replace_all(content, replacement).into_owned(),
        count,
    )
}

/// One regex hit with surrounding context, for the search report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnippet {
    pub matched: String,
    pub snippet: String,
}

/// All matches of `pattern` in `content`, each with up to `context` chars of
/// surrounding text (char-boundary safe).
pub fn search_matches(content: &str, pattern: &Regex, context: usize) -> Vec<MatchSnippet> {
    pattern
        .find_iter(content)
        .map(|found| {
            let before: String = content[..found.start()]
                .chars()
                .rev()
                .take(context)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let after: String = content[found.end()..].chars().take(context).collect();
            MatchSnippet {
                matched: found.as_str().to_string(),
                snippet: format!("{before}{}{after}", found.as_str()),
            }
        })
        .collect()
}
