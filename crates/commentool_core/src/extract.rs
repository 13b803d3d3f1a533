//! Recovery of typed rows from the `VALUES` clause of a SQL `INSERT`.
//!
//! The input is the text that follows the `VALUES` keyword of a multi-row
//! insert: one or more parenthesized tuples separated by commas, optionally
//! terminated by `;`. Extraction is best-effort and positional: malformed
//! trailing input truncates the result instead of failing, and column
//! semantics are entirely the caller's concern.

/// One scalar value recovered from a tuple literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// The bare unquoted token `NULL`.
    Null,
    /// An unquoted, optionally signed run of decimal digits. The original
    /// text is retained alongside the parsed value so callers can re-parse
    /// at a wider width if they need to.
    Integer { text: String, value: i64 },
    /// A quoted literal, fully unescaped. Unrecognized bare tokens also land
    /// here verbatim rather than aborting the row.
    Text(String),
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// The textual content of a `Text` field, if that is what this is.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Field::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Text content with `NULL` folded to `None`. Integers render via their
    /// retained source text.
    pub fn to_nullable_string(&self) -> Option<String> {
        match self {
            Field::Null => None,
            Field::Integer { text, .. } => Some(text.clone()),
            Field::Text(value) => Some(value.clone()),
        }
    }
}

/// One table row: fields in the left-to-right order of the tuple.
pub type Row = Vec<Field>;

/// Result of running the extractor over one `VALUES` clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub rows: Vec<Row>,
    /// Tuples that were opened but never closed before end of input. These
    /// are discarded, not emitted partially.
    pub skipped: usize,
}

/// Extract every complete tuple from `raw` as a typed row.
///
/// `raw` must be the text *after* the `VALUES` keyword; passing a whole
/// statement would confuse the column-list parentheses of the header with a
/// value tuple. Never panics on malformed input.
pub fn extract_rows(raw: &str) -> Extraction {
    let mut splitter = TupleSplitter::new(raw);
    let mut rows = Vec::new();
    while let Some(span) = splitter.next() {
        rows.push(parse_fields(span));
    }
    Extraction {
        rows,
        skipped: splitter.skipped(),
    }
}

/// Single forward pass over a `VALUES` clause yielding the interior text of
/// each top-level parenthesized tuple.
///
/// Parentheses and commas inside quoted strings are ignored, as are nested
/// parentheses (tracked by depth). Both `'` and `"` open a string; inside
/// one, a backslash escapes the next character and a doubled quote is an
/// embedded quote.
pub struct TupleSplitter<'a> {
    text: &'a str,
    pos: usize,
    skipped: usize,
}

impl<'a> TupleSplitter<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            skipped: 0,
        }
    }

    /// Number of unterminated tuples discarded at end of input. Only
    /// meaningful once the iterator is exhausted.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'a> Iterator for TupleSplitter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        // All state machine characters are ASCII, so byte-wise scanning is
        // safe on UTF-8 input: continuation bytes never match them.
        let bytes = self.text.as_bytes();
        let mut i = self.pos;
        let mut depth = 0usize;
        let mut start = 0usize;
        let mut quote: Option<u8> = None;

        while i < bytes.len() {
            let c = bytes[i];
            if let Some(q) = quote {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                if c == q {
                    if bytes.get(i + 1) == Some(&q) {
                        i += 2;
                        continue;
                    }
                    quote = None;
                }
                i += 1;
                continue;
            }
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' => {
                    if depth == 0 {
                        start = i + 1;
                    }
                    depth += 1;
                }
                b')' => {
                    if depth > 0 {
                        depth -= 1;
                        if depth == 0 {
                            self.pos = i + 1;
                            return Some(&self.text[start..i]);
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }

        self.pos = i;
        if depth > 0 {
            // A tuple was open when input ran out (possibly because an
            // unterminated string swallowed the rest of the buffer).
            self.skipped += 1;
        }
        None
    }
}

/// Split one tuple's interior on top-level commas and decode each literal.
///
/// Uses the same quote/escape state machine as [`TupleSplitter`] so that
/// field boundaries and tuple boundaries can never disagree.
pub fn parse_fields(interior: &str) -> Row {
    let bytes = interior.as_bytes();
    let mut fields = Vec::new();
    let mut i = 0usize;
    let mut start = 0usize;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' => quote = Some(c),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                fields.push(decode_literal(&interior[start..i]));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    fields.push(decode_literal(&interior[start..]));
    fields
}

fn decode_literal(raw: &str) -> Field {
    let trimmed = raw.trim();
    if trimmed == "NULL" {
        return Field::Null;
    }
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let q = bytes[0];
        if (q == b'\'' || q == b'"') && bytes[bytes.len() - 1] == q {
            return Field::Text(unescape(&trimmed[1..trimmed.len() - 1], q as char));
        }
    }
    if is_signed_digits(trimmed) {
        if let Ok(value) = trimmed.parse::<i64>() {
            return Field::Integer {
                text: trimmed.to_string(),
                value,
            };
        }
        // Digit run wider than i64: fall through to the text fallback with
        // the source text intact.
    }
    // Unrecognized bare token. Well-formed dumps never produce one, but
    // extraction is best-effort, so pass it through instead of erroring.
    Field::Text(trimmed.to_string())
}

fn is_signed_digits(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Undo SQL string escaping: `\n`/`\r`/`\t`/`\0` become control characters,
/// any other backslashed character is taken literally, and a doubled quote
/// character collapses to one.
fn unescape(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else if c == quote && chars.peek() == Some(&quote) {
            chars.next();
            out.push(quote);
        } else {
            out.push(c);
        }
    }
    out
}

/// Quote a string as a SQL literal using doubled-quote escaping. Backslashes
/// are doubled as well so the result survives a trip back through
/// [`extract_rows`].
pub fn quote_sql_str(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "''");
    format!("'{escaped}'")
}

/// Render a row back into a parenthesized SQL tuple literal.
pub fn encode_tuple(row: &[Field]) -> String {
    let parts: Vec<String> = row
        .iter()
        .map(|field| match field {
            Field::Null => "NULL".to_string(),
            Field::Integer { text, .. } => text.clone(),
            Field::Text(value) => quote_sql_str(value),
        })
        .collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Field {
        Field::Text(s.to_string())
    }

    fn int(value: i64) -> Field {
        Field::Integer {
            text: value.to_string(),
            value,
        }
    }

    #[test]
    fn two_tuples_three_fields_in_order() {
        let extraction = extract_rows("(1, 'a', NULL), (2, 'b', 'c');");
        assert_eq!(extraction.skipped, 0);
        assert_eq!(
            extraction.rows,
            vec![
                vec![int(1), text("a"), Field::Null],
                vec![int(2), text("b"), text("c")],
            ]
        );
    }

    #[test]
    fn doubled_quote_escaping() {
        let extraction = extract_rows("('it''s')");
        assert_eq!(extraction.rows, vec![vec![text("it's")]]);
    }

    #[test]
    fn backslash_quote_escaping() {
        let extraction = extract_rows(r"('it\'s')");
        assert_eq!(extraction.rows, vec![vec![text("it's")]]);
    }

    #[test]
    fn comma_and_paren_inside_string_do_not_split() {
        let extraction = extract_rows("('a,(b)', 2)");
        assert_eq!(extraction.rows, vec![vec![text("a,(b)"), int(2)]]);
    }

    #[test]
    fn bare_null_is_distinct_from_quoted_null() {
        let extraction = extract_rows("(NULL, 'NULL')");
        assert_eq!(extraction.rows, vec![vec![Field::Null, text("NULL")]]);
    }

    #[test]
    fn truncated_input_reports_skipped_tuple() {
        let extraction = extract_rows("(1,'abc");
        assert!(extraction.rows.is_empty());
        assert_eq!(extraction.skipped, 1);
    }

    #[test]
    fn truncated_tail_keeps_complete_tuples() {
        let extraction = extract_rows("(1, 'ok'), (2, 'oops");
        assert_eq!(extraction.rows, vec![vec![int(1), text("ok")]]);
        assert_eq!(extraction.skipped, 1);
    }

    #[test]
    fn negative_integer_keeps_source_text() {
        let extraction = extract_rows("(-42)");
        assert_eq!(
            extraction.rows,
            vec![vec![Field::Integer {
                text: "-42".to_string(),
                value: -42,
            }]]
        );
    }

    #[test]
    fn oversized_digit_run_falls_back_to_text() {
        let extraction = extract_rows("(99999999999999999999999999)");
        assert_eq!(
            extraction.rows,
            vec![vec![text("99999999999999999999999999")]]
        );
    }

    #[test]
    fn double_quoted_strings_are_accepted() {
        let extraction = extract_rows(r#"("he said ""hi""")"#);
        assert_eq!(extraction.rows, vec![vec![text(r#"he said "hi""#)]]);
    }

    #[test]
    fn backslash_control_escapes_decode() {
        let extraction = extract_rows(r"('line1\nline2\ttab')");
        assert_eq!(extraction.rows, vec![vec![text("line1\nline2\ttab")]]);
    }

    #[test]
    fn nested_parentheses_stay_inside_field() {
        let extraction = extract_rows("(COALESCE(a, b), 1)");
        assert_eq!(
            extraction.rows,
            vec![vec![text("COALESCE(a, b)"), int(1)]]
        );
    }

    #[test]
    fn multibyte_content_survives() {
        let extraction = extract_rows("(5, '评论内容，带中文（括号）')");
        assert_eq!(
            extraction.rows,
            vec![vec![int(5), text("评论内容，带中文（括号）")]]
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        let row = vec![
            int(7),
            Field::Null,
            text("it's a \\ test, with (parens) and \"quotes\""),
            int(-3),
        ];
        let encoded = encode_tuple(&row);
        let extraction = extract_rows(&encoded);
        assert_eq!(extraction.skipped, 0);
        assert_eq!(extraction.rows, vec![row]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let extraction = extract_rows("");
        assert!(extraction.rows.is_empty());
        assert_eq!(extraction.skipped, 0);
    }
}
