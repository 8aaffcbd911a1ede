use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::ClassificationInput;

/// Lower-cases, trims and collapses every whitespace run to a single space.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

#[derive(Debug, Error)]
pub enum KeywordError {
    #[error("keyword is empty after normalization")]
    Empty,
    #[error("keyword `{keyword}` cannot be compiled: {source}")]
    Pattern {
        keyword: String,
        #[source]
        source: regex::Error,
    },
}

/// A normalized keyword with its whole-word matcher compiled up front.
#[derive(Debug, Clone)]
pub struct Keyword {
    text: String,
    word: Regex,
}

impl Keyword {
    pub fn parse(raw: &str) -> Result<Self, KeywordError> {
        let text = normalize(raw);
        if text.is_empty() {
            return Err(KeywordError::Empty);
        }
        let word = Regex::new(&word_pattern(&text)).map_err(|source| KeywordError::Pattern {
            keyword: text.clone(),
            source,
        })?;
        Ok(Self { text, word })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substring containment in already-normalized text.
    pub fn occurs_in(&self, haystack: &str) -> bool {
        !haystack.is_empty() && haystack.contains(self.text.as_str())
    }

    /// Whole-word match; Thai marks and digits count as word characters.
    pub fn is_word_in(&self, haystack: &str) -> bool {
        self.word.is_match(haystack)
    }
}

static LEADING_WORD_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w").expect("static pattern"));
static TRAILING_WORD_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w$").expect("static pattern"));

// `\b` only makes sense next to a word character; punctuation edges delimit themselves.
fn word_pattern(text: &str) -> String {
    let lead = if LEADING_WORD_CHAR.is_match(text) { r"\b" } else { "" };
    let trail = if TRAILING_WORD_CHAR.is_match(text) { r"\b" } else { "" };
    format!("{lead}{}{trail}", regex::escape(text))
}

pub fn parse_keywords<'a>(
    raw: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<Keyword>, KeywordError> {
    raw.into_iter().map(|kw| Keyword::parse(kw)).collect()
}

pub fn any_occurs(keywords: &[Keyword], haystack: &str) -> bool {
    keywords.iter().any(|kw| kw.occurs_in(haystack))
}

pub fn matching<'k>(keywords: &'k [Keyword], haystack: &str) -> Vec<&'k str> {
    keywords
        .iter()
        .filter(|kw| kw.occurs_in(haystack))
        .map(Keyword::text)
        .collect()
}

/// Per-request normalized view of a [`ClassificationInput`].
#[derive(Debug, Clone, Default)]
pub struct NormalizedInput {
    pub title: String,
    pub description: String,
    pub image_analysis: String,
    pub detected_objects: Vec<String>,
    /// `title + " " + description`, used by clusters, sanity rules and the advanced scorer.
    pub text: String,
    pub current_category_id: Option<u32>,
}

impl NormalizedInput {
    pub fn new(input: &ClassificationInput) -> Self {
        let title = normalize(&input.title);
        let description = normalize(&input.description);
        let text = normalize(&format!("{title} {description}"));
        Self {
            image_analysis: input
                .image_analysis
                .as_deref()
                .map(normalize)
                .unwrap_or_default(),
            detected_objects: input
                .detected_objects
                .iter()
                .map(|obj| normalize(obj))
                .filter(|obj| !obj.is_empty())
                .collect(),
            current_category_id: input.current_category_id,
            title,
            description,
            text,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty() && self.image_analysis.is_empty() && self.detected_objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize("  Canon\tEOS \n R6  "), "canon eos r6");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \u{3000} "), "");
        assert_eq!(normalize("ปั๊มลม  AIR Pump"), "ปั๊มลม air pump");
    }

    #[test]
    fn keyword_rejects_blank_text() {
        assert!(matches!(Keyword::parse("   "), Err(KeywordError::Empty)));
    }

    #[test]
    fn whole_word_matching_ascii() {
        let kw = Keyword::parse("Canon").expect("keyword");
        assert_eq!(kw.text(), "canon");
        assert!(kw.is_word_in("canon eos r6"));
        assert!(kw.occurs_in("canonical form"));
        assert!(!kw.is_word_in("canonical form"));
    }

    #[test]
    fn thai_marks_do_not_count_as_boundaries() {
        let kw = Keyword::parse("กล้อง").expect("keyword");
        assert!(kw.is_word_in("กล้อง มือสอง"));
        assert!(kw.occurs_in("กล้องวงจรปิด"));
        assert!(!kw.is_word_in("กล้องวงจรปิด"));
    }

    #[test]
    fn keywords_with_regex_metacharacters_are_escaped() {
        let kw = Keyword::parse("f/2.8 (lens)").expect("keyword");
        assert!(kw.is_word_in("sigma f/2.8 (lens) art"));
        assert!(!kw.is_word_in("sigma f/2x8 (lens) art"));
    }

    #[test]
    fn normalized_input_joins_title_and_description() {
        let input = ClassificationInput {
            title: " Air  Pump ".into(),
            description: "".into(),
            detected_objects: vec!["  ".into(), "Tire".into()],
            image_analysis: None,
            current_category_id: Some(1),
        };
        let norm = NormalizedInput::new(&input);
        assert_eq!(norm.text, "air pump");
        assert_eq!(norm.detected_objects, vec!["tire".to_string()]);
        assert!(norm.image_analysis.is_empty());
        assert!(!norm.is_blank());
        assert!(NormalizedInput::new(&ClassificationInput::default()).is_blank());
    }
}
