//! Text preprocessing applied to documents before they are embedded.
//!
//! Preprocessing is a pure `text -> text` step. The crate ships two
//! implementations:
//!
//! - [`PassThrough`]: returns the input unchanged
//! - [`ThaiTextNormalizer`]: cleans Thai text and re-joins whitespace tokens
//!
//! Any `Fn(&str) -> String` closure is also a [`TextPreprocessor`], so a
//! dictionary-based word segmenter can be plugged in without a wrapper type.

/// A pure normalization step run before embedding.
pub trait TextPreprocessor: Send + Sync {
    /// Return the normalized form of `text`.
    fn preprocess(&self, text: &str) -> String;
}

impl<F> TextPreprocessor for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn preprocess(&self, text: &str) -> String {
        self(text)
    }
}

/// Returns text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl TextPreprocessor for PassThrough {
    fn preprocess(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Normalizes Thai (and mixed-script) text.
///
/// The normalizer:
/// 1. drops zero-width characters,
/// 2. collapses repeated Thai vowel and tone marks into one (when two
///    different tone marks follow each other the last one wins),
/// 3. splits on whitespace, drops empty tokens and bare `,` tokens,
/// 4. joins the remaining tokens with a single space.
///
/// # Example
///
/// ```rust
/// use groundwork_rag::{TextPreprocessor, ThaiTextNormalizer};
///
/// let normalizer = ThaiTextNormalizer::default();
/// assert_eq!(normalizer.preprocess("  บริษัท ,  ที.ที. "), "บริษัท ที.ที.");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ThaiTextNormalizer;

const ZERO_WIDTH: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

fn is_thai_tone_mark(c: char) -> bool {
    ('\u{0E48}'..='\u{0E4B}').contains(&c)
}

fn is_thai_combining_mark(c: char) -> bool {
    c == '\u{0E31}'
        || ('\u{0E34}'..='\u{0E3A}').contains(&c)
        || ('\u{0E47}'..='\u{0E4E}').contains(&c)
}

impl ThaiTextNormalizer {
    fn clean_marks(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars().filter(|c| !ZERO_WIDTH.contains(c)) {
            if let Some(prev) = out.chars().next_back() {
                if is_thai_combining_mark(c) && prev == c {
                    continue;
                }
                if is_thai_tone_mark(c) && is_thai_tone_mark(prev) {
                    out.pop();
                }
            }
            out.push(c);
        }
        out
    }
}

impl TextPreprocessor for ThaiTextNormalizer {
    fn preprocess(&self, text: &str) -> String {
        Self::clean_marks(text)
            .split_whitespace()
            .filter(|token| *token != ",")
            .collect::<Vec<_>>()
            .join(" ")
    }
}
