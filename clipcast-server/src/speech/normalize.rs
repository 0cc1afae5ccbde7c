//! Transcript normalization
//!
//! Turns raw transcribed text into comparable word lists: punctuation
//! stripped, lower-cased, and common inflectional endings folded away so
//! spoken variants still match a fixed trigger phrase. The original
//! spellings are kept side by side so a match can report what was
//! actually said.

/// A normalized utterance. `original[i]` is the spoken form of
/// `folded[i]`; words that normalize to nothing are dropped from both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub original: Vec<String>,
    pub folded: Vec<String>,
}

pub fn normalize_text(text: &str, language: Option<&str>) -> NormalizedText {
    let mut original = Vec::new();
    let mut folded = Vec::new();
    for raw in text.split_whitespace() {
        let word = normalize_word(raw, language);
        if word.is_empty() {
            continue;
        }
        original.push(raw.to_string());
        folded.push(word);
    }
    NormalizedText { original, folded }
}

pub fn normalize_word(word: &str, language: Option<&str>) -> String {
    let cleaned: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    fold_suffix(cleaned, language)
}

/// Strip one common inflectional ending, keeping a stem of at least
/// three bytes so short words survive intact.
fn fold_suffix(word: String, language: Option<&str>) -> String {
    let lang = language
        .and_then(|l| l.get(..2))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "en".to_string());
    let endings: &[&str] = match lang.as_str() {
        "de" => &["en", "er", "st", "e", "n"],
        _ => &["ing", "ed", "es", "s"],
    };
    for ending in endings {
        if word.len() >= ending.len() + 3 && word.ends_with(ending) {
            return word[..word.len() - ending.len()].to_string();
        }
    }
    word
}
