//! Heuristic token estimation.
//!
//! Used only when a provider omits usage data. The estimate is a pure function
//! of the text so the same question/response pair always yields the same count.

/// Strategy for estimating token counts of free text.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u64;
}

/// Dominant writing system of a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFamily {
    Latin,
    Cyrillic,
    Cjk,
}

impl ScriptFamily {
    /// Average tokens produced per whitespace-separated word.
    pub fn tokens_per_word(self) -> f64 {
        match self {
            ScriptFamily::Latin | ScriptFamily::Cjk => 1.3,
            ScriptFamily::Cyrillic => 2.2,
        }
    }

    /// Family with the most letters in `text`; Latin on ties and for empty text.
    pub fn detect(text: &str) -> Self {
        let (mut latin, mut cyrillic, mut cjk) = (0usize, 0usize, 0usize);
        for ch in text.chars() {
            if is_cjk(ch) {
                cjk += 1;
            } else if is_cyrillic(ch) {
                cyrillic += 1;
            } else if ch.is_alphabetic() {
                latin += 1;
            }
        }

        if cjk > latin && cjk >= cyrillic {
            ScriptFamily::Cjk
        } else if cyrillic > latin {
            ScriptFamily::Cyrillic
        } else {
            ScriptFamily::Latin
        }
    }
}

/// Word count times tokens-per-word, CJK counted per character, punctuation
/// weighted 0.5. Blank text is 0 tokens; any other text at least 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

const PUNCTUATION_WEIGHT: f64 = 0.5;
const CJK_CHAR_WEIGHT: f64 = 1.0;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u64 {
        if text.trim().is_empty() {
            return 0;
        }

        let family = ScriptFamily::detect(text);
        let mut words = 0usize;
        let mut cjk_chars = 0usize;
        let mut punctuation = 0usize;

        for word in text.split_whitespace() {
            let mut has_word_char = false;
            for ch in word.chars() {
                if is_cjk(ch) {
                    cjk_chars += 1;
                } else if ch.is_alphanumeric() {
                    has_word_char = true;
                } else {
                    punctuation += 1;
                }
            }
            if has_word_char {
                words += 1;
            }
        }

        let tokens = words as f64 * family.tokens_per_word()
            + cjk_chars as f64 * CJK_CHAR_WEIGHT
            + punctuation as f64 * PUNCTUATION_WEIGHT;

        (tokens.ceil() as u64).max(1)
    }
}

fn is_cyrillic(ch: char) -> bool {
    matches!(ch as u32, 0x0400..=0x052F)
}

fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x30FF      // hiragana, katakana
            | 0x3400..=0x4DBF // extension A
            | 0x4E00..=0x9FFF // unified ideographs
            | 0xAC00..=0xD7AF // hangul syllables
            | 0xF900..=0xFAFF
            | 0x20000..=0x2A6DF
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_blank_text_is_zero() {
        assert_eq!(HeuristicEstimator.estimate(""), 0);
        assert_eq!(HeuristicEstimator.estimate("  \n\t"), 0);
    }

    #[test]
    fn test_latin_words() {
        // 4 words * 1.3 = 5.2, plus '?' * 0.5 = 5.7 -> 6
        assert_eq!(HeuristicEstimator.estimate("Is the door locked?"), 6);
    }

    #[test]
    fn test_cyrillic_costs_more_per_word() {
        let latin = HeuristicEstimator.estimate("turn on the light");
        let cyrillic = HeuristicEstimator.estimate("включи свет на кухне");
        assert_eq!(ScriptFamily::detect("включи свет на кухне"), ScriptFamily::Cyrillic);
        // 4 * 2.2 = 8.8 -> 9
        assert_eq!(cyrillic, 9);
        assert!(cyrillic > latin);
    }

    #[test]
    fn test_cjk_counts_characters() {
        assert_eq!(ScriptFamily::detect("今日は晴れです"), ScriptFamily::Cjk);
        assert_eq!(HeuristicEstimator.estimate("今日は晴れです"), 7);
    }

    #[test]
    fn test_single_symbol_is_at_least_one() {
        assert_eq!(HeuristicEstimator.estimate("?"), 1);
    }

    proptest! {
        #[test]
        fn prop_estimate_is_deterministic(text in ".{0,200}") {
            prop_assert_eq!(HeuristicEstimator.estimate(&text), HeuristicEstimator.estimate(&text));
        }

        #[test]
        fn prop_estimate_bounded_by_length(text in "\\PC{1,200}") {
            let estimate = HeuristicEstimator.estimate(&text);
            let chars = text.chars().count() as u64;
            prop_assert!(estimate <= chars * 3);
            if !text.trim().is_empty() {
                prop_assert!(estimate >= 1);
            }
        }
    }
}
