use regex::Regex;

/// Byte span of a single token within the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

/// Token boundary detection, injected into the chunker at construction.
///
/// Implementations must be deterministic: the same input always yields the
/// same token sequence.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// Default tokenizer covering both space-delimited and CJK scripts.
///
/// Alphanumeric runs become one token each; Hiragana, Katakana, and Kanji
/// codepoints are emitted one token per codepoint so that languages without
/// whitespace-delimited words chunk uniformly. Everything else is a boundary.
pub struct ScriptAwareTokenizer {
    cjk: Regex,
}

impl Default for ScriptAwareTokenizer {
    fn default() -> Self {
        // The three ranges FTS-style tokenizers special-case for Japanese.
        let cjk = Regex::new(r"[\p{Hiragana}\p{Katakana}\p{Han}]")
            .expect("static CJK class compiles");
        Self { cjk }
    }
}

impl ScriptAwareTokenizer {
    fn is_cjk(&self, ch: char) -> bool {
        let mut buf = [0u8; 4];
        self.cjk.is_match(ch.encode_utf8(&mut buf))
    }
}

impl Tokenizer for ScriptAwareTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut word_start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if self.is_cjk(ch) {
                if let Some(start) = word_start.take() {
                    tokens.push(Token { start, end: idx });
                }
                tokens.push(Token {
                    start: idx,
                    end: idx + ch.len_utf8(),
                });
            } else if ch.is_alphanumeric() {
                if word_start.is_none() {
                    word_start = Some(idx);
                }
            } else if let Some(start) = word_start.take() {
                tokens.push(Token { start, end: idx });
            }
        }

        if let Some(start) = word_start {
            tokens.push(Token {
                start,
                end: text.len(),
            });
        }

        tokens
    }
}
