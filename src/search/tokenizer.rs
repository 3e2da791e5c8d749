//! Tokenizer - jieba-rs for CJK text, word splitting for everything else / 分词器
//!
//! Supports / 支持：
//! - Chinese word segmentation (jieba search mode) / 中文分词
//! - Latin text split on non-alphanumeric characters + lowercase / 英文分词
//! - Unicode NFKC normalization, so full-width and half-width forms agree
//!
//! Index tokenization and query tokenization must stay identical.

use jieba_rs::Jieba;
use once_cell::sync::Lazy;
use unicode_normalization::UnicodeNormalization;

/// Global jieba tokenizer instance / 全局 jieba 分词器实例
static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

/// Tokens longer than this are dropped (hashes, urls glued into titles).
pub const MAX_TOKEN_CHARS: usize = 40;

/// Tokens shorter than this (in chars) are down-weighted when ranking.
pub const MIN_FULL_WEIGHT_CHARS: usize = 2;

/// Normalize text for search: NFKC, lowercase, collapse whitespace / 标准化文本
pub fn normalize_for_search(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tokenize text / 对文本进行分词
///
/// Output keeps first-occurrence order and may contain duplicates.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize_for_search(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut tokens = Vec::new();
    for segment in normalized.split(|c: char| !c.is_alphanumeric()) {
        if contains_cjk(segment) {
            // search mode gives finer granularity for long words / 搜索引擎模式
            tokens.extend(
                JIEBA
                    .cut_for_search(segment, true)
                    .into_iter()
                    .filter_map(accept_token),
            );
        } else if let Some(token) = accept_token(segment) {
            tokens.push(token);
        }
    }
    tokens
}

/// Tokenize a search query; duplicates removed, order kept / 对搜索查询进行分词
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

fn accept_token(word: &str) -> Option<String> {
    let word = word.trim();
    if word.is_empty() || !word.chars().any(char::is_alphanumeric) {
        return None;
    }
    if word.chars().count() > MAX_TOKEN_CHARS {
        return None;
    }
    Some(word.to_string())
}

/// Whether `text` has anything a token could be made of. A query that has
/// such text but no tokens asked only for dropped (too long) words.
pub fn has_searchable_text(text: &str) -> bool {
    text.nfkc().any(char::is_alphanumeric)
}

/// Short tokens are indexed but count less when ranking.
pub fn is_short_token(token: &str) -> bool {
    token.chars().count() < MIN_FULL_WEIGHT_CHARS
}

/// Check if text contains CJK characters (Chinese, Japanese, Korean) / 检测文本是否包含CJK字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

#[inline]
pub fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}' |  // CJK Unified Ideographs
        '\u{3400}'..='\u{4dbf}' |  // CJK Extension A
        '\u{20000}'..='\u{2a6df}' | // CJK Extension B
        '\u{f900}'..='\u{faff}' |  // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309f}' |  // Hiragana
        '\u{30a0}'..='\u{30ff}' |  // Katakana
        '\u{ac00}'..='\u{d7af}'    // Hangul Syllables
    )
}
