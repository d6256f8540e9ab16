//! # Language Code Normalization
//!
//! Every streaming session is gated by this module: loose language tags from
//! clients are normalized into the strict forms the upstream speech service
//! expects, or rejected. Validation happens exactly once, at session setup;
//! the codes stored on a session are always the normalized forms.
//!
//! ## Normalized forms:
//! - **Source language**: BCP-47 `lang-REGION` (lowercase language, uppercase
//!   region), e.g. `ja-JP`. Bare two-letter codes are completed from a fixed
//!   region table.
//! - **Target language**: bare lowercase ISO 639-1 code, e.g. `en`. A
//!   hyphenated tag is truncated at the first hyphen.

/// Canonical region for bare two-letter source codes.
///
/// A bare code not present here is rejected rather than guessed.
const DEFAULT_REGIONS: &[(&str, &str)] = &[
    ("ja", "JP"),
    ("en", "US"),
    ("zh", "CN"),
    ("ko", "KR"),
    ("es", "ES"),
    ("fr", "FR"),
    ("de", "DE"),
    ("it", "IT"),
    ("pt", "BR"),
    ("ru", "RU"),
    ("ar", "SA"),
    ("hi", "IN"),
    ("th", "TH"),
    ("vi", "VN"),
    ("id", "ID"),
    ("ms", "MY"),
];

/// Normalize a source-language tag to BCP-47 `lang-REGION` form.
///
/// Accepts either a full tag (`ja-jp` → `ja-JP`) or a bare code known to the
/// region table (`ja` → `ja-JP`). Returns `None` for empty input, tags with
/// more or fewer than two hyphen-separated parts, tags with an empty half,
/// and bare codes outside the table.
pub fn normalize_source_language(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }

    if tag.contains('-') {
        let mut parts = tag.splitn(3, '-');
        let lang = parts.next().unwrap_or("");
        let region = parts.next().unwrap_or("");
        // Exactly two non-empty parts; `zh-Hans-CN` style tags are rejected.
        if lang.is_empty() || region.is_empty() || parts.next().is_some() {
            return None;
        }
        return Some(format!("{}-{}", lang.to_lowercase(), region.to_uppercase()));
    }

    let lang = tag.to_lowercase();
    DEFAULT_REGIONS
        .iter()
        .find(|(code, _)| *code == lang)
        .map(|(code, region)| format!("{}-{}", code, region))
}

/// Normalize a target-language tag to a bare lowercase ISO 639-1 code.
///
/// A hyphenated tag keeps only the part before the first hyphen (`en-US` →
/// `en`). Returns `None` for empty input or a tag that starts with a hyphen.
pub fn normalize_target_language(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }

    let lang = tag.split('-').next().unwrap_or("");
    if lang.is_empty() {
        return None;
    }

    Some(lang.to_lowercase())
}
