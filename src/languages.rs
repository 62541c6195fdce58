pub const DEFAULT_LANGUAGE: &str = "english";
pub const LANGUAGE_DELIMITER: char = ',';

/// Splits a delimited language list. Order and duplicates are preserved;
/// blank items are dropped.
pub fn parse_language_list(raw: &str) -> Vec<String> {
    raw.split(LANGUAGE_DELIMITER)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn resolve_languages(configured: Option<&str>) -> Vec<String> {
    let languages = configured.map(parse_language_list).unwrap_or_default();
    if languages.is_empty() {
        vec![DEFAULT_LANGUAGE.to_string()]
    } else {
        languages
    }
}

/// Drops blank entries from an already split list.
pub fn normalize_languages(languages: Vec<String>) -> Vec<String> {
    languages
        .into_iter()
        .map(|language| language.trim().to_string())
        .filter(|language| !language.is_empty())
        .collect()
}
