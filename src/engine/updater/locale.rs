//! Locale preference and changelog selection

use std::collections::BTreeMap;

/// Supplies the preferred locale for changelog selection
pub trait LocaleSource: Send + Sync {
    fn preferred_locale(&self) -> String;
}

/// Always returns the same locale
#[derive(Debug, Clone)]
pub struct FixedLocale(pub String);

impl FixedLocale {
    pub fn new(locale: impl Into<String>) -> Self {
        Self(locale.into())
    }
}

impl LocaleSource for FixedLocale {
    fn preferred_locale(&self) -> String {
        self.0.clone()
    }
}

/// Reads `LC_ALL`, `LC_MESSAGES` then `LANG` (e.g. `pl_PL.UTF-8` becomes `pl-PL`)
#[derive(Debug, Clone, Default)]
pub struct EnvLocale;

impl LocaleSource for EnvLocale {
    fn preferred_locale(&self) -> String {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty() && value != "C" && value != "POSIX")
            .map(|value| normalize_locale(&value))
            .unwrap_or_else(|| "en".to_string())
    }
}

/// Strip encoding/modifier suffixes and use `-` as separator
pub fn normalize_locale(raw: &str) -> String {
    let base = raw
        .split(['.', '@'])
        .next()
        .unwrap_or(raw);
    base.replace('_', "-")
}

/// Pick the changelog text for `preferred`.
///
/// Order: exact match, language match (`pl-PL` -> `pl`), `fallback`, first entry.
pub fn select_changelog<'a>(
    changelog: &'a BTreeMap<String, String>,
    preferred: &str,
    fallback: &str,
) -> Option<&'a str> {
    let preferred = normalize_locale(preferred);
    let lookup = |wanted: &str| {
        changelog
            .iter()
            .find(|(locale, _)| locale.eq_ignore_ascii_case(wanted))
            .map(|(_, text)| text.as_str())
    };

    if let Some(text) = lookup(&preferred) {
        return Some(text);
    }

    let language = preferred.split('-').next().unwrap_or(&preferred);
    if let Some(text) = lookup(language) {
        return Some(text);
    }
    if let Some(text) = changelog
        .iter()
        .find(|(locale, _)| {
            locale
                .split(['-', '_'])
                .next()
                .is_some_and(|l| l.eq_ignore_ascii_case(language))
        })
        .map(|(_, text)| text.as_str())
    {
        return Some(text);
    }

    lookup(fallback).or_else(|| changelog.values().next().map(String::as_str))
}
