//! Translation table for engine-generated texts.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("Unexpected key found for translation: {0}")]
    UnexpectedKey(String),
    #[error("Missing keys for translation: {0}")]
    MissingKeys(String),
}

/// Per-language key/value texts. Unknown keys translate to themselves.
#[derive(Debug, Clone, Default)]
pub struct TranslationTable {
    languages: HashMap<String, HashMap<String, String>>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a language.
    ///
    /// Returns `true` when the language is new. With `key_check`, a new
    /// language must carry exactly the keys of an already registered one.
    pub fn register_language(
        &mut self,
        lang: impl Into<String>,
        entries: HashMap<String, String>,
        key_check: bool,
    ) -> Result<bool, TranslationError> {
        let lang = lang.into();
        if self.languages.contains_key(&lang) {
            self.languages.insert(lang, entries);
            return Ok(false);
        }

        if key_check {
            if let Some(reference) = self.languages.values().next() {
                let expected: BTreeSet<&String> = reference.keys().collect();
                if let Some(extra) = entries.keys().find(|k| !expected.contains(k)) {
                    return Err(TranslationError::UnexpectedKey(extra.clone()));
                }
                let missing: Vec<&str> = expected
                    .iter()
                    .filter(|k| !entries.contains_key(k.as_str()))
                    .map(|k| k.as_str())
                    .collect();
                if !missing.is_empty() {
                    return Err(TranslationError::MissingKeys(missing.join(", ")));
                }
            }
        }

        self.languages.insert(lang, entries);
        Ok(true)
    }

    pub fn lookup(&self, key: &str, lang: &str) -> Option<&str> {
        self.languages
            .get(lang)
            .and_then(|tr| tr.get(key))
            .map(String::as_str)
    }

    /// Translate `key` into `lang`, falling back to the key itself.
    pub fn translate(&self, key: &str, lang: &str) -> String {
        self.lookup(key, lang).unwrap_or(key).to_string()
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_translate_falls_back_to_key() {
        let mut table = TranslationTable::new();
        assert!(table
            .register_language("tr", entries(&[("Timed out", "Zaman aşımı")]), false)
            .unwrap());
        assert_eq!(table.translate("Timed out", "tr"), "Zaman aşımı");
        assert_eq!(table.translate("Timed out", "en"), "Timed out");
        assert_eq!(table.translate("other", "tr"), "other");
    }

    #[test]
    fn test_register_existing_language_returns_false() {
        let mut table = TranslationTable::new();
        table
            .register_language("en", entries(&[("a", "A")]), false)
            .unwrap();
        let fresh = table
            .register_language("en", entries(&[("a", "AA")]), true)
            .unwrap();
        assert!(!fresh);
        assert_eq!(table.translate("a", "en"), "AA");
    }

    #[test]
    fn test_key_check_rejects_missing_and_extra_keys() {
        let mut table = TranslationTable::new();
        table
            .register_language("en", entries(&[("a", "A"), ("b", "B")]), false)
            .unwrap();

        let extra = table.register_language("de", entries(&[("a", "A"), ("c", "C")]), true);
        assert_eq!(extra, Err(TranslationError::UnexpectedKey("c".into())));

        let missing = table.register_language("de", entries(&[("a", "A")]), true);
        assert_eq!(missing, Err(TranslationError::MissingKeys("b".into())));

        assert!(table
            .register_language("de", entries(&[("a", "Ä"), ("b", "B")]), true)
            .unwrap());
    }
}
