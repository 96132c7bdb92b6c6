//! Lexical language detection.
//!
//! Counts stop-word hits per supported language.  The language with the
//! most hits wins; a tie (including no hits at all) resolves to the
//! configured fallback.

use serde::{Deserialize, Serialize};

/// A supported instruction language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
    Fr,
    De,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::En, Language::Es, Language::Fr, Language::De];

    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::De => "de",
        }
    }

    /// Parse an ISO 639-1 code (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.code().eq_ignore_ascii_case(code.trim()))
    }

    fn stop_words(&self) -> &'static [&'static str] {
        match self {
            Self::En => &[
                "the", "a", "an", "to", "on", "and", "then", "in", "into", "of", "for", "with",
                "it", "this", "that", "go", "click", "open", "page", "please", "button", "tab",
                "scroll", "wait", "type", "down", "up",
            ],
            Self::Es => &[
                "el", "la", "los", "las", "de", "del", "en", "y", "luego", "un", "una", "por",
                "para", "con", "ir", "haz", "clic", "abre", "página", "botón", "pestaña", "espera",
                "abajo", "arriba",
            ],
            Self::Fr => &[
                "le", "la", "les", "de", "des", "du", "et", "puis", "un", "une", "sur", "pour",
                "avec", "aller", "cliquez", "clique", "ouvre", "ouvrir", "bouton", "onglet",
                "attends", "bas", "haut",
            ],
            Self::De => &[
                "der", "die", "das", "den", "und", "dann", "ein", "eine", "auf", "zu", "mit",
                "für", "gehe", "klicke", "öffne", "seite", "schaltfläche", "tab", "warte",
                "unten", "oben",
            ],
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of language detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub language: Language,
    /// Share of stop-word hits attributed to `language`, in `[0, 1]`.
    pub confidence: f64,
    /// Other languages with at least one hit, best first.
    pub alternatives: Vec<(Language, f64)>,
}

/// Detect the language of `text`.
pub fn detect(text: &str, fallback: Language) -> LanguageDetection {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut scores: Vec<(Language, usize)> = Language::ALL
        .into_iter()
        .map(|lang| {
            let words = lang.stop_words();
            let hits = tokens.iter().filter(|t| words.contains(*t)).count();
            (lang, hits)
        })
        .collect();

    let total: usize = scores.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return LanguageDetection {
            language: fallback,
            confidence: 0.0,
            alternatives: Vec::new(),
        };
    }

    // Stable sort keeps `Language::ALL` order among equals.
    scores.sort_by(|a, b| b.1.cmp(&a.1));
    let top = scores[0].1;
    let tied = scores.iter().filter(|(_, n)| *n == top).count() > 1;

    let language = if tied { fallback } else { scores[0].0 };
    let share = |n: usize| n as f64 / total as f64;

    LanguageDetection {
        language,
        confidence: share(top),
        alternatives: scores
            .into_iter()
            .filter(|(lang, n)| *lang != language && *n > 0)
            .map(|(lang, n)| (lang, share(n)))
            .collect(),
    }
}
