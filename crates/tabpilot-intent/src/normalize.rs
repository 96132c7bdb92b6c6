//! Text normalization ahead of pattern matching.
//!
//! Lower-cases, collapses whitespace, trims terminal punctuation and expands
//! a per-language abbreviation table so that "click login" and
//! "click on login" reach the catalog in the same shape.  The case-preserved
//! form is kept alongside so URLs and typed values can be recovered verbatim.

use crate::language::Language;

/// Normalized instruction text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Lower-cased, whitespace-collapsed, abbreviation-expanded text.
    pub text: String,
    /// Whitespace-collapsed input with its original letter case.
    pub original: String,
}

impl Normalized {
    /// Split the normalized text into sequential clauses.
    pub fn clauses(&self) -> Vec<String> {
        split_clauses(&self.text)
    }

    /// Recover the original spelling of a lower-cased fragment.
    pub fn recover_case(&self, fragment: &str) -> String {
        recover_case(&self.original, fragment)
    }
}

/// A single-word abbreviation.
///
/// `word` becomes `replacement`, followed by `tail` unless the text already
/// continues with `tail`.
struct Abbreviation {
    word: &'static str,
    replacement: &'static str,
    tail: &'static str,
}

const fn abbr(word: &'static str, replacement: &'static str, tail: &'static str) -> Abbreviation {
    Abbreviation {
        word,
        replacement,
        tail,
    }
}

const EN: &[Abbreviation] = &[
    abbr("click", "click", "on"),
    abbr("tap", "tap", "on"),
    abbr("goto", "go", "to"),
    abbr("nav", "navigate", "to"),
    abbr("pls", "please", ""),
    abbr("plz", "please", ""),
    abbr("btn", "button", ""),
    abbr("pg", "page", ""),
    abbr("secs", "seconds", ""),
    abbr("sec", "seconds", ""),
    abbr("w/", "with", ""),
];

const ES: &[Abbreviation] = &[
    abbr("pulsa", "haz clic", "en"),
    abbr("clica", "haz clic", "en"),
    abbr("seg", "segundos", ""),
];

const FR: &[Abbreviation] = &[
    abbr("clique", "clique", "sur"),
    abbr("cliquez", "cliquez", "sur"),
    abbr("sec", "secondes", ""),
];

const DE: &[Abbreviation] = &[
    abbr("klick", "klicke", "auf"),
    abbr("klicke", "klicke", "auf"),
    abbr("sek", "sekunden", ""),
];

fn abbreviations(language: Language) -> &'static [Abbreviation] {
    match language {
        Language::En => EN,
        Language::Es => ES,
        Language::Fr => FR,
        Language::De => DE,
    }
}

/// Token sequences that separate sequential clauses, longest first.
const CLAUSE_SEPARATORS: &[&[&str]] = &[
    &["and", "then"],
    &["y", "luego"],
    &["et", "puis"],
    &["und", "dann"],
    &["then"],
    &["luego"],
    &["puis"],
    &["dann"],
    &[";"],
];

/// Normalize `input` for `language`.
pub fn normalize(input: &str, language: Language) -> Normalized {
    let collapsed = space_semicolons(input);
    let original = collapsed
        .trim_end_matches(['.', '!', '?', ';', ' '])
        .to_string();
    let lowered = original.to_lowercase();
    let text = expand_abbreviations(&lowered, abbreviations(language));

    Normalized {
        text,
        original: original.replace(" ; ", "; "),
    }
}

/// Collapse whitespace and set clause-separating semicolons apart as
/// tokens.  Semicolons inside a URL (`/a;b=1`) belong to the URL; only
/// trailing ones separate clauses.
fn space_semicolons(input: &str) -> String {
    let spaced = input
        .split_whitespace()
        .map(|token| {
            if !is_url_token(token) {
                return token.replace(';', " ; ");
            }
            let url = token.trim_end_matches(';');
            if url.len() == token.len() {
                url.to_string()
            } else {
                format!("{url} ;")
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_url_token(token: &str) -> bool {
    token.contains("://") || token.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("www."))
}

fn expand_abbreviations(text: &str, table: &[Abbreviation]) -> String {
    let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
    let mut out: Vec<&str> = Vec::with_capacity(tokens.len() + 2);

    for (i, token) in tokens.iter().enumerate() {
        let Some(rule) = table.iter().find(|r| r.word == *token) else {
            out.push(*token);
            continue;
        };

        out.extend(rule.replacement.split(' '));
        if rule.tail.is_empty() {
            continue;
        }
        let tail: Vec<&str> = rule.tail.split(' ').collect();
        if !tokens[i + 1..].starts_with(&tail) {
            out.extend(tail);
        }
    }

    out.join(" ")
}

fn split_clauses(text: &str) -> Vec<String> {
    let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
    let mut clauses = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if let Some(sep) = CLAUSE_SEPARATORS
            .iter()
            .find(|sep| tokens[i..].starts_with(sep))
        {
            flush_clause(&mut current, &mut clauses);
            i += sep.len();
            continue;
        }
        current.push(tokens[i]);
        i += 1;
    }
    flush_clause(&mut current, &mut clauses);

    clauses
}

fn flush_clause(current: &mut Vec<&str>, clauses: &mut Vec<String>) {
    let clause = current.join(" ");
    let clause = clause.trim_end_matches([',', '.']).trim();
    if !clause.is_empty() {
        clauses.push(clause.to_string());
    }
    current.clear();
}

fn recover_case(original: &str, fragment: &str) -> String {
    let lowered = original.to_lowercase();
    // Byte offsets only line up when lower-casing preserved lengths.
    if !fragment.is_empty()
        && lowered.len() == original.len()
        && let Some(pos) = lowered.find(fragment)
        && let Some(slice) = original.get(pos..pos + fragment.len())
        && slice.to_lowercase() == fragment
    {
        return slice.to_string();
    }
    fragment.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_collapses() {
        let n = normalize("  Go   to\tExample.com!  ", Language::En);
        assert_eq!(n.text, "go to example.com");
        assert_eq!(n.original, "Go to Example.com");
    }

    #[test]
    fn expands_abbreviations_once() {
        assert_eq!(normalize("click login", Language::En).text, "click on login");
        assert_eq!(normalize("click on login", Language::En).text, "click on login");
        assert_eq!(normalize("goto example.com", Language::En).text, "go to example.com");
        assert_eq!(normalize("pls click btn", Language::En).text, "please click on button");
    }

    #[test]
    fn expansion_table_is_per_language() {
        assert_eq!(normalize("pulsa aceptar", Language::Es).text, "haz clic en aceptar");
        assert_eq!(normalize("click login", Language::Es).text, "click login");
        assert_eq!(normalize("klick auf ok", Language::De).text, "klicke auf ok");
    }

    #[test]
    fn splits_on_sequencing_words() {
        let n = normalize(
            "open example.com, then click login and then wait 2 seconds; take a screenshot",
            Language::En,
        );
        assert_eq!(
            n.clauses(),
            vec![
                "open example.com",
                "click on login",
                "wait 2 seconds",
                "take a screenshot"
            ]
        );
    }

    #[test]
    fn semicolons_inside_urls_do_not_split() {
        let n = normalize("open https://x.com/a;b=1 then click submit", Language::En);
        assert_eq!(n.clauses(), vec!["open https://x.com/a;b=1", "click on submit"]);
        assert_eq!(n.original, "open https://x.com/a;b=1 then click submit");

        let n = normalize("go to www.x.com/p;q=2; take a screenshot", Language::En);
        assert_eq!(n.clauses(), vec!["go to www.x.com/p;q=2", "take a screenshot"]);
    }

    #[test]
    fn single_clause_is_unchanged() {
        let n = normalize("scroll down", Language::En);
        assert_eq!(n.clauses(), vec!["scroll down"]);
    }

    #[test]
    fn recovers_original_case() {
        let n = normalize("type Hello World into the search box", Language::En);
        assert_eq!(n.recover_case("hello world"), "Hello World");
        assert_eq!(n.recover_case("not present"), "not present");
    }

    #[test]
    fn recovers_url_case() {
        let n = normalize("go to https://Example.com/Docs", Language::En);
        assert_eq!(n.recover_case("https://example.com/docs"), "https://Example.com/Docs");
    }
}
