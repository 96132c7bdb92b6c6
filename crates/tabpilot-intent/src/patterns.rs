//! The declarative pattern catalog.
//!
//! Each entry pairs a matcher (regex or exact phrases, compiled into the
//! kernel [`IntentRouter`]) with an intent, a base confidence and the entity
//! kinds it needs.  A match is scored as
//!
//! ```text
//! base × (0.5 + 0.5 × coverage) × (0.7 if a required entity is missing)
//!      × (0.8 for navigation when a page is already open)
//! ```
//!
//! where coverage is the share of the clause the match spans.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tabpilot_kernel::{IntentRouter, RouteMatch};
use url::Url;

use crate::command::{Command, CommandAction, ScrollDirection, TabTarget};
use crate::error::Result;
use crate::normalize::Normalized;

/// Multiplier applied when a required entity is missing.
const MISSING_ENTITY_FACTOR: f64 = 0.7;

/// Multiplier applied to navigation when the context already has a page.
const EXISTING_PAGE_FACTOR: f64 = 0.8;

/// Targets too vague to act on.
const VAGUE_REFERENCES: &[&str] = &[
    "it", "that", "this", "thing", "that thing", "this thing", "something", "stuff", "there",
    "here", "one", "that one", "this one",
];

// ---------------------------------------------------------------------------
// Catalog definition
// ---------------------------------------------------------------------------

/// The command an entry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    Navigate,
    Click,
    Fill,
    Type,
    Scroll,
    Wait,
    WaitForElement,
    ExtractText,
    Screenshot,
    CreateTab,
    CloseTab,
    SwitchTab,
}

/// Kinds of entities a pattern can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Url,
    Text,
    Number,
    Direction,
}

enum Matcher {
    Regex(&'static str),
    Exact(&'static [&'static str]),
}

struct PatternDef {
    id: &'static str,
    intent: IntentKind,
    matcher: Matcher,
    base_confidence: f64,
    required: &'static [EntityKind],
    /// Captures implied by an exact phrase.
    preset: &'static [(&'static str, &'static str)],
}

const fn regex(
    id: &'static str,
    intent: IntentKind,
    pattern: &'static str,
    base_confidence: f64,
    required: &'static [EntityKind],
) -> PatternDef {
    PatternDef {
        id,
        intent,
        matcher: Matcher::Regex(pattern),
        base_confidence,
        required,
        preset: &[],
    }
}

const fn exact(
    id: &'static str,
    intent: IntentKind,
    phrases: &'static [&'static str],
    base_confidence: f64,
    preset: &'static [(&'static str, &'static str)],
) -> PatternDef {
    PatternDef {
        id,
        intent,
        matcher: Matcher::Exact(phrases),
        base_confidence,
        required: &[],
        preset,
    }
}

use EntityKind as E;
use IntentKind as I;

const CATALOG: &[PatternDef] = &[
    regex(
        "navigate",
        I::Navigate,
        r"\b(?:go to|navigate to|open|visit|browse to|load|head to|ir a|abre|visita|aller sur|aller à|ouvre|ouvrir|gehe zu|öffne|besuche)(?:\s+(?:the\s+)?(?:page\s+|site\s+|url\s+)?(?P<url>\S+))?",
        0.95,
        &[E::Url],
    ),
    regex(
        "click",
        I::Click,
        r"\b(?:click on|tap on|double click on|press|haz clic en|cliquez sur|clique sur|klicke auf)(?:\s+(?P<target>.+))?",
        0.9,
        &[E::Text],
    ),
    regex(
        "fill_with",
        I::Fill,
        r"\b(?:fill in|fill|enter|input|set)\s+(?P<target>.+?)\s+(?:with|to|as)\s+(?P<value>.+)",
        0.9,
        &[E::Text, E::Text],
    ),
    regex(
        "type_into",
        I::Fill,
        r"\b(?:type|enter|write|input)\s+(?P<value>.+?)\s+(?:into|in)\s+(?P<target>.+)",
        0.9,
        &[E::Text, E::Text],
    ),
    regex("type", I::Type, r"\btype(?:\s+(?P<text>.+))?", 0.85, &[E::Text]),
    regex(
        "scroll",
        I::Scroll,
        r"\b(?:scroll|desplázate|desplaza|défile|defile|scrolle)(?:\s+(?:to the|to|hacia|vers le|vers la|nach))?(?:\s+(?P<direction>up|down|left|right|top|bottom|abajo|arriba|bas|haut|unten|oben))?(?:\s+(?:by\s+)?(?P<amount>\d+)(?:\s*(?:px|pixels))?)?",
        0.9,
        &[E::Direction],
    ),
    regex(
        "wait_for_element",
        I::WaitForElement,
        r"\bwait\s+(?:for|until)\s+(?:the\s+)?(?P<target>.+?)\s+(?:to appear|to load|to be visible|to show up|appears|is visible|loads|shows up)",
        0.92,
        &[E::Text],
    ),
    regex(
        "wait_for_named_element",
        I::WaitForElement,
        r"\bwait\s+for\s+(?:the\s+)?element\s+(?P<target>.+)",
        0.92,
        &[E::Text],
    ),
    regex(
        "wait",
        I::Wait,
        r"\b(?:wait|espera|attends|attendez|warte)(?:\s+(?:for\s+)?(?P<amount>\d+(?:\.\d+)?)\s*(?P<unit>ms|milliseconds?|seconds?|secs?|s|segundos?|secondes?|sekunden|sekunde|minutes?|mins?|minutos?|minuten)?\b)?",
        0.9,
        &[E::Number],
    ),
    regex(
        "extract_text",
        I::ExtractText,
        r"\b(?:extract|get|read|copy|grab|scrape)\s+(?:all\s+)?(?:the\s+)?(?:text|content|contents)(?:\s+(?:of|from|in)\s+(?P<target>.+))?",
        0.88,
        &[],
    ),
    regex(
        "screenshot",
        I::Screenshot,
        r"\b(?:(?:take|capture|grab)\s+(?:a\s+)?)?(?P<full>full[- ]page\s+)?(?:screenshot|screen shot|captura de pantalla|capture d'écran|bildschirmfoto)\b",
        0.95,
        &[],
    ),
    regex(
        "create_tab",
        I::CreateTab,
        r"\b(?:open|create)\s+(?:a\s+)?new tab(?:\s+(?:with|at|to|for)\s+(?P<url>\S+))?",
        0.9,
        &[],
    ),
    regex(
        "open_in_new_tab",
        I::CreateTab,
        r"\bopen\s+(?P<url>\S+)\s+in\s+a\s+new\s+tab",
        0.92,
        &[E::Url],
    ),
    exact(
        "new_tab",
        I::CreateTab,
        &["new tab", "nueva pestaña", "nouvel onglet", "neuer tab"],
        0.9,
        &[],
    ),
    regex(
        "close_tab",
        I::CloseTab,
        r"\bclose\s+(?:the\s+|this\s+|current\s+)?tab\b",
        0.92,
        &[],
    ),
    exact(
        "close_tab_phrase",
        I::CloseTab,
        &["cierra la pestaña", "ferme l'onglet", "tab schließen"],
        0.92,
        &[],
    ),
    regex(
        "switch_tab",
        I::SwitchTab,
        r"\b(?:switch|go|move|change)\s+to\s+(?:the\s+)?(?:(?P<direction>next|previous|prev)\s+tab|tab\s+(?:number\s+)?(?P<index>\d+))",
        0.9,
        &[E::Direction],
    ),
    exact("next_tab", I::SwitchTab, &["next tab"], 0.85, &[("direction", "next")]),
    exact(
        "previous_tab",
        I::SwitchTab,
        &["previous tab"],
        0.85,
        &[("direction", "previous")],
    ),
];

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

/// One scored catalog match for a clause.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern_id: &'static str,
    pub intent: IntentKind,
    pub confidence: f64,
    pub coverage: f64,
    /// Whether a required entity was absent, invalid or vague.
    pub missing_entity: bool,
    /// The command, when every required entity was extracted.
    pub command: Option<Command>,
}

/// Compiled pattern catalog.
pub struct PatternCatalog {
    router: IntentRouter,
    defs: HashMap<&'static str, &'static PatternDef>,
}

impl PatternCatalog {
    /// Compile the built-in catalog.
    pub fn new() -> Result<Self> {
        let mut router = IntentRouter::new();
        let mut defs = HashMap::new();

        for def in CATALOG {
            match &def.matcher {
                Matcher::Regex(pattern) => router.add_pattern_with_description(
                    *pattern,
                    def.id,
                    Some(format!("{:?}", def.intent)),
                )?,
                Matcher::Exact(phrases) => {
                    for phrase in *phrases {
                        router.add_exact(*phrase, def.id)?;
                    }
                }
            }
            defs.insert(def.id, def);
        }

        tracing::debug!(
            patterns = router.pattern_count(),
            phrases = router.exact_count(),
            "pattern catalog compiled"
        );

        Ok(Self { router, defs })
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Score every catalog entry that matches `clause`, best first.
    ///
    /// `clause` must come from `normalized`; it is used to recover the
    /// original spelling of URLs and typed values.
    pub fn evaluate(
        &self,
        clause: &str,
        normalized: &Normalized,
        has_current_page: bool,
    ) -> Vec<PatternMatch> {
        let clause_len = clause.len();
        let mut scored: Vec<PatternMatch> = self
            .router
            .matches(clause)
            .into_iter()
            .filter_map(|route| {
                let def = self.defs.get(route.handler.as_str())?;
                Some(score(def, &route, clause_len, normalized, has_current_page))
            })
            .collect();

        // Stable: ties keep router order (exact phrases, then registration).
        scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        scored
    }

    /// The highest-scoring match for `clause`, if any.
    pub fn best_match(
        &self,
        clause: &str,
        normalized: &Normalized,
        has_current_page: bool,
    ) -> Option<PatternMatch> {
        self.evaluate(clause, normalized, has_current_page)
            .into_iter()
            .next()
    }
}

fn score(
    def: &PatternDef,
    route: &RouteMatch,
    clause_len: usize,
    normalized: &Normalized,
    has_current_page: bool,
) -> PatternMatch {
    let mut captures: HashMap<&str, &str> = route
        .captures
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    for (k, v) in def.preset {
        captures.entry(*k).or_insert(*v);
    }

    let action = build_action(def.intent, &captures, normalized);
    let missing_entity = action.is_none() && !def.required.is_empty();
    let coverage = route.coverage(clause_len);

    let mut confidence = def.base_confidence * (0.5 + 0.5 * coverage);
    if missing_entity {
        confidence *= MISSING_ENTITY_FACTOR;
    }
    if def.intent == IntentKind::Navigate && has_current_page {
        confidence *= EXISTING_PAGE_FACTOR;
    }

    PatternMatch {
        pattern_id: def.id,
        intent: def.intent,
        confidence: confidence.clamp(f64::MIN_POSITIVE, 1.0),
        coverage,
        missing_entity,
        command: action.map(Command::new),
    }
}

// ---------------------------------------------------------------------------
// Per-intent constructors
// ---------------------------------------------------------------------------

fn build_action(
    intent: IntentKind,
    captures: &HashMap<&str, &str>,
    normalized: &Normalized,
) -> Option<CommandAction> {
    let get = |name: &str| captures.get(name).copied();
    let text = |name: &str| get(name).and_then(|raw| clean_text(raw, normalized));
    let target = |name: &str| get(name).and_then(|raw| clean_target(raw, normalized));
    let url = |name: &str| get(name).and_then(|raw| resolve_url(raw, normalized));

    match intent {
        IntentKind::Navigate => Some(CommandAction::Navigate { url: url("url")? }),
        IntentKind::Click => Some(CommandAction::Click {
            selector: target("target")?,
        }),
        IntentKind::Fill => Some(CommandAction::Fill {
            selector: target("target")?,
            value: text("value")?,
        }),
        IntentKind::Type => Some(CommandAction::Type {
            text: text("text")?,
            selector: None,
        }),
        IntentKind::Scroll => Some(CommandAction::Scroll {
            direction: get("direction").and_then(parse_direction)?,
            amount: get("amount").and_then(|a| a.parse().ok()),
        }),
        IntentKind::Wait => Some(CommandAction::Wait {
            duration_ms: parse_duration_ms(get("amount")?, get("unit"))?,
        }),
        IntentKind::WaitForElement => Some(CommandAction::WaitForElement {
            selector: target("target")?,
        }),
        IntentKind::ExtractText => Some(CommandAction::ExtractText {
            selector: target("target"),
        }),
        IntentKind::Screenshot => Some(CommandAction::Screenshot {
            full_page: get("full").is_some(),
        }),
        IntentKind::CreateTab => Some(CommandAction::CreateTab { url: url("url") }),
        IntentKind::CloseTab => Some(CommandAction::CloseTab),
        IntentKind::SwitchTab => {
            let to = match (get("direction"), get("index")) {
                (Some("next"), _) => TabTarget::Next,
                (Some("previous" | "prev"), _) => TabTarget::Previous,
                (_, Some(index)) => {
                    let n: u32 = index.parse().ok()?;
                    TabTarget::Index(n.checked_sub(1)?)
                }
                _ => return None,
            };
            Some(CommandAction::SwitchTab { to })
        }
    }
}

/// Trim quotes and stray punctuation, restoring original case.
fn clean_text(raw: &str, normalized: &Normalized) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_end_matches([',', '.'])
        .trim_matches(['"', '\'', '“', '”', '‘', '’'])
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(normalized.recover_case(trimmed))
}

/// Like [`clean_text`], dropping a leading article and rejecting vague
/// references.
fn clean_target(raw: &str, normalized: &Normalized) -> Option<String> {
    let lowered = raw.trim();
    let without_article = ["the ", "a ", "an "]
        .iter()
        .find_map(|article| lowered.strip_prefix(article))
        .unwrap_or(lowered);

    if is_vague(without_article) {
        return None;
    }
    clean_text(without_article, normalized)
}

fn is_vague(target: &str) -> bool {
    let t = target.trim().trim_matches(['"', '\'']);
    t.is_empty() || VAGUE_REFERENCES.contains(&t)
}

/// Validate a URL entity, completing scheme-less hosts with `https://`.
fn resolve_url(raw: &str, normalized: &Normalized) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches(['"', '\'', '<', '>'])
        .trim_end_matches([',', ')', '.']);
    if cleaned.is_empty() {
        return None;
    }
    let original = normalized.recover_case(cleaned);

    let has_scheme = cleaned.contains("://");
    let candidate = if has_scheme {
        original
    } else {
        format!("https://{original}")
    };

    let parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    if !has_scheme && !host.contains('.') && host != "localhost" {
        return None;
    }
    Some(candidate)
}

fn parse_direction(raw: &str) -> Option<ScrollDirection> {
    Some(match raw {
        "up" | "arriba" | "haut" | "oben" => ScrollDirection::Up,
        "down" | "abajo" | "bas" | "unten" => ScrollDirection::Down,
        "left" => ScrollDirection::Left,
        "right" => ScrollDirection::Right,
        "top" => ScrollDirection::Top,
        "bottom" => ScrollDirection::Bottom,
        _ => return None,
    })
}

fn parse_duration_ms(amount: &str, unit: Option<&str>) -> Option<u64> {
    let amount: f64 = amount.parse().ok()?;
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let multiplier = match unit {
        Some(u) if u.starts_with("ms") || u.starts_with("milli") => 1.0,
        Some(u) if u.starts_with("min") => 60_000.0,
        _ => 1_000.0,
    };
    Some((amount * multiplier).round() as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::normalize::normalize;

    fn best(input: &str) -> Option<PatternMatch> {
        best_with_page(input, false)
    }

    fn best_with_page(input: &str, has_page: bool) -> Option<PatternMatch> {
        let catalog = PatternCatalog::new().unwrap();
        let n = normalize(input, Language::En);
        catalog.best_match(&n.text, &n, has_page)
    }

    fn action(input: &str) -> CommandAction {
        best(input).unwrap().command.unwrap().action
    }

    #[test]
    fn catalog_compiles() {
        let catalog = PatternCatalog::new().unwrap();
        assert_eq!(catalog.len(), CATALOG.len());
    }

    #[test]
    fn navigate_with_full_coverage() {
        let m = best("go to https://example.com").unwrap();
        assert_eq!(m.intent, IntentKind::Navigate);
        assert!((m.confidence - 0.95).abs() < 1e-9);
        assert_eq!(
            m.command.unwrap().action,
            CommandAction::Navigate {
                url: "https://example.com".into()
            }
        );
    }

    #[test]
    fn navigate_keeps_url_case_and_adds_scheme() {
        assert_eq!(
            action("Open Example.com/Docs"),
            CommandAction::Navigate {
                url: "https://Example.com/Docs".into()
            }
        );
    }

    #[test]
    fn navigate_is_discounted_when_a_page_is_open() {
        let m = best_with_page("go to https://example.com", true).unwrap();
        assert!((m.confidence - 0.95 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn invalid_url_counts_as_missing() {
        let m = best("open settings").unwrap();
        assert_eq!(m.intent, IntentKind::Navigate);
        assert!(m.missing_entity);
        assert!(m.command.is_none());
        assert!((m.confidence - 0.95 * 0.7).abs() < 1e-9);
    }

    #[test]
    fn vague_click_target_is_missing() {
        let m = best("click the thing").unwrap();
        assert_eq!(m.intent, IntentKind::Click);
        assert!(m.missing_entity);
        assert!(m.confidence < 0.7);
    }

    #[test]
    fn click_strips_article_and_keeps_case() {
        assert_eq!(
            action("click the Sign In button"),
            CommandAction::Click {
                selector: "Sign In button".into()
            }
        );
    }

    #[test]
    fn type_into_becomes_fill() {
        assert_eq!(
            action("type 'Rust Book' into the search box"),
            CommandAction::Fill {
                selector: "search box".into(),
                value: "Rust Book".into()
            }
        );
    }

    #[test]
    fn bare_type_uses_focus() {
        assert_eq!(
            action("type Hello"),
            CommandAction::Type {
                text: "Hello".into(),
                selector: None
            }
        );
    }

    #[test]
    fn scroll_variants() {
        assert_eq!(
            action("scroll down by 300 px"),
            CommandAction::Scroll {
                direction: ScrollDirection::Down,
                amount: Some(300)
            }
        );
        assert_eq!(
            action("scroll to the top"),
            CommandAction::Scroll {
                direction: ScrollDirection::Top,
                amount: None
            }
        );
        assert!(best("scroll").unwrap().missing_entity);
    }

    #[test]
    fn wait_units() {
        assert_eq!(action("wait 2 seconds"), CommandAction::Wait { duration_ms: 2000 });
        assert_eq!(action("wait for 250 ms"), CommandAction::Wait { duration_ms: 250 });
        assert_eq!(action("wait 1.5"), CommandAction::Wait { duration_ms: 1500 });
    }

    #[test]
    fn wait_for_element_beats_plain_wait() {
        assert_eq!(
            action("wait for the results to load"),
            CommandAction::WaitForElement {
                selector: "results".into()
            }
        );
    }

    #[test]
    fn tab_commands() {
        assert_eq!(action("open a new tab"), CommandAction::CreateTab { url: None });
        assert_eq!(
            action("open docs.rs in a new tab"),
            CommandAction::CreateTab {
                url: Some("https://docs.rs".into())
            }
        );
        assert_eq!(action("close this tab"), CommandAction::CloseTab);
        assert_eq!(
            action("switch to tab 3"),
            CommandAction::SwitchTab {
                to: TabTarget::Index(2)
            }
        );
        assert_eq!(
            action("next tab"),
            CommandAction::SwitchTab { to: TabTarget::Next }
        );
    }

    #[test]
    fn screenshot_and_extract() {
        assert_eq!(
            action("take a full page screenshot"),
            CommandAction::Screenshot { full_page: true }
        );
        assert_eq!(
            action("extract the text from the main article"),
            CommandAction::ExtractText {
                selector: Some("main article".into())
            }
        );
        assert_eq!(
            action("get the text"),
            CommandAction::ExtractText { selector: None }
        );
    }

    #[test]
    fn multilingual_verbs() {
        let catalog = PatternCatalog::new().unwrap();
        let n = normalize("pulsa Aceptar", Language::Es);
        let m = catalog.best_match(&n.text, &n, false).unwrap();
        assert_eq!(
            m.command.unwrap().action,
            CommandAction::Click {
                selector: "Aceptar".into()
            }
        );
    }

    #[test]
    fn matched_confidence_is_in_unit_interval() {
        let catalog = PatternCatalog::new().unwrap();
        for input in [
            "go to example.com",
            "please click",
            "scroll",
            "wait",
            "i want to open something maybe",
            "type",
            "close tab now please",
        ] {
            let n = normalize(input, Language::En);
            for m in catalog.evaluate(&n.text, &n, true) {
                assert!(m.confidence > 0.0 && m.confidence <= 1.0, "{input}: {m:?}");
            }
        }
    }

    #[test]
    fn unmatched_text_has_no_match() {
        assert!(best("hello there, how are you").is_none());
    }
}
