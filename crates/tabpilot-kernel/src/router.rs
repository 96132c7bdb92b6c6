//! Two-level phrase matcher.
//!
//! The router finds every registered route that matches a piece of
//! instruction text using a tiered strategy:
//!
//! | Level | Technique | Typical Latency |
//! |-------|-----------|-----------------|
//! | 1 | Exact phrase via [`aho_corasick`] (SIMD-accelerated) | < 0.01 ms |
//! | 2 | Pattern via compiled [`regex`] with named captures | < 0.1 ms |
//!
//! Unlike a first-match dispatcher, [`IntentRouter::matches`] returns *all*
//! matches together with the byte span each one covered.  Scoring is left to
//! the caller: the intent parser weighs each match by how much of the input
//! it explains.
//!
//! # Example
//!
//! ```rust
//! # use tabpilot_kernel::router::{IntentRouter, MatchLevel};
//! let mut router = IntentRouter::new();
//!
//! router.add_exact("take a screenshot", "screenshot").unwrap();
//! router.add_pattern(r"^go to (?P<url>\S+)$", "navigate").unwrap();
//!
//! let found = router.matches("go to example.com");
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].level, MatchLevel::Pattern);
//! assert_eq!(found[0].captures["url"], "example.com");
//! ```

use std::collections::HashMap;

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which matching tier produced a [`RouteMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    /// Level 1: an exact registered phrase occurred in the text.
    Exact,
    /// Level 2: a regex route matched.
    Pattern,
}

/// A single route that matched the input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMatch {
    /// The handler identifier associated with the route.
    pub handler: String,
    /// The tier that produced the match.
    pub level: MatchLevel,
    /// Byte offset where the match starts in the lowered input.
    pub start: usize,
    /// Byte offset where the match ends in the lowered input.
    pub end: usize,
    /// Named captures (empty for exact matches).
    pub captures: HashMap<String, String>,
}

impl RouteMatch {
    /// Length of the matched span in bytes.
    pub fn span_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Fraction of `text_len` covered by this match, clamped to `[0, 1]`.
    pub fn coverage(&self, text_len: usize) -> f64 {
        if text_len == 0 {
            return 0.0;
        }
        (self.span_len() as f64 / text_len as f64).clamp(0.0, 1.0)
    }
}

/// A regex-based route with named captures.
#[derive(Debug, Clone)]
pub struct PatternRoute {
    /// Human-readable description of what this pattern matches.
    pub description: Option<String>,
    /// The handler identifier to report on match.
    pub handler: String,
    /// The compiled regex (stored alongside the raw pattern for diagnostics).
    compiled: Regex,
    /// The original pattern string.
    pub pattern: String,
}

// ---------------------------------------------------------------------------
// IntentRouter
// ---------------------------------------------------------------------------

/// Tiered matcher that resolves instruction text to handler identifiers.
///
/// The router is **not** `Clone` because it holds compiled automata that are
/// expensive to duplicate.  Wrap in `Arc` if shared access is needed.
///
/// The exact-phrase automaton is rebuilt eagerly whenever a phrase is added,
/// so matching only needs `&self`.
pub struct IntentRouter {
    /// Exact phrases and their handler identifiers (lowercased keys).
    exact_phrases: Vec<(String, String)>,

    /// The compiled Aho-Corasick automaton.
    automaton: Option<AhoCorasick>,

    /// Regex-based pattern routes, evaluated in registration order.
    patterns: Vec<PatternRoute>,
}

impl IntentRouter {
    /// Create an empty router with no routes registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            exact_phrases: Vec::new(),
            automaton: None,
            patterns: Vec::new(),
        }
    }

    /// Register an exact phrase that maps to a handler.
    ///
    /// Matching is case-insensitive and only accepted at word boundaries.
    pub fn add_exact(
        &mut self,
        phrase: impl Into<String>,
        handler: impl Into<String>,
    ) -> Result<()> {
        let phrase = phrase.into().to_lowercase();
        let handler = handler.into();
        tracing::debug!(phrase = %phrase, handler = %handler, "exact route added");
        self.exact_phrases.push((phrase, handler));
        self.rebuild_automaton()
    }

    /// Register a regex pattern route.
    ///
    /// The pattern may contain named captures (e.g. `(?P<name>...)`) which
    /// will be extracted and returned in [`RouteMatch::captures`].
    ///
    /// Returns an error if the regex fails to compile.
    pub fn add_pattern(
        &mut self,
        pattern: impl Into<String>,
        handler: impl Into<String>,
    ) -> Result<()> {
        self.add_pattern_with_description(pattern, handler, None)
    }

    /// Register a regex pattern route with an optional description.
    pub fn add_pattern_with_description(
        &mut self,
        pattern: impl Into<String>,
        handler: impl Into<String>,
        description: Option<String>,
    ) -> Result<()> {
        let pattern = pattern.into();
        let handler = handler.into();

        let compiled = Regex::new(&pattern).map_err(|e| KernelError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            pattern = %pattern,
            handler = %handler,
            "pattern route added"
        );

        self.patterns.push(PatternRoute {
            description,
            handler,
            compiled,
            pattern,
        });

        Ok(())
    }

    /// Find every route that matches `text`.
    ///
    /// The text is lowercased before matching; spans refer to the lowered
    /// string.  Exact matches are reported first (longest phrase first),
    /// followed by pattern matches in registration order.
    pub fn matches(&self, text: &str) -> Vec<RouteMatch> {
        let lowered = text.to_lowercase();
        let mut found = self.exact_matches(&lowered);
        found.extend(self.pattern_matches(&lowered));

        tracing::trace!(text = %text, matches = found.len(), "router matched");
        found
    }

    /// Return the number of registered exact phrases.
    pub fn exact_count(&self) -> usize {
        self.exact_phrases.len()
    }

    /// Return the number of registered pattern routes.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Iterate over the registered pattern routes.
    pub fn pattern_routes(&self) -> impl Iterator<Item = &PatternRoute> {
        self.patterns.iter()
    }

    // -- Private helpers ----------------------------------------------------

    /// Rebuild the Aho-Corasick automaton from the registered phrases.
    fn rebuild_automaton(&mut self) -> Result<()> {
        if self.exact_phrases.is_empty() {
            self.automaton = None;
            return Ok(());
        }

        let phrases: Vec<&str> = self.exact_phrases.iter().map(|(p, _)| p.as_str()).collect();

        let ac = AhoCorasick::new(&phrases).map_err(|e| KernelError::RouterBuildError {
            reason: e.to_string(),
        })?;
        tracing::trace!(count = phrases.len(), "aho-corasick automaton rebuilt");
        self.automaton = Some(ac);
        Ok(())
    }

    /// Collect exact phrase matches, one per phrase, longest first.
    fn exact_matches(&self, lowered: &str) -> Vec<RouteMatch> {
        let Some(ac) = self.automaton.as_ref() else {
            return Vec::new();
        };

        // Overlapping iteration so that "open new tab" reports both a
        // registered "new tab" and a longer "open new tab".
        let mut best: HashMap<usize, (usize, usize)> = HashMap::new();
        for mat in ac.find_overlapping_iter(lowered) {
            if !at_word_boundary(lowered, mat.start(), mat.end()) {
                continue;
            }
            best.entry(mat.pattern().as_usize())
                .or_insert((mat.start(), mat.end()));
        }

        let mut found: Vec<RouteMatch> = best
            .into_iter()
            .map(|(idx, (start, end))| RouteMatch {
                handler: self.exact_phrases[idx].1.clone(),
                level: MatchLevel::Exact,
                start,
                end,
                captures: HashMap::new(),
            })
            .collect();
        found.sort_by(|a, b| b.span_len().cmp(&a.span_len()));
        found
    }

    /// Collect the first match of every registered regex route.
    fn pattern_matches(&self, lowered: &str) -> Vec<RouteMatch> {
        let mut found = Vec::new();
        for route in &self.patterns {
            let Some(caps) = route.compiled.captures(lowered) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };

            let mut captures = HashMap::new();
            for name in route.compiled.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    captures.insert(name.to_string(), m.as_str().to_string());
                }
            }

            found.push(RouteMatch {
                handler: route.handler.clone(),
                level: MatchLevel::Pattern,
                start: whole.start(),
                end: whole.end(),
                captures,
            });
        }
        found
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `text[start..end]` is delimited by non-alphanumeric characters.
fn at_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
