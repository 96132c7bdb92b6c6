//! Derived command metadata: complexity, required capabilities, risk.

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandAction};

/// How involved a command is, by populated parameters and options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// A browser capability a command needs from the execution surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Navigation,
    DomAccess,
    FormInteraction,
    TabManagement,
    Capture,
    Timing,
}

/// Coarse risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Metadata attached to every parsed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAnnotations {
    pub complexity: Complexity,
    pub capabilities: Vec<Capability>,
    pub risk: RiskLevel,
}

/// Words that suggest a field or value carries a secret.
const SECRET_MARKERS: &[&str] = &[
    "password", "passwd", "passcode", "secret", "token", "api key", "apikey", "credit card",
    "card number", "cvv", "cvc", "ssn", "pin",
];

/// Derive annotations for `command`.
pub fn annotate(command: &Command) -> CommandAnnotations {
    let mut capabilities = Vec::new();
    collect_capabilities(command, &mut capabilities);
    capabilities.sort();
    capabilities.dedup();

    CommandAnnotations {
        complexity: complexity(command),
        capabilities,
        risk: risk(command),
    }
}

fn complexity(command: &Command) -> Complexity {
    if let CommandAction::Workflow { steps, .. } = &command.action {
        return match steps.len() {
            0 | 1 => Complexity::Simple,
            2 | 3 => Complexity::Moderate,
            _ => Complexity::Complex,
        };
    }

    let options = usize::from(command.timeout_ms.is_some())
        + usize::from(command.skip_on_failure)
        + usize::from(command.precondition.is_some())
        + usize::from(!command.tab.is_active());

    match command.action.parameter_count() + options {
        0 | 1 => Complexity::Simple,
        2 | 3 => Complexity::Moderate,
        _ => Complexity::Complex,
    }
}

fn collect_capabilities(command: &Command, out: &mut Vec<Capability>) {
    use Capability::*;

    if !command.tab.is_active() {
        out.push(TabManagement);
    }

    match &command.action {
        CommandAction::Navigate { .. } => out.push(Navigation),
        CommandAction::Click { .. }
        | CommandAction::Scroll { .. }
        | CommandAction::ExtractText { .. } => out.push(DomAccess),
        CommandAction::Fill { .. } | CommandAction::Type { .. } => {
            out.extend([DomAccess, FormInteraction]);
        }
        CommandAction::Wait { .. } => out.push(Timing),
        CommandAction::WaitForElement { .. } => out.extend([DomAccess, Timing]),
        CommandAction::Screenshot { .. } => out.push(Capture),
        CommandAction::CreateTab { url } => {
            out.push(TabManagement);
            if url.is_some() {
                out.push(Navigation);
            }
        }
        CommandAction::CloseTab | CommandAction::SwitchTab { .. } => out.push(TabManagement),
        CommandAction::Workflow { steps, .. } => {
            for step in steps {
                collect_capabilities(step, out);
            }
        }
    }
}

fn risk(command: &Command) -> RiskLevel {
    match &command.action {
        CommandAction::Fill { selector, value } => {
            if mentions_secret(selector) || mentions_secret(value) {
                RiskLevel::High
            } else {
                RiskLevel::Low
            }
        }
        CommandAction::Type { text, selector } => {
            if mentions_secret(text) || selector.as_deref().is_some_and(mentions_secret) {
                RiskLevel::High
            } else {
                RiskLevel::Low
            }
        }
        CommandAction::Navigate { url } => url_risk(url),
        CommandAction::CreateTab { url: Some(url) } => url_risk(url),
        CommandAction::Workflow { steps, .. } => {
            steps.iter().map(risk).max().unwrap_or(RiskLevel::Low)
        }
        _ => RiskLevel::Low,
    }
}

fn url_risk(url: &str) -> RiskLevel {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") {
        if SECRET_MARKERS
            .iter()
            .any(|m| lower.contains(&m.replace(' ', "")))
        {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        }
    } else {
        RiskLevel::Low
    }
}

fn mentions_secret(text: &str) -> bool {
    let lower = text.to_lowercase();
    SECRET_MARKERS.iter().any(|marker| {
        // Short markers only count as whole words ("pin", not "shipping").
        if marker.len() <= 4 {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *marker)
        } else {
            lower.contains(marker)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Precondition, TabTarget};

    fn cmd(action: CommandAction) -> Command {
        Command::new(action)
    }

    #[test]
    fn navigate_is_simple_low_risk_navigation() {
        let a = annotate(&cmd(CommandAction::Navigate {
            url: "https://example.com".into(),
        }));
        assert_eq!(a.complexity, Complexity::Simple);
        assert_eq!(a.capabilities, vec![Capability::Navigation]);
        assert_eq!(a.risk, RiskLevel::Low);
    }

    #[test]
    fn plain_http_is_medium_risk() {
        let a = annotate(&cmd(CommandAction::Navigate {
            url: "http://example.com".into(),
        }));
        assert_eq!(a.risk, RiskLevel::Medium);
    }

    #[test]
    fn password_fill_is_high_risk_form_interaction() {
        let a = annotate(&cmd(CommandAction::Fill {
            selector: "#password".into(),
            value: "hunter2".into(),
        }));
        assert_eq!(a.risk, RiskLevel::High);
        assert_eq!(
            a.capabilities,
            vec![Capability::DomAccess, Capability::FormInteraction]
        );
        assert_eq!(a.complexity, Complexity::Moderate);
    }

    #[test]
    fn short_markers_match_whole_words_only() {
        assert!(!mentions_secret("shipping address"));
        assert!(mentions_secret("enter your PIN"));
    }

    #[test]
    fn options_raise_complexity() {
        let c = cmd(CommandAction::Fill {
            selector: "#q".into(),
            value: "rust".into(),
        })
        .with_timeout_ms(500)
        .with_precondition(Precondition::Always)
        .on_tab(TabTarget::Index(1));
        let a = annotate(&c);
        assert_eq!(a.complexity, Complexity::Complex);
        assert!(a.capabilities.contains(&Capability::TabManagement));
    }

    #[test]
    fn workflow_aggregates_steps() {
        let wf = cmd(CommandAction::Workflow {
            name: "login".into(),
            steps: vec![
                cmd(CommandAction::Navigate {
                    url: "http://intranet.local".into(),
                }),
                cmd(CommandAction::Screenshot { full_page: true }),
            ],
        });
        let a = annotate(&wf);
        assert_eq!(a.complexity, Complexity::Moderate);
        assert_eq!(a.capabilities, vec![Capability::Navigation, Capability::Capture]);
        assert_eq!(a.risk, RiskLevel::Medium);
    }
}
