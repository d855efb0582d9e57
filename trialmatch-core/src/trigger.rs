//! Detection of replies that should pause the interview for the contact form.

use regex::Regex;

use crate::extract::sanitize_for_display;

/// What a rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleInput {
    Raw,
    Sanitized,
}

#[derive(Debug, Clone)]
enum RuleKind {
    /// Exact substring of the reply.
    Contains(String),
    /// Every pattern must match somewhere in the reply.
    AllOf(Vec<Regex>),
}

#[derive(Debug, Clone)]
struct TriggerRule {
    name: &'static str,
    input: RuleInput,
    kind: RuleKind,
}

impl TriggerRule {
    fn matches(&self, raw: &str, sanitized: &str) -> bool {
        let text = match self.input {
            RuleInput::Raw => raw,
            RuleInput::Sanitized => sanitized,
        };
        match &self.kind {
            RuleKind::Contains(needle) => !needle.is_empty() && text.contains(needle.as_str()),
            RuleKind::AllOf(patterns) => patterns.iter().all(|re| re.is_match(text)),
        }
    }
}

/// Ordered list of contact-trigger rules; the first match wins.
///
/// The sentinel rule looks at the raw reply. The word heuristics look at the
/// sanitized text so payload keys such as `"email"` and `"phone"` cannot fire
/// them.
#[derive(Debug, Clone)]
pub struct ContactTrigger {
    token: String,
    rules: Vec<TriggerRule>,
}

impl ContactTrigger {
    pub fn new(contact_token: impl Into<String>) -> Self {
        let token: String = contact_token.into();
        let mut rules = vec![TriggerRule {
            name: "sentinel",
            input: RuleInput::Raw,
            kind: RuleKind::Contains(token.clone()),
        }];

        let heuristics: [(&'static str, &[&str]); 2] = [
            ("email_and_phone", &[r"(?i)\b(email|e-mail)\b", r"(?i)\b(phone|number)\b"]),
            ("consent_and_contact", &[r"(?i)\bconsent\b", r"(?i)\bcontact(ed)?\b"]),
        ];
        for (name, patterns) in heuristics {
            let compiled: Vec<Regex> = patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
            if compiled.len() == patterns.len() {
                rules.push(TriggerRule {
                    name,
                    input: RuleInput::Sanitized,
                    kind: RuleKind::AllOf(compiled),
                });
            }
        }

        Self { token, rules }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Name of the first rule that fires, if any.
    pub fn matched_rule(&self, reply: &str) -> Option<&'static str> {
        let sanitized = sanitize_for_display(reply, &self.token);
        self.rules
            .iter()
            .find(|rule| rule.matches(reply, &sanitized))
            .map(|rule| rule.name)
    }

    pub fn should_collect_contact(&self, reply: &str) -> bool {
        self.matched_rule(reply).is_some()
    }
}
