//! Canonical persona tags.
//!
//! Free-form persona text is canonicalized once at the boundary; SLA budgets,
//! auto-retry budgets, duty status, and rate-limit tiers all key off the
//! resulting [`Persona`].

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Enumerates supported `Persona` values.
pub enum Persona {
    Operator,
    OnCall,
    IncidentCommander,
    AutomationAuditor,
    Custom(String),
}

impl Persona {
    /// Canonicalizes persona text; returns `None` for blank input.
    ///
    /// Matching ignores case, spaces, and underscores. Unknown personas are
    /// title-cased and passed through as [`Persona::Custom`].
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let key = trimmed
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        let persona = match key.as_str() {
            "operator" => Self::Operator,
            "oncall" => Self::OnCall,
            "incidentcommander" => Self::IncidentCommander,
            "automationauditor" => Self::AutomationAuditor,
            _ => Self::Custom(title_case(trimmed)),
        };
        Some(persona)
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Operator => "Operator",
            Self::OnCall => "OnCall",
            Self::IncidentCommander => "IncidentCommander",
            Self::AutomationAuditor => "AutomationAuditor",
            Self::Custom(tag) => tag.as_str(),
        }
    }

    pub fn duty_status(&self) -> &'static str {
        match self {
            Self::Operator => "primary",
            Self::OnCall => "secondary",
            Self::IncidentCommander => "sev1",
            Self::AutomationAuditor => "audit",
            Self::Custom(_) => "primary",
        }
    }

    /// Returns true for the persona class that gets the larger rate window.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::IncidentCommander)
    }

    pub fn canonical_tags() -> [&'static str; 4] {
        [
            "Operator",
            "OnCall",
            "IncidentCommander",
            "AutomationAuditor",
        ]
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for Persona {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// Upper-cases the first letter of every alphabetic run, lower-cases the rest.
pub(crate) fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut previous_is_alpha = false;
    for ch in raw.chars() {
        if ch.is_alphabetic() {
            if previous_is_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_is_alpha = true;
        } else {
            out.push(ch);
            previous_is_alpha = false;
        }
    }
    out
}
