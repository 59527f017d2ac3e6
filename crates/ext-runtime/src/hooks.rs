//! Hook and capability vocabularies.
//!
//! Hooks are the points where an extension participates in host behavior;
//! capabilities are the named contributions it exposes. Both are closed
//! enumerations; manifest strings that match nothing are logged at
//! registration and otherwise ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point where an extension can participate in host behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    /// Document-processing pipeline hooks.
    DocumentProcessing,
    /// Chat subsystem hooks.
    Chat,
    /// UI layer hooks.
    Ui,
    /// Slack platform integration hooks.
    Slack,
    /// GitHub platform integration hooks.
    Github,
}

impl HookKind {
    /// All hook kinds.
    pub fn all() -> &'static [HookKind] {
        &[
            HookKind::DocumentProcessing,
            HookKind::Chat,
            HookKind::Ui,
            HookKind::Slack,
            HookKind::Github,
        ]
    }

    /// Parse a hook kind from a manifest string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document-processing" => Some(Self::DocumentProcessing),
            "chat" => Some(Self::Chat),
            "ui" => Some(Self::Ui),
            "slack" => Some(Self::Slack),
            "github" => Some(Self::Github),
            _ => None,
        }
    }

    /// The manifest name of this hook kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document-processing",
            Self::Chat => "chat",
            Self::Ui => "ui",
            Self::Slack => "slack",
            Self::Github => "github",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a named contribution an extension provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    /// A document processor (extractors, converters).
    DocumentProcessor,
    /// A tool callable from chat.
    ChatTool,
    /// A contributed UI component.
    UiComponent,
    /// A data model definition.
    DataModel,
    /// A Slack integration payload.
    SlackIntegration,
    /// A GitHub integration payload.
    GithubIntegration,
}

impl CapabilityKind {
    /// All capability kinds.
    pub fn all() -> &'static [CapabilityKind] {
        &[
            CapabilityKind::DocumentProcessor,
            CapabilityKind::ChatTool,
            CapabilityKind::UiComponent,
            CapabilityKind::DataModel,
            CapabilityKind::SlackIntegration,
            CapabilityKind::GithubIntegration,
        ]
    }

    /// The canonical name of this capability kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessor => "document-processor",
            Self::ChatTool => "chat-tool",
            Self::UiComponent => "ui-component",
            Self::DataModel => "data-model",
            Self::SlackIntegration => "slack-integration",
            Self::GithubIntegration => "github-integration",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named contribution with an opaque payload.
///
/// The runtime stores payloads without interpreting them; collaborating
/// subsystems (document pipeline, chat, UI) give them meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub name: String,
    pub payload: serde_json::Value,
}

impl Capability {
    pub fn new(kind: CapabilityKind, name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hook_parse_round_trips() {
        for kind in HookKind::all() {
            assert_eq!(HookKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(HookKind::parse("unknown-hook"), None);
    }

    #[test]
    fn test_capability_serde() {
        let cap = Capability::new(
            CapabilityKind::ChatTool,
            "summarize",
            serde_json::json!({"max_tokens": 256}),
        );
        let json = serde_json::to_string(&cap).unwrap();
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(cap, back);
    }
}
