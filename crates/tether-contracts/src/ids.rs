// Strong-typed identifiers
//
// Every identifier is its own newtype so a RunId can never be passed where
// a ToolCallId is expected. All of them are caller-visible strings; the
// generate() constructors mint UUID v7 values for callers that do not care.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ContractError;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a caller-chosen identifier
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Mint a fresh time-ordered identifier
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// The underlying string
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Validate that the identifier is non-empty
            pub fn validated(self) -> Result<Self, ContractError> {
                if self.0.trim().is_empty() {
                    Err(ContractError::EmptyIdentifier)
                } else {
                    Ok(self)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a registered agent
    AgentId
);
string_id!(
    /// Identifier of one durable run; stable across retries
    RunId
);
string_id!(
    /// Optional grouping of runs into a session
    SessionId
);
string_id!(
    /// Identifier of one planner turn within a run
    TurnId
);
string_id!(
    /// Identifier of one tool invocation; never reused within a run
    ToolCallId
);

/// Fully-qualified tool name in the `<service>.<toolset>.<tool>` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Parse and validate a tool name
    pub fn parse(value: impl Into<String>) -> Result<Self, ContractError> {
        let value = value.into();
        let parts: Vec<&str> = value.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ContractError::InvalidToolName(value));
        }
        Ok(Self(value))
    }

    /// The full dotted name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment: the owning service
    pub fn service(&self) -> &str {
        self.segment(0)
    }

    /// Second segment: the toolset within the service
    pub fn toolset(&self) -> &str {
        self.segment(1)
    }

    /// Third segment: the tool within the toolset
    pub fn tool(&self) -> &str {
        self.segment(2)
    }

    /// The `<service>.<toolset>` prefix used for executor lookup
    pub fn toolset_prefix(&self) -> String {
        format!("{}.{}", self.service(), self.toolset())
    }

    fn segment(&self, index: usize) -> &str {
        self.0.split('.').nth(index).unwrap_or_default()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ToolName {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Sanitize a tool name for providers with restricted identifier grammars.
///
/// Dots become underscores, any rune outside `[A-Za-z0-9_-]` becomes an
/// underscore, and names longer than `limit` are truncated to `limit - 9`
/// and suffixed with `_` plus the first 8 hex characters of the SHA-256 of
/// the original input. Deterministic for any input.
pub fn provider_name(name: &str, limit: usize) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '.' => '_',
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => c,
            _ => '_',
        })
        .collect();

    if sanitized.len() <= limit {
        return sanitized;
    }

    let digest = Sha256::digest(name.as_bytes());
    let suffix = hex::encode(&digest[..4]);
    let keep = limit.saturating_sub(9);
    let truncated: String = sanitized.chars().take(keep).collect();
    format!("{truncated}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types() {
        let run = RunId::new("r1");
        let call = ToolCallId::new("r1");
        assert_eq!(run.as_str(), call.as_str());
    }

    #[test]
    fn test_empty_identifier_rejected() {
        assert_eq!(
            AgentId::new("  ").validated(),
            Err(ContractError::EmptyIdentifier)
        );
        assert!(AgentId::new("svc.agent").validated().is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn test_tool_name_segments() {
        let name = ToolName::parse("svc.ts.search").unwrap();
        assert_eq!(name.service(), "svc");
        assert_eq!(name.toolset(), "ts");
        assert_eq!(name.tool(), "search");
        assert_eq!(name.toolset_prefix(), "svc.ts");
    }

    #[test]
    fn test_tool_name_rejects_malformed() {
        assert!(ToolName::parse("search").is_err());
        assert!(ToolName::parse("svc.ts").is_err());
        assert!(ToolName::parse("svc..search").is_err());
        assert!(ToolName::parse("a.b.c.d").is_err());
    }

    #[test]
    fn test_tool_name_serde_transparent() {
        let name = ToolName::parse("svc.ts.search").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"svc.ts.search\"");
    }

    #[test]
    fn test_provider_name_replaces_dots() {
        assert_eq!(provider_name("svc.ts.search", 64), "svc_ts_search");
    }

    #[test]
    fn test_provider_name_replaces_disallowed_runes() {
        assert_eq!(provider_name("svc.ts.sea rch!", 64), "svc_ts_sea_rch_");
    }

    #[test]
    fn test_provider_name_truncates_with_digest() {
        let long = "svc.toolset.a-very-long-tool-name-that-will-not-fit-in-the-limit";
        let out = provider_name(long, 32);
        assert_eq!(out.len(), 32);
        assert_eq!(&out[23..24], "_");

        let digest = Sha256::digest(long.as_bytes());
        assert_eq!(&out[24..], hex::encode(&digest[..4]));
    }

    #[test]
    fn test_provider_name_is_deterministic() {
        let long = "svc.toolset.some-extremely-long-name-overflowing-everything";
        assert_eq!(provider_name(long, 24), provider_name(long, 24));
    }
}
