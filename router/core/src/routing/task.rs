//! Task Types
//!
//! The closed set of labels the classifier can assign to a prompt. The
//! declaration order doubles as the tie-break priority: when two task types
//! score the same confidence, the one declared first wins.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Task Type
// ============================================================================

/// Classification of the kind of work a prompt represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Writing, explaining or debugging code
    /// Examples: functions, scripts, algorithms, tooling commands
    Code,

    /// Creative/generative writing
    /// Examples: stories, poems, essays, blog posts
    Creative,

    /// Analysis and explanation
    /// Examples: "why", comparisons, pros and cons
    Reasoning,

    /// Mathematical/logical problems
    /// Examples: equations, proofs, calculations
    Math,

    /// Translation and non-English content
    Multilingual,

    /// Condensing content
    /// Examples: summaries, key points, tl;dr
    Summarization,

    /// Structured output and external calls
    /// Examples: JSON output, API calls, searching
    ToolUse,

    /// Default/unclassified tasks
    General,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::General
    }
}

impl TaskType {
    /// Every task type, in declaration (priority) order
    pub const ALL: [TaskType; 8] = [
        Self::Code,
        Self::Creative,
        Self::Reasoning,
        Self::Math,
        Self::Multilingual,
        Self::Summarization,
        Self::ToolUse,
        Self::General,
    ];

    /// Wire identifier (`"code"`, `"tool_use"`, ...)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Creative => "creative",
            Self::Reasoning => "reasoning",
            Self::Math => "math",
            Self::Multilingual => "multilingual",
            Self::Summarization => "summarization",
            Self::ToolUse => "tool_use",
            Self::General => "general",
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Code => "Code Generation",
            Self::Creative => "Creative Writing",
            Self::Reasoning => "Reasoning & Analysis",
            Self::Math => "Mathematics",
            Self::Multilingual => "Translation & Multilingual",
            Self::Summarization => "Summarization",
            Self::ToolUse => "Tool Use",
            Self::General => "General",
        }
    }

    /// Tie-break priority (lower wins)
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::Code => 0,
            Self::Creative => 1,
            Self::Reasoning => 2,
            Self::Math => 3,
            Self::Multilingual => 4,
            Self::Summarization => 5,
            Self::ToolUse => 6,
            Self::General => 7,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognized task type
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown task type '{0}'")]
pub struct UnknownTaskType(pub String);

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownTaskType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_follows_declaration_order() {
        for pair in TaskType::ALL.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_parse_wire_names() {
        assert_eq!("code".parse::<TaskType>(), Ok(TaskType::Code));
        assert_eq!("Tool_Use".parse::<TaskType>(), Ok(TaskType::ToolUse));
        assert_eq!(" general ".parse::<TaskType>(), Ok(TaskType::General));
        assert_eq!(
            "poetry".parse::<TaskType>(),
            Err(UnknownTaskType("poetry".to_string()))
        );
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskType::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");

        let parsed: TaskType = serde_json::from_str("\"summarization\"").unwrap();
        assert_eq!(parsed, TaskType::Summarization);
    }
}
