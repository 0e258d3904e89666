//! Task Classifier
//!
//! Maps raw prompt text to a [`TaskType`] and a confidence score using an
//! ordered table of case-insensitive patterns.
//!
//! # Scoring
//!
//! ```text
//! 1. Empty / whitespace-only prompt      -> (General, 0.5)
//! 2. For each task type:  confidence = matched patterns / group size
//! 3. Highest confidence wins, ties go to the earlier-declared type
//! 4. Best confidence below min_confidence -> (General, 0.5)
//! ```
//!
//! Classification is a pure function of the prompt and the table: no I/O,
//! no shared mutable state.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use super::task::TaskType;

/// Default minimum confidence for accepting a classification
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.1;

/// Confidence reported when falling back to [`TaskType::General`]
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while building a pattern table
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// A pattern failed to compile
    #[error("invalid pattern for task type '{task_type}': {source}")]
    InvalidPattern {
        /// Group the pattern belongs to
        task_type: TaskType,
        /// Underlying regex error
        source: regex::Error,
    },

    /// A group was declared without patterns
    #[error("pattern group for task type '{0}' is empty")]
    EmptyGroup(TaskType),

    /// `General` is the fallback label and cannot own patterns
    #[error("task type 'general' cannot have a pattern group")]
    GeneralGroup,

    /// Threshold outside [0, 1]
    #[error("min_confidence must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
}

// ============================================================================
// Built-in Patterns
// ============================================================================

const CODE_PATTERNS: [&str; 8] = [
    r"\b(function|method|class|struct|script|program|module)s?\b",
    r"\b(code|coding|snippet|compile|compiler|syntax)\b",
    r"\b(python|javascript|typescript|rust|java|golang|ruby|php|sql|html|css|react|vue|angular)\b",
    r"\b(def|fn|func)\s+\w+\s*\(|\bimport\s+\w+|\bfrom\s+\w+\s+import\b|console\.log|print\(",
    r"\b(bug|debug|stack trace|exception|segfault|refactor)\b",
    r"\b(string|array|list|integer|variable|hashmap|hash map|data structure|algorithm)s?\b",
    r"\b(write|create|implement|build)\s+(a|an|the)?\s*(function|program|script|class|method|query|regex)",
    r"\b(git|docker|kubectl|npm|cargo|pip)\s+\w+",
];

const CREATIVE_PATTERNS: [&str; 8] = [
    r"\bwrite\s+(a|an|the|me)\b",
    r"\b(story|stories|tale|fable)\b",
    r"\b(poem|poetry|haiku|sonnet|limerick|lyrics)\b",
    r"\b(essay|article|blog post|newsletter)\b",
    r"\b(creative|imaginative|fiction|fictional)\b",
    r"\b(imagine|pretend|what if)\b",
    r"\b(character|plot|narrative|dialogue|scene)s?\b",
    r"\b(slogan|tagline|brainstorm)\b",
];

const REASONING_PATTERNS: [&str; 8] = [
    r"\bwhy\b",
    r"\bhow (does|do|can|should|would|will)\b",
    r"\bexplain\b",
    r"\b(analy[sz]e|analysis)\b",
    r"\b(compare|comparison|contrast|versus)\b",
    r"\bwhat are the (pros|cons|advantages|disadvantages|benefits|drawbacks)\b",
    r"\b(pros and cons|trade-?offs?)\b",
    r"\b(evaluate|assess|implications?)\b",
];

const MATH_PATTERNS: [&str; 8] = [
    r"\b(solve|calculate|compute)\b",
    r"\b(equation|formula|integral|derivative|matrix)\b",
    r"\b(math|mathematics|algebra|calculus|geometry|statistics|probability)\b",
    r"\b(proof|prove|theorem|lemma)\b",
    r"\d+\s*[-+*/^]\s*\d+",
    r"\b(square root|percentage|percent|average|factorial|prime)\b",
    r"\b[a-z]\s*=\s*-?\d",
    r"\b(divided by|multiplied by|plus|minus)\b",
];

const MULTILINGUAL_PATTERNS: [&str; 8] = [
    r"\btranslat(e|ion|ing)\b",
    r"\bfrom \w+ (in)?to (english|french|spanish|german|italian|portuguese|chinese|japanese|korean|russian|arabic|hindi)\b",
    r"\b(in|into|to) (french|spanish|german|italian|portuguese|chinese|japanese|korean|russian|arabic|hindi)\b",
    r"(en fran[cç]ais|en espa[nñ]ol|auf deutsch|in italiano)",
    r"\b(language|languages|multilingual|bilingual)\b",
    r"\b(grammar|conjugate|conjugation|vocabulary|pronounce|pronunciation)\b",
    r"\b(bonjour|hola|hallo|ciao|konnichiwa|merci|gracias|danke)\b",
    r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Cyrillic}\p{Arabic}\p{Hangul}]",
];

const SUMMARIZATION_PATTERNS: [&str; 8] = [
    r"\b(summari[sz]e|summary|summaries)\b",
    r"\btl;?dr\b",
    r"\b(key points|main ideas|main points|takeaways)\b",
    r"\b(condense|shorten|boil down)\b",
    r"\b(in a nutshell|in brief|in short|to sum up)\b",
    r"\b(recap|overview|synopsis|abstract|digest)\b",
    r"\b(bullet points?|outline)\b",
    r"\b(brief|briefly|concise|concisely)\b",
];

const TOOL_USE_PATTERNS: [&str; 8] = [
    r"\b(api|endpoint|webhook|http request|rest call)\b",
    r"\b(json|yaml|xml|csv|schema)\b",
    r"\b(search|look up|lookup|browse|fetch)\b",
    r"\b(call|invoke|trigger|execute)\s+(the|a|an)?\s*(tool|function|api|workflow)",
    r"\b(workflow|automation|automate|integration)\b",
    r"\b(send an? (email|message)|schedule|calendar)\b",
    r"\b(weather|stock price|exchange rate)\b",
    r"\b(database|spreadsheet)\b",
];

/// Built-in pattern sources, in declaration order
fn builtin_sources() -> [(TaskType, &'static [&'static str]); 7] {
    [
        (TaskType::Code, &CODE_PATTERNS),
        (TaskType::Creative, &CREATIVE_PATTERNS),
        (TaskType::Reasoning, &REASONING_PATTERNS),
        (TaskType::Math, &MATH_PATTERNS),
        (TaskType::Multilingual, &MULTILINGUAL_PATTERNS),
        (TaskType::Summarization, &SUMMARIZATION_PATTERNS),
        (TaskType::ToolUse, &TOOL_USE_PATTERNS),
    ]
}

// ============================================================================
// Pattern Table
// ============================================================================

/// The patterns owned by one task type
#[derive(Clone, Debug)]
pub struct PatternGroup {
    task_type: TaskType,
    patterns: Vec<Regex>,
}

impl PatternGroup {
    /// Compile a group from pattern sources
    pub fn new<S: AsRef<str>>(task_type: TaskType, sources: &[S]) -> Result<Self, ClassifierError> {
        if task_type == TaskType::General {
            return Err(ClassifierError::GeneralGroup);
        }
        if sources.is_empty() {
            return Err(ClassifierError::EmptyGroup(task_type));
        }

        let patterns = sources
            .iter()
            .map(|src| {
                RegexBuilder::new(src.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ClassifierError::InvalidPattern { task_type, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            task_type,
            patterns,
        })
    }

    /// Task type this group votes for
    #[must_use]
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Number of patterns in the group
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the group has no patterns (never true for a built group)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Count how many patterns match the prompt
    fn matches(&self, prompt: &str) -> usize {
        self.patterns.iter().filter(|p| p.is_match(prompt)).count()
    }
}

/// Ordered table of pattern groups, sorted by task type priority
#[derive(Clone, Debug)]
pub struct PatternTable {
    groups: Vec<PatternGroup>,
}

impl PatternTable {
    /// Build a table from groups; order is normalized to task type priority
    pub fn new(mut groups: Vec<PatternGroup>) -> Self {
        groups.sort_by_key(|g| g.task_type.priority());
        groups.dedup_by_key(|g| g.task_type);
        Self { groups }
    }

    /// The built-in table
    #[must_use]
    pub fn builtin() -> Self {
        Self::with_overrides(&HashMap::new())
            .expect("built-in classifier patterns are valid regular expressions")
    }

    /// Built-in table with some groups replaced
    ///
    /// # Errors
    ///
    /// Returns an error if an override fails to compile, is empty, or targets
    /// [`TaskType::General`].
    pub fn with_overrides(
        overrides: &HashMap<TaskType, Vec<String>>,
    ) -> Result<Self, ClassifierError> {
        if overrides.contains_key(&TaskType::General) {
            return Err(ClassifierError::GeneralGroup);
        }

        let groups = builtin_sources()
            .into_iter()
            .map(|(task_type, builtin)| match overrides.get(&task_type) {
                Some(custom) => PatternGroup::new(task_type, custom),
                None => PatternGroup::new(task_type, builtin),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(groups))
    }

    /// Groups in priority order
    #[must_use]
    pub fn groups(&self) -> &[PatternGroup] {
        &self.groups
    }

    /// Flattened `(task type, pattern, priority)` entries
    pub fn entries(&self) -> impl Iterator<Item = (TaskType, &str, u8)> + '_ {
        self.groups.iter().flat_map(|g| {
            g.patterns
                .iter()
                .map(move |p| (g.task_type, p.as_str(), g.task_type.priority()))
        })
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Result of classifying a prompt
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    /// Winning task type
    pub task_type: TaskType,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Number of patterns of the winning group that matched
    pub matched: usize,
}

impl Classification {
    fn neutral() -> Self {
        Self {
            task_type: TaskType::General,
            confidence: NEUTRAL_CONFIDENCE,
            matched: 0,
        }
    }
}

/// Pattern-based task classifier
#[derive(Clone, Debug)]
pub struct TaskClassifier {
    table: PatternTable,
    min_confidence: f64,
}

impl TaskClassifier {
    /// Create a classifier over the given table
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidThreshold`] if `min_confidence` is
    /// outside [0, 1].
    pub fn new(table: PatternTable, min_confidence: f64) -> Result<Self, ClassifierError> {
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ClassifierError::InvalidThreshold(min_confidence));
        }
        Ok(Self {
            table,
            min_confidence,
        })
    }

    /// Classifier with the built-in table and default threshold
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            table: PatternTable::builtin(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    /// Minimum accepted confidence
    #[must_use]
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// The pattern table in use
    #[must_use]
    pub fn table(&self) -> &PatternTable {
        &self.table
    }

    /// Classify a prompt
    #[must_use]
    pub fn classify(&self, prompt: &str) -> Classification {
        if prompt.trim().is_empty() {
            return Classification::neutral();
        }

        let mut best: Option<Classification> = None;
        for group in &self.table.groups {
            let matched = group.matches(prompt);
            let confidence = matched as f64 / group.len().max(1) as f64;

            // Groups are in priority order, so strict > keeps the earlier type on ties
            if best.map_or(true, |b| confidence > b.confidence) {
                best = Some(Classification {
                    task_type: group.task_type,
                    confidence,
                    matched,
                });
            }
        }

        match best {
            Some(b) if b.matched > 0 && b.confidence >= self.min_confidence => {
                tracing::debug!(
                    task = %b.task_type,
                    confidence = b.confidence,
                    matched = b.matched,
                    "Prompt classified"
                );
                b
            }
            _ => Classification::neutral(),
        }
    }
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::builtin()
    }
}
