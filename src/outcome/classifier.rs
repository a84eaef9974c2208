use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::Outcome;

/// What the classifier knows about the run that produced the error.
#[derive(Debug, Clone, Default)]
pub struct ClassificationContext {
    pub step: Option<String>,
    /// Paths written by the pipeline itself (relative or absolute).
    pub generated_paths: Vec<String>,
    /// Module names the pipeline generates, e.g. `app` or `app.models`.
    pub first_party_modules: Vec<String>,
}

impl ClassificationContext {
    pub fn for_step(step: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            ..Self::default()
        }
    }

    fn is_first_party_module(&self, module: &str) -> bool {
        if module.starts_with('.') || module.starts_with("@/") {
            return true;
        }
        self.first_party_modules.iter().any(|owned| {
            module == owned
                || module
                    .strip_prefix(owned.as_str())
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('/'))
        })
    }

    fn mentions_owned_module(&self, error: &str) -> Option<String> {
        self.first_party_modules
            .iter()
            .filter(|m| m.contains('.') || m.contains('/'))
            .find(|m| error.contains(m.as_str()))
            .cloned()
    }
}

/// Which rule produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    AlwaysCognitive,
    Hard,
    Environment,
    /// Environment-looking error that names something the pipeline generated.
    RegenerationCanFix,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub outcome: Outcome,
    pub rule: ClassificationRule,
    pub matched: Option<String>,
}

static ALWAYS_COGNITIVE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(SyntaxError|IndentationError|TabError|TypeError|NameError|AttributeError|ReferenceError|UnboundLocalError|ZeroDivisionError|KeyError|IndexError)\b",
        r"ImportError: cannot import name",
        r"error\[E\d{4}\]",
        r"error TS\d{4}",
        r"(?i)\bis not (defined|a function)\b",
        r"(?i)cannot read propert(y|ies) of (undefined|null)",
        r"(?i)\bexpected\s+(status\s+(code\s+)?)?\d{3}\b.{0,40}\b(got|but was|received|actual)\s+\d{3}\b",
        r"(?i)unexpected (http )?status( code)?",
        r"\bassert\s+\d{3}\s*==\s*\d{3}\b",
    ])
});

static HARD: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)contract violation",
        r"(?i)invariant violat(ed|ion)",
        r"(?i)logically impossible",
        r"(?i)contradictory (requirements?|specifications?|constraints?)",
        r"(?i)unsatisfiable (requirements?|constraints?)",
    ])
});

static ENVIRONMENT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)command not found",
        r"(?i)\b(executable|binary|interpreter|program)\b.{0,40}\bnot found\b",
        r"(?i)spawn \S+ ENOENT",
        r"(?i)address already in use|EADDRINUSE|port \d+ is (already )?in use|port is already allocated",
        r"(?i)no space left on device|ENOSPC|disk quota exceeded",
        r"(?i)out of memory|cannot allocate memory|OOMKilled|\bMemoryError\b|ENOMEM",
        r"(?i)could not resolve host|temporary failure in name resolution|network is unreachable",
        r"(?i)registry\b.{0,40}\b(unreachable|unavailable|timed out)",
        r"(?i)npm ERR! network|ECONNREFUSED|ETIMEDOUT",
    ])
});

/// Missing dependency. Capture group 1 is the module name.
static MISSING_MODULE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"No module named '([^']+)'",
        r"Cannot find module '([^']+)'",
        r"unresolved import `([^`]+)`",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern = *p, error = %e, "Invalid classifier pattern");
                None
            }
        })
        .collect()
}

fn first_match(rules: &[Regex], error: &str) -> Option<String> {
    rules
        .iter()
        .find_map(|re| re.find(error).map(|m| m.as_str().to_string()))
}

/// Missing-module name captured by one of the dependency patterns.
fn missing_module(error: &str) -> Option<&str> {
    MISSING_MODULE
        .iter()
        .find_map(|re| re.captures(error).and_then(|c| c.get(1)).map(|m| m.as_str()))
}

/// Could regenerating the artifact plausibly make this error go away?
fn regeneration_can_fix(error: &str, context: &ClassificationContext) -> Option<String> {
    if let Some(path) = context
        .generated_paths
        .iter()
        .find(|p| !p.is_empty() && error.contains(p.as_str()))
    {
        return Some(path.clone());
    }
    missing_module(error)
        .filter(|module| context.is_first_party_module(module))
        .map(str::to_string)
}

/// Classify an error message. Rules are ordered and the first match wins;
/// anything unrecognized is a cognitive failure. Always returns exactly one
/// outcome.
pub fn classify(error: &str, context: &ClassificationContext) -> Outcome {
    classify_detailed(error, context).outcome
}

/// Classify an error chain, joining every cause into one message.
pub fn classify_error(error: &anyhow::Error, context: &ClassificationContext) -> Outcome {
    let message = error
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ");
    classify(&message, context)
}

pub fn classify_detailed(error: &str, context: &ClassificationContext) -> Classification {
    let classification = if let Some(matched) = first_match(&ALWAYS_COGNITIVE, error)
        .or_else(|| context.mentions_owned_module(error))
    {
        Classification {
            outcome: Outcome::CognitiveFailure,
            rule: ClassificationRule::AlwaysCognitive,
            matched: Some(matched),
        }
    } else if let Some(matched) = first_match(&HARD, error) {
        Classification {
            outcome: Outcome::HardFailure,
            rule: ClassificationRule::Hard,
            matched: Some(matched),
        }
    } else if let Some(matched) =
        first_match(&ENVIRONMENT, error).or_else(|| first_match(&MISSING_MODULE, error))
    {
        match regeneration_can_fix(error, context) {
            Some(fixable) => Classification {
                outcome: Outcome::CognitiveFailure,
                rule: ClassificationRule::RegenerationCanFix,
                matched: Some(fixable),
            },
            None => Classification {
                outcome: Outcome::EnvironmentFailure,
                rule: ClassificationRule::Environment,
                matched: Some(matched),
            },
        }
    } else {
        Classification {
            outcome: Outcome::CognitiveFailure,
            rule: ClassificationRule::Default,
            matched: None,
        }
    };

    tracing::debug!(
        step = context.step.as_deref().unwrap_or("-"),
        outcome = %classification.outcome,
        rule = ?classification.rule,
        matched = classification.matched.as_deref().unwrap_or(""),
        "Classified step error"
    );

    classification
}
