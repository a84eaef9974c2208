use std::collections::HashMap;

const COMPLETENESS_REMINDERS: &str = "\
## Completeness requirements
- Produce every file the step is responsible for, in full. No placeholders, no \"...\".
- Every symbol you reference must be defined or imported.
- Do not stop before the output is complete.";

const STRUCTURE_CHECKLIST: &str = "\
## Mandatory structure checklist
- [ ] Imports at the top of each file, nothing unused.
- [ ] Every declared entity has all of its fields with explicit types.
- [ ] Every route, handler or function named in the plan exists.
- [ ] Names match the already-generated definitions exactly.";

const STRICT_FRAMING: &str = "\
PREVIOUS ATTEMPTS AT THIS STEP FAILED. Treat the following instructions as \
hard requirements. Output that deviates from them will be rejected.";

const ZERO_TOLERANCE_RULES: &str = "\
## Zero-tolerance rules
- No invented modules, files or dependencies.
- No partial output. No commentary outside the requested files.
- Re-read the error from the last attempt and fix its cause, not its symptom.";

/// Tightens step instructions as a step keeps failing.
///
/// Holds only a per-step failure counter; the instructions it produces are a
/// pure function of that counter. It never retries anything itself.
#[derive(Debug, Default)]
pub struct InstructionEscalator {
    failures: HashMap<String, u32>,
}

impl InstructionEscalator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_count(&self, step: &str) -> u32 {
        self.failures.get(step).copied().unwrap_or(0)
    }

    pub fn record_failure(&mut self, step: &str) -> u32 {
        let count = self.failures.entry(step.to_string()).or_insert(0);
        *count += 1;
        tracing::debug!(step, failures = *count, "Escalation level raised");
        *count
    }

    pub fn record_success(&mut self, step: &str) {
        if self.failures.remove(step).is_some() {
            tracing::debug!(step, "Escalation level reset");
        }
    }

    /// Instructions for the next attempt at `step`.
    ///
    /// Level `n` contains every constraint of level `n - 1`.
    pub fn adapt(&self, step: &str, base: &str) -> String {
        let level = self.failure_count(step);
        if level == 0 {
            return base.to_string();
        }

        let mut sections = Vec::with_capacity(6);
        if level >= 3 {
            sections.push(STRICT_FRAMING);
        }
        sections.push(base);
        sections.push(COMPLETENESS_REMINDERS);
        if level >= 2 {
            sections.push(STRUCTURE_CHECKLIST);
        }
        if level >= 3 {
            sections.push(ZERO_TOLERANCE_RULES);
        }
        if let Some(hint) = context_hint(step) {
            sections.push(hint);
        }
        sections.join("\n\n")
    }
}

/// Step-specific guidance picked by keywords in the step name.
pub fn context_hint(step: &str) -> Option<&'static str> {
    let step = step.to_ascii_lowercase();
    let hint = if step.contains("model") || step.contains("schema") {
        "Hint: keep field names and types identical across model and schema definitions."
    } else if step.contains("route") || step.contains("endpoint") || step.contains("api") {
        "Hint: every endpoint must import the models it uses and return the declared response type."
    } else if step.contains("test") {
        "Hint: tests must target endpoints and entities that actually exist in the generated code."
    } else if step.contains("client") || step.contains("frontend") || step.contains("ui") {
        "Hint: client calls must use the exact paths and payload shapes of the generated API."
    } else {
        return None;
    };
    Some(hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "Generate the data models.";

    fn escalator_at(level: u32) -> InstructionEscalator {
        let mut escalator = InstructionEscalator::new();
        for _ in 0..level {
            escalator.record_failure("generate_models");
        }
        escalator
    }

    #[test]
    fn test_level_zero_is_unchanged() {
        assert_eq!(escalator_at(0).adapt("generate_models", BASE), BASE);
    }

    #[test]
    fn test_levels_are_strict_supersets() {
        let levels: Vec<String> = (0..=4)
            .map(|n| escalator_at(n).adapt("generate_models", BASE))
            .collect();

        assert!(levels[1].contains(COMPLETENESS_REMINDERS));
        assert!(!levels[1].contains(STRUCTURE_CHECKLIST));
        assert!(levels[2].contains(STRUCTURE_CHECKLIST));
        assert!(levels[3].starts_with(STRICT_FRAMING));
        assert!(levels[3].contains(ZERO_TOLERANCE_RULES));
        assert_eq!(levels[3], levels[4]);

        for n in 1..=3 {
            let (prev, next) = (&levels[n - 1], &levels[n]);
            assert!(next.contains(BASE));
            assert!(next.len() > prev.len());
            for constraint in [COMPLETENESS_REMINDERS, STRUCTURE_CHECKLIST, ZERO_TOLERANCE_RULES] {
                if prev.contains(constraint) {
                    assert!(next.contains(constraint), "level {n} dropped a constraint");
                }
            }
        }
    }

    #[test]
    fn test_success_resets_to_baseline() {
        let mut escalator = escalator_at(2);
        escalator.record_success("generate_models");
        assert_eq!(escalator.failure_count("generate_models"), 0);
        assert_eq!(escalator.adapt("generate_models", BASE), BASE);
    }

    #[test]
    fn test_counters_are_per_step() {
        let mut escalator = escalator_at(2);
        escalator.record_failure("generate_client");
        assert_eq!(escalator.failure_count("generate_models"), 2);
        assert_eq!(escalator.failure_count("generate_client"), 1);
    }

    #[test]
    fn test_context_hint_matches_keywords() {
        assert!(context_hint("generate_models").unwrap().contains("field names"));
        assert!(context_hint("build_API_routes").unwrap().contains("endpoint"));
        assert!(context_hint("package").is_none());
    }
}
