use std::fmt;

use serde::Serialize;

/// The kind of artifact a failing step is responsible for. Declaration order
/// is repair order: later kinds are generated against earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    DataModel,
    Router,
    Integration,
    Client,
}

impl ArtifactKind {
    pub fn priority(self) -> u32 {
        match self {
            ArtifactKind::DataModel => 0,
            ArtifactKind::Router => 1,
            ArtifactKind::Integration => 2,
            ArtifactKind::Client => 3,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::DataModel => "data_model",
            ArtifactKind::Router => "router",
            ArtifactKind::Integration => "integration",
            ArtifactKind::Client => "client",
        };
        f.write_str(s)
    }
}

/// A concrete repairable artifact: what it is and where it lives relative to
/// the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactId {
    pub kind: ArtifactKind,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub keywords: Vec<String>,
    pub artifact: ArtifactId,
}

impl RouteRule {
    pub fn new(keywords: &[&str], kind: ArtifactKind, path: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            artifact: ArtifactId {
                kind,
                path: path.to_string(),
            },
        }
    }

    /// A keyword matches a whole token of the step name, singular or plural.
    fn matches(&self, step: &str) -> bool {
        step.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .any(|token| {
                let singular = token.strip_suffix('s').unwrap_or(token);
                self.keywords.iter().any(|k| k == token || k == singular)
            })
    }
}

/// Maps failed steps to the artifact that has to be repaired.
///
/// Rules are checked in order; the first rule with a keyword equal to one of
/// the (lowercased) step name's `_`-separated tokens wins.
#[derive(Debug, Clone)]
pub struct ErrorRouter {
    rules: Vec<RouteRule>,
}

impl Default for ErrorRouter {
    fn default() -> Self {
        Self::new(vec![
            RouteRule::new(&["model", "schema", "entity", "entities"], ArtifactKind::DataModel, "app/models.py"),
            RouteRule::new(&["router", "route", "endpoint", "api"], ArtifactKind::Router, "app/routers.py"),
            RouteRule::new(
                &["integrate", "integration", "wire", "wiring", "entrypoint", "bootstrap"],
                ArtifactKind::Integration,
                "app/main.py",
            ),
            RouteRule::new(&["client", "frontend", "web"], ArtifactKind::Client, "client/api.ts"),
        ])
    }
}

impl ErrorRouter {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The artifact to repair for `step`, or `None` when nothing repairable
    /// is associated with it.
    pub fn route(&self, step: &str) -> Option<&ArtifactId> {
        let step = step.to_ascii_lowercase();
        self.rules.iter().find(|r| r.matches(&step)).map(|r| &r.artifact)
    }

    /// Lower is repaired first. Unroutable steps sort last.
    pub fn priority(&self, step: &str) -> u32 {
        self.route(step).map_or(u32::MAX, |a| a.kind.priority())
    }

    /// `steps` sorted by repair priority, keeping input order for ties.
    pub fn repair_order<S: AsRef<str>>(&self, steps: &[S]) -> Vec<String> {
        let mut ordered: Vec<String> = steps.iter().map(|s| s.as_ref().to_string()).collect();
        ordered.sort_by_key(|s| self.priority(s));
        ordered
    }
}
