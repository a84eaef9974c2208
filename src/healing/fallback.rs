use std::collections::BTreeMap;

use crate::healing::{ArtifactId, ArtifactKind, FallbackGenerator, PrimaryEntity};

/// Neutral placeholder content for each artifact kind.
///
/// The output only has to parse and name the right entity so that the steps
/// downstream of the artifact can run; it carries no business logic. The
/// comment syntax follows the target file's extension.
#[derive(Debug, Default, Clone)]
pub struct StubFallback;

impl StubFallback {
    pub fn new() -> Self {
        Self
    }
}

impl FallbackGenerator for StubFallback {
    fn generate(&self, artifact: &ArtifactId, entity: &PrimaryEntity) -> Option<BTreeMap<String, String>> {
        let syntax = Syntax::for_path(&artifact.path)?;
        let body = match (artifact.kind, syntax) {
            (ArtifactKind::DataModel, Syntax::Python) => format!(
                "class {model}:\n    def __init__(self, id=None):\n        self.id = id\n",
                model = entity.model_name
            ),
            (ArtifactKind::DataModel, Syntax::TypeScript) => format!(
                "export interface {model} {{\n  id?: string;\n}}\n",
                model = entity.model_name
            ),
            (ArtifactKind::Router, Syntax::Python) => format!(
                "{entity}_routes = []\n\n\ndef list_{entity}s():\n    return []\n",
                entity = entity.entity_name
            ),
            (ArtifactKind::Router, Syntax::TypeScript) => format!(
                "export const {entity}Routes: string[] = [];\n",
                entity = camel_case(&entity.entity_name)
            ),
            (ArtifactKind::Integration, Syntax::Python) => format!(
                "ROUTERS = [\"{entity}\"]\n\n\ndef create_app():\n    return {{\"routers\": ROUTERS}}\n",
                entity = entity.entity_name
            ),
            (ArtifactKind::Integration, Syntax::TypeScript) => format!(
                "export const routers = [\"{entity}\"];\n",
                entity = entity.entity_name
            ),
            (ArtifactKind::Client, Syntax::Python) => format!(
                "def fetch_{entity}s(session):\n    return []\n",
                entity = entity.entity_name
            ),
            (ArtifactKind::Client, Syntax::TypeScript) => format!(
                "export async function fetch{model}s(): Promise<unknown[]> {{\n  return [];\n}}\n",
                model = entity.model_name
            ),
        };

        let header = syntax.comment(&format!(
            "placeholder {} for {} (generated by fallback)",
            artifact.kind, entity.model_name
        ));
        let mut files = BTreeMap::new();
        files.insert(artifact.path.clone(), format!("{header}\n{body}"));
        Some(files)
    }
}

#[derive(Debug, Clone, Copy)]
enum Syntax {
    Python,
    TypeScript,
}

impl Syntax {
    fn for_path(path: &str) -> Option<Self> {
        match path.rsplit_once('.').map(|(_, ext)| ext) {
            Some("py") => Some(Syntax::Python),
            Some("ts" | "tsx" | "js" | "jsx") => Some(Syntax::TypeScript),
            _ => None,
        }
    }

    fn comment(self, text: &str) -> String {
        match self {
            Syntax::Python => format!("# {text}"),
            Syntax::TypeScript => format!("// {text}"),
        }
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for ch in snake.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> PrimaryEntity {
        PrimaryEntity {
            entity_name: "order_item".to_string(),
            model_name: "OrderItem".to_string(),
        }
    }

    fn artifact(kind: ArtifactKind, path: &str) -> ArtifactId {
        ArtifactId {
            kind,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_data_model_names_entity() {
        let files = StubFallback::new()
            .generate(&artifact(ArtifactKind::DataModel, "app/models.py"), &entity())
            .unwrap();
        let content = &files["app/models.py"];
        assert!(content.starts_with("# placeholder data_model for OrderItem"));
        assert!(content.contains("class OrderItem:"));
    }

    #[test]
    fn test_client_typescript() {
        let files = StubFallback::new()
            .generate(&artifact(ArtifactKind::Client, "client/api.ts"), &entity())
            .unwrap();
        assert!(files["client/api.ts"].contains("fetchOrderItems"));
    }

    #[test]
    fn test_router_typescript_camel_case() {
        let files = StubFallback::new()
            .generate(&artifact(ArtifactKind::Router, "web/routes.ts"), &entity())
            .unwrap();
        assert!(files["web/routes.ts"].contains("orderItemRoutes"));
    }

    #[test]
    fn test_unknown_extension_has_no_fallback() {
        assert!(StubFallback::new()
            .generate(&artifact(ArtifactKind::DataModel, "proto/service.proto"), &entity())
            .is_none());
    }
}
