use crate::healing::RegenerationRequest;

pub fn system_prompt_for_regeneration(request: &RegenerationRequest) -> String {
    format!(
        r#"You are Rhizome, an expert software engineer repairing one generated artifact in a multi-step code generation pipeline.

The step `{step}` failed. It is responsible for the {kind} artifact at `{path}`.

{error_section}

{instructions_section}

## Instructions
1. Read `{path}` and the files it depends on.
2. Work out why the step failed.
3. Rewrite `{path}` with write_file so that the step can succeed. Write the complete file.
4. Only touch other files if the error shows they are part of the same artifact.

## Guidelines
- Keep the entities, names and interfaces the rest of the workspace already uses.
- Do not add features, comments or documentation beyond what the fix needs.
- When you are done, reply with a one-paragraph summary of the change."#,
        step = request.step,
        kind = request.artifact.kind,
        path = request.artifact.path,
        error_section = match request.error.as_deref() {
            Some(error) if !error.is_empty() => format!("## Failure\n```\n{error}\n```"),
            _ => String::new(),
        },
        instructions_section = match request.instructions.as_deref() {
            Some(instructions) if !instructions.is_empty() => {
                format!("## Original step instructions\n{instructions}")
            }
            _ => String::new(),
        },
    )
}

pub fn initial_message(request: &RegenerationRequest) -> String {
    format!(
        "Repair `{}` so that step `{}` succeeds.",
        request.artifact.path, request.step
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::{ArtifactId, ArtifactKind};

    fn request(error: Option<&str>) -> RegenerationRequest {
        RegenerationRequest {
            root: "/tmp/ws".into(),
            step: "generate_routes".to_string(),
            artifact: ArtifactId {
                kind: ArtifactKind::Router,
                path: "app/routers.py".to_string(),
            },
            error: error.map(str::to_string),
            instructions: None,
        }
    }

    #[test]
    fn test_prompt_includes_failure() {
        let prompt = system_prompt_for_regeneration(&request(Some("NameError: name 'Task' is not defined")));
        assert!(prompt.contains("`generate_routes` failed"));
        assert!(prompt.contains("router artifact at `app/routers.py`"));
        assert!(prompt.contains("NameError"));
        assert!(!prompt.contains("Original step instructions"));
    }

    #[test]
    fn test_prompt_without_error_has_no_failure_section() {
        let prompt = system_prompt_for_regeneration(&request(None));
        assert!(!prompt.contains("## Failure"));
    }
}
