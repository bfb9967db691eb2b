// Markdown rendering of the oracle analysis into the main document.

use engram_common::analysis::RepoAnalysis;
use engram_common::types::RepoKey;

/// The README-shaped header seeded at the top of the root document.
pub fn main_page_markdown(repo_key: &RepoKey, analysis: &RepoAnalysis) -> String {
    let overview = &analysis.overview;
    let project_name = if overview.project_name.is_empty() {
        repo_key.name().to_string()
    } else {
        overview.project_name.clone()
    };

    let mut page = format!("# {project_name}\n\n");
    if !overview.tagline.is_empty() {
        page.push_str(&format!("*{}*\n\n", overview.tagline));
    }
    page.push_str(&format!("Repository: `{repo_key}`\n\n"));
    if !overview.description.is_empty() {
        page.push_str(&overview.description);
        page.push_str("\n\n");
    }
    if !overview.problem_statement.is_empty() {
        page.push_str("## Problem\n\n");
        page.push_str(&overview.problem_statement);
        page.push_str("\n\n");
    }

    page.push_str("## Tech Stack\n\n");
    let stack = analysis.technical_stack.all();
    if stack.is_empty() {
        page.push_str("- (not yet determined)\n");
    } else {
        for technology in stack {
            page.push_str(&format!("- {technology}\n"));
        }
    }
    page.push('\n');

    page.push_str(
        "## Contents\n\n\
         - Technical specification (below)\n\
         - Release Notes collection\n\
         - Architecture Decision Records collection\n\
         - Engineering Tasks collection\n\
         - Documentation History collection\n",
    );
    page
}

/// The technical-specification body appended after the header.
pub fn tech_spec_markdown(analysis: &RepoAnalysis) -> String {
    let mut spec = String::from("## Scope\n\n");
    push_list(&mut spec, "In scope", &analysis.scope.in_scope);
    push_list(&mut spec, "Out of scope", &analysis.scope.out_of_scope);
    push_list(&mut spec, "Future considerations", &analysis.scope.future_considerations);

    let architecture = &analysis.architecture;
    spec.push_str("## Architecture\n\n");
    if !architecture.pattern.is_empty() {
        spec.push_str(&format!("Pattern: **{}**\n\n", architecture.pattern));
    }
    if !architecture.description.is_empty() {
        spec.push_str(&architecture.description);
        spec.push_str("\n\n");
    }
    for layer in &architecture.layers {
        spec.push_str(&format!("### {}\n\n{}\n", layer.name, layer.purpose));
        if !layer.technologies.is_empty() {
            spec.push_str(&format!("Technologies: {}\n", layer.technologies.join(", ")));
        }
        spec.push('\n');
    }
    if !architecture.data_flow.is_empty() {
        spec.push_str(&format!("Data flow: {}\n\n", architecture.data_flow));
    }

    if !analysis.core_modules.is_empty() {
        spec.push_str("## Core Modules\n\n");
        for module in &analysis.core_modules {
            spec.push_str(&format!("### {}\n\n{}\n\n", module.name, module.purpose));
            if !module.location.is_empty() {
                spec.push_str(&format!("Location: `{}`\n\n", module.location));
            }
            push_list(&mut spec, "Responsibilities", &module.responsibilities);
            push_list(&mut spec, "Depends on", &module.dependencies);
        }
    }

    if !analysis.public_apis.is_empty() {
        spec.push_str("## Public APIs\n\n");
        for api in &analysis.public_apis {
            spec.push_str(&format!("- **{}** — {}\n", api.name, api.description));
        }
        spec.push('\n');
    }

    if !analysis.internal_interfaces.is_empty() {
        spec.push_str("## Internal Interfaces\n\n");
        for interface in &analysis.internal_interfaces {
            spec.push_str(&format!("- **{}** — {}\n", interface.name, interface.description));
        }
        spec.push('\n');
    }

    if !analysis.key_concepts.is_empty() {
        spec.push_str("## Key Concepts\n\n");
        for concept in &analysis.key_concepts {
            spec.push_str(&format!("- **{}** — {}\n", concept.term, concept.definition));
        }
        spec.push('\n');
    }

    if !analysis.open_questions.is_empty() {
        push_list(&mut spec, "## Open Questions\n", &analysis.open_questions);
    }

    spec
}

fn push_list(target: &mut String, label: &str, entries: &[String]) {
    if entries.is_empty() {
        return;
    }
    if label.starts_with('#') {
        target.push_str(label);
        target.push('\n');
    } else {
        target.push_str(&format!("**{label}**\n\n"));
    }
    for entry in entries {
        target.push_str(&format!("- {entry}\n"));
    }
    target.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_common::analysis::{ArchitectureLayer, CoreModule, InterfaceDoc};

    fn sample_analysis() -> RepoAnalysis {
        let mut analysis = RepoAnalysis::default();
        analysis.overview.project_name = "hello".into();
        analysis.overview.tagline = "a friendly service".into();
        analysis.overview.description = "Serves greetings.".into();
        analysis.architecture.pattern = "Layered".into();
        analysis.architecture.layers.push(ArchitectureLayer {
            name: "API".into(),
            purpose: "HTTP surface".into(),
            technologies: vec!["axum".into()],
        });
        analysis.core_modules.push(CoreModule {
            name: "auth".into(),
            purpose: "Session handling".into(),
            location: "src/auth".into(),
            ..CoreModule::default()
        });
        analysis.technical_stack.backend = vec!["rust".into()];
        analysis.public_apis.push(InterfaceDoc {
            name: "POST /greet".into(),
            description: "Returns a greeting".into(),
        });
        analysis
    }

    #[test]
    fn main_page_has_title_stack_and_link_map() {
        let page = main_page_markdown(&RepoKey::new("octocat", "hello"), &sample_analysis());
        assert!(page.starts_with("# hello\n"));
        assert!(page.contains("`octocat/hello`"));
        assert!(page.contains("## Tech Stack"));
        assert!(page.contains("- rust"));
        assert!(page.contains("Release Notes collection"));
    }

    #[test]
    fn main_page_falls_back_to_repo_name() {
        let page = main_page_markdown(&RepoKey::new("octocat", "hello"), &RepoAnalysis::default());
        assert!(page.starts_with("# hello\n"));
        assert!(page.contains("(not yet determined)"));
    }

    #[test]
    fn tech_spec_renders_architecture_and_modules() {
        let spec = tech_spec_markdown(&sample_analysis());
        assert!(spec.contains("## Architecture"));
        assert!(spec.contains("Pattern: **Layered**"));
        assert!(spec.contains("### API"));
        assert!(spec.contains("## Core Modules"));
        assert!(spec.contains("### auth"));
        assert!(spec.contains("## Public APIs"));
        assert!(spec.contains("POST /greet"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let spec = tech_spec_markdown(&RepoAnalysis::default());
        assert!(!spec.contains("## Core Modules"));
        assert!(!spec.contains("## Key Concepts"));
        assert!(!spec.contains("## Open Questions"));
    }
}
