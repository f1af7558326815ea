//! Prompt assembly and artifact extraction for the generation stage. The
//! model's reply is treated as untrusted text: fenced code blocks are pulled
//! out with a regex and anything unparseable simply yields zero artifacts.

use crate::domain::artifact::GeneratedArtifact;
use crate::domain::job::TestType;
use crate::domain::recon::PageStructure;
use crate::shared::py_ast;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:python)?\s*\n(.*?)```").expect("Invalid code block pattern")
});

pub fn system_prompt(test_type: TestType) -> String {
    let style = match test_type {
        TestType::Manual => "manual pytest test stubs marked with allure.manual",
        TestType::Api => "API tests using httpx",
        TestType::Automated => "automated UI tests using playwright",
        TestType::Both => "both manual stubs and automated playwright tests",
    };
    format!(
        "You are a QA engineer. Generate {} with pytest and allure decorators \
         (@allure.feature, @allure.story, @allure.title, @allure.tag). Return each \
         test in its own fenced python code block.",
        style
    )
}

pub fn user_prompt(
    target: &str,
    requirements: &[String],
    page: &PageStructure,
    retry_count: i64,
) -> String {
    let mut prompt = format!("Target: {}\nPage title: {}\n", target, page.title);

    if !page.buttons.is_empty() {
        let names: Vec<&str> = page.buttons.iter().map(|b| b.text.as_str()).collect();
        prompt.push_str(&format!("Buttons: {}\n", names.join(", ")));
    }
    if !page.inputs.is_empty() {
        let names: Vec<&str> = page
            .inputs
            .iter()
            .map(|i| {
                if i.name.is_empty() {
                    i.input_type.as_str()
                } else {
                    i.name.as_str()
                }
            })
            .collect();
        prompt.push_str(&format!("Inputs: {}\n", names.join(", ")));
    }
    if let Some(error) = &page.error {
        prompt.push_str(&format!(
            "Page analysis was unavailable ({}); rely on the requirements.\n",
            error
        ));
    }

    prompt.push_str("\nRequirements:\n");
    for (index, requirement) in requirements.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, requirement));
    }

    if retry_count > 0 {
        prompt.push_str(&format!(
            "\nAttempt {}: the previous attempt produced tests that failed \
             validation. Generate syntactically valid tests with assertions.\n",
            retry_count + 1
        ));
    }
    prompt
}

/// Pull candidate tests out of a model reply. Each fenced block becomes one
/// artifact; a reply with no fences but a recognizable test definition is
/// taken whole. Anything else yields nothing.
pub fn extract_artifacts(response: &str, origin: &str) -> Vec<GeneratedArtifact> {
    let mut blocks: Vec<String> = CODE_BLOCK
        .captures_iter(response)
        .map(|capture| capture[1].trim().to_string())
        .collect();
    if blocks.is_empty() && response.contains("def test_") {
        blocks.push(response.trim().to_string());
    }

    blocks
        .into_iter()
        .filter(|block| !block.is_empty())
        .enumerate()
        .map(|(index, source)| {
            let name = py_ast::first_test_name(&source)
                .unwrap_or_else(|| format!("test_case_{}", index + 1));
            GeneratedArtifact {
                id: Uuid::new_v4().to_string(),
                name,
                source,
                origin: origin.to_string(),
                endpoint: None,
            }
        })
        .collect()
}

pub fn detect_test_type(source: &str, job_type: TestType) -> &'static str {
    if source.contains("allure.manual") {
        return "manual";
    }
    match job_type {
        TestType::Manual => "manual",
        TestType::Api => "api",
        TestType::Automated | TestType::Both => "automated",
    }
}
