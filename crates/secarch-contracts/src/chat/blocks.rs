use serde_json::{json, Value};

use crate::analysis::{AnalysisResult, Solution};
use crate::errors::AnalysisError;

pub const PROMPT_FOR_INPUT: &str =
    "Please provide a description of the system architecture to analyze (text, image, or both).";
pub const ANALYZING_NOTICE: &str = "Analyzing your architecture... This may take a minute.";
pub const DIAGRAM_TITLE: &str = "secure_architecture_diagram";
pub const DIAGRAM_COMMENT: &str = "Proposed Secure Architecture Diagram";
pub const ANALYSIS_FALLBACK_TEXT: &str = "Security Architecture Analysis";

const COMPONENT_PREVIEW: usize = 2;
const RECOMMENDATION_PREVIEW: usize = 3;

pub fn failure_text(err: &AnalysisError) -> String {
    format!(
        "Sorry, I couldn't complete the security analysis: {}",
        err.user_message()
    )
}

pub fn diagram_failure_text(err: &AnalysisError) -> String {
    format!("Failed to generate architecture diagram: {err}")
}

pub fn analysis_blocks(result: &AnalysisResult) -> Vec<Value> {
    let mut blocks = vec![
        header("🔒 Security Architecture Analysis"),
        json!({"type": "divider"}),
    ];

    for (idx, solution) in result.solutions.iter().enumerate() {
        blocks.extend(solution_blocks(idx + 1, solution));
    }

    let recommendation = &result.recommendation;
    blocks.push(header("🎯 Recommended Approach"));
    blocks.push(markdown_section(&format!(
        "*{}*",
        recommendation.selected_solution
    )));
    blocks.push(markdown_section(&format!(
        "*Technical Rationale*\n{}",
        bullets(&recommendation.technical_reasons, RECOMMENDATION_PREVIEW)
    )));
    blocks.push(markdown_section(&format!(
        "*Implementation Steps*\n{}",
        bullets(&recommendation.implementation_steps, RECOMMENDATION_PREVIEW)
    )));
    blocks
}

fn solution_blocks(position: usize, solution: &Solution) -> Vec<Value> {
    let components = &solution.technical_components;
    vec![
        markdown_section(&format!(
            "*Solution {position}: {}*\n_{}_",
            solution.name, solution.approach
        )),
        json!({
            "type": "section",
            "fields": [
                {
                    "type": "mrkdwn",
                    "text": format!(
                        "*Key Components*\n• Identity: {}\n• Network: {}",
                        preview(&components.identity_provider),
                        preview(&components.network_architecture),
                    ),
                },
                {
                    "type": "mrkdwn",
                    "text": format!("*Security Rationale*\n{}", components.security_rationale),
                }
            ]
        }),
        json!({
            "type": "context",
            "elements": [{
                "type": "mrkdwn",
                "text": format!(
                    "*Complexity:* {} | *Security Score:* {}",
                    solution.implementation_complexity,
                    format_score(solution.security_posture_score),
                ),
            }]
        }),
        json!({"type": "divider"}),
    ]
}

fn header(text: &str) -> Value {
    json!({
        "type": "header",
        "text": {"type": "plain_text", "text": text, "emoji": true}
    })
}

fn markdown_section(text: &str) -> Value {
    json!({
        "type": "section",
        "text": {"type": "mrkdwn", "text": text}
    })
}

fn preview(items: &[String]) -> String {
    items
        .iter()
        .take(COMPONENT_PREVIEW)
        .map(String::as_str)
        .collect::<Vec<&str>>()
        .join(", ")
}

fn bullets(items: &[String], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .map(|item| format!("• {item}"))
        .collect::<Vec<String>>()
        .join("\n")
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        return format!("{score:.0}");
    }
    format!("{score}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ImplementationComplexity, Recommendation, TechnicalComponents};

    fn result() -> AnalysisResult {
        AnalysisResult {
            solutions: vec![Solution {
                name: "Segmented Access".to_string(),
                approach: "Identity-aware proxy".to_string(),
                technical_components: TechnicalComponents {
                    identity_provider: vec!["OIDC".into(), "MFA".into(), "SPIFFE".into()],
                    network_architecture: vec!["Private subnet".into()],
                    security_rationale: "Removes implicit trust".to_string(),
                },
                implementation_complexity: ImplementationComplexity::Medium,
                security_posture_score: 8.0,
            }],
            recommendation: Recommendation {
                selected_solution: "Segmented Access".to_string(),
                technical_reasons: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                implementation_steps: vec!["deploy".into()],
            },
        }
    }

    #[test]
    fn blocks_start_with_header_and_include_solution_cards() {
        let blocks = analysis_blocks(&result());
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(
            blocks[0]["text"]["text"],
            "🔒 Security Architecture Analysis"
        );
        assert_eq!(
            blocks[2]["text"]["text"],
            "*Solution 1: Segmented Access*\n_Identity-aware proxy_"
        );
        assert_eq!(
            blocks[3]["fields"][0]["text"],
            "*Key Components*\n• Identity: OIDC, MFA\n• Network: Private subnet"
        );
        assert_eq!(
            blocks[4]["elements"][0]["text"],
            "*Complexity:* Medium | *Security Score:* 8"
        );
    }

    #[test]
    fn recommendation_lists_are_truncated_to_three() {
        let blocks = analysis_blocks(&result());
        let rationale = blocks
            .iter()
            .filter_map(|block| block["text"]["text"].as_str())
            .find(|text| text.starts_with("*Technical Rationale*"))
            .unwrap_or_default();
        assert_eq!(rationale, "*Technical Rationale*\n• a\n• b\n• c");
    }

    #[test]
    fn failure_text_uses_category_description() {
        let text = failure_text(&AnalysisError::Timeout("https://api/x".to_string()));
        assert!(text.contains("did not answer in time"));
        assert!(!text.contains("https://api/x"));
    }

    #[test]
    fn whole_scores_drop_the_fraction_without_saturating() {
        assert_eq!(format_score(8.0), "8");
        assert_eq!(format_score(7.5), "7.5");
        assert_eq!(format_score(1e20), "100000000000000000000");
        assert_eq!(format_score(-3.0), "-3");
    }
}
