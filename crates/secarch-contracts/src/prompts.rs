use crate::analysis::Solution;

pub const DEFAULT_SYSTEM_NAME: &str = "Unnamed System";

pub const ANALYSIS_SYSTEM_INSTRUCTION: &str = "You are a zero trust security architect. Always respond with syntactically valid JSON matching the requested schema, including all necessary commas between properties and array items. Do not add commentary outside the JSON document.";

pub const VISION_INSTRUCTION: &str = r#"Act as a Security Analyst specializing in Zero Trust Architecture. Analyze the provided architecture diagram and produce a detailed description and inventory of every component, connection and zone. While describing each element, flag anything that looks misaligned with Zero Trust principles (never trust, always verify; least privilege; assume breach; micro-segmentation; explicit verification).

Do not propose solutions yet. Base every observation only on what the diagram shows. Structure the answer as:

1. Overall System Context: the likely purpose of the system.
2. Component Inventory: every identifiable component (servers, databases, firewalls, load balancers, user endpoints, cloud services, APIs). For each, give its type, likely function, implied security role, and any Zero Trust concern raised by its placement or connections.
3. Connections and Flows: every visible connection and data flow, with direction where possible, noting flows that imply excessive trust or cross boundaries without visible verification.
4. Boundaries and Zones: visual or implied zones (DMZ, internal, VPCs, subnets), noting overly large or flat zones that allow lateral movement.
5. Summary of Potential Zero Trust Gaps: the 2-4 most prominent issues."#;

pub const ANALYSIS_SCHEMA: &str = r#"{
    "solutions": [
        {
            "name": "string",
            "approach": "string",
            "technical_components": {
                "identity_provider": ["string"],
                "network_architecture": ["string"],
                "security_rationale": "string"
            },
            "implementation_complexity": "High/Medium/Low",
            "security_posture_score": "number"
        }
    ],
    "recommendation": {
        "selected_solution": "string",
        "technical_reasons": ["string"],
        "implementation_steps": ["string"]
    }
}"#;

/// First line of the user-supplied text, trimmed. A blank first line yields
/// [`DEFAULT_SYSTEM_NAME`] instead of an empty name.
pub fn system_name_for(text: &str) -> String {
    let first = text.split('\n').next().unwrap_or_default().trim();
    if first.is_empty() {
        return DEFAULT_SYSTEM_NAME.to_string();
    }
    first.to_string()
}

/// Description handed to the completion service: user text, then the diagram
/// analyses when any image was supplied.
pub fn compose_description(text: &str, image_text: &str) -> String {
    if image_text.is_empty() {
        return text.to_string();
    }
    format!("{text}\n\nArchitecture Diagram Analysis:\n{image_text}")
}

/// Summary used in the diagram prompt.
pub fn combined_text(text: &str, image_text: &str) -> String {
    let combined = format!("{text}\n{image_text}").trim().to_string();
    if combined.is_empty() {
        return DEFAULT_SYSTEM_NAME.to_string();
    }
    combined
}

pub fn analysis_prompt(system_name: &str, description: &str) -> String {
    format!(
        r#"Act as a Senior Security Architect analyzing security architecture patterns and their implications.

1. Understand the current security architecture: which security boundaries exist, how trust is established and verified, and which security properties are maintained.
2. Analyze the architectural changes needed: how they affect existing boundaries, which properties are preserved or modified, and which trust assumptions they make.
3. Consider the security model: how the trust model changes, which invariants must hold, and which properties could be compromised.

For security_rationale:
- DO explain why an approach maintains or impacts security boundaries
- DO analyze how trust relationships and verification points are affected
- DO evaluate the validity of security assumptions
- DO NOT describe implementation steps, compare products, list generic risks, or give configuration details

Provide the assessment as valid JSON exactly matching this structure:
{schema}

SYSTEM NAME: {system_name}
SYSTEM DESCRIPTION:
{description}
"#,
        schema = ANALYSIS_SCHEMA,
    )
}

pub fn format_vision_text(analysis: &str) -> String {
    format!(
        "Architecture Diagram Analysis (vision model):\n\n{}\n\nNote: This description was produced by a vision model from an architecture diagram. Component placement and layout may carry additional context.",
        analysis.trim()
    )
}

pub fn format_ocr_text(recognized: &str) -> String {
    format!(
        "Architecture Diagram Analysis:\n\nComponents and Connections Identified:\n{}\n\nNote: This text was extracted from an architecture diagram using OCR. The structure and layout of components may provide additional context beyond the extracted text.",
        recognized.trim()
    )
}

pub fn diagram_prompt(system: &str, solution: &Solution) -> String {
    let components = &solution.technical_components;
    format!(
        r#"Generate a detailed zero trust architecture diagram for the recommended solution:

System: {system}

Approach: {approach}

Key Components to Visualize:

1. Identity & Authentication:
{identity}

2. Network Security:
{network}

3. Security Rationale:
{rationale}

Required Elements:
1. Authentication & Authorization Flow
2. Network Segmentation Boundaries
3. Data Encryption Points
4. Security Control Checkpoints
5. Trust Boundaries

Style Guidelines:
- Use clear visual separation between security zones
- Highlight authentication/authorization checkpoints
- Show data flow with encryption indicators
- Include security control labels
- Use a color scheme that emphasizes security boundaries
"#,
        approach = solution.approach,
        identity = bullet_lines(&components.identity_provider),
        network = bullet_lines(&components.network_architecture),
        rationale = components.security_rationale,
    )
}

fn bullet_lines(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<String>>()
        .join("\n")
}
