// System Prompt Builder
//
// Constructs the system preamble sent at the head of every request:
// - Defines the consultant role
// - Adds guidance for the conversation's current phase
// - Lists the rules the model must follow
// - Optionally names the project being discussed

use crate::models::ConversationPhase;

/// Builder for constructing structured system prompts
pub struct SystemPromptBuilder {
    /// Role and identity section
    role_section: String,
    /// Phase the conversation is in
    phase: ConversationPhase,
    /// Constraints and rules
    constraints: Vec<String>,
    /// Project reference, if known
    project_id: Option<String>,
}

impl SystemPromptBuilder {
    /// Create a new SystemPromptBuilder for a phase with default sections
    pub fn new(phase: ConversationPhase) -> Self {
        Self {
            role_section: Self::default_role_section(),
            phase,
            constraints: Self::default_constraints(),
            project_id: None,
        }
    }

    /// Set the role section
    pub fn with_role(mut self, role: String) -> Self {
        self.role_section = role;
        self
    }

    /// Set the project reference
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Add a constraint
    pub fn add_constraint(mut self, constraint: String) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Build the complete system prompt
    pub fn build(&self) -> String {
        let mut sections = vec![self.role_section.clone()];

        if let Some(ref project_id) = self.project_id {
            sections.push(format!("## Project\n\n- **Project ID**: `{}`", project_id));
        }

        sections.push(format!(
            "## Current Phase: {}\n\n{}",
            Self::phase_title(self.phase),
            Self::phase_guidance(self.phase)
        ));

        if !self.constraints.is_empty() {
            sections.push(format!(
                "## Important Rules\n\n{}",
                self.constraints
                    .iter()
                    .map(|c| format!("- {}", c))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        sections.join("\n\n")
    }

    // =========================================================================
    // Default sections
    // =========================================================================

    fn default_role_section() -> String {
        "You are SpecMaker, a senior software consultant. You help the user turn a rough \
         product idea into precise written documents: a requirements specification, a \
         technical specification and an implementation plan."
            .to_string()
    }

    fn phase_title(phase: ConversationPhase) -> &'static str {
        match phase {
            ConversationPhase::InitialAnalysis => "Initial Analysis",
            ConversationPhase::Consultation => "Consultation",
            ConversationPhase::ContextBuilding => "Context Building",
            ConversationPhase::Generation => "Document Generation",
            ConversationPhase::Refinement => "Refinement",
        }
    }

    fn phase_guidance(phase: ConversationPhase) -> &'static str {
        match phase {
            ConversationPhase::InitialAnalysis => {
                "Read the user's description carefully. Restate the core idea in one or two \
                 sentences, identify the target users, and list the most important open \
                 questions you need answered before a specification can be written."
            }
            ConversationPhase::Consultation => {
                "Ask focused follow-up questions, a few at a time. Explore functional \
                 requirements, non-functional requirements and constraints. Suggest sensible \
                 defaults when the user is unsure and record every decision explicitly."
            }
            ConversationPhase::ContextBuilding => {
                "Consolidate what has been agreed. Summarize requirements, technical decisions \
                 and constraints as structured lists and ask the user to confirm or correct \
                 them before any document is generated."
            }
            ConversationPhase::Generation => {
                "Write the requested document in Markdown with clear headings. Base it only on \
                 requirements and decisions established in the conversation; mark anything \
                 still undecided as an open question."
            }
            ConversationPhase::Refinement => {
                "Apply the user's feedback to the existing documents. Change only what was \
                 asked, keep the structure stable and point out any inconsistency the change \
                 introduces."
            }
        }
    }

    fn default_constraints() -> Vec<String> {
        vec![
            "Only use facts the user stated or explicitly agreed to; never invent requirements."
                .to_string(),
            "A summary of earlier conversation may precede the recent messages. Treat it as \
             established context."
                .to_string(),
            "Keep answers concise and use Markdown lists for enumerations.".to_string(),
        ]
    }
}

/// Build the system preamble for a phase
pub fn build_system_prompt(phase: ConversationPhase) -> String {
    SystemPromptBuilder::new(phase).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_system_prompt_basic() {
        let prompt = build_system_prompt(ConversationPhase::InitialAnalysis);

        assert!(prompt.starts_with("You are SpecMaker"));
        assert!(prompt.contains("## Current Phase: Initial Analysis"));
        assert!(prompt.contains("## Important Rules"));
        assert!(!prompt.contains("## Project"));
    }

    #[test]
    fn test_phase_guidance_differs() {
        let consultation = build_system_prompt(ConversationPhase::Consultation);
        let generation = build_system_prompt(ConversationPhase::Generation);

        assert!(consultation.contains("follow-up questions"));
        assert!(generation.contains("Markdown with clear headings"));
        assert_ne!(consultation, generation);
    }

    #[test]
    fn test_builder_options() {
        let prompt = SystemPromptBuilder::new(ConversationPhase::Refinement)
            .with_role("You are a reviewer.".to_string())
            .with_project("project-42")
            .add_constraint("Answer in English.".to_string())
            .build();

        assert!(prompt.starts_with("You are a reviewer."));
        assert!(prompt.contains("`project-42`"));
        assert!(prompt.contains("- Answer in English."));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        assert_eq!(
            build_system_prompt(ConversationPhase::ContextBuilding),
            build_system_prompt(ConversationPhase::ContextBuilding)
        );
    }
}
