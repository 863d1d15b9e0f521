//! Prompt Composer
//!
//! Deterministic prompt construction for section generation. Three
//! families: theory-opening (first section of a group), theory-continuation
//! (subsequent sections of a theory group), and tool (any position when the
//! subject is a tool). Pure functions of their inputs; identical inputs
//! yield identical prompts.

use courseforge_core::{Relation, Section, StructureType, SubjectType};

/// Everything a prompt needs to know about where a section sits
#[derive(Debug, Clone, Copy)]
pub struct SectionContext<'a> {
    /// Topic being taught
    pub subject: &'a str,
    /// Output language for the generated content
    pub language: &'a str,
    pub chapter_title: &'a str,
    pub group_title: &'a str,
    pub section: &'a Section,
}

impl<'a> SectionContext<'a> {
    fn breadcrumb(&self) -> String {
        format!(
            "{} / {} / {} / {}",
            self.subject, self.chapter_title, self.group_title, self.section.title
        )
    }

    fn design_block(&self) -> String {
        let mut block = format!("Primary goal: {}\n", self.section.primary_goal);
        if !self.section.suggested_modules.is_empty() {
            block.push_str(&format!(
                "Suggested modules: {}\n",
                self.section.suggested_modules.join(", ")
            ));
        }
        if !self.section.suggested_contents.is_empty() {
            block.push_str("Suggested contents:\n");
            for item in &self.section.suggested_contents {
                block.push_str(&format!("- {}\n", item));
            }
        }
        block
    }
}

/// Theory-opening prompt: the first section of a group lays the
/// groundwork for the whole chapter
pub fn theory_opening_prompt(
    ctx: &SectionContext,
    overview: &[String],
    previous_chapter_sections: &[String],
) -> String {
    let mut prompt = format!(
        "You are writing a tutorial about \"{}\" in {}.\n\
         Current position: {}\n\n\
         Write the full markdown content for the section \"{}\".\n{}",
        ctx.subject,
        ctx.language,
        ctx.breadcrumb(),
        ctx.section.title,
        ctx.design_block(),
    );

    if !overview.is_empty() {
        prompt.push_str("\nChapters already covered:\n");
        for title in overview {
            prompt.push_str(&format!("- {}\n", title));
        }
    }
    if !previous_chapter_sections.is_empty() {
        prompt.push_str("\nSections of the immediately previous chapter:\n");
        for title in previous_chapter_sections {
            prompt.push_str(&format!("- {}\n", title));
        }
    }

    prompt.push_str(
        "\nThis section opens a chapter: lay the conceptual groundwork the \
         rest of the chapter will build on, without assuming material that \
         has not been covered yet. Output markdown only.",
    );
    prompt
}

/// Theory-continuation prompt: later sections of a theory group receive
/// everything previously written in the group as prior context
pub fn theory_continuation_prompt(ctx: &SectionContext, prior_context: &str) -> String {
    let mut prompt = format!(
        "You are writing a tutorial about \"{}\" in {}.\n\
         Current position: {}\n\n\
         Write the full markdown content for the section \"{}\".\n{}",
        ctx.subject,
        ctx.language,
        ctx.breadcrumb(),
        ctx.section.title,
        ctx.design_block(),
    );

    prompt.push_str("\nContent already written in this group:\n\n---\n");
    prompt.push_str(prior_context);
    prompt.push_str(
        "\n---\n\nTransition naturally from the prior context. Do not repeat \
         material that is already covered; pick up where it left off. \
         Output markdown only.",
    );
    prompt
}

/// Tool prompt: used for every section when the subject is a tool.
/// The section design object is embedded verbatim as JSON.
pub fn tool_prompt(
    ctx: &SectionContext,
    structure: StructureType,
    prior_context: &str,
    parent: Option<(&str, Relation)>,
) -> String {
    let design = serde_json::to_string_pretty(&ctx.section.design_json())
        .unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "You are writing a hands-on tutorial about the tool \"{}\" in {}.\n\
         Current position: {}\n\n\
         Section design:\n```json\n{}\n```\n",
        ctx.subject,
        ctx.language,
        ctx.breadcrumb(),
        design,
    );

    match (structure, parent) {
        (StructureType::Pipeline, _) if !prior_context.is_empty() => {
            prompt.push_str("\nAlready written earlier in this sequence:\n\n---\n");
            prompt.push_str(prior_context);
            prompt.push_str(
                "\n---\n\nContinue the sequence from where the prior content \
                 stops. Output markdown only.",
            );
        }
        (_, Some((parent_draft, relation))) if !parent_draft.is_empty() => {
            prompt.push_str("\nParent section content:\n\n---\n");
            prompt.push_str(parent_draft);
            match relation {
                Relation::DeepDiveInto => prompt.push_str(
                    "\n---\n\nGo deeper into the parent section's topic: assume \
                     the reader has just read it and wants the details. \
                     Output markdown only.",
                ),
                _ => prompt.push_str(
                    "\n---\n\nAdvance from the parent section: build the next \
                     skill on top of what it established. Output markdown only.",
                ),
            }
        }
        _ => {
            prompt.push_str(
                "\nWrite a standalone teaching section that works on its own, \
                 with a concrete usage example. Output markdown only.",
            );
        }
    }
    prompt
}

/// Select the prompt family for one section.
///
/// `section_index` is the position within the group (0-based);
/// `prior_context` is the pipeline group context (empty for toolbox roots);
/// `parent` carries the index-predecessor draft for dependency-bearing
/// toolbox sections.
#[allow(clippy::too_many_arguments)]
pub fn compose_generation_prompt(
    subject_type: SubjectType,
    ctx: &SectionContext,
    structure: StructureType,
    section_index: usize,
    prior_context: &str,
    parent: Option<(&str, Relation)>,
    overview: &[String],
    previous_chapter_sections: &[String],
) -> String {
    match subject_type {
        SubjectType::Tool => tool_prompt(ctx, structure, prior_context, parent),
        SubjectType::Theory => {
            if section_index == 0 {
                theory_opening_prompt(ctx, overview, previous_chapter_sections)
            } else {
                // Toolbox theory sections fall back to the parent draft as context
                let context = if !prior_context.is_empty() {
                    prior_context
                } else {
                    parent.map(|(draft, _)| draft).unwrap_or("")
                };
                theory_continuation_prompt(ctx, context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(title: &str, relation: Relation) -> Section {
        Section {
            id: format!("t-sec-{}", title.to_lowercase()),
            title: title.to_string(),
            primary_goal: format!("Teach {}", title),
            suggested_modules: vec!["code_example".to_string()],
            suggested_contents: vec!["one bullet".to_string()],
            relation_to_previous: relation,
        }
    }

    fn ctx<'a>(section: &'a Section) -> SectionContext<'a> {
        SectionContext {
            subject: "Quantum Mechanics",
            language: "English",
            chapter_title: "Foundations",
            group_title: "Core ideas",
            section,
        }
    }

    #[test]
    fn test_opening_prompt_mentions_groundwork_and_overview() {
        let s = section("Wavefunctions", Relation::None);
        let prompt = theory_opening_prompt(
            &ctx(&s),
            &["Intro".to_string()],
            &["History".to_string()],
        );
        assert!(prompt.contains("opens a chapter"));
        assert!(prompt.contains("Chapters already covered:\n- Intro"));
        assert!(prompt.contains("previous chapter:\n- History"));
        assert!(prompt.contains("Teach Wavefunctions"));
    }

    #[test]
    fn test_opening_prompt_omits_empty_blocks() {
        let s = section("Wavefunctions", Relation::None);
        let prompt = theory_opening_prompt(&ctx(&s), &[], &[]);
        assert!(!prompt.contains("Chapters already covered"));
        assert!(!prompt.contains("previous chapter"));
    }

    #[test]
    fn test_continuation_prompt_embeds_prior_context() {
        let s = section("Superposition", Relation::BuildsOn);
        let prompt = theory_continuation_prompt(&ctx(&s), "DRAFT-OF-S1");
        assert!(prompt.contains("DRAFT-OF-S1"));
        assert!(prompt.contains("Transition naturally"));
        assert!(!prompt.contains("opens a chapter"));
    }

    #[test]
    fn test_tool_prompt_embeds_design_json() {
        let s = section("Init", Relation::None);
        let prompt = tool_prompt(&ctx(&s), StructureType::Toolbox, "", None);
        assert!(prompt.contains("\"primary_goal\": \"Teach Init\""));
        assert!(prompt.contains("standalone teaching section"));
    }

    #[test]
    fn test_tool_prompt_pipeline_prior_context() {
        let s = section("Commit", Relation::BuildsOn);
        let prompt = tool_prompt(&ctx(&s), StructureType::Pipeline, "INIT-DRAFT", None);
        assert!(prompt.contains("INIT-DRAFT"));
        assert!(prompt.contains("Continue the sequence"));
    }

    #[test]
    fn test_tool_prompt_toolbox_parent_variants() {
        let s = section("Rebase", Relation::DeepDiveInto);
        let deep = tool_prompt(
            &ctx(&s),
            StructureType::Toolbox,
            "",
            Some(("PARENT", Relation::DeepDiveInto)),
        );
        assert!(deep.contains("Go deeper"));
        assert!(deep.contains("PARENT"));

        let advance = tool_prompt(
            &ctx(&s),
            StructureType::Toolbox,
            "",
            Some(("PARENT", Relation::BuildsOn)),
        );
        assert!(advance.contains("Advance from the parent"));
    }

    #[test]
    fn test_selection_rule() {
        let s = section("Wavefunctions", Relation::None);
        let c = ctx(&s);

        // Tool subject always gets the tool family, even at index 0
        let p = compose_generation_prompt(
            SubjectType::Tool,
            &c,
            StructureType::Pipeline,
            0,
            "",
            None,
            &[],
            &[],
        );
        assert!(p.contains("Section design"));

        // Theory index 0 opens
        let p = compose_generation_prompt(
            SubjectType::Theory,
            &c,
            StructureType::Pipeline,
            0,
            "",
            None,
            &[],
            &[],
        );
        assert!(p.contains("opens a chapter"));

        // Theory index > 0 continues
        let p = compose_generation_prompt(
            SubjectType::Theory,
            &c,
            StructureType::Pipeline,
            1,
            "PRIOR",
            None,
            &[],
            &[],
        );
        assert!(p.contains("PRIOR"));
    }

    #[test]
    fn test_prompt_determinism() {
        let s = section("Superposition", Relation::BuildsOn);
        let a = theory_continuation_prompt(&ctx(&s), "CTX");
        let b = theory_continuation_prompt(&ctx(&s), "CTX");
        assert_eq!(a, b);
    }
}
