//! Prompt builder for deterministic model input.
//!
//! The template is split into marked sections. Required sections (output
//! contract, task) are always emitted unchanged. The prior-error section is
//! droppable: when the prompt would exceed its byte budget the error text
//! inside it is elided, and the whole section is dropped when too little room
//! remains. Its header and instructions are never cut.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

const CODEGEN_TEMPLATE: &str = include_str!("prompts/codegen.md");

/// Key of the droppable prior-error section.
const FAILURE_SECTION: &str = "failure";

/// Separator placed between rendered sections.
const SECTION_SEPARATOR: &str = "\n\n";

/// Below this many bytes of error text the failure section is dropped instead of elided.
const MIN_ERROR_BYTES: usize = 128;

/// Room reserved for the elision marker inside a shrunk section.
const ELISION_MARKER_BYTES: usize = 48;

/// Template engine wrapper around minijinja.
#[derive(Debug, Clone)]
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("codegen", CODEGEN_TEMPLATE)
            .context("compile codegen prompt template")?;
        Ok(Self { env })
    }

    fn render(&self, language: &str, entry_file: &str, task: &str, failure: Option<&str>) -> Result<String> {
        let template = self.env.get_template("codegen")?;
        let rendered = template.render(context! {
            language => language,
            entry_file => entry_file,
            task => task,
            failure => failure.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "task").
    key: String,
    /// Whether this section is required (never shrunk or dropped).
    required: bool,
    /// Section content including its header.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex is valid")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());

        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Length of the prompt `render_sections` would produce.
fn rendered_len(sections: &[ParsedSection]) -> usize {
    let content: usize = sections.iter().map(|s| s.content.len()).sum();
    content + SECTION_SEPARATOR.len() * sections.len().saturating_sub(1)
}

/// Keep the head and tail of `content`, replacing the middle with a marker.
///
/// Error output usually states the cause at the end and the context at the
/// start, so both ends are preserved.
fn elide_middle(content: &str, allowed: usize) -> String {
    if content.len() <= allowed {
        return content.to_string();
    }
    let keep = allowed.saturating_sub(ELISION_MARKER_BYTES);
    let head_end = floor_char_boundary(content, keep / 2);
    let tail_start = ceil_char_boundary(content, content.len() - (keep - keep / 2));
    format!(
        "{}\n[... {} bytes truncated ...]\n{}",
        &content[..head_end],
        tail_start - head_end,
        &content[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

/// Builds the code-generation prompt within a byte budget.
///
/// Output is a pure function of the builder settings and `build` arguments.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    engine: PromptEngine,
    language: String,
    entry_file: String,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(
        language: impl Into<String>,
        entry_file: impl Into<String>,
        budget_bytes: usize,
    ) -> Result<Self> {
        Ok(Self {
            engine: PromptEngine::new()?,
            language: language.into(),
            entry_file: entry_file.into(),
            budget_bytes,
        })
    }

    /// Build the prompt for `task`, splicing in `prior_error` when present.
    ///
    /// Required sections are kept even if they alone exceed the budget.
    pub fn build(&self, task: &str, prior_error: Option<&str>) -> Result<String> {
        let failure = prior_error.map(str::trim).filter(|s| !s.is_empty());
        let mut sections = self.sections(task, failure)?;
        let total = rendered_len(&sections);
        let budget = self.budget_bytes;

        let (Some(error), true) = (failure, total > budget) else {
            return Ok(render_sections(&sections));
        };
        let Some(idx) = sections
            .iter()
            .position(|s| s.key == FAILURE_SECTION && !s.required)
        else {
            return Ok(render_sections(&sections));
        };

        // Header and instructions around the error text, plus everything else.
        let frame = sections[idx].content.len().saturating_sub(error.len());
        let others = total - sections[idx].content.len();
        let allowed = budget.saturating_sub(others + frame);
        if allowed < MIN_ERROR_BYTES {
            debug!(
                section = FAILURE_SECTION,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
            return Ok(render_sections(&sections));
        }

        let elided = elide_middle(error, allowed);
        debug!(
            section = FAILURE_SECTION,
            before_len = error.len(),
            after_len = elided.len(),
            "elided error for budget"
        );
        let sections = self.sections(task, Some(&elided))?;
        Ok(render_sections(&sections))
    }

    fn sections(&self, task: &str, failure: Option<&str>) -> Result<Vec<ParsedSection>> {
        let rendered = self
            .engine
            .render(&self.language, &self.entry_file, task, failure)
            .context("render codegen prompt")?;
        Ok(parse_sections(&rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(budget: usize) -> PromptBuilder {
        PromptBuilder::new("Python", "main.py", budget).expect("builder")
    }

    #[test]
    fn first_attempt_has_no_failure_section() {
        let prompt = builder(10_000)
            .build("print the first ten primes", None)
            .expect("build");
        assert!(prompt.contains("print the first ten primes"));
        assert!(!prompt.contains("Previous Attempt Failed"));
    }

    #[test]
    fn prior_error_is_spliced_after_task() {
        let prompt = builder(10_000)
            .build("print hi", Some("NameError: x"))
            .expect("build");
        let task_pos = prompt.find("### Task").expect("task section");
        let failure_pos = prompt
            .find("previous attempt failed with error")
            .expect("failure section");
        assert!(task_pos < failure_pos);
        assert!(prompt.contains("NameError: x"));
    }

    #[test]
    fn blank_prior_error_is_ignored() {
        let prompt = builder(10_000).build("print hi", Some("  \n")).expect("build");
        assert!(!prompt.contains("<failure>"));
    }

    #[test]
    fn contract_forbids_prose_and_fences() {
        let prompt = builder(10_000).build("print hi", None).expect("build");
        let contract_pos = prompt.find("<contract>").expect("contract");
        let task_pos = prompt.find("<task>").expect("task");
        assert!(contract_pos < task_pos);
        assert!(prompt.contains("source code ONLY"));
        assert!(prompt.contains("no Markdown code fences"));
        assert!(prompt.contains("`main.py`"));
        assert!(prompt.contains("Python program"));
    }

    #[test]
    fn task_is_kept_verbatim() {
        let task = "  indented <tag> & \"quotes\"\nsecond line  ";
        let prompt = builder(10_000).build(task, None).expect("build");
        assert!(prompt.contains(task));
    }

    #[test]
    fn build_is_deterministic() {
        let b = builder(10_000);
        let first = b.build("sum 1..10", Some("E")).expect("build");
        let second = b.build("sum 1..10", Some("E")).expect("build");
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_error_is_elided_keeping_both_ends() {
        let error = format!("Traceback START\n{}\nValueError: END", "x".repeat(20_000));
        let prompt = builder(3_000).build("print hi", Some(&error)).expect("build");
        assert!(prompt.len() <= 3_000);
        assert!(prompt.contains("Traceback START"));
        assert!(prompt.contains("ValueError: END"));
        assert!(prompt.contains("bytes truncated"));
        assert!(prompt.contains("print hi"));
    }

    #[test]
    fn failure_is_dropped_when_no_room_remains() {
        let prompt = builder(100).build("print hi", Some("E")).expect("build");
        assert!(!prompt.contains("<failure>"));
        assert!(prompt.contains("<task>"));
        assert!(prompt.contains("<contract>"));
    }

    #[test]
    fn tight_budget_elides_error_but_keeps_failure_header() {
        let b = builder(10_000);
        let with_marker = b.build("print hi", Some("E")).expect("build");
        let budget = with_marker.len() - 1 + 132;
        let error = format!("Traceback START\n{}\nValueError: END", "y".repeat(2_000));

        let prompt = builder(budget).build("print hi", Some(&error)).expect("build");

        assert!(prompt.len() <= budget, "len {} > budget {budget}", prompt.len());
        assert!(prompt.contains("### Previous Attempt Failed"));
        assert!(prompt.contains("The previous attempt failed with error:\nTraceback START"));
        assert!(prompt.contains("ValueError: END\n\nFix the cause of this error"));
        assert!(prompt.contains("bytes truncated"));
        assert!(prompt.ends_with("</failure>"));
    }

    #[test]
    fn rendered_prompt_never_exceeds_budget_when_error_present() {
        let base = builder(10_000).build("print hi", None).expect("build").len();
        let error = "z".repeat(2_000);
        for budget in base..base + 600 {
            let prompt = builder(budget).build("print hi", Some(&error)).expect("build");
            assert!(
                prompt.len() <= budget,
                "budget {budget}: prompt is {} bytes",
                prompt.len()
            );
        }
    }

    #[test]
    fn failure_section_is_whole_or_absent() {
        let base = builder(10_000).build("print hi", None).expect("build").len();
        let error = "w".repeat(2_000);
        for budget in base..base + 600 {
            let prompt = builder(budget).build("print hi", Some(&error)).expect("build");
            if prompt.contains("<failure>") {
                assert!(prompt.contains("previous attempt failed with error:"));
                assert!(prompt.contains("return the complete corrected program."));
            } else {
                assert!(!prompt.contains("Previous Attempt Failed"));
            }
        }
    }

    #[test]
    fn elide_middle_respects_char_boundaries() {
        let content = "é".repeat(500);
        let shrunk = elide_middle(&content, 200);
        assert!(shrunk.len() <= 200);
        assert!(shrunk.starts_with('é'));
        assert!(shrunk.ends_with('é'));
    }
}
