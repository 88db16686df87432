//! System prompt templates for the ReAct loop.

use ra_domain::config::ReActExample;
use ra_domain::ToolDefinition;

/// The default system prompt. `{tools}` and `{examples}` are substituted
/// at render time; a custom template may use the same placeholders.
pub const REACT_SYSTEM_PROMPT: &str = r#"You are a reasoning agent that solves tasks step by step.

You must respond using EXACTLY this format, one step at a time:

THOUGHT: <your reasoning about what to do next>
ACTION: <tool_name>(<arg>=<value>, ...)

or, when you know the answer:

THOUGHT: <your reasoning>
FINAL: <your final answer>

Rules:
- Keywords must be UPPERCASE and start the line.
- After an ACTION, stop and wait: the system replies with
  OBSERVATION: <tool result>. Never write OBSERVATION yourself.
- Call one tool per ACTION. Argument values are quoted strings,
  numbers, or true/false.
- When no tool helps, reason from what you know and give a FINAL answer.

Available tools:
{tools}
{examples}"#;

/// Render the system prompt: default or custom template, with the tool
/// catalog and few-shot examples substituted.
pub fn render_system_prompt(
    template: Option<&str>,
    tools: &[ToolDefinition],
    examples: &[ReActExample],
) -> String {
    let template = template.unwrap_or(REACT_SYSTEM_PROMPT);
    template
        .replace("{tools}", &render_tool_catalog(tools))
        .replace("{examples}", &render_examples(examples))
}

fn render_tool_catalog(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return "(none — answer from your own knowledge)".to_owned();
    }
    let mut out = String::new();
    for tool in tools {
        let params = serde_json::to_string(&tool.parameters).unwrap_or_else(|_| "{}".into());
        out.push_str(&format!(
            "- {}: {} Parameters: {}\n",
            tool.name, tool.description, params
        ));
    }
    out.trim_end().to_owned()
}

fn render_examples(examples: &[ReActExample]) -> String {
    if examples.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nExamples:\n");
    for example in examples {
        out.push_str(&format!("\nTask: {}\n{}\n", example.task, example.transcript));
    }
    out
}

/// The in-band repair prompt sent after a parse failure: echo the
/// malformed output and the error, then re-demonstrate the format.
pub fn self_correction_prompt(raw: &str, error: &str) -> String {
    format!(
        "Your last response could not be parsed.\n\
         Response: {raw}\n\
         Error: {error}\n\n\
         Respond again using exactly this format:\n\
         THOUGHT: <reasoning>\n\
         ACTION: tool_name(arg=\"value\")\n\
         or\n\
         THOUGHT: <reasoning>\n\
         FINAL: <answer>"
    )
}

/// The observation message injected after a successful tool call.
pub fn observation_message(text: &str) -> String {
    format!("OBSERVATION: {text}")
}

/// The observation body for a failed tool call: the error plus a
/// recovery hint. Wrapped by [`observation_message`] before injection.
pub fn tool_error_body(error: &str) -> String {
    format!(
        "tool error: {error}\n\
         Hint: try a different tool, adjust the arguments, or give a FINAL \
         answer from what you already know."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("does {name}"),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn default_prompt_lists_tools() {
        let prompt = render_system_prompt(None, &[tool("add"), tool("mul")], &[]);
        assert!(prompt.contains("- add: does add"));
        assert!(prompt.contains("- mul: does mul"));
        assert!(prompt.contains("THOUGHT:"));
        assert!(!prompt.contains("{tools}"));
        assert!(!prompt.contains("{examples}"));
    }

    #[test]
    fn empty_registry_renders_a_placeholder() {
        let prompt = render_system_prompt(None, &[], &[]);
        assert!(prompt.contains("(none"));
    }

    #[test]
    fn custom_template_keeps_placeholders_working() {
        let prompt = render_system_prompt(Some("Tools here: {tools}"), &[tool("add")], &[]);
        assert_eq!(prompt, "Tools here: - add: does add Parameters: {\"type\":\"object\"}");
    }

    #[test]
    fn examples_are_rendered_with_tasks() {
        let examples = vec![ReActExample {
            task: "add two numbers".into(),
            transcript: "THOUGHT: use add\nACTION: add(a=1, b=2)".into(),
        }];
        let prompt = render_system_prompt(None, &[], &examples);
        assert!(prompt.contains("Task: add two numbers"));
        assert!(prompt.contains("ACTION: add(a=1, b=2)"));
    }

    #[test]
    fn correction_prompt_echoes_the_failure() {
        let prompt = self_correction_prompt("I should add", "no keyword found");
        assert!(prompt.contains("I should add"));
        assert!(prompt.contains("no keyword found"));
        assert!(prompt.contains("FINAL:"));
    }
}
