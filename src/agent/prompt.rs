//! System prompts pinned at the start of sessions

use std::path::Path;

/// Prompt for a child session.
///
/// `can_spawn` is false once the child sits at the maximum spawn depth.
pub fn subagent_prompt(task: &str, workspace: &Path, tools: &[String], can_spawn: bool) -> String {
    let tool_list = if tools.is_empty() {
        "none".to_string()
    } else {
        tools.join(", ")
    };
    let spawn_rule = if can_spawn {
        "- Spawn further subagents only for clearly separable parts of the task"
    } else {
        "- Spawn other subagents"
    };
    let (can, cannot) = if can_spawn {
        (format!("\n{}", spawn_rule), String::new())
    } else {
        (String::new(), format!("\n{}", spawn_rule))
    };

    format!(
        "# Subagent

You are a subagent spawned by another agent to complete a specific task.

## Your Task
{task}

## Rules
1. Stay focused: complete only the assigned task
2. Your final response is reported back to the agent that spawned you
3. Be concise but include every finding the parent needs

## What You Can Do
- Use these tools: {tool_list}{can}

## What You Cannot Do
- Talk to the user directly
- See the parent's conversation beyond what is included below{cannot}

## Workspace
Your workspace is at: {workspace}

When you have completed the task, reply with a clear summary of your findings or actions.",
        task = task,
        tool_list = tool_list,
        can = can,
        cannot = cannot,
        workspace = workspace.display(),
    )
}
