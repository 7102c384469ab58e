//! Prompts handed to the agent

use std::path::Path;

use crate::agents::{Classification, ErrorPattern, RetryContext};
use crate::models::Task;

/// Everything the task prompt needs to know about where the agent runs
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub workspace: &'a Path,
    pub branch: &'a str,
    pub base_branch: &'a str,
    pub status_endpoint: &'a str,
}

pub fn build_task_prompt(ctx: &PromptContext<'_>) -> String {
    let task = ctx.task;
    let description = if task.description.trim().is_empty() {
        "(no description provided; infer the intent from the title)"
    } else {
        task.description.trim()
    };

    let mut prompt = format!(
        "# Task {id}: {title}\n\n\
         ## Description\n{description}\n\n\
         ## Workspace\n\
         - Working directory: {workspace}\n\
         - Branch: {branch} (based on {base})\n",
        id = task.id,
        title = task.title,
        description = description,
        workspace = ctx.workspace.display(),
        branch = ctx.branch,
        base = ctx.base_branch,
    );

    if !task.file_paths.is_empty() {
        prompt.push_str("- Files likely involved:\n");
        for path in &task.file_paths {
            prompt.push_str(&format!("  - {}\n", path));
        }
    }

    prompt.push_str(&format!(
        "\n## Rules\n\
         1. Implement the task completely. No placeholders, stubs or TODO markers in place of real code.\n\
         2. Run the relevant build and tests yourself and fix what fails before finishing.\n\
         3. Commit your work on `{branch}` and push it: `git push -u origin {branch}`.\n\
         4. Report your status when you finish or get blocked:\n   \
            `curl -s -X POST {endpoint} -H 'Content-Type: application/json' -d {body}`\n\
         5. Stay inside the working directory above.\n",
        branch = ctx.branch,
        endpoint = ctx.status_endpoint,
        body = shell_single_quote(&status_report_body(&task.id)),
    ));

    prompt
}

/// JSON body of the status report the agent posts back
fn status_report_body(task_id: &str) -> String {
    serde_json::json!({
        "taskId": task_id,
        "status": "<done|blocked>",
        "summary": "...",
    })
    .to_string()
}

fn shell_single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Prompt for the next attempt after a failure
pub fn build_retry_prompt(
    base_prompt: &str,
    ctx: &RetryContext,
    classification: &Classification,
) -> String {
    let error = ctx
        .previous_error
        .as_deref()
        .unwrap_or("the previous attempt did not finish successfully");

    let guidance = match classification.pattern {
        ErrorPattern::PlanStuck => {
            "You got stuck planning instead of working. Do not write another plan. \
             Pick the smallest concrete change that moves the task forward, make it, \
             commit it, and continue from there."
        }
        ErrorPattern::Timeout => {
            "The previous attempt ran out of time. Work in smaller steps and commit \
             after each one so progress is not lost."
        }
        ErrorPattern::BuildFailure => {
            "The build was failing. Fix the compilation errors first, then continue."
        }
        ErrorPattern::TestFailure => {
            "Tests were failing. Make them pass without weakening or deleting them."
        }
        _ => "Review what went wrong, then continue the task.",
    };

    format!(
        "{base}\n\n## Retry {attempt} of {max}\n\
         Previous attempt failed ({pattern}): {error}\n\n{guidance}\n",
        base = base_prompt,
        attempt = ctx.attempt.saturating_sub(1),
        max = ctx.max_retries,
        pattern = classification.pattern,
        error = error,
        guidance = guidance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        let mut t = Task::new("t-1", "feat(api): add endpoint");
        t.description = "Add GET /health".to_string();
        t.file_paths = vec!["src/api.rs".to_string()];
        t
    }

    #[test]
    fn test_task_prompt_contents() {
        let task = task();
        let prompt = build_task_prompt(&PromptContext {
            task: &task,
            workspace: Path::new("/repo/.worktrees/tasks/t-1"),
            branch: "task/t1-add-endpoint",
            base_branch: "main",
            status_endpoint: "http://127.0.0.1:3420/api/tasks/status",
        });
        assert!(prompt.contains("Add GET /health"));
        assert!(prompt.contains("/repo/.worktrees/tasks/t-1"));
        assert!(prompt.contains("git push -u origin task/t1-add-endpoint"));
        assert!(prompt.contains("http://127.0.0.1:3420/api/tasks/status"));
        assert!(prompt.contains("No placeholders"));
        assert!(prompt.contains("src/api.rs"));
        assert!(prompt.contains(r#""taskId":"t-1""#));
    }

    #[test]
    fn test_status_report_survives_quotes_in_task_id() {
        let id = r#"it's "quoted""#;
        let body: serde_json::Value = serde_json::from_str(&status_report_body(id)).unwrap();
        assert_eq!(body["taskId"], id);

        let task = Task::new(id, "feat: quoting");
        let prompt = build_task_prompt(&PromptContext {
            task: &task,
            workspace: Path::new("/repo"),
            branch: "task/x",
            base_branch: "main",
            status_endpoint: "http://127.0.0.1:3420/api/tasks/status",
        });
        assert!(prompt.contains(r#""taskId":"it'\''s \"quoted\"""#));
    }

    #[test]
    fn test_retry_prompt_plan_stuck_differs() {
        let ctx = RetryContext {
            task_key: "task:t-1".to_string(),
            attempt: 2,
            max_retries: 2,
            previous_error: Some("stuck in planning loop".to_string()),
            previous_output: String::new(),
        };
        let stuck = build_retry_prompt(
            "BASE",
            &ctx,
            &Classification {
                pattern: ErrorPattern::PlanStuck,
                confidence: 0.9,
            },
        );
        let generic = build_retry_prompt("BASE", &ctx, &Classification::unknown());

        assert!(stuck.starts_with("BASE"));
        assert!(stuck.contains("Do not write another plan"));
        assert!(!generic.contains("Do not write another plan"));
        assert!(stuck.contains("Retry 1 of 2"));
    }
}
