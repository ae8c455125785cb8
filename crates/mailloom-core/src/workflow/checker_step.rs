//! Stop-checker step evaluation.
//!
//! A checker inspects the markdown output of a designated prior step and
//! decides whether the workflow should stop. It always returns a
//! [`CheckerResult`] and never produces a `StepOutputData`.

use mailloom_types::workflow::{CheckerMode, CheckerResult};
use uuid::Uuid;

use super::resolver::OutputIndex;

/// Evaluate a stop-checker against the outputs available to it.
///
/// Decision table:
///
/// | check_mode                 | matched | should_stop |
/// |----------------------------|---------|-------------|
/// | stop_if_output_contains    | true    | true        |
/// | stop_if_output_contains    | false   | false       |
/// | continue_if_output_contains| true    | false       |
/// | continue_if_output_contains| false   | true        |
pub fn evaluate_checker(
    step_name: &str,
    step_to_check_uuid: Option<&Uuid>,
    check_mode: CheckerMode,
    match_values: &[String],
    outputs: &OutputIndex,
) -> CheckerResult {
    let Some(step_uuid) = step_to_check_uuid else {
        let reason = "checker has no step_to_check_uuid configured; not stopping".to_string();
        tracing::warn!(checker = step_name, "{reason}");
        return CheckerResult {
            should_stop: false,
            reason,
            evaluated_input: String::new(),
        };
    };

    let Some(source_output) = outputs.get_by_step(step_uuid) else {
        let reason = format!("checker could not find output for step {step_uuid}; not stopping");
        tracing::warn!(checker = step_name, "{reason}");
        return CheckerResult {
            should_stop: false,
            reason,
            evaluated_input: String::new(),
        };
    };

    let evaluated_input = source_output.markdown_representation.to_lowercase();
    let matched = match_values
        .iter()
        .any(|value| evaluated_input.contains(&value.to_lowercase()));

    tracing::info!(
        checker = step_name,
        mode = ?check_mode,
        matched,
        "checker evaluated"
    );

    let (should_stop, reason) = match (check_mode, matched) {
        (CheckerMode::StopIfOutputContains, true) => (
            true,
            format!("stopping workflow: a match was found for one of {match_values:?}"),
        ),
        (CheckerMode::StopIfOutputContains, false) => {
            (false, "not stopping workflow: no match was found".to_string())
        }
        (CheckerMode::ContinueIfOutputContains, true) => {
            (false, "not stopping workflow: a match was found".to_string())
        }
        (CheckerMode::ContinueIfOutputContains, false) => (
            true,
            format!("stopping workflow: no match was found for any of {match_values:?}"),
        ),
    };

    CheckerResult {
        should_stop,
        reason,
        evaluated_input,
    }
}
