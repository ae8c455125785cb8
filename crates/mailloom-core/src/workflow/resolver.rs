//! Placeholder reference resolution and save-time prompt validation.
//!
//! Prompts reference prior data with `<<…>>` placeholders. Two families are
//! recognized:
//!
//! - Built-in dynamic values: `<<CURRENT_DATE>>` (UTC) and
//!   `<<CURRENT_DATE.{timezone}>>` (IANA zone, UTC fallback on unknown zones).
//! - Step outputs: `<<trigger_output>>` and
//!   `<<step_output.{step_definition_uuid}>>`.
//!
//! Resolution is a single textual pass. Unknown placeholders are preserved
//! verbatim so a downstream step fails naturally instead of the runner. The
//! save-time validator is stricter: every placeholder must match a known form
//! and every referenced step must precede the owning step.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::Utc;
use chrono_tz::Tz;
use regex::{Captures, Regex};
use uuid::Uuid;

use mailloom_types::workflow::{
    ReferenceIssue, ReferenceIssueCode, StepKind, StepOutputData, WorkflowDetails,
    WorkflowInstance,
};

/// Key under which trigger data is indexed and referenced in prompts.
pub const TRIGGER_OUTPUT_KEY: &str = "trigger_output";

const STEP_OUTPUT_PREFIX: &str = "step_output.";
const CURRENT_DATE: &str = "CURRENT_DATE";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<<(.*?)>>").unwrap_or_else(|_| unreachable!()))
}

// ---------------------------------------------------------------------------
// Output index
// ---------------------------------------------------------------------------

/// The step outputs visible to a step at the moment it is about to run,
/// keyed by `trigger_output` or by step definition UUID.
#[derive(Debug, Default, Clone)]
pub struct OutputIndex {
    outputs: HashMap<String, StepOutputData>,
}

impl OutputIndex {
    /// Build the index from an instance: trigger output plus every prior
    /// step instance's output. Stop-checker instances never contribute.
    pub fn from_instance(instance: &WorkflowInstance) -> Self {
        let mut outputs = HashMap::new();
        if let Some(trigger_output) = &instance.trigger_output {
            outputs.insert(TRIGGER_OUTPUT_KEY.to_string(), trigger_output.clone());
        }
        for step_instance in &instance.step_instances {
            if step_instance.kind == StepKind::StopChecker {
                continue;
            }
            if let Some(output) = &step_instance.output {
                outputs.insert(step_instance.step_definition_uuid.to_string(), output.clone());
            }
        }
        Self { outputs }
    }

    pub fn get(&self, key: &str) -> Option<&StepOutputData> {
        self.outputs.get(key)
    }

    pub fn get_by_step(&self, step_uuid: &Uuid) -> Option<&StepOutputData> {
        self.outputs.get(&step_uuid.to_string())
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve every `<<…>>` placeholder in `prompt` against `outputs`.
///
/// Single pass; placeholders inside resolved content are not themselves
/// resolved. Unknown or malformed placeholders are left verbatim.
pub fn resolve_references(prompt: &str, outputs: &OutputIndex) -> String {
    placeholder_re()
        .replace_all(prompt, |caps: &Captures<'_>| {
            let placeholder = caps[1].trim().to_string();
            resolve_one(&placeholder, outputs)
                .unwrap_or_else(|| format!("<<{placeholder}>>"))
        })
        .into_owned()
}

fn resolve_one(placeholder: &str, outputs: &OutputIndex) -> Option<String> {
    if placeholder == CURRENT_DATE || placeholder.starts_with("CURRENT_DATE.") {
        return Some(resolve_current_date(placeholder));
    }

    let lookup_key = match placeholder.strip_prefix(STEP_OUTPUT_PREFIX) {
        Some(suffix) if !suffix.is_empty() => suffix,
        Some(_) => {
            tracing::warn!(placeholder, "malformed step_output placeholder, leaving verbatim");
            return None;
        }
        None => placeholder,
    };

    match outputs.get(lookup_key) {
        Some(output) => Some(output.markdown_representation.clone()),
        None => {
            tracing::warn!(
                placeholder,
                lookup_key,
                "no data for placeholder, leaving verbatim"
            );
            None
        }
    }
}

/// Today's date as `YYYY-MM-DD` in the named zone, UTC when no zone is given
/// or the zone is unknown.
fn resolve_current_date(placeholder: &str) -> String {
    let zone = placeholder
        .split_once('.')
        .map(|(_, tz)| tz)
        .unwrap_or("UTC");

    match Tz::from_str(zone) {
        Ok(tz) => Utc::now().with_timezone(&tz).format("%Y-%m-%d").to_string(),
        Err(_) => {
            tracing::warn!(zone, "unknown timezone, falling back to UTC");
            Utc::now().format("%Y-%m-%d").to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Save-time validation
// ---------------------------------------------------------------------------

/// Validate every `<<…>>` reference in a prompt being saved.
///
/// `owning_step` is the step the prompt belongs to; step references must
/// point at steps that precede it in the workflow. For a step not yet in the
/// workflow (a new step about to be appended) every existing step is a valid
/// reference target.
pub fn validate_prompt_references(
    prompt: &str,
    details: &WorkflowDetails,
    owning_step: &Uuid,
) -> Result<(), Vec<ReferenceIssue>> {
    let mut issues = Vec::new();

    let preceding: Vec<Uuid> = match details.workflow.steps.iter().position(|s| s == owning_step) {
        Some(index) => details.workflow.steps[..index].to_vec(),
        None => details.workflow.steps.clone(),
    };

    for caps in placeholder_re().captures_iter(prompt) {
        let reference = caps[1].trim().to_string();
        let mut parts = reference.splitn(2, '.');
        let base = parts.next().unwrap_or_default();
        let suffix = parts.next();

        match base {
            CURRENT_DATE => {
                // `CURRENT_DATE` or `CURRENT_DATE.{zone}`; unknown zones fall
                // back to UTC at run time, so any single suffix is accepted.
                if suffix.is_some_and(str::is_empty) {
                    issues.push(ReferenceIssue {
                        placeholder: reference.clone(),
                        code: ReferenceIssueCode::Malformed,
                        detail: "correct format is <<CURRENT_DATE.TIMEZONE>>".to_string(),
                    });
                }
            }
            TRIGGER_OUTPUT_KEY => {
                if suffix.is_some() {
                    issues.push(ReferenceIssue {
                        placeholder: reference.clone(),
                        code: ReferenceIssueCode::Malformed,
                        detail: "did you mean <<trigger_output>>?".to_string(),
                    });
                }
            }
            "step_output" => match suffix {
                None | Some("") => {
                    issues.push(ReferenceIssue {
                        placeholder: reference.clone(),
                        code: ReferenceIssueCode::Malformed,
                        detail: "correct format is <<step_output.STEP_UUID>>".to_string(),
                    });
                }
                Some(uuid_str) => match Uuid::parse_str(uuid_str) {
                    Err(_) => {
                        issues.push(ReferenceIssue {
                            placeholder: reference.clone(),
                            code: ReferenceIssueCode::BadUuid,
                            detail: format!("'{uuid_str}' is not a valid UUID"),
                        });
                    }
                    Ok(step_uuid) if !preceding.contains(&step_uuid) => {
                        issues.push(ReferenceIssue {
                            placeholder: reference.clone(),
                            code: ReferenceIssueCode::NonPrecedingStep,
                            detail: format!(
                                "step '{step_uuid}' is not a valid preceding step"
                            ),
                        });
                    }
                    Ok(_) => {}
                },
            },
            _ => {
                issues.push(ReferenceIssue {
                    placeholder: reference.clone(),
                    code: ReferenceIssueCode::UnknownBase,
                    detail: "references must start with 'trigger_output', 'step_output' \
                             or 'CURRENT_DATE'"
                        .to_string(),
                });
            }
        }
    }

    if issues.is_empty() { Ok(()) } else { Err(issues) }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
