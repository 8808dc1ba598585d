use crate::actions::{ActionOutcome, ActionSummary, AggregateResult};

/// Reply when a plan produced no results at all.
pub const EMPTY_PLAN_REPLY: &str = "I'm having trouble with that right now. Please try again.";

/// Label for plans with more than one action.
pub const MULTI_ACTION_LABEL: &str = "multi_action";

/// Label when nothing ran.
pub const NO_ACTION_LABEL: &str = "none";

/// Reduces the outcomes of one plan into a single reply.
///
/// A single result passes through with its own reply text. Several results
/// are joined line by line in plan order and succeed only if all of them did.
#[must_use]
pub fn aggregate(outcomes: Vec<ActionOutcome>) -> AggregateResult {
    let per_action = outcomes
        .iter()
        .map(|outcome| ActionSummary {
            name: outcome.name.clone(),
            success: outcome.result.success,
        })
        .collect();

    match outcomes.as_slice() {
        [] => AggregateResult {
            success: false,
            combined_output: EMPTY_PLAN_REPLY.into(),
            label: NO_ACTION_LABEL.into(),
            per_action,
        },
        [single] => AggregateResult {
            success: single.result.success,
            combined_output: single.result.reply_text(),
            label: single.name.clone(),
            per_action,
        },
        many => AggregateResult {
            success: many.iter().all(|outcome| outcome.result.success),
            combined_output: many
                .iter()
                .map(|outcome| outcome.result.contributed_text())
                .collect::<Vec<_>>()
                .join("\n"),
            label: MULTI_ACTION_LABEL.into(),
            per_action,
        },
    }
}
