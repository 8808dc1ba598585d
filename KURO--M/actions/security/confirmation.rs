use crate::{actions::Arguments, arguments::flag};

/// Argument an irreversible action must carry set to true.
pub const CONFIRMATION_ARGUMENT: &str = "confirmed";

/// Whether the arguments carry an explicit confirmation (`true`, `"true"` or
/// `"yes"`).
#[must_use]
pub fn is_confirmed(arguments: &Arguments) -> bool {
    flag(arguments, CONFIRMATION_ARGUMENT)
}

/// Sentence asking the user to confirm `what`.
#[must_use]
pub fn confirmation_prompt(what: &str) -> String {
    format!("Are you sure you want me to {what}? Say so explicitly and I'll go ahead.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_explicit_true_confirms() {
        let yes = json!({ "confirmed": "yes" }).as_object().cloned().unwrap();
        let no = json!({ "confirmed": "maybe" }).as_object().cloned().unwrap();
        assert!(is_confirmed(&yes));
        assert!(!is_confirmed(&no));
        assert!(!is_confirmed(&Arguments::new()));
    }
}
