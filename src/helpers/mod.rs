pub mod command;
pub mod fzf_invoker;
pub mod remote;
pub mod status;
pub mod units;

use self::fzf_invoker::FzfInvoker;
use crate::error::{IoContext, ProvisionError};

/// Wrapper around the `termenu` picker that keeps the UX consistent across the
/// project. The helper converts the supplied items into `String`s so callers do
/// not have to worry about ownership.
pub fn choose_one<S: ToString>(title: &str, items: Vec<S>) -> Result<String, ProvisionError> {
    let display_items: Vec<String> = items.into_iter().map(|s| s.to_string()).collect();
    let picker = FzfInvoker::new(title.to_string(), display_items);
    picker
        .invoke()
        .io_context(|| "interactive menu")?
        .ok_or_else(|| ProvisionError::InvalidInput("No selection made".to_string()))
}

/// Ask a yes/no question through the picker. Cancelling counts as "no".
pub fn confirm(question: &str) -> Result<bool, ProvisionError> {
    match choose_one(question, vec!["No", "Yes"]) {
        Ok(answer) => Ok(answer == "Yes"),
        Err(ProvisionError::InvalidInput(_)) => Ok(false),
        Err(err) => Err(err),
    }
}
