use std::env;
use std::io::IsTerminal;

use anyhow::{bail, Context, Result};
use attendance_core_types::Credentials;
use dialoguer::{Input, Password};
use tracing::debug;

pub const IDENTIFIER_ENV: &str = "ATTENDANCE_IDENTIFIER";
pub const SECRET_ENV: &str = "ATTENDANCE_SECRET";

/// Reads the login pair from the environment, prompting for whatever is
/// missing when a terminal is attached. Held in memory only.
pub fn resolve_credentials() -> Result<Credentials> {
    let (identifier, secret) = from_lookup(|key| env::var(key).ok());
    if let (Some(identifier), Some(secret)) = (&identifier, &secret) {
        debug!(identifier = %identifier, "credentials taken from environment");
        return Ok(Credentials::new(identifier.clone(), secret.clone()));
    }

    if !std::io::stdin().is_terminal() {
        bail!("credentials missing: set {IDENTIFIER_ENV} and {SECRET_ENV}, or run in a terminal");
    }

    let identifier = match identifier {
        Some(value) => value,
        None => Input::<String>::new()
            .with_prompt("Employee ID")
            .interact_text()
            .context("Failed to read identifier")?,
    };
    let secret = match secret {
        Some(value) => value,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };
    Ok(Credentials::new(identifier.trim(), secret))
}

fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Option<String>, Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    (
        non_empty(IDENTIFIER_ENV).map(|value| value.trim().to_string()),
        non_empty(SECRET_ENV),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_both_values() {
        let (id, secret) = from_lookup(lookup(&[(IDENTIFIER_ENV, " 222534 "), (SECRET_ENV, " pw ")]));
        assert_eq!(id.as_deref(), Some("222534"));
        // Secrets are used verbatim.
        assert_eq!(secret.as_deref(), Some(" pw "));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let (id, secret) = from_lookup(lookup(&[(IDENTIFIER_ENV, "  ")]));
        assert_eq!(id, None);
        assert_eq!(secret, None);
    }
}
