// src/core/provider/cli.rs

//! Wrapper around the external migration CLI. The core treats the binary as
//! opaque: "accept arguments, return exit code + output streams, emit a
//! migration identifier on success." Identifier extraction and the
//! target-collision signature live here because both are pure functions of
//! the captured output, not of the subprocess contract itself.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::debug;

use crate::core::errors::{ControllerError, Result};

/// The substring the Migration Worker looks for to decide whether an
/// enqueue failure is the known-retriable "target already has this repo"
/// case.
pub const TARGET_COLLISION_SIGNATURE: &str = "already contains a repository with the name";

/// Ordered, first-match-wins patterns for extracting a migration id from
/// the CLI's combined stdout+stderr. New provider CLI versions may emit a
/// different shape; append here rather than replacing an existing pattern.
static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)migration id:\s*(\d+)").unwrap(),
        Regex::new(r"(?i)queued migration id:\s*(\d+)").unwrap(),
        Regex::new(r"\(ID:\s*([RM_0-9A-Za-z]+)\)").unwrap(),
        Regex::new(r"(?i)\bid:\s*(\d+)").unwrap(),
    ]
});

/// The result of one CLI invocation: exit status plus combined output, with
/// no interpretation applied.
#[derive(Clone, Debug)]
pub struct CliOutcome {
    pub exit_code: i32,
    pub combined_output: String,
}

impl CliOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_target_collision(&self) -> bool {
        self.combined_output.contains(TARGET_COLLISION_SIGNATURE)
    }
}

/// Invokes the migration CLI binary with `args`, passing `env` as additional
/// per-call variables (credentials) layered on top of the controller's own
/// environment. Never inspects `args`/`env` beyond passing them through.
pub async fn enqueue(
    binary_path: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<CliOutcome> {
    let mut command = Command::new(binary_path);
    command.args(args).envs(env);
    debug!(binary = binary_path, argc = args.len(), "invoking migration CLI");

    let output = command
        .output()
        .await
        .map_err(|e| ControllerError::Internal(format!("failed to spawn migration CLI: {e}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CliOutcome {
        exit_code: output.status.code().unwrap_or(-1),
        combined_output: combined,
    })
}

/// Tries each pattern in [`ID_PATTERNS`] in order against `output`,
/// returning the first capture group matched.
pub fn extract_migration_id(output: &str) -> Option<String> {
    ID_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(output))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_migration_id_lowercase() {
        assert_eq!(
            extract_migration_id("starting job\nmigration id: 4242\ndone"),
            Some("4242".to_string())
        );
    }

    #[test]
    fn extracts_queued_migration_id_before_plain_id() {
        assert_eq!(
            extract_migration_id("queued migration id: 99\nid: 1"),
            Some("99".to_string())
        );
    }

    #[test]
    fn extracts_parenthesized_token_id() {
        assert_eq!(
            extract_migration_id("job accepted (ID: RM_9f8e)"),
            Some("RM_9f8e".to_string())
        );
    }

    #[test]
    fn extracts_plain_id_as_last_resort() {
        assert_eq!(extract_migration_id("job accepted\nid: 777"), Some("777".to_string()));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(extract_migration_id("unrecognized output"), None);
    }

    #[test]
    fn detects_target_collision_signature() {
        let outcome = CliOutcome {
            exit_code: 1,
            combined_output: "error: target already contains a repository with the name acme/widgets".into(),
        };
        assert!(outcome.is_target_collision());
        assert!(!outcome.succeeded());
    }

    #[test]
    fn success_outcome_has_zero_exit_code() {
        let outcome = CliOutcome {
            exit_code: 0,
            combined_output: "migration id: 1".into(),
        };
        assert!(outcome.succeeded());
    }
}
