//! Command Validation
//!
//! Pure validation of LLM-generated ImageMagick command lines. The validator
//! never performs I/O and never spawns a process; it tokenizes a candidate
//! string, evaluates a fixed set of checks, and returns a verdict whose
//! diagnostic record is fully populated whether the candidate passes or not.
//!
//! # Security Principles
//!
//! 1. **Whitelist Only**: the leading token must name a known ImageMagick
//!    program, fail closed on everything else
//! 2. **Whole-Token Deny List**: dangerous flags are matched as whole tokens,
//!    never substrings, so a flag name inside a benign value neither trips
//!    nor evades the check
//! 3. **Raw Metacharacter Scan**: shell metacharacters are scanned over the
//!    raw string, because metacharacters are what would smuggle a second
//!    command past the token-level checks
//! 4. **Output Path Normalization**: directory components of the trailing
//!    output argument are stripped so writes always land in the working
//!    directory

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Immutable validation rule set.
///
/// Constructed once at startup and passed into the validator explicitly, so
/// concurrent callers and tests can use distinct rule sets without touching
/// shared state.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Program names accepted as the leading token (after path stripping)
    allowed_programs: BTreeSet<String>,

    /// Flags rejected as whole tokens
    denied_flags: BTreeSet<String>,

    /// Characters rejected anywhere in the raw candidate string
    metacharacters: Vec<char>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::imagemagick()
    }
}

impl RuleSet {
    /// The ImageMagick rule set: the unified `magick` entry point, the legacy
    /// converter, and its companion utilities. The deny list covers embedded
    /// script execution (`-script`), arbitrary file writes (`-write`), and
    /// `@file` argument indirection.
    pub fn imagemagick() -> Self {
        Self::new(
            ["magick", "convert", "identify", "mogrify", "composite"],
            ["-script", "-write"],
            vec![';', '|', '&', '$', '`', '(', ')'],
        )
    }

    /// Build a custom rule set.
    pub fn new<P, F>(allowed_programs: P, denied_flags: F, metacharacters: Vec<char>) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            allowed_programs: allowed_programs.into_iter().map(Into::into).collect(),
            denied_flags: denied_flags.into_iter().map(Into::into).collect(),
            metacharacters,
        }
    }

    /// Check whether a program name (already path-stripped) is allowed.
    pub fn is_allowed_program(&self, name: &str) -> bool {
        self.allowed_programs.contains(name)
    }

    pub fn allowed_programs(&self) -> impl Iterator<Item = &str> {
        self.allowed_programs.iter().map(String::as_str)
    }
}

/// Per-check diagnostic record.
///
/// The field set and serialization order are fixed for every verdict, pass or
/// fail, so audit consumers can diff behavior across calls. Checks that could
/// not be evaluated report their fail-closed default rather than being
/// omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationChecks {
    pub not_empty: bool,
    pub allowed_program: bool,
    pub no_dangerous_flags: bool,
    pub no_shell_metacharacters: bool,
    pub output_path_sanitization: bool,
}

impl ValidationChecks {
    /// Check names in evaluation order.
    pub const KEYS: [&'static str; 5] = [
        "not_empty",
        "allowed_program",
        "no_dangerous_flags",
        "no_shell_metacharacters",
        "output_path_sanitization",
    ];

    fn fail_closed() -> Self {
        Self {
            not_empty: false,
            allowed_program: false,
            no_dangerous_flags: false,
            no_shell_metacharacters: false,
            output_path_sanitization: false,
        }
    }

    /// The checks as ordered name/value pairs.
    pub fn as_pairs(&self) -> [(&'static str, bool); 5] {
        [
            ("not_empty", self.not_empty),
            ("allowed_program", self.allowed_program),
            ("no_dangerous_flags", self.no_dangerous_flags),
            ("no_shell_metacharacters", self.no_shell_metacharacters),
            ("output_path_sanitization", self.output_path_sanitization),
        ]
    }

    /// Name of the first failing safety check, in evaluation order.
    /// `output_path_sanitization` is a normalization step, not a safety gate,
    /// and never produces a failure reason.
    fn first_failure(&self) -> Option<&'static str> {
        [
            ("not_empty", self.not_empty),
            ("allowed_program", self.allowed_program),
            ("no_dangerous_flags", self.no_dangerous_flags),
            ("no_shell_metacharacters", self.no_shell_metacharacters),
        ]
        .into_iter()
        .find(|(_, ok)| !ok)
        .map(|(name, _)| name)
    }
}

/// A command that has passed validation and output-path normalization.
///
/// Only the validator can construct this type, which is what makes execution
/// unreachable for rejected candidates: the executor accepts nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedCommand {
    tokens: Vec<String>,
}

impl SanitizedCommand {
    fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The leading token with any directory prefix stripped.
    pub fn program(&self) -> &str {
        strip_path_prefix(&self.tokens[0]).unwrap_or(&self.tokens[0])
    }

    /// The command as a single display line.
    pub fn display_line(&self) -> String {
        self.tokens.join(" ")
    }
}

impl std::fmt::Display for SanitizedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_line())
    }
}

/// Outcome of validating one candidate command.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub checks: ValidationChecks,
    pub failure_reason: Option<String>,
    sanitized: Option<SanitizedCommand>,
}

impl ValidationVerdict {
    /// The sanitized command, present only when the verdict passed.
    pub fn sanitized(&self) -> Option<&SanitizedCommand> {
        self.sanitized.as_ref()
    }
}

/// Whitelist-based validator for candidate command strings.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    rules: RuleSet,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(RuleSet::imagemagick())
    }
}

impl CommandValidator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Validate a candidate command string.
    ///
    /// Every check is evaluated and recorded even when an earlier one has
    /// already failed; only the overall pass/fail short-circuits. The raw
    /// metacharacter scan in particular always covers the entire original
    /// string, never a token subset.
    pub fn validate(&self, candidate: &str) -> ValidationVerdict {
        let tokens: Vec<&str> = candidate.split_whitespace().collect();

        let mut checks = ValidationChecks::fail_closed();
        checks.not_empty = !tokens.is_empty();
        checks.no_shell_metacharacters = !candidate
            .chars()
            .any(|c| self.rules.metacharacters.contains(&c));

        let mut sanitized_tokens = None;
        if let Some(first) = tokens.first() {
            // The allow-set comparison strips any directory prefix from the
            // program name; the deny and metacharacter checks still see the
            // full original input.
            checks.allowed_program = strip_path_prefix(first)
                .map(|name| self.rules.is_allowed_program(name))
                .unwrap_or(false);

            checks.no_dangerous_flags = tokens
                .iter()
                .all(|tok| !self.rules.denied_flags.contains(*tok) && !tok.starts_with('@'));

            sanitized_tokens = Some(sanitize_output_path(&tokens));
            checks.output_path_sanitization = true;
        }

        let passed = checks.not_empty
            && checks.allowed_program
            && checks.no_dangerous_flags
            && checks.no_shell_metacharacters;

        let failure_reason = checks.first_failure().map(str::to_string);

        ValidationVerdict {
            passed,
            checks,
            failure_reason,
            sanitized: if passed {
                sanitized_tokens.map(SanitizedCommand::new)
            } else {
                None
            },
        }
    }
}

/// Strip any directory prefix from a token, yielding the bare program name.
fn strip_path_prefix(token: &str) -> Option<&str> {
    Path::new(token).file_name().and_then(|n| n.to_str())
}

/// Replace the trailing output-file argument with its bare filename.
///
/// The output file is taken to be the last token that is not a flag, is not
/// the program itself, and carries an extension. Stripping its directory
/// components pins the write to the current working directory. The step is
/// idempotent: a bare filename maps to itself.
fn sanitize_output_path(tokens: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();

    for i in (1..out.len()).rev() {
        let tok = &out[i];
        if !tok.starts_with('-') && tok.contains('.') && *tok != out[0] {
            if let Some(name) = strip_path_prefix(tok) {
                if name != tok {
                    tracing::info!(original = %tok, sanitized = %name, "sanitized output path");
                    out[i] = name.to_string();
                }
            }
            break;
        }
    }

    out
}
