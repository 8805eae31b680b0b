//! Formula validator: static checks on routine source.
//!
//! RULE: Validation never executes anything. It lexes and parses only.
//! Forbidden constructs are found on the raw token stream, so they are
//! reported even when the routine does not parse.

use crate::script::{
    ast::{Program, StmtKind},
    lexer::{line_col, tokenize, Token},
    parse,
};
use serde::{Deserialize, Serialize};

/// Identifiers that would give a routine dynamic code execution or timers.
const FORBIDDEN_IDENTIFIERS: &[&str] = &["eval", "Function", "setTimeout", "setInterval"];

/// Member names that reach into object internals.
const FORBIDDEN_MEMBERS: &[&str] = &["constructor", "__proto__", "prototype"];

const ENTRY_POINT: &str = "calculate";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors:   Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate routine source. Pure; a fresh result on every call.
pub fn validate(source: &str) -> ValidationResult {
    analyse(source).0
}

/// Validate and, when the source parses, hand back the program.
pub(crate) fn analyse(source: &str) -> (ValidationResult, Option<Program>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if source.trim().is_empty() {
        errors.push("routine is empty".to_string());
        return (finish(errors, warnings), None);
    }

    let (tokens, _) = tokenize(source);
    for spanned in &tokens {
        let reason = match &spanned.token {
            Token::Identifier(name) if FORBIDDEN_IDENTIFIERS.contains(&name.as_str()) => {
                Some(format!("'{name}' is not allowed (dynamic code execution)"))
            }
            Token::Identifier(name) | Token::Str(name)
                if FORBIDDEN_MEMBERS.contains(&name.as_str()) =>
            {
                Some(format!("access to '{name}' is not allowed"))
            }
            Token::Identifier(name) if name == "require" => {
                Some("module loading ('require') is not allowed".to_string())
            }
            Token::Import => Some("module loading ('import') is not allowed".to_string()),
            Token::Export => Some("module syntax ('export') is not allowed".to_string()),
            _ => None,
        };
        if let Some(reason) = reason {
            let (line, col) = line_col(source, spanned.span.start);
            errors.push(format!("line {line}:{col}: {reason}"));
        }
    }

    let program = match parse(source) {
        Ok(program) => Some(program),
        Err(e) => {
            errors.push(format!("syntax error at {e}"));
            None
        }
    };

    if let Some(program) = &program {
        if program.function_count() == 0 {
            warnings.push("routine declares no function; running it will fail".to_string());
        } else if !defines_entry_point(program) {
            match program.top_level_functions().find_map(|f| f.name.clone()) {
                Some(first) => warnings.push(format!(
                    "no function named '{ENTRY_POINT}'; '{first}' will be used as the entry point"
                )),
                None => warnings.push(format!(
                    "no top-level function declared; define '{ENTRY_POINT}' to make the routine runnable"
                )),
            }
        }
    }

    let result = finish(errors, warnings);
    let program = if result.is_valid { program } else { None };
    (result, program)
}

fn defines_entry_point(program: &Program) -> bool {
    program.body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Function(decl) => decl.name.as_deref() == Some(ENTRY_POINT),
        StmtKind::Declare { bindings, .. } => bindings.iter().any(|(name, _)| name == ENTRY_POINT),
        _ => false,
    })
}

fn finish(errors: Vec<String>, warnings: Vec<String>) -> ValidationResult {
    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
