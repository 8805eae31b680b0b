//! The routine language: lexer, parser, and sandboxed interpreter.
//!
//! Routines are a small JavaScript-like language with no ambient
//! authority. The only capabilities are those in `builtins`.

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use interpreter::{Budget, Fault, FaultKind, RunStats};
pub use parser::{parse, ParseError};
