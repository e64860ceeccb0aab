//! Pattern compiler for template source
//!
//! Supported syntax:
//!
//! ```text
//! {{name}} {{user.name}}          substitution, dotted lookup
//! {{#if flag}}...{{else}}...{{/if}}  conditional section
//! {{#each items}}{{.}}{{/each}}    loop, `.` is the current item
//! {{! comment }}                  discarded
//! ```

mod instruction;
pub mod lexer;
mod scan;

pub use instruction::{BlockKind, CompiledTemplate, Instruction, VarPath, INSTRUCTION_COST_BYTES};
pub use lexer::Span;
pub use scan::{compile, compile_with_deadline, MAX_NESTING_DEPTH};
