//! Executes a compiled template against a variable set

use std::fmt::Write;

use thiserror::Error;

use crate::compiler::{CompiledTemplate, Instruction, VarPath};
use crate::value::{Value, Variables};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Strict mode only: a referenced variable has no binding
    #[error("missing variable '{variable}'")]
    MissingVariable { variable: String },
}

/// Render `compiled` with `variables`
///
/// Absent variables render as empty, are falsy in sections and iterate zero times,
/// unless `strict` is set, in which case they fail with
/// [`RenderError::MissingVariable`].
pub fn render(
    compiled: &CompiledTemplate,
    variables: &Variables,
    strict: bool,
) -> Result<String, RenderError> {
    let mut scope = Scope {
        root: variables,
        items: Vec::new(),
        strict,
    };
    let mut out = String::new();
    scope.run(compiled.instructions(), &mut out)?;
    Ok(out)
}

/// Lookup state: root bindings plus the stack of enclosing loop items
struct Scope<'a> {
    root: &'a Variables,
    items: Vec<&'a Value>,
    strict: bool,
}

impl<'a> Scope<'a> {
    fn run(&mut self, instructions: &'a [Instruction], out: &mut String) -> Result<(), RenderError> {
        for instruction in instructions {
            match instruction {
                Instruction::Literal(text) => out.push_str(text),
                Instruction::Substitute { path, .. } => {
                    if let Some(value) = self.lookup(path)? {
                        // Writing to a String never fails.
                        let _ = write!(out, "{}", value);
                    }
                }
                Instruction::Section {
                    predicate,
                    body,
                    otherwise,
                    ..
                } => {
                    let truthy = self.lookup(predicate)?.is_some_and(Value::is_truthy);
                    self.run(if truthy { body } else { otherwise }, out)?;
                }
                Instruction::Loop { iterable, body, .. } => {
                    if let Some(collection) = self.lookup(iterable)? {
                        for item in collection.iter_items() {
                            self.items.push(item);
                            let result = self.run(body, out);
                            self.items.pop();
                            result?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, path: &VarPath) -> Result<Option<&'a Value>, RenderError> {
        let found = self.resolve(path);
        if found.is_none() && self.strict {
            return Err(RenderError::MissingVariable {
                variable: path.to_string(),
            });
        }
        Ok(found)
    }

    /// Innermost loop item first, then outer items, then the root bindings
    fn resolve(&self, path: &VarPath) -> Option<&'a Value> {
        let segments = match path {
            VarPath::Current => return self.items.last().copied(),
            VarPath::Named(segments) => segments,
        };
        let (head, rest) = segments.split_first()?;

        let start = self
            .items
            .iter()
            .rev()
            .find_map(|item| item.get(head))
            .or_else(|| self.root.get(head))?;

        rest.iter().try_fold(start, |value, segment| value.get(segment))
    }
}
