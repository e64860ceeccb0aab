//! Compiled instruction tree produced by the pattern compiler

use std::fmt;

use super::lexer::Span;

/// Estimated cache footprint of one instruction, in bytes
pub const INSTRUCTION_COST_BYTES: usize = 64;

/// A pre-resolved variable lookup path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarPath {
    /// `.` - the current loop item
    Current,
    /// `a.b.c` - dotted lookup, one segment per map level
    Named(Vec<String>),
}

impl VarPath {
    /// Root segment of a named path
    pub fn root(&self) -> Option<&str> {
        match self {
            VarPath::Current => None,
            VarPath::Named(segments) => segments.first().map(|s| s.as_str()),
        }
    }
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarPath::Current => f.write_str("."),
            VarPath::Named(segments) => f.write_str(&segments.join(".")),
        }
    }
}

/// Kind of a block tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    If,
    Each,
}

impl BlockKind {
    pub fn keyword(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Each => "each",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "if" => Some(BlockKind::If),
            "each" => Some(BlockKind::Each),
            _ => None,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A single step of a compiled template
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Literal text copied to the output
    Literal(String),
    /// `{{path}}`
    Substitute { path: VarPath, span: Span },
    /// `{{#if predicate}}body{{else}}otherwise{{/if}}`
    Section {
        predicate: VarPath,
        body: Vec<Instruction>,
        otherwise: Vec<Instruction>,
        span: Span,
    },
    /// `{{#each iterable}}body{{/each}}`
    Loop {
        iterable: VarPath,
        body: Vec<Instruction>,
        span: Span,
    },
}

impl Instruction {
    /// Number of instructions in this subtree, including itself
    pub fn count(&self) -> usize {
        match self {
            Instruction::Literal(_) | Instruction::Substitute { .. } => 1,
            Instruction::Section {
                body, otherwise, ..
            } => 1 + count_all(body) + count_all(otherwise),
            Instruction::Loop { body, .. } => 1 + count_all(body),
        }
    }
}

fn count_all(instructions: &[Instruction]) -> usize {
    instructions.iter().map(Instruction::count).sum()
}

/// The compiled form of a template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledTemplate {
    instructions: Vec<Instruction>,
    variables: Vec<VarPath>,
}

impl CompiledTemplate {
    pub(crate) fn new(instructions: Vec<Instruction>) -> Self {
        let mut variables = Vec::new();
        collect_variables(&instructions, &mut variables);
        Self {
            instructions,
            variables,
        }
    }

    /// Top-level instructions in source order
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Every variable path referenced, in first-use order, without duplicates
    pub fn variables(&self) -> &[VarPath] {
        &self.variables
    }

    /// Total number of instructions, counting nested bodies
    pub fn instruction_count(&self) -> usize {
        count_all(&self.instructions)
    }

    /// Estimated size used by the compiled cache
    pub fn estimated_size(&self) -> usize {
        self.instruction_count().max(1) * INSTRUCTION_COST_BYTES
    }
}

fn note(path: &VarPath, out: &mut Vec<VarPath>) {
    if !out.contains(path) {
        out.push(path.clone());
    }
}

fn collect_variables(instructions: &[Instruction], out: &mut Vec<VarPath>) {
    for instruction in instructions {
        match instruction {
            Instruction::Literal(_) => {}
            Instruction::Substitute { path, .. } => note(path, out),
            Instruction::Section {
                predicate,
                body,
                otherwise,
                ..
            } => {
                note(predicate, out);
                collect_variables(body, out);
                collect_variables(otherwise, out);
            }
            Instruction::Loop { iterable, body, .. } => {
                note(iterable, out);
                collect_variables(body, out);
            }
        }
    }
}
