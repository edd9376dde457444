//! Code generation: source tree → textual assembly listing.
//!
//! A tree walk drives two work queues: an operand stack holding the results
//! of sub-expressions, and an instruction queue whose entries become the
//! emitted lines in order.  Variables and temporaries share one
//! integer-addressed memory namespace: `var_count` is the next slot for a new
//! user variable, `temp_count` the next transient slot, reset to `var_count`
//! after every statement so transients are reused.  A temporary may coincide
//! with the variable slot a statement is about to allocate; the resulting
//! self-move is harmless.

use std::collections::HashMap;
use std::fmt;

use crate::ast::Ast;
use crate::bytecode::Word;
use crate::lexer::{self, SourceError};
use crate::parser;

/// Compile source text to an assembly listing.
pub fn compile(source: &str) -> Result<String, SourceError> {
    let tokens = lexer::lex(source)?;
    let tree = parser::parse(&tokens)?;
    let mut codegen = Codegen::new();
    codegen.lower_stmt(&tree)?;
    Ok(codegen.finish())
}

/// A sub-expression result: a literal, or a memory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Imm(Word),
    Slot(usize),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Imm(value) => write!(f, "{value}"),
            Value::Slot(slot) => write!(f, "[{slot}]"),
        }
    }
}

struct Codegen {
    lines: Vec<String>,
    operands: Vec<Value>,
    vars: HashMap<String, usize>,
    var_count: usize,
    temp_count: usize,
    label_count: usize,
}

impl Codegen {
    fn new() -> Codegen {
        Codegen {
            lines: Vec::new(),
            operands: Vec::new(),
            vars: HashMap::new(),
            var_count: 0,
            temp_count: 0,
            label_count: 0,
        }
    }

    fn finish(self) -> String {
        let mut listing = self.lines.join("\n");
        listing.push('\n');
        listing
    }

    fn emit(&mut self, line: String) {
        self.lines.push(line);
    }

    fn alloc_temp(&mut self) -> usize {
        let slot = self.temp_count;
        self.temp_count += 1;
        slot
    }

    fn alloc_label(&mut self) -> usize {
        let label = self.label_count;
        self.label_count += 1;
        label
    }

    fn pop_value(&mut self) -> Value {
        self.operands
            .pop()
            .expect("every lowered expression pushes a value")
    }

    fn lower_stmt(&mut self, node: &Ast) -> Result<(), SourceError> {
        match node {
            Ast::Seq(items) => {
                for item in items {
                    self.lower_stmt(item)?;
                }
            }
            Ast::Assign { name, value, .. } => {
                self.lower_expr(value)?;
                let source = self.pop_value();
                let slot = match self.vars.get(name) {
                    Some(&slot) => slot,
                    None => {
                        let slot = self.var_count;
                        self.var_count += 1;
                        self.vars.insert(name.clone(), slot);
                        slot
                    }
                };
                self.emit(format!("mv [{slot}] {source}"));
                self.temp_count = self.var_count;
            }
            Ast::If { cond, body } => {
                self.lower_expr(cond)?;
                let cond = self.pop_value();
                let label = self.alloc_label();
                self.emit(format!("b== {cond} 0 l{label}_ifend"));
                self.lower_stmt(body)?;
                self.emit(format!("l{label}_ifend:"));
                self.temp_count = self.var_count;
            }
            Ast::While { cond, body } => {
                let label = self.alloc_label();
                self.emit(format!("j l{label}_condi"));
                self.emit(format!("l{label}_loop:"));
                self.lower_stmt(body)?;
                self.emit(format!("l{label}_condi:"));
                self.lower_expr(cond)?;
                let cond = self.pop_value();
                self.emit(format!("b!= {cond} 0 l{label}_loop"));
                self.temp_count = self.var_count;
            }
            Ast::Number(_) | Ast::Var { .. } | Ast::Binary { .. } | Ast::Call { .. } => {
                // The parser only roots statements, so this is a bare
                // expression used as one.
                return Err(SourceError {
                    row: 1,
                    col: 1,
                    message: "expected a statement".to_string(),
                });
            }
        }
        Ok(())
    }

    fn lower_expr(&mut self, node: &Ast) -> Result<(), SourceError> {
        match node {
            Ast::Number(value) => {
                self.operands.push(Value::Imm(*value));
            }
            Ast::Var { name, pos } => {
                let slot = self.vars.get(name).copied().ok_or_else(|| {
                    SourceError::new(*pos, format!("undefined variable '{name}'"))
                })?;
                self.operands.push(Value::Slot(slot));
            }
            Ast::Binary { op, lhs, rhs } => {
                self.lower_expr(lhs)?;
                self.lower_expr(rhs)?;
                let rhs = self.pop_value();
                let lhs = self.pop_value();
                let temp = self.alloc_temp();
                self.emit(format!("c{} [{temp}] {lhs} {rhs}", op.suffix()));
                self.operands.push(Value::Slot(temp));
            }
            Ast::Call { name, pos, args } => {
                if name != "read" {
                    return Err(SourceError::new(
                        *pos,
                        format!("unknown function '{name}'"),
                    ));
                }
                let port = match args.as_slice() {
                    [Ast::Number(port)] => *port,
                    _ => {
                        return Err(SourceError::new(
                            *pos,
                            "read expects a single integer literal",
                        ))
                    }
                };
                let slot = self.alloc_temp();
                // `in` ors into its destination; a reused temp slot must not
                // leak stale bits into the read.
                self.emit(format!("mv [{slot}] 0"));
                self.emit(format!("in [{slot}] {port}"));
                self.operands.push(Value::Slot(slot));
            }
            Ast::Assign { .. } | Ast::If { .. } | Ast::While { .. } | Ast::Seq(_) => {
                return Err(SourceError {
                    row: 1,
                    col: 1,
                    message: "expected an expression".to_string(),
                });
            }
        }
        Ok(())
    }
}
