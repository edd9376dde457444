//! Assembler: textual assembly → executable [`Rom`].
//!
//! Two passes.  The first strips comments and blank lines and builds the
//! label table (a label names the index of the next instruction; successive
//! labels collapse onto one index, and a trailing label equals the terminator
//! slot).  The second parses each instruction line and selects a record for
//! it.  Selection is where throughput is won: the shapes the dispatch loop
//! sees most — `mv reg, imm`, `c+ reg, reg, imm`, and branches over registers
//! or a register and an immediate — are rewritten into dedicated record
//! variants with direct register indices, so executing them costs one match
//! arm instead of an operand-tree walk.  Everything else falls back to the
//! generic tagged records.
//!
//! Branch and jump targets are stored as `label index − 1` to compensate for
//! the dispatch loop's unconditional `pc` increment.

use std::collections::HashMap;

use thiserror::Error;

use crate::bytecode::{AluOp, Cond, Instr, Operand, Rom, Word, MAX_USER_INSTRUCTIONS};

/// Per-line assembly failures.  Lines are 1-based and refer to the original
/// input, comments and blanks included.
#[derive(Debug, Error)]
pub enum AsmError {
    #[error("line {line}: unknown opcode '{opcode}'")]
    UnknownOpcode { line: usize, opcode: String },
    #[error("line {line}: '{opcode}' expects {expected} operands, found {found}")]
    WrongArity {
        line: usize,
        opcode: String,
        expected: &'static str,
        found: usize,
    },
    #[error("line {line}: invalid operand '{token}'")]
    InvalidOperand { line: usize, token: String },
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },
    #[error("line {line}: duplicate label '{label}'")]
    DuplicateLabel { line: usize, label: String },
    #[error("program has {found} instructions, the rom holds {limit}")]
    ProgramTooLong { found: usize, limit: usize },
}

/// Assemble a listing into a sealed ROM (terminator and padding appended).
pub fn assemble(text: &str) -> Result<Rom, AsmError> {
    let lines = clean(text);

    // Label prepass.  Mnemonics and labels are case-folded together, so a
    // label use matches its definition regardless of spelling.
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut index = 0usize;
    for (line_no, line) in &lines {
        if let Some(name) = label_name(line) {
            if labels.insert(name.to_string(), index).is_some() {
                return Err(AsmError::DuplicateLabel {
                    line: *line_no,
                    label: name.to_string(),
                });
            }
        } else {
            index += 1;
        }
    }
    if index > MAX_USER_INSTRUCTIONS {
        return Err(AsmError::ProgramTooLong {
            found: index,
            limit: MAX_USER_INSTRUCTIONS,
        });
    }

    let mut instrs = Vec::with_capacity(index);
    for (line_no, line) in &lines {
        if label_name(line).is_some() {
            continue;
        }
        instrs.push(parse_line(line, *line_no, &labels)?);
    }
    Ok(Rom::new(instrs))
}

/// Strip `;` comments, fold to lowercase, trim, and drop empty lines,
/// keeping 1-based line numbers.
fn clean(text: &str) -> Vec<(usize, String)> {
    text.lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let code = match raw.find(';') {
                Some(at) => &raw[..at],
                None => raw,
            };
            let code = code.trim();
            if code.is_empty() {
                None
            } else {
                Some((i + 1, code.to_lowercase()))
            }
        })
        .collect()
}

/// `name:` lines (no embedded whitespace) define labels.
fn label_name(line: &str) -> Option<&str> {
    let name = line.strip_suffix(':')?;
    if name.is_empty() || name.contains(char::is_whitespace) {
        None
    } else {
        Some(name)
    }
}

fn parse_line(
    line: &str,
    line_no: usize,
    labels: &HashMap<String, usize>,
) -> Result<Instr, AsmError> {
    let mut parts = line.split_whitespace();
    let mnemonic = parts.next().expect("clean() drops empty lines");
    let tokens: Vec<&str> = parts.collect();

    // Opcode families share a leading character; the remainder picks the
    // operation (and whether its comparands swap onto the canonical form).
    if let Some(rest) = mnemonic.strip_prefix('c') {
        if let Some((op, swap)) = alu_op(rest) {
            return parse_alu(op, swap, mnemonic, &tokens, line_no);
        }
    }
    if let Some(rest) = mnemonic.strip_prefix('b') {
        if let Some((cond, swap)) = branch_cond(rest) {
            return parse_branch(cond, swap, mnemonic, &tokens, line_no, labels);
        }
    }

    match mnemonic {
        "mv" => {
            expect_arity(mnemonic, &tokens, 2, "2", line_no)?;
            let dst = parse_operand(tokens[0], line_no)?;
            let src = parse_operand(tokens[1], line_no)?;
            Ok(match (dst, src) {
                (Operand::Reg(dst), Operand::Imm(imm)) => Instr::MovRegImm { dst, imm },
                (dst, src) => Instr::Mov { dst, src },
            })
        }
        "push" => {
            let sources = parse_operand_list(mnemonic, &tokens, line_no)?;
            Ok(Instr::Push { sources })
        }
        "pop" => {
            // Reversed here so the dispatch loop iterates forward while
            // restoring in the opposite order of a matching push.
            let mut targets = parse_operand_list(mnemonic, &tokens, line_no)?;
            targets.reverse();
            Ok(Instr::Pop { targets })
        }
        "j" => {
            expect_arity(mnemonic, &tokens, 1, "1", line_no)?;
            if let Some(reg) = register_index(tokens[0]) {
                Ok(Instr::JumpReg { reg })
            } else {
                let target = resolve_target(tokens[0], labels, line_no)?;
                Ok(Instr::Jump { target })
            }
        }
        "apc" => {
            expect_arity(mnemonic, &tokens, 2, "2", line_no)?;
            let dst = parse_operand(tokens[0], line_no)?;
            let offset = immediate(tokens[1]).ok_or_else(|| AsmError::InvalidOperand {
                line: line_no,
                token: tokens[1].to_string(),
            })?;
            Ok(Instr::Apc { dst, offset })
        }
        "in" => {
            if tokens.len() != 2 && tokens.len() != 3 {
                return Err(arity_error(mnemonic, &tokens, "2 or 3", line_no));
            }
            let dst = parse_operand(tokens[0], line_no)?;
            let port = port_id(tokens[1], line_no)?;
            let shift = optional_shift(&tokens, 2, line_no)?;
            Ok(Instr::In { dst, port, shift })
        }
        "out" => {
            if tokens.len() != 2 && tokens.len() != 3 {
                return Err(arity_error(mnemonic, &tokens, "2 or 3", line_no));
            }
            let port = port_id(tokens[0], line_no)?;
            let src = parse_operand(tokens[1], line_no)?;
            let shift = optional_shift(&tokens, 2, line_no)?;
            Ok(Instr::Out { src, port, shift })
        }
        "sync" => {
            expect_arity(mnemonic, &tokens, 0, "0", line_no)?;
            Ok(Instr::Sync)
        }
        _ => Err(AsmError::UnknownOpcode {
            line: line_no,
            opcode: mnemonic.to_string(),
        }),
    }
}

/// ALU suffix table.  `c>` and `c<=` are the swapped spellings of `c<` and
/// `c>=`.
fn alu_op(rest: &str) -> Option<(AluOp, bool)> {
    Some(match rest {
        "+" => (AluOp::Add, false),
        "-" => (AluOp::Sub, false),
        "&" => (AluOp::And, false),
        "|" => (AluOp::Or, false),
        "^" => (AluOp::Xor, false),
        "<<" => (AluOp::Shl, false),
        ">>" => (AluOp::Shr, false),
        ">>>" => (AluOp::Shru, false),
        "==" => (AluOp::Eq, false),
        "!=" => (AluOp::Ne, false),
        "<" => (AluOp::Lt, false),
        ">=" => (AluOp::Ge, false),
        ">" => (AluOp::Lt, true),
        "<=" => (AluOp::Ge, true),
        _ => return None,
    })
}

fn branch_cond(rest: &str) -> Option<(Cond, bool)> {
    Some(match rest {
        "==" => (Cond::Eq, false),
        "!=" => (Cond::Ne, false),
        "<" => (Cond::Lt, false),
        ">=" => (Cond::Ge, false),
        ">" => (Cond::Lt, true),
        "<=" => (Cond::Ge, true),
        _ => return None,
    })
}

fn parse_alu(
    op: AluOp,
    swap: bool,
    mnemonic: &str,
    tokens: &[&str],
    line_no: usize,
) -> Result<Instr, AsmError> {
    expect_arity(mnemonic, tokens, 3, "3", line_no)?;
    let dst = parse_operand(tokens[0], line_no)?;
    let mut lhs = parse_operand(tokens[1], line_no)?;
    let mut rhs = parse_operand(tokens[2], line_no)?;
    if swap {
        std::mem::swap(&mut lhs, &mut rhs);
    }
    Ok(match (op, dst, lhs, rhs) {
        (AluOp::Add, Operand::Reg(dst), Operand::Reg(src), Operand::Imm(imm)) => {
            Instr::AddRegRegImm { dst, src, imm }
        }
        // Addition commutes, so the immediate-first spelling lands on the
        // same record.
        (AluOp::Add, Operand::Reg(dst), Operand::Imm(imm), Operand::Reg(src)) => {
            Instr::AddRegRegImm { dst, src, imm }
        }
        (op, dst, lhs, rhs) => Instr::Alu { op, dst, lhs, rhs },
    })
}

fn parse_branch(
    cond: Cond,
    swap: bool,
    mnemonic: &str,
    tokens: &[&str],
    line_no: usize,
    labels: &HashMap<String, usize>,
) -> Result<Instr, AsmError> {
    expect_arity(mnemonic, tokens, 3, "3", line_no)?;
    let mut lhs = parse_operand(tokens[0], line_no)?;
    let mut rhs = parse_operand(tokens[1], line_no)?;
    if swap {
        std::mem::swap(&mut lhs, &mut rhs);
    }
    let target = resolve_target(tokens[2], labels, line_no)?;
    Ok(match (lhs, rhs) {
        (Operand::Reg(lhs), Operand::Reg(rhs)) => Instr::BranchRegReg {
            cond,
            lhs,
            rhs,
            target,
        },
        (Operand::Reg(lhs), Operand::Imm(imm)) => Instr::BranchRegImm {
            cond,
            lhs,
            imm,
            target,
        },
        // Immediate-first comparisons read the register directly by flipping
        // the predicate.
        (Operand::Imm(imm), Operand::Reg(reg)) => Instr::BranchRegImm {
            cond: cond.swapped(),
            lhs: reg,
            imm,
            target,
        },
        (lhs, rhs) => Instr::Branch {
            cond,
            lhs,
            rhs,
            target,
        },
    })
}

/// Operand grammar: `imm | reg | [ operand ]`, bracketed forms recursive.
fn parse_operand(token: &str, line_no: usize) -> Result<Operand, AsmError> {
    if let Some(rest) = token.strip_prefix('[') {
        if let Some(inner) = rest.strip_suffix(']') {
            return Ok(Operand::Mem(Box::new(parse_operand(inner, line_no)?)));
        }
    } else if let Some(reg) = register_index(token) {
        return Ok(Operand::Reg(reg));
    } else if let Some(value) = immediate(token) {
        return Ok(Operand::Imm(value));
    }
    Err(AsmError::InvalidOperand {
        line: line_no,
        token: token.to_string(),
    })
}

fn parse_operand_list(
    mnemonic: &str,
    tokens: &[&str],
    line_no: usize,
) -> Result<Vec<Operand>, AsmError> {
    if tokens.is_empty() {
        return Err(arity_error(mnemonic, tokens, "1 or more", line_no));
    }
    tokens
        .iter()
        .map(|token| parse_operand(token, line_no))
        .collect()
}

/// `x0`..`x7`, or the aliases `ra`, `sp`, `s0`..`s5`.
fn register_index(token: &str) -> Option<u8> {
    match token {
        "ra" => Some(0),
        "sp" => Some(1),
        _ => {
            if let Some(digits) = token.strip_prefix('x') {
                digits.parse::<u8>().ok().filter(|n| *n < 8)
            } else if let Some(digits) = token.strip_prefix('s') {
                digits.parse::<u8>().ok().filter(|n| *n < 6).map(|n| n + 2)
            } else {
                None
            }
        }
    }
}

/// Decimal or `0x` hex, optionally negated.  Hex admits the full 32-bit
/// range and reinterprets it as a signed word.
fn immediate(token: &str) -> Option<Word> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if let Some(hex) = body.strip_prefix("0x") {
        let value = u32::from_str_radix(hex, 16).ok()? as Word;
        return Some(if negative { value.wrapping_neg() } else { value });
    }
    let value = body.parse::<i64>().ok()?;
    Word::try_from(if negative { -value } else { value }).ok()
}

/// A branch target: a label, or a numeric instruction index.  Stored
/// pre-decremented.
fn resolve_target(
    token: &str,
    labels: &HashMap<String, usize>,
    line_no: usize,
) -> Result<Word, AsmError> {
    if let Some(&index) = labels.get(token) {
        return Ok(index as Word - 1);
    }
    if let Some(value) = immediate(token) {
        return Ok(value.wrapping_sub(1));
    }
    if token.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        Err(AsmError::UndefinedLabel {
            line: line_no,
            label: token.to_string(),
        })
    } else {
        Err(AsmError::InvalidOperand {
            line: line_no,
            token: token.to_string(),
        })
    }
}

fn port_id(token: &str, line_no: usize) -> Result<u8, AsmError> {
    immediate(token)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| AsmError::InvalidOperand {
            line: line_no,
            token: token.to_string(),
        })
}

fn optional_shift(tokens: &[&str], at: usize, line_no: usize) -> Result<Word, AsmError> {
    match tokens.get(at) {
        Some(token) => immediate(token).ok_or_else(|| AsmError::InvalidOperand {
            line: line_no,
            token: token.to_string(),
        }),
        None => Ok(0),
    }
}

fn expect_arity(
    mnemonic: &str,
    tokens: &[&str],
    count: usize,
    expected: &'static str,
    line_no: usize,
) -> Result<(), AsmError> {
    if tokens.len() == count {
        Ok(())
    } else {
        Err(arity_error(mnemonic, tokens, expected, line_no))
    }
}

fn arity_error(
    mnemonic: &str,
    tokens: &[&str],
    expected: &'static str,
    line_no: usize,
) -> AsmError {
    AsmError::WrongArity {
        line: line_no,
        opcode: mnemonic.to_string(),
        expected,
        found: tokens.len(),
    }
}
