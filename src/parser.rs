//! Shift/reduce parser for the source language.
//!
//! The parser shifts one token at a time onto an item stack, then retries a
//! fixed, prioritised list of reductions until none fires.  Reductions match
//! on the top of the stack and consult the next unshifted token: an
//! identifier does not reduce when a call follows, and a binary expression
//! does not reduce while a tighter-binding operator is waiting.  Newlines,
//! `;`, and `:` all act as statement separators here.  When the input is
//! exhausted, leading and trailing separators are trimmed and exactly one
//! statement must remain, otherwise the first unresolved item is reported
//! with its position.

use crate::ast::Ast;
use crate::lexer::{Keyword, Pos, SourceError, Token, TokenKind};

/// One stack entry: a raw token, a reduced expression or statement, or an
/// accumulating argument list.
#[derive(Debug)]
enum ItemKind {
    Tok(TokenKind),
    Expr(Ast),
    Stmt(Ast),
    Args(Vec<Ast>),
}

#[derive(Debug)]
struct Item {
    pos: Pos,
    kind: ItemKind,
}

/// Parse a token stream into the single statement tree of the program.
pub fn parse(tokens: &[Token]) -> Result<Ast, SourceError> {
    let mut stack: Vec<Item> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Eof {
            break;
        }
        // The parser does not care which separator spelling appeared.
        let kind = match &token.kind {
            TokenKind::Newline => TokenKind::Separator,
            other => other.clone(),
        };
        stack.push(Item {
            pos: token.pos,
            kind: ItemKind::Tok(kind),
        });
        let lookahead = tokens
            .get(i + 1)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof);
        while reduce(&mut stack, lookahead)? {}
    }

    while matches!(
        stack.first().map(|item| &item.kind),
        Some(ItemKind::Tok(TokenKind::Separator))
    ) {
        stack.remove(0);
    }
    while matches!(
        stack.last().map(|item| &item.kind),
        Some(ItemKind::Tok(TokenKind::Separator))
    ) {
        stack.pop();
    }

    if stack.len() == 1 && matches!(stack[0].kind, ItemKind::Stmt(_)) {
        match stack.pop().map(|item| item.kind) {
            Some(ItemKind::Stmt(ast)) => return Ok(ast),
            _ => unreachable!("shape checked above"),
        }
    }
    // Report the first item that never made it into a statement.
    let pos = stack
        .iter()
        .find(|item| !matches!(item.kind, ItemKind::Stmt(_)))
        .or_else(|| stack.get(1))
        .map(|item| item.pos)
        .unwrap_or(Pos { row: 1, col: 1 });
    Err(SourceError::new(pos, "syntax error"))
}

/// Attempt every reduction in priority order; true if one fired.
fn reduce(stack: &mut Vec<Item>, lookahead: &TokenKind) -> Result<bool, SourceError> {
    let n = stack.len();

    // Runs of separators collapse to one.
    if n >= 2
        && is_tok(&stack[n - 1], &TokenKind::Separator)
        && is_tok(&stack[n - 2], &TokenKind::Separator)
    {
        stack.pop();
        return Ok(true);
    }

    // A separator between a finished statement and `end` (or the end of
    // input) carries no information.
    if n >= 2
        && is_tok(&stack[n - 1], &TokenKind::Separator)
        && matches!(stack[n - 2].kind, ItemKind::Stmt(_))
        && matches!(lookahead, TokenKind::Keyword(Keyword::End) | TokenKind::Eof)
    {
        stack.pop();
        return Ok(true);
    }

    // Literal → expression.
    if n >= 1 {
        if let ItemKind::Tok(TokenKind::Number(value)) = stack[n - 1].kind {
            let pos = stack[n - 1].pos;
            stack.pop();
            stack.push(expr(pos, Ast::Number(value)));
            return Ok(true);
        }
    }

    // Identifier → expression, unless a call follows.
    if n >= 1 && !matches!(lookahead, TokenKind::LParen) {
        if let ItemKind::Tok(TokenKind::Ident(_)) = &stack[n - 1].kind {
            let Item { pos, kind } = stack.pop().expect("length checked above");
            let name = match kind {
                ItemKind::Tok(TokenKind::Ident(name)) => name,
                _ => unreachable!("shape checked above"),
            };
            stack.push(expr(pos, Ast::Var { name, pos }));
            return Ok(true);
        }
    }

    // Argument list accumulation: `expr , expr` and `args , expr`.  Waits
    // while an operator could still extend the rightmost expression.
    if n >= 3
        && !matches!(lookahead, TokenKind::Op(_))
        && matches!(stack[n - 1].kind, ItemKind::Expr(_))
        && is_tok(&stack[n - 2], &TokenKind::Comma)
        && matches!(stack[n - 3].kind, ItemKind::Expr(_) | ItemKind::Args(_))
    {
        let last = take_expr(stack.pop());
        stack.pop(); // comma
        let Item { pos, kind } = stack.pop().expect("length checked above");
        let mut args = match kind {
            ItemKind::Expr(first) => vec![first],
            ItemKind::Args(args) => args,
            _ => unreachable!("shape checked above"),
        };
        args.push(last);
        stack.push(Item {
            pos,
            kind: ItemKind::Args(args),
        });
        return Ok(true);
    }

    // Call: `name ( expr ) ` or `name ( args )`.
    if n >= 4
        && is_tok(&stack[n - 1], &TokenKind::RParen)
        && matches!(stack[n - 2].kind, ItemKind::Expr(_) | ItemKind::Args(_))
        && is_tok(&stack[n - 3], &TokenKind::LParen)
        && matches!(&stack[n - 4].kind, ItemKind::Tok(TokenKind::Ident(_)))
    {
        stack.pop(); // rparen
        let args = match stack.pop().expect("length checked above").kind {
            ItemKind::Expr(single) => vec![single],
            ItemKind::Args(args) => args,
            _ => unreachable!("shape checked above"),
        };
        stack.pop(); // lparen
        let Item { pos, kind } = stack.pop().expect("length checked above");
        let name = match kind {
            ItemKind::Tok(TokenKind::Ident(name)) => name,
            _ => unreachable!("shape checked above"),
        };
        stack.push(expr(pos, Ast::Call { name, pos, args }));
        return Ok(true);
    }

    // Parenthesised expression.  The call rule above shadows the case where
    // an identifier precedes the opening parenthesis.
    if n >= 3
        && is_tok(&stack[n - 1], &TokenKind::RParen)
        && matches!(stack[n - 2].kind, ItemKind::Expr(_))
        && is_tok(&stack[n - 3], &TokenKind::LParen)
    {
        stack.pop(); // rparen
        let inner = take_expr(stack.pop());
        let pos = stack.pop().expect("length checked above").pos;
        stack.push(expr(pos, inner));
        return Ok(true);
    }

    // Binary expression, unless a tighter-binding operator is next.
    if n >= 3
        && matches!(stack[n - 1].kind, ItemKind::Expr(_))
        && matches!(stack[n - 3].kind, ItemKind::Expr(_))
    {
        if let ItemKind::Tok(TokenKind::Op(op)) = stack[n - 2].kind {
            let blocked = match lookahead {
                TokenKind::Op(next) => next.precedence() < op.precedence(),
                _ => false,
            };
            if !blocked {
                let rhs = take_expr(stack.pop());
                stack.pop(); // operator
                let Item { pos, kind } = stack.pop().expect("length checked above");
                let lhs = match kind {
                    ItemKind::Expr(lhs) => lhs,
                    _ => unreachable!("shape checked above"),
                };
                stack.push(expr(
                    pos,
                    Ast::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                ));
                return Ok(true);
            }
        }
    }

    // Assignment → statement, once the right-hand side can no longer grow.
    if n >= 3
        && !matches!(lookahead, TokenKind::Op(_))
        && matches!(stack[n - 1].kind, ItemKind::Expr(_))
        && is_tok(&stack[n - 2], &TokenKind::Assign)
        && matches!(stack[n - 3].kind, ItemKind::Expr(Ast::Var { .. }))
    {
        let value = take_expr(stack.pop());
        stack.pop(); // '='
        let Item { pos, kind } = stack.pop().expect("length checked above");
        let name = match kind {
            ItemKind::Expr(Ast::Var { name, .. }) => name,
            _ => unreachable!("shape checked above"),
        };
        stack.push(Item {
            pos,
            kind: ItemKind::Stmt(Ast::Assign {
                name,
                pos,
                value: Box::new(value),
            }),
        });
        return Ok(true);
    }

    // `if expr ⏎ body end` and `while expr ⏎ body end`, empty bodies
    // included.
    for with_body in [false, true] {
        let len = if with_body { 5 } else { 4 };
        if n < len {
            continue;
        }
        let base = n - len;
        let head = match &stack[base].kind {
            ItemKind::Tok(TokenKind::Keyword(k @ (Keyword::If | Keyword::While))) => *k,
            _ => continue,
        };
        let shape_ok = matches!(stack[base + 1].kind, ItemKind::Expr(_))
            && is_tok(&stack[base + 2], &TokenKind::Separator)
            && (!with_body || matches!(stack[base + 3].kind, ItemKind::Stmt(_)))
            && is_tok(&stack[n - 1], &TokenKind::Keyword(Keyword::End));
        if !shape_ok {
            continue;
        }
        stack.pop(); // 'end'
        let body = if with_body {
            match stack.pop().expect("length checked above").kind {
                ItemKind::Stmt(body) => body,
                _ => unreachable!("shape checked above"),
            }
        } else {
            Ast::Seq(Vec::new())
        };
        stack.pop(); // separator
        let cond = take_expr(stack.pop());
        let pos = stack.pop().expect("length checked above").pos;
        let node = match head {
            Keyword::If => Ast::If {
                cond: Box::new(cond),
                body: Box::new(body),
            },
            Keyword::While => Ast::While {
                cond: Box::new(cond),
                body: Box::new(body),
            },
            Keyword::End => unreachable!("head matched above"),
        };
        stack.push(Item {
            pos,
            kind: ItemKind::Stmt(node),
        });
        return Ok(true);
    }

    // Statement concatenation across a separator.
    if n >= 3
        && matches!(stack[n - 1].kind, ItemKind::Stmt(_))
        && is_tok(&stack[n - 2], &TokenKind::Separator)
        && matches!(stack[n - 3].kind, ItemKind::Stmt(_))
    {
        let right = match stack.pop().expect("length checked above").kind {
            ItemKind::Stmt(right) => right,
            _ => unreachable!("shape checked above"),
        };
        stack.pop(); // separator
        let Item { pos, kind } = stack.pop().expect("length checked above");
        let left = match kind {
            ItemKind::Stmt(left) => left,
            _ => unreachable!("shape checked above"),
        };
        let merged = match left {
            Ast::Seq(mut items) => {
                items.push(right);
                Ast::Seq(items)
            }
            other => Ast::Seq(vec![other, right]),
        };
        stack.push(Item {
            pos,
            kind: ItemKind::Stmt(merged),
        });
        return Ok(true);
    }

    Ok(false)
}

fn expr(pos: Pos, ast: Ast) -> Item {
    Item {
        pos,
        kind: ItemKind::Expr(ast),
    }
}

fn is_tok(item: &Item, kind: &TokenKind) -> bool {
    matches!(&item.kind, ItemKind::Tok(k) if k == kind)
}

fn take_expr(item: Option<Item>) -> Ast {
    match item.expect("length checked by caller").kind {
        ItemKind::Expr(ast) => ast,
        _ => unreachable!("shape checked by caller"),
    }
}
