//! Bytecode disassembly.
//!
//! Produces a stable `(offset, op, operand)` stream; repeated compilations of
//! the same tree disassemble identically, which the compiler tests pin.

use thornvale_domain::bytecode::{CodeBlock, Constant, Op};

/// Iterate instructions as `(offset, op, operand)`. Jump operands are signed;
/// all other operands are non-negative. `SmallInt` is sign-extended.
pub fn instructions(block: &CodeBlock) -> impl Iterator<Item = (usize, Op, Option<i32>)> + '_ {
    let code = &block.code;
    let mut at = 0usize;
    std::iter::from_fn(move || {
        let byte = *code.get(at)?;
        let start = at;
        let op = match Op::try_from(byte) {
            Ok(op) => op,
            Err(_) => {
                // Malformed stream; stop rather than misalign.
                at = code.len();
                return None;
            }
        };
        at += 1;
        let operand = match op.operand_width() {
            0 => None,
            1 => {
                let b = *code.get(at)?;
                at += 1;
                Some(match op {
                    Op::SmallInt => b as i8 as i32,
                    _ => b as i32,
                })
            }
            _ => {
                let lo = *code.get(at)?;
                let hi = *code.get(at + 1)?;
                at += 2;
                let raw = u16::from_le_bytes([lo, hi]);
                Some(match op {
                    Op::Jump | Op::JumpIf | Op::JumpUnless | Op::AdvanceOrJump => {
                        raw as i16 as i32
                    }
                    _ => raw as i32,
                })
            }
        };
        Some((start, op, operand))
    })
}

/// Human-readable listing, one instruction per line.
pub fn listing(block: &CodeBlock) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for (at, op, operand) in instructions(block) {
        let _ = write!(out, "{at:04} {}", op.mnemonic());
        if let Some(v) = operand {
            let _ = write!(out, " {v}");
            let describes_constant = matches!(
                op,
                Op::Constant | Op::LoadSymbol | Op::LoadMember | Op::StoreMember
            );
            if describes_constant {
                if let Some(c) = block.constants.get(v as usize) {
                    let _ = match c {
                        Constant::Number(n) => write!(out, " ; {n}"),
                        Constant::String(s) => write!(out, " ; {s:?}"),
                        Constant::Symbol(s) => write!(out, " ; '{s}"),
                        Constant::Ref(r) => write!(out, " ; {r}"),
                    };
                }
            }
        }
        out.push('\n');
    }
    out
}
