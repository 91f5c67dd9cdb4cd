//! The lore-script pipeline.
//!
//! Source text flows lexer → parser → compiler → VM. The parser produces the
//! tree in `ast`, the compiler lowers it onto the bytecode model from the
//! domain crate, and the VM executes blocks against the live world.

pub mod ast;
pub mod compiler;
pub mod disasm;
pub mod parser;
pub mod token;
pub mod vm;

pub use compiler::{CompileError, Compiler};
pub use parser::{ParseOutcome, Parser};
pub use token::{Lexer, Token};
pub use vm::{Continuation, Exec, ExecError, ScriptContext};
