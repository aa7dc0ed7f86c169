// stagec — Stage compiler
//
// Library root. Front end (lexer, parser, resolve), lowering to the scheduled
// region IR, and the copy-elision pass with its post-condition check.

pub mod ast;
pub mod copy_elision;
pub mod diag;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod mutator;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod resolve;
pub mod trace;
pub mod verify;
