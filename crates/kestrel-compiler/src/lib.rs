// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # kestrel-compiler
//!
//! An ahead-of-time JavaScript compiler.
//!
//! ## Overview
//!
//! Source text goes through these stages:
//! - the lexer and parser, with an optional typed-superset grammar and
//!   ESTree JSON output
//! - lowering to a control-flow-graph IR in SSA form
//! - a fixed sequence of optimization passes
//! - register allocation and the register-level lowering passes
//! - a bytecode container for the register VM, or C-like native source
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kestrel_compiler::{Compiler, CompilerConfig, DumpOptions};
//!
//! let compiler = Compiler::new(CompilerConfig::default());
//! let output = compiler.compile("function f(a) { return a + 1; }", &DumpOptions::default())?;
//! ```

#![warn(clippy::all)]

pub mod ast;
pub mod async_compiler;
pub mod backend;
pub mod config;
pub mod error;
pub mod intern;
pub mod ir;
pub mod irgen;
pub mod lexer;
pub mod opt;
pub mod parser;
pub mod regalloc;

#[cfg(feature = "async")]
pub use async_compiler::AsyncCompiler;
#[cfg(feature = "parallel")]
pub use async_compiler::ParallelCompiler;
pub use backend::BytecodeModule;
pub use config::{CompilerConfig, Target};
pub use error::{Error, Result};
pub use ir::Module;

/// Stack size for threads that run the pipeline. Parsing and lowering
/// recurse once per level of [`parser::MAX_NESTING_DEPTH`].
pub const COMPILER_STACK_SIZE: usize = 16 * 1024 * 1024;

use ast::Program;
use ir::dump_module;

/// Which textual dumps [`Compiler::compile`] collects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// `*** INITIAL STATE` and one `*** AFTER <pass>` snapshot per pass.
    pub between_passes: bool,
    /// The IR once the optimizer has finished.
    pub ir: bool,
    /// The final register-allocated IR.
    pub ra: bool,
}

/// What a backend produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Bytecode(BytecodeModule),
    Native(String),
}

/// Result of compiling one unit.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// Register-allocated IR.
    pub module: Module,
    /// Requested dumps, concatenated in pipeline order.
    pub dump: String,
    pub output: Output,
}

/// Runs the whole pipeline for one unit at a time.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Parses with the grammar the configuration selects.
    pub fn parse(&self, source: &str) -> Result<Program> {
        parser::parse(source, self.config.typescript)
    }

    /// Parses and lowers to unoptimized IR.
    pub fn lower(&self, source: &str) -> Result<Module> {
        let program = self.parse(source)?;
        irgen::generate(&program, self.config.strict)
    }

    /// Runs the optimizer pipeline.
    pub fn optimize(&self, module: &mut Module, dump: Option<&mut String>) -> Result<()> {
        opt::run_passes(opt::optimizer_passes(&self.config), module, &self.config, dump)
    }

    /// Runs the lowering pipeline, register allocation included.
    pub fn allocate(&self, module: &mut Module, dump: Option<&mut String>) -> Result<()> {
        opt::run_passes(opt::lowering_passes(&self.config), module, &self.config, dump)
    }

    /// Emits allocated IR with the configured backend.
    pub fn emit(&self, module: &Module) -> Result<Output> {
        match self.config.target {
            Target::Bytecode => BytecodeModule::from_module(module).map(Output::Bytecode),
            Target::Native => backend::emit_native(module).map(Output::Native),
        }
    }

    pub fn compile(&self, source: &str, dumps: &DumpOptions) -> Result<CompileOutput> {
        let mut module = self.lower(source)?;
        let mut dump = String::new();

        if dumps.between_passes {
            dump.push_str("*** INITIAL STATE\n\n");
            dump.push_str(&dump_module(&module));
            dump.push('\n');
        }
        let between = if dumps.between_passes { Some(&mut dump) } else { None };
        self.optimize(&mut module, between)?;
        if dumps.ir {
            dump.push_str(&dump_module(&module));
        }

        let between = if dumps.between_passes { Some(&mut dump) } else { None };
        self.allocate(&mut module, between)?;
        if dumps.ra {
            dump.push_str(&dump_module(&module));
        }

        let output = self.emit(&module)?;
        tracing::debug!(
            functions = module.function_ids().len(),
            target = ?self.config.target,
            "compiled unit"
        );
        Ok(CompileOutput { module, dump, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_to_bytecode() {
        let output = Compiler::default()
            .compile("function f(a) { return a + 1; } f(1);", &DumpOptions::default())
            .unwrap();
        let Output::Bytecode(bytecode) = output.output else {
            panic!("expected bytecode");
        };
        assert_eq!(bytecode.functions.len(), output.module.function_ids().len());
        assert!(output.dump.is_empty());
    }

    #[test]
    fn test_dump_between_passes_starts_with_initial_state() {
        let dumps = DumpOptions {
            between_passes: true,
            ..DumpOptions::default()
        };
        let output = Compiler::default().compile("var x = 1;", &dumps).unwrap();
        assert!(output.dump.starts_with("*** INITIAL STATE\n\nfunction global"));
        assert!(output.dump.contains("*** AFTER Mem2Reg\n\n"));
        assert!(output.dump.contains("*** AFTER SpillRegisters\n\n"));
    }

    #[test]
    fn test_native_target() {
        let config = CompilerConfig {
            target: Target::Native,
            ..CompilerConfig::default()
        };
        let output = Compiler::new(config)
            .compile("print(1);", &DumpOptions { ra: true, ..DumpOptions::default() })
            .unwrap();
        assert!(matches!(output.output, Output::Native(ref text) if text.contains("_0_global")));
        assert!(output.dump.contains("function global"));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = Compiler::default().compile("var = ;", &DumpOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_nesting_limit_on_compiler_threads() {
        let run = |source: String| {
            std::thread::Builder::new()
                .stack_size(COMPILER_STACK_SIZE)
                .spawn(move || Compiler::default().compile(&source, &DumpOptions::default()).map(|_| ()))
                .unwrap()
                .join()
                .unwrap()
        };
        let depth = parser::MAX_NESTING_DEPTH / 3;
        assert!(run(format!("var x = {}y{};", "-(".repeat(depth), ")".repeat(depth))).is_ok());
        let err = run(format!("var x = {}1{};", "[".repeat(100_000), "]".repeat(100_000))).unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }));
    }
}
