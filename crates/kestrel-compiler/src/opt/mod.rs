//! The optimization and lowering pipelines.
//!
//! Each pass is a unit struct implementing [`Pass`]. A pipeline is a
//! static slice of passes run in order by [`run_passes`], which also
//! implements the between-pass dumps and the verifier ("auditor") step.

mod code_motion;
mod cse;
mod dce;
mod dedup_reify;
mod frame_load_store;
mod function_analysis;
mod inlining;
mod inst_simplify;
mod load_constants;
mod lower_arguments;
mod mem2reg;
mod simplify_cfg;
mod stack_promotion;
mod type_inference;

pub use code_motion::CodeMotion;
pub use cse::Cse;
pub use dce::Dce;
pub use dedup_reify::DedupReifyArguments;
pub use frame_load_store::FrameLoadStoreOpts;
pub use function_analysis::FunctionAnalysis;
pub use inlining::Inlining;
pub use inst_simplify::InstSimplify;
pub use load_constants::LoadConstants;
pub use lower_arguments::LowerArgumentsArray;
pub use mem2reg::Mem2Reg;
pub use simplify_cfg::SimplifyCfg;
pub use stack_promotion::SimpleStackPromotion;
pub use type_inference::TypeInference;

use crate::config::CompilerConfig;
use crate::error::{Error, Result};
use crate::ir::{BlockId, Function, Module, analysis, dump_module, verify_module};
use crate::regalloc::{
    LoadConstantValueNumbering, LowerCalls, LowerStoreInstrs, MovElimination, RecreateCheapValues,
    RegisterAllocation, SpillRegisters,
};

/// A transformation over the whole module.
///
/// Running a pass twice in a row must leave the IR unchanged the second
/// time.
pub trait Pass: Sync {
    /// Name printed in `*** AFTER <name>` dump headers.
    fn name(&self) -> &'static str;

    fn run(&self, module: &mut Module, config: &CompilerConfig) -> Result<()>;
}

static OPTIMIZER: &[&dyn Pass] = &[
    &InstSimplify,
    &Dce,
    &SimplifyCfg,
    &Mem2Reg,
    &Dce,
    &SimpleStackPromotion,
    &FrameLoadStoreOpts,
    &Mem2Reg,
    &FunctionAnalysis,
    &Inlining,
    &TypeInference,
    &InstSimplify,
    &Cse,
    &Dce,
    &SimplifyCfg,
    &TypeInference,
];

static OPTIMIZER_O0: &[&dyn Pass] = &[&TypeInference];

static LOWERING: &[&dyn Pass] = &[
    &LowerArgumentsArray,
    &DedupReifyArguments,
    &LoadConstants,
    &CodeMotion,
    &Cse,
    &Dce,
    &RegisterAllocation,
    &LowerStoreInstrs,
    &LowerCalls,
    &MovElimination,
    &RecreateCheapValues,
    &LoadConstantValueNumbering,
    &SpillRegisters,
];

static LOWERING_O0: &[&dyn Pass] = &[
    &LowerArgumentsArray,
    &DedupReifyArguments,
    &LoadConstants,
    &RegisterAllocation,
    &LowerStoreInstrs,
    &LowerCalls,
    &SpillRegisters,
];

/// Passes run on the IR produced by lowering the AST.
pub fn optimizer_passes(config: &CompilerConfig) -> &'static [&'static dyn Pass] {
    if config.optimize { OPTIMIZER } else { OPTIMIZER_O0 }
}

/// Passes that turn optimized IR into register-allocated IR.
pub fn lowering_passes(config: &CompilerConfig) -> &'static [&'static dyn Pass] {
    if config.optimize { LOWERING } else { LOWERING_O0 }
}

/// Runs `passes` in order. When `dump` is given, the module is printed
/// into it after every pass.
pub fn run_passes(
    passes: &[&dyn Pass],
    module: &mut Module,
    config: &CompilerConfig,
    mut dump: Option<&mut String>,
) -> Result<()> {
    for pass in passes {
        tracing::debug!(
            pass = pass.name(),
            functions = module.function_ids().len(),
            "running pass"
        );
        pass.run(module, config)?;
        if config.verify_ir {
            verify_module(module).map_err(|err| match err {
                Error::Internal { function, message } => Error::Internal {
                    function,
                    message: format!("after {}: {}", pass.name(), message),
                },
                other => other,
            })?;
        }
        if let Some(out) = dump.as_mut() {
            out.push_str(&format!("*** AFTER {}\n\n", pass.name()));
            out.push_str(&dump_module(module));
            out.push('\n');
        }
    }
    Ok(())
}

/// Applies `transform` to every live function.
pub(crate) fn for_each_function(module: &mut Module, mut transform: impl FnMut(&mut Function) -> bool) -> bool {
    let mut changed = false;
    for id in module.function_ids() {
        changed |= transform(module.function_mut(id));
    }
    changed
}

/// Erases blocks that cannot be reached from the entry and drops their
/// phi entries. Returns true when anything was removed.
pub(crate) fn remove_unreachable_blocks(f: &mut Function) -> bool {
    let live = analysis::reachable(f);
    let dead: Vec<BlockId> = f.block_ids().filter(|b| !live[b.index()]).collect();
    for &b in &dead {
        for s in f.successors(b) {
            f.remove_phi_entries(s, b);
        }
    }
    for &b in &dead {
        f.erase_block(b);
    }
    !dead.is_empty()
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::config::CompilerConfig;
    use crate::ir::Module;
    use crate::irgen::generate;
    use crate::parser::parse;

    pub fn lower(source: &str) -> Module {
        let program = parse(source, false).unwrap();
        generate(&program, false).unwrap()
    }

    pub fn config() -> CompilerConfig {
        CompilerConfig::default()
    }

    /// Runs both pipelines, leaving register-allocated IR.
    pub fn compile(source: &str) -> Module {
        let config = config();
        let mut module = lower(source);
        super::run_passes(super::optimizer_passes(&config), &mut module, &config, None).unwrap();
        super::run_passes(super::lowering_passes(&config), &mut module, &config, None).unwrap();
        module
    }

    pub fn function<'m>(module: &'m Module, name: &str) -> &'m crate::ir::Function {
        module
            .functions
            .iter()
            .find(|f| f.name == name && !f.erased)
            .unwrap_or_else(|| panic!("no live function {}", name))
    }

    pub fn count(module: &Module, name: &str, op: crate::ir::Opcode) -> usize {
        let f = function(module, name);
        f.inst_ids().filter(|i| f.inst(*i).op == op).count()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_pipeline_names() {
        let config = config();
        let names: Vec<&str> = optimizer_passes(&config).iter().map(|p| p.name()).collect();
        assert_eq!(names.first(), Some(&"InstSimplify"));
        assert_eq!(names.last(), Some(&"TypeInference"));
        assert_eq!(names.len(), 16);

        let o0 = CompilerConfig {
            optimize: false,
            ..config
        };
        let names: Vec<&str> = optimizer_passes(&o0).iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["TypeInference"]);
        let names: Vec<&str> = lowering_passes(&o0).iter().map(|p| p.name()).collect();
        assert!(!names.contains(&"MovElimination"));
        assert!(names.contains(&"RegisterAllocation"));
    }

    #[test]
    fn test_dump_between_passes() {
        let mut module = lower("function f(a) { return a + 1; } f(2);");
        let mut text = String::new();
        run_passes(&[&Dce as &dyn Pass, &TypeInference], &mut module, &config(), Some(&mut text)).unwrap();
        assert!(text.starts_with("*** AFTER DCE\n\nfunction global"));
        assert!(text.contains("*** AFTER TypeInference\n\n"));
    }

    #[test]
    fn test_every_pass_is_idempotent() {
        let source = "
            function outer(n) {
                'use strict';
                var total = 0;
                function add(x) { return x + 1; }
                for (var i = 0; i < n; i++) { total = total + add(i); }
                return total;
            }
            outer(3);
        ";
        let config = config();
        let mut module = lower(source);
        for pass in optimizer_passes(&config).iter().chain(lowering_passes(&config)) {
            pass.run(&mut module, &config).unwrap();
            let once = dump_module(&module);
            pass.run(&mut module, &config).unwrap();
            assert_eq!(once, dump_module(&module), "{} is not idempotent", pass.name());
        }
    }
}
