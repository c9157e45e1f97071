//! Call-site analysis.
//!
//! A function's call sites are all known when every closure created for
//! it is used only as the callee of direct calls. The inliner and type
//! inference rely on this to see every argument a parameter can receive.

use rustc_hash::FxHashMap;

use super::Pass;
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{FunctionId, FunctionKind, Module, Opcode, Value};

pub struct FunctionAnalysis;

impl Pass for FunctionAnalysis {
    fn name(&self) -> &'static str {
        "FunctionAnalysis"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        let mut known: FxHashMap<FunctionId, bool> = FxHashMap::default();
        for fid in module.function_ids() {
            let f = module.function(fid);
            let users = f.users();
            for id in f.inst_ids() {
                let inst = f.inst(id);
                if inst.op != Opcode::CreateFunction {
                    continue;
                }
                let Some(target) = inst.operands.first().and_then(Value::as_function) else {
                    continue;
                };
                let closure = Value::Inst(id);
                let direct = users[id.index()].iter().all(|&u| {
                    let call = f.inst(u);
                    call.op == Opcode::Call
                        && call.operands[0] == closure
                        && !call.operands[1..].contains(&closure)
                });
                *known.entry(target).or_insert(true) &= direct;
            }
        }

        for fid in module.function_ids() {
            let f = module.function_mut(fid);
            f.all_callsites_known = f.kind != FunctionKind::Global && known.get(&fid).copied().unwrap_or(true);
        }
        Ok(())
    }
}
