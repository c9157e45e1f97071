//! C-like source backend.
//!
//! Each function becomes `CallResult<HermesValue> fn(void *env, Runtime
//! *runtime, NativeArgs args)`. Registers become locals. Anything that may
//! throw returns a `CallResult` that is checked on the very next line:
//! inside a protected region the check jumps to the handler block,
//! elsewhere it returns the exception status to the caller.

use std::fmt::Write as _;

use super::{allocation, function_index, function_indices, operand_register, register};
use crate::error::{Error, Result};
use crate::ir::{BlockId, Effect, Function, InstId, Literal, Module, Opcode, Value, analysis};

/// Longest source name kept in a generated identifier.
const MAX_NAME_LEN: usize = 24;

/// Emits one translation unit for an allocated module.
pub fn emit_native(module: &Module) -> Result<String> {
    let indices = function_indices(module);
    let ids = module.function_ids();
    let names: Vec<String> = ids
        .iter()
        .enumerate()
        .map(|(i, &id)| symbol_name(i, &module.function(id).name))
        .collect();

    let mut writer = Writer {
        module,
        indices: &indices,
        out: String::new(),
        caches: 0,
    };
    for (&id, name) in ids.iter().zip(&names) {
        writer.function(module.function(id), name)?;
    }

    let mut out = String::new();
    out.push_str("// Generated by kestrel. Do not edit.\n");
    out.push_str("#include \"hermes/VM/static_h.h\"\n\n");
    out.push_str("using namespace hermes::vm;\n\n");
    for name in &names {
        let _ = writeln!(out, "static CallResult<HermesValue> {}(void *env, Runtime *runtime, NativeArgs args);", name);
    }
    out.push('\n');
    let _ = writeln!(out, "static const NativeFunctionEntry functionTable[] = {{");
    for (&id, name) in ids.iter().zip(&names) {
        let f = module.function(id);
        let _ = writeln!(
            out,
            "  {{{}, {}, {}, {}}},",
            c_string(&f.name),
            name,
            f.params.len(),
            f.strict
        );
    }
    out.push_str("};\n\n");
    if writer.caches > 0 {
        let _ = writeln!(out, "static PropertyCacheEntry propCache[{}];\n", writer.caches);
    }
    out.push_str(&writer.out);
    tracing::debug!(functions = ids.len(), caches = writer.caches, "emitted native source");
    Ok(out)
}

/// `_<index>_<name>` when the name is a short identifier, else `_<index>`.
fn symbol_name(index: usize, name: &str) -> String {
    let usable = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if usable {
        format!("_{}_{}", index, name.replace('$', "_"))
    } else {
        format!("_{}", index)
    }
}

fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    let _ = write!(out, "\\{:03o}", b);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn literal_expr(lit: &Literal) -> String {
    match lit {
        Literal::Undefined => "HermesValue::encodeUndefinedValue()".into(),
        Literal::Null => "HermesValue::encodeNullValue()".into(),
        Literal::Empty => "HermesValue::encodeEmptyValue()".into(),
        Literal::Bool(b) => format!("HermesValue::encodeBoolValue({})", b),
        Literal::Number(n) if n.is_nan() => "HermesValue::encodeNaNValue()".into(),
        Literal::Number(n) if n.is_infinite() => format!(
            "HermesValue::encodeNumberValue({}std::numeric_limits<double>::infinity())",
            if *n < 0.0 { "-" } else { "" }
        ),
        Literal::Number(n) => format!("HermesValue::encodeNumberValue({:?})", n),
        Literal::String(s) => format!("_sh_string(runtime, {})", c_string(s)),
        Literal::BigInt(digits) => format!("_sh_bigint(runtime, {})", c_string(digits)),
    }
}

/// Runtime helper of a generic operator.
fn helper(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::UnaryMinus => "_sh_negate",
        Opcode::UnaryTilde => "_sh_bit_not",
        Opcode::UnaryInc => "_sh_inc",
        Opcode::UnaryDec => "_sh_dec",
        Opcode::AsNumber => "_sh_to_numeric",
        Opcode::AsInt32 => "_sh_to_int32",
        Opcode::Add => "_sh_add",
        Opcode::Subtract => "_sh_sub",
        Opcode::Multiply => "_sh_mul",
        Opcode::Divide => "_sh_div",
        Opcode::Modulo => "_sh_mod",
        Opcode::Exponent => "_sh_exp",
        Opcode::Equal => "_sh_equal",
        Opcode::NotEqual => "_sh_not_equal",
        Opcode::LessThan => "_sh_less",
        Opcode::LessThanOrEqual => "_sh_less_equal",
        Opcode::GreaterThan => "_sh_greater",
        Opcode::GreaterThanOrEqual => "_sh_greater_equal",
        Opcode::LeftShift => "_sh_left_shift",
        Opcode::RightShift => "_sh_right_shift",
        Opcode::UnsignedRightShift => "_sh_unsigned_right_shift",
        Opcode::BitAnd => "_sh_bit_and",
        Opcode::BitOr => "_sh_bit_or",
        Opcode::BitXor => "_sh_bit_xor",
        Opcode::In => "_sh_is_in",
        Opcode::InstanceOf => "_sh_instance_of",
        _ => return None,
    })
}

/// Infix operator of a number-only instruction.
fn number_operator(op: Opcode) -> Option<(&'static str, bool)> {
    // (operator, produces a boolean)
    Some(match op {
        Opcode::FAdd => ("+", false),
        Opcode::FSub => ("-", false),
        Opcode::FMul => ("*", false),
        Opcode::FDiv => ("/", false),
        Opcode::FLessThan => ("<", true),
        Opcode::FLessThanOrEqual => ("<=", true),
        Opcode::FGreaterThan => (">", true),
        Opcode::FGreaterThanOrEqual => (">=", true),
        Opcode::FEqual => ("==", true),
        Opcode::FNotEqual => ("!=", true),
        _ => return None,
    })
}

struct Writer<'a> {
    module: &'a Module,
    indices: &'a [Option<u32>],
    out: String,
    caches: u32,
}

impl Writer<'_> {
    fn function(&mut self, f: &Function, name: &str) -> Result<()> {
        let frame_size = allocation(f)?.frame_size;
        let handlers = analysis::innermost_handlers(f);
        let _ = writeln!(self.out, "static CallResult<HermesValue> {}(void *env, Runtime *runtime, NativeArgs args) {{", name);
        for r in 0..frame_size {
            let _ = writeln!(self.out, "  HermesValue r{} = HermesValue::encodeUndefinedValue();", r);
        }
        self.out.push_str("  CallResult<HermesValue> res{ExecutionStatus::RETURNED};\n");
        for b in f.block_ids() {
            let _ = writeln!(self.out, "BB{}:", b.0);
            for &id in &f.block(b).insts {
                self.instruction(f, id, handlers[b.index()])?;
            }
        }
        self.out.push_str("}\n\n");
        Ok(())
    }

    fn line(&mut self, text: String) {
        self.out.push_str("  ");
        self.out.push_str(&text);
        self.out.push('\n');
    }

    /// `res = <call>;` followed by the sentinel check, then stores the
    /// value into `dst` when there is one.
    fn checked(&mut self, call: String, dst: Option<u32>, handler: Option<BlockId>) {
        self.line(format!("res = {};", call));
        self.line(exception_check(handler));
        if let Some(dst) = dst {
            self.line(format!("r{} = *res;", dst));
        }
    }

    fn next_cache(&mut self) -> u32 {
        self.caches += 1;
        self.caches - 1
    }

    fn instruction(&mut self, f: &Function, id: InstId, handler: Option<BlockId>) -> Result<()> {
        let inst = f.inst(id);
        let op = inst.op;
        let reg = |v: &Value| operand_register(f, v).map(|r| format!("r{}", r));
        let operand = |i: usize| -> Result<String> {
            inst.operands
                .get(i)
                .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} has no operand {}", id.0, i)))
                .and_then(reg)
        };
        let dst = || register(f, id);
        let block = |i: usize| -> Result<BlockId> {
            inst.operands
                .get(i)
                .and_then(Value::as_block)
                .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} operand {} is not a block", id.0, i)))
        };
        let name = |i: usize| inst.operands.get(i).and_then(Value::as_str).map(c_string);

        if let Some(call) = helper(op) {
            let args: Vec<String> = (0..inst.operands.len()).map(operand).collect::<Result<_>>()?;
            let text = format!("{}(runtime, {})", call, args.join(", "));
            if op.effect() == Effect::Pure {
                self.line(format!("r{} = {};", dst()?, text));
            } else {
                self.checked(text, Some(dst()?), handler);
            }
            return Ok(());
        }
        if let Some((symbol, boolean)) = number_operator(op) {
            let expr = format!("{}.getNumber() {} {}.getNumber()", operand(0)?, symbol, operand(1)?);
            let wrap = if boolean { "encodeBoolValue" } else { "encodeNumberValue" };
            self.line(format!("r{} = HermesValue::{}({});", dst()?, wrap, expr));
            return Ok(());
        }

        match op {
            Opcode::Phi | Opcode::AllocStack => {}
            Opcode::LoadParam => {
                let expr = match inst.operands.first() {
                    Some(Value::Param(0)) => "args.getThisArg()".to_string(),
                    Some(Value::Param(i)) => format!("args.getArg({})", i - 1),
                    _ => return Err(Error::internal(f.name.clone(), format!("%{} loads no parameter", id.0))),
                };
                self.line(format!("r{} = {};", dst()?, expr));
            }
            Opcode::CreateScope => {
                let size = self.module.frame_vars(f.id).len();
                self.line(format!("r{} = _sh_create_environment(runtime, env, {});", dst()?, size));
            }
            Opcode::GetParentScope => self.line(format!("r{} = HermesValue::encodeObjectValue(env);", dst()?)),
            Opcode::ResolveScope => {
                let (target, from) = match (inst.operands.first(), inst.operands.get(1)) {
                    (Some(Value::Function(t)), Some(Value::Function(s))) => (*t, *s),
                    _ => return Err(Error::internal(f.name.clone(), format!("%{} resolves no scope", id.0))),
                };
                let levels = self.module.scope_distance(from, target).ok_or_else(|| {
                    Error::internal(f.name.clone(), format!("function #{} does not enclose #{}", target.0, from.0))
                })?;
                self.line(format!("r{} = _sh_resolve_environment(runtime, {}, {});", dst()?, operand(2)?, levels));
            }
            Opcode::LoadFrame => {
                let slot = self.var_slot(f, id, 1)?;
                self.line(format!("r{} = _sh_load_from_env({}, {});", dst()?, operand(0)?, slot));
            }
            Opcode::StoreFrame => {
                let slot = self.var_slot(f, id, 2)?;
                self.line(format!("_sh_store_to_env(runtime, {}, {}, {});", operand(0)?, slot, operand(1)?));
            }
            Opcode::CreateFunction => {
                let target = inst
                    .operands
                    .first()
                    .and_then(Value::as_function)
                    .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} creates no function", id.0)))?;
                let index = function_index(self.indices, f, target)?;
                self.line(format!(
                    "r{} = _sh_create_closure(runtime, {}, &functionTable[{}]);",
                    dst()?,
                    operand(1)?,
                    index
                ));
            }
            Opcode::HBCReifyArgumentsLoose | Opcode::HBCReifyArgumentsStrict => {
                let slot = operand_register(f, &inst.operands[0])?;
                let call = if op == Opcode::HBCReifyArgumentsLoose {
                    "_sh_reify_arguments_loose"
                } else {
                    "_sh_reify_arguments_strict"
                };
                self.checked(format!("{}(runtime, args, r{})", call, slot), Some(slot), handler);
            }
            Opcode::HBCGetArgumentsLength => {
                self.line(format!("r{} = _sh_get_arguments_length(runtime, args, {});", dst()?, operand(0)?));
            }
            Opcode::HBCGetArgumentsPropByValLoose | Opcode::HBCGetArgumentsPropByValStrict => {
                let call = if op == Opcode::HBCGetArgumentsPropByValLoose {
                    "_sh_get_arguments_prop_by_val_loose"
                } else {
                    "_sh_get_arguments_prop_by_val_strict"
                };
                let text = format!("{}(runtime, args, {}, {})", call, operand(0)?, operand(1)?);
                self.checked(text, Some(dst()?), handler);
            }
            Opcode::UnionNarrowTrusted | Opcode::Mov | Opcode::HBCSpillMov => {
                let (to, from) = (dst()?, operand(0)?);
                if format!("r{}", to) != from {
                    self.line(format!("r{} = {};", to, from));
                }
            }
            Opcode::LoadProperty => {
                let text = match name(1) {
                    Some(key) => {
                        let cache = self.next_cache();
                        format!("_sh_get_by_id(runtime, {}, {}, &propCache[{}])", operand(0)?, key, cache)
                    }
                    None => format!("_sh_get_by_val(runtime, {}, {})", operand(0)?, operand(1)?),
                };
                self.checked(text, Some(dst()?), handler);
            }
            Opcode::StoreProperty => {
                let text = match name(2) {
                    Some(key) => {
                        let cache = self.next_cache();
                        format!(
                            "_sh_put_by_id(runtime, {}, {}, {}, &propCache[{}], {})",
                            operand(1)?,
                            key,
                            operand(0)?,
                            cache,
                            f.strict
                        )
                    }
                    None => format!(
                        "_sh_put_by_val(runtime, {}, {}, {}, {})",
                        operand(1)?,
                        operand(2)?,
                        operand(0)?,
                        f.strict
                    ),
                };
                self.checked(text, None, handler);
            }
            Opcode::TryLoadGlobalProperty => {
                let key = name(1)
                    .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} loads an unnamed global", id.0)))?;
                let cache = self.next_cache();
                let text = format!("_sh_try_get_by_id(runtime, {}, {}, &propCache[{}])", operand(0)?, key, cache);
                self.checked(text, Some(dst()?), handler);
            }
            Opcode::DeclareGlobalVar => {
                let key = name(0)
                    .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} declares an unnamed global", id.0)))?;
                self.checked(format!("_sh_declare_global_var(runtime, {})", key), None, handler);
            }
            Opcode::DeleteProperty => {
                let text = match name(1) {
                    Some(key) => format!("_sh_del_by_id(runtime, {}, {}, {})", operand(0)?, key, f.strict),
                    None => format!("_sh_del_by_val(runtime, {}, {}, {})", operand(0)?, operand(1)?, f.strict),
                };
                self.checked(text, Some(dst()?), handler);
            }
            Opcode::AllocObject => self.line(format!("r{} = _sh_new_object(runtime);", dst()?)),
            Opcode::AllocArray => {
                let to = dst()?;
                let len = match inst.operands.first().and_then(Value::as_literal) {
                    Some(Literal::Number(n)) => *n as u32,
                    _ => 0,
                };
                self.line(format!("r{} = _sh_new_array(runtime, {});", to, len));
                for (i, value) in inst.operands.iter().enumerate().skip(1) {
                    match value.as_literal() {
                        Some(Literal::Empty) => {}
                        Some(lit) => {
                            self.line(format!("_sh_put_own_by_index(runtime, r{}, {}, {});", to, i - 1, literal_expr(lit)));
                        }
                        None => {
                            self.line(format!("_sh_put_own_by_index(runtime, r{}, {}, {});", to, i - 1, reg(value)?));
                        }
                    }
                }
            }
            Opcode::Call | Opcode::Construct => {
                let argv: Vec<String> = (1..inst.operands.len()).map(operand).collect::<Result<_>>()?;
                let call = if op == Opcode::Call { "_sh_call" } else { "_sh_construct" };
                self.line(format!("{{ HermesValue argv[] = {{{}}};", argv.join(", ")));
                self.line(format!(
                    "  res = {}(runtime, {}, {}, argv); }}",
                    call,
                    operand(0)?,
                    argv.len()
                ));
                self.line(exception_check(handler));
                self.line(format!("r{} = *res;", dst()?));
            }
            Opcode::UnaryNot => self.line(format!("r{} = HermesValue::encodeBoolValue(!_sh_to_boolean({}));", dst()?, operand(0)?)),
            Opcode::UnaryTypeof => self.line(format!("r{} = _sh_typeof(runtime, {});", dst()?, operand(0)?)),
            Opcode::StrictlyEqual | Opcode::StrictlyNotEqual => {
                let not = if op == Opcode::StrictlyNotEqual { "!" } else { "" };
                self.line(format!(
                    "r{} = HermesValue::encodeBoolValue({}_sh_strict_equal({}, {}));",
                    dst()?,
                    not,
                    operand(0)?,
                    operand(1)?
                ));
            }
            Opcode::FModulo => self.line(format!(
                "r{} = HermesValue::encodeNumberValue(std::fmod({}.getNumber(), {}.getNumber()));",
                dst()?,
                operand(0)?,
                operand(1)?
            )),
            Opcode::FNegate => {
                self.line(format!("r{} = HermesValue::encodeNumberValue(-{}.getNumber());", dst()?, operand(0)?))
            }
            Opcode::HBCLoadConst => {
                let lit = f
                    .literal_operand(id, 0)
                    .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} loads no constant", id.0)))?;
                self.line(format!("r{} = {};", dst()?, literal_expr(lit)));
            }
            Opcode::HBCGetGlobalObject => self.line(format!("r{} = runtime->getGlobal();", dst()?)),
            Opcode::Catch => {
                self.line(format!("r{} = runtime->getThrownValue();", dst()?));
                self.line("runtime->clearThrownValue();".into());
            }
            Opcode::Return => self.line(format!("return {};", operand(0)?)),
            Opcode::Throw => {
                self.line(format!("runtime->setThrownValue({});", operand(0)?));
                self.line(match handler {
                    Some(h) => format!("goto BB{};", h.0),
                    None => "return ExecutionStatus::EXCEPTION;".into(),
                });
            }
            Opcode::Unreachable => self.line("_sh_unreachable();".into()),
            Opcode::Branch => self.line(format!("goto BB{};", block(0)?.0)),
            Opcode::CondBranch => {
                self.line(format!("if (_sh_to_boolean({})) goto BB{};", operand(0)?, block(1)?.0));
                self.line(format!("goto BB{};", block(2)?.0));
            }
            Opcode::TryStart | Opcode::TryEnd => self.line(format!("goto BB{};", block(1)?.0)),
            other => {
                return Err(Error::internal(
                    f.name.clone(),
                    format!("{} reached the native emitter", other.name()),
                ));
            }
        }
        Ok(())
    }

    fn var_slot(&self, f: &Function, id: InstId, i: usize) -> Result<u32> {
        f.inst(id)
            .operands
            .get(i)
            .and_then(Value::as_var)
            .map(|v| self.module.frame_slot(v))
            .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} names no frame variable", id.0)))
    }
}

/// Sentinel check placed right after every call that may throw.
fn exception_check(handler: Option<BlockId>) -> String {
    match handler {
        Some(h) => format!("if (res == ExecutionStatus::EXCEPTION) {{ goto BB{}; }}", h.0),
        None => "if (res == ExecutionStatus::EXCEPTION) { return ExecutionStatus::EXCEPTION; }".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::test_util::*;

    fn emit(source: &str) -> String {
        emit_native(&compile(source)).unwrap()
    }

    #[test]
    fn test_prologue_and_tables() {
        let text = emit("function add(a, b) { return a + b; } print(add(1, 2));");
        assert!(text.starts_with("// Generated by kestrel."));
        assert!(text.contains("static CallResult<HermesValue> _0_global(void *env, Runtime *runtime, NativeArgs args);"));
        assert!(text.contains("{\"add\", _1_add, 2, false},"));
        assert!(text.contains("static PropertyCacheEntry propCache["));
    }

    #[test]
    fn test_every_call_checks_the_sentinel() {
        let text = emit("function f(g) { var x = g(1); return g(x) + 1; }");
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let mut calls = 0;
        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("res = ") {
                calls += 1;
                assert!(lines[i + 1].starts_with("if (res == ExecutionStatus::EXCEPTION)"), "{}", line);
            }
        }
        assert!(calls >= 2);
    }

    #[test]
    fn test_exception_inside_try_jumps_to_handler() {
        let text = emit("function f(g) { try { g(); } catch (e) { return e; } return 1; }");
        assert!(text.contains("if (res == ExecutionStatus::EXCEPTION) { goto BB"));
        assert!(text.contains("runtime->getThrownValue();"));
    }

    #[test]
    fn test_symbol_names() {
        assert_eq!(symbol_name(3, "decrementArguments"), "_3_decrementArguments");
        assert_eq!(symbol_name(4, "a-very-odd name"), "_4");
        assert_eq!(symbol_name(5, &"x".repeat(40)), "_5");
        assert_eq!(c_string("a\"b\n"), "\"a\\\"b\\n\"");
    }
}
