//! Local simplification: constant folding, trivial phis, numeric
//! specialization and constant branches.

use std::cmp::Ordering;

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{Function, InstId, Literal, Module, Opcode, Value};

pub struct InstSimplify;

impl Pass for InstSimplify {
    fn name(&self) -> &'static str {
        "InstSimplify"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, |f| {
            let mut changed = false;
            while simplify_function(f) {
                changed = true;
            }
            changed
        });
        Ok(())
    }
}

fn simplify_function(f: &mut Function) -> bool {
    let ids: Vec<InstId> = f.inst_ids().collect();
    let mut changed = false;
    for id in ids {
        if !f.inst(id).erased {
            changed |= simplify(f, id);
        }
    }
    changed
}

fn simplify(f: &mut Function, id: InstId) -> bool {
    let op = f.inst(id).op;
    match op {
        Opcode::Phi => simplify_phi(f, id),
        Opcode::CondBranch => fold_cond_branch(f, id),
        Opcode::AsNumber if f.value_type(&f.inst(id).operands[0]).is_number() => {
            let operand = f.inst(id).operands[0].clone();
            replace(f, id, operand)
        }
        _ if op.is_unary() => {
            if let Some(folded) = f.literal_operand(id, 0).and_then(|l| fold_unary(op, l)) {
                return replace(f, id, Value::Literal(folded));
            }
            specialize(f, id)
        }
        _ if op.is_binary() => {
            let folded = match (f.literal_operand(id, 0), f.literal_operand(id, 1)) {
                (Some(l), Some(r)) => fold_binary(op, l, r),
                _ => None,
            };
            match folded {
                Some(lit) => replace(f, id, Value::Literal(lit)),
                None => specialize(f, id),
            }
        }
        _ => false,
    }
}

fn replace(f: &mut Function, id: InstId, value: Value) -> bool {
    f.replace_all_uses(&Value::Inst(id), &value);
    f.erase_inst(id);
    true
}

/// Rewrites a polymorphic operator whose operands are all numbers into
/// its fixed-width form.
fn specialize(f: &mut Function, id: InstId) -> bool {
    let inst = f.inst(id);
    let Some(numeric) = inst.op.numeric_variant() else {
        return false;
    };
    if !inst.operands.iter().all(|v| f.value_type(v).is_number()) {
        return false;
    }
    let tys: Vec<_> = inst.operands.iter().map(|v| f.value_type(v)).collect();
    let ty = numeric.result_type(&tys);
    let inst = f.inst_mut(id);
    inst.op = numeric;
    inst.ty = ty;
    true
}

/// A phi whose entries all carry the same value, ignoring the phi
/// itself, is that value.
fn simplify_phi(f: &mut Function, id: InstId) -> bool {
    let own = Value::Inst(id);
    let mut unique: Option<&Value> = None;
    for (value, _) in f.inst(id).phi_entries() {
        if *value == own {
            continue;
        }
        match unique {
            None => unique = Some(value),
            Some(seen) if seen == value => {}
            Some(_) => return false,
        }
    }
    match unique.cloned() {
        Some(value) => replace(f, id, value),
        None => false,
    }
}

fn fold_cond_branch(f: &mut Function, id: InstId) -> bool {
    let Some(taken) = f.literal_operand(id, 0).map(Literal::to_boolean) else {
        return false;
    };
    let inst = f.inst(id);
    let block = inst.block;
    let (Some(on_true), Some(on_false)) = (inst.operands[1].as_block(), inst.operands[2].as_block()) else {
        return false;
    };
    let (target, dead) = if taken { (on_true, on_false) } else { (on_false, on_true) };
    if dead != target {
        f.remove_phi_entries(dead, block);
    }
    let inst = f.inst_mut(id);
    inst.op = Opcode::Branch;
    inst.operands = vec![Value::Block(target)];
    true
}

/// ToInt32.
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4294967296.0) as u32 as i32
}

fn foldable(lit: &Literal) -> bool {
    !matches!(lit, Literal::BigInt(_) | Literal::Empty)
}

fn fold_unary(op: Opcode, lit: &Literal) -> Option<Literal> {
    if !foldable(lit) {
        return None;
    }
    Some(match op {
        Opcode::UnaryNot => Literal::Bool(!lit.to_boolean()),
        Opcode::UnaryTypeof => Literal::String(lit.type_of().to_string()),
        Opcode::UnaryMinus => Literal::Number(-lit.to_number()?),
        Opcode::UnaryTilde => Literal::Number(!to_int32(lit.to_number()?) as f64),
        Opcode::UnaryInc => Literal::Number(lit.to_number()? + 1.0),
        Opcode::UnaryDec => Literal::Number(lit.to_number()? - 1.0),
        Opcode::AsNumber => Literal::Number(lit.to_number()?),
        Opcode::AsInt32 => Literal::Number(to_int32(lit.to_number()?) as f64),
        _ => return None,
    })
}

/// Evaluates a binary operator on two constants with JavaScript
/// semantics. Returns `None` for operators that are never folded.
pub(crate) fn fold_binary(op: Opcode, l: &Literal, r: &Literal) -> Option<Literal> {
    if !foldable(l) || !foldable(r) {
        return None;
    }
    let num = |lit: &Literal| lit.to_number();
    let int = |lit: &Literal| lit.to_number().map(to_int32);
    Some(match op {
        Opcode::Add => match (l, r) {
            (Literal::String(_), _) | (_, Literal::String(_)) => {
                Literal::String(format!("{}{}", l.to_js_string(), r.to_js_string()))
            }
            _ => Literal::Number(num(l)? + num(r)?),
        },
        Opcode::Subtract => Literal::Number(num(l)? - num(r)?),
        Opcode::Multiply => Literal::Number(num(l)? * num(r)?),
        Opcode::Divide => Literal::Number(num(l)? / num(r)?),
        Opcode::Modulo => Literal::Number(num(l)? % num(r)?),
        Opcode::Exponent => Literal::Number(js_pow(num(l)?, num(r)?)),
        Opcode::LessThan => Literal::Bool(compare(l, r)? == Some(Ordering::Less)),
        Opcode::GreaterThan => Literal::Bool(compare(l, r)? == Some(Ordering::Greater)),
        Opcode::LessThanOrEqual => {
            Literal::Bool(matches!(compare(l, r)?, Some(Ordering::Less | Ordering::Equal)))
        }
        Opcode::GreaterThanOrEqual => {
            Literal::Bool(matches!(compare(l, r)?, Some(Ordering::Greater | Ordering::Equal)))
        }
        Opcode::Equal => Literal::Bool(loose_equals(l, r)),
        Opcode::NotEqual => Literal::Bool(!loose_equals(l, r)),
        Opcode::StrictlyEqual => Literal::Bool(strict_equals(l, r)),
        Opcode::StrictlyNotEqual => Literal::Bool(!strict_equals(l, r)),
        Opcode::BitAnd => Literal::Number((int(l)? & int(r)?) as f64),
        Opcode::BitOr => Literal::Number((int(l)? | int(r)?) as f64),
        Opcode::BitXor => Literal::Number((int(l)? ^ int(r)?) as f64),
        Opcode::LeftShift => Literal::Number(int(l)?.wrapping_shl(int(r)? as u32 & 31) as f64),
        Opcode::RightShift => Literal::Number((int(l)? >> (int(r)? as u32 & 31)) as f64),
        Opcode::UnsignedRightShift => Literal::Number(((int(l)? as u32) >> (int(r)? as u32 & 31)) as f64),
        _ => return None,
    })
}

fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Abstract relational comparison; the inner `None` is the undefined
/// result produced by NaN.
fn compare(l: &Literal, r: &Literal) -> Option<Option<Ordering>> {
    if let (Literal::String(a), Literal::String(b)) = (l, r) {
        return Some(Some(a.encode_utf16().cmp(b.encode_utf16())));
    }
    Some(l.to_number()?.partial_cmp(&r.to_number()?))
}

fn strict_equals(l: &Literal, r: &Literal) -> bool {
    match (l, r) {
        (Literal::Number(a), Literal::Number(b)) => a == b,
        _ => l == r,
    }
}

fn loose_equals(l: &Literal, r: &Literal) -> bool {
    use Literal::*;
    match (l, r) {
        _ if std::mem::discriminant(l) == std::mem::discriminant(r) => strict_equals(l, r),
        (Undefined | Null, Undefined | Null) => true,
        (Undefined | Null, _) | (_, Undefined | Null) => false,
        (Number(n), String(s)) | (String(s), Number(n)) => *n == crate::ir::string_to_number(s),
        (Bool(b), other) | (other, Bool(b)) => loose_equals(&Number(if *b { 1.0 } else { 0.0 }), other),
        _ => false,
    }
}
