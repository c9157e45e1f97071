//! Register bytecode.
//!
//! Every instruction is one opcode byte followed by operands whose widths
//! are given by [`OpCode::operands`]. Registers are a single byte except in
//! `MovLong` and the argument window of calls. Jumps are signed 32-bit
//! offsets from the start of the jumping instruction; they are written as
//! zero while a function is laid out and patched once every block has an
//! offset.

use std::fmt::Write as _;

use super::{allocation, function_index, function_indices, operand_register, register};
use crate::error::{Error, Result};
use crate::intern::{Interner, StringId, StringTable};
use crate::ir::{BlockId, Function, InstId, Literal, Module, Opcode, Value, analysis, is_negative_zero};

/// Width and meaning of one encoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Reg8,
    Reg32,
    UInt8,
    UInt16,
    UInt32,
    Int32,
    Double,
    /// Signed 32-bit jump offset.
    Addr32,
    /// 32-bit string table index.
    String,
    /// 32-bit function table index.
    Function,
}

impl OperandKind {
    pub fn size(self) -> usize {
        match self {
            OperandKind::Reg8 | OperandKind::UInt8 => 1,
            OperandKind::UInt16 => 2,
            OperandKind::Double => 8,
            _ => 4,
        }
    }
}

macro_rules! bytecode_ops {
    ($($(#[$doc:meta])* $name:ident($($kind:ident),*);)*) => {
        /// Operation codes of the register VM.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum OpCode {
            $($(#[$doc])* $name,)*
        }

        impl OpCode {
            const ALL: &'static [OpCode] = &[$(OpCode::$name),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => stringify!($name),)*
                }
            }

            /// Encoded operands in order.
            pub fn operands(self) -> &'static [OperandKind] {
                match self {
                    $(OpCode::$name => &[$(OperandKind::$kind),*],)*
                }
            }

            pub fn from_byte(byte: u8) -> Option<OpCode> {
                Self::ALL.get(byte as usize).copied()
            }

            /// Encoded size including the opcode byte.
            pub fn size(self) -> usize {
                1 + self.operands().iter().map(|k| k.size()).sum::<usize>()
            }
        }
    };
}

bytecode_ops! {
    /// dst, src
    Mov(Reg8, Reg8);
    MovLong(Reg32, Reg32);
    LoadConstUndefined(Reg8);
    LoadConstNull(Reg8);
    LoadConstEmpty(Reg8);
    LoadConstTrue(Reg8);
    LoadConstFalse(Reg8);
    LoadConstZero(Reg8);
    LoadConstUInt8(Reg8, UInt8);
    LoadConstInt(Reg8, Int32);
    LoadConstDouble(Reg8, Double);
    LoadConstString(Reg8, String);
    /// dst, decimal digits
    LoadConstBigInt(Reg8, String);
    LoadParam(Reg8, UInt32);
    GetGlobalObject(Reg8);
    CreateEnvironment(Reg8);
    GetParentEnvironment(Reg8);
    /// dst, env, levels
    ResolveEnvironment(Reg8, Reg8, UInt32);
    /// dst, env, slot
    LoadFromEnvironment(Reg8, Reg8, UInt32);
    /// env, slot, value
    StoreToEnvironment(Reg8, UInt32, Reg8);
    /// dst, env, function
    CreateClosure(Reg8, Reg8, Function);
    ReifyArgumentsLoose(Reg8);
    ReifyArgumentsStrict(Reg8);
    /// dst, lazy arguments register
    GetArgumentsLength(Reg8, Reg8);
    /// dst, index, lazy arguments register
    GetArgumentsPropByValLoose(Reg8, Reg8, Reg8);
    GetArgumentsPropByValStrict(Reg8, Reg8, Reg8);
    /// dst, object, cache index, name
    GetById(Reg8, Reg8, UInt8, String);
    TryGetById(Reg8, Reg8, UInt8, String);
    GetByVal(Reg8, Reg8, Reg8);
    /// object, value, cache index, name
    PutById(Reg8, Reg8, UInt8, String);
    /// object, key, value
    PutByVal(Reg8, Reg8, Reg8);
    DelById(Reg8, Reg8, String);
    DelByVal(Reg8, Reg8, Reg8);
    DeclareGlobalVar(String);
    NewObject(Reg8);
    /// dst, length
    NewArray(Reg8, UInt16);
    /// dst, length, element count, first buffer index
    NewArrayWithBuffer(Reg8, UInt16, UInt16, UInt32);
    /// dst, callee, first register of `this` and the arguments, count
    Call(Reg8, Reg8, Reg32, UInt8);
    Construct(Reg8, Reg8, Reg32, UInt8);
    Negate(Reg8, Reg8);
    Not(Reg8, Reg8);
    TypeOf(Reg8, Reg8);
    BitNot(Reg8, Reg8);
    Inc(Reg8, Reg8);
    Dec(Reg8, Reg8);
    ToNumeric(Reg8, Reg8);
    ToInt32(Reg8, Reg8);
    Add(Reg8, Reg8, Reg8);
    AddN(Reg8, Reg8, Reg8);
    Sub(Reg8, Reg8, Reg8);
    SubN(Reg8, Reg8, Reg8);
    Mul(Reg8, Reg8, Reg8);
    MulN(Reg8, Reg8, Reg8);
    Div(Reg8, Reg8, Reg8);
    DivN(Reg8, Reg8, Reg8);
    Mod(Reg8, Reg8, Reg8);
    Exp(Reg8, Reg8, Reg8);
    Eq(Reg8, Reg8, Reg8);
    Neq(Reg8, Reg8, Reg8);
    StrictEq(Reg8, Reg8, Reg8);
    StrictNeq(Reg8, Reg8, Reg8);
    Less(Reg8, Reg8, Reg8);
    LessEq(Reg8, Reg8, Reg8);
    Greater(Reg8, Reg8, Reg8);
    GreaterEq(Reg8, Reg8, Reg8);
    LShift(Reg8, Reg8, Reg8);
    RShift(Reg8, Reg8, Reg8);
    URshift(Reg8, Reg8, Reg8);
    BitAnd(Reg8, Reg8, Reg8);
    BitOr(Reg8, Reg8, Reg8);
    BitXor(Reg8, Reg8, Reg8);
    IsIn(Reg8, Reg8, Reg8);
    InstanceOf(Reg8, Reg8, Reg8);
    /// Stores the thrown value; first instruction of a handler.
    Catch(Reg8);
    Throw(Reg8);
    Ret(Reg8);
    Unreachable();
    Jmp(Addr32);
    JmpTrue(Addr32, Reg8);
    JmpFalse(Addr32, Reg8);
}

/// A decoded operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Reg(u32),
    UInt(u32),
    Int(i32),
    Double(f64),
    Jump(i32),
    String(StringId),
    Function(u32),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInst {
    pub offset: usize,
    pub op: OpCode,
    pub operands: Vec<Operand>,
}

/// A protected byte range and the handler it unwinds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub target: u32,
}

/// An element of an array literal buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferItem {
    Undefined,
    Null,
    Empty,
    Bool(bool),
    Number(f64),
    String(StringId),
    BigInt(StringId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeFunction {
    pub name: StringId,
    pub param_count: u32,
    pub frame_size: u32,
    /// Slots in the environment the function creates.
    pub env_size: u32,
    pub strict: bool,
    /// Names of the frame variables closures may capture.
    pub captures: Vec<StringId>,
    pub code: Vec<u8>,
    /// Innermost handlers first.
    pub exceptions: Vec<ExceptionEntry>,
    pub array_buffer: Vec<BufferItem>,
}

/// A bytecode container: one string table and a function table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BytecodeModule {
    pub strings: StringTable,
    pub functions: Vec<BytecodeFunction>,
}

const MAGIC: &[u8; 4] = b"KHBC";
const VERSION: u32 = 1;

impl BytecodeModule {
    /// Emits every live function of an allocated module.
    pub fn from_module(module: &Module) -> Result<Self> {
        let mut strings = StringTable::new();
        let functions = emit_functions(module, &mut strings, 0)?;
        Ok(Self { strings, functions })
    }

    /// Joins units emitted against one shared string table. Each unit
    /// must have been emitted with `base` equal to the number of functions
    /// in the units before it.
    pub fn bundle(strings: StringTable, units: Vec<Vec<BytecodeFunction>>) -> Self {
        Self {
            strings,
            functions: units.into_iter().flatten().collect(),
        }
    }

    /// Binary container layout, all integers little-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        put_u32(&mut out, VERSION);

        put_u32(&mut out, self.strings.len() as u32);
        for (_, s) in self.strings.iter() {
            put_u32(&mut out, s.len() as u32);
            out.extend_from_slice(s.as_bytes());
        }

        put_u32(&mut out, self.functions.len() as u32);
        for func in &self.functions {
            put_u32(&mut out, func.name.0);
            put_u32(&mut out, func.param_count);
            put_u32(&mut out, func.frame_size);
            put_u32(&mut out, func.env_size);
            out.push(u8::from(func.strict));
            put_u32(&mut out, func.captures.len() as u32);
            for c in &func.captures {
                put_u32(&mut out, c.0);
            }
            put_u32(&mut out, func.array_buffer.len() as u32);
            for item in &func.array_buffer {
                match *item {
                    BufferItem::Undefined => out.push(0),
                    BufferItem::Null => out.push(1),
                    BufferItem::Empty => out.push(2),
                    BufferItem::Bool(b) => out.push(if b { 3 } else { 4 }),
                    BufferItem::Number(n) => {
                        out.push(5);
                        out.extend_from_slice(&n.to_le_bytes());
                    }
                    BufferItem::String(id) => {
                        out.push(6);
                        put_u32(&mut out, id.0);
                    }
                    BufferItem::BigInt(id) => {
                        out.push(7);
                        put_u32(&mut out, id.0);
                    }
                }
            }
            put_u32(&mut out, func.exceptions.len() as u32);
            for e in &func.exceptions {
                put_u32(&mut out, e.start);
                put_u32(&mut out, e.end);
                put_u32(&mut out, e.target);
            }
            put_u32(&mut out, func.code.len() as u32);
            out.extend_from_slice(&func.code);
        }
        out
    }

    /// Text listing of every function.
    pub fn disassemble(&self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Bytecode module: {} functions, {} strings",
            self.functions.len(),
            self.strings.len()
        );
        for (i, func) in self.functions.iter().enumerate() {
            let name = self.strings.resolve(func.name).unwrap_or("?");
            let _ = writeln!(
                out,
                "\nFunction<{}> #{} ({} params, {} registers, {} env slots{}):",
                name,
                i,
                func.param_count,
                func.frame_size,
                func.env_size,
                if func.strict { ", strict" } else { "" }
            );
            if !func.captures.is_empty() {
                let names: Vec<&str> = func
                    .captures
                    .iter()
                    .map(|&c| self.strings.resolve(c).unwrap_or("?"))
                    .collect();
                let _ = writeln!(out, "  captures: {}", names.join(", "));
            }
            for inst in decode(&func.code)? {
                let operands: Vec<String> = inst
                    .operands
                    .iter()
                    .map(|op| self.operand_text(op, inst.offset))
                    .collect();
                let _ = writeln!(out, "  {:>5}: {} {}", inst.offset, inst.op.name(), operands.join(", "));
            }
            if !func.exceptions.is_empty() {
                let _ = writeln!(out, "  Exception handlers:");
                for e in &func.exceptions {
                    let _ = writeln!(out, "    [{}, {}) -> {}", e.start, e.end, e.target);
                }
            }
        }
        Ok(out)
    }

    fn operand_text(&self, op: &Operand, offset: usize) -> String {
        match *op {
            Operand::Reg(r) => format!("r{}", r),
            Operand::UInt(n) => n.to_string(),
            Operand::Int(n) => n.to_string(),
            Operand::Double(n) => Literal::Number(n).to_string(),
            Operand::Jump(rel) => format!("L{}", offset as i64 + rel as i64),
            Operand::String(id) => format!("{:?}", self.strings.resolve(id).unwrap_or("?")),
            Operand::Function(i) => format!("#{}", i),
        }
    }
}

fn put_u32(out: &mut Vec<u8>, n: u32) {
    out.extend_from_slice(&n.to_le_bytes());
}

/// Splits a code stream into instructions.
pub fn decode(code: &[u8]) -> Result<Vec<DecodedInst>> {
    let malformed = |offset: usize, what: &str| Error::internal("bytecode", format!("{} at offset {}", what, offset));
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = OpCode::from_byte(code[pc]).ok_or_else(|| malformed(pc, "unknown opcode"))?;
        if pc + op.size() > code.len() {
            return Err(malformed(pc, "truncated instruction"));
        }
        let mut at = pc + 1;
        let mut operands = Vec::with_capacity(op.operands().len());
        for &kind in op.operands() {
            let bytes = &code[at..at + kind.size()];
            let word = || u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            operands.push(match kind {
                OperandKind::Reg8 => Operand::Reg(u32::from(bytes[0])),
                OperandKind::UInt8 => Operand::UInt(u32::from(bytes[0])),
                OperandKind::UInt16 => Operand::UInt(u32::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
                OperandKind::Reg32 => Operand::Reg(word()),
                OperandKind::UInt32 => Operand::UInt(word()),
                OperandKind::Int32 => Operand::Int(word() as i32),
                OperandKind::Addr32 => Operand::Jump(word() as i32),
                OperandKind::String => Operand::String(StringId(word())),
                OperandKind::Function => Operand::Function(word()),
                OperandKind::Double => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    Operand::Double(f64::from_le_bytes(raw))
                }
            });
            at += kind.size();
        }
        out.push(DecodedInst { offset: pc, op, operands });
        pc = at;
    }
    Ok(out)
}

/// Emits every live function of `module`. Closure references are offset
/// by `base` so that units can be bundled.
pub fn emit_functions<I: Interner>(module: &Module, strings: &mut I, base: u32) -> Result<Vec<BytecodeFunction>> {
    let indices = function_indices(module);
    let mut out = Vec::new();
    for id in module.function_ids() {
        let f = module.function(id);
        let encoder = Encoder {
            module,
            f,
            indices: &indices,
            base,
            strings: &mut *strings,
            code: Vec::new(),
            fixups: Vec::new(),
            block_offsets: vec![None; f.blocks.len()],
            caches: 0,
            array_buffer: Vec::new(),
        };
        out.push(encoder.finish()?);
    }
    tracing::debug!(functions = out.len(), "emitted bytecode");
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
enum Arg {
    Reg(u32),
    UInt(u32),
    Int(i32),
    Double(f64),
    Label(BlockId),
}

struct Encoder<'a, I> {
    module: &'a Module,
    f: &'a Function,
    indices: &'a [Option<u32>],
    base: u32,
    strings: &'a mut I,
    code: Vec<u8>,
    /// (operand position, instruction start, target)
    fixups: Vec<(usize, usize, BlockId)>,
    block_offsets: Vec<Option<u32>>,
    caches: u8,
    array_buffer: Vec<BufferItem>,
}

impl<I: Interner> Encoder<'_, I> {
    fn finish(mut self) -> Result<BytecodeFunction> {
        let f = self.f;
        let layout: Vec<BlockId> = f.block_ids().collect();
        for (i, &b) in layout.iter().enumerate() {
            self.block_offsets[b.index()] = Some(self.code.len() as u32);
            let next = layout.get(i + 1).copied();
            for &id in &f.block(b).insts {
                self.instruction(id, next)?;
            }
        }
        for &(at, start, target) in &self.fixups {
            let dest = self.block_offsets[target.index()]
                .ok_or_else(|| Error::internal(f.name.clone(), format!("jump to erased block %BB{}", target.0)))?;
            let rel = dest as i64 - start as i64;
            self.code[at..at + 4].copy_from_slice(&(rel as i32).to_le_bytes());
        }
        let exceptions = self.exception_table(&layout)?;

        let frame_vars = self.module.frame_vars(f.id);
        let captures = frame_vars
            .iter()
            .map(|&v| self.strings.intern(&self.module.variable(v).name))
            .collect();
        Ok(BytecodeFunction {
            name: self.strings.intern(&f.name),
            param_count: f.params.len() as u32 + 1,
            frame_size: allocation(f)?.frame_size,
            env_size: frame_vars.len() as u32,
            strict: f.strict,
            captures,
            code: self.code,
            exceptions,
            array_buffer: self.array_buffer,
        })
    }

    /// One entry per contiguous run of protected blocks.
    fn exception_table(&self, layout: &[BlockId]) -> Result<Vec<ExceptionEntry>> {
        let mut regions = analysis::try_regions(self.f);
        regions.sort_by_key(|r| r.blocks.len());
        let end_of = |i: usize| match layout.get(i + 1) {
            Some(b) => self.block_offsets[b.index()].unwrap_or(0),
            None => self.code.len() as u32,
        };
        let mut out = Vec::new();
        for region in regions {
            let target = self.block_offsets[region.handler.index()]
                .ok_or_else(|| Error::internal(self.f.name.clone(), "handler block was not emitted"))?;
            let mut open: Option<u32> = None;
            for (i, b) in layout.iter().enumerate() {
                let inside = region.blocks.binary_search(b).is_ok();
                let start = self.block_offsets[b.index()].unwrap_or(0);
                match (inside, open) {
                    (true, None) => open = Some(start),
                    (false, Some(s)) => {
                        out.push(ExceptionEntry { start: s, end: start, target });
                        open = None;
                    }
                    _ => {}
                }
                if inside && i + 1 == layout.len() {
                    if let Some(s) = open.take() {
                        out.push(ExceptionEntry { start: s, end: end_of(i), target });
                    }
                }
            }
        }
        Ok(out.into_iter().filter(|e| e.start < e.end).collect())
    }

    fn emit(&mut self, op: OpCode, args: &[Arg]) -> Result<()> {
        let kinds = op.operands();
        if kinds.len() != args.len() {
            return Err(self.error(format!("{} takes {} operands, got {}", op.name(), kinds.len(), args.len())));
        }
        let start = self.code.len();
        self.code.push(op as u8);
        for (&kind, &arg) in kinds.iter().zip(args) {
            match (kind, arg) {
                (OperandKind::Reg8, Arg::Reg(r)) => {
                    let r = u8::try_from(r).map_err(|_| self.error(format!("r{} does not fit {}", r, op.name())))?;
                    self.code.push(r);
                }
                (OperandKind::UInt8, Arg::UInt(n)) => {
                    let n = u8::try_from(n).map_err(|_| self.error(format!("{} does not fit {}", n, op.name())))?;
                    self.code.push(n);
                }
                (OperandKind::UInt16, Arg::UInt(n)) => {
                    let n = u16::try_from(n).map_err(|_| self.error(format!("{} does not fit {}", n, op.name())))?;
                    self.code.extend_from_slice(&n.to_le_bytes());
                }
                (OperandKind::Reg32, Arg::Reg(n))
                | (OperandKind::UInt32 | OperandKind::String | OperandKind::Function, Arg::UInt(n)) => {
                    self.code.extend_from_slice(&n.to_le_bytes());
                }
                (OperandKind::Int32, Arg::Int(n)) => self.code.extend_from_slice(&n.to_le_bytes()),
                (OperandKind::Double, Arg::Double(n)) => self.code.extend_from_slice(&n.to_le_bytes()),
                (OperandKind::Addr32, Arg::Label(b)) => {
                    self.fixups.push((self.code.len(), start, b));
                    self.code.extend_from_slice(&0i32.to_le_bytes());
                }
                (kind, arg) => return Err(self.error(format!("{:?} given for {:?} of {}", arg, kind, op.name()))),
            }
        }
        Ok(())
    }

    fn error(&self, message: String) -> Error {
        Error::internal(self.f.name.clone(), message)
    }

    fn reg(&self, id: InstId) -> Result<Arg> {
        register(self.f, id).map(Arg::Reg)
    }

    fn operand(&self, id: InstId, i: usize) -> Result<Arg> {
        let value = self
            .f
            .inst(id)
            .operands
            .get(i)
            .ok_or_else(|| self.error(format!("%{} has no operand {}", id.0, i)))?;
        operand_register(self.f, value).map(Arg::Reg)
    }

    fn string(&mut self, s: &str) -> Arg {
        Arg::UInt(self.strings.intern(s).0)
    }

    fn next_cache(&mut self) -> Arg {
        self.caches = self.caches.saturating_add(1);
        Arg::UInt(u32::from(self.caches))
    }

    /// Name of a property operand encoded in the instruction.
    fn literal_name(&self, id: InstId, i: usize) -> Option<String> {
        self.f.inst(id).operands.get(i).and_then(Value::as_str).map(str::to_owned)
    }

    fn jump_unless_next(&mut self, target: BlockId, next: Option<BlockId>) -> Result<()> {
        if next == Some(target) {
            return Ok(());
        }
        self.emit(OpCode::Jmp, &[Arg::Label(target)])
    }

    fn block_operand(&self, id: InstId, i: usize) -> Result<BlockId> {
        self.f
            .inst(id)
            .operands
            .get(i)
            .and_then(Value::as_block)
            .ok_or_else(|| self.error(format!("%{} operand {} is not a block", id.0, i)))
    }

    fn instruction(&mut self, id: InstId, next: Option<BlockId>) -> Result<()> {
        let f = self.f;
        let inst = f.inst(id);
        let op = inst.op;
        if let Some(code) = unary_opcode(op) {
            return self.emit(code, &[self.reg(id)?, self.operand(id, 0)?]);
        }
        if let Some(code) = binary_opcode(op) {
            return self.emit(code, &[self.reg(id)?, self.operand(id, 0)?, self.operand(id, 1)?]);
        }
        match op {
            Opcode::Phi | Opcode::AllocStack => Ok(()),
            Opcode::LoadParam => {
                let Some(Value::Param(i)) = inst.operands.first() else {
                    return Err(self.error(format!("%{} loads no parameter", id.0)));
                };
                self.emit(OpCode::LoadParam, &[self.reg(id)?, Arg::UInt(*i)])
            }
            Opcode::CreateScope => self.emit(OpCode::CreateEnvironment, &[self.reg(id)?]),
            Opcode::GetParentScope => self.emit(OpCode::GetParentEnvironment, &[self.reg(id)?]),
            Opcode::ResolveScope => {
                let (target, from) = match (inst.operands.first(), inst.operands.get(1)) {
                    (Some(Value::Function(t)), Some(Value::Function(s))) => (*t, *s),
                    _ => return Err(self.error(format!("%{} resolves no scope", id.0))),
                };
                let levels = self
                    .module
                    .scope_distance(from, target)
                    .ok_or_else(|| self.error(format!("function #{} does not enclose #{}", target.0, from.0)))?;
                self.emit(OpCode::ResolveEnvironment, &[self.reg(id)?, self.operand(id, 2)?, Arg::UInt(levels)])
            }
            Opcode::LoadFrame => {
                let slot = self.var_slot(id, 1)?;
                self.emit(OpCode::LoadFromEnvironment, &[self.reg(id)?, self.operand(id, 0)?, slot])
            }
            Opcode::StoreFrame => {
                let slot = self.var_slot(id, 2)?;
                self.emit(OpCode::StoreToEnvironment, &[self.operand(id, 0)?, slot, self.operand(id, 1)?])
            }
            Opcode::CreateFunction => {
                let Some(target) = inst.operands.first().and_then(Value::as_function) else {
                    return Err(self.error(format!("%{} creates no function", id.0)));
                };
                let index = function_index(self.indices, f, target)? + self.base;
                self.emit(OpCode::CreateClosure, &[self.reg(id)?, self.operand(id, 1)?, Arg::UInt(index)])
            }
            Opcode::HBCReifyArgumentsLoose => self.emit(OpCode::ReifyArgumentsLoose, &[self.operand(id, 0)?]),
            Opcode::HBCReifyArgumentsStrict => self.emit(OpCode::ReifyArgumentsStrict, &[self.operand(id, 0)?]),
            Opcode::HBCGetArgumentsLength => {
                self.emit(OpCode::GetArgumentsLength, &[self.reg(id)?, self.operand(id, 0)?])
            }
            Opcode::HBCGetArgumentsPropByValLoose | Opcode::HBCGetArgumentsPropByValStrict => {
                let code = if op == Opcode::HBCGetArgumentsPropByValLoose {
                    OpCode::GetArgumentsPropByValLoose
                } else {
                    OpCode::GetArgumentsPropByValStrict
                };
                self.emit(code, &[self.reg(id)?, self.operand(id, 0)?, self.operand(id, 1)?])
            }
            Opcode::UnionNarrowTrusted | Opcode::Mov | Opcode::HBCSpillMov => {
                let (dst, src) = (register(f, id)?, operand_register(f, &inst.operands[0])?);
                if dst == src {
                    Ok(())
                } else if dst <= u32::from(u8::MAX) && src <= u32::from(u8::MAX) {
                    self.emit(OpCode::Mov, &[Arg::Reg(dst), Arg::Reg(src)])
                } else {
                    self.emit(OpCode::MovLong, &[Arg::Reg(dst), Arg::Reg(src)])
                }
            }
            Opcode::LoadProperty => match self.literal_name(id, 1) {
                Some(name) => {
                    let (cache, name) = (self.next_cache(), self.string(&name));
                    self.emit(OpCode::GetById, &[self.reg(id)?, self.operand(id, 0)?, cache, name])
                }
                None => self.emit(OpCode::GetByVal, &[self.reg(id)?, self.operand(id, 0)?, self.operand(id, 1)?]),
            },
            Opcode::StoreProperty => match self.literal_name(id, 2) {
                Some(name) => {
                    let (cache, name) = (self.next_cache(), self.string(&name));
                    self.emit(OpCode::PutById, &[self.operand(id, 1)?, self.operand(id, 0)?, cache, name])
                }
                None => self.emit(OpCode::PutByVal, &[self.operand(id, 1)?, self.operand(id, 2)?, self.operand(id, 0)?]),
            },
            Opcode::TryLoadGlobalProperty => {
                let name = self
                    .literal_name(id, 1)
                    .ok_or_else(|| self.error(format!("%{} loads an unnamed global", id.0)))?;
                let (cache, name) = (self.next_cache(), self.string(&name));
                self.emit(OpCode::TryGetById, &[self.reg(id)?, self.operand(id, 0)?, cache, name])
            }
            Opcode::DeclareGlobalVar => {
                let name = self
                    .literal_name(id, 0)
                    .ok_or_else(|| self.error(format!("%{} declares an unnamed global", id.0)))?;
                let name = self.string(&name);
                self.emit(OpCode::DeclareGlobalVar, &[name])
            }
            Opcode::DeleteProperty => match self.literal_name(id, 1) {
                Some(name) => {
                    let name = self.string(&name);
                    self.emit(OpCode::DelById, &[self.reg(id)?, self.operand(id, 0)?, name])
                }
                None => self.emit(OpCode::DelByVal, &[self.reg(id)?, self.operand(id, 0)?, self.operand(id, 1)?]),
            },
            Opcode::AllocObject => self.emit(OpCode::NewObject, &[self.reg(id)?]),
            Opcode::AllocArray => self.array(id),
            Opcode::Call | Opcode::Construct => {
                let argc = inst.operands.len() - 1;
                let argc = u32::try_from(argc)
                    .ok()
                    .filter(|&n| n <= u32::from(u8::MAX))
                    .ok_or_else(|| {
                        Error::resource_limit(f.name.clone(), format!("call passes {} arguments, limit is 255", argc))
                    })?;
                let code = if op == Opcode::Call { OpCode::Call } else { OpCode::Construct };
                self.emit(code, &[self.reg(id)?, self.operand(id, 0)?, self.operand(id, 1)?, Arg::UInt(argc)])
            }
            Opcode::HBCLoadConst => {
                let lit = f
                    .literal_operand(id, 0)
                    .ok_or_else(|| self.error(format!("%{} loads no constant", id.0)))?
                    .clone();
                self.constant(id, &lit)
            }
            Opcode::HBCGetGlobalObject => self.emit(OpCode::GetGlobalObject, &[self.reg(id)?]),
            Opcode::Catch => self.emit(OpCode::Catch, &[self.reg(id)?]),
            Opcode::Return => self.emit(OpCode::Ret, &[self.operand(id, 0)?]),
            Opcode::Throw => self.emit(OpCode::Throw, &[self.operand(id, 0)?]),
            Opcode::Unreachable => self.emit(OpCode::Unreachable, &[]),
            Opcode::Branch => {
                let target = self.block_operand(id, 0)?;
                self.jump_unless_next(target, next)
            }
            Opcode::CondBranch => {
                let (yes, no) = (self.block_operand(id, 1)?, self.block_operand(id, 2)?);
                let cond = self.operand(id, 0)?;
                if next == Some(yes) {
                    self.emit(OpCode::JmpFalse, &[Arg::Label(no), cond])
                } else {
                    self.emit(OpCode::JmpTrue, &[Arg::Label(yes), cond])?;
                    self.jump_unless_next(no, next)
                }
            }
            // Regions are recorded in the exception table; entering or
            // leaving one is a plain jump.
            Opcode::TryStart | Opcode::TryEnd => {
                let target = self.block_operand(id, 1)?;
                self.jump_unless_next(target, next)
            }
            other => Err(self.error(format!("{} reached the bytecode emitter", other.name()))),
        }
    }

    fn var_slot(&self, id: InstId, i: usize) -> Result<Arg> {
        let var = self
            .f
            .inst(id)
            .operands
            .get(i)
            .and_then(Value::as_var)
            .ok_or_else(|| self.error(format!("%{} names no frame variable", id.0)))?;
        Ok(Arg::UInt(self.module.frame_slot(var)))
    }

    fn constant(&mut self, id: InstId, lit: &Literal) -> Result<()> {
        let dst = self.reg(id)?;
        match lit {
            Literal::Undefined => self.emit(OpCode::LoadConstUndefined, &[dst]),
            Literal::Null => self.emit(OpCode::LoadConstNull, &[dst]),
            Literal::Empty => self.emit(OpCode::LoadConstEmpty, &[dst]),
            Literal::Bool(true) => self.emit(OpCode::LoadConstTrue, &[dst]),
            Literal::Bool(false) => self.emit(OpCode::LoadConstFalse, &[dst]),
            Literal::Number(n) => {
                let n = *n;
                let integral = n.fract() == 0.0 && !is_negative_zero(n);
                if integral && n == 0.0 {
                    self.emit(OpCode::LoadConstZero, &[dst])
                } else if integral && (0.0..256.0).contains(&n) {
                    self.emit(OpCode::LoadConstUInt8, &[dst, Arg::UInt(n as u32)])
                } else if integral && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) {
                    self.emit(OpCode::LoadConstInt, &[dst, Arg::Int(n as i32)])
                } else {
                    self.emit(OpCode::LoadConstDouble, &[dst, Arg::Double(n)])
                }
            }
            Literal::String(s) => {
                let s = self.string(s);
                self.emit(OpCode::LoadConstString, &[dst, s])
            }
            Literal::BigInt(digits) => {
                let s = self.string(digits);
                self.emit(OpCode::LoadConstBigInt, &[dst, s])
            }
        }
    }

    fn array(&mut self, id: InstId) -> Result<()> {
        let operands = self.f.inst(id).operands.clone();
        let len = match operands.first().and_then(Value::as_literal) {
            Some(Literal::Number(n)) => *n as u32,
            _ => 0,
        };
        if operands.len() <= 1 {
            return self.emit(OpCode::NewArray, &[self.reg(id)?, Arg::UInt(len)]);
        }
        let first = self.array_buffer.len() as u32;
        for value in &operands[1..] {
            let item = match value.as_literal() {
                Some(Literal::Undefined) => BufferItem::Undefined,
                Some(Literal::Null) => BufferItem::Null,
                Some(Literal::Empty) => BufferItem::Empty,
                Some(Literal::Bool(b)) => BufferItem::Bool(*b),
                Some(Literal::Number(n)) => BufferItem::Number(*n),
                Some(Literal::String(s)) => BufferItem::String(self.strings.intern(s)),
                Some(Literal::BigInt(s)) => BufferItem::BigInt(self.strings.intern(s)),
                None => return Err(self.error(format!("%{} has a non-literal array element", id.0))),
            };
            self.array_buffer.push(item);
        }
        let count = (operands.len() - 1) as u32;
        self.emit(
            OpCode::NewArrayWithBuffer,
            &[self.reg(id)?, Arg::UInt(len), Arg::UInt(count), Arg::UInt(first)],
        )
    }
}

fn unary_opcode(op: Opcode) -> Option<OpCode> {
    Some(match op {
        Opcode::UnaryMinus | Opcode::FNegate => OpCode::Negate,
        Opcode::UnaryNot => OpCode::Not,
        Opcode::UnaryTypeof => OpCode::TypeOf,
        Opcode::UnaryTilde => OpCode::BitNot,
        Opcode::UnaryInc => OpCode::Inc,
        Opcode::UnaryDec => OpCode::Dec,
        Opcode::AsNumber => OpCode::ToNumeric,
        Opcode::AsInt32 => OpCode::ToInt32,
        _ => return None,
    })
}

fn binary_opcode(op: Opcode) -> Option<OpCode> {
    Some(match op {
        Opcode::Add => OpCode::Add,
        Opcode::FAdd => OpCode::AddN,
        Opcode::Subtract => OpCode::Sub,
        Opcode::FSub => OpCode::SubN,
        Opcode::Multiply => OpCode::Mul,
        Opcode::FMul => OpCode::MulN,
        Opcode::Divide => OpCode::Div,
        Opcode::FDiv => OpCode::DivN,
        Opcode::Modulo | Opcode::FModulo => OpCode::Mod,
        Opcode::Exponent => OpCode::Exp,
        Opcode::Equal => OpCode::Eq,
        Opcode::NotEqual => OpCode::Neq,
        Opcode::StrictlyEqual | Opcode::FEqual => OpCode::StrictEq,
        Opcode::StrictlyNotEqual | Opcode::FNotEqual => OpCode::StrictNeq,
        Opcode::LessThan | Opcode::FLessThan => OpCode::Less,
        Opcode::LessThanOrEqual | Opcode::FLessThanOrEqual => OpCode::LessEq,
        Opcode::GreaterThan | Opcode::FGreaterThan => OpCode::Greater,
        Opcode::GreaterThanOrEqual | Opcode::FGreaterThanOrEqual => OpCode::GreaterEq,
        Opcode::LeftShift => OpCode::LShift,
        Opcode::RightShift => OpCode::RShift,
        Opcode::UnsignedRightShift => OpCode::URshift,
        Opcode::BitAnd => OpCode::BitAnd,
        Opcode::BitOr => OpCode::BitOr,
        Opcode::BitXor => OpCode::BitXor,
        Opcode::In => OpCode::IsIn,
        Opcode::InstanceOf => OpCode::InstanceOf,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::test_util::*;

    fn emit(source: &str) -> BytecodeModule {
        BytecodeModule::from_module(&compile(source)).unwrap()
    }

    fn function<'m>(module: &'m BytecodeModule, name: &str) -> &'m BytecodeFunction {
        module
            .functions
            .iter()
            .find(|f| module.strings.resolve(f.name) == Some(name))
            .unwrap()
    }

    fn ops(func: &BytecodeFunction) -> Vec<OpCode> {
        decode(&func.code).unwrap().into_iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_opcode_table_roundtrip() {
        for (i, &op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(op as usize, i);
            assert_eq!(OpCode::from_byte(i as u8), Some(op));
        }
        assert_eq!(OpCode::Call.size(), 1 + 1 + 1 + 4 + 1);
    }

    #[test]
    fn test_function_metadata() {
        let module = emit("function add(a, b) { 'use strict'; return a + b; } add(1, 2);");
        let add = function(&module, "add");
        assert_eq!(add.param_count, 3);
        assert!(add.strict);
        assert!(add.frame_size >= 2);
        assert!(ops(add).contains(&OpCode::Ret));
        assert!(ops(function(&module, "global")).contains(&OpCode::Call));
    }

    #[test]
    fn test_jumps_land_on_instructions() {
        let module = emit("function f(n) { var s = 0; for (var i = 0; i < n; i++) { s = s + i; } return s; }");
        let f = function(&module, "f");
        let insts = decode(&f.code).unwrap();
        let starts: Vec<usize> = insts.iter().map(|i| i.offset).collect();
        let mut jumps = 0;
        for inst in &insts {
            for op in &inst.operands {
                if let Operand::Jump(rel) = op {
                    let target = (inst.offset as i64 + *rel as i64) as usize;
                    assert!(starts.contains(&target), "jump from {} to {}", inst.offset, target);
                    jumps += 1;
                }
            }
        }
        assert!(jumps >= 2);
    }

    #[test]
    fn test_try_region_has_handler_entry() {
        let module = emit("function f(g) { try { g(); } catch (e) { return e; } return 1; }");
        let f = function(&module, "f");
        assert!(!f.exceptions.is_empty());
        let insts = decode(&f.code).unwrap();
        for entry in &f.exceptions {
            assert!(entry.start < entry.end);
            let at_target = insts.iter().find(|i| i.offset == entry.target as usize).unwrap();
            assert_eq!(at_target.op, OpCode::Catch);
        }
    }

    #[test]
    fn test_disassembly_and_container() {
        let module = emit("var x = [1, 'two', 3]; print(x.length);");
        let text = module.disassemble().unwrap();
        assert!(text.starts_with("Bytecode module:"));
        assert!(text.contains("Function<global>"));
        assert!(text.contains("NewArrayWithBuffer"));
        assert!(text.contains("\"length\""));

        let bytes = module.serialize();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), VERSION);
    }

    #[test]
    fn test_truncated_code_is_rejected() {
        let code = [OpCode::Mov as u8, 1];
        assert!(matches!(decode(&code), Err(Error::Internal { .. })));
    }
}
