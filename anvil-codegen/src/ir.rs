//! The language-neutral IR consumed by the back end.
//!
//! Entities are dense integer handles into tables owned by [`Function`];
//! instructions and blocks hold handles, never references. The
//! [`FunctionBuilder`] is the construction surface the embedder (and the
//! integration tests) use to assemble a function.

use core::fmt;

use smallvec::SmallVec;

use anvil_asm::Cond;

/// A value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    /// 8-bit integer.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Sixteen 8-bit lanes.
    I8X16,
    /// Eight 16-bit lanes.
    I16X8,
    /// Four 32-bit lanes.
    I32X4,
    /// Two 64-bit lanes.
    I64X2,
    /// Four float lanes.
    F32X4,
    /// Two double lanes.
    F64X2,
}

impl Type {
    /// Total width in bits.
    pub const fn bits(&self) -> u32 {
        match self {
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 => 32,
            Type::I64 => 64,
            Type::F32 => 32,
            Type::F64 => 64,
            _ => 128,
        }
    }

    /// True for the scalar integer types.
    pub const fn is_int(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    /// True for the scalar float types.
    pub const fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// True for the 128-bit vector types.
    pub const fn is_vector(&self) -> bool {
        !self.is_int() && !self.is_float()
    }

    /// Lane width in bits (the full width for scalars).
    pub const fn lane_bits(&self) -> u32 {
        match self {
            Type::I8X16 => 8,
            Type::I16X8 => 16,
            Type::I32X4 | Type::F32X4 => 32,
            Type::I64X2 | Type::F64X2 => 64,
            t => t.bits(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::I8X16 => "i8x16",
            Type::I16X8 => "i16x8",
            Type::I32X4 => "i32x4",
            Type::I64X2 => "i64x2",
            Type::F32X4 => "f32x4",
            Type::F64X2 => "f64x2",
        };
        f.write_str(s)
    }
}

macro_rules! entity_handle {
    ($(#[$doc:meta] $name:ident, $prefix:literal;)*) => {
        $(
            #[$doc]
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            pub struct $name(u32);

            impl $name {
                /// Wrap a dense index.
                pub const fn from_u32(index: u32) -> Self {
                    Self(index)
                }

                /// The dense index.
                pub const fn as_u32(&self) -> u32 {
                    self.0
                }

                /// The dense index as `usize`.
                pub const fn index(&self) -> usize {
                    self.0 as usize
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }
        )*
    };
}

entity_handle! {
    /// An SSA value.
    Value, "v";
    /// A basic block.
    Block, "block";
    /// An IR instruction.
    IrInst, "inst";
    /// A function-local stack slot.
    StackSlot, "ss";
    /// A global value.
    GlobalValue, "gv";
    /// A jump table.
    JumpTable, "jt";
    /// A declared external function.
    FuncRef, "fn";
}

/// Integer comparison kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntCC {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Slt,
    /// Signed greater than or equal.
    Sge,
    /// Signed greater than.
    Sgt,
    /// Signed less than or equal.
    Sle,
    /// Unsigned less than.
    Ult,
    /// Unsigned greater than or equal.
    Uge,
    /// Unsigned greater than.
    Ugt,
    /// Unsigned less than or equal.
    Ule,
}

impl IntCC {
    /// The canonical condition-code mapping.
    pub const fn cond(&self) -> Cond {
        match self {
            IntCC::Eq => Cond::Eq,
            IntCC::Ne => Cond::Ne,
            IntCC::Slt => Cond::Lt,
            IntCC::Sge => Cond::Ge,
            IntCC::Sgt => Cond::Gt,
            IntCC::Sle => Cond::Le,
            IntCC::Ult => Cond::Lo,
            IntCC::Uge => Cond::Hs,
            IntCC::Ugt => Cond::Hi,
            IntCC::Ule => Cond::Ls,
        }
    }
}

/// Float comparison kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FloatCC {
    /// Equal.
    Eq,
    /// Not equal (or unordered).
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl FloatCC {
    /// Condition code after an FCMP.
    pub const fn cond(&self) -> Cond {
        match self {
            FloatCC::Eq => Cond::Eq,
            FloatCC::Ne => Cond::Ne,
            FloatCC::Lt => Cond::Mi,
            FloatCC::Le => Cond::Ls,
            FloatCC::Gt => Cond::Gt,
            FloatCC::Ge => Cond::Ge,
        }
    }
}

/// Runtime trap identifiers carried through UDF immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrapCode {
    /// Out-of-bounds heap access.
    HeapOutOfBounds,
    /// Integer overflow.
    IntegerOverflow,
    /// Integer division by zero.
    IntegerDivisionByZero,
    /// Float-to-integer conversion out of range.
    BadConversionToInteger,
    /// Unreachable code was reached.
    UnreachableCodeReached,
    /// Interrupt request.
    Interrupt,
    /// Embedder-defined code.
    User(u16),
}

impl TrapCode {
    /// The 16-bit code placed in the UDF immediate.
    pub const fn code(&self) -> u16 {
        match self {
            TrapCode::HeapOutOfBounds => 1,
            TrapCode::IntegerOverflow => 2,
            TrapCode::IntegerDivisionByZero => 3,
            TrapCode::BadConversionToInteger => 4,
            TrapCode::UnreachableCodeReached => 5,
            TrapCode::Interrupt => 6,
            TrapCode::User(c) => *c,
        }
    }
}

/// IR-level atomic read-modify-write operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AtomicOp {
    /// Add.
    Add,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise exclusive OR.
    Xor,
    /// Exchange.
    Xchg,
    /// Signed maximum.
    Smax,
    /// Signed minimum.
    Smin,
    /// Unsigned maximum.
    Umax,
    /// Unsigned minimum.
    Umin,
}

/// The shape of a global value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GlobalValueData {
    /// The VM context pointer, pinned in a fixed register.
    VmCtx,
    /// The address of an external symbol.
    Symbol {
        /// Symbol name.
        name: String,
        /// Constant offset folded into the relocation.
        offset: i64,
    },
    /// A constant offset from another global value.
    IAddImm {
        /// The base global.
        base: GlobalValue,
        /// Byte offset.
        offset: i64,
    },
    /// A pointer loaded from another global value's address.
    Load {
        /// The base global.
        base: GlobalValue,
        /// Byte offset of the loaded pointer.
        offset: i32,
    },
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signature {
    /// Parameter types, in order.
    pub params: Vec<Type>,
    /// Return types, in order.
    pub returns: Vec<Type>,
}

impl Signature {
    /// A signature from parameter and return types.
    pub fn new(params: Vec<Type>, returns: Vec<Type>) -> Self {
        Self { params, returns }
    }
}

/// A stack slot's layout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StackSlotData {
    /// Requested size in bytes.
    pub size: u32,
}

/// A jump table: the list of per-index targets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JumpTableData {
    /// Targets indexed by the dispatch value.
    pub targets: Vec<Block>,
}

/// A declared external function.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtFuncData {
    /// Linker-visible name.
    pub name: String,
    /// Callee signature.
    pub signature: Signature,
}

/// Operation selector for the register-shaped instruction formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Opcode {
    // Integer arithmetic.
    Iadd,
    Isub,
    Imul,
    Smulhi,
    Umulhi,
    Sdiv,
    Udiv,
    // Bitwise.
    Band,
    Bor,
    Bxor,
    BandNot,
    BorNot,
    Bnot,
    // Shifts and rotates.
    Ishl,
    Ushr,
    Sshr,
    Rotr,
    // Bit manipulation.
    Clz,
    Cls,
    Bitrev,
    Bswap,
    // Saturating arithmetic.
    SaddSat,
    UaddSat,
    SsubSat,
    UsubSat,
    // Overflow-checked arithmetic, trapping forms.
    UaddOverflowTrap,
    SaddOverflowTrap,
    UsubOverflowTrap,
    SsubOverflowTrap,
    UmulOverflowTrap,
    SmulOverflowTrap,
    // Overflow-checked arithmetic with carry-in, flag-out forms.
    UaddOverflowCin,
    SaddOverflowCin,
    UsubOverflowCin,
    SsubOverflowCin,
    // Width changes.
    Uextend,
    Sextend,
    Ireduce,
    // Integer min/max (vector).
    Smax,
    Smin,
    Umax,
    Umin,
    // Floating point.
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fmax,
    Fmin,
    Fneg,
    Fabs,
    Sqrt,
    Fma,
    Floor,
    Ceil,
    Trunc,
    Nearest,
    Fpromote,
    Fdemote,
    FcvtToSint,
    FcvtToUint,
    FcvtFromSint,
    FcvtFromUint,
    // Memory.
    Load,
    Uload8,
    Sload8,
    Uload16,
    Sload16,
    Uload32,
    Sload32,
    Store,
    Istore8,
    Istore16,
    Istore32,
    // Vector lane traffic.
    Splat,
    Snarrow,
    Unarrow,
    Uunarrow,
    SwidenLow,
    UwidenLow,
}

/// An IR instruction's payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum InstData {
    /// Integer constant.
    Iconst { value: u64 },
    /// 32-bit float constant.
    F32Const { bits: u32 },
    /// 64-bit float constant.
    F64Const { bits: u64 },
    /// One-operand operation.
    Unary { op: Opcode, arg: Value },
    /// Two-operand operation.
    Binary { op: Opcode, args: [Value; 2] },
    /// Three-operand operation (`fma`).
    Ternary { op: Opcode, args: [Value; 3] },
    /// Integer comparison producing a boolean.
    IntCompare { cond: IntCC, args: [Value; 2] },
    /// Float comparison producing a boolean.
    FloatCompare { cond: FloatCC, args: [Value; 2] },
    /// Two-operand operation that traps on overflow.
    BinaryTrap { op: Opcode, code: TrapCode, args: [Value; 2] },
    /// Carry-in arithmetic producing `(result, carry_out)`.
    BinaryCin { op: Opcode, args: [Value; 3] },
    /// Conditional select.
    Select { args: [Value; 3] },
    /// Memory load; `op` picks the width and extension.
    Load { op: Opcode, ptr: Value, offset: i32 },
    /// Memory store of `args[0]` to `args[1]`.
    Store { op: Opcode, args: [Value; 2], offset: i32 },
    /// Address of a stack slot.
    StackAddr { slot: StackSlot, offset: i32 },
    /// Load from a stack slot.
    StackLoad { slot: StackSlot, offset: i32 },
    /// Store to a stack slot.
    StackStore { arg: Value, slot: StackSlot, offset: i32 },
    /// Materialize a global value.
    UnaryGlobalValue { gv: GlobalValue },
    /// Lane extraction.
    ExtractLane { arg: Value, lane: u8 },
    /// Lane insertion of `args[1]` into `args[0]`.
    InsertLane { args: [Value; 2], lane: u8 },
    /// Direct call.
    Call { func: FuncRef, args: Vec<Value> },
    /// Indirect call through `callee`.
    CallIndirect { callee: Value, args: Vec<Value> },
    /// Unconditional jump.
    Jump { dest: Block },
    /// Two-way conditional branch on a boolean value.
    Brif { cond: Value, then_dest: Block, else_dest: Block },
    /// Jump-table dispatch.
    BrTable { index: Value, table: JumpTable, default: Block },
    /// Return from the function.
    Return { args: Vec<Value> },
    /// Tail call.
    ReturnCall { func: FuncRef, args: Vec<Value> },
    /// Indirect tail call.
    ReturnCallIndirect { callee: Value, args: Vec<Value> },
    /// Unconditional trap.
    Trap { code: TrapCode },
    /// Atomic read-modify-write of `args[1]` at address `args[0]`.
    AtomicRmw { op: AtomicOp, ty: Type, args: [Value; 2] },
    /// Atomic compare-and-swap: address, expected, replacement.
    AtomicCas { ty: Type, args: [Value; 3] },
    /// Sequentially consistent atomic load.
    AtomicLoad { ty: Type, ptr: Value },
    /// Sequentially consistent atomic store of `args[0]` to `args[1]`.
    AtomicStore { ty: Type, args: [Value; 2] },
}

impl InstData {
    /// True if this instruction ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstData::Jump { .. }
                | InstData::Brif { .. }
                | InstData::BrTable { .. }
                | InstData::Return { .. }
                | InstData::ReturnCall { .. }
                | InstData::ReturnCallIndirect { .. }
                | InstData::Trap { .. }
        )
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct BlockData {
    insts: Vec<IrInst>,
}

/// A single IR function, ready for compilation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    /// Symbol name of the function.
    pub name: String,
    /// Its signature.
    pub signature: Signature,
    value_types: Vec<Type>,
    insts: Vec<InstData>,
    inst_results: Vec<SmallVec<[Value; 2]>>,
    blocks: Vec<BlockData>,
    block_order: Vec<Block>,
    arg_values: Vec<Value>,
    stack_slots: Vec<StackSlotData>,
    global_values: Vec<GlobalValueData>,
    jump_tables: Vec<JumpTableData>,
    ext_funcs: Vec<ExtFuncData>,
}

impl Function {
    /// A new function whose entry block carries the signature's parameters
    /// as values.
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let mut func = Function {
            name: name.into(),
            signature: signature.clone(),
            value_types: Vec::new(),
            insts: Vec::new(),
            inst_results: Vec::new(),
            blocks: vec![BlockData { insts: Vec::new() }],
            block_order: vec![Block::from_u32(0)],
            arg_values: Vec::new(),
            stack_slots: Vec::new(),
            global_values: Vec::new(),
            jump_tables: Vec::new(),
            ext_funcs: Vec::new(),
        };
        for &ty in &signature.params {
            let v = func.make_value(ty);
            func.arg_values.push(v);
        }
        func
    }

    fn make_value(&mut self, ty: Type) -> Value {
        let v = Value::from_u32(self.value_types.len() as u32);
        self.value_types.push(ty);
        v
    }

    /// The entry block.
    pub fn entry_block(&self) -> Block {
        self.block_order[0]
    }

    /// Blocks in layout order.
    pub fn blocks(&self) -> &[Block] {
        &self.block_order
    }

    /// The instructions of a block, in order.
    pub fn block_insts(&self, block: Block) -> &[IrInst] {
        &self.blocks[block.index()].insts
    }

    /// The values bound to the function's parameters.
    pub fn arg_values(&self) -> &[Value] {
        &self.arg_values
    }

    /// An instruction's payload.
    pub fn inst_data(&self, inst: IrInst) -> &InstData {
        &self.insts[inst.index()]
    }

    /// An instruction's result values.
    pub fn inst_results(&self, inst: IrInst) -> &[Value] {
        &self.inst_results[inst.index()]
    }

    /// A value's type.
    pub fn value_type(&self, value: Value) -> Type {
        self.value_types[value.index()]
    }

    /// A stack slot's layout data.
    pub fn stack_slot(&self, slot: StackSlot) -> StackSlotData {
        self.stack_slots[slot.index()]
    }

    /// Number of declared stack slots.
    pub fn stack_slots(&self) -> impl Iterator<Item = (StackSlot, StackSlotData)> + '_ {
        self.stack_slots
            .iter()
            .enumerate()
            .map(|(i, d)| (StackSlot::from_u32(i as u32), *d))
    }

    /// A global value's shape.
    pub fn global_value(&self, gv: GlobalValue) -> &GlobalValueData {
        &self.global_values[gv.index()]
    }

    /// A jump table's targets.
    pub fn jump_table(&self, jt: JumpTable) -> &JumpTableData {
        &self.jump_tables[jt.index()]
    }

    /// A declared external function.
    pub fn ext_func(&self, func: FuncRef) -> &ExtFuncData {
        &self.ext_funcs[func.index()]
    }
}

/// Builder over [`Function`], appending instructions to a current block.
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    current: Block,
}

impl FunctionBuilder {
    /// Start building a function.
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let func = Function::new(name, signature);
        let current = func.entry_block();
        FunctionBuilder { func, current }
    }

    /// Finish and return the function.
    pub fn finish(self) -> Function {
        self.func
    }

    /// The parameter values of the function.
    pub fn args(&self) -> Vec<Value> {
        self.func.arg_values.clone()
    }

    /// Create a new empty block.
    pub fn create_block(&mut self) -> Block {
        let block = Block::from_u32(self.func.blocks.len() as u32);
        self.func.blocks.push(BlockData { insts: Vec::new() });
        self.func.block_order.push(block);
        block
    }

    /// Direct appended instructions at `block`.
    pub fn switch_to_block(&mut self, block: Block) {
        self.current = block;
    }

    /// Declare a stack slot of `size` bytes.
    pub fn create_stack_slot(&mut self, size: u32) -> StackSlot {
        let slot = StackSlot::from_u32(self.func.stack_slots.len() as u32);
        self.func.stack_slots.push(StackSlotData { size });
        slot
    }

    /// Declare a global value.
    pub fn create_global_value(&mut self, data: GlobalValueData) -> GlobalValue {
        let gv = GlobalValue::from_u32(self.func.global_values.len() as u32);
        self.func.global_values.push(data);
        gv
    }

    /// Declare a jump table.
    pub fn create_jump_table(&mut self, targets: Vec<Block>) -> JumpTable {
        let jt = JumpTable::from_u32(self.func.jump_tables.len() as u32);
        self.func.jump_tables.push(JumpTableData { targets });
        jt
    }

    /// Declare an external function.
    pub fn declare_ext_func(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
    ) -> FuncRef {
        let func = FuncRef::from_u32(self.func.ext_funcs.len() as u32);
        self.func.ext_funcs.push(ExtFuncData {
            name: name.into(),
            signature,
        });
        func
    }

    fn push(&mut self, data: InstData, result_tys: &[Type]) -> SmallVec<[Value; 2]> {
        let inst = IrInst::from_u32(self.func.insts.len() as u32);
        self.func.insts.push(data);
        let results: SmallVec<[Value; 2]> =
            result_tys.iter().map(|&ty| self.func.make_value(ty)).collect();
        self.func.inst_results.push(results.clone());
        self.func.blocks[self.current.index()].insts.push(inst);
        results
    }

    fn push1(&mut self, data: InstData, ty: Type) -> Value {
        self.push(data, &[ty])[0]
    }

    /// Integer constant.
    pub fn iconst(&mut self, ty: Type, value: u64) -> Value {
        self.push1(InstData::Iconst { value }, ty)
    }

    /// 32-bit float constant from raw bits.
    pub fn f32const(&mut self, bits: u32) -> Value {
        self.push1(InstData::F32Const { bits }, Type::F32)
    }

    /// 64-bit float constant from raw bits.
    pub fn f64const(&mut self, bits: u64) -> Value {
        self.push1(InstData::F64Const { bits }, Type::F64)
    }

    /// Two-operand operation whose result has the type of `a`.
    pub fn binary(&mut self, op: Opcode, a: Value, b: Value) -> Value {
        let ty = self.func.value_type(a);
        self.push1(InstData::Binary { op, args: [a, b] }, ty)
    }

    /// One-operand operation with an explicit result type.
    pub fn unary_typed(&mut self, op: Opcode, ty: Type, a: Value) -> Value {
        self.push1(InstData::Unary { op, arg: a }, ty)
    }

    /// One-operand operation whose result has the type of `a`.
    pub fn unary(&mut self, op: Opcode, a: Value) -> Value {
        let ty = self.func.value_type(a);
        self.unary_typed(op, ty, a)
    }

    /// `fma`-shaped operation.
    pub fn ternary(&mut self, op: Opcode, a: Value, b: Value, c: Value) -> Value {
        let ty = self.func.value_type(a);
        self.push1(InstData::Ternary { op, args: [a, b, c] }, ty)
    }

    /// Integer comparison; the boolean result is `i8`.
    pub fn icmp(&mut self, cond: IntCC, a: Value, b: Value) -> Value {
        self.push1(InstData::IntCompare { cond, args: [a, b] }, Type::I8)
    }

    /// Float comparison; the boolean result is `i8`.
    pub fn fcmp(&mut self, cond: FloatCC, a: Value, b: Value) -> Value {
        self.push1(InstData::FloatCompare { cond, args: [a, b] }, Type::I8)
    }

    /// Overflow-checked operation that traps with `code`.
    pub fn binary_trap(&mut self, op: Opcode, code: TrapCode, a: Value, b: Value) -> Value {
        let ty = self.func.value_type(a);
        self.push1(InstData::BinaryTrap { op, code, args: [a, b] }, ty)
    }

    /// Carry-in arithmetic: returns `(result, carry_out)`.
    pub fn binary_cin(&mut self, op: Opcode, a: Value, b: Value, cin: Value) -> (Value, Value) {
        let ty = self.func.value_type(a);
        let res = self.push(InstData::BinaryCin { op, args: [a, b, cin] }, &[ty, Type::I8]);
        (res[0], res[1])
    }

    /// Conditional select.
    pub fn select(&mut self, cond: Value, x: Value, y: Value) -> Value {
        let ty = self.func.value_type(x);
        self.push1(InstData::Select { args: [cond, x, y] }, ty)
    }

    /// Typed load; `op` picks width and extension, `ty` the result type.
    pub fn load(&mut self, op: Opcode, ty: Type, ptr: Value, offset: i32) -> Value {
        self.push1(InstData::Load { op, ptr, offset }, ty)
    }

    /// Typed store.
    pub fn store(&mut self, op: Opcode, value: Value, ptr: Value, offset: i32) {
        self.push(InstData::Store { op, args: [value, ptr], offset }, &[]);
    }

    /// Address of a stack slot.
    pub fn stack_addr(&mut self, slot: StackSlot, offset: i32) -> Value {
        self.push1(InstData::StackAddr { slot, offset }, Type::I64)
    }

    /// Typed load from a stack slot.
    pub fn stack_load(&mut self, ty: Type, slot: StackSlot, offset: i32) -> Value {
        self.push1(InstData::StackLoad { slot, offset }, ty)
    }

    /// Store to a stack slot.
    pub fn stack_store(&mut self, value: Value, slot: StackSlot, offset: i32) {
        self.push(InstData::StackStore { arg: value, slot, offset }, &[]);
    }

    /// Materialize a global value as an `i64` address (or pointer).
    pub fn global_value(&mut self, gv: GlobalValue) -> Value {
        self.push1(InstData::UnaryGlobalValue { gv }, Type::I64)
    }

    /// Broadcast a scalar into a vector.
    pub fn splat(&mut self, ty: Type, x: Value) -> Value {
        self.push1(InstData::Unary { op: Opcode::Splat, arg: x }, ty)
    }

    /// Extract one lane of a vector.
    pub fn extract_lane(&mut self, ty: Type, x: Value, lane: u8) -> Value {
        self.push1(InstData::ExtractLane { arg: x, lane }, ty)
    }

    /// Insert a scalar into one lane of a vector.
    pub fn insert_lane(&mut self, x: Value, y: Value, lane: u8) -> Value {
        let ty = self.func.value_type(x);
        self.push1(InstData::InsertLane { args: [x, y], lane }, ty)
    }

    /// Direct call.
    pub fn call(&mut self, func: FuncRef, args: Vec<Value>) -> SmallVec<[Value; 2]> {
        let returns = self.func.ext_funcs[func.index()].signature.returns.clone();
        self.push(InstData::Call { func, args }, &returns)
    }

    /// Indirect call with an explicit signature.
    pub fn call_indirect(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        returns: &[Type],
    ) -> SmallVec<[Value; 2]> {
        self.push(InstData::CallIndirect { callee, args }, returns)
    }

    /// Unconditional jump.
    pub fn jump(&mut self, dest: Block) {
        self.push(InstData::Jump { dest }, &[]);
    }

    /// Two-way branch on a boolean.
    pub fn brif(&mut self, cond: Value, then_dest: Block, else_dest: Block) {
        self.push(InstData::Brif { cond, then_dest, else_dest }, &[]);
    }

    /// Jump-table dispatch.
    pub fn br_table(&mut self, index: Value, table: JumpTable, default: Block) {
        self.push(InstData::BrTable { index, table, default }, &[]);
    }

    /// Return.
    pub fn ret(&mut self, args: Vec<Value>) {
        self.push(InstData::Return { args }, &[]);
    }

    /// Tail call.
    pub fn return_call(&mut self, func: FuncRef, args: Vec<Value>) {
        self.push(InstData::ReturnCall { func, args }, &[]);
    }

    /// Indirect tail call.
    pub fn return_call_indirect(&mut self, callee: Value, args: Vec<Value>) {
        self.push(InstData::ReturnCallIndirect { callee, args }, &[]);
    }

    /// Unconditional trap.
    pub fn trap(&mut self, code: TrapCode) {
        self.push(InstData::Trap { code }, &[]);
    }

    /// Atomic read-modify-write; returns the previous memory value.
    pub fn atomic_rmw(&mut self, op: AtomicOp, ty: Type, ptr: Value, value: Value) -> Value {
        self.push1(InstData::AtomicRmw { op, ty, args: [ptr, value] }, ty)
    }

    /// Atomic compare-and-swap; returns the observed value.
    pub fn atomic_cas(&mut self, ty: Type, ptr: Value, expected: Value, new: Value) -> Value {
        self.push1(InstData::AtomicCas { ty, args: [ptr, expected, new] }, ty)
    }

    /// Sequentially consistent atomic load.
    pub fn atomic_load(&mut self, ty: Type, ptr: Value) -> Value {
        self.push1(InstData::AtomicLoad { ty, ptr }, ty)
    }

    /// Sequentially consistent atomic store.
    pub fn atomic_store(&mut self, ty: Type, value: Value, ptr: Value) {
        self.push(InstData::AtomicStore { ty, args: [value, ptr] }, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_block_carries_params() {
        let sig = Signature::new(vec![Type::I64, Type::I32], vec![Type::I64]);
        let func = Function::new("f", sig);
        assert_eq!(func.arg_values().len(), 2);
        assert_eq!(func.value_type(func.arg_values()[0]), Type::I64);
        assert_eq!(func.value_type(func.arg_values()[1]), Type::I32);
    }

    #[test]
    fn builder_appends_in_block_order() {
        let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
        let mut b = FunctionBuilder::new("f", sig);
        let args = b.args();
        let c = b.iconst(Type::I64, 5);
        let sum = b.binary(Opcode::Iadd, args[0], c);
        b.ret(vec![sum]);
        let func = b.finish();

        let entry = func.entry_block();
        assert_eq!(func.block_insts(entry).len(), 3);
        assert!(matches!(
            func.inst_data(func.block_insts(entry)[2]),
            InstData::Return { .. }
        ));
        assert_eq!(func.value_type(sum), Type::I64);
    }

    #[test]
    fn intcc_condition_map() {
        assert_eq!(IntCC::Eq.cond(), Cond::Eq);
        assert_eq!(IntCC::Slt.cond(), Cond::Lt);
        assert_eq!(IntCC::Sge.cond(), Cond::Ge);
        assert_eq!(IntCC::Ult.cond(), Cond::Lo);
        assert_eq!(IntCC::Uge.cond(), Cond::Hs);
        assert_eq!(IntCC::Ugt.cond(), Cond::Hi);
        assert_eq!(IntCC::Ule.cond(), Cond::Ls);
    }

    #[test]
    fn jump_tables_and_slots() {
        let mut b = FunctionBuilder::new("g", Signature::default());
        let slot = b.create_stack_slot(24);
        let b1 = b.create_block();
        let b2 = b.create_block();
        let jt = b.create_jump_table(vec![b1, b2, b1]);
        let f = b.finish();
        assert_eq!(f.stack_slot(slot).size, 24);
        assert_eq!(f.jump_table(jt).targets.len(), 3);
    }
}
