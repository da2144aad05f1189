//! Instruction selection: the lowering context and the per-opcode driver.
//!
//! The context owns the growing instruction list, the virtual-register
//! factory, the value-to-register memo, the label allocator and the
//! stack-slot table. Constructors live in the sibling modules, one per
//! operation family.

mod alu;
mod atomic;
mod branch;
mod fp;
mod mem;
mod vec;

use hashbrown::HashMap;
use tracing::trace;

use anvil_asm::{
    AMode, Inst, Label, OperandSize, Reg, RegClass, VReg, VectorSize, Writable,
};

use crate::abi::{self, AbiArg, AbiPlan};
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{
    Block, Function, InstData, IrInst, Opcode, StackSlot, Type, Value,
};
use crate::isa::Isa;

/// The virtual-code list produced by lowering, in program order.
#[derive(Debug, Default)]
pub struct VCode {
    /// Instructions, including `BindLabel` pseudo-instructions at block
    /// starts and synthetic intra-sequence labels.
    pub insts: Vec<Inst>,
    /// Start index of every basic block in `insts`.
    pub block_starts: Vec<usize>,
    /// Number of labels allocated during lowering.
    pub num_labels: u32,
    /// Number of virtual registers allocated during lowering.
    pub num_vregs: u32,
}

/// Everything the rest of the pipeline needs from lowering.
#[derive(Debug)]
pub struct LoweredFunction {
    /// The instruction list.
    pub vcode: VCode,
    /// ABI plan of the function's own signature.
    pub plan: AbiPlan,
    /// Bytes of IR stack slots allocated so far; spill slots extend this.
    pub nominal_size: u32,
    /// Bytes of the largest outgoing-argument area of any call site.
    pub outgoing_args_size: u32,
}

/// Mutable selection state for one function.
pub struct LowerCtx<'a> {
    func: &'a Function,
    isa: &'a Isa,
    insts: Vec<Inst>,
    block_starts: Vec<usize>,
    next_vreg: u32,
    next_label: u32,
    value_regs: HashMap<Value, Reg>,
    value_defs: HashMap<Value, IrInst>,
    slot_offsets: Vec<i64>,
    nominal_next: i64,
    outgoing_args_size: u32,
    plan: AbiPlan,
}

impl<'a> LowerCtx<'a> {
    fn new(func: &'a Function, isa: &'a Isa) -> Self {
        let plan = abi::classify(&func.signature);

        let mut value_defs = HashMap::new();
        for &block in func.blocks() {
            for &inst in func.block_insts(block) {
                for &result in func.inst_results(inst) {
                    value_defs.insert(result, inst);
                }
            }
        }

        // One label per block, indices aligned with block indices.
        let next_label = func.blocks().len() as u32;

        // Stack slots get monotonically increasing 8-aligned offsets in the
        // nominal area.
        let mut slot_offsets = Vec::new();
        let mut nominal_next = 0i64;
        for (_, data) in func.stack_slots() {
            slot_offsets.push(nominal_next);
            nominal_next += ((data.size as i64) + 7) & !7;
        }

        LowerCtx {
            func,
            isa,
            insts: Vec::new(),
            block_starts: Vec::new(),
            next_vreg: 0,
            next_label,
            value_regs: HashMap::new(),
            value_defs,
            slot_offsets,
            nominal_next,
            outgoing_args_size: 0,
            plan,
        }
    }

    /// The function being lowered.
    pub fn func(&self) -> &Function {
        self.func
    }

    /// The active ISA descriptor.
    pub fn isa(&self) -> &Isa {
        self.isa
    }

    /// Append one instruction.
    pub fn emit(&mut self, inst: Inst) {
        trace!(inst = %inst, "emit");
        self.insts.push(inst);
    }

    /// A fresh virtual register of the given class.
    pub fn alloc_vreg(&mut self, class: RegClass) -> Reg {
        let v = VReg::new(class, self.next_vreg);
        self.next_vreg += 1;
        Reg::Virt(v)
    }

    /// A fresh writable virtual register.
    pub fn alloc_writable(&mut self, class: RegClass) -> Writable<Reg> {
        Writable::from_reg(self.alloc_vreg(class))
    }

    /// A fresh intra-function label.
    pub fn alloc_label(&mut self) -> Label {
        let l = Label::new(self.next_label);
        self.next_label += 1;
        l
    }

    /// Bind `label` at the current point in the stream.
    pub fn bind_label(&mut self, label: Label) {
        self.emit(Inst::BindLabel { label });
    }

    /// The label of a basic block.
    pub fn block_label(&self, block: Block) -> Label {
        Label::new(block.as_u32())
    }

    /// Nominal-SP byte offset of a stack slot plus an extra displacement.
    pub fn stack_slot_offset(&self, slot: StackSlot, extra: i64) -> i64 {
        self.slot_offsets[slot.index()] + extra
    }

    /// The register class a value of type `ty` lives in.
    pub fn class_for_type(ty: Type) -> RegClass {
        if ty.is_int() {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }

    /// The scalar operand size of an integer type.
    pub fn size_for_type(ty: Type) -> OperandSize {
        OperandSize::from_bits(ty.bits().min(64)).unwrap_or(OperandSize::Size64)
    }

    /// ALU operand size: sub-word integers compute in 32 bits.
    pub fn alu_size(ty: Type) -> OperandSize {
        if ty.bits() == 64 {
            OperandSize::Size64
        } else {
            OperandSize::Size32
        }
    }

    /// The register already holding `value`.
    pub fn value_reg(&self, value: Value) -> Reg {
        *self
            .value_regs
            .get(&value)
            .unwrap_or_else(|| panic!("{value} used before definition"))
    }

    /// Allocate the destination register of `value` and memoize it.
    pub fn def_value(&mut self, value: Value) -> Writable<Reg> {
        let class = Self::class_for_type(self.func.value_type(value));
        let reg = self.alloc_vreg(class);
        self.value_regs.insert(value, reg);
        Writable::from_reg(reg)
    }

    /// Bind `value` to an existing register without a fresh allocation.
    pub fn set_value_reg(&mut self, value: Value, reg: Reg) {
        self.value_regs.insert(value, reg);
    }

    /// The constant behind `value`, when it is defined by `iconst`.
    pub fn value_const(&self, value: Value) -> Option<u64> {
        let inst = self.value_defs.get(&value)?;
        match self.func.inst_data(*inst) {
            InstData::Iconst { value } => Some(*value),
            _ => None,
        }
    }

    /// The instruction defining `value`, if any (arguments have none).
    pub fn value_def(&self, value: Value) -> Option<&InstData> {
        self.value_defs
            .get(&value)
            .map(|inst| self.func.inst_data(*inst))
    }

    /// Record the outgoing-argument area a call site needs.
    pub fn record_outgoing_args(&mut self, bytes: u32) {
        self.outgoing_args_size = self.outgoing_args_size.max(bytes);
    }

    /// The vector arrangement of a 128-bit type.
    pub fn vector_size(ty: Type) -> VectorSize {
        match ty.lane_bits() {
            8 => VectorSize::Size8x16,
            16 => VectorSize::Size16x8,
            32 => VectorSize::Size32x4,
            _ => VectorSize::Size64x2,
        }
    }

    fn lower_incoming_args(&mut self) -> CodegenResult<()> {
        let plan = self.plan.clone();
        let args: Vec<Value> = self.func.arg_values().to_vec();
        for (value, (ty, place)) in args.into_iter().zip(plan.args) {
            let dst = self.def_value(value);
            match place {
                AbiArg::Reg(preg) => {
                    let src = Reg::Phys(preg);
                    self.emit(mov_for_type(ty, dst, src));
                }
                AbiArg::Stack(off) => {
                    let mem = abi::incoming_arg_amode(ty, off);
                    let load = load_for_incoming(ty, dst, mem);
                    self.emit(load);
                }
            }
        }
        Ok(())
    }

    fn lower_inst(&mut self, inst: IrInst) -> CodegenResult<()> {
        let data = self.func.inst_data(inst).clone();
        let results: Vec<Value> = self.func.inst_results(inst).to_vec();

        match data {
            InstData::Iconst { value } => alu::lower_iconst(self, results[0], value),
            InstData::F32Const { bits } => fp::lower_f32const(self, results[0], bits),
            InstData::F64Const { bits } => fp::lower_f64const(self, results[0], bits),
            InstData::Unary { op, arg } => match op {
                Opcode::Bnot | Opcode::Clz | Opcode::Cls | Opcode::Bitrev | Opcode::Bswap => {
                    alu::lower_int_unary(self, op, results[0], arg)
                }
                Opcode::Uextend | Opcode::Sextend | Opcode::Ireduce => {
                    alu::lower_width_change(self, op, results[0], arg)
                }
                Opcode::Fneg
                | Opcode::Fabs
                | Opcode::Sqrt
                | Opcode::Floor
                | Opcode::Ceil
                | Opcode::Trunc
                | Opcode::Nearest
                | Opcode::Fpromote
                | Opcode::Fdemote
                | Opcode::FcvtToSint
                | Opcode::FcvtToUint
                | Opcode::FcvtFromSint
                | Opcode::FcvtFromUint => fp::lower_fp_unary(self, op, results[0], arg),
                Opcode::Splat => vec::lower_splat(self, results[0], arg),
                Opcode::Snarrow | Opcode::Unarrow | Opcode::Uunarrow => {
                    vec::lower_narrow(self, op, results[0], arg)
                }
                Opcode::SwidenLow | Opcode::UwidenLow => {
                    vec::lower_widen(self, op, results[0], arg)
                }
                _ => Err(CodegenError::UnimplementedOpcode("unary")),
            },
            InstData::Binary { op, args } => {
                let ty = self.func.value_type(results[0]);
                if ty.is_vector() {
                    vec::lower_vec_binary(self, op, results[0], args)
                } else {
                    match op {
                        Opcode::Fadd
                        | Opcode::Fsub
                        | Opcode::Fmul
                        | Opcode::Fdiv
                        | Opcode::Fmax
                        | Opcode::Fmin => fp::lower_fp_binary(self, op, results[0], args),
                        Opcode::SaddSat | Opcode::UaddSat | Opcode::SsubSat
                        | Opcode::UsubSat => alu::lower_saturating(self, op, results[0], args),
                        _ => alu::lower_int_binary(self, op, results[0], args),
                    }
                }
            }
            InstData::Ternary { op, args } => match op {
                Opcode::Fma => fp::lower_fma(self, results[0], args),
                _ => Err(CodegenError::UnimplementedOpcode("ternary")),
            },
            InstData::IntCompare { cond, args } => {
                alu::lower_icmp_bool(self, cond, results[0], args)
            }
            InstData::FloatCompare { cond, args } => {
                fp::lower_fcmp_bool(self, cond, results[0], args)
            }
            InstData::BinaryTrap { op, code, args } => {
                alu::lower_overflow_trap(self, op, code, results[0], args)
            }
            InstData::BinaryCin { op, args } => {
                alu::lower_overflow_cin(self, op, results[0], results[1], args)
            }
            InstData::Select { args } => alu::lower_select(self, results[0], args),
            InstData::Load { op, ptr, offset } => {
                mem::lower_load(self, op, results[0], ptr, offset)
            }
            InstData::Store { op, args, offset } => {
                mem::lower_store(self, op, args[0], args[1], offset)
            }
            InstData::StackAddr { slot, offset } => {
                mem::lower_stack_addr(self, results[0], slot, offset)
            }
            InstData::StackLoad { slot, offset } => {
                mem::lower_stack_load(self, results[0], slot, offset)
            }
            InstData::StackStore { arg, slot, offset } => {
                mem::lower_stack_store(self, arg, slot, offset)
            }
            InstData::UnaryGlobalValue { gv } => mem::lower_global_value(self, results[0], gv),
            InstData::ExtractLane { arg, lane } => {
                vec::lower_extract_lane(self, results[0], arg, lane)
            }
            InstData::InsertLane { args, lane } => {
                vec::lower_insert_lane(self, results[0], args, lane)
            }
            InstData::Call { func, args } => branch::lower_call(self, func, &args, &results),
            InstData::CallIndirect { callee, args } => {
                branch::lower_call_indirect(self, callee, &args, &results)
            }
            InstData::Jump { dest } => {
                let label = self.block_label(dest);
                self.emit(Inst::Jump { dest: label });
                Ok(())
            }
            InstData::Brif { cond, then_dest, else_dest } => {
                branch::lower_brif(self, cond, then_dest, else_dest)
            }
            InstData::BrTable { index, table, default } => {
                branch::lower_br_table(self, index, table, default)
            }
            InstData::Return { args } => branch::lower_return(self, &args),
            InstData::ReturnCall { func, args } => {
                branch::lower_return_call(self, func, &args)
            }
            InstData::ReturnCallIndirect { callee, args } => {
                branch::lower_return_call_indirect(self, callee, &args)
            }
            InstData::Trap { code } => {
                self.emit(Inst::Udf { trap_code: code.code() });
                Ok(())
            }
            InstData::AtomicRmw { op, ty, args } => {
                atomic::lower_atomic_rmw(self, op, ty, results[0], args)
            }
            InstData::AtomicCas { ty, args } => {
                atomic::lower_atomic_cas(self, ty, results[0], args)
            }
            InstData::AtomicLoad { ty, ptr } => {
                atomic::lower_atomic_load(self, ty, results[0], ptr)
            }
            InstData::AtomicStore { ty, args } => {
                atomic::lower_atomic_store(self, ty, args[0], args[1])
            }
        }
    }
}

/// Register-to-register move for any value type.
pub(crate) fn mov_for_type(ty: Type, dst: Writable<Reg>, src: Reg) -> Inst {
    if ty.is_int() {
        Inst::MovRR {
            size: OperandSize::Size64,
            rd: dst,
            rm: src,
        }
    } else if ty.is_float() {
        Inst::FpuRR {
            op: anvil_asm::FpuOp1::Mov,
            size: LowerCtx::size_for_type(ty),
            rd: dst,
            rn: src,
        }
    } else {
        Inst::VecRRR {
            op: anvil_asm::VecAluOp::Orr,
            size: VectorSize::Size8x16,
            rd: dst,
            rn: src,
            rm: src,
        }
    }
}

fn load_for_incoming(ty: Type, rd: Writable<Reg>, mem: AMode) -> Inst {
    match ty {
        Type::I8 => Inst::ULoad8 { rd, mem },
        Type::I16 => Inst::ULoad16 { rd, mem },
        Type::I32 => Inst::ULoad32 { rd, mem },
        Type::I64 => Inst::ULoad64 { rd, mem },
        Type::F32 => Inst::FpuLoad32 { rd, mem },
        Type::F64 => Inst::FpuLoad64 { rd, mem },
        _ => Inst::FpuLoad128 { rd, mem },
    }
}

/// Lower a whole function to virtual code.
pub fn lower_function(func: &Function, isa: &Isa) -> CodegenResult<LoweredFunction> {
    let mut ctx = LowerCtx::new(func, isa);

    for (i, &block) in func.blocks().iter().enumerate() {
        ctx.block_starts.push(ctx.insts.len());
        let label = ctx.block_label(block);
        ctx.bind_label(label);
        if i == 0 {
            ctx.lower_incoming_args()?;
        }
        for &inst in func.block_insts(block) {
            ctx.lower_inst(inst)?;
        }
    }

    let vcode = VCode {
        insts: ctx.insts,
        block_starts: ctx.block_starts,
        num_labels: ctx.next_label,
        num_vregs: ctx.next_vreg,
    };
    tracing::debug!(
        insts = vcode.insts.len(),
        vregs = vcode.num_vregs,
        labels = vcode.num_labels,
        "lowered function"
    );

    Ok(LoweredFunction {
        vcode,
        plan: ctx.plan,
        nominal_size: ((ctx.nominal_next + 15) & !15) as u32,
        outgoing_args_size: ctx.outgoing_args_size,
    })
}
