//! End-to-end arithmetic compilation: immediate selection, overflow
//! checks, saturating operations.

use anvil_codegen::ir::{
    FunctionBuilder, IntCC, Opcode, Signature, TrapCode, Type,
};
use anvil_codegen::{CompiledCode, Isa, IsaBuilder};
use test_case::test_case;

fn isa() -> Isa {
    IsaBuilder::new().build().expect("default isa")
}

fn words(code: &CompiledCode) -> Vec<u32> {
    code.code
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn contains_word(code: &CompiledCode, word: u32) -> bool {
    words(code).contains(&word)
}

fn contains_masked(code: &CompiledCode, mask: u32, want: u32) -> bool {
    words(code).iter().any(|&w| w & mask == want)
}

#[test]
fn add_two_arguments() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("add2", sig);
    let args = b.args();
    let sum = b.binary(Opcode::Iadd, args[0], args[1]);
    b.ret(vec![sum]);

    let code = isa().compile_function(&b.finish()).unwrap();

    // Canonical prologue head and return tail.
    let ws = words(&code);
    assert_eq!(ws[0], 0xa9bf_7bfd, "stp x29, x30, [sp, #-16]!");
    assert_eq!(ws[1], 0x9100_03fd, "mov x29, sp");
    assert_eq!(*ws.last().unwrap(), 0xd65f_03c0, "ret");
    assert_eq!(
        &code.code[code.code.len() - 4..],
        &[0xc0, 0x03, 0x5f, 0xd6]
    );
    // An add with both operands in registers.
    assert!(contains_masked(&code, 0xffe0_fc00, 0x8b00_0000), "add x,x,x");
    assert_eq!(code.stack_frame_size, 0);
}

#[test]
fn small_immediates_use_the_imm12_form() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("add42", sig);
    let args = b.args();
    let c = b.iconst(Type::I64, 42);
    let sum = b.binary(Opcode::Iadd, args[0], c);
    b.ret(vec![sum]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // add xd, xn, #42
    assert!(contains_masked(&code, 0xffff_fc00, 0x9100_a800));
}

#[test]
fn large_immediates_fall_back_to_registers() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("addbig", sig);
    let args = b.args();
    let c = b.iconst(Type::I64, 0x1234_5678);
    let sum = b.binary(Opcode::Iadd, args[0], c);
    b.ret(vec![sum]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // A register add plus a movz/movk pair instead of an imm12 form.
    assert!(contains_masked(&code, 0xffe0_fc00, 0x8b00_0000));
    assert!(contains_masked(&code, 0xff80_0000, 0xd280_0000), "movz");
    assert!(contains_masked(&code, 0xff80_0000, 0xf280_0000), "movk");
}

#[test]
fn logical_immediates_and_fallback() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("masks", sig);
    let args = b.args();
    let mask = b.iconst(Type::I64, 0xff);
    let masked = b.binary(Opcode::Band, args[0], mask);
    let odd = b.iconst(Type::I64, 0x1234_5678_9abc_def0);
    let mixed = b.binary(Opcode::Bor, masked, odd);
    b.ret(vec![mixed]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // and xd, xn, #0xff
    assert!(contains_masked(&code, 0xffff_fc00, 0x9240_1c00));
    // The unencodable constant goes through a register orr (not the mov
    // alias, whose first source is the zero register).
    assert!(words(&code)
        .iter()
        .any(|w| w & 0xffe0_fc00 == 0xaa00_0000 && (w >> 5) & 0x1f != 31));
}

#[test_case(Opcode::Ishl, 0xffff_fc00, 0xd37d_f000; "lsl is ubfm")]
#[test_case(Opcode::Ushr, 0xffff_fc00, 0xd343_fc00; "lsr is ubfm")]
#[test_case(Opcode::Sshr, 0xffff_fc00, 0x9343_fc00; "asr is sbfm")]
#[test_case(Opcode::Rotr, 0xffe0_fc00, 0x93c0_0c00; "ror is extr")]
fn constant_shifts_use_the_bitfield_aliases(op: Opcode, mask: u32, want: u32) {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("shift3", sig);
    let args = b.args();
    let amt = b.iconst(Type::I64, 3);
    let r = b.binary(op, args[0], amt);
    b.ret(vec![r]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, mask, want));
}

#[test]
fn division_and_high_multiply() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("divmul", sig);
    let args = b.args();
    let q = b.binary(Opcode::Sdiv, args[0], args[1]);
    let r = b.binary(Opcode::Udiv, q, args[1]);
    let h = b.binary(Opcode::Smulhi, r, args[1]);
    let u = b.binary(Opcode::Umulhi, h, args[1]);
    b.ret(vec![u]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffe0_fc00, 0x9ac0_0c00), "sdiv");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x9ac0_0800), "udiv");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x9b40_7c00), "smulh");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x9bc0_7c00), "umulh");
}

#[test]
fn unsigned_add_overflow_traps() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("checked_add", sig);
    let args = b.args();
    let sum = b.binary_trap(
        Opcode::UaddOverflowTrap,
        TrapCode::IntegerOverflow,
        args[0],
        args[1],
    );
    b.ret(vec![sum]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // adds, then a carry-clear branch around the udf.
    assert!(contains_masked(&code, 0xffe0_fc00, 0xab00_0000), "adds");
    assert!(contains_masked(&code, 0xff00_001f, 0x5400_0003), "b.lo");
    assert_eq!(code.traps.len(), 1);
    assert_eq!(code.traps[0].code, TrapCode::IntegerOverflow.code());
    let at = code.traps[0].offset as usize;
    assert_eq!(
        &code.code[at..at + 4],
        &(TrapCode::IntegerOverflow.code() as u32).to_le_bytes()
    );
}

#[test]
fn signed_multiply_overflow_compares_high_half() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("checked_mul", sig);
    let args = b.args();
    let p = b.binary_trap(
        Opcode::SmulOverflowTrap,
        TrapCode::IntegerOverflow,
        args[0],
        args[1],
    );
    b.ret(vec![p]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffe0_fc00, 0x9b40_7c00), "smulh");
    // asr #63 of the low product feeds the compare.
    assert!(contains_masked(&code, 0xffff_fc00, 0x937f_fc00), "asr #63");
    assert_eq!(code.traps.len(), 1);
}

#[test]
fn carry_in_addition_materializes_the_flag() {
    let sig = Signature::new(vec![Type::I64, Type::I64, Type::I64], vec![Type::I64, Type::I8]);
    let mut b = FunctionBuilder::new("adc", sig);
    let args = b.args();
    let (sum, carry) = b.binary_cin(Opcode::UaddOverflowCin, args[0], args[1], args[2]);
    b.ret(vec![sum, carry]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // subs xzr, cin, #1 primes the carry.
    assert!(contains_masked(&code, 0xffff_fc1f, 0xf100_041f));
    // adcs then cset hs.
    assert!(contains_masked(&code, 0xffe0_fc00, 0xba00_0000), "adcs");
    assert!(contains_masked(&code, 0xffff_ffe0, 0x1a9f_37e0), "cset hs");
}

#[test]
fn saturating_add_routes_through_the_vector_unit() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("sat", sig);
    let args = b.args();
    let s = b.binary(Opcode::UaddSat, args[0], args[1]);
    b.ret(vec![s]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // fmov d, x moves in; uqadd d; fmov x, d moves out.
    assert!(contains_masked(&code, 0xffff_fc00, 0x9e67_0000), "fmov d,x");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x7ee0_0c00), "uqadd d");
    assert!(contains_masked(&code, 0xffff_fc00, 0x9e66_0000), "fmov x,d");
}

#[test]
fn icmp_materializes_with_cset() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I8]);
    let mut b = FunctionBuilder::new("lt", sig);
    let args = b.args();
    let flag = b.icmp(IntCC::Slt, args[0], args[1]);
    b.ret(vec![flag]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // cmp x, x then cset lt (csinc with inverted ge).
    assert!(contains_masked(&code, 0xffe0_fc1f, 0xeb00_001f), "cmp");
    assert!(contains_word(&code, 0x1a9f_a7e0), "cset w0, lt");
}

#[test]
fn select_fuses_the_compare() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("max", sig);
    let args = b.args();
    let flag = b.icmp(IntCC::Sgt, args[0], args[1]);
    let max = b.select(flag, args[0], args[1]);
    b.ret(vec![max]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // csel with the gt condition.
    assert!(contains_masked(&code, 0xffe0_fc00, 0x9a80_c000), "csel gt");
}
