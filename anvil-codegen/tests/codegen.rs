//! Whole-pipeline properties: frame shape, stack arguments, spill
//! behavior, unwind records, and floating-point and vector compilation.

use anvil_codegen::abi::{classify, AbiArg};
use anvil_codegen::ir::{
    FloatCC, FunctionBuilder, Opcode, Signature, Type,
};
use anvil_codegen::{CompiledCode, Isa, IsaBuilder};
use rstest::rstest;

fn isa() -> Isa {
    IsaBuilder::new().build().expect("default isa")
}

fn words(code: &CompiledCode) -> Vec<u32> {
    code.code
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn contains_masked(code: &CompiledCode, mask: u32, want: u32) -> bool {
    words(code).iter().any(|&w| w & mask == want)
}

#[rstest]
#[case(Signature::new(vec![], vec![]))]
#[case(Signature::new(vec![Type::I64; 12], vec![Type::I64]))]
#[case(Signature::new(vec![Type::F64; 10], vec![Type::F64]))]
#[case(Signature::new(vec![Type::I8, Type::F32, Type::I32X4, Type::I64], vec![Type::I64, Type::I64]))]
fn classification_round_trips(#[case] sig: Signature) {
    assert_eq!(classify(&sig).reassemble(), sig);
}

#[test]
fn tenth_argument_loads_from_the_incoming_area() {
    // Ten i64 parameters: the ninth and tenth live at caller sp+0 and
    // sp+8, which the callee addresses as fp+16 and fp+24.
    let sig = Signature::new(vec![Type::I64; 10], vec![Type::I64]);
    let plan = classify(&sig);
    assert_eq!(plan.args[8].1, AbiArg::Stack(0));
    assert_eq!(plan.args[9].1, AbiArg::Stack(8));

    let mut b = FunctionBuilder::new("tenth", sig);
    let args = b.args();
    b.ret(vec![args[9]]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // ldr xN, [x29, #24]: past the saved pair, second stack slot.
    assert!(
        contains_masked(&code, 0xffff_ffe0, 0xf940_0fa0),
        "ldr from [fp, #24]"
    );
}

#[test]
fn high_pressure_bodies_spill_and_reload() {
    // Thirty values loaded up front and summed later exceed the 28
    // allocatable integer registers.
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("pressure", sig);
    let args = b.args();
    let mut loaded = Vec::new();
    for i in 0..30 {
        loaded.push(b.load(Opcode::Load, Type::I64, args[0], 8 * i));
    }
    let mut acc = loaded[0];
    for &v in &loaded[1..] {
        acc = b.binary(Opcode::Iadd, acc, v);
    }
    b.ret(vec![acc]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // Spill stores and reloads against sp appear, and the frame grew to
    // hold them.
    assert!(
        contains_masked(&code, 0xffc0_03e0, 0xf900_03e0),
        "spill store to [sp]"
    );
    assert!(
        contains_masked(&code, 0xffc0_03e0, 0xf940_03e0),
        "spill reload from [sp]"
    );
    assert!(code.stack_frame_size >= 16);
}

#[test]
fn unwind_record_matches_the_code() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("framed", sig);
    let slot = b.create_stack_slot(32);
    let args = b.args();
    b.stack_store(args[0], slot, 0);
    let r = b.stack_load(Type::I64, slot, 0);
    b.ret(vec![r]);

    let code = isa().compile_function(&b.finish()).unwrap();

    let cie = &code.unwind.cie;
    assert_eq!(cie.version, 1);
    assert_eq!(cie.code_alignment, 4);
    assert_eq!(cie.data_alignment, -8);
    assert_eq!(cie.return_address_register, 30);

    let fde = &code.unwind.fde;
    assert_eq!(
        fde.pc_begin + fde.code_size as u64,
        code.code.len() as u64
    );
    // The prologue recorded the pair push, the frame-pointer switch and
    // the frame allocation.
    use anvil_codegen::abi::CfiDirective;
    assert_eq!(fde.instructions[0].1, CfiDirective::DefCfaOffset(16));
    assert!(fde
        .instructions
        .iter()
        .any(|(_, d)| *d == CfiDirective::Offset { reg: 29, cfa_offset: 16 }));
    assert!(fde
        .instructions
        .iter()
        .any(|(_, d)| *d == CfiDirective::Offset { reg: 30, cfa_offset: 8 }));
    assert!(fde
        .instructions
        .iter()
        .any(|(_, d)| *d == CfiDirective::DefCfaRegister(29)));
    assert!(fde
        .instructions
        .iter()
        .any(|(_, d)| *d == CfiDirective::DefCfaOffset(16 + 32)));

    // The record serializes.
    assert!(!cie.encode().is_empty());
    assert!(!fde.encode(0).is_empty());
}

#[test]
fn code_is_word_aligned_and_nonempty() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("id", sig);
    let args = b.args();
    b.ret(vec![args[0]]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(!code.code.is_empty());
    assert_eq!(code.code.len() % 4, 0);
}

#[test]
fn float_arithmetic_compiles() {
    let sig = Signature::new(vec![Type::F64, Type::F64], vec![Type::F64]);
    let mut b = FunctionBuilder::new("fmadd", sig);
    let args = b.args();
    let p = b.binary(Opcode::Fmul, args[0], args[1]);
    let s = b.binary(Opcode::Fadd, p, args[1]);
    let d = b.binary(Opcode::Fdiv, s, args[0]);
    let q = b.unary(Opcode::Sqrt, d);
    b.ret(vec![q]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffe0_fc00, 0x1e60_0800), "fmul d");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x1e60_2800), "fadd d");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x1e60_1800), "fdiv d");
    assert!(contains_masked(&code, 0xffff_fc00, 0x1e61_c000), "fsqrt d");
}

#[test]
fn float_compare_and_conversions() {
    let sig = Signature::new(vec![Type::F64, Type::F64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("fcvt", sig);
    let args = b.args();
    let lt = b.fcmp(FloatCC::Lt, args[0], args[1]);
    let wide = b.unary_typed(Opcode::Uextend, Type::I64, lt);
    let as_int = b.unary_typed(Opcode::FcvtToSint, Type::I64, args[0]);
    let r = b.binary(Opcode::Iadd, wide, as_int);
    b.ret(vec![r]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffe0_fc1f, 0x1e60_2000), "fcmp d");
    assert!(contains_masked(&code, 0xffff_fc00, 0x9e78_0000), "fcvtzs x, d");
}

#[test]
fn float_constants_use_the_vfp_immediate_when_possible() {
    let sig = Signature::new(vec![Type::F64], vec![Type::F64]);
    let mut b = FunctionBuilder::new("fconst", sig);
    let args = b.args();
    let one = b.f64const(1.0f64.to_bits());
    let tenth = b.f64const(0.1f64.to_bits());
    let a = b.binary(Opcode::Fadd, args[0], one);
    let r = b.binary(Opcode::Fmul, a, tenth);
    b.ret(vec![r]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // fmov d, #1.0.
    assert!(contains_masked(&code, 0xffff_e000, 0x1e6e_1000), "fmov imm");
    // 0.1 is not VFP-encodable: movz/movk then fmov d, x.
    assert!(contains_masked(&code, 0xffff_fc00, 0x9e67_0000), "fmov d, x");
}

#[test]
fn vector_arithmetic_and_lanes() {
    let sig = Signature::new(vec![Type::I32X4, Type::I32X4], vec![Type::I32]);
    let mut b = FunctionBuilder::new("vec", sig);
    let args = b.args();
    let sum = b.binary(Opcode::Iadd, args[0], args[1]);
    let clamped = b.binary(Opcode::SaddSat, sum, args[1]);
    let lane = b.extract_lane(Type::I32, clamped, 2);
    b.ret(vec![lane]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffe0_fc00, 0x4ea0_8400), "add v.4s");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x4ea0_0c00), "sqadd v.4s");
    assert!(contains_masked(&code, 0xffff_fc00, 0x0e14_3c00), "umov w, v.s[2]");
}

#[test]
fn splat_and_widen() {
    let sig = Signature::new(vec![Type::I32, Type::I16X8], vec![Type::I32X4]);
    let mut b = FunctionBuilder::new("widen", sig);
    let args = b.args();
    let splat = b.splat(Type::I32X4, args[0]);
    let wide = b.unary_typed(Opcode::SwidenLow, Type::I32X4, args[1]);
    let sum = b.binary(Opcode::Iadd, splat, wide);
    b.ret(vec![sum]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffff_fc00, 0x4e04_0c00), "dup v.4s");
    assert!(contains_masked(&code, 0xffff_fc00, 0x0f10_a400), "sshll");
}

#[test]
fn compilation_is_deterministic() {
    let build = || {
        let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
        let mut b = FunctionBuilder::new("det", sig);
        let args = b.args();
        let x = b.binary(Opcode::Imul, args[0], args[1]);
        let y = b.binary(Opcode::Iadd, x, args[0]);
        b.ret(vec![y]);
        b.finish()
    };
    let a = isa().compile_function(&build()).unwrap();
    let b = isa().compile_function(&build()).unwrap();
    assert_eq!(a.code, b.code);
    assert_eq!(a, b);
}
