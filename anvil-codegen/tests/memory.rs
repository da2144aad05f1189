//! Memory end to end: typed loads and stores, stack slots, global values
//! and both atomic lowering paths.

use anvil_codegen::ir::{
    AtomicOp, FunctionBuilder, GlobalValueData, Opcode, Signature, Type,
};
use anvil_codegen::{CompiledCode, Isa, IsaBuilder, IsaFlags};
use anvil_asm::RelocKind;

fn isa() -> Isa {
    IsaBuilder::new().build().expect("default isa")
}

fn lse_isa() -> Isa {
    IsaBuilder::new()
        .features(IsaFlags::LSE)
        .prefer_lse_atomics(true)
        .build()
        .expect("lse isa")
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

#[test]
fn narrow_loads_pick_their_encodings() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("widths", sig);
    let args = b.args();
    let byte = b.load(Opcode::Uload8, Type::I64, args[0], 0);
    let sbyte = b.load(Opcode::Sload8, Type::I64, args[0], 1);
    let half = b.load(Opcode::Uload16, Type::I64, args[0], 2);
    let word = b.load(Opcode::Sload32, Type::I64, args[0], 4);
    let a = b.binary(Opcode::Iadd, byte, sbyte);
    let c = b.binary(Opcode::Iadd, half, word);
    let r = b.binary(Opcode::Iadd, a, c);
    b.ret(vec![r]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffc0_0000, 0x3940_0000), "ldrb");
    assert!(contains_masked(&code, 0xffc0_0000, 0x3980_0000), "ldrsb");
    assert!(contains_masked(&code, 0xffc0_0000, 0x7940_0000), "ldrh");
    assert!(contains_masked(&code, 0xffc0_0000, 0xb980_0000), "ldrsw");
}

#[test]
fn stores_mirror_the_load_widths() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![]);
    let mut b = FunctionBuilder::new("stores", sig);
    let args = b.args();
    b.store(Opcode::Istore8, args[1], args[0], 0);
    b.store(Opcode::Istore16, args[1], args[0], 2);
    b.store(Opcode::Istore32, args[1], args[0], 4);
    b.store(Opcode::Store, args[1], args[0], 8);
    b.ret(vec![]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert!(contains_masked(&code, 0xffc0_0000, 0x3900_0000), "strb");
    assert!(contains_masked(&code, 0xffc0_0000, 0x7900_0000), "strh");
    assert!(contains_masked(&code, 0xffc0_0000, 0xb900_0000), "str w");
    assert!(contains_masked(&code, 0xffc0_0000, 0xf900_0000), "str x");
}

#[test]
fn stack_addr_offsets_account_for_the_outgoing_area() {
    // A call gives the frame an outgoing area; stack-slot addresses must
    // land above it.
    let sig = Signature::new(vec![], vec![Type::I64]);
    let mut b = FunctionBuilder::new("mixed_frame", sig);
    let slot = b.create_stack_slot(8);
    let callee_sig = Signature::new(vec![Type::I64; 9], vec![]);
    let callee = b.declare_ext_func("sink", callee_sig);
    let v = b.iconst(Type::I64, 5);
    b.stack_store(v, slot, 0);
    b.call(callee, vec![v; 9]);
    let r = b.stack_load(Type::I64, slot, 0);
    b.ret(vec![r]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // One 8-byte stack argument rounds to a 16-byte outgoing area; the
    // slot store lands at sp+16.
    assert!(contains_masked(&code, 0xffff_ffe0, 0xf900_0be0), "str [sp, #16]");
    assert_eq!(code.stack_frame_size, 32);
}

#[test]
fn symbol_globals_emit_paired_relocations() {
    let sig = Signature::new(vec![], vec![Type::I64]);
    let mut b = FunctionBuilder::new("counter_addr", sig);
    let gv = b.create_global_value(GlobalValueData::Symbol {
        name: "counter".into(),
        offset: 0,
    });
    let addr = b.global_value(gv);
    b.ret(vec![addr]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert_eq!(code.relocations.len(), 2);
    assert_eq!(code.relocations[0].kind, RelocKind::AdrPrelPgHi21);
    assert_eq!(code.relocations[1].kind, RelocKind::AddAbsLo12Nc);
    assert!(code.relocations.iter().all(|r| r.symbol == "counter"));
    // adrp then add :lo12:.
    assert!(contains_masked(&code, 0x9f00_0000, 0x9000_0000), "adrp");
}

#[test]
fn vmctx_global_reads_the_pinned_register() {
    let sig = Signature::new(vec![], vec![Type::I64]);
    let mut b = FunctionBuilder::new("ctx", sig);
    let vmctx = b.create_global_value(GlobalValueData::VmCtx);
    let addr = b.global_value(vmctx);
    b.ret(vec![addr]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // mov xN, x28.
    assert!(contains_masked(&code, 0xffff_ffe0, 0xaa1c_03e0));
}

#[test]
fn derived_globals_chain_loads_and_adds() {
    let sig = Signature::new(vec![], vec![Type::I64]);
    let mut b = FunctionBuilder::new("derived", sig);
    let vmctx = b.create_global_value(GlobalValueData::VmCtx);
    let base = b.create_global_value(GlobalValueData::Load {
        base: vmctx,
        offset: 16,
    });
    let biased = b.create_global_value(GlobalValueData::IAddImm {
        base,
        offset: 32,
    });
    let addr = b.global_value(biased);
    b.ret(vec![addr]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // ldr xN, [xM, #16] then add xK, xN, #32.
    assert!(contains_masked(&code, 0xffff_fc00, 0xf940_0800), "ldr #16");
    assert!(contains_masked(&code, 0xffff_fc00, 0x9100_8000), "add #32");
}

#[test]
fn atomic_rmw_prefers_lse_when_enabled() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("faa", sig);
    let args = b.args();
    let old = b.atomic_rmw(AtomicOp::Add, Type::I64, args[0], args[1]);
    b.ret(vec![old]);
    let func = b.finish();

    let lse = lse_isa().compile_function(&func).unwrap();
    // ldaddal x, x, [x].
    assert!(contains_masked(&lse, 0xffe0_fc00, 0xf8e0_0000), "ldaddal");
    assert!(!contains_masked(&lse, 0xffc0_0000, 0xc840_0000), "no ll/sc");

    let llsc = isa().compile_function(&func).unwrap();
    // ldaxr / stlxr / cbnz retry loop.
    assert!(contains_masked(&llsc, 0xffe0_fc00, 0xc85f_fc00), "ldaxr");
    assert!(contains_masked(&llsc, 0xffe0_fc00, 0xc800_fc00), "stlxr");
    assert!(contains_masked(&llsc, 0xff00_0000, 0x3500_0000), "cbnz w");
}

#[test]
fn atomic_and_complements_for_ldclr() {
    let sig = Signature::new(vec![Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("faand", sig);
    let args = b.args();
    let old = b.atomic_rmw(AtomicOp::And, Type::I64, args[0], args[1]);
    b.ret(vec![old]);

    let code = lse_isa().compile_function(&b.finish()).unwrap();
    // mvn (orn from xzr) then ldclral.
    assert!(contains_masked(&code, 0xffe0_ffe0, 0xaa20_03e0), "mvn");
    assert!(contains_masked(&code, 0xffe0_fc00, 0xf8e0_1000), "ldclral");
}

#[test]
fn atomic_cas_both_paths() {
    let sig = Signature::new(vec![Type::I64, Type::I64, Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("cas", sig);
    let args = b.args();
    let old = b.atomic_cas(Type::I64, args[0], args[1], args[2]);
    b.ret(vec![old]);
    let func = b.finish();

    let lse = lse_isa().compile_function(&func).unwrap();
    // casal x, x, [x].
    assert!(contains_masked(&lse, 0xffe0_fc00, 0xc8e0_fc00), "casal");

    let llsc = isa().compile_function(&func).unwrap();
    assert!(contains_masked(&llsc, 0xffe0_fc00, 0xc85f_fc00), "ldaxr");
    assert!(contains_masked(&llsc, 0xff00_001f, 0x5400_0001), "b.ne");
    assert!(contains_masked(&llsc, 0xffe0_fc00, 0xc800_fc00), "stlxr");
}

#[test]
fn acquire_release_accesses() {
    let sig = Signature::new(vec![Type::I64, Type::I32], vec![Type::I32]);
    let mut b = FunctionBuilder::new("acqrel", sig);
    let args = b.args();
    let loaded = b.atomic_load(Type::I32, args[0]);
    b.atomic_store(Type::I32, args[1], args[0]);
    b.ret(vec![loaded]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // 32-bit ldar and stlr.
    assert!(contains_masked(&code, 0xffe0_fc00, 0x88df_fc00), "ldar w");
    assert!(contains_masked(&code, 0xffe0_fc00, 0x889f_fc00), "stlr w");
}
