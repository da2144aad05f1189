//! Control flow end to end: fused branches, loops with backward
//! displacements, jump tables, calls and tail calls.

use anvil_codegen::ir::{
    FunctionBuilder, IntCC, Opcode, Signature, TrapCode, Type,
};
use anvil_codegen::{CompiledCode, Isa, IsaBuilder};
use anvil_asm::RelocKind;

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

#[test]
fn compare_to_zero_selects_cbz() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("is_zero", sig);
    let args = b.args();
    let then_block = b.create_block();
    let else_block = b.create_block();
    let zero = b.iconst(Type::I64, 0);
    let cond = b.icmp(IntCC::Eq, args[0], zero);
    b.brif(cond, then_block, else_block);
    b.switch_to_block(then_block);
    let one = b.iconst(Type::I64, 1);
    b.ret(vec![one]);
    b.switch_to_block(else_block);
    let nil = b.iconst(Type::I64, 0);
    b.ret(vec![nil]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // cbz x, forward.
    assert!(contains_masked(&code, 0xff00_0000, 0xb400_0000), "cbz");
}

#[test]
fn single_bit_test_selects_tbnz() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("bit3", sig);
    let args = b.args();
    let then_block = b.create_block();
    let else_block = b.create_block();
    let mask = b.iconst(Type::I64, 1 << 3);
    let bit = b.binary(Opcode::Band, args[0], mask);
    b.brif(bit, then_block, else_block);
    b.switch_to_block(then_block);
    let one = b.iconst(Type::I64, 1);
    b.ret(vec![one]);
    b.switch_to_block(else_block);
    let nil = b.iconst(Type::I64, 0);
    b.ret(vec![nil]);

    let code = isa().compile_function(&b.finish()).unwrap();
    // tbnz x, #3.
    assert!(
        contains_masked(&code, 0xfff8_0000, 0x3718_0000),
        "tbnz bit 3"
    );
}

#[test]
fn counted_loop_resolves_a_backward_branch() {
    // Count a stack-slot value down from 100; the loop back edge is a
    // backward cbnz.
    let sig = Signature::new(vec![], vec![Type::I64]);
    let mut b = FunctionBuilder::new("count100", sig);
    let slot = b.create_stack_slot(8);
    let body = b.create_block();
    let exit = b.create_block();

    let hundred = b.iconst(Type::I64, 100);
    b.stack_store(hundred, slot, 0);
    b.jump(body);

    b.switch_to_block(body);
    let cur = b.stack_load(Type::I64, slot, 0);
    let one = b.iconst(Type::I64, 1);
    let next = b.binary(Opcode::Isub, cur, one);
    b.stack_store(next, slot, 0);
    let zero = b.iconst(Type::I64, 0);
    let again = b.icmp(IntCC::Ne, next, zero);
    b.brif(again, body, exit);

    b.switch_to_block(exit);
    let done = b.stack_load(Type::I64, slot, 0);
    b.ret(vec![done]);

    let code = isa().compile_function(&b.finish()).unwrap();
    let ws = words(&code);

    // A cbnz whose displacement is negative (sign bit of imm19 set).
    let backward = ws.iter().any(|&w| {
        w & 0xff00_0000 == 0xb500_0000 && (w >> 5) & 0x7ffff >= 0x40000
    });
    assert!(backward, "backward cbnz");
    // The stack slot round trips through [sp]-relative accesses.
    assert!(contains_masked(&code, 0xffc0_03e0, 0xf900_03e0), "str to slot");
    assert!(contains_masked(&code, 0xffc0_03e0, 0xf940_03e0), "ldr from slot");
    assert_eq!(code.stack_frame_size, 16);
}

#[test]
fn jump_table_dispatch() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("dispatch", sig);
    let args = b.args();
    let case0 = b.create_block();
    let case1 = b.create_block();
    let case2 = b.create_block();
    let fallback = b.create_block();
    let jt = b.create_jump_table(vec![case0, case1, case2]);
    b.br_table(args[0], jt, fallback);

    for (block, value) in [(case0, 10u64), (case1, 20), (case2, 30), (fallback, 0)] {
        b.switch_to_block(block);
        let c = b.iconst(Type::I64, value);
        b.ret(vec![c]);
    }

    let code = isa().compile_function(&b.finish()).unwrap();
    // Bounds compare, b.hs, adr, ldrsw, indirect br.
    assert!(contains_masked(&code, 0xffe0_fc1f, 0xeb00_001f), "cmp");
    assert!(contains_masked(&code, 0xff00_001f, 0x5400_0002), "b.hs");
    assert!(contains_masked(&code, 0x9f00_0000, 0x1000_0000), "adr");
    assert!(contains_masked(&code, 0xffe0_fc00, 0xb8a0_6800), "ldrsw");
    assert!(contains_masked(&code, 0xffff_fc1f, 0xd61f_0000), "br");
}

#[test]
fn calls_carry_relocations_and_stack_args() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("caller", sig);
    let args = b.args();
    // Ten arguments: two of them go to the outgoing stack area.
    let callee_sig = Signature::new(vec![Type::I64; 10], vec![Type::I64]);
    let callee = b.declare_ext_func("helper", callee_sig);
    let call_args = vec![args[0]; 10];
    let rets = b.call(callee, call_args);
    b.ret(vec![rets[0]]);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert_eq!(code.relocations.len(), 1);
    assert_eq!(code.relocations[0].kind, RelocKind::Call26);
    assert_eq!(code.relocations[0].symbol, "helper");
    // bl at the relocation offset.
    let at = code.relocations[0].offset as usize;
    let word = u32::from_le_bytes(code.code[at..at + 4].try_into().unwrap());
    assert_eq!(word, 0x9400_0000);
    // Outgoing stores at sp+0 and sp+8.
    assert!(contains_masked(&code, 0xffff_ffe0, 0xf900_03e0), "str [sp]");
    assert!(contains_masked(&code, 0xffff_ffe0, 0xf900_07e0), "str [sp, #8]");
    // The outgoing area is part of the frame.
    assert_eq!(code.stack_frame_size, 16);
}

#[test]
fn tail_call_replaces_ret_with_a_branch() {
    let sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let mut b = FunctionBuilder::new("shim", sig);
    let args = b.args();
    let callee_sig = Signature::new(vec![Type::I64], vec![Type::I64]);
    let callee = b.declare_ext_func("target", callee_sig);
    b.return_call(callee, vec![args[0]]);

    let code = isa().compile_function(&b.finish()).unwrap();
    let ws = words(&code);
    // The function ends in b <target>, not ret.
    assert_eq!(*ws.last().unwrap(), 0x1400_0000);
    assert!(!ws.contains(&0xd65f_03c0));
    // The epilogue's frame pop precedes it.
    assert_eq!(ws[ws.len() - 2], 0xa8c1_7bfd, "ldp x29, x30, [sp], #16");
    assert_eq!(code.relocations[0].kind, RelocKind::Call26);
    assert_eq!(code.relocations[0].symbol, "target");
}

#[test]
fn unconditional_trap() {
    let sig = Signature::new(vec![], vec![]);
    let mut b = FunctionBuilder::new("boom", sig);
    b.trap(TrapCode::UnreachableCodeReached);

    let code = isa().compile_function(&b.finish()).unwrap();
    assert_eq!(code.traps.len(), 1);
    assert_eq!(code.traps[0].code, TrapCode::UnreachableCodeReached.code());
}
