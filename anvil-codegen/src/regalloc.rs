//! Virtual-to-physical register assignment: linear-scan allocation with
//! spill slots.
//!
//! Liveness is a linear pass over the virtual code; each virtual register
//! gets one range from its first definition to its last use. Allocation
//! sweeps ranges in start order, expiring finished ranges and evicting the
//! active range with the latest end when the pool runs dry. A spilled
//! register lives in its slot: a store follows every definition and a
//! reload precedes every use. Spill code targets the evicted register when
//! it is still free at the site and any instantaneously free register
//! otherwise, so the rewrite never clobbers a live assignment.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::{debug, trace};

use anvil_asm::{AMode, Inst, OperandKind, PReg, Reg, RegClass, VReg, Writable};

use crate::abi::is_callee_saved;
use crate::error::{CodegenError, CodegenResult};
use crate::lower::VCode;

/// What allocation produced, beyond the rewritten code.
#[derive(Debug, Default)]
pub struct AllocationResult {
    /// Number of virtual registers that were spilled.
    pub spill_count: u32,
    /// Bytes of spill area appended to the nominal stack area.
    pub spill_bytes: u32,
    /// Callee-saved registers the rewritten code touches, in index order.
    pub callee_saves_used: Vec<PReg>,
}

#[derive(Debug, Clone)]
struct LiveRange {
    vreg: VReg,
    start: usize,
    end: usize,
    spans_call: bool,
}

/// Candidate order inside one class: caller-saved first so leaf code never
/// touches the save area.
fn caller_saved_pool(class: RegClass) -> Vec<u8> {
    match class {
        RegClass::Int => (0..=18).collect(),
        RegClass::Float => (0..=7).chain(16..=31).collect(),
    }
}

fn callee_saved_pool(class: RegClass) -> Vec<u8> {
    match class {
        RegClass::Int => (19..=27).collect(),
        RegClass::Float => (8..=15).collect(),
    }
}

type PhysEvents = HashMap<(RegClass, u8), Vec<(usize, bool)>>;

fn compute_ranges(insts: &[Inst]) -> (Vec<LiveRange>, PhysEvents) {
    let mut ranges: HashMap<VReg, LiveRange> = HashMap::new();
    let mut phys_events: PhysEvents = HashMap::new();
    let mut call_sites = Vec::new();

    for (i, inst) in insts.iter().enumerate() {
        if inst.is_call() {
            call_sites.push(i);
        }
        let mut clone = inst.clone();
        clone.visit_regs(&mut |reg, kind| match *reg {
            Reg::Virt(v) => {
                let range = ranges.entry(v).or_insert_with(|| LiveRange {
                    vreg: v,
                    start: i,
                    end: i,
                    spans_call: false,
                });
                range.end = range.end.max(i);
            }
            Reg::Phys(p) => {
                // SP/XZR, FP, LR and the pinned register never enter the
                // pool.
                if p.index() < 28 {
                    phys_events
                        .entry((p.class(), p.index()))
                        .or_default()
                        .push((i, kind == OperandKind::Def));
                }
            }
        });

        if let Inst::JTSequence { ridx, rbound, .. } = inst {
            // The expansion reads the index and bound between its scratch
            // definitions; keep their registers distinct from the scratches
            // by extending the source ranges past the instruction.
            for r in [ridx, rbound] {
                if let Reg::Virt(v) = r {
                    if let Some(range) = ranges.get_mut(v) {
                        range.end = range.end.max(i + 1);
                    }
                }
            }
        }
    }

    let mut ranges: Vec<LiveRange> = ranges.into_values().collect();
    for range in &mut ranges {
        range.spans_call = call_sites
            .iter()
            .any(|&c| range.start < c && c < range.end);
    }
    // Deterministic sweep order.
    ranges.sort_by_key(|r| (r.start, r.vreg.index()));
    (ranges, phys_events)
}

/// True if `preg` can hold a value over `(start, end]` without colliding
/// with a fixed physical operand.
fn phys_free_over(
    events: &PhysEvents,
    class: RegClass,
    preg: u8,
    start: usize,
    end: usize,
) -> bool {
    match events.get(&(class, preg)) {
        None => true,
        Some(list) => !list
            .iter()
            .any(|&(i, is_def)| i > start && (i < end || (i == end && !is_def))),
    }
}

struct Assignments {
    /// Physical home of every virtual register (spilled ones included).
    map: HashMap<VReg, PReg>,
    /// Spill-slot offsets of the evicted registers.
    spilled: HashMap<VReg, i64>,
    /// Ranges of registers that stayed in their assignment.
    occupancy: Vec<(PReg, usize, usize)>,
}

/// Run liveness and linear-scan allocation over `vcode`, rewriting every
/// operand to a physical register and inserting spill code.
///
/// `spill_base` is the nominal-SP offset where the spill area begins.
pub fn allocate(vcode: &mut VCode, spill_base: u32) -> CodegenResult<AllocationResult> {
    let (ranges, phys_events) = compute_ranges(&vcode.insts);

    let mut map: HashMap<VReg, PReg> = HashMap::new();
    let mut spilled: HashMap<VReg, i64> = HashMap::new();
    // Active ranges, sorted by (end, vreg).
    let mut active: Vec<LiveRange> = Vec::new();
    let mut in_use: HashSet<(RegClass, u8)> = HashSet::new();
    let mut spill_cursor = spill_base as i64;

    for range in &ranges {
        let class = range.vreg.class();

        // A range whose last use sits on this range's defining instruction
        // still expires: reads precede the write within one instruction.
        active.retain(|a| {
            if a.end <= range.start {
                let p = map[&a.vreg];
                in_use.remove(&(p.class(), p.index()));
                false
            } else {
                true
            }
        });

        // Callee-saved only for call-crossing ranges; everything otherwise.
        let candidates: Vec<u8> = if range.spans_call {
            callee_saved_pool(class)
        } else {
            caller_saved_pool(class)
                .into_iter()
                .chain(callee_saved_pool(class))
                .collect()
        };

        let chosen = candidates.into_iter().find(|&idx| {
            !in_use.contains(&(class, idx))
                && phys_free_over(&phys_events, class, idx, range.start, range.end)
        });

        match chosen {
            Some(idx) => {
                map.insert(range.vreg, PReg::new(class, idx));
                in_use.insert((class, idx));
                active.push(range.clone());
                active.sort_by_key(|a| (a.end, a.vreg.index()));
            }
            None => {
                // Evict the active range of this class with the latest end;
                // its register carries the current range from here on. The
                // case of the current range out-living every active one is
                // folded into the same eviction.
                let victim_pos = active
                    .iter()
                    .rposition(|a| a.vreg.class() == class)
                    .ok_or(CodegenError::AllocatorSaturation { at: range.start })?;
                let victim = active.remove(victim_pos);
                let preg = map[&victim.vreg];

                let slot = reserve_spill_slot(&mut spill_cursor, class);
                spilled.insert(victim.vreg, slot);
                trace!(vreg = victim.vreg.index(), slot, "spill");

                map.insert(range.vreg, preg);
                active.push(range.clone());
                active.sort_by_key(|a| (a.end, a.vreg.index()));
            }
        }
    }

    let occupancy: Vec<(PReg, usize, usize)> = ranges
        .iter()
        .filter(|r| !spilled.contains_key(&r.vreg))
        .map(|r| (map[&r.vreg], r.start, r.end))
        .collect();

    let spill_count = spilled.len() as u32;
    let assignments = Assignments {
        map,
        spilled,
        occupancy,
    };
    let touched = rewrite(vcode, &assignments, &phys_events)?;

    let callee_saves_used: Vec<PReg> = touched
        .into_iter()
        .filter(|p| is_callee_saved(*p))
        .unique()
        .sorted_by_key(|p| (p.class() == RegClass::Float, p.index()))
        .collect();

    debug!(
        spills = spill_count,
        callee_saves = callee_saves_used.len(),
        "allocation finished"
    );

    Ok(AllocationResult {
        spill_count,
        spill_bytes: (spill_cursor - spill_base as i64) as u32,
        callee_saves_used,
    })
}

fn reserve_spill_slot(cursor: &mut i64, class: RegClass) -> i64 {
    match class {
        RegClass::Int => {
            let slot = *cursor;
            *cursor += 8;
            slot
        }
        RegClass::Float => {
            // Full vector width, 16-aligned.
            *cursor = (*cursor + 15) & !15;
            let slot = *cursor;
            *cursor += 16;
            slot
        }
    }
}

fn spill_store(preg: PReg, off: i64) -> Inst {
    let mem = AMode::NominalSpOffset { off };
    match preg.class() {
        RegClass::Int => Inst::Store64 {
            rd: Reg::Phys(preg),
            mem,
        },
        RegClass::Float => Inst::FpuStore128 {
            rd: Reg::Phys(preg),
            mem,
        },
    }
}

fn spill_reload(preg: PReg, off: i64) -> Inst {
    let mem = AMode::NominalSpOffset { off };
    match preg.class() {
        RegClass::Int => Inst::ULoad64 {
            rd: Writable::from_reg(Reg::Phys(preg)),
            mem,
        },
        RegClass::Float => Inst::FpuLoad128 {
            rd: Writable::from_reg(Reg::Phys(preg)),
            mem,
        },
    }
}

impl Assignments {
    /// A register of `class` holding no live value at instruction `i`.
    /// Prefers the home register, then sweeps the pool in order. Registers
    /// with fixed-operand traffic anywhere in the function are avoided
    /// entirely: a value such as a call argument is live between its setup
    /// move and the call without any event at the instructions in between.
    fn site_reg(
        &self,
        phys_events: &PhysEvents,
        home: PReg,
        i: usize,
        taken: &HashSet<(RegClass, u8)>,
    ) -> Option<PReg> {
        let class = home.class();
        let free = |idx: u8| {
            !taken.contains(&(class, idx))
                && !self
                    .occupancy
                    .iter()
                    .any(|&(p, s, e)| p.class() == class && p.index() == idx && s <= i && i <= e)
                && !phys_events.contains_key(&(class, idx))
        };
        if free(home.index()) {
            return Some(home);
        }
        caller_saved_pool(class)
            .into_iter()
            .chain(callee_saved_pool(class))
            .find(|&idx| free(idx))
            .map(|idx| PReg::new(class, idx))
    }
}

/// Substitute assignments into every operand and insert spill stores and
/// reloads around the instructions that define and use spilled registers.
/// Returns every physical register the final code mentions.
fn rewrite(
    vcode: &mut VCode,
    assignments: &Assignments,
    phys_events: &PhysEvents,
) -> CodegenResult<HashSet<PReg>> {
    let insts = std::mem::take(&mut vcode.insts);
    let mut out = Vec::with_capacity(insts.len());
    let mut block_starts = std::mem::take(&mut vcode.block_starts);
    let mut next_block = 0usize;
    let mut touched: HashSet<PReg> = HashSet::new();

    for (i, mut inst) in insts.into_iter().enumerate() {
        // Keep block starts pointing at the first instruction of the block
        // after insertions.
        while next_block < block_starts.len() && block_starts[next_block] == i {
            block_starts[next_block] = out.len();
            next_block += 1;
        }

        // Registers this instruction already pins: fixed physical operands
        // and the assignments of its non-spilled virtual operands.
        let mut taken: HashSet<(RegClass, u8)> = HashSet::new();
        {
            let mut scan = inst.clone();
            scan.visit_regs(&mut |reg, _| match *reg {
                Reg::Phys(p) => {
                    taken.insert((p.class(), p.index()));
                }
                Reg::Virt(v) => {
                    if !assignments.spilled.contains_key(&v) {
                        let p = assignments.map[&v];
                        taken.insert((p.class(), p.index()));
                    }
                }
            });
        }

        // One site register per spilled virtual operand of this
        // instruction.
        let mut site_regs: HashMap<VReg, PReg> = HashMap::new();
        let mut saturated = false;
        {
            let mut scan = inst.clone();
            scan.visit_regs(&mut |reg, _| {
                if let Reg::Virt(v) = *reg {
                    if assignments.spilled.contains_key(&v) && !site_regs.contains_key(&v) {
                        match assignments.site_reg(phys_events, assignments.map[&v], i, &taken)
                        {
                            Some(p) => {
                                taken.insert((p.class(), p.index()));
                                site_regs.insert(v, p);
                            }
                            None => saturated = true,
                        }
                    }
                }
            });
        }
        if saturated {
            return Err(CodegenError::AllocatorSaturation { at: i });
        }

        let mut reloads: Vec<Inst> = Vec::new();
        let mut stores: Vec<Inst> = Vec::new();
        inst.visit_regs(&mut |reg, kind| {
            if let Reg::Virt(v) = *reg {
                let preg = match site_regs.get(&v) {
                    Some(p) => *p,
                    None => assignments.map[&v],
                };
                if let Some(&slot) = assignments.spilled.get(&v) {
                    match kind {
                        OperandKind::Use => {
                            let reload = spill_reload(preg, slot);
                            if !reloads.contains(&reload) {
                                reloads.push(reload);
                            }
                        }
                        OperandKind::Def => {
                            let store = spill_store(preg, slot);
                            if !stores.contains(&store) {
                                stores.push(store);
                            }
                        }
                    }
                }
                *reg = Reg::Phys(preg);
            }
        });

        out.extend(reloads);
        out.push(inst);
        out.extend(stores);
    }

    for inst in &out {
        let mut scan = inst.clone();
        scan.visit_regs(&mut |reg, _| {
            if let Reg::Phys(p) = *reg {
                if p.index() < 28 {
                    touched.insert(p);
                }
            }
        });
    }

    vcode.insts = out;
    vcode.block_starts = block_starts;
    Ok(touched)
}

/// True when no virtual register remains anywhere in the stream.
pub fn fully_allocated(vcode: &VCode) -> bool {
    vcode.insts.iter().all(|inst| {
        let mut ok = true;
        let mut clone = inst.clone();
        clone.visit_regs(&mut |reg, _| {
            if reg.is_virt() {
                ok = false;
            }
        });
        ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_asm::{AluOp, OperandSize};

    fn vreg(i: u32) -> Reg {
        Reg::Virt(VReg::new(RegClass::Int, i))
    }

    fn wvreg(i: u32) -> Writable<Reg> {
        Writable::from_reg(vreg(i))
    }

    fn add(rd: u32, rn: u32, rm: u32) -> Inst {
        Inst::AluRRR {
            op: AluOp::Add,
            size: OperandSize::Size64,
            rd: wvreg(rd),
            rn: vreg(rn),
            rm: vreg(rm),
        }
    }

    fn movimm(rd: u32, imm: u64) -> Inst {
        Inst::MovImm {
            size: OperandSize::Size64,
            rd: wvreg(rd),
            imm,
        }
    }

    fn vcode_of(insts: Vec<Inst>) -> VCode {
        let mut n = 0;
        for inst in &insts {
            let mut c = inst.clone();
            c.visit_regs(&mut |r, _| {
                if let Reg::Virt(v) = r {
                    n = n.max(v.index() + 1);
                }
            });
        }
        VCode {
            insts,
            block_starts: vec![0],
            num_labels: 0,
            num_vregs: n,
        }
    }

    #[test]
    fn simple_chain_allocates_without_spills() {
        let mut vcode = vcode_of(vec![movimm(0, 1), movimm(1, 2), add(2, 0, 1), Inst::Ret]);
        let result = allocate(&mut vcode, 0).unwrap();
        assert_eq!(result.spill_count, 0);
        assert!(fully_allocated(&vcode));
    }

    #[test]
    fn dead_ranges_free_their_registers() {
        // 60 sequential defs each dying immediately: reuse, no spills.
        let mut insts = Vec::new();
        for i in 0..60u32 {
            insts.push(movimm(i, i as u64));
        }
        insts.push(Inst::Ret);
        let mut vcode = vcode_of(insts);
        let result = allocate(&mut vcode, 0).unwrap();
        assert_eq!(result.spill_count, 0);
    }

    #[test]
    fn thirty_simultaneous_values_spill_exactly_two() {
        // Define 30 values, then consume them in pairs: 28 integer
        // registers force exactly two spills.
        let mut insts = Vec::new();
        for i in 0..30u32 {
            insts.push(movimm(i, i as u64));
        }
        let mut next = 30u32;
        for i in (0..30u32).step_by(2) {
            insts.push(add(next, i, i + 1));
            next += 1;
        }
        insts.push(Inst::Ret);
        let mut vcode = vcode_of(insts);
        let result = allocate(&mut vcode, 0).unwrap();
        assert_eq!(result.spill_count, 2);
        assert_eq!(result.spill_bytes, 16);
        assert!(fully_allocated(&vcode));

        // One store after each spilled definition, one reload before each
        // use, at the two spill slots.
        let stores: Vec<i64> = vcode
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::Store64 { mem: AMode::NominalSpOffset { off }, .. } => Some(*off),
                _ => None,
            })
            .collect();
        let reloads: Vec<i64> = vcode
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::ULoad64 { mem: AMode::NominalSpOffset { off }, .. } => Some(*off),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![0, 8]);
        assert_eq!(reloads, vec![0, 8]);
    }

    #[test]
    fn spill_reload_never_clobbers_a_live_register() {
        // The same shape, checked for operand consistency: no instruction
        // may read two different values from one register.
        let mut insts = Vec::new();
        for i in 0..30u32 {
            insts.push(movimm(i, i as u64));
        }
        let mut next = 30u32;
        for i in (0..30u32).step_by(2) {
            insts.push(add(next, i, i + 1));
            next += 1;
        }
        insts.push(Inst::Ret);
        let mut vcode = vcode_of(insts);
        allocate(&mut vcode, 0).unwrap();
        for inst in &vcode.insts {
            if let Inst::AluRRR { rn, rm, .. } = inst {
                // Pairs hold distinct values, so they must sit in distinct
                // registers.
                assert_ne!(rn, rm, "aliased sources in {inst}");
            }
        }
    }

    #[test]
    fn call_crossing_ranges_prefer_callee_saves() {
        let insts = vec![
            movimm(0, 7),
            Inst::Call { callee: "ext".into() },
            add(1, 0, 0),
            Inst::Ret,
        ];
        let mut vcode = vcode_of(insts);
        let result = allocate(&mut vcode, 0).unwrap();
        assert_eq!(result.spill_count, 0);
        match &vcode.insts[0] {
            Inst::MovImm { rd, .. } => {
                let p = rd.to_reg().as_phys().unwrap();
                assert!(is_callee_saved(p), "{p:?} must survive the call");
            }
            other => panic!("unexpected {other}"),
        }
        assert!(!result.callee_saves_used.is_empty());
    }

    #[test]
    fn fixed_phys_defs_block_overlapping_assignment() {
        // x0 is written between the def and use of v0; v0 must not get x0.
        let insts = vec![
            movimm(0, 7),
            Inst::MovRR {
                size: OperandSize::Size64,
                rd: Writable::from_reg(anvil_asm::xreg(0)),
                rm: vreg(0),
            },
            Inst::MovImm {
                size: OperandSize::Size64,
                rd: Writable::from_reg(anvil_asm::xreg(0)),
                imm: 1,
            },
            add(1, 0, 0),
            Inst::Ret,
        ];
        let mut vcode = vcode_of(insts);
        allocate(&mut vcode, 0).unwrap();
        match &vcode.insts[0] {
            Inst::MovImm { rd, .. } => {
                assert_ne!(rd.to_reg().as_phys().unwrap().index(), 0);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let build = || {
            let mut insts = Vec::new();
            for i in 0..20u32 {
                insts.push(movimm(i, i as u64));
            }
            let mut next = 20;
            for i in (0..20).step_by(2) {
                insts.push(add(next, i, i + 1));
                next += 1;
            }
            insts.push(Inst::Ret);
            vcode_of(insts)
        };
        let mut a = build();
        let mut b = build();
        allocate(&mut a, 0).unwrap();
        allocate(&mut b, 0).unwrap();
        assert_eq!(a.insts, b.insts);
    }
}
