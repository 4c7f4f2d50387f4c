//! Semantic vector operations and their capability-gated lowering.
//!
//! An [`OpTable`] is resolved once per generator from the target, the
//! register width and the processor capabilities. Emitters look the lowering
//! up in the table and never query capabilities themselves, so everything a
//! kernel will encode is fixed before its first instruction.

use crate::abi::Target;
use crate::cpu::{CpuCapabilities, Isa};
use crate::reg::VecLen;

/// Semantic vector operations on f32 (or i32 where noted) lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VecOp {
    Load,
    Store,
    Zero,
    Add,
    Sub,
    Mul,
    /// Broadcast one f32 from memory.
    BroadcastFromMem,
    /// Broadcast lane 0 of a register.
    BroadcastFromReg,
    /// Broadcast one i32 from memory.
    BroadcastD,
    /// `d = d * a + b`
    Fmadd213,
    /// `d = a * b + d`
    Fmadd231,
    CmpGt,
    CmpGe,
    /// `d = mask ? src : d`
    Blend,
    /// i32 to i16 with signed saturation.
    PackSsdw,
    /// i16 to u8 with unsigned saturation.
    PackUswb,
    Round,
    Rcp,
    Rsqrt,
    PAddD,
    PMulLD,
    IntLoad,
    IntStore,
}

const OP_COUNT: usize = 23;

impl VecOp {
    pub const ALL: [VecOp; OP_COUNT] = [
        VecOp::Load,
        VecOp::Store,
        VecOp::Zero,
        VecOp::Add,
        VecOp::Sub,
        VecOp::Mul,
        VecOp::BroadcastFromMem,
        VecOp::BroadcastFromReg,
        VecOp::BroadcastD,
        VecOp::Fmadd213,
        VecOp::Fmadd231,
        VecOp::CmpGt,
        VecOp::CmpGe,
        VecOp::Blend,
        VecOp::PackSsdw,
        VecOp::PackUswb,
        VecOp::Round,
        VecOp::Rcp,
        VecOp::Rsqrt,
        VecOp::PAddD,
        VecOp::PMulLD,
        VecOp::IntLoad,
        VecOp::IntStore,
    ];

    fn is_fma(&self) -> bool {
        matches!(self, VecOp::Fmadd213 | VecOp::Fmadd231)
    }

    /// Integer ops whose 256-bit forms arrived with AVX2.
    fn is_avx2_integer(&self) -> bool {
        matches!(
            self,
            VecOp::BroadcastD
                | VecOp::PackSsdw
                | VecOp::PackUswb
                | VecOp::PAddD
                | VecOp::PMulLD
        )
    }
}

/// How one operation is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lowering {
    /// Legacy SSE encoding.
    Legacy,
    /// VEX encoding.
    Vex,
    /// EVEX encoding.
    Evex,
    /// AArch64 Advanced SIMD.
    Asimd,
    /// A sequence of more primitive instructions.
    Synthesized,
}

/// Per-operation lowering, fixed for the lifetime of a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTable {
    target: Target,
    len: VecLen,
    vex: bool,
    entries: [Option<Lowering>; OP_COUNT],
}

impl OpTable {
    pub fn resolve(target: Target, len: VecLen, caps: &dyn CpuCapabilities) -> OpTable {
        let mut entries = [None; OP_COUNT];
        for (slot, op) in entries.iter_mut().zip(VecOp::ALL) {
            *slot = if target.is_x86() {
                lower_x86(op, len, caps)
            } else {
                lower_aarch64(op, len, caps)
            };
        }
        OpTable {
            target,
            len,
            vex: target.is_x86() && caps.mayiuse(Isa::Avx),
            entries,
        }
    }

    pub fn get(&self, op: VecOp) -> Option<Lowering> {
        self.entries[op as usize]
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn vec_len(&self) -> VecLen {
        self.len
    }

    /// Whether VEX encodings are usable, which also selects the encoding of
    /// synthesized sequences.
    pub fn vex_available(&self) -> bool {
        self.vex
    }
}

fn lower_x86(op: VecOp, len: VecLen, caps: &dyn CpuCapabilities) -> Option<Lowering> {
    let avx = caps.mayiuse(Isa::Avx);
    let avx2 = caps.mayiuse(Isa::Avx2);
    let fma = caps.mayiuse(Isa::Fma);
    match len {
        VecLen::V128 => {
            if op.is_fma() {
                return Some(if fma { Lowering::Vex } else { Lowering::Synthesized });
            }
            if avx {
                return Some(match op {
                    VecOp::BroadcastFromReg | VecOp::BroadcastD if !avx2 => Lowering::Synthesized,
                    _ => Lowering::Vex,
                });
            }
            match op {
                VecOp::BroadcastFromMem | VecOp::BroadcastFromReg | VecOp::BroadcastD => {
                    Some(Lowering::Synthesized)
                }
                VecOp::Blend | VecOp::Round | VecOp::PMulLD => {
                    caps.mayiuse(Isa::Sse41).then_some(Lowering::Legacy)
                }
                _ => Some(Lowering::Legacy),
            }
        }
        VecLen::V256 => {
            if !avx {
                return None;
            }
            if op.is_fma() {
                return Some(if fma { Lowering::Vex } else { Lowering::Synthesized });
            }
            if op.is_avx2_integer() {
                return avx2.then_some(Lowering::Vex);
            }
            Some(match op {
                VecOp::BroadcastFromReg if !avx2 => Lowering::Synthesized,
                _ => Lowering::Vex,
            })
        }
        VecLen::V512 => {
            if !caps.mayiuse(Isa::Avx512Common) {
                return None;
            }
            match op {
                // compares and blends go through mask registers at this width
                VecOp::CmpGt | VecOp::CmpGe | VecOp::Blend => None,
                VecOp::PackSsdw | VecOp::PackUswb => {
                    caps.mayiuse(Isa::Avx512Core).then_some(Lowering::Evex)
                }
                _ => Some(Lowering::Evex),
            }
        }
    }
}

fn lower_aarch64(op: VecOp, len: VecLen, caps: &dyn CpuCapabilities) -> Option<Lowering> {
    if len != VecLen::V128 || !caps.mayiuse(Isa::Asimd) {
        return None;
    }
    match op {
        VecOp::Load
        | VecOp::Store
        | VecOp::Zero
        | VecOp::Add
        | VecOp::Sub
        | VecOp::Mul
        | VecOp::BroadcastFromMem
        | VecOp::BroadcastFromReg
        | VecOp::Fmadd231
        | VecOp::PAddD
        | VecOp::IntLoad
        | VecOp::IntStore => Some(Lowering::Asimd),
        _ => None,
    }
}
