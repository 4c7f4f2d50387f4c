use std::mem::offset_of;

use ig_jit::{Address, CodeGenerator, Gpr, JitError, Target, Vreg};

use super::{KernelClass, KernelKey, MR_VECS, TILE_NR};

/// Arguments of one tile call, passed by pointer.
///
/// The kernel computes an `MR x NR` block of C from `k` packed steps. Packed
/// A holds MR values per step and packed B holds NR values per step, both
/// contiguous and of the kernel's element class (f32 or i32).
#[repr(C)]
#[derive(Debug)]
pub struct TileArgs {
    pub k: usize,
    pub a: *const u8,
    pub b: *const u8,
    pub c: *mut u8,
    pub ldc_bytes: usize,
    pub alpha: f32,
    pub beta: f32,
    /// MR values; read only by kernels built with bias.
    pub bias: *const f32,
}

pub type TileFn = unsafe extern "C" fn(*const TileArgs);

struct TileRegs {
    k: Gpr,
    a: Gpr,
    b: Gpr,
    c: Gpr,
    ldc: Gpr,
    bias: Gpr,
    col: Gpr,
}

impl TileRegs {
    // none of these alias the first argument register or the scratch gpr
    fn for_target(target: Target) -> Self {
        if target.is_x86() {
            TileRegs {
                k: Gpr::R8,
                a: Gpr::R9,
                b: Gpr::R10,
                c: Gpr::RBX,
                ldc: Gpr::RBP,
                bias: Gpr::R12,
                col: Gpr::R13,
            }
        } else {
            TileRegs {
                k: Gpr::x(9),
                a: Gpr::x(10),
                b: Gpr::x(11),
                c: Gpr::x(12),
                ldc: Gpr::x(13),
                bias: Gpr::x(14),
                col: Gpr::x(15),
            }
        }
    }
}

const A_REGS: [Vreg; MR_VECS] = [Vreg(8), Vreg(9)];
const B_REG: Vreg = Vreg(10);
const ALPHA: Vreg = Vreg(11);
const BETA: Vreg = Vreg(12);
const TMP: Vreg = Vreg(13);

fn acc(v: usize, j: usize) -> Vreg {
    Vreg((v * TILE_NR + j) as u8)
}

fn field(args: Gpr, offset: usize) -> Address {
    Address::disp(args, offset as i32)
}

/// Emits the tile kernel described by `key` into `g`.
pub(super) fn emit(g: &mut CodeGenerator, key: &KernelKey) {
    let regs = TileRegs::for_target(g.target());
    let vbytes = g.vec_len().bytes() as i32;
    let float = key.class == KernelClass::Float;

    g.with_frame(0, |g, frame| {
        let Some(args) = frame.param(0) else {
            g.fail(JitError::InvalidOperand("frame has no argument register".into()));
            return;
        };
        g.load_gpr(regs.k, field(args, offset_of!(TileArgs, k)));
        g.load_gpr(regs.a, field(args, offset_of!(TileArgs, a)));
        g.load_gpr(regs.b, field(args, offset_of!(TileArgs, b)));
        g.load_gpr(regs.c, field(args, offset_of!(TileArgs, c)));
        g.load_gpr(regs.ldc, field(args, offset_of!(TileArgs, ldc_bytes)));
        if key.with_bias {
            g.load_gpr(regs.bias, field(args, offset_of!(TileArgs, bias)));
        }
        if float {
            g.uni_broadcast(ALPHA, field(args, offset_of!(TileArgs, alpha)));
            if !key.beta_zero {
                g.uni_broadcast(BETA, field(args, offset_of!(TileArgs, beta)));
            }
        }
        for v in 0..MR_VECS {
            for j in 0..TILE_NR {
                g.uni_zero(acc(v, j));
            }
        }

        let done = g.new_label();
        g.jump_if_zero(regs.k, done);
        let top = g.new_label();
        g.bind(top);
        for (v, &areg) in A_REGS.iter().enumerate() {
            let src = Address::disp(regs.a, v as i32 * vbytes);
            if float {
                g.uni_load(areg, src);
            } else {
                g.uni_int_load(areg, src);
            }
        }
        for j in 0..TILE_NR {
            let src = Address::disp(regs.b, (j * 4) as i32);
            if float {
                g.uni_broadcast(B_REG, src);
            } else {
                g.uni_broadcast_d(B_REG, src);
            }
            for (v, &areg) in A_REGS.iter().enumerate() {
                if float {
                    g.uni_fmadd231(acc(v, j), areg, B_REG);
                } else {
                    g.uni_pmulld(TMP, areg, B_REG);
                    g.uni_paddd(acc(v, j), acc(v, j), TMP);
                }
            }
        }
        g.safe_add(regs.a, i64::from(vbytes) * MR_VECS as i64);
        g.safe_add(regs.b, (TILE_NR * 4) as i64);
        g.dec_jnz(regs.k, top);
        g.bind(done);

        // C tile, one column per step of ldc
        g.mov_gpr(regs.col, regs.c);
        if float && key.with_bias {
            for (v, &areg) in A_REGS.iter().enumerate() {
                g.uni_load(areg, Address::disp(regs.bias, v as i32 * vbytes));
            }
        }
        for j in 0..TILE_NR {
            for v in 0..MR_VECS {
                let dst = Address::disp(regs.col, v as i32 * vbytes);
                let r = acc(v, j);
                if !float {
                    g.uni_int_store(dst, r);
                    continue;
                }
                g.uni_mul(r, r, ALPHA);
                if key.with_bias {
                    g.uni_add(r, r, A_REGS[v]);
                }
                if !key.beta_zero {
                    g.uni_load(TMP, dst);
                    g.uni_fmadd231(r, BETA, TMP);
                }
                g.uni_store(dst, r);
            }
            if j + 1 < TILE_NR {
                g.add_gpr(regs.col, regs.ldc);
            }
        }
    });
}
