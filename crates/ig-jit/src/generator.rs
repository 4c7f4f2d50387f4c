use crate::abi::{AbiFrame, Target};
use crate::asm::aarch64::{A64Assembler, A64Cond, PairMode};
use crate::asm::x86::{Cond, Map, Pp, Rm, X86Assembler};
use crate::asm::{CodeBuf, Label};
use crate::code::EmittedKernel;
use crate::config::JitConfig;
use crate::cpu::CpuCapabilities;
use crate::error::{JitError, Result};
use crate::ops::{Lowering, OpTable, VecOp};
use crate::reg::{Address, Gpr, VSrc, VecLen, Vreg};

/// Rounding immediate for [`CodeGenerator::uni_round`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    Nearest = 0,
    Floor = 1,
    Ceil = 2,
    Trunc = 3,
}

#[derive(Debug)]
enum Asm {
    X86(X86Assembler),
    A64(A64Assembler),
}

impl Asm {
    fn buf(&mut self) -> &mut CodeBuf {
        match self {
            Asm::X86(a) => &mut a.buf,
            Asm::A64(a) => &mut a.buf,
        }
    }

    fn into_buf(self) -> CodeBuf {
        match self {
            Asm::X86(a) => a.buf,
            Asm::A64(a) => a.buf,
        }
    }
}

/// Native `(prefix, map, opcode)` of an operation under an x86 lowering.
fn x86_opcode(op: VecOp, low: Lowering) -> (Pp, Map, u8) {
    let evex = low == Lowering::Evex;
    match op {
        VecOp::Load => (Pp::None, Map::M0F, 0x10),
        VecOp::Store => (Pp::None, Map::M0F, 0x11),
        VecOp::Zero if evex => (Pp::P66, Map::M0F, 0xEF),
        VecOp::Zero => (Pp::None, Map::M0F, 0x57),
        VecOp::Add => (Pp::None, Map::M0F, 0x58),
        VecOp::Mul => (Pp::None, Map::M0F, 0x59),
        VecOp::Sub => (Pp::None, Map::M0F, 0x5C),
        VecOp::BroadcastFromMem | VecOp::BroadcastFromReg => (Pp::P66, Map::M0F38, 0x18),
        VecOp::BroadcastD => (Pp::P66, Map::M0F38, 0x58),
        VecOp::Fmadd213 => (Pp::P66, Map::M0F38, 0xA8),
        VecOp::Fmadd231 => (Pp::P66, Map::M0F38, 0xB8),
        VecOp::CmpGt | VecOp::CmpGe => (Pp::None, Map::M0F, 0xC2),
        VecOp::Blend if low == Lowering::Legacy => (Pp::P66, Map::M0F38, 0x14),
        VecOp::Blend => (Pp::P66, Map::M0F3A, 0x4A),
        VecOp::PackSsdw => (Pp::P66, Map::M0F, 0x6B),
        VecOp::PackUswb => (Pp::P66, Map::M0F, 0x67),
        VecOp::Round => (Pp::P66, Map::M0F3A, 0x08),
        VecOp::Rcp if evex => (Pp::P66, Map::M0F38, 0x4C),
        VecOp::Rcp => (Pp::None, Map::M0F, 0x53),
        VecOp::Rsqrt if evex => (Pp::P66, Map::M0F38, 0x4E),
        VecOp::Rsqrt => (Pp::None, Map::M0F, 0x52),
        VecOp::PAddD => (Pp::P66, Map::M0F, 0xFE),
        VecOp::PMulLD => (Pp::P66, Map::M0F38, 0x40),
        VecOp::IntLoad => (Pp::F3, Map::M0F, 0x6F),
        VecOp::IntStore => (Pp::F3, Map::M0F, 0x7F),
    }
}

/// Advanced SIMD `.4s` / `.16b` forms of three-register operations.
fn asimd_v3(op: VecOp) -> Option<u32> {
    let base = match op {
        VecOp::Add => 0x4E20_D400,
        VecOp::Sub => 0x4EA0_D400,
        VecOp::Mul => 0x6E20_DC00,
        VecOp::Fmadd231 => 0x4E20_CC00,
        VecOp::PAddD => 0x4EA0_8400,
        _ => return None,
    };
    Some(base)
}

fn x86_rm(src: VSrc) -> Rm {
    match src {
        VSrc::Reg(v) => Rm::Reg(v.0),
        VSrc::Mem(a) => Rm::Mem(a),
    }
}

/// Runtime code generator for one kernel.
///
/// A generator is bound to a target, a vector width and a capability set at
/// construction; the [`OpTable`] resolved there decides the encoding of every
/// `uni_*` operation. Emission errors are sticky and surface from
/// [`CodeGenerator::get_code`], which is the only way to obtain runnable
/// code.
#[derive(Debug)]
pub struct CodeGenerator {
    name: String,
    origin: &'static str,
    table: OpTable,
    asm: Asm,
    config: JitConfig,
    frame: Option<AbiFrame>,
    exit: Option<Label>,
}

impl CodeGenerator {
    pub fn new(
        name: impl Into<String>,
        origin: &'static str,
        target: Target,
        len: VecLen,
        caps: &dyn CpuCapabilities,
        config: JitConfig,
    ) -> Self {
        let asm = if target.is_x86() {
            Asm::X86(X86Assembler::new())
        } else {
            Asm::A64(A64Assembler::new())
        };
        CodeGenerator {
            name: name.into(),
            origin,
            table: OpTable::resolve(target, len, caps),
            asm,
            config,
            frame: None,
            exit: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Target {
        self.table.target()
    }

    pub fn vec_len(&self) -> VecLen {
        self.table.vec_len()
    }

    pub fn table(&self) -> &OpTable {
        &self.table
    }

    /// Bytes emitted so far, branches unresolved.
    pub fn bytes(&mut self) -> &[u8] {
        self.asm.buf().bytes()
    }

    /// Clobbered by large-offset helpers, `mul_by_const` and
    /// address materialization; kernels must not keep values in it.
    pub fn scratch_gpr(&self) -> Gpr {
        if self.target().is_x86() {
            Gpr::R11
        } else {
            Gpr::X16
        }
    }

    /// Clobbered by synthesized vector sequences.
    pub fn scratch_vreg(&self) -> Vreg {
        Vreg(self.num_vregs() - 1)
    }

    pub fn num_vregs(&self) -> u8 {
        match (self.target().is_x86(), self.vec_len()) {
            (true, VecLen::V512) => 32,
            (true, _) => 16,
            (false, _) => 32,
        }
    }

    /// Direct access to the x86 encoder, `None` on other targets.
    pub fn x86(&mut self) -> Option<&mut X86Assembler> {
        match &mut self.asm {
            Asm::X86(a) => Some(a),
            Asm::A64(_) => None,
        }
    }

    /// Direct access to the AArch64 encoder, `None` on other targets.
    pub fn a64(&mut self) -> Option<&mut A64Assembler> {
        match &mut self.asm {
            Asm::A64(a) => Some(a),
            Asm::X86(_) => None,
        }
    }

    pub fn fail(&mut self, err: JitError) {
        self.asm.buf().fail(err);
    }

    pub fn new_label(&mut self) -> Label {
        self.asm.buf().new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.asm.buf().bind(label);
    }

    // ---- frame ----

    /// Saves callee-saved registers and reserves `stack_bytes` of working
    /// stack. Must be paired with [`postamble`](Self::postamble) on every
    /// path; [`with_frame`](Self::with_frame) does that pairing itself.
    pub fn preamble(&mut self, stack_bytes: usize) -> AbiFrame {
        let frame = AbiFrame::for_target(self.target(), stack_bytes);
        let vex = self.table.vex_available();
        match &mut self.asm {
            Asm::X86(a) => {
                let area = frame.vreg_area();
                if area > 0 {
                    a.sub_imm(Gpr::RSP, area as i32);
                    for (i, v) in frame.saved_vregs.iter().enumerate() {
                        let slot = Rm::Mem(Address::disp(Gpr::RSP, (i * 16) as i32));
                        if vex {
                            a.vex(Pp::F3, Map::M0F, 0x7F, false, false, v.0, 0, slot, None);
                        } else {
                            a.sse(Pp::F3, Map::M0F, 0x7F, v.0, slot, None);
                        }
                    }
                }
                for &r in frame.saved_gprs {
                    a.push(r);
                }
                if frame.stack_reserve > 0 {
                    a.sub_imm(Gpr::RSP, frame.stack_reserve as i32);
                }
            }
            Asm::A64(a) => {
                let save = AbiFrame::AARCH64_SAVE_AREA as i32;
                a.stp(Gpr::FP, Gpr::LR, Gpr::SP, -save, PairMode::PreIndex);
                a.mov_sp(Gpr::FP, Gpr::SP);
                for (i, pair) in frame.saved_gprs.chunks(2).enumerate() {
                    a.stp(pair[0], pair[1], Gpr::SP, 16 + 16 * i as i32, PairMode::Offset);
                }
                let vbase = 16 + 8 * frame.saved_gprs.len() as i32;
                for (i, pair) in frame.saved_vregs.chunks(2).enumerate() {
                    a.stp_d(pair[0], pair[1], Gpr::SP, vbase + 16 * i as i32);
                }
                if frame.stack_reserve > 0 {
                    a.sub_imm(Gpr::SP, Gpr::SP, frame.stack_reserve as u32);
                }
            }
        }
        self.frame = Some(frame.clone());
        frame
    }

    /// Restores what [`preamble`](Self::preamble) saved and returns.
    pub fn postamble(&mut self) {
        let Some(frame) = self.frame.clone() else {
            self.fail(JitError::InvalidOperand("postamble without preamble".into()));
            return;
        };
        let vex = self.table.vex_available();
        match &mut self.asm {
            Asm::X86(a) => {
                if frame.stack_reserve > 0 {
                    a.add_imm(Gpr::RSP, frame.stack_reserve as i32);
                }
                for &r in frame.saved_gprs.iter().rev() {
                    a.pop(r);
                }
                let area = frame.vreg_area();
                if area > 0 {
                    for (i, v) in frame.saved_vregs.iter().enumerate() {
                        let slot = Rm::Mem(Address::disp(Gpr::RSP, (i * 16) as i32));
                        if vex {
                            a.vex(Pp::F3, Map::M0F, 0x6F, false, false, v.0, 0, slot, None);
                        } else {
                            a.sse(Pp::F3, Map::M0F, 0x6F, v.0, slot, None);
                        }
                    }
                    a.add_imm(Gpr::RSP, area as i32);
                }
                if vex {
                    a.vzeroupper();
                }
                a.ret();
            }
            Asm::A64(a) => {
                if frame.stack_reserve > 0 {
                    a.add_imm(Gpr::SP, Gpr::SP, frame.stack_reserve as u32);
                }
                let vbase = 16 + 8 * frame.saved_gprs.len() as i32;
                for (i, pair) in frame.saved_vregs.chunks(2).enumerate() {
                    a.ldp_d(pair[0], pair[1], Gpr::SP, vbase + 16 * i as i32);
                }
                for (i, pair) in frame.saved_gprs.chunks(2).enumerate() {
                    a.ldp(pair[0], pair[1], Gpr::SP, 16 + 16 * i as i32, PairMode::Offset);
                }
                let save = AbiFrame::AARCH64_SAVE_AREA as i32;
                a.ldp(Gpr::FP, Gpr::LR, Gpr::SP, save, PairMode::PostIndex);
                a.ret();
            }
        }
    }

    /// Emits preamble, `body`, an exit point and the postamble.
    ///
    /// Jumping to [`exit_label`](Self::exit_label) from anywhere in `body`
    /// leaves through the postamble.
    pub fn with_frame<F>(&mut self, stack_bytes: usize, body: F)
    where
        F: FnOnce(&mut Self, &AbiFrame),
    {
        let frame = self.preamble(stack_bytes);
        let exit = self.new_label();
        let outer = self.exit.replace(exit);
        body(self, &frame);
        self.bind(exit);
        self.exit = outer;
        self.postamble();
    }

    /// Label bound just before the postamble of the enclosing
    /// [`with_frame`](Self::with_frame).
    pub fn exit_label(&mut self) -> Label {
        match self.exit {
            Some(l) => l,
            None => {
                self.fail(JitError::InvalidOperand("exit_label outside with_frame".into()));
                self.new_label()
            }
        }
    }

    // ---- general-purpose registers ----

    pub fn mov_gpr(&mut self, dst: Gpr, src: Gpr) {
        match &mut self.asm {
            Asm::X86(a) => a.mov(dst, src),
            Asm::A64(a) => a.mov(dst, src),
        }
    }

    pub fn mov_imm(&mut self, dst: Gpr, imm: i64) {
        match &mut self.asm {
            Asm::X86(a) => a.mov_imm(dst, imm),
            Asm::A64(a) => a.mov_imm(dst, imm as u64),
        }
    }

    pub fn load_gpr(&mut self, dst: Gpr, addr: Address) {
        if let Asm::X86(a) = &mut self.asm {
            a.load(dst, addr);
            return;
        }
        let (base, disp) = self.a64_addr(addr, 8);
        if let Asm::A64(a) = &mut self.asm {
            a.ldr(dst, base, disp);
        }
    }

    pub fn store_gpr(&mut self, addr: Address, src: Gpr) {
        if let Asm::X86(a) = &mut self.asm {
            a.store(addr, src);
            return;
        }
        let (base, disp) = self.a64_addr(addr, 8);
        if let Asm::A64(a) = &mut self.asm {
            a.str(src, base, disp);
        }
    }

    /// `reg += offset` for any 64-bit offset.
    pub fn safe_add(&mut self, reg: Gpr, offset: i64) {
        let scratch = self.scratch_gpr();
        match &mut self.asm {
            Asm::X86(a) => match i32::try_from(offset) {
                Ok(imm) => a.add_imm(reg, imm),
                Err(_) => {
                    a.mov_imm(scratch, offset);
                    a.add(reg, scratch);
                }
            },
            Asm::A64(a) => {
                if (0..=0xFFF).contains(&offset) {
                    a.add_imm(reg, reg, offset as u32);
                } else if (-0xFFF..0).contains(&offset) {
                    a.sub_imm(reg, reg, offset.unsigned_abs() as u32);
                } else {
                    a.mov_imm(scratch, offset as u64);
                    a.add(reg, reg, scratch);
                }
            }
        }
    }

    /// `reg -= offset` for any 64-bit offset.
    pub fn safe_sub(&mut self, reg: Gpr, offset: i64) {
        match offset.checked_neg() {
            Some(neg) => self.safe_add(reg, neg),
            None => {
                let scratch = self.scratch_gpr();
                match &mut self.asm {
                    Asm::X86(a) => {
                        a.mov_imm(scratch, offset);
                        a.sub(reg, scratch);
                    }
                    Asm::A64(a) => {
                        a.mov_imm(scratch, offset as u64);
                        a.sub(reg, reg, scratch);
                    }
                }
            }
        }
    }

    /// Address of `base + offset`; offsets beyond the immediate range go
    /// through the scratch register.
    pub fn safe_addr(&mut self, base: Gpr, offset: i64) -> Address {
        let scratch = self.scratch_gpr();
        match &mut self.asm {
            Asm::X86(a) => match i32::try_from(offset) {
                Ok(disp) => Address::disp(base, disp),
                Err(_) => {
                    a.mov_imm(scratch, offset);
                    Address::base(base).with_index(scratch, 1)
                }
            },
            Asm::A64(a) => match i32::try_from(offset) {
                Ok(disp) if disp >= 0 => Address::disp(base, disp),
                _ => {
                    a.mov_imm(scratch, offset as u64);
                    a.add(scratch, base, scratch);
                    Address::base(scratch)
                }
            },
        }
    }

    /// `reg *= factor` using shifts and adds.
    pub fn mul_by_const(&mut self, reg: Gpr, factor: i64) {
        let mag = factor.unsigned_abs();
        if mag == 0 {
            match &mut self.asm {
                Asm::X86(a) => a.xor(reg, reg),
                Asm::A64(a) => a.mov(reg, Gpr(31)),
            }
            return;
        }
        if mag.is_power_of_two() {
            self.shl(reg, mag.trailing_zeros() as u8);
        } else {
            let scratch = self.scratch_gpr();
            self.mov_gpr(scratch, reg);
            // walk the bits below the leading one, deferring shifts
            let top = 63 - mag.leading_zeros();
            let mut pending = 0u8;
            for bit in (0..top).rev() {
                pending += 1;
                if (mag >> bit) & 1 == 1 {
                    self.shl(reg, pending);
                    self.add_gpr(reg, scratch);
                    pending = 0;
                }
            }
            self.shl(reg, pending);
        }
        if factor < 0 {
            match &mut self.asm {
                Asm::X86(a) => a.neg(reg),
                Asm::A64(a) => a.neg(reg, reg),
            }
        }
    }

    fn shl(&mut self, reg: Gpr, n: u8) {
        if n == 0 {
            return;
        }
        match &mut self.asm {
            Asm::X86(a) => a.shl_imm(reg, n),
            Asm::A64(a) => a.lsl_imm(reg, reg, n),
        }
    }

    /// `dst += src`
    pub fn add_gpr(&mut self, dst: Gpr, src: Gpr) {
        match &mut self.asm {
            Asm::X86(a) => a.add(dst, src),
            Asm::A64(a) => a.add(dst, dst, src),
        }
    }

    pub fn jmp(&mut self, label: Label) {
        match &mut self.asm {
            Asm::X86(a) => a.jmp(label),
            Asm::A64(a) => a.b(label),
        }
    }

    /// Branches to `label` when `reg` is zero.
    pub fn jump_if_zero(&mut self, reg: Gpr, label: Label) {
        match &mut self.asm {
            Asm::X86(a) => {
                a.test(reg, reg);
                a.jcc(Cond::Zero, label);
            }
            Asm::A64(a) => a.cbz(reg, label),
        }
    }

    /// Decrements `reg` and branches to `label` while it is nonzero.
    pub fn dec_jnz(&mut self, reg: Gpr, label: Label) {
        match &mut self.asm {
            Asm::X86(a) => {
                a.dec(reg);
                a.jcc(Cond::NotZero, label);
            }
            Asm::A64(a) => {
                a.subs_imm(reg, reg, 1);
                a.b_cond(A64Cond::Ne, label);
            }
        }
    }

    // ---- portable vector operations ----

    fn require(&mut self, op: VecOp) -> Option<Lowering> {
        let low = self.table.get(op);
        if low.is_none() {
            let err = JitError::NoEncoding {
                op,
                len: self.vec_len(),
                target: self.target(),
            };
            self.fail(err);
        }
        low
    }

    /// Lowering of the plain arithmetic used inside synthesized sequences.
    fn base_lowering(&self) -> Lowering {
        match (self.vec_len(), self.table.vex_available()) {
            (VecLen::V512, _) => Lowering::Evex,
            (_, true) => Lowering::Vex,
            (_, false) => Lowering::Legacy,
        }
    }

    fn x86_native(&mut self, op: VecOp, low: Lowering, reg: u8, vvvv: u8, rm: Rm, imm: Option<u8>) {
        let l256 = self.vec_len() == VecLen::V256;
        let target = self.target();
        let (pp, map, opc) = x86_opcode(op, low);
        let Asm::X86(a) = &mut self.asm else {
            self.fail(JitError::UnsupportedTarget(target));
            return;
        };
        match low {
            Lowering::Legacy => a.sse(pp, map, opc, reg, rm, imm),
            Lowering::Vex => a.vex(pp, map, opc, false, l256, reg, vvvv, rm, imm),
            Lowering::Evex => a.evex(pp, map, opc, false, reg, vvvv, rm, imm),
            Lowering::Asimd | Lowering::Synthesized => a.buf.fail(JitError::InvalidOperand(
                format!("{op:?} has no single native form under {low:?}"),
            )),
        }
    }

    fn x86_raw(&mut self, f: impl FnOnce(&mut X86Assembler)) {
        let target = self.target();
        match &mut self.asm {
            Asm::X86(a) => f(a),
            Asm::A64(_) => self.fail(JitError::UnsupportedTarget(target)),
        }
    }

    fn a64_raw(&mut self, f: impl FnOnce(&mut A64Assembler)) {
        let target = self.target();
        match &mut self.asm {
            Asm::A64(a) => f(a),
            Asm::X86(_) => self.fail(JitError::UnsupportedTarget(target)),
        }
    }

    /// Base register and immediate for an AArch64 load/store of `size` bytes.
    fn a64_addr(&mut self, addr: Address, size: i32) -> (Gpr, i32) {
        if addr.index.is_some() {
            self.fail(JitError::InvalidOperand(
                "indexed addressing is x86-only".into(),
            ));
            return (addr.base, 0);
        }
        if A64Assembler::fits_scaled(addr.disp, size) {
            return (addr.base, addr.disp);
        }
        if addr.base == Gpr::SP {
            self.fail(JitError::InvalidOperand(format!(
                "sp offset {} not encodable",
                addr.disp
            )));
            return (addr.base, 0);
        }
        let scratch = self.scratch_gpr();
        self.a64_raw(|a| {
            a.mov_imm(scratch, i64::from(addr.disp) as u64);
            a.add(scratch, addr.base, scratch);
        });
        (scratch, 0)
    }

    /// Register-to-register copy at the generator width.
    pub fn uni_mov(&mut self, dst: Vreg, src: Vreg) {
        if dst == src {
            return;
        }
        let low = self.base_lowering();
        let l256 = self.vec_len() == VecLen::V256;
        let rm = Rm::Reg(src.0);
        // movaps, or orr on aarch64
        match &mut self.asm {
            Asm::X86(a) => match low {
                Lowering::Legacy => a.sse(Pp::None, Map::M0F, 0x28, dst.0, rm, None),
                Lowering::Vex => a.vex(Pp::None, Map::M0F, 0x28, false, l256, dst.0, 0, rm, None),
                _ => a.evex(Pp::None, Map::M0F, 0x28, false, dst.0, 0, rm, None),
            },
            Asm::A64(a) => a.v3(0x4EA0_1C00, dst, src, src),
        }
    }

    fn load_into(&mut self, src: VSrc) -> Vreg {
        match src {
            VSrc::Reg(v) => v,
            VSrc::Mem(addr) => {
                let tmp = self.scratch_vreg();
                self.a64_load_q(tmp, addr);
                tmp
            }
        }
    }

    fn a64_load_q(&mut self, dst: Vreg, addr: Address) {
        let (base, disp) = self.a64_addr(addr, 16);
        self.a64_raw(|a| a.ldr_q(dst, base, disp));
    }

    fn a64_store_q(&mut self, addr: Address, src: Vreg) {
        let (base, disp) = self.a64_addr(addr, 16);
        self.a64_raw(|a| a.str_q(src, base, disp));
    }

    /// `dst = a <op> b` with the two-operand legacy form handled.
    fn binary(&mut self, op: VecOp, dst: Vreg, a: Vreg, b: VSrc, imm: Option<u8>) {
        let Some(low) = self.require(op) else { return };
        match low {
            Lowering::Vex | Lowering::Evex => {
                self.x86_native(op, low, dst.0, a.0, x86_rm(b), imm);
            }
            Lowering::Legacy => self.legacy_binary(op, dst, a, b, imm),
            Lowering::Asimd => {
                let Some(base) = asimd_v3(op) else {
                    self.fail(JitError::NoEncoding {
                        op,
                        len: self.vec_len(),
                        target: self.target(),
                    });
                    return;
                };
                let b = self.load_into(b);
                self.a64_raw(|asm| asm.v3(base, dst, a, b));
            }
            Lowering::Synthesized => self.fail(JitError::NoEncoding {
                op,
                len: self.vec_len(),
                target: self.target(),
            }),
        }
    }

    fn legacy_binary(&mut self, op: VecOp, dst: Vreg, a: Vreg, b: VSrc, imm: Option<u8>) {
        let commutative = matches!(
            op,
            VecOp::Add | VecOp::Mul | VecOp::PAddD | VecOp::PMulLD
        );
        let mut b = b;
        if dst != a && b == VSrc::Reg(dst) {
            if commutative {
                self.x86_native(op, Lowering::Legacy, dst.0, 0, Rm::Reg(a.0), imm);
                return;
            }
            let tmp = self.scratch_vreg();
            self.uni_mov(tmp, dst);
            b = VSrc::Reg(tmp);
        }
        self.uni_mov(dst, a);
        self.x86_native(op, Lowering::Legacy, dst.0, 0, x86_rm(b), imm);
    }

    /// `dst = op(src)` for single-source operations.
    fn unary(&mut self, op: VecOp, dst: Vreg, src: VSrc, imm: Option<u8>) {
        let Some(low) = self.require(op) else { return };
        match low {
            Lowering::Legacy | Lowering::Vex | Lowering::Evex => {
                self.x86_native(op, low, dst.0, 0, x86_rm(src), imm);
            }
            Lowering::Asimd => match (op, src) {
                (VecOp::Load | VecOp::IntLoad, VSrc::Mem(addr)) => self.a64_load_q(dst, addr),
                (VecOp::Load | VecOp::IntLoad, VSrc::Reg(v)) => self.uni_mov(dst, v),
                (VecOp::BroadcastFromMem, VSrc::Mem(addr)) => {
                    let base = if addr.disp == 0 && addr.index.is_none() {
                        addr.base
                    } else {
                        let scratch = self.scratch_gpr();
                        self.safe_addr_a64_into(scratch, addr);
                        scratch
                    };
                    self.a64_raw(|a| a.ld1r_4s(dst, base));
                }
                (VecOp::BroadcastFromReg, VSrc::Reg(v)) => {
                    self.a64_raw(|a| a.v2(0x4E04_0400, dst, v));
                }
                _ => self.fail(JitError::InvalidOperand(format!(
                    "{op:?} does not take {src:?}"
                ))),
            },
            Lowering::Synthesized => self.synth_broadcast(op, dst, src),
        }
    }

    fn safe_addr_a64_into(&mut self, dst: Gpr, addr: Address) {
        if addr.index.is_some() {
            self.fail(JitError::InvalidOperand("indexed addressing is x86-only".into()));
            return;
        }
        let disp = i64::from(addr.disp);
        self.a64_raw(|a| {
            if (0..=0xFFF).contains(&disp) {
                a.add_imm(dst, addr.base, disp as u32);
            } else {
                a.mov_imm(dst, disp as u64);
                a.add(dst, addr.base, dst);
            }
        });
    }

    /// Broadcasts built from moves and shuffles where no native form exists.
    fn synth_broadcast(&mut self, op: VecOp, dst: Vreg, src: VSrc) {
        let vex = self.table.vex_available();
        let wide = self.vec_len() == VecLen::V256;
        match (op, src) {
            (VecOp::BroadcastFromMem, VSrc::Mem(m)) => {
                // movss + shufps
                self.x86_raw(|a| {
                    a.sse(Pp::F3, Map::M0F, 0x10, dst.0, Rm::Mem(m), None);
                    a.sse(Pp::None, Map::M0F, 0xC6, dst.0, Rm::Reg(dst.0), Some(0));
                });
            }
            (VecOp::BroadcastFromReg, VSrc::Reg(s)) => {
                if vex {
                    self.x86_raw(|a| {
                        a.vex(Pp::None, Map::M0F, 0xC6, false, false, dst.0, s.0, Rm::Reg(s.0), Some(0));
                        if wide {
                            // vinsertf128 dst, dst, xmm_dst, 1
                            let rm = Rm::Reg(dst.0);
                            a.vex(Pp::P66, Map::M0F3A, 0x18, false, true, dst.0, dst.0, rm, Some(1));
                        }
                    });
                } else {
                    self.uni_mov(dst, s);
                    self.x86_raw(|a| {
                        a.sse(Pp::None, Map::M0F, 0xC6, dst.0, Rm::Reg(dst.0), Some(0));
                    });
                }
            }
            (VecOp::BroadcastD, _) => {
                // movd (memory only) + pshufd
                let shuffle_src = match src {
                    VSrc::Mem(m) => {
                        self.x86_raw(|a| {
                            if vex {
                                a.vex(Pp::P66, Map::M0F, 0x6E, false, false, dst.0, 0, Rm::Mem(m), None);
                            } else {
                                a.sse(Pp::P66, Map::M0F, 0x6E, dst.0, Rm::Mem(m), None);
                            }
                        });
                        dst
                    }
                    VSrc::Reg(s) => s,
                };
                self.x86_raw(|a| {
                    let rm = Rm::Reg(shuffle_src.0);
                    if vex {
                        a.vex(Pp::P66, Map::M0F, 0x70, false, false, dst.0, 0, rm, Some(0));
                    } else {
                        a.sse(Pp::P66, Map::M0F, 0x70, dst.0, rm, Some(0));
                    }
                });
            }
            _ => self.fail(JitError::InvalidOperand(format!(
                "{op:?} cannot be synthesized from {src:?}"
            ))),
        }
    }

    fn store(&mut self, op: VecOp, addr: Address, src: Vreg) {
        let Some(low) = self.require(op) else { return };
        match low {
            Lowering::Asimd => self.a64_store_q(addr, src),
            _ => self.x86_native(op, low, src.0, 0, Rm::Mem(addr), None),
        }
    }

    /// Fused multiply-add family, with a multiply-then-add fallback.
    fn fma(&mut self, op: VecOp, dst: Vreg, a: Vreg, b: VSrc) {
        let Some(low) = self.require(op) else { return };
        match low {
            Lowering::Vex | Lowering::Evex => {
                self.x86_native(op, low, dst.0, a.0, x86_rm(b), None);
            }
            Lowering::Asimd => self.binary(op, dst, a, b, None),
            Lowering::Legacy => self.fail(JitError::NoEncoding {
                op,
                len: self.vec_len(),
                target: self.target(),
            }),
            Lowering::Synthesized => {
                let base = self.base_lowering();
                let tmp = self.scratch_vreg();
                match op {
                    VecOp::Fmadd213 => {
                        if b == VSrc::Reg(dst) {
                            self.arith(base, VecOp::Mul, tmp, dst, VSrc::Reg(a));
                            self.arith(base, VecOp::Add, dst, tmp, b);
                        } else {
                            self.arith(base, VecOp::Mul, dst, dst, VSrc::Reg(a));
                            self.arith(base, VecOp::Add, dst, dst, b);
                        }
                    }
                    _ => {
                        self.arith(base, VecOp::Mul, tmp, a, b);
                        self.arith(base, VecOp::Add, dst, dst, VSrc::Reg(tmp));
                    }
                }
            }
        }
    }

    /// Plain arithmetic under an explicit lowering, bypassing the table.
    fn arith(&mut self, low: Lowering, op: VecOp, dst: Vreg, a: Vreg, b: VSrc) {
        match low {
            Lowering::Legacy => self.legacy_binary(op, dst, a, b, None),
            _ => self.x86_native(op, low, dst.0, a.0, x86_rm(b), None),
        }
    }

    pub fn uni_load(&mut self, dst: Vreg, addr: Address) {
        self.unary(VecOp::Load, dst, VSrc::Mem(addr), None);
    }

    pub fn uni_store(&mut self, addr: Address, src: Vreg) {
        self.store(VecOp::Store, addr, src);
    }

    pub fn uni_zero(&mut self, dst: Vreg) {
        let Some(low) = self.require(VecOp::Zero) else { return };
        match low {
            Lowering::Asimd => self.a64_raw(|a| a.movi_zero(dst)),
            _ => self.x86_native(VecOp::Zero, low, dst.0, dst.0, Rm::Reg(dst.0), None),
        }
    }

    pub fn uni_add(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::Add, dst, a, b.into(), None);
    }

    pub fn uni_sub(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::Sub, dst, a, b.into(), None);
    }

    pub fn uni_mul(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::Mul, dst, a, b.into(), None);
    }

    /// Broadcasts the f32 at `addr` to every lane of `dst`.
    pub fn uni_broadcast(&mut self, dst: Vreg, addr: Address) {
        self.unary(VecOp::BroadcastFromMem, dst, VSrc::Mem(addr), None);
    }

    /// Broadcasts lane 0 of `src` to every lane of `dst`.
    pub fn uni_broadcast_reg(&mut self, dst: Vreg, src: Vreg) {
        self.unary(VecOp::BroadcastFromReg, dst, VSrc::Reg(src), None);
    }

    /// Broadcasts one i32 to every lane of `dst`.
    pub fn uni_broadcast_d(&mut self, dst: Vreg, src: impl Into<VSrc>) {
        self.unary(VecOp::BroadcastD, dst, src.into(), None);
    }

    /// `dst = dst * a + b`
    pub fn uni_fmadd213(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.fma(VecOp::Fmadd213, dst, a, b.into());
    }

    /// `dst = a * b + dst`
    pub fn uni_fmadd231(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.fma(VecOp::Fmadd231, dst, a, b.into());
    }

    /// Lane mask of `a > b`.
    pub fn uni_cmpgt(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        let pred = if self.base_lowering() == Lowering::Legacy { 6 } else { 0x0E };
        self.binary(VecOp::CmpGt, dst, a, b.into(), Some(pred));
    }

    /// Lane mask of `a >= b`.
    pub fn uni_cmpge(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        let pred = if self.base_lowering() == Lowering::Legacy { 5 } else { 0x0D };
        self.binary(VecOp::CmpGe, dst, a, b.into(), Some(pred));
    }

    /// `dst = mask ? src : dst` per lane. The legacy form requires the mask
    /// in register 0.
    pub fn uni_blend(&mut self, dst: Vreg, src: impl Into<VSrc>, mask: Vreg) {
        let src = src.into();
        let Some(low) = self.require(VecOp::Blend) else { return };
        match low {
            Lowering::Legacy if mask != Vreg(0) => self.fail(JitError::InvalidOperand(
                "legacy blendvps takes its mask in xmm0".into(),
            )),
            Lowering::Legacy => {
                self.x86_native(VecOp::Blend, low, dst.0, 0, x86_rm(src), None);
            }
            _ => self.x86_native(
                VecOp::Blend,
                low,
                dst.0,
                dst.0,
                x86_rm(src),
                Some(mask.0 << 4),
            ),
        }
    }

    /// Signed-saturating i32 to i16 narrowing; wide forms work per 128-bit
    /// lane.
    pub fn uni_packssdw(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::PackSsdw, dst, a, b.into(), None);
    }

    pub fn uni_packuswb(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::PackUswb, dst, a, b.into(), None);
    }

    pub fn uni_round(&mut self, dst: Vreg, src: impl Into<VSrc>, mode: RoundMode) {
        // bit 3 suppresses the precision exception
        self.unary(VecOp::Round, dst, src.into(), Some(mode as u8 | 0x8));
    }

    pub fn uni_rcp(&mut self, dst: Vreg, src: impl Into<VSrc>) {
        self.unary(VecOp::Rcp, dst, src.into(), None);
    }

    pub fn uni_rsqrt(&mut self, dst: Vreg, src: impl Into<VSrc>) {
        self.unary(VecOp::Rsqrt, dst, src.into(), None);
    }

    pub fn uni_paddd(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::PAddD, dst, a, b.into(), None);
    }

    pub fn uni_pmulld(&mut self, dst: Vreg, a: Vreg, b: impl Into<VSrc>) {
        self.binary(VecOp::PMulLD, dst, a, b.into(), None);
    }

    pub fn uni_int_load(&mut self, dst: Vreg, addr: Address) {
        self.unary(VecOp::IntLoad, dst, VSrc::Mem(addr), None);
    }

    pub fn uni_int_store(&mut self, addr: Address, src: Vreg) {
        self.store(VecOp::IntStore, addr, src);
    }

    // ---- finalization ----

    /// Finalizes the kernel: resolves branches, copies the code into
    /// executable memory and runs the registrar and dump hooks.
    ///
    /// Any error recorded during emission is returned here and no code is
    /// mapped.
    pub fn get_code(self) -> Result<EmittedKernel> {
        let CodeGenerator {
            name,
            origin,
            table,
            asm,
            config,
            ..
        } = self;
        let bytes = asm.into_buf().finish()?;
        if bytes.is_empty() {
            return Err(JitError::EmptyCode);
        }
        if bytes.len() > config.code_capacity {
            return Err(JitError::BufferExhausted {
                needed: bytes.len(),
                capacity: config.code_capacity,
            });
        }
        let kernel = EmittedKernel::from_bytes(name, origin, table.target(), &bytes)?;
        tracing::debug!(
            name = kernel.name(),
            size = kernel.size(),
            target = %kernel.target(),
            "kernel finalized"
        );
        if let Some(registrar) = &config.registrar {
            registrar.register(&kernel);
        }
        if config.dump_enabled() {
            if let Err(err) = config.dumper.dump(kernel.name(), kernel.code()) {
                tracing::warn!(name = kernel.name(), error = %err, "kernel dump failed");
            }
        }
        Ok(kernel)
    }
}
