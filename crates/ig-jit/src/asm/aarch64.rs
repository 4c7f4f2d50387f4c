use crate::asm::{CodeBuf, FixupKind, Label};
use crate::error::JitError;
use crate::reg::{Gpr, Vreg};

/// Condition codes for `b.cond`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A64Cond {
    Eq = 0,
    Ne = 1,
}

/// Addressing mode of a load/store pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairMode {
    /// `[xn, #imm]!`
    PreIndex,
    /// `[xn, #imm]`
    Offset,
    /// `[xn], #imm`
    PostIndex,
}

const LDP_BIT: u32 = 0x0040_0000;

/// AArch64 instruction encoder. Every instruction is one little-endian word.
#[derive(Debug, Default)]
pub struct A64Assembler {
    pub buf: CodeBuf,
}

impl A64Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> Label {
        self.buf.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.buf.bind(label);
    }

    #[inline]
    pub fn emit(&mut self, insn: u32) {
        self.buf.put_u32(insn);
    }

    fn bad(&mut self, msg: String) {
        self.buf.fail(JitError::InvalidOperand(msg));
    }

    fn reg(&mut self, r: Gpr) -> u32 {
        if r.0 > 31 {
            self.bad(format!("x{} does not exist", r.0));
        }
        u32::from(r.0 & 31)
    }

    fn vreg(&mut self, v: Vreg) -> u32 {
        if v.0 > 31 {
            self.bad(format!("v{} does not exist", v.0));
        }
        u32::from(v.0 & 31)
    }

    fn pair_base(mode: PairMode) -> u32 {
        match mode {
            PairMode::PreIndex => 0xA980_0000,
            PairMode::Offset => 0xA900_0000,
            PairMode::PostIndex => 0xA880_0000,
        }
    }

    fn imm7(&mut self, offset: i32) -> u32 {
        if offset % 8 != 0 || !(-512..=504).contains(&offset) {
            self.bad(format!("pair offset {offset} is not a multiple of 8 in [-512, 504]"));
            return 0;
        }
        ((offset / 8) as u32 & 0x7F) << 15
    }

    fn pair(&mut self, base: u32, rt: u32, rt2: u32, rn: Gpr, offset: i32) {
        let imm = self.imm7(offset);
        let rn = self.reg(rn);
        self.emit(base | imm | (rt2 << 10) | (rn << 5) | rt);
    }

    pub fn stp(&mut self, rt: Gpr, rt2: Gpr, rn: Gpr, offset: i32, mode: PairMode) {
        let (a, b) = (self.reg(rt), self.reg(rt2));
        self.pair(Self::pair_base(mode), a, b, rn, offset);
    }

    pub fn ldp(&mut self, rt: Gpr, rt2: Gpr, rn: Gpr, offset: i32, mode: PairMode) {
        let (a, b) = (self.reg(rt), self.reg(rt2));
        self.pair(Self::pair_base(mode) | LDP_BIT, a, b, rn, offset);
    }

    /// `stp dt, dt2, [xn, #offset]`
    pub fn stp_d(&mut self, rt: Vreg, rt2: Vreg, rn: Gpr, offset: i32) {
        let (a, b) = (self.vreg(rt), self.vreg(rt2));
        self.pair(0x6D00_0000, a, b, rn, offset);
    }

    /// `ldp dt, dt2, [xn, #offset]`
    pub fn ldp_d(&mut self, rt: Vreg, rt2: Vreg, rn: Gpr, offset: i32) {
        let (a, b) = (self.vreg(rt), self.vreg(rt2));
        self.pair(0x6D40_0000, a, b, rn, offset);
    }

    fn imm12(&mut self, base: u32, rd: Gpr, rn: Gpr, imm: u32) {
        if imm > 0xFFF {
            self.bad(format!("immediate {imm} exceeds 12 bits"));
        }
        let (d, n) = (self.reg(rd), self.reg(rn));
        self.emit(base | ((imm & 0xFFF) << 10) | (n << 5) | d);
    }

    /// `add xd, xn, #imm`; register 31 is `sp`.
    pub fn add_imm(&mut self, rd: Gpr, rn: Gpr, imm: u32) {
        self.imm12(0x9100_0000, rd, rn, imm);
    }

    pub fn sub_imm(&mut self, rd: Gpr, rn: Gpr, imm: u32) {
        self.imm12(0xD100_0000, rd, rn, imm);
    }

    /// `subs xd, xn, #imm`, setting flags.
    pub fn subs_imm(&mut self, rd: Gpr, rn: Gpr, imm: u32) {
        self.imm12(0xF100_0000, rd, rn, imm);
    }

    /// `mov xd, sp` (or between any two registers where 31 means `sp`).
    pub fn mov_sp(&mut self, rd: Gpr, rn: Gpr) {
        self.add_imm(rd, rn, 0);
    }

    fn rrr(&mut self, base: u32, rd: Gpr, rn: Gpr, rm: Gpr) {
        let (d, n, m) = (self.reg(rd), self.reg(rn), self.reg(rm));
        self.emit(base | (m << 16) | (n << 5) | d);
    }

    /// `add xd, xn, xm`; register 31 is `xzr`.
    pub fn add(&mut self, rd: Gpr, rn: Gpr, rm: Gpr) {
        self.rrr(0x8B00_0000, rd, rn, rm);
    }

    pub fn sub(&mut self, rd: Gpr, rn: Gpr, rm: Gpr) {
        self.rrr(0xCB00_0000, rd, rn, rm);
    }

    /// `mul xd, xn, xm`
    pub fn mul(&mut self, rd: Gpr, rn: Gpr, rm: Gpr) {
        self.rrr(0x9B00_7C00, rd, rn, rm);
    }

    /// `orr xd, xzr, xm`
    pub fn mov(&mut self, rd: Gpr, rm: Gpr) {
        self.rrr(0xAA00_03E0, rd, Gpr(0), rm);
    }

    pub fn neg(&mut self, rd: Gpr, rm: Gpr) {
        self.rrr(0xCB00_03E0, rd, Gpr(0), rm);
    }

    /// `lsl xd, xn, #shift`, encoded as `ubfm`.
    pub fn lsl_imm(&mut self, rd: Gpr, rn: Gpr, shift: u8) {
        let shift = u32::from(shift & 63);
        let immr = (64 - shift) & 63;
        let imms = 63 - shift;
        let (d, n) = (self.reg(rd), self.reg(rn));
        self.emit(0xD340_0000 | (immr << 16) | (imms << 10) | (n << 5) | d);
    }

    pub fn movz(&mut self, rd: Gpr, imm: u16, shift: u8) {
        let d = self.reg(rd);
        self.emit(0xD280_0000 | (u32::from(shift / 16) << 21) | (u32::from(imm) << 5) | d);
    }

    pub fn movk(&mut self, rd: Gpr, imm: u16, shift: u8) {
        let d = self.reg(rd);
        self.emit(0xF280_0000 | (u32::from(shift / 16) << 21) | (u32::from(imm) << 5) | d);
    }

    /// Materializes a 64-bit constant with `movz` followed by `movk` for each
    /// nonzero half-word.
    pub fn mov_imm(&mut self, rd: Gpr, imm: u64) {
        self.movz(rd, imm as u16, 0);
        for shift in [16u8, 32, 48] {
            let part = (imm >> shift) as u16;
            if part != 0 {
                self.movk(rd, part, shift);
            }
        }
    }

    fn scaled(&mut self, base: u32, rt: u32, rn: Gpr, offset: i32, scale: i32) {
        if offset < 0 || offset % scale != 0 || offset / scale > 0xFFF {
            self.bad(format!("offset {offset} not encodable with scale {scale}"));
        }
        let n = self.reg(rn);
        let imm = ((offset / scale) as u32 & 0xFFF) << 10;
        self.emit(base | imm | (n << 5) | rt);
    }

    /// Whether `offset` fits the scaled unsigned immediate of a load/store of
    /// `size` bytes.
    pub fn fits_scaled(offset: i32, size: i32) -> bool {
        offset >= 0 && offset % size == 0 && offset / size <= 0xFFF
    }

    pub fn ldr(&mut self, rt: Gpr, rn: Gpr, offset: i32) {
        let t = self.reg(rt);
        self.scaled(0xF940_0000, t, rn, offset, 8);
    }

    pub fn str(&mut self, rt: Gpr, rn: Gpr, offset: i32) {
        let t = self.reg(rt);
        self.scaled(0xF900_0000, t, rn, offset, 8);
    }

    pub fn ldr_q(&mut self, vt: Vreg, rn: Gpr, offset: i32) {
        let t = self.vreg(vt);
        self.scaled(0x3DC0_0000, t, rn, offset, 16);
    }

    pub fn str_q(&mut self, vt: Vreg, rn: Gpr, offset: i32) {
        let t = self.vreg(vt);
        self.scaled(0x3D80_0000, t, rn, offset, 16);
    }

    /// Three-register ASIMD instruction `op vd, vn, vm`.
    pub fn v3(&mut self, base: u32, vd: Vreg, vn: Vreg, vm: Vreg) {
        let (d, n, m) = (self.vreg(vd), self.vreg(vn), self.vreg(vm));
        self.emit(base | (m << 16) | (n << 5) | d);
    }

    /// Two-register ASIMD instruction `op vd, vn`.
    pub fn v2(&mut self, base: u32, vd: Vreg, vn: Vreg) {
        let (d, n) = (self.vreg(vd), self.vreg(vn));
        self.emit(base | (n << 5) | d);
    }

    /// `movi vd.2d, #0`
    pub fn movi_zero(&mut self, vd: Vreg) {
        let d = self.vreg(vd);
        self.emit(0x6F00_E400 | d);
    }

    /// `ld1r {vt.4s}, [xn]`
    pub fn ld1r_4s(&mut self, vt: Vreg, rn: Gpr) {
        let (t, n) = (self.vreg(vt), self.reg(rn));
        self.emit(0x4D40_C800 | (n << 5) | t);
    }

    pub fn b(&mut self, label: Label) {
        let at = self.buf.len();
        self.emit(0x1400_0000);
        self.buf.fixup(FixupKind::Imm26, at, label);
    }

    pub fn b_cond(&mut self, cond: A64Cond, label: Label) {
        let at = self.buf.len();
        self.emit(0x5400_0000 | cond as u32);
        self.buf.fixup(FixupKind::Imm19, at, label);
    }

    pub fn cbz(&mut self, rt: Gpr, label: Label) {
        let t = self.reg(rt);
        let at = self.buf.len();
        self.emit(0xB400_0000 | t);
        self.buf.fixup(FixupKind::Imm19, at, label);
    }

    pub fn cbnz(&mut self, rt: Gpr, label: Label) {
        let t = self.reg(rt);
        let at = self.buf.len();
        self.emit(0xB500_0000 | t);
        self.buf.fixup(FixupKind::Imm19, at, label);
    }

    pub fn ret(&mut self) {
        self.emit(0xD65F_03C0);
    }
}
