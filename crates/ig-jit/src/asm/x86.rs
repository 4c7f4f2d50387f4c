use crate::asm::{CodeBuf, FixupKind, Label};
use crate::error::JitError;
use crate::reg::{Address, Gpr};

/// Mandatory prefix, in the VEX/EVEX `pp` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pp {
    None = 0,
    P66 = 1,
    F3 = 2,
    F2 = 3,
}

/// Opcode map, in the VEX/EVEX `mm` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Map {
    M0F = 1,
    M0F38 = 2,
    M0F3A = 3,
}

/// Condition codes for `jcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Below = 0x2,
    AboveEq = 0x3,
    Zero = 0x4,
    NotZero = 0x5,
    Less = 0xC,
    GreaterEq = 0xD,
    LessEq = 0xE,
    Greater = 0xF,
}

/// Register-or-memory operand as seen by the ModRM byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rm {
    Reg(u8),
    Mem(Address),
}

/// x86-64 instruction encoder.
#[derive(Debug, Default)]
pub struct X86Assembler {
    pub buf: CodeBuf,
}

impl X86Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> Label {
        self.buf.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.buf.bind(label);
    }

    fn bad(&mut self, msg: String) {
        self.buf.fail(JitError::InvalidOperand(msg));
    }

    fn rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        let bits = (u8::from(w) << 3) | (u8::from(r) << 2) | (u8::from(x) << 1) | u8::from(b);
        if bits != 0 {
            self.buf.put(0x40 | bits);
        }
    }

    fn modrm_reg(&mut self, reg: u8, rm: u8) {
        self.buf.put(0xC0 | ((reg & 7) << 3) | (rm & 7));
    }

    fn check_addr(&mut self, addr: &Address) -> bool {
        if let Some((index, scale)) = addr.index {
            if index == Gpr::RSP {
                self.bad("rsp cannot be an index register".into());
                return false;
            }
            if !matches!(scale, 1 | 2 | 4 | 8) {
                self.bad(format!("scale {scale} is not 1, 2, 4 or 8"));
                return false;
            }
        }
        if addr.base.0 > 15 || addr.index.is_some_and(|(i, _)| i.0 > 15) {
            self.bad(format!("{addr:?} uses a non-x86 register"));
            return false;
        }
        true
    }

    /// ModRM (+SIB, +displacement) for a memory operand. With `disp8` false
    /// every nonzero displacement takes 32 bits, which sidesteps the EVEX
    /// compressed disp8 scaling.
    fn modrm_mem(&mut self, reg: u8, addr: &Address, disp8: bool) {
        let base = addr.base.low3();
        let need_sib = addr.index.is_some() || base == 4;
        let mode = if addr.disp == 0 && base != 5 {
            0
        } else if disp8 && i8::try_from(addr.disp).is_ok() {
            1
        } else {
            2
        };
        let rm = if need_sib { 4 } else { base };
        self.buf.put((mode << 6) | ((reg & 7) << 3) | rm);
        if need_sib {
            let (index, scale) = match addr.index {
                Some((i, s)) => (i.low3(), s.trailing_zeros() as u8),
                None => (4, 0),
            };
            self.buf.put((scale << 6) | (index << 3) | base);
        }
        match mode {
            1 => self.buf.put(addr.disp as i8 as u8),
            2 => self.buf.put_i32(addr.disp),
            _ => {}
        }
    }

    fn rm_body(&mut self, reg: u8, rm: &Rm, disp8: bool) {
        match rm {
            Rm::Reg(r) => self.modrm_reg(reg, *r),
            Rm::Mem(a) => self.modrm_mem(reg, a, disp8),
        }
    }

    /// REX.X and REX.B for an operand.
    fn xb(rm: &Rm) -> (bool, bool) {
        match rm {
            Rm::Reg(r) => (false, r & 8 != 0),
            Rm::Mem(a) => (a.index.is_some_and(|(i, _)| i.ext()), a.base.ext()),
        }
    }

    fn valid_rm(&mut self, rm: &Rm) -> bool {
        match rm {
            Rm::Reg(_) => true,
            Rm::Mem(a) => self.check_addr(a),
        }
    }

    /// `REX.W op /r` with `reg` in ModRM.reg.
    fn op64(&mut self, opcode: &[u8], reg: u8, rm: Rm) {
        if !self.valid_rm(&rm) {
            return;
        }
        let (x, b) = Self::xb(&rm);
        self.rex(true, reg & 8 != 0, x, b);
        self.buf.put_slice(opcode);
        self.rm_body(reg, &rm, true);
    }

    pub fn push(&mut self, r: Gpr) {
        self.rex(false, false, false, r.ext());
        self.buf.put(0x50 + r.low3());
    }

    pub fn pop(&mut self, r: Gpr) {
        self.rex(false, false, false, r.ext());
        self.buf.put(0x58 + r.low3());
    }

    pub fn mov(&mut self, dst: Gpr, src: Gpr) {
        self.op64(&[0x89], src.0, Rm::Reg(dst.0));
    }

    pub fn mov_imm(&mut self, dst: Gpr, imm: i64) {
        match i32::try_from(imm) {
            Ok(imm32) => {
                self.op64(&[0xC7], 0, Rm::Reg(dst.0));
                self.buf.put_i32(imm32);
            }
            Err(_) => {
                self.rex(true, false, false, dst.ext());
                self.buf.put(0xB8 + dst.low3());
                self.buf.put_slice(&imm.to_le_bytes());
            }
        }
    }

    pub fn load(&mut self, dst: Gpr, addr: Address) {
        self.op64(&[0x8B], dst.0, Rm::Mem(addr));
    }

    pub fn store(&mut self, addr: Address, src: Gpr) {
        self.op64(&[0x89], src.0, Rm::Mem(addr));
    }

    pub fn lea(&mut self, dst: Gpr, addr: Address) {
        self.op64(&[0x8D], dst.0, Rm::Mem(addr));
    }

    fn alu_imm(&mut self, ext: u8, r: Gpr, imm: i32) {
        match i8::try_from(imm) {
            Ok(imm8) => {
                self.op64(&[0x83], ext, Rm::Reg(r.0));
                self.buf.put(imm8 as u8);
            }
            Err(_) => {
                self.op64(&[0x81], ext, Rm::Reg(r.0));
                self.buf.put_i32(imm);
            }
        }
    }

    pub fn add_imm(&mut self, r: Gpr, imm: i32) {
        self.alu_imm(0, r, imm);
    }

    pub fn sub_imm(&mut self, r: Gpr, imm: i32) {
        self.alu_imm(5, r, imm);
    }

    pub fn cmp_imm(&mut self, r: Gpr, imm: i32) {
        self.alu_imm(7, r, imm);
    }

    pub fn add(&mut self, dst: Gpr, src: Gpr) {
        self.op64(&[0x01], src.0, Rm::Reg(dst.0));
    }

    pub fn sub(&mut self, dst: Gpr, src: Gpr) {
        self.op64(&[0x29], src.0, Rm::Reg(dst.0));
    }

    pub fn xor(&mut self, dst: Gpr, src: Gpr) {
        self.op64(&[0x31], src.0, Rm::Reg(dst.0));
    }

    pub fn cmp(&mut self, a: Gpr, b: Gpr) {
        self.op64(&[0x39], b.0, Rm::Reg(a.0));
    }

    pub fn test(&mut self, a: Gpr, b: Gpr) {
        self.op64(&[0x85], b.0, Rm::Reg(a.0));
    }

    pub fn imul(&mut self, dst: Gpr, src: Gpr) {
        self.op64(&[0x0F, 0xAF], dst.0, Rm::Reg(src.0));
    }

    pub fn shl_imm(&mut self, r: Gpr, n: u8) {
        self.op64(&[0xC1], 4, Rm::Reg(r.0));
        self.buf.put(n & 63);
    }

    pub fn neg(&mut self, r: Gpr) {
        self.op64(&[0xF7], 3, Rm::Reg(r.0));
    }

    pub fn inc(&mut self, r: Gpr) {
        self.op64(&[0xFF], 0, Rm::Reg(r.0));
    }

    pub fn dec(&mut self, r: Gpr) {
        self.op64(&[0xFF], 1, Rm::Reg(r.0));
    }

    pub fn jmp(&mut self, label: Label) {
        self.buf.put(0xE9);
        let at = self.buf.len();
        self.buf.put_i32(0);
        self.buf.fixup(FixupKind::Rel32, at, label);
    }

    pub fn jcc(&mut self, cond: Cond, label: Label) {
        self.buf.put_slice(&[0x0F, 0x80 | cond as u8]);
        let at = self.buf.len();
        self.buf.put_i32(0);
        self.buf.fixup(FixupKind::Rel32, at, label);
    }

    pub fn ret(&mut self) {
        self.buf.put(0xC3);
    }

    pub fn vzeroupper(&mut self) {
        self.buf.put_slice(&[0xC5, 0xF8, 0x77]);
    }

    /// Legacy SSE form: `[prefix] [REX] 0F [38|3A] op /r [ib]`.
    pub fn sse(&mut self, pp: Pp, map: Map, opcode: u8, reg: u8, rm: Rm, imm: Option<u8>) {
        if reg > 15 || matches!(rm, Rm::Reg(r) if r > 15) {
            self.bad("legacy SSE encodes xmm0-xmm15 only".into());
            return;
        }
        if !self.valid_rm(&rm) {
            return;
        }
        match pp {
            Pp::None => {}
            Pp::P66 => self.buf.put(0x66),
            Pp::F3 => self.buf.put(0xF3),
            Pp::F2 => self.buf.put(0xF2),
        }
        let (x, b) = Self::xb(&rm);
        self.rex(false, reg & 8 != 0, x, b);
        self.buf.put(0x0F);
        match map {
            Map::M0F => {}
            Map::M0F38 => self.buf.put(0x38),
            Map::M0F3A => self.buf.put(0x3A),
        }
        self.buf.put(opcode);
        self.rm_body(reg, &rm, true);
        if let Some(ib) = imm {
            self.buf.put(ib);
        }
    }

    /// VEX form; picks the two-byte prefix whenever it can express the
    /// instruction.
    #[allow(clippy::too_many_arguments)]
    pub fn vex(
        &mut self,
        pp: Pp,
        map: Map,
        opcode: u8,
        w: bool,
        l256: bool,
        reg: u8,
        vvvv: u8,
        rm: Rm,
        imm: Option<u8>,
    ) {
        if reg > 15 || vvvv > 15 || matches!(rm, Rm::Reg(r) if r > 15) {
            self.bad("VEX encodes registers 0-15 only".into());
            return;
        }
        if !self.valid_rm(&rm) {
            return;
        }
        let (x, b) = Self::xb(&rm);
        let r = reg & 8 != 0;
        let tail = ((!vvvv & 0xF) << 3) | (u8::from(l256) << 2) | pp as u8;
        if map == Map::M0F && !w && !x && !b {
            self.buf.put(0xC5);
            self.buf.put((u8::from(!r) << 7) | tail);
        } else {
            self.buf.put(0xC4);
            self.buf
                .put((u8::from(!r) << 7) | (u8::from(!x) << 6) | (u8::from(!b) << 5) | map as u8);
            self.buf.put((u8::from(w) << 7) | tail);
        }
        self.buf.put(opcode);
        self.rm_body(reg, &rm, true);
        if let Some(ib) = imm {
            self.buf.put(ib);
        }
    }

    /// EVEX form at 512 bits, no masking, no broadcast. Memory operands use
    /// 32-bit displacements.
    #[allow(clippy::too_many_arguments)]
    pub fn evex(
        &mut self,
        pp: Pp,
        map: Map,
        opcode: u8,
        w: bool,
        reg: u8,
        vvvv: u8,
        rm: Rm,
        imm: Option<u8>,
    ) {
        if reg > 31 || vvvv > 31 || matches!(rm, Rm::Reg(r) if r > 31) {
            self.bad("EVEX encodes registers 0-31 only".into());
            return;
        }
        if !self.valid_rm(&rm) {
            return;
        }
        let (x, b) = match &rm {
            Rm::Reg(r) => (r & 16 != 0, r & 8 != 0),
            Rm::Mem(_) => Self::xb(&rm),
        };
        let p0 = (u8::from(reg & 8 == 0) << 7)
            | (u8::from(!x) << 6)
            | (u8::from(!b) << 5)
            | (u8::from(reg & 16 == 0) << 4)
            | map as u8;
        let p1 = (u8::from(w) << 7) | ((!vvvv & 0xF) << 3) | 0x04 | pp as u8;
        let p2 = 0x40 | (u8::from(vvvv & 16 == 0) << 3);
        self.buf.put_slice(&[0x62, p0, p1, p2, opcode]);
        self.rm_body(reg, &rm, false);
        if let Some(ib) = imm {
            self.buf.put(ib);
        }
    }
}
