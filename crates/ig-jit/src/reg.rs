use std::fmt;

/// General-purpose register number.
///
/// On x86-64 the numbers follow the hardware encoding (`rax` = 0 ... `r15` =
/// 15). On AArch64 they name `x0` to `x30`, with 31 meaning `sp` wherever the
/// instruction accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gpr(pub u8);

impl Gpr {
    pub const RAX: Gpr = Gpr(0);
    pub const RCX: Gpr = Gpr(1);
    pub const RDX: Gpr = Gpr(2);
    pub const RBX: Gpr = Gpr(3);
    pub const RSP: Gpr = Gpr(4);
    pub const RBP: Gpr = Gpr(5);
    pub const RSI: Gpr = Gpr(6);
    pub const RDI: Gpr = Gpr(7);
    pub const R8: Gpr = Gpr(8);
    pub const R9: Gpr = Gpr(9);
    pub const R10: Gpr = Gpr(10);
    pub const R11: Gpr = Gpr(11);
    pub const R12: Gpr = Gpr(12);
    pub const R13: Gpr = Gpr(13);
    pub const R14: Gpr = Gpr(14);
    pub const R15: Gpr = Gpr(15);

    pub const X16: Gpr = Gpr(16);
    pub const FP: Gpr = Gpr(29);
    pub const LR: Gpr = Gpr(30);
    pub const SP: Gpr = Gpr(31);

    pub const fn x(n: u8) -> Gpr {
        Gpr(n)
    }

    #[inline]
    pub(crate) fn low3(self) -> u8 {
        self.0 & 7
    }

    #[inline]
    pub(crate) fn ext(self) -> bool {
        self.0 & 8 != 0
    }
}

/// Vector register number; its width comes from the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vreg(pub u8);

/// Vector register width a generator emits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VecLen {
    /// xmm on x86-64, q registers on AArch64.
    V128,
    /// ymm.
    V256,
    /// zmm.
    V512,
}

impl VecLen {
    pub fn bytes(&self) -> usize {
        match self {
            VecLen::V128 => 16,
            VecLen::V256 => 32,
            VecLen::V512 => 64,
        }
    }

    /// Number of f32 lanes.
    pub fn lanes(&self) -> usize {
        self.bytes() / 4
    }
}

impl fmt::Display for VecLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bits", self.bytes() * 8)
    }
}

/// Memory operand `[base + index * scale + disp]`.
///
/// AArch64 forms only use `base` and `disp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub base: Gpr,
    pub index: Option<(Gpr, u8)>,
    pub disp: i32,
}

impl Address {
    pub fn base(base: Gpr) -> Self {
        Address {
            base,
            index: None,
            disp: 0,
        }
    }

    pub fn disp(base: Gpr, disp: i32) -> Self {
        Address {
            base,
            index: None,
            disp,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: Gpr, scale: u8) -> Self {
        self.index = Some((index, scale));
        self
    }
}

/// Source operand of a vector operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VSrc {
    Reg(Vreg),
    Mem(Address),
}

impl From<Vreg> for VSrc {
    fn from(v: Vreg) -> Self {
        VSrc::Reg(v)
    }
}

impl From<Address> for VSrc {
    fn from(a: Address) -> Self {
        VSrc::Mem(a)
    }
}
