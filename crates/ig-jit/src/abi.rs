use std::fmt;

use crate::reg::{Gpr, Vreg};

/// Instruction set and calling convention a kernel is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    X86_64SysV,
    X86_64Win64,
    Aarch64,
}

impl Target {
    /// The target matching the running process, if it has an emitter.
    pub fn host() -> Option<Target> {
        if cfg!(all(target_arch = "x86_64", windows)) {
            Some(Target::X86_64Win64)
        } else if cfg!(target_arch = "x86_64") {
            Some(Target::X86_64SysV)
        } else if cfg!(target_arch = "aarch64") {
            Some(Target::Aarch64)
        } else {
            None
        }
    }

    pub fn is_x86(&self) -> bool {
        matches!(self, Target::X86_64SysV | Target::X86_64Win64)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::X86_64SysV => write!(f, "x86_64-sysv"),
            Target::X86_64Win64 => write!(f, "x86_64-win64"),
            Target::Aarch64 => write!(f, "aarch64"),
        }
    }
}

struct FrameLayout {
    saved_gprs: &'static [Gpr],
    saved_vregs: &'static [Vreg],
    vreg_save_bytes: usize,
    params: &'static [Gpr],
}

const SYSV: FrameLayout = FrameLayout {
    saved_gprs: &[Gpr::RBX, Gpr::RBP, Gpr::R12, Gpr::R13, Gpr::R14, Gpr::R15],
    saved_vregs: &[],
    vreg_save_bytes: 0,
    params: &[Gpr::RDI, Gpr::RSI, Gpr::RDX, Gpr::RCX, Gpr::R8, Gpr::R9],
};

const WIN64: FrameLayout = FrameLayout {
    saved_gprs: &[
        Gpr::RBX,
        Gpr::RBP,
        Gpr::RDI,
        Gpr::RSI,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ],
    saved_vregs: &[
        Vreg(6),
        Vreg(7),
        Vreg(8),
        Vreg(9),
        Vreg(10),
        Vreg(11),
        Vreg(12),
        Vreg(13),
        Vreg(14),
        Vreg(15),
    ],
    vreg_save_bytes: 16,
    params: &[Gpr::RCX, Gpr::RDX, Gpr::R8, Gpr::R9],
};

const AAPCS64: FrameLayout = FrameLayout {
    saved_gprs: &[
        Gpr(19),
        Gpr(20),
        Gpr(21),
        Gpr(22),
        Gpr(23),
        Gpr(24),
        Gpr(25),
        Gpr(26),
        Gpr(27),
        Gpr(28),
    ],
    saved_vregs: &[
        Vreg(8),
        Vreg(9),
        Vreg(10),
        Vreg(11),
        Vreg(12),
        Vreg(13),
        Vreg(14),
        Vreg(15),
    ],
    vreg_save_bytes: 8,
    params: &[
        Gpr(0),
        Gpr(1),
        Gpr(2),
        Gpr(3),
        Gpr(4),
        Gpr(5),
        Gpr(6),
        Gpr(7),
    ],
};

/// Register save set and stack layout of one kernel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiFrame {
    pub target: Target,
    /// Callee-saved general-purpose registers, in save order.
    pub saved_gprs: &'static [Gpr],
    /// Callee-saved vector registers, in save order.
    pub saved_vregs: &'static [Vreg],
    /// Bytes preserved per saved vector register.
    pub vreg_save_bytes: usize,
    /// Integer argument registers, in argument order.
    pub params: &'static [Gpr],
    /// Working stack reserved below the saved registers, padded so the
    /// stack pointer is 16-byte aligned inside the body.
    pub stack_reserve: usize,
}

impl AbiFrame {
    /// Bytes of the fixed AArch64 save area: fp/lr, x19-x28, d8-d15.
    pub const AARCH64_SAVE_AREA: usize = 160;

    pub fn for_target(target: Target, stack_bytes: usize) -> AbiFrame {
        let layout = match target {
            Target::X86_64SysV => &SYSV,
            Target::X86_64Win64 => &WIN64,
            Target::Aarch64 => &AAPCS64,
        };
        let stack_reserve = if stack_bytes == 0 {
            0
        } else if target.is_x86() {
            // return address + vector area + pushes leave rsp off by 8
            let used = 8 + layout.saved_vregs.len() * layout.vreg_save_bytes
                + layout.saved_gprs.len() * 8;
            stack_bytes.next_multiple_of(16) + used % 16
        } else {
            stack_bytes.next_multiple_of(16)
        };
        AbiFrame {
            target,
            saved_gprs: layout.saved_gprs,
            saved_vregs: layout.saved_vregs,
            vreg_save_bytes: layout.vreg_save_bytes,
            params: layout.params,
            stack_reserve,
        }
    }

    /// Register carrying integer argument `i`.
    pub fn param(&self, i: usize) -> Option<Gpr> {
        self.params.get(i).copied()
    }

    /// Bytes of the vector register save area.
    pub fn vreg_area(&self) -> usize {
        self.saved_vregs.len() * self.vreg_save_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_per_convention() {
        let sysv = AbiFrame::for_target(Target::X86_64SysV, 0);
        assert_eq!(sysv.param(0), Some(Gpr::RDI));
        assert_eq!(sysv.param(5), Some(Gpr::R9));
        assert_eq!(sysv.param(6), None);

        let win = AbiFrame::for_target(Target::X86_64Win64, 0);
        assert_eq!(win.param(0), Some(Gpr::RCX));
        assert_eq!(win.params.len(), 4);

        let arm = AbiFrame::for_target(Target::Aarch64, 0);
        assert_eq!(arm.param(7), Some(Gpr(7)));
    }

    #[test]
    fn test_save_sets() {
        let win = AbiFrame::for_target(Target::X86_64Win64, 0);
        assert!(win.saved_gprs.contains(&Gpr::RDI));
        assert!(win.saved_gprs.contains(&Gpr::RSI));
        assert_eq!(win.vreg_area(), 160);

        let sysv = AbiFrame::for_target(Target::X86_64SysV, 0);
        assert!(!sysv.saved_gprs.contains(&Gpr::RDI));
        assert_eq!(sysv.vreg_area(), 0);

        let arm = AbiFrame::for_target(Target::Aarch64, 0);
        assert_eq!(arm.saved_gprs.len(), 10);
        assert_eq!(arm.vreg_area(), 64);
    }

    #[test]
    fn test_stack_reserve_keeps_alignment() {
        for target in [Target::X86_64SysV, Target::X86_64Win64] {
            for bytes in [1, 8, 16, 24, 100] {
                let f = AbiFrame::for_target(target, bytes);
                assert!(f.stack_reserve >= bytes);
                let depth = 8 + f.vreg_area() + f.saved_gprs.len() * 8 + f.stack_reserve;
                assert_eq!(depth % 16, 0, "{target} {bytes}");
            }
        }
        assert_eq!(AbiFrame::for_target(Target::Aarch64, 20).stack_reserve, 32);
        assert_eq!(AbiFrame::for_target(Target::X86_64SysV, 0).stack_reserve, 0);
    }
}
