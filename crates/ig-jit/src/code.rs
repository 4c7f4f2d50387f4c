use std::fmt;

use memmap2::{Mmap, MmapOptions};

use crate::abi::Target;
use crate::error::Result;

/// A finalized kernel: read-only executable memory plus its identity.
///
/// The mapping is never writable once built, so a kernel can be shared and
/// called from any number of threads.
pub struct EmittedKernel {
    map: Mmap,
    name: String,
    origin: &'static str,
    target: Target,
}

impl EmittedKernel {
    pub(crate) fn from_bytes(
        name: String,
        origin: &'static str,
        target: Target,
        code: &[u8],
    ) -> Result<Self> {
        let mut map = MmapOptions::new().len(code.len()).map_anon()?;
        map.copy_from_slice(code);
        let map = map.make_exec()?;
        sync_icache(&map);
        Ok(EmittedKernel {
            map,
            name,
            origin,
            target,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source location tag of the generator that produced this kernel.
    pub fn origin(&self) -> &'static str {
        self.origin
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.map
    }

    pub fn entry(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Reinterprets the entry point as a function pointer.
    ///
    /// # Safety
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches what the generator emitted, and the kernel must have been
    /// generated for the running target.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*const u8>(),
            "as_fn needs a function pointer type"
        );
        let entry = self.entry();
        std::mem::transmute_copy(&entry)
    }
}

/// Makes freshly written code visible to instruction fetch.
///
/// AArch64 instruction caches are not coherent with data writes: every line
/// is cleaned to the point of unification, then invalidated in the
/// instruction cache, with barriers between the two passes.
#[cfg(target_arch = "aarch64")]
fn sync_icache(code: &[u8]) {
    use std::arch::asm;

    if code.is_empty() {
        return;
    }
    let ctr: u64;
    // SAFETY: CTR_EL0 is readable from EL0 on every AArch64 OS we target.
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags)) };
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);
    let start = code.as_ptr() as usize;
    let end = start + code.len();

    // SAFETY: cache maintenance by address on memory this mapping owns.
    unsafe {
        let mut line = start & !(dline - 1);
        while line < end {
            asm!("dc cvau, {}", in(reg) line, options(nostack, preserves_flags));
            line += dline;
        }
        asm!("dsb ish", options(nostack, preserves_flags));
        let mut line = start & !(iline - 1);
        while line < end {
            asm!("ic ivau, {}", in(reg) line, options(nostack, preserves_flags));
            line += iline;
        }
        asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }
}

/// x86-64 keeps instruction fetch coherent with stores.
#[cfg(not(target_arch = "aarch64"))]
fn sync_icache(_code: &[u8]) {}

impl fmt::Debug for EmittedKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmittedKernel")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("target", &self.target)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_kernel_is_shareable() {
        assert_send_sync::<EmittedKernel>();
    }

    #[test]
    fn test_bytes_preserved() {
        let k = EmittedKernel::from_bytes("nop".into(), "test", Target::X86_64SysV, &[0x90, 0xC3])
            .unwrap();
        assert_eq!(k.code(), &[0x90, 0xC3]);
        assert_eq!(k.size(), 2);
        assert_eq!(k.name(), "nop");
    }

    #[cfg(target_arch = "aarch64")]
    mod exec {
        use super::*;
        use crate::config::JitConfig;
        use crate::cpu::{Isa, IsaSet};
        use crate::generator::CodeGenerator;
        use crate::reg::{Gpr, VecLen};

        type ConstFn = extern "C" fn() -> u64;

        fn constant_kernel(value: i64) -> EmittedKernel {
            let caps = IsaSet::empty().with(Isa::Asimd);
            let config = JitConfig::default().with_dump(false);
            let mut g =
                CodeGenerator::new("const", file!(), Target::Aarch64, VecLen::V128, &caps, config);
            g.with_frame(0, |g, _| g.mov_imm(Gpr::x(0), value));
            g.get_code().unwrap()
        }

        #[test]
        fn test_generated_stub_runs() {
            let k = constant_kernel(42);
            let f: ConstFn = unsafe { k.as_fn() };
            assert_eq!(f(), 42);
        }

        #[test]
        fn test_reused_address_sees_new_code() {
            // mapped, dropped and mapped again: stale lines would return 7
            for value in [7, 11, 7, 13] {
                let k = constant_kernel(value);
                let f: ConstFn = unsafe { k.as_fn() };
                assert_eq!(f(), value as u64);
            }
        }

        #[test]
        fn test_raw_ret_stub_runs() {
            // mov w0, #5 ; ret
            let bytes = [0xa0, 0x00, 0x80, 0x52, 0xc0, 0x03, 0x5f, 0xd6];
            let k = EmittedKernel::from_bytes("ret".into(), "test", Target::Aarch64, &bytes).unwrap();
            let f: ConstFn = unsafe { k.as_fn() };
            assert_eq!(f() as u32, 5);
        }
    }
}
