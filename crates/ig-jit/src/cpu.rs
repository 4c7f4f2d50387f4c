use std::fmt;
use std::sync::OnceLock;

/// Instruction-set extensions that gate kernel strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isa {
    Sse41,
    Avx,
    Avx2,
    Fma,
    /// AVX-512 foundation.
    Avx512Common,
    /// AVX-512 F + BW + VL + DQ.
    Avx512Core,
    /// AArch64 Advanced SIMD.
    Asimd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    X86,
    Arm,
}

impl Isa {
    pub const ALL: [Isa; 7] = [
        Isa::Sse41,
        Isa::Avx,
        Isa::Avx2,
        Isa::Fma,
        Isa::Avx512Common,
        Isa::Avx512Core,
        Isa::Asimd,
    ];

    /// Parses a capability token such as `avx2` or `avx512_core`.
    pub fn from_token(token: &str) -> Option<Isa> {
        let isa = match token.trim().to_ascii_lowercase().as_str() {
            "sse41" => Isa::Sse41,
            "avx" => Isa::Avx,
            "avx2" => Isa::Avx2,
            "fma" => Isa::Fma,
            "avx512_common" => Isa::Avx512Common,
            "avx512_core" => Isa::Avx512Core,
            "asimd" => Isa::Asimd,
            _ => return None,
        };
        Some(isa)
    }

    pub fn token(&self) -> &'static str {
        match self {
            Isa::Sse41 => "sse41",
            Isa::Avx => "avx",
            Isa::Avx2 => "avx2",
            Isa::Fma => "fma",
            Isa::Avx512Common => "avx512_common",
            Isa::Avx512Core => "avx512_core",
            Isa::Asimd => "asimd",
        }
    }

    fn family(&self) -> Family {
        match self {
            Isa::Asimd => Family::Arm,
            _ => Family::X86,
        }
    }

    // FMA shipped alongside AVX2, so both sit on the same rung.
    fn level(&self) -> u8 {
        match self {
            Isa::Sse41 => 1,
            Isa::Avx => 2,
            Isa::Avx2 | Isa::Fma => 3,
            Isa::Avx512Common => 4,
            Isa::Avx512Core => 5,
            Isa::Asimd => 1,
        }
    }

    fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Answers whether an instruction-set extension is usable.
pub trait CpuCapabilities: Send + Sync + fmt::Debug {
    fn mayiuse(&self, isa: Isa) -> bool;
}

/// A fixed set of usable extensions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IsaSet(u32);

impl IsaSet {
    pub const fn empty() -> Self {
        IsaSet(0)
    }

    pub fn all() -> Self {
        Self::from_isas(&Isa::ALL)
    }

    pub fn from_isas(isas: &[Isa]) -> Self {
        isas.iter().fold(IsaSet::empty(), |set, &isa| set.with(isa))
    }

    /// Every extension of `isa`'s family up to and including its level.
    ///
    /// ```
    /// use ig_jit::{Isa, IsaSet, CpuCapabilities};
    ///
    /// let avx2 = IsaSet::up_to(Isa::Avx2);
    /// assert!(avx2.mayiuse(Isa::Fma));
    /// assert!(!avx2.mayiuse(Isa::Avx512Common));
    /// ```
    pub fn up_to(isa: Isa) -> Self {
        Self::all().with_ceiling(isa)
    }

    #[must_use]
    pub fn with(self, isa: Isa) -> Self {
        IsaSet(self.0 | isa.bit())
    }

    pub fn contains(&self, isa: Isa) -> bool {
        self.0 & isa.bit() != 0
    }

    #[must_use]
    pub fn intersection(self, other: IsaSet) -> Self {
        IsaSet(self.0 & other.0)
    }

    /// Drops every extension above `max` or outside its family.
    #[must_use]
    pub fn with_ceiling(self, max: Isa) -> Self {
        let allowed = Isa::ALL
            .iter()
            .filter(|i| i.family() == max.family() && i.level() <= max.level())
            .fold(IsaSet::empty(), |s, &i| s.with(i));
        self.intersection(allowed)
    }

    pub fn iter(&self) -> impl Iterator<Item = Isa> + '_ {
        Isa::ALL.into_iter().filter(|i| self.contains(*i))
    }
}

impl fmt::Debug for IsaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|i| i.token())).finish()
    }
}

impl CpuCapabilities for IsaSet {
    fn mayiuse(&self, isa: Isa) -> bool {
        self.contains(isa)
    }
}

/// Capabilities of the running processor, probed once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCpu {
    isas: IsaSet,
}

static HOST: OnceLock<HostCpu> = OnceLock::new();

impl HostCpu {
    pub fn detect() -> HostCpu {
        *HOST.get_or_init(|| {
            let host = HostCpu { isas: probe() };
            tracing::info!(isas = ?host.isas, "host cpu capabilities detected");
            host
        })
    }

    /// Host capabilities limited to `max` and below.
    #[must_use]
    pub fn with_max_isa(self, max: Isa) -> HostCpu {
        HostCpu {
            isas: self.isas.with_ceiling(max),
        }
    }

    pub fn isas(&self) -> IsaSet {
        self.isas
    }
}

impl CpuCapabilities for HostCpu {
    fn mayiuse(&self, isa: Isa) -> bool {
        self.isas.contains(isa)
    }
}

#[cfg(target_arch = "x86_64")]
fn probe() -> IsaSet {
    let mut set = IsaSet::empty();
    if is_x86_feature_detected!("sse4.1") {
        set = set.with(Isa::Sse41);
    }
    if is_x86_feature_detected!("avx") {
        set = set.with(Isa::Avx);
    }
    if is_x86_feature_detected!("avx2") {
        set = set.with(Isa::Avx2);
    }
    if is_x86_feature_detected!("fma") {
        set = set.with(Isa::Fma);
    }
    if is_x86_feature_detected!("avx512f") {
        set = set.with(Isa::Avx512Common);
        if is_x86_feature_detected!("avx512bw")
            && is_x86_feature_detected!("avx512vl")
            && is_x86_feature_detected!("avx512dq")
        {
            set = set.with(Isa::Avx512Core);
        }
    }
    set
}

#[cfg(target_arch = "aarch64")]
fn probe() -> IsaSet {
    if std::arch::is_aarch64_feature_detected!("neon") {
        IsaSet::empty().with(Isa::Asimd)
    } else {
        IsaSet::empty()
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn probe() -> IsaSet {
    IsaSet::empty()
}
