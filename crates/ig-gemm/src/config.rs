use ig_jit::{Isa, JitConfig};
use ig_thread::ThreadConfig;

/// Environment variable capping the instruction sets the dispatcher uses.
pub const MAX_ISA_ENV: &str = "IG_MAX_CPU_ISA";

/// Settings of one [`GemmDispatcher`](crate::GemmDispatcher).
#[derive(Debug, Clone, Default)]
pub struct GemmConfig {
    pub threads: ThreadConfig,
    pub jit: JitConfig,
    /// Highest extension routes may use; `None` uses everything detected.
    pub max_isa: Option<Isa>,
}

impl GemmConfig {
    /// Reads `IG_NUM_THREADS`, `IG_JIT_CODE_CAPACITY` and `IG_MAX_CPU_ISA`.
    ///
    /// An unknown ISA token is ignored with a warning.
    pub fn from_env() -> Self {
        let max_isa = std::env::var(MAX_ISA_ENV).ok().and_then(|token| {
            let isa = Isa::from_token(&token);
            if isa.is_none() {
                tracing::warn!(token = %token, "ignoring unknown IG_MAX_CPU_ISA value");
            }
            isa
        });
        GemmConfig {
            threads: ThreadConfig::from_env(),
            jit: JitConfig::from_env(),
            max_isa,
        }
    }

    #[must_use]
    pub fn with_threads(mut self, threads: ThreadConfig) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_jit(mut self, jit: JitConfig) -> Self {
        self.jit = jit;
        self
    }

    #[must_use]
    pub fn with_max_isa(mut self, isa: Isa) -> Self {
        self.max_isa = Some(isa);
        self
    }
}
