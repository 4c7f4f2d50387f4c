use std::sync::Arc;

use crate::dump::{self, CodeDumper, CodeRegistrar};

/// Default upper bound on the size of one kernel.
pub const DEFAULT_CODE_CAPACITY: usize = 256 * 1024;
/// Overrides [`DEFAULT_CODE_CAPACITY`], in bytes.
pub const CODE_CAPACITY_ENV: &str = "IG_JIT_CODE_CAPACITY";

/// Settings shared by the generators of one dispatcher.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Dump finalized kernels. `None` follows the process-wide toggle.
    pub dump: Option<bool>,
    /// Destination and counter for dump files.
    pub dumper: Arc<CodeDumper>,
    /// Largest kernel, in bytes, a generator may finalize.
    pub code_capacity: usize,
    /// Profiling hook called for every finalized kernel.
    pub registrar: Option<Arc<dyn CodeRegistrar>>,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            dump: None,
            dumper: CodeDumper::process(),
            code_capacity: DEFAULT_CODE_CAPACITY,
            registrar: None,
        }
    }
}

impl JitConfig {
    /// Reads `IG_JIT_CODE_CAPACITY`; dumping follows `IG_JIT_DUMP` through
    /// the process-wide toggle.
    pub fn from_env() -> Self {
        let code_capacity = std::env::var(CODE_CAPACITY_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CODE_CAPACITY);
        JitConfig {
            code_capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dump(mut self, on: bool) -> Self {
        self.dump = Some(on);
        self
    }

    #[must_use]
    pub fn with_dumper(mut self, dumper: Arc<CodeDumper>) -> Self {
        self.dumper = dumper;
        self
    }

    #[must_use]
    pub fn with_code_capacity(mut self, bytes: usize) -> Self {
        self.code_capacity = bytes;
        self
    }

    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn CodeRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn dump_enabled(&self) -> bool {
        self.dump.unwrap_or_else(dump::dump_enabled)
    }
}
