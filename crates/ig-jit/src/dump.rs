//! Opt-in persistence of finalized kernels and the profiling hook.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::code::EmittedKernel;

/// Turns kernel dumping on for the whole process when set to a truthy value.
pub const DUMP_ENV: &str = "IG_JIT_DUMP";
/// Directory that receives dump files; the working directory when unset.
pub const DUMP_DIR_ENV: &str = "IG_JIT_DUMP_DIR";

static DUMP_TOGGLE: OnceLock<AtomicBool> = OnceLock::new();
static PROCESS_DUMPER: OnceLock<Arc<CodeDumper>> = OnceLock::new();
/// Shared by every dumper, so no two dumps in one process share an index.
static DUMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn toggle() -> &'static AtomicBool {
    DUMP_TOGGLE.get_or_init(|| AtomicBool::new(env_flag(DUMP_ENV)))
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

/// Process-wide dump toggle, seeded from `IG_JIT_DUMP`.
pub fn dump_enabled() -> bool {
    toggle().load(Ordering::Relaxed)
}

pub fn set_dump_enabled(on: bool) {
    toggle().store(on, Ordering::Relaxed);
}

/// Writes kernel bytes to `igjit_dump_<name>.<index>.bin`.
///
/// `index` comes from one process-wide counter that starts at zero and only
/// ever increases, whichever dumper writes. It is reset only by a restart.
#[derive(Debug)]
pub struct CodeDumper {
    dir: PathBuf,
}

impl CodeDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CodeDumper { dir: dir.into() }
    }

    /// The dumper shared by every default-configured generator.
    pub fn process() -> Arc<CodeDumper> {
        PROCESS_DUMPER
            .get_or_init(|| {
                let dir = std::env::var_os(DUMP_DIR_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                Arc::new(CodeDumper::new(dir))
            })
            .clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Index the next dump in this process will use.
    pub fn next_index() -> usize {
        DUMP_COUNTER.load(Ordering::Relaxed)
    }

    pub fn dump(&self, name: &str, code: &[u8]) -> io::Result<PathBuf> {
        let index = DUMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("igjit_dump_{name}.{index}.bin"));
        std::fs::write(&path, code)?;
        tracing::debug!(path = %path.display(), bytes = code.len(), "kernel dumped");
        Ok(path)
    }
}

/// Hook notified of every finalized kernel, e.g. to publish symbols to a
/// profiler.
pub trait CodeRegistrar: Send + Sync + Debug {
    fn register(&self, kernel: &EmittedKernel);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(path: &Path) -> usize {
        let name = path.file_name().unwrap().to_str().unwrap();
        let index = name.trim_end_matches(".bin").rsplit('.').next().unwrap();
        index.parse().unwrap()
    }

    #[test]
    fn test_dump_names_and_counter() {
        let dir = tempfile::tempdir().unwrap();
        let dumper = CodeDumper::new(dir.path());

        let first = dumper.dump("sgemm", &[0xC3]).unwrap();
        let second = dumper.dump("sgemm", &[0x90, 0xC3]).unwrap();
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("igjit_dump_sgemm.") && name.ends_with(".bin"));
        assert!(index_of(&second) > index_of(&first));
        assert_eq!(std::fs::read(second).unwrap(), vec![0x90, 0xC3]);
        assert!(CodeDumper::next_index() > index_of(&first) + 1);
    }

    #[test]
    fn test_dumpers_sharing_a_directory_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = CodeDumper::new(dir.path());
        let b = CodeDumper::new(dir.path());
        let paths = [
            a.dump("k", &[0x01]).unwrap(),
            b.dump("k", &[0x02]).unwrap(),
            a.dump("k", &[0x03]).unwrap(),
        ];
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), vec![0x01]);
        assert_eq!(std::fs::read(&paths[1]).unwrap(), vec![0x02]);
        assert_eq!(std::fs::read(&paths[2]).unwrap(), vec![0x03]);
    }

    #[test]
    fn test_failed_dump_still_advances() {
        let dumper = CodeDumper::new("/nonexistent/ig-jit/dump");
        let before = CodeDumper::next_index();
        assert!(dumper.dump("k", &[0xC3]).is_err());
        assert!(CodeDumper::next_index() > before);
    }
}
