use std::cell::Cell;
use std::sync::OnceLock;

use crate::error::{Result, ThreadError};
use crate::nd::for_nd;

/// Environment variable holding the configured team size.
pub const NUM_THREADS_ENV: &str = "IG_NUM_THREADS";

/// Thread count configuration for a [`Team`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ThreadConfig {
    /// One worker per available CPU.
    #[default]
    Auto,
    /// A fixed number of workers.
    Fixed(usize),
}

impl ThreadConfig {
    /// Reads `IG_NUM_THREADS`; unset, unparsable or zero values mean `Auto`.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(NUM_THREADS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .map_or(ThreadConfig::Auto, ThreadConfig::Fixed)
    }

    /// Returns the number of workers this configuration resolves to.
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        match self {
            ThreadConfig::Auto => std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            ThreadConfig::Fixed(n) => (*n).max(1),
        }
    }
}

/// Identity of a worker inside a running team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCtx {
    pub ithr: usize,
    pub nthr: usize,
}

thread_local! {
    static CURRENT: Cell<Option<ThreadCtx>> = const { Cell::new(None) };
}

/// Restores the previous thread context when a worker leaves a team body.
struct CtxGuard(Option<ThreadCtx>);

impl CtxGuard {
    fn enter(ctx: ThreadCtx) -> Self {
        CtxGuard(CURRENT.with(|c| c.replace(Some(ctx))))
    }
}

impl Drop for CtxGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.0));
    }
}

/// Id of the calling worker within its team, or 0 outside any team.
pub fn get_thread_num() -> usize {
    CURRENT.with(|c| c.get().map_or(0, |ctx| ctx.ithr))
}

/// Size of the calling worker's team, or 1 outside any team.
pub fn get_num_threads() -> usize {
    CURRENT.with(|c| c.get().map_or(1, |ctx| ctx.nthr))
}

/// A fork-join team of worker threads.
///
/// Every parallel call runs one body per worker and returns only after all of
/// them finished. A team with a single worker runs bodies inline on the
/// calling thread.
#[derive(Debug)]
pub struct Team {
    pool: Option<rayon::ThreadPool>,
    nthr: usize,
}

static GLOBAL_TEAM: OnceLock<Team> = OnceLock::new();

impl Team {
    /// Builds a team sized from `config`.
    pub fn new(config: &ThreadConfig) -> Result<Self> {
        Self::with_threads(config.effective_threads())
    }

    /// Builds a team of exactly `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(ThreadError::InvalidThreadCount(threads));
        }
        if threads == 1 {
            return Ok(Self::serial());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ig-worker-{i}"))
            .build()
            .map_err(|source| ThreadError::PoolBuild { threads, source })?;
        Ok(Team {
            pool: Some(pool),
            nthr: threads,
        })
    }

    /// A team with one worker that runs on the caller's thread.
    pub fn serial() -> Self {
        Team { pool: None, nthr: 1 }
    }

    /// Process-wide team sized from `IG_NUM_THREADS`, created on first use and
    /// reused afterwards.
    pub fn global() -> &'static Team {
        GLOBAL_TEAM.get_or_init(|| {
            let config = ThreadConfig::from_env();
            match Team::new(&config) {
                Ok(team) => {
                    tracing::info!(threads = team.num_threads(), "worker team created");
                    team
                }
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to a serial team");
                    Team::serial()
                }
            }
        })
    }

    /// Number of workers in this team.
    pub fn num_threads(&self) -> usize {
        self.nthr
    }

    /// Runs `f` once on every worker and joins.
    pub fn parallel<F>(&self, f: F)
    where
        F: Fn(ThreadCtx) + Sync,
    {
        match &self.pool {
            None => {
                let ctx = ThreadCtx { ithr: 0, nthr: 1 };
                let _guard = CtxGuard::enter(ctx);
                f(ctx);
            }
            Some(pool) => {
                pool.broadcast(|bc| {
                    let ctx = ThreadCtx {
                        ithr: bc.index(),
                        nthr: bc.num_threads(),
                    };
                    let _guard = CtxGuard::enter(ctx);
                    f(ctx);
                });
            }
        }
    }

    /// Visits every coordinate of `dims` exactly once, spread over the team.
    ///
    /// Each worker walks its own [`balance211`](crate::balance211) share with
    /// [`for_nd`]. Returns after every worker is done.
    pub fn parallel_nd<const N: usize, F>(&self, dims: [usize; N], f: F)
    where
        F: Fn([usize; N]) + Sync,
    {
        if dims.iter().any(|&d| d == 0) {
            return;
        }
        self.parallel(|ctx| for_nd(ctx.ithr, ctx.nthr, dims, &f));
    }
}

/// Nested variant of [`Team::parallel_nd`] for code already running inside a
/// team body.
///
/// Uses the calling worker's id and team size instead of forking a new team,
/// so every worker of the enclosing team must make the same call. Outside a
/// team it degenerates to a serial loop.
pub fn parallel_nd_in_team<const N: usize, F>(dims: [usize; N], f: F)
where
    F: FnMut([usize; N]),
{
    for_nd(get_thread_num(), get_num_threads(), dims, f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_fixed_config() {
        assert_eq!(ThreadConfig::Fixed(3).effective_threads(), 3);
        assert_eq!(ThreadConfig::Fixed(0).effective_threads(), 1);
        assert!(ThreadConfig::Auto.effective_threads() >= 1);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            Team::with_threads(0),
            Err(ThreadError::InvalidThreadCount(0))
        ));
    }

    #[test]
    fn test_parallel_runs_every_worker() {
        let team = Team::with_threads(4).unwrap();
        let ids = Mutex::new(Vec::new());
        team.parallel(|ctx| {
            assert_eq!(ctx.nthr, 4);
            assert_eq!(get_thread_num(), ctx.ithr);
            assert_eq!(get_num_threads(), 4);
            ids.lock().unwrap().push(ctx.ithr);
        });
        let mut ids = ids.into_inner().unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_context_outside_team() {
        assert_eq!(get_thread_num(), 0);
        assert_eq!(get_num_threads(), 1);
    }

    #[test]
    fn test_parallel_nd_visits_once() {
        let team = Team::with_threads(3).unwrap();
        let hits: Vec<AtomicUsize> = (0..7 * 5).map(|_| AtomicUsize::new(0)).collect();
        team.parallel_nd([7, 5], |[i, j]| {
            hits[i * 5 + j].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_serial_team() {
        let team = Team::serial();
        let count = AtomicUsize::new(0);
        team.parallel_nd([2, 3, 4], |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 24);
    }

    #[test]
    fn test_nested_in_team() {
        let team = Team::with_threads(3).unwrap();
        let hits: Vec<AtomicUsize> = (0..10).map(|_| AtomicUsize::new(0)).collect();
        team.parallel(|_| {
            parallel_nd_in_team([10], |[i]| {
                hits[i].fetch_add(1, Ordering::Relaxed);
            });
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_nested_outside_team_is_serial() {
        let mut n = 0;
        parallel_nd_in_team([4, 2], |_| n += 1);
        assert_eq!(n, 8);
    }
}
