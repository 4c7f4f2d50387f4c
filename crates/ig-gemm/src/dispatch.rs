use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use half::bf16;
use ig_jit::{CpuCapabilities, HostCpu, Isa, IsaSet, JitConfig, JitError, Target};
use ig_thread::Team;

use crate::backend::{BackendRegistry, VendorBlas};
use crate::check::{check_gemm_input, check_gemm_x8x8x32_input};
use crate::config::GemmConfig;
use crate::cpu::{add_bias, lock, reference};
use crate::driver;
use crate::dtype::Element;
use crate::error::{GemmError, Result};
use crate::kernels::{GemmKernel, KernelKey};
use crate::request::{GemmRequest, ZeroPoints};

/// The route one call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchDecision {
    /// Handed to the registered [`VendorBlas`].
    VendorLibrary,
    /// Packing driver around a kernel generated for the given extension.
    GeneratedKernel(Isa),
    /// Quantized kernel at a narrower width that shifts B into the unsigned
    /// range and compensates afterwards. Requires zero A and B offsets.
    SimplifiedKernel(Isa),
    /// Portable triple loop.
    ReferenceKernel,
}

impl fmt::Display for DispatchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchDecision::VendorLibrary => write!(f, "vendor"),
            DispatchDecision::GeneratedKernel(isa) => write!(f, "jit:{isa}"),
            DispatchDecision::SimplifiedKernel(isa) => write!(f, "simple:{isa}"),
            DispatchDecision::ReferenceKernel => write!(f, "ref"),
        }
    }
}

/// Route of a real-valued call. `jit` says whether kernels can be generated
/// for the running processor at all.
pub fn decide_sgemm(
    caps: &dyn CpuCapabilities,
    jit: bool,
    vendor: bool,
    force_nocopy: bool,
) -> DispatchDecision {
    if vendor && !force_nocopy {
        DispatchDecision::VendorLibrary
    } else if jit && caps.mayiuse(Isa::Avx512Core) {
        DispatchDecision::GeneratedKernel(Isa::Avx512Core)
    } else if jit && caps.mayiuse(Isa::Avx) {
        DispatchDecision::GeneratedKernel(Isa::Avx)
    } else {
        DispatchDecision::ReferenceKernel
    }
}

/// Built-in route of a quantized call, once the vendor library declined.
pub fn decide_igemm(
    caps: &dyn CpuCapabilities,
    jit: bool,
    m: usize,
    n: usize,
    zero_points: ZeroPoints,
) -> DispatchDecision {
    if jit && caps.mayiuse(Isa::Avx512Core) && m.saturating_mul(n) > 1 {
        DispatchDecision::GeneratedKernel(Isa::Avx512Core)
    } else if jit && zero_points.is_zero() && caps.mayiuse(Isa::Avx2) {
        DispatchDecision::SimplifiedKernel(Isa::Avx2)
    } else {
        DispatchDecision::ReferenceKernel
    }
}

/// Route of a bf16 call; `None` when no route exists on this processor.
pub fn decide_bf16(caps: &dyn CpuCapabilities, jit: bool) -> Option<DispatchDecision> {
    (jit && caps.mayiuse(Isa::Avx512Core)).then_some(DispatchDecision::GeneratedKernel(Isa::Avx512Core))
}

/// B operand types of the quantized entry points.
pub(crate) trait QuantizedB: Element + Into<i32> {
    /// Added to B on the simplified route to make it non-negative.
    const SHIFT: i32;

    fn vendor_gemm(
        vendor: &dyn VendorBlas,
        req: &mut GemmRequest<'_, i8, Self, i32>,
    ) -> Option<Result<()>>;
}

impl QuantizedB for u8 {
    const SHIFT: i32 = 0;

    fn vendor_gemm(
        vendor: &dyn VendorBlas,
        req: &mut GemmRequest<'_, i8, u8, i32>,
    ) -> Option<Result<()>> {
        vendor.gemm_s8u8s32(req)
    }
}

impl QuantizedB for i8 {
    const SHIFT: i32 = 128;

    fn vendor_gemm(
        vendor: &dyn VendorBlas,
        req: &mut GemmRequest<'_, i8, i8, i32>,
    ) -> Option<Result<()>> {
        vendor.gemm_s8s8s32(req)
    }
}

#[derive(Debug)]
enum TeamHandle {
    Global,
    Owned(Team),
}

impl TeamHandle {
    fn get(&self) -> &Team {
        match self {
            TeamHandle::Global => Team::global(),
            TeamHandle::Owned(team) => team,
        }
    }
}

/// Validates GEMM calls, picks one route per call and runs it.
///
/// A dispatcher owns its worker team and a cache of generated kernels, so
/// every kernel is generated once and then shared by all later calls.
#[derive(Debug)]
pub struct GemmDispatcher {
    caps: IsaSet,
    jit_target: Option<Target>,
    jit: JitConfig,
    team: TeamHandle,
    registry: BackendRegistry,
    kernels: Mutex<HashMap<KernelKey, Arc<GemmKernel>>>,
}

static GLOBAL_DISPATCHER: OnceLock<GemmDispatcher> = OnceLock::new();

impl GemmDispatcher {
    pub fn new(config: GemmConfig) -> Result<Self> {
        let team = Team::new(&config.threads)?;
        Ok(Self::build(config, TeamHandle::Owned(team)))
    }

    fn build(config: GemmConfig, team: TeamHandle) -> Self {
        let host = HostCpu::detect();
        let host = match config.max_isa {
            Some(max) => host.with_max_isa(max),
            None => host,
        };
        GemmDispatcher {
            caps: host.isas(),
            // kernels are only generated for x86-64 hosts
            jit_target: Target::host().filter(Target::is_x86),
            jit: config.jit,
            team,
            registry: BackendRegistry::none(),
            kernels: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide dispatcher configured from the environment, sharing the
    /// global worker team.
    pub fn global() -> &'static GemmDispatcher {
        GLOBAL_DISPATCHER.get_or_init(|| {
            let dispatcher = Self::build(GemmConfig::from_env(), TeamHandle::Global);
            tracing::info!(
                caps = ?dispatcher.caps,
                target = ?dispatcher.jit_target,
                "gemm dispatcher initialized"
            );
            dispatcher
        })
    }

    #[must_use]
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Restricts routes to `caps`. Extensions the host lacks are dropped, so
    /// the result never exceeds what the processor can run.
    #[must_use]
    pub fn with_capabilities(mut self, caps: IsaSet) -> Self {
        self.caps = caps.intersection(HostCpu::detect().isas());
        self.kernels = Mutex::new(HashMap::new());
        self
    }

    pub fn capabilities(&self) -> IsaSet {
        self.caps
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn num_threads(&self) -> usize {
        self.team.get().num_threads()
    }

    /// Number of kernels generated so far.
    pub fn cached_kernels(&self) -> usize {
        lock(&self.kernels).len()
    }

    fn jit_available(&self) -> bool {
        self.jit_target.is_some()
    }

    fn kernel(&self, key: KernelKey) -> ig_jit::Result<Arc<GemmKernel>> {
        let Some(target) = self.jit_target else {
            return Err(JitError::InvalidOperand(
                "no code generator for this processor".into(),
            ));
        };
        let mut cache = lock(&self.kernels);
        if let Some(kernel) = cache.get(&key) {
            return Ok(Arc::clone(kernel));
        }
        let kernel = Arc::new(GemmKernel::generate(key, target, &self.caps, self.jit.clone())?);
        cache.insert(key, Arc::clone(&kernel));
        Ok(kernel)
    }

    /// Real-valued GEMM: `C = alpha * op(A) * op(B) + beta * C + bias`.
    ///
    /// Returns the route taken, or `None` when M, N or K is zero and C was
    /// left untouched.
    pub fn sgemm(
        &self,
        req: &mut GemmRequest<'_, f32, f32, f32>,
    ) -> Result<Option<DispatchDecision>> {
        check_gemm_input(req)?;
        if req.desc.is_degenerate() {
            return Ok(None);
        }
        self.route_sgemm(req).map(Some)
    }

    fn route_sgemm(&self, req: &mut GemmRequest<'_, f32, f32, f32>) -> Result<DispatchDecision> {
        let decision = decide_sgemm(
            &self.caps,
            self.jit_available(),
            self.registry.is_available(),
            req.force_nocopy,
        );
        tracing::trace!(%decision, m = req.desc.m, n = req.desc.n, k = req.desc.k, "sgemm route");
        match decision {
            DispatchDecision::VendorLibrary => {
                let team = self.team.get();
                let bias = req.bias.take();
                let result = match self.registry.vendor() {
                    Some(vendor) => vendor.sgemm(req),
                    None => Ok(()),
                };
                req.bias = bias;
                result?;
                if let Some(bias) = bias {
                    add_bias(team, &req.desc, &mut *req.c, bias);
                }
                Ok(decision)
            }
            DispatchDecision::GeneratedKernel(isa) => Ok(self.run_float(isa, req)),
            _ => {
                reference::gemm_f32(self.team.get(), req);
                Ok(DispatchDecision::ReferenceKernel)
            }
        }
    }

    /// Quantized GEMM with signed A and unsigned B.
    pub fn gemm_s8u8s32(
        &self,
        req: &mut GemmRequest<'_, i8, u8, i32>,
    ) -> Result<Option<DispatchDecision>> {
        self.igemm(req)
    }

    /// Quantized GEMM with signed A and B.
    pub fn gemm_s8s8s32(
        &self,
        req: &mut GemmRequest<'_, i8, i8, i32>,
    ) -> Result<Option<DispatchDecision>> {
        self.igemm(req)
    }

    /// bf16 inputs, f32 output. Only processors with `avx512_core` have a
    /// route; everywhere else the call is unimplemented.
    pub fn gemm_bf16bf16f32(
        &self,
        req: &mut GemmRequest<'_, bf16, bf16, f32>,
    ) -> Result<Option<DispatchDecision>> {
        check_gemm_input(req)?;
        if req.desc.is_degenerate() {
            return Ok(None);
        }
        let Some(DispatchDecision::GeneratedKernel(isa)) = decide_bf16(&self.caps, self.jit_available())
        else {
            return Err(GemmError::Unimplemented(
                "bf16 gemm needs avx512_core".into(),
            ));
        };
        tracing::trace!(%isa, "bf16 gemm route");
        Ok(Some(self.run_float(isa, req)))
    }

    fn run_float<A, B>(&self, isa: Isa, req: &mut GemmRequest<'_, A, B, f32>) -> DispatchDecision
    where
        A: Element + Into<f32>,
        B: Element + Into<f32>,
    {
        let team = self.team.get();
        let key = KernelKey::float(isa, req.beta == 0.0, req.bias.is_some());
        match self.kernel(key) {
            Ok(kernel) => {
                driver::gemm_f32(team, &kernel, req);
                DispatchDecision::GeneratedKernel(isa)
            }
            Err(err) => {
                tracing::warn!(kernel = %key.name(), error = %err, "kernel generation failed, using the reference kernel");
                reference::gemm_f32(team, req);
                DispatchDecision::ReferenceKernel
            }
        }
    }

    fn igemm<B: QuantizedB>(
        &self,
        req: &mut GemmRequest<'_, i8, B, i32>,
    ) -> Result<Option<DispatchDecision>> {
        check_gemm_x8x8x32_input(req)?;
        if req.desc.is_degenerate() {
            return Ok(None);
        }
        self.route_igemm(req).map(Some)
    }

    fn route_igemm<B: QuantizedB>(
        &self,
        req: &mut GemmRequest<'_, i8, B, i32>,
    ) -> Result<DispatchDecision> {
        let d = req.desc;
        if let Some(vendor) = self.registry.vendor() {
            if let Some(result) = B::vendor_gemm(vendor.as_ref(), req) {
                result?;
                return Ok(DispatchDecision::VendorLibrary);
            }
        }

        let decision = decide_igemm(&self.caps, self.jit_available(), d.m, d.n, req.zero_points);
        tracing::trace!(%decision, m = d.m, n = d.n, k = d.k, "quantized gemm route");
        let team = self.team.get();
        let (isa, shift) = match decision {
            DispatchDecision::GeneratedKernel(isa) => (isa, 0),
            DispatchDecision::SimplifiedKernel(isa) => (isa, B::SHIFT),
            _ => {
                reference::gemm_x8x8s32(team, req);
                return Ok(DispatchDecision::ReferenceKernel);
            }
        };
        let key = KernelKey::int(isa);
        match self.kernel(key) {
            Ok(kernel) => {
                driver::gemm_x8x8s32(team, &kernel, req, shift);
                Ok(decision)
            }
            Err(err) => {
                tracing::warn!(kernel = %key.name(), error = %err, "kernel generation failed, using the reference kernel");
                reference::gemm_x8x8s32(team, req);
                Ok(DispatchDecision::ReferenceKernel)
            }
        }
    }
}

/// [`GemmDispatcher::sgemm`] on the process-wide dispatcher.
pub fn sgemm(req: &mut GemmRequest<'_, f32, f32, f32>) -> Result<Option<DispatchDecision>> {
    GemmDispatcher::global().sgemm(req)
}

/// [`GemmDispatcher::gemm_s8u8s32`] on the process-wide dispatcher.
pub fn gemm_s8u8s32(req: &mut GemmRequest<'_, i8, u8, i32>) -> Result<Option<DispatchDecision>> {
    GemmDispatcher::global().gemm_s8u8s32(req)
}

/// [`GemmDispatcher::gemm_s8s8s32`] on the process-wide dispatcher.
pub fn gemm_s8s8s32(req: &mut GemmRequest<'_, i8, i8, i32>) -> Result<Option<DispatchDecision>> {
    GemmDispatcher::global().gemm_s8s8s32(req)
}

/// [`GemmDispatcher::gemm_bf16bf16f32`] on the process-wide dispatcher.
pub fn gemm_bf16bf16f32(req: &mut GemmRequest<'_, bf16, bf16, f32>) -> Result<Option<DispatchDecision>> {
    GemmDispatcher::global().gemm_bf16bf16f32(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GemmDesc, OffsetMode, Transpose};
    use approx::assert_relative_eq;
    use ig_thread::ThreadConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher() -> GemmDispatcher {
        let config = GemmConfig::default()
            .with_threads(ThreadConfig::Fixed(3))
            .with_jit(JitConfig::default().with_dump(false));
        GemmDispatcher::new(config).unwrap()
    }

    fn nn(m: usize, n: usize, k: usize) -> GemmDesc {
        GemmDesc::new(Transpose::NoTrans, Transpose::NoTrans, m, n, k)
    }

    /// Every built-in route the host can run, narrowest last.
    fn host_routes() -> Vec<GemmDispatcher> {
        let host = HostCpu::detect().isas();
        let mut routes = vec![dispatcher()];
        for ceiling in [Isa::Avx2, Isa::Avx] {
            if host.contains(ceiling) {
                routes.push(dispatcher().with_capabilities(IsaSet::up_to(ceiling)));
            }
        }
        routes.push(dispatcher().with_capabilities(IsaSet::empty()));
        routes
    }

    #[derive(Debug, Default)]
    struct RecordingBlas {
        calls: AtomicUsize,
        integer: bool,
    }

    impl VendorBlas for RecordingBlas {
        fn name(&self) -> &str {
            "recording"
        }

        fn sgemm(&self, req: &mut GemmRequest<'_, f32, f32, f32>) -> Result<()> {
            assert!(req.bias.is_none());
            self.calls.fetch_add(1, Ordering::Relaxed);
            reference::gemm_f32(&Team::serial(), req);
            Ok(())
        }

        fn gemm_s8u8s32(&self, req: &mut GemmRequest<'_, i8, u8, i32>) -> Option<Result<()>> {
            if !self.integer {
                return None;
            }
            self.calls.fetch_add(1, Ordering::Relaxed);
            reference::gemm_x8x8s32(&Team::serial(), req);
            Some(Ok(()))
        }
    }

    #[test]
    fn test_decide_sgemm() {
        let z = IsaSet::up_to(Isa::Avx512Core);
        let avx = IsaSet::up_to(Isa::Avx);
        let sse = IsaSet::up_to(Isa::Sse41);
        assert_eq!(decide_sgemm(&z, true, true, false), DispatchDecision::VendorLibrary);
        assert_eq!(
            decide_sgemm(&z, true, true, true),
            DispatchDecision::GeneratedKernel(Isa::Avx512Core)
        );
        assert_eq!(
            decide_sgemm(&avx, true, false, false),
            DispatchDecision::GeneratedKernel(Isa::Avx)
        );
        assert_eq!(decide_sgemm(&sse, true, false, false), DispatchDecision::ReferenceKernel);
        assert_eq!(decide_sgemm(&z, false, false, false), DispatchDecision::ReferenceKernel);
    }

    #[test]
    fn test_decide_igemm() {
        let z = IsaSet::up_to(Isa::Avx512Core);
        let avx2 = IsaSet::up_to(Isa::Avx2);
        let zero = ZeroPoints::default();
        let shifted = ZeroPoints { a: 0, b: 3 };
        assert_eq!(
            decide_igemm(&z, true, 4, 4, shifted),
            DispatchDecision::GeneratedKernel(Isa::Avx512Core)
        );
        // a single output element skips the wide kernel
        assert_eq!(
            decide_igemm(&z, true, 1, 1, zero),
            DispatchDecision::SimplifiedKernel(Isa::Avx2)
        );
        assert_eq!(decide_igemm(&z, true, 1, 1, shifted), DispatchDecision::ReferenceKernel);
        assert_eq!(
            decide_igemm(&avx2, true, 8, 8, zero),
            DispatchDecision::SimplifiedKernel(Isa::Avx2)
        );
        assert_eq!(decide_igemm(&avx2, true, 8, 8, shifted), DispatchDecision::ReferenceKernel);
        assert_eq!(decide_igemm(&z, false, 8, 8, zero), DispatchDecision::ReferenceKernel);
    }

    #[test]
    fn test_decide_bf16() {
        assert_eq!(
            decide_bf16(&IsaSet::up_to(Isa::Avx512Core), true),
            Some(DispatchDecision::GeneratedKernel(Isa::Avx512Core))
        );
        assert_eq!(decide_bf16(&IsaSet::up_to(Isa::Avx2), true), None);
        assert_eq!(decide_bf16(&IsaSet::all(), false), None);
    }

    #[test]
    fn test_two_by_two_on_every_route() {
        let a = [1.0f32, 3.0, 2.0, 4.0];
        let b = [5.0f32, 7.0, 6.0, 8.0];
        let vendor = Arc::new(RecordingBlas::default());
        let mut routes = host_routes();
        routes.push(dispatcher().with_registry(BackendRegistry::with_vendor(vendor.clone())));
        for d in &routes {
            let mut c = [0.0f32; 4];
            let decision = d.sgemm(&mut GemmRequest::new(nn(2, 2, 2), &a, &b, &mut c)).unwrap();
            assert_eq!(c, [19.0, 43.0, 22.0, 50.0], "{decision:?}");
        }
        assert_eq!(vendor.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reference_route_when_capabilities_removed() {
        let d = dispatcher().with_capabilities(IsaSet::empty());
        let (a, b) = ([2.0f32], [3.0f32]);
        let mut c = [0.0f32];
        let decision = d.sgemm(&mut GemmRequest::new(nn(1, 1, 1), &a, &b, &mut c)).unwrap();
        assert_eq!(decision, Some(DispatchDecision::ReferenceKernel));
        assert_eq!(c[0], 6.0);
        assert_eq!(d.cached_kernels(), 0);
    }

    fn random_f32(rng: &mut StdRng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    #[test]
    fn test_sgemm_routes_agree() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let shapes = [(37, 29, 13, false, false), (5, 70, 3, true, false), (64, 8, 40, true, true)];
        for (m, n, k, ta, tb) in shapes {
            let ta = if ta { Transpose::Trans } else { Transpose::NoTrans };
            let tb = if tb { Transpose::Trans } else { Transpose::NoTrans };
            let base = GemmDesc::new(ta, tb, m, n, k);
            let desc = base.with_ld(base.lda + 2, base.ldb + 1, m + 5);
            let a = random_f32(&mut rng, desc.a(crate::dtype::ElemType::F32).required_len());
            let b = random_f32(&mut rng, desc.b(crate::dtype::ElemType::F32).required_len());
            let c0 = random_f32(&mut rng, desc.c(crate::dtype::ElemType::F32).required_len());
            let bias = random_f32(&mut rng, m);

            for with_bias in [false, true] {
                let beta = if with_bias { 0.0 } else { 0.75 };
                let run = |d: &GemmDispatcher| {
                    let mut c = c0.clone();
                    let mut req = GemmRequest::new(desc, &a, &b, &mut c)
                        .with_alpha(1.5)
                        .with_beta(beta);
                    if with_bias {
                        req = req.with_bias(&bias);
                    }
                    let decision = d.sgemm(&mut req).unwrap();
                    (decision, c)
                };
                let routes = host_routes();
                let (reference_decision, expected) = run(routes.last().unwrap());
                assert_eq!(reference_decision, Some(DispatchDecision::ReferenceKernel));
                for d in &routes {
                    let (decision, c) = run(d);
                    for col in 0..n {
                        for row in 0..desc.ldc {
                            let idx = row + col * desc.ldc;
                            if idx >= c.len() {
                                continue;
                            }
                            if row >= m {
                                // padding rows between columns stay untouched
                                assert_eq!(c[idx].to_bits(), c0[idx].to_bits(), "{decision:?}");
                            } else {
                                assert_relative_eq!(c[idx], expected[idx], epsilon = 1e-4, max_relative = 1e-4);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_quantized_routes_agree() {
        let mut rng = StdRng::seed_from_u64(42);
        for (m, n, k) in [(35, 9, 21), (6, 13, 5)] {
            let desc = nn(m, n, k).with_ld(m + 1, k, m + 3);
            let a: Vec<i8> = (0..desc.a(crate::dtype::ElemType::S8).required_len()).map(|_| rng.gen()).collect();
            let bu: Vec<u8> = (0..desc.b(crate::dtype::ElemType::U8).required_len()).map(|_| rng.gen()).collect();
            let bs: Vec<i8> = bu.iter().map(|&x| x as i8).collect();
            let c0: Vec<i32> = (0..desc.c(crate::dtype::ElemType::S32).required_len())
                .map(|_| rng.gen_range(-1000..1000))
                .collect();
            let co_rows: Vec<i32> = (0..m).map(|_| rng.gen_range(-50..50)).collect();
            let co_cols: Vec<i32> = (0..n).map(|_| rng.gen_range(-50..50)).collect();

            for (ao, bo) in [(0i8, 0i8), (3, -7)] {
                for mode in [OffsetMode::Fixed, OffsetMode::ColumnWise, OffsetMode::RowWise] {
                    let co = match mode {
                        OffsetMode::RowWise => &co_cols,
                        _ => &co_rows,
                    };
                    let mut expected_u = None;
                    let mut expected_s = None;
                    for d in host_routes().iter().rev() {
                        let mut cu = c0.clone();
                        let mut req = GemmRequest::new(desc, &a, &bu, &mut cu)
                            .with_alpha(0.5)
                            .with_beta(1.0)
                            .with_zero_points(ao, bo)
                            .with_offset(mode, co);
                        let du = d.gemm_s8u8s32(&mut req).unwrap();
                        let expected = expected_u.get_or_insert_with(|| cu.clone());
                        assert_eq!(&cu, expected, "s8u8 {m}x{n}x{k} {mode:?} {du:?}");

                        let mut cs = c0.clone();
                        let mut req = GemmRequest::new(desc, &a, &bs, &mut cs)
                            .with_zero_points(ao, bo)
                            .with_offset(mode, co);
                        let ds = d.gemm_s8s8s32(&mut req).unwrap();
                        let expected = expected_s.get_or_insert_with(|| cs.clone());
                        assert_eq!(&cs, expected, "s8s8 {m}x{n}x{k} {mode:?} {ds:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_quantized_row_wise_offset_reference() {
        // C(i, j) = A·B + co[j] with unit scaling and no zero points.
        let a = [1i8, 3, 2, 4];
        let b = [5u8, 7, 6, 8];
        let co = [100, -100];
        for d in host_routes() {
            let mut c = [0i32; 4];
            let mut req = GemmRequest::new(nn(2, 2, 2), &a, &b, &mut c)
                .with_offset(OffsetMode::RowWise, &co);
            d.gemm_s8u8s32(&mut req).unwrap();
            assert_eq!(c, [119, 143, -78, -50]);
        }
    }

    #[test]
    fn test_quantized_plain_accumulation() {
        let a = [1i8, 3, 2, 4];
        let b = [5u8, 7, 6, 8];
        let co = [0];
        for d in host_routes() {
            let mut c = [0i32; 4];
            let mut req = GemmRequest::new(nn(2, 2, 2), &a, &b, &mut c)
                .with_offset(OffsetMode::Fixed, &co);
            d.gemm_s8u8s32(&mut req).unwrap();
            assert_eq!(c, [19, 43, 22, 50]);
        }
    }

    #[test]
    fn test_degenerate_shapes_leave_output() {
        let d = dispatcher();
        let a = [1.0f32; 8];
        let b = [1.0f32; 8];
        for (m, n, k) in [(0, 2, 2), (2, 0, 2), (2, 2, 0)] {
            let desc = nn(m, n, k).with_ld(2, 2, 2);
            let mut c = [7.0f32; 4];
            let decision = d.sgemm(&mut GemmRequest::new(desc, &a, &b, &mut c)).unwrap();
            assert_eq!(decision, None);
            assert_eq!(c, [7.0; 4]);

            let ab = [bf16::ONE; 8];
            let mut c = [7.0f32; 4];
            let decision = d
                .gemm_bf16bf16f32(&mut GemmRequest::new(desc, &ab, &ab, &mut c))
                .unwrap();
            assert_eq!(decision, None);
            assert_eq!(c, [7.0; 4]);

            let (ai, bi, co) = ([1i8; 8], [1u8; 8], [5i32; 2]);
            let mut c = [7i32; 4];
            let mut req = GemmRequest::new(desc, &ai, &bi, &mut c).with_offset(OffsetMode::Fixed, &co);
            assert_eq!(d.gemm_s8u8s32(&mut req).unwrap(), None);
            assert_eq!(c, [7; 4]);
        }
    }

    #[test]
    fn test_bias_with_beta_rejected_everywhere() {
        let d = dispatcher();
        let bias = [1.0f32, 1.0];
        let a = [1.0f32; 4];
        let mut c = [0.0f32; 4];
        let mut req = GemmRequest::new(nn(2, 2, 2), &a, &a, &mut c)
            .with_beta(1.0)
            .with_bias(&bias);
        assert!(matches!(d.sgemm(&mut req), Err(GemmError::Unimplemented(_))));

        let ab = [bf16::ONE; 4];
        let mut c = [0.0f32; 4];
        let mut req = GemmRequest::new(nn(2, 2, 2), &ab, &ab, &mut c)
            .with_beta(0.5)
            .with_bias(&bias);
        assert!(matches!(d.gemm_bf16bf16f32(&mut req), Err(GemmError::Unimplemented(_))));
    }

    #[test]
    fn test_invalid_arguments_before_anything() {
        let d = dispatcher();
        let a = [1.0f32; 4];
        let mut c = [3.0f32; 4];
        let desc = nn(2, 2, 2).with_ld(1, 2, 2);
        let err = d.sgemm(&mut GemmRequest::new(desc, &a, &a, &mut c)).unwrap_err();
        assert!(matches!(err, GemmError::InvalidArguments(_)));
        assert_eq!(c, [3.0; 4]);
    }

    #[test]
    fn test_bf16_needs_avx512_core() {
        let ab = [bf16::from_f32(2.0); 4];
        let d = dispatcher().with_capabilities(IsaSet::up_to(Isa::Avx2));
        let mut c = [0.0f32; 4];
        let err = d
            .gemm_bf16bf16f32(&mut GemmRequest::new(nn(2, 2, 2), &ab, &ab, &mut c))
            .unwrap_err();
        assert!(matches!(err, GemmError::Unimplemented(_)));
        assert_eq!(c, [0.0; 4]);

        let d = dispatcher();
        if decide_bf16(&d.capabilities(), d.jit_available()).is_some() {
            let mut c = [0.0f32; 4];
            let decision = d
                .gemm_bf16bf16f32(&mut GemmRequest::new(nn(2, 2, 2), &ab, &ab, &mut c))
                .unwrap();
            assert_eq!(decision, Some(DispatchDecision::GeneratedKernel(Isa::Avx512Core)));
            assert_eq!(c, [8.0; 4]);
        }
    }

    #[test]
    fn test_vendor_bias_added_after_call() {
        let vendor = Arc::new(RecordingBlas::default());
        let d = dispatcher().with_registry(BackendRegistry::with_vendor(vendor.clone()));
        let a = [1.0f32, 3.0, 2.0, 4.0];
        let b = [5.0f32, 7.0, 6.0, 8.0];
        let bias = [1.0f32, -1.0];
        let mut c = [0.0f32; 4];
        let mut req = GemmRequest::new(nn(2, 2, 2), &a, &b, &mut c).with_bias(&bias);
        assert_eq!(d.sgemm(&mut req).unwrap(), Some(DispatchDecision::VendorLibrary));
        assert!(req.bias.is_some());
        assert_eq!(c, [20.0, 42.0, 23.0, 49.0]);

        let mut c = [0.0f32; 4];
        let mut req = GemmRequest::new(nn(2, 2, 2), &a, &b, &mut c).with_force_nocopy(true);
        assert_ne!(d.sgemm(&mut req).unwrap(), Some(DispatchDecision::VendorLibrary));
        assert_eq!(c, [19.0, 43.0, 22.0, 50.0]);
        assert_eq!(vendor.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_vendor_integer_gemm_optional() {
        let a = [1i8, 3, 2, 4];
        let b = [5u8, 7, 6, 8];
        let co = [1];
        for integer in [false, true] {
            let vendor = Arc::new(RecordingBlas {
                integer,
                ..Default::default()
            });
            let d = dispatcher().with_registry(BackendRegistry::with_vendor(vendor.clone()));
            let mut c = [0i32; 4];
            let mut req = GemmRequest::new(nn(2, 2, 2), &a, &b, &mut c)
                .with_offset(OffsetMode::Fixed, &co);
            let decision = d.gemm_s8u8s32(&mut req).unwrap();
            assert_eq!(decision == Some(DispatchDecision::VendorLibrary), integer);
            assert_eq!(c, [20, 44, 23, 51]);
        }
    }

    #[test]
    fn test_kernels_generated_once() {
        let d = dispatcher();
        if !matches!(
            decide_sgemm(&d.capabilities(), d.jit_available(), false, false),
            DispatchDecision::GeneratedKernel(_)
        ) {
            return;
        }
        let a = vec![1.0f32; 64];
        for _ in 0..3 {
            let mut c = vec![0.0f32; 64];
            d.sgemm(&mut GemmRequest::new(nn(8, 8, 8), &a, &a, &mut c)).unwrap();
            assert!(c.iter().all(|&x| x == 8.0));
        }
        assert_eq!(d.cached_kernels(), 1);
        let mut c = vec![0.0f32; 64];
        d.sgemm(&mut GemmRequest::new(nn(8, 8, 8), &a, &a, &mut c).with_beta(1.0))
            .unwrap();
        assert_eq!(d.cached_kernels(), 2);
    }

    #[test]
    fn test_team_size_from_config() {
        assert_eq!(dispatcher().num_threads(), 3);
    }
}
