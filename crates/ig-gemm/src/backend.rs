use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::request::GemmRequest;

/// An external BLAS the dispatcher may hand whole calls to.
///
/// Implementations receive requests that already passed validation and are
/// not degenerate. They never see a bias: the dispatcher applies it in a
/// separate pass after [`sgemm`](VendorBlas::sgemm) returns.
pub trait VendorBlas: Send + Sync + Debug {
    /// Returns the name of this library (e.g., "mkl", "openblas").
    fn name(&self) -> &str;

    /// `C = alpha * op(A) * op(B) + beta * C` in f32.
    fn sgemm(&self, req: &mut GemmRequest<'_, f32, f32, f32>) -> Result<()>;

    /// Quantized GEMM with unsigned B. `None` means the library has no
    /// integer GEMM and the built-in routes take over.
    fn gemm_s8u8s32(&self, req: &mut GemmRequest<'_, i8, u8, i32>) -> Option<Result<()>> {
        let _ = req;
        None
    }

    /// Quantized GEMM with signed B, `None` when unsupported.
    fn gemm_s8s8s32(&self, req: &mut GemmRequest<'_, i8, i8, i32>) -> Option<Result<()>> {
        let _ = req;
        None
    }
}

/// Optional external libraries known to a dispatcher.
///
/// A build without a vendor library holds an explicit `None` entry, so every
/// route decision asks the same question whether or not one is linked.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    vendor: Option<Arc<dyn VendorBlas>>,
}

impl BackendRegistry {
    pub fn none() -> Self {
        BackendRegistry { vendor: None }
    }

    pub fn with_vendor(vendor: Arc<dyn VendorBlas>) -> Self {
        BackendRegistry {
            vendor: Some(vendor),
        }
    }

    pub fn vendor(&self) -> Option<&Arc<dyn VendorBlas>> {
        self.vendor.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.vendor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Noop;

    impl VendorBlas for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn sgemm(&self, _req: &mut GemmRequest<'_, f32, f32, f32>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_entries() {
        assert!(!BackendRegistry::none().is_available());
        assert!(BackendRegistry::default().vendor().is_none());
        let reg = BackendRegistry::with_vendor(Arc::new(Noop));
        assert!(reg.is_available());
        assert_eq!(reg.vendor().map(|v| v.name()), Some("noop"));
    }

    #[test]
    fn test_integer_gemm_defaults_to_unsupported() {
        use crate::layout::{GemmDesc, Transpose};
        let d = GemmDesc::new(Transpose::NoTrans, Transpose::NoTrans, 1, 1, 1);
        let (a, b) = ([1i8], [2u8]);
        let mut c = [0i32];
        let mut req = GemmRequest::new(d, &a, &b, &mut c);
        assert!(Noop.gemm_s8u8s32(&mut req).is_none());
    }
}
