use crate::layout::{GemmDesc, OffsetMode};

/// Zero points subtracted from A and B before multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZeroPoints {
    pub a: i8,
    pub b: i8,
}

impl ZeroPoints {
    pub fn is_zero(&self) -> bool {
        self.a == 0 && self.b == 0
    }
}

/// Output zero point added to the integer result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOffset<'a> {
    pub mode: OffsetMode,
    pub values: &'a [i32],
}

impl<'a> OutputOffset<'a> {
    pub fn new(mode: OffsetMode, values: &'a [i32]) -> Self {
        OutputOffset { mode, values }
    }

    /// Offset for output element `(i, j)`. The length must have been
    /// validated against the mode.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> i32 {
        match self.mode {
            OffsetMode::Fixed => self.values[0],
            OffsetMode::RowWise => self.values[j],
            OffsetMode::ColumnWise => self.values[i],
        }
    }
}

/// Everything one GEMM call needs: `C = alpha * op(A) * op(B) + beta * C`.
///
/// `beta == 0` means C is write-only: its previous contents are never read,
/// so it may hold garbage. `bias` (f32 paths) is added to every output
/// column and requires `beta == 0`.
#[derive(Debug)]
pub struct GemmRequest<'a, A, B, C> {
    pub desc: GemmDesc,
    pub a: &'a [A],
    pub b: &'a [B],
    pub c: &'a mut [C],
    pub alpha: f32,
    pub beta: f32,
    pub bias: Option<&'a [f32]>,
    pub zero_points: ZeroPoints,
    pub offset: Option<OutputOffset<'a>>,
    /// Skip the vendor library even when one is registered.
    pub force_nocopy: bool,
}

impl<'a, A, B, C> GemmRequest<'a, A, B, C> {
    /// A request computing `C = op(A) * op(B)`.
    pub fn new(desc: GemmDesc, a: &'a [A], b: &'a [B], c: &'a mut [C]) -> Self {
        GemmRequest {
            desc,
            a,
            b,
            c,
            alpha: 1.0,
            beta: 0.0,
            bias: None,
            zero_points: ZeroPoints::default(),
            offset: None,
            force_nocopy: false,
        }
    }

    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn with_beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    #[must_use]
    pub fn with_bias(mut self, bias: &'a [f32]) -> Self {
        self.bias = Some(bias);
        self
    }

    #[must_use]
    pub fn with_zero_points(mut self, a: i8, b: i8) -> Self {
        self.zero_points = ZeroPoints { a, b };
        self
    }

    #[must_use]
    pub fn with_offset(mut self, mode: OffsetMode, values: &'a [i32]) -> Self {
        self.offset = Some(OutputOffset::new(mode, values));
        self
    }

    #[must_use]
    pub fn with_force_nocopy(mut self, force: bool) -> Self {
        self.force_nocopy = force;
        self
    }
}
