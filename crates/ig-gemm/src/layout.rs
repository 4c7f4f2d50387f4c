//! Shapes and strides of column-major GEMM operands.
//!
//! Storage follows the BLAS convention: element `(r, c)` of a stored matrix
//! lives at `r + c * ld`. A transposed operand is stored as its transpose,
//! so `op(X)(r, c)` reads stored element `(c, r)`.

use std::fmt;

use crate::dtype::ElemType;
use crate::error::{GemmError, Result};

/// Whether an operand enters the product as stored or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transpose {
    #[default]
    NoTrans,
    Trans,
}

impl Transpose {
    /// Parses a BLAS flag: `N`/`n` or `T`/`t`.
    pub fn from_symbol(symbol: u8) -> Result<Transpose> {
        match symbol {
            b'N' | b'n' => Ok(Transpose::NoTrans),
            b'T' | b't' => Ok(Transpose::Trans),
            other => Err(GemmError::InvalidArguments(format!(
                "transpose flag {:?} is not one of N, n, T, t",
                char::from(other)
            ))),
        }
    }

    pub fn is_trans(&self) -> bool {
        matches!(self, Transpose::Trans)
    }
}

impl fmt::Display for Transpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transpose::NoTrans => write!(f, "N"),
            Transpose::Trans => write!(f, "T"),
        }
    }
}

/// How the output zero-point vector is applied to C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OffsetMode {
    /// One value for every element.
    #[default]
    Fixed,
    /// One value per output column (length N), BLAS "row offset".
    RowWise,
    /// One value per output row (length M), BLAS "column offset".
    ColumnWise,
}

impl OffsetMode {
    /// Parses a BLAS offset flag: `F`, `R` or `C` in either case.
    pub fn from_symbol(symbol: u8) -> Result<OffsetMode> {
        match symbol {
            b'F' | b'f' => Ok(OffsetMode::Fixed),
            b'R' | b'r' => Ok(OffsetMode::RowWise),
            b'C' | b'c' => Ok(OffsetMode::ColumnWise),
            other => Err(GemmError::InvalidArguments(format!(
                "offset flag {:?} is not one of F, R, C",
                char::from(other)
            ))),
        }
    }

    /// Number of offset values this mode reads for an `m x n` output.
    pub fn required_len(&self, m: usize, n: usize) -> usize {
        match self {
            OffsetMode::Fixed => 1,
            OffsetMode::RowWise => n,
            OffsetMode::ColumnWise => m,
        }
    }
}

/// One operand as the product sees it: `rows x cols` of `op(X)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixDescriptor {
    pub trans: Transpose,
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
    pub elem: ElemType,
}

impl MatrixDescriptor {
    /// Row count of the operand as stored, after undoing its transpose.
    pub fn rows_stored(&self) -> usize {
        if self.trans.is_trans() {
            self.cols
        } else {
            self.rows
        }
    }

    pub fn cols_stored(&self) -> usize {
        if self.trans.is_trans() {
            self.rows
        } else {
            self.cols
        }
    }

    /// Smallest buffer length covering the stored extent.
    ///
    /// Saturates at `usize::MAX` when the extent does not fit the address
    /// space, a length no buffer can satisfy.
    pub fn required_len(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            return 0;
        }
        (self.cols_stored() - 1)
            .checked_mul(self.ld)
            .and_then(|x| x.checked_add(self.rows_stored()))
            .unwrap_or(usize::MAX)
    }

    /// Buffer index of `op(X)(r, c)`.
    #[inline]
    pub fn index(&self, r: usize, c: usize) -> usize {
        if self.trans.is_trans() {
            c + r * self.ld
        } else {
            r + c * self.ld
        }
    }

    /// Whether the leading dimension covers a stored column.
    pub fn ld_is_valid(&self) -> bool {
        self.ld >= self.rows_stored().max(1)
    }
}

/// Validated shape of one call: `C[M x N] = op(A)[M x K] * op(B)[K x N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmDesc {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
}

impl GemmDesc {
    /// A descriptor with tight leading dimensions for the given transposes.
    pub fn new(trans_a: Transpose, trans_b: Transpose, m: usize, n: usize, k: usize) -> Self {
        let lda = if trans_a.is_trans() { k } else { m };
        let ldb = if trans_b.is_trans() { n } else { k };
        GemmDesc {
            trans_a,
            trans_b,
            m,
            n,
            k,
            lda: lda.max(1),
            ldb: ldb.max(1),
            ldc: m.max(1),
        }
    }

    /// Builds a descriptor from raw BLAS arguments.
    ///
    /// Rejects unknown transpose symbols and negative extents or strides.
    /// Strides are checked against the shape by
    /// [`check_gemm_input`](crate::check_gemm_input).
    #[allow(clippy::too_many_arguments)]
    pub fn from_blas(
        transa: u8,
        transb: u8,
        m: i64,
        n: i64,
        k: i64,
        lda: i64,
        ldb: i64,
        ldc: i64,
    ) -> Result<GemmDesc> {
        let trans_a = Transpose::from_symbol(transa)?;
        let trans_b = Transpose::from_symbol(transb)?;
        let dim = |name: &str, v: i64| {
            usize::try_from(v)
                .map_err(|_| GemmError::InvalidArguments(format!("{name} = {v} is negative")))
        };
        Ok(GemmDesc {
            trans_a,
            trans_b,
            m: dim("M", m)?,
            n: dim("N", n)?,
            k: dim("K", k)?,
            lda: dim("lda", lda)?,
            ldb: dim("ldb", ldb)?,
            ldc: dim("ldc", ldc)?,
        })
    }

    #[must_use]
    pub fn with_ld(mut self, lda: usize, ldb: usize, ldc: usize) -> Self {
        self.lda = lda;
        self.ldb = ldb;
        self.ldc = ldc;
        self
    }

    pub fn a(&self, elem: ElemType) -> MatrixDescriptor {
        MatrixDescriptor {
            trans: self.trans_a,
            rows: self.m,
            cols: self.k,
            ld: self.lda,
            elem,
        }
    }

    pub fn b(&self, elem: ElemType) -> MatrixDescriptor {
        MatrixDescriptor {
            trans: self.trans_b,
            rows: self.k,
            cols: self.n,
            ld: self.ldb,
            elem,
        }
    }

    pub fn c(&self, elem: ElemType) -> MatrixDescriptor {
        MatrixDescriptor {
            trans: Transpose::NoTrans,
            rows: self.m,
            cols: self.n,
            ld: self.ldc,
            elem,
        }
    }

    /// True when the product has no work: M, N or K is zero.
    pub fn is_degenerate(&self) -> bool {
        self.m == 0 || self.n == 0 || self.k == 0
    }
}
