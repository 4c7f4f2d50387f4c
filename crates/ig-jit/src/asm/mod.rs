//! Byte-level instruction encoders.
//!
//! Both encoders write into a [`CodeBuf`], which owns labels, branch fixups
//! and the first error raised while emitting. Errors are sticky: once an
//! encoder fails, later instructions are still accepted but [`CodeBuf::finish`]
//! reports the original failure.

pub mod aarch64;
pub mod x86;

use crate::error::{JitError, Result};

/// A branch target, bound to a position with `bind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) usize);

#[derive(Debug, Clone, Copy)]
pub(crate) enum FixupKind {
    /// x86 32-bit displacement relative to the end of the field.
    Rel32,
    /// AArch64 `b`: 26-bit word offset in bits 0..26.
    Imm26,
    /// AArch64 `b.cond`, `cbz`, `cbnz`: 19-bit word offset in bits 5..24.
    Imm19,
}

#[derive(Debug)]
struct Fixup {
    at: usize,
    label: Label,
    kind: FixupKind,
}

#[derive(Debug, Default)]
pub struct CodeBuf {
    bytes: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    error: Option<JitError>,
}

impl CodeBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes emitted so far, with unresolved branch fields still zero.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub(crate) fn put(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub(crate) fn put_slice(&mut self, b: &[u8]) {
        self.bytes.extend_from_slice(b);
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) {
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => *slot = Some(self.bytes.len()),
            Some(Some(_)) => self.fail(JitError::InvalidOperand(format!(
                "label {} bound twice",
                label.0
            ))),
            None => self.fail(JitError::UnboundLabel(label.0)),
        }
    }

    pub(crate) fn fixup(&mut self, kind: FixupKind, at: usize, label: Label) {
        self.fixups.push(Fixup { at, label, kind });
    }

    /// Records `err` unless an earlier error is already pending.
    pub fn fail(&mut self, err: JitError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Resolves every branch and returns the finished bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for f in std::mem::take(&mut self.fixups) {
            let target = self
                .labels
                .get(f.label.0)
                .copied()
                .flatten()
                .ok_or(JitError::UnboundLabel(f.label.0))?;
            self.patch(&f, target)?;
        }
        Ok(self.bytes)
    }

    fn patch(&mut self, f: &Fixup, target: usize) -> Result<()> {
        let out_of_range = || JitError::InvalidOperand(format!("branch to label {} out of range", f.label.0));
        match f.kind {
            FixupKind::Rel32 => {
                let rel = target as i64 - (f.at as i64 + 4);
                let rel = i32::try_from(rel).map_err(|_| out_of_range())?;
                self.bytes[f.at..f.at + 4].copy_from_slice(&rel.to_le_bytes());
            }
            FixupKind::Imm26 | FixupKind::Imm19 => {
                let words = (target as i64 - f.at as i64) / 4;
                let (bits, shift) = match f.kind {
                    FixupKind::Imm26 => (26, 0),
                    _ => (19, 5),
                };
                let limit = 1i64 << (bits - 1);
                if words < -limit || words >= limit {
                    return Err(out_of_range());
                }
                let field = ((words as u32) & ((1u32 << bits) - 1)) << shift;
                let mut insn = [0u8; 4];
                insn.copy_from_slice(&self.bytes[f.at..f.at + 4]);
                let insn = u32::from_le_bytes(insn) | field;
                self.bytes[f.at..f.at + 4].copy_from_slice(&insn.to_le_bytes());
            }
        }
        Ok(())
    }
}
