/// Secret material that is zeroized on drop and never printed.
use std::fmt;

use rand::RngCore;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SECRET_LEN: usize = 32;

/// Per-key master secret. All labels of one epoch derive from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; SECRET_LEN]);

impl MasterSecret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh secret from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != SECRET_LEN {
            return None;
        }
        let mut bytes = [0u8; SECRET_LEN];
        bytes.copy_from_slice(slice);
        Some(Self(bytes))
    }
}

impl ConstantTimeEq for MasterSecret {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

/// One pseudorandom label: the 0- or 1-state of one bit under one epoch.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Label([u8; SECRET_LEN]);

impl Label {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != SECRET_LEN {
            return None;
        }
        let mut bytes = [0u8; SECRET_LEN];
        bytes.copy_from_slice(slice);
        Some(Self(bytes))
    }

    /// Returns `a` when `choice` is 0 and `b` when it is 1, without branching.
    pub fn select(a: &Label, b: &Label, choice: Choice) -> Label {
        let mut out = [0u8; SECRET_LEN];
        for (o, (x, y)) in out.iter_mut().zip(a.0.iter().zip(b.0.iter())) {
            *o = u8::conditional_select(x, y, choice);
        }
        Label(out)
    }
}

impl ConstantTimeEq for Label {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Label(<redacted>)")
    }
}

/// A variable-length scratch buffer that is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveVec(Vec<u8>);

impl SensitiveVec {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// `len` fresh bytes from the OS CSPRNG.
    pub fn random(len: usize) -> Self {
        let mut data = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut data);
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
