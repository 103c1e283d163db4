//! Shared bridge vocabulary
//!
//! Error taxonomy, lifecycle states and the normalized value type used by
//! every backend bridge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Failed to load module {}: {reason}", .path.display())]
    ModuleLoadFailed { path: PathBuf, reason: String },

    #[error("Failed to resolve symbol: {symbol}")]
    SymbolResolutionFailed { symbol: String },

    #[error("Failed to acquire client: {0}")]
    ClientAcquisitionFailed(String),

    #[error("Backend not initialized")]
    NotInitialized,

    #[error("No data available")]
    NoData,

    #[error("Parameter query failed: {0}")]
    ParameterQueryFailed(String),
}

impl BackendError {
    /// Whether this error means the capability is absent on this machine,
    /// as opposed to a single failed sample or query.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BackendError::ModuleLoadFailed { .. }
                | BackendError::SymbolResolutionFailed { .. }
                | BackendError::ClientAcquisitionFailed(_)
                | BackendError::NotInitialized
        )
    }

    pub(crate) fn symbol(name: &str) -> Self {
        BackendError::SymbolResolutionFailed {
            symbol: name.to_string(),
        }
    }
}

/// Lifecycle state of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendState {
    #[default]
    Uninitialized,
    Ready,
    Unavailable,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Uninitialized => "uninitialized",
            BackendState::Ready => "ready",
            BackendState::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A brightness or illuminance fraction.
///
/// Values produced by the ambient bridge are always in `[0.0, 1.0]`. Display
/// and keyboard values are passed through from the platform service as
/// reported. [`NormalizedValue::UNAVAILABLE`] is the scalar sentinel for
/// callers that cannot carry a `Result`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct NormalizedValue(f32);

impl NormalizedValue {
    pub const UNAVAILABLE: NormalizedValue = NormalizedValue(-1.0);

    pub fn new(value: f32) -> Self {
        Self(value)
    }

    /// Raw scalar, including the sentinel
    pub fn value(&self) -> f32 {
        self.0
    }

    pub fn is_available(&self) -> bool {
        self.0 >= 0.0
    }

    /// The value, or `None` for the sentinel
    pub fn get(&self) -> Option<f32> {
        self.is_available().then_some(self.0)
    }

    /// Whole percent, for display purposes
    pub fn percent(&self) -> Option<u8> {
        self.get().map(|v| (v.clamp(0.0, 1.0) * 100.0).round() as u8)
    }
}

impl From<NormalizedValue> for f32 {
    fn from(value: NormalizedValue) -> Self {
        value.0
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent() {
            Some(p) => write!(f, "{}%", p),
            None => f.write_str("unavailable"),
        }
    }
}

/// Divisor mapping the high (lux-like) sensor range back into `[0, 1]`
pub const AMBIENT_HIGH_RANGE_DIVISOR: f64 = 400.0;

/// Map a raw ambient sensor scalar into `[0.0, 1.0]`.
///
/// Some sensors report a pre-normalized fraction, others a lux-like figure up
/// to several hundred. Anything above 1 is treated as the latter.
pub fn normalize_ambient(raw: f64) -> f32 {
    let mut value = if raw.is_nan() { 0.0 } else { raw };
    if value < 0.0 {
        value = 0.0;
    }
    if value > 1.0 {
        value /= AMBIENT_HIGH_RANGE_DIVISOR;
    }
    if value > 1.0 {
        value = 1.0;
    }
    value as f32
}
