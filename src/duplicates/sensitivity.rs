//! Per-method duplicate thresholds, in regular and animated profiles.

use serde::{Deserialize, Serialize};

use super::Method;
use crate::error::{Error, Result};

/// Threshold per fingerprinting method.
///
/// Hash methods hold a maximum Hamming distance, `cnn` a minimum cosine
/// similarity. A negative regular threshold disables the method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sensitivities {
    pub percept: f64,
    pub average: f64,
    pub diff: f64,
    pub wavelet: f64,
    pub cnn: f64,
}

impl Sensitivities {
    /// Defaults for regular (still) images.
    pub fn regular() -> Self {
        Self {
            percept: 4.0,
            average: 1.0,
            diff: 4.0,
            wavelet: 1.0,
            cnn: 0.95,
        }
    }

    /// Defaults for animated images; average and wavelet are off for them.
    pub fn animated() -> Self {
        Self {
            percept: 3.0,
            average: -1.0,
            diff: 1.0,
            wavelet: -1.0,
            cnn: 0.97,
        }
    }

    pub fn get(&self, method: Method) -> f64 {
        match method {
            Method::Percept => self.percept,
            Method::Average => self.average,
            Method::Diff => self.diff,
            Method::Wavelet => self.wavelet,
            Method::Cnn => self.cnn,
        }
    }

    pub fn is_enabled(&self, method: Method) -> bool {
        self.get(method) >= 0.0
    }
}

impl Default for Sensitivities {
    fn default() -> Self {
        Self::regular()
    }
}

/// Check that every animated threshold is at least as strict as its regular counterpart.
pub fn validate(regular: &Sensitivities, animated: &Sensitivities) -> Result<()> {
    for method in Method::ALL {
        let (r, a) = (regular.get(method), animated.get(method));
        let ok = if method.is_similarity() { a >= r } else { a <= r };
        if !ok {
            return Err(Error::Sensitivity {
                method,
                regular: r,
                animated: a,
            });
        }
    }
    Ok(())
}
