//! Distances between two models' flat vectors.
//!
//! Both models are only read, so metrics between independent snapshots can
//! run concurrently from several threads without coordination.

use crate::backend::Device;
use crate::catalog::Model;
use crate::error::{ContinualError, Result};
use crate::vectorize::Vectorizer;

/// Added to the norm product so a zero vector yields 0 instead of NaN.
pub const COSINE_EPS: f64 = 1e-6;

/// `Σ a_i · b_i` on the CPU.
///
/// # Errors
/// [`ContinualError::IncompatibleModels`] if the lengths differ.
pub fn dot(a: &[f64], b: &[f64]) -> Result<f64> {
    same_len(a, b)?;
    Ok(Device::Cpu.dot(a, b))
}

/// Euclidean norm.
pub fn l2_norm(a: &[f64]) -> f64 {
    Device::Cpu.dot(a, a).sqrt()
}

fn same_len(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(ContinualError::IncompatibleModels {
            left: format!("{} trainable elements", a.len()),
            right: format!("{} trainable elements", b.len()),
        })
    }
}

impl Vectorizer {
    /// `‖flatten(m1) - flatten(m2)‖₂`.
    ///
    /// # Errors
    /// [`ContinualError::IncompatibleModels`] if the flat lengths differ.
    pub fn norm_distance<A, B>(&self, m1: &A, m2: &B) -> Result<f64>
    where
        A: Model + ?Sized,
        B: Model + ?Sized,
    {
        let a = self.flatten(m1)?;
        let b = self.flatten(m2)?;
        same_len(&a, &b)?;
        Ok(self.device().squared_distance(&a, &b).sqrt())
    }

    /// Cosine of the angle between the two flat vectors, in `[-1, 1]`.
    ///
    /// [`COSINE_EPS`] is added to the norm product. Identical non-zero vectors
    /// return exactly `1.0`.
    ///
    /// # Errors
    /// [`ContinualError::IncompatibleModels`] if the flat lengths differ.
    pub fn cosine_similarity<A, B>(&self, m1: &A, m2: &B) -> Result<f64>
    where
        A: Model + ?Sized,
        B: Model + ?Sized,
    {
        let a = self.flatten(m1)?;
        let b = self.flatten(m2)?;
        same_len(&a, &b)?;
        Ok(self.cosine(&a, &b))
    }

    pub(crate) fn cosine(&self, a: &[f64], b: &[f64]) -> f64 {
        let device = self.device();
        let na = device.dot(a, a).sqrt();
        if a == b && na > 0.0 {
            return 1.0;
        }
        let nb = device.dot(b, b).sqrt();
        let cos = device.dot(a, b) / (na * nb + COSINE_EPS);
        cos.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_vectors() {
        let v = Vectorizer::new(Device::Cpu);
        assert_eq!(v.cosine(&[1.0, 2.0], &[1.0, 2.0]), 1.0);
        assert!((v.cosine(&[1.0, 0.0], &[0.0, 3.0])).abs() < 1e-12);
        assert!((v.cosine(&[1.0, 1.0], &[-2.0, -2.0]) + 1.0).abs() < 1e-6);
        assert_eq!(v.cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn dot_checks_length() {
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]).unwrap(), 11.0);
        assert!(dot(&[1.0], &[1.0, 2.0]).is_err());
        assert_eq!(l2_norm(&[3.0, 4.0]), 5.0);
    }
}
