//! Vector packing and similarity helpers.
//!
//! Persisted layout: contiguous little-endian IEEE-754 `f32` values, no
//! header. `dims` and `normalized` live in their own columns.

use crate::error::{AppError, Result};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Serialize a vector to its persisted byte layout.
pub fn pack(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize persisted bytes back to a vector.
pub fn unpack(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % F32_BYTES != 0 {
        return Err(AppError::DataIntegrity(format!(
            "vector byte length {} is not a multiple of {}",
            bytes.len(),
            F32_BYTES
        )));
    }

    Ok(bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length in place. Zero vectors are left untouched.
pub fn normalize(values: &mut [f32]) {
    let norm = l2_norm(values);
    if norm > f32::EPSILON {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn is_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

pub fn is_unit(values: &[f32], tolerance: f32) -> bool {
    (l2_norm(values) - 1.0).abs() <= tolerance
}

/// Dot product; equals cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
