//! Portable batch-width abstraction backing [`crate::query::QueryMut::for_each_simd`].
//!
//! Component columns are already contiguous `Vec<u8>` storage, so a
//! single-component query can hand out aligned batches directly instead of
//! per-row dispatch. This module only picks the batch width; the actual
//! vectorization (or lack of it) is left to the compiler's autovectorizer
//! operating on the returned slices.

/// Returns SIMD chunk size for x86_64, single-element chunks otherwise
#[cfg(target_arch = "x86_64")]
pub fn chunk_size<T>() -> usize {
    8  // AVX2: 256-bit / 32-bit = 8 elements
}

/// Returns SIMD chunk size for x86_64, single-element chunks otherwise
#[cfg(not(target_arch = "x86_64"))]
pub fn chunk_size<T>() -> usize {
    1  // Fallback: scalar
}

/// Split data into SIMD-sized chunks for x86_64
#[cfg(target_arch = "x86_64")]
pub fn chunks<T: Copy>(data: &mut [T]) -> Vec<&mut [T]> {
    data.chunks_exact_mut(8).collect()
}

/// Split data into SIMD-sized chunks for fallback platforms
#[cfg(not(target_arch = "x86_64"))]
pub fn chunks<T: Copy>(data: &mut [T]) -> Vec<&mut [T]> {
    data.chunks_exact_mut(1).collect()
}
