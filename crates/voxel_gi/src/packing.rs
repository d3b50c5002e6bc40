//! Packed RGBA8 voxel values and the compare-and-swap running average.
//!
//! Each voxel channel is one 32-bit word, `r | g << 8 | b << 16 | a << 24`.
//! While populating, `a` counts the samples averaged into `rgb`; after the
//! resolve step it is coverage. The WGSL in `gpu::shaders` mirrors the
//! arithmetic here, including the `floor(x + 0.5)` rounding.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{UVec4, Vec3, Vec4};

use crate::core::AccumulationPolicy;

/// Value of a voxel that received no samples.
pub const EMPTY_VOXEL: u32 = 0;

pub const MAX_SAMPLE_COUNT: u32 = 255;

pub fn pack_rgba8(bytes: UVec4) -> u32 {
    let b = bytes.min(UVec4::splat(255));
    b.x | (b.y << 8) | (b.z << 16) | (b.w << 24)
}

pub fn unpack_rgba8(packed: u32) -> UVec4 {
    UVec4::new(
        packed & 0xff,
        (packed >> 8) & 0xff,
        (packed >> 16) & 0xff,
        packed >> 24,
    )
}

/// Rounds a `[0, 1]` value to a byte.
pub fn unorm_to_byte(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u32
}

pub fn byte_to_unorm(byte: u32) -> f32 {
    byte as f32 / 255.0
}

pub fn pack_unorm4(value: Vec4) -> u32 {
    pack_rgba8(UVec4::new(
        unorm_to_byte(value.x),
        unorm_to_byte(value.y),
        unorm_to_byte(value.z),
        unorm_to_byte(value.w),
    ))
}

pub fn unpack_unorm4(packed: u32) -> Vec4 {
    unpack_rgba8(packed).as_vec4() / 255.0
}

/// Maps a unit normal into `[0, 1]³` for storage in an RGB8 channel.
pub fn encode_normal(normal: Vec3) -> Vec3 {
    normal.normalize_or_zero() * 0.5 + Vec3::splat(0.5)
}

pub fn decode_normal(encoded: Vec3) -> Vec3 {
    encoded * 2.0 - Vec3::ONE
}

pub fn sample_count(packed: u32) -> u32 {
    packed >> 24
}

/// Folds one sample (`rgb` in `[0, 1]`) into an accumulation-format value.
///
/// Returns `None` once the count has saturated; the stored average is final.
pub fn blend_sample(previous: u32, rgb: Vec3) -> Option<u32> {
    let prev = unpack_rgba8(previous);
    let count = prev.w;
    if count >= MAX_SAMPLE_COUNT {
        return None;
    }
    let weight = count as f32;
    let sample = rgb.clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
    let blended = (prev.truncate().as_vec3() * weight + sample) / (weight + 1.0);
    let rounded = (blended + Vec3::splat(0.5)).floor().as_uvec3();
    Some(pack_rgba8(rounded.extend(count + 1)))
}

/// A single sample in accumulation format.
pub fn single_sample(rgb: Vec3) -> u32 {
    let sample = rgb.clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
    let rounded = (sample + Vec3::splat(0.5)).floor().as_uvec3();
    pack_rgba8(rounded.extend(1))
}

/// Adds a sample to a voxel slot shared with other writers.
///
/// `Average` retries the compare-and-swap until it lands on an unchanged slot,
/// so no concurrent contribution is lost.
pub fn accumulate(slot: &AtomicU32, rgb: Vec3, policy: AccumulationPolicy) {
    match policy {
        AccumulationPolicy::LastWriteWins => slot.store(single_sample(rgb), Ordering::Relaxed),
        AccumulationPolicy::Average => {
            let mut current = slot.load(Ordering::Relaxed);
            while let Some(next) = blend_sample(current, rgb) {
                match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_layout_is_little_endian_rgba() {
        let packed = pack_rgba8(UVec4::new(1, 2, 3, 4));
        assert_eq!(packed.to_le_bytes(), [1, 2, 3, 4]);
        assert_eq!(unpack_rgba8(packed), UVec4::new(1, 2, 3, 4));
        assert_eq!(pack_rgba8(UVec4::splat(300)), u32::MAX);
    }

    #[test]
    fn unorm_rounding() {
        assert_eq!(unorm_to_byte(0.0), 0);
        assert_eq!(unorm_to_byte(1.0), 255);
        assert_eq!(unorm_to_byte(0.5), 128);
        assert_eq!(unorm_to_byte(-3.0), 0);
        assert_eq!(unorm_to_byte(2.0), 255);
    }

    #[test]
    fn normal_encoding_round_trips() {
        let n = Vec3::new(0.0, -1.0, 0.0);
        let encoded = encode_normal(n);
        assert!(encoded.abs_diff_eq(Vec3::new(0.5, 0.0, 0.5), 1e-6));
        assert!(decode_normal(encoded).abs_diff_eq(n, 1e-6));
    }

    #[test]
    fn equal_samples_average_to_themselves() {
        let slot = AtomicU32::new(EMPTY_VOXEL);
        let rgb = Vec3::new(1.0, 0.5, 0.0);
        for _ in 0..10 {
            accumulate(&slot, rgb, AccumulationPolicy::Average);
        }
        let value = unpack_rgba8(slot.load(Ordering::Relaxed));
        assert_eq!(value, UVec4::new(255, 128, 0, 10));
    }

    #[test]
    fn two_samples_average() {
        let slot = AtomicU32::new(EMPTY_VOXEL);
        accumulate(&slot, Vec3::new(1.0, 0.0, 0.0), AccumulationPolicy::Average);
        accumulate(&slot, Vec3::new(0.0, 0.0, 1.0), AccumulationPolicy::Average);
        let value = unpack_rgba8(slot.load(Ordering::Relaxed));
        assert_eq!(value, UVec4::new(128, 0, 128, 2));
    }

    #[test]
    fn count_saturates() {
        let slot = AtomicU32::new(pack_rgba8(UVec4::new(10, 20, 30, 255)));
        accumulate(&slot, Vec3::ONE, AccumulationPolicy::Average);
        assert_eq!(sample_count(slot.load(Ordering::Relaxed)), 255);
        assert_eq!(unpack_rgba8(slot.load(Ordering::Relaxed)).x, 10);
    }

    #[test]
    fn last_write_wins_overwrites() {
        let slot = AtomicU32::new(EMPTY_VOXEL);
        accumulate(&slot, Vec3::ONE, AccumulationPolicy::LastWriteWins);
        accumulate(&slot, Vec3::ZERO, AccumulationPolicy::LastWriteWins);
        assert_eq!(unpack_rgba8(slot.load(Ordering::Relaxed)), UVec4::new(0, 0, 0, 1));
    }

    #[test]
    fn concurrent_writers_lose_no_samples() {
        let slot = AtomicU32::new(EMPTY_VOXEL);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        accumulate(&slot, Vec3::splat(0.2), AccumulationPolicy::Average);
                    }
                });
            }
        });
        let value = unpack_rgba8(slot.load(Ordering::Relaxed));
        assert_eq!(value.w, 200);
        assert_eq!(value.x, unorm_to_byte(0.2));
    }
}
