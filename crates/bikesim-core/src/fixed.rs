use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Used wherever a fractional quantity must accumulate identically on every
/// platform: the scene clock carry, the speed factor, probabilities.
pub type Fixed64 = I32F32;

/// Game time in hundredths of a second. The scene clock, every event
/// timestamp and every physics step size are expressed in this unit.
pub type Centis = i64;

/// Convert a game time to seconds (bike state timestamps, finish times).
#[inline]
pub fn centis_to_secs(t: Centis) -> f32 {
    t as f32 / 100.0
}

/// Convert seconds to game time, rounding to the nearest hundredth.
#[inline]
pub fn secs_to_centis(s: f32) -> Centis {
    (s * 100.0).round() as Centis
}

/// Convert an f32 to Fixed64. Use only for initialization and config.
#[inline]
pub fn f32_to_fixed64(v: f32) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f32. Use only for display and physics scaling.
#[inline]
pub fn fixed64_to_f32(v: Fixed64) -> f32 {
    v.to_num::<f32>()
}
