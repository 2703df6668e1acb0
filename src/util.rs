/// Widens an IEEE 754 half precision value.
pub(crate) fn half_to_f64(half: u16) -> f64 {
    let sign = if half & 0x8000 == 0 { 1.0 } else { -1.0 };
    let exponent = i32::from((half >> 10) & 0x1f);
    let mantissa = f64::from(half & 0x03ff);
    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-24),
        0x1f if mantissa == 0.0 => f64::INFINITY,
        0x1f => f64::NAN,
        _ => (1024.0 + mantissa) * 2f64.powi(exponent - 25),
    };
    sign * magnitude
}

/// True when `value` survives a round trip through `f32` unchanged.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn fits_f32(value: f64) -> bool {
    value.is_nan() || f64::from(value as f32) == value
}
