/// `scripting/math.rs` - side-effect free helpers exposed to scripts as `ctx.math`
///
/// Angles are in degrees at the API surface. Euler conversion uses the
/// Z, then X, then Y rotation order common to game engines.
use crate::link::protocol::{Color, Float3, FloatQ};

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Position of `v` between `a` and `b` (0 at `a`, 1 at `b`); 0 when `a == b`.
pub fn inverse_lerp(a: f64, b: f64, v: f64) -> f64 {
    if a == b {
        0.0
    } else {
        (v - a) / (b - a)
    }
}

pub fn clamp(v: f64, min: f64, max: f64) -> f64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    v.max(lo).min(hi)
}

pub fn deg_to_rad(deg: f64) -> f64 {
    deg.to_radians()
}

pub fn rad_to_deg(rad: f64) -> f64 {
    rad.to_degrees()
}

fn quat_mul(a: FloatQ, b: FloatQ) -> FloatQ {
    FloatQ {
        x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
        y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
        z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
    }
}

fn axis_angle(axis: usize, deg: f32) -> FloatQ {
    let half = deg.to_radians() * 0.5;
    let (s, c) = half.sin_cos();
    let mut q = FloatQ { x: 0.0, y: 0.0, z: 0.0, w: c };
    match axis {
        0 => q.x = s,
        1 => q.y = s,
        _ => q.z = s,
    }
    q
}

/// Euler angles in degrees to a unit quaternion.
pub fn euler_to_quat(euler: Float3) -> FloatQ {
    let qx = axis_angle(0, euler.x);
    let qy = axis_angle(1, euler.y);
    let qz = axis_angle(2, euler.z);
    quat_mul(quat_mul(qy, qx), qz)
}

/// Unit quaternion back to Euler degrees. At the poles Z is folded into Y.
pub fn quat_to_euler(q: FloatQ) -> Float3 {
    let FloatQ { x, y, z, w } = normalize(q);

    let m12 = 2.0 * (y * z - w * x);
    let sin_x = (-m12).clamp(-1.0, 1.0);

    if sin_x.abs() > 0.9999 {
        let m20 = 2.0 * (x * z - w * y);
        let m00 = 1.0 - 2.0 * (y * y + z * z);
        return Float3 {
            x: sin_x.asin().to_degrees(),
            y: (-m20).atan2(m00).to_degrees(),
            z: 0.0,
        };
    }

    let m02 = 2.0 * (x * z + w * y);
    let m22 = 1.0 - 2.0 * (x * x + y * y);
    let m10 = 2.0 * (x * y + w * z);
    let m11 = 1.0 - 2.0 * (x * x + z * z);
    Float3 {
        x: sin_x.asin().to_degrees(),
        y: m02.atan2(m22).to_degrees(),
        z: m10.atan2(m11).to_degrees(),
    }
}

fn normalize(q: FloatQ) -> FloatQ {
    let len = (q.x * q.x + q.y * q.y + q.z * q.z + q.w * q.w).sqrt();
    if len == 0.0 {
        return FloatQ::IDENTITY;
    }
    FloatQ {
        x: q.x / len,
        y: q.y / len,
        z: q.z / len,
        w: q.w / len,
    }
}

pub fn color(r: f32, g: f32, b: f32, a: Option<f32>) -> Color {
    Color {
        r,
        g,
        b,
        a: a.unwrap_or(1.0),
    }
}

/// `#RRGGBB` or `#RRGGBBAA`, leading `#` optional.
pub fn hex_color(hex: &str) -> Option<Color> {
    let digits = hex.trim().trim_start_matches('#');
    if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .ok()
            .map(|v| v as f32 / 255.0)
    };
    Some(Color {
        r: channel(0)?,
        g: channel(2)?,
        b: channel(4)?,
        a: if digits.len() == 8 { channel(6)? } else { 1.0 },
    })
}
