//! Small fixed-size math types used by the pose engine.

use std::ops::Mul;

/// A 2x3 affine transform (column basis `a,c` / `b,d` plus translation).
///
/// Field naming follows the usual 2D runtime convention:
///
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Mat2x3 {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Mat2x3 {
    pub const IDENTITY: Mat2x3 = Mat2x3 {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Transform a position (applies the translation).
    pub fn transform(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    /// Determinant of the upper 2x2 basis.
    pub fn det(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// World rotation of the x basis column, in degrees.
    pub fn rotation_degrees(&self) -> f32 {
        self.c.atan2(self.a).to_degrees()
    }
}

impl Default for Mat2x3 {
    fn default() -> Self {
        Mat2x3::IDENTITY
    }
}

impl Mul for Mat2x3 {
    type Output = Mat2x3;

    fn mul(self, r: Mat2x3) -> Mat2x3 {
        Mat2x3 {
            a: self.a * r.a + self.b * r.c,
            b: self.a * r.b + self.b * r.d,
            c: self.c * r.a + self.d * r.c,
            d: self.c * r.b + self.d * r.d,
            tx: self.a * r.tx + self.b * r.ty + self.tx,
            ty: self.c * r.tx + self.d * r.ty + self.ty,
        }
    }
}

/// 8-bit RGBA color, the storage form for slot and attachment tints.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Color32 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color32 {
    pub const WHITE: Color32 = Color32 {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };
    pub const BLACK: Color32 = Color32 {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };

    pub fn to_bits(self) -> u32 {
        (self.r as u32) | (self.g as u32) << 8 | (self.b as u32) << 16 | (self.a as u32) << 24
    }

    pub fn from_bits(bits: u32) -> Color32 {
        Color32 {
            r: (bits & 0xFF) as u8,
            g: (bits >> 8 & 0xFF) as u8,
            b: (bits >> 16 & 0xFF) as u8,
            a: (bits >> 24 & 0xFF) as u8,
        }
    }
}

impl Default for Color32 {
    fn default() -> Self {
        Color32::WHITE
    }
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Wrap an angle into (-180, 180].
pub fn clamp_degrees(degrees: f32) -> f32 {
    let mut a = degrees % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a < -180.0 {
        a += 360.0;
    }
    a
}

/// Wrap an angle into (-PI, PI].
pub fn clamp_radians(radians: f32) -> f32 {
    use std::f32::consts::PI;
    let mut a = radians;
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Shortest-arc interpolation between two angles in degrees.
pub fn lerp_degrees(a: f32, b: f32, t: f32) -> f32 {
    a + clamp_degrees(b - a) * t
}
