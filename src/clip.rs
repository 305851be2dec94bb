//! A clip is a bundle of keyed timelines that, when sampled, produces deltas
//! for bones, slots and constraints. Clips are read-only; runtime playback
//! goes through a [`crate::ClipEvaluator`].

use std::collections::HashMap;

use crate::ids::NameId;
use crate::math::Color32;

/// Sample count of a piecewise-linear Bezier approximation (9 x/y pairs).
pub const BEZIER_CURVE_POINTS: usize = 18;

/// Piecewise-linear samples of one cubic Bezier curve.
pub type BezierCurve = [f32; BEZIER_CURVE_POINTS];

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CurveType {
    #[default]
    Linear,
    Stepped,
    Bezier,
}

impl CurveType {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            CurveType::Linear => 0,
            CurveType::Stepped => 1,
            CurveType::Bezier => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<CurveType> {
        match tag {
            0 => Some(CurveType::Linear),
            1 => Some(CurveType::Stepped),
            2 => Some(CurveType::Bezier),
            _ => None,
        }
    }
}

/// Access to the shared base-keyframe fields.
pub trait Keyed {
    fn time(&self) -> f32;
}

/// Keyframes that interpolate toward their successor via a curve.
pub trait Curved: Keyed {
    fn curve_type(&self) -> CurveType;
    fn curve_offset(&self) -> usize;
}

macro_rules! keyed {
    ($ty:ty) => {
        impl Keyed for $ty {
            fn time(&self) -> f32 {
                self.time
            }
        }
    };
}

macro_rules! curved {
    ($ty:ty) => {
        keyed!($ty);
        impl Curved for $ty {
            fn curve_type(&self) -> CurveType {
                self.curve
            }
            fn curve_offset(&self) -> usize {
                self.curve_offset as usize
            }
        }
    };
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFrameRotation {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    /// Delta from the setup-pose rotation, degrees.
    pub angle: f32,
}
curved!(KeyFrameRotation);

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFrameScale {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub x: f32,
    pub y: f32,
}
curved!(KeyFrameScale);

impl Default for KeyFrameScale {
    fn default() -> Self {
        KeyFrameScale {
            time: 0.0,
            curve: CurveType::Linear,
            curve_offset: 0,
            x: 1.0,
            y: 1.0,
        }
    }
}

/// Shared shape for translation and shear keys (setup-relative deltas).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFrame2D {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub x: f32,
    pub y: f32,
}
curved!(KeyFrame2D);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFrameAttachment {
    pub time: f32,
    pub id: NameId,
}
keyed!(KeyFrameAttachment);

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFrameColor {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub color: Color32,
}
curved!(KeyFrameColor);

impl Default for KeyFrameColor {
    fn default() -> Self {
        KeyFrameColor {
            time: 0.0,
            curve: CurveType::Linear,
            curve_offset: 0,
            color: Color32::WHITE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFrameTwoColor {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub light: Color32,
    pub dark: Color32,
}
curved!(KeyFrameTwoColor);

impl Default for KeyFrameTwoColor {
    fn default() -> Self {
        KeyFrameTwoColor {
            time: 0.0,
            curve: CurveType::Linear,
            curve_offset: 0,
            light: Color32::WHITE,
            dark: Color32::WHITE,
        }
    }
}

/// Absolute vertex positions for a deformed attachment at one key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFrameDeform {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub vertices: Vec<f32>,
}
curved!(KeyFrameDeform);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawOrderOffset {
    pub slot: NameId,
    pub offset: i16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFrameDrawOrder {
    pub time: f32,
    pub offsets: Vec<DrawOrderOffset>,
}
keyed!(KeyFrameDrawOrder);

/// An event key with fully-resolved payload (defaults folded in at cook time).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFrameEvent {
    pub time: f32,
    pub float_value: f32,
    pub int_value: i32,
    pub string_value: String,
    pub id: NameId,
}
keyed!(KeyFrameEvent);

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFrameIk {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub mix: f32,
    pub softness: f32,
    pub bend_positive: bool,
    pub compress: bool,
    pub stretch: bool,
}
curved!(KeyFrameIk);

impl Default for KeyFrameIk {
    fn default() -> Self {
        KeyFrameIk {
            time: 0.0,
            curve: CurveType::Linear,
            curve_offset: 0,
            mix: 1.0,
            softness: 0.0,
            bend_positive: true,
            compress: false,
            stretch: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFramePathMix {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub position_mix: f32,
    pub rotation_mix: f32,
}
curved!(KeyFramePathMix);

impl Default for KeyFramePathMix {
    fn default() -> Self {
        KeyFramePathMix {
            time: 0.0,
            curve: CurveType::Linear,
            curve_offset: 0,
            position_mix: 1.0,
            rotation_mix: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFramePathPosition {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub position: f32,
}
curved!(KeyFramePathPosition);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFramePathSpacing {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub spacing: f32,
}
curved!(KeyFramePathSpacing);

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFrameTransform {
    pub time: f32,
    pub curve: CurveType,
    pub curve_offset: u32,
    pub position_mix: f32,
    pub rotation_mix: f32,
    pub scale_mix: f32,
    pub shear_mix: f32,
}
curved!(KeyFrameTransform);

impl Default for KeyFrameTransform {
    fn default() -> Self {
        KeyFrameTransform {
            time: 0.0,
            curve: CurveType::Linear,
            curve_offset: 0,
            position_mix: 1.0,
            rotation_mix: 1.0,
            scale_mix: 1.0,
            shear_mix: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneKeyFrames {
    pub rotation: Vec<KeyFrameRotation>,
    pub scale: Vec<KeyFrameScale>,
    pub shear: Vec<KeyFrame2D>,
    pub translation: Vec<KeyFrame2D>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathKeyFrames {
    pub mix: Vec<KeyFramePathMix>,
    pub position: Vec<KeyFramePathPosition>,
    pub spacing: Vec<KeyFramePathSpacing>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlotKeyFrames {
    pub attachment: Vec<KeyFrameAttachment>,
    pub color: Vec<KeyFrameColor>,
    pub two_color: Vec<KeyFrameTwoColor>,
}

/// Deform timelines keyed `skin -> slot -> attachment`.
pub type DeformKeyFrames = HashMap<NameId, HashMap<NameId, HashMap<NameId, Vec<KeyFrameDeform>>>>;

/// One animation clip: timelines keyed by the entity they drive. Keyframes
/// within each timeline are ordered by time ascending.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Clip {
    pub bones: HashMap<NameId, BoneKeyFrames>,
    pub deforms: DeformKeyFrames,
    pub draw_order: Vec<KeyFrameDrawOrder>,
    pub events: Vec<KeyFrameEvent>,
    pub ik: HashMap<NameId, Vec<KeyFrameIk>>,
    pub paths: HashMap<NameId, PathKeyFrames>,
    pub slots: HashMap<NameId, SlotKeyFrames>,
    pub transforms: HashMap<NameId, Vec<KeyFrameTransform>>,
}

/// Generate the piecewise-linear approximation of a cubic Bezier from its
/// inner control points, by forward differencing.
pub fn populate_bezier_curve(cx0: f32, cy0: f32, cx1: f32, cy1: f32) -> BezierCurve {
    let tmp_x = (-cx0 * 2.0 + cx1) * 0.03;
    let tmp_y = (-cy0 * 2.0 + cy1) * 0.03;

    let xd3 = ((cx0 - cx1) * 3.0 + 1.0) * 0.006;
    let yd3 = ((cy0 - cy1) * 3.0 + 1.0) * 0.006;

    let mut xd2 = tmp_x * 2.0 + xd3;
    let mut yd2 = tmp_y * 2.0 + yd3;

    let mut xd1 = cx0 * 0.3 + tmp_x + xd3 * 0.166_666_67;
    let mut yd1 = cy0 * 0.3 + tmp_y + yd3 * 0.166_666_67;

    let mut x = xd1;
    let mut y = yd1;

    let mut curve = [0.0f32; BEZIER_CURVE_POINTS];
    let mut i = 0;
    while i < BEZIER_CURVE_POINTS {
        curve[i] = x;
        curve[i + 1] = y;
        xd1 += xd2;
        yd1 += yd2;
        xd2 += xd3;
        yd2 += yd3;
        x += xd1;
        y += yd1;
        i += 2;
    }
    curve
}
