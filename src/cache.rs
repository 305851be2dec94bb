//! The frame cache accumulates weighted animation deltas for one frame,
//! which are then folded onto the pose instance by
//! [`crate::PoseInstance::apply_cache`] at the end of animation updating.

use std::collections::{HashMap, HashSet};

use crate::ids::NameId;

/// Accumulated IK parameter deltas. Boolean channels accumulate as scored
/// floats and are resolved against the setup value during apply.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IkEntry {
    pub mix: f32,
    pub softness: f32,
    pub bend_positive: f32,
    pub compress: f32,
    pub stretch: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TwoColorEntry {
    pub light: [f32; 4],
    pub dark: [f32; 3],
}

/// One attachment change pushed by a clip, resolved during apply: entries are
/// sorted by alpha ascending and only the highest-alpha cluster commits.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlotAttachmentEntry {
    pub alpha: f32,
    pub attachment: NameId,
    pub slot: i16,
}

pub(crate) trait Accumulate {
    fn accumulate(&mut self, other: &Self);
}

impl Accumulate for f32 {
    fn accumulate(&mut self, other: &Self) {
        *self += other;
    }
}

impl<const N: usize> Accumulate for [f32; N] {
    fn accumulate(&mut self, other: &Self) {
        for (a, b) in self.iter_mut().zip(other) {
            *a += b;
        }
    }
}

impl Accumulate for IkEntry {
    fn accumulate(&mut self, other: &Self) {
        self.mix += other.mix;
        self.softness += other.softness;
        self.bend_positive += other.bend_positive;
        self.compress += other.compress;
        self.stretch += other.stretch;
    }
}

impl Accumulate for TwoColorEntry {
    fn accumulate(&mut self, other: &Self) {
        self.light.accumulate(&other.light);
        self.dark.accumulate(&other.dark);
    }
}

fn accumulate_into<T: Accumulate>(map: &mut HashMap<i16, T>, index: i16, value: T) {
    match map.entry(index) {
        std::collections::hash_map::Entry::Occupied(mut e) => e.get_mut().accumulate(&value),
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(value);
        }
    }
}

/// Per-frame additive delta maps keyed by bone/slot/constraint index.
#[derive(Clone, Debug, Default)]
pub struct FrameCache {
    pub attachments: Vec<SlotAttachmentEntry>,
    pub color: HashMap<i16, [f32; 4]>,
    pub two_color: HashMap<i16, TwoColorEntry>,
    /// Explicit draw order for this frame; empty commits the default.
    pub draw_order: Vec<i16>,
    pub ik: HashMap<i16, IkEntry>,
    pub path_mix: HashMap<i16, [f32; 2]>,
    pub path_position: HashMap<i16, f32>,
    pub path_spacing: HashMap<i16, f32>,
    pub position: HashMap<i16, [f32; 2]>,
    pub rotation: HashMap<i16, f32>,
    /// `[x, y, accumulated weight]`; the weight coordinate makes non-linear
    /// scale blending idempotent.
    pub scale: HashMap<i16, [f32; 3]>,
    pub shear: HashMap<i16, [f32; 2]>,
    pub transform: HashMap<i16, [f32; 4]>,

    // Apply-time scratch, reused across frames.
    pub(crate) slot_scratch: HashSet<i16>,
    pub(crate) draw_order_scratch: Vec<i16>,
}

impl FrameCache {
    pub fn accum_ik(&mut self, index: i16, entry: IkEntry) {
        accumulate_into(&mut self.ik, index, entry);
    }

    pub fn accum_path_mix(&mut self, index: i16, value: [f32; 2]) {
        accumulate_into(&mut self.path_mix, index, value);
    }

    pub fn accum_path_position(&mut self, index: i16, value: f32) {
        accumulate_into(&mut self.path_position, index, value);
    }

    pub fn accum_path_spacing(&mut self, index: i16, value: f32) {
        accumulate_into(&mut self.path_spacing, index, value);
    }

    pub fn accum_position(&mut self, index: i16, value: [f32; 2]) {
        accumulate_into(&mut self.position, index, value);
    }

    pub fn accum_rotation(&mut self, index: i16, value: f32) {
        accumulate_into(&mut self.rotation, index, value);
    }

    pub fn accum_scale(&mut self, index: i16, value: [f32; 2], alpha: f32) {
        accumulate_into(&mut self.scale, index, [value[0], value[1], alpha]);
    }

    pub fn accum_shear(&mut self, index: i16, value: [f32; 2]) {
        accumulate_into(&mut self.shear, index, value);
    }

    pub fn accum_slot_attachment(&mut self, slot: i16, attachment: NameId, alpha: f32) {
        self.attachments.push(SlotAttachmentEntry {
            alpha,
            attachment,
            slot,
        });
    }

    pub fn accum_slot_color(&mut self, index: i16, value: [f32; 4]) {
        accumulate_into(&mut self.color, index, value);
    }

    pub fn accum_slot_two_color(&mut self, index: i16, entry: TwoColorEntry) {
        accumulate_into(&mut self.two_color, index, entry);
    }

    pub fn accum_transform(&mut self, index: i16, value: [f32; 4]) {
        accumulate_into(&mut self.transform, index, value);
    }

    pub fn clear(&mut self) {
        self.attachments.clear();
        self.color.clear();
        self.two_color.clear();
        self.draw_order.clear();
        self.ik.clear();
        self.path_mix.clear();
        self.path_position.clear();
        self.path_spacing.clear();
        self.position.clear();
        self.rotation.clear();
        self.scale.clear();
        self.shear.clear();
        self.transform.clear();

        self.slot_scratch.clear();
    }

    pub fn is_dirty(&self) -> bool {
        !self.attachments.is_empty()
            || !self.color.is_empty()
            || !self.two_color.is_empty()
            || !self.draw_order.is_empty()
            || !self.ik.is_empty()
            || !self.path_mix.is_empty()
            || !self.path_position.is_empty()
            || !self.path_spacing.is_empty()
            || !self.position.is_empty()
            || !self.rotation.is_empty()
            || !self.scale.is_empty()
            || !self.shear.is_empty()
            || !self.transform.is_empty()
    }
}

/// Fill `out` with the identity slot permutation.
pub fn set_default_draw_order(slot_count: usize, out: &mut Vec<i16>) {
    out.clear();
    out.extend(0..slot_count as i16);
}
