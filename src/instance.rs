//! Mutable per-character pose state: current bone locals, constraint
//! parameters, slot attachments and colors, active deform buffers, and the
//! skinning palette produced each frame by walking the definition's
//! pose-task list.

use std::collections::HashMap;
use std::sync::Arc;

use crate::attachment::{Attachment, PathAttachment, DEFAULT_SKIN};
use crate::cache::{set_default_draw_order, FrameCache};
use crate::definition::{
    BoneDef, Definition, IkDef, PathDef, PathPositionMode, PathRotationMode, PathSpacingMode,
    PoseTaskKind, SlotDef, TransformDef, TransformMode,
};
use crate::ids::NameId;
use crate::math::{clamp_degrees, clamp_radians, Color32, Mat2x3};

/// Zero epsilon used by the path solver.
const PATH_EPSILON: f32 = 0.00001;
const PATH_EPSILON_LOOSE: f32 = 0.001;

/// Determinants at or below this magnitude are treated as singular.
const DET_EPSILON: f32 = 1.0e-5;

/// Host-provided receiver for discrete animation events, called
/// synchronously during event-range evaluation.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, name: NameId, int_value: i32, float_value: f32, string_value: &str);
}

/// Sink that drops all events.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn dispatch(&self, _name: NameId, _int_value: i32, _float_value: f32, _string_value: &str) {}
}

pub(crate) fn float_to_bool(base: bool, delta: f32) -> bool {
    (if base { 1.0 } else { 0.0 }) + delta >= 0.5
}

/// Current local transform of one bone.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoneState {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,
}

impl Default for BoneState {
    fn default() -> Self {
        BoneState {
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            shear_x: 0.0,
            shear_y: 0.0,
        }
    }
}

impl BoneState {
    pub fn assign(&mut self, data: &BoneDef) {
        self.x = data.x;
        self.y = data.y;
        self.rotation = data.rotation;
        self.scale_x = data.scale_x;
        self.scale_y = data.scale_y;
        self.shear_x = data.shear_x;
        self.shear_y = data.shear_y;
    }

    /// Local TRS+shear as a 2x3 matrix.
    pub fn local_transform(
        x: f32,
        y: f32,
        rotation: f32,
        scale_x: f32,
        scale_y: f32,
        shear_x: f32,
        shear_y: f32,
    ) -> Mat2x3 {
        let rx = (rotation + shear_x).to_radians();
        let ry = (rotation + 90.0 + shear_y).to_radians();
        Mat2x3 {
            a: rx.cos() * scale_x,
            b: ry.cos() * scale_y,
            c: rx.sin() * scale_x,
            d: ry.sin() * scale_y,
            tx: x,
            ty: y,
        }
    }

    pub fn to_transform(&self) -> Mat2x3 {
        Self::local_transform(
            self.x,
            self.y,
            self.rotation,
            self.scale_x,
            self.scale_y,
            self.shear_x,
            self.shear_y,
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IkState {
    pub mix: f32,
    pub softness: f32,
    pub bend_positive: bool,
    pub compress: bool,
    pub stretch: bool,
    pub uniform: bool,
}

impl Default for IkState {
    fn default() -> Self {
        IkState {
            mix: 1.0,
            softness: 0.0,
            bend_positive: true,
            compress: false,
            stretch: false,
            uniform: false,
        }
    }
}

impl IkState {
    pub fn assign(&mut self, data: &IkDef) {
        self.mix = data.mix;
        self.softness = data.softness;
        self.bend_positive = data.bend_positive;
        self.compress = data.compress;
        self.stretch = data.stretch;
        self.uniform = data.uniform;
    }
}

/// Sampling scratch reused by the path solver every frame; only cleared,
/// never reallocated.
#[derive(Clone, Debug, Default)]
pub struct PathScratch {
    pub curves: Vec<f32>,
    pub lengths: Vec<f32>,
    pub positions: Vec<f32>,
    pub segments: [f32; 10],
    pub spaces: Vec<f32>,
    pub world: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct PathState {
    pub position: f32,
    pub position_mix: f32,
    pub rotation_mix: f32,
    pub spacing: f32,
    pub(crate) scratch: PathScratch,
}

impl Default for PathState {
    fn default() -> Self {
        PathState {
            position: 0.0,
            position_mix: 1.0,
            rotation_mix: 1.0,
            spacing: 0.0,
            scratch: PathScratch::default(),
        }
    }
}

impl PathState {
    pub fn assign(&mut self, data: &PathDef) {
        self.position = data.position;
        self.position_mix = data.position_mix;
        self.rotation_mix = data.rotation_mix;
        self.spacing = data.spacing;
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlotState {
    pub attachment: NameId,
    pub color: Color32,
    pub dark_color: Color32,
}

impl Default for SlotState {
    fn default() -> Self {
        SlotState {
            attachment: NameId::EMPTY,
            color: Color32::WHITE,
            dark_color: Color32::BLACK,
        }
    }
}

impl SlotState {
    pub fn assign(&mut self, data: &SlotDef) {
        self.attachment = data.attachment_id;
        self.color = data.color;
        self.dark_color = data.dark_color;
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TransformState {
    pub position_mix: f32,
    pub rotation_mix: f32,
    pub scale_mix: f32,
    pub shear_mix: f32,
}

impl Default for TransformState {
    fn default() -> Self {
        TransformState {
            position_mix: 1.0,
            rotation_mix: 1.0,
            scale_mix: 1.0,
            shear_mix: 1.0,
        }
    }
}

impl TransformState {
    pub fn assign(&mut self, data: &TransformDef) {
        self.position_mix = data.position_mix;
        self.rotation_mix = data.rotation_mix;
        self.scale_mix = data.scale_mix;
        self.shear_mix = data.shear_mix;
    }
}

/// Key of one active deform buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DeformKey {
    pub skin: NameId,
    pub slot: NameId,
    pub attachment: NameId,
}

/// Mutable per-character state bound to a shared, immutable [`Definition`].
///
/// Evaluation within one frame is strictly: sample active clips into the
/// frame cache, [`PoseInstance::apply_cache`], then
/// [`PoseInstance::pose_skinning_palette`]. A clone duplicates all mutable
/// state (deform buffers included) and shares the definition.
#[derive(Clone)]
pub struct PoseInstance {
    definition: Arc<Definition>,
    event_sink: Arc<dyn EventSink>,
    cache: FrameCache,
    bones: Vec<BoneState>,
    deforms: HashMap<DeformKey, Vec<f32>>,
    deform_refs: HashMap<DeformKey, i32>,
    draw_order: Vec<i16>,
    ik: Vec<IkState>,
    paths: Vec<PathState>,
    skinning_palette: Vec<Mat2x3>,
    slots: Vec<SlotState>,
    transforms: Vec<TransformState>,
}

impl std::fmt::Debug for PoseInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseInstance")
            .field("bones", &self.bones.len())
            .field("slots", &self.slots.len())
            .field("deforms", &self.deforms.len())
            .finish_non_exhaustive()
    }
}

impl PoseInstance {
    pub fn new(definition: Arc<Definition>, event_sink: Arc<dyn EventSink>) -> PoseInstance {
        let bone_count = definition.bones.len();
        let slot_count = definition.slots.len();

        let mut instance = PoseInstance {
            bones: vec![BoneState::default(); bone_count],
            deforms: HashMap::new(),
            deform_refs: HashMap::new(),
            draw_order: Vec::with_capacity(slot_count),
            ik: vec![IkState::default(); definition.ik.len()],
            paths: vec![PathState::default(); definition.paths.len()],
            skinning_palette: vec![Mat2x3::IDENTITY; bone_count],
            slots: vec![SlotState::default(); slot_count],
            transforms: vec![TransformState::default(); definition.transforms.len()],
            cache: FrameCache::default(),
            definition,
            event_sink,
        };
        instance.set_to_setup_pose();
        instance.pose_skinning_palette();
        instance
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FrameCache {
        &mut self.cache
    }

    pub fn bones(&self) -> &[BoneState] {
        &self.bones
    }

    pub fn bones_mut(&mut self) -> &mut [BoneState] {
        &mut self.bones
    }

    pub fn draw_order(&self) -> &[i16] {
        &self.draw_order
    }

    pub fn ik_states(&self) -> &[IkState] {
        &self.ik
    }

    pub fn path_states(&self) -> &[PathState] {
        &self.paths
    }

    pub fn skinning_palette(&self) -> &[Mat2x3] {
        &self.skinning_palette
    }

    pub fn slots(&self) -> &[SlotState] {
        &self.slots
    }

    pub fn transform_states(&self) -> &[TransformState] {
        &self.transforms
    }

    pub fn deforms(&self) -> &HashMap<DeformKey, Vec<f32>> {
        &self.deforms
    }

    pub(crate) fn deform_buffer_mut(&mut self, key: DeformKey) -> Option<&mut Vec<f32>> {
        self.deforms.get_mut(&key)
    }

    pub(crate) fn insert_deform_buffer(&mut self, key: DeformKey, buffer: Vec<f32>) {
        self.deforms.insert(key, buffer);
    }

    pub(crate) fn acquire_deform(&mut self, key: DeformKey) {
        *self.deform_refs.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn release_deform(&mut self, key: DeformKey) {
        if let Some(count) = self.deform_refs.get_mut(&key) {
            *count -= 1;
            if *count <= 0 {
                self.deform_refs.remove(&key);
                self.deforms.remove(&key);
            }
        }
    }

    pub(crate) fn deform_ref_count(&self, key: DeformKey) -> i32 {
        self.deform_refs.get(&key).copied().unwrap_or(0)
    }

    pub(crate) fn drop_deform_buffer(&mut self, key: DeformKey) {
        self.deforms.remove(&key);
    }

    /// Reset all mutable state to the definition's setup values.
    pub fn set_to_setup_pose(&mut self) {
        for (state, data) in self.bones.iter_mut().zip(&self.definition.bones) {
            state.assign(data);
        }
        set_default_draw_order(self.definition.slots.len(), &mut self.draw_order);
        for (state, data) in self.ik.iter_mut().zip(&self.definition.ik) {
            state.assign(data);
        }
        for (state, data) in self.paths.iter_mut().zip(&self.definition.paths) {
            state.assign(data);
        }
        for (state, data) in self.slots.iter_mut().zip(&self.definition.slots) {
            state.assign(data);
        }
        for (state, data) in self.transforms.iter_mut().zip(&self.definition.transforms) {
            state.assign(data);
        }
    }

    /// Fold the frame cache's accumulated deltas onto the instance state and
    /// reset the cache.
    pub fn apply_cache(&mut self) {
        let definition = Arc::clone(&self.definition);
        let slot_data = &definition.slots;

        // Draw order.
        if self.cache.draw_order.is_empty() {
            set_default_draw_order(slot_data.len(), &mut self.draw_order);
        } else {
            self.draw_order.clear();
            self.draw_order.extend_from_slice(&self.cache.draw_order);
        }

        // Attachments: the highest-alpha cluster wins; every other slot is
        // restored to its setup attachment.
        if !self.cache.attachments.is_empty() {
            self.cache
                .attachments
                .sort_by(|a, b| a.alpha.total_cmp(&b.alpha).then(a.slot.cmp(&b.slot)));

            let size = self.cache.attachments.len();
            let mut start = size - 1;
            while start > 0 {
                if self.cache.attachments[start - 1].alpha < self.cache.attachments[start].alpha {
                    break;
                }
                start -= 1;
            }

            for i in start..size {
                let entry = self.cache.attachments[i];
                self.slots[entry.slot as usize].attachment = entry.attachment;
                self.cache.slot_scratch.insert(entry.slot);
            }
        }
        for (i, (slot, data)) in self.slots.iter_mut().zip(slot_data).enumerate() {
            if self.cache.slot_scratch.contains(&(i as i16)) {
                continue;
            }
            slot.attachment = data.attachment_id;
        }

        // Color.
        for (i, (slot, data)) in self.slots.iter_mut().zip(slot_data).enumerate() {
            match self.cache.color.get(&(i as i16)) {
                None => slot.color = data.color,
                Some(v) => {
                    slot.color = Color32 {
                        r: add_channel(data.color.r, v[0]),
                        g: add_channel(data.color.g, v[1]),
                        b: add_channel(data.color.b, v[2]),
                        a: add_channel(data.color.a, v[3]),
                    };
                }
            }
            match self.cache.two_color.get(&(i as i16)) {
                None => slot.dark_color = data.dark_color,
                Some(entry) => {
                    slot.color = Color32 {
                        r: add_channel(data.color.r, entry.light[0]),
                        g: add_channel(data.color.g, entry.light[1]),
                        b: add_channel(data.color.b, entry.light[2]),
                        a: add_channel(data.color.a, entry.light[3]),
                    };
                    slot.dark_color = Color32 {
                        r: add_channel(data.dark_color.r, entry.dark[0]),
                        g: add_channel(data.dark_color.g, entry.dark[1]),
                        b: add_channel(data.dark_color.b, entry.dark[2]),
                        a: data.dark_color.a,
                    };
                }
            }
        }

        // Ik.
        for (i, (state, data)) in self.ik.iter_mut().zip(&definition.ik).enumerate() {
            match self.cache.ik.get(&(i as i16)) {
                None => {
                    state.mix = data.mix;
                    state.softness = data.softness;
                    state.bend_positive = data.bend_positive;
                    state.compress = data.compress;
                    state.stretch = data.stretch;
                }
                Some(e) => {
                    state.mix = data.mix + e.mix;
                    state.softness = data.softness + e.softness;
                    state.bend_positive = float_to_bool(data.bend_positive, e.bend_positive);
                    state.compress = float_to_bool(data.compress, e.compress);
                    state.stretch = float_to_bool(data.stretch, e.stretch);
                }
            }
        }

        // Path.
        for (i, (state, data)) in self.paths.iter_mut().zip(&definition.paths).enumerate() {
            match self.cache.path_mix.get(&(i as i16)) {
                None => {
                    state.position_mix = data.position_mix;
                    state.rotation_mix = data.rotation_mix;
                }
                Some(v) => {
                    state.position_mix = data.position_mix + v[0];
                    state.rotation_mix = data.rotation_mix + v[1];
                }
            }
            match self.cache.path_position.get(&(i as i16)) {
                None => state.position = data.position,
                Some(f) => state.position = data.position + f,
            }
            match self.cache.path_spacing.get(&(i as i16)) {
                None => state.spacing = data.spacing,
                Some(f) => state.spacing = data.spacing + f,
            }
        }

        // Transforms.
        for (i, (state, data)) in self
            .transforms
            .iter_mut()
            .zip(&definition.transforms)
            .enumerate()
        {
            match self.cache.transform.get(&(i as i16)) {
                None => {
                    state.position_mix = data.position_mix;
                    state.rotation_mix = data.rotation_mix;
                    state.scale_mix = data.scale_mix;
                    state.shear_mix = data.shear_mix;
                }
                Some(v) => {
                    state.position_mix = data.position_mix + v[0];
                    state.rotation_mix = data.rotation_mix + v[1];
                    state.scale_mix = data.scale_mix + v[2];
                    state.shear_mix = data.shear_mix + v[3];
                }
            }
        }

        // Bone transforms.
        for (i, (state, data)) in self.bones.iter_mut().zip(&definition.bones).enumerate() {
            match self.cache.position.get(&(i as i16)) {
                None => {
                    state.x = data.x;
                    state.y = data.y;
                }
                Some(v) => {
                    state.x = data.x + v[0];
                    state.y = data.y + v[1];
                }
            }
            match self.cache.rotation.get(&(i as i16)) {
                None => state.rotation = data.rotation,
                Some(f) => state.rotation = clamp_degrees(data.rotation + f),
            }
            match self.cache.scale.get(&(i as i16)) {
                None => {
                    state.scale_x = data.scale_x;
                    state.scale_y = data.scale_y;
                }
                Some(v) => {
                    let base_alpha = 1.0 - v[2].clamp(0.0, 1.0);
                    state.scale_x = data.scale_x * v[0] + data.scale_x * base_alpha;
                    state.scale_y = data.scale_y * v[1] + data.scale_y * base_alpha;
                }
            }
            match self.cache.shear.get(&(i as i16)) {
                None => {
                    state.shear_x = data.shear_x;
                    state.shear_y = data.shear_y;
                }
                Some(v) => {
                    state.shear_x = data.shear_x + v[0];
                    state.shear_y = data.shear_y + v[1];
                }
            }
        }

        self.cache.clear();
    }

    /// Walk the definition's pose-task list and rebuild the skinning palette.
    /// The root bone is always posed first as a special case; the scheduler
    /// never emits a task for it.
    pub fn pose_skinning_palette(&mut self) {
        if self.skinning_palette.is_empty() {
            return;
        }

        self.skinning_palette[0] = self.bones[0].to_transform();

        let definition = Arc::clone(&self.definition);
        for task in &definition.pose_tasks {
            match task.kind {
                PoseTaskKind::Bone => self.pose_bone(task.index),
                PoseTaskKind::Ik => self.pose_ik(task.index),
                PoseTaskKind::Path => self.pose_path_constraint(task.index),
                PoseTaskKind::Transform => self.pose_transform_constraint(task.index),
            }
        }
    }

    fn pose_bone(&mut self, bone: i16) {
        let state = self.bones[bone as usize];
        self.pose_bone_with(
            bone,
            state.x,
            state.y,
            state.rotation,
            state.scale_x,
            state.scale_y,
            state.shear_x,
            state.shear_y,
        );
    }

    /// Compute one bone's world matrix from explicit local values, honoring
    /// the bone's transform mode.
    #[allow(clippy::too_many_arguments)]
    fn pose_bone_with(
        &mut self,
        bone: i16,
        x: f32,
        y: f32,
        rotation: f32,
        scale_x: f32,
        scale_y: f32,
        shear_x: f32,
        shear_y: f32,
    ) {
        let data = &self.definition.bones[bone as usize];
        let parent = if data.parent >= 0 {
            self.skinning_palette[data.parent as usize]
        } else {
            Mat2x3::IDENTITY
        };

        let out = match data.transform_mode {
            TransformMode::Normal => {
                let local =
                    BoneState::local_transform(x, y, rotation, scale_x, scale_y, shear_x, shear_y);
                parent * local
            }
            TransformMode::OnlyTranslation => {
                let mut local =
                    BoneState::local_transform(x, y, rotation, scale_x, scale_y, shear_x, shear_y);
                let (tx, ty) = parent.transform(local.tx, local.ty);
                local.tx = tx;
                local.ty = ty;
                local
            }
            TransformMode::NoRotationOrReflection => {
                // Strip rotation and reflection from the parent basis before
                // composing.
                let mut pa = parent.a;
                let mut pb;
                let mut pc = parent.c;
                let pd;
                let mut r_deg;

                let s = pa * pa + pc * pc;
                if s > 1.0e-4 {
                    let s = (parent.a * parent.d - parent.b * parent.c).abs() / s;
                    pb = pc * s;
                    pd = pa * s;
                    r_deg = pc.atan2(pa).to_degrees();
                } else {
                    pa = 0.0;
                    pc = 0.0;
                    pb = parent.b;
                    pd = parent.d;
                    r_deg = 90.0 - parent.d.atan2(parent.b).to_degrees();
                }
                pb = -pb;

                let rx = (rotation + shear_x - r_deg).to_radians();
                let ry = (rotation + shear_y - r_deg + 90.0).to_radians();
                let la = rx.cos() * scale_x;
                let lb = ry.cos() * scale_y;
                let lc = rx.sin() * scale_x;
                let ld = ry.sin() * scale_y;

                let (tx, ty) = parent.transform(x, y);
                Mat2x3 {
                    a: pa * la + pb * lc,
                    b: pa * lb + pb * ld,
                    c: pc * la + pd * lc,
                    d: pc * lb + pd * ld,
                    tx,
                    ty,
                }
            }
            TransformMode::NoScale | TransformMode::NoScaleOrReflection => {
                // Normalize the parent basis to unit scale before composing.
                let rot = rotation.to_radians();
                let (sin, cos) = rot.sin_cos();
                let mut za = parent.a * cos + parent.b * sin;
                let mut zc = parent.c * cos + parent.d * sin;

                let mut s = (za * za + zc * zc).sqrt();
                if s > 1.0e-4 {
                    s = 1.0 / s;
                }
                za *= s;
                zc *= s;
                let s = (za * za + zc * zc).sqrt();

                let r = std::f32::consts::FRAC_PI_2 + zc.atan2(za);
                let zb = r.cos() * s;
                let zd = r.sin() * s;

                let rx = shear_x.to_radians();
                let ry = (shear_y + 90.0).to_radians();
                let la = rx.cos() * scale_x;
                let lb = ry.cos() * scale_y;
                let lc = rx.sin() * scale_x;
                let ld = ry.sin() * scale_y;

                let (tx, ty) = parent.transform(x, y);
                let mut out = Mat2x3 {
                    a: za * la + zb * lc,
                    b: za * lb + zb * ld,
                    c: zc * la + zd * lc,
                    d: zc * lb + zd * ld,
                    tx,
                    ty,
                };

                if data.transform_mode == TransformMode::NoScale && parent.det() < 0.0 {
                    out.b = -out.b;
                    out.d = -out.d;
                }
                out
            }
        };

        self.skinning_palette[bone as usize] = out;
    }

    fn pose_ik(&mut self, ik: i16) {
        let definition = Arc::clone(&self.definition);
        let data = &definition.ik[ik as usize];
        let state = self.ik[ik as usize];
        let target = self.skinning_palette[data.target as usize];
        let target_pos = (target.tx, target.ty);

        match data.bones.as_slice() {
            &[bone] => self.pose_ik_one(
                bone,
                target_pos,
                state.mix,
                state.compress,
                state.stretch,
                state.uniform,
            ),
            &[parent, child] => self.pose_ik_two(
                parent,
                child,
                target_pos,
                state.mix,
                if state.bend_positive { 1.0 } else { -1.0 },
                state.stretch,
                state.softness,
            ),
            bones => {
                log::warn!(
                    "ik constraint '{}' drives {} bones, skipped",
                    data.id,
                    bones.len()
                );
            }
        }
    }

    /// 1-bone IK: rotate `bone` toward the target in its parent's space,
    /// optionally compressing or stretching to reach.
    fn pose_ik_one(
        &mut self,
        bone: i16,
        target: (f32, f32),
        alpha: f32,
        compress: bool,
        stretch: bool,
        uniform: bool,
    ) {
        let data = &self.definition.bones[bone as usize];
        let state = self.bones[bone as usize];
        let pp = if data.parent >= 0 {
            self.skinning_palette[data.parent as usize]
        } else {
            Mat2x3::IDENTITY
        };

        let mut rotation_ik = -state.shear_x - state.rotation;
        let (mut tx, mut ty);
        {
            let pa = pp.a;
            let mut pb = pp.b;
            let pc = pp.c;
            let mut pd = pp.d;
            match data.transform_mode {
                TransformMode::OnlyTranslation => {
                    tx = target.0 - pp.tx;
                    ty = target.1 - pp.ty;
                }
                TransformMode::NoRotationOrReflection => {
                    rotation_ik += pc.atan2(pa).to_degrees();
                    let ps = (pa * pd - pb * pc).abs() / (pa * pa + pc * pc).max(1.0e-4);
                    pb = -pc * ps;
                    pd = pa * ps;

                    let x = target.0 - pp.tx;
                    let y = target.1 - pp.ty;
                    let det = pa * pd - pb * pc;
                    let id = if det.abs() <= DET_EPSILON {
                        0.0
                    } else {
                        1.0 / det
                    };
                    tx = (x * pd - y * pb) * id - state.x;
                    ty = (y * pa - x * pc) * id - state.y;
                }
                _ => {
                    let x = target.0 - pp.tx;
                    let y = target.1 - pp.ty;
                    let det = pa * pd - pb * pc;
                    let id = if det.abs() <= DET_EPSILON {
                        0.0
                    } else {
                        1.0 / det
                    };
                    tx = (x * pd - y * pb) * id - state.x;
                    ty = (y * pa - x * pc) * id - state.y;
                }
            }
        }

        rotation_ik += ty.atan2(tx).to_degrees();
        if state.scale_x < 0.0 {
            rotation_ik += 180.0;
        }
        rotation_ik = clamp_degrees(rotation_ik);

        let mut scale_x = state.scale_x;
        let mut scale_y = state.scale_y;
        if compress || stretch {
            if matches!(
                data.transform_mode,
                TransformMode::NoScale | TransformMode::NoScaleOrReflection
            ) {
                tx = target.0 - pp.tx;
                ty = target.1 - pp.ty;
            }
            let b = data.length * scale_x;
            let dd = (tx * tx + ty * ty).sqrt();
            if (compress && dd < b) || (stretch && dd > b && b > 0.0001) {
                let s = (dd / b - 1.0) * alpha + 1.0;
                scale_x *= s;
                if uniform {
                    scale_y *= s;
                }
            }
        }

        self.pose_bone_with(
            bone,
            state.x,
            state.y,
            state.rotation + rotation_ik * alpha,
            scale_x,
            scale_y,
            state.shear_x,
            state.shear_y,
        );
    }

    /// 2-bone IK: closed-form reach solution with softness smoothing near
    /// full extension.
    #[allow(clippy::too_many_arguments)]
    fn pose_ik_two(
        &mut self,
        parent: i16,
        child: i16,
        target: (f32, f32),
        alpha: f32,
        bend_direction: f32,
        stretch: bool,
        mut softness: f32,
    ) {
        use std::f32::consts::PI;

        if alpha == 0.0 {
            self.pose_bone(child);
            return;
        }

        let data_child = &self.definition.bones[child as usize];
        let data_parent = &self.definition.bones[parent as usize];
        let state_child = self.bones[child as usize];
        let state_parent = self.bones[parent as usize];
        let mp = self.skinning_palette[parent as usize];

        let px = state_parent.x;
        let py = state_parent.y;
        let mut psx = state_parent.scale_x;
        let mut sx = psx;
        let mut psy = state_parent.scale_y;
        let mut csx = state_child.scale_x;

        let os1: f32;
        let mut s2: f32;
        if psx < 0.0 {
            psx = -psx;
            os1 = 180.0;
            s2 = -1.0;
        } else {
            os1 = 0.0;
            s2 = 1.0;
        }
        if psy < 0.0 {
            psy = -psy;
            s2 = -s2;
        }
        let os2: f32 = if csx < 0.0 {
            csx = -csx;
            180.0
        } else {
            0.0
        };

        let cx = state_child.x;
        let cy;
        let cwx;
        let cwy;
        let mut a = mp.a;
        let mut b = mp.b;
        let mut c = mp.c;
        let mut d = mp.d;

        let u = (psx - psy).abs() <= 0.0001;
        if !u {
            cy = 0.0;
            cwx = a * cx + mp.tx;
            cwy = c * cx + mp.ty;
        } else {
            cy = state_child.y;
            cwx = a * cx + b * cy + mp.tx;
            cwy = c * cx + d * cy + mp.ty;
        }

        let mpp = if data_parent.parent >= 0 {
            self.skinning_palette[data_parent.parent as usize]
        } else {
            Mat2x3::IDENTITY
        };
        a = mpp.a;
        b = mpp.b;
        c = mpp.c;
        d = mpp.d;
        let cross = a * d - b * c;
        let id = if cross.abs() <= DET_EPSILON {
            0.0
        } else {
            1.0 / cross
        };
        let mut x = cwx - mpp.tx;
        let mut y = cwy - mpp.ty;
        let dx = (x * d - y * b) * id - px;
        let dy = (y * a - x * c) * id - py;
        let l1 = (dx * dx + dy * dy).sqrt();
        let mut l2 = data_child.length * csx;
        if l1 < 0.0001 {
            self.pose_ik_one(parent, target, alpha, false, stretch, false);
            self.pose_bone_with(
                child,
                cx,
                cy,
                0.0,
                state_child.scale_x,
                state_child.scale_y,
                state_child.shear_x,
                state_child.shear_y,
            );
            return;
        }

        x = target.0 - mpp.tx;
        y = target.1 - mpp.ty;
        let mut tx = (x * d - y * b) * id - px;
        let mut ty = (y * a - x * c) * id - py;
        let mut dd = tx * tx + ty * ty;
        if softness != 0.0 {
            softness *= psx * (csx + 1.0) / 2.0;
            let td = dd.sqrt();
            let sd = td - l1 - l2 * psx + softness;
            if sd > 0.0 {
                let mut p = (sd / (softness * 2.0)).min(1.0) - 1.0;
                p = (sd - softness * (1.0 - p * p)) / td;
                tx -= p * tx;
                ty -= p * ty;
                dd = tx * tx + ty * ty;
            }
        }

        let mut a1: f32;
        let a2: f32;
        if u {
            l2 *= psx;
            let mut cos = (dd - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
            if cos < -1.0 {
                cos = -1.0;
            } else if cos > 1.0 {
                cos = 1.0;
                if stretch {
                    sx *= (dd.sqrt() / (l1 + l2) - 1.0) * alpha + 1.0;
                }
            }
            a2 = cos.acos() * bend_direction;
            a = l1 + l2 * cos;
            b = l2 * a2.sin();
            a1 = (ty * a - tx * b).atan2(tx * a + ty * b);
        } else {
            'solved: {
                a = psx * l2;
                b = psy * l2;
                let aa = a * a;
                let bb = b * b;
                let ta = ty.atan2(tx);
                c = bb * l1 * l1 + aa * dd - aa * bb;
                let c1 = -2.0 * bb * l1;
                let c2 = bb - aa;
                d = c1 * c1 - 4.0 * c2 * c;
                if d >= 0.0 {
                    let mut q = d.sqrt();
                    if c1 < 0.0 {
                        q = -q;
                    }
                    q = -(c1 + q) / 2.0;
                    let r0 = q / c2;
                    let r1 = c / q;
                    let r = if r0.abs() < r1.abs() { r0 } else { r1 };
                    if r * r <= dd {
                        y = (dd - r * r).sqrt() * bend_direction;
                        a1 = ta - y.atan2(r);
                        a2 = (y / psy).atan2((r - l1) / psx);
                        break 'solved;
                    }
                }

                // No valid root: pick the nearest or furthest reachable
                // configuration.
                let mut min_angle = PI;
                let mut min_x = l1 - a;
                let mut min_dist = min_x * min_x;
                let mut min_y = 0.0;
                let mut max_angle = 0.0;
                let mut max_x = l1 + a;
                let mut max_dist = max_x * max_x;
                let mut max_y = 0.0;

                c = -a * l1 / (aa - bb);
                if (-1.0..=1.0).contains(&c) {
                    c = c.acos();
                    x = a * c.cos() + l1;
                    y = b * c.sin();
                    d = x * x + y * y;
                    if d < min_dist {
                        min_angle = c;
                        min_dist = d;
                        min_x = x;
                        min_y = y;
                    }
                    if d > max_dist {
                        max_angle = c;
                        max_dist = d;
                        max_x = x;
                        max_y = y;
                    }
                }

                if dd <= (min_dist + max_dist) / 2.0 {
                    a1 = ta - (min_y * bend_direction).atan2(min_x);
                    a2 = min_angle * bend_direction;
                } else {
                    a1 = ta - (max_y * bend_direction).atan2(max_x);
                    a2 = max_angle * bend_direction;
                }
            }
        }

        let os = cy.atan2(cx) * s2;
        let rotation = state_parent.rotation;
        a1 = clamp_degrees((a1 - os).to_degrees() + os1 - rotation);
        self.pose_bone_with(
            parent,
            px,
            py,
            rotation + a1 * alpha,
            sx,
            state_parent.scale_y,
            0.0,
            0.0,
        );

        let rotation = state_child.rotation;
        let a2 = clamp_degrees(((a2 + os).to_degrees() - state_child.shear_x) * s2 + os2 - rotation);
        self.pose_bone_with(
            child,
            cx,
            cy,
            rotation + a2 * alpha,
            state_child.scale_x,
            state_child.scale_y,
            state_child.shear_x,
            state_child.shear_y,
        );
    }

    /// Active path attachment of the target slot; always resolved through
    /// the default skin.
    fn find_path_attachment<'a>(
        definition: &'a Definition,
        slots: &[SlotState],
        target: i16,
    ) -> Option<&'a PathAttachment> {
        let slot_data = &definition.slots[target as usize];
        let attachment_id = slots[target as usize].attachment;
        if attachment_id.is_empty() {
            return None;
        }

        let default_skin = NameId::new(DEFAULT_SKIN);
        match definition.attachment(default_skin, slot_data.id, attachment_id) {
            Some(Attachment::Path(path)) => Some(path),
            _ => None,
        }
    }

    fn pose_path_constraint(&mut self, path: i16) {
        let definition = Arc::clone(&self.definition);
        let data = &definition.paths[path as usize];

        let position_mix = self.paths[path as usize].position_mix;
        let rotation_mix = self.paths[path as usize].rotation_mix;
        let translate = position_mix > 0.0;
        let rotate = rotation_mix > 0.0;
        if !translate && !rotate {
            return;
        }

        let Some(attachment) = Self::find_path_attachment(&definition, &self.slots, data.target)
        else {
            log::warn!(
                "path constraint '{}' has no active path attachment, skipped",
                data.id
            );
            return;
        };

        let percent_spacing = data.spacing_mode == PathSpacingMode::Percent;
        let tangents = data.rotation_mode == PathRotationMode::Tangent;
        let scale = data.rotation_mode == PathRotationMode::ChainScale;
        let bone_count = data.bones.len();
        let spaces_count = if tangents { bone_count } else { bone_count + 1 };

        let mut scratch = std::mem::take(&mut self.paths[path as usize].scratch);
        let spacing = self.paths[path as usize].spacing;
        let position = self.paths[path as usize].position;

        scratch.spaces.clear();
        scratch.spaces.resize(spaces_count, 0.0);
        if scale {
            scratch.lengths.clear();
            scratch.lengths.resize(bone_count, 0.0);
        }

        if scale || !percent_spacing {
            let length_spacing = data.spacing_mode == PathSpacingMode::Length;
            let mut bone = 0usize;
            let n = spaces_count - 1;
            while bone < n {
                let i = data.bones[bone] as usize;
                let setup_length = definition.bones[i].length;
                if setup_length < PATH_EPSILON {
                    if scale {
                        scratch.lengths[bone] = 0.0;
                    }
                    bone += 1;
                    scratch.spaces[bone] = 0.0;
                    continue;
                }
                let m = &self.skinning_palette[i];
                let x = setup_length * m.a;
                let y = setup_length * m.c;
                let length = (x * x + y * y).sqrt();
                if scale {
                    scratch.lengths[bone] = length;
                }
                bone += 1;
                scratch.spaces[bone] = if percent_spacing {
                    spacing
                } else {
                    (if length_spacing {
                        setup_length + spacing
                    } else {
                        spacing
                    }) * length
                        / setup_length
                };
            }
        } else {
            for space in scratch.spaces.iter_mut().skip(1) {
                *space = spacing;
            }
        }

        compute_path_positions(
            &definition,
            &self.skinning_palette,
            &self.deforms,
            data,
            attachment,
            &mut scratch,
            position,
            spaces_count,
            tangents,
            data.position_mode == PathPositionMode::Percent,
            percent_spacing,
        );

        let positions = std::mem::take(&mut scratch.positions);
        let lengths = std::mem::take(&mut scratch.lengths);

        let mut bone_x = positions[0];
        let mut bone_y = positions[1];
        let offset_rotation = data.rotation;
        let tip = data.rotation_mode == PathRotationMode::Chain && offset_rotation == 0.0;

        let mut p = 3usize;
        for bone in 0..bone_count {
            let i = data.bones[bone] as usize;
            let data_bone_length = definition.bones[i].length;
            {
                let m = &mut self.skinning_palette[i];
                m.tx += (bone_x - m.tx) * position_mix;
                m.ty += (bone_y - m.ty) * position_mix;
            }

            let x = positions[p];
            let y = positions[p + 1];
            let dx = x - bone_x;
            let dy = y - bone_y;

            if scale {
                let length = lengths[bone];
                if length >= PATH_EPSILON {
                    let s = ((dx * dx + dy * dy).sqrt() / length - 1.0) * rotation_mix + 1.0;
                    let m = &mut self.skinning_palette[i];
                    m.a *= s;
                    m.c *= s;
                }
            }

            bone_x = x;
            bone_y = y;

            if rotate {
                let (a, b, c, d) = {
                    let m = &self.skinning_palette[i];
                    (m.a, m.b, m.c, m.d)
                };
                let mut r = if tangents {
                    positions[p - 1]
                } else if scratch.spaces[bone + 1] < PATH_EPSILON {
                    positions[p + 2]
                } else {
                    dy.atan2(dx)
                };
                r -= c.atan2(a) - offset_rotation.to_radians();

                let cos;
                let sin;
                if tip {
                    cos = r.cos();
                    sin = r.sin();
                    bone_x += (data_bone_length * (cos * a - sin * c) - dx) * rotation_mix;
                    bone_y += (data_bone_length * (sin * a + cos * c) - dy) * rotation_mix;
                }

                let r = clamp_radians(r) * rotation_mix;
                let cos = r.cos();
                let sin = r.sin();
                let m = &mut self.skinning_palette[i];
                m.a = cos * a - sin * c;
                m.b = cos * b - sin * d;
                m.c = sin * a + cos * c;
                m.d = sin * b + cos * d;
            }

            p += 3;
        }

        scratch.positions = positions;
        scratch.lengths = lengths;
        self.paths[path as usize].scratch = scratch;
    }

    fn pose_transform_constraint(&mut self, transform: i16) {
        let data = &self.definition.transforms[transform as usize];
        match (data.local, data.relative) {
            (true, true) => self.pose_transform_relative_local(transform),
            (true, false) => self.pose_transform_absolute_local(transform),
            (false, true) => self.pose_transform_relative_world(transform),
            (false, false) => self.pose_transform_absolute_world(transform),
        }
    }

    fn pose_transform_absolute_world(&mut self, transform: i16) {
        let definition = Arc::clone(&self.definition);
        let data = &definition.transforms[transform as usize];
        let state = self.transforms[transform as usize];

        let target = self.skinning_palette[data.target as usize];

        let mut offset_rotation = data.delta_rotation.to_radians();
        let mut offset_shear = data.delta_shear_y.to_radians();
        // Invert rotation and shear offsets when the target basis is mirrored.
        if target.det() <= 0.0 {
            offset_rotation = -offset_rotation;
            offset_shear = -offset_shear;
        }

        for &bone in &data.bones {
            let m = &mut self.skinning_palette[bone as usize];

            if state.rotation_mix > 0.0 {
                let r = state.rotation_mix
                    * clamp_radians(
                        target.c.atan2(target.a) - m.c.atan2(m.a) + offset_rotation,
                    );
                let (sin, cos) = r.sin_cos();
                let (a, b, c, d) = (m.a, m.b, m.c, m.d);
                m.a = cos * a - sin * c;
                m.b = cos * b - sin * d;
                m.c = sin * a + cos * c;
                m.d = sin * b + cos * d;
            }

            if state.position_mix > 0.0 {
                let (tx, ty) = target.transform(data.delta_x, data.delta_y);
                m.tx += (tx - m.tx) * state.position_mix;
                m.ty += (ty - m.ty) * state.position_mix;
            }

            if state.scale_mix > 0.0 {
                let bone_scale_x = (m.a * m.a + m.c * m.c).sqrt();
                let target_scale_x = (target.a * target.a + target.c * target.c).sqrt();
                let sx = if bone_scale_x.abs() <= DET_EPSILON {
                    0.0
                } else {
                    (bone_scale_x
                        + (target_scale_x - bone_scale_x + data.delta_scale_x) * state.scale_mix)
                        / bone_scale_x
                };
                let bone_scale_y = (m.b * m.b + m.d * m.d).sqrt();
                let target_scale_y = (target.b * target.b + target.d * target.d).sqrt();
                let sy = if bone_scale_y.abs() <= DET_EPSILON {
                    0.0
                } else {
                    (bone_scale_y
                        + (target_scale_y - bone_scale_y + data.delta_scale_y) * state.scale_mix)
                        / bone_scale_y
                };
                m.a *= sx;
                m.c *= sx;
                m.b *= sy;
                m.d *= sy;
            }

            if state.shear_mix > 0.0 {
                let by = m.d.atan2(m.b);
                let r = clamp_radians(
                    target.d.atan2(target.b) - target.c.atan2(target.a) - (by - m.c.atan2(m.a)),
                );
                let s = (m.b * m.b + m.d * m.d).sqrt();
                let rotation = by + (r + offset_shear) * state.shear_mix;
                m.b = rotation.cos() * s;
                m.d = rotation.sin() * s;
            }
        }
    }

    fn pose_transform_relative_world(&mut self, transform: i16) {
        let definition = Arc::clone(&self.definition);
        let data = &definition.transforms[transform as usize];
        let state = self.transforms[transform as usize];

        let target = self.skinning_palette[data.target as usize];

        let mut offset_rotation = data.delta_rotation.to_radians();
        let mut offset_shear = data.delta_shear_y.to_radians();
        if target.det() <= 0.0 {
            offset_rotation = -offset_rotation;
            offset_shear = -offset_shear;
        }

        for &bone in &data.bones {
            let m = &mut self.skinning_palette[bone as usize];

            if state.rotation_mix > 0.0 {
                let r = state.rotation_mix
                    * clamp_radians(target.c.atan2(target.a) + offset_rotation);
                let (sin, cos) = r.sin_cos();
                let (a, b, c, d) = (m.a, m.b, m.c, m.d);
                m.a = cos * a - sin * c;
                m.b = cos * b - sin * d;
                m.c = sin * a + cos * c;
                m.d = sin * b + cos * d;
            }

            if state.position_mix > 0.0 {
                let (tx, ty) = target.transform(data.delta_x, data.delta_y);
                m.tx += tx * state.position_mix;
                m.ty += ty * state.position_mix;
            }

            if state.scale_mix > 0.0 {
                let target_scale_x = (target.a * target.a + target.c * target.c).sqrt();
                let sx = 1.0 + (target_scale_x - 1.0 + data.delta_scale_x) * state.scale_mix;
                let target_scale_y = (target.b * target.b + target.d * target.d).sqrt();
                let sy = 1.0 + (target_scale_y - 1.0 + data.delta_scale_y) * state.scale_mix;
                m.a *= sx;
                m.c *= sx;
                m.b *= sy;
                m.d *= sy;
            }

            if state.shear_mix > 0.0 {
                let by = m.d.atan2(m.b);
                let r = clamp_radians(target.d.atan2(target.b) - target.c.atan2(target.a));
                let s = (m.b * m.b + m.d * m.d).sqrt();
                let rotation =
                    by + (r - std::f32::consts::FRAC_PI_2 + offset_shear) * state.shear_mix;
                m.b = rotation.cos() * s;
                m.d = rotation.sin() * s;
            }
        }
    }

    fn pose_transform_absolute_local(&mut self, transform: i16) {
        let definition = Arc::clone(&self.definition);
        let data = &definition.transforms[transform as usize];
        let state = self.transforms[transform as usize];

        let target = self.bones[data.target as usize];

        for &bone in &data.bones {
            let bone_state = self.bones[bone as usize];

            let mut rotation = bone_state.rotation;
            if state.rotation_mix != 0.0 {
                let r = target.rotation - rotation + data.delta_rotation;
                rotation += r * state.rotation_mix;
            }

            let mut x = bone_state.x;
            let mut y = bone_state.y;
            if state.position_mix != 0.0 {
                x += (target.x - x + data.delta_x) * state.position_mix;
                y += (target.y - y + data.delta_y) * state.position_mix;
            }

            let mut scale_x = bone_state.scale_x;
            let mut scale_y = bone_state.scale_y;
            if state.scale_mix != 0.0 {
                if scale_x != 0.0 {
                    scale_x = (scale_x
                        + (target.scale_x - scale_x + data.delta_scale_x) * state.scale_mix)
                        / scale_x;
                }
                if scale_y != 0.0 {
                    scale_y = (scale_y
                        + (target.scale_y - scale_y + data.delta_scale_y) * state.scale_mix)
                        / scale_y;
                }
            }

            let mut shear_y = bone_state.shear_y;
            if state.shear_mix != 0.0 {
                let r = target.shear_y - shear_y + data.delta_shear_y;
                shear_y += r * state.shear_mix;
            }

            self.pose_bone_with(
                bone,
                x,
                y,
                rotation,
                scale_x,
                scale_y,
                bone_state.shear_x,
                shear_y,
            );
        }
    }

    fn pose_transform_relative_local(&mut self, transform: i16) {
        let definition = Arc::clone(&self.definition);
        let data = &definition.transforms[transform as usize];
        let state = self.transforms[transform as usize];

        let target = self.bones[data.target as usize];

        for &bone in &data.bones {
            let bone_state = self.bones[bone as usize];

            let mut rotation = bone_state.rotation;
            if state.rotation_mix != 0.0 {
                rotation += (target.rotation + data.delta_rotation) * state.rotation_mix;
            }

            let mut x = bone_state.x;
            let mut y = bone_state.y;
            if state.position_mix != 0.0 {
                x += (target.x + data.delta_x) * state.position_mix;
                y += (target.y + data.delta_y) * state.position_mix;
            }

            let mut scale_x = bone_state.scale_x;
            let mut scale_y = bone_state.scale_y;
            if state.scale_mix != 0.0 {
                scale_x *= (target.scale_x - 1.0 + data.delta_scale_x) * state.scale_mix + 1.0;
                scale_y *= (target.scale_y - 1.0 + data.delta_scale_y) * state.scale_mix + 1.0;
            }

            let mut shear_y = bone_state.shear_y;
            if state.shear_mix != 0.0 {
                shear_y += (target.shear_y + data.delta_shear_y) * state.shear_mix;
            }

            self.pose_bone_with(
                bone,
                x,
                y,
                rotation,
                scale_x,
                scale_y,
                bone_state.shear_x,
                shear_y,
            );
        }
    }
}

fn add_channel(base: u8, delta: f32) -> u8 {
    (base as f32 + delta + 0.5).clamp(0.0, 255.0) as u8
}

// ---------------------------------------------------------------------------
// Path world-curve sampling.

fn add_before_position(p: f32, temp: &[f32], i: usize, out: &mut [f32], o: usize) {
    let x1 = temp[i];
    let y1 = temp[i + 1];
    let dx = temp[i + 2] - x1;
    let dy = temp[i + 3] - y1;
    let r = dy.atan2(dx);
    out[o] = x1 + p * r.cos();
    out[o + 1] = y1 + p * r.sin();
    out[o + 2] = r;
}

fn add_after_position(p: f32, temp: &[f32], i: usize, out: &mut [f32], o: usize) {
    let x1 = temp[i + 2];
    let y1 = temp[i + 3];
    let dx = x1 - temp[i];
    let dy = y1 - temp[i + 1];
    let r = dy.atan2(dx);
    out[o] = x1 + p * r.cos();
    out[o + 1] = y1 + p * r.sin();
    out[o + 2] = r;
}

#[allow(clippy::too_many_arguments)]
fn add_curve_position(
    p: f32,
    x1: f32,
    y1: f32,
    cx1: f32,
    cy1: f32,
    cx2: f32,
    cy2: f32,
    x2: f32,
    y2: f32,
    out: &mut [f32],
    o: usize,
    tangents: bool,
) {
    if p < PATH_EPSILON {
        out[o] = x1;
        out[o + 1] = y1;
        out[o + 2] = (cy1 - y1).atan2(cx1 - x1);
        return;
    }

    let tt = p * p;
    let ttt = tt * p;
    let u = 1.0 - p;
    let uu = u * u;
    let uuu = uu * u;
    let ut = u * p;
    let ut3 = ut * 3.0;
    let uut3 = u * ut3;
    let utt3 = ut3 * p;
    let x = x1 * uuu + cx1 * uut3 + cx2 * utt3 + x2 * ttt;
    let y = y1 * uuu + cy1 * uut3 + cy2 * utt3 + y2 * ttt;

    out[o] = x;
    out[o + 1] = y;

    if tangents {
        if p < PATH_EPSILON_LOOSE {
            out[o + 2] = (cy1 - y1).atan2(cx1 - x1);
        } else {
            out[o + 2] = (y - (y1 * uu + cy1 * ut * 2.0 + cy2 * tt))
                .atan2(x - (x1 * uu + cx1 * ut * 2.0 + cx2 * tt));
        }
    }
}

/// World-space control points of the path, with weight blending when the
/// attachment is skinned and the instance's deform buffer patched in when one
/// is active.
#[allow(clippy::too_many_arguments)]
fn transform_path_to_world(
    attachment: &PathAttachment,
    vertices: &[f32],
    palette: &[Mat2x3],
    slot_bone_world: &Mat2x3,
    start: usize,
    count: usize,
    out: &mut [f32],
    offset: usize,
) {
    let count = count + offset;
    let weights = &attachment.weights;
    let bone_counts = &attachment.bone_counts;

    if bone_counts.is_empty() {
        let mut vv = start;
        let mut w = offset;
        while w < count {
            let (x, y) = slot_bone_world.transform(vertices[vv], vertices[vv + 1]);
            out[w] = x;
            out[w + 1] = y;
            vv += 2;
            w += 2;
        }
        return;
    }

    let mut v = 0usize;
    let mut skip = 0usize;
    let mut i = 0usize;
    while i < start {
        let n = bone_counts[v] as usize;
        v += n + 1;
        skip += n;
        i += 2;
    }

    let mut w = offset;
    let mut vertex = skip * 2;
    let mut weight = skip;
    while w < count {
        let mut wx = 0.0f32;
        let mut wy = 0.0f32;
        let mut n = bone_counts[v] as usize;
        v += 1;
        n += v;
        while v < n {
            let m = &palette[bone_counts[v] as usize];
            let (x, y) = m.transform(vertices[vertex], vertices[vertex + 1]);
            let wgt = weights[weight];
            wx += x * wgt;
            wy += y * wgt;
            v += 1;
            vertex += 2;
            weight += 1;
        }
        out[w] = wx;
        out[w + 1] = wy;
        w += 2;
    }
}

/// Sample positions (and tangents) along the world-space path into
/// `scratch.positions` (`spaces_count * 3 + 2` floats).
#[allow(clippy::too_many_arguments)]
fn compute_path_positions(
    definition: &Definition,
    palette: &[Mat2x3],
    deforms: &HashMap<DeformKey, Vec<f32>>,
    data: &PathDef,
    attachment: &PathAttachment,
    scratch: &mut PathScratch,
    position: f32,
    spaces_count: usize,
    tangents: bool,
    percent_position: bool,
    percent_spacing: bool,
) {
    const NONE: i32 = -1;
    const BEFORE: i32 = -2;
    const AFTER: i32 = -3;

    let slot_bone = definition.slots[data.target as usize].bone;
    let world_matrix = &palette[slot_bone as usize];

    // An active deform buffer replaces the attachment's base control points.
    let deform_key = DeformKey {
        skin: NameId::new(DEFAULT_SKIN),
        slot: attachment.slot,
        attachment: attachment.id,
    };
    let vertices: &[f32] = match deforms.get(&deform_key) {
        Some(buffer) => buffer,
        None => &attachment.vertices,
    };

    let mut position = position;
    scratch.positions.clear();
    scratch.positions.resize(spaces_count * 3 + 2, 0.0);

    scratch.world.clear();
    let closed = attachment.closed;
    let mut vertex_components = attachment.vertex_count as usize;
    let mut curve_count = vertex_components / 6;
    let mut prev_curve = NONE;

    let mut path_length;
    if !attachment.constant_speed {
        let lengths = &attachment.lengths;
        curve_count -= if closed { 1 } else { 2 };
        path_length = lengths[curve_count];
        if percent_position {
            position *= path_length;
        }
        if percent_spacing {
            for space in scratch.spaces.iter_mut().skip(1) {
                *space *= path_length;
            }
        }

        scratch.world.resize(8, 0.0);
        let mut o = 0usize;
        let mut curve = 0usize;
        for i in 0..spaces_count {
            let space = scratch.spaces[i];
            position += space;
            let mut p = position;

            if closed {
                p %= path_length;
                if p < 0.0 {
                    p += path_length;
                }
                curve = 0;
            } else if p < 0.0 {
                if prev_curve != BEFORE {
                    prev_curve = BEFORE;
                    transform_path_to_world(
                        attachment,
                        vertices,
                        palette,
                        world_matrix,
                        2,
                        4,
                        &mut scratch.world,
                        0,
                    );
                }
                add_before_position(p, &scratch.world, 0, &mut scratch.positions, o);
                o += 3;
                continue;
            } else if p > path_length {
                if prev_curve != AFTER {
                    prev_curve = AFTER;
                    transform_path_to_world(
                        attachment,
                        vertices,
                        palette,
                        world_matrix,
                        vertex_components - 6,
                        4,
                        &mut scratch.world,
                        0,
                    );
                }
                add_after_position(p - path_length, &scratch.world, 0, &mut scratch.positions, o);
                o += 3;
                continue;
            }

            // Determine the curve containing the position.
            loop {
                let length = lengths[curve];
                if p > length {
                    curve += 1;
                    continue;
                }
                if curve == 0 {
                    p /= length;
                } else {
                    let prev = lengths[curve - 1];
                    p = (p - prev) / (length - prev);
                }
                break;
            }
            if curve as i32 != prev_curve {
                prev_curve = curve as i32;
                if closed && curve == curve_count {
                    transform_path_to_world(
                        attachment,
                        vertices,
                        palette,
                        world_matrix,
                        vertex_components - 4,
                        4,
                        &mut scratch.world,
                        0,
                    );
                    transform_path_to_world(
                        attachment,
                        vertices,
                        palette,
                        world_matrix,
                        0,
                        4,
                        &mut scratch.world,
                        4,
                    );
                } else {
                    transform_path_to_world(
                        attachment,
                        vertices,
                        palette,
                        world_matrix,
                        curve * 6 + 2,
                        8,
                        &mut scratch.world,
                        0,
                    );
                }
            }

            let w = &scratch.world;
            add_curve_position(
                p,
                w[0],
                w[1],
                w[2],
                w[3],
                w[4],
                w[5],
                w[6],
                w[7],
                &mut scratch.positions,
                o,
                tangents || (i > 0 && space < PATH_EPSILON),
            );
            o += 3;
        }
        return;
    }

    // Constant speed: sample the whole path into world space first.
    if closed {
        vertex_components += 2;
        scratch.world.resize(vertex_components, 0.0);
        transform_path_to_world(
            attachment,
            vertices,
            palette,
            world_matrix,
            2,
            vertex_components - 4,
            &mut scratch.world,
            0,
        );
        transform_path_to_world(
            attachment,
            vertices,
            palette,
            world_matrix,
            0,
            2,
            &mut scratch.world,
            vertex_components - 4,
        );
        scratch.world[vertex_components - 2] = scratch.world[0];
        scratch.world[vertex_components - 1] = scratch.world[1];
    } else {
        curve_count -= 1;
        vertex_components -= 4;
        scratch.world.resize(vertex_components, 0.0);
        transform_path_to_world(
            attachment,
            vertices,
            palette,
            world_matrix,
            2,
            vertex_components,
            &mut scratch.world,
            0,
        );
    }

    // Adaptive curve lengths by forward differencing.
    scratch.curves.clear();
    scratch.curves.resize(curve_count, 0.0);
    path_length = 0.0;
    let world = &scratch.world;
    let mut x1 = world[0];
    let mut y1 = world[1];
    let mut cx1 = 0.0;
    let mut cy1 = 0.0;
    let mut cx2 = 0.0;
    let mut cy2 = 0.0;
    let mut x2 = 0.0;
    let mut y2 = 0.0;
    let mut w = 2usize;
    for curve in scratch.curves.iter_mut() {
        cx1 = world[w];
        cy1 = world[w + 1];
        cx2 = world[w + 2];
        cy2 = world[w + 3];
        x2 = world[w + 4];
        y2 = world[w + 5];
        let tmpx = (x1 - cx1 * 2.0 + cx2) * 0.1875;
        let tmpy = (y1 - cy1 * 2.0 + cy2) * 0.1875;
        let dddfx = ((cx1 - cx2) * 3.0 - x1 + x2) * 0.09375;
        let dddfy = ((cy1 - cy2) * 3.0 - y1 + y2) * 0.09375;
        let mut ddfx = tmpx * 2.0 + dddfx;
        let mut ddfy = tmpy * 2.0 + dddfy;
        let mut dfx = (cx1 - x1) * 0.75 + tmpx + dddfx * 0.166_666_67;
        let mut dfy = (cy1 - y1) * 0.75 + tmpy + dddfy * 0.166_666_67;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        dfx += ddfx;
        dfy += ddfy;
        ddfx += dddfx;
        ddfy += dddfy;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        dfx += ddfx;
        dfy += ddfy;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        dfx += ddfx + dddfx;
        dfy += ddfy + dddfy;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        *curve = path_length;
        x1 = x2;
        y1 = y2;
        w += 6;
    }

    if percent_position {
        position *= path_length;
    } else {
        position *= path_length / attachment.lengths[curve_count - 1];
    }

    if percent_spacing {
        for space in scratch.spaces.iter_mut().skip(1) {
            *space *= path_length;
        }
    }

    let mut curve_length = 0.0f32;
    let mut o = 0usize;
    let mut curve = 0usize;
    let mut segment = 0usize;
    for i in 0..spaces_count {
        let space = scratch.spaces[i];
        position += space;
        let mut p = position;

        if closed {
            p %= path_length;
            if p < 0.0 {
                p += path_length;
            }
            curve = 0;
        } else if p < 0.0 {
            add_before_position(p, &scratch.world, 0, &mut scratch.positions, o);
            o += 3;
            continue;
        } else if p > path_length {
            add_after_position(
                p - path_length,
                &scratch.world,
                vertex_components - 4,
                &mut scratch.positions,
                o,
            );
            o += 3;
            continue;
        }

        // Determine the curve containing the position.
        loop {
            let length = scratch.curves[curve];
            if p > length {
                curve += 1;
                continue;
            }
            if curve == 0 {
                p /= length;
            } else {
                let prev = scratch.curves[curve - 1];
                p = (p - prev) / (length - prev);
            }
            break;
        }

        // Finely sample the chosen curve into 10 segments.
        if curve as i32 != prev_curve {
            prev_curve = curve as i32;
            let mut ii = curve * 6;
            let world = &scratch.world;
            x1 = world[ii];
            y1 = world[ii + 1];
            cx1 = world[ii + 2];
            cy1 = world[ii + 3];
            cx2 = world[ii + 4];
            cy2 = world[ii + 5];
            x2 = world[ii + 6];
            y2 = world[ii + 7];
            let tmpx = (x1 - cx1 * 2.0 + cx2) * 0.03;
            let tmpy = (y1 - cy1 * 2.0 + cy2) * 0.03;
            let dddfx = ((cx1 - cx2) * 3.0 - x1 + x2) * 0.006;
            let dddfy = ((cy1 - cy2) * 3.0 - y1 + y2) * 0.006;
            let mut ddfx = tmpx * 2.0 + dddfx;
            let mut ddfy = tmpy * 2.0 + dddfy;
            let mut dfx = (cx1 - x1) * 0.3 + tmpx + dddfx * 0.166_666_67;
            let mut dfy = (cy1 - y1) * 0.3 + tmpy + dddfy * 0.166_666_67;
            curve_length = (dfx * dfx + dfy * dfy).sqrt();
            scratch.segments[0] = curve_length;
            ii = 1;
            while ii < 8 {
                dfx += ddfx;
                dfy += ddfy;
                ddfx += dddfx;
                ddfy += dddfy;
                curve_length += (dfx * dfx + dfy * dfy).sqrt();
                scratch.segments[ii] = curve_length;
                ii += 1;
            }
            dfx += ddfx;
            dfy += ddfy;
            curve_length += (dfx * dfx + dfy * dfy).sqrt();
            scratch.segments[8] = curve_length;
            dfx += ddfx + dddfx;
            dfy += ddfy + dddfy;
            curve_length += (dfx * dfx + dfy * dfy).sqrt();
            scratch.segments[9] = curve_length;
            segment = 0;
        }

        // Weight by segment length.
        p *= curve_length;
        loop {
            let length = scratch.segments[segment];
            if p > length {
                segment += 1;
                continue;
            }
            if segment == 0 {
                p /= length;
            } else {
                let prev = scratch.segments[segment - 1];
                p = segment as f32 + (p - prev) / (length - prev);
            }
            break;
        }

        add_curve_position(
            p * 0.1,
            x1,
            y1,
            cx1,
            cy1,
            cx2,
            cy2,
            x2,
            y2,
            &mut scratch.positions,
            o,
            tangents || (i > 0 && space < PATH_EPSILON),
        );
        o += 3;
    }
}
