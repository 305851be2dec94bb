//! Serializable rigged-character description: skeleton and bones,
//! attachments organized into skins, constraints, events and animation
//! clips. This is read-only at runtime; instantiate a
//! [`crate::PoseInstance`] for mutable pose state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::attachment::{Attachment, AttachmentKind, DEFAULT_SKIN};
use crate::clip::{BezierCurve, Clip};
use crate::error::Error;
use crate::ids::NameId;
use crate::math::Color32;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SlotBlendMode {
    #[default]
    Alpha,
    Additive,
    Multiply,
    Screen,
}

impl SlotBlendMode {
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            SlotBlendMode::Alpha => 0,
            SlotBlendMode::Additive => 1,
            SlotBlendMode::Multiply => 2,
            SlotBlendMode::Screen => 3,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<SlotBlendMode> {
        match tag {
            0 => Some(SlotBlendMode::Alpha),
            1 => Some(SlotBlendMode::Additive),
            2 => Some(SlotBlendMode::Multiply),
            3 => Some(SlotBlendMode::Screen),
            _ => None,
        }
    }
}

/// How a bone inherits its parent's world basis.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TransformMode {
    #[default]
    Normal,
    OnlyTranslation,
    NoRotationOrReflection,
    NoScale,
    NoScaleOrReflection,
}

impl TransformMode {
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            TransformMode::Normal => 0,
            TransformMode::OnlyTranslation => 1,
            TransformMode::NoRotationOrReflection => 2,
            TransformMode::NoScale => 3,
            TransformMode::NoScaleOrReflection => 4,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<TransformMode> {
        match tag {
            0 => Some(TransformMode::Normal),
            1 => Some(TransformMode::OnlyTranslation),
            2 => Some(TransformMode::NoRotationOrReflection),
            3 => Some(TransformMode::NoScale),
            4 => Some(TransformMode::NoScaleOrReflection),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoneDef {
    pub id: NameId,
    pub parent_id: NameId,
    pub length: f32,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,
    pub transform_mode: TransformMode,
    /// Resolved parent index, -1 for the root.
    pub parent: i16,
    pub skin_required: bool,
}

impl Default for BoneDef {
    fn default() -> Self {
        BoneDef {
            id: NameId::EMPTY,
            parent_id: NameId::EMPTY,
            length: 0.0,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            shear_x: 0.0,
            shear_y: 0.0,
            transform_mode: TransformMode::Normal,
            parent: -1,
            skin_required: false,
        }
    }
}

/// Default payloads dispatched when an event key omits a field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventDef {
    pub float_value: f32,
    pub int_value: i32,
    pub string_value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IkDef {
    pub bone_ids: Vec<NameId>,
    /// Resolved chain, 1 or 2 bones.
    pub bones: Vec<i16>,
    pub id: NameId,
    pub target_id: NameId,
    pub mix: f32,
    pub softness: f32,
    pub order: i32,
    pub target: i16,
    pub bend_positive: bool,
    pub skin_required: bool,
    pub compress: bool,
    pub stretch: bool,
    pub uniform: bool,
}

impl Default for IkDef {
    fn default() -> Self {
        IkDef {
            bone_ids: Vec::new(),
            bones: Vec::new(),
            id: NameId::EMPTY,
            target_id: NameId::EMPTY,
            mix: 1.0,
            softness: 0.0,
            order: 0,
            target: -1,
            bend_positive: true,
            skin_required: false,
            compress: false,
            stretch: false,
            uniform: false,
        }
    }
}

/// Authoring-time document metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    pub x: f32,
    pub y: f32,
    pub fps: f32,
    pub height: f32,
    pub width: f32,
}

impl Default for Meta {
    fn default() -> Self {
        Meta {
            x: 0.0,
            y: 0.0,
            fps: 30.0,
            height: 0.0,
            width: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PathPositionMode {
    #[default]
    Percent,
    Fixed,
}

impl PathPositionMode {
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            PathPositionMode::Percent => 0,
            PathPositionMode::Fixed => 1,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<PathPositionMode> {
        match tag {
            0 => Some(PathPositionMode::Percent),
            1 => Some(PathPositionMode::Fixed),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PathRotationMode {
    #[default]
    Tangent,
    Chain,
    ChainScale,
}

impl PathRotationMode {
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            PathRotationMode::Tangent => 0,
            PathRotationMode::Chain => 1,
            PathRotationMode::ChainScale => 2,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<PathRotationMode> {
        match tag {
            0 => Some(PathRotationMode::Tangent),
            1 => Some(PathRotationMode::Chain),
            2 => Some(PathRotationMode::ChainScale),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PathSpacingMode {
    #[default]
    Length,
    Fixed,
    Percent,
}

impl PathSpacingMode {
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            PathSpacingMode::Length => 0,
            PathSpacingMode::Fixed => 1,
            PathSpacingMode::Percent => 2,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<PathSpacingMode> {
        match tag {
            0 => Some(PathSpacingMode::Length),
            1 => Some(PathSpacingMode::Fixed),
            2 => Some(PathSpacingMode::Percent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PathDef {
    pub bone_ids: Vec<NameId>,
    pub bones: Vec<i16>,
    pub id: NameId,
    pub position: f32,
    pub position_mix: f32,
    pub position_mode: PathPositionMode,
    pub rotation: f32,
    pub rotation_mix: f32,
    pub rotation_mode: PathRotationMode,
    pub spacing: f32,
    pub spacing_mode: PathSpacingMode,
    pub target_id: NameId,
    pub order: i32,
    /// Resolved target slot index.
    pub target: i16,
    pub skin_required: bool,
}

impl Default for PathDef {
    fn default() -> Self {
        PathDef {
            bone_ids: Vec::new(),
            bones: Vec::new(),
            id: NameId::EMPTY,
            position: 0.0,
            position_mix: 1.0,
            position_mode: PathPositionMode::Percent,
            rotation: 0.0,
            rotation_mix: 1.0,
            rotation_mode: PathRotationMode::Tangent,
            spacing: 0.0,
            spacing_mode: PathSpacingMode::Length,
            target_id: NameId::EMPTY,
            order: 0,
            target: -1,
            skin_required: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoseTaskKind {
    Bone,
    Ik,
    Path,
    Transform,
}

impl PoseTaskKind {
    pub(crate) fn to_tag(self) -> i16 {
        match self {
            PoseTaskKind::Bone => 0,
            PoseTaskKind::Ik => 1,
            PoseTaskKind::Path => 2,
            PoseTaskKind::Transform => 3,
        }
    }

    pub(crate) fn from_tag(tag: i16) -> Option<PoseTaskKind> {
        match tag {
            0 => Some(PoseTaskKind::Bone),
            1 => Some(PoseTaskKind::Ik),
            2 => Some(PoseTaskKind::Path),
            3 => Some(PoseTaskKind::Transform),
            _ => None,
        }
    }
}

/// One step of the flat pose-evaluation order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoseTask {
    pub kind: PoseTaskKind,
    pub index: i16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotDef {
    pub id: NameId,
    pub attachment_id: NameId,
    pub blend: SlotBlendMode,
    pub color: Color32,
    pub bone_id: NameId,
    /// Resolved bone index.
    pub bone: i16,
    pub dark_color: Color32,
    pub has_dark_color: bool,
}

impl Default for SlotDef {
    fn default() -> Self {
        SlotDef {
            id: NameId::EMPTY,
            attachment_id: NameId::EMPTY,
            blend: SlotBlendMode::Alpha,
            color: Color32::WHITE,
            bone_id: NameId::EMPTY,
            bone: -1,
            dark_color: Color32::BLACK,
            has_dark_color: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransformDef {
    pub bone_ids: Vec<NameId>,
    pub bones: Vec<i16>,
    pub id: NameId,
    pub delta_x: f32,
    pub delta_y: f32,
    pub delta_rotation: f32,
    pub delta_scale_x: f32,
    pub delta_scale_y: f32,
    pub delta_shear_y: f32,
    pub position_mix: f32,
    pub rotation_mix: f32,
    pub scale_mix: f32,
    pub shear_mix: f32,
    pub target_id: NameId,
    pub order: i32,
    pub target: i16,
    pub skin_required: bool,
    pub local: bool,
    pub relative: bool,
}

impl Default for TransformDef {
    fn default() -> Self {
        TransformDef {
            bone_ids: Vec::new(),
            bones: Vec::new(),
            id: NameId::EMPTY,
            delta_x: 0.0,
            delta_y: 0.0,
            delta_rotation: 0.0,
            delta_scale_x: 0.0,
            delta_scale_y: 0.0,
            delta_shear_y: 0.0,
            position_mix: 1.0,
            rotation_mix: 1.0,
            scale_mix: 1.0,
            shear_mix: 1.0,
            target_id: NameId::EMPTY,
            order: 0,
            target: -1,
            skin_required: false,
            local: false,
            relative: false,
        }
    }
}

/// `attachment name -> attachment` within one slot of one skin.
pub type AttachmentSet = HashMap<NameId, Attachment>;

/// `slot name -> attachments` within one skin.
pub type SkinSlots = HashMap<NameId, AttachmentSet>;

pub type Lookup = HashMap<NameId, i16>;

/// Immutable rigged-character description.
///
/// Fields are public for construction; call [`Definition::finalize`] before
/// use to resolve names to indices and build the pose-task list. Decoded
/// binaries arrive finalized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Definition {
    pub bones: Vec<BoneDef>,
    pub bone_lookup: Lookup,
    pub clips: HashMap<NameId, Arc<Clip>>,
    pub curves: Vec<BezierCurve>,
    pub events: HashMap<NameId, EventDef>,
    pub ik: Vec<IkDef>,
    pub ik_lookup: Lookup,
    pub meta: Meta,
    pub paths: Vec<PathDef>,
    pub path_lookup: Lookup,
    pub pose_tasks: Vec<PoseTask>,
    pub skins: HashMap<NameId, SkinSlots>,
    pub slots: Vec<SlotDef>,
    pub slot_lookup: Lookup,
    pub transforms: Vec<TransformDef>,
    pub transform_lookup: Lookup,
}

impl Definition {
    pub fn bone_index(&self, id: NameId) -> i16 {
        self.bone_lookup.get(&id).copied().unwrap_or(-1)
    }

    pub fn ik_index(&self, id: NameId) -> i16 {
        self.ik_lookup.get(&id).copied().unwrap_or(-1)
    }

    pub fn path_index(&self, id: NameId) -> i16 {
        self.path_lookup.get(&id).copied().unwrap_or(-1)
    }

    pub fn slot_index(&self, id: NameId) -> i16 {
        self.slot_lookup.get(&id).copied().unwrap_or(-1)
    }

    pub fn transform_index(&self, id: NameId) -> i16 {
        self.transform_lookup.get(&id).copied().unwrap_or(-1)
    }

    pub fn clip(&self, id: NameId) -> Option<&Arc<Clip>> {
        self.clips.get(&id)
    }

    pub fn attachment(&self, skin: NameId, slot: NameId, name: NameId) -> Option<&Attachment> {
        self.skins.get(&skin)?.get(&slot)?.get(&name)
    }

    /// Copy an attachment's base vertex buffer as flat floats. Linked meshes
    /// resolve through their parent.
    pub fn base_vertices(&self, skin: NameId, slot: NameId, name: NameId) -> Option<Vec<f32>> {
        match self.attachment(skin, slot, name)? {
            Attachment::LinkedMesh(linked) => {
                let parent_skin = if linked.skin.is_empty() {
                    NameId::new(DEFAULT_SKIN)
                } else {
                    linked.skin
                };
                match self.attachment(parent_skin, slot, linked.parent)? {
                    Attachment::Mesh(mesh) => Some(unfold(&mesh.vertices)),
                    _ => None,
                }
            }
            Attachment::Mesh(mesh) => Some(unfold(&mesh.vertices)),
            Attachment::Path(path) => Some(path.vertices.clone()),
            _ => None,
        }
    }

    /// Resolve names to indices, normalize attachments, and build the
    /// pose-task list. Must be called once after in-memory construction;
    /// surfaces the first error without publishing partial state.
    pub fn finalize(&mut self) -> Result<(), Error> {
        self.finalize_bones()?;
        self.finalize_ik()?;
        self.finalize_skins()?;
        self.finalize_slots()?;
        self.finalize_paths()?; // Needs the slot lookup.
        self.finalize_transforms()?;
        self.finalize_pose_tasks()?; // Must be last.
        Ok(())
    }

    fn finalize_bones(&mut self) -> Result<(), Error> {
        self.bone_lookup.clear();
        for (i, bone) in self.bones.iter().enumerate() {
            if self.bone_lookup.insert(bone.id, i as i16).is_some() {
                return Err(Error::ReferenceDuplicateName {
                    what: "bone",
                    name: bone.id.as_str().to_string(),
                });
            }
        }

        for i in 0..self.bones.len() {
            let (id, parent_id) = (self.bones[i].id, self.bones[i].parent_id);
            if parent_id.is_empty() {
                self.bones[i].parent = -1;
                continue;
            }
            let parent = *self.bone_lookup.get(&parent_id).ok_or_else(|| {
                Error::ReferenceBoneParent {
                    bone: id.as_str().to_string(),
                    parent: parent_id.as_str().to_string(),
                }
            })?;
            if parent as usize >= i {
                return Err(Error::ShapeBoneOrder {
                    bone: id.as_str().to_string(),
                });
            }
            self.bones[i].parent = parent;
        }

        Ok(())
    }

    fn finalize_ik(&mut self) -> Result<(), Error> {
        self.ik_lookup.clear();
        for i in 0..self.ik.len() {
            let id = self.ik[i].id;
            if self.ik_lookup.insert(id, i as i16).is_some() {
                return Err(Error::ReferenceDuplicateName {
                    what: "ik constraint",
                    name: id.as_str().to_string(),
                });
            }

            let target_id = self.ik[i].target_id;
            self.ik[i].target =
                *self
                    .bone_lookup
                    .get(&target_id)
                    .ok_or_else(|| Error::ReferenceIkTarget {
                        constraint: id.as_str().to_string(),
                        target: target_id.as_str().to_string(),
                    })?;

            let len = self.ik[i].bone_ids.len();
            if len == 0 {
                return Err(Error::ShapeEmptyChain {
                    what: "ik",
                    constraint: id.as_str().to_string(),
                });
            }
            if len > 2 {
                return Err(Error::ShapeIkChainLength {
                    constraint: id.as_str().to_string(),
                    len,
                });
            }

            let mut bones = Vec::with_capacity(len);
            for &bone_id in &self.ik[i].bone_ids {
                bones.push(*self.bone_lookup.get(&bone_id).ok_or_else(|| {
                    Error::ReferenceIkBone {
                        constraint: id.as_str().to_string(),
                        bone: bone_id.as_str().to_string(),
                    }
                })?);
            }
            self.ik[i].bones = bones;
        }

        Ok(())
    }

    fn finalize_skins(&mut self) -> Result<(), Error> {
        // Linked mesh parents resolve against other skins, so validation runs
        // against an immutable snapshot of the (skin, slot, attachment) keys.
        struct LinkedRef {
            skin: NameId,
            slot: NameId,
            name: NameId,
            parent: NameId,
            parent_skin: NameId,
        }

        let mut linked = Vec::new();
        for (&skin_id, slots) in &self.skins {
            for (&slot_id, set) in slots {
                for (&name, attachment) in set {
                    if let Attachment::LinkedMesh(mesh) = attachment {
                        linked.push(LinkedRef {
                            skin: skin_id,
                            slot: slot_id,
                            name,
                            parent: mesh.parent,
                            parent_skin: if mesh.skin.is_empty() {
                                NameId::new(DEFAULT_SKIN)
                            } else {
                                mesh.skin
                            },
                        });
                    }
                }
            }
        }

        for r in &linked {
            let skin = self.skins.get(&r.parent_skin).ok_or_else(|| {
                Error::ReferenceLinkedMeshSkin {
                    attachment: r.name.as_str().to_string(),
                    skin: r.parent_skin.as_str().to_string(),
                }
            })?;
            let parent = skin.get(&r.slot).and_then(|set| set.get(&r.parent));
            let Some(parent) = parent else {
                return Err(Error::ReferenceLinkedMeshParent {
                    attachment: r.name.as_str().to_string(),
                    parent: r.parent.as_str().to_string(),
                    skin: r.parent_skin.as_str().to_string(),
                    slot: r.slot.as_str().to_string(),
                });
            };
            if parent.kind() != AttachmentKind::Mesh {
                return Err(Error::ReferenceLinkedMeshKind {
                    attachment: r.name.as_str().to_string(),
                    parent: r.parent.as_str().to_string(),
                });
            }
        }

        // Per-attachment derived data: mesh edge lists, path id/slot stamps.
        for slots in self.skins.values_mut() {
            for (&slot_id, set) in slots.iter_mut() {
                for (&name, attachment) in set.iter_mut() {
                    match attachment {
                        Attachment::Mesh(mesh) => mesh.compute_edges(),
                        Attachment::Path(path) => {
                            path.id = name;
                            path.slot = slot_id;
                        }
                        _ => {}
                    }
                }
            }
        }

        // Normalize the skin reference of linked meshes so later lookups can
        // use the stored value directly.
        for r in &linked {
            if let Some(Attachment::LinkedMesh(mesh)) = self
                .skins
                .get_mut(&r.skin)
                .and_then(|slots| slots.get_mut(&r.slot))
                .and_then(|set| set.get_mut(&r.name))
            {
                mesh.skin = r.parent_skin;
            }
        }

        Ok(())
    }

    fn finalize_slots(&mut self) -> Result<(), Error> {
        self.slot_lookup.clear();
        for i in 0..self.slots.len() {
            let id = self.slots[i].id;
            if self.slot_lookup.insert(id, i as i16).is_some() {
                return Err(Error::ReferenceDuplicateName {
                    what: "slot",
                    name: id.as_str().to_string(),
                });
            }

            let bone_id = self.slots[i].bone_id;
            self.slots[i].bone =
                *self
                    .bone_lookup
                    .get(&bone_id)
                    .ok_or_else(|| Error::ReferenceSlotBone {
                        slot: id.as_str().to_string(),
                        bone: bone_id.as_str().to_string(),
                    })?;
        }
        Ok(())
    }

    fn finalize_paths(&mut self) -> Result<(), Error> {
        self.path_lookup.clear();
        for i in 0..self.paths.len() {
            let id = self.paths[i].id;
            if self.path_lookup.insert(id, i as i16).is_some() {
                return Err(Error::ReferenceDuplicateName {
                    what: "path constraint",
                    name: id.as_str().to_string(),
                });
            }

            let target_id = self.paths[i].target_id;
            self.paths[i].target =
                *self
                    .slot_lookup
                    .get(&target_id)
                    .ok_or_else(|| Error::ReferencePathTarget {
                        constraint: id.as_str().to_string(),
                        slot: target_id.as_str().to_string(),
                    })?;

            if self.paths[i].bone_ids.is_empty() {
                return Err(Error::ShapeEmptyChain {
                    what: "path",
                    constraint: id.as_str().to_string(),
                });
            }

            let mut bones = Vec::with_capacity(self.paths[i].bone_ids.len());
            for &bone_id in &self.paths[i].bone_ids {
                bones.push(*self.bone_lookup.get(&bone_id).ok_or_else(|| {
                    Error::ReferencePathBone {
                        constraint: id.as_str().to_string(),
                        bone: bone_id.as_str().to_string(),
                    }
                })?);
            }
            self.paths[i].bones = bones;
        }
        Ok(())
    }

    fn finalize_transforms(&mut self) -> Result<(), Error> {
        self.transform_lookup.clear();
        for i in 0..self.transforms.len() {
            let id = self.transforms[i].id;
            if self.transform_lookup.insert(id, i as i16).is_some() {
                return Err(Error::ReferenceDuplicateName {
                    what: "transform constraint",
                    name: id.as_str().to_string(),
                });
            }

            let target_id = self.transforms[i].target_id;
            self.transforms[i].target = *self.bone_lookup.get(&target_id).ok_or_else(|| {
                Error::ReferenceTransformTarget {
                    constraint: id.as_str().to_string(),
                    target: target_id.as_str().to_string(),
                }
            })?;

            if self.transforms[i].bone_ids.is_empty() {
                return Err(Error::ShapeEmptyChain {
                    what: "transform",
                    constraint: id.as_str().to_string(),
                });
            }

            let mut bones = Vec::with_capacity(self.transforms[i].bone_ids.len());
            for &bone_id in &self.transforms[i].bone_ids {
                bones.push(*self.bone_lookup.get(&bone_id).ok_or_else(|| {
                    Error::ReferenceTransformBone {
                        constraint: id.as_str().to_string(),
                        bone: bone_id.as_str().to_string(),
                    }
                })?);
            }
            self.transforms[i].bones = bones;
        }
        Ok(())
    }

    /// Compute the flat evaluation order such that every consumer is
    /// up-to-date before it is read and every non-root bone is emitted
    /// exactly once per frame. The root is intentionally never emitted; it
    /// is always posed first as a special case.
    fn finalize_pose_tasks(&mut self) -> Result<(), Error> {
        #[derive(Copy, Clone)]
        struct PoseOrder {
            kind: PoseTaskKind,
            order: i32,
            index: u16,
        }

        let bone_count = self.bones.len();
        let mut tasks = Vec::with_capacity(bone_count + self.ik.len());
        let mut done = vec![false; bone_count];

        let mut ordered =
            Vec::with_capacity(self.ik.len() + self.paths.len() + self.transforms.len());
        for (i, ik) in self.ik.iter().enumerate() {
            ordered.push(PoseOrder {
                kind: PoseTaskKind::Ik,
                order: ik.order,
                index: i as u16,
            });
        }
        for (i, path) in self.paths.iter().enumerate() {
            ordered.push(PoseOrder {
                kind: PoseTaskKind::Path,
                order: path.order,
                index: i as u16,
            });
        }
        for (i, transform) in self.transforms.iter().enumerate() {
            ordered.push(PoseOrder {
                kind: PoseTaskKind::Transform,
                order: transform.order,
                index: i as u16,
            });
        }
        ordered.sort_by_key(|o| o.order);

        // Iterative bone evaluation: push the unevaluated parent chain, then
        // emit top-down. Keeps deep rigs off the call stack.
        fn eval_bone(
            bones: &[BoneDef],
            bone: i16,
            done: &mut [bool],
            tasks: &mut Vec<PoseTask>,
            stack: &mut Vec<i16>,
        ) {
            let mut i = bone;
            while i >= 0 && !done[i as usize] {
                stack.push(i);
                i = bones[i as usize].parent;
            }
            while let Some(i) = stack.pop() {
                done[i as usize] = true;
                if i != 0 {
                    tasks.push(PoseTask {
                        kind: PoseTaskKind::Bone,
                        index: i,
                    });
                }
            }
        }

        // Allow every descendant of `parent` to be re-evaluated.
        fn reset_children(bones: &[BoneDef], parent: i16, done: &mut [bool], stack: &mut Vec<i16>) {
            stack.push(parent);
            while let Some(p) = stack.pop() {
                for i in (p + 1)..bones.len() as i16 {
                    if bones[i as usize].parent == p {
                        if done[i as usize] {
                            stack.push(i);
                        }
                        done[i as usize] = false;
                    }
                }
            }
        }

        let mut stack = Vec::new();
        let default_skin = NameId::new(DEFAULT_SKIN);

        for entry in ordered {
            match entry.kind {
                PoseTaskKind::Ik => {
                    let ik = &self.ik[entry.index as usize];

                    // Target and first driven bone must be current before
                    // the solve runs.
                    eval_bone(&self.bones, ik.target, &mut done, &mut tasks, &mut stack);
                    eval_bone(&self.bones, ik.bones[0], &mut done, &mut tasks, &mut stack);

                    tasks.push(PoseTask {
                        kind: PoseTaskKind::Ik,
                        index: entry.index as i16,
                    });

                    reset_children(&self.bones, ik.bones[0], &mut done, &mut stack);
                    done[ik.bones[ik.bones.len() - 1] as usize] = true;
                }
                PoseTaskKind::Path => {
                    let path = &self.paths[entry.index as usize];

                    // Path attachments always live on the default skin; their
                    // vertex weights may reference arbitrary bones that must
                    // be posed before sampling the curve.
                    let target_slot = self.slots[path.target as usize].id;
                    let sets = self
                        .skins
                        .get(&default_skin)
                        .and_then(|slots| slots.get(&target_slot))
                        .ok_or_else(|| Error::ReferencePathAttachment {
                            constraint: path.id.as_str().to_string(),
                            slot: target_slot.as_str().to_string(),
                        })?;
                    for attachment in sets.values() {
                        let Attachment::Path(p) = attachment else {
                            return Err(Error::ReferencePathAttachment {
                                constraint: path.id.as_str().to_string(),
                                slot: target_slot.as_str().to_string(),
                            });
                        };
                        let counts = &p.bone_counts;
                        let mut i = 0usize;
                        while i < counts.len() {
                            let mut n = counts[i] as usize;
                            i += 1;
                            n += i;
                            while i < n {
                                eval_bone(
                                    &self.bones,
                                    counts[i] as i16,
                                    &mut done,
                                    &mut tasks,
                                    &mut stack,
                                );
                                i += 1;
                            }
                        }
                    }

                    for &bone in &path.bones {
                        eval_bone(&self.bones, bone, &mut done, &mut tasks, &mut stack);
                    }

                    tasks.push(PoseTask {
                        kind: PoseTaskKind::Path,
                        index: entry.index as i16,
                    });

                    for &bone in &path.bones {
                        reset_children(&self.bones, bone, &mut done, &mut stack);
                    }
                    for &bone in &path.bones {
                        done[bone as usize] = true;
                    }
                }
                PoseTaskKind::Transform => {
                    let transform = &self.transforms[entry.index as usize];

                    eval_bone(
                        &self.bones,
                        transform.target,
                        &mut done,
                        &mut tasks,
                        &mut stack,
                    );
                    if transform.local {
                        for &bone in &transform.bones {
                            eval_bone(
                                &self.bones,
                                self.bones[bone as usize].parent,
                                &mut done,
                                &mut tasks,
                                &mut stack,
                            );
                            eval_bone(&self.bones, bone, &mut done, &mut tasks, &mut stack);
                        }
                    } else {
                        for &bone in &transform.bones {
                            eval_bone(&self.bones, bone, &mut done, &mut tasks, &mut stack);
                        }
                    }

                    tasks.push(PoseTask {
                        kind: PoseTaskKind::Transform,
                        index: entry.index as i16,
                    });

                    for &bone in &transform.bones {
                        reset_children(&self.bones, bone, &mut done, &mut stack);
                    }
                    for &bone in &transform.bones {
                        done[bone as usize] = true;
                    }
                }
                PoseTaskKind::Bone => unreachable!(),
            }
        }

        // Any bone not touched by a constraint still needs exactly one task.
        for i in 1..bone_count {
            if !done[i] {
                tasks.push(PoseTask {
                    kind: PoseTaskKind::Bone,
                    index: i as i16,
                });
            }
        }

        self.pose_tasks = tasks;
        Ok(())
    }
}

fn unfold(vertices: &[[f32; 2]]) -> Vec<f32> {
    let mut out = Vec::with_capacity(vertices.len() * 2);
    for v in vertices {
        out.push(v[0]);
        out.push(v[1]);
    }
    out
}
