//! Binary serialization of [`Definition`] with a stable on-disk layout.
//!
//! The container is a header (signature, version, target platform tag)
//! followed by two interned string tables (short names, relative paths) and
//! the structurally serialized body. Relative paths are stored with the
//! target platform's directory separator and rewritten on read. Integers are
//! little-endian, booleans one byte, floats IEEE-754 32-bit.
//!
//! The codec is IO-free: it operates on in-memory byte buffers. Thin
//! [`write_all`]/[`read_all`] wrappers adapt `std::io` streams, and the
//! `container` feature adds the obfuscated + zstd-compressed on-wire form.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::attachment::{
    Attachment, AttachmentKind, BoneLink, BoundingBoxAttachment, ClippingAttachment, Edge,
    LinkedMeshAttachment, MeshAttachment, PathAttachment, PointAttachment, RegionAttachment,
};
use crate::clip::{
    BezierCurve, BoneKeyFrames, Clip, CurveType, DrawOrderOffset, KeyFrame2D, KeyFrameAttachment,
    KeyFrameColor, KeyFrameDeform, KeyFrameDrawOrder, KeyFrameEvent, KeyFrameIk, KeyFramePathMix,
    KeyFramePathPosition, KeyFramePathSpacing, KeyFrameRotation, KeyFrameScale, KeyFrameTransform,
    KeyFrameTwoColor, PathKeyFrames, SlotKeyFrames, BEZIER_CURVE_POINTS,
};
use crate::definition::{
    AttachmentSet, BoneDef, Definition, EventDef, IkDef, Lookup, Meta, PathDef, PathPositionMode,
    PathRotationMode, PathSpacingMode, PoseTask, PoseTaskKind, SkinSlots, SlotBlendMode, SlotDef,
    TransformDef, TransformMode,
};
use crate::error::Error;
use crate::ids::{NameId, RelPath};
use crate::math::Color32;

pub const BINARY_SIGNATURE: u32 = 0x480129D0;
pub const BINARY_VERSION: u32 = 2;

/// Target platform of a serialized container, used for directory separator
/// fixup of relative paths.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Android,
    Ios,
}

impl Platform {
    pub fn current() -> Platform {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Linux
        }
    }

    fn separator(self) -> char {
        match self {
            Platform::Windows => '\\',
            _ => '/',
        }
    }

    fn to_tag(self) -> u8 {
        match self {
            Platform::Windows => 0,
            Platform::Linux => 1,
            Platform::MacOs => 2,
            Platform::Android => 3,
            Platform::Ios => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Platform> {
        match tag {
            0 => Some(Platform::Windows),
            1 => Some(Platform::Linux),
            2 => Some(Platform::MacOs),
            3 => Some(Platform::Android),
            4 => Some(Platform::Ios),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw buffer primitives.

#[derive(Default)]
struct Output {
    bytes: Vec<u8>,
}

impl Output {
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.bytes.push(v as u8);
    }

    fn u16(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.bytes.extend_from_slice(&buf);
    }

    fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }

    fn u32(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.bytes.extend_from_slice(&buf);
    }

    fn i32(&mut self, v: i32) {
        self.u32(v as u32);
    }

    fn f32(&mut self, v: f32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, v);
        self.bytes.extend_from_slice(&buf);
    }

    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.bytes.extend_from_slice(s.as_bytes());
    }
}

struct Input<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Input<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Input { bytes, cursor: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.bytes.len() - self.cursor < n {
            return Err(Error::FormatEof {
                offset: self.cursor,
            });
        }
        let out = &self.bytes[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, Error> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn i16(&mut self) -> Result<i16, Error> {
        Ok(self.u16()? as i16)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn i32(&mut self) -> Result<i32, Error> {
        Ok(self.u32()? as i32)
    }

    fn f32(&mut self) -> Result<f32, Error> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    fn str(&mut self) -> Result<String, Error> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::FormatUtf8 {
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Encoder.

struct WriteTable<T> {
    lookup: HashMap<T, u16>,
    list: Vec<T>,
}

impl<T: Clone + Eq + std::hash::Hash> WriteTable<T> {
    fn new() -> Self {
        WriteTable {
            lookup: HashMap::new(),
            list: Vec::new(),
        }
    }

    fn intern(&mut self, value: &T) -> u16 {
        if let Some(&index) = self.lookup.get(value) {
            return index;
        }
        let index = self.list.len() as u16;
        self.list.push(value.clone());
        self.lookup.insert(value.clone(), index);
        index
    }
}

struct Encoder {
    out: Output,
    names: WriteTable<NameId>,
    paths: WriteTable<RelPath>,
}

impl Encoder {
    fn new() -> Self {
        Encoder {
            out: Output::default(),
            names: WriteTable::new(),
            paths: WriteTable::new(),
        }
    }

    fn name(&mut self, id: NameId) {
        let index = self.names.intern(&id);
        self.out.u16(index);
    }

    fn path(&mut self, p: &RelPath) {
        let index = self.paths.intern(p);
        self.out.u16(index);
    }

    fn color(&mut self, c: Color32) {
        self.out.u32(c.to_bits());
    }

    fn name_vec(&mut self, ids: &[NameId]) {
        self.out.u32(ids.len() as u32);
        for &id in ids {
            self.name(id);
        }
    }

    fn i16_vec(&mut self, values: &[i16]) {
        self.out.u32(values.len() as u32);
        for &v in values {
            self.out.i16(v);
        }
    }

    fn u16_vec(&mut self, values: &[u16]) {
        self.out.u32(values.len() as u32);
        for &v in values {
            self.out.u16(v);
        }
    }

    fn f32_vec(&mut self, values: &[f32]) {
        self.out.u32(values.len() as u32);
        for &v in values {
            self.out.f32(v);
        }
    }

    fn vec2_vec(&mut self, values: &[[f32; 2]]) {
        self.out.u32(values.len() as u32);
        for v in values {
            self.out.f32(v[0]);
            self.out.f32(v[1]);
        }
    }

    /// Hash tables serialize as a count followed by key/value pairs; keys are
    /// emitted in name order so encoding is deterministic.
    fn map<V>(
        &mut self,
        map: &HashMap<NameId, V>,
        mut write_value: impl FnMut(&mut Self, &V),
    ) {
        let mut keys: Vec<NameId> = map.keys().copied().collect();
        keys.sort_by_key(|k| k.as_str());
        self.out.u32(keys.len() as u32);
        for key in keys {
            self.name(key);
            write_value(self, &map[&key]);
        }
    }

    fn base_keyframe(&mut self, time: f32, curve: CurveType, curve_offset: u32) {
        self.out.f32(time);
        self.out.u8(curve.to_tag());
        self.out.u32(curve_offset);
    }

    fn bone(&mut self, b: &BoneDef) {
        self.name(b.id);
        self.name(b.parent_id);
        self.out.f32(b.length);
        self.out.f32(b.x);
        self.out.f32(b.y);
        self.out.f32(b.rotation);
        self.out.f32(b.scale_x);
        self.out.f32(b.scale_y);
        self.out.f32(b.shear_x);
        self.out.f32(b.shear_y);
        self.out.u32(b.transform_mode.to_tag());
        self.out.i16(b.parent);
        self.out.bool(b.skin_required);
    }

    fn event(&mut self, e: &EventDef) {
        self.out.f32(e.float_value);
        self.out.i32(e.int_value);
        self.out.str(&e.string_value);
    }

    fn ik(&mut self, ik: &IkDef) {
        self.name_vec(&ik.bone_ids);
        self.i16_vec(&ik.bones);
        self.name(ik.id);
        self.name(ik.target_id);
        self.out.f32(ik.mix);
        self.out.f32(ik.softness);
        self.out.i32(ik.order);
        self.out.i16(ik.target);
        self.out.bool(ik.bend_positive);
        self.out.bool(ik.skin_required);
        self.out.bool(ik.compress);
        self.out.bool(ik.stretch);
        self.out.bool(ik.uniform);
    }

    fn meta(&mut self, m: &Meta) {
        self.out.f32(m.x);
        self.out.f32(m.y);
        self.out.f32(m.fps);
        self.out.f32(m.height);
        self.out.f32(m.width);
    }

    fn path_def(&mut self, p: &PathDef) {
        self.name_vec(&p.bone_ids);
        self.i16_vec(&p.bones);
        self.name(p.id);
        self.out.f32(p.position);
        self.out.f32(p.position_mix);
        self.out.u32(p.position_mode.to_tag());
        self.out.f32(p.rotation);
        self.out.f32(p.rotation_mix);
        self.out.u32(p.rotation_mode.to_tag());
        self.out.f32(p.spacing);
        self.out.u32(p.spacing_mode.to_tag());
        self.name(p.target_id);
        self.out.i32(p.order);
        self.out.i16(p.target);
        self.out.bool(p.skin_required);
    }

    fn pose_task(&mut self, t: &PoseTask) {
        self.out.i16(t.index);
        self.out.i16(t.kind.to_tag());
    }

    fn slot(&mut self, s: &SlotDef) {
        self.name(s.id);
        self.name(s.attachment_id);
        self.out.u32(s.blend.to_tag());
        self.color(s.color);
        self.name(s.bone_id);
        self.out.i16(s.bone);
        self.color(s.dark_color);
        self.out.bool(s.has_dark_color);
    }

    fn transform(&mut self, t: &TransformDef) {
        self.name_vec(&t.bone_ids);
        self.i16_vec(&t.bones);
        self.name(t.id);
        self.out.f32(t.delta_x);
        self.out.f32(t.delta_y);
        self.out.f32(t.delta_rotation);
        self.out.f32(t.delta_scale_x);
        self.out.f32(t.delta_scale_y);
        self.out.f32(t.delta_shear_y);
        self.out.f32(t.position_mix);
        self.out.f32(t.rotation_mix);
        self.out.f32(t.scale_mix);
        self.out.f32(t.shear_mix);
        self.name(t.target_id);
        self.out.i32(t.order);
        self.out.i16(t.target);
        self.out.bool(t.skin_required);
        self.out.bool(t.local);
        self.out.bool(t.relative);
    }

    fn lookup(&mut self, l: &Lookup) {
        self.map(l, |e, &v| e.out.i16(v));
    }

    fn curve_table(&mut self, curves: &[BezierCurve]) {
        self.out.u32(curves.len() as u32);
        for curve in curves {
            for &v in curve.iter() {
                self.out.f32(v);
            }
        }
    }

    fn edge(&mut self, edge: &Edge) {
        self.out.f32(edge.abs_one_over_diff_uv[0]);
        self.out.f32(edge.abs_one_over_diff_uv[1]);
        self.out.f32(edge.sep_squared);
        self.out
            .u32((edge.v0 as u32) | (edge.v1 as u32) << 16);
    }

    fn attachment(&mut self, a: &Attachment) {
        self.out.u32(a.kind().to_tag());
        match a {
            Attachment::Region(r) => {
                self.color(r.color);
                self.path(&r.image);
                self.out.f32(r.height);
                self.out.f32(r.x);
                self.out.f32(r.y);
                self.out.f32(r.rotation);
                self.out.f32(r.scale_x);
                self.out.f32(r.scale_y);
                self.out.f32(r.width);
            }
            Attachment::BoundingBox(_) => {}
            Attachment::LinkedMesh(m) => {
                self.color(m.color);
                self.path(&m.image);
                self.out.f32(m.height);
                self.name(m.parent);
                self.name(m.skin);
                self.out.f32(m.width);
                self.out.bool(m.deform);
            }
            Attachment::Mesh(m) => {
                self.color(m.color);
                self.path(&m.image);
                self.out.f32(m.height);
                self.out.i32(m.hull);
                self.out.u32(m.edges.len() as u32);
                for edge in &m.edges {
                    self.edge(edge);
                }
                self.u16_vec(&m.triangles);
                self.vec2_vec(&m.uvs);
                self.out.f32(m.width);
                self.u16_vec(&m.bone_counts);
                self.out.u32(m.links.len() as u32);
                for link in &m.links {
                    self.out.f32(link.weight);
                    self.out.u32(link.bone);
                }
                self.vec2_vec(&m.vertices);
            }
            Attachment::Path(p) => {
                self.u16_vec(&p.bone_counts);
                self.f32_vec(&p.lengths);
                self.f32_vec(&p.vertices);
                self.f32_vec(&p.weights);
                self.out.u32(p.vertex_count);
                self.name(p.id);
                self.name(p.slot);
                self.out.bool(p.closed);
                self.out.bool(p.constant_speed);
            }
            Attachment::Point(p) => {
                self.out.f32(p.x);
                self.out.f32(p.y);
                self.out.f32(p.rotation);
            }
            Attachment::Clipping(c) => {
                self.u16_vec(&c.bone_counts);
                self.f32_vec(&c.vertices);
                self.f32_vec(&c.weights);
                self.out.u32(c.vertex_count);
            }
        }
    }

    /// Attachment sets emit linked meshes after everything else so parents
    /// always precede their dependents in the stream.
    fn attachment_set(&mut self, set: &AttachmentSet) {
        let mut keys: Vec<NameId> = set.keys().copied().collect();
        keys.sort_by_key(|k| k.as_str());
        self.out.u32(keys.len() as u32);
        for &key in &keys {
            if set[&key].kind() == AttachmentKind::LinkedMesh {
                continue;
            }
            self.name(key);
            self.attachment(&set[&key]);
        }
        for &key in &keys {
            if set[&key].kind() != AttachmentKind::LinkedMesh {
                continue;
            }
            self.name(key);
            self.attachment(&set[&key]);
        }
    }

    fn clip(&mut self, clip: &Clip) {
        self.map(&clip.bones, |e, frames: &BoneKeyFrames| {
            e.out.u32(frames.rotation.len() as u32);
            for k in &frames.rotation {
                e.out.f32(k.angle);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
            e.out.u32(frames.scale.len() as u32);
            for k in &frames.scale {
                e.out.f32(k.x);
                e.out.f32(k.y);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
            e.key2d_vec(&frames.shear);
            e.key2d_vec(&frames.translation);
        });

        self.map(&clip.deforms, |e, slots| {
            e.map(slots, |e, attachments| {
                e.map(attachments, |e, frames: &Vec<KeyFrameDeform>| {
                    e.out.u32(frames.len() as u32);
                    for k in frames {
                        e.f32_vec(&k.vertices);
                        e.base_keyframe(k.time, k.curve, k.curve_offset);
                    }
                });
            });
        });

        self.out.u32(clip.draw_order.len() as u32);
        for k in &clip.draw_order {
            self.out.f32(k.time);
            self.out.u32(k.offsets.len() as u32);
            for o in &k.offsets {
                self.out.i16(o.offset);
                self.name(o.slot);
            }
        }

        self.out.u32(clip.events.len() as u32);
        for k in &clip.events {
            self.out.f32(k.float_value);
            self.out.i32(k.int_value);
            self.out.str(&k.string_value);
            self.name(k.id);
            self.out.f32(k.time);
        }

        self.map(&clip.ik, |e, frames: &Vec<KeyFrameIk>| {
            e.out.u32(frames.len() as u32);
            for k in frames {
                e.out.bool(k.stretch);
                e.out.bool(k.compress);
                e.out.bool(k.bend_positive);
                e.out.f32(k.softness);
                e.out.f32(k.mix);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
        });

        self.map(&clip.paths, |e, frames: &PathKeyFrames| {
            e.out.u32(frames.mix.len() as u32);
            for k in &frames.mix {
                e.out.f32(k.position_mix);
                e.out.f32(k.rotation_mix);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
            e.out.u32(frames.position.len() as u32);
            for k in &frames.position {
                e.out.f32(k.position);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
            e.out.u32(frames.spacing.len() as u32);
            for k in &frames.spacing {
                e.out.f32(k.spacing);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
        });

        self.map(&clip.slots, |e, frames: &SlotKeyFrames| {
            e.out.u32(frames.attachment.len() as u32);
            for k in &frames.attachment {
                e.name(k.id);
                e.out.f32(k.time);
            }
            e.out.u32(frames.color.len() as u32);
            for k in &frames.color {
                e.color(k.color);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
            e.out.u32(frames.two_color.len() as u32);
            for k in &frames.two_color {
                e.color(k.light);
                e.color(k.dark);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
        });

        self.map(&clip.transforms, |e, frames: &Vec<KeyFrameTransform>| {
            e.out.u32(frames.len() as u32);
            for k in frames {
                e.out.f32(k.position_mix);
                e.out.f32(k.rotation_mix);
                e.out.f32(k.scale_mix);
                e.out.f32(k.shear_mix);
                e.base_keyframe(k.time, k.curve, k.curve_offset);
            }
        });
    }

    fn key2d_vec(&mut self, frames: &[KeyFrame2D]) {
        self.out.u32(frames.len() as u32);
        for k in frames {
            self.out.f32(k.x);
            self.out.f32(k.y);
            self.base_keyframe(k.time, k.curve, k.curve_offset);
        }
    }

    fn definition(&mut self, def: &Definition) {
        self.out.u32(def.bones.len() as u32);
        for bone in &def.bones {
            self.bone(bone);
        }
        self.lookup(&def.bone_lookup);
        self.map(&def.clips, |e, clip: &Arc<Clip>| e.clip(clip));
        self.curve_table(&def.curves);
        self.map(&def.events, |e, event| e.event(event));
        self.out.u32(def.ik.len() as u32);
        for ik in &def.ik {
            self.ik(ik);
        }
        self.lookup(&def.ik_lookup);
        self.meta(&def.meta);
        self.out.u32(def.paths.len() as u32);
        for path in &def.paths {
            self.path_def(path);
        }
        self.lookup(&def.path_lookup);
        self.out.u32(def.pose_tasks.len() as u32);
        for task in &def.pose_tasks {
            self.pose_task(task);
        }
        self.map(&def.skins, |e, slots: &SkinSlots| {
            e.map(slots, |e, set| e.attachment_set(set));
        });
        self.out.u32(def.slots.len() as u32);
        for slot in &def.slots {
            self.slot(slot);
        }
        self.lookup(&def.slot_lookup);
        self.out.u32(def.transforms.len() as u32);
        for transform in &def.transforms {
            self.transform(transform);
        }
        self.lookup(&def.transform_lookup);
    }

    /// Assemble the final container: header, string tables, body.
    fn finish(self, platform: Platform) -> Vec<u8> {
        let mut header = Output::default();
        header.u32(BINARY_SIGNATURE);
        header.u32(BINARY_VERSION);
        header.u8(platform.to_tag());

        header.u32(self.names.list.len() as u32);
        for name in &self.names.list {
            header.str(name.as_str());
        }

        let current = std::path::MAIN_SEPARATOR;
        let target = platform.separator();
        header.u32(self.paths.list.len() as u32);
        for path in &self.paths.list {
            if current != target {
                let fixed: String = path
                    .as_str()
                    .chars()
                    .map(|c| if c == current { target } else { c })
                    .collect();
                header.str(&fixed);
            } else {
                header.str(path.as_str());
            }
        }

        let mut bytes = header.bytes;
        bytes.extend_from_slice(&self.out.bytes);
        bytes
    }
}

// ---------------------------------------------------------------------------
// Decoder.

struct Decoder<'a> {
    input: Input<'a>,
    names: Vec<NameId>,
    paths: Vec<RelPath>,
}

impl<'a> Decoder<'a> {
    fn begin(bytes: &'a [u8]) -> Result<Self, Error> {
        let mut input = Input::new(bytes);

        let signature = input.u32()?;
        if signature != BINARY_SIGNATURE {
            return Err(Error::FormatSignature { found: signature });
        }
        let version = input.u32()?;
        if version != BINARY_VERSION {
            return Err(Error::FormatVersion { found: version });
        }
        let platform_tag = input.u8()?;
        let platform = Platform::from_tag(platform_tag).ok_or(Error::FormatPlatform {
            found: platform_tag,
        })?;

        let name_count = input.u32()? as usize;
        let mut names = Vec::with_capacity(name_count);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..name_count {
            let s = input.str()?;
            if !seen.insert(s.clone()) {
                return Err(Error::FormatDuplicateKey { key: s });
            }
            names.push(NameId::new(&s));
        }

        let target = platform.separator();
        let current = std::path::MAIN_SEPARATOR;
        let path_count = input.u32()? as usize;
        let mut paths = Vec::with_capacity(path_count);
        let mut seen_paths = std::collections::HashSet::new();
        for _ in 0..path_count {
            let mut s = input.str()?;
            if current != target {
                s = s
                    .chars()
                    .map(|c| if c == target { current } else { c })
                    .collect();
            }
            if !seen_paths.insert(s.clone()) {
                return Err(Error::FormatDuplicateKey { key: s });
            }
            paths.push(RelPath::from_raw(s));
        }

        Ok(Decoder {
            input,
            names,
            paths,
        })
    }

    fn name(&mut self) -> Result<NameId, Error> {
        let index = self.input.u16()?;
        self.names
            .get(index as usize)
            .copied()
            .ok_or(Error::FormatStringIndex {
                index,
                len: self.names.len(),
            })
    }

    fn path(&mut self) -> Result<RelPath, Error> {
        let index = self.input.u16()?;
        self.paths
            .get(index as usize)
            .cloned()
            .ok_or(Error::FormatStringIndex {
                index,
                len: self.paths.len(),
            })
    }

    fn color(&mut self) -> Result<Color32, Error> {
        Ok(Color32::from_bits(self.input.u32()?))
    }

    fn count(&mut self) -> Result<usize, Error> {
        Ok(self.input.u32()? as usize)
    }

    fn name_vec(&mut self) -> Result<Vec<NameId>, Error> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(self.name()?);
        }
        Ok(out)
    }

    fn i16_vec(&mut self) -> Result<Vec<i16>, Error> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(self.input.i16()?);
        }
        Ok(out)
    }

    fn u16_vec(&mut self) -> Result<Vec<u16>, Error> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(self.input.u16()?);
        }
        Ok(out)
    }

    fn f32_vec(&mut self) -> Result<Vec<f32>, Error> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(self.input.f32()?);
        }
        Ok(out)
    }

    fn vec2_vec(&mut self) -> Result<Vec<[f32; 2]>, Error> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push([self.input.f32()?, self.input.f32()?]);
        }
        Ok(out)
    }

    fn map<V>(
        &mut self,
        mut read_value: impl FnMut(&mut Self) -> Result<V, Error>,
    ) -> Result<HashMap<NameId, V>, Error> {
        let count = self.count()?;
        let mut out = HashMap::with_capacity(count.min(4096));
        for _ in 0..count {
            let key = self.name()?;
            let value = read_value(self)?;
            if out.insert(key, value).is_some() {
                return Err(Error::FormatDuplicateKey {
                    key: key.as_str().to_string(),
                });
            }
        }
        Ok(out)
    }

    fn base_keyframe(&mut self) -> Result<(f32, CurveType, u32), Error> {
        let time = self.input.f32()?;
        let tag = self.input.u8()?;
        let curve = CurveType::from_tag(tag).ok_or(Error::FormatEnum {
            what: "curve type",
            found: tag as u32,
        })?;
        let offset = self.input.u32()?;
        Ok((time, curve, offset))
    }

    fn bone(&mut self) -> Result<BoneDef, Error> {
        Ok(BoneDef {
            id: self.name()?,
            parent_id: self.name()?,
            length: self.input.f32()?,
            x: self.input.f32()?,
            y: self.input.f32()?,
            rotation: self.input.f32()?,
            scale_x: self.input.f32()?,
            scale_y: self.input.f32()?,
            shear_x: self.input.f32()?,
            shear_y: self.input.f32()?,
            transform_mode: {
                let tag = self.input.u32()?;
                TransformMode::from_tag(tag).ok_or(Error::FormatEnum {
                    what: "transform mode",
                    found: tag,
                })?
            },
            parent: self.input.i16()?,
            skin_required: self.input.bool()?,
        })
    }

    fn event(&mut self) -> Result<EventDef, Error> {
        Ok(EventDef {
            float_value: self.input.f32()?,
            int_value: self.input.i32()?,
            string_value: self.input.str()?,
        })
    }

    fn ik(&mut self) -> Result<IkDef, Error> {
        Ok(IkDef {
            bone_ids: self.name_vec()?,
            bones: self.i16_vec()?,
            id: self.name()?,
            target_id: self.name()?,
            mix: self.input.f32()?,
            softness: self.input.f32()?,
            order: self.input.i32()?,
            target: self.input.i16()?,
            bend_positive: self.input.bool()?,
            skin_required: self.input.bool()?,
            compress: self.input.bool()?,
            stretch: self.input.bool()?,
            uniform: self.input.bool()?,
        })
    }

    fn meta(&mut self) -> Result<Meta, Error> {
        Ok(Meta {
            x: self.input.f32()?,
            y: self.input.f32()?,
            fps: self.input.f32()?,
            height: self.input.f32()?,
            width: self.input.f32()?,
        })
    }

    fn path_def(&mut self) -> Result<PathDef, Error> {
        Ok(PathDef {
            bone_ids: self.name_vec()?,
            bones: self.i16_vec()?,
            id: self.name()?,
            position: self.input.f32()?,
            position_mix: self.input.f32()?,
            position_mode: {
                let tag = self.input.u32()?;
                PathPositionMode::from_tag(tag).ok_or(Error::FormatEnum {
                    what: "path position mode",
                    found: tag,
                })?
            },
            rotation: self.input.f32()?,
            rotation_mix: self.input.f32()?,
            rotation_mode: {
                let tag = self.input.u32()?;
                PathRotationMode::from_tag(tag).ok_or(Error::FormatEnum {
                    what: "path rotation mode",
                    found: tag,
                })?
            },
            spacing: self.input.f32()?,
            spacing_mode: {
                let tag = self.input.u32()?;
                PathSpacingMode::from_tag(tag).ok_or(Error::FormatEnum {
                    what: "path spacing mode",
                    found: tag,
                })?
            },
            target_id: self.name()?,
            order: self.input.i32()?,
            target: self.input.i16()?,
            skin_required: self.input.bool()?,
        })
    }

    fn pose_task(&mut self) -> Result<PoseTask, Error> {
        let index = self.input.i16()?;
        let tag = self.input.i16()?;
        let kind = PoseTaskKind::from_tag(tag).ok_or(Error::FormatEnum {
            what: "pose task kind",
            found: tag as u32,
        })?;
        Ok(PoseTask { kind, index })
    }

    fn slot(&mut self) -> Result<SlotDef, Error> {
        Ok(SlotDef {
            id: self.name()?,
            attachment_id: self.name()?,
            blend: {
                let tag = self.input.u32()?;
                SlotBlendMode::from_tag(tag).ok_or(Error::FormatEnum {
                    what: "slot blend mode",
                    found: tag,
                })?
            },
            color: self.color()?,
            bone_id: self.name()?,
            bone: self.input.i16()?,
            dark_color: self.color()?,
            has_dark_color: self.input.bool()?,
        })
    }

    fn transform(&mut self) -> Result<TransformDef, Error> {
        Ok(TransformDef {
            bone_ids: self.name_vec()?,
            bones: self.i16_vec()?,
            id: self.name()?,
            delta_x: self.input.f32()?,
            delta_y: self.input.f32()?,
            delta_rotation: self.input.f32()?,
            delta_scale_x: self.input.f32()?,
            delta_scale_y: self.input.f32()?,
            delta_shear_y: self.input.f32()?,
            position_mix: self.input.f32()?,
            rotation_mix: self.input.f32()?,
            scale_mix: self.input.f32()?,
            shear_mix: self.input.f32()?,
            target_id: self.name()?,
            order: self.input.i32()?,
            target: self.input.i16()?,
            skin_required: self.input.bool()?,
            local: self.input.bool()?,
            relative: self.input.bool()?,
        })
    }

    fn lookup(&mut self) -> Result<Lookup, Error> {
        self.map(|d| d.input.i16())
    }

    fn curve_table(&mut self) -> Result<Vec<BezierCurve>, Error> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let mut curve = [0.0f32; BEZIER_CURVE_POINTS];
            for v in curve.iter_mut() {
                *v = self.input.f32()?;
            }
            out.push(curve);
        }
        Ok(out)
    }

    fn edge(&mut self) -> Result<Edge, Error> {
        let abs_one_over_diff_uv = [self.input.f32()?, self.input.f32()?];
        let sep_squared = self.input.f32()?;
        let packed = self.input.u32()?;
        Ok(Edge {
            abs_one_over_diff_uv,
            sep_squared,
            v0: (packed & 0xFFFF) as u16,
            v1: (packed >> 16) as u16,
        })
    }

    fn attachment(&mut self) -> Result<Attachment, Error> {
        let tag = self.input.u32()?;
        let kind = AttachmentKind::from_tag(tag).ok_or(Error::FormatEnum {
            what: "attachment kind",
            found: tag,
        })?;

        Ok(match kind {
            AttachmentKind::Region => Attachment::Region(RegionAttachment {
                color: self.color()?,
                image: self.path()?,
                height: self.input.f32()?,
                x: self.input.f32()?,
                y: self.input.f32()?,
                rotation: self.input.f32()?,
                scale_x: self.input.f32()?,
                scale_y: self.input.f32()?,
                width: self.input.f32()?,
            }),
            AttachmentKind::BoundingBox => Attachment::BoundingBox(BoundingBoxAttachment {}),
            AttachmentKind::LinkedMesh => Attachment::LinkedMesh(LinkedMeshAttachment {
                color: self.color()?,
                image: self.path()?,
                height: self.input.f32()?,
                parent: self.name()?,
                skin: self.name()?,
                width: self.input.f32()?,
                deform: self.input.bool()?,
            }),
            AttachmentKind::Mesh => Attachment::Mesh(MeshAttachment {
                color: self.color()?,
                image: self.path()?,
                height: self.input.f32()?,
                hull: self.input.i32()?,
                edges: {
                    let count = self.count()?;
                    let mut edges = Vec::with_capacity(count.min(4096));
                    for _ in 0..count {
                        edges.push(self.edge()?);
                    }
                    edges
                },
                triangles: self.u16_vec()?,
                uvs: self.vec2_vec()?,
                width: self.input.f32()?,
                bone_counts: self.u16_vec()?,
                links: {
                    let count = self.count()?;
                    let mut links = Vec::with_capacity(count.min(4096));
                    for _ in 0..count {
                        links.push(BoneLink {
                            weight: self.input.f32()?,
                            bone: self.input.u32()?,
                        });
                    }
                    links
                },
                vertices: self.vec2_vec()?,
            }),
            AttachmentKind::Path => Attachment::Path(PathAttachment {
                bone_counts: self.u16_vec()?,
                lengths: self.f32_vec()?,
                vertices: self.f32_vec()?,
                weights: self.f32_vec()?,
                vertex_count: self.input.u32()?,
                id: self.name()?,
                slot: self.name()?,
                closed: self.input.bool()?,
                constant_speed: self.input.bool()?,
            }),
            AttachmentKind::Point => Attachment::Point(PointAttachment {
                x: self.input.f32()?,
                y: self.input.f32()?,
                rotation: self.input.f32()?,
            }),
            AttachmentKind::Clipping => Attachment::Clipping(ClippingAttachment {
                bone_counts: self.u16_vec()?,
                vertices: self.f32_vec()?,
                weights: self.f32_vec()?,
                vertex_count: self.input.u32()?,
            }),
        })
    }

    fn clip(&mut self) -> Result<Clip, Error> {
        let bones = self.map(|d| {
            let mut frames = BoneKeyFrames::default();
            let count = d.count()?;
            for _ in 0..count {
                let angle = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.rotation.push(KeyFrameRotation {
                    time,
                    curve,
                    curve_offset,
                    angle,
                });
            }
            let count = d.count()?;
            for _ in 0..count {
                let x = d.input.f32()?;
                let y = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.scale.push(KeyFrameScale {
                    time,
                    curve,
                    curve_offset,
                    x,
                    y,
                });
            }
            frames.shear = d.key2d_vec()?;
            frames.translation = d.key2d_vec()?;
            Ok(frames)
        })?;

        let deforms = self.map(|d| {
            d.map(|d| {
                d.map(|d| {
                    let count = d.count()?;
                    let mut frames = Vec::with_capacity(count.min(4096));
                    for _ in 0..count {
                        let vertices = d.f32_vec()?;
                        let (time, curve, curve_offset) = d.base_keyframe()?;
                        frames.push(KeyFrameDeform {
                            time,
                            curve,
                            curve_offset,
                            vertices,
                        });
                    }
                    Ok(frames)
                })
            })
        })?;

        let count = self.count()?;
        let mut draw_order = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let time = self.input.f32()?;
            let offset_count = self.count()?;
            let mut offsets = Vec::with_capacity(offset_count.min(4096));
            for _ in 0..offset_count {
                let offset = self.input.i16()?;
                let slot = self.name()?;
                offsets.push(DrawOrderOffset { slot, offset });
            }
            draw_order.push(KeyFrameDrawOrder { time, offsets });
        }

        let count = self.count()?;
        let mut events = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            events.push(KeyFrameEvent {
                float_value: self.input.f32()?,
                int_value: self.input.i32()?,
                string_value: self.input.str()?,
                id: self.name()?,
                time: self.input.f32()?,
            });
        }

        let ik = self.map(|d| {
            let count = d.count()?;
            let mut frames = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                let stretch = d.input.bool()?;
                let compress = d.input.bool()?;
                let bend_positive = d.input.bool()?;
                let softness = d.input.f32()?;
                let mix = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.push(KeyFrameIk {
                    time,
                    curve,
                    curve_offset,
                    mix,
                    softness,
                    bend_positive,
                    compress,
                    stretch,
                });
            }
            Ok(frames)
        })?;

        let paths = self.map(|d| {
            let mut frames = PathKeyFrames::default();
            let count = d.count()?;
            for _ in 0..count {
                let position_mix = d.input.f32()?;
                let rotation_mix = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.mix.push(KeyFramePathMix {
                    time,
                    curve,
                    curve_offset,
                    position_mix,
                    rotation_mix,
                });
            }
            let count = d.count()?;
            for _ in 0..count {
                let position = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.position.push(KeyFramePathPosition {
                    time,
                    curve,
                    curve_offset,
                    position,
                });
            }
            let count = d.count()?;
            for _ in 0..count {
                let spacing = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.spacing.push(KeyFramePathSpacing {
                    time,
                    curve,
                    curve_offset,
                    spacing,
                });
            }
            Ok(frames)
        })?;

        let slots = self.map(|d| {
            let mut frames = SlotKeyFrames::default();
            let count = d.count()?;
            for _ in 0..count {
                let id = d.name()?;
                let time = d.input.f32()?;
                frames.attachment.push(KeyFrameAttachment { time, id });
            }
            let count = d.count()?;
            for _ in 0..count {
                let color = d.color()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.color.push(KeyFrameColor {
                    time,
                    curve,
                    curve_offset,
                    color,
                });
            }
            let count = d.count()?;
            for _ in 0..count {
                let light = d.color()?;
                let dark = d.color()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.two_color.push(KeyFrameTwoColor {
                    time,
                    curve,
                    curve_offset,
                    light,
                    dark,
                });
            }
            Ok(frames)
        })?;

        let transforms = self.map(|d| {
            let count = d.count()?;
            let mut frames = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                let position_mix = d.input.f32()?;
                let rotation_mix = d.input.f32()?;
                let scale_mix = d.input.f32()?;
                let shear_mix = d.input.f32()?;
                let (time, curve, curve_offset) = d.base_keyframe()?;
                frames.push(KeyFrameTransform {
                    time,
                    curve,
                    curve_offset,
                    position_mix,
                    rotation_mix,
                    scale_mix,
                    shear_mix,
                });
            }
            Ok(frames)
        })?;

        Ok(Clip {
            bones,
            deforms,
            draw_order,
            events,
            ik,
            paths,
            slots,
            transforms,
        })
    }

    fn key2d_vec(&mut self) -> Result<Vec<KeyFrame2D>, Error> {
        let count = self.count()?;
        let mut frames = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let x = self.input.f32()?;
            let y = self.input.f32()?;
            let (time, curve, curve_offset) = self.base_keyframe()?;
            frames.push(KeyFrame2D {
                time,
                curve,
                curve_offset,
                x,
                y,
            });
        }
        Ok(frames)
    }

    fn definition(&mut self) -> Result<Definition, Error> {
        let count = self.count()?;
        let mut bones = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            bones.push(self.bone()?);
        }
        let bone_lookup = self.lookup()?;
        let clips = self.map(|d| Ok(Arc::new(d.clip()?)))?;
        let curves = self.curve_table()?;
        let events = self.map(|d| d.event())?;
        let count = self.count()?;
        let mut ik = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            ik.push(self.ik()?);
        }
        let ik_lookup = self.lookup()?;
        let meta = self.meta()?;
        let count = self.count()?;
        let mut paths = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            paths.push(self.path_def()?);
        }
        let path_lookup = self.lookup()?;
        let count = self.count()?;
        let mut pose_tasks = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            pose_tasks.push(self.pose_task()?);
        }
        let skins = self.map(|d| d.map(|d| d.map(|d| d.attachment())))?;
        let count = self.count()?;
        let mut slots = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            slots.push(self.slot()?);
        }
        let slot_lookup = self.lookup()?;
        let count = self.count()?;
        let mut transforms = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            transforms.push(self.transform()?);
        }
        let transform_lookup = self.lookup()?;

        let def = Definition {
            bones,
            bone_lookup,
            clips,
            curves,
            events,
            ik,
            ik_lookup,
            meta,
            paths,
            path_lookup,
            pose_tasks,
            skins,
            slots,
            slot_lookup,
            transforms,
            transform_lookup,
        };

        validate_indices(&def)?;
        validate_linked_meshes(&def)?;
        Ok(def)
    }
}

/// Resolved indices arrive pre-baked in the stream; reject anything that
/// would index out of range before the definition is published.
fn validate_indices(def: &Definition) -> Result<(), Error> {
    fn check(what: &'static str, index: i16, len: usize) -> Result<(), Error> {
        if index < 0 || index as usize >= len {
            return Err(Error::FormatIndex { what, index, len });
        }
        Ok(())
    }

    let bones = def.bones.len();
    for (i, bone) in def.bones.iter().enumerate() {
        if bone.parent >= 0 && bone.parent as usize >= i {
            return Err(Error::ShapeBoneOrder {
                bone: bone.id.as_str().to_string(),
            });
        }
    }
    for slot in &def.slots {
        check("slot bone index", slot.bone, bones)?;
    }
    for ik in &def.ik {
        check("ik target index", ik.target, bones)?;
        for &bone in &ik.bones {
            check("ik chain index", bone, bones)?;
        }
    }
    for path in &def.paths {
        check("path target index", path.target, def.slots.len())?;
        for &bone in &path.bones {
            check("path chain index", bone, bones)?;
        }
    }
    for transform in &def.transforms {
        check("transform target index", transform.target, bones)?;
        for &bone in &transform.bones {
            check("transform chain index", bone, bones)?;
        }
    }
    for task in &def.pose_tasks {
        match task.kind {
            PoseTaskKind::Bone => check("pose task bone index", task.index, bones)?,
            PoseTaskKind::Ik => check("pose task ik index", task.index, def.ik.len())?,
            PoseTaskKind::Path => check("pose task path index", task.index, def.paths.len())?,
            PoseTaskKind::Transform => {
                check("pose task transform index", task.index, def.transforms.len())?
            }
        }
    }
    Ok(())
}

/// Linked mesh parents span skins, so they can only be checked after the
/// whole skin table has been read.
fn validate_linked_meshes(def: &Definition) -> Result<(), Error> {
    let default_skin = NameId::new(crate::attachment::DEFAULT_SKIN);
    for slots in def.skins.values() {
        for (&slot_id, set) in slots {
            for (&name, attachment) in set {
                let Attachment::LinkedMesh(mesh) = attachment else {
                    continue;
                };
                let skin_id = if mesh.skin.is_empty() {
                    default_skin
                } else {
                    mesh.skin
                };
                let skin = def.skins.get(&skin_id).ok_or_else(|| {
                    Error::ReferenceLinkedMeshSkin {
                        attachment: name.as_str().to_string(),
                        skin: skin_id.as_str().to_string(),
                    }
                })?;
                let parent = skin.get(&slot_id).and_then(|set| set.get(&mesh.parent));
                let Some(parent) = parent else {
                    return Err(Error::ReferenceLinkedMeshParent {
                        attachment: name.as_str().to_string(),
                        parent: mesh.parent.as_str().to_string(),
                        skin: skin_id.as_str().to_string(),
                        slot: slot_id.as_str().to_string(),
                    });
                };
                if parent.kind() != AttachmentKind::Mesh {
                    return Err(Error::ReferenceLinkedMeshKind {
                        attachment: name.as_str().to_string(),
                        parent: mesh.parent.as_str().to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public entry points.

/// Serialize a finalized definition for the given target platform.
pub fn encode(def: &Definition, platform: Platform) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.definition(def);
    encoder.finish(platform)
}

/// Deserialize a definition. Any mismatched signature, unknown version,
/// truncated read, out-of-range index or duplicate map key fails without
/// publishing partial state.
pub fn decode(bytes: &[u8]) -> Result<Definition, Error> {
    Decoder::begin(bytes)?.definition()
}

pub fn write_all<W: Write>(
    def: &Definition,
    writer: &mut W,
    platform: Platform,
) -> Result<(), Error> {
    let bytes = encode(def, platform);
    writer.write_all(&bytes)?;
    Ok(())
}

pub fn read_all<R: Read>(reader: &mut R) -> Result<Definition, Error> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes)
}

/// XOR the payload with a keystream derived from the lowercase base filename
/// (no extension). The transform is its own inverse.
pub fn obfuscate(data: &mut [u8], base_name: &str) {
    let mut key: u32 = 0x90B4_3928;
    for b in base_name.bytes() {
        key = key
            .wrapping_mul(33)
            .wrapping_add(b.to_ascii_lowercase() as u32);
    }

    for (i, byte) in data.iter_mut().enumerate() {
        // Mix in the byte offset.
        *byte ^= ((key >> ((i & 3) << 3)) as u8).wrapping_add(((i / 4) * 101) as u8);
    }
}

/// Produce the on-wire form: encoded body, zstd-compressed, obfuscated with
/// the container's base filename.
#[cfg(feature = "container")]
pub fn pack(def: &Definition, platform: Platform, base_name: &str) -> Result<Vec<u8>, Error> {
    let raw = encode(def, platform);
    let mut compressed =
        zstd::bulk::compress(&raw, 0).map_err(|e| Error::FormatCompression {
            action: "compress",
            message: e.to_string(),
        })?;
    obfuscate(&mut compressed, base_name);
    Ok(compressed)
}

/// Inverse of [`pack`]: deobfuscate, decompress, decode.
#[cfg(feature = "container")]
pub fn unpack(data: &[u8], base_name: &str) -> Result<Definition, Error> {
    let mut bytes = data.to_vec();
    obfuscate(&mut bytes, base_name);
    let raw = zstd::stream::decode_all(&bytes[..]).map_err(|e| Error::FormatCompression {
        action: "decompress",
        message: e.to_string(),
    })?;
    decode(&raw)
}
