//! Attachments are bound into slots and driven by the rigged skeleton.
//! Region attachments are renderable bitmaps; meshes add deformable,
//! optionally skinned geometry; paths, points, bounding boxes and clipping
//! polygons drive the simulation or runtime queries.

use crate::error::Error;
use crate::ids::{NameId, RelPath};
use crate::math::Color32;

/// Name of the skin used when no skin has been explicitly selected.
pub const DEFAULT_SKIN: &str = "default";

/// Path and clipping attachments store `vertex_count` pre-multiplied by this
/// factor after normalization. The doubling matches the reference Spine
/// runtime's bookkeeping for the same field.
pub const PATH_VERTEX_COMPONENT_FACTOR: u32 = 2;

/// Meshes keep at most this many derived edges, greatest UV separation first.
pub const MAX_MESH_EDGES: usize = 9;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttachmentKind {
    Region,
    BoundingBox,
    LinkedMesh,
    Mesh,
    Path,
    Point,
    Clipping,
}

impl AttachmentKind {
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            AttachmentKind::Region => 0,
            AttachmentKind::BoundingBox => 1,
            AttachmentKind::LinkedMesh => 2,
            AttachmentKind::Mesh => 3,
            AttachmentKind::Path => 4,
            AttachmentKind::Point => 5,
            AttachmentKind::Clipping => 6,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<AttachmentKind> {
        match tag {
            0 => Some(AttachmentKind::Region),
            1 => Some(AttachmentKind::BoundingBox),
            2 => Some(AttachmentKind::LinkedMesh),
            3 => Some(AttachmentKind::Mesh),
            4 => Some(AttachmentKind::Path),
            5 => Some(AttachmentKind::Point),
            6 => Some(AttachmentKind::Clipping),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Attachment {
    Region(RegionAttachment),
    BoundingBox(BoundingBoxAttachment),
    LinkedMesh(LinkedMeshAttachment),
    Mesh(MeshAttachment),
    Path(PathAttachment),
    Point(PointAttachment),
    Clipping(ClippingAttachment),
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Attachment::Region(_) => AttachmentKind::Region,
            Attachment::BoundingBox(_) => AttachmentKind::BoundingBox,
            Attachment::LinkedMesh(_) => AttachmentKind::LinkedMesh,
            Attachment::Mesh(_) => AttachmentKind::Mesh,
            Attachment::Path(_) => AttachmentKind::Path,
            Attachment::Point(_) => AttachmentKind::Point,
            Attachment::Clipping(_) => AttachmentKind::Clipping,
        }
    }
}

/// A textured quad posed relative to its slot's bone.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionAttachment {
    pub color: Color32,
    pub image: RelPath,
    pub height: f32,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub width: f32,
}

impl Default for RegionAttachment {
    fn default() -> Self {
        RegionAttachment {
            color: Color32::WHITE,
            image: RelPath::default(),
            height: 32.0,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            width: 32.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundingBoxAttachment {}

/// A unique triangle edge with precomputed terms used for runtime texture
/// resolution queries: `|1 / (uv1 - uv0)|` per axis and the squared UV
/// separation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Edge {
    pub abs_one_over_diff_uv: [f32; 2],
    pub sep_squared: f32,
    pub v0: u16,
    pub v1: u16,
}

impl Edge {
    fn new(u0: u16, u1: u16) -> Edge {
        Edge {
            abs_one_over_diff_uv: [0.0, 0.0],
            sep_squared: 0.0,
            v0: u0.min(u1),
            v1: u0.max(u1),
        }
    }
}

/// One bone influence on a skinned mesh vertex.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoneLink {
    pub bone: u32,
    pub weight: f32,
}

/// Deformable, optionally skinned triangle geometry.
///
/// Vertices have two possible representations:
/// - unweighted: `vertices.len() == uvs.len()`, `bone_counts` and `links`
///   are empty;
/// - skinned: `bone_counts.len() == uvs.len()`, and each count covers that
///   many consecutive entries of `links` and `vertices`.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshAttachment {
    pub color: Color32,
    pub image: RelPath,
    pub height: f32,
    pub hull: i32,
    pub edges: Vec<Edge>,
    pub triangles: Vec<u16>,
    pub uvs: Vec<[f32; 2]>,
    pub width: f32,
    pub bone_counts: Vec<u16>,
    pub links: Vec<BoneLink>,
    pub vertices: Vec<[f32; 2]>,
}

impl Default for MeshAttachment {
    fn default() -> Self {
        MeshAttachment {
            color: Color32::WHITE,
            image: RelPath::default(),
            height: 32.0,
            hull: 0,
            edges: Vec::new(),
            triangles: Vec::new(),
            uvs: Vec::new(),
            width: 32.0,
            bone_counts: Vec::new(),
            links: Vec::new(),
            vertices: Vec::new(),
        }
    }
}

impl MeshAttachment {
    /// Split a raw authoring-format vertex array into this mesh.
    ///
    /// A plain array of `2 * uvs.len()` floats is position data. Anything
    /// else is the skinned interleaving
    /// `(bone_count, { bone, x, y, weight } * bone_count)` per vertex.
    pub fn set_raw_vertices(&mut self, name: NameId, raw: &[f32]) -> Result<(), Error> {
        self.bone_counts.clear();
        self.links.clear();
        self.vertices.clear();

        if raw.len() == 2 * self.uvs.len() {
            self.vertices
                .extend(raw.chunks_exact(2).map(|v| [v[0], v[1]]));
        } else {
            let mut i = 0usize;
            while i < raw.len() {
                let bone_count = raw[i] as usize;
                i += 1;
                if i + 4 * bone_count > raw.len() {
                    return Err(Error::ShapeVertexData {
                        attachment: name.as_str().to_string(),
                    });
                }
                for _ in 0..bone_count {
                    self.links.push(BoneLink {
                        bone: raw[i] as u32,
                        weight: raw[i + 3],
                    });
                    self.vertices.push([raw[i + 1], raw[i + 2]]);
                    i += 4;
                }
                self.bone_counts.push(bone_count as u16);
            }
            if self.bone_counts.len() != self.uvs.len() {
                return Err(Error::ShapeMeshVertexCount {
                    attachment: name.as_str().to_string(),
                    vertices: self.bone_counts.len(),
                    uvs: self.uvs.len(),
                });
            }
        }

        // Derive the local bounds.
        if self.vertices.is_empty() {
            self.width = 32.0;
            self.height = 32.0;
        } else {
            let mut min = [f32::MAX, f32::MAX];
            let mut max = [f32::MIN, f32::MIN];
            for v in &self.vertices {
                min[0] = min[0].min(v[0]);
                min[1] = min[1].min(v[1]);
                max[0] = max[0].max(v[0]);
                max[1] = max[1].max(v[1]);
            }
            self.width = (max[0] - min[0]).abs();
            self.height = (max[1] - min[1]).abs();
        }

        Ok(())
    }

    /// Rebuild the derived edge list: unique undirected triangle edges,
    /// zero-UV-separation edges dropped, kept in descending UV separation
    /// order, truncated to [`MAX_MESH_EDGES`].
    pub fn compute_edges(&mut self) {
        self.edges.clear();

        let mut seen = std::collections::HashSet::<(u16, u16)>::new();
        for tri in self.triangles.chunks_exact(3) {
            for (u0, u1) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let mut edge = Edge::new(u0, u1);
                if !seen.insert((edge.v0, edge.v1)) {
                    continue;
                }
                let (Some(t0), Some(t1)) = (
                    self.uvs.get(edge.v0 as usize),
                    self.uvs.get(edge.v1 as usize),
                ) else {
                    continue;
                };
                let diff = [t1[0] - t0[0], t1[1] - t0[1]];
                edge.sep_squared = diff[0] * diff[0] + diff[1] * diff[1];
                if edge.sep_squared == 0.0 {
                    continue;
                }
                edge.abs_one_over_diff_uv = [
                    if diff[0] == 0.0 {
                        0.0
                    } else {
                        (1.0 / diff[0]).abs()
                    },
                    if diff[1] == 0.0 {
                        0.0
                    } else {
                        (1.0 / diff[1]).abs()
                    },
                ];
                self.edges.push(edge);
            }
        }

        self.edges
            .sort_by(|a, b| b.sep_squared.total_cmp(&a.sep_squared));
        self.edges.truncate(MAX_MESH_EDGES);
    }
}

/// A mesh that borrows its geometry from a parent mesh in another skin.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedMeshAttachment {
    pub color: Color32,
    pub image: RelPath,
    pub height: f32,
    pub parent: NameId,
    /// Skin the parent mesh lives in; empty means the default skin.
    pub skin: NameId,
    pub width: f32,
    pub deform: bool,
}

impl Default for LinkedMeshAttachment {
    fn default() -> Self {
        LinkedMeshAttachment {
            color: Color32::WHITE,
            image: RelPath::default(),
            height: 32.0,
            parent: NameId::EMPTY,
            skin: NameId::EMPTY,
            width: 32.0,
            deform: true,
        }
    }
}

/// A cubic Bezier spline followed by path constraints.
///
/// After [`PathAttachment::finish`], `vertices` holds the flat control point
/// floats, and for skinned paths `bone_counts` holds the mixed
/// `count, bone...` layout with per-influence `weights`.
#[derive(Clone, Debug, PartialEq)]
pub struct PathAttachment {
    pub bone_counts: Vec<u16>,
    pub lengths: Vec<f32>,
    pub vertices: Vec<f32>,
    pub weights: Vec<f32>,
    pub vertex_count: u32,
    /// Attachment name, stamped during finalization.
    pub id: NameId,
    /// Slot name the attachment is keyed under, stamped during finalization.
    pub slot: NameId,
    pub closed: bool,
    pub constant_speed: bool,
}

impl Default for PathAttachment {
    fn default() -> Self {
        PathAttachment {
            bone_counts: Vec::new(),
            lengths: Vec::new(),
            vertices: Vec::new(),
            weights: Vec::new(),
            vertex_count: 0,
            id: NameId::EMPTY,
            slot: NameId::EMPTY,
            closed: false,
            constant_speed: true,
        }
    }
}

impl PathAttachment {
    /// Normalize freshly authored data. Must run once before the attachment
    /// is used; decoded binaries are already normalized.
    pub fn finish(&mut self, name: NameId) -> Result<(), Error> {
        self.vertex_count *= PATH_VERTEX_COMPONENT_FACTOR;
        let (bone_counts, vertices, weights) =
            split_weighted_vertices(name, self.vertex_count, &self.vertices)?;
        if let Some(bone_counts) = bone_counts {
            self.bone_counts = bone_counts;
            self.vertices = vertices;
            self.weights = weights;
        } else {
            self.bone_counts.clear();
        }
        Ok(())
    }
}

/// A named spatial marker posed relative to its slot's bone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointAttachment {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

/// A clipping polygon; same geometry rules as paths, no curvature metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClippingAttachment {
    pub bone_counts: Vec<u16>,
    pub vertices: Vec<f32>,
    pub weights: Vec<f32>,
    pub vertex_count: u32,
}

impl ClippingAttachment {
    /// Normalize freshly authored data, see [`PathAttachment::finish`].
    pub fn finish(&mut self, name: NameId) -> Result<(), Error> {
        self.vertex_count *= PATH_VERTEX_COMPONENT_FACTOR;
        let (bone_counts, vertices, weights) =
            split_weighted_vertices(name, self.vertex_count, &self.vertices)?;
        if let Some(bone_counts) = bone_counts {
            self.bone_counts = bone_counts;
            self.vertices = vertices;
            self.weights = weights;
        } else {
            self.bone_counts.clear();
        }
        Ok(())
    }
}

/// Split a raw `vertices` blob into `(bone_counts, positions, weights)` when
/// it is weighted. Returns `None` bone counts for plain position data.
#[allow(clippy::type_complexity)]
fn split_weighted_vertices(
    name: NameId,
    vertex_count: u32,
    raw: &[f32],
) -> Result<(Option<Vec<u16>>, Vec<f32>, Vec<f32>), Error> {
    if vertex_count as usize == raw.len() {
        return Ok((None, Vec::new(), Vec::new()));
    }

    let mut bone_counts = Vec::new();
    let mut vertices = Vec::new();
    let mut weights = Vec::new();

    let mut i = 0usize;
    while i < raw.len() {
        let bone_count = raw[i] as usize;
        i += 1;
        if i + 4 * bone_count > raw.len() {
            return Err(Error::ShapeVertexData {
                attachment: name.as_str().to_string(),
            });
        }
        bone_counts.push(bone_count as u16);
        for _ in 0..bone_count {
            bone_counts.push(raw[i] as u16);
            vertices.push(raw[i + 1]);
            vertices.push(raw[i + 2]);
            weights.push(raw[i + 3]);
            i += 4;
        }
    }

    Ok((Some(bone_counts), vertices, weights))
}
