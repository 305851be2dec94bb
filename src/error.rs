use thiserror::Error;

/// Crate-wide error type.
///
/// Variants fall into three structural families: `Format*` for malformed
/// binary data, `Reference*` for names that fail to resolve during
/// finalization, and `Shape*` for structural invariant violations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad container signature {found:#010x}")]
    FormatSignature { found: u32 },

    #[error("unsupported container version {found}")]
    FormatVersion { found: u32 },

    #[error("unknown target platform tag {found}")]
    FormatPlatform { found: u8 },

    #[error("unexpected end of data at offset {offset}")]
    FormatEof { offset: usize },

    #[error("string table index {index} out of range ({len} entries)")]
    FormatStringIndex { index: u16, len: usize },

    #[error("duplicate key '{key}' in serialized table")]
    FormatDuplicateKey { key: String },

    #[error("unknown {what} tag {found}")]
    FormatEnum { what: &'static str, found: u32 },

    #[error("{what} {index} out of range ({len} entries)")]
    FormatIndex {
        what: &'static str,
        index: i16,
        len: usize,
    },

    #[error("invalid utf-8 in serialized string: {message}")]
    FormatUtf8 { message: String },

    #[cfg(feature = "container")]
    #[error("container payload failed to {action}: {message}")]
    FormatCompression {
        action: &'static str,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown parent bone '{parent}' for bone '{bone}'")]
    ReferenceBoneParent { bone: String, parent: String },

    #[error("unknown target bone '{target}' for ik constraint '{constraint}'")]
    ReferenceIkTarget { constraint: String, target: String },

    #[error("unknown bone '{bone}' in chain of ik constraint '{constraint}'")]
    ReferenceIkBone { constraint: String, bone: String },

    #[error("unknown target slot '{slot}' for path constraint '{constraint}'")]
    ReferencePathTarget { constraint: String, slot: String },

    #[error("unknown bone '{bone}' in chain of path constraint '{constraint}'")]
    ReferencePathBone { constraint: String, bone: String },

    #[error(
        "path constraint '{constraint}' target slot '{slot}' has no path attachment in the default skin"
    )]
    ReferencePathAttachment { constraint: String, slot: String },

    #[error("unknown target bone '{target}' for transform constraint '{constraint}'")]
    ReferenceTransformTarget { constraint: String, target: String },

    #[error("unknown bone '{bone}' in chain of transform constraint '{constraint}'")]
    ReferenceTransformBone { constraint: String, bone: String },

    #[error("unknown bone '{bone}' for slot '{slot}'")]
    ReferenceSlotBone { slot: String, bone: String },

    #[error("linked mesh '{attachment}' names missing skin '{skin}'")]
    ReferenceLinkedMeshSkin { attachment: String, skin: String },

    #[error("linked mesh '{attachment}' parent '{parent}' not found in skin '{skin}', slot '{slot}'")]
    ReferenceLinkedMeshParent {
        attachment: String,
        parent: String,
        skin: String,
        slot: String,
    },

    #[error("linked mesh '{attachment}' parent '{parent}' is not a mesh")]
    ReferenceLinkedMeshKind { attachment: String, parent: String },

    #[error("duplicate {what} name '{name}'")]
    ReferenceDuplicateName { what: &'static str, name: String },

    #[error("unknown clip '{name}'")]
    UnknownClip { name: String },

    #[error("bone '{bone}' appears before its parent")]
    ShapeBoneOrder { bone: String },

    #[error("{what} constraint '{constraint}' has an empty bone chain")]
    ShapeEmptyChain {
        what: &'static str,
        constraint: String,
    },

    #[error("ik constraint '{constraint}' drives {len} bones (1 or 2 supported)")]
    ShapeIkChainLength { constraint: String, len: usize },

    #[error("weighted vertex data of attachment '{attachment}' is malformed")]
    ShapeVertexData { attachment: String },

    #[error("mesh '{attachment}' has {vertices} vertex floats for {uvs} uvs")]
    ShapeMeshVertexCount {
        attachment: String,
        vertices: usize,
        uvs: usize,
    },
}
