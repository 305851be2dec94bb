use std::collections::HashMap;

use crate::codec::{self, Platform};
use crate::{
    Attachment, BoneDef, BoneKeyFrames, BoundingBoxAttachment, Clip, ClippingAttachment, Color32,
    CurveType, Definition, DrawOrderOffset, Error, EventDef, IkDef, KeyFrame2D, KeyFrameAttachment,
    KeyFrameColor, KeyFrameDeform, KeyFrameDrawOrder, KeyFrameEvent, KeyFrameIk, KeyFramePathMix,
    KeyFramePathPosition, KeyFramePathSpacing, KeyFrameRotation, KeyFrameScale, KeyFrameTransform,
    KeyFrameTwoColor, LinkedMeshAttachment, MeshAttachment, Meta, NameId, PathAttachment, PathDef,
    PathKeyFrames, PointAttachment, RegionAttachment, RelPath, SlotDef, SlotKeyFrames,
    TransformDef, DEFAULT_SKIN,
};

fn n(name: &str) -> NameId {
    NameId::new(name)
}

fn bone(name: &str, parent: &str) -> BoneDef {
    BoneDef {
        id: n(name),
        parent_id: n(parent),
        length: 12.5,
        ..BoneDef::default()
    }
}

fn sample_clip() -> Clip {
    let mut bones = HashMap::new();
    bones.insert(
        n("arm"),
        BoneKeyFrames {
            rotation: vec![
                KeyFrameRotation {
                    time: 0.0,
                    angle: 0.0,
                    ..KeyFrameRotation::default()
                },
                KeyFrameRotation {
                    time: 0.5,
                    curve: CurveType::Bezier,
                    curve_offset: 0,
                    angle: 45.0,
                },
            ],
            scale: vec![KeyFrameScale {
                time: 0.25,
                x: 2.0,
                y: 0.5,
                ..KeyFrameScale::default()
            }],
            shear: vec![KeyFrame2D {
                time: 0.0,
                x: 1.0,
                y: -1.0,
                ..KeyFrame2D::default()
            }],
            translation: vec![KeyFrame2D {
                time: 0.0,
                curve: CurveType::Stepped,
                x: 4.0,
                y: 8.0,
                ..KeyFrame2D::default()
            }],
        },
    );

    let mut body_deforms = HashMap::new();
    body_deforms.insert(
        n("body-mesh"),
        vec![KeyFrameDeform {
            time: 0.0,
            vertices: vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
            ..KeyFrameDeform::default()
        }],
    );
    let mut deform_slots = HashMap::new();
    deform_slots.insert(n("body"), body_deforms);
    let mut deforms = HashMap::new();
    deforms.insert(n(DEFAULT_SKIN), deform_slots);

    let mut ik = HashMap::new();
    ik.insert(
        n("reach"),
        vec![KeyFrameIk {
            time: 0.0,
            mix: 0.5,
            softness: 2.0,
            bend_positive: false,
            ..KeyFrameIk::default()
        }],
    );

    let mut paths = HashMap::new();
    paths.insert(
        n("follow"),
        PathKeyFrames {
            mix: vec![KeyFramePathMix {
                time: 0.0,
                position_mix: 0.5,
                rotation_mix: 0.25,
                ..KeyFramePathMix::default()
            }],
            position: vec![KeyFramePathPosition {
                time: 0.0,
                position: 0.75,
                ..KeyFramePathPosition::default()
            }],
            spacing: vec![KeyFramePathSpacing {
                time: 0.0,
                spacing: 3.0,
                ..KeyFramePathSpacing::default()
            }],
        },
    );

    let mut slots = HashMap::new();
    slots.insert(
        n("body"),
        SlotKeyFrames {
            attachment: vec![KeyFrameAttachment {
                time: 0.0,
                id: n("body-mesh"),
            }],
            color: vec![KeyFrameColor {
                time: 0.0,
                color: Color32 {
                    r: 200,
                    g: 100,
                    b: 50,
                    a: 255,
                },
                ..KeyFrameColor::default()
            }],
            two_color: vec![KeyFrameTwoColor {
                time: 0.0,
                light: Color32::WHITE,
                dark: Color32 {
                    r: 20,
                    g: 30,
                    b: 40,
                    a: 255,
                },
                ..KeyFrameTwoColor::default()
            }],
        },
    );

    let mut transforms = HashMap::new();
    transforms.insert(
        n("copy"),
        vec![KeyFrameTransform {
            time: 0.0,
            position_mix: 0.5,
            ..KeyFrameTransform::default()
        }],
    );

    Clip {
        bones,
        deforms,
        draw_order: vec![KeyFrameDrawOrder {
            time: 0.0,
            offsets: vec![DrawOrderOffset {
                slot: n("body"),
                offset: 1,
            }],
        }],
        events: vec![KeyFrameEvent {
            time: 0.25,
            float_value: 1.5,
            int_value: 7,
            string_value: "footstep".to_string(),
            id: n("step"),
        }],
        ik,
        paths,
        slots,
        transforms,
    }
}

fn sample_definition() -> Definition {
    let mesh = {
        let mut mesh = MeshAttachment {
            image: RelPath::new("chars/hero-body"),
            triangles: vec![0, 1, 2],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            vertices: vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]],
            ..MeshAttachment::default()
        };
        mesh.set_raw_vertices(n("body-mesh"), &[0.0, 0.0, 10.0, 0.0, 0.0, 10.0])
            .unwrap();
        mesh
    };

    let mut path_attachment = PathAttachment {
        vertex_count: 6,
        vertices: vec![0.0, 0.0, 0.0, 0.0, 30.0, 0.0, 60.0, 0.0, 90.0, 0.0, 90.0, 0.0],
        lengths: vec![90.0],
        constant_speed: true,
        ..PathAttachment::default()
    };
    path_attachment.finish(n("track-path")).unwrap();

    let mut clipping = ClippingAttachment {
        vertex_count: 3,
        vertices: vec![0.0, 0.0, 5.0, 0.0, 5.0, 5.0],
        ..ClippingAttachment::default()
    };
    clipping.finish(n("scissor")).unwrap();

    let mut body_set = HashMap::new();
    body_set.insert(n("body-mesh"), Attachment::Mesh(mesh));
    body_set.insert(
        n("body-region"),
        Attachment::Region(RegionAttachment {
            image: RelPath::new("chars/hero-arm"),
            width: 64.0,
            height: 48.0,
            rotation: 15.0,
            ..RegionAttachment::default()
        }),
    );
    body_set.insert(
        n("body-alt"),
        Attachment::LinkedMesh(LinkedMeshAttachment {
            image: RelPath::new("chars/hero-alt"),
            parent: n("body-mesh"),
            ..LinkedMeshAttachment::default()
        }),
    );
    body_set.insert(n("hit-box"), Attachment::BoundingBox(BoundingBoxAttachment {}));
    body_set.insert(
        n("anchor"),
        Attachment::Point(PointAttachment {
            x: 2.0,
            y: 3.0,
            rotation: 90.0,
        }),
    );
    body_set.insert(n("scissor"), Attachment::Clipping(clipping));

    let mut track_set = HashMap::new();
    track_set.insert(n("track-path"), Attachment::Path(path_attachment));

    let mut default_skin = HashMap::new();
    default_skin.insert(n("body"), body_set);
    default_skin.insert(n("track"), track_set);
    let mut skins = HashMap::new();
    skins.insert(n(DEFAULT_SKIN), default_skin);

    let mut events = HashMap::new();
    events.insert(
        n("step"),
        EventDef {
            float_value: 1.0,
            int_value: 3,
            string_value: "dirt".to_string(),
        },
    );

    let mut clips = HashMap::new();
    clips.insert(n("walk"), std::sync::Arc::new(sample_clip()));

    let mut def = Definition {
        bones: vec![
            bone("root", ""),
            bone("arm", "root"),
            bone("hand", "arm"),
            bone("carrier", "root"),
            bone("t", "root"),
        ],
        slots: vec![
            SlotDef {
                id: n("body"),
                bone_id: n("arm"),
                attachment_id: n("body-mesh"),
                color: Color32 {
                    r: 255,
                    g: 255,
                    b: 255,
                    a: 255,
                },
                dark_color: Color32 {
                    r: 10,
                    g: 20,
                    b: 30,
                    a: 255,
                },
                has_dark_color: true,
                ..SlotDef::default()
            },
            SlotDef {
                id: n("track"),
                bone_id: n("carrier"),
                attachment_id: n("track-path"),
                ..SlotDef::default()
            },
        ],
        ik: vec![IkDef {
            id: n("reach"),
            target_id: n("t"),
            bone_ids: vec![n("arm"), n("hand")],
            softness: 4.0,
            ..IkDef::default()
        }],
        paths: vec![PathDef {
            id: n("follow"),
            target_id: n("track"),
            bone_ids: vec![n("hand")],
            order: 1,
            ..PathDef::default()
        }],
        transforms: vec![TransformDef {
            id: n("copy"),
            target_id: n("t"),
            bone_ids: vec![n("carrier")],
            delta_rotation: 30.0,
            order: 2,
            ..TransformDef::default()
        }],
        curves: vec![crate::populate_bezier_curve(0.25, 0.0, 0.75, 1.0)],
        events,
        clips,
        skins,
        meta: Meta {
            x: 1.0,
            y: -2.0,
            fps: 60.0,
            width: 128.0,
            height: 256.0,
        },
        ..Definition::default()
    };
    def.finalize().unwrap();
    def
}

#[test]
fn binary_round_trip_preserves_definition() {
    let def = sample_definition();
    let bytes = codec::encode(&def, Platform::current());
    let decoded = codec::decode(&bytes).unwrap();
    assert_eq!(decoded, def);
}

#[test]
fn io_round_trip_preserves_definition() {
    let def = sample_definition();
    let mut buffer = Vec::new();
    codec::write_all(&def, &mut buffer, Platform::current()).unwrap();
    let decoded = codec::read_all(&mut std::io::Cursor::new(buffer)).unwrap();
    assert_eq!(decoded, def);
}

#[test]
fn decode_rejects_bad_signature() {
    let def = sample_definition();
    let mut bytes = codec::encode(&def, Platform::current());
    bytes[0] ^= 0xFF;
    assert!(matches!(
        codec::decode(&bytes),
        Err(Error::FormatSignature { .. })
    ));
}

#[test]
fn decode_rejects_unknown_version() {
    let def = sample_definition();
    let mut bytes = codec::encode(&def, Platform::current());
    bytes[4] = 99;
    assert!(matches!(
        codec::decode(&bytes),
        Err(Error::FormatVersion { found: 99 })
    ));
}

#[test]
fn decode_rejects_truncated_input() {
    let def = sample_definition();
    let bytes = codec::encode(&def, Platform::current());
    let truncated = &bytes[..bytes.len() / 2];
    assert!(codec::decode(truncated).is_err());
}

#[test]
fn decode_rejects_empty_input() {
    assert!(matches!(
        codec::decode(&[]),
        Err(Error::FormatEof { offset: 0 })
    ));
}

#[test]
fn encoding_is_deterministic() {
    let def = sample_definition();
    assert_eq!(
        codec::encode(&def, Platform::current()),
        codec::encode(&def, Platform::current())
    );
}

#[test]
fn paths_are_stored_with_target_separator() {
    // Only meaningful when host and target separators differ.
    if std::path::MAIN_SEPARATOR == '\\' {
        return;
    }

    let def = sample_definition();
    let bytes = codec::encode(&def, Platform::Windows);

    let needle = b"chars\\hero-arm";
    assert!(bytes.windows(needle.len()).any(|w| w == needle));

    // Reading rewrites separators back to the current platform's.
    let decoded = codec::decode(&bytes).unwrap();
    assert_eq!(decoded, def);
}

#[test]
fn obfuscation_round_trips() {
    let original: Vec<u8> = (0u32..512).map(|i| (i * 31 % 251) as u8).collect();

    let mut data = original.clone();
    codec::obfuscate(&mut data, "hero_idle");
    assert_ne!(data, original);

    codec::obfuscate(&mut data, "hero_idle");
    assert_eq!(data, original);
}

#[test]
fn obfuscation_key_depends_on_file_name() {
    let original = vec![0u8; 64];

    let mut a = original.clone();
    codec::obfuscate(&mut a, "hero_idle");
    let mut b = original.clone();
    codec::obfuscate(&mut b, "hero_walk");
    assert_ne!(a, b);

    // The key derivation lower-cases the name, so case differences are
    // immaterial.
    let mut c = original.clone();
    codec::obfuscate(&mut c, "HERO_Idle");
    assert_eq!(a, c);
}

#[cfg(feature = "container")]
#[test]
fn container_round_trip() {
    let def = sample_definition();
    let packed = codec::pack(&def, Platform::current(), "hero").unwrap();
    let unpacked = codec::unpack(&packed, "hero").unwrap();
    assert_eq!(unpacked, def);
}

#[cfg(feature = "container")]
#[test]
fn container_rejects_wrong_key() {
    let def = sample_definition();
    let packed = codec::pack(&def, Platform::current(), "hero").unwrap();
    assert!(codec::unpack(&packed, "villain").is_err());
}
