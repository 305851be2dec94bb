use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    Attachment, BoneDef, BoneState, Color32, Definition, IkDef, IkEntry, Mat2x3, NameId,
    NullEventSink, PathAttachment, PathDef, PathPositionMode, PathRotationMode, PoseInstance,
    SlotDef, TransformDef, TwoColorEntry, DEFAULT_SKIN,
};

fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn n(name: &str) -> NameId {
    NameId::new(name)
}

fn bone(name: &str, parent: &str) -> BoneDef {
    BoneDef {
        id: n(name),
        parent_id: n(parent),
        ..BoneDef::default()
    }
}

fn instance_for(mut def: Definition) -> (Arc<Definition>, PoseInstance) {
    def.finalize().unwrap();
    let def = Arc::new(def);
    let instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    (def, instance)
}

#[test]
fn two_bone_chain_accumulates_translation() {
    let (_, instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                length: 10.0,
                ..bone("a", "root")
            },
            BoneDef {
                x: 10.0,
                ..bone("b", "a")
            },
        ],
        ..Definition::default()
    });

    let palette = instance.skinning_palette();
    assert_approx(palette[2].tx, 10.0, 1.0e-4);
    assert_approx(palette[2].ty, 0.0, 1.0e-4);
}

#[test]
fn setup_pose_matches_composed_local_transforms() {
    let (def, instance) = instance_for(Definition {
        bones: vec![
            BoneDef {
                x: 5.0,
                y: -3.0,
                rotation: 30.0,
                ..bone("root", "")
            },
            BoneDef {
                x: 8.0,
                rotation: -45.0,
                scale_x: 2.0,
                ..bone("mid", "root")
            },
            BoneDef {
                y: 4.0,
                shear_x: 10.0,
                scale_y: 0.5,
                ..bone("tip", "mid")
            },
        ],
        ..Definition::default()
    });

    // With no active clips the palette must equal the composition of each
    // bone's setup local transform up the parent chain.
    let mut expected = vec![Mat2x3::IDENTITY; def.bones.len()];
    for (i, data) in def.bones.iter().enumerate() {
        let local = BoneState::local_transform(
            data.x,
            data.y,
            data.rotation,
            data.scale_x,
            data.scale_y,
            data.shear_x,
            data.shear_y,
        );
        expected[i] = if data.parent >= 0 {
            expected[data.parent as usize] * local
        } else {
            local
        };
    }

    for (actual, expected) in instance.skinning_palette().iter().zip(&expected) {
        assert_approx(actual.a, expected.a, 1.0e-4);
        assert_approx(actual.b, expected.b, 1.0e-4);
        assert_approx(actual.c, expected.c, 1.0e-4);
        assert_approx(actual.d, expected.d, 1.0e-4);
        assert_approx(actual.tx, expected.tx, 1.0e-4);
        assert_approx(actual.ty, expected.ty, 1.0e-4);
    }
}

#[test]
fn ik_one_rotates_parent_toward_target() {
    let (_, instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                length: 10.0,
                ..bone("a", "root")
            },
            BoneDef {
                x: 10.0,
                ..bone("b", "a")
            },
            BoneDef {
                y: 10.0,
                ..bone("t", "root")
            },
        ],
        ik: vec![IkDef {
            id: n("reach"),
            target_id: n("t"),
            bone_ids: vec![n("a")],
            ..IkDef::default()
        }],
        ..Definition::default()
    });

    // A's world rotation solves to 90 degrees, carrying B to (0, 10).
    let palette = instance.skinning_palette();
    assert_approx(palette[1].rotation_degrees(), 90.0, 1.0e-3);
    assert_approx(palette[2].tx, 0.0, 1.0e-4);
    assert_approx(palette[2].ty, 10.0, 1.0e-4);
}

#[test]
fn ik_two_reaches_target_inside_range() {
    let (_, instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                length: 10.0,
                ..bone("a", "root")
            },
            BoneDef {
                x: 10.0,
                length: 10.0,
                ..bone("b", "a")
            },
            BoneDef {
                x: 14.0,
                ..bone("t", "root")
            },
        ],
        ik: vec![IkDef {
            id: n("reach"),
            target_id: n("t"),
            bone_ids: vec![n("a"), n("b")],
            bend_positive: true,
            ..IkDef::default()
        }],
        ..Definition::default()
    });

    // The tip of the second bone lands on the target, 14 units out.
    let palette = instance.skinning_palette();
    let (tip_x, tip_y) = palette[2].transform(10.0, 0.0);
    let reach = (tip_x * tip_x + tip_y * tip_y).sqrt();
    assert_approx(reach, 14.0, 1.0e-3);
    assert_approx(tip_x, 14.0, 1.0e-3);
    assert_approx(tip_y, 0.0, 1.0e-3);

    // The elbow itself stays one bone length from the root.
    let elbow = (palette[2].tx * palette[2].tx + palette[2].ty * palette[2].ty).sqrt();
    assert_approx(elbow, 10.0, 1.0e-3);
}

#[test]
fn scale_blending_is_idempotent_over_split_weights() {
    let make = || {
        instance_for(Definition {
            bones: vec![bone("root", ""), bone("a", "root")],
            ..Definition::default()
        })
    };

    // Two accumulations at half weight...
    let (_, mut split) = make();
    split.cache_mut().accum_scale(1, [1.0, 1.0], 0.5);
    split.cache_mut().accum_scale(1, [1.0, 1.0], 0.5);
    split.apply_cache();

    // ...equal one accumulation at full weight.
    let (_, mut full) = make();
    full.cache_mut().accum_scale(1, [2.0, 2.0], 1.0);
    full.apply_cache();

    assert_approx(split.bones()[1].scale_x, full.bones()[1].scale_x, 1.0e-6);
    assert_approx(split.bones()[1].scale_y, full.bones()[1].scale_y, 1.0e-6);
    assert_approx(full.bones()[1].scale_x, 2.0, 1.0e-6);
}

#[test]
fn partial_weight_scale_blends_toward_setup() {
    let (_, mut instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                scale_x: 2.0,
                scale_y: 2.0,
                ..bone("a", "root")
            },
        ],
        ..Definition::default()
    });

    // Scale multiplier 3 at half weight: base * (3 * 0.5) + base * 0.5.
    instance.cache_mut().accum_scale(1, [1.5, 1.5], 0.5);
    instance.apply_cache();
    assert_approx(instance.bones()[1].scale_x, 4.0, 1.0e-6);
    assert_approx(instance.bones()[1].scale_y, 4.0, 1.0e-6);
}

#[test]
fn boolean_channels_resolve_with_half_point_rule() {
    let make = || {
        instance_for(Definition {
            bones: vec![bone("root", ""), bone("a", "root"), bone("t", "root")],
            ik: vec![IkDef {
                id: n("reach"),
                target_id: n("t"),
                bone_ids: vec![n("a")],
                bend_positive: true,
                compress: false,
                ..IkDef::default()
            }],
            ..Definition::default()
        })
    };

    // Full negative score flips a true base off.
    let (_, mut instance) = make();
    instance.cache_mut().accum_ik(
        0,
        IkEntry {
            bend_positive: -1.0,
            ..IkEntry::default()
        },
    );
    instance.apply_cache();
    assert!(!instance.ik_states()[0].bend_positive);

    // A score below the half point leaves a false base off.
    let (_, mut instance) = make();
    instance.cache_mut().accum_ik(
        0,
        IkEntry {
            compress: 0.4,
            ..IkEntry::default()
        },
    );
    instance.apply_cache();
    assert!(!instance.ik_states()[0].compress);

    // At or above the half point it turns on.
    let (_, mut instance) = make();
    instance.cache_mut().accum_ik(
        0,
        IkEntry {
            compress: 0.6,
            ..IkEntry::default()
        },
    );
    instance.apply_cache();
    assert!(instance.ik_states()[0].compress);
}

#[test]
fn color_deltas_saturate_at_channel_bounds() {
    let (_, mut instance) = instance_for(Definition {
        bones: vec![bone("root", "")],
        slots: vec![SlotDef {
            id: n("body"),
            bone_id: n("root"),
            color: Color32 {
                r: 200,
                g: 100,
                b: 0,
                a: 255,
            },
            ..SlotDef::default()
        }],
        ..Definition::default()
    });

    instance
        .cache_mut()
        .accum_slot_color(0, [100.0, -50.0, 10.0, 0.0]);
    instance.apply_cache();

    let color = instance.slots()[0].color;
    assert_eq!(color.r, 255); // saturated high
    assert_eq!(color.g, 50);
    assert_eq!(color.b, 10);
    assert_eq!(color.a, 255);

    // An empty cache restores the setup color.
    instance.apply_cache();
    assert_eq!(instance.slots()[0].color.r, 200);
}

#[test]
fn two_color_deltas_fold_into_dark_color() {
    let (_, mut instance) = instance_for(Definition {
        bones: vec![bone("root", "")],
        slots: vec![SlotDef {
            id: n("body"),
            bone_id: n("root"),
            dark_color: Color32 {
                r: 10,
                g: 20,
                b: 30,
                a: 255,
            },
            has_dark_color: true,
            ..SlotDef::default()
        }],
        ..Definition::default()
    });

    instance.cache_mut().accum_slot_two_color(
        0,
        TwoColorEntry {
            light: [0.0, 0.0, 0.0, 0.0],
            dark: [40.0, 0.0, -30.0],
        },
    );
    instance.apply_cache();

    let dark = instance.slots()[0].dark_color;
    assert_eq!(dark.r, 50);
    assert_eq!(dark.g, 20);
    assert_eq!(dark.b, 0);
}

#[test]
fn transform_constraint_copies_local_rotation() {
    let (_, instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                rotation: 45.0,
                ..bone("t", "root")
            },
            bone("b", "root"),
        ],
        transforms: vec![TransformDef {
            id: n("copy"),
            target_id: n("t"),
            bone_ids: vec![n("b")],
            local: true,
            ..TransformDef::default()
        }],
        ..Definition::default()
    });

    let palette = instance.skinning_palette();
    assert_approx(palette[2].rotation_degrees(), 45.0, 1.0e-3);
}

#[test]
fn transform_constraint_rotates_world_basis_toward_target() {
    let (_, instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                rotation: 90.0,
                ..bone("t", "root")
            },
            bone("b", "root"),
        ],
        transforms: vec![TransformDef {
            id: n("copy"),
            target_id: n("t"),
            bone_ids: vec![n("b")],
            position_mix: 0.0,
            scale_mix: 0.0,
            shear_mix: 0.0,
            ..TransformDef::default()
        }],
        ..Definition::default()
    });

    let palette = instance.skinning_palette();
    assert_approx(palette[2].rotation_degrees(), 90.0, 1.0e-3);
}

#[test]
fn transform_constraint_applies_relative_local_offsets() {
    let (_, instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                rotation: 10.0,
                ..bone("t", "root")
            },
            BoneDef {
                rotation: 5.0,
                ..bone("b", "root")
            },
        ],
        transforms: vec![TransformDef {
            id: n("copy"),
            target_id: n("t"),
            bone_ids: vec![n("b")],
            delta_rotation: 15.0,
            local: true,
            relative: true,
            position_mix: 0.0,
            scale_mix: 0.0,
            shear_mix: 0.0,
            ..TransformDef::default()
        }],
        ..Definition::default()
    });

    // Relative local adds (target + delta) * mix on top of the bone's own
    // rotation: 5 + (10 + 15).
    let palette = instance.skinning_palette();
    assert_approx(palette[2].rotation_degrees(), 30.0, 1.0e-3);
}

fn straight_path_rig(position: f32, position_mode: PathPositionMode) -> Definition {
    let mut path = PathAttachment {
        vertex_count: 6,
        // In-handle, p0, p0's out-handle, p1's in-handle, p1, out-handle:
        // a straight horizontal run from (0,0) to (90,0).
        vertices: vec![
            0.0, 0.0, 0.0, 0.0, 30.0, 0.0, 60.0, 0.0, 90.0, 0.0, 90.0, 0.0,
        ],
        lengths: vec![90.0],
        constant_speed: true,
        ..PathAttachment::default()
    };
    path.finish(n("track-path")).unwrap();

    let mut set = HashMap::new();
    set.insert(n("track-path"), Attachment::Path(path));
    let mut skin = HashMap::new();
    skin.insert(n("track"), set);
    let mut skins = HashMap::new();
    skins.insert(n(DEFAULT_SKIN), skin);

    Definition {
        bones: vec![bone("root", ""), bone("carrier", "root"), bone("a", "root")],
        slots: vec![SlotDef {
            id: n("track"),
            bone_id: n("carrier"),
            attachment_id: n("track-path"),
            ..SlotDef::default()
        }],
        paths: vec![PathDef {
            id: n("follow"),
            target_id: n("track"),
            bone_ids: vec![n("a")],
            position,
            position_mode,
            rotation_mode: PathRotationMode::Tangent,
            ..PathDef::default()
        }],
        skins,
        ..Definition::default()
    }
}

#[test]
fn path_constraint_places_bone_along_the_curve() {
    let (_, instance) = instance_for(straight_path_rig(0.5, PathPositionMode::Percent));

    // Halfway along a 90-unit straight path.
    let palette = instance.skinning_palette();
    assert_approx(palette[2].tx, 45.0, 0.1);
    assert_approx(palette[2].ty, 0.0, 0.1);
}

#[test]
fn path_constraint_honors_fixed_position_mode() {
    let (_, instance) = instance_for(straight_path_rig(30.0, PathPositionMode::Fixed));

    let palette = instance.skinning_palette();
    assert_approx(palette[2].tx, 30.0, 0.1);
    assert_approx(palette[2].ty, 0.0, 0.1);
}

#[test]
fn clone_duplicates_mutable_state() {
    let (_, mut original) = instance_for(Definition {
        bones: vec![bone("root", ""), bone("a", "root")],
        ..Definition::default()
    });

    let snapshot = original.clone();

    original.cache_mut().accum_position(1, [5.0, 0.0]);
    original.apply_cache();
    original.pose_skinning_palette();

    assert_approx(original.skinning_palette()[1].tx, 5.0, 1.0e-5);
    assert_approx(snapshot.skinning_palette()[1].tx, 0.0, 1.0e-5);
}

#[test]
fn set_to_setup_pose_restores_definition_values() {
    let (_, mut instance) = instance_for(Definition {
        bones: vec![
            bone("root", ""),
            BoneDef {
                x: 7.0,
                rotation: 12.0,
                ..bone("a", "root")
            },
        ],
        ..Definition::default()
    });

    instance.cache_mut().accum_rotation(1, 30.0);
    instance.cache_mut().accum_position(1, [1.0, 1.0]);
    instance.apply_cache();
    assert_approx(instance.bones()[1].rotation, 42.0, 1.0e-5);

    instance.set_to_setup_pose();
    assert_approx(instance.bones()[1].rotation, 12.0, 1.0e-5);
    assert_approx(instance.bones()[1].x, 7.0, 1.0e-5);
}
