use std::collections::HashMap;

use crate::{
    Attachment, BoneDef, Definition, Error, IkDef, NameId, PathAttachment, PathDef, PoseTask,
    PoseTaskKind, SlotDef, TransformDef, DEFAULT_SKIN,
};

fn bone(name: &str, parent: &str) -> BoneDef {
    BoneDef {
        id: NameId::new(name),
        parent_id: NameId::new(parent),
        ..BoneDef::default()
    }
}

fn slot(name: &str, bone: &str) -> SlotDef {
    SlotDef {
        id: NameId::new(name),
        bone_id: NameId::new(bone),
        ..SlotDef::default()
    }
}

fn task(kind: PoseTaskKind, index: i16) -> PoseTask {
    PoseTask { kind, index }
}

#[test]
fn finalize_resolves_bone_parents() {
    let mut def = Definition {
        bones: vec![bone("root", ""), bone("hip", "root"), bone("leg", "hip")],
        ..Definition::default()
    };
    def.finalize().unwrap();

    assert_eq!(def.bones[0].parent, -1);
    assert_eq!(def.bones[1].parent, 0);
    assert_eq!(def.bones[2].parent, 1);
    assert_eq!(def.bone_index(NameId::new("leg")), 2);
    assert_eq!(def.bone_index(NameId::new("missing")), -1);
}

#[test]
fn finalize_rejects_unknown_parent() {
    let mut def = Definition {
        bones: vec![bone("root", ""), bone("hip", "nope")],
        ..Definition::default()
    };
    assert!(matches!(
        def.finalize(),
        Err(Error::ReferenceBoneParent { .. })
    ));
}

#[test]
fn finalize_rejects_non_topological_bones() {
    // "leg" appears before its parent "hip".
    let mut def = Definition {
        bones: vec![bone("root", ""), bone("leg", "hip"), bone("hip", "root")],
        ..Definition::default()
    };
    assert!(matches!(def.finalize(), Err(Error::ShapeBoneOrder { .. })));
}

#[test]
fn finalize_rejects_duplicate_bone_names() {
    let mut def = Definition {
        bones: vec![bone("root", ""), bone("a", "root"), bone("a", "root")],
        ..Definition::default()
    };
    assert!(matches!(
        def.finalize(),
        Err(Error::ReferenceDuplicateName { what: "bone", .. })
    ));
}

#[test]
fn finalize_rejects_long_ik_chains() {
    let mut def = Definition {
        bones: vec![
            bone("root", ""),
            bone("a", "root"),
            bone("b", "a"),
            bone("c", "b"),
            bone("t", "root"),
        ],
        ik: vec![IkDef {
            id: NameId::new("reach"),
            target_id: NameId::new("t"),
            bone_ids: vec![NameId::new("a"), NameId::new("b"), NameId::new("c")],
            ..IkDef::default()
        }],
        ..Definition::default()
    };
    assert!(matches!(
        def.finalize(),
        Err(Error::ShapeIkChainLength { len: 3, .. })
    ));
}

#[test]
fn pose_tasks_cover_every_non_root_bone_once() {
    let mut def = Definition {
        bones: vec![
            bone("root", ""),
            bone("hip", "root"),
            bone("leg", "hip"),
            bone("arm", "root"),
        ],
        ..Definition::default()
    };
    def.finalize().unwrap();

    assert_eq!(
        def.pose_tasks,
        vec![
            task(PoseTaskKind::Bone, 1),
            task(PoseTaskKind::Bone, 2),
            task(PoseTaskKind::Bone, 3),
        ]
    );
}

#[test]
fn pose_tasks_order_ik_after_target_and_chain() {
    let mut def = Definition {
        bones: vec![
            bone("root", ""),
            bone("a", "root"),
            bone("b", "a"),
            bone("t", "root"),
        ],
        ik: vec![IkDef {
            id: NameId::new("reach"),
            target_id: NameId::new("t"),
            bone_ids: vec![NameId::new("a")],
            ..IkDef::default()
        }],
        ..Definition::default()
    };
    def.finalize().unwrap();

    // Target (3) and chain root (1) are posed before the solve; the child of
    // the constrained bone (2) is re-posed afterwards.
    assert_eq!(
        def.pose_tasks,
        vec![
            task(PoseTaskKind::Bone, 3),
            task(PoseTaskKind::Bone, 1),
            task(PoseTaskKind::Ik, 0),
            task(PoseTaskKind::Bone, 2),
        ]
    );
}

#[test]
fn pose_tasks_respect_constraint_order() {
    // Two IK constraints with reversed order values run lowest-order first.
    let mut def = Definition {
        bones: vec![
            bone("root", ""),
            bone("a", "root"),
            bone("b", "root"),
            bone("t", "root"),
        ],
        ik: vec![
            IkDef {
                id: NameId::new("second"),
                target_id: NameId::new("t"),
                bone_ids: vec![NameId::new("b")],
                order: 5,
                ..IkDef::default()
            },
            IkDef {
                id: NameId::new("first"),
                target_id: NameId::new("t"),
                bone_ids: vec![NameId::new("a")],
                order: 1,
                ..IkDef::default()
            },
        ],
        ..Definition::default()
    };
    def.finalize().unwrap();

    let ik_order: Vec<i16> = def
        .pose_tasks
        .iter()
        .filter(|t| t.kind == PoseTaskKind::Ik)
        .map(|t| t.index)
        .collect();
    assert_eq!(ik_order, vec![1, 0]);
}

#[test]
fn pose_tasks_require_path_attachment_on_default_skin() {
    let mut def = Definition {
        bones: vec![bone("root", ""), bone("a", "root")],
        slots: vec![slot("track", "root")],
        paths: vec![PathDef {
            id: NameId::new("follow"),
            target_id: NameId::new("track"),
            bone_ids: vec![NameId::new("a")],
            ..PathDef::default()
        }],
        ..Definition::default()
    };
    assert!(matches!(
        def.finalize(),
        Err(Error::ReferencePathAttachment { .. })
    ));
}

#[test]
fn pose_tasks_schedule_path_constraints() {
    let mut path_attachment = PathAttachment {
        vertex_count: 6,
        vertices: vec![0.0; 12],
        lengths: vec![90.0],
        ..PathAttachment::default()
    };
    path_attachment
        .finish(NameId::new("track-path"))
        .unwrap();

    let mut attachments = HashMap::new();
    attachments.insert(
        NameId::new("track-path"),
        Attachment::Path(path_attachment),
    );
    let mut skin = HashMap::new();
    skin.insert(NameId::new("track"), attachments);
    let mut skins = HashMap::new();
    skins.insert(NameId::new(DEFAULT_SKIN), skin);

    let mut def = Definition {
        bones: vec![bone("root", ""), bone("a", "root"), bone("carrier", "root")],
        slots: vec![SlotDef {
            id: NameId::new("track"),
            bone_id: NameId::new("carrier"),
            attachment_id: NameId::new("track-path"),
            ..SlotDef::default()
        }],
        paths: vec![PathDef {
            id: NameId::new("follow"),
            target_id: NameId::new("track"),
            bone_ids: vec![NameId::new("a")],
            ..PathDef::default()
        }],
        skins,
        ..Definition::default()
    };
    def.finalize().unwrap();

    // The chain bone is posed, the path applies, and every non-root bone
    // appears exactly once overall.
    let path_pos = def
        .pose_tasks
        .iter()
        .position(|t| t.kind == PoseTaskKind::Path)
        .unwrap();
    let chain_pos = def
        .pose_tasks
        .iter()
        .position(|t| *t == task(PoseTaskKind::Bone, 1))
        .unwrap();
    assert!(chain_pos < path_pos);

    let mut bone_tasks: Vec<i16> = def
        .pose_tasks
        .iter()
        .filter(|t| t.kind == PoseTaskKind::Bone)
        .map(|t| t.index)
        .collect();
    bone_tasks.sort_unstable();
    assert_eq!(bone_tasks, vec![1, 2]);
}

#[test]
fn pose_tasks_local_transform_requires_parent_first() {
    let mut def = Definition {
        bones: vec![
            bone("root", ""),
            bone("holder", "root"),
            bone("item", "holder"),
            bone("t", "root"),
        ],
        transforms: vec![TransformDef {
            id: NameId::new("copy"),
            target_id: NameId::new("t"),
            bone_ids: vec![NameId::new("item")],
            local: true,
            ..TransformDef::default()
        }],
        ..Definition::default()
    };
    def.finalize().unwrap();

    let holder_pos = def
        .pose_tasks
        .iter()
        .position(|t| *t == task(PoseTaskKind::Bone, 1))
        .unwrap();
    let transform_pos = def
        .pose_tasks
        .iter()
        .position(|t| t.kind == PoseTaskKind::Transform)
        .unwrap();
    assert!(holder_pos < transform_pos);
}
