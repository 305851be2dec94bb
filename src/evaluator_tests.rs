use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{
    Attachment, BoneDef, BoneKeyFrames, Clip, ClipEvaluator, ClipSettings, CurveType, Definition,
    DrawOrderOffset, EventSink, KeyFrameAttachment, KeyFrameDeform, KeyFrameDrawOrder,
    KeyFrameEvent, KeyFrameRotation, MeshAttachment, NameId, NullEventSink, PoseInstance,
    RegionAttachment, SlotDef, SlotKeyFrames, DEFAULT_SKIN,
};

fn n(name: &str) -> NameId {
    NameId::new(name)
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<(String, i32, f32, String)>>);

impl EventSink for RecordingSink {
    fn dispatch(&self, name: NameId, int_value: i32, float_value: f32, string_value: &str) {
        self.0.lock().unwrap().push((
            name.as_str().to_string(),
            int_value,
            float_value,
            string_value.to_string(),
        ));
    }
}

impl RecordingSink {
    fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|e| e.0.clone()).collect()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

fn bone(name: &str, parent: &str) -> BoneDef {
    BoneDef {
        id: n(name),
        parent_id: n(parent),
        ..BoneDef::default()
    }
}

fn rotation_clip(keys: Vec<KeyFrameRotation>) -> Clip {
    let mut bones = HashMap::new();
    bones.insert(
        n("spin"),
        BoneKeyFrames {
            rotation: keys,
            ..BoneKeyFrames::default()
        },
    );
    Clip {
        bones,
        ..Clip::default()
    }
}

fn rig_with_clip(clip_name: &str, clip: Clip) -> Definition {
    let mut clips = HashMap::new();
    clips.insert(n(clip_name), Arc::new(clip));
    let mut def = Definition {
        bones: vec![bone("root", ""), bone("spin", "root")],
        clips,
        ..Definition::default()
    };
    def.finalize().unwrap();
    def
}

#[test]
fn stepped_rotation_holds_until_the_keyed_frame() {
    let def = Arc::new(rig_with_clip(
        "turn",
        rotation_clip(vec![
            KeyFrameRotation {
                time: 0.0,
                curve: CurveType::Stepped,
                angle: 0.0,
                ..KeyFrameRotation::default()
            },
            KeyFrameRotation {
                time: 1.0,
                curve: CurveType::Stepped,
                angle: 90.0,
                ..KeyFrameRotation::default()
            },
        ]),
    ));

    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut evaluator =
        ClipEvaluator::new(&def, n("turn"), ClipSettings::default(), &mut instance).unwrap();

    evaluator.evaluate(0.9999, 1.0, false, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.bones()[1].rotation, 0.0);

    evaluator.evaluate(1.0, 1.0, false, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.bones()[1].rotation, 90.0);
}

#[test]
fn bezier_curve_with_identity_control_points_is_linear() {
    let mut def = rig_with_clip(
        "turn",
        rotation_clip(vec![
            KeyFrameRotation {
                time: 0.0,
                curve: CurveType::Bezier,
                curve_offset: 0,
                angle: 0.0,
            },
            KeyFrameRotation {
                time: 1.0,
                angle: 90.0,
                ..KeyFrameRotation::default()
            },
        ]),
    );
    def.curves = vec![crate::populate_bezier_curve(
        1.0 / 3.0,
        1.0 / 3.0,
        2.0 / 3.0,
        2.0 / 3.0,
    )];
    let def = Arc::new(def);

    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut evaluator =
        ClipEvaluator::new(&def, n("turn"), ClipSettings::default(), &mut instance).unwrap();

    evaluator.evaluate(0.5, 1.0, false, &mut instance);
    instance.apply_cache();
    let rotation = instance.bones()[1].rotation;
    assert!(
        (rotation - 45.0).abs() < 0.5,
        "expected ~45 degrees, got {rotation}"
    );
}

#[test]
fn rotation_blends_by_clip_weight() {
    let def = Arc::new(rig_with_clip(
        "turn",
        rotation_clip(vec![KeyFrameRotation {
            time: 0.0,
            angle: 80.0,
            ..KeyFrameRotation::default()
        }]),
    ));

    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut evaluator =
        ClipEvaluator::new(&def, n("turn"), ClipSettings::default(), &mut instance).unwrap();

    evaluator.evaluate(0.0, 0.25, false, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.bones()[1].rotation, 20.0);
}

fn event_clip() -> Clip {
    Clip {
        events: vec![
            KeyFrameEvent {
                time: 0.0,
                id: n("start"),
                int_value: 1,
                ..KeyFrameEvent::default()
            },
            KeyFrameEvent {
                time: 0.5,
                id: n("middle"),
                ..KeyFrameEvent::default()
            },
            KeyFrameEvent {
                time: 1.0,
                id: n("end"),
                ..KeyFrameEvent::default()
            },
        ],
        ..Clip::default()
    }
}

#[test]
fn event_range_is_open_at_start_and_closed_at_end() {
    let def = Arc::new(rig_with_clip("cycle", event_clip()));
    let sink = Arc::new(RecordingSink::default());
    let mut instance = PoseInstance::new(Arc::clone(&def), sink.clone());
    let evaluator =
        ClipEvaluator::new(&def, n("cycle"), ClipSettings::default(), &mut instance).unwrap();

    // Time 0 with a key at 0 is the closed-on-the-low-end special case.
    evaluator.evaluate_range(0.0, 0.5, 1.0, &mut instance);
    assert_eq!(sink.names(), vec!["start", "middle"]);

    sink.clear();
    evaluator.evaluate_range(0.5, 1.0, 1.0, &mut instance);
    assert_eq!(sink.names(), vec!["end"]);

    sink.clear();
    evaluator.evaluate_range(0.0, 0.0, 1.0, &mut instance);
    assert_eq!(sink.names(), vec!["start"]);

    // A range starting past 0 is open on the low end.
    sink.clear();
    evaluator.evaluate_range(0.25, 0.4, 1.0, &mut instance);
    assert!(sink.names().is_empty());
}

#[test]
fn events_below_the_mix_threshold_are_suppressed() {
    let def = Arc::new(rig_with_clip("cycle", event_clip()));
    let sink = Arc::new(RecordingSink::default());
    let mut instance = PoseInstance::new(Arc::clone(&def), sink.clone());
    let evaluator = ClipEvaluator::new(
        &def,
        n("cycle"),
        ClipSettings {
            event_mix_threshold: 0.5,
        },
        &mut instance,
    )
    .unwrap();

    evaluator.evaluate_range(0.0, 1.0, 0.25, &mut instance);
    assert!(sink.names().is_empty());

    evaluator.evaluate_range(0.0, 1.0, 0.75, &mut instance);
    assert_eq!(sink.names(), vec!["start", "middle", "end"]);
}

#[test]
fn next_event_time_searches_strictly_after_start() {
    let def = Arc::new(rig_with_clip("cycle", event_clip()));
    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let evaluator =
        ClipEvaluator::new(&def, n("cycle"), ClipSettings::default(), &mut instance).unwrap();

    assert_eq!(evaluator.next_event_time(n("middle"), 0.0), Some(0.5));
    assert_eq!(evaluator.next_event_time(n("middle"), 0.5), None);
    assert_eq!(evaluator.next_event_time(n("end"), 0.5), Some(1.0));
    assert_eq!(evaluator.next_event_time(n("missing"), 0.0), None);
}

fn attachment_rig() -> Definition {
    let mut set = HashMap::new();
    set.insert(
        n("a"),
        Attachment::Region(RegionAttachment::default()),
    );
    set.insert(
        n("b"),
        Attachment::Region(RegionAttachment::default()),
    );
    let mut skin = HashMap::new();
    skin.insert(n("mouth"), set);
    let mut skins = HashMap::new();
    skins.insert(n(DEFAULT_SKIN), skin);

    let attachment_clip = |name: &str| {
        let mut slots = HashMap::new();
        slots.insert(
            n("mouth"),
            SlotKeyFrames {
                attachment: vec![KeyFrameAttachment {
                    time: 0.0,
                    id: n(name),
                }],
                ..SlotKeyFrames::default()
            },
        );
        Arc::new(Clip {
            slots,
            ..Clip::default()
        })
    };

    let mut clips = HashMap::new();
    clips.insert(n("say-a"), attachment_clip("a"));
    clips.insert(n("say-b"), attachment_clip("b"));

    let mut def = Definition {
        bones: vec![bone("root", "")],
        slots: vec![SlotDef {
            id: n("mouth"),
            bone_id: n("root"),
            attachment_id: n("a"),
            ..SlotDef::default()
        }],
        skins,
        clips,
        ..Definition::default()
    };
    def.finalize().unwrap();
    def
}

#[test]
fn highest_alpha_attachment_wins_when_blending_discrete_state() {
    let def = Arc::new(attachment_rig());
    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut clip_a =
        ClipEvaluator::new(&def, n("say-a"), ClipSettings::default(), &mut instance).unwrap();
    let mut clip_b =
        ClipEvaluator::new(&def, n("say-b"), ClipSettings::default(), &mut instance).unwrap();

    clip_a.evaluate(0.0, 0.6, true, &mut instance);
    clip_b.evaluate(0.0, 0.4, true, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.slots()[0].attachment, n("a"));

    clip_a.evaluate(0.0, 0.4, true, &mut instance);
    clip_b.evaluate(0.0, 0.6, true, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.slots()[0].attachment, n("b"));
}

#[test]
fn partial_weight_attachment_changes_require_discrete_blending() {
    let def = Arc::new(attachment_rig());
    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut clip_b =
        ClipEvaluator::new(&def, n("say-b"), ClipSettings::default(), &mut instance).unwrap();

    // Below full weight without discrete blending: no change is pushed and
    // the setup attachment is restored.
    clip_b.evaluate(0.0, 0.5, false, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.slots()[0].attachment, n("a"));

    clip_b.evaluate(0.0, 1.0, false, &mut instance);
    instance.apply_cache();
    assert_eq!(instance.slots()[0].attachment, n("b"));
}

fn deform_rig() -> Definition {
    let mesh = MeshAttachment {
        uvs: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        vertices: vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]],
        triangles: vec![0, 1, 2],
        ..MeshAttachment::default()
    };
    let mut set = HashMap::new();
    set.insert(n("face-mesh"), Attachment::Mesh(mesh));
    let mut skin = HashMap::new();
    skin.insert(n("face"), set);
    let mut skins = HashMap::new();
    skins.insert(n(DEFAULT_SKIN), skin);

    let mut frames = HashMap::new();
    frames.insert(
        n("face-mesh"),
        vec![
            KeyFrameDeform {
                time: 0.5,
                vertices: vec![0.0; 6],
                ..KeyFrameDeform::default()
            },
            KeyFrameDeform {
                time: 1.5,
                vertices: vec![6.0; 6],
                ..KeyFrameDeform::default()
            },
        ],
    );
    let mut deform_slots = HashMap::new();
    deform_slots.insert(n("face"), frames);
    let mut deforms = HashMap::new();
    deforms.insert(n(DEFAULT_SKIN), deform_slots);

    let mut clips = HashMap::new();
    clips.insert(
        n("blink"),
        Arc::new(Clip {
            deforms,
            ..Clip::default()
        }),
    );

    let mut def = Definition {
        bones: vec![bone("root", "")],
        slots: vec![SlotDef {
            id: n("face"),
            bone_id: n("root"),
            attachment_id: n("face-mesh"),
            ..SlotDef::default()
        }],
        skins,
        clips,
        ..Definition::default()
    };
    def.finalize().unwrap();
    def
}

#[test]
fn deform_buffers_allocate_lazily_and_blend() {
    let def = Arc::new(deform_rig());
    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut evaluator =
        ClipEvaluator::new(&def, n("blink"), ClipSettings::default(), &mut instance).unwrap();

    let key = crate::DeformKey {
        skin: n(DEFAULT_SKIN),
        slot: n("face"),
        attachment: n("face-mesh"),
    };
    assert!(instance.deforms().is_empty());

    // First evaluation allocates and overwrites regardless of weight.
    evaluator.evaluate(1.0, 0.5, false, &mut instance);
    let buffer = instance.deforms().get(&key).unwrap();
    assert!(buffer.iter().all(|&v| (v - 3.0).abs() < 1.0e-5));

    // Subsequent evaluations accumulate toward the sampled value.
    evaluator.evaluate(1.5, 0.5, false, &mut instance);
    let buffer = instance.deforms().get(&key).unwrap();
    assert!(buffer.iter().all(|&v| (v - 4.5).abs() < 1.0e-5));

    // Falling before the first key as the last reference drops the buffer.
    evaluator.evaluate(0.0, 1.0, false, &mut instance);
    assert!(instance.deforms().is_empty());

    // Releasing the evaluator drops the buffer for good.
    evaluator.evaluate(1.0, 1.0, false, &mut instance);
    assert!(!instance.deforms().is_empty());
    evaluator.release(&mut instance);
    assert!(instance.deforms().is_empty());
}

#[test]
fn draw_order_resolution_produces_a_permutation() {
    let mut clips = HashMap::new();
    clips.insert(
        n("shuffle"),
        Arc::new(Clip {
            draw_order: vec![KeyFrameDrawOrder {
                time: 0.0,
                offsets: vec![DrawOrderOffset {
                    slot: n("c"),
                    offset: -2,
                }],
            }],
            ..Clip::default()
        }),
    );

    let mut def = Definition {
        bones: vec![bone("root", "")],
        slots: vec![
            SlotDef {
                id: n("a"),
                bone_id: n("root"),
                ..SlotDef::default()
            },
            SlotDef {
                id: n("b"),
                bone_id: n("root"),
                ..SlotDef::default()
            },
            SlotDef {
                id: n("c"),
                bone_id: n("root"),
                ..SlotDef::default()
            },
        ],
        clips,
        ..Definition::default()
    };
    def.finalize().unwrap();
    let def = Arc::new(def);

    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let mut evaluator =
        ClipEvaluator::new(&def, n("shuffle"), ClipSettings::default(), &mut instance).unwrap();

    evaluator.evaluate(0.0, 1.0, false, &mut instance);
    instance.apply_cache();

    // Slot c moved to the front; everything else keeps its default rank.
    assert_eq!(instance.draw_order(), &[2, 0, 1]);

    let mut sorted: Vec<i16> = instance.draw_order().to_vec();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![0, 1, 2]);

    // With no draw-order key active the default order is restored.
    instance.apply_cache();
    assert_eq!(instance.draw_order(), &[0, 1, 2]);
}

#[test]
fn max_time_spans_all_timelines() {
    let def = Arc::new(rig_with_clip(
        "turn",
        rotation_clip(vec![
            KeyFrameRotation {
                time: 0.0,
                ..KeyFrameRotation::default()
            },
            KeyFrameRotation {
                time: 2.25,
                angle: 10.0,
                ..KeyFrameRotation::default()
            },
        ]),
    ));
    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let evaluator =
        ClipEvaluator::new(&def, n("turn"), ClipSettings::default(), &mut instance).unwrap();
    assert_eq!(evaluator.max_time(), 2.25);
    assert_eq!(evaluator.evaluator_count(), 1);
}

#[test]
fn unknown_clip_is_an_error() {
    let def = Arc::new(rig_with_clip("turn", rotation_clip(vec![])));
    let mut instance = PoseInstance::new(Arc::clone(&def), Arc::new(NullEventSink));
    assert!(matches!(
        ClipEvaluator::new(&def, n("nope"), ClipSettings::default(), &mut instance),
        Err(crate::Error::UnknownClip { .. })
    ));
}
