use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{
    BoneDef, BoneKeyFrames, Clip, ClipSettings, Definition, EventSink, Instance, KeyFrame2D,
    KeyFrameEvent, Manager, NameId, NullEventSink,
};

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

#[derive(Default)]
struct CountingSink(Mutex<usize>);

impl EventSink for CountingSink {
    fn dispatch(&self, _name: NameId, _i: i32, _f: f32, _s: &str) {
        *self.0.lock().unwrap() += 1;
    }
}

fn walking_rig() -> Arc<Definition> {
    let mut bones = HashMap::new();
    bones.insert(
        n("hip"),
        BoneKeyFrames {
            translation: vec![
                KeyFrame2D {
                    time: 0.0,
                    x: 0.0,
                    y: 0.0,
                    ..KeyFrame2D::default()
                },
                KeyFrame2D {
                    time: 1.0,
                    x: 10.0,
                    y: 0.0,
                    ..KeyFrame2D::default()
                },
            ],
            ..BoneKeyFrames::default()
        },
    );

    let mut clips = HashMap::new();
    clips.insert(
        n("walk"),
        Arc::new(Clip {
            bones,
            events: vec![KeyFrameEvent {
                time: 0.5,
                id: n("step"),
                ..KeyFrameEvent::default()
            }],
            ..Clip::default()
        }),
    );

    let mut def = Definition {
        bones: vec![bone("root", ""), bone("hip", "root")],
        clips,
        ..Definition::default()
    };
    def.finalize().unwrap();
    Arc::new(def)
}

#[test]
fn tick_advances_clips_and_poses_the_palette() {
    let def = walking_rig();
    let mut instance = Instance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let handle = instance.play_clip(n("walk"), ClipSettings::default()).unwrap();

    instance.tick(0.5);
    assert_eq!(instance.clip_time(handle), Some(0.5));
    let tx = instance.skinning_palette()[1].tx;
    assert!((tx - 5.0).abs() < 1.0e-4, "expected hip at 5, got {tx}");

    instance.tick(0.5);
    let tx = instance.skinning_palette()[1].tx;
    assert!((tx - 10.0).abs() < 1.0e-4, "expected hip at 10, got {tx}");
}

#[test]
fn tick_dispatches_each_event_once() {
    let def = walking_rig();
    let sink = Arc::new(CountingSink::default());
    let mut instance = Instance::new(Arc::clone(&def), sink.clone());
    instance.play_clip(n("walk"), ClipSettings::default()).unwrap();

    instance.tick(0.25);
    assert_eq!(*sink.0.lock().unwrap(), 0);

    instance.tick(0.25);
    assert_eq!(*sink.0.lock().unwrap(), 1);

    instance.tick(0.25);
    assert_eq!(*sink.0.lock().unwrap(), 1);
}

#[test]
fn clip_weight_scales_the_applied_delta() {
    let def = walking_rig();
    let mut instance = Instance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let handle = instance.play_clip(n("walk"), ClipSettings::default()).unwrap();
    instance.set_clip_alpha(handle, 0.5);

    instance.set_clip_time(handle, 1.0);
    instance.tick(0.0);
    let tx = instance.skinning_palette()[1].tx;
    assert!((tx - 5.0).abs() < 1.0e-4, "expected hip at 5, got {tx}");
}

#[test]
fn next_event_time_spans_active_clips() {
    let def = walking_rig();
    let mut instance = Instance::new(Arc::clone(&def), Arc::new(NullEventSink));
    assert_eq!(instance.get_next_event_time(n("step"), 0.0), None);

    instance.play_clip(n("walk"), ClipSettings::default()).unwrap();
    assert_eq!(instance.get_next_event_time(n("step"), 0.0), Some(0.5));
    assert_eq!(instance.get_next_event_time(n("step"), 0.5), None);
}

#[test]
fn stopping_a_clip_freezes_the_pose_contribution() {
    let def = walking_rig();
    let mut instance = Instance::new(Arc::clone(&def), Arc::new(NullEventSink));
    let handle = instance.play_clip(n("walk"), ClipSettings::default()).unwrap();

    instance.tick(1.0);
    assert!((instance.skinning_palette()[1].tx - 10.0).abs() < 1.0e-4);

    instance.stop_clip(handle);
    assert_eq!(instance.active_clip_count(), 0);

    // With no clips the next tick applies an empty cache: setup pose.
    instance.tick(0.1);
    assert!((instance.skinning_palette()[1].tx).abs() < 1.0e-4);
}

#[test]
fn manager_tracks_live_instances() {
    let def = walking_rig();
    let manager = Manager::new();

    let a = manager.create_instance(&def, Arc::new(NullEventSink));
    let b = manager.create_instance(&def, Arc::new(NullEventSink));
    assert_eq!(manager.active_instance_count(), 2);

    drop(b);
    manager.tick();
    assert_eq!(manager.active_instance_count(), 1);

    // The surviving handle still works through the manager's snapshot.
    for instance in manager.active_instances() {
        instance.lock().unwrap().tick(0.1);
    }
    drop(a);
    manager.tick();
    assert_eq!(manager.active_instance_count(), 0);
}

#[test]
fn cloned_instances_evolve_independently() {
    let def = walking_rig();
    let mut original = Instance::new(Arc::clone(&def), Arc::new(NullEventSink));
    original.play_clip(n("walk"), ClipSettings::default()).unwrap();

    let mut fork = original.clone();
    original.tick(1.0);
    fork.tick(0.25);

    assert!((original.skinning_palette()[1].tx - 10.0).abs() < 1.0e-4);
    assert!((fork.skinning_palette()[1].tx - 2.5).abs() < 1.0e-4);
}
