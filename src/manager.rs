//! Instance creation and tracking. The manager is the only component that
//! may be called from multiple host threads; a mutex protects its
//! live-instance list, used for debugging overlays and leak detection.

use std::sync::{Arc, Mutex, Weak};

use crate::definition::Definition;
use crate::error::Error;
use crate::evaluator::{ClipEvaluator, ClipSettings};
use crate::ids::NameId;
use crate::instance::{EventSink, PoseInstance, SlotState};
use crate::math::Mat2x3;

/// One clip the host is currently driving on an [`Instance`].
#[derive(Clone, Debug)]
struct ActiveClip {
    id: NameId,
    evaluator: ClipEvaluator,
    time: f32,
    alpha: f32,
    blend_discrete: bool,
}

/// Opaque handle to a clip activated on an [`Instance`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClipHandle(usize);

/// Host-facing animated character: a [`PoseInstance`] plus the set of clip
/// evaluators the host (typically an animation network) is driving.
///
/// Each [`Instance::tick`] advances active clip times, dispatches events over
/// the elapsed range, samples all clips into the frame cache, folds the cache
/// onto the pose, and re-poses the skinning palette — strictly in that order.
#[derive(Clone, Debug)]
pub struct Instance {
    pose: PoseInstance,
    clips: Vec<ActiveClip>,
}

impl Instance {
    pub fn new(definition: Arc<Definition>, event_sink: Arc<dyn EventSink>) -> Instance {
        Instance {
            pose: PoseInstance::new(definition, event_sink),
            clips: Vec::new(),
        }
    }

    pub fn pose(&self) -> &PoseInstance {
        &self.pose
    }

    pub fn pose_mut(&mut self) -> &mut PoseInstance {
        &mut self.pose
    }

    pub fn skinning_palette(&self) -> &[Mat2x3] {
        self.pose.skinning_palette()
    }

    pub fn slots(&self) -> &[SlotState] {
        self.pose.slots()
    }

    pub fn draw_order(&self) -> &[i16] {
        self.pose.draw_order()
    }

    /// Activate a clip at time 0 with full weight.
    pub fn play_clip(&mut self, id: NameId, settings: ClipSettings) -> Result<ClipHandle, Error> {
        let definition = Arc::clone(self.pose.definition());
        let evaluator = ClipEvaluator::new(&definition, id, settings, &mut self.pose)?;
        self.clips.push(ActiveClip {
            id,
            evaluator,
            time: 0.0,
            alpha: 1.0,
            blend_discrete: false,
        });
        Ok(ClipHandle(self.clips.len() - 1))
    }

    /// Deactivate a clip, releasing any deform buffers it held.
    pub fn stop_clip(&mut self, handle: ClipHandle) {
        if handle.0 < self.clips.len() {
            let mut clip = self.clips.remove(handle.0);
            clip.evaluator.release(&mut self.pose);
        }
    }

    pub fn active_clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn clip_id(&self, handle: ClipHandle) -> Option<NameId> {
        self.clips.get(handle.0).map(|c| c.id)
    }

    pub fn clip_time(&self, handle: ClipHandle) -> Option<f32> {
        self.clips.get(handle.0).map(|c| c.time)
    }

    pub fn clip_max_time(&self, handle: ClipHandle) -> Option<f32> {
        self.clips.get(handle.0).map(|c| c.evaluator.max_time())
    }

    pub fn set_clip_time(&mut self, handle: ClipHandle, time: f32) {
        if let Some(clip) = self.clips.get_mut(handle.0) {
            clip.time = time;
        }
    }

    pub fn set_clip_alpha(&mut self, handle: ClipHandle, alpha: f32) {
        if let Some(clip) = self.clips.get_mut(handle.0) {
            clip.alpha = alpha;
        }
    }

    pub fn set_clip_blend_discrete(&mut self, handle: ClipHandle, blend_discrete: bool) {
        if let Some(clip) = self.clips.get_mut(handle.0) {
            clip.blend_discrete = blend_discrete;
        }
    }

    /// Earliest key of `event` after `start_time` across all active clips.
    pub fn get_next_event_time(&self, event: NameId, start_time: f32) -> Option<f32> {
        self.clips
            .iter()
            .filter_map(|c| c.evaluator.next_event_time(event, start_time))
            .min_by(f32::total_cmp)
    }

    /// Advance all active clips by `dt` seconds and produce this frame's
    /// pose.
    pub fn tick(&mut self, dt: f32) {
        for clip in &mut self.clips {
            let start = clip.time;
            clip.time += dt;
            clip.evaluator
                .evaluate_range(start, clip.time, clip.alpha, &mut self.pose);
            clip.evaluator
                .evaluate(clip.time, clip.alpha, clip.blend_discrete, &mut self.pose);
        }

        self.pose.apply_cache();
        self.pose.pose_skinning_palette();
    }
}

/// Creates instances bound to shared definition handles and tracks the live
/// ones for debugging.
#[derive(Default)]
pub struct Manager {
    instances: Mutex<Vec<Weak<Mutex<Instance>>>>,
}

impl Manager {
    pub fn new() -> Manager {
        Manager::default()
    }

    /// Create a tracked instance.
    pub fn create_instance(
        &self,
        definition: &Arc<Definition>,
        event_sink: Arc<dyn EventSink>,
    ) -> Arc<Mutex<Instance>> {
        let instance = Arc::new(Mutex::new(Instance::new(
            Arc::clone(definition),
            event_sink,
        )));
        if let Ok(mut instances) = self.instances.lock() {
            instances.push(Arc::downgrade(&instance));
        }
        instance
    }

    /// Number of instances still alive.
    pub fn active_instance_count(&self) -> usize {
        self.instances
            .lock()
            .map(|v| v.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Snapshot of the live instances.
    pub fn active_instances(&self) -> Vec<Arc<Mutex<Instance>>> {
        self.instances
            .lock()
            .map(|v| v.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Per-frame maintenance: prune handles whose instances have dropped.
    pub fn tick(&self) {
        if let Ok(mut instances) = self.instances.lock() {
            instances.retain(|w| w.strong_count() > 0);
        }
    }
}
