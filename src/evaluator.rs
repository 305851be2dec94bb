//! Runtime playback of one [`Clip`]: a flat set of per-channel evaluator
//! records that sample their timeline at a given time and accumulate
//! weighted deltas into the instance's frame cache.

use std::sync::Arc;

use crate::cache::{set_default_draw_order, IkEntry, TwoColorEntry};
use crate::clip::{BezierCurve, Clip, Curved, CurveType, Keyed};
use crate::definition::Definition;
use crate::error::Error;
use crate::ids::NameId;
use crate::instance::{DeformKey, PoseInstance};
use crate::math::{lerp, lerp_degrees};

/// Host-tunable playback settings for one clip evaluator.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ClipSettings {
    /// Events are suppressed while the clip's blend weight is below this.
    pub event_mix_threshold: f32,
}

/// Time values are authored rounded to 4 decimal places. Accumulated times
/// are snapped the same way so stepped and discrete keys (attachment
/// changes, events) trigger on the intended frame.
pub(crate) fn to_editor_time(seconds: f32) -> f32 {
    ((seconds as f64 * 10000.0).round() / 10000.0) as f32
}

fn lerp_boolean(base: bool, b0: bool, b1: bool, t: f32, alpha: f32) -> f32 {
    let fb = if base { 1.0 } else { 0.0 };
    let f0 = if b0 { 1.0 } else { 0.0 };
    let f1 = if b1 { 1.0 } else { 0.0 };
    (lerp(f0, f1, t) - fb) * alpha
}

/// Locate the keyframe pair bracketing `time`, clamped at both ends. The
/// cursor makes the common monotonically-advancing case O(1); it is
/// per-record state, never shared.
fn find_frames<'a, T: Keyed>(frames: &'a [T], time: f32, cursor: &mut u32) -> (&'a T, &'a T) {
    let mut last = (*cursor as usize).min(frames.len() - 1);
    if frames[last].time() > time {
        if last == 0 {
            *cursor = 0;
            return (&frames[0], &frames[0]);
        }
        last = 0;
    }

    while last + 1 < frames.len() {
        if frames[last + 1].time() > time {
            *cursor = last as u32;
            return (&frames[last], &frames[last + 1]);
        }
        last += 1;
    }

    *cursor = last as u32;
    (&frames[last], &frames[last])
}

fn bezier_alpha(linear: f32, curve: &BezierCurve) -> f32 {
    let x = curve[0];
    if x >= linear {
        return curve[1] * linear / x;
    }

    let mut i = 2usize;
    while i < curve.len() {
        let x = curve[i];
        if x >= linear {
            let prev_x = curve[i - 2];
            let prev_y = curve[i - 1];
            return prev_y + (curve[i + 1] - prev_y) * (linear - prev_x) / (x - prev_x);
        }
        i += 2;
    }

    let x = curve[curve.len() - 2];
    let y = curve[curve.len() - 1];
    y + (1.0 - y) * (linear - x) / (1.0 - x)
}

/// Resolve the interpolation factor between two keyframes.
fn alpha_between<T: Curved>(curves: &[BezierCurve], k0: &T, k1: &T, time: f32) -> f32 {
    let duration = k1.time() - k0.time();
    let linear = if duration > 0.0 {
        ((time - k0.time()) / duration).clamp(0.0, 1.0)
    } else if time > k1.time() {
        1.0
    } else {
        0.0
    };

    match k0.curve_type() {
        CurveType::Linear => linear,
        CurveType::Stepped => 0.0,
        CurveType::Bezier => match curves.get(k0.curve_offset()) {
            Some(curve) => bezier_alpha(linear, curve),
            None => linear,
        },
    }
}

/// One tagged evaluator record: channel payload plus its sample cursor.
#[derive(Clone, Debug)]
enum Evaluator {
    Rotation { key: NameId, bone: i16, cursor: u32 },
    Scale { key: NameId, bone: i16, cursor: u32 },
    Shear { key: NameId, bone: i16, cursor: u32 },
    Translation { key: NameId, bone: i16, cursor: u32 },
    Deform { key: DeformKey, cursor: u32 },
    DrawOrder,
    SlotAttachment { key: NameId, slot: i16 },
    SlotColor { key: NameId, slot: i16, cursor: u32 },
    SlotTwoColor { key: NameId, slot: i16, cursor: u32 },
    Ik { key: NameId, ik: i16, cursor: u32 },
    PathMix { key: NameId, path: i16, cursor: u32 },
    PathPosition { key: NameId, path: i16, cursor: u32 },
    PathSpacing { key: NameId, path: i16, cursor: u32 },
    Transform { key: NameId, transform: i16, cursor: u32 },
}

/// Plays one clip against a [`PoseInstance`].
///
/// Deform timelines hold references into the instance's deform buffer table;
/// call [`ClipEvaluator::release`] against the same instance when retiring an
/// evaluator so the buffers can be freed.
#[derive(Clone)]
pub struct ClipEvaluator {
    definition: Arc<Definition>,
    clip: Arc<Clip>,
    settings: ClipSettings,
    max_time: f32,
    evaluators: Vec<Evaluator>,
    has_events: bool,
}

impl std::fmt::Debug for ClipEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipEvaluator")
            .field("evaluators", &self.evaluators.len())
            .field("max_time", &self.max_time)
            .finish_non_exhaustive()
    }
}

impl ClipEvaluator {
    pub fn new(
        definition: &Arc<Definition>,
        clip_id: NameId,
        settings: ClipSettings,
        instance: &mut PoseInstance,
    ) -> Result<ClipEvaluator, Error> {
        let clip = definition
            .clip(clip_id)
            .cloned()
            .ok_or_else(|| Error::UnknownClip {
                name: clip_id.as_str().to_string(),
            })?;

        let mut max_time = 0.0f32;
        let mut evaluators = Vec::new();

        fn track_time<T: Keyed>(max_time: &mut f32, frames: &[T]) {
            if let Some(last) = frames.last() {
                *max_time = max_time.max(last.time());
            }
        }

        // Bones first. Entries naming a bone the definition does not have
        // are skipped, which supports retargeting clips across rigs.
        let mut bone_keys: Vec<NameId> = clip.bones.keys().copied().collect();
        bone_keys.sort_by_key(|k| k.as_str());
        for key in bone_keys {
            let entry = &clip.bones[&key];
            let bone = definition.bone_index(key);
            if bone < 0 {
                continue;
            }
            if !entry.rotation.is_empty() {
                track_time(&mut max_time, &entry.rotation);
                evaluators.push(Evaluator::Rotation {
                    key,
                    bone,
                    cursor: 0,
                });
            }
            if !entry.scale.is_empty() {
                track_time(&mut max_time, &entry.scale);
                evaluators.push(Evaluator::Scale {
                    key,
                    bone,
                    cursor: 0,
                });
            }
            if !entry.shear.is_empty() {
                track_time(&mut max_time, &entry.shear);
                evaluators.push(Evaluator::Shear {
                    key,
                    bone,
                    cursor: 0,
                });
            }
            if !entry.translation.is_empty() {
                track_time(&mut max_time, &entry.translation);
                evaluators.push(Evaluator::Translation {
                    key,
                    bone,
                    cursor: 0,
                });
            }
        }

        // Deforms.
        for (&skin, slots) in &clip.deforms {
            for (&slot, attachments) in slots {
                for (&attachment, frames) in attachments {
                    if frames.is_empty() {
                        continue;
                    }
                    track_time(&mut max_time, frames);
                    let key = DeformKey {
                        skin,
                        slot,
                        attachment,
                    };
                    instance.acquire_deform(key);
                    evaluators.push(Evaluator::Deform { key, cursor: 0 });
                }
            }
        }

        // Draw order.
        if !clip.draw_order.is_empty() {
            track_time(&mut max_time, &clip.draw_order);
            evaluators.push(Evaluator::DrawOrder);
        }

        // Events.
        let has_events = !clip.events.is_empty();
        track_time(&mut max_time, &clip.events);

        // Ik.
        let mut ik_keys: Vec<NameId> = clip.ik.keys().copied().collect();
        ik_keys.sort_by_key(|k| k.as_str());
        for key in ik_keys {
            let ik = definition.ik_index(key);
            if ik < 0 {
                log::warn!("ik timeline targets unknown constraint '{key}', skipped");
                continue;
            }
            track_time(&mut max_time, &clip.ik[&key]);
            evaluators.push(Evaluator::Ik { key, ik, cursor: 0 });
        }

        // Paths.
        let mut path_keys: Vec<NameId> = clip.paths.keys().copied().collect();
        path_keys.sort_by_key(|k| k.as_str());
        for key in path_keys {
            let entry = &clip.paths[&key];
            let path = definition.path_index(key);
            if path < 0 {
                log::warn!("path timeline targets unknown constraint '{key}', skipped");
                continue;
            }
            if !entry.mix.is_empty() {
                track_time(&mut max_time, &entry.mix);
                evaluators.push(Evaluator::PathMix {
                    key,
                    path,
                    cursor: 0,
                });
            }
            if !entry.position.is_empty() {
                track_time(&mut max_time, &entry.position);
                evaluators.push(Evaluator::PathPosition {
                    key,
                    path,
                    cursor: 0,
                });
            }
            if !entry.spacing.is_empty() {
                track_time(&mut max_time, &entry.spacing);
                evaluators.push(Evaluator::PathSpacing {
                    key,
                    path,
                    cursor: 0,
                });
            }
        }

        // Slots.
        let mut slot_keys: Vec<NameId> = clip.slots.keys().copied().collect();
        slot_keys.sort_by_key(|k| k.as_str());
        for key in slot_keys {
            let entry = &clip.slots[&key];
            let slot = definition.slot_index(key);
            if slot < 0 {
                log::warn!("slot timeline targets unknown slot '{key}', skipped");
                continue;
            }
            if !entry.attachment.is_empty() {
                track_time(&mut max_time, &entry.attachment);
                evaluators.push(Evaluator::SlotAttachment { key, slot });
            }
            if !entry.color.is_empty() {
                track_time(&mut max_time, &entry.color);
                evaluators.push(Evaluator::SlotColor {
                    key,
                    slot,
                    cursor: 0,
                });
            }
            if !entry.two_color.is_empty() {
                track_time(&mut max_time, &entry.two_color);
                evaluators.push(Evaluator::SlotTwoColor {
                    key,
                    slot,
                    cursor: 0,
                });
            }
        }

        // Transforms.
        let mut transform_keys: Vec<NameId> = clip.transforms.keys().copied().collect();
        transform_keys.sort_by_key(|k| k.as_str());
        for key in transform_keys {
            let transform = definition.transform_index(key);
            if transform < 0 {
                log::warn!("transform timeline targets unknown constraint '{key}', skipped");
                continue;
            }
            track_time(&mut max_time, &clip.transforms[&key]);
            evaluators.push(Evaluator::Transform {
                key,
                transform,
                cursor: 0,
            });
        }

        Ok(ClipEvaluator {
            definition: Arc::clone(definition),
            clip,
            settings,
            max_time,
            evaluators,
            has_events,
        })
    }

    /// Number of active evaluator records in this clip.
    pub fn evaluator_count(&self) -> usize {
        self.evaluators.len()
    }

    /// Max keyed time (seconds) across all timelines of the clip.
    pub fn max_time(&self) -> f32 {
        self.max_time
    }

    /// Drop this evaluator's deform references. Must be passed the same
    /// instance the evaluator was created against.
    pub fn release(&mut self, instance: &mut PoseInstance) {
        for record in self.evaluators.drain(..) {
            if let Evaluator::Deform { key, .. } = record {
                instance.release_deform(key);
            }
        }
    }

    /// Earliest key of the named event strictly after `start_time`.
    pub fn next_event_time(&self, event: NameId, start_time: f32) -> Option<f32> {
        let start_time = to_editor_time(start_time);
        let frames = &self.clip.events;
        let mut u = 0usize;
        while u < frames.len() && frames[u].time <= start_time {
            u += 1;
        }
        while u < frames.len() {
            if frames[u].id == event {
                return Some(frames[u].time);
            }
            u += 1;
        }
        None
    }

    /// Dispatch every event key in `(start, end]` to the instance's event
    /// sink. The range is closed on the low end only for the special case
    /// `start == 0` with a key at exactly 0, since no earlier range can
    /// deliver it.
    pub fn evaluate_range(
        &self,
        start_time: f32,
        end_time: f32,
        alpha: f32,
        instance: &mut PoseInstance,
    ) {
        if !self.has_events || alpha < self.settings.event_mix_threshold {
            return;
        }

        let start_time = to_editor_time(start_time);
        let end_time = to_editor_time(end_time);

        let clip = Arc::clone(&self.clip);
        let frames = &clip.events;

        let mut u = 0usize;
        if start_time != 0.0 || frames[0].time != 0.0 {
            while u < frames.len() && frames[u].time <= start_time {
                u += 1;
            }
        }

        let sink = Arc::clone(instance.event_sink());
        while u < frames.len() && frames[u].time <= end_time {
            let e = &frames[u];
            sink.dispatch(e.id, e.int_value, e.float_value, &e.string_value);
            u += 1;
        }
    }

    /// Sample every timeline at `time` and push `alpha`-weighted deltas into
    /// the instance's frame cache. Discrete state (attachment changes) only
    /// applies at full weight unless `blend_discrete` is set.
    pub fn evaluate(
        &mut self,
        time: f32,
        alpha: f32,
        blend_discrete: bool,
        instance: &mut PoseInstance,
    ) {
        let time = to_editor_time(time);
        let clip = Arc::clone(&self.clip);
        let definition = Arc::clone(&self.definition);
        let curves = &definition.curves;

        for record in &mut self.evaluators {
            match record {
                Evaluator::Rotation { key, bone, cursor } => {
                    let frames = &clip.bones[key].rotation;
                    if time < frames[0].time {
                        continue;
                    }
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance
                        .cache_mut()
                        .accum_rotation(*bone, alpha * lerp_degrees(k0.angle, k1.angle, t));
                }
                Evaluator::Scale { key, bone, cursor } => {
                    let frames = &clip.bones[key].scale;
                    if time < frames[0].time {
                        continue;
                    }
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_scale(
                        *bone,
                        [alpha * lerp(k0.x, k1.x, t), alpha * lerp(k0.y, k1.y, t)],
                        alpha,
                    );
                }
                Evaluator::Shear { key, bone, cursor } => {
                    let frames = &clip.bones[key].shear;
                    if time < frames[0].time {
                        continue;
                    }
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_shear(
                        *bone,
                        [alpha * lerp(k0.x, k1.x, t), alpha * lerp(k0.y, k1.y, t)],
                    );
                }
                Evaluator::Translation { key, bone, cursor } => {
                    let frames = &clip.bones[key].translation;
                    if time < frames[0].time {
                        continue;
                    }
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_position(
                        *bone,
                        [alpha * lerp(k0.x, k1.x, t), alpha * lerp(k0.y, k1.y, t)],
                    );
                }
                Evaluator::Deform { key, cursor } => {
                    let frames = &clip.deforms[&key.skin][&key.slot][&key.attachment];
                    if time < frames[0].time {
                        // The buffer only survives while some evaluator is
                        // inside its keyed range.
                        if instance.deform_ref_count(*key) == 1 {
                            instance.drop_deform_buffer(*key);
                        }
                        continue;
                    }
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    let v0 = &k0.vertices;
                    let v1 = &k1.vertices;

                    let created = instance.deform_buffer_mut(*key).is_none();
                    if created {
                        instance.insert_deform_buffer(*key, vec![0.0; v0.len()]);
                    }
                    let Some(out) = instance.deform_buffer_mut(*key) else {
                        continue;
                    };
                    // A freshly allocated buffer is overwritten regardless
                    // of weight.
                    let alpha = if created { 1.0 } else { alpha };
                    if alpha < 1.0 {
                        for (i, out) in out.iter_mut().enumerate() {
                            *out += (lerp(v0[i], v1[i], t) - *out) * alpha;
                        }
                    } else {
                        for (i, out) in out.iter_mut().enumerate() {
                            *out = lerp(v0[i], v1[i], t);
                        }
                    }
                }
                Evaluator::DrawOrder => {
                    let frames = &clip.draw_order;
                    if time < frames[0].time {
                        continue;
                    }
                    let mut u = 0usize;
                    while u + 1 < frames.len() && frames[u + 1].time <= time {
                        u += 1;
                    }
                    apply_draw_order(&definition, instance, &frames[u].offsets);
                }
                Evaluator::SlotAttachment { key, slot } => {
                    let frames = &clip.slots[key].attachment;
                    if time < frames[0].time {
                        continue;
                    }
                    if !blend_discrete && alpha != 1.0 {
                        continue;
                    }
                    let mut u = 0usize;
                    while u + 1 < frames.len() && frames[u + 1].time <= time {
                        u += 1;
                    }
                    instance
                        .cache_mut()
                        .accum_slot_attachment(*slot, frames[u].id, alpha);
                }
                Evaluator::SlotColor { key, slot, cursor } => {
                    let frames = &clip.slots[key].color;
                    if time < frames[0].time {
                        continue;
                    }
                    let base = definition.slots[*slot as usize].color;
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_slot_color(
                        *slot,
                        [
                            channel_delta(base.r, k0.color.r, k1.color.r, t, alpha),
                            channel_delta(base.g, k0.color.g, k1.color.g, t, alpha),
                            channel_delta(base.b, k0.color.b, k1.color.b, t, alpha),
                            channel_delta(base.a, k0.color.a, k1.color.a, t, alpha),
                        ],
                    );
                }
                Evaluator::SlotTwoColor { key, slot, cursor } => {
                    let frames = &clip.slots[key].two_color;
                    if time < frames[0].time {
                        continue;
                    }
                    let data = &definition.slots[*slot as usize];
                    let light = data.color;
                    let dark = data.dark_color;
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_slot_two_color(
                        *slot,
                        TwoColorEntry {
                            light: [
                                channel_delta(light.r, k0.light.r, k1.light.r, t, alpha),
                                channel_delta(light.g, k0.light.g, k1.light.g, t, alpha),
                                channel_delta(light.b, k0.light.b, k1.light.b, t, alpha),
                                channel_delta(light.a, k0.light.a, k1.light.a, t, alpha),
                            ],
                            dark: [
                                channel_delta(dark.r, k0.dark.r, k1.dark.r, t, alpha),
                                channel_delta(dark.g, k0.dark.g, k1.dark.g, t, alpha),
                                channel_delta(dark.b, k0.dark.b, k1.dark.b, t, alpha),
                            ],
                        },
                    );
                }
                Evaluator::Ik { key, ik, cursor } => {
                    let frames = &clip.ik[key];
                    if time < frames[0].time {
                        continue;
                    }
                    let base = &definition.ik[*ik as usize];
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_ik(
                        *ik,
                        IkEntry {
                            mix: (lerp(k0.mix, k1.mix, t) - base.mix) * alpha,
                            softness: (lerp(k0.softness, k1.softness, t) - base.softness) * alpha,
                            bend_positive: lerp_boolean(
                                base.bend_positive,
                                k0.bend_positive,
                                k1.bend_positive,
                                t,
                                alpha,
                            ),
                            compress: lerp_boolean(
                                base.compress,
                                k0.compress,
                                k1.compress,
                                t,
                                alpha,
                            ),
                            stretch: lerp_boolean(base.stretch, k0.stretch, k1.stretch, t, alpha),
                        },
                    );
                }
                Evaluator::PathMix { key, path, cursor } => {
                    let frames = &clip.paths[key].mix;
                    if time < frames[0].time {
                        continue;
                    }
                    let base = &definition.paths[*path as usize];
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_path_mix(
                        *path,
                        [
                            (lerp(k0.position_mix, k1.position_mix, t) - base.position_mix)
                                * alpha,
                            (lerp(k0.rotation_mix, k1.rotation_mix, t) - base.rotation_mix)
                                * alpha,
                        ],
                    );
                }
                Evaluator::PathPosition { key, path, cursor } => {
                    let frames = &clip.paths[key].position;
                    if time < frames[0].time {
                        continue;
                    }
                    let base = &definition.paths[*path as usize];
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_path_position(
                        *path,
                        (lerp(k0.position, k1.position, t) - base.position) * alpha,
                    );
                }
                Evaluator::PathSpacing { key, path, cursor } => {
                    let frames = &clip.paths[key].spacing;
                    if time < frames[0].time {
                        continue;
                    }
                    let base = &definition.paths[*path as usize];
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_path_spacing(
                        *path,
                        (lerp(k0.spacing, k1.spacing, t) - base.spacing) * alpha,
                    );
                }
                Evaluator::Transform {
                    key,
                    transform,
                    cursor,
                } => {
                    let frames = &clip.transforms[key];
                    if time < frames[0].time {
                        continue;
                    }
                    let base = &definition.transforms[*transform as usize];
                    let (k0, k1) = find_frames(frames, time, cursor);
                    let t = alpha_between(curves, k0, k1, time);
                    instance.cache_mut().accum_transform(
                        *transform,
                        [
                            (lerp(k0.position_mix, k1.position_mix, t) - base.position_mix)
                                * alpha,
                            (lerp(k0.rotation_mix, k1.rotation_mix, t) - base.rotation_mix)
                                * alpha,
                            (lerp(k0.scale_mix, k1.scale_mix, t) - base.scale_mix) * alpha,
                            (lerp(k0.shear_mix, k1.shear_mix, t) - base.shear_mix) * alpha,
                        ],
                    );
                }
            }
        }
    }
}

fn channel_delta(base: u8, k0: u8, k1: u8, t: f32, alpha: f32) -> f32 {
    (lerp(k0 as f32, k1 as f32, t) - base as f32) * alpha
}

/// Turn a keyframe's offset list into an explicit slot permutation in the
/// frame cache. An empty offset list leaves the cache untouched so the
/// default order commits.
fn apply_draw_order(
    definition: &Definition,
    instance: &mut PoseInstance,
    offsets: &[crate::clip::DrawOrderOffset],
) {
    if offsets.is_empty() {
        return;
    }

    let slot_count = definition.slots.len();
    let cache = instance.cache_mut();

    // Scratch starts as the identity permutation; slots that are explicitly
    // placed get cleared from it while they are placed into the output.
    set_default_draw_order(slot_count, &mut cache.draw_order_scratch);
    cache.draw_order.clear();
    cache.draw_order.resize(slot_count, -1);

    for offset in offsets {
        let slot = definition.slot_index(offset.slot);
        if slot < 0 {
            continue;
        }
        let target = slot + offset.offset;
        if (0..slot_count as i16).contains(&target) {
            cache.draw_order[target as usize] = slot;
            cache.draw_order_scratch[slot as usize] = -1;
        }
    }

    // Fill unchanged slots back in from the highest remaining rank down,
    // restoring the scratch to sequential order as we go.
    let draws = slot_count as i32;
    let mut out_slot = draws - 1;
    for i in (0..draws).rev() {
        while out_slot >= 0 && cache.draw_order_scratch[out_slot as usize] < 0 {
            cache.draw_order_scratch[out_slot as usize] = out_slot as i16;
            out_slot -= 1;
        }

        if cache.draw_order[i as usize] >= 0 {
            continue;
        }

        if out_slot >= 0 {
            cache.draw_order[i as usize] = out_slot as i16;
            out_slot -= 1;
        }
    }
    while out_slot >= 0 {
        cache.draw_order_scratch[out_slot as usize] = out_slot as i16;
        out_slot -= 1;
    }
}
