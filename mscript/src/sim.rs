//! Headless simulated looper.
//!
//! [`SimEngine`] implements [`Engine`] with just enough behaviour to run
//! scripts without audio: tracks have a position that moves when
//! [`SimEngine::advance`] is called, wait points complete when their frame
//! is reached, and every request is recorded so tests can inspect it.

use std::collections::HashMap;

use log::trace;

use crate::engine::{
    Direction, Engine, EngineNotice, EventId, FunctionCall, Job, Mode, ParamScope, SyncBoundary,
    ThreadEventId, TrackId, TrackState,
};
use crate::script::value::Value;
use crate::worker::FileWorker;

/// A function invocation as the engine received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub name: String,
    pub direction: Direction,
    pub arg: Option<Value>,
    pub track: TrackId,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    id: EventId,
    track: TrackId,
    remaining: u64,
    in_pause: bool,
}

#[derive(Debug)]
pub struct SimEngine {
    pub tracks: Vec<TrackState>,
    pub active: TrackId,
    /// Engine clock in milliseconds.
    pub clock: u64,
    pub sample_rate: u32,
    pub audio: bool,
    /// Quantize period in frames; `None` disables quantized starts.
    pub quantize_frames: Option<u64>,
    /// Frames per beat of the sync source; `None` means no sync source.
    pub beat_frames: Option<u64>,
    pub beats_per_bar: u64,
    /// Frames elapsed since the simulation started.
    pub transport: u64,

    pub invoked: Vec<RecordedCall>,
    pub messages: Vec<String>,
    pub jobs: Vec<(ThreadEventId, Job)>,
    pub canceled: Vec<EventId>,

    params: HashMap<(String, ParamScope), Value>,
    pending: Vec<Pending>,
    notices: Vec<EngineNotice>,
    next_event: u64,
    next_thread: u64,
    worker: Option<FileWorker>,
}

impl SimEngine {
    /// `tracks` playing loops of `loop_frames` frames each (0 for empty
    /// tracks).  Track 1 is active.
    pub fn new(tracks: usize, loop_frames: u64) -> Self {
        let tracks = (0..tracks as u32)
            .map(|i| TrackState {
                id: TrackId(i),
                loop_frames,
                cycles: 1,
                subcycles: 4,
                mode: if loop_frames > 0 { Mode::Play } else { Mode::Reset },
                ..TrackState::default()
            })
            .collect();
        SimEngine {
            tracks,
            active: TrackId(0),
            clock: 0,
            sample_rate: 44_100,
            audio: true,
            quantize_frames: None,
            beat_frames: None,
            beats_per_bar: 4,
            transport: 0,
            invoked: Vec::new(),
            messages: Vec::new(),
            jobs: Vec::new(),
            canceled: Vec::new(),
            params: HashMap::new(),
            pending: Vec::new(),
            notices: Vec::new(),
            next_event: 1,
            next_thread: 1,
            worker: None,
        }
    }

    /// Forward submitted jobs to a real background worker.
    pub fn with_worker(mut self, worker: FileWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn worker_mut(&mut self) -> Option<&mut FileWorker> {
        self.worker.as_mut()
    }

    pub fn pending_events(&self) -> Vec<EventId> {
        self.pending.iter().map(|p| p.id).collect()
    }

    /// Move the transport forward and report what happened.
    pub fn advance(&mut self, frames: u64) -> Vec<EngineNotice> {
        self.transport += frames;
        self.clock += frames * 1000 / self.sample_rate.max(1) as u64;
        for t in &mut self.tracks {
            if t.loop_frames > 0 && !t.paused {
                t.frame = (t.frame + frames) % t.loop_frames;
            }
        }
        let mut notices = std::mem::take(&mut self.notices);
        let tracks = &self.tracks;
        self.pending.retain_mut(|p| {
            let paused = tracks.get(p.track.0 as usize).is_some_and(|t| t.paused);
            if paused && !p.in_pause {
                return true;
            }
            p.remaining = p.remaining.saturating_sub(frames);
            if p.remaining == 0 {
                notices.push(EngineNotice::EventCompleted(p.id));
                false
            } else {
                true
            }
        });
        notices
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut TrackState, String> {
        self.tracks.get_mut(id.0 as usize).ok_or_else(|| format!("no track {}", id.number()))
    }

    fn event(&mut self, track: TrackId, delay: u64, in_pause: bool) -> EventId {
        let id = EventId(self.next_event);
        self.next_event += 1;
        if delay == 0 {
            self.notices.push(EngineNotice::EventCompleted(id));
        } else {
            self.pending.push(Pending { id, track, remaining: delay, in_pause });
        }
        id
    }

    fn boundary_frames(&self, boundary: SyncBoundary, track: TrackId) -> Option<u64> {
        let beat = self.beat_frames?;
        let frames = match boundary {
            SyncBoundary::Pulse => (beat / 24).max(1),
            SyncBoundary::Beat => beat,
            SyncBoundary::Bar | SyncBoundary::ExternalStart => beat * self.beats_per_bar,
            SyncBoundary::Realign => self.track(track).map_or(0, |t| t.loop_frames),
        };
        (frames > 0).then_some(frames)
    }
}

impl Engine for SimEngine {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn active_track(&self) -> TrackId {
        self.active
    }

    fn track(&self, id: TrackId) -> Option<TrackState> {
        self.tracks.get(id.0 as usize).cloned()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn millis(&self) -> u64 {
        self.clock
    }

    fn has_audio(&self) -> bool {
        self.audio
    }

    fn invoke(&mut self, call: &FunctionCall<'_>) -> Result<Option<EventId>, String> {
        trace!("sim: {} {:?} track {}", call.name, call.direction, call.track.number());
        self.invoked.push(RecordedCall {
            name: call.name.to_owned(),
            direction: call.direction,
            arg: call.arg.clone(),
            track: call.track,
        });
        let count = self.tracks.len() as i64;
        let down = call.direction == Direction::Down;
        match call.name.to_ascii_lowercase().as_str() {
            "mute" if down => {
                let t = self.track_mut(call.track)?;
                t.muted = !t.muted;
            }
            "pause" if down => {
                let t = self.track_mut(call.track)?;
                t.paused = !t.paused;
            }
            "record" => {
                let t = self.track_mut(call.track)?;
                if down {
                    t.mode = Mode::Record;
                } else {
                    t.mode = Mode::Play;
                }
            }
            "overdub" if down => {
                let t = self.track_mut(call.track)?;
                t.mode = if t.mode == Mode::Overdub { Mode::Play } else { Mode::Overdub };
            }
            "reset" if down => {
                let t = self.track_mut(call.track)?;
                t.mode = Mode::Reset;
                t.loop_frames = 0;
                t.frame = 0;
            }
            "trackselect" if down => {
                let n = call.arg.as_ref().map_or(1, Value::as_int);
                if n < 1 || n > count {
                    return Err(format!("TrackSelect: no track {n}"));
                }
                self.active = TrackId(n as u32 - 1);
            }
            "nexttrack" if down => self.active = TrackId(((self.active.0 as i64 + 1) % count.max(1)) as u32),
            "prevtrack" if down => {
                self.active = TrackId(((self.active.0 as i64 - 1).rem_euclid(count.max(1))) as u32)
            }
            _ => {}
        }
        if down {
            self.notices.push(EngineNotice::FunctionCompleted { name: call.name.to_owned(), track: call.track });
        }
        Ok(None)
    }

    fn schedule_wait(&mut self, track: TrackId, delay_frames: u64, in_pause: bool) -> Option<EventId> {
        self.track(track)?;
        Some(self.event(track, delay_frames, in_pause))
    }

    fn schedule_sync_wait(&mut self, track: TrackId, boundary: SyncBoundary, count: u32) -> Option<EventId> {
        let size = self.boundary_frames(boundary, track)?;
        let delay = (self.transport / size + count.max(1) as u64) * size - self.transport;
        Some(self.event(track, delay, false))
    }

    fn schedule_quantized(&mut self, track: TrackId) -> Option<EventId> {
        let q = self.quantize_frames.filter(|&q| q > 0)?;
        let frame = self.track(track)?.frame;
        Some(self.event(track, q - frame % q, false))
    }

    fn cancel_event(&mut self, id: EventId) {
        self.pending.retain(|p| p.id != id);
        self.canceled.push(id);
    }

    fn submit_job(&mut self, job: Job) -> ThreadEventId {
        let id = ThreadEventId(self.next_thread);
        self.next_thread += 1;
        if let Some(worker) = &mut self.worker {
            worker.submit(id, job.clone());
        }
        self.jobs.push((id, job));
        id
    }

    fn get_parameter(&self, name: &str, scope: ParamScope) -> Option<Value> {
        self.params.get(&(name.to_ascii_lowercase(), scope)).cloned()
    }

    fn set_parameter(&mut self, name: &str, scope: ParamScope, value: &Value) -> Result<(), String> {
        if let ParamScope::Track(t) = scope {
            self.track_mut(t)?;
        }
        self.params.insert((name.to_ascii_lowercase(), scope), value.clone());
        Ok(())
    }

    fn message(&mut self, text: &str) {
        self.messages.push(text.to_owned());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_complete_when_reached() {
        let mut e = SimEngine::new(1, 1000);
        let a = e.schedule_wait(TrackId(0), 100, false).unwrap();
        let b = e.schedule_wait(TrackId(0), 300, false).unwrap();
        assert!(e.advance(99).is_empty());
        assert_eq!(e.advance(1), vec![EngineNotice::EventCompleted(a)]);
        assert_eq!(e.pending_events(), vec![b]);
        assert_eq!(e.tracks[0].frame, 100);
    }

    #[test]
    fn paused_tracks_hold_their_waits() {
        let mut e = SimEngine::new(1, 1000);
        let held = e.schedule_wait(TrackId(0), 10, false).unwrap();
        let running = e.schedule_wait(TrackId(0), 10, true).unwrap();
        e.tracks[0].paused = true;
        assert_eq!(e.advance(20), vec![EngineNotice::EventCompleted(running)]);
        assert_eq!(e.pending_events(), vec![held]);
    }

    #[test]
    fn sync_waits_need_a_source() {
        let mut e = SimEngine::new(1, 1000);
        assert!(e.schedule_sync_wait(TrackId(0), SyncBoundary::Beat, 1).is_none());
        e.beat_frames = Some(200);
        e.advance(50);
        let id = e.schedule_sync_wait(TrackId(0), SyncBoundary::Bar, 1).unwrap();
        assert!(e.advance(749).is_empty());
        assert_eq!(e.advance(1), vec![EngineNotice::EventCompleted(id)]);
    }

    #[test]
    fn functions_are_recorded_and_reported() {
        let mut e = SimEngine::new(2, 1000);
        let call = FunctionCall { name: "Mute", direction: Direction::Down, arg: None, track: TrackId(1) };
        assert_eq!(e.invoke(&call), Ok(None));
        assert!(e.tracks[1].muted);
        let select = FunctionCall { name: "TrackSelect", direction: Direction::Down, arg: Some(Value::Int(2)), track: TrackId(0) };
        e.invoke(&select).unwrap();
        assert_eq!(e.active, TrackId(1));
        let bad = FunctionCall { arg: Some(Value::Int(9)), ..select };
        assert!(e.invoke(&bad).is_err());
        let notices = e.advance(1);
        assert!(notices.contains(&EngineNotice::FunctionCompleted { name: "Mute".into(), track: TrackId(1) }));
    }

    #[test]
    fn parameters_are_scoped() {
        let mut e = SimEngine::new(2, 1000);
        e.set_parameter("Feedback", ParamScope::Track(TrackId(1)), &Value::Int(90)).unwrap();
        assert_eq!(e.get_parameter("feedback", ParamScope::Track(TrackId(1))), Some(Value::Int(90)));
        assert_eq!(e.get_parameter("feedback", ParamScope::Track(TrackId(0))), None);
        assert!(e.set_parameter("pan", ParamScope::Track(TrackId(5)), &Value::Int(0)).is_err());
    }
}
