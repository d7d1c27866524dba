//! `Wait` statements: parsing the argument forms and computing where in the
//! loop a position-based wait should end.
//!
//! Event-based forms (`last`, `thread`, `function`, `block`, sync
//! boundaries) carry no geometry; the interpreter turns them into wait-frame
//! conditions directly.

use crate::engine::{SyncBoundary, TrackState};

use super::expr::{parse_expr, Expr};

/// Unit of a position-based wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUnit {
    Frame,
    Msec,
    Subcycle,
    Cycle,
    Loop,
}

impl WaitUnit {
    pub fn parse(word: &str) -> Option<WaitUnit> {
        match word.to_ascii_lowercase().as_str() {
            "frame" | "frames" => Some(WaitUnit::Frame),
            "msec" | "msecs" | "millisecond" | "milliseconds" => Some(WaitUnit::Msec),
            "subcycle" | "subcycles" => Some(WaitUnit::Subcycle),
            "cycle" | "cycles" => Some(WaitUnit::Cycle),
            "loop" | "loops" => Some(WaitUnit::Loop),
            _ => None,
        }
    }

    /// Frames per unit on `track`.
    fn frames(self, track: &TrackState, sample_rate: u32) -> u64 {
        match self {
            WaitUnit::Frame => 1,
            WaitUnit::Msec => (sample_rate as u64 / 1000).max(1),
            WaitUnit::Subcycle => track.subcycle_frames(),
            WaitUnit::Cycle => track.cycle_frames(),
            WaitUnit::Loop => track.loop_frames,
        }
    }

    fn needs_loop(self) -> bool {
        matches!(self, WaitUnit::Subcycle | WaitUnit::Cycle | WaitUnit::Loop)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitTarget {
    /// `amount` units from now, or the `amount`-th next boundary.
    Relative(WaitUnit),
    /// Position `amount` (in units) within the loop.
    Absolute(WaitUnit),
    LoopStart,
    LoopEnd,
    Sync(SyncBoundary),
    /// The last engine event scheduled by this invocation.
    Last,
    /// The last background job submitted by this invocation.
    Thread,
    Function(String),
    /// The next audio block.
    Block,
}

#[derive(Debug, Clone)]
pub struct WaitStmt {
    pub target: WaitTarget,
    pub amount: Option<Expr>,
    /// Keep counting while the transport is paused.
    pub in_pause: bool,
}

impl WaitStmt {
    /// Parse the argument tokens following `Wait`.
    pub fn parse(args: &[String]) -> Result<WaitStmt, String> {
        let mut args: Vec<&str> = args.iter().map(String::as_str).collect();
        let in_pause = args.last().is_some_and(|a| a.eq_ignore_ascii_case("inPause"));
        if in_pause {
            args.pop();
        }
        let Some((&first, rest)) = args.split_first() else {
            return Err("Wait: missing wait type".into());
        };
        let amount = |rest: &[&str]| -> Result<Option<Expr>, String> {
            if rest.is_empty() {
                Ok(None)
            } else {
                parse_expr(&rest.join(" ")).map(Some).map_err(|e| format!("Wait: {e}"))
            }
        };
        let required = |rest: &[&str]| -> Result<Option<Expr>, String> {
            match amount(rest)? {
                Some(e) => Ok(Some(e)),
                None => Err(format!("Wait {first}: missing amount")),
            }
        };

        let lower = first.to_ascii_lowercase();
        let (target, amount) = match lower.as_str() {
            "frame" => (WaitTarget::Absolute(WaitUnit::Frame), required(rest)?),
            "frames" => (WaitTarget::Relative(WaitUnit::Frame), required(rest)?),
            "msec" | "msecs" => (WaitTarget::Relative(WaitUnit::Msec), required(rest)?),
            "until" => {
                let (&unit, rest) = rest.split_first().ok_or("Wait until: missing unit")?;
                let unit = WaitUnit::parse(unit).ok_or_else(|| format!("Wait until: bad unit {unit:?}"))?;
                (WaitTarget::Absolute(unit), required(rest)?)
            }
            "start" => (WaitTarget::LoopStart, None),
            "end" => (WaitTarget::LoopEnd, None),
            "last" => (WaitTarget::Last, None),
            "thread" => (WaitTarget::Thread, None),
            "block" => (WaitTarget::Block, None),
            "function" => {
                let name = rest.first().ok_or("Wait function: missing function name")?;
                (WaitTarget::Function((*name).to_owned()), None)
            }
            _ => {
                if let Some(unit) = WaitUnit::parse(first) {
                    (WaitTarget::Relative(unit), amount(rest)?)
                } else if let Ok(boundary) = first.parse::<SyncBoundary>() {
                    (WaitTarget::Sync(boundary), amount(rest)?)
                } else {
                    // A bare expression counts milliseconds.
                    (WaitTarget::Relative(WaitUnit::Msec), amount(&args)?)
                }
            }
        };
        Ok(WaitStmt { target, amount, in_pause })
    }
}

/// Where a position-based wait ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPoint {
    /// Frames from the current position.
    pub delay: u64,
    /// Loop frame at which the wait ends; equals `delay` for an empty loop.
    pub frame: u64,
}

/// Compute the end point of a position-based wait.  A position already
/// passed in the current pass targets the next pass.
pub fn locate(target: &WaitTarget, amount: i64, track: &TrackState, sample_rate: u32)
    -> Result<WaitPoint, String>
{
    let loop_frames = track.loop_frames;
    let frame = if loop_frames > 0 { track.frame % loop_frames } else { track.frame };
    let amount = amount.max(0) as u64;

    let delay = match target {
        WaitTarget::Relative(unit) => {
            if unit.needs_loop() && loop_frames == 0 {
                return Err("wait on an empty loop".into());
            }
            match unit {
                WaitUnit::Frame => amount,
                WaitUnit::Msec => amount * sample_rate as u64 / 1000,
                _ => {
                    let size = unit.frames(track, sample_rate).max(1);
                    let boundary = (frame / size + amount.max(1)) * size;
                    boundary - frame
                }
            }
        }
        WaitTarget::Absolute(unit) => {
            if unit.needs_loop() && loop_frames == 0 {
                return Err("wait on an empty loop".into());
            }
            let position = match unit {
                WaitUnit::Msec => amount * sample_rate as u64 / 1000,
                _ => amount * unit.frames(track, sample_rate),
            };
            if loop_frames == 0 {
                position.saturating_sub(frame)
            } else {
                let position = position % loop_frames;
                if position > frame {
                    position - frame
                } else {
                    loop_frames - frame + position
                }
            }
        }
        WaitTarget::LoopStart => {
            if loop_frames == 0 {
                return Err("wait on an empty loop".into());
            }
            loop_frames - frame
        }
        WaitTarget::LoopEnd => {
            if loop_frames == 0 {
                return Err("wait on an empty loop".into());
            }
            let last = loop_frames - 1;
            if frame < last {
                last - frame
            } else {
                loop_frames
            }
        }
        other => return Err(format!("{other:?} is not a position")),
    };

    let end = if loop_frames > 0 { (frame + delay) % loop_frames } else { delay };
    Ok(WaitPoint { delay, frame: end })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_owned).collect()
    }

    fn track(frame: u64) -> TrackState {
        TrackState { frame, loop_frames: 4000, cycles: 2, subcycles: 4, ..TrackState::default() }
    }

    #[test]
    fn parse_forms() {
        let w = WaitStmt::parse(&args("frame 100")).expect("parse");
        assert_eq!(w.target, WaitTarget::Absolute(WaitUnit::Frame));
        assert!(w.amount.is_some());

        let w = WaitStmt::parse(&args("until cycle 1 inPause")).expect("parse");
        assert_eq!(w.target, WaitTarget::Absolute(WaitUnit::Cycle));
        assert!(w.in_pause);

        let w = WaitStmt::parse(&args("Subcycles")).expect("parse");
        assert_eq!(w.target, WaitTarget::Relative(WaitUnit::Subcycle));
        assert!(w.amount.is_none());

        let w = WaitStmt::parse(&args("bar 2")).expect("parse");
        assert_eq!(w.target, WaitTarget::Sync(SyncBoundary::Bar));

        let w = WaitStmt::parse(&args("function Record")).expect("parse");
        assert_eq!(w.target, WaitTarget::Function("Record".into()));

        let w = WaitStmt::parse(&args("500")).expect("parse");
        assert_eq!(w.target, WaitTarget::Relative(WaitUnit::Msec));
    }

    #[test]
    fn parse_errors() {
        assert!(WaitStmt::parse(&[]).is_err());
        assert!(WaitStmt::parse(&args("frame")).is_err());
        assert!(WaitStmt::parse(&args("until fortnight 3")).is_err());
        assert!(WaitStmt::parse(&args("function")).is_err());
    }

    #[test]
    fn absolute_frame() {
        let p = locate(&WaitTarget::Absolute(WaitUnit::Frame), 100, &track(0), 44_100).expect("locate");
        assert_eq!(p, WaitPoint { delay: 100, frame: 100 });
    }

    #[test]
    fn passed_position_targets_next_pass() {
        let p = locate(&WaitTarget::Absolute(WaitUnit::Frame), 100, &track(300), 44_100).expect("locate");
        assert_eq!(p.delay, 3800);
        assert_eq!(p.frame, 100);
        // Exactly on the position also waits a full pass.
        let p = locate(&WaitTarget::Absolute(WaitUnit::Frame), 100, &track(100), 44_100).expect("locate");
        assert_eq!(p.delay, 4000);
    }

    #[test]
    fn relative_boundaries() {
        // subcycle = 500 frames
        let p = locate(&WaitTarget::Relative(WaitUnit::Subcycle), 1, &track(700), 44_100).expect("locate");
        assert_eq!(p, WaitPoint { delay: 300, frame: 1000 });
        let p = locate(&WaitTarget::Relative(WaitUnit::Cycle), 2, &track(700), 44_100).expect("locate");
        assert_eq!(p, WaitPoint { delay: 3300, frame: 0 });
        let p = locate(&WaitTarget::Relative(WaitUnit::Msec), 10, &track(0), 44_100).expect("locate");
        assert_eq!(p.delay, 441);
    }

    #[test]
    fn loop_edges() {
        let p = locate(&WaitTarget::LoopStart, 0, &track(1000), 44_100).expect("locate");
        assert_eq!(p, WaitPoint { delay: 3000, frame: 0 });
        let p = locate(&WaitTarget::LoopEnd, 0, &track(3999), 44_100).expect("locate");
        assert_eq!(p.delay, 4000);
    }

    #[test]
    fn empty_loop() {
        let empty = TrackState::default();
        assert!(locate(&WaitTarget::Relative(WaitUnit::Cycle), 1, &empty, 44_100).is_err());
        assert!(locate(&WaitTarget::LoopStart, 0, &empty, 44_100).is_err());
        let p = locate(&WaitTarget::Absolute(WaitUnit::Frame), 100, &empty, 44_100).expect("locate");
        assert_eq!(p.delay, 100);
    }
}
