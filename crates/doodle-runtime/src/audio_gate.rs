//! Audio unlock handshake.
//!
//! Audio may only start after a user gesture. The gate is shared by every
//! audio texture and is opened by the first tap on any surface; a touch that
//! moved before lifting is a drag, not a tap.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapKind {
    TouchStart,
    TouchEnd,
    MouseUp,
}

#[derive(Default)]
struct GateState {
    unlocked: bool,
    listening: bool,
    dragged: HashSet<u64>,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

/// Cloneable handle; all clones see the same gate.
#[derive(Clone)]
pub struct AudioGate(Rc<RefCell<GateState>>);

impl fmt::Debug for AudioGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.borrow();
        f.debug_struct("AudioGate")
            .field("unlocked", &s.unlocked)
            .field("listening", &s.listening)
            .field("pending_callbacks", &s.callbacks.len())
            .finish()
    }
}

impl Default for AudioGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioGate {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(GateState {
            listening: true,
            ..GateState::default()
        })))
    }

    pub fn is_unlocked(&self) -> bool {
        self.0.borrow().unlocked
    }

    pub fn pending_callbacks(&self) -> usize {
        self.0.borrow().callbacks.len()
    }

    /// Run `cb` once the gate opens, or right away if it already has.
    pub fn on_start(&self, cb: impl FnOnce() + 'static) {
        let mut s = self.0.borrow_mut();
        if s.unlocked {
            drop(s);
            cb();
        } else {
            s.callbacks.push(Box::new(cb));
        }
    }

    /// A touch moved on `target`; its next tap is swallowed.
    pub fn touch_move(&self, target: u64) {
        let mut s = self.0.borrow_mut();
        if s.listening {
            s.dragged.insert(target);
        }
    }

    /// A tap on `target`. Returns whether this tap opened the gate.
    pub fn tap(&self, target: u64, kind: TapKind) -> bool {
        {
            let mut s = self.0.borrow_mut();
            if !s.listening {
                return false;
            }
            if s.dragged.remove(&target) {
                tracing::trace!(target, ?kind, "tap after drag ignored");
                return false;
            }
        }
        self.unlock();
        true
    }

    /// Open the gate and run queued callbacks. Later taps are ignored.
    pub fn unlock(&self) {
        let callbacks = {
            let mut s = self.0.borrow_mut();
            if s.unlocked {
                return;
            }
            s.unlocked = true;
            s.listening = false;
            s.dragged.clear();
            std::mem::take(&mut s.callbacks)
        };
        tracing::debug!(callbacks = callbacks.len(), "audio unlocked");
        for cb in callbacks {
            cb();
        }
    }

    /// Stop listening for gestures and drop queued callbacks.
    pub fn dispose(&self) {
        let mut s = self.0.borrow_mut();
        s.listening = false;
        s.dragged.clear();
        s.callbacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn first_tap_unlocks_and_runs_callbacks_once() {
        let gate = AudioGate::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        gate.on_start(move || h.set(h.get() + 1));

        assert!(gate.tap(1, TapKind::MouseUp));
        assert!(gate.is_unlocked());
        assert!(!gate.tap(1, TapKind::MouseUp));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn drag_swallows_one_tap() {
        let gate = AudioGate::new();
        gate.touch_move(7);
        assert!(!gate.tap(7, TapKind::TouchEnd));
        assert!(!gate.is_unlocked());
        assert!(gate.tap(7, TapKind::TouchStart));
    }

    #[test]
    fn drag_is_per_target() {
        let gate = AudioGate::new();
        gate.touch_move(1);
        assert!(gate.tap(2, TapKind::TouchEnd));
    }

    #[test]
    fn late_callbacks_run_immediately() {
        let gate = AudioGate::new();
        gate.unlock();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        gate.on_start(move || r.set(true));
        assert!(ran.get());
    }

    #[test]
    fn disposed_gate_ignores_taps() {
        let gate = AudioGate::new();
        gate.dispose();
        assert!(!gate.tap(1, TapKind::MouseUp));
        assert!(!gate.is_unlocked());
    }
}
