// SPDX-License-Identifier: MPL-2.0

//! Presentation readiness gate for one layer surface.
//!
//! Each surface moves through
//! `PendingConfigure -> Configured -> Painting -> AwaitingReady -> Configured`.
//! Only one presentation may be outstanding per surface. A paint arriving
//! while the compositor has not signalled readiness is dropped, never
//! queued; the next scheduler tick tries again.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// layer surface committed, waiting for the first configure
    PendingConfigure,
    Configured,
    /// a paint is being issued
    Painting,
    /// presented, waiting for the frame callback
    AwaitingReady,
    /// closed by the compositor
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Configure { width: u32, height: u32 },
    PaintRequested,
    PaintSubmitted,
    PaintFailed,
    FrameDone,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    NotConfigured,
    AwaitingReady,
    Busy,
    Closed,
}

/// What the backend must do after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    /// allocate the native window at this logical size
    CreateWindow {
        width: u32,
        height: u32,
    },
    /// resize the native window now
    ResizeWindow {
        width: u32,
        height: u32,
    },
    /// draw this paint, resizing the native window first if requested
    Draw {
        resize: Option<(u32, u32)>,
    },
    /// the paint request was ignored
    Dropped(DropReason),
}

/// Phase plus the sizes that decide when the native window is resized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceGate {
    pub phase: Phase,
    /// latest size from the compositor
    pub size: Option<(u32, u32)>,
    /// size the native window is allocated at
    pub window_size: Option<(u32, u32)>,
}

impl Default for SurfaceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceGate {
    pub const fn new() -> Self {
        Self {
            phase: Phase::PendingConfigure,
            size: None,
            window_size: None,
        }
    }

    pub fn can_paint(&self) -> bool {
        self.phase == Phase::Configured
    }

    /// Apply `event`, returning the next gate and the effect to carry out.
    #[must_use]
    pub fn step(self, event: Event) -> (Self, Effect) {
        use Phase::*;

        match (self.phase, event) {
            (Closed, Event::PaintRequested) => (self, Effect::Dropped(DropReason::Closed)),
            (Closed, _) => (self, Effect::None),

            (_, Event::Closed) => (
                Self {
                    phase: Closed,
                    ..self
                },
                Effect::None,
            ),

            (phase, Event::Configure { width, height }) => {
                let size = Some((width, height));
                match phase {
                    PendingConfigure | Configured => {
                        let effect = match self.window_size {
                            None => Effect::CreateWindow { width, height },
                            Some(current) if current == (width, height) => Effect::None,
                            Some(_) => Effect::ResizeWindow { width, height },
                        };
                        let gate = Self {
                            phase: Configured,
                            size,
                            window_size: size,
                        };
                        (gate, effect)
                    }
                    // the resize waits for the next paint attempt
                    Painting | AwaitingReady => (Self { size, ..self }, Effect::None),
                    Closed => (self, Effect::None),
                }
            }

            (Configured, Event::PaintRequested) => {
                let resize = match self.size {
                    Some(size) if self.window_size != Some(size) => Some(size),
                    _ => None,
                };
                let gate = Self {
                    phase: Painting,
                    window_size: self.size.or(self.window_size),
                    ..self
                };
                (gate, Effect::Draw { resize })
            }
            (PendingConfigure, Event::PaintRequested) => {
                (self, Effect::Dropped(DropReason::NotConfigured))
            }
            (AwaitingReady, Event::PaintRequested) => {
                (self, Effect::Dropped(DropReason::AwaitingReady))
            }
            (Painting, Event::PaintRequested) => (self, Effect::Dropped(DropReason::Busy)),

            (Painting, Event::PaintSubmitted) => (
                Self {
                    phase: AwaitingReady,
                    ..self
                },
                Effect::None,
            ),
            (Painting, Event::PaintFailed) => (
                Self {
                    phase: Configured,
                    ..self
                },
                Effect::None,
            ),

            (AwaitingReady, Event::FrameDone) => (
                Self {
                    phase: Configured,
                    ..self
                },
                Effect::None,
            ),

            // stale callbacks and out-of-order reports
            (_, Event::PaintSubmitted | Event::PaintFailed | Event::FrameDone) => {
                (self, Effect::None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(width: u32, height: u32) -> SurfaceGate {
        let (gate, effect) = SurfaceGate::new().step(Event::Configure { width, height });
        assert_eq!(effect, Effect::CreateWindow { width, height });
        gate
    }

    #[test]
    fn test_first_configure_creates_window() {
        let gate = configured(1920, 1080);
        assert_eq!(gate.phase, Phase::Configured);
        assert_eq!(gate.size, Some((1920, 1080)));
        assert!(gate.can_paint());
    }

    #[test]
    fn test_paint_before_configure_is_dropped() {
        let (gate, effect) = SurfaceGate::new().step(Event::PaintRequested);
        assert_eq!(effect, Effect::Dropped(DropReason::NotConfigured));
        assert_eq!(gate.phase, Phase::PendingConfigure);
    }

    #[test]
    fn test_full_presentation_cycle() {
        let gate = configured(1920, 1080);

        let (gate, effect) = gate.step(Event::PaintRequested);
        assert_eq!(effect, Effect::Draw { resize: None });
        assert_eq!(gate.phase, Phase::Painting);

        let (gate, _) = gate.step(Event::PaintSubmitted);
        assert_eq!(gate.phase, Phase::AwaitingReady);

        let (gate, _) = gate.step(Event::FrameDone);
        assert_eq!(gate.phase, Phase::Configured);
    }

    #[test]
    fn test_paint_while_awaiting_ready_is_dropped_and_keeps_size() {
        let (gate, _) = configured(2560, 1440).step(Event::PaintRequested);
        let (gate, _) = gate.step(Event::PaintSubmitted);

        let (after, effect) = gate.step(Event::PaintRequested);
        assert_eq!(effect, Effect::Dropped(DropReason::AwaitingReady));
        assert_eq!(after, gate);
        assert_eq!(after.size, Some((2560, 1440)));
    }

    #[test]
    fn test_resize_while_awaiting_ready_is_deferred() {
        let (gate, _) = configured(1920, 1080).step(Event::PaintRequested);
        let (gate, _) = gate.step(Event::PaintSubmitted);

        let (gate, effect) = gate.step(Event::Configure {
            width: 1280,
            height: 720,
        });
        assert_eq!(effect, Effect::None);
        assert_eq!(gate.phase, Phase::AwaitingReady);
        assert_eq!(gate.size, Some((1280, 720)));
        assert_eq!(gate.window_size, Some((1920, 1080)));

        let (gate, _) = gate.step(Event::FrameDone);
        let (gate, effect) = gate.step(Event::PaintRequested);
        assert_eq!(
            effect,
            Effect::Draw {
                resize: Some((1280, 720))
            }
        );
        assert_eq!(gate.window_size, Some((1280, 720)));
    }

    #[test]
    fn test_resize_while_configured_is_immediate() {
        let (gate, effect) = configured(1920, 1080).step(Event::Configure {
            width: 3840,
            height: 2160,
        });
        assert_eq!(
            effect,
            Effect::ResizeWindow {
                width: 3840,
                height: 2160
            }
        );
        assert_eq!(gate.window_size, Some((3840, 2160)));

        let (_, effect) = gate.step(Event::Configure {
            width: 3840,
            height: 2160,
        });
        assert_eq!(effect, Effect::None);
    }

    #[test]
    fn test_failed_paint_returns_to_configured() {
        let (gate, _) = configured(800, 600).step(Event::PaintRequested);
        let (gate, _) = gate.step(Event::PaintFailed);
        assert_eq!(gate.phase, Phase::Configured);
    }

    #[test]
    fn test_closed_surface_drops_everything() {
        let (gate, _) = configured(800, 600).step(Event::Closed);
        assert_eq!(gate.phase, Phase::Closed);

        let (gate, effect) = gate.step(Event::PaintRequested);
        assert_eq!(effect, Effect::Dropped(DropReason::Closed));

        let (gate, effect) = gate.step(Event::Configure {
            width: 1,
            height: 1,
        });
        assert_eq!(effect, Effect::None);
        assert_eq!(gate.phase, Phase::Closed);
    }

    #[test]
    fn test_stale_frame_done_is_ignored() {
        let gate = configured(800, 600);
        let (after, effect) = gate.step(Event::FrameDone);
        assert_eq!(effect, Effect::None);
        assert_eq!(after, gate);
    }
}
