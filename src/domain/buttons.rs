//! Button edge detection with per-button debounce and a stuck-key watchdog.

use crate::domain::models::{Button, ButtonEvent, Buttons};
use crate::domain::settings::SessionConfig;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
struct TrackedButton {
    is_pressed: bool,
    last_transition: Option<Instant>,
}

pub struct ButtonTracker {
    buttons: [TrackedButton; Button::ALL.len()],
    debounce: Duration,
    inactivity_timeout: Duration,
    last_packet: Option<Instant>,
}

impl ButtonTracker {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            buttons: [TrackedButton::default(); Button::ALL.len()],
            debounce: Duration::from_millis(config.debounce_ms),
            inactivity_timeout: Duration::from_millis(config.inactivity_timeout_ms),
            last_packet: None,
        }
    }

    pub fn configure(&mut self, config: &SessionConfig) {
        self.debounce = Duration::from_millis(config.debounce_ms);
        self.inactivity_timeout = Duration::from_millis(config.inactivity_timeout_ms);
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons[button.index()].is_pressed
    }

    /// Compare a decoded packet against the tracked state.
    ///
    /// Changes inside the debounce window are dropped, not deferred.
    pub fn update(&mut self, state: &Buttons, now: Instant) -> Vec<ButtonEvent> {
        self.last_packet = Some(now);

        let mut events = Vec::new();
        for button in Button::ALL {
            let pressed = state.is_pressed(button);
            let tracked = &mut self.buttons[button.index()];
            if pressed == tracked.is_pressed {
                continue;
            }

            let settled = tracked
                .last_transition
                .map_or(true, |last| now.saturating_duration_since(last) > self.debounce);
            if !settled {
                debug!(?button, pressed, "Ignoring button bounce");
                continue;
            }

            tracked.is_pressed = pressed;
            tracked.last_transition = Some(now);
            events.push(ButtonEvent {
                button,
                pressed,
                synthetic: false,
            });
        }
        events
    }

    /// Watchdog tick: when buttons are held but no packet has arrived for the
    /// inactivity timeout, release everything.
    pub fn check_stalled(&mut self, now: Instant) -> Vec<ButtonEvent> {
        let Some(last_packet) = self.last_packet else {
            return Vec::new();
        };
        if now.saturating_duration_since(last_packet) <= self.inactivity_timeout {
            return Vec::new();
        }
        self.release_all()
    }

    /// Release every held button and forget transition history
    pub fn release_all(&mut self) -> Vec<ButtonEvent> {
        let mut events = Vec::new();
        for button in Button::ALL {
            let tracked = &mut self.buttons[button.index()];
            if tracked.is_pressed {
                events.push(ButtonEvent {
                    button,
                    pressed: false,
                    synthetic: true,
                });
            }
            *tracked = TrackedButton::default();
        }
        if !events.is_empty() {
            warn!(count = events.len(), "Input stalled, force-releasing held buttons");
        }
        events
    }
}
