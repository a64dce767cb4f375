//! Turns session events into desktop input actions.
//!
//! Injecting the actions into the OS is left to an [`InputSink`].

use crate::domain::models::{Button, ButtonEvent, GestureDirection, SessionEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Laptop trackpad style: touchpad moves the cursor
    #[default]
    Touchpad,
    /// Slides and media: buttons and swipes only
    Presentation,
    /// Air mouse: the gyroscope moves the cursor, the touchpad scrolls
    Mouse,
}

impl ControlMode {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMode::Touchpad => "Touchpad",
            ControlMode::Presentation => "Presenter",
            ControlMode::Mouse => "Air Mouse",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ControlMode::Touchpad => "Laptop style control",
            ControlMode::Presentation => "PPT & Media control",
            ControlMode::Mouse => "Point to move, touchpad to scroll",
        }
    }

    /// Modes where buttons act as mouse buttons
    pub fn drives_cursor(&self) -> bool {
        matches!(self, ControlMode::Touchpad | ControlMode::Mouse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Escape,
    VolumeUp,
    VolumeDown,
    BrowserBack,
    BrowserForward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    MoveMouse { dx: i32, dy: i32 },
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    MouseClick(MouseButton),
    Wheel(i32),
    HWheel(i32),
    KeyPress(Key),
}

/// Receives synthesized input; the OS binding lives behind this trait
pub trait InputSink {
    fn apply(&mut self, action: InputAction) -> anyhow::Result<()>;
}

/// Sink that only logs what it would inject
#[derive(Debug, Default)]
pub struct TracingSink;

impl InputSink for TracingSink {
    fn apply(&mut self, action: InputAction) -> anyhow::Result<()> {
        match action {
            InputAction::MoveMouse { .. } => tracing::trace!(?action, "input"),
            _ => debug!(?action, "input"),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InputMapper {
    mode: ControlMode,
}

impl InputMapper {
    pub fn new(mode: ControlMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        if mode != self.mode {
            info!("Mode: {} - {}", mode.name(), mode.description());
            self.mode = mode;
        }
    }

    pub fn map(&mut self, event: &SessionEvent) -> Vec<InputAction> {
        match event {
            SessionEvent::Pointer(delta) if self.mode.drives_cursor() => {
                vec![InputAction::MoveMouse {
                    dx: delta.dx,
                    dy: delta.dy,
                }]
            }
            SessionEvent::Scroll(scroll) => {
                let mut actions = Vec::new();
                if scroll.vertical != 0 {
                    actions.push(InputAction::Wheel(scroll.vertical));
                }
                if scroll.horizontal != 0 {
                    actions.push(InputAction::HWheel(scroll.horizontal));
                }
                actions
            }
            SessionEvent::Button(event) => self.map_button(event).into_iter().collect(),
            SessionEvent::Gesture(gesture) => self.map_gesture(gesture.direction).into_iter().collect(),
            SessionEvent::ConfigChanged(config) => {
                self.set_mode(config.control_mode);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Feed every action for `event` into `sink`
    pub fn dispatch(&mut self, event: &SessionEvent, sink: &mut impl InputSink) -> anyhow::Result<()> {
        for action in self.map(event) {
            sink.apply(action)?;
        }
        Ok(())
    }

    fn map_button(&self, event: &ButtonEvent) -> Option<InputAction> {
        use InputAction::*;

        if self.mode == ControlMode::Presentation {
            return match (event.button, event.pressed && !event.synthetic) {
                (Button::Trigger, true) => Some(KeyPress(Key::Right)),
                (Button::TouchpadClick | Button::Back, true) => Some(KeyPress(Key::Left)),
                (Button::VolumeUp, true) => Some(KeyPress(Key::VolumeUp)),
                (Button::VolumeDown, true) => Some(KeyPress(Key::VolumeDown)),
                (Button::Home, true) => Some(KeyPress(Key::Escape)),
                _ => None,
            };
        }

        // Forced releases only ever undo held mouse buttons
        if event.synthetic {
            return match event.button {
                Button::Trigger => Some(MouseUp(MouseButton::Left)),
                Button::TouchpadClick => Some(MouseUp(MouseButton::Right)),
                _ => None,
            };
        }

        match (event.button, event.pressed) {
            (Button::Trigger, true) => Some(MouseDown(MouseButton::Left)),
            (Button::Trigger, false) => Some(MouseUp(MouseButton::Left)),
            (Button::TouchpadClick, true) => Some(MouseDown(MouseButton::Right)),
            (Button::TouchpadClick, false) => Some(MouseUp(MouseButton::Right)),
            (Button::Back, true) => Some(MouseClick(MouseButton::Right)),
            (Button::VolumeUp, true) => Some(Wheel(1)),
            (Button::VolumeDown, true) => Some(Wheel(-1)),
            _ => None,
        }
    }

    fn map_gesture(&self, direction: GestureDirection) -> Option<InputAction> {
        use InputAction::*;

        match (self.mode, direction) {
            (ControlMode::Touchpad, GestureDirection::Up) => Some(Wheel(1)),
            (ControlMode::Touchpad, GestureDirection::Down) => Some(Wheel(-1)),
            // The touchpad already scrolls in air mouse mode
            (ControlMode::Mouse, GestureDirection::Up | GestureDirection::Down) => None,
            (ControlMode::Touchpad | ControlMode::Mouse, GestureDirection::Left) => {
                Some(KeyPress(Key::BrowserBack))
            }
            (ControlMode::Touchpad | ControlMode::Mouse, GestureDirection::Right) => {
                Some(KeyPress(Key::BrowserForward))
            }
            (ControlMode::Presentation, GestureDirection::Left | GestureDirection::Up) => {
                Some(KeyPress(Key::Left))
            }
            (ControlMode::Presentation, GestureDirection::Right | GestureDirection::Down) => {
                Some(KeyPress(Key::Right))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GestureEvent, PointerDelta, ScrollDelta};
    use crate::domain::settings::SessionConfig;

    #[derive(Default)]
    struct RecordingSink(Vec<InputAction>);

    impl InputSink for RecordingSink {
        fn apply(&mut self, action: InputAction) -> anyhow::Result<()> {
            self.0.push(action);
            Ok(())
        }
    }

    fn press(button: Button, pressed: bool) -> SessionEvent {
        SessionEvent::Button(ButtonEvent {
            button,
            pressed,
            synthetic: false,
        })
    }

    #[test]
    fn test_touchpad_mode_clicks_and_moves() {
        let mut mapper = InputMapper::new(ControlMode::Touchpad);
        let mut sink = RecordingSink::default();
        mapper.dispatch(&press(Button::Trigger, true), &mut sink).unwrap();
        mapper
            .dispatch(&SessionEvent::Pointer(PointerDelta { dx: 4, dy: -2 }), &mut sink)
            .unwrap();
        mapper.dispatch(&press(Button::Trigger, false), &mut sink).unwrap();
        assert_eq!(
            sink.0,
            vec![
                InputAction::MouseDown(MouseButton::Left),
                InputAction::MoveMouse { dx: 4, dy: -2 },
                InputAction::MouseUp(MouseButton::Left),
            ]
        );
    }

    #[test]
    fn test_presentation_mode_ignores_pointer() {
        let mut mapper = InputMapper::new(ControlMode::Presentation);
        assert!(mapper
            .map(&SessionEvent::Pointer(PointerDelta { dx: 4, dy: 4 }))
            .is_empty());
        assert_eq!(
            mapper.map(&press(Button::Trigger, true)),
            vec![InputAction::KeyPress(Key::Right)]
        );
        assert!(mapper.map(&press(Button::Trigger, false)).is_empty());
        assert_eq!(
            mapper.map(&SessionEvent::Gesture(GestureEvent {
                direction: GestureDirection::Left
            })),
            vec![InputAction::KeyPress(Key::Left)]
        );
    }

    #[test]
    fn test_synthetic_release_frees_mouse_button() {
        let mut mapper = InputMapper::new(ControlMode::Touchpad);
        let event = SessionEvent::Button(ButtonEvent {
            button: Button::Trigger,
            pressed: false,
            synthetic: true,
        });
        assert_eq!(
            mapper.map(&event),
            vec![InputAction::MouseUp(MouseButton::Left)]
        );
    }

    #[test]
    fn test_air_mouse_mode_moves_clicks_and_scrolls() {
        let mut mapper = InputMapper::new(ControlMode::Mouse);
        let mut sink = RecordingSink::default();
        for event in [
            SessionEvent::Pointer(PointerDelta { dx: -3, dy: 7 }),
            press(Button::Trigger, true),
            SessionEvent::Scroll(ScrollDelta {
                vertical: -1,
                horizontal: 1,
            }),
            SessionEvent::Gesture(GestureEvent {
                direction: GestureDirection::Up,
            }),
            SessionEvent::Gesture(GestureEvent {
                direction: GestureDirection::Left,
            }),
        ] {
            mapper.dispatch(&event, &mut sink).unwrap();
        }
        assert_eq!(
            sink.0,
            vec![
                InputAction::MoveMouse { dx: -3, dy: 7 },
                InputAction::MouseDown(MouseButton::Left),
                InputAction::Wheel(-1),
                InputAction::HWheel(1),
                InputAction::KeyPress(Key::BrowserBack),
            ]
        );
    }

    #[test]
    fn test_presentation_mode_ignores_synthetic_release() {
        let mut mapper = InputMapper::new(ControlMode::Presentation);
        let event = SessionEvent::Button(ButtonEvent {
            button: Button::Trigger,
            pressed: false,
            synthetic: true,
        });
        assert!(mapper.map(&event).is_empty());
    }

    #[test]
    fn test_config_change_switches_mode() {
        let mut mapper = InputMapper::default();
        let config = SessionConfig {
            control_mode: ControlMode::Presentation,
            ..Default::default()
        };
        mapper.map(&SessionEvent::ConfigChanged(config));
        assert_eq!(mapper.mode(), ControlMode::Presentation);
    }
}
