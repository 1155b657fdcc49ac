// Joystick gesture -> normalized tilt input

use serde::{Deserialize, Serialize};

use super::kinematics::NormalizedInput;

/// A pointer event on the virtual stick, offsets in logical pixels from center
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GestureEvent {
    Move { dx: f64, dy: f64 },
    Release,
}

/// Circular stick of a fixed radius
#[derive(Debug, Clone, Copy)]
pub struct Gesture {
    max_radius: f64,
}

impl Gesture {
    pub fn new(max_radius: f64) -> Self {
        Self { max_radius }
    }

    /// Clamp an offset to the stick circle, keeping its direction
    pub fn clamp_offset(&self, dx: f64, dy: f64) -> (f64, f64) {
        let distance = dx.hypot(dy);
        if distance > self.max_radius {
            let angle = dy.atan2(dx);
            (angle.cos() * self.max_radius, angle.sin() * self.max_radius)
        } else {
            (dx, dy)
        }
    }

    /// Normalize an offset into platform input.
    ///
    /// Screen down maps to +x and screen left to +y, which is how the platform
    /// is mounted relative to the handheld.
    pub fn normalize(&self, dx: f64, dy: f64) -> NormalizedInput {
        let (dx, dy) = self.clamp_offset(dx, dy);
        let x = (dy / self.max_radius).clamp(-1.0, 1.0);
        let y = (-dx / self.max_radius).clamp(-1.0, 1.0);
        NormalizedInput::new(x, y)
    }

    /// Resolve an event into the input the platform should follow
    pub fn apply(&self, event: GestureEvent) -> NormalizedInput {
        match event {
            GestureEvent::Move { dx, dy } => self.normalize(dx, dy),
            GestureEvent::Release => NormalizedInput::center(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inside_radius_untouched() {
        let gesture = Gesture::new(50.0);
        assert_eq!(gesture.clamp_offset(10.0, -20.0), (10.0, -20.0));

        let input = gesture.normalize(-25.0, 10.0);
        assert!((input.x - 0.2).abs() < 1e-12);
        assert!((input.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_outside_radius_clamped_to_edge() {
        let gesture = Gesture::new(50.0);
        for (dx, dy) in [
            (120.0, 0.0),
            (0.0, -75.0),
            (300.0, 300.0),
            (-51.0, 0.5),
            (-1000.0, -3.0),
        ] {
            let input = gesture.normalize(dx, dy);
            let magnitude = input.magnitude();
            assert!(magnitude <= 1.0 + 1e-12, "({}, {}) -> {}", dx, dy, magnitude);
            assert!((magnitude - 1.0).abs() < 1e-12, "({}, {}) -> {}", dx, dy, magnitude);
        }
    }

    #[test]
    fn test_clamp_preserves_direction() {
        let gesture = Gesture::new(50.0);
        let (cx, cy) = gesture.clamp_offset(300.0, 400.0);
        assert!((cx - 30.0).abs() < 1e-9);
        assert!((cy - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_axis_convention() {
        let gesture = Gesture::new(50.0);
        // Dragging down tilts toward +x
        let down = gesture.normalize(0.0, 50.0);
        assert!((down.x - 1.0).abs() < 1e-12);
        assert!(down.y.abs() < 1e-12);
        // Dragging right tilts toward -y
        let right = gesture.normalize(50.0, 0.0);
        assert!((right.y + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_release_recenters() {
        let gesture = Gesture::new(50.0);
        assert_eq!(gesture.apply(GestureEvent::Release), NormalizedInput::center());
    }

    #[test]
    fn test_event_json() {
        let event: GestureEvent = serde_json::from_str(r#"{"kind":"move","dx":3.0,"dy":-4.0}"#).unwrap();
        assert_eq!(event, GestureEvent::Move { dx: 3.0, dy: -4.0 });
        let release: GestureEvent = serde_json::from_str(r#"{"kind":"release"}"#).unwrap();
        assert_eq!(release, GestureEvent::Release);
    }
}
