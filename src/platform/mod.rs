// Platform model for the 3-leg tilt mechanism
//
// Provides:
// - Gesture clamping and normalization (stick offset -> tilt input)
// - Closed-form inverse kinematics (tilt input -> leg angles)

pub mod gesture;
pub mod kinematics;

pub use gesture::{Gesture, GestureEvent};
pub use kinematics::{
    compute_leg_angles, ConstantsError, KinematicsError, Leg, LegAngles, NormalizedInput,
    PlatformConstants,
};
