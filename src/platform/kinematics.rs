// Inverse kinematics for the 3-leg tilt platform
// Converts a normalized joystick tilt into the drive-arm angle of each leg.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Physical dimensions of the platform (any consistent length unit)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformConstants {
    /// Base radius (center to drive-arm pivot)
    pub d: f64,
    /// Platform radius (center to platform joint)
    pub e: f64,
    /// Drive arm length
    pub f: f64,
    /// Idler arm length
    pub g: f64,
    /// Platform height at rest
    pub hz: f64,
    /// Input-to-tilt scaling factor
    #[serde(alias = "SCALE")]
    pub scale: f64,
}

impl Default for PlatformConstants {
    fn default() -> Self {
        Self {
            d: 60.0,
            e: 80.0,
            f: 45.0,
            g: 95.0,
            hz: 91.5,
            scale: 0.174,
        }
    }
}

/// Rejected constants
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstantsError {
    #[error("constant `{name}` must be a finite number greater than zero, got {value}")]
    NotPositive { name: &'static str, value: f64 },
}

impl PlatformConstants {
    /// All six values must be finite and strictly positive
    pub fn validate(&self) -> Result<(), ConstantsError> {
        let fields = [
            ("d", self.d),
            ("e", self.e),
            ("f", self.f),
            ("g", self.g),
            ("hz", self.hz),
            ("scale", self.scale),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConstantsError::NotPositive { name, value });
            }
        }
        Ok(())
    }
}

/// Joystick deflection, each axis in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedInput {
    pub x: f64,
    pub y: f64,
}

impl NormalizedInput {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn center() -> Self {
        Self::default()
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// The three legs, 120° apart around the base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    A,
    B,
    C,
}

impl Leg {
    pub const ALL: [Leg; 3] = [Leg::A, Leg::B, Leg::C];
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Leg::A => "A",
            Leg::B => "B",
            Leg::C => "C",
        };
        f.write_str(name)
    }
}

/// Drive-arm angles in degrees, zero tilt sits close to 0°
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LegAngles {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl LegAngles {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// Returns angles as array [a, b, c]
    pub fn as_array(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }

    /// Whole-degree values as the firmware expects them
    pub fn rounded(&self) -> [i32; 3] {
        self.as_array().map(|deg| deg.round() as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum KinematicsError {
    /// The commanded tilt is outside what the linkage can reach
    #[error("leg {leg} out of reach (acos argument {argument})")]
    OutOfRange { leg: Leg, argument: f64 },
}

/// Decimal places kept in computed angles
const ANGLE_DECIMALS: i32 = 2;

/// Angles are reported relative to the arm pointing straight out
const REFERENCE_OFFSET_DEG: f64 = 180.0;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Normalize (nx, ny, 1) into the platform's surface normal.
/// Small-tilt approximation, not a full rotation.
fn unit_normal(nx: f64, ny: f64) -> [f64; 3] {
    let nmag = (nx * nx + ny * ny + 1.0).sqrt();
    [nx / nmag, ny / nmag, 1.0 / nmag]
}

/// acos that refuses arguments outside [-1, 1] instead of returning NaN
fn checked_acos(leg: Leg, argument: f64) -> Result<f64, KinematicsError> {
    if (-1.0..=1.0).contains(&argument) {
        Ok(argument.acos())
    } else {
        Err(KinematicsError::OutOfRange { leg, argument })
    }
}

/// Position of the platform joint for one leg, plus the projection used for
/// the base angle term.
struct Joint {
    mag: f64,
    axis_cos: f64,
}

fn joint_position(leg: Leg, normal: [f64; 3], c: &PlatformConstants) -> Joint {
    let [nx, ny, nz] = normal;
    let sqrt3 = 3f64.sqrt();
    let (d, e, hz) = (c.d, c.e, c.hz);

    match leg {
        Leg::A => {
            let nx2 = nx * nx;
            let y = d
                + (e / 2.0)
                    * (1.0
                        - (nx2 + 3.0 * nz * nz + 3.0 * nz)
                            / (nz + 1.0 - nx2
                                + (nx2 * nx2 - 3.0 * nx2 * ny * ny)
                                    / ((nz + 1.0) * (nz + 1.0 - nx2))));
            let z = hz + e * ny;
            let mag = y.hypot(z);
            Joint {
                mag,
                axis_cos: y / mag,
            }
        }
        Leg::B => {
            let x = (sqrt3 / 2.0) * (e * (1.0 - (nx * nx + sqrt3 * nx * ny) / (nz + 1.0)) - d);
            let y = x / sqrt3;
            let z = hz - (e / 2.0) * (sqrt3 * nx + ny);
            let mag = (x * x + y * y + z * z).sqrt();
            Joint {
                mag,
                axis_cos: (sqrt3 * x + y) / (-2.0 * mag),
            }
        }
        Leg::C => {
            let x = (sqrt3 / 2.0) * (d - e * (1.0 - (nx * nx - sqrt3 * nx * ny) / (nz + 1.0)));
            let y = -x / sqrt3;
            let z = hz + (e / 2.0) * (sqrt3 * nx - ny);
            let mag = (x * x + y * y + z * z).sqrt();
            Joint {
                mag,
                axis_cos: (sqrt3 * x - y) / (2.0 * mag),
            }
        }
    }
}

/// Drive-arm angle for one leg in degrees, before reference normalization
fn leg_theta(leg: Leg, normal: [f64; 3], c: &PlatformConstants) -> Result<f64, KinematicsError> {
    let joint = joint_position(leg, normal, c);
    let mag = joint.mag;

    // Law of cosines on the drive arm / idler arm / pivot-joint triangle
    let linkage_cos = (mag * mag + c.f * c.f - c.g * c.g) / (2.0 * mag * c.f);

    let theta = checked_acos(leg, joint.axis_cos)? + checked_acos(leg, linkage_cos)?;
    Ok(theta * (180.0 / PI))
}

/// Convert a normalized tilt into the three leg angles
///
/// # Arguments
/// * `input` - Joystick deflection, each axis in [-1, 1]
/// * `constants` - Platform geometry
///
/// # Returns
/// Leg angles in degrees rounded to two decimals, or `OutOfRange` when the
/// linkage cannot reach the commanded pose.
pub fn compute_leg_angles(
    input: NormalizedInput,
    constants: &PlatformConstants,
) -> Result<LegAngles, KinematicsError> {
    let nx = input.x * constants.scale;
    let ny = input.y * constants.scale;
    let normal = unit_normal(nx, ny);

    let mut out = [0.0f64; 3];
    for (slot, leg) in out.iter_mut().zip(Leg::ALL) {
        let theta = leg_theta(leg, normal, constants)?;
        *slot = round_to(theta - REFERENCE_OFFSET_DEG, ANGLE_DECIMALS);
    }

    Ok(LegAngles::new(out[0], out[1], out[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_zero_input_baseline() {
        let angles = compute_leg_angles(NormalizedInput::center(), &PlatformConstants::default())
            .unwrap();
        assert!(close(angles.a, 0.19, EPS), "a = {}", angles.a);
        assert!(close(angles.b, 0.19, EPS), "b = {}", angles.b);
        assert!(close(angles.c, 0.19, EPS), "c = {}", angles.c);
    }

    #[test]
    fn test_full_x_deflection_golden() {
        let angles =
            compute_leg_angles(NormalizedInput::new(1.0, 0.0), &PlatformConstants::default())
                .unwrap();
        println!("x=1: {:?}", angles);
        assert!(close(angles.a, 0.39, EPS));
        assert!(close(angles.b, 15.68, EPS));
        assert!(close(angles.c, -14.98, EPS));
    }

    #[test]
    fn test_full_y_deflection_golden() {
        let angles =
            compute_leg_angles(NormalizedInput::new(0.0, 1.0), &PlatformConstants::default())
                .unwrap();
        assert!(close(angles.a, -17.44, EPS));
        assert!(close(angles.b, 9.16, EPS));
        assert!(close(angles.c, 9.16, EPS));
    }

    #[test]
    fn test_deflection_moves_away_from_baseline() {
        let constants = PlatformConstants::default();
        let rest = compute_leg_angles(NormalizedInput::center(), &constants).unwrap();
        let tilted = compute_leg_angles(NormalizedInput::new(1.0, 0.0), &constants).unwrap();

        let max_delta = rest
            .as_array()
            .iter()
            .zip(tilted.as_array())
            .map(|(r, t)| (r - t).abs())
            .fold(0.0f64, f64::max);
        assert!(max_delta > 5.0, "tilt barely moved the legs: {}", max_delta);
    }

    #[test]
    fn test_rotation_by_120_degrees_permutes_legs() {
        // Rotating the input +120° hands leg A's value to B, B's to C, C's to A
        let constants = PlatformConstants::default();
        let step = 2.0 * PI / 3.0;

        for (radius, phase) in [(0.8, 0.0), (0.5, 0.3), (1.0, 1.1), (0.25, -2.0)] {
            let at = |k: f64| {
                let angle = phase + k * step;
                compute_leg_angles(
                    NormalizedInput::new(radius * angle.cos(), radius * angle.sin()),
                    &constants,
                )
                .unwrap()
            };
            let base = at(0.0);
            let once = at(1.0);
            let twice = at(2.0);

            // Rounding to 2 decimals happens per leg, allow one unit of slack
            let tol = 0.011;
            assert!(close(once.a, base.c, tol), "{:?} vs {:?}", once, base);
            assert!(close(once.b, base.a, tol), "{:?} vs {:?}", once, base);
            assert!(close(once.c, base.b, tol), "{:?} vs {:?}", once, base);
            assert!(close(twice.a, base.b, tol), "{:?} vs {:?}", twice, base);
            assert!(close(twice.b, base.c, tol), "{:?} vs {:?}", twice, base);
            assert!(close(twice.c, base.a, tol), "{:?} vs {:?}", twice, base);
        }
    }

    #[test]
    fn test_mirrored_y_keeps_b_and_c_equal() {
        let constants = PlatformConstants::default();
        for y in [-1.0, -0.4, 0.0, 0.6, 1.0] {
            let angles = compute_leg_angles(NormalizedInput::new(0.0, y), &constants).unwrap();
            assert!(close(angles.b, angles.c, EPS), "y={} {:?}", y, angles);
        }
    }

    #[test]
    fn test_deterministic() {
        let constants = PlatformConstants::default();
        let input = NormalizedInput::new(0.37, -0.62);
        let first = compute_leg_angles(input, &constants).unwrap();
        let second = compute_leg_angles(input, &constants).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_excessive_scale_is_out_of_range() {
        let constants = PlatformConstants {
            scale: 2.0,
            ..PlatformConstants::default()
        };
        let result = compute_leg_angles(NormalizedInput::new(1.0, 0.0), &constants);
        assert!(matches!(result, Err(KinematicsError::OutOfRange { .. })));
    }

    #[test]
    fn test_unreachable_idler_length_reports_leg() {
        // Idler arm longer than drive arm plus joint distance can never close
        let constants = PlatformConstants {
            g: 200.0,
            ..PlatformConstants::default()
        };
        match compute_leg_angles(NormalizedInput::center(), &constants) {
            Err(KinematicsError::OutOfRange { leg, argument }) => {
                assert_eq!(leg, Leg::A);
                assert!(argument < -1.0);
            }
            other => panic!("expected out of range, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        let mut constants = PlatformConstants::default();
        assert!(constants.validate().is_ok());

        constants.f = 0.0;
        assert_eq!(
            constants.validate(),
            Err(ConstantsError::NotPositive {
                name: "f",
                value: 0.0
            })
        );

        constants.f = 45.0;
        constants.scale = f64::NAN;
        assert!(constants.validate().is_err());
    }

    #[test]
    fn test_constants_accept_uppercase_scale_key() {
        let json = r#"{"d":60,"e":80,"f":45,"g":95,"hz":91.5,"SCALE":0.2}"#;
        let constants: PlatformConstants = serde_json::from_str(json).unwrap();
        assert!(close(constants.scale, 0.2, EPS));
    }

    #[test]
    fn test_rounded_angles() {
        let angles = LegAngles::new(15.68, -14.98, 0.49);
        assert_eq!(angles.rounded(), [16, -15, 0]);
        assert_eq!(LegAngles::new(2.5, -2.5, -0.3).rounded(), [3, -3, 0]);
    }
}
