// ASCII payloads understood by the platform firmware
//
// Primary:  A{a},B{b},C{c}
// Fallback: J:{a}:{b}:{c}
// Angles are whole degrees. Both fit in a single 20-byte BLE write for any
// angle the linkage can reach.

use crate::platform::LegAngles;

/// Largest payload that still fits one default-MTU write
pub const MAX_PAYLOAD_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Primary,
    Fallback,
}

impl WireFormat {
    pub fn encode(self, angles: &LegAngles) -> String {
        let [a, b, c] = angles.rounded();
        match self {
            WireFormat::Primary => format!("A{},B{},C{}", a, b, c),
            WireFormat::Fallback => format!("J:{}:{}:{}", a, b, c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_format() {
        let angles = LegAngles::new(0.39, 15.68, -14.98);
        assert_eq!(WireFormat::Primary.encode(&angles), "A0,B16,C-15");
    }

    #[test]
    fn test_fallback_format() {
        let angles = LegAngles::new(-17.44, 9.16, 9.16);
        assert_eq!(WireFormat::Fallback.encode(&angles), "J:-17:9:9");
    }

    #[test]
    fn test_negative_fraction_has_no_minus_zero() {
        let angles = LegAngles::new(-0.4, 0.19, -0.01);
        assert_eq!(WireFormat::Primary.encode(&angles), "A0,B0,C0");
    }

    #[test]
    fn test_worst_case_fits_one_write() {
        let angles = LegAngles::new(-180.0, -180.0, -180.0);
        assert!(WireFormat::Primary.encode(&angles).len() <= MAX_PAYLOAD_LEN);
        assert!(WireFormat::Fallback.encode(&angles).len() <= MAX_PAYLOAD_LEN);
    }
}
