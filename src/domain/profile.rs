//! Per-device scaling of pointer and scroll deltas.
//!
//! Profiles differ only by numeric multipliers, so they are a lookup table
//! rather than separate input implementations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceProfile {
    #[default]
    Generic,
    /// Inmo Air 2 smart glasses
    InmoAir2,
    Universal,
}

/// Multipliers applied to deltas before they are clamped to the report range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileScaling {
    pub movement: f32,
    pub scroll: f32,
}

impl ProfileScaling {
    pub const IDENTITY: Self = Self {
        movement: 1.0,
        scroll: 1.0,
    };
}

impl DeviceProfile {
    pub fn scaling(self) -> ProfileScaling {
        match self {
            Self::InmoAir2 => ProfileScaling {
                movement: 1.2,
                scroll: 0.8,
            },
            Self::Generic | Self::Universal => ProfileScaling::IDENTITY,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Generic => "Generic HID",
            Self::InmoAir2 => "InmoAir2",
            Self::Universal => "Universal Device",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inmo_air2_multipliers() {
        let s = DeviceProfile::InmoAir2.scaling();
        assert_eq!(s.movement, 1.2);
        assert_eq!(s.scroll, 0.8);
        assert_eq!(DeviceProfile::Generic.scaling(), ProfileScaling::IDENTITY);
    }
}
