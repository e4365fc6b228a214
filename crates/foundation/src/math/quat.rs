use serde::{Deserialize, Serialize};

/// Unit quaternion in scalar-first (w, x, y, z) order.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quat {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::Quat;

    #[test]
    fn default_is_identity() {
        assert_eq!(Quat::default(), Quat::new(1.0, 0.0, 0.0, 0.0));
    }
}
