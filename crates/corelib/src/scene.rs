//! Scene description consumed by the renderer: materials and lights.
//!
//! Colors are linear RGBA. The [`Material::rgb_u8`] helper takes 0-255
//! channel values so palette constants read the way artists write them.

use crate::Vec3;

/// Per-object shading material (ambient/diffuse/specular, linear RGBA).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
}

impl Material {
    /// Build a material from 8-bit ambient/diffuse/specular triples,
    /// alpha fixed at 1.
    pub fn rgb_u8(ambient: [u8; 3], diffuse: [u8; 3], specular: [u8; 3]) -> Self {
        Self {
            ambient: to_rgba(ambient),
            diffuse: to_rgba(diffuse),
            specular: to_rgba(specular),
        }
    }

    /// Blue-grey model material from the reference scene.
    pub fn model_default() -> Self {
        Self::rgb_u8([0, 46, 117], [119, 151, 201], [125, 125, 125])
    }

    /// Neutral grey used for the ground plane.
    pub fn ground_default() -> Self {
        Self::rgb_u8([125, 125, 125], [125, 125, 125], [125, 125, 125])
    }
}

fn to_rgba([r, g, b]: [u8; 3]) -> [f32; 4] {
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0]
}

/// Light rig: one ambient fill plus one white spot aimed at the origin.
#[derive(Clone, Copy, Debug)]
pub struct LightRig {
    pub ambient_color: [f32; 4],
    pub spot_position: Vec3,
    pub spot_color: [f32; 4],
}

impl Default for LightRig {
    fn default() -> Self {
        Self {
            ambient_color: [0.5, 0.5, 0.5, 1.0],
            spot_position: Vec3::new(500.0, 500.0, 250.0),
            spot_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl LightRig {
    /// Unit direction from the spot towards the origin (its aim point).
    #[inline]
    pub fn spot_direction(&self) -> Vec3 {
        (-self.spot_position).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_u8_normalizes_channels() {
        let m = Material::rgb_u8([255, 0, 51], [0, 0, 0], [0, 0, 0]);
        assert_eq!(m.ambient[0], 1.0);
        assert_eq!(m.ambient[1], 0.0);
        assert!((m.ambient[2] - 0.2).abs() < 1e-3);
        assert_eq!(m.ambient[3], 1.0);
    }

    #[test]
    fn spot_direction_is_unit_and_points_home() {
        let rig = LightRig::default();
        let d = rig.spot_direction();
        assert!((d.length() - 1.0).abs() < 1e-6);
        // Points from the light back towards the origin.
        assert!(d.x < 0.0 && d.y < 0.0 && d.z < 0.0);
    }
}
