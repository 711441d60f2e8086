//! Conversions between the runtime's pose/FOV representation and what renderers consume.

use nalgebra::{Quaternion, UnitQuaternion, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::vrapi::Fov;

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    /// Index of the view showing this eye in the stereo view configuration.
    pub fn view_index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    #[default]
    Radians,
    Degrees,
}

impl AngleUnit {
    /// Convert an angle given in radians.
    pub fn from_radians(self, angle: f32) -> f32 {
        match self {
            Self::Radians => angle,
            Self::Degrees => angle.to_degrees(),
        }
    }
}

/// (roll, pitch, yaw): rotations around x, y and z.
pub fn quaternion_to_euler(q: &UnitQuaternion<f32>) -> Vector3<f32> {
    let q = q.as_ref();
    let (w, x, y, z) = (q.w as f64, q.i as f64, q.j as f64, q.k as f64);

    let sinr_cosp = 2.0 * (w * x + y * z);
    let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
    let roll = sinr_cosp.atan2(cosr_cosp);

    // stays finite at the poles, where asin would need clamping
    let sinp = (1.0 + 2.0 * (w * y - x * z)).max(0.0).sqrt();
    let cosp = (1.0 - 2.0 * (w * y - x * z)).max(0.0).sqrt();
    let pitch = 2.0 * sinp.atan2(cosp) - std::f64::consts::FRAC_PI_2;

    let siny_cosp = 2.0 * (w * z + x * y);
    let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
    let yaw = siny_cosp.atan2(cosy_cosp);

    Vector3::new(roll as f32, pitch as f32, yaw as f32)
}

/// Inverse of [`quaternion_to_euler`].
pub fn euler_to_quaternion(roll: f32, pitch: f32, yaw: f32) -> UnitQuaternion<f32> {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();
    UnitQuaternion::new_normalize(Quaternion::new(
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    ))
}

/// (left, right, down, up)
pub fn fov_angles(fov: &Fov, unit: AngleUnit) -> Vector4<f32> {
    Vector4::new(fov.angle_left, fov.angle_right, fov.angle_down, fov.angle_up)
        .map(|a| unit.from_radians(a))
}

/// Total horizontal and vertical field of view.
pub fn hv_fov(fov: &Fov, unit: AngleUnit) -> Vector2<f32> {
    Vector2::new(
        fov.angle_right - fov.angle_left,
        fov.angle_up - fov.angle_down,
    )
    .map(|a| unit.from_radians(a))
}

/// Where the optical axis crosses the image, as a fraction of its width and height.
///
/// Off center when the eye's frustum is asymmetric.
pub fn screen_center(fov: &Fov) -> Vector2<f32> {
    let tan_left = fov.angle_left.abs().tan();
    let tan_right = fov.angle_right.abs().tan();
    let tan_up = fov.angle_up.abs().tan();
    let tan_down = fov.angle_down.abs().tan();
    let ratio = |a: f32, b: f32| if a + b > 0.0 { a / (a + b) } else { 0.5 };
    Vector2::new(ratio(tan_left, tan_right), ratio(tan_down, tan_up))
}
