//! Attitude filter
//!
//! Integrates gyroscope rates into an orientation quaternion and pulls the
//! estimate towards the measured gravity direction on every step.

use nalgebra::{Quaternion, Vector3};
use std::f32::consts::TAU;

/// Wand IMU output period (~234 Hz)
pub const SAMPLE_PERIOD: f32 = 0.004_273_5;

/// Standard gravity; accelerometer samples arrive in g
pub const GRAVITY: f32 = 9.81;

/// Fast inverse square root with two Newton-Raphson refinements.
/// Returns 0 for non-positive or non-finite input.
pub fn fast_inverse_sqrt(x: f32) -> f32 {
    if !x.is_finite() || x <= 0.0 {
        return 0.0;
    }

    let half_x = 0.5 * x;
    let i = 0x5f37_59df - (x.to_bits() >> 1);
    let mut y = f32::from_bits(i);

    y *= 1.5 - half_x * y * y;
    y *= 1.5 - half_x * y * y;

    y
}

/// Roll and yaw are wrapped to [0, 2π); pitch lies in [-π/2, π/2].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

fn wrap_to_tau(angle: f32) -> f32 {
    if angle >= 0.0 {
        angle
    } else {
        angle + TAU
    }
}

#[derive(Debug, Clone)]
pub struct AhrsFilter {
    quaternion: Quaternion<f32>,
    sample_period: f32,
}

impl Default for AhrsFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl AhrsFilter {
    pub fn new() -> Self {
        Self::with_sample_period(SAMPLE_PERIOD)
    }

    pub fn with_sample_period(sample_period: f32) -> Self {
        Self {
            quaternion: Quaternion::identity(),
            sample_period,
        }
    }

    pub fn reset(&mut self) {
        self.quaternion = Quaternion::identity();
    }

    pub fn quaternion(&self) -> Quaternion<f32> {
        self.quaternion
    }

    /// One filter step. `accel` is in m/s², `gyro` in rad/s.
    pub fn update(&mut self, accel: Vector3<f32>, gyro: Vector3<f32>) {
        let q = self.quaternion;
        let mut rates = gyro;

        if accel != Vector3::zeros() {
            let measured = accel * fast_inverse_sqrt(accel.norm_squared());
            // Half of the gravity direction predicted by the current attitude
            let half_gravity = Vector3::new(
                q.i * q.k - q.w * q.j,
                q.w * q.i + q.j * q.k,
                q.w * q.w + q.k * q.k - 0.5,
            );
            rates += measured.cross(&half_gravity);
        }

        let half_step = rates * (0.5 * self.sample_period);
        let delta = Quaternion::new(0.0, half_step.x, half_step.y, half_step.z);
        let integrated = q + q * delta;

        self.quaternion = integrated * fast_inverse_sqrt(integrated.norm_squared());
    }

    pub fn euler(&self) -> EulerAngles {
        let Quaternion { coords } = self.quaternion;
        let (qx, qy, qz, qw) = (coords.x, coords.y, coords.z, coords.w);

        let roll = (2.0 * (qy * qz + qw * qx)).atan2(1.0 - 2.0 * (qx * qx + qy * qy));

        let gimbal = qw * qz + qx * qy;
        let pitch = if gimbal == 0.5 {
            2.0 * qx.atan2(qw)
        } else if gimbal == -0.5 {
            -2.0 * qx.atan2(qw)
        } else {
            (2.0 * (qw * qy - qz * qx)).clamp(-1.0, 1.0).asin()
        };

        let yaw = (2.0 * gimbal).atan2(1.0 - 2.0 * (qy * qy + qz * qz));

        EulerAngles {
            roll: wrap_to_tau(roll),
            pitch,
            yaw: wrap_to_tau(yaw),
        }
    }
}
