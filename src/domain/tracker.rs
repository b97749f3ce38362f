//! Spell tracker
//!
//! Feeds IMU samples through the attitude filter and, while a gesture is
//! being captured, projects the wand tip into a 2D trail relative to the
//! attitude at gesture start.

use crate::domain::ahrs::{AhrsFilter, GRAVITY};
use crate::domain::gesture::{self, GestureSeries, GestureTrail};
use crate::domain::models::{ImuSample, TrailPoint};
use crate::error::SegmentError;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, trace};

/// Wand tip offset from the sensor (mm)
const TIP_OFFSET: f32 = -294.0;

fn tip() -> Vector3<f32> {
    Vector3::new(TIP_OFFSET, 0.0, 0.0)
}

/// Frame captured when a gesture starts
#[derive(Debug, Clone, Copy)]
struct StartFrame {
    initial_yaw: f32,
    start: UnitQuaternion<f32>,
    reference: Vector3<f32>,
}

pub struct SpellTracker {
    filter: AhrsFilter,
    trail: GestureTrail,
    frame: Option<StartFrame>,
}

impl Default for SpellTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SpellTracker {
    pub fn new() -> Self {
        Self {
            filter: AhrsFilter::new(),
            trail: GestureTrail::new(),
            frame: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.frame.is_some()
    }

    pub fn trail(&self) -> &GestureTrail {
        &self.trail
    }

    pub fn filter(&self) -> &AhrsFilter {
        &self.filter
    }

    /// Begin a gesture at the current attitude. The trail restarts at the origin.
    pub fn start(&mut self) {
        let euler = self.filter.euler();
        let start = UnitQuaternion::from_euler_angles(euler.roll, euler.pitch, 0.0);
        let reference = start.inverse() * (start * tip());

        self.frame = Some(StartFrame {
            initial_yaw: euler.yaw,
            start,
            reference,
        });
        self.trail.clear();
        self.trail.push(TrailPoint::ORIGIN);

        debug!(
            roll = euler.roll,
            pitch = euler.pitch,
            yaw = euler.yaw,
            "Gesture capture started"
        );
    }

    /// Feed one wand sample. Returns the new trail point while capturing.
    pub fn update(&mut self, sample: &ImuSample) -> Option<TrailPoint> {
        let [gx, gy, gz] = sample.gyro;
        let [ax, ay, az] = sample.accel;

        // Sensor axes are rotated a quarter turn about z relative to the wand body
        let accel = Vector3::new(ay, -ax, az) * GRAVITY;
        let gyro = Vector3::new(gy, -gx, gz);
        self.update_body(accel, gyro)
    }

    /// Feed one sample already in the body frame (m/s², rad/s).
    pub fn update_body(&mut self, accel: Vector3<f32>, gyro: Vector3<f32>) -> Option<TrailPoint> {
        self.filter.update(accel, gyro);

        let frame = self.frame?;
        let euler = self.filter.euler();
        let delta =
            UnitQuaternion::from_euler_angles(euler.roll, euler.pitch, euler.yaw - frame.initial_yaw);

        let rotated = frame.start.inverse() * (delta * tip());
        let local = frame.start * (rotated - frame.reference);
        let point = TrailPoint::new(local.y, local.z);

        if !self.trail.push(point) {
            trace!("Gesture trail full, dropping point");
        }
        Some(point)
    }

    /// End the gesture and segment what was captured.
    pub fn stop(&mut self) -> Result<GestureSeries, SegmentError> {
        self.frame = None;
        let result = gesture::segment(self.trail.points());
        debug!(points = self.trail.len(), ok = result.is_ok(), "Gesture capture stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level() -> Vector3<f32> {
        Vector3::new(0.0, 0.0, GRAVITY)
    }

    #[test]
    fn test_update_outside_capture_only_moves_filter() {
        let mut tracker = SpellTracker::new();
        let point = tracker.update_body(level(), Vector3::new(0.0, 0.0, 1.0));
        assert!(point.is_none());
        assert!(tracker.trail().is_empty());
        assert!(tracker.filter().quaternion().k > 0.0);
    }

    #[test]
    fn test_start_seeds_origin() {
        let mut tracker = SpellTracker::new();
        tracker.start();
        assert!(tracker.is_capturing());
        assert_eq!(tracker.trail().points(), &[TrailPoint::ORIGIN]);

        // No rotation keeps the tip where it started
        let point = tracker.update_body(level(), Vector3::zeros()).unwrap();
        assert!(point.x.abs() < 1e-3 && point.y.abs() < 1e-3);
        assert_eq!(tracker.trail().len(), 2);
    }

    #[test]
    fn test_yaw_moves_tip_sideways() {
        let mut tracker = SpellTracker::new();
        tracker.start();
        let mut last = TrailPoint::ORIGIN;
        for _ in 0..100 {
            last = tracker.update_body(level(), Vector3::new(0.0, 0.0, 1.0)).unwrap();
        }
        // ~0.43 rad of yaw swings the 294 mm tip by roughly 120 mm
        assert!(last.x.abs() > 100.0, "x = {}", last.x);
        assert!(last.y.abs() < 1.0, "y = {}", last.y);
    }

    #[test]
    fn test_stop_with_short_trail() {
        let mut tracker = SpellTracker::new();
        tracker.start();
        for _ in 0..50 {
            tracker.update_body(level(), Vector3::new(0.0, 0.0, 2.0));
        }
        assert_eq!(tracker.stop(), Err(SegmentError::InsufficientSamples(51)));
        assert!(!tracker.is_capturing());
    }

    #[test]
    fn test_stop_after_sweep_produces_series() {
        let mut tracker = SpellTracker::new();
        tracker.start();
        for i in 0..400 {
            let rate = if i < 200 { 1.0 } else { -1.0 };
            tracker.update_body(level(), Vector3::new(0.0, rate, rate));
        }
        let series = tracker.stop().unwrap();
        assert_eq!(series.points().len(), gesture::SERIES_LEN);
    }

    #[test]
    fn test_sensor_axes_are_remapped() {
        let mut remapped = SpellTracker::new();
        let mut body = SpellTracker::new();
        let sample = ImuSample {
            gyro: [0.3, -0.2, 0.1],
            accel: [0.1, 0.2, 0.97],
        };
        remapped.update(&sample);
        body.update_body(
            Vector3::new(0.2, -0.1, 0.97) * GRAVITY,
            Vector3::new(-0.2, -0.3, 0.1),
        );
        assert_eq!(remapped.filter().quaternion(), body.filter().quaternion());
    }
}
