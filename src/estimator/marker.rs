// Marker estimator: raw 3D marker samples -> filtered telemetry
//
// Joint angles come from the marker offset relative to the neutral pose:
// abduction = atan2(x - x0, L), flexion = atan2(y - y0, L)

use nalgebra::{Vector1, Vector3};
use tracing::debug;

use super::kalman::{AngleFilter, FilterStep, PositionFilter};
use crate::config::FilterConfig;
use crate::context::Telemetry;

pub struct MarkerEstimator {
    position: PositionFilter,
    flexion: AngleFilter,
    abduction: AngleFilter,
    neutral_mm: Vector3<f32>,
    pivot_distance_mm: f32,
}

impl MarkerEstimator {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            position: PositionFilter::new(config.position),
            flexion: AngleFilter::new(config.angle),
            abduction: AngleFilter::new(config.angle),
            neutral_mm: Vector3::from(config.neutral_position_mm),
            pivot_distance_mm: config.pivot_distance_mm.max(f32::EPSILON),
        }
    }

    /// Joint angles (abduction, flexion) in degrees for a marker position
    pub fn joint_angles_deg(&self, position_mm: Vector3<f32>) -> (f32, f32) {
        let offset = position_mm - self.neutral_mm;
        let abduction = offset.x.atan2(self.pivot_distance_mm).to_degrees();
        let flexion = offset.y.atan2(self.pivot_distance_mm).to_degrees();
        (abduction, flexion)
    }

    /// Feed one tracker sample and return the resulting telemetry.
    ///
    /// Samples with non-finite coordinates are dropped and the previous
    /// telemetry is returned unchanged.
    pub fn update(&mut self, previous: &Telemetry, position_mm: [f32; 3], timestamp_s: f64) -> Telemetry {
        if position_mm.iter().any(|v| !v.is_finite()) || !timestamp_s.is_finite() {
            debug!("Dropping non-finite marker sample {:?}", position_mm);
            return *previous;
        }

        let measured = Vector3::from(position_mm);
        let (abduction, flexion) = self.joint_angles_deg(measured);

        let step = self.position.update(measured, timestamp_s);
        if step == FilterStep::Skipped {
            return Telemetry {
                position_raw_mm: position_mm,
                ..*previous
            };
        }
        self.flexion.update(Vector1::new(flexion), timestamp_s);
        self.abduction.update(Vector1::new(abduction), timestamp_s);

        let position = self.position.position();
        let velocity = self.position.velocity();

        Telemetry {
            position_raw_mm: position_mm,
            position_filtered_mm: [position.x, position.y, position.z],
            velocity_filtered_mm: [velocity.x, velocity.y, velocity.z],
            angle_filtered_deg: self.flexion.position().x,
            angular_velocity_deg: self.flexion.velocity().x,
            abduction_angle_deg: self.abduction.position().x,
            abduction_angular_velocity_deg: self.abduction.velocity().x,
            timestamp_s,
            is_filtered: self.position.is_updated(),
        }
    }
}
