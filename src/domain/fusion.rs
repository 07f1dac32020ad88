//! Axis Fusion
//!
//! Turns the ternary digital X axis and the analog Y axis into a pointer
//! velocity. The analog center is learned from the first samples of every
//! fresh connection, with the stick assumed to be at rest.

use crate::domain::models::{CalibrationState, DecodedSample, PointerDelta};
use crate::domain::settings::MotionSettings;

/// Analog center/range learned at connection start
#[derive(Debug, Clone)]
pub enum Calibration {
    Collecting(Vec<u8>),
    Ready(CalibrationState),
}

impl Calibration {
    fn empty(target: usize) -> Self {
        Self::Collecting(Vec::with_capacity(target))
    }
}

pub struct AxisFusion {
    config: MotionSettings,
    calibration: Calibration,
    /// Last valid digital direction, held through unknown bit patterns
    x_direction: f64,
    delta: PointerDelta,
}

impl AxisFusion {
    pub fn new(config: MotionSettings) -> Self {
        let calibration = Calibration::empty(config.calibration_samples);
        Self {
            config,
            calibration,
            x_direction: 0.0,
            delta: PointerDelta::ZERO,
        }
    }

    /// Fold one sample into the accumulator and return the new value
    pub fn update(&mut self, sample: &DecodedSample) -> PointerDelta {
        if let Some(direction) = sample.x_state.direction() {
            self.x_direction = direction;
        }
        let dx = self.x_direction * self.config.x_speed;

        let dy = match self.calibration {
            Calibration::Ready(state) => self.analog_velocity(sample.y_raw, state),
            Calibration::Collecting(ref mut samples) => {
                samples.push(sample.y_raw);
                if samples.len() >= self.config.calibration_samples {
                    self.finish_calibration();
                }
                0.0
            }
        };

        self.delta = PointerDelta { dx, dy };
        self.delta
    }

    fn analog_velocity(&self, y_raw: u8, state: CalibrationState) -> f64 {
        let mut normalized = ((y_raw as f64 - state.y_center) / state.y_range).clamp(-1.0, 1.0);
        if self.config.invert_y {
            normalized = -normalized;
        }

        // Drift near the rest position must read as exactly zero
        if normalized.abs() <= self.config.dead_zone {
            return 0.0;
        }

        let power = if self.config.enable_acceleration {
            self.config.acceleration_power
        } else {
            1.0
        };
        normalized.signum() * normalized.abs().powf(power) * self.config.max_speed
    }

    fn finish_calibration(&mut self) {
        let Calibration::Collecting(samples) = &self.calibration else {
            return;
        };
        if samples.is_empty() {
            return;
        }

        let sum: f64 = samples.iter().map(|&y| y as f64).sum();
        let state = CalibrationState {
            y_center: sum / samples.len() as f64,
            y_range: self.config.y_half_span,
        };
        tracing::info!(
            "Analog calibration complete. Center: {:.2}, half span: {:.2}",
            state.y_center,
            state.y_range
        );
        self.calibration = Calibration::Ready(state);
    }

    /// Forget the learned center; the next samples recalibrate
    pub fn recalibrate(&mut self) {
        self.calibration = Calibration::empty(self.config.calibration_samples);
        self.delta.dy = 0.0;
        tracing::info!("Analog calibration started - keep the stick centered");
    }

    /// Stop motion while keeping the learned center; the next sample
    /// resumes from calibrated values
    pub fn pause(&mut self) {
        self.x_direction = 0.0;
        self.delta = PointerDelta::ZERO;
    }

    /// Stop all motion after the link dropped
    pub fn halt(&mut self) {
        self.calibration = Calibration::empty(self.config.calibration_samples);
        self.x_direction = 0.0;
        self.delta = PointerDelta::ZERO;
    }

    pub fn calibration(&self) -> Option<CalibrationState> {
        match self.calibration {
            Calibration::Ready(state) => Some(state),
            Calibration::Collecting(_) => None,
        }
    }

    pub fn delta(&self) -> PointerDelta {
        self.delta
    }
}
