use crate::domain::models::{PointerDelta, PointerEvent};

/// Discretises the fused pointer velocity into integer motion steps.
///
/// Sub-unit motion is carried between ticks so slow stick deflections still
/// move the pointer.
#[derive(Debug, Default)]
pub struct MotionIntegrator {
    remainder_x: f64,
    remainder_y: f64,
}

impl MotionIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one tick with the latest delta snapshot
    pub fn step(&mut self, delta: PointerDelta) -> Option<PointerEvent> {
        if delta.is_zero() {
            self.reset();
            return None;
        }

        self.remainder_x += delta.dx;
        self.remainder_y += delta.dy;

        let dx = self.remainder_x.round();
        let dy = self.remainder_y.round();
        self.remainder_x -= dx;
        self.remainder_y -= dy;

        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        Some(PointerEvent {
            dx: dx as i32,
            dy: dy as i32,
        })
    }

    pub fn reset(&mut self) {
        self.remainder_x = 0.0;
        self.remainder_y = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_units_pass_through() {
        let mut integrator = MotionIntegrator::new();
        let event = integrator.step(PointerDelta { dx: -8.0, dy: 12.0 });
        assert_eq!(event, Some(PointerEvent { dx: -8, dy: 12 }));
    }

    #[test]
    fn test_zero_delta_emits_nothing() {
        let mut integrator = MotionIntegrator::new();
        for _ in 0..10 {
            assert_eq!(integrator.step(PointerDelta::ZERO), None);
        }
    }

    #[test]
    fn test_fractions_accumulate() {
        let mut integrator = MotionIntegrator::new();
        let delta = PointerDelta { dx: 0.0, dy: 0.25 };
        let total: i32 = (0..8)
            .filter_map(|_| integrator.step(delta))
            .map(|event| event.dy)
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_stop_discards_remainder() {
        let mut integrator = MotionIntegrator::new();
        assert_eq!(integrator.step(PointerDelta { dx: 0.4, dy: 0.0 }), None);
        assert_eq!(integrator.step(PointerDelta::ZERO), None);
        assert_eq!(integrator.step(PointerDelta { dx: 0.4, dy: 0.0 }), None);
    }
}
