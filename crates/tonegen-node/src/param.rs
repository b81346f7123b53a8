//! Automatable parameter with linear ramps.

/// A node parameter advanced once per frame.
///
/// Supports an instantaneous set, a linear ramp from the current value to a
/// target over a fixed number of frames, and cancelling a ramp in flight
/// (the parameter then holds whatever value it had reached).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    value: f64,
    ramp: Option<LinearRamp>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LinearRamp {
    start: f64,
    target: f64,
    elapsed: u32,
    frames: u32,
}

impl AudioParam {
    pub const fn new(value: f64) -> Self {
        Self { value, ramp: None }
    }

    /// Value at the current frame
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Where the parameter is heading (its value if no ramp is scheduled)
    pub fn target(&self) -> f64 {
        self.ramp.map_or(self.value, |ramp| ramp.target)
    }

    pub const fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    /// Jump straight to `value`
    pub fn set_value(&mut self, value: f64) {
        self.ramp = None;
        self.value = value;
    }

    /// Replace any scheduled ramp with a new one starting at the current value
    pub fn linear_ramp_to(&mut self, target: f64, frames: u32) {
        if frames == 0 {
            self.set_value(target);
            return;
        }
        self.ramp = Some(LinearRamp {
            start: self.value,
            target,
            elapsed: 0,
            frames,
        });
    }

    /// Hold the current value
    pub fn cancel_scheduled(&mut self) {
        self.ramp = None;
    }

    /// Advance one frame and return the value for it
    pub fn next_value(&mut self) -> f64 {
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.elapsed += 1;
            if ramp.elapsed >= ramp.frames {
                self.value = ramp.target;
                self.ramp = None;
            } else {
                let t = f64::from(ramp.elapsed) / f64::from(ramp.frames);
                self.value = (ramp.target - ramp.start).mul_add(t, ramp.start);
            }
        }
        self.value
    }
}
