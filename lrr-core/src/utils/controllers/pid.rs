//! Incremental PID controller.
//!
//! Each call adds a computed delta to the running output instead of
//! recomputing the output from absolute terms. The integral contribution is
//! tracked separately so it can be bounded for anti-windup. Works in `no_std`
//! and does not allocate.

/// Gains and limits of an [`IncrementalPid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub min_output: f32,
    pub max_output: f32,
    pub min_integral: f32,
    pub max_integral: f32,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.6,
            ki: 0.4,
            kd: 0.2,
            min_output: -1.0,
            max_output: 1.0,
            min_integral: -0.5,
            max_integral: 0.5,
        }
    }
}

/// Reasons a PID step is rejected. The controller state is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidError {
    /// The error input was NaN or infinite.
    NonFiniteError,
    /// The gains produced a NaN or infinite output.
    NonFiniteOutput,
}

/// Per-step contributions, for inspection and telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

#[derive(Debug, Clone)]
pub struct IncrementalPid {
    config: PidConfig,
    /// Error one step back.
    prev_err1: f32,
    /// Error two steps back.
    prev_err2: f32,
    /// Accumulated `ki * error`, clamped to the integral limits.
    integral: f32,
    output: f32,
    terms: PidTerms,
}

impl IncrementalPid {
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            prev_err1: 0.0,
            prev_err2: 0.0,
            integral: 0.0,
            output: 0.0,
            terms: PidTerms::default(),
        }
    }

    /// Feed one error sample and return the updated, clamped output.
    pub fn compute(
        &mut self,
        error: f32,
    ) -> Result<f32, PidError> {
        if !error.is_finite() {
            return Err(PidError::NonFiniteError);
        }
        let c = &self.config;

        let integral =
            (self.integral + c.ki * error).clamp(c.min_integral, c.max_integral);
        let terms = PidTerms {
            p: c.kp * (error - self.prev_err1),
            i: integral - self.integral,
            d: c.kd * (error - 2.0 * self.prev_err1 + self.prev_err2),
        };

        let raw = self.output + terms.p + terms.i + terms.d;
        if !raw.is_finite() {
            return Err(PidError::NonFiniteOutput);
        }
        let output = raw.clamp(c.min_output, c.max_output);

        self.prev_err2 = self.prev_err1;
        self.prev_err1 = error;
        self.integral = integral;
        self.output = output;
        self.terms = terms;
        Ok(output)
    }

    /// Reset accumulated output and error history.
    pub fn reset(&mut self) {
        self.prev_err1 = 0.0;
        self.prev_err2 = 0.0;
        self.integral = 0.0;
        self.output = 0.0;
        self.terms = PidTerms::default();
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Contributions of the most recent successful step.
    pub fn terms(&self) -> PidTerms {
        self.terms
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }
}
