use crate::error::ModelError;

/// Instants closer than this are collapsed when building a step schedule.
pub const TIME_EPSILON: f64 = 1e-12;

/// A defined transition settles over this effectively-zero interval, so both
/// the old and the new value are observable at adjacent samples.
pub const SETTLE_TIME: f64 = 1e-9;

/// A time-to-digital-value waveform for one input signal. Time units are the
/// caller's; the engine only compares and subdivides them.
///
/// The waveform shape is private: construction goes through the checked
/// constructors, so a held `Stimulus` is always well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus(pub(crate) Wave);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Wave {
    Constant(u64),
    /// Periodic high window of `width` starting after `delay`, repeating
    /// every `period`.
    Pulse { delay: f64, width: f64, period: f64 },
    /// Explicit sorted (time, value) points; the latest point at or before
    /// the sample instant holds until superseded.
    TimeDefined(Vec<(f64, u64)>),
    /// One stimulus per bit of a multi-bit signal, LSB-first.
    PerBit(Vec<Stimulus>),
}

impl Stimulus {
    pub fn constant(value: u64) -> Self {
        Stimulus(Wave::Constant(value))
    }

    /// Periodic pulse. Fails with `InvalidParameter` on non-positive width or
    /// period, negative delay, or a width exceeding the period.
    pub fn pulse(delay: f64, width: f64, period: f64) -> Result<Self, ModelError> {
        if delay < 0.0 || width <= 0.0 || period <= 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "pulse(delay={delay}, width={width}, period={period}) is malformed"
            )));
        }
        if width > period {
            return Err(ModelError::InvalidParameter(format!(
                "pulse width {width} exceeds period {period}"
            )));
        }
        Ok(Stimulus(Wave::Pulse {
            delay,
            width,
            period,
        }))
    }

    /// Explicit waveform points. Fails with `InvalidParameter` unless times
    /// are non-negative and strictly increasing.
    pub fn time_defined(points: Vec<(f64, u64)>) -> Result<Self, ModelError> {
        for window in points.windows(2) {
            if window[1].0 <= window[0].0 {
                return Err(ModelError::InvalidParameter(format!(
                    "time-defined points must be strictly increasing, got {} after {}",
                    window[1].0, window[0].0
                )));
            }
        }
        if let Some((first, _)) = points.first()
            && *first < 0.0
        {
            return Err(ModelError::InvalidParameter(format!(
                "time-defined point at negative time {first}"
            )));
        }
        Ok(Stimulus(Wave::TimeDefined(points)))
    }

    pub fn per_bit(bits: Vec<Stimulus>) -> Result<Self, ModelError> {
        if bits.is_empty() {
            return Err(ModelError::InvalidParameter(
                "per-bit stimulus requires at least one bit".into(),
            ));
        }
        Ok(Stimulus(Wave::PerBit(bits)))
    }

    /// The digital value at instant `t`.
    pub fn value_at(&self, t: f64) -> u64 {
        match &self.0 {
            Wave::Constant(v) => *v,
            Wave::Pulse {
                delay,
                width,
                period,
            } => {
                if t < *delay {
                    0
                } else {
                    let phase = (t - delay) % period;
                    u64::from(phase < *width)
                }
            }
            Wave::TimeDefined(points) => points
                .iter()
                .take_while(|(time, _)| *time <= t)
                .last()
                .map_or(0, |(_, value)| *value),
            Wave::PerBit(bits) => bits
                .iter()
                .enumerate()
                .fold(0, |acc, (i, bit)| acc | ((bit.value_at(t) & 1) << i)),
        }
    }

    /// Instants at which this waveform transitions within `[0, length]`,
    /// each paired with a settle instant just before it so the step schedule
    /// observes both sides of the edge.
    pub fn transition_times(&self, length: f64, out: &mut Vec<f64>) {
        let mut push_edge = |t: f64| {
            if t > 0.0 && t <= length {
                if t - SETTLE_TIME > 0.0 {
                    out.push(t - SETTLE_TIME);
                }
                out.push(t);
            }
        };
        match &self.0 {
            Wave::Constant(_) => {}
            Wave::Pulse {
                delay,
                width,
                period,
            } => {
                let mut rise = *delay;
                while rise <= length {
                    push_edge(rise);
                    push_edge(rise + width);
                    rise += period;
                }
            }
            Wave::TimeDefined(points) => {
                for (time, _) in points {
                    push_edge(*time);
                }
            }
            Wave::PerBit(bits) => {
                for bit in bits {
                    bit.transition_times(length, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0, 0; "before delay")]
    #[test_case(0.999, 0; "just before first rise")]
    #[test_case(1.0, 1; "rise instant")]
    #[test_case(2.0, 1; "inside high window")]
    #[test_case(2.999, 1; "just before fall")]
    #[test_case(3.0, 0; "fall instant")]
    #[test_case(3.5, 0; "inside low window")]
    #[test_case(4.0, 1; "second period rise")]
    #[test_case(5.9, 1; "second period high")]
    #[test_case(6.0, 0; "second period fall")]
    fn pulse_high_on_1_to_3_each_period(t: f64, expected: u64) {
        let pulse = Stimulus::pulse(1.0, 2.0, 3.0).unwrap();
        assert_eq!(pulse.value_at(t), expected);
    }

    #[test]
    fn pulse_rejects_malformed_parameters() {
        assert!(Stimulus::pulse(-1.0, 1.0, 2.0).is_err());
        assert!(Stimulus::pulse(0.0, 0.0, 2.0).is_err());
        assert!(Stimulus::pulse(0.0, 3.0, 2.0).is_err());
    }

    #[test]
    fn time_defined_holds_last_value() {
        let stim = Stimulus::time_defined(vec![(1.0, 3), (2.0, 1)]).unwrap();
        assert_eq!(stim.value_at(0.5), 0);
        assert_eq!(stim.value_at(1.0), 3);
        assert_eq!(stim.value_at(1.9), 3);
        assert_eq!(stim.value_at(2.0), 1);
        assert_eq!(stim.value_at(10.0), 1);
    }

    #[test]
    fn time_defined_rejects_unsorted_points() {
        assert!(Stimulus::time_defined(vec![(2.0, 1), (1.0, 0)]).is_err());
        assert!(Stimulus::time_defined(vec![(1.0, 1), (1.0, 0)]).is_err());
    }

    #[test]
    fn per_bit_composes_lsb_first() {
        let stim = Stimulus::per_bit(vec![
            Stimulus::constant(1),
            Stimulus::constant(0),
            Stimulus::constant(1),
        ])
        .unwrap();
        assert_eq!(stim.value_at(0.0), 0b101);
    }

    #[test]
    fn transitions_come_with_settle_instants() {
        let stim = Stimulus::time_defined(vec![(1.0, 1)]).unwrap();
        let mut edges = Vec::new();
        stim.transition_times(5.0, &mut edges);
        assert_eq!(edges.len(), 2);
        assert!(edges[0] < 1.0);
        assert!(1.0 - edges[0] <= SETTLE_TIME + TIME_EPSILON);
        assert_eq!(edges[1], 1.0);
        // Both sides of the edge are observable.
        assert_eq!(stim.value_at(edges[0]), 0);
        assert_eq!(stim.value_at(edges[1]), 1);
    }

    #[test]
    fn pulse_transitions_stay_within_length() {
        let pulse = Stimulus::pulse(1.0, 2.0, 3.0).unwrap();
        let mut edges = Vec::new();
        pulse.transition_times(4.0, &mut edges);
        assert!(edges.iter().all(|t| *t > 0.0 && *t <= 4.0));
        // Rises at 1 and 4, fall at 3: three edges, each with a settle twin.
        assert_eq!(edges.iter().filter(|t| t.fract() == 0.0).count(), 3);
    }
}
