use crate::audio::config;
use crate::audio::errors::AudioEffectsError;
use crate::audio::types::{DeckId, MixerState};
use biquad::{Biquad as _, Coefficients, DirectForm1, ToHertz, Type};

// --- Control Laws ---

/// EQ knob (0-100, 50 flat) to shelf/peak gain in dB.
pub fn eq_value_to_db(value: f64) -> f64 {
    (value - config::CONTROL_CENTER) * config::EQ_DB_PER_STEP
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterMode {
    /// Centre position: the sweep filter is bypassed.
    AllPass,
    LowPass(f64),
    HighPass(f64),
}

impl FilterMode {
    fn cutoff(self) -> Option<f64> {
        match self {
            FilterMode::AllPass => None,
            FilterMode::LowPass(hz) | FilterMode::HighPass(hz) => Some(hz),
        }
    }

    fn same_kind(self, other: FilterMode) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }
}

/// Maps the filter knob onto an exponential cutoff sweep: left of centre closes
/// a low-pass, right of centre opens a high-pass.
pub fn filter_mode_for(value: f64) -> FilterMode {
    let value = value.clamp(config::CONTROL_MIN, config::CONTROL_MAX);
    if value == config::CONTROL_CENTER {
        FilterMode::AllPass
    } else if value < config::CONTROL_CENTER {
        let ratio = config::LOWPASS_MAX_HZ / config::FILTER_MIN_HZ;
        FilterMode::LowPass(config::FILTER_MIN_HZ * ratio.powf(value / 49.0))
    } else {
        let ratio = config::HIGHPASS_MAX_HZ / config::FILTER_MIN_HZ;
        let exponent = ((value - 51.0) / 49.0).max(0.0);
        FilterMode::HighPass(config::FILTER_MIN_HZ * ratio.powf(exponent))
    }
}

/// Share of a deck let through by the crossfader (0-100, 50 centre).
pub fn crossfader_contribution(deck: DeckId, crossfader: f64) -> f64 {
    let x = crossfader.clamp(config::CONTROL_MIN, config::CONTROL_MAX);
    match deck {
        DeckId::A if x > config::CONTROL_CENTER => 1.0 - (x - 50.0) / 50.0,
        DeckId::B if x < config::CONTROL_CENTER => x / 50.0,
        _ => 1.0,
    }
}

/// Squared law so the fader and crossfader feel even in loudness.
pub fn final_gain(volume: f64, contribution: f64) -> f64 {
    let linear = (volume.clamp(config::CONTROL_MIN, config::CONTROL_MAX) / 100.0)
        * contribution.clamp(0.0, 1.0);
    linear * linear
}

/// Target values a deck's signal chain should glide towards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainTargets {
    pub low_db: f32,
    pub mid_db: f32,
    pub high_db: f32,
    pub filter: FilterMode,
    pub gain: f32,
}

impl ChainTargets {
    pub fn from_mixer(deck: DeckId, mixer: &MixerState, crossfader: f64) -> Self {
        ChainTargets {
            low_db: eq_value_to_db(mixer.low) as f32,
            mid_db: eq_value_to_db(mixer.mid) as f32,
            high_db: eq_value_to_db(mixer.high) as f32,
            filter: filter_mode_for(mixer.filter),
            gain: final_gain(mixer.volume, crossfader_contribution(deck, crossfader)) as f32,
        }
    }
}

impl Default for ChainTargets {
    fn default() -> Self {
        ChainTargets::from_mixer(DeckId::A, &MixerState::default(), config::CONTROL_CENTER)
    }
}

// --- Smoothing ---

/// One-pole exponential approach: after `time_constant` seconds the value has
/// covered ~63% of the distance to its target.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    coefficient: f32,
}

impl SmoothedParam {
    pub fn new(initial: f32, time_constant_seconds: f32, sample_rate: f32) -> Self {
        let coefficient = if time_constant_seconds > 0.0 && sample_rate > 0.0 {
            1.0 - (-1.0 / (time_constant_seconds * sample_rate)).exp()
        } else {
            1.0
        };
        SmoothedParam {
            current: initial,
            target: initial,
            coefficient,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn jump_to(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.current != self.target {
            self.current += (self.target - self.current) * self.coefficient;
            if (self.target - self.current).abs() <= 1e-6 * self.target.abs().max(1.0) {
                self.current = self.target;
            }
        }
        self.current
    }
}

// --- Filter Calculation Helpers ---

/// Keeps a design frequency inside the band for low sample rates.
fn below_nyquist(hz: f32, sample_rate: f32) -> f32 {
    hz.min(sample_rate * 0.45).max(f32::EPSILON)
}

fn calculate_low_shelf(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, AudioEffectsError> {
    Coefficients::<f32>::from_params(
        Type::LowShelf(gain_db),
        sample_rate.hz(),
        below_nyquist(config::LOW_SHELF_HZ, sample_rate).hz(),
        config::SHELF_Q_FACTOR,
    )
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("LowShelf: {:?}", e),
    })
}

fn calculate_mid_peak(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, AudioEffectsError> {
    Coefficients::<f32>::from_params(
        Type::PeakingEQ(gain_db),
        sample_rate.hz(),
        below_nyquist(config::MID_CENTER_HZ, sample_rate).hz(),
        config::MID_PEAK_Q_FACTOR,
    )
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("MidPeak: {:?}", e),
    })
}

fn calculate_high_shelf(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, AudioEffectsError> {
    Coefficients::<f32>::from_params(
        Type::HighShelf(gain_db),
        sample_rate.hz(),
        below_nyquist(config::HIGH_SHELF_HZ, sample_rate).hz(),
        config::SHELF_Q_FACTOR,
    )
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("HighShelf: {:?}", e),
    })
}

fn calculate_sweep(
    sample_rate: f32,
    mode: FilterMode,
    cutoff_hz: f32,
) -> Result<Option<Coefficients<f32>>, AudioEffectsError> {
    let filter_type = match mode {
        FilterMode::AllPass => return Ok(None),
        FilterMode::LowPass(_) => Type::LowPass,
        FilterMode::HighPass(_) => Type::HighPass,
    };
    let cutoff = below_nyquist(cutoff_hz, sample_rate);
    Coefficients::<f32>::from_params(
        filter_type,
        sample_rate.hz(),
        cutoff.hz(),
        config::SWEEP_FILTER_Q_FACTOR,
    )
    .map(Some)
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("{:?}: {:?}", mode, e),
    })
}

// --- Signal Chain ---

struct ChannelFilters {
    low_shelf: DirectForm1<f32>,
    mid_peak: DirectForm1<f32>,
    high_shelf: DirectForm1<f32>,
    sweep: DirectForm1<f32>,
}

/// low shelf → peak → high shelf → sweep filter → gain, per channel.
///
/// Parameters are smoothed per sample; biquad coefficients are only redesigned
/// once a smoothed value has moved past a small threshold (or settled).
pub struct DeckSignalChain {
    sample_rate: f32,
    channels: Vec<ChannelFilters>,
    low_db: SmoothedParam,
    mid_db: SmoothedParam,
    high_db: SmoothedParam,
    cutoff_hz: SmoothedParam,
    gain: SmoothedParam,
    mode: FilterMode,
    designed_eq: [f32; 3],
    designed_cutoff: f32,
}

impl DeckSignalChain {
    pub fn new(
        sample_rate: u32,
        channel_count: usize,
        time_constant_seconds: f32,
        initial: ChainTargets,
    ) -> Result<Self, AudioEffectsError> {
        let sample_rate = sample_rate as f32;
        let cutoff = initial.filter.cutoff().unwrap_or(0.0) as f32;
        let sweep_coeffs = calculate_sweep(sample_rate, initial.filter, cutoff)?
            .unwrap_or_else(identity_coefficients);

        let mut channels = Vec::with_capacity(channel_count.max(1));
        for _ in 0..channel_count.max(1) {
            channels.push(ChannelFilters {
                low_shelf: DirectForm1::<f32>::new(calculate_low_shelf(
                    sample_rate,
                    initial.low_db,
                )?),
                mid_peak: DirectForm1::<f32>::new(calculate_mid_peak(sample_rate, initial.mid_db)?),
                high_shelf: DirectForm1::<f32>::new(calculate_high_shelf(
                    sample_rate,
                    initial.high_db,
                )?),
                sweep: DirectForm1::<f32>::new(sweep_coeffs),
            });
        }

        Ok(DeckSignalChain {
            sample_rate,
            channels,
            low_db: SmoothedParam::new(initial.low_db, time_constant_seconds, sample_rate),
            mid_db: SmoothedParam::new(initial.mid_db, time_constant_seconds, sample_rate),
            high_db: SmoothedParam::new(initial.high_db, time_constant_seconds, sample_rate),
            cutoff_hz: SmoothedParam::new(cutoff, time_constant_seconds, sample_rate),
            gain: SmoothedParam::new(initial.gain, time_constant_seconds, sample_rate),
            mode: initial.filter,
            designed_eq: [initial.low_db, initial.mid_db, initial.high_db],
            designed_cutoff: cutoff,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Idempotent; the latest targets win.
    pub fn set_targets(&mut self, targets: ChainTargets) {
        self.low_db.set_target(targets.low_db);
        self.mid_db.set_target(targets.mid_db);
        self.high_db.set_target(targets.high_db);
        self.gain.set_target(targets.gain);

        let cutoff = targets.filter.cutoff().unwrap_or(0.0) as f32;
        if self.mode.same_kind(targets.filter) {
            self.cutoff_hz.set_target(cutoff);
        } else {
            // A mode switch has nothing to glide from.
            self.cutoff_hz.jump_to(cutoff);
            self.mode = targets.filter;
            self.redesign_sweep(true);
            for channel in &mut self.channels {
                channel.sweep.reset_state();
            }
        }
        self.mode = targets.filter;
    }

    pub fn current_gain(&self) -> f32 {
        self.gain.value()
    }

    /// Processes one interleaved frame in place (one sample per channel).
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        self.advance_parameters();
        let gain = self.gain.next();
        let bypass_sweep = matches!(self.mode, FilterMode::AllPass);
        for (sample, filters) in frame.iter_mut().zip(self.channels.iter_mut()) {
            let mut s = filters.low_shelf.run(*sample);
            s = filters.mid_peak.run(s);
            s = filters.high_shelf.run(s);
            if !bypass_sweep {
                s = filters.sweep.run(s);
            }
            *sample = s * gain;
        }
    }

    fn advance_parameters(&mut self) {
        let eq = [self.low_db.next(), self.mid_db.next(), self.high_db.next()];
        let eq_settled =
            self.low_db.is_settled() && self.mid_db.is_settled() && self.high_db.is_settled();
        let eq_moved = eq
            .iter()
            .zip(self.designed_eq.iter())
            .any(|(now, designed)| (now - designed).abs() >= config::EQ_RECALC_THRESHOLD_DB);
        if eq_moved || (eq_settled && eq != self.designed_eq) {
            self.redesign_eq(eq);
        }

        let cutoff = self.cutoff_hz.next();
        let relative = (cutoff - self.designed_cutoff).abs() / self.designed_cutoff.max(1.0);
        if relative >= config::FILTER_RECALC_THRESHOLD_RATIO
            || (self.cutoff_hz.is_settled() && cutoff != self.designed_cutoff)
        {
            self.redesign_sweep(false);
        }
    }

    fn redesign_eq(&mut self, eq: [f32; 3]) {
        let designed = calculate_low_shelf(self.sample_rate, eq[0]).and_then(|low| {
            Ok((
                low,
                calculate_mid_peak(self.sample_rate, eq[1])?,
                calculate_high_shelf(self.sample_rate, eq[2])?,
            ))
        });
        match designed {
            Ok((low, mid, high)) => {
                for channel in &mut self.channels {
                    channel.low_shelf.update_coefficients(low);
                    channel.mid_peak.update_coefficients(mid);
                    channel.high_shelf.update_coefficients(high);
                }
            }
            Err(e) => log::error!("Effects: Keeping previous EQ coefficients: {}", e),
        }
        self.designed_eq = eq;
    }

    fn redesign_sweep(&mut self, force: bool) {
        let cutoff = self.cutoff_hz.value();
        if force || cutoff != self.designed_cutoff {
            match calculate_sweep(self.sample_rate, self.mode, cutoff) {
                Ok(Some(coeffs)) => {
                    for channel in &mut self.channels {
                        channel.sweep.update_coefficients(coeffs);
                    }
                }
                Ok(None) => {}
                Err(e) => log::error!("Effects: Keeping previous sweep coefficients: {}", e),
            }
        }
        self.designed_cutoff = cutoff;
    }
}

fn identity_coefficients() -> Coefficients<f32> {
    Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(len: usize, hz: f32, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * hz * i as f32 / rate).sin() * 0.5)
            .collect()
    }

    fn neutral_targets() -> ChainTargets {
        ChainTargets {
            low_db: 0.0,
            mid_db: 0.0,
            high_db: 0.0,
            filter: FilterMode::AllPass,
            gain: 1.0,
        }
    }

    #[test]
    fn gain_law_matches_crossfader_curve() {
        assert_relative_eq!(crossfader_contribution(DeckId::A, 50.0), 1.0);
        assert_relative_eq!(crossfader_contribution(DeckId::A, 75.0), 0.5);
        assert_relative_eq!(crossfader_contribution(DeckId::A, 100.0), 0.0);
        assert_relative_eq!(crossfader_contribution(DeckId::A, 0.0), 1.0);
        assert_relative_eq!(crossfader_contribution(DeckId::B, 25.0), 0.5);
        assert_relative_eq!(crossfader_contribution(DeckId::B, 80.0), 1.0);
        assert_relative_eq!(final_gain(100.0, 1.0), 1.0);
        assert_relative_eq!(final_gain(50.0, 1.0), 0.25);
        assert_relative_eq!(final_gain(100.0, 0.5), 0.25);
        for v in [0.0, 12.5, 85.0, 100.0] {
            for x in [0.0, 30.0, 50.0, 90.0, 100.0] {
                let g = final_gain(v, crossfader_contribution(DeckId::A, x));
                assert!((0.0..=1.0).contains(&g));
            }
        }
    }

    #[test]
    fn eq_centre_is_flat() {
        assert_eq!(eq_value_to_db(50.0), 0.0);
        assert_relative_eq!(eq_value_to_db(100.0), 20.0);
        assert_relative_eq!(eq_value_to_db(0.0), -20.0);
    }

    #[test]
    fn filter_curve_endpoints() {
        assert_eq!(filter_mode_for(50.0), FilterMode::AllPass);
        match filter_mode_for(0.0) {
            FilterMode::LowPass(hz) => assert_relative_eq!(hz, 40.0),
            other => panic!("unexpected {:?}", other),
        }
        match filter_mode_for(49.0) {
            FilterMode::LowPass(hz) => assert_relative_eq!(hz, 8000.0, epsilon = 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        match filter_mode_for(100.0) {
            FilterMode::HighPass(hz) => assert_relative_eq!(hz, 16000.0, epsilon = 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        match filter_mode_for(51.0) {
            FilterMode::HighPass(hz) => assert_relative_eq!(hz, 40.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn smoother_approaches_target() {
        let mut p = SmoothedParam::new(0.0, 0.01, 1000.0);
        p.set_target(1.0);
        // one time constant: 1 - 1/e
        for _ in 0..10 {
            p.next();
        }
        assert_relative_eq!(p.value(), 1.0 - (-1.0f32).exp(), epsilon = 1e-4);
        for _ in 0..1000 {
            p.next();
        }
        assert!(p.is_settled());
    }

    #[test]
    fn zero_time_constant_jumps() {
        let mut p = SmoothedParam::new(0.2, 0.0, 44_100.0);
        p.set_target(0.9);
        assert_eq!(p.next(), 0.9);
    }

    #[test]
    fn neutral_chain_is_transparent() {
        let rate = 44_100.0;
        let mut chain = DeckSignalChain::new(44_100, 1, 0.01, neutral_targets()).unwrap();
        for &s in &sine(2048, 440.0, rate) {
            let mut frame = [s];
            chain.process_frame(&mut frame);
            assert_relative_eq!(frame[0], s, epsilon = 1e-4);
        }
    }

    #[test]
    fn neutral_chain_from_default_mixer_is_transparent_but_for_volume() {
        let targets = ChainTargets::from_mixer(
            DeckId::B,
            &MixerState {
                volume: 100.0,
                ..MixerState::default()
            },
            50.0,
        );
        assert_eq!(targets, neutral_targets());
    }

    #[test]
    fn gain_glides_to_zero() {
        let mut chain = DeckSignalChain::new(1_000, 2, 0.01, neutral_targets()).unwrap();
        chain.set_targets(ChainTargets {
            gain: 0.0,
            ..neutral_targets()
        });
        let mut frame = [1.0, 1.0];
        chain.process_frame(&mut frame);
        assert!(frame[0] > 0.5 && frame[0] < 1.0, "no click: {}", frame[0]);
        for _ in 0..2000 {
            frame = [1.0, 1.0];
            chain.process_frame(&mut frame);
        }
        assert_relative_eq!(frame[1], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn closed_low_pass_attenuates_highs() {
        let rate = 44_100.0;
        let mut chain = DeckSignalChain::new(44_100, 1, 0.0, neutral_targets()).unwrap();
        chain.set_targets(ChainTargets {
            filter: filter_mode_for(0.0),
            ..neutral_targets()
        });
        let input = sine(8192, 5000.0, rate);
        let mut energy = 0.0f32;
        for (i, &s) in input.iter().enumerate() {
            let mut frame = [s];
            chain.process_frame(&mut frame);
            if i > 4096 {
                energy += frame[0] * frame[0];
            }
        }
        assert!(energy < 1e-3, "energy {}", energy);
    }
}
