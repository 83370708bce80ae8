use crate::audio::analysis::TempoEstimator;
use crate::audio::config;
use crate::audio::errors::BpmError;
use crate::audio::types::AudioBuffer;
use rayon::prelude::*;
use rustfft::{FftPlanner, num_complex::Complex, num_traits::Zero};

/// Prefer the doubled tempo when its autocorrelation is at least this strong
/// relative to the winning peak.
const OCTAVE_CORRECTION_THRESHOLD_RATIO: f32 = 0.7;
const PEAK_REFINE_CLAMP: f32 = 0.7;

/// Onset-strength tempo estimator: spectral flux of a Hann-windowed STFT,
/// autocorrelated via FFT, peak-picked inside the BPM range.
#[derive(Debug, Clone, Copy)]
pub struct SpectralFluxEstimator {
    pub frame_size: usize,
    pub hop_size: usize,
    pub downsample_factor: usize,
}

impl Default for SpectralFluxEstimator {
    fn default() -> Self {
        SpectralFluxEstimator {
            frame_size: 1024,
            hop_size: 256,
            downsample_factor: 2,
        }
    }
}

impl TempoEstimator for SpectralFluxEstimator {
    fn estimate(&self, buffer: &AudioBuffer) -> Result<f64, BpmError> {
        let mono = buffer.mono_mixdown();
        self.estimate_mono(&mono, buffer.sample_rate() as f32)
            .map(f64::from)
    }
}

impl SpectralFluxEstimator {
    pub fn estimate_mono(&self, samples: &[f32], sample_rate: f32) -> Result<f32, BpmError> {
        if samples.is_empty() {
            return Err(BpmError::EmptySamplesForBpm);
        }
        let mut processed = samples.to_vec();
        normalize_in_place(&mut processed);
        downsample_in_place(&mut processed, self.downsample_factor);
        if processed.is_empty() {
            return Err(BpmError::EmptyAfterDownsample {
                factor: self.downsample_factor,
                original_count: samples.len(),
            });
        }
        let effective_rate = sample_rate / self.downsample_factor.max(1) as f32;

        let flux = spectral_flux(&processed, self.frame_size, self.hop_size);
        if flux.is_empty() {
            return Err(BpmError::EmptyFluxVector);
        }
        let bpm = bpm_from_flux(&flux, effective_rate, self.hop_size)?;
        log::debug!("BPM: Estimated {:.2} BPM from {} flux frames", bpm, flux.len());
        Ok(bpm)
    }
}

fn normalize_in_place(samples: &mut [f32]) {
    let peak = samples
        .par_iter()
        .map(|&x| x.abs())
        .reduce(|| 0.0f32, f32::max);
    if peak > 1e-6 {
        samples.par_iter_mut().for_each(|x| *x /= peak);
    }
}

fn downsample_in_place(samples: &mut Vec<f32>, factor: usize) {
    if factor <= 1 || samples.is_empty() {
        return;
    }
    let new_len = samples.len() / factor;
    for i in 0..new_len {
        samples[i] = samples[i * factor];
    }
    samples.truncate(new_len);
}

fn moving_average_3(values: &[f32]) -> Vec<f32> {
    if values.len() < 3 {
        return values.to_vec();
    }
    let last = values.len() - 1;
    let mut smoothed = vec![0.0; values.len()];
    smoothed[0] = values[0];
    smoothed[last] = values[last];
    smoothed[1..last]
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, s)| *s = (values[i] + values[i + 1] + values[i + 2]) / 3.0);
    smoothed
}

fn spectral_flux(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f32> {
    if frame_size < 2 || hop_size == 0 || samples.len() < frame_size {
        log::warn!(
            "BPM: Not enough samples ({}) for frame size ({}) to compute spectral flux.",
            samples.len(),
            frame_size
        );
        return Vec::new();
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(frame_size);
    let num_frames = (samples.len() - frame_size) / hop_size + 1;
    let window: Vec<f32> = (0..frame_size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (frame_size - 1) as f32).cos())
        })
        .collect();

    let spectra: Vec<Vec<f32>> = (0..num_frames)
        .into_par_iter()
        .map(|i| {
            let start = i * hop_size;
            let frame = &samples[start..start + frame_size];
            let mut bins: Vec<Complex<f32>> = frame
                .iter()
                .zip(&window)
                .map(|(&s, &w)| Complex { re: s * w, im: 0.0 })
                .collect();
            fft.process(&mut bins);
            bins[..frame_size / 2 + 1].iter().map(|c| c.norm()).collect()
        })
        .collect();

    let mut flux = vec![0.0f32; num_frames];
    flux[1..].par_iter_mut().enumerate().for_each(|(idx, f)| {
        *f = spectra[idx + 1]
            .iter()
            .zip(&spectra[idx])
            .map(|(&curr, &prev)| (curr - prev).max(0.0))
            .sum();
    });

    let mean = flux.iter().sum::<f32>() / num_frames as f32;
    if mean > 1e-6 {
        flux.par_iter_mut().for_each(|f| *f /= mean);
    }
    flux
}

fn fft_autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    if signal.is_empty() || max_lag == 0 {
        return Vec::new();
    }
    let n = (signal.len() + max_lag).next_power_of_two();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&x| Complex { re: x, im: 0.0 })
        .chain(std::iter::repeat_n(Complex::zero(), n - signal.len()))
        .collect();
    fft.process(&mut buffer);
    buffer.par_iter_mut().for_each(|c| *c = c.norm_sqr().into());
    ifft.process(&mut buffer);

    buffer[..max_lag.min(n)]
        .par_iter()
        .map(|c| c.re / n as f32)
        .collect()
}

fn bpm_from_flux(flux: &[f32], sample_rate: f32, hop_size: usize) -> Result<f32, BpmError> {
    if flux.is_empty() {
        return Err(BpmError::EmptySpectralFlux);
    }
    let max_lag = (60.0 * sample_rate / (config::BPM_MIN * hop_size as f32)).ceil() as usize;
    let min_lag = (60.0 * sample_rate / (config::BPM_MAX * hop_size as f32)).floor() as usize;
    if min_lag == 0 || max_lag <= min_lag {
        return Err(BpmError::InvalidLagRange {
            min_lag,
            max_lag,
            sample_rate,
            hop_size,
        });
    }
    let effective_max_lag = max_lag.min(flux.len());
    if effective_max_lag <= min_lag {
        return Err(BpmError::EffectiveLagTooSmall {
            eff_max_lag: effective_max_lag,
            min_lag,
        });
    }

    let ac = fft_autocorrelation(flux, effective_max_lag);
    if ac.len() <= min_lag {
        return Err(BpmError::AutocorrelationTooShort {
            ac_len: ac.len(),
            min_lag,
        });
    }
    let ac = moving_average_3(&ac);

    let Some((mut peak, mut peak_value)) = ac
        .iter()
        .copied()
        .enumerate()
        .skip(min_lag)
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
    else {
        return Err(BpmError::NoAutocorrelationPeak);
    };
    if peak == 0 {
        return Err(BpmError::NoAutocorrelationPeak);
    }

    let half = (peak as f32 / 2.0).round() as usize;
    if half >= min_lag && half < peak && ac[half] > OCTAVE_CORRECTION_THRESHOLD_RATIO * peak_value
    {
        log::info!(
            "BPM: Octave correction from lag {} ({:.3}) to lag {} ({:.3})",
            peak,
            peak_value,
            half,
            ac[half]
        );
        peak = half;
        peak_value = ac[half];
    }

    // Parabolic interpolation around the peak.
    let refined_lag = if peak > min_lag && peak + 1 < ac.len() {
        let (left, right) = (ac[peak - 1], ac[peak + 1]);
        let denominator = left - 2.0 * peak_value + right;
        if denominator.abs() > 1e-6 {
            let offset = (0.5 * (left - right) / denominator).clamp(-PEAK_REFINE_CLAMP, PEAK_REFINE_CLAMP);
            peak as f32 + offset
        } else {
            peak as f32
        }
    } else {
        peak as f32
    };

    let period_secs = refined_lag * hop_size as f32 / sample_rate;
    if period_secs <= 1e-6 {
        return Err(BpmError::PeriodTooSmall);
    }
    Ok((60.0 / period_secs).clamp(config::BPM_MIN, config::BPM_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let total = (sample_rate as f32 * seconds) as usize;
        let interval = (60.0 / bpm * sample_rate as f32) as usize;
        let mut samples = vec![0.0f32; total];
        for start in (0..total).step_by(interval) {
            for (offset, s) in samples[start..(start + 400).min(total)].iter_mut().enumerate() {
                // Short decaying noise-like burst so every click is broadband.
                let phase = offset as f32 * 0.9;
                *s = phase.sin() * (1.0 - offset as f32 / 400.0);
            }
        }
        samples
    }

    #[test]
    fn empty_input_is_rejected() {
        let estimator = SpectralFluxEstimator::default();
        assert!(matches!(
            estimator.estimate_mono(&[], 44_100.0),
            Err(BpmError::EmptySamplesForBpm)
        ));
    }

    #[test]
    fn too_short_input_has_no_flux() {
        let estimator = SpectralFluxEstimator::default();
        assert!(matches!(
            estimator.estimate_mono(&[0.5; 512], 44_100.0),
            Err(BpmError::EmptyFluxVector)
        ));
    }

    #[test]
    fn estimate_stays_in_range_for_click_track() {
        let estimator = SpectralFluxEstimator::default();
        let buffer = AudioBuffer::from_mono(click_track(120.0, 22_050, 20.0), 22_050).unwrap();
        let bpm = estimator.estimate(&buffer).unwrap();
        assert!((config::BPM_MIN as f64..=config::BPM_MAX as f64).contains(&bpm));
    }

    #[test]
    fn moving_average_keeps_edges() {
        assert_eq!(moving_average_3(&[3.0, 0.0, 3.0, 6.0]), vec![3.0, 2.0, 3.0, 6.0]);
    }
}
