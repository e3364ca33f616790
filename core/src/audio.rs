use crate::error::{Result, TapeError};
use crate::{Bit, ONE_FREQUENCY, RUN_MARGIN_SAMPLES, ZERO_FREQUENCY};
use log::{debug, info};

// Run-length demodulation of the tape signal
//
// The recorder writes each bit as one cycle of a square-ish wave:
// - Zero: ~1917 Hz, about 11.5 high samples per half period at 44.1 kHz
// - One:  ~958 Hz, about 23 high samples per half period at 44.1 kHz
//
// Only the length of each high (mark) run matters. Runs are compared against
// half a period minus a small margin so slow tape speed still classifies.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int,
    Float,
}

/// Format metadata of the sample source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Reject sources the demodulator cannot classify.
    pub fn validate(&self) -> Result<()> {
        if self.sample_format != SampleFormat::Int {
            return Err(TapeError::UnsupportedAudioFormat(
                "only integer PCM is supported".to_string(),
            ));
        }
        if self.bits_per_sample != 8 && self.bits_per_sample != 16 {
            return Err(TapeError::UnsupportedAudioFormat(format!(
                "{} bits per sample (expected 8 or 16)",
                self.bits_per_sample
            )));
        }
        if self.channels == 0 {
            return Err(TapeError::UnsupportedAudioFormat("no channels".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(TapeError::UnsupportedAudioFormat(
                "sample rate is zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables for the audio demodulator
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Carrier frequency of a 0 bit (Hz)
    pub zero_frequency: u32,
    /// Carrier frequency of a 1 bit (Hz)
    pub one_frequency: u32,
    /// Samples subtracted from each half period to tolerate clock drift
    pub margin: u32,
    /// Low level as a fraction of half scale (numerator, denominator)
    pub low_ratio: (i32, i32),
    /// High level as a fraction of half scale (numerator, denominator)
    pub high_ratio: (i32, i32),
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            zero_frequency: ZERO_FREQUENCY,
            one_frequency: ONE_FREQUENCY,
            margin: RUN_MARGIN_SAMPLES,
            low_ratio: (3, 5),
            high_ratio: (7, 5),
        }
    }
}

/// Amplitude level of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Space,
    Ambiguous,
    Mark,
}

/// Amplitude and run-length thresholds derived from the source format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioThresholds {
    pub level_low: i32,
    pub level_high: i32,
    pub count_for_zero: u32,
    pub count_for_one: u32,
}

impl AudioThresholds {
    pub fn new(format: &AudioFormat, config: &AudioConfig) -> Result<Self> {
        format.validate()?;

        if config.zero_frequency == 0 || config.one_frequency == 0 {
            return Err(TapeError::UnsupportedAudioFormat(
                "carrier frequency must be non-zero".to_string(),
            ));
        }

        // Samples are signed and centred on zero for both depths
        let half = 1i32 << (format.bits_per_sample - 1);
        let level_low = half * config.low_ratio.0 / config.low_ratio.1 - half;
        let level_high = half * config.high_ratio.0 / config.high_ratio.1 - half;

        let count_for_zero =
            (format.sample_rate / config.zero_frequency / 2).saturating_sub(config.margin);
        let count_for_one =
            (format.sample_rate / config.one_frequency / 2).saturating_sub(config.margin);

        if count_for_one <= count_for_zero {
            return Err(TapeError::UnsupportedAudioFormat(format!(
                "sample rate {} Hz too low to separate bit periods",
                format.sample_rate
            )));
        }

        Ok(Self {
            level_low,
            level_high,
            count_for_zero,
            count_for_one,
        })
    }

    pub fn classify(&self, value: i32) -> Level {
        if value < self.level_low {
            Level::Space
        } else if value > self.level_high {
            Level::Mark
        } else {
            Level::Ambiguous
        }
    }

    /// Map a completed mark run to a bit, or None for noise.
    pub fn run_to_bit(&self, run: u32) -> Option<Bit> {
        if run >= self.count_for_one {
            Some(1)
        } else if run >= self.count_for_zero {
            Some(0)
        } else {
            None
        }
    }
}

/// Pick channel 0 out of interleaved multi-channel samples.
pub fn channel_zero<I: Iterator>(samples: I, channels: u16) -> std::iter::StepBy<I> {
    samples.step_by(channels.max(1) as usize)
}

/// Demodulates a stream of signed PCM samples into bits
///
/// Emits exactly one bit for each mark run long enough to qualify, in arrival
/// order. A run still open when the source ends is discarded.
pub struct AudioDemodulator<I> {
    samples: I,
    thresholds: AudioThresholds,
    run: u32,
    samples_seen: u64,
    ambiguous_samples: u64,
    runs_dropped: u64,
    bits_emitted: u64,
    done: bool,
}

impl<I> AudioDemodulator<I>
where
    I: Iterator<Item = Result<i32>>,
{
    pub fn new(samples: I, format: &AudioFormat, config: &AudioConfig) -> Result<Self> {
        let thresholds = AudioThresholds::new(format, config)?;
        info!(
            "Audio thresholds: level {}..{}, run zero>={} one>={}",
            thresholds.level_low,
            thresholds.level_high,
            thresholds.count_for_zero,
            thresholds.count_for_one
        );
        Ok(Self::with_thresholds(samples, thresholds))
    }

    pub fn with_thresholds(samples: I, thresholds: AudioThresholds) -> Self {
        Self {
            samples,
            thresholds,
            run: 0,
            samples_seen: 0,
            ambiguous_samples: 0,
            runs_dropped: 0,
            bits_emitted: 0,
            done: false,
        }
    }

    pub fn thresholds(&self) -> &AudioThresholds {
        &self.thresholds
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn runs_dropped(&self) -> u64 {
        self.runs_dropped
    }

    fn push_sample(&mut self, value: i32) -> Option<Bit> {
        match self.thresholds.classify(value) {
            Level::Mark => {
                self.run += 1;
                None
            }
            level => {
                if level == Level::Ambiguous {
                    self.ambiguous_samples += 1;
                }
                if self.run == 0 {
                    return None;
                }
                let run = std::mem::take(&mut self.run);
                let bit = self.thresholds.run_to_bit(run);
                if bit.is_none() {
                    self.runs_dropped += 1;
                }
                bit
            }
        }
    }
}

impl<I> Iterator for AudioDemodulator<I>
where
    I: Iterator<Item = Result<i32>>,
{
    type Item = Result<Bit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.samples.next() {
                Some(Ok(value)) => {
                    self.samples_seen += 1;
                    if let Some(bit) = self.push_sample(value) {
                        self.bits_emitted += 1;
                        return Some(Ok(bit));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    debug!(
                        "Audio source exhausted: {} samples, {} bits, {} noise runs, {} ambiguous samples",
                        self.samples_seen, self.bits_emitted, self.runs_dropped, self.ambiguous_samples
                    );
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_16bit() -> AudioFormat {
        AudioFormat {
            sample_format: SampleFormat::Int,
            bits_per_sample: 16,
            channels: 1,
            sample_rate: 44100,
        }
    }

    fn demodulate(samples: Vec<i32>) -> Vec<Bit> {
        AudioDemodulator::new(
            samples.into_iter().map(Ok),
            &format_16bit(),
            &AudioConfig::default(),
        )
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap()
    }

    fn run_then_space(run: u32) -> Vec<i32> {
        let mut samples = vec![20000; run as usize];
        samples.push(-20000);
        samples
    }

    #[test]
    fn test_thresholds_16bit_44k() {
        let th = AudioThresholds::new(&format_16bit(), &AudioConfig::default()).unwrap();
        assert_eq!(th.level_low, -13108);
        assert_eq!(th.level_high, 13107);
        assert_eq!(th.count_for_zero, 9);
        assert_eq!(th.count_for_one, 21);
    }

    #[test]
    fn test_thresholds_8bit_are_centred() {
        let format = AudioFormat {
            bits_per_sample: 8,
            ..format_16bit()
        };
        let th = AudioThresholds::new(&format, &AudioConfig::default()).unwrap();
        assert_eq!(th.level_low, -52);
        assert_eq!(th.level_high, 51);
    }

    #[test]
    fn test_unsupported_formats_rejected() {
        let float = AudioFormat {
            sample_format: SampleFormat::Float,
            bits_per_sample: 32,
            ..format_16bit()
        };
        let depth24 = AudioFormat {
            bits_per_sample: 24,
            ..format_16bit()
        };
        for format in [float, depth24] {
            assert!(matches!(
                AudioThresholds::new(&format, &AudioConfig::default()),
                Err(TapeError::UnsupportedAudioFormat(_))
            ));
        }
    }

    #[test]
    fn test_run_lengths_map_to_bits() {
        let th = AudioThresholds::new(&format_16bit(), &AudioConfig::default()).unwrap();
        assert_eq!(demodulate(run_then_space(th.count_for_one)), vec![1]);
        assert_eq!(demodulate(run_then_space(th.count_for_zero)), vec![0]);
        assert_eq!(demodulate(run_then_space(th.count_for_one - 1)), vec![0]);
        assert!(demodulate(run_then_space(th.count_for_zero - 1)).is_empty());
    }

    #[test]
    fn test_ambiguous_sample_ends_run() {
        let mut samples = vec![20000; 23];
        samples.push(0);
        samples.extend(vec![20000; 11]);
        samples.push(-20000);
        assert_eq!(demodulate(samples), vec![1, 0]);
    }

    #[test]
    fn test_open_run_at_end_is_discarded() {
        let mut samples = run_then_space(23);
        samples.extend(vec![20000; 30]);
        assert_eq!(demodulate(samples), vec![1]);
    }

    #[test]
    fn test_source_error_ends_stream() {
        let samples = std::iter::repeat_with(|| Ok(20000))
            .take(23)
            .chain(std::iter::once(Err(TapeError::SampleSource("boom".into()))))
            .chain(run_then_space(23).into_iter().map(Ok));
        let mut demod = AudioDemodulator::new(samples, &format_16bit(), &AudioConfig::default())
            .unwrap();
        assert!(matches!(demod.next(), Some(Err(TapeError::SampleSource(_)))));
        assert!(demod.next().is_none());
    }

    #[test]
    fn test_channel_zero_strides() {
        let interleaved = vec![1, 100, 2, 200, 3, 300];
        let left: Vec<i32> = channel_zero(interleaved.into_iter(), 2).collect();
        assert_eq!(left, vec![1, 2, 3]);
    }
}
