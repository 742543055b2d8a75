use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44_100;
/// Fade in/out length; keeps short beeps from clicking.
const ENVELOPE_MS: u32 = 12;

/// One beep: pitch, length and loudness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub volume: f32,
}

impl Tone {
    pub fn new(frequency_hz: f32, duration_ms: u32, volume: f32) -> Self {
        Self {
            frequency_hz,
            duration_ms,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Short cue at the end of a phase.
    pub fn phase(frequency_hz: f32) -> Self {
        Self::new(frequency_hz, 180, 0.25)
    }

    /// Rising three-note chime for the end of a session.
    pub fn completion_chime() -> [Tone; 3] {
        [
            Self::new(1046.5, 160, 0.3),
            Self::new(1318.5, 160, 0.3),
            Self::new(1568.0, 320, 0.3),
        ]
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms))
    }
}

/// Finite mono sine wave with a linear attack and release.
pub struct ToneWave {
    frequency_hz: f32,
    volume: f32,
    sample_rate: u32,
    total_samples: usize,
    envelope_samples: usize,
    num_sample: usize,
}

impl ToneWave {
    pub fn new(tone: Tone) -> Self {
        let total_samples = (SAMPLE_RATE as u64 * u64::from(tone.duration_ms) / 1000) as usize;
        let envelope_samples = (SAMPLE_RATE as u64 * u64::from(ENVELOPE_MS) / 1000) as usize;
        Self {
            frequency_hz: tone.frequency_hz,
            volume: tone.volume,
            sample_rate: SAMPLE_RATE,
            total_samples,
            envelope_samples: envelope_samples.min(total_samples / 2),
            num_sample: 0,
        }
    }

    fn gain(&self) -> f32 {
        if self.envelope_samples == 0 {
            return 1.0;
        }
        let from_start = self.num_sample;
        let from_end = self.total_samples - 1 - self.num_sample;
        let edge = from_start.min(from_end);
        if edge >= self.envelope_samples {
            1.0
        } else {
            edge as f32 / self.envelope_samples as f32
        }
    }

    fn remaining(&self) -> usize {
        self.total_samples - self.num_sample
    }
}

impl Iterator for ToneWave {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }

        let t = self.num_sample as f32 / self.sample_rate as f32;
        let sample = (2.0 * PI * self.frequency_hz * t).sin() * self.gain() * self.volume;
        self.num_sample += 1;

        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

#[cfg(feature = "audio")]
impl rodio::Source for ToneWave {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.remaining())
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(
            self.total_samples as f64 / f64::from(self.sample_rate),
        ))
    }
}

#[cfg(feature = "audio")]
pub use engine::ToneEngineHandle;

#[cfg(feature = "audio")]
mod engine {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
        Arc, Mutex,
    };
    use std::thread;

    use rodio::{OutputStream, Sink};

    use super::{Tone, ToneWave};
    use crate::signal::{Capability, ToneOutput};

    enum ToneCommand {
        Play(Tone),
        Stop,
    }

    /// Owns the output device on its own thread; rodio's stream is not `Send`.
    pub struct ToneEngineHandle {
        tx: Arc<Mutex<Option<Sender<ToneCommand>>>>,
        available: Arc<AtomicBool>,
    }

    impl Default for ToneEngineHandle {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ToneEngineHandle {
        pub fn new() -> Self {
            Self {
                tx: Arc::new(Mutex::new(None)),
                available: Arc::new(AtomicBool::new(true)),
            }
        }

        fn ensure_thread(&self) -> Result<Sender<ToneCommand>, String> {
            let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
            if let Some(tx) = guard.as_ref() {
                return Ok(tx.clone());
            }

            let (tx, rx) = mpsc::channel::<ToneCommand>();
            let available = Arc::clone(&self.available);

            thread::Builder::new()
                .name("cadence-tone".to_string())
                .spawn(move || {
                    let mut _stream: Option<OutputStream> = None;
                    let mut sink: Option<Sink> = None;

                    fn ensure_sink(
                        stream: &mut Option<OutputStream>,
                        sink: &mut Option<Sink>,
                    ) -> Result<(), String> {
                        if sink.is_none() {
                            let (s, handle) = OutputStream::try_default()
                                .map_err(|e| format!("Failed to open audio output: {}", e))?;
                            let new_sink = Sink::try_new(&handle)
                                .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                            *stream = Some(s);
                            *sink = Some(new_sink);
                        }
                        Ok(())
                    }

                    while let Ok(cmd) = rx.recv() {
                        match cmd {
                            ToneCommand::Play(tone) => {
                                if let Err(err) = ensure_sink(&mut _stream, &mut sink) {
                                    log::warn!("{err}");
                                    available.store(false, Ordering::SeqCst);
                                    continue;
                                }
                                if let Some(ref s) = sink {
                                    s.append(ToneWave::new(tone));
                                }
                            }
                            ToneCommand::Stop => {
                                if let Some(s_old) = sink.take() {
                                    s_old.stop();
                                }
                                _stream = None;
                            }
                        }
                    }
                })
                .map_err(|e| e.to_string())?;

            *guard = Some(tx.clone());
            Ok(tx)
        }

        pub fn stop(&self) {
            if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
                let _ = tx.send(ToneCommand::Stop);
            }
        }
    }

    impl Capability for ToneEngineHandle {
        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }
    }

    impl ToneOutput for ToneEngineHandle {
        fn play(&self, tone: Tone) -> Result<(), String> {
            let tx = self.ensure_thread()?;
            tx.send(ToneCommand::Play(tone)).map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_length_matches_duration() {
        let wave = ToneWave::new(Tone::new(440.0, 100, 0.5));
        assert_eq!(wave.size_hint(), (4_410, Some(4_410)));
        assert_eq!(wave.count(), 4_410);
    }

    #[test]
    fn envelope_starts_and_ends_silent() {
        let samples: Vec<f32> = ToneWave::new(Tone::new(440.0, 50, 1.0)).collect();
        assert_eq!(samples[0], 0.0);
        assert_eq!(*samples.last().expect("samples"), 0.0);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
        assert!(samples.iter().any(|s| s.abs() > 0.5));
    }

    #[test]
    fn volume_is_clamped() {
        assert_eq!(Tone::new(440.0, 10, 3.0).volume, 1.0);
        assert_eq!(Tone::new(440.0, 10, -1.0).volume, 0.0);
    }

    #[test]
    fn zero_length_tone_is_empty() {
        assert_eq!(ToneWave::new(Tone::new(440.0, 0, 1.0)).count(), 0);
    }
}
