//! Spectrum bars from the audio the player is producing.
//!
//! Samples come from the default input device (a monitor/loopback source
//! when the system provides one) and are only captured when the crate is
//! built with the `capture` feature. Without it the frame shows a notice
//! in place of the bars.

use crate::error::{Error, Result};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

pub const BAR_COUNT: usize = 20;
pub const BAR_HEIGHT: u8 = 8;

/// Samples kept for one spectrum.
const WINDOW: usize = 1024;

/// The most recent mono samples, shared between the capture callback and the UI.
#[derive(Debug, Clone, Default)]
pub struct SampleWindow(Arc<Mutex<Vec<f32>>>);

impl SampleWindow {
    pub fn push(&self, samples: &[f32]) {
        let mut window = match self.0.lock() {
            Ok(window) => window,
            Err(poisoned) => poisoned.into_inner(),
        };
        window.extend_from_slice(samples);
        if window.len() > WINDOW {
            let excess = window.len() - WINDOW;
            window.drain(..excess);
        }
    }

    pub fn latest(&self) -> Vec<f32> {
        match self.0.lock() {
            Ok(window) => window.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Bar heights in `0..=max_height` for `bars` log-spaced frequency bins.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn spectrum(samples: &[f32], bars: usize, max_height: u8) -> Vec<u8> {
    let mut heights = vec![0u8; bars];
    let n = samples.len();
    if n < 2 || bars == 0 {
        return heights;
    }

    // Hann window
    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let w = 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1) as f32).cos());
            Complex::new(sample * w, 0.0)
        })
        .collect();
    FftPlanner::<f32>::new()
        .plan_fft_forward(n)
        .process(&mut buffer);
    let magnitudes: Vec<f32> = buffer[..=n / 2].iter().map(|c| c.norm()).collect();

    let picked: Vec<f32> = if magnitudes.len() > bars {
        let top = (magnitudes.len() - 1) as f32;
        (0..bars)
            .map(|k| {
                let exponent = if bars == 1 {
                    0.0
                } else {
                    k as f32 / (bars - 1) as f32
                };
                let index = (top.powf(exponent) as usize).min(magnitudes.len() - 1);
                magnitudes[index]
            })
            .collect()
    } else {
        magnitudes
    };

    let scaled: Vec<f32> = picked.iter().map(|m| m.ln_1p()).collect();
    let peak = scaled.iter().copied().fold(0.0, f32::max);
    if peak > 0.0 {
        for (height, value) in heights.iter_mut().zip(&scaled) {
            *height = (value / peak * f32::from(max_height)) as u8;
        }
    }
    heights
}

/// What the visualizer block shows this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpectrumView {
    Bars(Vec<u8>),
    Unavailable(String),
}

impl Default for SpectrumView {
    fn default() -> Self {
        SpectrumView::Unavailable("Audio visualizer not available".to_string())
    }
}

pub enum Visualizer {
    Capturing(AudioCapture),
    /// Samples fed by the caller.
    Samples(SampleWindow),
    Unavailable(String),
}

impl Visualizer {
    /// Starts capturing, or explains why it can't.
    pub fn start() -> Self {
        match AudioCapture::start() {
            Ok(capture) => Visualizer::Capturing(capture),
            Err(e) => {
                log::info!("Visualizer off: {e}");
                Visualizer::Unavailable(format!("Audio visualizer not available ({e})"))
            }
        }
    }

    pub fn disabled() -> Self {
        Visualizer::Unavailable("Audio visualizer disabled".to_string())
    }

    pub fn view(&self) -> SpectrumView {
        let window = match self {
            Visualizer::Capturing(capture) => &capture.window,
            Visualizer::Samples(window) => window,
            Visualizer::Unavailable(reason) => return SpectrumView::Unavailable(reason.clone()),
        };
        SpectrumView::Bars(spectrum(&window.latest(), BAR_COUNT, BAR_HEIGHT))
    }
}

/// Input stream owned by a dedicated thread; dropping this stops it.
pub struct AudioCapture {
    window: SampleWindow,
    #[cfg(feature = "capture")]
    stop: Arc<std::sync::atomic::AtomicBool>,
    #[cfg(feature = "capture")]
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(not(feature = "capture"))]
impl AudioCapture {
    pub fn start() -> Result<Self> {
        Err(Error::AudioCapture(
            "built without the capture feature".to_string(),
        ))
    }
}

#[cfg(feature = "capture")]
impl AudioCapture {
    pub fn start() -> Result<Self> {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let window = SampleWindow::default();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = {
            let window = window.clone();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("ytmcli-capture".to_string())
                .spawn(move || {
                    // cpal streams are not Send, so this thread owns it for its whole life
                    let stream = match capture::open(window) {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    while !stop.load(Ordering::SeqCst) {
                        thread::park_timeout(Duration::from_millis(100));
                    }
                    drop(stream);
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                window,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(Error::AudioCapture("capture thread exited".to_string())),
        }
    }
}

#[cfg(feature = "capture")]
impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

#[cfg(feature = "capture")]
mod capture {
    use super::SampleWindow;
    use crate::error::{Error, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SizedSample, Stream, StreamConfig};

    pub(super) fn open(window: SampleWindow) -> Result<Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::AudioCapture("no input device".to_string()))?;
        let config = device
            .default_input_config()
            .map_err(|e| Error::AudioCapture(e.to_string()))?;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build::<f32>(&device, &config.into(), window)?,
            cpal::SampleFormat::I16 => build::<i16>(&device, &config.into(), window)?,
            cpal::SampleFormat::U16 => build::<u16>(&device, &config.into(), window)?,
            format => {
                return Err(Error::AudioCapture(format!(
                    "unsupported sample format {format:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|e| Error::AudioCapture(e.to_string()))?;
        Ok(stream)
    }

    #[allow(clippy::cast_precision_loss)]
    fn build<T>(device: &cpal::Device, config: &StreamConfig, window: SampleWindow) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = usize::from(config.channels.max(1));
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(channels)
                        .map(|frame| {
                            frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>()
                                / frame.len() as f32
                        })
                        .collect();
                    window.push(&mono);
                },
                |e| log::debug!("Audio capture error: {e}"),
                None,
            )
            .map_err(|e| Error::AudioCapture(e.to_string()))
    }
}
