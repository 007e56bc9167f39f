//! Spectrum sampling: a cancellable per-frame loop that pulls frequency
//! snapshots from an analysis tap and draws normalized bars to a surface.
//!
//! The loop is self-rescheduling: handling one frame requests the next.
//! Scheduling is represented by explicit tokens so cancellation is a
//! synchronous operation; once the pending token is cancelled no further
//! frame can fire.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{RemixError, Result};

/// Fixed ceiling of the tap's output range; bins are bytes, WebAudio-style.
pub const TAP_OUTPUT_CEILING: f32 = 255.0;

const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -10.0;

/// Live frequency-domain data source bound to the playing audio graph.
pub trait AnalysisTap {
    /// Number of frequency bins per snapshot. Fixed for the tap's lifetime.
    fn bin_count(&self) -> usize;
    /// Writes the latest snapshot into `bins`; values span the tap's fixed
    /// 0–255 output range.
    fn fill_frequency_data(&mut self, bins: &mut [u8]);
}

/// FFT-backed tap over a rolling window of time-domain samples.
pub struct FftTap {
    fft_size: usize,
    window: VecDeque<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    smoothing: f32,
    smoothed: Vec<f32>,
}

impl FftTap {
    /// Creates a tap with the given FFT window size (a power of two, at
    /// least 32) and the default smoothing constant.
    pub fn new(fft_size: usize) -> Result<Self> {
        Self::with_smoothing(fft_size, 0.8)
    }

    /// Creates a tap with an explicit inter-frame smoothing constant in
    /// [0, 1); higher values decay slower.
    pub fn with_smoothing(fft_size: usize, smoothing: f32) -> Result<Self> {
        if fft_size < 32 || !fft_size.is_power_of_two() {
            return Err(RemixError::InvalidInput(
                "fft size must be a power of two, at least 32",
            ));
        }
        if !(0.0..1.0).contains(&smoothing) {
            return Err(RemixError::InvalidInput(
                "smoothing must be in the range [0, 1)",
            ));
        }

        let mut planner = RealFftPlanner::new();
        let plan = planner.plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();

        Ok(Self {
            fft_size,
            window: VecDeque::with_capacity(fft_size),
            plan,
            input,
            scratch,
            spectrum,
            smoothing,
            smoothed: vec![0.0; fft_size / 2],
        })
    }

    /// Feeds time-domain samples; only the most recent window is retained.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.window.extend(samples.iter().copied());
        while self.window.len() > self.fft_size {
            self.window.pop_front();
        }
    }
}

impl AnalysisTap for FftTap {
    fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn fill_frequency_data(&mut self, bins: &mut [u8]) {
        self.input.fill(0.0);
        for (i, sample) in self.window.iter().enumerate() {
            self.input[i] = sample * hann_value(i, self.fft_size);
        }

        if self
            .plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            return;
        }

        let scale = 2.0 / self.fft_size as f32;
        for (i, bin) in bins.iter_mut().enumerate().take(self.bin_count()) {
            let amplitude = self.spectrum[i].norm() * scale;
            let db = 20.0 * amplitude.max(1e-12).log10();
            let normalized = ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0);
            let value =
                self.smoothing * self.smoothed[i] + (1.0 - self.smoothing) * normalized;
            self.smoothed[i] = value;
            *bin = (value * TAP_OUTPUT_CEILING).round() as u8;
        }
    }
}

impl fmt::Debug for FftTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftTap")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

/// Caller-owned drawing target for the sampler.
pub trait Surface {
    /// Displayed size in CSS-like pixels.
    fn display_size(&self) -> (u32, u32);
    /// Ratio of backing pixels to displayed pixels.
    fn device_pixel_ratio(&self) -> f32;
    /// Resizes the backing store.
    fn set_backing_size(&mut self, width: u32, height: u32);
    fn backing_size(&self) -> (u32, u32);
    /// Draws one frame of bars; heights are normalized to [0, 1].
    fn draw_bars(&mut self, bars: &[f32]);
}

/// In-memory surface that records what was drawn.
#[derive(Debug, Default)]
pub struct FramebufferSurface {
    display: (u32, u32),
    dpr: f32,
    backing: (u32, u32),
    last_bars: Vec<f32>,
    draw_count: usize,
}

impl FramebufferSurface {
    pub fn new(width: u32, height: u32, dpr: f32) -> Self {
        Self {
            display: (width, height),
            dpr,
            backing: (width, height),
            last_bars: Vec::new(),
            draw_count: 0,
        }
    }

    /// Simulates a layout change of the displayed element.
    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display = (width, height);
    }

    pub fn set_device_pixel_ratio(&mut self, dpr: f32) {
        self.dpr = dpr;
    }

    /// Bars from the most recent draw.
    pub fn last_bars(&self) -> &[f32] {
        &self.last_bars
    }

    /// Number of frames drawn so far.
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }
}

impl Surface for FramebufferSurface {
    fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn device_pixel_ratio(&self) -> f32 {
        self.dpr
    }

    fn set_backing_size(&mut self, width: u32, height: u32) {
        self.backing = (width, height);
    }

    fn backing_size(&self) -> (u32, u32) {
        self.backing
    }

    fn draw_bars(&mut self, bars: &[f32]) {
        self.last_bars.clear();
        self.last_bars.extend_from_slice(bars);
        self.draw_count += 1;
    }
}

/// Handle for one scheduled frame. Cancelling consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken(u64);

/// Display-refresh scheduler seam.
pub trait FrameScheduler {
    /// Schedules one frame and returns its token.
    fn request_frame(&mut self) -> FrameToken;
    /// Cancels a scheduled frame; the token must not fire afterwards.
    fn cancel_frame(&mut self, token: FrameToken);
}

/// Deterministic scheduler driven by the host: at most one frame is
/// pending, and the host fires it by taking it from the queue.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_token: u64,
    pending: Option<u64>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the pending frame, if any.
    pub fn take_due(&mut self) -> Option<FrameToken> {
        self.pending.take().map(FrameToken)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameToken {
        self.next_token += 1;
        self.pending = Some(self.next_token);
        FrameToken(self.next_token)
    }

    fn cancel_frame(&mut self, token: FrameToken) {
        if self.pending == Some(token.0) {
            self.pending = None;
        }
    }
}

/// The per-frame sampling loop over one tap and one surface.
pub struct SpectrumSampler<T: AnalysisTap, S: Surface> {
    tap: T,
    surface: S,
    bins: Vec<u8>,
    bars: Vec<f32>,
    pending: Option<FrameToken>,
    visible: bool,
}

impl<T: AnalysisTap, S: Surface> SpectrumSampler<T, S> {
    pub fn new(tap: T, surface: S) -> Self {
        let bin_count = tap.bin_count();
        Self {
            tap,
            surface,
            bins: vec![0; bin_count],
            bars: vec![0.0; bin_count],
            pending: None,
            visible: false,
        }
    }

    /// Starts the loop: recomputes the backing resolution and schedules the
    /// first frame.
    pub fn activate(&mut self, scheduler: &mut dyn FrameScheduler) {
        if self.visible {
            return;
        }
        self.visible = true;
        self.handle_resize();
        self.pending = Some(scheduler.request_frame());
        tracing::debug!(bins = self.bins.len(), "spectrum sampler activated");
    }

    /// Stops the loop, cancelling the pending frame synchronously. No frame
    /// fires after this returns.
    pub fn deactivate(&mut self, scheduler: &mut dyn FrameScheduler) {
        self.visible = false;
        if let Some(token) = self.pending.take() {
            scheduler.cancel_frame(token);
        }
    }

    /// Convenience wrapper mapping a visibility flag onto
    /// activate/deactivate.
    pub fn set_visible(&mut self, visible: bool, scheduler: &mut dyn FrameScheduler) {
        if visible {
            self.activate(scheduler);
        } else {
            self.deactivate(scheduler);
        }
    }

    /// Handles one fired frame: pulls a snapshot, draws it and schedules
    /// the next frame. Tokens that are stale or arrive after deactivation
    /// are ignored.
    pub fn on_frame(&mut self, token: FrameToken, scheduler: &mut dyn FrameScheduler) {
        if !self.visible || self.pending != Some(token) {
            return;
        }
        self.pending = None;

        self.tap.fill_frequency_data(&mut self.bins);
        for (bar, bin) in self.bars.iter_mut().zip(&self.bins) {
            *bar = *bin as f32 / TAP_OUTPUT_CEILING;
        }
        self.surface.draw_bars(&self.bars);

        self.pending = Some(scheduler.request_frame());
    }

    /// Recomputes the backing resolution from the displayed size and the
    /// device pixel ratio. Independent of the draw loop.
    pub fn handle_resize(&mut self) {
        let (width, height) = self.surface.display_size();
        let dpr = self.surface.device_pixel_ratio();
        let backing_width = (width as f32 * dpr).round() as u32;
        let backing_height = (height as f32 * dpr).round() as u32;
        self.surface.set_backing_size(backing_width, backing_height);
    }

    pub fn is_active(&self) -> bool {
        self.visible
    }

    pub fn tap_mut(&mut self) -> &mut T {
        &mut self.tap
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tap that counts pulls and reports a fixed ramp.
    struct RampTap {
        bins: usize,
        pulls: usize,
    }

    impl AnalysisTap for RampTap {
        fn bin_count(&self) -> usize {
            self.bins
        }

        fn fill_frequency_data(&mut self, bins: &mut [u8]) {
            self.pulls += 1;
            for (i, bin) in bins.iter_mut().enumerate() {
                *bin = (i * 255 / self.bins.max(1)) as u8;
            }
        }
    }

    fn sampler(bins: usize) -> SpectrumSampler<RampTap, FramebufferSurface> {
        SpectrumSampler::new(
            RampTap { bins, pulls: 0 },
            FramebufferSurface::new(320, 120, 1.0),
        )
    }

    fn run_frames(
        sampler: &mut SpectrumSampler<RampTap, FramebufferSurface>,
        scheduler: &mut ManualScheduler,
        frames: usize,
    ) {
        for _ in 0..frames {
            let token = scheduler.take_due().expect("a frame should be pending");
            sampler.on_frame(token, scheduler);
        }
    }

    #[test]
    fn draws_once_per_fired_frame_and_reschedules() {
        let mut sampler = sampler(16);
        let mut scheduler = ManualScheduler::new();

        sampler.activate(&mut scheduler);
        run_frames(&mut sampler, &mut scheduler, 3);

        assert_eq!(sampler.surface().draw_count(), 3);
        assert!(scheduler.has_pending());
        assert_eq!(sampler.surface().last_bars().len(), 16);
    }

    #[test]
    fn bars_are_normalized_to_unit_range() {
        let mut sampler = sampler(32);
        let mut scheduler = ManualScheduler::new();
        sampler.activate(&mut scheduler);
        run_frames(&mut sampler, &mut scheduler, 1);

        for bar in sampler.surface().last_bars() {
            assert!((0.0..=1.0).contains(bar));
        }
    }

    #[test]
    fn deactivation_cancels_the_pending_frame_synchronously() {
        let mut sampler = sampler(8);
        let mut scheduler = ManualScheduler::new();
        sampler.activate(&mut scheduler);
        run_frames(&mut sampler, &mut scheduler, 2);

        sampler.deactivate(&mut scheduler);
        assert!(!scheduler.has_pending());
        assert!(scheduler.take_due().is_none());
        assert_eq!(sampler.surface().draw_count(), 2);
    }

    #[test]
    fn stale_tokens_are_ignored() {
        let mut sampler = sampler(8);
        let mut scheduler = ManualScheduler::new();
        sampler.activate(&mut scheduler);

        let stale = scheduler.take_due().unwrap();
        sampler.deactivate(&mut scheduler);
        sampler.on_frame(stale, &mut scheduler);
        assert_eq!(sampler.surface().draw_count(), 0);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn visibility_flag_drives_the_loop() {
        let mut sampler = sampler(8);
        let mut scheduler = ManualScheduler::new();

        sampler.set_visible(true, &mut scheduler);
        assert!(sampler.is_active());
        sampler.set_visible(false, &mut scheduler);
        assert!(!sampler.is_active());
        assert!(scheduler.take_due().is_none());
    }

    #[test]
    fn resize_recomputes_backing_resolution_with_dpr() {
        let mut sampler = SpectrumSampler::new(
            RampTap { bins: 8, pulls: 0 },
            FramebufferSurface::new(300, 100, 2.0),
        );
        sampler.handle_resize();
        assert_eq!(sampler.surface().backing_size(), (600, 200));
    }

    #[test]
    fn fft_tap_rejects_bad_window_sizes() {
        assert!(FftTap::new(0).is_err());
        assert!(FftTap::new(48).is_err());
        assert!(FftTap::new(16).is_err());
        assert!(FftTap::new(256).is_ok());
    }

    #[test]
    fn fft_tap_reports_energy_for_a_loud_tone() {
        let mut tap = FftTap::with_smoothing(256, 0.0).unwrap();
        let tone: Vec<f32> = (0..256)
            .map(|i| (2.0 * PI * i as f32 * 16.0 / 256.0).sin())
            .collect();
        tap.push_samples(&tone);

        let mut bins = vec![0u8; tap.bin_count()];
        tap.fill_frequency_data(&mut bins);

        let peak = bins.iter().copied().max().unwrap();
        assert!(peak > 150, "expected a strong peak, got {peak}");
        // The peak should sit at the driven bin.
        let peak_index = bins.iter().enumerate().max_by_key(|(_, v)| **v).unwrap().0;
        assert!((15..=17).contains(&peak_index), "peak at bin {peak_index}");
    }

    #[test]
    fn fft_tap_is_quiet_for_silence() {
        let mut tap = FftTap::with_smoothing(128, 0.0).unwrap();
        tap.push_samples(&vec![0.0; 128]);

        let mut bins = vec![0u8; tap.bin_count()];
        tap.fill_frequency_data(&mut bins);
        assert!(bins.iter().all(|bin| *bin == 0));
    }

    #[test]
    fn fft_tap_keeps_only_the_latest_window() {
        let mut tap = FftTap::with_smoothing(64, 0.0).unwrap();
        tap.push_samples(&vec![1.0; 64]);
        // Silence displaces the loud window entirely.
        tap.push_samples(&vec![0.0; 64]);

        let mut bins = vec![0u8; tap.bin_count()];
        tap.fill_frequency_data(&mut bins);
        assert!(bins.iter().all(|bin| *bin == 0));
    }
}
