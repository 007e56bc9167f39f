//! Effect invocation over the DSP module.
//!
//! Every call stages through linear memory: the input is copied in at
//! offset zero, the transform runs, and the contracted output length is
//! copied back out. Views are taken after any growth so a grown buffer can
//! never be read through a stale window. Transforms are pure and
//! deterministic; samples are normalized floats and no clipping is applied
//! (integrators clip after copy-out if their sink requires it).

use std::sync::Arc;

use crate::bridge::MemoryBridge;
use crate::module::{DspModule, EffectKind, PAGE_SIZE};
use crate::{RemixError, Result};

/// Scalar parameters accepted by every effect invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectParams {
    /// Effect strength in 0.0–1.0.
    pub intensity: f32,
    /// Playback-speed ratio for [`EffectKind::TempoShift`]; 1.0 leaves the
    /// length unchanged.
    pub tempo_ratio: f32,
    /// Preset selector for [`EffectKind::Equalizer`].
    pub preset: u32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            intensity: 0.5,
            tempo_ratio: 1.0,
            preset: 0,
        }
    }
}

/// Output length contract for a given effect, input length and parameters.
/// Part of the static contract, not runtime-negotiated.
pub fn output_len(kind: EffectKind, input_len: usize, params: &EffectParams) -> usize {
    match kind {
        EffectKind::TempoShift => {
            (input_len as f64 / params.tempo_ratio as f64).ceil() as usize
        }
        _ => input_len,
    }
}

/// Applies module exports to sample buffers, one invocation at a time.
///
/// `apply` takes `&mut self`, so a second transform can never run while the
/// views of an earlier call are still outstanding.
#[derive(Debug)]
pub struct EffectEngine {
    module: Arc<DspModule>,
    bridge: MemoryBridge,
}

impl EffectEngine {
    pub fn new(module: Arc<DspModule>) -> Self {
        let bridge = MemoryBridge::new(Arc::clone(&module));
        Self { module, bridge }
    }

    /// The bridge used for staging, exposed for inspection.
    pub fn bridge(&self) -> &MemoryBridge {
        &self.bridge
    }

    /// Runs the named export over `input` and returns the transformed
    /// samples.
    pub fn apply(
        &mut self,
        export: &str,
        input: &[f32],
        params: &EffectParams,
    ) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Err(RemixError::InvalidInput("effect input must not be empty"));
        }
        if !(params.tempo_ratio.is_finite() && params.tempo_ratio > 0.0) {
            return Err(RemixError::InvalidInput(
                "tempo ratio must be a positive finite number",
            ));
        }

        let kind = self
            .module
            .resolve(export)
            .ok_or_else(|| RemixError::UnknownExport(export.to_string()))?;
        let out_len = output_len(kind, input.len(), params);

        let in_bytes = input.len() * std::mem::size_of::<f32>();
        let out_offset = in_bytes;
        self.ensure_capacity(out_offset + out_len * std::mem::size_of::<f32>())?;

        // Views taken only after any growth above.
        let in_view = self.bridge.as_float_view(0, input.len())?;
        self.bridge.copy_in(&in_view, input)?;

        let mut staged = vec![0.0f32; input.len()];
        self.bridge.copy_out(&in_view, &mut staged)?;
        let transformed = run_effect(kind, &staged, params);
        debug_assert_eq!(transformed.len(), out_len);

        let out_view = self.bridge.as_float_view(out_offset, out_len)?;
        self.bridge.copy_in(&out_view, &transformed)?;

        let mut output = vec![0.0f32; out_len];
        self.bridge.copy_out(&out_view, &mut output)?;

        tracing::debug!(
            export,
            input_len = input.len(),
            output_len = out_len,
            "effect applied"
        );
        Ok(output)
    }

    fn ensure_capacity(&self, needed: usize) -> Result<()> {
        let size = self.module.memory_size()?;
        if needed > size {
            let pages = (needed - size).div_ceil(PAGE_SIZE);
            self.module.grow_memory(pages)?;
        }
        Ok(())
    }
}

fn run_effect(kind: EffectKind, samples: &[f32], params: &EffectParams) -> Vec<f32> {
    match kind {
        EffectKind::Lofi => lofi(samples, params.intensity),
        EffectKind::TempoShift => tempo_shift(samples, params.tempo_ratio),
        EffectKind::Equalizer => equalizer(samples, params.preset),
        EffectKind::AmbientMix => ambient_mix(samples, params.intensity),
    }
}

/// One-pole lowpass whose cutoff falls as intensity rises, followed by bit
/// depth reduction from 12 down to 4 effective bits.
fn lofi(samples: &[f32], intensity: f32) -> Vec<f32> {
    let intensity = intensity.clamp(0.0, 1.0);
    let alpha = 1.0 - 0.85 * intensity;
    let steps = (2.0f32).powf(12.0 - 8.0 * intensity);

    let mut state = 0.0f32;
    samples
        .iter()
        .map(|sample| {
            state += alpha * (sample - state);
            (state * steps).round() / steps
        })
        .collect()
}

/// Linear resampling; ratio > 1.0 shortens the buffer, < 1.0 lengthens it.
fn tempo_shift(samples: &[f32], ratio: f32) -> Vec<f32> {
    let out_len = (samples.len() as f64 / ratio as f64).ceil() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = (i as f64 * ratio as f64).min(last as f64);
            let base = position.floor() as usize;
            let frac = (position - base as f64) as f32;
            let a = samples[base];
            let b = samples[(base + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Splits the signal into low/mid/high with two one-pole followers and
/// recombines with preset shelving gains.
fn equalizer(samples: &[f32], preset: u32) -> Vec<f32> {
    let (low_gain, mid_gain, high_gain) = match preset % 4 {
        0 => (1.0, 1.0, 1.0),  // flat
        1 => (1.4, 1.0, 0.7),  // warm
        2 => (0.8, 1.0, 1.5),  // bright
        _ => (1.6, 0.9, 1.2),  // club
    };

    let mut slow = 0.0f32;
    let mut fast = 0.0f32;
    samples
        .iter()
        .map(|sample| {
            slow += 0.08 * (sample - slow);
            fast += 0.45 * (sample - fast);
            let low = slow;
            let mid = fast - slow;
            let high = sample - fast;
            low * low_gain + mid * mid_gain + high * high_gain
        })
        .collect()
}

/// Mixes a deterministic noise bed under the signal. The generator is a
/// fixed-seed LCG so repeated invocations are bit-identical.
fn ambient_mix(samples: &[f32], intensity: f32) -> Vec<f32> {
    let mix = intensity.clamp(0.0, 1.0) * 0.4;
    let mut rng = Lcg::new(AUDIO_SEED);

    samples
        .iter()
        .map(|sample| sample * (1.0 - mix) + rng.next_bipolar() * mix)
        .collect()
}

const AUDIO_SEED: u64 = 0x5EED_0F00_57E2_E001;

struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Uniform value in [-1.0, 1.0).
    fn next_bipolar(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bits = (self.0 >> 33) as u32;
        (bits as f64 / (1u64 << 31) as f64 - 1.0) as f32
    }
}
