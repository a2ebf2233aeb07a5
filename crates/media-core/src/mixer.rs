//! Audio mixing stage
//!
//! The DSP of a production mixer lives outside this crate; the pipeline only
//! needs something that keeps one pending frame per registered source and
//! produces a combined frame on demand. A frame contributes to exactly one
//! mix. [`AudioMixer`] is the in-tree implementation.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Mixing engine contract used by transcoding and conferencing
pub trait Mixer: Send {
    /// Register a source. Registering an existing source is an error.
    fn add_source(&mut self, source: &str) -> Result<()>;

    /// Deregister a source and drop its pending frame
    fn remove_source(&mut self, source: &str) -> Result<()>;

    /// Replace the pending frame of a registered source
    fn add_samples(&mut self, source: &str, samples: &[f32]) -> Result<()>;

    /// Combine the pending frames of all sources and consume them.
    /// A source with no new frame since the last mix contributes silence.
    fn mix(&mut self) -> Vec<f32>;

    /// Number of registered sources
    fn source_count(&self) -> usize;

    /// Whether a source is registered
    fn has_source(&self, source: &str) -> bool;
}

/// Audio mixer configuration
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frame duration in milliseconds
    pub frame_ms: u32,
    /// Scale the mix by `1/sqrt(n)` when more than one source contributes
    pub auto_gain: bool,
    /// Soft-clip samples above 0.9 full scale
    pub clip_protection: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_ms: 20,
            auto_gain: true,
            clip_protection: true,
        }
    }
}

impl MixerConfig {
    /// A single-source configuration that leaves samples untouched
    pub fn pass_through() -> Self {
        Self {
            auto_gain: false,
            clip_protection: false,
            ..Default::default()
        }
    }

    /// Nominal frame size in samples
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Summing mixer holding at most one pending frame per source
#[derive(Debug)]
pub struct AudioMixer {
    config: MixerConfig,
    buffers: HashMap<String, Vec<f32>>,
}

impl AudioMixer {
    /// Create a new audio mixer
    pub fn new(config: MixerConfig) -> Self {
        debug!(
            "Creating mixer: {}Hz, {}ms frames ({} samples)",
            config.sample_rate,
            config.frame_ms,
            config.frame_samples()
        );
        Self {
            config,
            buffers: HashMap::new(),
        }
    }

    /// Mixer configuration
    pub fn config(&self) -> &MixerConfig {
        &self.config
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new(MixerConfig::default())
    }
}

impl Mixer for AudioMixer {
    fn add_source(&mut self, source: &str) -> Result<()> {
        if self.buffers.contains_key(source) {
            return Err(Error::mixer(format!("source {} already registered", source)));
        }
        self.buffers.insert(source.to_string(), Vec::new());
        debug!("Added mixer source {}", source);
        Ok(())
    }

    fn remove_source(&mut self, source: &str) -> Result<()> {
        match self.buffers.remove(source) {
            Some(_) => {
                debug!("Removed mixer source {}", source);
                Ok(())
            }
            None => Err(Error::mixer(format!("source {} not registered", source))),
        }
    }

    fn add_samples(&mut self, source: &str, samples: &[f32]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(source)
            .ok_or_else(|| Error::mixer(format!("source {} not registered", source)))?;
        buffer.clear();
        buffer.extend_from_slice(samples);
        Ok(())
    }

    fn mix(&mut self) -> Vec<f32> {
        let len = self.buffers.values().map(Vec::len).max().unwrap_or(0);
        let mut mixed = vec![0.0f32; len];

        let mut active_sources = 0;
        for buffer in self.buffers.values().filter(|b| !b.is_empty()) {
            for (out, sample) in mixed.iter_mut().zip(buffer) {
                *out += *sample;
            }
            active_sources += 1;
        }

        if self.config.auto_gain && active_sources > 1 {
            let gain = 1.0 / (active_sources as f32).sqrt();
            for sample in mixed.iter_mut() {
                *sample *= gain;
            }
        }

        if self.config.clip_protection {
            for sample in mixed.iter_mut() {
                // Soft clipping using tanh
                if sample.abs() > 0.9 {
                    *sample = sample.signum() * (0.9 + 0.1 * ((sample.abs() - 0.9) * 10.0).tanh());
                }
            }
        }

        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }

        trace!("Mixed {} sources into {} samples", active_sources, len);
        mixed
    }

    fn source_count(&self) -> usize {
        self.buffers.len()
    }

    fn has_source(&self, source: &str) -> bool {
        self.buffers.contains_key(source)
    }
}
