//! Filter Manager
//!
//! Hält die [`FilterChain`] und schickt Frames in fester Reihenfolge
//! (beauty → color → background → ar → custom) durch alle aktiven Filter.
//! Jeder Filter kann den Frame verwerfen; dann liefert
//! [`FilterManager::process_video_frame`] `Ok(None)`.

use super::chain::{FilterChain, FilterEntry};
use super::effects;
use super::error::FilterError;
use super::types::{validate_filter_config, ArParams, FilterConfig, FilterType};
use crate::events::{ErrorSource, RtcEvent, RtcEventBus};
use crate::media::{PixelFormat, VideoFrame};
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Personen-Segmentierung für den Hintergrund-Filter
pub trait SegmentationModel: Send + Sync {
    /// Modell geladen und einsatzbereit
    fn is_ready(&self) -> bool;

    /// Vordergrund-Maske, ein Wert pro Pixel (0.0 = Hintergrund)
    fn segment(&self, frame: &VideoFrame) -> Result<Vec<f32>, FilterError>;
}

/// Renderer für AR-Effekte; `None` verwirft den Frame
pub trait ArRenderer: Send + Sync {
    fn render(&self, frame: VideoFrame, params: &ArParams) -> Option<VideoFrame>;
}

// ============================================================================
// FILTER MANAGER
// ============================================================================

pub struct FilterManager {
    chain: Mutex<FilterChain>,
    segmentation: Mutex<Option<Arc<dyn SegmentationModel>>>,
    ar_renderer: Mutex<Option<Arc<dyn ArRenderer>>>,
    bus: RtcEventBus,
}

impl FilterManager {
    pub fn new(bus: RtcEventBus) -> Self {
        Self {
            chain: Mutex::new(FilterChain::new()),
            segmentation: Mutex::new(None),
            ar_renderer: Mutex::new(None),
            bus,
        }
    }

    pub fn set_segmentation_model(&self, model: Option<Arc<dyn SegmentationModel>>) {
        *self.segmentation.lock() = model;
    }

    pub fn set_ar_renderer(&self, renderer: Option<Arc<dyn ArRenderer>>) {
        *self.ar_renderer.lock() = renderer;
    }

    /// Setzt einen Filter; ein vorhandener Filter gleichen Typs wird ersetzt
    pub fn apply_filter(&self, config: FilterConfig) -> Result<(), FilterError> {
        validate_filter_config(&config)?;

        let filter_type = config.filter_type();
        let replaced = self.chain.lock().insert(config).is_some();

        tracing::debug!(
            "Filter {:?} {}",
            filter_type,
            if replaced { "replaced" } else { "applied" }
        );
        self.bus.emit(RtcEvent::FilterApplied(filter_type));
        Ok(())
    }

    /// Löscht die Konfiguration eines Typs
    pub fn remove_filter(&self, filter_type: FilterType) -> bool {
        let removed = self.chain.lock().remove(filter_type).is_some();
        if removed {
            tracing::debug!("Filter {:?} removed", filter_type);
            self.bus.emit(RtcEvent::FilterRemoved(filter_type));
        }
        removed
    }

    /// (De)aktiviert einen Filter, ohne die Konfiguration zu löschen.
    /// Gibt den neuen Zustand zurück.
    pub fn toggle_filter(&self, filter_type: FilterType) -> Result<bool, FilterError> {
        let enabled = {
            let mut chain = self.chain.lock();
            let enabled = !chain
                .get(filter_type)
                .ok_or(FilterError::NotFound(filter_type))?
                .enabled;
            chain.set_enabled(filter_type, enabled);
            enabled
        };

        self.bus.emit(RtcEvent::FilterToggled {
            filter_type,
            enabled,
        });
        Ok(enabled)
    }

    pub fn get_filter(&self, filter_type: FilterType) -> Option<FilterConfig> {
        self.chain.lock().get(filter_type).map(|e| e.config.clone())
    }

    pub fn is_enabled(&self, filter_type: FilterType) -> bool {
        self.chain
            .lock()
            .get(filter_type)
            .map(|e| e.enabled)
            .unwrap_or(false)
    }

    /// Alle Einträge in Verarbeitungsreihenfolge
    pub fn filters(&self) -> Vec<FilterEntry> {
        self.chain.lock().iter().cloned().collect()
    }

    pub fn clear_filters(&self) {
        let removed: Vec<FilterType> = {
            let mut chain = self.chain.lock();
            let types = chain.iter().map(|e| e.config.filter_type()).collect();
            chain.clear();
            types
        };
        for filter_type in removed {
            self.bus.emit(RtcEvent::FilterRemoved(filter_type));
        }
    }

    /// Schickt einen Frame durch alle aktiven Filter
    pub fn process_video_frame(&self, frame: VideoFrame) -> Result<Option<VideoFrame>, FilterError> {
        // Snapshot, damit Filter ohne gehaltenen Lock laufen
        let active: Vec<FilterConfig> = self.chain.lock().enabled().cloned().collect();
        if active.is_empty() {
            return Ok(Some(frame));
        }

        if frame.format != PixelFormat::Rgb24 || !frame.is_valid() {
            return Err(FilterError::UnsupportedFrame(format!(
                "{:?} {}x{} ({} bytes)",
                frame.format,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let mut current = frame;
        for config in &active {
            match self.run_filter(config, current) {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    tracing::trace!("Frame dropped by {:?} filter", config.filter_type());
                    return Ok(None);
                }
                Err(e) => {
                    self.bus.emit(RtcEvent::error(ErrorSource::Filter, e.to_string()));
                    return Err(e);
                }
            }
        }
        Ok(Some(current))
    }

    fn run_filter(
        &self,
        config: &FilterConfig,
        frame: VideoFrame,
    ) -> Result<Option<VideoFrame>, FilterError> {
        match config {
            FilterConfig::Beauty(params) => Ok(Some(effects::beauty(&frame, params))),
            FilterConfig::Color(params) => Ok(Some(effects::color(&frame, params))),
            FilterConfig::Background(params) => {
                let model = self.segmentation.lock().clone();
                let Some(model) = model else {
                    return Ok(Some(frame));
                };
                // Modell lädt noch
                if !model.is_ready() {
                    return Ok(None);
                }
                let mask = model.segment(&frame)?;
                if mask.len() != frame.pixel_count() {
                    return Err(FilterError::Segmentation(format!(
                        "mask has {} values for {} pixels",
                        mask.len(),
                        frame.pixel_count()
                    )));
                }
                Ok(Some(effects::background(&frame, &mask, &params.mode)))
            }
            FilterConfig::Ar(params) => {
                let renderer = self.ar_renderer.lock().clone();
                match renderer {
                    Some(renderer) => Ok(renderer.render(frame, params)),
                    None => Ok(Some(frame)),
                }
            }
            FilterConfig::Custom(custom) => Ok(custom.apply(frame)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
