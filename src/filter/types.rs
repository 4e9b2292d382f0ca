//! Filter-Konfigurationen
//!
//! Die Reihenfolge der Varianten von [`FilterType`] ist die Verarbeitungs-
//! reihenfolge der Kette (`Ord` wird abgeleitet).

use super::error::FilterError;
use crate::media::VideoFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Beauty,
    Color,
    Background,
    Ar,
    Custom,
}

impl FilterType {
    pub const ORDER: [FilterType; 5] = [
        FilterType::Beauty,
        FilterType::Color,
        FilterType::Background,
        FilterType::Ar,
        FilterType::Custom,
    ];
}

// ============================================================================
// PARAMETERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeautyParams {
    /// Glättung, 0.0..=1.0
    pub intensity: f32,
    /// Aufhellung, 0.0..=1.0
    pub brighten: f32,
}

impl Default for BeautyParams {
    fn default() -> Self {
        Self {
            intensity: 0.5,
            brighten: 0.0,
        }
    }
}

/// Farbkorrektur; alle Werte 0 = unverändert
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Drehung in Grad
    pub hue: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum BackgroundMode {
    Blur { radius: u32 },
    Replace { color: [u8; 3] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundParams {
    #[serde(flatten)]
    pub mode: BackgroundMode,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            mode: BackgroundMode::Blur { radius: 8 },
        }
    }
}

/// AR-Effekt, wird vom [`ArRenderer`](super::ArRenderer) interpretiert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArParams {
    pub effect: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

type CustomFn = dyn Fn(VideoFrame) -> Option<VideoFrame> + Send + Sync;

/// Benutzerdefinierter Filter; `None` verwirft den Frame
#[derive(Clone)]
pub struct CustomFilter {
    name: String,
    apply: Arc<CustomFn>,
}

impl CustomFilter {
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(VideoFrame) -> Option<VideoFrame> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn apply(&self, frame: VideoFrame) -> Option<VideoFrame> {
        (self.apply)(frame)
    }
}

impl fmt::Debug for CustomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFilter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomFilter {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.apply, &other.apply)
    }
}

// ============================================================================
// FILTER CONFIG
// ============================================================================

/// Konfiguration eines Filters, getaggt über `type`
///
/// `Custom` trägt eine Closure und lässt sich nicht serialisieren.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FilterConfig {
    Beauty(BeautyParams),
    Color(ColorParams),
    Background(BackgroundParams),
    Ar(ArParams),
    #[serde(skip)]
    Custom(CustomFilter),
}

impl FilterConfig {
    pub fn filter_type(&self) -> FilterType {
        match self {
            FilterConfig::Beauty(_) => FilterType::Beauty,
            FilterConfig::Color(_) => FilterType::Color,
            FilterConfig::Background(_) => FilterType::Background,
            FilterConfig::Ar(_) => FilterType::Ar,
            FilterConfig::Custom(_) => FilterType::Custom,
        }
    }
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), FilterError> {
    // NaN fällt durch `contains`
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(FilterError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Prüft eine Konfiguration, bevor sie in die Kette aufgenommen wird
pub fn validate_filter_config(config: &FilterConfig) -> Result<(), FilterError> {
    match config {
        FilterConfig::Beauty(p) => {
            check_range("intensity", p.intensity, 0.0, 1.0)?;
            check_range("brighten", p.brighten, 0.0, 1.0)
        }
        FilterConfig::Color(p) => {
            check_range("brightness", p.brightness, -100.0, 100.0)?;
            check_range("contrast", p.contrast, -100.0, 100.0)?;
            check_range("saturation", p.saturation, -100.0, 100.0)?;
            check_range("hue", p.hue, -180.0, 180.0)
        }
        FilterConfig::Background(p) => match p.mode {
            BackgroundMode::Blur { radius } if radius == 0 || radius > 64 => Err(
                FilterError::InvalidConfig(format!("blur radius {} out of range 1..=64", radius)),
            ),
            _ => Ok(()),
        },
        FilterConfig::Ar(p) if p.effect.trim().is_empty() => Err(FilterError::InvalidConfig(
            "AR effect name is empty".to_string(),
        )),
        FilterConfig::Ar(_) => Ok(()),
        FilterConfig::Custom(c) if c.name().trim().is_empty() => Err(
            FilterError::InvalidConfig("custom filter needs a name".to_string()),
        ),
        FilterConfig::Custom(_) => Ok(()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
