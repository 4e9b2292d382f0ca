//! Codec Manager
//!
//! Zwei unabhängige Zustandsmaschinen:
//! - Encoder: Idle → Encoding | Error
//! - Decoder: Idle → Decoding | Error
//!
//! Übergänge laufen unter einem Mutex pro Richtung, damit parallele Aufrufe
//! nicht um den Wechsel aus Idle konkurrieren.

use super::backend::{
    AudioDecoderBackend, AudioEncoderBackend, CodecId, CodecPath, EncodedChunk, HardwareCodecs,
    VideoDecoderBackend, VideoEncoderBackend,
};
use super::config::{DecoderConfig, EncoderConfig, HardwareAcceleration};
use super::error::CodecError;
use super::software;
use crate::events::{ErrorSource, RtcEvent, RtcEventBus};
use crate::media::{AudioFrame, TrackKind, VideoFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// TYPES
// ============================================================================

/// Zustand von Encoder bzw. Decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecState {
    Idle,
    Encoding,
    Decoding,
    Error,
}

/// Verfügbarer Codec mit Ausführungspfad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub codec: CodecId,
    pub path: CodecPath,
}

/// Zähler pro Richtung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecStats {
    pub frames: u64,
    pub bytes: u64,
    pub keyframes: u64,
    /// Fehlgeschlagene Einheiten
    pub dropped: u64,
}

// ============================================================================
// SLOTS
// ============================================================================

struct EncoderSlot {
    state: CodecState,
    config: Option<EncoderConfig>,
    video: Option<Box<dyn VideoEncoderBackend>>,
    audio: Option<Box<dyn AudioEncoderBackend>>,
    paths: HashMap<TrackKind, CodecPath>,
    stats: CodecStats,
}

struct DecoderSlot {
    state: CodecState,
    config: Option<DecoderConfig>,
    video: Option<Box<dyn VideoDecoderBackend>>,
    audio: Option<Box<dyn AudioDecoderBackend>>,
    paths: HashMap<TrackKind, CodecPath>,
    stats: CodecStats,
}

impl EncoderSlot {
    /// Zählt das Ergebnis mit. Liefert den Fehler, wenn der Encoder
    /// dadurch nach `Error` wechselt.
    fn record(&mut self, result: &Result<Option<EncodedChunk>, CodecError>) -> Option<String> {
        match result {
            Ok(Some(chunk)) => {
                self.stats.frames += 1;
                self.stats.bytes += chunk.data.len() as u64;
                if chunk.keyframe {
                    self.stats.keyframes += 1;
                }
                None
            }
            Ok(None) => None,
            Err(CodecError::InvalidInput(_)) => {
                self.stats.dropped += 1;
                None
            }
            Err(e) => {
                self.stats.dropped += 1;
                self.state = CodecState::Error;
                Some(e.to_string())
            }
        }
    }
}

impl DecoderSlot {
    fn record<T>(
        &mut self,
        result: &Result<Option<T>, CodecError>,
        size: u64,
        keyframe: bool,
    ) -> Option<String> {
        match result {
            Ok(output) => {
                self.stats.bytes += size;
                if output.is_some() {
                    self.stats.frames += 1;
                    if keyframe {
                        self.stats.keyframes += 1;
                    }
                }
                None
            }
            Err(CodecError::InvalidInput(_)) => {
                self.stats.dropped += 1;
                None
            }
            Err(e) => {
                self.stats.dropped += 1;
                self.state = CodecState::Error;
                Some(e.to_string())
            }
        }
    }
}

/// Öffnet ein Backend: erst Hardware (falls gewünscht), dann Software
fn open_backend<B>(
    kind: TrackKind,
    acceleration: HardwareAcceleration,
    hardware: impl FnOnce() -> Result<B, CodecError>,
    software: impl FnOnce() -> Result<B, CodecError>,
) -> Result<(B, CodecPath), CodecError> {
    if acceleration.tries_hardware() {
        match hardware() {
            Ok(backend) => return Ok((backend, CodecPath::Hardware)),
            Err(e) => tracing::debug!("Hardware {:?} codec unavailable, using software: {}", kind, e),
        }
    }
    software().map(|backend| (backend, CodecPath::Software))
}

// ============================================================================
// CODEC MANAGER
// ============================================================================

pub struct CodecManager {
    hardware: Arc<dyn HardwareCodecs>,
    bus: RtcEventBus,
    encoder: Mutex<EncoderSlot>,
    decoder: Mutex<DecoderSlot>,
}

impl CodecManager {
    pub fn new(hardware: Arc<dyn HardwareCodecs>, bus: RtcEventBus) -> Self {
        Self {
            hardware,
            bus,
            encoder: Mutex::new(EncoderSlot {
                state: CodecState::Idle,
                config: None,
                video: None,
                audio: None,
                paths: HashMap::new(),
                stats: CodecStats::default(),
            }),
            decoder: Mutex::new(DecoderSlot {
                state: CodecState::Idle,
                config: None,
                video: None,
                audio: None,
                paths: HashMap::new(),
                stats: CodecStats::default(),
            }),
        }
    }

    /// Alle Codecs mit ihrem bevorzugten Pfad (Hardware vor Software)
    pub fn supported_codecs(&self) -> Vec<CodecCapability> {
        let mut caps: Vec<CodecCapability> = self
            .hardware
            .supported()
            .into_iter()
            .map(|codec| CodecCapability {
                codec,
                path: CodecPath::Hardware,
            })
            .collect();

        for codec in software::software_codecs() {
            if !caps.iter().any(|c| c.codec == codec) {
                caps.push(CodecCapability {
                    codec,
                    path: CodecPath::Software,
                });
            }
        }
        caps
    }

    // ------------------------------------------------------------------------
    // Encoder
    // ------------------------------------------------------------------------

    pub fn encoder_state(&self) -> CodecState {
        self.encoder.lock().state
    }

    pub fn encoder_config(&self) -> Option<EncoderConfig> {
        self.encoder.lock().config.clone()
    }

    pub fn encoder_path(&self, kind: TrackKind) -> Option<CodecPath> {
        self.encoder.lock().paths.get(&kind).copied()
    }

    pub fn encoder_stats(&self) -> CodecStats {
        self.encoder.lock().stats
    }

    /// Setzt die Encoder-Konfiguration
    ///
    /// Ungültige Konfigurationen werden abgelehnt, ohne den Zustand zu ändern.
    /// Ein laufender Encoder wird mit der neuen Konfiguration neu geöffnet.
    pub fn set_encoder_config(&self, config: EncoderConfig) -> Result<(), CodecError> {
        config.validate()?;

        let restart = {
            let mut slot = self.encoder.lock();
            slot.config = Some(config);
            slot.state == CodecState::Encoding
        };

        if restart {
            tracing::debug!("Reopening encoder with new configuration");
            self.stop_encoding();
            self.start_encoding()?;
        }
        Ok(())
    }

    /// Startet den Encoder. Läuft er bereits, passiert nichts.
    pub fn start_encoding(&self) -> Result<(), CodecError> {
        let mut slot = self.encoder.lock();
        if slot.state == CodecState::Encoding {
            return Ok(());
        }
        let config = slot
            .config
            .clone()
            .ok_or_else(|| CodecError::NotConfigured("encoder".to_string()))?;

        let opened = self.open_encoders(&config);
        match opened {
            Ok((video, audio, paths)) => {
                slot.video = video;
                slot.audio = audio;
                slot.paths = paths;
                slot.state = CodecState::Encoding;
                drop(slot);

                tracing::info!("Encoder started");
                self.bus.emit(RtcEvent::EncoderStateChanged(CodecState::Encoding));
                Ok(())
            }
            Err(e) => {
                slot.state = CodecState::Error;
                drop(slot);

                tracing::error!("Failed to start encoder: {}", e);
                self.bus.emit(RtcEvent::EncoderStateChanged(CodecState::Error));
                self.bus.emit(RtcEvent::error(ErrorSource::Codec, e.to_string()));
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn open_encoders(
        &self,
        config: &EncoderConfig,
    ) -> Result<
        (
            Option<Box<dyn VideoEncoderBackend>>,
            Option<Box<dyn AudioEncoderBackend>>,
            HashMap<TrackKind, CodecPath>,
        ),
        CodecError,
    > {
        let mut paths = HashMap::new();

        let video = match &config.video {
            Some(video) => {
                let (backend, path) = open_backend(
                    TrackKind::Video,
                    video.hardware_acceleration,
                    || self.hardware.video_encoder(video),
                    || software::video_encoder(video),
                )?;
                paths.insert(TrackKind::Video, path);
                Some(backend)
            }
            None => None,
        };

        let audio = match &config.audio {
            Some(audio) => {
                let (backend, path) = open_backend(
                    TrackKind::Audio,
                    HardwareAcceleration::PreferHardware,
                    || self.hardware.audio_encoder(audio),
                    || software::audio_encoder(audio),
                )?;
                paths.insert(TrackKind::Audio, path);
                Some(backend)
            }
            None => None,
        };

        Ok((video, audio, paths))
    }

    /// Stoppt den Encoder und verwirft die Backends
    pub fn stop_encoding(&self) {
        let changed = {
            let mut slot = self.encoder.lock();
            slot.video = None;
            slot.audio = None;
            slot.paths.clear();
            let changed = slot.state != CodecState::Idle;
            slot.state = CodecState::Idle;
            changed
        };

        if changed {
            tracing::info!("Encoder stopped");
            self.bus.emit(RtcEvent::EncoderStateChanged(CodecState::Idle));
        }
    }

    /// Kodiert einen Video-Frame; `Ok(None)` = keine Ausgabe für diesen Frame
    pub fn encode_video(&self, frame: &VideoFrame) -> Result<Option<EncodedChunk>, CodecError> {
        let mut slot = self.encoder.lock();
        if slot.state != CodecState::Encoding {
            return Err(CodecError::NotActive("encoder".to_string()));
        }
        let Some(backend) = slot.video.as_mut() else {
            return Err(CodecError::NotConfigured("video encoder".to_string()));
        };

        let result = backend.encode(frame);
        let failure = slot.record(&result);
        drop(slot);

        if let Some(message) = failure {
            self.encoder_failed(message);
        }
        result
    }

    /// Kodiert einen Audio-Frame; `Ok(None)` = Paket noch nicht voll
    pub fn encode_audio(&self, frame: &AudioFrame) -> Result<Option<EncodedChunk>, CodecError> {
        let mut slot = self.encoder.lock();
        if slot.state != CodecState::Encoding {
            return Err(CodecError::NotActive("encoder".to_string()));
        }
        let Some(backend) = slot.audio.as_mut() else {
            return Err(CodecError::NotConfigured("audio encoder".to_string()));
        };

        let result = backend.encode(frame);
        let failure = slot.record(&result);
        drop(slot);

        if let Some(message) = failure {
            self.encoder_failed(message);
        }
        result
    }

    /// Meldet den Wechsel nach `Error`; Aufruf ohne gehaltenen Slot-Lock
    fn encoder_failed(&self, message: String) {
        tracing::error!("Encoder failed: {}", message);
        self.bus.emit(RtcEvent::EncoderStateChanged(CodecState::Error));
        self.bus.emit(RtcEvent::error(ErrorSource::Codec, message));
    }

    /// Nächster Video-Frame wird ein Keyframe
    pub fn request_keyframe(&self) {
        if let Some(video) = self.encoder.lock().video.as_mut() {
            video.request_keyframe();
        }
    }

    // ------------------------------------------------------------------------
    // Decoder
    // ------------------------------------------------------------------------

    pub fn decoder_state(&self) -> CodecState {
        self.decoder.lock().state
    }

    pub fn decoder_config(&self) -> Option<DecoderConfig> {
        self.decoder.lock().config.clone()
    }

    pub fn decoder_path(&self, kind: TrackKind) -> Option<CodecPath> {
        self.decoder.lock().paths.get(&kind).copied()
    }

    pub fn decoder_stats(&self) -> CodecStats {
        self.decoder.lock().stats
    }

    /// Setzt die Decoder-Konfiguration (Validierung vor jeder Änderung)
    pub fn set_decoder_config(&self, config: DecoderConfig) -> Result<(), CodecError> {
        config.validate()?;

        let restart = {
            let mut slot = self.decoder.lock();
            slot.config = Some(config);
            slot.state == CodecState::Decoding
        };

        if restart {
            tracing::debug!("Reopening decoder with new configuration");
            self.stop_decoding();
            self.start_decoding()?;
        }
        Ok(())
    }

    /// Startet den Decoder. Läuft er bereits, passiert nichts.
    pub fn start_decoding(&self) -> Result<(), CodecError> {
        let mut slot = self.decoder.lock();
        if slot.state == CodecState::Decoding {
            return Ok(());
        }
        let config = slot
            .config
            .clone()
            .ok_or_else(|| CodecError::NotConfigured("decoder".to_string()))?;

        let mut paths = HashMap::new();
        let opened = (|| {
            let video = match &config.video {
                Some(video) => {
                    let (backend, path) = open_backend(
                        TrackKind::Video,
                        video.hardware_acceleration,
                        || self.hardware.video_decoder(video),
                        || software::video_decoder(video),
                    )?;
                    paths.insert(TrackKind::Video, path);
                    Some(backend)
                }
                None => None,
            };
            let audio = match &config.audio {
                Some(audio) => {
                    let (backend, path) = open_backend(
                        TrackKind::Audio,
                        HardwareAcceleration::PreferHardware,
                        || self.hardware.audio_decoder(audio),
                        || software::audio_decoder(audio),
                    )?;
                    paths.insert(TrackKind::Audio, path);
                    Some(backend)
                }
                None => None,
            };
            Ok::<_, CodecError>((video, audio))
        })();

        match opened {
            Ok((video, audio)) => {
                slot.video = video;
                slot.audio = audio;
                slot.paths = paths;
                slot.state = CodecState::Decoding;
                drop(slot);

                tracing::info!("Decoder started");
                self.bus.emit(RtcEvent::DecoderStateChanged(CodecState::Decoding));
                Ok(())
            }
            Err(e) => {
                slot.state = CodecState::Error;
                drop(slot);

                tracing::error!("Failed to start decoder: {}", e);
                self.bus.emit(RtcEvent::DecoderStateChanged(CodecState::Error));
                self.bus.emit(RtcEvent::error(ErrorSource::Codec, e.to_string()));
                Err(e)
            }
        }
    }

    pub fn stop_decoding(&self) {
        let changed = {
            let mut slot = self.decoder.lock();
            slot.video = None;
            slot.audio = None;
            slot.paths.clear();
            let changed = slot.state != CodecState::Idle;
            slot.state = CodecState::Idle;
            changed
        };

        if changed {
            tracing::info!("Decoder stopped");
            self.bus.emit(RtcEvent::DecoderStateChanged(CodecState::Idle));
        }
    }

    /// Dekodiert eine Video-Einheit; `Ok(None)` = Decoder braucht mehr Daten
    pub fn decode_video(&self, chunk: &EncodedChunk) -> Result<Option<VideoFrame>, CodecError> {
        let mut slot = self.decoder.lock();
        if slot.state != CodecState::Decoding {
            return Err(CodecError::NotActive("decoder".to_string()));
        }
        let Some(backend) = slot.video.as_mut() else {
            return Err(CodecError::NotConfigured("video decoder".to_string()));
        };

        let result = backend.decode(chunk);
        let failure = slot.record(&result, chunk.data.len() as u64, chunk.keyframe);
        drop(slot);

        if let Some(message) = failure {
            self.decoder_failed(message);
        }
        result
    }

    /// Dekodiert ein Audio-Paket
    pub fn decode_audio(&self, chunk: &EncodedChunk) -> Result<Option<AudioFrame>, CodecError> {
        let mut slot = self.decoder.lock();
        if slot.state != CodecState::Decoding {
            return Err(CodecError::NotActive("decoder".to_string()));
        }
        let Some(backend) = slot.audio.as_mut() else {
            return Err(CodecError::NotConfigured("audio decoder".to_string()));
        };

        let result = backend.decode(chunk);
        let failure = slot.record(&result, chunk.data.len() as u64, chunk.keyframe);
        drop(slot);

        if let Some(message) = failure {
            self.decoder_failed(message);
        }
        result
    }

    fn decoder_failed(&self, message: String) {
        tracing::error!("Decoder failed: {}", message);
        self.bus.emit(RtcEvent::DecoderStateChanged(CodecState::Error));
        self.bus.emit(RtcEvent::error(ErrorSource::Codec, message));
    }
}

impl std::fmt::Debug for CodecManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecManager")
            .field("hardware", &self.hardware.name())
            .field("encoder", &self.encoder_state())
            .field("decoder", &self.decoder_state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::config::{
        AudioCodec, AudioDecoderConfig, AudioEncoderConfig, VideoCodec, VideoDecoderConfig,
        VideoEncoderConfig,
    };
    use crate::codec::g711;
    use crate::codec::NoHardwareCodecs;
    use bytes::Bytes;

    /// Hardware-Encoder, der Frames unverändert durchreicht
    struct PassthroughHardware;

    struct PassthroughEncoder {
        keyframe: bool,
    }

    impl VideoEncoderBackend for PassthroughEncoder {
        fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedChunk>, CodecError> {
            let keyframe = std::mem::take(&mut self.keyframe);
            Ok(Some(EncodedChunk {
                kind: TrackKind::Video,
                data: frame.data.clone(),
                timestamp_us: frame.timestamp_us,
                keyframe,
            }))
        }

        fn request_keyframe(&mut self) {
            self.keyframe = true;
        }
    }

    impl HardwareCodecs for PassthroughHardware {
        fn name(&self) -> &'static str {
            "passthrough"
        }

        fn supported(&self) -> Vec<CodecId> {
            vec![CodecId::Video(VideoCodec::Vp8)]
        }

        fn video_encoder(
            &self,
            config: &VideoEncoderConfig,
        ) -> Result<Box<dyn VideoEncoderBackend>, CodecError> {
            match config.codec {
                VideoCodec::Vp8 => Ok(Box::new(PassthroughEncoder { keyframe: true })),
                _ => Err(CodecError::Unsupported("only vp8".to_string())),
            }
        }

        fn video_decoder(
            &self,
            _config: &VideoDecoderConfig,
        ) -> Result<Box<dyn VideoDecoderBackend>, CodecError> {
            Err(CodecError::Unsupported("no decoder".to_string()))
        }

        fn audio_encoder(
            &self,
            _config: &AudioEncoderConfig,
        ) -> Result<Box<dyn AudioEncoderBackend>, CodecError> {
            Err(CodecError::Unsupported("no audio".to_string()))
        }

        fn audio_decoder(
            &self,
            _config: &AudioDecoderConfig,
        ) -> Result<Box<dyn AudioDecoderBackend>, CodecError> {
            Err(CodecError::Unsupported("no audio".to_string()))
        }
    }

    /// Hardware, deren VP8-Codecs sich öffnen lassen, aber bei jeder Einheit scheitern
    struct BrokenHardware;

    struct BrokenEncoder;

    impl VideoEncoderBackend for BrokenEncoder {
        fn encode(&mut self, _frame: &VideoFrame) -> Result<Option<EncodedChunk>, CodecError> {
            Err(CodecError::Backend("device lost".to_string()))
        }

        fn request_keyframe(&mut self) {}
    }

    struct BrokenDecoder;

    impl VideoDecoderBackend for BrokenDecoder {
        fn decode(&mut self, _chunk: &EncodedChunk) -> Result<Option<VideoFrame>, CodecError> {
            Err(CodecError::Backend("device lost".to_string()))
        }
    }

    impl HardwareCodecs for BrokenHardware {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn supported(&self) -> Vec<CodecId> {
            vec![CodecId::Video(VideoCodec::Vp8)]
        }

        fn video_encoder(
            &self,
            _config: &VideoEncoderConfig,
        ) -> Result<Box<dyn VideoEncoderBackend>, CodecError> {
            Ok(Box::new(BrokenEncoder))
        }

        fn video_decoder(
            &self,
            _config: &VideoDecoderConfig,
        ) -> Result<Box<dyn VideoDecoderBackend>, CodecError> {
            Ok(Box::new(BrokenDecoder))
        }

        fn audio_encoder(
            &self,
            _config: &AudioEncoderConfig,
        ) -> Result<Box<dyn AudioEncoderBackend>, CodecError> {
            Err(CodecError::Unsupported("no audio".to_string()))
        }

        fn audio_decoder(
            &self,
            _config: &AudioDecoderConfig,
        ) -> Result<Box<dyn AudioDecoderBackend>, CodecError> {
            Err(CodecError::Unsupported("no audio".to_string()))
        }
    }

    /// Führt `f` auf einem eigenen Thread aus und wartet höchstens drei Sekunden
    fn within_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(std::time::Duration::from_secs(3))
            .expect("codec call did not return")
    }

    fn vp8_config() -> EncoderConfig {
        EncoderConfig {
            video: Some(VideoEncoderConfig {
                codec: VideoCodec::Vp8,
                width: 4,
                height: 4,
                ..Default::default()
            }),
            audio: None,
        }
    }

    fn pcmu_encoder() -> EncoderConfig {
        EncoderConfig {
            video: None,
            audio: Some(AudioEncoderConfig::default()),
        }
    }

    #[test]
    fn test_start_encoding_twice_stays_encoding() {
        let codec = CodecManager::new(Arc::new(PassthroughHardware), RtcEventBus::new());
        codec.set_encoder_config(vp8_config()).unwrap();

        codec.start_encoding().unwrap();
        codec.start_encoding().unwrap();

        assert_eq!(codec.encoder_state(), CodecState::Encoding);
        assert_eq!(codec.encoder_path(TrackKind::Video), Some(CodecPath::Hardware));
    }

    #[test]
    fn test_invalid_config_leaves_state_unchanged() {
        let codec = CodecManager::new(Arc::new(NoHardwareCodecs), RtcEventBus::new());
        codec.set_encoder_config(pcmu_encoder()).unwrap();
        codec.start_encoding().unwrap();

        let bad = EncoderConfig {
            video: None,
            audio: Some(AudioEncoderConfig {
                channels: 0,
                ..Default::default()
            }),
        };
        assert!(matches!(
            codec.set_encoder_config(bad),
            Err(CodecError::InvalidConfig(_))
        ));
        assert_eq!(codec.encoder_state(), CodecState::Encoding);
        assert_eq!(codec.encoder_config(), Some(pcmu_encoder()));
    }

    #[test]
    fn test_missing_hardware_falls_back_silently() {
        let bus = RtcEventBus::new();
        let errors = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&errors);
        bus.on(crate::events::RtcEventKind::Error, move |_| *sink.lock() += 1);

        let codec = CodecManager::new(Arc::new(NoHardwareCodecs), bus);
        codec.set_encoder_config(pcmu_encoder()).unwrap();
        codec.start_encoding().unwrap();

        assert_eq!(codec.encoder_path(TrackKind::Audio), Some(CodecPath::Software));
        assert_eq!(*errors.lock(), 0);
    }

    #[test]
    fn test_unavailable_codec_moves_to_error() {
        let codec = CodecManager::new(Arc::new(NoHardwareCodecs), RtcEventBus::new());
        codec
            .set_encoder_config(EncoderConfig {
                video: None,
                audio: Some(AudioEncoderConfig {
                    codec: AudioCodec::Opus,
                    sample_rate: 48000,
                    channels: 2,
                    bitrate_bps: 64_000,
                }),
            })
            .unwrap();

        assert!(matches!(
            codec.start_encoding(),
            Err(CodecError::Unsupported(_))
        ));
        assert_eq!(codec.encoder_state(), CodecState::Error);

        codec.stop_encoding();
        assert_eq!(codec.encoder_state(), CodecState::Idle);
    }

    #[test]
    fn test_audio_encode_returns_none_while_buffering() {
        let codec = CodecManager::new(Arc::new(NoHardwareCodecs), RtcEventBus::new());
        codec.set_encoder_config(pcmu_encoder()).unwrap();
        codec.start_encoding().unwrap();

        let frame = AudioFrame::new(8000, 1, 0, vec![0.2; 80]);
        assert_eq!(codec.encode_audio(&frame).unwrap(), None);
        let chunk = codec.encode_audio(&frame).unwrap().unwrap();
        assert_eq!(chunk.data.len(), g711::PACKET_SAMPLES);

        let stats = codec.encoder_stats();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.bytes, g711::PACKET_SAMPLES as u64);
        assert_eq!(codec.encoder_state(), CodecState::Encoding);
    }

    #[test]
    fn test_encode_requires_active_encoder() {
        let codec = CodecManager::new(Arc::new(PassthroughHardware), RtcEventBus::new());
        let frame = VideoFrame::solid(4, 4, [0, 0, 0]);
        assert!(matches!(
            codec.encode_video(&frame),
            Err(CodecError::NotActive(_))
        ));
    }

    #[test]
    fn test_keyframe_request_reaches_backend() {
        let codec = CodecManager::new(Arc::new(PassthroughHardware), RtcEventBus::new());
        codec.set_encoder_config(vp8_config()).unwrap();
        codec.start_encoding().unwrap();

        let frame = VideoFrame::solid(4, 4, [9, 9, 9]);
        assert!(codec.encode_video(&frame).unwrap().unwrap().keyframe);
        assert!(!codec.encode_video(&frame).unwrap().unwrap().keyframe);

        codec.request_keyframe();
        assert!(codec.encode_video(&frame).unwrap().unwrap().keyframe);
        assert_eq!(codec.encoder_stats().keyframes, 2);
    }

    #[test]
    fn test_decoder_state_machine() {
        let codec = CodecManager::new(Arc::new(NoHardwareCodecs), RtcEventBus::new());
        assert!(matches!(
            codec.start_decoding(),
            Err(CodecError::NotConfigured(_))
        ));
        assert_eq!(codec.decoder_state(), CodecState::Idle);

        codec
            .set_decoder_config(DecoderConfig {
                video: None,
                audio: Some(AudioDecoderConfig::default()),
            })
            .unwrap();
        codec.start_decoding().unwrap();
        codec.start_decoding().unwrap();
        assert_eq!(codec.decoder_state(), CodecState::Decoding);

        let chunk = EncodedChunk {
            kind: TrackKind::Audio,
            data: Bytes::from(g711::encode(&[0.5; 160])),
            timestamp_us: 40_000,
            keyframe: true,
        };
        let frame = codec.decode_audio(&chunk).unwrap().unwrap();
        assert_eq!(frame.samples.len(), 160);
        assert_eq!(frame.timestamp_us, 40_000);
    }

    #[test]
    fn test_supported_codecs_prefer_hardware() {
        let codec = CodecManager::new(Arc::new(PassthroughHardware), RtcEventBus::new());
        let caps = codec.supported_codecs();

        assert!(caps.contains(&CodecCapability {
            codec: CodecId::Video(VideoCodec::Vp8),
            path: CodecPath::Hardware,
        }));
        assert!(caps.contains(&CodecCapability {
            codec: CodecId::Audio(AudioCodec::Pcmu),
            path: CodecPath::Software,
        }));
    }

    #[test]
    fn test_failure_handlers_may_query_encoder() {
        let bus = RtcEventBus::new();
        let codec = Arc::new(CodecManager::new(Arc::new(BrokenHardware), bus.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&codec);
        let sink = Arc::clone(&seen);
        bus.on(crate::events::RtcEventKind::EncoderStateChanged, move |_| {
            if let Some(codec) = weak.upgrade() {
                sink.lock()
                    .push((codec.encoder_state(), codec.encoder_stats().dropped));
            }
        });

        codec.set_encoder_config(vp8_config()).unwrap();
        codec.start_encoding().unwrap();

        let worker = Arc::clone(&codec);
        let result = within_deadline(move || {
            worker.encode_video(&VideoFrame::solid(4, 4, [1, 2, 3]))
        });

        assert!(matches!(result, Err(CodecError::Backend(_))));
        assert_eq!(codec.encoder_state(), CodecState::Error);
        assert_eq!(seen.lock().last(), Some(&(CodecState::Error, 1)));
    }

    #[test]
    fn test_failure_handlers_may_query_decoder() {
        let bus = RtcEventBus::new();
        let codec = Arc::new(CodecManager::new(Arc::new(BrokenHardware), bus.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&codec);
        let sink = Arc::clone(&seen);
        bus.on(crate::events::RtcEventKind::Error, move |_| {
            if let Some(codec) = weak.upgrade() {
                sink.lock().push(codec.decoder_state());
            }
        });

        codec
            .set_decoder_config(DecoderConfig {
                video: Some(VideoDecoderConfig {
                    codec: VideoCodec::Vp8,
                    ..Default::default()
                }),
                audio: None,
            })
            .unwrap();
        codec.start_decoding().unwrap();

        let chunk = EncodedChunk {
            kind: TrackKind::Video,
            data: Bytes::from_static(&[0, 0, 1, 0x65]),
            timestamp_us: 0,
            keyframe: true,
        };
        let worker = Arc::clone(&codec);
        let result = within_deadline(move || worker.decode_video(&chunk));

        assert!(matches!(result, Err(CodecError::Backend(_))));
        assert_eq!(*seen.lock(), vec![CodecState::Error]);
        assert_eq!(codec.decoder_stats().dropped, 1);
    }
}
