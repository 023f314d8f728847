//! The reference `PersistenceCollaborator`: a `serde_json` encoding of the
//! Composition/Track/Segment entity graph (§4.9, §4.9.1).
//!
//! Source PCM data is never part of the document — only each segment's
//! stable source GUID. Resolving a GUID back into a `SampleSource` is the
//! caller's job via a `SourceRegistry`; any GUID the registry can't resolve
//! on load is bound to a `SilenceSource` and reported as unresolved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cw_core::{SampleSource, SilenceSource};
use cw_engine::{Composition, FadeCurve, FadeSettings, LoopSetting, Segment, TimeStretchSetting, Track};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PersistError, PersistResult};

const MAX_HINT_PATH_LENGTH: usize = 4096;

/// Validates a filesystem hint path carried in a project document (e.g. for
/// relinking a missing source) before it is ever used: no null bytes, no
/// `..` traversal components, not absolute. Grounded in the teacher's
/// project-file path-validation discipline.
pub fn validate_hint_path(path: &str) -> PersistResult<&str> {
    if path.contains('\0') {
        return Err(PersistError::InvalidPath("contains null bytes".to_string()));
    }
    if path.len() > MAX_HINT_PATH_LENGTH {
        return Err(PersistError::InvalidPath(format!(
            "exceeds maximum length of {MAX_HINT_PATH_LENGTH} bytes"
        )));
    }
    let path_ref = Path::new(path);
    if path_ref.is_absolute() {
        return Err(PersistError::InvalidPath("absolute paths are not allowed".to_string()));
    }
    for component in path_ref.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(PersistError::InvalidPath("path traversal ('..') is not allowed".to_string()));
        }
    }
    Ok(path)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum FadeCurveDto {
    Linear,
    Logarithmic,
    SCurve,
}

impl From<FadeCurve> for FadeCurveDto {
    fn from(c: FadeCurve) -> Self {
        match c {
            FadeCurve::Linear => FadeCurveDto::Linear,
            FadeCurve::Logarithmic => FadeCurveDto::Logarithmic,
            FadeCurve::SCurve => FadeCurveDto::SCurve,
        }
    }
}

impl From<FadeCurveDto> for FadeCurve {
    fn from(c: FadeCurveDto) -> Self {
        match c {
            FadeCurveDto::Linear => FadeCurve::Linear,
            FadeCurveDto::Logarithmic => FadeCurve::Logarithmic,
            FadeCurveDto::SCurve => FadeCurve::SCurve,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FadeDto {
    duration_seconds: f64,
    curve: Option<FadeCurveDto>,
}

impl From<FadeSettings> for FadeDto {
    fn from(f: FadeSettings) -> Self {
        Self {
            duration_seconds: f.duration_seconds,
            curve: f.curve.map(Into::into),
        }
    }
}

impl From<FadeDto> for FadeSettings {
    fn from(f: FadeDto) -> Self {
        Self {
            duration_seconds: f.duration_seconds,
            curve: f.curve.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum LoopSettingDto {
    Repetitions(u32),
    TargetDuration(f64),
}

impl From<LoopSetting> for LoopSettingDto {
    fn from(l: LoopSetting) -> Self {
        match l {
            LoopSetting::Repetitions(n) => LoopSettingDto::Repetitions(n),
            LoopSetting::TargetDuration(d) => LoopSettingDto::TargetDuration(d),
        }
    }
}

impl From<LoopSettingDto> for LoopSetting {
    fn from(l: LoopSettingDto) -> Self {
        match l {
            LoopSettingDto::Repetitions(n) => LoopSetting::Repetitions(n),
            LoopSettingDto::TargetDuration(d) => LoopSetting::TargetDuration(d),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum TimeStretchSettingDto {
    Factor(f64),
    TargetDuration(f64),
}

impl From<TimeStretchSetting> for TimeStretchSettingDto {
    fn from(t: TimeStretchSetting) -> Self {
        match t {
            TimeStretchSetting::Factor(f) => TimeStretchSettingDto::Factor(f),
            TimeStretchSetting::TargetDuration(d) => TimeStretchSettingDto::TargetDuration(d),
        }
    }
}

impl From<TimeStretchSettingDto> for TimeStretchSetting {
    fn from(t: TimeStretchSettingDto) -> Self {
        match t {
            TimeStretchSettingDto::Factor(f) => TimeStretchSetting::Factor(f),
            TimeStretchSettingDto::TargetDuration(d) => TimeStretchSetting::TargetDuration(d),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDocument {
    pub source_guid: Uuid,
    /// A relative hint path a relinking collaborator may use if the
    /// registry can't resolve `source_guid`; validated on load.
    pub source_hint_path: Option<String>,
    pub source_start: u64,
    pub source_duration: u64,
    pub timeline_start: u64,
    pub enabled: bool,
    pub gain: f32,
    pub pan: f32,
    fade_in: FadeDto,
    fade_out: FadeDto,
    loop_setting: LoopSettingDto,
    pub reversed: bool,
    pub speed: f64,
    time_stretch: TimeStretchSettingDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDocument {
    pub name: String,
    pub enabled: bool,
    pub muted: bool,
    pub soloed: bool,
    pub gain: f32,
    pub pan: f32,
    pub segments: Vec<SegmentDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub master_gain: f32,
    pub tracks: Vec<TrackDocument>,
}

/// Maps source GUIDs to live sample sources, supplied by the caller; the
/// collaborator never owns or decodes source data itself (§4.9).
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<Uuid, Arc<Mutex<Box<dyn SampleSource>>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, guid: Uuid, source: Arc<Mutex<Box<dyn SampleSource>>>) {
        self.sources.insert(guid, source);
    }

    pub fn get(&self, guid: Uuid) -> Option<Arc<Mutex<Box<dyn SampleSource>>>> {
        self.sources.get(&guid).cloned()
    }
}

/// What the core consumes to save/load the editing entities to/from an
/// external representation (§4.9).
pub trait PersistenceCollaborator {
    fn save(&self, document: &ProjectDocument, to: &Path) -> PersistResult<()>;
    fn load(&self, from: &Path) -> PersistResult<ProjectDocument>;
}

/// The reference collaborator: plain `serde_json`, pretty-printed.
pub struct JsonProjectStore;

impl PersistenceCollaborator for JsonProjectStore {
    fn save(&self, document: &ProjectDocument, to: &Path) -> PersistResult<()> {
        let json = serde_json::to_string_pretty(document)?;
        std::fs::write(to, json)?;
        log::info!("saved project {:?} to {}", document.name, to.display());
        Ok(())
    }

    fn load(&self, from: &Path) -> PersistResult<ProjectDocument> {
        let content = std::fs::read_to_string(from)?;
        let document: ProjectDocument = serde_json::from_str(&content)?;
        for track in &document.tracks {
            for segment in &track.segments {
                if let Some(hint) = &segment.source_hint_path {
                    validate_hint_path(hint)?;
                }
            }
        }
        log::info!("loaded project {:?} from {}", document.name, from.display());
        Ok(document)
    }
}

/// Serializes a live `Composition` into a `ProjectDocument`.
pub fn dehydrate_composition(composition: &Composition) -> ProjectDocument {
    ProjectDocument {
        name: composition.name.clone(),
        sample_rate: composition.sample_rate,
        channels: composition.channels,
        master_gain: composition.master_gain,
        tracks: composition
            .tracks()
            .iter()
            .map(|track| TrackDocument {
                name: track.name.clone(),
                enabled: track.enabled,
                muted: track.muted,
                soloed: track.soloed,
                gain: track.gain,
                pan: track.pan,
                segments: track
                    .segments()
                    .iter()
                    .map(|segment| SegmentDocument {
                        source_guid: segment.source_guid(),
                        source_hint_path: None,
                        source_start: segment.source_start(),
                        source_duration: segment.source_duration(),
                        timeline_start: segment.timeline_start,
                        enabled: segment.settings.enabled,
                        gain: segment.settings.gain,
                        pan: segment.settings.pan,
                        fade_in: segment.settings.fade_in.into(),
                        fade_out: segment.settings.fade_out.into(),
                        loop_setting: segment.settings.loop_setting.into(),
                        reversed: segment.settings.reversed,
                        speed: segment.settings.speed,
                        time_stretch: segment.settings.time_stretch.into(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Rebuilds a live `Composition` from a `ProjectDocument`, resolving each
/// segment's source GUID against `registry`. Any GUID the registry can't
/// resolve is bound to a `SilenceSource` sized to the persisted
/// `source_duration` and returned in the unresolved-reference list (§4.9.1).
pub fn hydrate_composition(document: &ProjectDocument, registry: &SourceRegistry) -> PersistResult<(Composition, Vec<Uuid>)> {
    let mut composition = Composition::new(document.name.clone(), document.sample_rate, document.channels);
    composition.master_gain = document.master_gain;
    let mut unresolved = Vec::new();

    for track_doc in &document.tracks {
        let mut track = Track::new(track_doc.name.clone());
        track.enabled = track_doc.enabled;
        track.muted = track_doc.muted;
        track.soloed = track_doc.soloed;
        track.gain = track_doc.gain;
        track.pan = track_doc.pan;

        for segment_doc in &track_doc.segments {
            let source = match registry.get(segment_doc.source_guid) {
                Some(source) => source,
                None => {
                    log::warn!(
                        "unresolved source {} on track {:?}; binding to silence",
                        segment_doc.source_guid,
                        track_doc.name
                    );
                    unresolved.push(segment_doc.source_guid);
                    let silence: Box<dyn SampleSource> = Box::new(SilenceSource::fixed(
                        document.channels,
                        document.sample_rate,
                        segment_doc.source_duration,
                    ));
                    Arc::new(Mutex::new(silence))
                }
            };

            let mut segment = Segment::new(
                source,
                segment_doc.source_guid,
                segment_doc.source_start,
                segment_doc.source_duration,
                segment_doc.timeline_start,
            )?;
            segment.settings.enabled = segment_doc.enabled;
            segment.settings.gain = segment_doc.gain;
            segment.settings.pan = segment_doc.pan;
            segment.settings.fade_in = segment_doc.fade_in.into();
            segment.settings.fade_out = segment_doc.fade_out.into();
            segment.settings.loop_setting = segment_doc.loop_setting.into();
            segment.settings.reversed = segment_doc.reversed;
            segment.settings.speed = segment_doc.speed;
            segment.settings.time_stretch = segment_doc.time_stretch.into();

            track.insert_segment(segment)?;
        }

        composition.add_track(track);
    }

    composition.mark_clean();
    Ok((composition, unresolved))
}

/// Clears the dirty flag across `composition` and everything it owns. Call
/// after `PersistenceCollaborator::save` succeeds so the in-memory state
/// matches what was just written to disk (§3, §6).
pub fn mark_composition_saved(composition: &mut Composition) {
    composition.mark_clean();
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::BufferSource;

    fn sample_document() -> ProjectDocument {
        let guid = Uuid::new_v4();
        ProjectDocument {
            name: "demo".to_string(),
            sample_rate: 48_000,
            channels: 1,
            master_gain: 1.0,
            tracks: vec![TrackDocument {
                name: "track 1".to_string(),
                enabled: true,
                muted: false,
                soloed: false,
                gain: 1.0,
                pan: 0.0,
                segments: vec![SegmentDocument {
                    source_guid: guid,
                    source_hint_path: None,
                    source_start: 0,
                    source_duration: 4800,
                    timeline_start: 0,
                    enabled: true,
                    gain: 1.0,
                    pan: 0.0,
                    fade_in: FadeSettings::none().into(),
                    fade_out: FadeSettings::none().into(),
                    loop_setting: LoopSetting::default().into(),
                    reversed: false,
                    speed: 1.0,
                    time_stretch: TimeStretchSetting::default().into(),
                }],
            }],
        }
    }

    #[test]
    fn round_trips_through_json() {
        let document = sample_document();
        let json = serde_json::to_string(&document).unwrap();
        let back: ProjectDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, document.name);
        assert_eq!(back.tracks.len(), 1);
        assert_eq!(back.tracks[0].segments.len(), 1);
    }

    #[test]
    fn missing_source_is_reported_unresolved_and_bound_to_silence() {
        let document = sample_document();
        let registry = SourceRegistry::new();
        let (composition, unresolved) = hydrate_composition(&document, &registry).unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0], document.tracks[0].segments[0].source_guid);
        assert_eq!(composition.tracks().len(), 1);
        assert_eq!(composition.tracks()[0].segments().len(), 1);
    }

    #[test]
    fn hydrated_composition_is_not_dirty() {
        let document = sample_document();
        let registry = SourceRegistry::new();
        let (composition, _unresolved) = hydrate_composition(&document, &registry).unwrap();
        assert!(!composition.is_dirty());
    }

    #[test]
    fn mark_composition_saved_clears_dirty_after_edits() {
        let mut composition = Composition::new("c", 48_000, 1);
        composition.add_track(Track::new("t"));
        assert!(composition.is_dirty());
        mark_composition_saved(&mut composition);
        assert!(!composition.is_dirty());
    }

    #[test]
    fn resolved_source_is_not_reported_unresolved() {
        let document = sample_document();
        let mut registry = SourceRegistry::new();
        let guid = document.tracks[0].segments[0].source_guid;
        let source: Arc<Mutex<Box<dyn SampleSource>>> =
            Arc::new(Mutex::new(Box::new(BufferSource::new(vec![0.0; 4800], 1, 48_000))));
        registry.register(guid, source);

        let (_composition, unresolved) = hydrate_composition(&document, &registry).unwrap();
        assert!(unresolved.is_empty());
    }

    #[test]
    fn traversal_hint_path_is_rejected() {
        assert!(validate_hint_path("../../etc/passwd").is_err());
        assert!(validate_hint_path("/etc/passwd").is_err());
        assert!(validate_hint_path("audio/clip.wav").is_ok());
    }

    #[test]
    fn save_then_load_round_trips_via_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let document = sample_document();
        let store = JsonProjectStore;
        store.save(&document, &path).unwrap();
        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.name, document.name);
    }
}
