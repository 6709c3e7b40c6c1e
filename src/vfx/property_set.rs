use crate::ui::color;
use crate::vfx::timeline::{DEFAULT_DEDUP_TOLERANCE_MS, Keyframe, PropertyTimeline};
use crate::vfx::value::{Gradient, VfxValue};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// Editor export: every difficulty's defaults and keyframe lists.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VfxDocument {
    #[serde(default)]
    pub difficulties: BTreeMap<String, VfxSetDocument>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VfxSetDocument {
    #[serde(default)]
    pub defaults: BTreeMap<String, VfxValue>,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<Keyframe>>,
}

#[derive(Debug)]
pub enum VfxError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// A property resolved to something the renderer cannot use this frame.
    InvalidFrameValue { path: &'static str, at_ms: f64 },
}

impl fmt::Display for VfxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read vfx document: {e}"),
            Self::Parse(e) => write!(f, "malformed vfx document: {e}"),
            Self::InvalidFrameValue { path, at_ms } => {
                write!(f, "vfx property {path} is unusable at {at_ms:.1}ms")
            }
        }
    }
}

impl std::error::Error for VfxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::InvalidFrameValue { .. } => None,
        }
    }
}

impl From<std::io::Error> for VfxError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for VfxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Built-in value for known paths when a difficulty does not declare one.
pub fn builtin_default(path: &str) -> Option<VfxValue> {
    let v = match path {
        "camera.x" | "camera.y" | "camera.z" | "camera.rotateX" | "camera.rotateY"
        | "camera.rotateZ" | "camera.shakeAmp" | "camera.shakeFreq" | "camera.skewX"
        | "camera.skewY" => VfxValue::Number(0.0),
        "camera.zoom" | "lanes.opacity" | "beatFlash.decay" => VfxValue::Number(1.0),
        "beatFlash.enabled" => VfxValue::Bool(false),
        "beatFlash.intensity" => VfxValue::Number(0.35),
        "background.color1" => VfxValue::Color(color::DEFAULT_BACKGROUND_TOP),
        "background.color2" => VfxValue::Color(color::DEFAULT_BACKGROUND_BOTTOM),
        "background.gradient" => VfxValue::Gradient(Gradient::two_stop(
            color::DEFAULT_BACKGROUND_TOP,
            color::DEFAULT_BACKGROUND_BOTTOM,
        )),
        _ => {
            if let Some(n) = path.strip_prefix("notes.colors.") {
                let lane = n.parse::<usize>().ok()?.checked_sub(1)?;
                VfxValue::Color(color::lane_rgba(lane))
            } else if let Some(rest) = path.strip_prefix("lanes.")
                && rest.ends_with(".opacity")
            {
                VfxValue::Number(1.0)
            } else {
                return None;
            }
        }
    };
    Some(v)
}

/// All animated properties for one difficulty. Immutable once built.
#[derive(Debug)]
pub struct VfxPropertySet {
    difficulty: String,
    timelines: Vec<PropertyTimeline>,
    index: FxHashMap<String, usize>,
}

impl VfxPropertySet {
    pub fn from_document(difficulty: &str, doc: VfxSetDocument, dedup_tolerance_ms: f64) -> Self {
        let VfxSetDocument { mut defaults, properties } = doc;
        let mut timelines = Vec::with_capacity(defaults.len().max(properties.len()));
        let mut index = FxHashMap::default();

        for (path, mut keyframes) in properties {
            for k in &mut keyframes {
                k.value.normalize();
            }
            let mut default = defaults
                .remove(&path)
                .or_else(|| builtin_default(&path))
                .or_else(|| keyframes.first().map(|k| k.value.clone()))
                .unwrap_or(VfxValue::Number(0.0));
            default.normalize();
            for k in &keyframes {
                if k.value.kind() != default.kind() {
                    debug!(
                        "'{path}' keyframe at {:.0}ms is {:?}, default is {:?}; it will step.",
                        k.time_ms,
                        k.value.kind(),
                        default.kind()
                    );
                }
            }
            let tl = PropertyTimeline::from_keyframes(path.clone(), default, keyframes, dedup_tolerance_ms);
            index.insert(path, timelines.len());
            timelines.push(tl);
        }
        // Defaults with no keyframes become constant timelines.
        for (path, mut default) in defaults {
            default.normalize();
            index.insert(path.clone(), timelines.len());
            timelines.push(PropertyTimeline::new(path, default));
        }

        Self {
            difficulty: difficulty.to_string(),
            timelines,
            index,
        }
    }

    #[inline(always)]
    pub fn difficulty(&self) -> &str {
        &self.difficulty
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }

    #[inline(always)]
    pub fn id_of(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }

    #[inline(always)]
    pub fn timeline(&self, id: usize) -> Option<&PropertyTimeline> {
        self.timelines.get(id)
    }

    pub fn get(&self, path: &str) -> Option<&PropertyTimeline> {
        self.id_of(path).and_then(|id| self.timelines.get(id))
    }
}

/// Every difficulty's property set, with one of them selected as current.
#[derive(Debug, Default)]
pub struct VfxLibrary {
    sets: FxHashMap<String, Rc<VfxPropertySet>>,
    current: Option<String>,
}

#[inline(always)]
fn difficulty_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl VfxLibrary {
    pub fn from_document(doc: VfxDocument, dedup_tolerance_ms: f64) -> Self {
        let mut sets = FxHashMap::default();
        for (name, set_doc) in doc.difficulties {
            let set = VfxPropertySet::from_document(&name, set_doc, dedup_tolerance_ms);
            debug!("VFX set '{name}': {} properties.", set.len());
            if sets.insert(difficulty_key(&name), Rc::new(set)).is_some() {
                warn!("Duplicate VFX difficulty '{name}' (case-insensitive); keeping the last one.");
            }
        }
        Self { sets, current: None }
    }

    pub fn from_json(json: &str) -> Result<Self, VfxError> {
        let doc: VfxDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(doc, DEFAULT_DEDUP_TOLERANCE_MS))
    }

    pub fn load<P: AsRef<Path>>(path: P, dedup_tolerance_ms: f64) -> Result<Self, VfxError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let doc: VfxDocument = serde_json::from_str(&text)?;
        info!(
            "Loaded VFX document '{}' ({} difficulties).",
            path.as_ref().display(),
            doc.difficulties.len()
        );
        Ok(Self::from_document(doc, dedup_tolerance_ms))
    }

    pub fn insert(&mut self, set: VfxPropertySet) {
        self.sets.insert(difficulty_key(set.difficulty()), Rc::new(set));
    }

    /// Selects the set for `difficulty`. An unknown difficulty clears the
    /// selection, which callers treat as "no effects".
    pub fn select(&mut self, difficulty: &str) -> bool {
        let key = difficulty_key(difficulty);
        if self.sets.contains_key(&key) {
            self.current = Some(key);
            true
        } else {
            debug!("No VFX authored for difficulty '{difficulty}'.");
            self.current = None;
            false
        }
    }

    pub fn current_set(&self) -> Option<Rc<VfxPropertySet>> {
        self.current.as_ref().and_then(|k| self.sets.get(k)).cloned()
    }

    pub fn difficulties(&self) -> impl Iterator<Item = &str> {
        self.sets.values().map(|s| s.difficulty())
    }
}

#[cfg(test)]
mod tests {
    use super::{VfxLibrary, builtin_default};
    use crate::ui::color;
    use crate::vfx::value::VfxValue;

    const DOC: &str = r##"{
        "difficulties": {
            "Hard": {
                "defaults": { "camera.zoom": 1.5, "beatFlash.enabled": true },
                "properties": {
                    "camera.rotateZ": [
                        { "timeMs": 2000, "value": 90, "easing": { "curve": "cubic", "style": "inOut" } },
                        { "timeMs": 1000, "value": 45 }
                    ],
                    "notes.colors.2": [ { "timeMs": 500, "value": "#ffffff" } ],
                    "background.gradient": [
                        { "timeMs": 0, "value": { "type": "sweep", "stops": [
                            { "position": 0, "color": "#000000" },
                            { "position": 1, "color": "#202020" } ] } }
                    ]
                }
            },
            "easy": {}
        }
    }"##;

    #[test]
    fn selects_sets_case_insensitively() {
        let mut lib = VfxLibrary::from_json(DOC).expect("document should parse");
        assert!(lib.current_set().is_none(), "nothing selected yet");
        assert!(lib.select("hard"));
        let set = lib.current_set().expect("hard selected");
        assert_eq!(set.difficulty(), "Hard");
        assert!(lib.select("EASY"));
        assert!(lib.current_set().expect("easy").is_empty());
        assert!(!lib.select("expert"));
        assert!(lib.current_set().is_none(), "unknown difficulty means no effects");
    }

    #[test]
    fn defaults_come_from_document_then_builtins() {
        let mut lib = VfxLibrary::from_json(DOC).expect("parse");
        lib.select("hard");
        let set = lib.current_set().expect("set");
        assert_eq!(set.get("camera.zoom").expect("zoom").default_value(), &VfxValue::Number(1.5));
        let rot = set.get("camera.rotateZ").expect("rotateZ");
        assert_eq!(rot.default_value(), &VfxValue::Number(0.0));
        assert_eq!(rot.keyframes()[0].time_ms, 1000.0, "unsorted input is sorted on load");
        let lane2 = set.get("notes.colors.2").expect("lane color");
        assert_eq!(lane2.default_value(), &VfxValue::Color(color::lane_rgba(1)));
    }

    #[test]
    fn builtins_cover_lane_paths() {
        assert_eq!(builtin_default("notes.colors.1"), Some(VfxValue::Color(color::lane_rgba(0))));
        assert_eq!(builtin_default("notes.colors.0"), None, "lane paths are 1-based");
        assert_eq!(builtin_default("lanes.3.opacity"), Some(VfxValue::Number(1.0)));
        assert_eq!(builtin_default("does.not.exist"), None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(VfxLibrary::from_json("{ \"difficulties\": 3 }").is_err());
    }
}
