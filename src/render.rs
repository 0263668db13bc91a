use std::{collections::HashMap, path::Path, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::model::graphic::PROPERTY_PREFIX;

/// Events from the rendering engine back into the serialized dispatch loop.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    VisualReady { graphic: String },
}

/// One on-screen instance of a template. Property writes may arrive before
/// the instance has finished loading; `is_ready` gates them.
pub trait Visual: Send {
    fn is_ready(&self) -> bool;
    fn set_property(&mut self, name: &str, value: Value);
    fn property(&self, name: &str) -> Option<Value>;
    fn set_on_air(&mut self, on_air: bool);
}

/// The rendering engine boundary. A real engine instantiates templates
/// asynchronously and reports readiness through the event channel.
pub trait RenderBackend: Send + Sync {
    fn load_visual(&self, graphic: &str, template_path: &Path) -> anyhow::Result<Box<dyn Visual>>;
}

static PROPERTY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bcg_[A-Za-z0-9_]+").expect("property pattern compiles"));

/// Statically scans a template file for the namespaced property identifiers
/// it declares. This fixes the set of visible properties for a graphic; it
/// is a discovery step, not a live binding.
pub fn scan_template_properties(path: &Path) -> Vec<String> {
    if !path.exists() {
        return Vec::new();
    }

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("failed to open template {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = Vec::new();

    for found in PROPERTY_PATTERN.find_iter(&text) {
        let name = found.as_str();
        if !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
    }

    names
}

/// Default backend for running without a real rendering engine. Visuals are
/// ready as soon as they load and hold their properties in memory.
pub struct HeadlessRenderer {
    event_tx: mpsc::UnboundedSender<RenderEvent>,
}

impl HeadlessRenderer {
    pub fn new(event_tx: mpsc::UnboundedSender<RenderEvent>) -> Self {
        Self { event_tx }
    }
}

impl RenderBackend for HeadlessRenderer {
    fn load_visual(&self, graphic: &str, template_path: &Path) -> anyhow::Result<Box<dyn Visual>> {
        if !template_path.is_file() {
            anyhow::bail!("template {} does not exist", template_path.display());
        }

        let _ = self.event_tx.send(RenderEvent::VisualReady {
            graphic: graphic.to_string(),
        });

        Ok(Box::new(HeadlessVisual::default()))
    }
}

#[derive(Default)]
pub struct HeadlessVisual {
    on_air: bool,
    properties: HashMap<String, Value>,
}

impl HeadlessVisual {
    pub fn is_on_air(&self) -> bool {
        self.on_air
    }
}

impl Visual for HeadlessVisual {
    fn is_ready(&self) -> bool {
        true
    }

    fn set_property(&mut self, name: &str, value: Value) {
        self.properties.insert(name.to_string(), value);
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn set_on_air(&mut self, on_air: bool) {
        self.on_air = on_air;
        log::debug!("headless visual state: {}", if on_air { "onAir" } else { "offAir" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_prefixed_identifiers_once() {
        let dir = std::env::temp_dir().join(format!("cgcontrol-scan-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lower.tmpl");
        std::fs::write(
            &path,
            "item {\n  title: cg_title\n  subtitle: cg_subtitle\n  bind: cg_title\n  internal: frame_count\n}\n",
        )
        .unwrap();

        let names = scan_template_properties(&path);
        assert_eq!(names, vec!["cg_title".to_string(), "cg_subtitle".to_string()]);
        assert!(names.iter().all(|name| name.starts_with(PROPERTY_PREFIX)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn scan_of_missing_template_is_empty() {
        let path = std::env::temp_dir().join("cgcontrol-no-such-template.tmpl");
        assert!(scan_template_properties(&path).is_empty());
    }

    #[test]
    fn headless_visual_tracks_state_and_properties() {
        let mut visual = HeadlessVisual::default();
        assert!(visual.is_ready());
        assert!(!visual.is_on_air());

        visual.set_on_air(true);
        assert!(visual.is_on_air());

        visual.set_property("cg_title", serde_json::json!("Hello"));
        assert_eq!(visual.property("cg_title"), Some(serde_json::json!("Hello")));
        assert_eq!(visual.property("cg_missing"), None);
    }
}
