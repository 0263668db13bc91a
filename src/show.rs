use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    config::Paths,
    error::ShowError,
    model::{
        GraphicRecord, PropertyRecord, ShowFile,
        graphic::Graphic,
    },
    protocol::{GraphicProperties, PropertyEntry},
    render::{RenderBackend, scan_template_properties},
};

/// Sent by an auto-off countdown back into the serialized dispatch loop.
/// The epoch ties the event to one timer activation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFired {
    pub graphic: String,
    pub epoch: u64,
}

/// The active named collection of graphics, persisted as one snapshot file.
///
/// Only one show exists at a time and all mutation goes through the
/// controller task, so nothing here needs its own locking.
pub struct Show {
    path: PathBuf,
    paths: Paths,
    graphics: BTreeMap<String, Graphic>,
    renderer: Arc<dyn RenderBackend>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
}

impl Show {
    pub fn create(
        path: PathBuf,
        paths: Paths,
        renderer: Arc<dyn RenderBackend>,
        timer_tx: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        Self {
            path,
            paths,
            graphics: BTreeMap::new(),
            renderer,
            timer_tx,
        }
    }

    /// Loads a snapshot file leniently: an unrecognized root container or a
    /// malformed graphic entry is skipped with a warning, never a failure.
    pub fn load(
        path: PathBuf,
        paths: Paths,
        renderer: Arc<dyn RenderBackend>,
        timer_tx: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        let mut show = Show::create(path, paths, renderer, timer_tx);

        let content = match std::fs::read_to_string(&show.path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("failed to open show file {}: {}", show.path.display(), e);
                return show;
            }
        };

        let root: Value = match serde_json::from_str(&content) {
            Ok(root) => root,
            Err(e) => {
                log::warn!("failed to parse show file {}: {}", show.path.display(), e);
                return show;
            }
        };

        let Some(entries) = root.get("show").and_then(Value::as_array) else {
            log::warn!("{} is not a show file", show.path.display());
            return show;
        };

        for entry in entries {
            match serde_json::from_value::<GraphicRecord>(entry.clone()) {
                Ok(record) => show.load_graphic(record),
                Err(e) => {
                    log::warn!(
                        "skipping malformed graphic entry in {}: {}",
                        show.path.display(),
                        e
                    );
                }
            }
        }

        show
    }

    fn load_graphic(&mut self, record: GraphicRecord) {
        if let Err(e) = self.create_graphic(&record.name, &record.template) {
            log::warn!("skipping graphic from show file: {}", e);
            return;
        }

        self.set_graphic_timer_interval(&record.name, record.on_air_timer_interval);
        self.set_graphic_timer_enabled(&record.name, record.on_air_timer_enabled);

        if let Some(graphic) = self.graphics.get_mut(&record.name) {
            graphic.set_group(&record.group);
        }

        for property in record.properties {
            self.set_graphic_property(&record.name, &property.name, property.value);
        }
    }

    /// The snapshot file name doubles as the show's external key.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn graphics(&self) -> Vec<String> {
        self.graphics.keys().cloned().collect()
    }

    pub fn contains_graphic(&self, name: &str) -> bool {
        self.graphics.contains_key(name)
    }

    pub fn create_graphic(&mut self, name: &str, template: &str) -> Result<(), ShowError> {
        if name.is_empty() {
            return Err(ShowError::InvalidName);
        }
        if self.graphics.contains_key(name) {
            return Err(ShowError::DuplicateName(name.to_string()));
        }

        let template_path = self.paths.template_file(template);
        let property_names = scan_template_properties(&template_path);

        let visual = match self.renderer.load_visual(name, &template_path) {
            Ok(visual) => Some(visual),
            Err(e) => {
                log::warn!(
                    "failed to load template '{}' for graphic '{}': {:#}",
                    template,
                    name,
                    e
                );
                None
            }
        };

        self.graphics
            .insert(name.to_string(), Graphic::new(name, template, property_names, visual));
        Ok(())
    }

    pub fn remove_graphic(&mut self, name: &str) -> bool {
        self.graphics.remove(name).is_some()
    }

    pub fn is_graphic_on_air(&self, name: &str) -> bool {
        self.graphics
            .get(name)
            .is_some_and(Graphic::is_on_air)
    }

    /// Changes a graphic's on-air state, forcing every other live graphic in
    /// the same non-empty group off air first. Returns each transition in
    /// the order it became observable so callers can broadcast them all;
    /// unknown names and no-op transitions return an empty list.
    pub fn set_graphic_on_air(&mut self, name: &str, state: bool) -> Vec<(String, bool)> {
        let Some(graphic) = self.graphics.get(name) else {
            return Vec::new();
        };
        if graphic.is_on_air() == state {
            return Vec::new();
        }

        let mut changes = Vec::new();

        if state {
            let group = graphic.group().to_string();
            if !group.is_empty() {
                for other in self.on_air_group_members(&group, name) {
                    self.apply_on_air(&other, false);
                    changes.push((other, false));
                }
            }
        }

        self.apply_on_air(name, state);
        changes.push((name.to_string(), state));
        changes
    }

    fn on_air_group_members(&self, group: &str, except: &str) -> Vec<String> {
        self.graphics
            .iter()
            .filter(|(name, graphic)| {
                name.as_str() != except && graphic.group() == group && graphic.is_on_air()
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn apply_on_air(&mut self, name: &str, state: bool) {
        let Some(graphic) = self.graphics.get_mut(name) else {
            return;
        };
        graphic.apply_on_air(state);
        if state && graphic.on_air_timer_enabled() {
            self.arm_timer(name);
        }
    }

    fn arm_timer(&mut self, name: &str) {
        let Some(graphic) = self.graphics.get_mut(name) else {
            return;
        };

        let epoch = graphic.bump_timer_epoch();
        let interval = Duration::from_millis(graphic.on_air_timer_interval());
        let timer_tx = self.timer_tx.clone();
        let graphic_name = name.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = timer_tx.send(TimerFired {
                graphic: graphic_name,
                epoch,
            });
        });
        graphic.set_timer_task(task);
    }

    /// Handles an elapsed auto-off countdown through the same path as an
    /// external command. Stale activations are ignored.
    pub fn timer_elapsed(&mut self, fired: &TimerFired) -> Vec<(String, bool)> {
        let Some(graphic) = self.graphics.get(&fired.graphic) else {
            return Vec::new();
        };
        if !graphic.is_on_air() || graphic.timer_epoch() != fired.epoch {
            return Vec::new();
        }
        self.set_graphic_on_air(&fired.graphic, false)
    }

    pub fn set_graphic_timer_enabled(&mut self, name: &str, enabled: bool) {
        let Some(graphic) = self.graphics.get_mut(name) else {
            return;
        };
        if !graphic.set_on_air_timer_enabled(enabled) {
            return;
        }

        if !enabled {
            // Cancels the countdown without forcing the graphic off air.
            graphic.cancel_timer();
        } else if graphic.is_on_air() {
            self.arm_timer(name);
        }
    }

    pub fn set_graphic_timer_interval(&mut self, name: &str, ms: u64) {
        if let Some(graphic) = self.graphics.get_mut(name) {
            graphic.set_on_air_timer_interval(ms);
        }
    }

    /// Reassigning a group can put two live graphics in the same group; the
    /// newest assignment wins and the others are forced off air. Returns the
    /// forced transitions.
    pub fn set_graphic_group(&mut self, name: &str, group: &str) -> Vec<(String, bool)> {
        let Some(graphic) = self.graphics.get_mut(name) else {
            return Vec::new();
        };
        graphic.set_group(group);

        if group.is_empty() || !graphic.is_on_air() {
            return Vec::new();
        }

        let mut changes = Vec::new();
        for other in self.on_air_group_members(group, name) {
            self.apply_on_air(&other, false);
            changes.push((other, false));
        }
        changes
    }

    pub fn set_graphic_property(&mut self, name: &str, key: &str, value: Value) {
        if let Some(graphic) = self.graphics.get_mut(name) {
            graphic.set_graphics_property(key, value);
        }
    }

    pub fn graphic_properties(&self, name: &str) -> Option<GraphicProperties> {
        let graphic = self.graphics.get(name)?;
        Some(GraphicProperties {
            name: name.to_string(),
            on_air_timer_enabled: graphic.on_air_timer_enabled(),
            on_air_timer_interval: graphic.on_air_timer_interval(),
            group: graphic.group().to_string(),
            properties: graphic
                .properties()
                .into_iter()
                .map(|(name, value)| PropertyEntry { name, value })
                .collect(),
        })
    }

    pub fn visual_ready(&mut self, name: &str) {
        if let Some(graphic) = self.graphics.get_mut(name) {
            graphic.visual_ready();
        }
    }

    /// Writes the snapshot. A serialization or filesystem error is logged
    /// and the operation abandoned; in-memory state is unaffected.
    pub fn save(&self) {
        let file = ShowFile {
            show: self
                .graphics
                .values()
                .map(|graphic| GraphicRecord {
                    name: graphic.name().to_string(),
                    template: graphic.template().to_string(),
                    on_air_timer_enabled: graphic.on_air_timer_enabled(),
                    on_air_timer_interval: graphic.on_air_timer_interval(),
                    group: graphic.group().to_string(),
                    properties: graphic
                        .properties()
                        .into_iter()
                        .map(|(name, value)| PropertyRecord { name, value })
                        .collect(),
                })
                .collect(),
        };

        let content = match serde_json::to_string_pretty(&file) {
            Ok(content) => content,
            Err(e) => {
                log::error!("failed to serialize show '{}': {}", self.name(), e);
                return;
            }
        };

        if let Err(e) = std::fs::write(&self.path, content) {
            log::error!("failed to write show file {}: {}", self.path.display(), e);
        } else {
            log::info!("show saved to {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessRenderer;
    use serde_json::json;

    struct Fixture {
        paths: Paths,
        dir: PathBuf,
        timer_rx: mpsc::UnboundedReceiver<TimerFired>,
        timer_tx: mpsc::UnboundedSender<TimerFired>,
        renderer: Arc<dyn RenderBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("cgcontrol-show-{}", uuid::Uuid::new_v4()));
            let paths = Paths::init(&dir).unwrap();
            std::fs::write(
                paths.template_file("lower.tmpl"),
                "item { title: cg_title subtitle: cg_subtitle }",
            )
            .unwrap();

            let (render_tx, _render_rx) = mpsc::unbounded_channel();
            let (timer_tx, timer_rx) = mpsc::unbounded_channel();
            Fixture {
                paths,
                dir,
                timer_rx,
                timer_tx,
                renderer: Arc::new(HeadlessRenderer::new(render_tx)),
            }
        }

        fn show(&self, file_name: &str) -> Show {
            Show::create(
                self.paths.show_file(file_name),
                self.paths.clone(),
                self.renderer.clone(),
                self.timer_tx.clone(),
            )
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    #[tokio::test]
    async fn create_graphic_validates_names() {
        let fixture = Fixture::new();
        let mut show = fixture.show("test.show");

        assert!(matches!(
            show.create_graphic("", "lower.tmpl"),
            Err(ShowError::InvalidName)
        ));

        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        assert!(matches!(
            show.create_graphic("Lower1", "lower.tmpl"),
            Err(ShowError::DuplicateName(_))
        ));

        assert_eq!(show.graphics(), vec!["Lower1".to_string()]);
    }

    #[tokio::test]
    async fn group_exclusivity_forces_others_off_air() {
        let fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.create_graphic("Lower2", "lower.tmpl").unwrap();
        show.set_graphic_group("Lower1", "Overlay");
        show.set_graphic_group("Lower2", "Overlay");

        let changes = show.set_graphic_on_air("Lower2", true);
        assert_eq!(changes, vec![("Lower2".to_string(), true)]);

        let changes = show.set_graphic_on_air("Lower1", true);
        assert_eq!(
            changes,
            vec![("Lower2".to_string(), false), ("Lower1".to_string(), true)]
        );

        assert!(show.is_graphic_on_air("Lower1"));
        assert!(!show.is_graphic_on_air("Lower2"));
    }

    #[tokio::test]
    async fn group_reassignment_enforces_invariant() {
        let fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.create_graphic("Lower2", "lower.tmpl").unwrap();
        show.set_graphic_group("Lower1", "Overlay");

        show.set_graphic_on_air("Lower1", true);
        show.set_graphic_on_air("Lower2", true);

        let changes = show.set_graphic_group("Lower2", "Overlay");
        assert_eq!(changes, vec![("Lower1".to_string(), false)]);
        assert!(show.is_graphic_on_air("Lower2"));
    }

    #[tokio::test]
    async fn toggle_twice_returns_to_off_with_timer_stopped() {
        let mut fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.set_graphic_timer_enabled("Lower1", true);
        show.set_graphic_timer_interval("Lower1", 10);

        show.set_graphic_on_air("Lower1", true);
        show.set_graphic_on_air("Lower1", false);
        assert!(!show.is_graphic_on_air("Lower1"));

        // The countdown was cancelled, so nothing fires.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fixture.timer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn timer_fires_through_the_dispatch_path() {
        let mut fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.set_graphic_timer_enabled("Lower1", true);
        show.set_graphic_timer_interval("Lower1", 10);

        show.set_graphic_on_air("Lower1", true);
        let fired = fixture.timer_rx.recv().await.unwrap();
        assert_eq!(fired.graphic, "Lower1");

        let changes = show.timer_elapsed(&fired);
        assert_eq!(changes, vec![("Lower1".to_string(), false)]);

        // A second delivery of the same activation is stale.
        assert!(show.timer_elapsed(&fired).is_empty());
    }

    #[tokio::test]
    async fn interval_change_does_not_reschedule_running_countdown() {
        let mut fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.set_graphic_timer_enabled("Lower1", true);
        show.set_graphic_timer_interval("Lower1", 20);
        show.set_graphic_on_air("Lower1", true);

        // Applies to the next activation only; the armed countdown keeps
        // its original deadline.
        show.set_graphic_timer_interval("Lower1", 60_000);

        let fired = tokio::time::timeout(Duration::from_millis(500), fixture.timer_rx.recv())
            .await
            .expect("countdown kept its original deadline")
            .unwrap();
        assert_eq!(fired.graphic, "Lower1");
        assert_eq!(
            show.timer_elapsed(&fired),
            vec![("Lower1".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn enabling_timer_while_on_air_arms_it() {
        let mut fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.set_graphic_timer_interval("Lower1", 10);

        show.set_graphic_on_air("Lower1", true);
        assert!(fixture.timer_rx.try_recv().is_err());

        show.set_graphic_timer_enabled("Lower1", true);

        let fired = fixture.timer_rx.recv().await.unwrap();
        assert_eq!(fired.graphic, "Lower1");
        assert_eq!(
            show.timer_elapsed(&fired),
            vec![("Lower1".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn disabling_timer_cancels_without_forcing_off_air() {
        let mut fixture = Fixture::new();
        let mut show = fixture.show("test.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.set_graphic_timer_enabled("Lower1", true);
        show.set_graphic_timer_interval("Lower1", 10);
        show.set_graphic_on_air("Lower1", true);

        show.set_graphic_timer_enabled("Lower1", false);
        assert!(show.is_graphic_on_air("Lower1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fixture.timer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let fixture = Fixture::new();
        let mut show = fixture.show("roundtrip.show");
        show.create_graphic("Lower1", "lower.tmpl").unwrap();
        show.set_graphic_timer_enabled("Lower1", true);
        show.set_graphic_timer_interval("Lower1", 5000);
        show.set_graphic_group("Lower1", "Overlay");
        show.set_graphic_property("Lower1", "cg_title", json!("Hello"));
        show.create_graphic("Bug", "lower.tmpl").unwrap();
        show.save();

        let loaded = Show::load(
            fixture.paths.show_file("roundtrip.show"),
            fixture.paths.clone(),
            fixture.renderer.clone(),
            fixture.timer_tx.clone(),
        );

        assert_eq!(loaded.graphics(), vec!["Bug".to_string(), "Lower1".to_string()]);
        let properties = loaded.graphic_properties("Lower1").unwrap();
        assert!(properties.on_air_timer_enabled);
        assert_eq!(properties.on_air_timer_interval, 5000);
        assert_eq!(properties.group, "Overlay");
        assert!(properties
            .properties
            .iter()
            .any(|entry| entry.name == "cg_title" && entry.value == json!("Hello")));
    }

    #[tokio::test]
    async fn load_skips_malformed_entries() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.paths.show_file("partial.show"),
            r#"{"show": [
                {"name": "Good", "template": "lower.tmpl"},
                {"template": "lower.tmpl"},
                42
            ]}"#,
        )
        .unwrap();

        let loaded = Show::load(
            fixture.paths.show_file("partial.show"),
            fixture.paths.clone(),
            fixture.renderer.clone(),
            fixture.timer_tx.clone(),
        );
        assert_eq!(loaded.graphics(), vec!["Good".to_string()]);
    }

    #[tokio::test]
    async fn load_tolerates_unknown_root() {
        let fixture = Fixture::new();
        std::fs::write(fixture.paths.show_file("odd.show"), r#"{"schedule": []}"#).unwrap();

        let loaded = Show::load(
            fixture.paths.show_file("odd.show"),
            fixture.paths.clone(),
            fixture.renderer.clone(),
            fixture.timer_tx.clone(),
        );
        assert!(loaded.graphics().is_empty());
    }
}
