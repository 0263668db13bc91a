use serde_json::Value;
use tokio::task::JoinHandle;

use crate::render::Visual;

/// Reserved prefix marking a property as externally visible and persistable.
/// Everything else on a visual is rendering-engine internal.
pub const PROPERTY_PREFIX: &str = "cg_";

pub const DEFAULT_ON_AIR_TIMER_INTERVAL_MS: u64 = 10_000;

pub fn is_visible_property(name: &str) -> bool {
    name.starts_with(PROPERTY_PREFIX)
}

/// A single controllable on-air item bound to a template.
///
/// Mutated only through [`crate::show::Show`], which enforces the group
/// exclusivity invariant and arms the auto-off timer.
pub struct Graphic {
    name: String,
    template: String,
    group: String,
    on_air: bool,
    on_air_timer_enabled: bool,
    on_air_timer_interval: u64,
    timer_epoch: u64,
    timer_task: Option<JoinHandle<()>>,
    property_names: Vec<String>,
    visual: Option<Box<dyn Visual>>,
    pending_properties: Vec<(String, Value)>,
}

impl Graphic {
    pub fn new(
        name: &str,
        template: &str,
        property_names: Vec<String>,
        visual: Option<Box<dyn Visual>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            group: String::new(),
            on_air: false,
            on_air_timer_enabled: false,
            on_air_timer_interval: DEFAULT_ON_AIR_TIMER_INTERVAL_MS,
            timer_epoch: 0,
            timer_task: None,
            property_names,
            visual,
            pending_properties: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn set_group(&mut self, group: &str) {
        self.group = group.to_string();
    }

    pub fn is_on_air(&self) -> bool {
        self.on_air
    }

    pub fn on_air_timer_enabled(&self) -> bool {
        self.on_air_timer_enabled
    }

    /// Returns false when the flag is unchanged. Arming or cancelling the
    /// countdown is up to the caller.
    pub fn set_on_air_timer_enabled(&mut self, enabled: bool) -> bool {
        if self.on_air_timer_enabled == enabled {
            return false;
        }
        self.on_air_timer_enabled = enabled;
        true
    }

    pub fn on_air_timer_interval(&self) -> u64 {
        self.on_air_timer_interval
    }

    /// Changes apply to the next activation; a running countdown is never
    /// rescheduled.
    pub fn set_on_air_timer_interval(&mut self, ms: u64) {
        self.on_air_timer_interval = ms;
    }

    /// Records the new on-air state and forwards it to the visual backing if
    /// one is ready. Going off-air always cancels a pending countdown.
    pub fn apply_on_air(&mut self, state: bool) {
        self.on_air = state;

        if !state {
            self.cancel_timer();
        }

        if let Some(visual) = &mut self.visual {
            if visual.is_ready() {
                visual.set_on_air(state);
            }
        }
    }

    pub fn timer_epoch(&self) -> u64 {
        self.timer_epoch
    }

    /// Starts a new timer activation, invalidating elapsed events from any
    /// previous one.
    pub fn bump_timer_epoch(&mut self) -> u64 {
        self.cancel_timer();
        self.timer_epoch += 1;
        self.timer_epoch
    }

    pub fn set_timer_task(&mut self, task: JoinHandle<()>) {
        self.timer_task = Some(task);
    }

    pub fn cancel_timer(&mut self) {
        if let Some(task) = self.timer_task.take() {
            task.abort();
        }
    }

    /// Writes a property through to the visual, or buffers it until the
    /// backing becomes ready. Keys without the reserved prefix get it
    /// prepended.
    pub fn set_graphics_property(&mut self, name: &str, value: Value) {
        if name.is_empty() {
            return;
        }

        let key = if is_visible_property(name) {
            name.to_string()
        } else {
            format!("{PROPERTY_PREFIX}{name}")
        };

        match &mut self.visual {
            Some(visual) if visual.is_ready() => visual.set_property(&key, value),
            _ => self.pending_properties.push((key, value)),
        }
    }

    /// Flushes buffered property writes, in original order, exactly once the
    /// visual backing reports readiness.
    pub fn visual_ready(&mut self) {
        let Some(visual) = &mut self.visual else {
            log::warn!("graphic '{}' reported ready without a visual backing", self.name);
            return;
        };

        // Sync the backing to whatever state the graphic reached while it
        // was still loading.
        visual.set_on_air(self.on_air);

        for (name, value) in self.pending_properties.drain(..) {
            visual.set_property(&name, value);
        }
    }

    /// Visible properties only, restricted to the identifiers discovered in
    /// the template scan.
    pub fn properties(&self) -> Vec<(String, Value)> {
        self.property_names
            .iter()
            .filter(|name| is_visible_property(name))
            .map(|name| {
                let value = match &self.visual {
                    Some(visual) if visual.is_ready() => {
                        visual.property(name).unwrap_or(Value::Null)
                    }
                    _ => self
                        .pending_properties
                        .iter()
                        .rev()
                        .find(|(pending, _)| pending == name)
                        .map(|(_, value)| value.clone())
                        .unwrap_or(Value::Null),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl Drop for Graphic {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
