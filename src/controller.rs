use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    config::{Paths, SHOW_FILE_EXTENSION, is_safe_file_name},
    event::Notification,
    model::ShowFile,
    protocol::{CreateGraphicData, Envelope, GraphicProperties, ShowList},
    render::{RenderBackend, RenderEvent},
    show::{Show, TimerFired},
};

#[derive(Debug)]
pub enum ServerCommand {
    Connected {
        conn: Uuid,
        outbound: mpsc::UnboundedSender<String>,
    },
    Disconnected {
        conn: Uuid,
    },
    Request {
        conn: Uuid,
        envelope: Envelope,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

type Handler = fn(&mut ShowController, Uuid, Option<Value>);

/// The single serialized owner of the current show. Every mutation path —
/// client commands, auto-off timers, render readiness — arrives here as a
/// message, so one command handler always runs to completion before the
/// next begins.
pub struct ShowController {
    paths: Paths,
    renderer: Arc<dyn RenderBackend>,
    command_rx: mpsc::Receiver<ServerCommand>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    render_rx: mpsc::UnboundedReceiver<RenderEvent>,
    connections: HashMap<Uuid, mpsc::UnboundedSender<String>>,
    handlers: HashMap<&'static str, Handler>,
    current: Option<Show>,
}

impl ShowController {
    pub fn new(
        paths: Paths,
        renderer: Arc<dyn RenderBackend>,
        command_rx: mpsc::Receiver<ServerCommand>,
        render_rx: mpsc::UnboundedReceiver<RenderEvent>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Self {
            paths,
            renderer,
            command_rx,
            timer_tx,
            timer_rx,
            render_rx,
            connections: HashMap::new(),
            handlers: Self::handler_table(),
            current: None,
        }
    }

    fn handler_table() -> HashMap<&'static str, Handler> {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("list graphics", Self::handle_list_graphics);
        handlers.insert("toggle state", Self::handle_toggle_state);
        handlers.insert("list templates", Self::handle_list_templates);
        handlers.insert("create graphic", Self::handle_create_graphic);
        handlers.insert("get properties", Self::handle_get_properties);
        handlers.insert("set graphic properties", Self::handle_set_graphic_properties);
        handlers.insert("remove graphic", Self::handle_remove_graphic);
        handlers.insert("list shows", Self::handle_list_shows);
        handlers.insert("create show", Self::handle_create_show);
        handlers.insert("change current show", Self::handle_change_current_show);
        handlers.insert("remove show", Self::handle_remove_show);
        handlers
    }

    pub async fn run(mut self) {
        log::info!("ShowController run loop started.");

        // Pick up where the last session left off, if any show exists.
        if self.current.is_none() {
            if let Some(first) = self.paths.list_shows().into_iter().next() {
                self.set_current_show(&first);
            }
        }

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    match command {
                        ServerCommand::Connected { conn, outbound } => {
                            log::info!("client {} connected", conn);
                            self.connections.insert(conn, outbound);
                        }
                        ServerCommand::Disconnected { conn } => {
                            log::info!("client {} disconnected", conn);
                            self.connections.remove(&conn);
                        }
                        ServerCommand::Request { conn, envelope } => {
                            self.dispatch(conn, envelope);
                        }
                        ServerCommand::Shutdown { done } => {
                            if let Some(show) = &self.current {
                                show.save();
                            }
                            let _ = done.send(());
                            break;
                        }
                    }
                },
                Some(fired) = self.timer_rx.recv() => {
                    if let Some(show) = self.current.as_mut() {
                        let changes = show.timer_elapsed(&fired);
                        self.broadcast_state_changes(changes);
                    }
                },
                Some(event) = self.render_rx.recv() => {
                    let RenderEvent::VisualReady { graphic } = event;
                    if let Some(show) = self.current.as_mut() {
                        show.visual_ready(&graphic);
                    }
                },
                else => break,
            }
        }
        log::info!("ShowController run loop finished.");
    }

    /// Pure lookup-and-invoke; an unknown command name is a no-op.
    fn dispatch(&mut self, conn: Uuid, envelope: Envelope) {
        log::debug!("dispatching '{}' from client {}", envelope.command, conn);

        let Some(&handler) = self.handlers.get(envelope.command.as_str()) else {
            log::debug!("no handler bound for command '{}'", envelope.command);
            return;
        };
        handler(self, conn, envelope.data);
    }

    fn handle_list_graphics(&mut self, conn: Uuid, _data: Option<Value>) {
        let Some(show) = &self.current else {
            return;
        };
        self.send_to(conn, &Notification::Graphics(show.graphics()));
    }

    fn handle_toggle_state(&mut self, _conn: Uuid, data: Option<Value>) {
        let Some(name) = string_data(data) else {
            log::warn!("invalid toggle state command");
            return;
        };
        let Some(show) = self.current.as_mut() else {
            return;
        };

        let state = !show.is_graphic_on_air(&name);
        let changes = show.set_graphic_on_air(&name, state);
        self.broadcast_state_changes(changes);
    }

    fn handle_list_templates(&mut self, conn: Uuid, _data: Option<Value>) {
        self.send_to(conn, &Notification::Templates(self.paths.list_templates()));
    }

    fn handle_create_graphic(&mut self, _conn: Uuid, data: Option<Value>) {
        let request: CreateGraphicData = match data.map(serde_json::from_value) {
            Some(Ok(request)) => request,
            _ => {
                log::warn!("create graphic data is not a valid object");
                return;
            }
        };

        if request.name.is_empty()
            || request.template.is_empty()
            || !is_safe_file_name(&request.template)
        {
            log::warn!("invalid create graphic command");
            return;
        }

        let Some(show) = self.current.as_mut() else {
            return;
        };

        match show.create_graphic(&request.name, &request.template) {
            Ok(()) => self.broadcast(&Notification::GraphicAdded(request.name)),
            Err(e) => log::warn!("create graphic failed: {}", e),
        }
    }

    fn handle_get_properties(&mut self, conn: Uuid, data: Option<Value>) {
        let Some(name) = string_data(data) else {
            return;
        };
        let Some(show) = &self.current else {
            return;
        };

        // An unknown graphic yields no response at all.
        if let Some(properties) = show.graphic_properties(&name) {
            self.send_to(conn, &Notification::GraphicProperties(properties));
        }
    }

    fn handle_set_graphic_properties(&mut self, _conn: Uuid, data: Option<Value>) {
        let request: GraphicProperties = match data.map(serde_json::from_value) {
            Some(Ok(request)) => request,
            _ => {
                log::warn!("set graphic properties data is not a valid object");
                return;
            }
        };

        let Some(show) = self.current.as_mut() else {
            return;
        };
        if !show.contains_graphic(&request.name) {
            return;
        }

        // Interval first: enabling while on air arms a countdown immediately,
        // and it should pick up the interval from this same request.
        show.set_graphic_timer_interval(&request.name, request.on_air_timer_interval);
        show.set_graphic_timer_enabled(&request.name, request.on_air_timer_enabled);
        let changes = show.set_graphic_group(&request.name, &request.group);

        for property in request.properties {
            show.set_graphic_property(&request.name, &property.name, property.value);
        }

        self.broadcast_state_changes(changes);
    }

    fn handle_remove_graphic(&mut self, _conn: Uuid, data: Option<Value>) {
        let Some(name) = string_data(data) else {
            log::warn!("invalid remove graphic command");
            return;
        };
        let Some(show) = self.current.as_mut() else {
            return;
        };

        if show.remove_graphic(&name) {
            self.broadcast(&Notification::GraphicRemoved(name));
        }
    }

    fn handle_list_shows(&mut self, conn: Uuid, _data: Option<Value>) {
        self.send_to(conn, &Notification::Shows(self.show_list()));
    }

    fn handle_create_show(&mut self, _conn: Uuid, data: Option<Value>) {
        let Some(name) = string_data(data) else {
            return;
        };
        if !is_safe_file_name(&name) {
            log::warn!("rejecting unsafe show name '{}'", name);
            return;
        }
        self.create_show(&name);
    }

    fn handle_change_current_show(&mut self, _conn: Uuid, data: Option<Value>) {
        let Some(name) = string_data(data) else {
            return;
        };
        if !is_safe_file_name(&name) {
            log::warn!("rejecting unsafe show name '{}'", name);
            return;
        }
        self.set_current_show(&name);
    }

    fn handle_remove_show(&mut self, _conn: Uuid, data: Option<Value>) {
        let Some(name) = string_data(data) else {
            return;
        };
        if !is_safe_file_name(&name) {
            log::warn!("rejecting unsafe show name '{}'", name);
            return;
        }

        let path = self.paths.show_file(&name);
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("failed to remove show file {}: {}", path.display(), e);
            return;
        }

        let was_current = self
            .current
            .as_ref()
            .is_some_and(|show| show.name() == name);
        if was_current {
            self.current = None;
            if let Some(next) = self.paths.list_shows().into_iter().next() {
                // Broadcasts the new list as part of the switch.
                self.set_current_show(&next);
                return;
            }
        }

        self.broadcast(&Notification::Shows(self.show_list()));
    }

    /// Creates an empty snapshot and activates it. Fails silently if a show
    /// of that name already exists on disk.
    fn create_show(&mut self, name: &str) {
        let file_name = format!("{name}.{SHOW_FILE_EXTENSION}");
        let path = self.paths.show_file(&file_name);
        if path.exists() {
            return;
        }

        let content = match serde_json::to_string_pretty(&ShowFile::default()) {
            Ok(content) => content,
            Err(e) => {
                log::error!("failed to serialize empty show: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, content) {
            log::error!("failed to create show file {}: {}", path.display(), e);
            return;
        }

        self.set_current_show(&file_name);
    }

    /// Atomic replace-and-persist-old: the outgoing show's full state is
    /// saved before the new one is loaded.
    fn set_current_show(&mut self, name: &str) {
        let path = self.paths.show_file(name);
        if !path.is_file() {
            log::warn!("show file {} does not exist", path.display());
            return;
        }

        if let Some(old) = self.current.take() {
            old.save();
        }

        let show = Show::load(
            path,
            self.paths.clone(),
            self.renderer.clone(),
            self.timer_tx.clone(),
        );
        log::info!("current show changed to '{}'", show.name());
        self.current = Some(show);

        self.broadcast(&Notification::Shows(self.show_list()));
    }

    fn show_list(&self) -> ShowList {
        ShowList {
            current: self.current.as_ref().map(Show::name),
            shows: self.paths.list_shows(),
        }
    }

    fn send_to(&self, conn: Uuid, notification: &Notification) {
        let Some(outbound) = self.connections.get(&conn) else {
            return;
        };
        let _ = outbound.send(notification.encode());
    }

    /// Fans a notification out to every connection, including whichever one
    /// issued the originating command. A send failure just means that
    /// writer task is already gone.
    fn broadcast(&self, notification: &Notification) {
        let line = notification.encode();
        for outbound in self.connections.values() {
            let _ = outbound.send(line.clone());
        }
    }

    fn broadcast_state_changes(&self, changes: Vec<(String, bool)>) {
        for (graphic, state) in changes {
            self.broadcast(&Notification::GraphicStateChanged { graphic, state });
        }
    }
}

fn string_data(data: Option<Value>) -> Option<String> {
    match data {
        Some(Value::String(name)) if !name.is_empty() => Some(name),
        _ => None,
    }
}
