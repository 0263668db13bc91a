use std::collections::HashMap;

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
};

use crate::protocol::{self, CreateGraphicData, Envelope, GraphicProperties, ShowList, StateChange};

/// What a control surface built on [`ServerConnection`] reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    GraphicListChanged(Vec<String>),
    TemplateListReceived(Vec<String>),
    GraphicPropertiesReceived(GraphicProperties),
    GraphicAdded(String),
    GraphicRemoved(String),
    GraphicStateChanged { graphic: String, state: bool },
    ShowListReceived { shows: Vec<String>, current: String },
    ConnectionClosed { reason: Option<String> },
}

type Handler = fn(&mut MirrorState, Option<Value>);

struct MirrorState {
    current_show: String,
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// One connection to the server: sends commands, reacts to pushed
/// notifications, and keeps a cached view of the current show name.
///
/// The server pushes no initial snapshot; call the `fetch_*` methods after
/// connecting to populate a view.
pub struct ServerConnection {
    outbound: mpsc::UnboundedSender<String>,
}

impl ServerConnection {
    pub async fn connect(
        addr: &str,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let socket = TcpStream::connect(addr).await?;
        let (reader, mut writer) = socket.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ClientEvent>();

        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    log::warn!("server write failed: {}", e);
                    break;
                }
            }
        });

        let mut state = MirrorState {
            current_show: String::new(),
            outbound: outbound_tx.clone(),
            events: event_tx,
        };

        tokio::spawn(async move {
            let handlers = handler_table();
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match protocol::decode_line(&line) {
                            Ok(envelope) => dispatch(&handlers, &mut state, envelope),
                            Err(e) => log::warn!("dropping line from server: {}", e),
                        }
                    }
                    Ok(None) => {
                        let _ = state
                            .events
                            .send(ClientEvent::ConnectionClosed { reason: None });
                        break;
                    }
                    Err(e) => {
                        let _ = state.events.send(ClientEvent::ConnectionClosed {
                            reason: Some(e.to_string()),
                        });
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                outbound: outbound_tx,
            },
            event_rx,
        ))
    }

    fn send(&self, command: &str, data: Option<Value>) {
        let _ = self.outbound.send(protocol::encode_command(command, data));
    }

    pub fn fetch_graphic_list(&self) {
        self.send("list graphics", None);
    }

    pub fn toggle_graphic_on_air(&self, name: &str) {
        self.send("toggle state", Some(Value::String(name.to_string())));
    }

    pub fn fetch_template_list(&self) {
        self.send("list templates", None);
    }

    pub fn create_graphic(&self, name: &str, template: &str) {
        if let Ok(data) = serde_json::to_value(CreateGraphicData {
            name: name.to_string(),
            template: template.to_string(),
        }) {
            self.send("create graphic", Some(data));
        }
    }

    pub fn get_properties(&self, name: &str) {
        self.send("get properties", Some(Value::String(name.to_string())));
    }

    pub fn set_graphic_properties(&self, properties: &GraphicProperties) {
        if let Ok(data) = serde_json::to_value(properties) {
            self.send("set graphic properties", Some(data));
        }
    }

    pub fn remove_graphic(&self, name: &str) {
        self.send("remove graphic", Some(Value::String(name.to_string())));
    }

    pub fn fetch_show_list(&self) {
        self.send("list shows", None);
    }

    pub fn create_show(&self, name: &str) {
        self.send("create show", Some(Value::String(name.to_string())));
    }

    pub fn change_current_show(&self, name: &str) {
        self.send("change current show", Some(Value::String(name.to_string())));
    }

    pub fn remove_show(&self, name: &str) {
        self.send("remove show", Some(Value::String(name.to_string())));
    }
}

fn handler_table() -> HashMap<&'static str, Handler> {
    let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
    handlers.insert("graphics", parse_graphics);
    handlers.insert("templates", parse_templates);
    handlers.insert("graphic properties", parse_graphic_properties);
    handlers.insert("graphic added", parse_graphic_added);
    handlers.insert("graphic removed", parse_graphic_removed);
    handlers.insert("graphic state changed", parse_graphic_state_changed);
    handlers.insert("shows", parse_shows);
    handlers
}

fn dispatch(handlers: &HashMap<&'static str, Handler>, state: &mut MirrorState, envelope: Envelope) {
    let Some(&handler) = handlers.get(envelope.command.as_str()) else {
        log::debug!("no handler bound for notification '{}'", envelope.command);
        return;
    };
    handler(state, envelope.data);
}

fn string_list(data: Option<Value>) -> Vec<String> {
    match data {
        Some(Value::Array(values)) => values
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_graphics(state: &mut MirrorState, data: Option<Value>) {
    let _ = state
        .events
        .send(ClientEvent::GraphicListChanged(string_list(data)));
}

fn parse_templates(state: &mut MirrorState, data: Option<Value>) {
    let _ = state
        .events
        .send(ClientEvent::TemplateListReceived(string_list(data)));
}

fn parse_graphic_properties(state: &mut MirrorState, data: Option<Value>) {
    let Some(data) = data else {
        return;
    };
    match serde_json::from_value::<GraphicProperties>(data) {
        Ok(properties) => {
            let _ = state
                .events
                .send(ClientEvent::GraphicPropertiesReceived(properties));
        }
        Err(e) => log::warn!("malformed graphic properties notification: {}", e),
    }
}

fn parse_graphic_added(state: &mut MirrorState, data: Option<Value>) {
    if let Some(Value::String(graphic)) = data {
        let _ = state.events.send(ClientEvent::GraphicAdded(graphic));
    }
}

fn parse_graphic_removed(state: &mut MirrorState, data: Option<Value>) {
    if let Some(Value::String(graphic)) = data {
        let _ = state.events.send(ClientEvent::GraphicRemoved(graphic));
    }
}

fn parse_graphic_state_changed(state: &mut MirrorState, data: Option<Value>) {
    let Some(data) = data else {
        return;
    };
    match serde_json::from_value::<StateChange>(data) {
        Ok(change) => {
            let _ = state.events.send(ClientEvent::GraphicStateChanged {
                graphic: change.graphic,
                state: change.state,
            });
        }
        Err(e) => log::warn!("malformed graphic state changed notification: {}", e),
    }
}

fn parse_shows(state: &mut MirrorState, data: Option<Value>) {
    let Some(data) = data else {
        return;
    };
    let list: ShowList = match serde_json::from_value(data) {
        Ok(list) => list,
        Err(e) => {
            log::warn!("malformed shows notification: {}", e);
            return;
        }
    };
    let current = list.current.unwrap_or_default();

    // The cached graphic list belongs to the old show; refresh it before
    // trusting the new current value.
    if current != state.current_show {
        let _ = state
            .outbound
            .send(protocol::encode_command("list graphics", None));
        state.current_show = current.clone();
    }

    let _ = state.events.send(ClientEvent::ShowListReceived {
        shows: list.shows,
        current,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mirror() -> (
        MirrorState,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            MirrorState {
                current_show: String::new(),
                outbound: outbound_tx,
                events: event_tx,
            },
            outbound_rx,
            event_rx,
        )
    }

    #[test]
    fn shows_notification_with_new_current_refetches_graphics() {
        let (mut state, mut outbound, mut events) = mirror();

        parse_shows(
            &mut state,
            Some(json!({"current": "news.show", "shows": ["news.show"]})),
        );

        let line = outbound.try_recv().unwrap();
        assert_eq!(line, "{\"Command\":\"list graphics\"}\r\n");
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ShowListReceived {
                shows: vec!["news.show".to_string()],
                current: "news.show".to_string(),
            }
        );

        // Same current again: the cache is fresh, no refetch.
        parse_shows(
            &mut state,
            Some(json!({"current": "news.show", "shows": ["news.show"]})),
        );
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn shows_notification_without_current_clears_cache() {
        let (mut state, mut outbound, mut events) = mirror();
        state.current_show = "news.show".to_string();

        parse_shows(&mut state, Some(json!({"shows": []})));

        assert!(outbound.try_recv().is_ok());
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ShowListReceived {
                shows: Vec::new(),
                current: String::new(),
            }
        );
    }

    #[test]
    fn unknown_notification_is_a_no_op() {
        let (mut state, mut outbound, mut events) = mirror();
        let handlers = handler_table();

        dispatch(
            &handlers,
            &mut state,
            Envelope {
                command: "brand new thing".to_string(),
                data: Some(json!(1)),
            },
        );

        assert!(outbound.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn state_changed_notification_is_forwarded() {
        let (mut state, _outbound, mut events) = mirror();

        parse_graphic_state_changed(
            &mut state,
            Some(json!({"graphic": "Lower1", "state": true})),
        );

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::GraphicStateChanged {
                graphic: "Lower1".to_string(),
                state: true,
            }
        );
    }
}
