use serde_json::Value;

use crate::protocol::{self, GraphicProperties, ShowList, StateChange};

/// The server→client notification set. Disjoint from the client→server
/// request set; requests never receive error envelopes, only these.
#[derive(Debug, Clone)]
pub enum Notification {
    Graphics(Vec<String>),
    Templates(Vec<String>),
    GraphicProperties(GraphicProperties),
    GraphicAdded(String),
    GraphicRemoved(String),
    GraphicStateChanged { graphic: String, state: bool },
    Shows(ShowList),
}

impl Notification {
    pub fn command(&self) -> &'static str {
        match self {
            Notification::Graphics(_) => "graphics",
            Notification::Templates(_) => "templates",
            Notification::GraphicProperties(_) => "graphic properties",
            Notification::GraphicAdded(_) => "graphic added",
            Notification::GraphicRemoved(_) => "graphic removed",
            Notification::GraphicStateChanged { .. } => "graphic state changed",
            Notification::Shows(_) => "shows",
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            Notification::Graphics(list) | Notification::Templates(list) => {
                serde_json::to_value(list).ok()
            }
            Notification::GraphicProperties(properties) => serde_json::to_value(properties).ok(),
            Notification::GraphicAdded(name) | Notification::GraphicRemoved(name) => {
                Some(Value::String(name.clone()))
            }
            Notification::GraphicStateChanged { graphic, state } => serde_json::to_value(
                StateChange {
                    graphic: graphic.clone(),
                    state: *state,
                },
            )
            .ok(),
            Notification::Shows(list) => serde_json::to_value(list).ok(),
        }
    }

    /// One complete wire line, CRLF included.
    pub fn encode(&self) -> String {
        protocol::encode_command(self.command(), self.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_wire_shape() {
        let line = Notification::GraphicStateChanged {
            graphic: "Lower1".to_string(),
            state: true,
        }
        .encode();
        assert_eq!(
            line,
            "{\"Command\":\"graphic state changed\",\"Data\":{\"graphic\":\"Lower1\",\"state\":true}}\r\n"
        );
    }

    #[test]
    fn bare_string_payloads() {
        let line = Notification::GraphicAdded("Lower1".to_string()).encode();
        assert_eq!(line, "{\"Command\":\"graphic added\",\"Data\":\"Lower1\"}\r\n");
    }
}
