use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ProtocolError, model::graphic::DEFAULT_ON_AIR_TIMER_INTERVAL_MS};

/// One wire message: `{"Command": <name>, "Data": <any>}`, newline-delimited.
/// `Data` is omitted when a command carries no payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command: String,
    pub data: Option<Value>,
}

/// Decodes a single line from the stream. Any failure here discards that
/// line only; the caller keeps reading subsequent lines.
pub fn decode_line(line: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;

    let Value::Object(mut object) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let command = match object.remove("Command") {
        Some(Value::String(command)) => command,
        _ => return Err(ProtocolError::MissingCommand),
    };

    Ok(Envelope {
        command,
        data: object.remove("Data"),
    })
}

/// Encodes one outbound message as a compact JSON object terminated by CRLF,
/// suitable for a single transport write.
pub fn encode_command(command: &str, data: Option<Value>) -> String {
    let mut object = serde_json::Map::new();
    object.insert("Command".to_string(), Value::String(command.to_string()));

    if let Some(data) = data {
        object.insert("Data".to_string(), data);
    }

    let mut line = Value::Object(object).to_string();
    line.push_str("\r\n");
    line
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateGraphicData {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Template")]
    pub template: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
}

/// Payload of `graphic properties` and `set graphic properties`. Missing
/// fields coerce loosely so older peers stay usable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphicProperties {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "OnAirTimerEnabled", default)]
    pub on_air_timer_enabled: bool,
    #[serde(rename = "OnAirTimerInterval", default = "default_timer_interval")]
    pub on_air_timer_interval: u64,
    #[serde(rename = "Group", default)]
    pub group: String,
    #[serde(rename = "Properties", default)]
    pub properties: Vec<PropertyEntry>,
}

fn default_timer_interval() -> u64 {
    DEFAULT_ON_AIR_TIMER_INTERVAL_MS
}

/// Payload of the `shows` notification. `current` is absent when no show is
/// active.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ShowList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default)]
    pub shows: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateChange {
    pub graphic: String,
    pub state: bool,
}
