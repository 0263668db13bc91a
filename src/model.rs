use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::graphic::DEFAULT_ON_AIR_TIMER_INTERVAL_MS;

pub mod graphic;

/// On-disk snapshot of one show. The `show` key is the root container; a
/// file without it is tolerated with a warning and loads as an empty show.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShowFile {
    pub show: Vec<GraphicRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GraphicRecord {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub on_air_timer_enabled: bool,
    #[serde(default = "default_timer_interval")]
    pub on_air_timer_interval: u64,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub properties: Vec<PropertyRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

fn default_timer_interval() -> u64 {
    DEFAULT_ON_AIR_TIMER_INTERVAL_MS
}
