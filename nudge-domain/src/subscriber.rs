use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 订阅者（参与者）：每轮 drain 以不可变快照形式提供，引擎不修改
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    #[builder(into)]
    id: String,
    #[builder(into)]
    unique_identifier: String,
    #[builder(default)]
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl Subscriber {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unique_identifier(&self) -> &str {
        &self.unique_identifier
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
