//! Instance user data.
//!
//! The payload is opaque to the engine, but it may embed values that only
//! exist once other tasks have rendered (a load balancer VIP, say). Those
//! references are dependencies of the instance carrying the payload.

use std::collections::BTreeMap;

use itertools::Itertools;

use cumulus_core::{Error, Result};

use crate::task::{OutputMap, TaskKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDataPart {
    Literal(String),
    /// The published address of another task.
    AddressOf(TaskKey),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserData {
    parts: Vec<UserDataPart>,
    resolved: BTreeMap<TaskKey, String>,
}

impl UserData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.parts.push(UserDataPart::Literal(text.into()));
        self
    }

    #[must_use]
    pub fn address_of(mut self, key: TaskKey) -> Self {
        self.parts.push(UserDataPart::AddressOf(key));
        self
    }

    #[must_use]
    pub fn parts(&self) -> &[UserDataPart] {
        &self.parts
    }

    /// Tasks whose outputs the payload embeds.
    #[must_use]
    pub fn dependencies(&self) -> Vec<TaskKey> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                UserDataPart::AddressOf(key) => Some(key.clone()),
                UserDataPart::Literal(_) => None,
            })
            .sorted()
            .dedup()
            .collect()
    }

    pub fn resolve(&mut self, outputs: &OutputMap) {
        for key in self.dependencies() {
            if let Some(address) = outputs.get(&key).and_then(|o| o.address.clone()) {
                self.resolved.insert(key, address);
            }
        }
    }

    /// The payload bytes for `consumer`.
    ///
    /// # Errors
    /// `Render` when a referenced task has not published an address.
    pub fn render(&self, consumer: &TaskKey) -> Result<Vec<u8>> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                UserDataPart::Literal(text) => out.push_str(text),
                UserDataPart::AddressOf(key) => {
                    let address = self.resolved.get(key).ok_or_else(|| {
                        Error::render(
                            consumer.kind,
                            consumer.name.clone(),
                            format!("user data references {key}, which has no address yet"),
                        )
                    })?;
                    out.push_str(address);
                }
            }
        }
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOutput;

    #[test]
    fn test_references_become_dependencies() {
        let lb = TaskKey::loadbalancer("api.example.com");
        let data = UserData::new()
            .literal("server: https://")
            .address_of(lb.clone())
            .literal(":443\n")
            .address_of(lb.clone());
        assert_eq!(data.dependencies(), vec![lb]);
    }

    #[test]
    fn test_render_substitutes_published_address() {
        let lb = TaskKey::loadbalancer("api.example.com");
        let mut data = UserData::new()
            .literal("server: https://")
            .address_of(lb.clone());
        let consumer = TaskKey::instance("master-1");
        assert!(data.render(&consumer).is_err());

        let mut outputs = OutputMap::new();
        outputs.insert(
            lb,
            TaskOutput {
                address: Some("10.0.1.20".to_string()),
                ..TaskOutput::default()
            },
        );
        data.resolve(&outputs);
        assert_eq!(
            data.render(&consumer).ok(),
            Some(b"server: https://10.0.1.20".to_vec())
        );
    }
}
