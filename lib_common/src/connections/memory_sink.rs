//! In-process state sink. Applies commands immediately and keeps them in
//! ordered maps so tests and the `memory` sink kind can inspect the mirror.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::state_sink::{storage_key, SinkCommand, StateSink};

#[derive(Debug, Default)]
struct MemoryState {
    fields: BTreeMap<String, String>,
    sets: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `namespace:key`.
    pub fn field(&self, namespace: &str, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.fields.get(&storage_key(namespace, key)).cloned()
    }

    /// Members of the set `namespace:set_key`, sorted.
    pub fn members(&self, namespace: &str, set_key: &str) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .sets
            .get(&storage_key(namespace, set_key))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every stored field key under `namespace`, without the namespace prefix.
    pub fn field_keys(&self, namespace: &str) -> Vec<String> {
        let prefix = storage_key(namespace, "");
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .fields
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn apply(&self, command: SinkCommand) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match command {
            SinkCommand::RecordField {
                namespace,
                key,
                value,
            } => {
                state.fields.insert(storage_key(&namespace, &key), value);
            }
            // Like DEL, removes whatever lives under the key.
            SinkCommand::RemoveField { namespace, key } => {
                let key = storage_key(&namespace, &key);
                state.fields.remove(&key);
                state.sets.remove(&key);
            }
            SinkCommand::AddToSet {
                namespace,
                set_key,
                member,
            } => {
                state
                    .sets
                    .entry(storage_key(&namespace, &set_key))
                    .or_default()
                    .insert(member);
            }
            SinkCommand::RemoveFromSet {
                namespace,
                set_key,
                member,
            } => {
                let key = storage_key(&namespace, &set_key);
                if let Some(set) = state.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        state.sets.remove(&key);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StateSink for MemorySink {
    fn submit(&self, command: SinkCommand) {
        self.apply(command);
    }

    async fn submit_blocking(&self, command: SinkCommand) {
        self.apply(command);
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn applies_field_and_set_commands() {
        let sink = MemorySink::new();
        sink.record_field("t1", "clients:robotB:name", "robotB".into());
        sink.add_to_set("t1", "clients:list", "robotB");
        sink.add_to_set("t2", "clients:list", "robotC");

        assert_eq!(sink.field("t1", "clients:robotB:name").as_deref(), Some("robotB"));
        assert_eq!(sink.members("t1", "clients:list"), vec!["robotB"]);
        assert_eq!(sink.field_keys("t1"), vec!["clients:robotB:name"]);

        sink.submit_blocking(SinkCommand::RemoveField {
            namespace: "t1".into(),
            key: "clients:robotB:name".into(),
        })
        .await;
        sink.remove_from_set("t1", "clients:list", "robotB");

        assert!(sink.field("t1", "clients:robotB:name").is_none());
        assert!(sink.members("t1", "clients:list").is_empty());
        assert_eq!(sink.members("t2", "clients:list"), vec!["robotC"]);
    }
}
