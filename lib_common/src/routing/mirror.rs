//! Key layout of the mirrored hub state, and the announce/retire helpers
//! called when connections come and go.
//!
//! Destinations are listed by name, sources by `<name>/<topic-path>`; both
//! share the `clients:list` set. All keys are stored under the namespace.
//!
//! Announcements are best-effort. Retirements wait for room in the sink and
//! run on the connection's own teardown path.

use crate::connections::{SinkCommand, StateSink};

use super::client::Client;

pub const CLIENT_LIST_KEY: &str = "clients:list";

/// Fields written for a source connection after each accepted envelope.
pub const SOURCE_FIELDS: [&str; 8] = [
    "to",
    "from",
    "topic",
    "type",
    "stamp",
    "msg",
    "privateKey",
    "freq",
];

pub fn client_key(member: &str, field: &str) -> String {
    format!("clients:{}:{}", member, field)
}

/// Delivery rate key for the `source -> destination` edge.
pub fn edge_rate_key(destination: &str, source: &str) -> String {
    format!("clients:{}:freq:{}", destination, source)
}

/// Adds a freshly registered destination. Best-effort, never waits on the sink.
pub fn announce_destination(sink: &dyn StateSink, client: &Client) {
    let ns = client.namespace();
    let name = client.name();
    sink.add_to_set(ns, CLIENT_LIST_KEY, name);
    sink.record_field(ns, &client_key(name, "name"), name.to_string());
    sink.record_field(ns, &client_key(name, "description"), client.description());
}

/// Removes everything mirrored for a destination that is gone.
pub async fn retire_destination(sink: &dyn StateSink, client: &Client) {
    let ns = client.namespace().to_string();
    let name = client.name();

    let mut commands = vec![SinkCommand::RemoveFromSet {
        namespace: ns.clone(),
        set_key: CLIENT_LIST_KEY.to_string(),
        member: name.to_string(),
    }];
    for field in ["name", "description"] {
        commands.push(SinkCommand::RemoveField {
            namespace: ns.clone(),
            key: client_key(name, field),
        });
    }
    for source in client.edge_rates().into_keys() {
        commands.push(SinkCommand::RemoveField {
            namespace: ns.clone(),
            key: edge_rate_key(name, &source),
        });
    }
    for command in commands {
        sink.submit_blocking(command).await;
    }
}

pub fn announce_source(sink: &dyn StateSink, namespace: &str, member: &str) {
    sink.add_to_set(namespace, CLIENT_LIST_KEY, member);
}

pub async fn retire_source(sink: &dyn StateSink, namespace: &str, member: &str) {
    sink.submit_blocking(SinkCommand::RemoveFromSet {
        namespace: namespace.to_string(),
        set_key: CLIENT_LIST_KEY.to_string(),
        member: member.to_string(),
    })
    .await;
    for field in SOURCE_FIELDS {
        sink.submit_blocking(SinkCommand::RemoveField {
            namespace: namespace.to_string(),
            key: client_key(member, field),
        })
        .await;
    }
}

/// Drops the whole client list of `namespace`. Shutdown only.
pub async fn clear_client_list(sink: &dyn StateSink, namespace: &str) {
    sink.submit_blocking(SinkCommand::RemoveField {
        namespace: namespace.to_string(),
        key: CLIENT_LIST_KEY.to_string(),
    })
    .await;
}
