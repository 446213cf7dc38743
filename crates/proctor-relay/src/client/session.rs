//! Client session: parse, authorize, fan out, aggregate
//!
//! Each inbound frame is processed to completion independently; responses
//! carry a per-connection request ID assigned in arrival order so callers
//! can correlate them regardless of completion order.
//!
//! The pipeline per request: shape validation, registry lookup of the
//! handler descriptor, authorization pre-filter (batch denial or per-item
//! `notfound` marks), partitioning of user targets by host, one concurrent
//! agent call per host bucket, aggregation with origin re-tagging, and an
//! ACL post-filter for the list requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Map, Value};

use proctor_core::acl::AclRule;
use proctor_core::error::CallError;
use proctor_core::traits::AgentCalls;
use proctor_core::types::{SessionUser, UserKey};
use proctor_protocol::{Request, Response};

use crate::host::ManagedHost;
use crate::state::RelayState;

use super::requests::{self, Descriptor, Operation, Placeholder, RequestKind};

type Item = Map<String, Value>;

const IDENTITY_FIELDS: [&str; 4] = ["username", "server", "client", "display"];

/// One authenticated front-end connection
pub struct ClientSession {
    username: String,
    acl: Arc<AclRule>,
    state: Arc<RelayState>,
    next_request_id: AtomicI64,
}

impl ClientSession {
    pub fn new(username: String, acl: Arc<AclRule>, state: Arc<RelayState>) -> Self {
        Self {
            username,
            acl,
            state,
            next_request_id: AtomicI64::new(1),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Assign the ID for the next inbound request. Called in arrival order
    /// by the connection's read loop.
    pub fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Process one inbound frame into its response
    pub async fn process(&self, request_id: i64, payload: &[u8]) -> Response {
        let request: Request = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::info!("invalid request from {}: {}", self.username, e);
                return invalid_response(request_id);
            }
        };

        let Some(descriptor) = requests::lookup(&request.request) else {
            tracing::info!(
                "unknown request {:?} from {}",
                request.request,
                self.username
            );
            return invalid_response(request_id);
        };

        let items = match validate_args(descriptor, &request.args) {
            Ok(items) => items,
            Err(reason) => {
                tracing::info!(
                    "malformed {} request from {}: {}",
                    request.request,
                    self.username,
                    reason
                );
                return invalid_response(request_id);
            }
        };

        // Cheap identity-independent check first: a disallowed request name
        // rejects the whole batch before any target is looked at.
        if !self.acl.request_name_allowed(&request.request) {
            return Response::with_error(&request.request, request_id, json!([]), "notauthorized");
        }

        let locations = self.state.registry.locations_of(&self.username);

        let data = match descriptor.kind {
            RequestKind::User => {
                let (offline, buckets) = self.partition_users(&request.request, &locations, items);
                match descriptor.operation {
                    Operation::ListUsers => self.list_users(),
                    op => self.dispatch_user(op, descriptor, offline, buckets).await,
                }
            }
            RequestKind::Server => {
                let mut items = items;
                self.prefilter_servers(&request.request, &locations, &mut items);
                match descriptor.operation {
                    Operation::ListServers => self.list_servers(),
                    op => self.dispatch_server(op, items).await,
                }
            }
        };

        let data = if descriptor.post_filter {
            self.post_filter(descriptor, &request.request, &locations, data)
        } else {
            data
        };

        Response::new(&request.request, request_id, Value::Array(data))
    }

    /// Sort user-targeted args into per-host buckets, marking unknown hosts
    /// and offline users `notfound`, and pre-filtering each resolvable
    /// target against the ACL. A denied target gets the same `notfound` as
    /// a nonexistent one.
    fn partition_users(
        &self,
        request: &str,
        locations: &[String],
        items: Vec<Item>,
    ) -> (Vec<Item>, Vec<(Arc<ManagedHost>, Vec<Item>)>) {
        let mut offline = Vec::new();
        let mut buckets: HashMap<String, (Arc<ManagedHost>, Vec<Item>)> = HashMap::new();

        for mut item in items {
            let key = item_user_key(&item);
            let target = self
                .state
                .registry
                .get(&key.server)
                .and_then(|host| host.user(&key).map(|user| (host, user)));

            match target {
                Some((host, user)) => {
                    if !self.acl.request_allowed(request, locations, &user) {
                        item.insert("error".into(), "notfound".into());
                    }
                    buckets
                        .entry(key.server.clone())
                        .or_insert_with(|| (host, Vec::new()))
                        .1
                        .push(item);
                }
                None => {
                    item.insert("error".into(), "notfound".into());
                    offline.push(item);
                }
            }
        }

        (offline, buckets.into_values().collect())
    }

    /// Mark server-targeted args for unknown hosts or hosts the caller may
    /// not address
    fn prefilter_servers(&self, request: &str, locations: &[String], items: &mut [Item]) {
        for item in items.iter_mut() {
            if item_has_error(item) {
                continue;
            }
            let server = item_str(item, "server");
            let allowed = match self.state.registry.get(&server) {
                Some(host) => self.acl.request_allowed_server(
                    request,
                    locations,
                    &host.users_snapshot(),
                ),
                None => false,
            };
            if !allowed {
                item.insert("error".into(), "notfound".into());
            }
        }
    }

    /// Fan a user request out across its host buckets and aggregate
    async fn dispatch_user(
        &self,
        op: Operation,
        descriptor: &Descriptor,
        offline: Vec<Item>,
        buckets: Vec<(Arc<ManagedHost>, Vec<Item>)>,
    ) -> Vec<Value> {
        let mut results = Vec::new();
        for mut item in offline {
            apply_placeholders(&mut item, descriptor.placeholders);
            results.push(Value::Object(item));
        }

        let calls = buckets
            .into_iter()
            .map(|(host, items)| dispatch_user_bucket(op, host, items, descriptor.placeholders));
        for bucket_results in join_all(calls).await {
            results.extend(bucket_results);
        }
        results
    }

    /// One agent call per host-targeted item, concurrently
    async fn dispatch_server(&self, op: Operation, items: Vec<Item>) -> Vec<Value> {
        let calls = items.into_iter().map(|item| {
            let registry = &self.state.registry;
            async move {
                let mut item = item;
                if item_has_error(&item) {
                    return Value::Object(item);
                }
                let server = item_str(&item, "server");
                let agent = registry.get(&server).and_then(|host| host.agent());
                let Some(agent) = agent else {
                    item.insert("error".into(), "notfound".into());
                    return Value::Object(item);
                };

                if op == Operation::Shutdown {
                    let action = item.get("action").and_then(Value::as_str);
                    if !matches!(action, Some("poweroff") | Some("reboot")) {
                        // The agent is never consulted for a bogus action
                        return json!({"server": server, "error": "invalid"});
                    }
                }

                let mut wire = item.clone();
                wire.remove("server");
                match call_agent(op, agent, Value::Object(wire)).await {
                    Ok(Value::Object(mut obj)) => {
                        obj.insert("server".into(), server.into());
                        Value::Object(obj)
                    }
                    Ok(_) => {
                        tracing::warn!("{}: non-object response from {}", op_name(op), server);
                        item.insert("error".into(), "notfound".into());
                        Value::Object(item)
                    }
                    Err(e) => {
                        tracing::warn!("{} call to {} failed: {}", op_name(op), server, e);
                        item.insert("error".into(), "notfound".into());
                        Value::Object(item)
                    }
                }
            }
        });
        join_all(calls).await
    }

    /// listUsers is served from the registry cache
    fn list_users(&self) -> Vec<Value> {
        self.state
            .registry
            .all_users()
            .into_iter()
            .map(|user| {
                json!({
                    "username": user.username,
                    "server": user.server,
                    "client": user.client,
                    "display": user.display,
                    "name": user.name,
                    "groups": user.groups,
                    "time": user.time,
                    "location": user.location,
                })
            })
            .collect()
    }

    /// listServers is served from the registry cache; disconnected hosts
    /// are omitted
    fn list_servers(&self) -> Vec<Value> {
        self.state
            .registry
            .connected()
            .into_iter()
            .filter_map(|host| {
                let info = host.info()?;
                Some(json!({
                    "server": host.hostname(),
                    "users": host.user_count(),
                    "uptime": info.uptime,
                    "load": info.load,
                    "os": info.os,
                    "location": host.location(),
                }))
            })
            .collect()
    }

    /// Drop result items the caller is not authorized to see. This filters
    /// the response contents, distinct from the pre-filter authorizing the
    /// request itself.
    fn post_filter(
        &self,
        descriptor: &Descriptor,
        request: &str,
        locations: &[String],
        data: Vec<Value>,
    ) -> Vec<Value> {
        data.into_iter()
            .filter(|item| {
                let Some(obj) = item.as_object() else {
                    return false;
                };
                match descriptor.kind {
                    RequestKind::User => {
                        let key = item_user_key(obj);
                        self.subject_user(&key).is_some_and(|user| {
                            self.acl.request_allowed(request, locations, &user)
                        })
                    }
                    RequestKind::Server => {
                        let server = item_str(obj, "server");
                        self.state.registry.get(&server).is_some_and(|host| {
                            self.acl.request_allowed_server(
                                request,
                                locations,
                                &host.users_snapshot(),
                            )
                        })
                    }
                }
            })
            .collect()
    }

    fn subject_user(&self, key: &UserKey) -> Option<SessionUser> {
        self.state.registry.get(&key.server)?.user(key)
    }
}

/// Call the agent for a bucket of user items, re-tagging results with the
/// origin hostname. A failed call marks only this bucket's items, never the
/// sibling hosts of the same fan-out.
async fn dispatch_user_bucket(
    op: Operation,
    host: Arc<ManagedHost>,
    items: Vec<Item>,
    placeholders: &'static [(&'static str, Placeholder)],
) -> Vec<Value> {
    let mut out = Vec::new();
    let mut to_send = Vec::new();
    for mut item in items {
        if item_has_error(&item) {
            apply_placeholders(&mut item, placeholders);
            out.push(Value::Object(item));
        } else {
            to_send.push(item);
        }
    }
    if to_send.is_empty() {
        return out;
    }

    let hostname = host.hostname().to_string();
    let wire: Vec<Value> = to_send
        .iter()
        .map(|item| {
            let mut wire_item = item.clone();
            // The agent identifies sessions without the hostname
            wire_item.remove("server");
            Value::Object(wire_item)
        })
        .collect();

    let result = match host.agent() {
        Some(agent) => call_agent(op, agent, Value::Array(wire)).await,
        None => Err(CallError::NotConnected),
    };

    match result {
        Ok(Value::Array(responses)) => {
            for mut response in responses {
                if let Some(obj) = response.as_object_mut() {
                    obj.insert("server".into(), hostname.clone().into());
                }
                out.push(response);
            }
        }
        Ok(_) => {
            tracing::warn!("{}: non-list response from {}", op_name(op), hostname);
            fail_items(&mut out, to_send, placeholders);
        }
        Err(e) => {
            tracing::warn!("{} call to {} failed: {}", op_name(op), hostname, e);
            fail_items(&mut out, to_send, placeholders);
        }
    }
    out
}

fn fail_items(
    out: &mut Vec<Value>,
    items: Vec<Item>,
    placeholders: &'static [(&'static str, Placeholder)],
) {
    for mut item in items {
        item.insert("error".into(), "notfound".into());
        apply_placeholders(&mut item, placeholders);
        out.push(Value::Object(item));
    }
}

async fn call_agent(
    op: Operation,
    agent: Arc<dyn AgentCalls>,
    args: Value,
) -> Result<Value, CallError> {
    match op {
        Operation::Processes => agent.processes(args).await,
        Operation::KillProcesses => agent.kill_processes(args).await,
        Operation::Thumbnails => agent.thumbnails(args).await,
        Operation::Vnc => agent.vnc(args).await,
        Operation::SendMessage => agent.send_message(args).await,
        Operation::Logout => agent.logout(args).await,
        Operation::LockScreen => agent.lock(args).await,
        Operation::OpenUrl => agent.open_url(args).await,
        Operation::Login => agent.login(args).await,
        Operation::Shutdown => agent.shutdown(args).await,
        Operation::ListUsers | Operation::ListServers => {
            Err(CallError::Protocol("served from the registry".into()))
        }
    }
}

fn op_name(op: Operation) -> &'static str {
    match op {
        Operation::ListUsers => "listUsers",
        Operation::ListServers => "listServers",
        Operation::Processes => "listProcesses",
        Operation::KillProcesses => "killProcesses",
        Operation::Thumbnails => "getThumbnails",
        Operation::Vnc => "vnc",
        Operation::SendMessage => "sendMessage",
        Operation::Logout => "logout",
        Operation::LockScreen => "lockScreen",
        Operation::OpenUrl => "openURL",
        Operation::Login => "login",
        Operation::Shutdown => "shutdown",
    }
}

fn invalid_response(request_id: i64) -> Response {
    Response::with_error("", request_id, json!([]), "invalid")
}

fn item_str(item: &Item, field: &str) -> String {
    item.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn item_user_key(item: &Item) -> UserKey {
    UserKey::new(
        item_str(item, "username"),
        item_str(item, "server"),
        item_str(item, "client"),
        item_str(item, "display"),
    )
}

fn item_has_error(item: &Item) -> bool {
    item.get("error")
        .and_then(Value::as_str)
        .is_some_and(|e| !e.is_empty())
}

fn apply_placeholders(item: &mut Item, placeholders: &[(&str, Placeholder)]) {
    for (field, placeholder) in placeholders {
        let value = match placeholder {
            Placeholder::EmptyList => json!([]),
            Placeholder::EmptyString => json!(""),
        };
        item.insert((*field).to_string(), value);
    }
}

/// Shape-check a request's args against its descriptor. The whole request
/// is rejected as `invalid` on any malformed item; nothing is dispatched.
fn validate_args(descriptor: &Descriptor, args: &Value) -> Result<Vec<Item>, &'static str> {
    let Some(list) = args.as_array() else {
        return Err("args is not a list");
    };

    let mut items = Vec::with_capacity(list.len());
    for entry in list {
        let Some(item) = entry.as_object() else {
            return Err("args item is not an object");
        };

        match descriptor.kind {
            RequestKind::User => {
                for field in IDENTITY_FIELDS {
                    if !item.get(field).is_some_and(Value::is_string) {
                        return Err("missing user identity field");
                    }
                }
                if item.contains_key("error") {
                    return Err("args item carries an error field");
                }
            }
            RequestKind::Server => {
                if !item.get("server").is_some_and(Value::is_string) {
                    return Err("missing server field");
                }
            }
        }

        for field in descriptor.required {
            if !item.contains_key(*field) {
                return Err("missing required field");
            }
        }

        items.push(item.clone());
    }

    Ok(items)
}
