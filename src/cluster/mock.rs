//! In-memory cluster for tests (no I/O)
//!
//! Serves the ReplicaSet collection, item, scale and pod log endpoints from
//! a map, records every call, and lets tests inject failures per route.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::Method;

use super::client::{ByteStream, ClusterApi, Outcome, TransportError};
use super::resources::{ObjectMeta, ReplicaSet, Scale, ScaleSpec, ScaleStatus};

/// Which endpoint a request hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Collection,
    Item,
    Scale,
    Log,
    Unknown,
}

/// Injected answer in place of the normal one
#[derive(Debug, Clone)]
pub enum Injected {
    Status(u16, String),
    Transport,
}

/// Scripted answer to one log stream request
#[derive(Debug, Clone)]
pub enum LogAttempt {
    Transport,
    Status(u16),
    /// Chunks followed by end of stream
    Closed(Vec<&'static str>),
    /// Chunks, then the stream stays open
    Open(Vec<&'static str>),
    /// Chunks, then a mid-stream read error
    Broken(Vec<&'static str>),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub route: Route,
    pub path: String,
    pub query: Vec<(String, String)>,
}

struct Rule {
    method: Method,
    route: Route,
    answer: Injected,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    replica_sets: BTreeMap<String, ReplicaSet>,
    next_version: u64,
    rules: Vec<Rule>,
    log_attempts: VecDeque<LogAttempt>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing ReplicaSet
    pub fn with_replica_set(self, name: &str, replicas: i64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let rs = seed_replica_set(name, replicas);
            state.insert(rs);
        }
        self
    }

    /// Answer every matching request with `answer`
    pub fn fail(&self, method: Method, route: Route, answer: Injected) {
        self.add_rule(method, route, answer, None);
    }

    /// Answer the next matching request with `answer`
    pub fn fail_once(&self, method: Method, route: Route, answer: Injected) {
        self.add_rule(method, route, answer, Some(1));
    }

    fn add_rule(&self, method: Method, route: Route, answer: Injected, remaining: Option<usize>) {
        self.state.lock().unwrap().rules.push(Rule {
            method,
            route,
            answer,
            remaining,
        });
    }

    /// Queue answers for successive log stream requests
    pub fn push_log_attempts(&self, attempts: impl IntoIterator<Item = LogAttempt>) {
        self.state.lock().unwrap().log_attempts.extend(attempts);
    }

    /// Simulate another writer touching the ReplicaSet
    pub fn touch(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        if let Some(rs) = state.replica_sets.get_mut(name) {
            rs.metadata.resource_version = Some(version);
        }
    }

    pub fn replica_set(&self, name: &str) -> Option<ReplicaSet> {
        self.state.lock().unwrap().replica_sets.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, method: Method, route: Route) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.method == method && c.route == route)
            .count()
    }
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn insert(&mut self, mut rs: ReplicaSet) {
        rs.metadata.resource_version = Some(self.bump());
        self.replica_sets.insert(rs.metadata.name.clone(), rs);
    }

    fn injected(&mut self, method: &Method, route: Route) -> Option<Injected> {
        let idx = self
            .rules
            .iter()
            .position(|r| &r.method == method && r.route == route)?;
        let rule = &mut self.rules[idx];
        let answer = rule.answer.clone();
        if let Some(ref mut remaining) = rule.remaining {
            *remaining -= 1;
            if *remaining == 0 {
                self.rules.remove(idx);
            }
        }
        Some(answer)
    }
}

fn seed_replica_set(name: &str, replicas: i64) -> ReplicaSet {
    let request = super::builder::DeploymentRequest::new(name, "https://example.com/bin")
        .with_replicas(replicas);
    let mut rs = super::builder::build_replica_set(&request, "extensions/v1beta1")
        .expect("seed request is valid");
    rs.metadata.namespace = Some("default".to_string());
    rs
}

/// Split a request path into the route and the resource name it addresses
fn route(path: &str) -> (Route, Option<String>) {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    if segments.last() == Some(&"log") && segments.len() >= 2 {
        return (Route::Log, Some(segments[segments.len() - 2].to_string()));
    }

    match segments.iter().position(|s| *s == "replicasets") {
        Some(i) => match &segments[i + 1..] {
            [] => (Route::Collection, None),
            [name] => (Route::Item, Some(name.to_string())),
            [name, "scale"] => (Route::Scale, Some(name.to_string())),
            _ => (Route::Unknown, None),
        },
        None => (Route::Unknown, None),
    }
}

fn json<T: serde::Serialize>(status: u16, value: &T) -> Outcome<Bytes> {
    Outcome::from_response(status, Bytes::from(serde_json::to_vec(value).unwrap()))
}

fn status(status: u16, message: &str) -> Outcome<Bytes> {
    Outcome::from_response(status, Bytes::from(message.to_string()))
}

fn scale_of(rs: &ReplicaSet) -> Scale {
    Scale {
        api_version: "extensions/v1beta1".to_string(),
        kind: "Scale".to_string(),
        metadata: ObjectMeta {
            name: rs.metadata.name.clone(),
            namespace: rs.metadata.namespace.clone(),
            resource_version: rs.metadata.resource_version.clone(),
            ..Default::default()
        },
        spec: ScaleSpec {
            replicas: rs.spec.replicas,
        },
        status: Some(ScaleStatus {
            replicas: rs.spec.replicas,
            selector: None,
        }),
    }
}

fn chunks(parts: Vec<&'static str>) -> impl futures::Stream<Item = Result<Bytes, TransportError>> {
    stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))))
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Outcome<Bytes>, TransportError> {
        let mut state = self.state.lock().unwrap();
        let (route, name) = route(path);
        state.calls.push(Call {
            method: method.clone(),
            route,
            path: path.to_string(),
            query: query.to_vec(),
        });

        match state.injected(&method, route) {
            Some(Injected::Transport) => {
                return Err(TransportError::Connect {
                    url: path.to_string(),
                    message: "connection refused".to_string(),
                })
            }
            Some(Injected::Status(code, message)) => return Ok(status(code, &message)),
            None => {}
        }

        let outcome = match (method, route) {
            (Method::POST, Route::Collection) => {
                let rs: ReplicaSet = match body.as_deref().map(serde_json::from_slice) {
                    Some(Ok(rs)) => rs,
                    _ => return Ok(status(400, "malformed body")),
                };
                if state.replica_sets.contains_key(&rs.metadata.name) {
                    status(409, "already exists")
                } else {
                    let name = rs.metadata.name.clone();
                    state.insert(rs);
                    json(201, &state.replica_sets[&name])
                }
            }
            (Method::GET, Route::Item) => match name.and_then(|n| state.replica_sets.get(&n)) {
                Some(rs) => json(200, rs),
                None => status(404, "not found"),
            },
            (Method::DELETE, Route::Item) => {
                match name.and_then(|n| state.replica_sets.remove(&n)) {
                    Some(_) => status(200, r#"{"kind":"Status","status":"Success"}"#),
                    None => status(404, "not found"),
                }
            }
            (Method::GET, Route::Scale) => match name.and_then(|n| state.replica_sets.get(&n)) {
                Some(rs) => json(200, &scale_of(rs)),
                None => status(404, "not found"),
            },
            (Method::PUT, Route::Scale) => {
                let scale: Scale = match body.as_deref().map(serde_json::from_slice) {
                    Some(Ok(scale)) => scale,
                    _ => return Ok(status(400, "malformed body")),
                };
                let Some(name) = name else {
                    return Ok(status(404, "not found"));
                };
                let version = state.bump();
                match state.replica_sets.get_mut(&name) {
                    None => status(404, "not found"),
                    Some(rs)
                        if scale.metadata.resource_version.is_some()
                            && scale.metadata.resource_version != rs.metadata.resource_version =>
                    {
                        status(409, "the object has been modified")
                    }
                    Some(rs) => {
                        rs.spec.replicas = scale.spec.replicas;
                        rs.metadata.resource_version = Some(version);
                        json(200, &scale_of(rs))
                    }
                }
            }
            _ => status(405, "method not allowed"),
        };

        Ok(outcome)
    }

    async fn stream(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Outcome<ByteStream>, TransportError> {
        let mut state = self.state.lock().unwrap();
        let (route, _) = route(path);
        state.calls.push(Call {
            method: Method::GET,
            route,
            path: path.to_string(),
            query: query.to_vec(),
        });

        let broken = || TransportError::Http {
            url: path.to_string(),
            message: "connection reset".to_string(),
        };

        let outcome = match state.log_attempts.pop_front() {
            None | Some(LogAttempt::Status(404)) => Outcome::NotFound,
            Some(LogAttempt::Transport) => return Err(broken()),
            Some(LogAttempt::Status(code)) => Outcome::Failure {
                status: code,
                body: Bytes::from_static(b"log unavailable"),
            },
            Some(LogAttempt::Closed(parts)) => Outcome::Success {
                status: 200,
                payload: chunks(parts).boxed(),
            },
            Some(LogAttempt::Open(parts)) => Outcome::Success {
                status: 200,
                payload: chunks(parts).chain(stream::pending()).boxed(),
            },
            Some(LogAttempt::Broken(parts)) => {
                let err = broken();
                Outcome::Success {
                    status: 200,
                    payload: chunks(parts)
                        .chain(stream::once(async move { Err(err) }))
                        .boxed(),
                }
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parsing() {
        let base = "/apis/extensions/v1beta1/namespaces/default/replicasets";
        assert_eq!(route(base), (Route::Collection, None));
        assert_eq!(
            route(&format!("{}/worker", base)),
            (Route::Item, Some("worker".to_string()))
        );
        assert_eq!(
            route(&format!("{}/worker/scale", base)),
            (Route::Scale, Some("worker".to_string()))
        );
        assert_eq!(
            route("/api/v1/namespaces/default/pods/worker-1/log"),
            (Route::Log, Some("worker-1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fail_once_is_consumed() {
        let cluster = MockCluster::new().with_replica_set("worker", 1);
        cluster.fail_once(Method::GET, Route::Item, Injected::Status(500, "boom".into()));

        let path = "/apis/extensions/v1beta1/namespaces/default/replicasets/worker";
        let first = cluster.execute(Method::GET, path, &[], None).await.unwrap();
        assert_eq!(first.status(), 500);

        let second = cluster.execute(Method::GET, path, &[], None).await.unwrap();
        assert!(second.is_success());
        assert_eq!(cluster.count(Method::GET, Route::Item), 2);
    }
}
