//! Docker Engine API adapter.
//!
//! Speaks the Docker Engine HTTP API (v1.41) over the local Unix
//! socket. Each operation opens a fresh connection, performs a single
//! http1 exchange via hyper, and is bounded by the configured timeout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::protocol::{
    ContainerRuntime, ContainerSpec, ContainerStatus, RemoveOptions,
};

const API_PREFIX: &str = "/v1.41";

/// Default engine socket on Linux hosts.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Container engine adapter over the Docker Unix socket.
pub struct DockerRuntime {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DockerRuntime {
    /// Create an adapter for the given socket with a per-operation timeout.
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// One HTTP exchange against the engine, without the timeout envelope.
    async fn exchange(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<Value>,
    ) -> RuntimeResult<(u16, bytes::Bytes)> {
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "docker")
            .header("user-agent", "berth-runtime/0.1");

        let body_bytes = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                bytes::Bytes::from(value.to_string())
            }
            None => bytes::Bytes::new(),
        };

        let request = builder
            .body(http_body_util::Full::new(body_bytes))
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        Ok((status, collected.to_bytes()))
    }

    /// Timeout-bounded request; non-2xx statuses become `Api` errors.
    async fn request(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<Value>,
    ) -> RuntimeResult<bytes::Bytes> {
        let (status, payload) =
            tokio::time::timeout(self.timeout, self.exchange(method, path_and_query, body))
                .await
                .map_err(|_| {
                    RuntimeError::Timeout(format!("{method} {path_and_query}"))
                })??;

        debug!(method, path = path_and_query, status, "engine call");

        // 304 means "already in the requested state" for start/stop.
        if (200..300).contains(&status) || status == 304 {
            Ok(payload)
        } else {
            Err(RuntimeError::Api {
                status,
                message: api_message(&payload),
            })
        }
    }
}

/// Extract the engine's error message from a response body.
fn api_message(payload: &[u8]) -> String {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(payload).trim().to_string())
}

/// Build the engine's create-container payload from a spec.
fn create_payload(spec: &ContainerSpec) -> Value {
    let mut exposed = BTreeMap::new();
    let mut bindings = BTreeMap::new();
    for bind in &spec.port_binds {
        let key = format!("{}/tcp", bind.container_port);
        exposed.insert(key.clone(), json!({}));
        bindings
            .entry(key)
            .or_insert_with(Vec::new)
            .push(json!({
                "HostIp": bind.host_ip,
                "HostPort": bind.host_port.to_string(),
            }));
    }

    let binds: Vec<String> = spec
        .volume_binds
        .iter()
        .map(|b| format!("{}:{}", b.host_path, b.container_path))
        .collect();

    let mut host_config = json!({
        "Binds": binds,
        "PortBindings": bindings,
    });
    if let Some(link) = &spec.link {
        host_config["Links"] = json!([format!("{}:{}", link.container, link.alias)]);
    }

    json!({
        "Image": spec.image,
        "Env": spec.env,
        "ExposedPorts": exposed,
        "HostConfig": host_config,
    })
}

/// Percent-encode query pairs.
fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let path = match &spec.name {
            Some(name) => format!(
                "{API_PREFIX}/containers/create?{}",
                query(&[("name", name)])
            ),
            None => format!("{API_PREFIX}/containers/create"),
        };

        let payload = self
            .request("POST", &path, Some(create_payload(spec)))
            .await?;

        let body: Value = serde_json::from_slice(&payload)
            .map_err(|e| RuntimeError::BadResponse(e.to_string()))?;
        body.get("Id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::BadResponse("create response missing Id".to_string()))
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.request("POST", &format!("{API_PREFIX}/containers/{id}/start"), None)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()> {
        self.request(
            "POST",
            &format!("{API_PREFIX}/containers/{id}/stop?t={timeout_secs}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        self.request(
            "DELETE",
            &format!(
                "{API_PREFIX}/containers/{id}?v={}&force={}",
                options.remove_volumes, options.force
            ),
            None,
        )
        .await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerStatus> {
        let payload = self
            .request("GET", &format!("{API_PREFIX}/containers/{id}/json"), None)
            .await?;

        let body: Value = serde_json::from_slice(&payload)
            .map_err(|e| RuntimeError::BadResponse(e.to_string()))?;
        let state = body
            .pointer("/State/Status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RuntimeError::BadResponse("inspect response missing State.Status".to_string())
            })?;

        ContainerStatus::parse(state).ok_or_else(|| {
            RuntimeError::BadResponse(format!("unknown container state: {state}"))
        })
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        // The engine streams progress JSON; we only care that the
        // request completes successfully.
        self.request(
            "POST",
            &format!(
                "{API_PREFIX}/images/create?{}",
                query(&[("fromImage", image)])
            ),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContainerLink, PortBind, VolumeBind};

    fn app_spec() -> ContainerSpec {
        ContainerSpec {
            image: "kadirahq/meteord".to_string(),
            name: Some("berth-shop".to_string()),
            env: vec!["ROOT_URL=http://a.example.com".to_string()],
            volume_binds: vec![VolumeBind {
                host_path: "/srv/apps/shop".to_string(),
                container_path: "/bundle".to_string(),
            }],
            port_binds: vec![PortBind {
                container_port: 80,
                host_ip: "127.0.0.1".to_string(),
                host_port: 30500,
            }],
            link: Some(ContainerLink {
                container: "abc123".to_string(),
                alias: "mongo".to_string(),
            }),
        }
    }

    #[test]
    fn create_payload_shapes_bindings() {
        let payload = create_payload(&app_spec());

        assert_eq!(payload["Image"], "kadirahq/meteord");
        assert_eq!(payload["Env"][0], "ROOT_URL=http://a.example.com");
        assert!(payload["ExposedPorts"].get("80/tcp").is_some());
        assert_eq!(
            payload["HostConfig"]["Binds"][0],
            "/srv/apps/shop:/bundle"
        );
        assert_eq!(
            payload["HostConfig"]["PortBindings"]["80/tcp"][0]["HostIp"],
            "127.0.0.1"
        );
        assert_eq!(
            payload["HostConfig"]["PortBindings"]["80/tcp"][0]["HostPort"],
            "30500"
        );
        assert_eq!(payload["HostConfig"]["Links"][0], "abc123:mongo");
    }

    #[test]
    fn create_payload_without_link_omits_links() {
        let mut spec = app_spec();
        spec.link = None;
        let payload = create_payload(&spec);
        assert!(payload["HostConfig"].get("Links").is_none());
    }

    #[test]
    fn api_message_prefers_json_field() {
        assert_eq!(
            api_message(br#"{"message":"No such container: abc"}"#),
            "No such container: abc"
        );
        assert_eq!(api_message(b"plain error\n"), "plain error");
    }

    #[test]
    fn query_encodes_reserved_characters() {
        assert_eq!(query(&[("fromImage", "library/mongo")]), "fromImage=library%2Fmongo");
        assert_eq!(query(&[("name", "a b")]), "name=a+b");
    }

    #[tokio::test]
    async fn missing_socket_is_a_connect_error() {
        let runtime = DockerRuntime::new("/nonexistent/docker.sock", Duration::from_millis(200));
        let err = runtime.start_container("abc").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Connect(_)));
    }
}
