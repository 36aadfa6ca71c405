//! Docker Engine implementation of [`ContainerRuntime`]

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use toolrun_config::RuntimeConfig;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LogStream};

const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Container runtime talking to a Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the configured host, or the local daemon
    pub fn from_config(config: &RuntimeConfig) -> RuntimeResult<Self> {
        let docker = match config.docker_host.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(host, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_http(host, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self::new(docker))
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_not_modified(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 304, .. }
    )
}

fn api_error(error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError { status_code, message } => {
            RuntimeError::Api(format!("{status_code}: {message}"))
        }
        BollardError::DockerStreamError { error } => RuntimeError::Api(error),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

/// Registry answers that mean the image does not exist
fn pull_error(image: &str, error: BollardError) -> RuntimeError {
    let missing = match &error {
        BollardError::DockerResponseServerError { status_code, .. } => *status_code == 404,
        BollardError::DockerStreamError { error } => {
            let error = error.to_lowercase();
            error.contains("not found")
                || error.contains("manifest unknown")
                || error.contains("pull access denied")
                || error.contains("does not exist")
        }
        _ => false,
    };
    if missing {
        RuntimeError::ImageNotFound(image.to_string())
    } else {
        api_error(error)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_network(&self, network: &str) -> RuntimeResult<()> {
        match self
            .docker
            .inspect_network(network, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                info!(network = %network, "Creating container network");
                self.docker
                    .create_network(CreateNetworkOptions {
                        name: network.to_string(),
                        driver: "bridge".to_string(),
                        ..Default::default()
                    })
                    .await
                    .map_err(api_error)?;
                Ok(())
            }
            Err(e) => Err(api_error(e)),
        }
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let (from_image, tag) = image.rsplit_once(':').unwrap_or((image, "latest"));
        info!(image = %image, "Pulling image");

        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: from_image.to_string(),
                    tag: tag.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_for_each(|_| async { Ok(()) })
            .await
            .map_err(|e| pull_error(image, e))
    }

    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        let env = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();

        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(api_error)?;

        for warning in &created.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker warning on create");
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(remove_err) = self.remove(&created.id).await {
                warn!(container_id = %created.id, error = %remove_err, "Failed to remove unstarted container");
            }
            return Err(api_error(e));
        }

        debug!(container_id = %created.id, container = %spec.name, "Started container");
        Ok(ContainerHandle {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogStream> {
        let chunks = self
            .docker
            .logs(
                container_id,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .map_ok(|output| output.into_bytes())
            .map_err(api_error);

        Ok(split_lines(chunks))
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerState> {
        let details = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ContainerNotFound(container_id.to_string())
                } else {
                    api_error(e)
                }
            })?;

        let state = details.state.unwrap_or_default();
        if state.running.unwrap_or(false) {
            Ok(ContainerState::Running)
        } else {
            Ok(ContainerState::Exited {
                exit_code: state.exit_code.unwrap_or(-1),
            })
        }
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: grace.as_secs().max(1) as i64,
        };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) if is_not_found(&e) => {
                Err(RuntimeError::ContainerNotFound(container_id.to_string()))
            }
            Err(e) => Err(api_error(e)),
        }
    }

    async fn remove(&self, container_id: &str) -> RuntimeResult<()> {
        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn health_check(&self) -> RuntimeResult<()> {
        self.docker.ping().await.map(|_| ()).map_err(api_error)
    }
}

/// Reassembles lines from arbitrarily split output chunks
///
/// Bytes are buffered until a newline arrives, so a multi-byte character
/// split across chunks is decoded whole.
#[derive(Debug, Default)]
struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(decode_line(&std::mem::take(&mut self.partial)))
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

fn split_lines<S, B>(chunks: S) -> LogStream
where
    S: Stream<Item = RuntimeResult<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (Box::pin(chunks), LineSplitter::default(), VecDeque::new(), false);

    stream::unfold(state, |(mut chunks, mut splitter, mut ready, mut done)| async move {
        loop {
            if let Some(line) = ready.pop_front() {
                return Some((Ok(line), (chunks, splitter, ready, done)));
            }
            if done {
                return None;
            }
            match chunks.next().await {
                Some(Ok(chunk)) => ready.extend(splitter.push(chunk.as_ref())),
                Some(Err(e)) => {
                    done = true;
                    return Some((Err(e), (chunks, splitter, ready, done)));
                }
                None => {
                    done = true;
                    ready.extend(splitter.finish());
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_splitter() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"PROGRESS:").is_empty());
        assert_eq!(splitter.push(b"50\r\nhello\nwor"), vec!["PROGRESS:50", "hello"]);
        assert_eq!(splitter.push(b"ld\n"), vec!["world"]);
        assert_eq!(splitter.finish(), None);

        splitter.push(b"tail");
        assert_eq!(splitter.finish(), Some("tail".to_string()));
    }

    #[test]
    fn test_line_splitter_keeps_characters_split_across_chunks() {
        let line = "RESULT:{\"name\":\"café\"}\n".as_bytes();
        // Split inside the two-byte encoding of 'é'
        let cut = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut splitter = LineSplitter::default();
        assert!(splitter.push(&line[..cut]).is_empty());
        assert_eq!(splitter.push(&line[cut..]), vec![r#"RESULT:{"name":"café"}"#]);
    }

    #[tokio::test]
    async fn test_split_lines_stream() {
        let chunks = stream::iter(vec![
            Ok("a\nb".to_string()),
            Ok("c\n".to_string()),
            Ok("last".to_string()),
        ]);
        let lines: Vec<_> = split_lines(chunks).collect().await;
        let lines: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["a", "bc", "last"]);
    }

    #[tokio::test]
    async fn test_split_lines_stops_after_error() {
        let chunks = stream::iter(vec![
            Ok("a\n".to_string()),
            Err(RuntimeError::Api("gone".into())),
            Ok("never\n".to_string()),
        ]);
        let items: Vec<_> = split_lines(chunks).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[test]
    fn test_pull_error_classification() {
        let missing = pull_error(
            "mcp/tool-nope:latest",
            BollardError::DockerStreamError {
                error: "manifest unknown".into(),
            },
        );
        assert_eq!(missing, RuntimeError::ImageNotFound("mcp/tool-nope:latest".into()));

        let server = pull_error(
            "mcp/tool-echo:latest",
            BollardError::DockerResponseServerError {
                status_code: 500,
                message: "boom".into(),
            },
        );
        assert!(matches!(server, RuntimeError::Api(_)));
    }
}
