//! Runtime inventory reader
//!
//! Fetches images, pod sandboxes and containers from the CRI runtime inside
//! a node via `crictl ... --output json`. The three reads are independent
//! snapshots; joining them happens in the correlation step.

use crate::error::{KindPsError, Result};
use crate::exec::Gateway;
use crate::models::{Container, Image, Node, Pod, PodState};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ImageList {
    images: Vec<CriImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CriImage {
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    repo_tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    repo_digests: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<CriPod>,
}

#[derive(Debug, Deserialize)]
struct CriPod {
    id: String,
    metadata: CriMetadata,
    state: String,
    #[serde(default, deserialize_with = "null_as_default")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ContainerList {
    containers: Vec<CriContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CriContainer {
    id: String,
    pod_sandbox_id: String,
    image_ref: String,
    metadata: CriMetadata,
    #[serde(deserialize_with = "nanos_from_string_or_number")]
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct CriMetadata {
    name: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// crictl renders int64 fields as JSON strings; accept either form
fn nanos_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn parse<'a, T: Deserialize<'a>>(what: &'static str, stdout: &'a str) -> Result<T> {
    serde_json::from_str(stdout).map_err(|source| KindPsError::Parse { what, source })
}

/// Parse `crictl images --output json` into an id-keyed map
///
/// Tags are repo tags followed by repo digests; either list may be missing.
pub fn parse_images(stdout: &str) -> Result<HashMap<String, Image>> {
    let list: ImageList = parse("crictl images output", stdout)?;
    Ok(list
        .images
        .into_iter()
        .map(|image| {
            let mut tags = image.repo_tags;
            tags.extend(image.repo_digests);
            (
                image.id.clone(),
                Image {
                    id: image.id,
                    tags,
                },
            )
        })
        .collect())
}

/// Parse `crictl pods --output json`, keeping only ready sandboxes
pub fn parse_pods(stdout: &str) -> Result<Vec<Pod>> {
    let list: PodList = parse("crictl pods output", stdout)?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| Pod {
            id: pod.id,
            name: pod.metadata.name,
            state: PodState::from_cri(&pod.state),
            labels: pod.labels,
        })
        .filter(|pod| pod.state == PodState::Ready)
        .collect())
}

/// Parse `crictl ps --output json`
pub fn parse_containers(stdout: &str) -> Result<Vec<Container>> {
    let list: ContainerList = parse("crictl ps output", stdout)?;
    Ok(list
        .containers
        .into_iter()
        .map(|c| Container {
            id: c.id,
            name: c.metadata.name,
            pod_id: c.pod_sandbox_id,
            image_ref: c.image_ref,
            created_at: c.created_at,
        })
        .collect())
}

/// Everything the runtime of one node reported for a single run
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub images: HashMap<String, Image>,
    pub pods: Vec<Pod>,
    pub containers: Vec<Container>,
}

/// Reads CRI state from inside kind nodes
#[derive(Clone)]
pub struct InventoryReader {
    gateway: Gateway,
    crictl_bin: String,
}

impl InventoryReader {
    pub fn new(gateway: Gateway, crictl_bin: impl Into<String>) -> Self {
        Self {
            gateway,
            crictl_bin: crictl_bin.into(),
        }
    }

    async fn crictl(&self, node: &Node, args: &[&str]) -> Result<String> {
        let mut command = Vec::with_capacity(args.len() + 1);
        command.push(self.crictl_bin.as_str());
        command.extend_from_slice(args);
        self.gateway.execute(&node.id, &command).await
    }

    pub async fn list_images(&self, node: &Node) -> Result<HashMap<String, Image>> {
        self.crictl(node, &["images", "--output", "json"])
            .await
            .and_then(|stdout| parse_images(&stdout))
            .map_err(|e| KindPsError::inventory(&node.name, e))
    }

    /// Ready pods whose name matches `pod_filter` (empty matches all)
    pub async fn list_pods(&self, node: &Node, pod_filter: &str) -> Result<Vec<Pod>> {
        self.crictl(node, &["pods", "--output", "json", "--name", pod_filter])
            .await
            .and_then(|stdout| parse_pods(&stdout))
            .map_err(|e| KindPsError::inventory(&node.name, e))
    }

    pub async fn list_containers(&self, node: &Node) -> Result<Vec<Container>> {
        self.crictl(node, &["ps", "--output", "json"])
            .await
            .and_then(|stdout| parse_containers(&stdout))
            .map_err(|e| KindPsError::inventory(&node.name, e))
    }

    /// Run all three reads; any failure discards the whole inventory
    pub async fn collect(&self, node: &Node, pod_filter: &str) -> Result<Inventory> {
        let (images, pods, containers) = tokio::try_join!(
            self.list_images(node),
            self.list_pods(node, pod_filter),
            self.list_containers(node),
        )?;

        debug!(
            node = %node.name,
            images = images.len(),
            pods = pods.len(),
            containers = containers.len(),
            "Read runtime inventory"
        );

        Ok(Inventory {
            images,
            pods,
            containers,
        })
    }
}
