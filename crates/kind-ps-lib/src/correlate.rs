//! Correlation of runtime inventory and host processes into process groups

use crate::error::{KindPsError, Result};
use crate::inventory::Inventory;
use crate::models::{Container, Node, PodState, ProcessGroup, ProcessRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Shown for images that carry neither repo tags nor digests
pub const UNTAGGED_IMAGE: &str = "<none>";

/// Drop every label whose key starts with `internal_prefix`
pub fn filter_labels(
    labels: &BTreeMap<String, String>,
    internal_prefix: &str,
) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| !key.starts_with(internal_prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Nanoseconds since the epoch as an RFC 3339 UTC timestamp
pub fn format_created(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Containers of `inventory` that belong to one of its ready pods
pub fn containers_of_ready_pods(inventory: &Inventory) -> impl Iterator<Item = &Container> + '_ {
    let ready: HashSet<&str> = inventory
        .pods
        .iter()
        .filter(|pod| pod.state == PodState::Ready)
        .map(|pod| pod.id.as_str())
        .collect();
    inventory
        .containers
        .iter()
        .filter(move |c| ready.contains(c.pod_id.as_str()))
}

/// Join one node's inventory with resolved PIDs
///
/// Output order is pod order, then container order within each pod.
/// Containers missing from `pids` get an empty process list. A container
/// whose image is not in the inventory fails the whole node.
pub fn correlate(
    node: &Node,
    inventory: &Inventory,
    pids: &HashMap<String, Vec<ProcessRecord>>,
    internal_label_prefix: &str,
) -> Result<Vec<ProcessGroup>> {
    let mut groups = Vec::new();

    for pod in inventory
        .pods
        .iter()
        .filter(|pod| pod.state == PodState::Ready)
    {
        let labels = filter_labels(&pod.labels, internal_label_prefix);

        for container in inventory.containers.iter().filter(|c| c.pod_id == pod.id) {
            let image = inventory.images.get(&container.image_ref).ok_or_else(|| {
                KindPsError::ImageNotFound {
                    node: node.name.clone(),
                    container: container.name.clone(),
                    image: container.image_ref.clone(),
                }
            })?;

            groups.push(ProcessGroup {
                node: node.name.clone(),
                pod: pod.name.clone(),
                container: container.name.clone(),
                image: image.primary_tag().unwrap_or(UNTAGGED_IMAGE).to_string(),
                created: format_created(container.created_at),
                pids: pids.get(&container.id).cloned().unwrap_or_default(),
                labels: labels.clone(),
            });
        }
    }

    Ok(groups)
}
