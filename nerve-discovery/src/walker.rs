//! Tree traversal and per-node decoding
//!
//! Layout: `<root>/<service>/<suffix>/<instance>`, one JSON registration per
//! instance node. Listing failures are pass-level; anything wrong with a
//! single instance node only drops that node.

use futures::future::join_all;

use nerve_core::{ServiceFailurePolicy, ZookeeperConfig};

use crate::error::{Error, Result};
use crate::record::ServiceRecord;
use crate::store::{join_path, StoreSession};

/// Where registrations live in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLayout {
    pub root_path: String,
    pub instance_subpath: String,
}

impl TreeLayout {
    #[must_use]
    pub fn new(root_path: impl Into<String>, instance_subpath: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            instance_subpath: instance_subpath.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ZookeeperConfig) -> Self {
        Self::new(
            config.root_service_path.clone(),
            config.services_suffix_path.clone(),
        )
    }

    /// Parent of the instance nodes of `service`
    #[must_use]
    pub fn instances_path(&self, service: &str) -> String {
        join_path(&join_path(&self.root_path, service), &self.instance_subpath)
    }
}

/// A decoded registration and where it was found
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub service: String,
    pub node_path: String,
    pub record: ServiceRecord,
}

/// Traversal counters for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub services: usize,
    pub skipped_services: usize,
    pub nodes: usize,
    pub dropped_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct TreeWalker {
    layout: TreeLayout,
    policy: ServiceFailurePolicy,
}

impl TreeWalker {
    #[must_use]
    pub fn new(layout: TreeLayout, policy: ServiceFailurePolicy) -> Self {
        Self { layout, policy }
    }

    #[must_use]
    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    /// Read every registration under the root.
    ///
    /// Services are walked concurrently, as are the instances of each
    /// service; everything completes before this returns, so the caller may
    /// close the session right after.
    pub async fn walk(&self, session: &dyn StoreSession) -> Result<(Vec<Candidate>, WalkStats)> {
        let root = &self.layout.root_path;
        let services = session.list_children(root).await.map_err(|e| match e {
            Error::NoNode(_) => Error::Listing {
                path: root.clone(),
                message: "root path does not exist".to_string(),
            },
            other => other,
        })?;
        tracing::debug!(root = %root, count = services.len(), "Listed services");

        let walks = join_all(
            services
                .iter()
                .map(|service| self.walk_service(session, service)),
        )
        .await;

        let mut stats = WalkStats {
            services: services.len(),
            ..WalkStats::default()
        };
        let mut candidates = Vec::new();

        for (service, walked) in services.iter().zip(walks) {
            match walked {
                Ok((found, seen)) => {
                    stats.nodes += seen;
                    stats.dropped_nodes += seen - found.len();
                    candidates.extend(found);
                }
                Err(e) => {
                    let skippable = matches!(e, Error::Listing { .. } | Error::NoNode(_));
                    if self.policy == ServiceFailurePolicy::SkipService && skippable {
                        tracing::warn!(service = %service, error = %e, "Service listing failed, skipping service");
                        stats.skipped_services += 1;
                    } else {
                        tracing::error!(service = %service, error = %e, "Service discovery failed, aborting pass");
                        return Err(e);
                    }
                }
            }
        }

        Ok((candidates, stats))
    }

    /// Returns the decoded candidates plus the number of nodes listed
    async fn walk_service(
        &self,
        session: &dyn StoreSession,
        service: &str,
    ) -> Result<(Vec<Candidate>, usize)> {
        let path = self.layout.instances_path(service);
        tracing::debug!(service = %service, path = %path, "Discovering instances");

        let nodes = session.list_children(&path).await?;
        let reads = join_all(nodes.iter().map(|node| {
            let node_path = join_path(&path, node);
            async move {
                let record = read_node(session, &node_path).await?;
                Ok::<_, Error>(record.map(|record| Candidate {
                    service: service.to_string(),
                    node_path,
                    record,
                }))
            }
        }))
        .await;

        let mut found = Vec::with_capacity(nodes.len());
        for read in reads {
            if let Some(candidate) = read? {
                found.push(candidate);
            }
        }

        Ok((found, nodes.len()))
    }
}

/// Read and decode one instance node.
///
/// `Ok(None)` means the node was dropped: deleted before it could be read,
/// or its payload is not a usable registration. Errors are session-level.
async fn read_node(session: &dyn StoreSession, path: &str) -> Result<Option<ServiceRecord>> {
    tracing::debug!(path = %path, "Loading instance node");

    let listed = match session.exists(path).await {
        Ok(Some(stat)) => stat,
        Ok(None) => {
            tracing::warn!(path = %path, "Instance node disappeared after listing, dropping");
            return Ok(None);
        }
        Err(e) if e.is_node_level() => {
            tracing::warn!(path = %path, error = %e, "Instance node unreadable, dropping");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let (data, current) = match session.get_data(path).await {
        Ok(read) => read,
        Err(e) if e.is_node_level() => {
            tracing::warn!(path = %path, error = %e, "Instance node deleted before read, dropping");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if current.version != listed.version {
        tracing::debug!(
            path = %path,
            listed_version = listed.version,
            read_version = current.version,
            "Instance node rewritten during read, using latest payload"
        );
    }

    match ServiceRecord::decode(&data) {
        Ok(record) => {
            tracing::debug!(path = %path, record = %record, "Decoded instance node");
            Ok(Some(record))
        }
        Err(e) => {
            let e = Error::Decode {
                path: path.to_string(),
                message: e.to_string(),
            };
            tracing::warn!(path = %path, error = %e, "Malformed instance node, dropping");
            Ok(None)
        }
    }
}
