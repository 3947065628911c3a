//! Provisioning every registered service as its own workload.
//!
//! The actual packaging, image building and cluster calls are collaborators behind the
//! [`Packager`], [`ImageBuilder`] and [`ClusterDeployer`] traits. [`ServiceDeployer`] only
//! sequences them: package once, then build and deploy each service, a few at a time.

use crate::{
    config::DeployConfig,
    registry::{Registry, ServiceDescriptor},
    types::ServiceName,
};
use futures::{future::BoxFuture, stream, StreamExt};
use std::{fmt, path::PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Opaque handle to packaged application files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef(pub String);

/// Content digest of a pushed image, e.g. `sha256:...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest(pub String);

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait Packager: Send + Sync {
    /// Packages the files making up this process's own runnable image.
    fn package<'a>(&'a self, files: &'a [PathBuf]) -> BoxFuture<'a, anyhow::Result<ArtifactRef>>;
}

pub trait ImageBuilder: Send + Sync {
    /// Builds and pushes `target`, running `entry_point` with the single `argument`.
    fn build<'a>(
        &'a self,
        artifact: &'a ArtifactRef,
        target: &'a str,
        entry_point: &'a str,
        argument: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Digest>>;
}

pub trait ClusterDeployer: Send + Sync {
    /// Runs `image` as a reachable workload named `workload`, replacing any previous one.
    fn deploy<'a>(&'a self, workload: &'a str, image: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("packaging failed: {0}")]
    Package(#[source] anyhow::Error),

    #[error("building {image} failed: {source}")]
    Build {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("deploying {workload} failed: {source}")]
    Deploy {
        workload: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub service: ServiceName,
    pub workload: String,
    /// Image reference pinned to the built digest.
    pub image: String,
}

pub struct ServiceDeployer<P, B, D> {
    config: DeployConfig,
    entry_point: String,
    files: Vec<PathBuf>,
    packager: P,
    builder: B,
    deployer: D,
}

impl<P, B, D> ServiceDeployer<P, B, D>
where
    P: Packager,
    B: ImageBuilder,
    D: ClusterDeployer,
{
    /// `entry_point` is what each image runs; it receives the service name to serve.
    pub fn new(
        config: DeployConfig,
        entry_point: impl Into<String>,
        files: Vec<PathBuf>,
        packager: P,
        builder: B,
        deployer: D,
    ) -> Self {
        Self {
            config,
            entry_point: entry_point.into(),
            files,
            packager,
            builder,
            deployer,
        }
    }

    /// Deploys every service in `registry`.
    ///
    /// All services are attempted even if some fail. The first failure, in registry order, is
    /// returned once every attempt has finished.
    pub async fn deploy_all(&self, registry: &Registry) -> Result<Vec<Deployment>, DeployError> {
        let descriptors = registry.descriptors();
        info!(services = descriptors.len(), files = self.files.len(), "packaging");
        let artifact = self
            .packager
            .package(&self.files)
            .await
            .map_err(DeployError::Package)?;

        let results: Vec<_> = stream::iter(&descriptors)
            .map(|descriptor| self.deploy_one(&artifact, descriptor))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut deployments = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => {
                    warn!(error = %e, "deployment failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(deployments),
        }
    }

    async fn deploy_one(
        &self,
        artifact: &ArtifactRef,
        descriptor: &ServiceDescriptor,
    ) -> Result<Deployment, DeployError> {
        let image = format!("{}{}", self.config.image_prefix, descriptor.host);
        info!(service = %descriptor.service, %image, "containerizing");
        let digest = self
            .builder
            .build(artifact, &image, &self.entry_point, descriptor.service.as_str())
            .await
            .map_err(|source| DeployError::Build {
                image: image.clone(),
                source,
            })?;

        let image = format!("{image}@{digest}");
        info!(workload = %descriptor.host, %image, "deploying");
        self.deployer
            .deploy(&descriptor.host, &image)
            .await
            .map_err(|source| DeployError::Deploy {
                workload: descriptor.host.clone(),
                source,
            })?;
        info!(workload = %descriptor.host, "deployed");

        Ok(Deployment {
            service: descriptor.service.clone(),
            workload: descriptor.host.clone(),
            image,
        })
    }
}
