//! Deployment collaborators that only log what they would do.

use microrpc::{
    deploy::{ArtifactRef, ClusterDeployer, Digest, ImageBuilder, Packager},
    BoxFuture,
};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::PathBuf,
};
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct DryRun;

impl Packager for DryRun {
    fn package<'a>(&'a self, files: &'a [PathBuf]) -> BoxFuture<'a, anyhow::Result<ArtifactRef>> {
        Box::pin(async move {
            for file in files {
                info!(file = %file.display(), "would package");
            }
            Ok(ArtifactRef(format!("{} file(s)", files.len())))
        })
    }
}

impl ImageBuilder for DryRun {
    fn build<'a>(
        &'a self,
        artifact: &'a ArtifactRef,
        target: &'a str,
        entry_point: &'a str,
        argument: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Digest>> {
        Box::pin(async move {
            info!(artifact = %artifact.0, target, entry_point, argument, "would build image");
            let mut hasher = DefaultHasher::new();
            (&artifact.0, target, entry_point, argument).hash(&mut hasher);
            Ok(Digest(format!("sha256:{:016x}", hasher.finish())))
        })
    }
}

impl ClusterDeployer for DryRun {
    fn deploy<'a>(&'a self, workload: &'a str, image: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(workload, image, "would deploy and expose on port 80");
            Ok(())
        })
    }
}
