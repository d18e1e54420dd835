//! Kubernetes client construction

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// Build a client from an explicit kubeconfig, or infer one from the
/// environment (KUBECONFIG, ~/.kube/config, in-cluster service account)
pub async fn kube_client(kubeconfig: Option<&str>) -> Result<Client> {
    let config = match kubeconfig {
        // A KUBECONFIG list of several files is merged by inference
        Some(path) if std::env::split_paths(path).count() == 1 => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig '{}'", path))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("Failed to load kubeconfig")?
        }
        _ => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    Client::try_from(config).context("Failed to create Kubernetes client")
}
