//! Controller flags and storage adapter setup

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Args;
use tracing::{info, warn};

use autobucket_common::crd::BucketCloud;
use autobucket_common::AUTOBUCKET_SYSTEM_NAMESPACE;
use autobucket_storage::gcs::DEFAULT_GCS_ENDPOINT;
use autobucket_storage::{CloudAdapters, GcsAuth, GcsJsonApi, PurgingStorageAdapter, StorageError};

/// Flags for `autobucket controller`
#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Address for the /healthz and /readyz endpoints
    #[arg(
        long,
        env = "AUTOBUCKET_HEALTH_ADDR",
        default_value = "0.0.0.0:8080",
        global = true
    )]
    pub health_addr: SocketAddr,

    /// Only reconcile while holding the leader Lease
    #[arg(long, env = "AUTOBUCKET_LEADER_ELECTION", global = true)]
    pub enable_leader_election: bool,

    /// Namespace of the leader Lease
    #[arg(
        long,
        env = "POD_NAMESPACE",
        default_value = AUTOBUCKET_SYSTEM_NAMESPACE,
        global = true
    )]
    pub lease_namespace: String,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub gcp: GcpConfig,
}

/// Google Cloud Storage settings
#[derive(Args, Debug, Clone)]
pub struct GcpConfig {
    /// Project new buckets are created in; GCP support is off without it
    #[arg(long = "gcp-project", env = "GCP_PROJECT", global = true)]
    pub project: Option<String>,

    /// Fixed bearer token; the metadata server is used when unset
    #[arg(
        long = "gcp-access-token",
        env = "GCP_ACCESS_TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub access_token: Option<String>,

    /// JSON API endpoint, e.g. a local emulator
    #[arg(
        long = "gcs-endpoint",
        env = "GCS_ENDPOINT",
        default_value = DEFAULT_GCS_ENDPOINT,
        global = true
    )]
    pub endpoint: String,

    /// Send no credentials at all, for emulators such as fake-gcs-server
    #[arg(long = "gcs-anonymous", env = "GCS_ANONYMOUS", global = true)]
    pub anonymous: bool,
}

impl GcpConfig {
    fn auth(&self) -> GcsAuth {
        if self.anonymous {
            return GcsAuth::Anonymous;
        }
        match self.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => GcsAuth::Static(token.to_string()),
            None => GcsAuth::metadata_server(),
        }
    }
}

/// Build the adapter registry for every configured cloud
///
/// A cloud without configuration gets no adapter; Buckets for it are
/// reported and left alone by the bucket controller.
pub fn build_adapters(gcp: &GcpConfig) -> Result<CloudAdapters, StorageError> {
    let mut adapters = CloudAdapters::new();

    match gcp.project.as_deref().filter(|p| !p.is_empty()) {
        Some(project) => {
            let api = GcsJsonApi::new(&gcp.endpoint, project, gcp.auth())?;
            adapters.register(BucketCloud::Gcp, Arc::new(PurgingStorageAdapter::new(api)));
            info!(project, endpoint = %gcp.endpoint, "GCS adapter registered");
        }
        None => warn!("No GCP project configured, gcp Buckets will not be provisioned"),
    }

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: ControllerArgs,
    }

    fn gcp(project: Option<&str>, token: Option<&str>, endpoint: &str) -> GcpConfig {
        GcpConfig {
            project: project.map(String::from),
            access_token: token.map(String::from),
            endpoint: endpoint.to_string(),
            anonymous: false,
        }
    }

    #[test]
    fn explicit_flags_are_parsed() {
        let cli = TestCli::try_parse_from([
            "autobucket",
            "--health-addr",
            "127.0.0.1:9090",
            "--enable-leader-election",
            "--lease-namespace",
            "ops",
            "--gcp-project",
            "my-project",
            "--gcs-endpoint",
            "http://localhost:4443",
        ])
        .unwrap();

        assert_eq!(cli.args.health_addr, "127.0.0.1:9090".parse().unwrap());
        assert!(cli.args.enable_leader_election);
        assert_eq!(cli.args.lease_namespace, "ops");
        assert_eq!(cli.args.gcp.project.as_deref(), Some("my-project"));
        assert_eq!(cli.args.gcp.endpoint, "http://localhost:4443");
    }

    #[test]
    fn invalid_health_addr_is_rejected() {
        assert!(TestCli::try_parse_from(["autobucket", "--health-addr", "not-an-addr"]).is_err());
    }

    #[test]
    fn no_project_means_no_gcp_adapter() {
        for project in [None, Some("")] {
            let adapters = build_adapters(&gcp(project, None, DEFAULT_GCS_ENDPOINT)).unwrap();
            assert!(adapters.get(&BucketCloud::Gcp).is_none());
            assert!(adapters.clouds().is_empty());
        }
    }

    #[test]
    fn project_registers_gcp_adapter() {
        let adapters =
            build_adapters(&gcp(Some("my-project"), Some("token"), DEFAULT_GCS_ENDPOINT)).unwrap();
        assert!(adapters.get(&BucketCloud::Gcp).is_some());
        assert!(adapters
            .get(&BucketCloud::Unrecognized("azure".to_string()))
            .is_none());
    }

    #[test]
    fn bad_endpoint_is_a_config_error() {
        let err = build_adapters(&gcp(Some("my-project"), None, "not a url")).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn token_selects_static_auth() {
        assert!(matches!(
            gcp(Some("p"), Some("secret"), DEFAULT_GCS_ENDPOINT).auth(),
            GcsAuth::Static(ref t) if t == "secret"
        ));
        assert!(matches!(
            gcp(Some("p"), Some(""), DEFAULT_GCS_ENDPOINT).auth(),
            GcsAuth::MetadataServer { .. }
        ));
        assert!(matches!(
            gcp(Some("p"), None, DEFAULT_GCS_ENDPOINT).auth(),
            GcsAuth::MetadataServer { .. }
        ));

        let emulator = GcpConfig {
            anonymous: true,
            ..gcp(Some("p"), Some("secret"), "http://localhost:4443")
        };
        assert!(matches!(emulator.auth(), GcsAuth::Anonymous));
    }
}
