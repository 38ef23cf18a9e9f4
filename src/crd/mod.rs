//! # Custom Resource Definitions
//!
//! CRD types for the Software Factory operator.
//!
//! The `SoftwareFactory` resource is the declared specification the engine converges
//! toward. In managed mode it is also the owner of every managed object; in standalone
//! mode a copy of its spec is stored in the ownership marker instead.

mod status;

pub use status::{Condition, ConditionStatus, SoftwareFactoryStatus};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SoftwareFactory Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: sf.softwarefactory-project.io/v1
/// kind: SoftwareFactory
/// metadata:
///   name: my-sf
/// spec:
///   fqdn: sfop.me
///   zuul:
///     gerritconns:
///       - name: review
///         hostname: review.sfop.me
///         sshkey: gerrit-ssh-key
///     executor:
///       replicas: 2
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "SoftwareFactory",
    group = "sf.softwarefactory-project.io",
    version = "v1",
    namespaced,
    status = "SoftwareFactoryStatus",
    shortname = "sf",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareFactorySpec {
    /// Fully qualified domain name; services are served at https://`service`.`fqdn`
    pub fqdn: String,
    /// Default settings for persistent volume claims
    #[serde(default)]
    pub storage_default: StorageDefaultSpec,
    /// Location of the config repository; the config check job only runs when set
    #[serde(default, rename = "config-location", skip_serializing_if = "Option::is_none")]
    pub config_location: Option<ConfigRepositoryLocationSpec>,
    /// Zuul services and connections
    #[serde(default)]
    pub zuul: ZuulSpec,
    /// Nodepool services
    #[serde(default)]
    pub nodepool: NodepoolSpec,
    /// Zookeeper service
    #[serde(default)]
    pub zookeeper: ZookeeperSpec,
    /// MariaDB service
    #[serde(default)]
    pub mariadb: MariaDbSpec,
    /// Log archive service
    #[serde(default)]
    pub logserver: LogServerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageDefaultSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Volume size as a Kubernetes quantity, e.g. "1Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ConfigRepositoryLocationSpec {
    #[serde(rename = "base-url")]
    pub base_url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(rename = "zuul-connection-name")]
    pub zuul_connection_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZuulSpec {
    #[serde(default)]
    pub gerritconns: Vec<GerritConnection>,
    #[serde(default)]
    pub githubconns: Vec<GitHubConnection>,
    #[serde(default)]
    pub gitlabconns: Vec<GitLabConnection>,
    #[serde(default)]
    pub pagureconns: Vec<PagureConnection>,
    #[serde(default)]
    pub gitconns: Vec<GitConnection>,
    #[serde(default)]
    pub executor: ZuulExecutorSpec,
    #[serde(default)]
    pub scheduler: ZuulSchedulerSpec,
    #[serde(default)]
    pub web: ZuulWebSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GerritConnection {
    pub name: String,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Name of the secret holding the SSH deploy key for this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sshkey: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitHubConnection {
    pub name: String,
    #[serde(default, rename = "appID", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<i64>,
    /// Name of the secret holding the app key and webhook token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitLabConnection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Name of the secret holding the API token and webhook token
    pub secrets: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PagureConnection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitConnection {
    pub name: String,
    pub baseurl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZuulExecutorSpec {
    /// Set to false to run executors outside of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub storage: StorageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZuulSchedulerSpec {
    #[serde(default)]
    pub storage: StorageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZuulWebSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodepoolSpec {
    #[serde(default)]
    pub launcher: NodepoolLauncherSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodepoolLauncherSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperSpec {
    #[serde(default)]
    pub storage: StorageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MariaDbSpec {
    #[serde(default)]
    pub db_storage: StorageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_delay: Option<i32>,
    #[serde(default)]
    pub storage: StorageSpec,
}

impl SoftwareFactorySpec {
    /// Names of every declared connection, in declaration order, all kinds combined
    pub fn connection_names(&self) -> Vec<&str> {
        let zuul = &self.zuul;
        zuul.gerritconns
            .iter()
            .map(|c| c.name.as_str())
            .chain(zuul.githubconns.iter().map(|c| c.name.as_str()))
            .chain(zuul.gitlabconns.iter().map(|c| c.name.as_str()))
            .chain(zuul.pagureconns.iter().map(|c| c.name.as_str()))
            .chain(zuul.gitconns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Credentials referenced by the declared connections, sorted and deduplicated
    pub fn connection_secrets(&self) -> Vec<String> {
        let zuul = &self.zuul;
        let mut names: Vec<String> = zuul
            .gerritconns
            .iter()
            .filter_map(|c| c.sshkey.clone())
            .chain(zuul.githubconns.iter().filter_map(|c| c.secrets.clone()))
            .chain(zuul.gitlabconns.iter().map(|c| c.secrets.clone()))
            .chain(zuul.pagureconns.iter().filter_map(|c| c.secrets.clone()))
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn executor_enabled(&self) -> bool {
        self.zuul.executor.enabled.unwrap_or(true)
    }

    pub fn executor_replicas(&self) -> i32 {
        self.zuul.executor.replicas.unwrap_or(1).max(1)
    }

    pub fn launcher_enabled(&self) -> bool {
        self.nodepool.launcher.enabled.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r"
apiVersion: sf.softwarefactory-project.io/v1
kind: SoftwareFactory
metadata:
  name: my-sf
spec:
  fqdn: sfop.me
  config-location:
    base-url: https://review.sfop.me
    name: config
    zuul-connection-name: review
  zuul:
    gerritconns:
      - name: review
        hostname: review.sfop.me
        sshkey: gerrit-ssh-key
    gitlabconns:
      - name: gitlab
        secrets: gitlab-secrets
    githubconns:
      - name: github
        appID: 42
        secrets: gitlab-secrets
    executor:
      replicas: 2
";

    #[test]
    fn test_manifest_parsing() {
        let sf: SoftwareFactory = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(sf.metadata.name.as_deref(), Some("my-sf"));
        assert_eq!(sf.spec.fqdn, "sfop.me");
        assert_eq!(
            sf.spec.config_location.as_ref().map(|c| c.zuul_connection_name.as_str()),
            Some("review")
        );
        assert_eq!(sf.spec.zuul.githubconns[0].app_id, Some(42));
        assert_eq!(sf.spec.executor_replicas(), 2);
        assert!(sf.spec.executor_enabled());
    }

    #[test]
    fn test_connection_secrets_are_deduplicated() {
        let sf: SoftwareFactory = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(
            sf.spec.connection_secrets(),
            vec!["gerrit-ssh-key".to_string(), "gitlab-secrets".to_string()]
        );
    }

    #[test]
    fn test_connection_names_cover_all_kinds() {
        let sf: SoftwareFactory = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(sf.spec.connection_names(), vec!["review", "github", "gitlab"]);
    }
}
