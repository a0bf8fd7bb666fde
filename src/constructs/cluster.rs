//! Container cluster construct.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{types, Construct};
use crate::error::{Error, Result};
use crate::stack::Environment;
use crate::template::{get_att, reference, TemplateResource};

static CLUSTER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,255}$")
        .unwrap_or_else(|e| panic!("invalid cluster name pattern: {}", e))
});

/// Cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProps {
    /// Cluster name
    pub cluster_name: String,
    /// Logical id of the network the cluster runs in
    pub network: Option<String>,
    /// Collect container-level metrics
    pub container_insights: bool,
}

/// Container orchestration cluster.
#[derive(Debug, Clone)]
pub struct Cluster {
    id: String,
    props: ClusterProps,
}

impl Cluster {
    /// Declare a cluster.
    pub fn new(id: impl Into<String>, props: ClusterProps) -> Self {
        Self {
            id: id.into(),
            props,
        }
    }

    /// The configuration.
    pub fn props(&self) -> &ClusterProps {
        &self.props
    }

    /// `Ref` to the cluster name.
    pub fn cluster_name(&self) -> Value {
        reference(&self.id)
    }

    /// The cluster ARN.
    pub fn cluster_arn(&self) -> Value {
        get_att(&self.id, "Arn")
    }
}

impl Construct for Cluster {
    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self, _env: &Environment) -> Result<()> {
        if !CLUSTER_NAME.is_match(&self.props.cluster_name) {
            return Err(Error::validation(
                &self.id,
                format!(
                    "cluster name '{}' must be 1 to 255 letters, digits, '-' or '_'",
                    self.props.cluster_name
                ),
            ));
        }
        Ok(())
    }

    fn render(&self, _env: &Environment) -> Result<IndexMap<String, TemplateResource>> {
        let insights = if self.props.container_insights {
            "enabled"
        } else {
            "disabled"
        };

        let mut cluster = TemplateResource::new(
            types::CLUSTER,
            json!({
                "ClusterName": self.props.cluster_name,
                "ClusterSettings": [{ "Name": "containerInsights", "Value": insights }],
            }),
        );
        if let Some(ref network) = self.props.network {
            cluster = cluster.depends_on(network.as_str());
        }

        let mut resources = IndexMap::new();
        resources.insert(self.id.clone(), cluster);
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new("123456789012", "ca-central-1")
    }

    #[test]
    fn test_render_insights_and_network_dependency() {
        let cluster = Cluster::new(
            "AppCluster",
            ClusterProps {
                cluster_name: "demo-cluster".into(),
                network: Some("AppVpc".into()),
                container_insights: true,
            },
        );
        cluster.validate(&env()).unwrap();

        let resources = cluster.render(&env()).unwrap();
        let rendered = &resources["AppCluster"];
        assert_eq!(rendered.depends_on, vec!["AppVpc"]);
        assert_eq!(
            rendered.properties["ClusterSettings"][0]["Value"],
            "enabled"
        );
    }

    #[test]
    fn test_name_validation() {
        let too_long = "x".repeat(256);
        for bad in ["", "has space", "dot.ted", too_long.as_str()] {
            let cluster = Cluster::new(
                "C",
                ClusterProps {
                    cluster_name: bad.to_string(),
                    ..ClusterProps::default()
                },
            );
            assert!(cluster.validate(&env()).is_err(), "{:?} should fail", bad);
        }
    }
}
