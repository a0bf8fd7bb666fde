//! The Ontario health visualisation stack.
//!
//! One network with public and isolated subnets over two zones and no NAT,
//! one image repository for the water quality service, and one cluster in
//! that network.

use serde::{Deserialize, Serialize};

use crate::cidr::Ipv4Cidr;
use crate::constructs::{
    Cluster, ClusterProps, LifecycleRule, Network, NetworkProps, Output, RemovalPolicy,
    Repository, RepositoryProps, SubnetConfiguration, SubnetType, TagStatus,
};
use crate::error::Result;
use crate::stack::{Environment, Stack};

/// Default stack name.
pub const STACK_NAME: &str = "IacStack";

/// Where and under which name the stack is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackProps {
    /// Stack name
    pub stack_name: String,
    /// Target account and region
    pub env: Environment,
}

impl Default for StackProps {
    fn default() -> Self {
        Self {
            stack_name: STACK_NAME.to_string(),
            env: Environment::default(),
        }
    }
}

/// Declare the stack.
pub fn health_viz_stack(props: StackProps) -> Result<Stack> {
    let mut stack = Stack::new(props.stack_name, props.env)
        .with_description("Ontario health visualisation: network, image registry and cluster");

    let vpc = Network::new(
        "AppVpc",
        NetworkProps {
            vpc_name: Some("ontario-health-viz-vpc".to_string()),
            cidr: "10.0.0.0/16".parse::<Ipv4Cidr>()?,
            max_azs: 2,
            nat_gateways: Some(0),
            subnet_configuration: vec![
                SubnetConfiguration::new("public-subnet", 24, SubnetType::Public),
                SubnetConfiguration::new(
                    "private-isolated-subnet",
                    24,
                    SubnetType::PrivateIsolated,
                ),
            ],
            ..NetworkProps::default()
        },
    );

    let repository = Repository::new(
        "WaterQualityRepo",
        RepositoryProps {
            repository_name: "ontario-health-viz/water-quality-service".to_string(),
            image_scan_on_push: true,
            lifecycle_rules: vec![LifecycleRule::keep_last(10)
                .with_description("Keep only last 10 images")
                .with_priority(1)
                .with_tag_status(TagStatus::Any)],
            removal_policy: RemovalPolicy::Destroy,
            auto_delete_images: true,
            ..RepositoryProps::default()
        },
    );

    let cluster = Cluster::new(
        "AppCluster",
        ClusterProps {
            cluster_name: "ontario-health-viz-cluster".to_string(),
            network: Some("AppVpc".to_string()),
            container_insights: true,
        },
    );

    stack.add_output(
        Output::new("EcrRepoUri", repository.repository_uri())
            .with_description("URI of the ECR repository for the water quality service"),
    )?;
    stack.add_output(
        Output::new("EcsClusterName", cluster.cluster_name())
            .with_description("Name of the ECS Cluster"),
    )?;
    stack.add_output(Output::new("VpcId", vpc.vpc_id()).with_description("The ID of the VPC"))?;

    stack.add(vpc)?;
    stack.add(repository)?;
    stack.add(cluster)?;

    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::types;
    use crate::template::DeletionPolicy;
    use serde_json::json;

    #[test]
    fn test_declares_three_constructs_and_outputs() {
        let stack = health_viz_stack(StackProps::default()).unwrap();
        let ids: Vec<&str> = stack.constructs().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["AppVpc", "WaterQualityRepo", "AppCluster"]);

        let outputs: Vec<&str> = stack.outputs().iter().map(|o| o.name()).collect();
        assert_eq!(outputs, vec!["EcrRepoUri", "EcsClusterName", "VpcId"]);
        assert_eq!(stack.name(), STACK_NAME);
    }

    #[test]
    fn test_synthesized_values() {
        let template = health_viz_stack(StackProps::default())
            .unwrap()
            .synthesize()
            .unwrap();

        assert_eq!(template.resources["AppVpc"].properties["CidrBlock"], "10.0.0.0/16");
        assert_eq!(template.resources_of_type(types::SUBNET).len(), 4);
        assert!(template.resources_of_type(types::NAT_GATEWAY).is_empty());

        let repo = &template.resources["WaterQualityRepo"];
        assert_eq!(repo.deletion_policy, DeletionPolicy::Delete);
        assert_eq!(
            repo.properties["ImageScanningConfiguration"],
            json!({ "ScanOnPush": true })
        );
        assert_eq!(template.resources_of_type(types::AUTO_DELETE_IMAGES).len(), 1);

        let cluster = &template.resources["AppCluster"];
        assert_eq!(cluster.properties["ClusterName"], "ontario-health-viz-cluster");
        assert_eq!(cluster.depends_on, vec!["AppVpc"]);

        assert_eq!(
            template.outputs["EcsClusterName"].description.as_deref(),
            Some("Name of the ECS Cluster")
        );
    }

    #[test]
    fn test_environment_override() {
        let props = StackProps {
            stack_name: "Staging".into(),
            env: Environment::new("210987654321", "us-east-1"),
        };
        let template = health_viz_stack(props).unwrap().synthesize().unwrap();
        let zones: Vec<&str> = template
            .resources_of_type(types::SUBNET)
            .iter()
            .filter_map(|id| template.resources[*id].properties["AvailabilityZone"].as_str())
            .collect();
        assert!(zones.iter().all(|z| z.starts_with("us-east-1")));
    }
}
