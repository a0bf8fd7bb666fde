//! Typed resource declarations.
//!
//! Each construct owns the configuration of one logical piece of
//! infrastructure, validates it, and renders the provider resources that
//! implement it. A single construct may render several resources: a network
//! renders its subnets, gateways and route tables alongside the VPC itself.
//!
//! | Construct | Renders |
//! |-----------|---------|
//! | [`Network`] | VPC, subnets, route tables, internet/NAT gateways |
//! | [`Repository`] | image repository, optional auto-delete companion |
//! | [`Cluster`] | container cluster |
//! | [`Output`] | a template output |

pub mod cluster;
pub mod network;
pub mod output;
pub mod repository;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::stack::Environment;
use crate::template::TemplateResource;

pub use cluster::{Cluster, ClusterProps};
pub use network::{Network, NetworkProps, SubnetConfiguration, SubnetType};
pub use output::Output;
pub use repository::{
    ImageTagMutability, LifecycleRule, RemovalPolicy, Repository, RepositoryProps, TagStatus,
};

/// Resource type names used by the built-in constructs.
pub mod types {
    pub const VPC: &str = "AWS::EC2::VPC";
    pub const SUBNET: &str = "AWS::EC2::Subnet";
    pub const ROUTE_TABLE: &str = "AWS::EC2::RouteTable";
    pub const ROUTE_TABLE_ASSOCIATION: &str = "AWS::EC2::SubnetRouteTableAssociation";
    pub const ROUTE: &str = "AWS::EC2::Route";
    pub const INTERNET_GATEWAY: &str = "AWS::EC2::InternetGateway";
    pub const GATEWAY_ATTACHMENT: &str = "AWS::EC2::VPCGatewayAttachment";
    pub const EIP: &str = "AWS::EC2::EIP";
    pub const NAT_GATEWAY: &str = "AWS::EC2::NatGateway";
    pub const REPOSITORY: &str = "AWS::ECR::Repository";
    pub const AUTO_DELETE_IMAGES: &str = "Custom::ECRAutoDeleteImages";
    pub const CLUSTER: &str = "AWS::ECS::Cluster";
}

/// A declared piece of infrastructure.
pub trait Construct: std::fmt::Debug + Send + Sync {
    /// Logical id, unique within the stack.
    fn id(&self) -> &str;

    /// Check the construct's own configuration.
    fn validate(&self, env: &Environment) -> Result<()>;

    /// Render the provider resources, keyed by logical id.
    fn render(&self, env: &Environment) -> Result<IndexMap<String, TemplateResource>>;
}

/// Build a logical id from a construct id and a free-form path.
///
/// Non-alphanumeric characters are dropped, so `("AppVpc", "public-subnet")`
/// becomes `AppVpcpublicsubnet`.
pub(crate) fn logical_id(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Add a rendered resource, refusing to overwrite one with the same id.
pub(crate) fn insert_resource(
    resources: &mut IndexMap<String, TemplateResource>,
    construct: &str,
    logical_id: String,
    resource: TemplateResource,
) -> Result<()> {
    if resources.contains_key(&logical_id) {
        return Err(Error::validation(
            construct,
            format!("renders logical id '{}' twice", logical_id),
        ));
    }
    resources.insert(logical_id, resource);
    Ok(())
}

/// `[{"Key": "Name", "Value": name}]` plus any extra tags.
pub(crate) fn name_tags(name: &str, extra: &[(&str, &str)]) -> serde_json::Value {
    let mut tags = vec![serde_json::json!({ "Key": "Name", "Value": name })];
    for (key, value) in extra {
        tags.push(serde_json::json!({ "Key": key, "Value": value }));
    }
    serde_json::Value::Array(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id_strips_punctuation() {
        assert_eq!(
            logical_id(&["AppVpc", "private-isolated-subnet", "Subnet", "1"]),
            "AppVpcprivateisolatedsubnetSubnet1"
        );
    }

    #[test]
    fn test_name_tags() {
        let tags = name_tags("vpc", &[("Tier", "public")]);
        assert_eq!(tags[0]["Value"], "vpc");
        assert_eq!(tags[1]["Key"], "Tier");
    }
}
