//! Virtual network construct.
//!
//! A [`Network`] declares a VPC with an address range, a number of
//! availability zones and an ordered list of subnet groups. Every group gets
//! one subnet per availability zone; subnet ranges are carved sequentially from
//! the parent range (group order first, then zone order).
//!
//! ## Reachability classes
//!
//! | Subnet type | Default route |
//! |-------------|---------------|
//! | `Public` | internet gateway |
//! | `PrivateWithEgress` | NAT gateway in a public subnet |
//! | `PrivateIsolated` | none |

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{insert_resource, logical_id, name_tags, types, Construct};
use crate::cidr::{Ipv4Cidr, SubnetCarver, DEFAULT_NETWORK_RANGE};
use crate::error::{Error, Result};
use crate::stack::{Environment, MAX_AVAILABILITY_ZONES};
use crate::template::{get_att, reference, TemplateResource};

/// Reachability class of a subnet group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetType {
    /// Routed to the internet through an internet gateway.
    Public,
    /// Outbound-only internet access through a NAT gateway.
    PrivateWithEgress,
    /// No route outside the network.
    PrivateIsolated,
}

impl SubnetType {
    /// Short label used in tags.
    pub fn label(&self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::PrivateWithEgress => "Private",
            SubnetType::PrivateIsolated => "Isolated",
        }
    }
}

/// One named subnet group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfiguration {
    /// Group name, unique within the network
    pub name: String,
    /// Prefix length of each subnet in the group
    pub cidr_mask: u8,
    /// Reachability class
    pub subnet_type: SubnetType,
}

impl SubnetConfiguration {
    /// Create a subnet group.
    pub fn new(name: impl Into<String>, cidr_mask: u8, subnet_type: SubnetType) -> Self {
        Self {
            name: name.into(),
            cidr_mask,
            subnet_type,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProps {
    /// Name tag of the VPC (defaults to the construct id)
    pub vpc_name: Option<String>,
    /// Parent address range
    pub cidr: Ipv4Cidr,
    /// Number of availability zones to spread subnets across
    pub max_azs: usize,
    /// NAT gateway count; `None` means one per zone if any group needs egress
    pub nat_gateways: Option<usize>,
    /// Subnet groups in layout order
    pub subnet_configuration: Vec<SubnetConfiguration>,
    /// Resolve DNS names inside the network
    pub enable_dns_support: bool,
    /// Assign DNS hostnames to instances
    pub enable_dns_hostnames: bool,
}

impl Default for NetworkProps {
    fn default() -> Self {
        Self {
            vpc_name: None,
            cidr: DEFAULT_NETWORK_RANGE,
            max_azs: 3,
            nat_gateways: None,
            subnet_configuration: vec![
                SubnetConfiguration::new("Public", 24, SubnetType::Public),
                SubnetConfiguration::new("Private", 24, SubnetType::PrivateWithEgress),
            ],
            enable_dns_support: true,
            enable_dns_hostnames: true,
        }
    }
}

/// A subnet as laid out by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetLayout {
    /// Logical id of the subnet resource
    pub logical_id: String,
    /// Group the subnet belongs to
    pub group: String,
    /// Reachability class
    pub subnet_type: SubnetType,
    /// Availability zone
    pub availability_zone: String,
    /// 0-based zone index
    pub zone_index: usize,
    /// Carved range
    pub cidr: Ipv4Cidr,
}

/// Virtual network construct.
#[derive(Debug, Clone)]
pub struct Network {
    id: String,
    props: NetworkProps,
}

impl Network {
    /// Declare a network.
    pub fn new(id: impl Into<String>, props: NetworkProps) -> Self {
        Self {
            id: id.into(),
            props,
        }
    }

    /// The configuration.
    pub fn props(&self) -> &NetworkProps {
        &self.props
    }

    /// The VPC name tag.
    pub fn vpc_name(&self) -> &str {
        self.props.vpc_name.as_deref().unwrap_or(&self.id)
    }

    /// `Ref` to the VPC id.
    pub fn vpc_id(&self) -> serde_json::Value {
        reference(&self.id)
    }

    /// NAT gateway count after applying the default.
    pub fn effective_nat_gateways(&self) -> usize {
        self.props.nat_gateways.unwrap_or_else(|| {
            if self.has_group(SubnetType::PrivateWithEgress) {
                self.props.max_azs
            } else {
                0
            }
        })
    }

    fn has_group(&self, subnet_type: SubnetType) -> bool {
        self.props
            .subnet_configuration
            .iter()
            .any(|g| g.subnet_type == subnet_type)
    }

    fn internet_gateway_id(&self) -> String {
        logical_id(&[self.id.as_str(), "IGW"])
    }

    fn gateway_attachment_id(&self) -> String {
        logical_id(&[self.id.as_str(), "VPCGW"])
    }

    /// Lay out every subnet of every group.
    pub fn subnets(&self, env: &Environment) -> Result<Vec<SubnetLayout>> {
        let zones = env.availability_zones(self.props.max_azs);
        let mut carver = SubnetCarver::new(self.props.cidr);
        let mut layout = Vec::new();

        for group in &self.props.subnet_configuration {
            for (zone_index, zone) in zones.iter().enumerate() {
                let cidr = carver.next_subnet(group.cidr_mask).map_err(|e| {
                    Error::validation(
                        &self.id,
                        format!("subnet group '{}' does not fit: {}", group.name, e),
                    )
                })?;
                layout.push(SubnetLayout {
                    logical_id: logical_id(&[
                        self.id.as_str(),
                        group.name.as_str(),
                        "Subnet",
                        (zone_index + 1).to_string().as_str(),
                    ]),
                    group: group.name.clone(),
                    subnet_type: group.subnet_type,
                    availability_zone: zone.clone(),
                    zone_index,
                    cidr,
                });
            }
        }

        Ok(layout)
    }
}

impl Construct for Network {
    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self, env: &Environment) -> Result<()> {
        let props = &self.props;

        if props.max_azs == 0 {
            return Err(Error::validation(&self.id, "max_azs must be at least 1"));
        }
        if props.max_azs > MAX_AVAILABILITY_ZONES {
            return Err(Error::validation(
                &self.id,
                format!(
                    "max_azs ({}) exceeds the {} availability zones of a region",
                    props.max_azs, MAX_AVAILABILITY_ZONES
                ),
            ));
        }
        if props.subnet_configuration.is_empty() {
            return Err(Error::validation(
                &self.id,
                "at least one subnet group is required",
            ));
        }

        // Keyed by the id fragment the group renders to
        let mut seen = std::collections::HashMap::new();
        for group in &props.subnet_configuration {
            let fragment = logical_id(&[group.name.as_str()]);
            if fragment.is_empty() {
                return Err(Error::validation(
                    &self.id,
                    format!(
                        "subnet group name '{}' needs at least one letter or digit",
                        group.name
                    ),
                ));
            }
            if let Some(previous) = seen.insert(fragment, group.name.as_str()) {
                let message = if previous == group.name {
                    format!("duplicate subnet group name '{}'", group.name)
                } else {
                    format!(
                        "subnet group names '{}' and '{}' render to the same resource ids",
                        previous, group.name
                    )
                };
                return Err(Error::validation(&self.id, message));
            }
            if !(16..=28).contains(&group.cidr_mask) {
                return Err(Error::validation(
                    &self.id,
                    format!(
                        "subnet group '{}': cidr_mask /{} must be between /16 and /28",
                        group.name, group.cidr_mask
                    ),
                ));
            }
            if group.cidr_mask < props.cidr.prefix_len() {
                return Err(Error::validation(
                    &self.id,
                    format!(
                        "subnet group '{}': /{} is larger than the network range {}",
                        group.name, group.cidr_mask, props.cidr
                    ),
                ));
            }
        }

        let nat_gateways = self.effective_nat_gateways();
        if nat_gateways > 0 && !self.has_group(SubnetType::Public) {
            return Err(Error::validation(
                &self.id,
                "NAT gateways require a public subnet group to live in",
            ));
        }
        if nat_gateways == 0 && self.has_group(SubnetType::PrivateWithEgress) {
            return Err(Error::validation(
                &self.id,
                "subnet groups with egress need at least one NAT gateway",
            ));
        }
        if nat_gateways > props.max_azs {
            return Err(Error::validation(
                &self.id,
                format!(
                    "nat_gateways ({}) cannot exceed max_azs ({})",
                    nat_gateways, props.max_azs
                ),
            ));
        }

        // Carving validates that everything fits in the parent range
        self.subnets(env).map(|_| ())
    }

    fn render(&self, env: &Environment) -> Result<IndexMap<String, TemplateResource>> {
        let props = &self.props;
        let subnets = self.subnets(env)?;
        let mut resources = IndexMap::new();

        insert_resource(
            &mut resources,
            &self.id,
            self.id.clone(),
            TemplateResource::new(
                types::VPC,
                json!({
                    "CidrBlock": props.cidr.to_string(),
                    "EnableDnsHostnames": props.enable_dns_hostnames,
                    "EnableDnsSupport": props.enable_dns_support,
                    "InstanceTenancy": "default",
                    "Tags": name_tags(self.vpc_name(), &[]),
                }),
            ),
        )?;

        let has_public = self.has_group(SubnetType::Public);
        if has_public {
            insert_resource(
                &mut resources,
                &self.id,
                self.internet_gateway_id(),
                TemplateResource::new(
                    types::INTERNET_GATEWAY,
                    json!({ "Tags": name_tags(self.vpc_name(), &[]) }),
                ),
            )?;
            insert_resource(
                &mut resources,
                &self.id,
                self.gateway_attachment_id(),
                TemplateResource::new(
                    types::GATEWAY_ATTACHMENT,
                    json!({
                        "VpcId": self.vpc_id(),
                        "InternetGatewayId": reference(&self.internet_gateway_id()),
                    }),
                ),
            )?;
        }

        // NAT gateways live in the first public group, one per zone
        let nat_count = self.effective_nat_gateways();
        let nat_hosts: Vec<&SubnetLayout> = props
            .subnet_configuration
            .iter()
            .find(|g| g.subnet_type == SubnetType::Public)
            .map(|g| {
                subnets
                    .iter()
                    .filter(|s| s.group == g.name)
                    .take(nat_count)
                    .collect()
            })
            .unwrap_or_default();
        let nat_ids: Vec<String> = nat_hosts
            .iter()
            .map(|s| logical_id(&[s.logical_id.as_str(), "NATGateway"]))
            .collect();

        for subnet in &subnets {
            let name = format!("{}/{}Subnet{}", self.vpc_name(), subnet.group, subnet.zone_index + 1);
            insert_resource(
                &mut resources,
                &self.id,
                subnet.logical_id.clone(),
                TemplateResource::new(
                    types::SUBNET,
                    json!({
                        "VpcId": self.vpc_id(),
                        "CidrBlock": subnet.cidr.to_string(),
                        "AvailabilityZone": subnet.availability_zone,
                        "MapPublicIpOnLaunch": subnet.subnet_type == SubnetType::Public,
                        "Tags": name_tags(&name, &[
                            ("stackform:subnet-name", subnet.group.as_str()),
                            ("stackform:subnet-type", subnet.subnet_type.label()),
                        ]),
                    }),
                ),
            )?;

            let route_table_id = logical_id(&[subnet.logical_id.as_str(), "RouteTable"]);
            insert_resource(
                &mut resources,
                &self.id,
                route_table_id.clone(),
                TemplateResource::new(
                    types::ROUTE_TABLE,
                    json!({
                        "VpcId": self.vpc_id(),
                        "Tags": name_tags(&name, &[]),
                    }),
                ),
            )?;
            insert_resource(
                &mut resources,
                &self.id,
                logical_id(&[subnet.logical_id.as_str(), "RouteTableAssociation"]),
                TemplateResource::new(
                    types::ROUTE_TABLE_ASSOCIATION,
                    json!({
                        "RouteTableId": reference(&route_table_id),
                        "SubnetId": reference(&subnet.logical_id),
                    }),
                ),
            )?;

            let route_id = logical_id(&[subnet.logical_id.as_str(), "DefaultRoute"]);
            match subnet.subnet_type {
                SubnetType::Public => {
                    insert_resource(
                        &mut resources,
                        &self.id,
                        route_id,
                        TemplateResource::new(
                            types::ROUTE,
                            json!({
                                "RouteTableId": reference(&route_table_id),
                                "DestinationCidrBlock": "0.0.0.0/0",
                                "GatewayId": reference(&self.internet_gateway_id()),
                            }),
                        )
                        .depends_on(self.gateway_attachment_id()),
                    )?;
                }
                SubnetType::PrivateWithEgress => {
                    if nat_ids.is_empty() {
                        return Err(Error::validation(
                            &self.id,
                            "subnet groups with egress need at least one NAT gateway",
                        ));
                    }
                    let nat_id = &nat_ids[subnet.zone_index % nat_ids.len()];
                    insert_resource(
                        &mut resources,
                        &self.id,
                        route_id,
                        TemplateResource::new(
                            types::ROUTE,
                            json!({
                                "RouteTableId": reference(&route_table_id),
                                "DestinationCidrBlock": "0.0.0.0/0",
                                "NatGatewayId": reference(nat_id),
                            }),
                        ),
                    )?;
                }
                SubnetType::PrivateIsolated => {}
            }
        }

        for (host, nat_id) in nat_hosts.iter().zip(&nat_ids) {
            let eip_id = logical_id(&[host.logical_id.as_str(), "EIP"]);
            insert_resource(
                &mut resources,
                &self.id,
                eip_id.clone(),
                TemplateResource::new(types::EIP, json!({ "Domain": "vpc" })),
            )?;
            insert_resource(
                &mut resources,
                &self.id,
                nat_id.clone(),
                TemplateResource::new(
                    types::NAT_GATEWAY,
                    json!({
                        "SubnetId": reference(&host.logical_id),
                        "AllocationId": get_att(&eip_id, "AllocationId"),
                    }),
                )
                .depends_on(logical_id(&[host.logical_id.as_str(), "DefaultRoute"])),
            )?;
        }

        debug!(
            network = %self.id,
            subnets = subnets.len(),
            nat_gateways = nat_count,
            "Rendered network"
        );

        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new("123456789012", "ca-central-1")
    }

    fn isolated_network() -> Network {
        Network::new(
            "AppVpc",
            NetworkProps {
                vpc_name: Some("test-vpc".into()),
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
        )
    }

    #[test]
    fn test_subnet_layout() {
        let network = isolated_network();
        let subnets = network.subnets(&env()).unwrap();
        let cidrs: Vec<String> = subnets.iter().map(|s| s.cidr.to_string()).collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
        );
        assert_eq!(subnets[0].availability_zone, "ca-central-1a");
        assert_eq!(subnets[1].availability_zone, "ca-central-1b");
        assert_eq!(subnets[2].logical_id, "AppVpcprivateisolatedsubnetSubnet1");
    }

    #[test]
    fn test_render_without_nat() {
        let network = isolated_network();
        network.validate(&env()).unwrap();
        let resources = network.render(&env()).unwrap();

        let count = |t: &str| resources.values().filter(|r| r.resource_type == t).count();
        assert_eq!(count(types::VPC), 1);
        assert_eq!(count(types::SUBNET), 4);
        assert_eq!(count(types::NAT_GATEWAY), 0);
        assert_eq!(count(types::INTERNET_GATEWAY), 1);
        // Only the two public subnets get a default route
        assert_eq!(count(types::ROUTE), 2);
    }

    #[test]
    fn test_default_network_gets_nat_per_zone() {
        let network = Network::new("Vpc", NetworkProps::default());
        network.validate(&env()).unwrap();
        assert_eq!(network.effective_nat_gateways(), 3);

        let resources = network.render(&env()).unwrap();
        let nats = resources
            .values()
            .filter(|r| r.resource_type == types::NAT_GATEWAY)
            .count();
        assert_eq!(nats, 3);
    }

    #[test]
    fn test_egress_without_nat_is_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                nat_gateways: Some(0),
                ..NetworkProps::default()
            },
        );
        let err = network.validate(&env()).unwrap_err();
        assert!(err.to_string().contains("NAT gateway"));
    }

    #[test]
    fn test_nat_without_public_group_is_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                nat_gateways: Some(1),
                subnet_configuration: vec![SubnetConfiguration::new(
                    "isolated",
                    24,
                    SubnetType::PrivateIsolated,
                )],
                ..NetworkProps::default()
            },
        );
        assert!(network.validate(&env()).is_err());
    }

    #[test]
    fn test_duplicate_group_names_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                nat_gateways: Some(0),
                subnet_configuration: vec![
                    SubnetConfiguration::new("a", 24, SubnetType::Public),
                    SubnetConfiguration::new("a", 24, SubnetType::PrivateIsolated),
                ],
                ..NetworkProps::default()
            },
        );
        let err = network.validate(&env()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_group_names_colliding_in_ids_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                max_azs: 1,
                nat_gateways: Some(0),
                subnet_configuration: vec![
                    SubnetConfiguration::new("web-tier", 24, SubnetType::Public),
                    SubnetConfiguration::new("webtier", 24, SubnetType::PrivateIsolated),
                ],
                ..NetworkProps::default()
            },
        );
        let err = network.validate(&env()).unwrap_err();
        assert!(err.to_string().contains("'web-tier' and 'webtier'"), "{}", err);

        // Rendering alone never drops a subnet either
        let err = network.render(&env()).unwrap_err();
        assert!(err.to_string().contains("VpcwebtierSubnet1"), "{}", err);
    }

    #[test]
    fn test_group_name_without_alphanumerics_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                nat_gateways: Some(0),
                subnet_configuration: vec![SubnetConfiguration::new("--", 24, SubnetType::Public)],
                ..NetworkProps::default()
            },
        );
        assert!(network.validate(&env()).is_err());
    }

    #[test]
    fn test_more_zones_than_a_region_has_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                max_azs: 7,
                nat_gateways: Some(7),
                ..NetworkProps::default()
            },
        );
        let err = network.validate(&env()).unwrap_err();
        assert!(err.to_string().contains("max_azs (7)"), "{}", err);

        let six = Network::new(
            "Vpc",
            NetworkProps {
                max_azs: 6,
                ..NetworkProps::default()
            },
        );
        six.validate(&env()).unwrap();
        assert_eq!(six.subnets(&env()).unwrap().len(), 12);
    }

    #[test]
    fn test_groups_that_do_not_fit_are_rejected() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                cidr: "10.0.0.0/23".parse().unwrap(),
                max_azs: 3,
                nat_gateways: Some(0),
                subnet_configuration: vec![SubnetConfiguration::new(
                    "public",
                    24,
                    SubnetType::Public,
                )],
                ..NetworkProps::default()
            },
        );
        let err = network.validate(&env()).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }

    #[test]
    fn test_mask_out_of_range() {
        let network = Network::new(
            "Vpc",
            NetworkProps {
                nat_gateways: Some(0),
                subnet_configuration: vec![SubnetConfiguration::new(
                    "tiny",
                    30,
                    SubnetType::Public,
                )],
                ..NetworkProps::default()
            },
        );
        assert!(network.validate(&env()).is_err());
    }
}
