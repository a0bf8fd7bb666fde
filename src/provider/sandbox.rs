//! Local simulated control plane.
//!
//! The sandbox keeps every resource in memory (optionally mirrored to a JSON
//! file so separate CLI invocations see the same resources) and enforces the
//! provider-side rules a real control plane would:
//!
//! - identifiers are generated in the provider's formats (`vpc-<17 hex>`,
//!   `subnet-...`, repository ARNs and URIs, ...);
//! - CIDR blocks must be well formed and subnets must fit their VPC without
//!   overlapping each other;
//! - repository and cluster names are unique;
//! - resources referenced by other resources cannot be deleted;
//! - a repository that still holds images cannot be deleted.
//!
//! Tests can inject failures with [`SandboxProvider::fail_next`] and inspect
//! the successful calls with [`SandboxProvider::operations`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{Provider, ProviderError, ProviderResource, ProviderResult};
use crate::cidr::Ipv4Cidr;
use crate::constructs::types;
use crate::error::Result;
use crate::stack::Environment;

/// Properties whose values are physical ids of other resources.
const REFERENCE_KEYS: &[&str] = &[
    "VpcId",
    "SubnetId",
    "RouteTableId",
    "InternetGatewayId",
    "GatewayId",
    "NatGatewayId",
    "AllocationId",
];

/// Kind of a recorded sandbox call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Resource created
    Create,
    /// Resource updated in place
    Update,
    /// Resource deleted
    Delete,
}

/// A successful mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOperation {
    /// What happened
    pub kind: OperationKind,
    /// Resource type
    pub resource_type: String,
    /// Physical id
    pub physical_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxRecord {
    resource_type: String,
    physical_id: String,
    properties: Value,
    attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

impl SandboxRecord {
    fn to_resource(&self) -> ProviderResource {
        ProviderResource {
            physical_id: self.physical_id.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SandboxStore {
    /// Keyed by `<type>|<physical id>`
    records: BTreeMap<String, SandboxRecord>,
}

impl SandboxStore {
    fn key(resource_type: &str, physical_id: &str) -> String {
        format!("{}|{}", resource_type, physical_id)
    }

    fn get(&self, resource_type: &str, physical_id: &str) -> Option<&SandboxRecord> {
        self.records.get(&Self::key(resource_type, physical_id))
    }

    fn get_mut(&mut self, resource_type: &str, physical_id: &str) -> Option<&mut SandboxRecord> {
        self.records.get_mut(&Self::key(resource_type, physical_id))
    }

    fn insert(&mut self, record: SandboxRecord) {
        self.records.insert(
            Self::key(&record.resource_type, &record.physical_id),
            record,
        );
    }

    fn remove(&mut self, resource_type: &str, physical_id: &str) -> Option<SandboxRecord> {
        self.records.remove(&Self::key(resource_type, physical_id))
    }

    fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a SandboxRecord> {
        self.records
            .values()
            .filter(move |r| r.resource_type == resource_type)
    }

    fn exists(&self, physical_id: &str) -> bool {
        self.records.values().any(|r| r.physical_id == physical_id)
    }

    /// Records other than `physical_id` itself whose properties point at it.
    fn referrers(&self, physical_id: &str) -> Vec<&SandboxRecord> {
        self.records
            .values()
            .filter(|r| r.physical_id != physical_id)
            .filter(|r| {
                r.properties.as_object().is_some_and(|props| {
                    props.iter().any(|(key, value)| {
                        (REFERENCE_KEYS.contains(&key.as_str()) || key == "RepositoryName")
                            && value.as_str() == Some(physical_id)
                    })
                })
            })
            .collect()
    }
}

/// Simulated control plane for one account and region.
#[derive(Debug)]
pub struct SandboxProvider {
    env: Environment,
    store: RwLock<SandboxStore>,
    faults: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    operations: Mutex<Vec<SandboxOperation>>,
    state_file: Option<PathBuf>,
    latency: Duration,
}

impl SandboxProvider {
    /// In-memory sandbox.
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            store: RwLock::new(SandboxStore::default()),
            faults: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
            state_file: None,
            latency: Duration::ZERO,
        }
    }

    /// Sandbox mirrored to a JSON file, loading existing resources from it.
    pub fn with_state_file(env: Environment, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            SandboxStore::default()
        };

        debug!(path = %path.display(), resources = store.records.len(), "Opened sandbox");
        Ok(Self {
            store: RwLock::new(store),
            state_file: Some(path),
            ..Self::new(env)
        })
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The account and region resources are created in.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Fail the next `times` mutating calls for `resource_type` with `error`.
    pub fn fail_next(&self, resource_type: &str, times: usize, error: ProviderError) {
        let mut faults = self.faults.lock();
        let queue = faults.entry(resource_type.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Successful mutating calls, in order.
    pub fn operations(&self) -> Vec<SandboxOperation> {
        self.operations.lock().clone()
    }

    /// Number of live resources.
    pub fn resource_count(&self) -> usize {
        self.store.read().records.len()
    }

    /// Live resources of one type.
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<ProviderResource> {
        self.store
            .read()
            .of_type(resource_type)
            .map(SandboxRecord::to_resource)
            .collect()
    }

    /// Push an image tag into a repository.
    pub fn push_image(&self, repository: &str, tag: &str) -> ProviderResult<()> {
        {
            let mut store = self.store.write();
            let record = store
                .get_mut(types::REPOSITORY, repository)
                .ok_or_else(|| ProviderError::not_found(types::REPOSITORY, repository))?;
            record.images.push(tag.to_string());
        }
        self.persist()
    }

    /// Image tags stored in a repository.
    pub fn images(&self, repository: &str) -> Vec<String> {
        self.store
            .read()
            .get(types::REPOSITORY, repository)
            .map(|r| r.images.clone())
            .unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn take_fault(&self, resource_type: &str) -> ProviderResult<()> {
        let fault = self
            .faults
            .lock()
            .get_mut(resource_type)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(error) => {
                trace!(resource_type, %error, "Injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn log(&self, kind: OperationKind, resource_type: &str, physical_id: &str) {
        self.operations.lock().push(SandboxOperation {
            kind,
            resource_type: resource_type.to_string(),
            physical_id: physical_id.to_string(),
        });
    }

    fn persist(&self) -> ProviderResult<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&*self.store.read())
            .map_err(|e| ProviderError::Internal(format!("cannot encode sandbox: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ProviderError::Internal(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(path, content).map_err(|e| {
            ProviderError::Internal(format!("cannot write {}: {}", path.display(), e))
        })
    }

    fn generate_id(prefix: &str) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("{}-{}", prefix, &hex[..17])
    }

    fn repository_attributes(&self, name: &str) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("RepositoryName".into(), name.to_string());
        attributes.insert(
            "Arn".into(),
            format!(
                "arn:aws:ecr:{}:{}:repository/{}",
                self.env.region, self.env.account, name
            ),
        );
        attributes.insert(
            "RepositoryUri".into(),
            format!(
                "{}.dkr.ecr.{}.amazonaws.com/{}",
                self.env.account, self.env.region, name
            ),
        );
        attributes
    }

    fn cluster_attributes(&self, name: &str) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("ClusterName".into(), name.to_string());
        attributes.insert(
            "Arn".into(),
            format!(
                "arn:aws:ecs:{}:{}:cluster/{}",
                self.env.region, self.env.account, name
            ),
        );
        attributes
    }

    /// Validate a create request and build the record it would produce.
    fn build_record(
        &self,
        store: &SandboxStore,
        resource_type: &str,
        properties: &Value,
    ) -> ProviderResult<SandboxRecord> {
        require_references(store, resource_type, properties)?;

        let mut attributes = BTreeMap::new();
        let physical_id = match resource_type {
            types::VPC => {
                let cidr = cidr_prop(properties, resource_type)?;
                let name = name_tag(properties);
                let taken = store.of_type(types::VPC).any(|vpc| {
                    vpc.properties.get("CidrBlock") == properties.get("CidrBlock")
                        && name_tag(&vpc.properties) == name
                });
                if taken {
                    return Err(ProviderError::Conflict(format!(
                        "a VPC named '{}' with range {} already exists",
                        name.unwrap_or_default(),
                        cidr
                    )));
                }
                let id = Self::generate_id("vpc");
                attributes.insert("VpcId".into(), id.clone());
                attributes.insert("CidrBlock".into(), cidr.to_string());
                id
            }
            types::SUBNET => {
                let cidr = cidr_prop(properties, resource_type)?;
                let vpc_id = string_prop(properties, "VpcId", resource_type)?;
                let zone = string_prop(properties, "AvailabilityZone", resource_type)?;

                if !zone.starts_with(&self.env.region) || zone.len() != self.env.region.len() + 1 {
                    return Err(ProviderError::Validation(format!(
                        "'{}' is not an availability zone of {}",
                        zone, self.env.region
                    )));
                }

                let vpc = store
                    .get(types::VPC, vpc_id)
                    .ok_or_else(|| ProviderError::not_found(types::VPC, vpc_id))?;
                let vpc_cidr = cidr_prop(&vpc.properties, types::VPC)?;
                if !vpc_cidr.contains(&cidr) {
                    return Err(ProviderError::Validation(format!(
                        "subnet range {} is outside VPC range {}",
                        cidr, vpc_cidr
                    )));
                }

                for other in store.of_type(types::SUBNET) {
                    if other.properties.get("VpcId").and_then(Value::as_str) != Some(vpc_id) {
                        continue;
                    }
                    let other_cidr = cidr_prop(&other.properties, types::SUBNET)?;
                    if other_cidr.overlaps(&cidr) {
                        return Err(ProviderError::Conflict(format!(
                            "subnet range {} overlaps {} ({})",
                            cidr, other_cidr, other.physical_id
                        )));
                    }
                }

                let id = Self::generate_id("subnet");
                attributes.insert("SubnetId".into(), id.clone());
                attributes.insert("VpcId".into(), vpc_id.to_string());
                attributes.insert("AvailabilityZone".into(), zone.to_string());
                attributes.insert("CidrBlock".into(), cidr.to_string());
                id
            }
            types::INTERNET_GATEWAY => {
                let id = Self::generate_id("igw");
                attributes.insert("InternetGatewayId".into(), id.clone());
                id
            }
            types::GATEWAY_ATTACHMENT => {
                let vpc_id = string_prop(properties, "VpcId", resource_type)?;
                string_prop(properties, "InternetGatewayId", resource_type)?;
                format!("IGW|{}", vpc_id)
            }
            types::ROUTE_TABLE => {
                string_prop(properties, "VpcId", resource_type)?;
                let id = Self::generate_id("rtb");
                attributes.insert("RouteTableId".into(), id.clone());
                id
            }
            types::ROUTE_TABLE_ASSOCIATION => {
                string_prop(properties, "RouteTableId", resource_type)?;
                string_prop(properties, "SubnetId", resource_type)?;
                Self::generate_id("rtbassoc")
            }
            types::ROUTE => {
                let table = string_prop(properties, "RouteTableId", resource_type)?;
                let destination = string_prop(properties, "DestinationCidrBlock", resource_type)?;
                destination.parse::<Ipv4Cidr>().map_err(|e| {
                    ProviderError::Validation(format!("DestinationCidrBlock: {}", e))
                })?;
                let id = format!("{}|{}", table, destination);
                if store.get(types::ROUTE, &id).is_some() {
                    return Err(ProviderError::Conflict(format!(
                        "route table {} already has a route to {}",
                        table, destination
                    )));
                }
                id
            }
            types::EIP => {
                let id = Self::generate_id("eipalloc");
                let mut rng = rand::thread_rng();
                attributes.insert("AllocationId".into(), id.clone());
                attributes.insert(
                    "PublicIp".into(),
                    format!("3.{}.{}.{}", rng.gen_range(0..=255), rng.gen_range(0..=255), rng.gen_range(1..=254)),
                );
                id
            }
            types::NAT_GATEWAY => {
                string_prop(properties, "SubnetId", resource_type)?;
                string_prop(properties, "AllocationId", resource_type)?;
                let id = Self::generate_id("nat");
                attributes.insert("NatGatewayId".into(), id.clone());
                id
            }
            types::REPOSITORY => {
                let name = string_prop(properties, "RepositoryName", resource_type)?;
                if store.get(types::REPOSITORY, name).is_some() {
                    return Err(ProviderError::Conflict(format!(
                        "repository '{}' already exists",
                        name
                    )));
                }
                attributes = self.repository_attributes(name);
                name.to_string()
            }
            types::AUTO_DELETE_IMAGES => {
                let name = string_prop(properties, "RepositoryName", resource_type)?;
                if store.get(types::REPOSITORY, name).is_none() {
                    return Err(ProviderError::not_found(types::REPOSITORY, name));
                }
                Self::generate_id("autodelete")
            }
            types::CLUSTER => {
                let name = string_prop(properties, "ClusterName", resource_type)?;
                if store.get(types::CLUSTER, name).is_some() {
                    return Err(ProviderError::Conflict(format!(
                        "cluster '{}' already exists",
                        name
                    )));
                }
                attributes = self.cluster_attributes(name);
                name.to_string()
            }
            other => {
                return Err(ProviderError::Validation(format!(
                    "unsupported resource type '{}'",
                    other
                )))
            }
        };

        Ok(SandboxRecord {
            resource_type: resource_type.to_string(),
            physical_id,
            properties: properties.clone(),
            attributes,
            images: Vec::new(),
        })
    }
}

fn string_prop<'a>(properties: &'a Value, key: &str, resource_type: &str) -> ProviderResult<&'a str> {
    properties
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ProviderError::Validation(format!("{} requires a string '{}' property", resource_type, key))
        })
}

fn cidr_prop(properties: &Value, resource_type: &str) -> ProviderResult<Ipv4Cidr> {
    string_prop(properties, "CidrBlock", resource_type)?
        .parse()
        .map_err(|e| ProviderError::Validation(format!("{}: {}", resource_type, e)))
}

fn name_tag(properties: &Value) -> Option<&str> {
    properties
        .get("Tags")?
        .as_array()?
        .iter()
        .find(|tag| tag.get("Key").and_then(Value::as_str) == Some("Name"))?
        .get("Value")?
        .as_str()
}

/// Every id-valued property must point at a live resource.
fn require_references(
    store: &SandboxStore,
    resource_type: &str,
    properties: &Value,
) -> ProviderResult<()> {
    let Some(props) = properties.as_object() else {
        return Err(ProviderError::Validation(format!(
            "{} properties must be an object",
            resource_type
        )));
    };
    for key in REFERENCE_KEYS {
        if let Some(id) = props.get(*key).and_then(Value::as_str) {
            if !store.exists(id) {
                return Err(ProviderError::Validation(format!(
                    "{} '{}' does not exist",
                    key, id
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Provider for SandboxProvider {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn create(&self, resource_type: &str, properties: &Value) -> ProviderResult<ProviderResource> {
        self.simulate_latency().await;
        self.take_fault(resource_type)?;

        let record = {
            let mut store = self.store.write();
            let record = self.build_record(&store, resource_type, properties)?;
            store.insert(record.clone());
            record
        };
        self.persist()?;
        self.log(OperationKind::Create, resource_type, &record.physical_id);

        debug!(resource_type, physical_id = %record.physical_id, "Sandbox created resource");
        Ok(record.to_resource())
    }

    async fn update(
        &self,
        resource_type: &str,
        physical_id: &str,
        properties: &Value,
    ) -> ProviderResult<ProviderResource> {
        self.simulate_latency().await;
        self.take_fault(resource_type)?;

        let resource = {
            let mut store = self.store.write();
            require_references(&store, resource_type, properties)?;
            let record = store
                .get_mut(resource_type, physical_id)
                .ok_or_else(|| ProviderError::not_found(resource_type, physical_id))?;

            let renamed = ["RepositoryName", "ClusterName"].iter().any(|key| {
                record.properties.get(*key).is_some()
                    && record.properties.get(*key) != properties.get(*key)
            });
            if renamed {
                return Err(ProviderError::Validation(format!(
                    "{} '{}' cannot be renamed in place",
                    resource_type, physical_id
                )));
            }

            record.properties = properties.clone();
            record.to_resource()
        };
        self.persist()?;
        self.log(OperationKind::Update, resource_type, physical_id);

        debug!(resource_type, physical_id, "Sandbox updated resource");
        Ok(resource)
    }

    async fn delete(&self, resource_type: &str, physical_id: &str) -> ProviderResult<()> {
        self.simulate_latency().await;
        self.take_fault(resource_type)?;

        {
            let mut store = self.store.write();
            let record = store
                .get(resource_type, physical_id)
                .ok_or_else(|| ProviderError::not_found(resource_type, physical_id))?;

            if let Some(referrer) = store.referrers(physical_id).first() {
                return Err(ProviderError::Conflict(format!(
                    "{} '{}' is still in use by {} '{}'",
                    resource_type, physical_id, referrer.resource_type, referrer.physical_id
                )));
            }
            if !record.images.is_empty() {
                return Err(ProviderError::Conflict(format!(
                    "repository '{}' still contains {} image(s)",
                    physical_id,
                    record.images.len()
                )));
            }

            let removed = store.remove(resource_type, physical_id);

            // The auto-delete companion purges its repository on the way out
            if let Some(name) = removed
                .as_ref()
                .filter(|r| r.resource_type == types::AUTO_DELETE_IMAGES)
                .and_then(|r| r.properties.get("RepositoryName"))
                .and_then(Value::as_str)
            {
                if let Some(repo) = store.get_mut(types::REPOSITORY, name) {
                    debug!(repository = name, images = repo.images.len(), "Purging images");
                    repo.images.clear();
                }
            }
        }
        self.persist()?;
        self.log(OperationKind::Delete, resource_type, physical_id);

        debug!(resource_type, physical_id, "Sandbox deleted resource");
        Ok(())
    }

    async fn read(
        &self,
        resource_type: &str,
        physical_id: &str,
    ) -> ProviderResult<Option<ProviderResource>> {
        self.simulate_latency().await;
        Ok(self
            .store
            .read()
            .get(resource_type, physical_id)
            .map(SandboxRecord::to_resource))
    }
}
