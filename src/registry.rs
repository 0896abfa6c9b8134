//! Amazon ECR registry hostname parsing
//!
//! Recognizes the two registry families that issue ECR credentials:
//!
//! - ECR Public, served from the single domain `public.ecr.aws`
//! - private ECR registries such as `123456789012.dkr.ecr.us-west-2.amazonaws.com`,
//!   whose domain encodes the partition, the region and an optional FIPS marker
//!
//! Any other hostname is not an ECR registry and parses to `None`.

use serde::Serialize;
use std::fmt;

/// Domain of the ECR Public registry
pub const ECR_PUBLIC_DOMAIN: &str = "public.ecr.aws";

/// Region hosting the ECR Public API
pub const ECR_PUBLIC_REGION: &str = "us-east-1";

lazy_static::lazy_static! {
    static ref ECR_PRIVATE_HOST: regex::Regex = regex::Regex::new(
        r"^(?P<id>[a-z0-9][a-z0-9_-]*)\.dkr(?P<fips_a>-fips)?\.ecr(?P<fips_b>-fips)?\.(?P<region>[a-z]{2}(?:-[a-z]+)+-[0-9]+)\.(?P<suffix>amazonaws\.com\.cn|amazonaws\.com|c2s\.ic\.gov|sc2s\.sgov\.gov|cloud\.adc-e\.uk|csp\.hci\.ic\.gov)$"
    )
    .expect("ECR hostname pattern is valid");
}

/// AWS partition a registry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    Aws,
    AwsCn,
    AwsIso,
    AwsIsoB,
    AwsIsoE,
    AwsIsoF,
}

impl Partition {
    /// Partition for a registry domain suffix, if it is one of ECR's
    pub fn from_domain_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "amazonaws.com" | ECR_PUBLIC_DOMAIN => Some(Self::Aws),
            "amazonaws.com.cn" => Some(Self::AwsCn),
            "c2s.ic.gov" => Some(Self::AwsIso),
            "sc2s.sgov.gov" => Some(Self::AwsIsoB),
            "cloud.adc-e.uk" => Some(Self::AwsIsoE),
            "csp.hci.ic.gov" => Some(Self::AwsIsoF),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::AwsCn => "aws-cn",
            Self::AwsIso => "aws-iso",
            Self::AwsIsoB => "aws-iso-b",
            Self::AwsIsoE => "aws-iso-e",
            Self::AwsIsoF => "aws-iso-f",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed ECR registry hostname
///
/// Descriptors with the same `(domain_suffix, region, fips)` share one
/// credential scope, see [`RegistryDescriptor::cache_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RegistryDescriptor {
    /// `public.ecr.aws` for ECR Public, otherwise the partition's DNS suffix
    pub domain_suffix: String,
    pub region: String,
    pub fips: bool,
    pub partition: Partition,
    /// Registry (account) id; `None` for ECR Public
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
}

impl RegistryDescriptor {
    /// Whether this is the ECR Public registry
    pub fn is_public(&self) -> bool {
        self.domain_suffix == ECR_PUBLIC_DOMAIN
    }

    /// Key identifying the credential scope of this registry
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.domain_suffix, self.region, self.fips)
    }
}

/// Parse a registry hostname into a [`RegistryDescriptor`]
///
/// Returns `None` for hosts that are not ECR registries, including hosts whose
/// region or FIPS marker is malformed.
///
/// # Examples
///
/// - `"public.ecr.aws"` → ECR Public in `us-east-1`
/// - `"123456789012.dkr.ecr.eu-central-1.amazonaws.com"` → private, `eu-central-1`
/// - `"123456789012.dkr.ecr-fips.us-gov-west-1.amazonaws.com"` → private, FIPS
/// - `"docker.io"` → `None`
pub fn parse(hostname: &str) -> Option<RegistryDescriptor> {
    let host = hostname.to_ascii_lowercase();

    if host == ECR_PUBLIC_DOMAIN {
        return Some(RegistryDescriptor {
            domain_suffix: ECR_PUBLIC_DOMAIN.to_string(),
            region: ECR_PUBLIC_REGION.to_string(),
            fips: false,
            partition: Partition::Aws,
            registry_id: None,
        });
    }

    let caps = ECR_PRIVATE_HOST.captures(&host)?;

    // Only one FIPS marker is allowed, either dkr-fips.ecr or dkr.ecr-fips
    let fips = match (caps.name("fips_a"), caps.name("fips_b")) {
        (Some(_), Some(_)) => return None,
        (None, None) => false,
        _ => true,
    };

    let domain_suffix = &caps["suffix"];
    let partition = Partition::from_domain_suffix(domain_suffix)?;

    Some(RegistryDescriptor {
        domain_suffix: domain_suffix.to_string(),
        region: caps["region"].to_string(),
        fips,
        partition,
        registry_id: Some(caps["id"].to_string()),
    })
}
