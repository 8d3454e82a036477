// ── Resource and lookup kinds ──
//
// The closed set of kinds the engine knows how to diff. Each kind carries
// its force-new attributes and whether replacement must wait on readiness.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Managed resource kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    AwsIamRole,
    AwsIamRolePolicyAttachment,
    AwsIamInstanceProfile,
    AwsSecurityGroup,
    AwsCloudwatchLogGroup,
    AwsServiceDiscoveryPrivateDnsNamespace,
    AwsEcsCluster,
    AwsLaunchTemplate,
    AwsAutoscalingGroup,
    AwsEcsCapacityProvider,
    AwsEcsClusterCapacityProviders,
    AwsLb,
    AwsLbTargetGroup,
    AwsLbListener,
    AwsLbListenerRule,
    AwsEcsTaskDefinition,
    AwsEcsService,
}

impl ResourceKind {
    /// Attributes whose change forces a new resource.
    pub fn immutable_attributes(self) -> &'static [&'static str] {
        match self {
            Self::AwsIamRole | Self::AwsIamInstanceProfile | Self::AwsEcsCluster => &["name"],
            Self::AwsIamRolePolicyAttachment => &["role", "policy_arn"],
            Self::AwsSecurityGroup => &["name", "vpc_id", "description"],
            Self::AwsCloudwatchLogGroup => &["name"],
            Self::AwsServiceDiscoveryPrivateDnsNamespace => &["name", "vpc"],
            Self::AwsLaunchTemplate | Self::AwsAutoscalingGroup => &["name_prefix"],
            Self::AwsEcsCapacityProvider => &["name", "auto_scaling_group_provider"],
            Self::AwsEcsClusterCapacityProviders => &["cluster_name"],
            Self::AwsLb => &["name", "internal", "load_balancer_type"],
            Self::AwsLbTargetGroup => &["name", "port", "protocol", "vpc_id", "target_type"],
            Self::AwsLbListener => &["load_balancer_arn"],
            Self::AwsLbListenerRule => &["listener_arn"],
            Self::AwsEcsService => &["name", "cluster"],
            // Task definitions are immutable revisions.
            Self::AwsEcsTaskDefinition => &[],
        }
    }

    pub fn forces_replacement(self, attribute: &str) -> bool {
        self == Self::AwsEcsTaskDefinition || self.immutable_attributes().contains(&attribute)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Read-only lookup kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    AwsVpc,
    AwsSubnets,
    AwsAvailabilityZones,
    AwsEc2InstanceTypeOfferings,
}

impl LookupKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_provider_names() {
        assert_eq!(
            ResourceKind::AwsServiceDiscoveryPrivateDnsNamespace.as_str(),
            "aws_service_discovery_private_dns_namespace"
        );
        assert_eq!(
            "aws_ecs_cluster_capacity_providers"
                .parse::<ResourceKind>()
                .unwrap(),
            ResourceKind::AwsEcsClusterCapacityProviders
        );
        assert_eq!(
            LookupKind::AwsEc2InstanceTypeOfferings.to_string(),
            "aws_ec2_instance_type_offerings"
        );
    }

    #[test]
    fn task_definitions_replace_on_any_change() {
        assert!(ResourceKind::AwsEcsTaskDefinition.forces_replacement("container_definitions"));
        assert!(!ResourceKind::AwsEcsService.forces_replacement("desired_count"));
        assert!(ResourceKind::AwsLbTargetGroup.forces_replacement("port"));
    }
}
