// ── LLM serving stack ──
//
// An ECS cluster on GPU instances running Ollama behind a shared
// application load balancer, with Open WebUI as the front end. The ALB
// forwards everything to WebUI except the model-management API paths,
// which go straight to Ollama.

use crate::error::CoreError;
use crate::model::{
    Address, Expr, LocalDecl, LookupDecl, LookupKind, OutputDecl, ResourceDecl, ResourceKind,
    StackDefinition, VarType, VariableDecl,
};

pub const STACK_NAME: &str = "llm-serving";

pub const DEFAULT_AMI: &str = "ami-0c8b5ba2d7f7b1e5c";
pub const GPU_INSTANCE_TYPE: &str = "g4dn.xlarge";
pub const MODEL: &str = "deepseek-r1:7b";

const OLLAMA_PORT: i64 = 11434;
const WEBUI_PORT: i64 = 8080;
const ANYWHERE: &str = "0.0.0.0/0";

fn data(kind: LookupKind, name: &str) -> Address {
    Address::data(kind, name)
}

fn res(kind: ResourceKind, name: &str) -> Address {
    Address::resource(kind, name)
}

fn lits(items: &[&str]) -> Expr {
    Expr::list(items.iter().map(|s| Expr::lit(*s)))
}

fn ingress(from: i64, to: i64, source: (&str, Expr)) -> Expr {
    Expr::map([
        ("protocol", Expr::lit("tcp")),
        ("from_port", Expr::lit(from)),
        ("to_port", Expr::lit(to)),
        source,
    ])
}

fn egress_all() -> Expr {
    Expr::list([Expr::map([
        ("protocol", Expr::lit("-1")),
        ("from_port", Expr::lit(0_i64)),
        ("to_port", Expr::lit(0_i64)),
        ("cidr_blocks", lits(&[ANYWHERE])),
    ])])
}

fn assume_role(service: &str) -> Expr {
    Expr::lit(format!(
        r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Principal":{{"Service":"{service}"}},"Action":"sts:AssumeRole"}}]}}"#
    ))
}

fn awslogs(group: &Address, prefix: &str) -> Expr {
    Expr::map([
        ("log_driver", Expr::lit("awslogs")),
        (
            "options",
            Expr::map([
                ("awslogs-group", Expr::attr(group, "name")),
                ("awslogs-region", Expr::var("region")),
                ("awslogs-stream-prefix", Expr::lit(prefix)),
            ]),
        ),
    ])
}

/// The full stack definition.
#[allow(clippy::too_many_lines)]
pub fn definition() -> Result<StackDefinition, CoreError> {
    // Lookups
    let vpc = data(LookupKind::AwsVpc, "selected");
    let private = data(LookupKind::AwsSubnets, "private");
    let public = data(LookupKind::AwsSubnets, "public");
    let zones = data(LookupKind::AwsAvailabilityZones, "available");
    let offerings = data(LookupKind::AwsEc2InstanceTypeOfferings, "gpu");

    // Resources
    let instance_role = res(ResourceKind::AwsIamRole, "ecs_instance");
    let instance_profile = res(ResourceKind::AwsIamInstanceProfile, "ecs_instance");
    let execution_role = res(ResourceKind::AwsIamRole, "task_execution");
    let alb_sg = res(ResourceKind::AwsSecurityGroup, "alb");
    let instance_sg = res(ResourceKind::AwsSecurityGroup, "ecs_instances");
    let ollama_logs = res(ResourceKind::AwsCloudwatchLogGroup, "ollama");
    let webui_logs = res(ResourceKind::AwsCloudwatchLogGroup, "webui");
    let namespace = res(ResourceKind::AwsServiceDiscoveryPrivateDnsNamespace, "llm");
    let cluster = res(ResourceKind::AwsEcsCluster, "llm");
    let launch_template = res(ResourceKind::AwsLaunchTemplate, "gpu");
    let asg = res(ResourceKind::AwsAutoscalingGroup, "gpu");
    let capacity = res(ResourceKind::AwsEcsCapacityProvider, "gpu");
    let cluster_capacity = res(ResourceKind::AwsEcsClusterCapacityProviders, "llm");
    let lb = res(ResourceKind::AwsLb, "shared");
    let webui_tg = res(ResourceKind::AwsLbTargetGroup, "webui");
    let ollama_tg = res(ResourceKind::AwsLbTargetGroup, "ollama");
    let listener = res(ResourceKind::AwsLbListener, "http");
    let api_rule = res(ResourceKind::AwsLbListenerRule, "ollama_api");
    let ollama_td = res(ResourceKind::AwsEcsTaskDefinition, "ollama");
    let webui_td = res(ResourceKind::AwsEcsTaskDefinition, "webui");
    let ollama_svc = res(ResourceKind::AwsEcsService, "ollama");

    let capacity_strategy = Expr::list([Expr::map([
        ("capacity_provider", Expr::attr(&capacity, "name")),
        ("weight", Expr::lit(1_i64)),
        ("base", Expr::lit(1_i64)),
    ])]);
    let service_connect = Expr::map([
        ("enabled", Expr::lit(true)),
        ("namespace", Expr::attr(&namespace, "arn")),
    ]);
    let lb_dns = Expr::attr(&lb, "dns_name");

    StackDefinition::builder(STACK_NAME)
        // ── Variables ────────────────────────────────────────────────
        .variable(
            VariableDecl::new("region", VarType::String)
                .describe("AWS region to deploy into")
                .default("us-east-1"),
        )
        .variable(
            VariableDecl::new("vpc_id", VarType::String)
                .describe("Existing VPC to deploy into"),
        )
        .variable(
            VariableDecl::new("webui_secret_key", VarType::String)
                .describe("Session signing secret for Open WebUI")
                .sensitive(),
        )
        .variable(
            VariableDecl::new("ami_id", VarType::String)
                .describe("ECS-optimized GPU AMI")
                .default(DEFAULT_AMI),
        )
        .variable(
            VariableDecl::new("ssh_key_name", VarType::String)
                .describe("EC2 key pair for SSH access to the GPU hosts")
                .nullable(),
        )
        // ── Lookups ──────────────────────────────────────────────────
        .lookup(LookupDecl::one(LookupKind::AwsVpc, "selected").filter("vpc-id", Expr::var("vpc_id")))
        .lookup(
            LookupDecl::many(LookupKind::AwsSubnets, "private")
                .filter("vpc-id", Expr::attr(&vpc, "id"))
                .filter("tag:Tier", Expr::lit("private")),
        )
        .lookup(
            LookupDecl::many(LookupKind::AwsSubnets, "public")
                .filter("vpc-id", Expr::attr(&vpc, "id"))
                .filter("tag:Tier", Expr::lit("public")),
        )
        .lookup(
            LookupDecl::many(LookupKind::AwsAvailabilityZones, "available")
                .filter("state", Expr::lit("available")),
        )
        .lookup(
            LookupDecl::many(LookupKind::AwsEc2InstanceTypeOfferings, "gpu")
                .filter("instance-type", Expr::lit(GPU_INSTANCE_TYPE))
                .filter("location-type", Expr::lit("availability-zone")),
        )
        // ── Locals ───────────────────────────────────────────────────
        .local(
            LocalDecl::new(
                "gpu_zones",
                Expr::select_where(
                    Expr::attr(&offerings, "items"),
                    "location",
                    "location",
                    Expr::select(Expr::attr(&zones, "items"), "zone_name"),
                ),
            )
            .non_empty(),
        )
        .local(
            LocalDecl::new(
                "gpu_private_subnet_ids",
                Expr::select_where(
                    Expr::attr(&private, "items"),
                    "id",
                    "availability_zone",
                    Expr::local("gpu_zones"),
                ),
            )
            .non_empty(),
        )
        // ── IAM ──────────────────────────────────────────────────────
        .resource(
            ResourceDecl::new(ResourceKind::AwsIamRole, "ecs_instance")
                .attr("name", Expr::lit("llm-ecs-instance-role"))
                .attr("assume_role_policy", assume_role("ec2.amazonaws.com")),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsIamRolePolicyAttachment, "ecs_instance")
                .attr("role", Expr::attr(&instance_role, "name"))
                .attr(
                    "policy_arn",
                    Expr::lit("arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceforEC2Role"),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsIamRolePolicyAttachment, "ssm")
                .attr("role", Expr::attr(&instance_role, "name"))
                .attr("policy_arn", Expr::lit("arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore")),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsIamInstanceProfile, "ecs_instance")
                .attr("name", Expr::lit("llm-ecs-instance-profile"))
                .attr("role", Expr::attr(&instance_role, "name")),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsIamRole, "task_execution")
                .attr("name", Expr::lit("llm-ecs-task-execution-role"))
                .attr("assume_role_policy", assume_role("ecs-tasks.amazonaws.com")),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsIamRolePolicyAttachment, "task_execution")
                .attr("role", Expr::attr(&execution_role, "name"))
                .attr(
                    "policy_arn",
                    Expr::lit("arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy"),
                ),
        )
        // ── Security groups ──────────────────────────────────────────
        .resource(
            ResourceDecl::new(ResourceKind::AwsSecurityGroup, "alb")
                .attr("name", Expr::lit("llm-alb-sg"))
                .attr("description", Expr::lit("Public HTTP to the shared load balancer"))
                .attr("vpc_id", Expr::attr(&vpc, "id"))
                .attr(
                    "ingress",
                    Expr::list([ingress(80, 80, ("cidr_blocks", lits(&[ANYWHERE])))]),
                )
                .attr("egress", egress_all()),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsSecurityGroup, "ecs_instances")
                .attr("name", Expr::lit("llm-ecs-instances-sg"))
                .attr("description", Expr::lit("GPU container hosts"))
                .attr("vpc_id", Expr::attr(&vpc, "id"))
                .attr(
                    "ingress",
                    Expr::list([
                        ingress(
                            0,
                            65535,
                            ("security_groups", Expr::list([Expr::attr(&alb_sg, "id")])),
                        ),
                        ingress(22, 22, ("cidr_blocks", lits(&[ANYWHERE]))),
                    ]),
                )
                .attr("egress", egress_all()),
        )
        // ── Logs and discovery ───────────────────────────────────────
        .resource(
            ResourceDecl::new(ResourceKind::AwsCloudwatchLogGroup, "ollama")
                .attr("name", Expr::lit("/ecs/ollama"))
                .attr("retention_in_days", Expr::lit(7_i64)),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsCloudwatchLogGroup, "webui")
                .attr("name", Expr::lit("/ecs/open-webui"))
                .attr("retention_in_days", Expr::lit(7_i64)),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsServiceDiscoveryPrivateDnsNamespace, "llm")
                .attr("name", Expr::lit("llm.local"))
                .attr("vpc", Expr::attr(&vpc, "id")),
        )
        // ── Compute ──────────────────────────────────────────────────
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsCluster, "llm")
                .attr("name", Expr::lit("llm-cluster")),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsLaunchTemplate, "gpu")
                .attr("name_prefix", Expr::lit("llm-gpu-"))
                .attr("image_id", Expr::var("ami_id"))
                .attr("instance_type", Expr::lit(GPU_INSTANCE_TYPE))
                .attr("key_name", Expr::var("ssh_key_name"))
                .attr(
                    "iam_instance_profile",
                    Expr::map([("arn", Expr::attr(&instance_profile, "arn"))]),
                )
                .attr(
                    "vpc_security_group_ids",
                    Expr::list([Expr::attr(&instance_sg, "id")]),
                )
                .attr(
                    "block_device_mappings",
                    Expr::list([Expr::map([
                        ("device_name", Expr::lit("/dev/xvda")),
                        ("volume_size", Expr::lit(100_i64)),
                        ("volume_type", Expr::lit("gp3")),
                    ])]),
                )
                .attr(
                    "user_data",
                    Expr::concat([
                        Expr::lit("#!/bin/bash\necho ECS_CLUSTER="),
                        Expr::attr(&cluster, "name"),
                        Expr::lit(" >> /etc/ecs/ecs.config\necho ECS_ENABLE_GPU_SUPPORT=true >> /etc/ecs/ecs.config\n"),
                    ]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsAutoscalingGroup, "gpu")
                .attr("name_prefix", Expr::lit("llm-gpu-asg-"))
                .attr("vpc_zone_identifier", Expr::local("gpu_private_subnet_ids"))
                .attr("min_size", Expr::lit(1_i64))
                .attr("max_size", Expr::lit(2_i64))
                .attr("desired_capacity", Expr::lit(1_i64))
                .attr("protect_from_scale_in", Expr::lit(true))
                .attr(
                    "launch_template",
                    Expr::map([
                        ("id", Expr::attr(&launch_template, "id")),
                        ("version", Expr::lit("$Latest")),
                    ]),
                )
                .attr(
                    "tags",
                    Expr::map([("AmazonECSManaged", Expr::lit("true"))]),
                )
                .create_before_destroy()
                .ignore_changes("desired_capacity"),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsCapacityProvider, "gpu")
                .attr("name", Expr::lit("llm-gpu-capacity"))
                .attr(
                    "auto_scaling_group_provider",
                    Expr::map([
                        ("auto_scaling_group_arn", Expr::attr(&asg, "arn")),
                        ("managed_termination_protection", Expr::lit("ENABLED")),
                        (
                            "managed_scaling",
                            Expr::map([
                                ("status", Expr::lit("ENABLED")),
                                ("target_capacity", Expr::lit(100_i64)),
                            ]),
                        ),
                    ]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsClusterCapacityProviders, "llm")
                .attr("cluster_name", Expr::attr(&cluster, "name"))
                .attr(
                    "capacity_providers",
                    Expr::list([Expr::attr(&capacity, "name")]),
                )
                .attr("default_capacity_provider_strategy", capacity_strategy.clone()),
        )
        // ── Load balancing ───────────────────────────────────────────
        .resource(
            ResourceDecl::new(ResourceKind::AwsLb, "shared")
                .attr("name", Expr::lit("llm-shared-alb"))
                .attr("internal", Expr::lit(false))
                .attr("load_balancer_type", Expr::lit("application"))
                .attr("security_groups", Expr::list([Expr::attr(&alb_sg, "id")]))
                .attr("subnets", Expr::attr(&public, "ids"))
                .attr("idle_timeout", Expr::lit(300_i64)),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsLbTargetGroup, "webui")
                .attr("name", Expr::lit("llm-webui-tg"))
                .attr("port", Expr::lit(WEBUI_PORT))
                .attr("protocol", Expr::lit("HTTP"))
                .attr("vpc_id", Expr::attr(&vpc, "id"))
                .attr("target_type", Expr::lit("instance"))
                .attr(
                    "health_check",
                    Expr::map([("path", Expr::lit("/health")), ("matcher", Expr::lit("200"))]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsLbTargetGroup, "ollama")
                .attr("name", Expr::lit("llm-ollama-tg"))
                .attr("port", Expr::lit(OLLAMA_PORT))
                .attr("protocol", Expr::lit("HTTP"))
                .attr("vpc_id", Expr::attr(&vpc, "id"))
                .attr("target_type", Expr::lit("instance"))
                .attr(
                    "health_check",
                    Expr::map([("path", Expr::lit("/")), ("matcher", Expr::lit("200"))]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsLbListener, "http")
                .attr("load_balancer_arn", Expr::attr(&lb, "arn"))
                .attr("port", Expr::lit(80_i64))
                .attr("protocol", Expr::lit("HTTP"))
                .attr(
                    "default_action",
                    Expr::map([
                        ("type", Expr::lit("forward")),
                        ("target_group_arn", Expr::attr(&webui_tg, "arn")),
                    ]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsLbListenerRule, "ollama_api")
                .attr("listener_arn", Expr::attr(&listener, "arn"))
                .attr("priority", Expr::lit(10_i64))
                .attr(
                    "action",
                    Expr::map([
                        ("type", Expr::lit("forward")),
                        ("target_group_arn", Expr::attr(&ollama_tg, "arn")),
                    ]),
                )
                .attr(
                    "condition",
                    Expr::map([(
                        "path_pattern",
                        lits(&["/api/pull", "/api/tags", "/api/generate"]),
                    )]),
                ),
        )
        // ── Workloads ────────────────────────────────────────────────
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsTaskDefinition, "ollama")
                .attr("family", Expr::lit("ollama"))
                .attr("network_mode", Expr::lit("bridge"))
                .attr("requires_compatibilities", lits(&["EC2"]))
                .attr("execution_role_arn", Expr::attr(&execution_role, "arn"))
                .attr(
                    "container_definitions",
                    Expr::list([Expr::map([
                        ("name", Expr::lit("ollama")),
                        ("image", Expr::lit("ollama/ollama:latest")),
                        ("essential", Expr::lit(true)),
                        ("memory", Expr::lit(14336_i64)),
                        (
                            "port_mappings",
                            Expr::list([Expr::map([
                                ("container_port", Expr::lit(OLLAMA_PORT)),
                                ("host_port", Expr::lit(OLLAMA_PORT)),
                            ])]),
                        ),
                        (
                            "resource_requirements",
                            Expr::list([Expr::map([
                                ("type", Expr::lit("GPU")),
                                ("value", Expr::lit("1")),
                            ])]),
                        ),
                        ("log_configuration", awslogs(&ollama_logs, "ollama")),
                    ])]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsTaskDefinition, "webui")
                .attr("family", Expr::lit("open-webui"))
                .attr("network_mode", Expr::lit("bridge"))
                .attr("requires_compatibilities", lits(&["EC2"]))
                .attr("execution_role_arn", Expr::attr(&execution_role, "arn"))
                .attr(
                    "container_definitions",
                    Expr::list([Expr::map([
                        ("name", Expr::lit("open-webui")),
                        ("image", Expr::lit("ghcr.io/open-webui/open-webui:main")),
                        ("essential", Expr::lit(true)),
                        ("memory", Expr::lit(1024_i64)),
                        (
                            "port_mappings",
                            Expr::list([Expr::map([
                                ("container_port", Expr::lit(WEBUI_PORT)),
                                ("host_port", Expr::lit(WEBUI_PORT)),
                            ])]),
                        ),
                        (
                            "environment",
                            Expr::list([
                                Expr::map([
                                    ("name", Expr::lit("OLLAMA_BASE_URL")),
                                    ("value", Expr::concat([Expr::lit("http://"), lb_dns.clone()])),
                                ]),
                                Expr::map([
                                    ("name", Expr::lit("WEBUI_SECRET_KEY")),
                                    ("value", Expr::var("webui_secret_key")),
                                ]),
                            ]),
                        ),
                        ("log_configuration", awslogs(&webui_logs, "open-webui")),
                    ])]),
                ),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsService, "ollama")
                .attr("name", Expr::lit("ollama"))
                .attr("cluster", Expr::attr(&cluster, "id"))
                .attr("task_definition", Expr::attr(&ollama_td, "arn"))
                .attr("desired_count", Expr::lit(1_i64))
                .attr("capacity_provider_strategy", capacity_strategy.clone())
                .attr(
                    "load_balancer",
                    Expr::list([Expr::map([
                        ("target_group_arn", Expr::attr(&ollama_tg, "arn")),
                        ("container_name", Expr::lit("ollama")),
                        ("container_port", Expr::lit(OLLAMA_PORT)),
                    ])]),
                )
                .attr("service_connect_configuration", service_connect.clone())
                .depends_on(&api_rule)
                .depends_on(&cluster_capacity),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsEcsService, "webui")
                .attr("name", Expr::lit("open-webui"))
                .attr("cluster", Expr::attr(&cluster, "id"))
                .attr("task_definition", Expr::attr(&webui_td, "arn"))
                .attr("desired_count", Expr::lit(1_i64))
                .attr("capacity_provider_strategy", capacity_strategy)
                .attr(
                    "load_balancer",
                    Expr::list([Expr::map([
                        ("target_group_arn", Expr::attr(&webui_tg, "arn")),
                        ("container_name", Expr::lit("open-webui")),
                        ("container_port", Expr::lit(WEBUI_PORT)),
                    ])]),
                )
                .attr("service_connect_configuration", service_connect)
                .depends_on(&ollama_svc)
                .depends_on(&listener),
        )
        // ── Outputs ──────────────────────────────────────────────────
        .output(OutputDecl::new("shared_lb_dns", lb_dns.clone()).describe("DNS name of the shared load balancer"))
        .output(
            OutputDecl::new("webui_url", Expr::concat([Expr::lit("http://"), lb_dns.clone()]))
                .describe("Open WebUI address"),
        )
        .output(
            OutputDecl::new(
                "model_pull_command",
                Expr::concat([
                    Expr::lit("curl -X POST http://"),
                    lb_dns,
                    Expr::lit(format!("/api/pull -d '{{\"name\": \"{MODEL}\"}}'")),
                ]),
            )
            .describe("Pulls the default model into Ollama"),
        )
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::graph::validate;
    use crate::model::{Value, VariableBindings};

    fn bindings() -> VariableBindings {
        VariableBindings::new()
            .with("vpc_id", "vpc-123")
            .with("webui_secret_key", "s3cr3t")
            .with("ssh_key_name", Value::Null)
    }

    #[test]
    fn scenario_bindings_validate() {
        let stack = definition().unwrap();
        assert_eq!(stack.resources.len(), 25);
        let validated = validate(&stack, &bindings()).unwrap();
        assert_eq!(validated.variables()["ami_id"], Value::from(DEFAULT_AMI));
        assert_eq!(validated.variables()["ssh_key_name"], Value::Null);
        assert_eq!(
            validated.advisories(),
            ["aws_security_group.ecs_instances allows SSH (port 22) from 0.0.0.0/0"]
        );
    }

    #[test]
    fn missing_vpc_is_named() {
        let stack = definition().unwrap();
        let mut b = bindings();
        b.remove("vpc_id");
        let err = validate(&stack, &b).unwrap_err();
        assert!(matches!(err, CoreError::MissingVariables { ref names } if names == &["vpc_id"]));
        assert_eq!(err.to_string(), "Missing required variable(s): vpc_id");
    }

    #[test]
    fn services_wait_for_routing() {
        let stack = definition().unwrap();
        let validated = validate(&stack, &bindings()).unwrap();
        let order: Vec<String> = validated
            .order()
            .iter()
            .filter(|a| a.is_resource())
            .map(ToString::to_string)
            .collect();
        let pos = |a: &str| order.iter().position(|o| o == a).unwrap();

        assert!(pos("aws_lb_listener_rule.ollama_api") < pos("aws_ecs_service.ollama"));
        assert!(pos("aws_ecs_cluster_capacity_providers.llm") < pos("aws_ecs_service.ollama"));
        assert!(pos("aws_ecs_service.ollama") < pos("aws_ecs_service.webui"));
        assert!(pos("aws_lb.shared") < pos("aws_ecs_task_definition.webui"));
        assert!(pos("aws_iam_instance_profile.ecs_instance") < pos("aws_launch_template.gpu"));
    }
}
