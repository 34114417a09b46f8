//! Decides which remote resources belong to the current run.
//!
//! Ownership is inferred from names alone: a resource belongs to the run when
//! its name equals the run identity. Nothing on the provider side records who
//! created a resource, so two runs sharing an identity would claim each
//! other's resources.

use crate::provider::{Instance, InstanceStatus};

/// Returns `true` when `resource_name` marks a resource created by the run
/// with `identity`.
#[must_use]
pub fn owned_by_run(resource_name: &str, identity: &str) -> bool {
    !identity.is_empty() && resource_name == identity
}

/// First owned instance that has not yet been terminated.
#[must_use]
pub fn find_live_instance<'a>(instances: &'a [Instance], identity: &str) -> Option<&'a Instance> {
    instances.iter().find(|instance| {
        owned_by_run(instance.name_or_empty(), identity)
            && instance.status != InstanceStatus::Terminated
    })
}

/// Returns `true` when an owned instance reports `active`.
#[must_use]
pub fn any_active(instances: &[Instance], identity: &str) -> bool {
    instances.iter().any(|instance| {
        owned_by_run(instance.name_or_empty(), identity)
            && instance.status == InstanceStatus::Active
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn instance(id: &str, name: &str, status: InstanceStatus) -> Instance {
        Instance {
            id: id.to_owned(),
            name: Some(name.to_owned()),
            status,
            ip: None,
            instance_type: None,
        }
    }

    #[rstest]
    #[case("run-20250101T000000Z", "run-20250101T000000Z", true)]
    #[case("custom-key", "run-20250101T000000Z", false)]
    #[case("run-20250101T000000Z-extra", "run-20250101T000000Z", false)]
    #[case("run", "run-20250101T000000Z", false)]
    #[case("", "", false)]
    fn ownership_is_exact_name_equality(
        #[case] resource: &str,
        #[case] identity: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(owned_by_run(resource, identity), expected);
    }

    #[test]
    fn live_instance_skips_terminated_and_prefix_matches() {
        let instances = vec![
            instance("i-old", "run", InstanceStatus::Terminated),
            instance("i-prefix", "run-2", InstanceStatus::Active),
            instance("i-live", "run", InstanceStatus::Booting),
        ];
        let found = find_live_instance(&instances, "run").map(|inst| inst.id.as_str());
        assert_eq!(found, Some("i-live"));
    }

    #[test]
    fn unnamed_instances_are_never_owned() {
        let instances = vec![Instance {
            name: None,
            ..instance("i-1", "", InstanceStatus::Active)
        }];
        assert!(find_live_instance(&instances, "run").is_none());
        assert!(!any_active(&instances, "run"));
    }

    #[rstest]
    #[case(InstanceStatus::Active, true)]
    #[case(InstanceStatus::Booting, false)]
    #[case(InstanceStatus::Unhealthy, false)]
    fn active_requires_active_status(#[case] status: InstanceStatus, #[case] expected: bool) {
        let instances = vec![instance("i-1", "run", status)];
        assert_eq!(any_active(&instances, "run"), expected);
    }
}
