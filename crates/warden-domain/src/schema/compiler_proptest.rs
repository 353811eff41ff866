//! Property-based tests for compiler determinism.

use proptest::prelude::*;

use super::compile;
use crate::model::{Permission, Policy, Role};

fn policy_pool() -> Vec<Policy> {
    let owner = Role::new("owner", vec!["user".to_string()]);
    let viewer = Role::new("viewer", vec!["user".to_string(), "group#member".to_string()]);
    let org_owner = Role::new("owner", vec!["user".to_string()]).with_namespace("organization");
    let member = Role::new("member", vec!["user".to_string()]);

    vec![
        Policy::new("project", owner.clone(), Permission::new("edit", "project")),
        Policy::new("project", owner.clone(), Permission::new("view", "project")),
        Policy::new("project", viewer.clone(), Permission::new("view", "project")),
        Policy::new("project", org_owner.clone(), Permission::new("edit", "project")),
        Policy::new("project", org_owner.clone(), Permission::new("view", "project")),
        Policy::new("organization", owner.clone(), Permission::new("edit", "organization")),
        Policy::new("organization", member.clone(), Permission::new("view", "organization")),
        Policy::new("group", member, Permission::new("view", "group")),
        Policy::new("entropy-firehose", owner, Permission::new("delete", "entropy-firehose")),
        Policy::new("entropy-firehose", org_owner, Permission::new("delete", "entropy-firehose")),
        Policy::new("entropy-firehose", viewer, Permission::new("view", "entropy-firehose")),
    ]
}

proptest! {
    #[test]
    fn prop_compile_is_order_independent(shuffled in Just(policy_pool()).prop_shuffle()) {
        let expected = compile(&policy_pool()).unwrap().to_string();
        let actual = compile(&shuffled).unwrap().to_string();
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn prop_duplicate_policies_do_not_change_output(
        shuffled in Just(policy_pool()).prop_shuffle(),
        repeat in 0usize..11,
    ) {
        let mut doubled = shuffled.clone();
        doubled.push(shuffled[repeat].clone());
        prop_assert_eq!(
            compile(&shuffled).unwrap().to_string(),
            compile(&doubled).unwrap().to_string()
        );
    }
}
