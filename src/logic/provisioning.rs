use tracing::debug;

use crate::model::KeySpec;

/// What to do with a slot during provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningDecision {
    /// The slot already holds a key; keep it
    Reuse,
    Generate(KeySpec),
}

/// Decide whether to generate a key into a slot
///
/// Presence alone gates regeneration: an occupied slot is always reused, even
/// when its key type or policies differ from `desired`, so keys already
/// enrolled elsewhere are never silently destroyed.
pub fn decide(has_key: bool, desired: &KeySpec) -> ProvisioningDecision {
    let decision = if has_key {
        ProvisioningDecision::Reuse
    } else {
        ProvisioningDecision::Generate(*desired)
    };
    debug!(has_key, ?decision, "provisioning decision");
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyType, PinPolicy, TouchPolicy};

    #[test]
    fn test_empty_slot_generates_desired_spec() {
        let spec = KeySpec::new(KeyType::EccP384, PinPolicy::Always, TouchPolicy::Cached);
        assert_eq!(decide(false, &spec), ProvisioningDecision::Generate(spec));
    }

    #[test]
    fn test_occupied_slot_is_reused_for_any_spec() {
        for key_type in [KeyType::EccP256, KeyType::EccP384, KeyType::Ed25519] {
            for touch_policy in [TouchPolicy::Never, TouchPolicy::Always] {
                let spec = KeySpec::new(key_type, PinPolicy::Once, touch_policy);
                assert_eq!(decide(true, &spec), ProvisioningDecision::Reuse);
            }
        }
    }
}
