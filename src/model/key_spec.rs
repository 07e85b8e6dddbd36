use serde::{Deserialize, Serialize};

use crate::model::{KeyType, PinPolicy, TouchPolicy};

/// Parameters used when generating a key into a slot
///
/// Once generated, the card enforces both policies on every private-key
/// operation in that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySpec {
    pub key_type: KeyType,
    #[serde(default)]
    pub pin_policy: PinPolicy,
    #[serde(default)]
    pub touch_policy: TouchPolicy,
}

impl KeySpec {
    pub fn new(key_type: KeyType, pin_policy: PinPolicy, touch_policy: TouchPolicy) -> Self {
        Self {
            key_type,
            pin_policy,
            touch_policy,
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::new(KeyType::EccP256, PinPolicy::Default, TouchPolicy::Default)
    }
}
