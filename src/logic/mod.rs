mod provisioning;

pub use provisioning::{decide, ProvisioningDecision};
