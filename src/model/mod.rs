mod algorithm;
mod key_material;
mod key_spec;
mod metadata;
mod mgmt_key;
mod pin;
mod policy;
mod slot;

pub use algorithm::{AlgorithmError, KeyType, SignatureAlgorithm};
pub use key_material::{KeyMaterialError, PublicKeyMaterial, Signature};
pub use key_spec::KeySpec;
pub use metadata::{
    AttemptCounters, DeviceInfo, FirmwareVersion, KeyOrigin, ManagementKeyMetadata, PinMetadata,
    PukMetadata, RetryMetadata, SlotMetadata,
};
pub use mgmt_key::{ManagementKey, ManagementKeyAlgorithm, ManagementKeyError};
pub(crate) use pin::unpad;
pub use pin::{Pin, PinError, Puk};
pub use policy::{PinPolicy, PolicyParseError, TouchPolicy};
pub use slot::{Slot, SlotError};
