//! Decoding of GET METADATA, GENERATE and GET VERSION/SERIAL responses

use crate::error::{ProtocolError, SessionResult};
use crate::model::{
    FirmwareVersion, KeyOrigin, KeyType, ManagementKeyAlgorithm, ManagementKeyMetadata,
    PinPolicy, PublicKeyMaterial, RetryMetadata, SlotMetadata, TouchPolicy,
};
use crate::protocol::tlv;

pub(crate) const TAG_ALGORITHM: u16 = 0x01;
pub(crate) const TAG_POLICY: u16 = 0x02;
pub(crate) const TAG_ORIGIN: u16 = 0x03;
pub(crate) const TAG_PUBLIC_KEY: u16 = 0x04;
pub(crate) const TAG_DEFAULT_VALUE: u16 = 0x05;
pub(crate) const TAG_RETRIES: u16 = 0x06;

pub(crate) const TAG_PUBLIC_KEY_TEMPLATE: u16 = 0x7F49;
pub(crate) const TAG_POINT: u16 = 0x86;

fn malformed(operation: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedResponse {
        operation,
        reason: reason.into(),
    }
}

fn fixed<'a>(operation: &'static str, value: &'a [u8], len: usize) -> Result<&'a [u8], ProtocolError> {
    if value.len() != len {
        return Err(malformed(
            operation,
            format!("expected {} bytes, got {}", len, value.len()),
        ));
    }
    Ok(value)
}

pub(crate) fn slot_metadata(data: &[u8]) -> SessionResult<SlotMetadata> {
    const OP: &str = "slot metadata";
    let algorithm = fixed(OP, tlv::require(data, TAG_ALGORITHM)?, 1)?[0];
    let key_type = KeyType::from_algorithm_id(algorithm)
        .map_err(|e| malformed(OP, e.to_string()))?;

    let policy = fixed(OP, tlv::require(data, TAG_POLICY)?, 2)?;
    let pin_policy = PinPolicy::from_byte(policy[0]).map_err(|e| malformed(OP, e.to_string()))?;
    let touch_policy =
        TouchPolicy::from_byte(policy[1]).map_err(|e| malformed(OP, e.to_string()))?;

    let origin = match fixed(OP, tlv::require(data, TAG_ORIGIN)?, 1)?[0] {
        0x01 => KeyOrigin::Generated,
        0x02 => KeyOrigin::Imported,
        other => return Err(malformed(OP, format!("unknown origin {:#04x}", other)).into()),
    };

    let point = tlv::require(tlv::require(data, TAG_PUBLIC_KEY)?, TAG_POINT)?;
    let public_key = PublicKeyMaterial::from_card(key_type, point)?;

    Ok(SlotMetadata {
        key_type,
        pin_policy,
        touch_policy,
        origin,
        public_key,
    })
}

pub(crate) fn generated_public_key(key_type: KeyType, data: &[u8]) -> SessionResult<PublicKeyMaterial> {
    let point = tlv::require(tlv::require(data, TAG_PUBLIC_KEY_TEMPLATE)?, TAG_POINT)?;
    Ok(PublicKeyMaterial::from_card(key_type, point)?)
}

pub(crate) fn retry_metadata(data: &[u8]) -> SessionResult<RetryMetadata> {
    const OP: &str = "PIN metadata";
    let default_value = fixed(OP, tlv::require(data, TAG_DEFAULT_VALUE)?, 1)?[0] != 0;
    let retries = fixed(OP, tlv::require(data, TAG_RETRIES)?, 2)?;
    Ok(RetryMetadata {
        default_value,
        total_attempts: retries[0],
        attempts_remaining: retries[1],
    })
}

pub(crate) fn management_key_metadata(data: &[u8]) -> SessionResult<ManagementKeyMetadata> {
    const OP: &str = "management key metadata";
    let algorithm = fixed(OP, tlv::require(data, TAG_ALGORITHM)?, 1)?[0];
    let algorithm = ManagementKeyAlgorithm::from_algorithm_id(algorithm)
        .map_err(|e| malformed(OP, e.to_string()))?;
    let policy = fixed(OP, tlv::require(data, TAG_POLICY)?, 2)?;
    let touch_policy =
        TouchPolicy::from_byte(policy[1]).map_err(|e| malformed(OP, e.to_string()))?;
    let default_value = fixed(OP, tlv::require(data, TAG_DEFAULT_VALUE)?, 1)?[0] != 0;
    Ok(ManagementKeyMetadata {
        algorithm,
        default_value,
        touch_policy,
    })
}

pub(crate) fn version(data: &[u8]) -> SessionResult<FirmwareVersion> {
    let v = fixed("get version", data, 3)?;
    Ok(FirmwareVersion {
        major: v[0],
        minor: v[1],
        patch: v[2],
    })
}

pub(crate) fn serial(data: &[u8]) -> SessionResult<u32> {
    let s = fixed("get serial", data, 4)?;
    Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::protocol::TlvBuilder;

    fn ed25519_metadata(origin: u8) -> Vec<u8> {
        TlvBuilder::new()
            .push(TAG_ALGORITHM, &[0xE0])
            .push(TAG_POLICY, &[0x02, 0x01])
            .push(TAG_ORIGIN, &[origin])
            .nest(TAG_PUBLIC_KEY, TlvBuilder::new().push(TAG_POINT, &[0x55; 32]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_slot_metadata() {
        let metadata = slot_metadata(&ed25519_metadata(0x01)).unwrap();
        assert_eq!(metadata.key_type, KeyType::Ed25519);
        assert_eq!(metadata.pin_policy, PinPolicy::Once);
        assert_eq!(metadata.touch_policy, TouchPolicy::Never);
        assert_eq!(metadata.origin, KeyOrigin::Generated);
        assert_eq!(metadata.public_key.as_bytes(), &[0x55; 32]);
    }

    #[test]
    fn test_slot_metadata_unknown_origin() {
        let err = slot_metadata(&ed25519_metadata(0x07)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_slot_metadata_missing_public_key() {
        let data = TlvBuilder::new()
            .push(TAG_ALGORITHM, &[0x11])
            .push(TAG_POLICY, &[0x01, 0x01])
            .push(TAG_ORIGIN, &[0x01])
            .build()
            .unwrap();
        assert!(matches!(
            slot_metadata(&data),
            Err(SessionError::Protocol(ProtocolError::Tlv(_)))
        ));
    }

    #[test]
    fn test_retry_metadata() {
        let data = TlvBuilder::new()
            .push(TAG_DEFAULT_VALUE, &[0x01])
            .push(TAG_RETRIES, &[0x03, 0x02])
            .build()
            .unwrap();
        assert_eq!(
            retry_metadata(&data).unwrap(),
            RetryMetadata {
                default_value: true,
                total_attempts: 3,
                attempts_remaining: 2
            }
        );
    }

    #[test]
    fn test_management_key_metadata() {
        let data = TlvBuilder::new()
            .push(TAG_ALGORITHM, &[0x0A])
            .push(TAG_POLICY, &[0x00, 0x01])
            .push(TAG_DEFAULT_VALUE, &[0x00])
            .build()
            .unwrap();
        let metadata = management_key_metadata(&data).unwrap();
        assert_eq!(metadata.algorithm, ManagementKeyAlgorithm::Aes192);
        assert!(!metadata.default_value);
    }

    #[test]
    fn test_version_and_serial() {
        assert_eq!(version(&[5, 7, 1]).unwrap().to_string(), "5.7.1");
        assert_eq!(serial(&[0x00, 0x01, 0x00, 0x00]).unwrap(), 65536);
        assert!(serial(&[0x01]).is_err());
    }
}
