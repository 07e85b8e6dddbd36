//! Single-block ciphers for the management key challenge/response

use aes::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use des::TdesEde3;

use crate::model::{ManagementKey, ManagementKeyAlgorithm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encrypt,
    Decrypt,
}

/// Encrypt or decrypt exactly one block with the management key
///
/// Returns `None` if `block` is not one cipher block long.
pub(crate) fn process_block(
    key: &ManagementKey,
    block: &[u8],
    direction: Direction,
) -> Option<Vec<u8>> {
    match key.algorithm() {
        ManagementKeyAlgorithm::TripleDes => {
            process::<TdesEde3>(key.as_bytes(), block, direction)
        }
        ManagementKeyAlgorithm::Aes128 => process::<Aes128>(key.as_bytes(), block, direction),
        ManagementKeyAlgorithm::Aes192 => process::<Aes192>(key.as_bytes(), block, direction),
        ManagementKeyAlgorithm::Aes256 => process::<Aes256>(key.as_bytes(), block, direction),
    }
}

fn process<C>(key: &[u8], data: &[u8], direction: Direction) -> Option<Vec<u8>>
where
    C: KeyInit + BlockEncrypt + BlockDecrypt,
{
    if data.len() != C::block_size() {
        return None;
    }
    let cipher = C::new_from_slice(key).ok()?;
    let mut block = Block::<C>::clone_from_slice(data);
    match direction {
        Direction::Encrypt => cipher.encrypt_block(&mut block),
        Direction::Decrypt => cipher.decrypt_block(&mut block),
    }
    Some(block.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_algorithm() {
        for algorithm in [
            ManagementKeyAlgorithm::TripleDes,
            ManagementKeyAlgorithm::Aes128,
            ManagementKeyAlgorithm::Aes192,
            ManagementKeyAlgorithm::Aes256,
        ] {
            let key = ManagementKey::new(algorithm, &vec![0x42; algorithm.key_length()]).unwrap();
            let plain = vec![0x11; algorithm.block_size()];
            let encrypted = process_block(&key, &plain, Direction::Encrypt).unwrap();
            assert_ne!(encrypted, plain);
            let decrypted = process_block(&key, &encrypted, Direction::Decrypt).unwrap();
            assert_eq!(decrypted, plain);
        }
    }

    #[test]
    fn test_wrong_block_size() {
        let key = ManagementKey::factory_default(ManagementKeyAlgorithm::TripleDes).unwrap();
        assert_eq!(process_block(&key, &[0u8; 16], Direction::Encrypt), None);
    }

    #[test]
    fn test_tdes_known_answer() {
        // Same key in all three positions degenerates to single DES
        let key = ManagementKey::new(
            ManagementKeyAlgorithm::TripleDes,
            &hex::decode("0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF").unwrap(),
        )
        .unwrap();
        let plain = hex::decode("4E6F772069732074").unwrap();
        let encrypted = process_block(&key, &plain, Direction::Encrypt).unwrap();
        assert_eq!(hex::encode_upper(encrypted), "3FA40E8A984D4815");
    }
}
