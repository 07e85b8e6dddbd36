#[macro_export]
macro_rules! contract_tests_for {
      (
          $mod_name:ident,
          make = $make:expr,
          tests = {
            $( $test_name:ident => $tmpl:path ),+ $(,)?
        }
      ) => {
          mod $mod_name {
              use super::*;

              $(
                  #[test]
                  fn $test_name() {
                      let op = ($make)();
                      $tmpl(op);
                  }
              )+
          }
      };
  }

/// Behaviour every card behind a [`Connection`](crate::ports::Connection)
/// must show to the PIV session
#[cfg(test)]
pub mod piv_contract {
    use crate::{
        error::{AuthError, KeyManagementError, PolicyError},
        model::{KeySpec, KeyType, ManagementKey, Pin, PinPolicy, SignatureAlgorithm, Slot, TouchPolicy},
        piv::{PivSession, SessionState, SigningRequest},
        ports::Connection,
        SessionError,
    };

    /// A fresh card with factory PIN, reachable through `connection`
    pub(crate) struct ContractCard<C: Connection> {
        pub connection: C,
        pub management_key: ManagementKey,
    }

    fn open<C: Connection>(card: ContractCard<C>) -> (PivSession<C>, ManagementKey) {
        let session = PivSession::open(card.connection).expect("open session");
        (session, card.management_key)
    }

    fn ready<C: Connection>(card: ContractCard<C>) -> PivSession<C> {
        let (mut session, key) = open(card);
        session.verify_pin(&Pin::factory_default()).expect("verify PIN");
        session.authenticate_management(&key).expect("authenticate");
        assert_eq!(session.state(), SessionState::Ready);
        session
    }

    fn wrong_key(key: &ManagementKey) -> ManagementKey {
        let mut bytes = key.as_bytes().to_vec();
        // The low bit of each DES key byte is parity and ignored by 3DES
        bytes[0] = !bytes[0];
        ManagementKey::new(key.algorithm(), &bytes).expect("same length")
    }

    pub(crate) fn test_pin_verification_success<C: Connection>(card: ContractCard<C>) {
        let (mut session, _) = open(card);
        session.verify_pin(&Pin::factory_default()).expect("verify PIN");
        assert_eq!(session.state(), SessionState::PinVerified);
    }

    pub(crate) fn test_pin_verification_failure<C: Connection>(card: ContractCard<C>) {
        let (mut session, _) = open(card);
        let result = session.verify_pin(&Pin::from_str("999999").unwrap());
        assert!(matches!(
            result.unwrap_err(),
            SessionError::Auth(AuthError::WrongPin { attempts_remaining: 2 })
        ));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    pub(crate) fn test_pin_counter_read_without_consuming<C: Connection>(card: ContractCard<C>) {
        let (mut session, _) = open(card);
        assert_eq!(session.pin_attempts().unwrap(), 3);
        assert_eq!(session.pin_attempts().unwrap(), 3);
    }

    pub(crate) fn test_mgmt_key_authentication_success<C: Connection>(card: ContractCard<C>) {
        let (mut session, key) = open(card);
        session.authenticate_management(&key).expect("authenticate");
        assert_eq!(session.state(), SessionState::ManagementAuthenticated);
    }

    pub(crate) fn test_mgmt_key_authentication_failure<C: Connection>(card: ContractCard<C>) {
        let (mut session, key) = open(card);
        let result = session.authenticate_management(&wrong_key(&key));
        assert!(matches!(
            result.unwrap_err(),
            SessionError::Auth(AuthError::WrongManagementKey)
        ));
        assert!(!session.state().management_authenticated());
        assert!(session.state().is_live());
    }

    pub(crate) fn test_empty_slot_has_no_key<C: Connection>(card: ContractCard<C>) {
        let mut session = ready(card);
        assert!(!session.has_key(Slot::KeyManagement).unwrap());
        assert!(matches!(
            session.slot_metadata(Slot::KeyManagement).unwrap_err(),
            SessionError::KeyManagement(KeyManagementError::NoKeyInSlot { .. })
        ));
    }

    pub(crate) fn test_generate_key_not_authenticated<C: Connection>(card: ContractCard<C>) {
        let (mut session, _) = open(card);
        session.verify_pin(&Pin::factory_default()).unwrap();
        let result = session.generate_key(Slot::Authentication, &KeySpec::default());
        assert!(matches!(result.unwrap_err(), SessionError::InvalidState { .. }));
    }

    pub(crate) fn test_generate_and_sign<C: Connection>(card: ContractCard<C>) {
        let mut session = ready(card);
        let spec = KeySpec::new(KeyType::EccP256, PinPolicy::Once, TouchPolicy::Never);
        let public_key = session.generate_key(Slot::Authentication, &spec).unwrap();
        assert_eq!(public_key.as_bytes().len(), 65);

        let metadata = session.slot_metadata(Slot::Authentication).unwrap();
        assert_eq!(metadata.public_key, public_key);
        assert_eq!(metadata.pin_policy, PinPolicy::Once);

        let message = b"contract message".to_vec();
        let signature = session
            .sign(&SigningRequest {
                slot: Slot::Authentication,
                key_type: KeyType::EccP256,
                message: message.clone(),
                algorithm: SignatureAlgorithm::EcdsaP256Sha256,
            })
            .unwrap();
        public_key.verify(&message, &signature).expect("valid signature");
    }

    pub(crate) fn test_sign_with_mismatched_key_type<C: Connection>(card: ContractCard<C>) {
        let mut session = ready(card);
        session
            .generate_key(Slot::Signature, &KeySpec::new(KeyType::Ed25519, PinPolicy::Once, TouchPolicy::Never))
            .unwrap();
        let result = session.sign(&SigningRequest {
            slot: Slot::Signature,
            key_type: KeyType::EccP384,
            message: b"data".to_vec(),
            algorithm: SignatureAlgorithm::EcdsaP384Sha384,
        });
        assert!(matches!(
            result.unwrap_err(),
            SessionError::Policy(PolicyError::KeyTypeMismatch {
                actual: KeyType::Ed25519,
                ..
            })
        ));
    }

    pub(crate) fn test_close_is_idempotent<C: Connection>(card: ContractCard<C>) {
        let (mut session, _) = open(card);
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.verify_pin(&Pin::factory_default()).unwrap_err(),
            SessionError::InvalidState { .. }
        ));
    }
}
