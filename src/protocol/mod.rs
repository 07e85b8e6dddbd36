//! ISO-7816 APDU codec for the PIV application

mod apdu;
mod status;
pub mod tlv;

pub use apdu::{Command, Response};
pub use status::StatusWord;
pub use tlv::{TlvBuilder, TlvError};

use tracing::debug;

use crate::error::{LinkError, ProtocolError, SessionResult};

/// PIV application identifier
pub const PIV_AID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x08];

pub const INS_SELECT: u8 = 0xA4;
pub const INS_VERIFY: u8 = 0x20;
pub const INS_GENERAL_AUTHENTICATE: u8 = 0x87;
pub const INS_GENERATE_ASYMMETRIC: u8 = 0x47;
pub const INS_GET_RESPONSE: u8 = 0xC0;
pub const INS_GET_METADATA: u8 = 0xF7;
pub const INS_GET_SERIAL: u8 = 0xF8;
pub const INS_GET_VERSION: u8 = 0xFD;

/// Most `61xx` continuations accepted for one command
pub const MAX_GET_RESPONSE_ROUNDS: usize = 64;

/// VERIFY / GET METADATA references
pub const REF_PIN: u8 = 0x80;
pub const REF_PUK: u8 = 0x81;
pub const REF_MANAGEMENT_KEY: u8 = 0x9B;

/// Send `command`, chaining long payloads and collecting `61xx` continuations
///
/// Only link failures are returned as errors; every status word is handed
/// back to the caller for interpretation.
pub fn transceive<F>(mut exchange: F, command: &Command) -> SessionResult<Response>
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, LinkError>,
{
    debug!(
        ins = format_args!("{:02X}", command.ins),
        p1 = format_args!("{:02X}", command.p1),
        p2 = format_args!("{:02X}", command.p2),
        lc = command.data.len(),
        "APDU ->"
    );

    let mut response = None;
    for block in command.chain() {
        let raw = exchange(&block.to_bytes())?;
        let parsed = Response::from_bytes(&raw)?;
        if block.is_chained() && !parsed.sw.is_success() {
            debug!(sw = %parsed.sw, "chained block rejected");
            return Ok(parsed);
        }
        response = Some(parsed);
    }
    let mut response = response.unwrap_or_else(|| Response::status(StatusWord::WRONG_LENGTH));

    let mut rounds = 0;
    while response.sw.has_more_data() {
        if rounds == MAX_GET_RESPONSE_ROUNDS {
            return Err(ProtocolError::MalformedResponse {
                operation: "get response",
                reason: format!("still more data after {rounds} continuations"),
            }
            .into());
        }
        rounds += 1;
        let get_response = Command::new(INS_GET_RESPONSE, 0x00, 0x00).with_le(response.sw.sw2());
        let raw = exchange(&get_response.to_bytes())?;
        let next = Response::from_bytes(&raw)?;
        response.data.extend_from_slice(&next.data);
        response.sw = next.sw;
    }

    debug!(sw = %response.sw, len = response.data.len(), "APDU <-");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn scripted(
        replies: Vec<Vec<u8>>,
    ) -> (
        impl FnMut(&[u8]) -> Result<Vec<u8>, LinkError>,
        std::rc::Rc<std::cell::RefCell<Vec<Vec<u8>>>>,
    ) {
        let sent = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log = sent.clone();
        let mut replies: VecDeque<Vec<u8>> = replies.into();
        let exchange = move |apdu: &[u8]| {
            log.borrow_mut().push(apdu.to_vec());
            replies.pop_front().ok_or(LinkError::Lost {
                reason: "script exhausted".to_string(),
            })
        };
        (exchange, sent)
    }

    #[test]
    fn test_get_response_loop() {
        let (exchange, sent) = scripted(vec![
            vec![0x01, 0x02, 0x61, 0x02],
            vec![0x03, 0x04, 0x90, 0x00],
        ]);
        let response = transceive(exchange, &Command::new(INS_GET_VERSION, 0, 0)).unwrap();
        assert_eq!(response.data, vec![1, 2, 3, 4]);
        assert!(response.sw.is_success());
        assert_eq!(sent.borrow()[1], vec![0x00, INS_GET_RESPONSE, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_endless_continuation_is_cut_off() {
        let (exchange, sent) = scripted(vec![vec![0xAA, 0x61, 0x00]; MAX_GET_RESPONSE_ROUNDS + 10]);
        let err = transceive(exchange, &Command::new(INS_GET_VERSION, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SessionError::Protocol(ProtocolError::MalformedResponse {
                operation: "get response",
                ..
            })
        ));
        assert_eq!(sent.borrow().len(), MAX_GET_RESPONSE_ROUNDS + 1);
    }

    #[test]
    fn test_chained_blocks_sent_in_order() {
        let (exchange, sent) = scripted(vec![vec![0x90, 0x00], vec![0x90, 0x00]]);
        let command = Command::new(INS_GENERAL_AUTHENTICATE, 0x11, 0x9C).with_data(vec![0; 300]);
        transceive(exchange, &command).unwrap();
        let sent = sent.borrow();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][0], 0x10);
        assert_eq!(sent[1][0], 0x00);
    }

    #[test]
    fn test_link_error_propagates() {
        let (exchange, _) = scripted(vec![]);
        let err = transceive(exchange, &Command::new(INS_GET_SERIAL, 0, 0)).unwrap_err();
        assert!(err.is_link_error());
    }
}
