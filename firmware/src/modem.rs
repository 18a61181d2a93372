//! UART LoRaWAN modem adapter.
//!
//! The network stack runs on a radio co-processor; this adapter speaks its
//! small binary command protocol over a blocking UART. Join and send are
//! extended synchronous operations by contract, so blocking here matches
//! the application's expectations while it is inside a radio window.

use embassy_stm32::mode::Blocking;
use embassy_stm32::usart::Uart;
use node_core::radio::{JoinParams, Radio};

const CMD_JOIN: u8 = 0xA1;
const CMD_SEND: u8 = 0xA2;
const RESP_OK: u8 = 0x00;

/// Errors surfaced by the modem link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModemError {
    /// UART transfer failed.
    Link,
    /// The co-processor answered with an error status.
    Rejected(u8),
}

/// Radio capability over the modem UART.
pub struct RadioModem<'d> {
    uart: Uart<'d, Blocking>,
    joined: bool,
}

impl<'d> RadioModem<'d> {
    /// Wraps the modem UART; no session is assumed.
    pub fn new(uart: Uart<'d, Blocking>) -> Self {
        Self {
            uart,
            joined: false,
        }
    }

    fn command(&mut self, frame: &[u8]) -> Result<(), ModemError> {
        self.uart
            .blocking_write(frame)
            .map_err(|_| ModemError::Link)?;

        let mut status = [0u8; 1];
        self.uart
            .blocking_read(&mut status)
            .map_err(|_| ModemError::Link)?;
        if status[0] == RESP_OK {
            Ok(())
        } else {
            Err(ModemError::Rejected(status[0]))
        }
    }
}

impl Radio for RadioModem<'_> {
    type Error = ModemError;

    fn is_joined(&self) -> bool {
        self.joined
    }

    fn join(&mut self, params: &JoinParams, dev_nonce: u16) -> Result<(), ModemError> {
        let mut frame = [0u8; 35];
        frame[0] = CMD_JOIN;
        frame[1..9].copy_from_slice(&params.dev_eui);
        frame[9..17].copy_from_slice(&params.join_eui);
        frame[17..33].copy_from_slice(&params.app_key);
        frame[33..35].copy_from_slice(&dev_nonce.to_be_bytes());

        self.command(&frame)?;
        self.joined = true;
        Ok(())
    }

    fn send(
        &mut self,
        payload: &[u8],
        port: u8,
        confirm_attempts: u8,
    ) -> Result<(), ModemError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u16;
        let header = [
            CMD_SEND,
            port,
            confirm_attempts,
            len.to_be_bytes()[0],
            len.to_be_bytes()[1],
        ];
        self.uart
            .blocking_write(&header)
            .map_err(|_| ModemError::Link)?;
        self.uart
            .blocking_write(payload)
            .map_err(|_| ModemError::Link)?;

        let mut status = [0u8; 1];
        self.uart
            .blocking_read(&mut status)
            .map_err(|_| ModemError::Link)?;
        if status[0] == RESP_OK {
            Ok(())
        } else {
            Err(ModemError::Rejected(status[0]))
        }
    }
}
