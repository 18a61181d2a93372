//! Configuration link over the BLE module UART.
//!
//! The BLE co-processor forwards GATT operations as small framed requests:
//! `[op, attribute, len, payload...]` with op 0x01 = write, 0x02 = read.
//! Responses are `[status]` for writes and `[status, len, payload...]` for
//! reads. The task shares the configuration and session with the
//! application loop under the runtime mutex, so every accepted write is
//! applied and persisted before the next poll pass observes it.

use embassy_stm32::mode::Async;
use embassy_stm32::usart::Uart;
use node_core::configlink::{
    self, AttributeId, LinkError, LinkTelemetry, MAX_ATTRIBUTE_LEN,
};
use node_core::power::BatterySnapshot;

use crate::runtime::SharedState;
use crate::status;

const OP_WRITE: u8 = 0x01;
const OP_READ: u8 = 0x02;

const STATUS_OK: u8 = 0x00;
const STATUS_BAD_FRAME: u8 = 0x01;
const STATUS_UNKNOWN_ATTRIBUTE: u8 = 0x02;
const STATUS_REJECTED: u8 = 0x03;
const STATUS_NOT_PERSISTED: u8 = 0x04;

fn rejection_status(error: LinkError) -> u8 {
    match error {
        LinkError::ReadOnly
        | LinkError::InvalidOffset
        | LinkError::InvalidLength { .. }
        | LinkError::UnknownName
        | LinkError::BadValue => STATUS_REJECTED,
    }
}

/// Serves configuration frames from the BLE module until the UART dies.
#[embassy_executor::task]
pub async fn run(mut uart: Uart<'static, Async>, shared: &'static SharedState) {
    let mut frame = [0u8; 4 + MAX_ATTRIBUTE_LEN];
    let mut response = [0u8; 2 + MAX_ATTRIBUTE_LEN];

    loop {
        let Ok(received) = uart.read_until_idle(&mut frame).await else {
            continue;
        };
        let reply_len = handle_frame(&frame[..received], &mut response, shared).await;
        if uart.write(&response[..reply_len]).await.is_err() {
            defmt::warn!("configlink: response dropped");
        }
    }
}

async fn handle_frame(
    frame: &[u8],
    response: &mut [u8],
    shared: &'static SharedState,
) -> usize {
    if frame.len() < 3 {
        response[0] = STATUS_BAD_FRAME;
        return 1;
    }
    let (op, code, len) = (frame[0], frame[1], usize::from(frame[2]));
    let Some(attribute) = AttributeId::from_code(code) else {
        response[0] = STATUS_UNKNOWN_ATTRIBUTE;
        return 1;
    };
    if frame.len() < 3 + len {
        response[0] = STATUS_BAD_FRAME;
        return 1;
    }
    let payload = &frame[3..3 + len];

    let mut guard = shared.lock().await;
    match op {
        OP_WRITE => {
            let state = &mut *guard;
            match configlink::write_attribute(
                attribute,
                0,
                payload,
                &mut state.config,
                &mut state.session,
                &mut state.store,
            ) {
                Ok(ack) => {
                    response[0] = if ack.persisted {
                        STATUS_OK
                    } else {
                        STATUS_NOT_PERSISTED
                    };
                    1
                }
                Err(error) => {
                    defmt::warn!("configlink: write to {=u8} rejected", code);
                    response[0] = rejection_status(error);
                    1
                }
            }
        }
        OP_READ => {
            let telemetry = LinkTelemetry {
                mode: status::current_mode(),
                battery: BatterySnapshot {
                    millivolts: status::battery_millivolts().unwrap_or(0),
                    temperature_dd: guard.battery.temperature_dd,
                },
                join_requested: guard.session.join_requested,
            };
            let value = configlink::read_attribute(attribute, &guard.config, &telemetry);
            response[0] = STATUS_OK;
            #[allow(clippy::cast_possible_truncation)]
            {
                response[1] = value.len() as u8;
            }
            response[2..2 + value.len()].copy_from_slice(&value);
            2 + value.len()
        }
        _ => {
            response[0] = STATUS_BAD_FRAME;
            1
        }
    }
}
