//! One full register readout of one heat pump unit.
//!
//! A cycle walks the banks in the fixed order analog, digital, integer and
//! reads each bank as 6 back-to-back blocks of 100 registers, decoding every
//! element into its bank's value type. The cycle either produces a complete
//! [`ReadingSet`] covering all 1800 registers or fails with the bank and
//! block that could not be read. Nothing in between is ever handed out.

use std::collections::BTreeMap;

use tracing::debug;

use crate::connection::{self, Connection};
use crate::mapping::{Bank, BankKind, ControllerVariant};
use crate::readings::{self, ReadingSet, RegisterAddress};

/// Elements per block read request. The controllers cope with 100 at a time;
/// modbus itself would allow more, but there is no reason to push it.
pub const BLOCK_LEN: u16 = 100;
pub const BLOCKS_PER_BANK: u16 = readings::BANK_SIZE / BLOCK_LEN;

/// The read target: one logical device on an established connection.
#[derive(Debug, Clone, Copy)]
pub struct SlaveUnit {
    pub unit_id: u8,
    pub variant: ControllerVariant,
}

#[derive(thiserror::Error, Debug)]
#[error("could not read block {block} of the {bank} bank")]
pub struct Error {
    pub bank: Bank,
    pub block: u16,
    #[source]
    pub source: connection::Error,
}

/// The block-level read surface the acquisition cycle runs against.
///
/// [`Connection`] is the real implementation; tests substitute a scripted
/// one. Callers are expected to drive the cycle from a single task, so the
/// returned futures carry no auto-trait promises.
#[allow(async_fn_in_trait)]
pub trait BlockReader {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, connection::Error>;

    async fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, connection::Error>;
}

impl BlockReader for Connection {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, connection::Error> {
        Connection::read_holding_registers(self, address, count, unit_id).await
    }

    async fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, connection::Error> {
        Connection::read_coils(self, address, count, unit_id).await
    }
}

/// Execute one acquisition cycle for `unit` and return the complete snapshot.
pub async fn acquire<R: BlockReader>(io: &mut R, unit: SlaveUnit) -> Result<ReadingSet, Error> {
    let taken_at = jiff::Timestamp::now();
    let layout = unit.variant.layout();
    let mut values = BTreeMap::new();
    for bank in Bank::ALL {
        let window = layout.window(bank);
        for block in 0..BLOCKS_PER_BANK {
            let base = block * BLOCK_LEN;
            // The analog bank has always been read from the raw block offset,
            // with the configured start left unapplied; units in the field
            // answer on exactly these addresses. Keep it bit-for-bit even for
            // variants with a nonzero start.
            let address = match bank {
                Bank::Analog => base,
                Bank::Digital | Bank::Integer => base + window.start,
            };
            debug!(
                message = "reading block",
                bank = %bank,
                block,
                address,
                kind = %window.kind,
                unit = unit.unit_id
            );
            let fail = |source| Error { bank, block, source };
            match window.kind {
                BankKind::Holding => {
                    let words = io
                        .read_holding_registers(address, BLOCK_LEN, unit.unit_id)
                        .await
                        .map_err(fail)?;
                    for (j, word) in words.into_iter().take(BLOCK_LEN.into()).enumerate() {
                        let offset = base + j as u16;
                        let value = match bank {
                            Bank::Analog => readings::decode_analog(word),
                            Bank::Integer => readings::decode_integer(word),
                            Bank::Digital => readings::decode_digital(word != 0),
                        };
                        values.insert(RegisterAddress { bank, offset }, value);
                    }
                }
                BankKind::Coil => {
                    let bits = io
                        .read_coils(address, BLOCK_LEN, unit.unit_id)
                        .await
                        .map_err(fail)?;
                    for (j, bit) in bits.into_iter().take(BLOCK_LEN.into()).enumerate() {
                        let offset = base + j as u16;
                        values.insert(RegisterAddress { bank, offset }, readings::decode_digital(bit));
                    }
                }
            }
        }
    }
    Ok(ReadingSet { taken_at, values })
}
