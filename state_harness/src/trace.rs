use ethereum_types::{Address, H256, U256};
use log::trace;
use serde::Serialize;

use crate::hex;

/// Trace sink API for execution engines.
///
/// Engines write structured records here instead of emitting ad hoc events.
/// Sinks get the records by reference so that engines never clone anything
/// for a sink that drops it.
pub trait TraceSink {
    /// Called for every executed step, if the engine has steps.
    fn step(&mut self, record: &StepRecord);

    /// Called once the transaction has been applied.
    fn after_tx(&mut self, record: &TxRecord);
}

/// One execution step.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub pc: usize,
    pub op: String,
    pub gas: U256,
    pub gas_cost: U256,
    pub depth: usize,
}

/// Summary of an applied transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub sender: Address,
    pub to: Option<Address>,
    pub gas_used: U256,
    /// State root after the transaction, if the engine computed one.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_root"
    )]
    pub state_root: Option<H256>,
    pub error: Option<String>,
}

fn serialize_opt_root<S: serde::Serializer>(
    root: &Option<H256>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match root {
        Some(root) => hex::serialize_h256(root, serializer),
        None => serializer.serialize_none(),
    }
}

/// Drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn step(&mut self, _record: &StepRecord) {}

    fn after_tx(&mut self, _record: &TxRecord) {}
}

/// Writes every record as one JSON line at `trace` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn step(&mut self, record: &StepRecord) {
        log_json(record)
    }

    fn after_tx(&mut self, record: &TxRecord) {
        log_json(record)
    }
}

fn log_json<T: Serialize>(record: &T) {
    match serde_json::to_string(record) {
        Ok(line) => trace!("{}", line),
        Err(e) => trace!("Unserializable trace record: {}", e),
    }
}

/// Keeps every record in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    pub steps: Vec<StepRecord>,
    pub txs: Vec<TxRecord>,
}

impl TraceSink for CollectingSink {
    fn step(&mut self, record: &StepRecord) {
        self.steps.push(record.clone());
    }

    fn after_tx(&mut self, record: &TxRecord) {
        self.txs.push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_records_serialize_with_hex_roots() {
        let record = TxRecord {
            sender: Address::zero(),
            to: None,
            gas_used: 21_000.into(),
            state_root: Some(H256::repeat_byte(0x11)),
            error: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json["stateRoot"],
            format!("0x{}", "11".repeat(32)).as_str()
        );
        assert_eq!(json["gasUsed"], "0x5208");

        let mut sink = CollectingSink::default();
        sink.after_tx(&record);
        assert_eq!(sink.txs, vec![record]);
    }
}
