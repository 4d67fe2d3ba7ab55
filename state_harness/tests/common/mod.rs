#![allow(dead_code)]

use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use anyhow::Context as _;
use env_logger::{try_init_from_env, Env, DEFAULT_FILTER_ENV};
use ethereum_types::{Address, H160, H256, U256};
use hex_literal::hex;
use mpt_store::MemNodeDb;
use state_harness::{
    context::{BlockContext, Fork},
    fixture::{Indexes, PreAccount, SelectedCase},
    loader::load_pre_state,
    transaction::Transaction,
};

pub const SENDER: Address = H160(hex!("a94f5374fce5edbc8e2a8697c15331677e6ebf0b"));
pub const RECIPIENT: Address = H160(hex!("095e7baea6a6c7c4c2dfeb977efac326af552d87"));
pub const COINBASE: Address = H160(hex!("2adc25665018aa1fe0e6bc666dac8fc2697ff9ba"));
pub const SECRET_KEY: H256 = H256(hex!(
    "45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8"
));

pub fn init_logger() {
    let _ = try_init_from_env(Env::default().filter_or(DEFAULT_FILTER_ENV, "info"));
}

/// Every fixture document under `tests/fixtures`, by file stem.
pub fn fixtures() -> anyhow::Result<Vec<(String, String)>> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let mut docs = vec![];
    for entry in fs::read_dir(&dir).context(format!("couldn't read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|it| it == "json") {
            let stem = path
                .file_stem()
                .and_then(|it| it.to_str())
                .context("fixture file names must be UTF-8")?
                .to_owned();
            docs.push((stem, fs::read_to_string(&path)?));
        }
    }
    docs.sort();
    Ok(docs)
}

pub fn account(balance: u64, nonce: u64) -> PreAccount {
    PreAccount {
        balance: balance.into(),
        nonce: nonce.into(),
        ..Default::default()
    }
}

/// The root of a state holding exactly `accounts`.
pub fn state_root(accounts: impl IntoIterator<Item = (Address, PreAccount)>) -> H256 {
    let accounts: BTreeMap<_, _> = accounts.into_iter().collect();
    load_pre_state(Arc::new(MemNodeDb::new()), &accounts)
        .expect("in-memory stores never fail")
        .1
}

pub fn block() -> BlockContext {
    BlockContext {
        coinbase: COINBASE,
        difficulty: 0x20000.into(),
        gas_limit: 0x7fffffffffffffffu64.into(),
        number: 1.into(),
        timestamp: 0x3e8.into(),
        previous_hash: H256::zero(),
    }
}

pub fn transfer(value: u64, gas_price: u64) -> Transaction {
    Transaction {
        nonce: U256::zero(),
        gas_price: gas_price.into(),
        gas_limit: 21_000.into(),
        to: Some(RECIPIENT),
        value: value.into(),
        data: vec![],
        secret_key: SECRET_KEY,
    }
}

pub fn case(
    pre: impl IntoIterator<Item = (Address, PreAccount)>,
    tx: Transaction,
    expected_root: H256,
) -> SelectedCase {
    SelectedCase {
        test_name: "handWritten".to_owned(),
        fork: Fork::Istanbul,
        indexes: Indexes::default(),
        expected_root,
        tx,
        env: block(),
        pre: pre.into_iter().collect(),
    }
}
