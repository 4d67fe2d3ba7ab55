//! State test fixtures and case selection.
//!
//! A fixture document maps test names to [`StateTest`]s. Each test declares
//! one transaction template whose `data`, `gasLimit` and `value` fields are
//! arrays of variants, and per fork a list of post cases naming one variant
//! of each plus the expected state root.

use std::{collections::BTreeMap, fmt, str::FromStr};

use ethereum_types::{Address, H256, U256};
use log::{debug, trace};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use crate::{
    context::{BlockContext, Fork},
    error::HarnessError,
    hex,
    transaction::Transaction,
};

/// One named test of a fixture document.
#[derive(Clone, Debug, Deserialize)]
pub struct StateTest {
    pub env: BlockContext,
    #[serde(deserialize_with = "pre_state")]
    pub pre: BTreeMap<Address, PreAccount>,
    pub transaction: TxTemplate,
    /// Fork name, as written in the fixture, to post cases.
    pub post: BTreeMap<String, Vec<PostCase>>,
}

/// A declared pre-state account.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct PreAccount {
    #[serde(deserialize_with = "hex::quantity")]
    pub balance: U256,
    #[serde(deserialize_with = "hex::quantity")]
    pub nonce: U256,
    #[serde(default, deserialize_with = "hex::deserialize")]
    pub code: Vec<u8>,
    #[serde(default, deserialize_with = "hex::storage")]
    pub storage: BTreeMap<U256, U256>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxTemplate {
    #[serde(deserialize_with = "hex::byte_seq")]
    pub data: Vec<Vec<u8>>,
    #[serde(deserialize_with = "hex::quantities")]
    pub gas_limit: Vec<U256>,
    #[serde(deserialize_with = "hex::quantity")]
    pub gas_price: U256,
    #[serde(deserialize_with = "hex::quantity")]
    pub nonce: U256,
    #[serde(deserialize_with = "hex::h256")]
    pub secret_key: H256,
    #[serde(deserialize_with = "hex::opt_address")]
    pub to: Option<Address>,
    #[serde(deserialize_with = "hex::quantities")]
    pub value: Vec<U256>,
}

/// Which variant of each transaction field a post case uses.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Indexes {
    pub data: usize,
    pub gas: usize,
    pub value: usize,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PostCase {
    #[serde(deserialize_with = "hex::h256")]
    pub hash: H256,
    pub indexes: Indexes,
}

/// Optional filters on the variant indexes. Unset filters match anything,
/// set ones must all match.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Selectors {
    pub data: Option<usize>,
    pub gas: Option<usize>,
    pub value: Option<usize>,
}

impl Selectors {
    pub fn matches(&self, indexes: &Indexes) -> bool {
        let ok = |filter: Option<usize>, index| filter.map_or(true, |f| f == index);
        ok(self.data, indexes.data) && ok(self.gas, indexes.gas) && ok(self.value, indexes.value)
    }
}

/// A post case with the transaction instantiated.
#[derive(Clone, Debug)]
pub struct SelectedCase {
    pub test_name: String,
    pub fork: Fork,
    pub indexes: Indexes,
    pub expected_root: H256,
    pub tx: Transaction,
    pub env: BlockContext,
    pub pre: BTreeMap<Address, PreAccount>,
}

impl SelectedCase {
    /// `<test>-<fork>-d<data>g<gas>v<value>`, also the artifact file stem.
    pub fn name(&self) -> String {
        CaseName {
            test_name: &self.test_name,
            fork: self.fork,
            indexes: self.indexes,
        }
        .to_string()
    }
}

struct CaseName<'a> {
    test_name: &'a str,
    fork: Fork,
    indexes: Indexes,
}

impl fmt::Display for CaseName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-d{}g{}v{}",
            self.test_name, self.fork, self.indexes.data, self.indexes.gas, self.indexes.value
        )
    }
}

/// Parses a fixture document holding any number of named tests.
pub fn parse_fixture(json: &str) -> Result<BTreeMap<String, StateTest>, HarnessError> {
    let de = &mut serde_json::Deserializer::from_str(json);
    serde_path_to_error::deserialize(de).map_err(|e| {
        HarnessError::Fixture(format!("at {}: {}", e.path(), e.inner()))
    })
}

/// The post cases of `test` declared for `fork` and passing `selectors`, in
/// declaration order. An empty result means there is nothing to run for this
/// fork; it is not an error.
pub fn select_cases(
    test_name: &str,
    test: &StateTest,
    fork: Fork,
    selectors: &Selectors,
) -> Result<Vec<SelectedCase>, HarnessError> {
    let mut cases = Vec::new();
    for (key, posts) in &test.post {
        match Fork::from_str(key) {
            Ok(f) if f == fork => {}
            Ok(_) => continue,
            Err(_) => {
                trace!("{}: ignoring post section for unknown fork {:?}", test_name, key);
                continue;
            }
        }

        for post in posts.iter().filter(|p| selectors.matches(&p.indexes)) {
            cases.push(SelectedCase {
                test_name: test_name.to_owned(),
                fork,
                indexes: post.indexes,
                expected_root: post.hash,
                tx: test.transaction.instantiate(post.indexes).map_err(|field| {
                    HarnessError::Fixture(format!(
                        "{}: {} index out of range in {:?}",
                        test_name, field, post.indexes
                    ))
                })?,
                env: test.env.clone(),
                pre: test.pre.clone(),
            });
        }
    }

    debug!(
        "{}: selected {} case(s) for {}",
        test_name,
        cases.len(),
        fork
    );
    Ok(cases)
}

impl TxTemplate {
    /// Substitutes the indexed variants. Returns the name of the first field
    /// whose index is out of range.
    pub fn instantiate(&self, indexes: Indexes) -> Result<Transaction, &'static str> {
        Ok(Transaction {
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: *self.gas_limit.get(indexes.gas).ok_or("gas")?,
            to: self.to,
            value: *self.value.get(indexes.value).ok_or("value")?,
            data: self.data.get(indexes.data).ok_or("data")?.clone(),
            secret_key: self.secret_key,
        })
    }
}

fn pre_state<'de, D: Deserializer<'de>>(
    it: D,
) -> Result<BTreeMap<Address, PreAccount>, D::Error> {
    BTreeMap::<String, PreAccount>::deserialize(it)?
        .into_iter()
        .map(|(k, v)| Ok((hex::parse_address(&k).map_err(D::Error::custom)?, v)))
        .collect()
}
