//! Test vectors for shard/beacon-style stateless validators.
//!
//! The document follows the layout those validators read: one execution
//! script, one execution environment whose state is the state root, and one
//! shard block carrying the block body. All byte strings are plain hex
//! without a `0x` prefix.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use ethereum_types::H256;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{error::HarnessError, fixture::SelectedCase};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestVector {
    pub beacon_state: BeaconState,
    pub shard_pre_state: ShardState,
    pub shard_blocks: Vec<ShardBlock>,
    pub shard_post_state: ShardState,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BeaconState {
    pub execution_scripts: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShardState {
    pub exec_env_states: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShardBlock {
    pub env: u64,
    pub data: String,
}

impl TestVector {
    pub fn new(execution_script: &str, pre_root: H256, block_body: &[u8], post_root: H256) -> Self {
        Self {
            beacon_state: BeaconState {
                execution_scripts: vec![execution_script.to_owned()],
            },
            shard_pre_state: ShardState {
                exec_env_states: vec![hex::encode(pre_root)],
            },
            shard_blocks: vec![ShardBlock {
                env: 0,
                data: hex::encode(block_body),
            }],
            shard_post_state: ShardState {
                exec_env_states: vec![hex::encode(post_root)],
            },
        }
    }

    /// The block body of the first shard block.
    pub fn block_body(&self) -> Option<Vec<u8>> {
        hex::decode(&self.shard_blocks.first()?.data).ok()
    }
}

/// `<dir>/<test>-<fork>-d<data>g<gas>v<value>.json`
pub fn artifact_file_name(directory: &Path, case: &SelectedCase) -> PathBuf {
    directory.join(format!("{}.json", case.name()))
}

/// Writes `vector` for `case` into `directory`, creating it if needed.
pub fn write_artifact(
    directory: &Path,
    case: &SelectedCase,
    vector: &TestVector,
) -> Result<PathBuf, HarnessError> {
    let path = artifact_file_name(directory, case);
    let artifact_err = |message: String| HarnessError::Artifact {
        path: path.clone(),
        message,
    };

    if !directory.exists() {
        info!("Creating artifact directory {:?}", directory.display());
        fs::create_dir_all(directory).map_err(|e| artifact_err(e.to_string()))?;
    }
    let file = File::create(&path).map_err(|e| artifact_err(e.to_string()))?;
    serde_json::to_writer_pretty(file, vector).map_err(|e| artifact_err(e.to_string()))?;

    info!("Wrote test vector {:?}", path.display());
    Ok(path)
}
