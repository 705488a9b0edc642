//! Mock transaction file read by `ckb-debugger --tx-file`.
//!
//! Besides the transaction itself the file carries every cell and header the
//! scripts may load, so the debugger can run without a node.
use ckb_jsonrpc_types::{CellDep, CellInput, CellOutput, HeaderView, JsonBytes, Transaction};
use ckb_types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockCellDep {
    pub cell_dep: CellDep,
    pub output: CellOutput,
    pub data: JsonBytes,
    pub header: Option<H256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockInput {
    pub input: CellInput,
    pub output: CellOutput,
    pub data: JsonBytes,
    pub header: Option<H256>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockInfo {
    pub inputs: Vec<MockInput>,
    pub cell_deps: Vec<MockCellDep>,
    pub header_deps: Vec<HeaderView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockTransaction {
    pub mock_info: MockInfo,
    pub tx: Transaction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellType {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptGroupType {
    Lock,
    Type,
}

/// One script of a transaction, addressed the way `ckb-debugger` does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScriptTarget {
    pub cell_type: CellType,
    pub cell_index: usize,
    pub script_type: ScriptGroupType,
}

impl ScriptTarget {
    pub fn new(cell_type: CellType, cell_index: usize, script_type: ScriptGroupType) -> Self {
        ScriptTarget {
            cell_type,
            cell_index,
            script_type,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let cell_type = match self.cell_type {
            CellType::Input => "input",
            CellType::Output => "output",
        };
        let script_type = match self.script_type {
            ScriptGroupType::Lock => "lock",
            ScriptGroupType::Type => "type",
        };
        vec![
            "--cell-index".to_string(),
            self.cell_index.to_string(),
            "--cell-type".to_string(),
            cell_type.to_string(),
            "--script-group-type".to_string(),
            script_type.to_string(),
        ]
    }
}

impl fmt::Display for ScriptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = match self.cell_type {
            CellType::Input => "Input",
            CellType::Output => "Output",
        };
        let script = match self.script_type {
            ScriptGroupType::Lock => "Lock",
            ScriptGroupType::Type => "Type",
        };
        write!(f, "{}[{}].{}", cell, self.cell_index, script)
    }
}

impl MockTransaction {
    /// Scripts to run: each input lock, input types, then output types.
    pub fn script_targets(&self) -> Vec<ScriptTarget> {
        let mut targets = Vec::new();
        for (index, input) in self.mock_info.inputs.iter().enumerate() {
            targets.push(ScriptTarget::new(
                CellType::Input,
                index,
                ScriptGroupType::Lock,
            ));
            if input.output.type_.is_some() {
                targets.push(ScriptTarget::new(
                    CellType::Input,
                    index,
                    ScriptGroupType::Type,
                ));
            }
        }
        for (index, output) in self.tx.outputs.iter().enumerate() {
            if output.type_.is_some() {
                targets.push(ScriptTarget::new(
                    CellType::Output,
                    index,
                    ScriptGroupType::Type,
                ));
            }
        }
        targets
    }
}
