//! Compiled contract artifacts and their storage layouts.
//!
//! Implementation versions are independent artifacts. What ties two versions
//! of the same logical contract together is their [`StorageLayout`]: the
//! proxy keeps its storage across upgrades, so a new version must keep every
//! variable of the previous one at the same slot, offset and type.
use std::{fs, path::Path, str::FromStr};

use alloy::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::{Function, JsonAbi},
    primitives::{Bytes, U256},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A compiled contract: ABI, creation bytecode and storage layout.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Contract name, e.g. `CounterV2`.
    pub name: String,
    /// Contract ABI.
    pub abi: JsonAbi,
    /// Creation bytecode. Constructor arguments get appended to it.
    pub bytecode: Bytes,
    /// Storage layout. Empty when the compiler output did not include it.
    pub layout: StorageLayout,
}

impl Artifact {
    /// Create an artifact without a storage layout.
    #[must_use]
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self { name: name.into(), abi, bytecode, layout: StorageLayout::default() }
    }

    /// Attach a storage layout to the artifact.
    #[must_use]
    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Load a Hardhat or Foundry artifact file.
    ///
    /// The artifact name is taken from `contractName` when present, and from
    /// the file stem otherwise.
    ///
    /// # Errors
    ///
    /// May fail if the file cannot be read or is not a valid artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            Error::Artifact(format!("failed to read {}: {e}", path.display()))
        })?;
        let fallback = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("contract");
        Self::from_json(fallback, &json)
    }

    /// Parse an artifact from its JSON representation.
    ///
    /// # Errors
    ///
    /// May fail if `json` is malformed or carries no creation bytecode.
    pub fn from_json(name: &str, json: &str) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_str(json)
            .map_err(|e| Error::Artifact(format!("`{name}`: {e}")))?;
        let name = raw.contract_name.unwrap_or_else(|| name.to_string());
        let bytecode = match raw.bytecode {
            RawBytecode::Hex(code) | RawBytecode::Object { object: code } => {
                code
            }
        };
        if bytecode.is_empty() {
            return Err(Error::Artifact(format!(
                "`{name}` has no creation bytecode (abstract contract or interface?)"
            )));
        }
        let layout = match raw.storage_layout {
            Some(layout) => StorageLayout::try_from(layout)?,
            None => StorageLayout::default(),
        };
        Ok(Self { name, abi: raw.abi, bytecode, layout })
    }

    /// Look up the first function called `name` in the ABI.
    ///
    /// # Errors
    ///
    /// May fail if the ABI has no such function.
    pub fn function(&self, name: &str) -> Result<&Function> {
        self.abi.function(name).and_then(|f| f.first()).ok_or_else(|| {
            Error::Artifact(format!("`{}` has no function `{name}`", self.name))
        })
    }

    /// ABI-encode a call to the overload of `name` taking `args.len()`
    /// arguments.
    ///
    /// # Errors
    ///
    /// May fail if there is no matching function or the arguments do not
    /// match its parameter types.
    pub fn encode_call(
        &self,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<Bytes> {
        let function = self
            .abi
            .function(name)
            .and_then(|overloads| {
                overloads.iter().find(|f| f.inputs.len() == args.len())
            })
            .ok_or_else(|| {
                Error::Artifact(format!(
                    "`{}` has no function `{name}` taking {} argument(s)",
                    self.name,
                    args.len()
                ))
            })?;
        Ok(function.abi_encode_input(args)?.into())
    }
}

/// A single state variable in a [`StorageLayout`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// Variable name.
    pub label: String,
    /// Slot the variable starts at.
    pub slot: U256,
    /// Byte offset inside the slot, for packed variables.
    pub offset: u64,
    /// Compiler type identifier, e.g. `t_uint256`.
    #[serde(rename = "type")]
    pub ty: String,
}

impl StorageEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        slot: u64,
        offset: u64,
        ty: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            slot: U256::from(slot),
            offset,
            ty: ty.into(),
        }
    }
}

/// Storage layout of an implementation contract.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    /// Variables, in declaration order.
    pub entries: Vec<StorageEntry>,
}

/// A change between two layouts that is allowed but worth surfacing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutNote {
    /// A variable kept its position and type but changed its name.
    Renamed {
        /// Slot of the variable.
        slot: U256,
        /// Previous name.
        from: String,
        /// New name.
        to: String,
    },
}

impl StorageLayout {
    /// Create a layout from its entries.
    #[must_use]
    pub fn new(entries: Vec<StorageEntry>) -> Self {
        Self { entries }
    }

    /// Whether the layout carries no information.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that `next` can replace `self` behind a proxy.
    ///
    /// Every variable of `self` must appear in `next` at the same slot and
    /// offset with the same type. New variables may only be appended in
    /// fresh positions. Renames are allowed and reported as notes.
    ///
    /// # Errors
    ///
    /// Returns the first incompatibility found.
    pub fn check_upgrade(
        &self,
        next: &StorageLayout,
    ) -> Result<Vec<LayoutNote>, String> {
        let mut notes = Vec::new();
        for current in &self.entries {
            let Some(candidate) = next.entries.iter().find(|e| {
                e.slot == current.slot && e.offset == current.offset
            }) else {
                return Err(format!(
                    "`{}` at slot {} offset {} was deleted or moved",
                    current.label, current.slot, current.offset
                ));
            };

            if candidate.ty != current.ty {
                return Err(format!(
                    "`{}` at slot {} changed type from {} to {}",
                    current.label, current.slot, current.ty, candidate.ty
                ));
            }

            if candidate.label != current.label {
                notes.push(LayoutNote::Renamed {
                    slot: current.slot,
                    from: current.label.clone(),
                    to: candidate.label.clone(),
                });
            }
        }
        Ok(notes)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    #[serde(default)]
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
    #[serde(default)]
    storage_layout: Option<RawLayout>,
}

/// Hardhat stores the bytecode as a hex string, Foundry nests it under
/// `object`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(Bytes),
    Object { object: Bytes },
}

/// Layout as emitted by solc's `storageLayout` output selection.
#[derive(Deserialize)]
struct RawLayout {
    storage: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    label: String,
    slot: String,
    offset: u64,
    #[serde(rename = "type")]
    ty: String,
}

impl TryFrom<RawLayout> for StorageLayout {
    type Error = Error;

    fn try_from(raw: RawLayout) -> Result<Self> {
        let entries = raw
            .storage
            .into_iter()
            .map(|e| {
                let slot = U256::from_str(&e.slot).map_err(|err| {
                    Error::Artifact(format!(
                        "invalid slot `{}` for `{}`: {err}",
                        e.slot, e.label
                    ))
                })?;
                Ok(StorageEntry { label: e.label, slot, offset: e.offset, ty: e.ty })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}
