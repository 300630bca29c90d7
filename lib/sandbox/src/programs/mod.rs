//! Built-in programs and their artifacts.
use std::sync::Arc;

use alloy::{
    json_abi::JsonAbi,
    primitives::{keccak256, Bytes},
};
use upgrades::Artifact;

use crate::Program;

mod counter;
mod proxy;
mod uups;

pub use counter::{counter_layout, CounterV1, CounterV2, ICounterV1, ICounterV2};
pub use proxy::Erc1967Proxy;

const PROXY_ABI: &[&str] = &[
    "constructor(address implementation, bytes data) payable",
    "event Upgraded(address indexed implementation)",
    "error ERC1967InvalidImplementation(address implementation)",
];

const UUPS_ABI: &[&str] = &[
    "function owner() view returns (address)",
    "function upgradeToAndCall(address newImplementation, bytes data) payable",
    "function proxiableUUID() view returns (bytes32)",
    "event Upgraded(address indexed implementation)",
    "error OwnableUnauthorizedAccount(address account)",
    "error InvalidInitialization()",
    "error UUPSUnauthorizedCallContext()",
    "error UUPSUnsupportedProxiableUUID(bytes32 slot)",
    "error ERC1967InvalidImplementation(address implementation)",
];

const COUNTER_V1_ABI: &[&str] = &[
    "function initialize(uint256 value)",
    "function setValue(uint256 value)",
    "function getValue() view returns (uint256)",
];

const COUNTER_V2_ABI: &[&str] = &[
    "function initialize(uint256 value)",
    "function setValue(uint256 value)",
    "function getValue() view returns (uint256)",
    "function increaseValue(uint256 amount)",
];

/// Creation bytecode standing for the program called `name`.
#[must_use]
pub fn code(name: &str) -> Bytes {
    Bytes::copy_from_slice(keccak256(format!("sandbox:{name}")).as_slice())
}

pub(crate) fn builtin() -> Vec<(Bytes, Arc<dyn Program>)> {
    vec![
        (code("ERC1967Proxy"), Arc::new(Erc1967Proxy)),
        (code("CounterV1"), Arc::new(CounterV1)),
        (code("CounterV2"), Arc::new(CounterV2)),
    ]
}

/// Artifact of [`Erc1967Proxy`].
#[must_use]
pub fn proxy_artifact() -> Artifact {
    Artifact::new("ERC1967Proxy", abi(PROXY_ABI, &[]), code("ERC1967Proxy"))
}

/// Artifact of [`CounterV1`].
#[must_use]
pub fn counter_v1() -> Artifact {
    Artifact::new("CounterV1", abi(COUNTER_V1_ABI, UUPS_ABI), code("CounterV1"))
        .with_layout(counter_layout())
}

/// Artifact of [`CounterV2`].
#[must_use]
pub fn counter_v2() -> Artifact {
    Artifact::new("CounterV2", abi(COUNTER_V2_ABI, UUPS_ABI), code("CounterV2"))
        .with_layout(counter_layout())
}

fn abi(own: &[&str], inherited: &[&str]) -> JsonAbi {
    JsonAbi::parse(own.iter().chain(inherited).copied())
        .expect("built-in ABI should parse")
}
