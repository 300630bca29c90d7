//! Two versions of an upgradeable counter.
//!
//! Both versions keep `value` in slot 0 and the packed `_owner` and
//! `_initialized` in slot 1. The second version adds `increaseValue`.
use alloy::{
    primitives::{Address, Bytes, B256, U256},
    sol_types::{SolInterface, SolValue},
};
use upgrades::{
    proxy::{InvalidInitialization, OwnableUnauthorizedAccount},
    StorageEntry, StorageLayout,
};

use super::uups;
use crate::{Env, Program, Revert};

pub use sol::*;

#[allow(missing_docs)]
mod sol {
    use alloy::sol;

    sol! {
        /// First version of the counter.
        interface ICounterV1 {
            function initialize(uint256 value) external;
            function setValue(uint256 value) external;
            function getValue() external view returns (uint256);
            function owner() external view returns (address);
            function upgradeToAndCall(address newImplementation, bytes calldata data) external payable;
            function proxiableUUID() external view returns (bytes32);
        }

        /// Second version of the counter.
        interface ICounterV2 {
            function initialize(uint256 value) external;
            function setValue(uint256 value) external;
            function getValue() external view returns (uint256);
            function increaseValue(uint256 amount) external;
            function owner() external view returns (address);
            function upgradeToAndCall(address newImplementation, bytes calldata data) external payable;
            function proxiableUUID() external view returns (bytes32);
        }
    }
}

const VALUE_SLOT: B256 = B256::ZERO;
const OWNABLE_SLOT: B256 = B256::with_last_byte(1);
/// Byte holding `_initialized`: offset 20 in slot 1, counted from the right.
const INITIALIZED_BYTE: usize = 31 - 20;

/// Storage layout shared by [`CounterV1`] and [`CounterV2`].
#[must_use]
pub fn counter_layout() -> StorageLayout {
    StorageLayout::new(vec![
        StorageEntry::new("value", 0, 0, "t_uint256"),
        StorageEntry::new("_owner", 1, 0, "t_address"),
        StorageEntry::new("_initialized", 1, 20, "t_bool"),
    ])
}

/// Typed accessors over the counter storage.
struct Storage<'e, 'a>(&'e mut Env<'a>);

impl Storage<'_, '_> {
    fn value(&self) -> U256 {
        U256::from_be_bytes(self.0.sload(VALUE_SLOT).0)
    }

    fn set_value(&mut self, value: U256) {
        self.0.sstore(VALUE_SLOT, B256::from(value.to_be_bytes::<32>()));
    }

    fn owner(&self) -> Address {
        Address::from_word(self.0.sload(OWNABLE_SLOT))
    }

    fn set_owner(&mut self, owner: Address) {
        let mut word = self.0.sload(OWNABLE_SLOT);
        word[12..].copy_from_slice(owner.as_slice());
        self.0.sstore(OWNABLE_SLOT, word);
    }

    fn initialized(&self) -> bool {
        self.0.sload(OWNABLE_SLOT)[INITIALIZED_BYTE] != 0
    }

    fn set_initialized(&mut self) {
        let mut word = self.0.sload(OWNABLE_SLOT);
        word[INITIALIZED_BYTE] = 1;
        self.0.sstore(OWNABLE_SLOT, word);
    }

    /// Implementations lock themselves on construction, so that only proxies
    /// can be initialized.
    fn disable_initializers(&mut self) {
        self.set_initialized();
    }

    fn initialize(&mut self, value: U256) -> Result<Bytes, Revert> {
        if self.initialized() {
            return Err(InvalidInitialization {}.into());
        }
        self.set_initialized();
        let owner = self.0.sender();
        self.set_owner(owner);
        self.set_value(value);
        Ok(Bytes::new())
    }

    fn only_owner(&self) -> Result<(), Revert> {
        let account = self.0.sender();
        if account != self.owner() {
            return Err(OwnableUnauthorizedAccount { account }.into());
        }
        Ok(())
    }

    fn upgrade_to_and_call(
        &mut self,
        new_implementation: Address,
        data: &[u8],
    ) -> Result<Bytes, Revert> {
        uups::only_proxy(self.0)?;
        self.only_owner()?;
        uups::upgrade_to_and_call(self.0, new_implementation, data)
    }
}

fn output(value: impl SolValue) -> Result<Bytes, Revert> {
    Ok(value.abi_encode().into())
}

/// Counter holding a value its users can set.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterV1;

impl Program for CounterV1 {
    fn construct(&self, env: &mut Env<'_>, _args: &[u8]) -> Result<(), Revert> {
        Storage(env).disable_initializers();
        Ok(())
    }

    fn call(&self, env: &mut Env<'_>, input: &[u8]) -> Result<Bytes, Revert> {
        use ICounterV1::ICounterV1Calls as Call;

        let call = Call::abi_decode(input).map_err(|_| Revert(Bytes::new()))?;
        let mut storage = Storage(env);
        match call {
            Call::initialize(c) => storage.initialize(c.value),
            Call::setValue(c) => {
                storage.set_value(c.value);
                Ok(Bytes::new())
            }
            Call::getValue(_) => output(storage.value()),
            Call::owner(_) => output(storage.owner()),
            Call::upgradeToAndCall(c) => {
                storage.upgrade_to_and_call(c.newImplementation, &c.data)
            }
            Call::proxiableUUID(_) => uups::proxiable_uuid(storage.0),
        }
    }
}

/// [`CounterV1`] that can also increase its value.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterV2;

impl Program for CounterV2 {
    fn construct(&self, env: &mut Env<'_>, _args: &[u8]) -> Result<(), Revert> {
        Storage(env).disable_initializers();
        Ok(())
    }

    fn call(&self, env: &mut Env<'_>, input: &[u8]) -> Result<Bytes, Revert> {
        use ICounterV2::ICounterV2Calls as Call;

        let call = Call::abi_decode(input).map_err(|_| Revert(Bytes::new()))?;
        let mut storage = Storage(env);
        match call {
            Call::initialize(c) => storage.initialize(c.value),
            Call::setValue(c) => {
                storage.set_value(c.value);
                Ok(Bytes::new())
            }
            Call::getValue(_) => output(storage.value()),
            Call::increaseValue(c) => {
                let value = storage.value().saturating_add(c.amount);
                storage.set_value(value);
                Ok(Bytes::new())
            }
            Call::owner(_) => output(storage.owner()),
            Call::upgradeToAndCall(c) => {
                storage.upgrade_to_and_call(c.newImplementation, &c.data)
            }
            Call::proxiableUUID(_) => uups::proxiable_uuid(storage.0),
        }
    }
}
