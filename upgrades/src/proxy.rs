//! ABI of the [ERC-1967] proxies this crate deploys and upgrades.
//!
//! Proxies are upgraded the UUPS way ([ERC-1822]): the upgrade entrypoint
//! `upgradeToAndCall` lives in the implementation and is reached through the
//! proxy, guarded by the implementation's `Ownable` owner.
//!
//! [ERC-1967]: https://eips.ethereum.org/EIPS/eip-1967
//! [ERC-1822]: https://eips.ethereum.org/EIPS/eip-1822
use alloy::{
    primitives::{b256, Address, Bytes, B256},
    sol_types::{decode_revert_reason, SolError, SolValue},
};
pub use sol::*;

#[allow(missing_docs)]
mod sol {
    use alloy::sol;

    sol! {
        /// Upgrade interface exposed by UUPS implementations.
        interface IUUPSUpgradeable {
            function upgradeToAndCall(address newImplementation, bytes calldata data) external payable;
            function proxiableUUID() external view returns (bytes32);
        }

        /// Emitted when the implementation is upgraded.
        #[derive(Debug, PartialEq, Eq)]
        event Upgraded(address indexed implementation);

        /// The caller account is not authorized to perform an operation.
        #[derive(Debug, PartialEq, Eq)]
        error OwnableUnauthorizedAccount(address account);

        /// The call is from an unauthorized context.
        #[derive(Debug, PartialEq, Eq)]
        error UUPSUnauthorizedCallContext();

        /// The storage `slot` is unsupported as a UUID.
        #[derive(Debug, PartialEq, Eq)]
        error UUPSUnsupportedProxiableUUID(bytes32 slot);

        /// The `implementation` of the proxy is invalid.
        #[derive(Debug, PartialEq, Eq)]
        error ERC1967InvalidImplementation(address implementation);

        /// The contract is already initialized.
        #[derive(Debug, PartialEq, Eq)]
        error InvalidInitialization();
    }
}

/// Storage slot with the address of the current implementation.
/// This is the keccak-256 hash of "eip1967.proxy.implementation" subtracted by
/// 1.
pub const IMPLEMENTATION_SLOT: B256 = b256!(
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc"
);

/// Storage slot with the admin of the contract.
/// This is the keccak-256 hash of "eip1967.proxy.admin" subtracted by 1.
pub const ADMIN_SLOT: B256 = b256!(
    "b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103"
);

/// ABI-encodes the ERC-1967 proxy constructor arguments
/// `(address implementation, bytes data)`.
///
/// The result is appended to the proxy creation bytecode. When `data` is not
/// empty the proxy delegates it to `implementation` during construction,
/// which is how the one-time initializer runs atomically with deployment.
#[must_use]
pub fn constructor_args(implementation: Address, data: Bytes) -> Vec<u8> {
    (implementation, data).abi_encode_params()
}

/// Returns the account rejected by an `OwnableUnauthorizedAccount` revert.
#[must_use]
pub fn unauthorized_account(data: &[u8]) -> Option<Address> {
    OwnableUnauthorizedAccount::abi_decode(data).ok().map(|e| e.account)
}

/// Human-readable reason for the revert `data`.
///
/// Knows the proxy errors declared in this module, and falls back to
/// `Error(string)` and `Panic(uint256)`.
#[must_use]
pub fn revert_reason(data: &[u8]) -> Option<String> {
    if let Some(account) = unauthorized_account(data) {
        return Some(format!("OwnableUnauthorizedAccount({account})"));
    }
    if UUPSUnauthorizedCallContext::abi_decode(data).is_ok() {
        return Some("UUPSUnauthorizedCallContext()".to_string());
    }
    if let Ok(e) = UUPSUnsupportedProxiableUUID::abi_decode(data) {
        return Some(format!("UUPSUnsupportedProxiableUUID({})", e.slot));
    }
    if let Ok(e) = ERC1967InvalidImplementation::abi_decode(data) {
        return Some(format!(
            "ERC1967InvalidImplementation({})",
            e.implementation
        ));
    }
    if InvalidInitialization::abi_decode(data).is_ok() {
        return Some("InvalidInitialization()".to_string());
    }
    decode_revert_reason(data)
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, keccak256, U256};

    use super::*;

    #[test]
    fn slots_follow_erc1967_derivation() {
        let derive = |label: &str| {
            B256::from(U256::from_be_bytes(keccak256(label).0) - U256::from(1))
        };
        assert_eq!(IMPLEMENTATION_SLOT, derive("eip1967.proxy.implementation"));
        assert_eq!(ADMIN_SLOT, derive("eip1967.proxy.admin"));
    }

    #[test]
    fn constructor_args_roundtrip_through_abi() {
        let implementation =
            address!("00000000000000000000000000000000000000aa");
        let data = Bytes::from_static(&[0xfe, 0x4b, 0x84, 0xdf]);

        let encoded = constructor_args(implementation, data.clone());
        let decoded =
            <(Address, Bytes)>::abi_decode_params(&encoded).expect("decodes");

        assert_eq!(decoded, (implementation, data));
    }

    #[test]
    fn revert_reason_falls_back_to_error_string() {
        let data =
            alloy::sol_types::Revert { reason: "nope".into() }.abi_encode();
        assert_eq!(revert_reason(&data).as_deref(), Some("revert: nope"));
        assert_eq!(revert_reason(&[]), None);
    }
}
