//! UUPS upgrade logic shared by upgradeable programs.
use alloy::{
    primitives::{Address, Bytes, B256},
    sol_types::{SolCall, SolValue},
};
use upgrades::proxy::{
    ERC1967InvalidImplementation, IUUPSUpgradeable::proxiableUUIDCall,
    UUPSUnauthorizedCallContext, UUPSUnsupportedProxiableUUID, Upgraded,
    IMPLEMENTATION_SLOT,
};

use crate::{Env, Revert};

/// Only callable through a proxy currently pointing at this code.
pub(crate) fn only_proxy(env: &Env<'_>) -> Result<(), Revert> {
    let active = Address::from_word(env.sload(IMPLEMENTATION_SLOT));
    if !env.is_delegated() || active != env.code_address() {
        return Err(UUPSUnauthorizedCallContext {}.into());
    }
    Ok(())
}

/// `proxiableUUID()`, only callable on the implementation itself.
pub(crate) fn proxiable_uuid(env: &Env<'_>) -> Result<Bytes, Revert> {
    if env.is_delegated() {
        return Err(UUPSUnauthorizedCallContext {}.into());
    }
    Ok(IMPLEMENTATION_SLOT.abi_encode().into())
}

/// Point the proxy at `new_implementation` and run `data` on it.
///
/// Authorization is the caller's business and must happen before.
pub(crate) fn upgrade_to_and_call(
    env: &mut Env<'_>,
    new_implementation: Address,
    data: &[u8],
) -> Result<Bytes, Revert> {
    let uuid = env
        .call(new_implementation, &proxiableUUIDCall {}.abi_encode())
        .ok()
        .and_then(|output| B256::abi_decode(&output).ok())
        .ok_or(ERC1967InvalidImplementation {
            implementation: new_implementation,
        })?;
    if uuid != IMPLEMENTATION_SLOT {
        return Err(UUPSUnsupportedProxiableUUID { slot: uuid }.into());
    }

    env.sstore(IMPLEMENTATION_SLOT, new_implementation.into_word());
    env.emit(&Upgraded { implementation: new_implementation });

    if !data.is_empty() {
        env.delegate_call(new_implementation, data)?;
    }
    Ok(Bytes::new())
}
