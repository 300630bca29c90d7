use alloy::{
    primitives::{Address, Bytes},
    sol_types::SolValue,
};
use upgrades::proxy::{ERC1967InvalidImplementation, Upgraded, IMPLEMENTATION_SLOT};

use crate::{Env, Program, Revert};

/// ERC-1967 proxy: forwards every call to the implementation stored in
/// [`IMPLEMENTATION_SLOT`].
///
/// Constructor arguments are `(address implementation, bytes data)`. A
/// non-empty `data` is delegated to the implementation during construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Erc1967Proxy;

impl Program for Erc1967Proxy {
    fn construct(&self, env: &mut Env<'_>, args: &[u8]) -> Result<(), Revert> {
        let (implementation, data) =
            <(Address, Bytes)>::abi_decode_params(args).map_err(|_| {
                Revert::message("invalid ERC1967Proxy constructor arguments")
            })?;

        if !env.has_code(implementation) {
            return Err(ERC1967InvalidImplementation { implementation }.into());
        }
        env.sstore(IMPLEMENTATION_SLOT, implementation.into_word());
        env.emit(&Upgraded { implementation });

        if !data.is_empty() {
            env.delegate_call(implementation, &data)?;
        }
        Ok(())
    }

    fn call(&self, env: &mut Env<'_>, input: &[u8]) -> Result<Bytes, Revert> {
        let implementation = Address::from_word(env.sload(IMPLEMENTATION_SLOT));
        env.delegate_call(implementation, input)
    }
}
