//! Calls and transactions against proxied contracts.
use std::{str::FromStr, sync::Arc, time::Duration};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, StateMutability},
    network::TransactionBuilder,
    primitives::Address,
    rpc::types::TransactionRequest,
};
use tracing::{debug, info};

use crate::{
    chain::{self, Chain, Confirmations, PendingTransaction, Receipt},
    registry::Registry,
    Error, Result,
};

/// Contract an invocation is sent to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Proxy registered under a logical name.
    Name(String),
    /// Explicit address, bypassing the registry.
    Address(Address),
}

impl FromStr for Target {
    type Err = Error;

    /// `0x`-prefixed 20-byte hex strings are addresses, anything else is a
    /// logical name.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() == 42 && s.starts_with("0x") {
            return s.parse().map(Self::Address).map_err(|e| {
                Error::InvalidArguments(format!("invalid address `{s}`: {e}"))
            });
        }
        Ok(Self::Name(s.to_string()))
    }
}

impl From<Address> for Target {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// A function call on a [`Target`].
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    /// Contract to call.
    pub target: Target,
    /// Function to call.
    pub function: Function,
    /// Call arguments, matching the function inputs.
    pub args: Vec<DynSolValue>,
    /// Send a transaction rather than an `eth_call`.
    pub is_state_mutating: bool,
}

impl InvocationRequest {
    /// Call `function` on `target`. `view` and `pure` functions are reads,
    /// everything else is sent as a transaction.
    #[must_use]
    pub fn new(
        target: impl Into<Target>,
        function: Function,
        args: Vec<DynSolValue>,
    ) -> Self {
        let is_state_mutating = !matches!(
            function.state_mutability,
            StateMutability::View | StateMutability::Pure
        );
        Self { target: target.into(), function, args, is_state_mutating }
    }

    /// Force a transaction (`true`) or a read (`false`).
    #[must_use]
    pub fn state_mutating(mut self, is_state_mutating: bool) -> Self {
        self.is_state_mutating = is_state_mutating;
        self
    }

    /// Build a request from strings, e.g. `("Counter", "setValue(uint256)",
    /// ["56"])`.
    ///
    /// # Errors
    ///
    /// May fail if the target, the signature or an argument cannot be
    /// parsed.
    pub fn parse(
        target: &str,
        signature: &str,
        args: &[String],
    ) -> Result<Self> {
        let function = Function::parse(signature).map_err(|e| {
            Error::InvalidArguments(format!("invalid signature `{signature}`: {e}"))
        })?;
        if function.inputs.len() != args.len() {
            return Err(Error::InvalidArguments(format!(
                "`{}` takes {} argument(s), got {}",
                function.name,
                function.inputs.len(),
                args.len()
            )));
        }
        let args = function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| Ok(param.resolve()?.coerce_str(arg)?))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(target.parse::<Target>()?, function, args))
    }
}

/// Result of [`InvocationClient::call`].
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Decoded return values of a read.
    Value(Vec<DynSolValue>),
    /// Receipt of a confirmed transaction.
    Receipt(Receipt),
}

/// Talks to the active implementation of registered contracts through their
/// proxy.
#[derive(Debug)]
pub struct InvocationClient<C> {
    chain: Arc<C>,
    registry: Arc<Registry>,
    confirmations: Confirmations,
}

impl<C: Chain> InvocationClient<C> {
    /// Create a client resolving names through `registry`.
    #[must_use]
    pub fn new(
        chain: Arc<C>,
        registry: Arc<Registry>,
        confirmations: Confirmations,
    ) -> Self {
        Self { chain, registry, confirmations }
    }

    /// Read or transact, depending on `request.is_state_mutating`.
    /// Transactions are awaited with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`InvocationClient::read`], [`InvocationClient::submit`] and
    /// [`InvocationClient::await_confirmation`].
    pub async fn call(&self, request: &InvocationRequest) -> Result<Outcome> {
        if !request.is_state_mutating {
            return self.read(request).await.map(Outcome::Value);
        }
        let pending = self.submit(request).await?;
        self.await_confirmation(&pending, self.confirmations.timeout)
            .await
            .map(Outcome::Receipt)
    }

    /// Execute `request` with `eth_call` and decode its return values.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if the target name is not registered.
    /// * [`Error::TransactionReverted`] if the call reverts.
    /// * [`Error::Abi`] if arguments or return data do not match the
    ///   function.
    pub async fn read(
        &self,
        request: &InvocationRequest,
    ) -> Result<Vec<DynSolValue>> {
        let tx = self.transaction(request)?.with_from(self.chain.sender());
        let output = self.chain.call(tx, None).await?;
        debug!(function = %request.function.name, "read");
        Ok(request.function.abi_decode_output(&output)?)
    }

    /// Broadcast `request` as a transaction without waiting for it.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if the target name is not registered.
    /// * [`Error::TransactionReverted`] if the node refuses a transaction
    ///   that would revert.
    pub async fn submit(
        &self,
        request: &InvocationRequest,
    ) -> Result<PendingTransaction> {
        let tx = self.transaction(request)?;
        let pending = chain::submit(&*self.chain, tx).await?;
        info!(
            function = %request.function.name,
            tx_hash = %pending.tx_hash,
            "transaction submitted"
        );
        Ok(pending)
    }

    /// Wait for `pending` to reach the configured number of confirmations.
    ///
    /// Giving up, through the deadline or by dropping the future, leaves the
    /// transaction in flight; `pending` can be awaited again.
    ///
    /// # Errors
    ///
    /// * [`Error::Timeout`] if `timeout` elapses first.
    /// * [`Error::TransactionReverted`] if the transaction failed.
    pub async fn await_confirmation(
        &self,
        pending: &PendingTransaction,
        timeout: Duration,
    ) -> Result<Receipt> {
        let confirmations = self.confirmations.with_timeout(timeout);
        chain::await_confirmation(&*self.chain, pending, confirmations).await
    }

    /// Address `target` refers to.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if a name is not registered.
    pub fn resolve(&self, target: &Target) -> Result<Address> {
        match target {
            Target::Address(address) => Ok(*address),
            Target::Name(name) => Ok(self.registry.lookup(name)?.proxy()),
        }
    }

    fn transaction(&self, request: &InvocationRequest) -> Result<TransactionRequest> {
        let to = self.resolve(&request.target)?;
        let input = request.function.abi_encode_input(&request.args)?;
        Ok(TransactionRequest::default().with_to(to).with_input(input))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, U256};

    use super::*;

    #[test]
    fn parses_targets() {
        let address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

        assert_eq!(
            "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse::<Target>().unwrap(),
            Target::Address(address)
        );
        assert_eq!(
            "Counter".parse::<Target>().unwrap(),
            Target::Name("Counter".to_string())
        );
        assert!("0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse::<Target>().is_err());
    }

    #[test]
    fn mutability_follows_the_function() {
        let read = InvocationRequest::parse(
            "Counter",
            "function getValue() external view returns (uint256)",
            &[],
        )
        .unwrap();
        assert!(!read.is_state_mutating);

        let write = InvocationRequest::parse(
            "Counter",
            "function setValue(uint256 value)",
            &["56".to_string()],
        )
        .unwrap();
        assert!(write.is_state_mutating);
        assert_eq!(write.args, vec![DynSolValue::Uint(U256::from(56), 256)]);

        assert!(!write.state_mutating(false).is_state_mutating);
    }

    #[test]
    fn rejects_bad_arguments() {
        let err = InvocationRequest::parse("Counter", "setValue(uint256)", &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)), "{err}");

        let err = InvocationRequest::parse(
            "Counter",
            "setValue(uint256)",
            &["fifty-six".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Abi(_)), "{err}");
    }
}
