//! Execution context handed to [`Program`]s.
use std::{collections::HashMap, sync::Arc};

use alloy::{
    primitives::{Address, Bytes, Log, B256},
    sol_types::{SolError, SolEvent},
};

/// Maximum call depth, as in the EVM.
const MAX_DEPTH: usize = 1024;

/// Contract logic written in Rust.
///
/// Programs are stateless. Everything they persist goes through
/// [`Env::sstore`], into the storage of the account being executed, which for
/// delegate calls is the caller's.
pub trait Program: Send + Sync {
    /// Run the constructor with ABI-encoded `args`.
    ///
    /// # Errors
    ///
    /// Reverting aborts the deployment.
    fn construct(&self, env: &mut Env<'_>, args: &[u8]) -> Result<(), Revert>;

    /// Handle the calldata `input` and return the ABI-encoded output.
    ///
    /// # Errors
    ///
    /// Reverting rolls back every state change of the transaction.
    fn call(&self, env: &mut Env<'_>, input: &[u8]) -> Result<Bytes, Revert>;
}

/// Revert data of a failed execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revert(pub Bytes);

impl Revert {
    /// Revert with `Error(string)`.
    pub fn message(reason: impl Into<String>) -> Self {
        alloy::sol_types::Revert { reason: reason.into() }.into()
    }
}

impl<E: SolError> From<E> for Revert {
    fn from(error: E) -> Self {
        Self(error.abi_encode().into())
    }
}

/// World state: every account with its program and storage.
#[derive(Clone, Default)]
pub(crate) struct State {
    accounts: HashMap<Address, Account>,
}

#[derive(Clone, Default)]
struct Account {
    program: Option<Arc<dyn Program>>,
    storage: HashMap<B256, B256>,
}

impl State {
    pub(crate) fn storage(&self, address: Address, slot: B256) -> B256 {
        self.accounts
            .get(&address)
            .and_then(|account| account.storage.get(&slot))
            .copied()
            .unwrap_or_default()
    }

    fn program(&self, address: Address) -> Option<Arc<dyn Program>> {
        self.accounts.get(&address).and_then(|account| account.program.clone())
    }
}

/// Deploy `program` at `address` and run its constructor.
pub(crate) fn create(
    state: &mut State,
    logs: &mut Vec<Log>,
    sender: Address,
    address: Address,
    program: Arc<dyn Program>,
    args: &[u8],
) -> Result<(), Revert> {
    state.accounts.entry(address).or_default().program = Some(program.clone());
    let mut env = Env {
        state,
        logs,
        address,
        code_address: address,
        sender,
        depth: 0,
    };
    program.construct(&mut env, args)
}

/// Message call from `sender` to `to`.
pub(crate) fn call(
    state: &mut State,
    logs: &mut Vec<Log>,
    sender: Address,
    to: Address,
    input: &[u8],
) -> Result<Bytes, Revert> {
    let mut env = Env {
        state,
        logs,
        address: to,
        code_address: to,
        sender,
        depth: 0,
    };
    env.run(to, input)
}

/// What a running program can see and do.
pub struct Env<'a> {
    state: &'a mut State,
    logs: &'a mut Vec<Log>,
    address: Address,
    code_address: Address,
    sender: Address,
    depth: usize,
}

impl Env<'_> {
    /// Account whose storage is being used, `address(this)`.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Account whose code is running. Differs from [`Env::address`] inside a
    /// delegate call.
    #[must_use]
    pub fn code_address(&self) -> Address {
        self.code_address
    }

    /// `msg.sender`.
    #[must_use]
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Whether the code runs on behalf of another account.
    #[must_use]
    pub fn is_delegated(&self) -> bool {
        self.address != self.code_address
    }

    /// Whether `address` has a program deployed.
    #[must_use]
    pub fn has_code(&self, address: Address) -> bool {
        self.state.program(address).is_some()
    }

    /// Read a storage word of the current account.
    #[must_use]
    pub fn sload(&self, slot: B256) -> B256 {
        self.state.storage(self.address, slot)
    }

    /// Write a storage word of the current account.
    pub fn sstore(&mut self, slot: B256, value: B256) {
        self.state
            .accounts
            .entry(self.address)
            .or_default()
            .storage
            .insert(slot, value);
    }

    /// Emit `event` from the current account.
    pub fn emit<E: SolEvent>(&mut self, event: &E) {
        self.logs.push(Log { address: self.address, data: event.encode_log_data() });
    }

    /// Call `target` with the current account as `msg.sender`.
    ///
    /// # Errors
    ///
    /// Propagates the callee's revert.
    pub fn call(&mut self, target: Address, input: &[u8]) -> Result<Bytes, Revert> {
        let mut env = Env {
            state: &mut *self.state,
            logs: &mut *self.logs,
            address: target,
            code_address: target,
            sender: self.address,
            depth: self.depth + 1,
        };
        env.run(target, input)
    }

    /// Run the code of `target` against the current account's storage,
    /// keeping `msg.sender`.
    ///
    /// # Errors
    ///
    /// Propagates the callee's revert.
    pub fn delegate_call(
        &mut self,
        target: Address,
        input: &[u8],
    ) -> Result<Bytes, Revert> {
        let mut env = Env {
            state: &mut *self.state,
            logs: &mut *self.logs,
            address: self.address,
            code_address: target,
            sender: self.sender,
            depth: self.depth + 1,
        };
        env.run(target, input)
    }

    fn run(&mut self, code: Address, input: &[u8]) -> Result<Bytes, Revert> {
        if self.depth > MAX_DEPTH {
            return Err(Revert::message("call depth exceeded"));
        }
        // Calls to accounts without code succeed and return nothing.
        match self.state.program(code) {
            Some(program) => program.call(self, input),
            None => Ok(Bytes::new()),
        }
    }
}
