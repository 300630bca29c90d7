//! `upgrades` command line tool.
use std::sync::Arc;

use alloy::{
    dyn_abi::{DynSolValue, Specifier},
    hex,
};
use clap::Parser;
use eyre::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use upgrades::{
    chain, Artifact, Config, Deployer, InvocationClient, InvocationRequest,
    Outcome, Receipt, Registry, RpcChain,
};

use crate::opts::{Command, Opts};

mod opts;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    if let Command::Show { name } = opts.cmd {
        // Reading the registry needs neither an endpoint nor a key.
        let location = opts.global.registry_location()?;
        let registry = Registry::open(&location.dir, &location.network)?;
        return show(&registry, name);
    }
    let config = opts.global.load()?;
    run(opts.cmd, &config).await
}

async fn run(cmd: Command, config: &Config) -> Result<()> {
    let chain = Arc::new(RpcChain::connect(config));
    let chain_id = chain::check_chain_id(&*chain, config.chain_id).await?;
    tracing::debug!(chain_id, "connected");
    let registry = Arc::new(Registry::from_config(config)?);

    match cmd {
        Command::Deploy { name, artifact, args, initializer } => {
            let deployer = match config.proxy_artifact.as_deref() {
                Some(proxy) => Deployer::new(
                    chain,
                    registry,
                    Artifact::load(proxy)?,
                    config.into(),
                ),
                // Enough to upgrade names already in the registry.
                None => Deployer::for_upgrades(chain, registry, config.into()),
            };
            let artifact = Artifact::load(&artifact)?;
            let args = initializer_args(&artifact, &initializer, &args)?;
            let request = deployer
                .request(name, artifact)
                .with_initializer(initializer)
                .with_initializer_args(args);

            let deployment = deployer.deploy_or_upgrade(request).await?;
            for warning in &deployment.warnings {
                eprintln!("warning: {warning}");
            }
            println!("{}", serde_json::to_string_pretty(&deployment.record)?);
        }
        Command::Call { target, sig, args } => {
            let client = InvocationClient::new(chain, registry, config.into());
            let request =
                InvocationRequest::parse(&target, &sig, &args)?.state_mutating(false);
            for value in client.read(&request).await? {
                println!("{}", format_value(&value));
            }
        }
        Command::Send { target, sig, args, no_wait } => {
            let client = InvocationClient::new(chain, registry, config.into());
            let request =
                InvocationRequest::parse(&target, &sig, &args)?.state_mutating(true);
            if no_wait {
                let pending = client.submit(&request).await?;
                println!("{}", pending.tx_hash);
                return Ok(());
            }
            match client.call(&request).await? {
                Outcome::Receipt(receipt) => print_receipt(&receipt),
                Outcome::Value(_) => bail!("expected a transaction receipt"),
            }
        }
        Command::Show { name } => show(&registry, name)?,
        Command::Reconcile { name } => {
            let deployer = Deployer::for_upgrades(chain, registry, config.into());
            let record = deployer.reconcile(&name).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

fn show(registry: &Registry, name: Option<String>) -> Result<()> {
    let records = match name {
        Some(name) => vec![registry.lookup(&name)?],
        None => registry.records(),
    };
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Coerce `args` to the inputs of the `initializer` overload taking as many
/// arguments.
fn initializer_args(
    artifact: &Artifact,
    initializer: &str,
    args: &[String],
) -> Result<Vec<DynSolValue>> {
    let Some(function) = artifact
        .abi
        .function(initializer)
        .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == args.len()))
    else {
        // Left for the deployer to report, it knows whether this is an
        // upgrade.
        return Ok(args.iter().cloned().map(DynSolValue::String).collect());
    };

    function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param.resolve()?;
            ty.coerce_str(arg).wrap_err_with(|| {
                format!("invalid `{}` argument `{arg}`", param.ty)
            })
        })
        .collect()
}

fn print_receipt(receipt: &Receipt) {
    println!("transactionHash  {}", receipt.transaction_hash);
    println!("blockNumber      {}", receipt.block_number);
    println!("status           {}", if receipt.status { "success" } else { "failed" });
    println!("gasUsed          {}", receipt.gas_used);
    println!("logs             {}", receipt.logs.len());
}

fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::Function(function) => function.to_string(),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) => format!("{s:?}"),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            format!("[{}]", join(values))
        }
        DynSolValue::Tuple(values) => format!("({})", join(values)),
        #[allow(unreachable_patterns)]
        other => format!("{other:?}"),
    }
}

fn join(values: &[DynSolValue]) -> String {
    values.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, Bytes, U256};

    use super::*;

    #[test]
    fn formats_values() {
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(56), 256),
            DynSolValue::Address(address!("5fbdb2315678afecb367f032d93f642f64180aa3")),
            DynSolValue::Array(vec![DynSolValue::Bool(true), DynSolValue::Bool(false)]),
            DynSolValue::Bytes(vec![0xde, 0xad]),
            DynSolValue::String("hi".to_string()),
        ]);

        assert_eq!(
            format_value(&value),
            "(56, 0x5FbDB2315678afecb367f032d93F642f64180aa3, [true, false], 0xdead, \"hi\")"
        );
    }

    #[test]
    fn coerces_initializer_args() -> Result<()> {
        let abi = serde_json::from_str(
            r#"[{"type":"function","name":"initialize","stateMutability":"nonpayable",
                "inputs":[{"name":"value","type":"uint256"}],"outputs":[]}]"#,
        )?;
        let artifact = Artifact::new("Counter", abi, Bytes::new());

        let args = initializer_args(&artifact, "initialize", &["23".to_string()])?;
        assert_eq!(args, vec![DynSolValue::Uint(U256::from(23), 256)]);

        assert!(initializer_args(&artifact, "initialize", &["x".to_string()]).is_err());
        Ok(())
    }
}

