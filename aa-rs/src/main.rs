mod builder;
mod bundler;
mod calls;
mod chain;
mod config;
mod contracts;
mod encoding;
mod gas;
mod hash;
mod packer;
mod paymaster;
mod pipeline;
mod registry;
mod resolver;
mod signer;
mod submission;
#[cfg(test)]
mod testing;
mod types;

use anyhow::{anyhow, Context, Result};
use bundler::{BundlerClient, BundlerRpc};
use chain::{ChainRpc, EthersChain};
use clap::{Args, Parser, Subcommand};
use config::{load_deployment, FundingMode, PipelineConfig};
use contracts::{AccountContracts, OnchainContracts};
use encoding::{parse_address, parse_decimal, parse_hex_bytes, parse_salt};
use ethers::prelude::*;
use pipeline::Pipeline;
use registry::WalletRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use submission::parse_user_op_hash;
use types::{SimpleUserOperation, WalletRef};

#[derive(Parser, Debug)]
#[command(name = "aa-relay", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counterfactual wallet address for a salt (and deployment status).
    Account(AccountArgs),

    /// Create or list operator wallets.
    #[command(subcommand)]
    Wallet(WalletCommand),

    /// Build + send a UserOperation with arbitrary call data.
    Send(SendArgs),

    /// Send ETH out of a registered wallet (`withdrawETH`).
    TransferEth(TransferEthArgs),

    /// Send ERC-20 tokens out of a registered wallet (`withdrawERC20`).
    TransferToken(TransferTokenArgs),

    /// Native or ERC-20 balance of a registered wallet.
    Balance(BalanceArgs),

    /// Success/failure of a submitted UserOperation.
    Status(StatusArgs),
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    /// Deploy the next wallet (salt = wallet count + 1) and record it.
    Create(CreateArgs),
    /// Print every recorded wallet as JSON.
    List(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (chain, bundler, EntryPoint, factory, paymaster).
    #[arg(long, default_value = "deployments/base-sepolia.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "AA_RPC_URL")]
    rpc: Option<String>,

    /// Override the bundler RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "AA_BUNDLER_URL")]
    bundler: Option<String>,

    /// Wallet registry file.
    #[arg(long, env = "AA_WALLET_REGISTRY", default_value = "data/wallets.json")]
    registry: PathBuf,
}

#[derive(Args, Debug)]
struct OpArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Wallet owner (and funding) private key.
    #[arg(long, env = "AA_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// Verifying paymaster signer private key.
    #[arg(long, env = "AA_PAYMASTER_SIGNER_PRIVATE_KEY", hide_env_values = true)]
    paymaster_signer_private_key: Option<String>,

    /// Do not request paymaster sponsorship; the wallet pays its own gas.
    #[arg(long, default_value_t = false)]
    no_paymaster: bool,

    /// Wait for the bundler receipt after submitting.
    #[arg(long, default_value_t = false)]
    wait: bool,

    /// Max seconds to wait for the receipt (with --wait).
    #[arg(long, default_value_t = 120)]
    max_wait_seconds: u64,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, env = "AA_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// Creation salt: a decimal counter or 0x-prefixed bytes.
    #[arg(long, default_value = "0")]
    salt: String,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[command(flatten)]
    op: OpArgs,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    op: OpArgs,

    /// Existing wallet address.
    #[arg(long)]
    wallet: Option<String>,

    /// Creation salt of a wallet that may not be deployed yet.
    #[arg(long)]
    salt: Option<String>,

    /// Call data executed by the wallet (hex).
    #[arg(long, default_value = "0x")]
    call_data: String,
}

#[derive(Args, Debug)]
struct TransferEthArgs {
    #[command(flatten)]
    op: OpArgs,

    #[arg(long)]
    wallet: String,

    #[arg(long)]
    to: String,

    /// Amount in wei (decimal).
    #[arg(long)]
    amount: String,
}

#[derive(Args, Debug)]
struct TransferTokenArgs {
    #[command(flatten)]
    op: OpArgs,

    #[arg(long)]
    wallet: String,

    #[arg(long)]
    token: String,

    #[arg(long)]
    to: String,

    /// Amount in token base units (decimal).
    #[arg(long)]
    amount: String,
}

#[derive(Args, Debug)]
struct BalanceArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    wallet: String,

    /// ERC-20 token; native balance when omitted.
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// userOpHash returned at submission.
    hash: String,

    /// Poll until the operation is included.
    #[arg(long, default_value_t = false)]
    wait: bool,

    /// Max seconds to wait (with --wait). 0 waits forever.
    #[arg(long, default_value_t = 120)]
    max_wait_seconds: u64,

    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs go to stderr; stdout carries only command results.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Wallet(WalletCommand::Create(args)) => cmd_wallet_create(args).await,
        Command::Wallet(WalletCommand::List(args)) => cmd_wallet_list(args),
        Command::Send(args) => cmd_send(args).await,
        Command::TransferEth(args) => cmd_transfer_eth(args).await,
        Command::TransferToken(args) => cmd_transfer_token(args).await,
        Command::Balance(args) => cmd_balance(args).await,
        Command::Status(args) => cmd_status(args).await,
    }
}

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Loads the deployment and checks the RPC is on the expected chain.
async fn connect(common: &CommonArgs) -> Result<(Arc<PipelineConfig>, Provider<Http>)> {
    let config = load_deployment(&common.deployment, common.rpc.clone(), common.bundler.clone())?;
    let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
        .with_context(|| format!("invalid RPC url {}", config.rpc_url))?
        .interval(Duration::from_millis(350));

    chain::ensure_chain_id(&EthersChain::new(Arc::new(provider.clone())), config.chain_id)
        .await?;
    Ok((Arc::new(config), provider))
}

fn signing_client(
    provider: Provider<Http>,
    key: Option<&str>,
    chain_id: u64,
) -> Result<(Arc<Client>, LocalWallet)> {
    let owner = signer::load_wallet("AA_OWNER_PRIVATE_KEY", key, chain_id)?;
    Ok((
        Arc::new(SignerMiddleware::new(provider, owner.clone())),
        owner,
    ))
}

fn build_pipeline(
    args: &OpArgs,
    config: Arc<PipelineConfig>,
    provider: Provider<Http>,
) -> Result<Pipeline> {
    let (client, owner) =
        signing_client(provider, args.owner_private_key.as_deref(), config.chain_id)?;
    let paymaster_signer = signer::load_wallet(
        "AA_PAYMASTER_SIGNER_PRIVATE_KEY",
        args.paymaster_signer_private_key.as_deref(),
        config.chain_id,
    );
    // Unsponsored ops never touch the paymaster key, so it may be absent.
    let paymaster_signer = match (paymaster_signer, args.no_paymaster) {
        (Ok(w), _) => w,
        (Err(_), true) => owner.clone(),
        (Err(e), false) => return Err(e),
    };

    let chain: Arc<dyn ChainRpc> = Arc::new(EthersChain::new(client.clone()));
    let bundler: Arc<dyn BundlerRpc> = Arc::new(BundlerClient::new(config.bundler_url.clone()));
    let contracts: Arc<dyn AccountContracts> = Arc::new(OnchainContracts::new(
        client,
        config.entry_point,
        config.account_factory,
        config.funding_mode,
        config.paymaster,
    )?);

    tracing::info!(
        chain_id = config.chain_id,
        entry_point = ?config.entry_point,
        factory = ?config.account_factory,
        owner = ?owner.address(),
        sponsored = !args.no_paymaster,
        "pipeline ready"
    );

    Ok(Pipeline::new(
        config,
        chain,
        bundler,
        contracts,
        Arc::new(owner),
        Arc::new(paymaster_signer),
    ))
}

fn request(
    args: &OpArgs,
    config: &PipelineConfig,
    wallet: WalletRef,
    call_data: Bytes,
) -> SimpleUserOperation {
    SimpleUserOperation {
        wallet,
        call_data,
        paymaster: (!args.no_paymaster).then_some(config.paymaster),
        paymaster_data: Bytes::default(),
    }
}

/// Submits and prints the hash; with `--wait`, also the receipt.
async fn submit_and_report(
    pipeline: &Pipeline,
    args: &OpArgs,
    req: SimpleUserOperation,
) -> Result<H256> {
    let hash = pipeline.send_user_operation(req).await?;
    report(pipeline, args, hash).await?;
    Ok(hash)
}

async fn report(pipeline: &Pipeline, args: &OpArgs, hash: H256) -> Result<()> {
    println!("userOpHash: {}", encoding::fmt_h256(hash));
    if !args.wait {
        return Ok(());
    }
    let receipt = pipeline
        .submission()
        .wait_for_inclusion(
            hash,
            Duration::from_secs(2),
            Duration::from_secs(args.max_wait_seconds),
        )
        .await
        .context("failed waiting for userOp receipt")?;
    println!("success:    {}", receipt.success);
    if let Some(reason) = receipt.reason {
        println!("reason:     {reason}");
    }
    Ok(())
}

fn require_registered(registry_path: &Path, wallet: Address) -> Result<()> {
    let registry = WalletRegistry::open(registry_path)?;
    if registry.get(wallet).is_none() {
        return Err(anyhow!(
            "wallet {} is not registered in {}",
            encoding::fmt_address(wallet),
            registry_path.display()
        ));
    }
    Ok(())
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let salt = parse_salt(&args.salt)?;
    let (config, provider) = connect(&args.common).await?;
    let (client, owner) =
        signing_client(provider, args.owner_private_key.as_deref(), config.chain_id)?;

    let contracts: Arc<dyn AccountContracts> = Arc::new(OnchainContracts::new(
        client.clone(),
        config.entry_point,
        config.account_factory,
        FundingMode::None,
        config.paymaster,
    )?);
    let resolver = resolver::AddressResolver::new(
        Arc::new(EthersChain::new(client)),
        contracts,
        owner.address(),
        config.account_factory,
        U256::zero(),
    );
    let resolution = resolver.inspect(&WalletRef::New { salt }).await?;

    println!("chainId:        {}", config.chain_id);
    println!("entryPoint:     {}", encoding::fmt_address(config.entry_point));
    println!("factory:        {}", encoding::fmt_address(config.account_factory));
    println!("owner:          {}", encoding::fmt_address(owner.address()));
    println!("salt:           0x{}", hex::encode(salt));
    println!("wallet:         {}", encoding::fmt_address(resolution.sender));
    println!("isDeployed:     {}", resolution.deployed);
    Ok(())
}

async fn cmd_wallet_create(args: CreateArgs) -> Result<()> {
    let op = &args.op;
    let _lock = WalletRegistry::lock(&op.common.registry)?;
    let mut registry = WalletRegistry::open(&op.common.registry)?;

    let (config, provider) = connect(&op.common).await?;
    let pipeline = build_pipeline(op, config.clone(), provider)?;

    let paymaster = (!op.no_paymaster).then_some(config.paymaster);
    let record = pipeline.create_wallet(&mut registry, paymaster).await?;
    println!("wallet:     {}", encoding::fmt_address(record.address));
    if let Some(hash) = record.user_op_hash {
        report(&pipeline, op, hash).await?;
    }
    Ok(())
}

fn cmd_wallet_list(args: CommonArgs) -> Result<()> {
    let registry = WalletRegistry::open(&args.registry)?;
    println!("{}", serde_json::to_string_pretty(registry.all())?);
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let salt = args.salt.as_deref().map(parse_salt).transpose()?;
    let sender = args
        .wallet
        .as_deref()
        .map(|w| parse_address("wallet", w))
        .transpose()?;
    let wallet = WalletRef::from_parts(salt, sender)?;
    let call_data = parse_hex_bytes("callData", &args.call_data)?;

    let (config, provider) = connect(&args.op.common).await?;
    let pipeline = build_pipeline(&args.op, config.clone(), provider)?;
    let req = request(&args.op, &config, wallet, call_data);
    submit_and_report(&pipeline, &args.op, req).await?;
    Ok(())
}

async fn cmd_transfer_eth(args: TransferEthArgs) -> Result<()> {
    let wallet = parse_address("wallet", &args.wallet)?;
    let to = parse_address("to", &args.to)?;
    let amount = parse_decimal("amount", &args.amount)?;
    require_registered(&args.op.common.registry, wallet)?;

    let (config, provider) = connect(&args.op.common).await?;
    let pipeline = build_pipeline(&args.op, config.clone(), provider)?;
    let call_data = calls::withdraw_eth(to, amount)?;
    let req = request(&args.op, &config, WalletRef::Existing(wallet), call_data);
    submit_and_report(&pipeline, &args.op, req).await?;
    Ok(())
}

async fn cmd_transfer_token(args: TransferTokenArgs) -> Result<()> {
    let wallet = parse_address("wallet", &args.wallet)?;
    let token = parse_address("token", &args.token)?;
    let to = parse_address("to", &args.to)?;
    let amount = parse_decimal("amount", &args.amount)?;
    require_registered(&args.op.common.registry, wallet)?;

    let (config, provider) = connect(&args.op.common).await?;
    let pipeline = build_pipeline(&args.op, config.clone(), provider)?;
    let call_data = calls::withdraw_erc20(token, to, amount)?;
    let req = request(&args.op, &config, WalletRef::Existing(wallet), call_data);
    submit_and_report(&pipeline, &args.op, req).await?;
    Ok(())
}

async fn cmd_balance(args: BalanceArgs) -> Result<()> {
    let wallet = parse_address("wallet", &args.wallet)?;
    let token = args
        .token
        .as_deref()
        .map(|t| parse_address("token", t))
        .transpose()?;
    require_registered(&args.common.registry, wallet)?;

    let (config, provider) = connect(&args.common).await?;
    let provider = Arc::new(provider);
    let chain = EthersChain::new(provider.clone());
    let contracts = OnchainContracts::new(
        provider,
        config.entry_point,
        config.account_factory,
        FundingMode::None,
        config.paymaster,
    )?;
    let balance = wallet_balance(&chain, &contracts, wallet, token).await?;
    println!("{balance}");
    Ok(())
}

/// Native balance, or the ERC-20 balance when `token` is set.
async fn wallet_balance(
    chain: &dyn ChainRpc,
    contracts: &dyn AccountContracts,
    wallet: Address,
    token: Option<Address>,
) -> Result<U256> {
    match token {
        None => chain.balance_of(wallet).await,
        Some(token) => contracts
            .token_balance(token, wallet)
            .await
            .with_context(|| {
                format!(
                    "balance lookup failed for token {}",
                    encoding::fmt_address(token)
                )
            }),
    }
}

async fn cmd_status(args: StatusArgs) -> Result<()> {
    let hash = parse_user_op_hash(&args.hash)?;
    let config = load_deployment(
        &args.common.deployment,
        args.common.rpc.clone(),
        args.common.bundler.clone(),
    )?;
    let client = submission::SubmissionClient::new(
        Arc::new(BundlerClient::new(config.bundler_url.clone())),
        config.entry_point,
    );

    let status = if args.wait {
        let receipt = client
            .wait_for_inclusion(
                hash,
                Duration::from_millis(args.poll_interval_ms),
                Duration::from_secs(args.max_wait_seconds),
            )
            .await?;
        types::OperationStatus {
            success: receipt.success,
            reason: receipt.reason,
        }
    } else {
        client.poll_status(hash).await?
    };
    println!("{}", serde_json::to_string(&status)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChain, FakeContracts};

    const WALLET: Address = H160([0x5e; 20]);
    const TOKEN: Address = H160([0x70; 20]);

    #[tokio::test]
    async fn native_balance_reads_the_chain() {
        let chain = FakeChain::default();
        chain
            .balances
            .lock()
            .unwrap()
            .insert(WALLET, U256::exp10(17));
        let balance = wallet_balance(&chain, &FakeContracts::default(), WALLET, None)
            .await
            .unwrap();
        assert_eq!(balance, U256::exp10(17));
    }

    #[tokio::test]
    async fn token_balance_reads_the_token() {
        let contracts = FakeContracts::default();
        contracts
            .token_balances
            .lock()
            .unwrap()
            .insert((TOKEN, WALLET), U256::from(42u64));
        let balance = wallet_balance(&FakeChain::default(), &contracts, WALLET, Some(TOKEN))
            .await
            .unwrap();
        assert_eq!(balance, U256::from(42u64));
    }

    #[tokio::test]
    async fn failed_token_lookup_is_an_error() {
        let err = wallet_balance(
            &FakeChain::default(),
            &FakeContracts::default(),
            WALLET,
            Some(TOKEN),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("balance lookup failed for token"));
        assert!(format!("{err:#}").contains("execution reverted"));
    }
}
