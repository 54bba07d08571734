//! Call data for the wallet contract's own methods.

use anyhow::{Context, Result};
use ethers::abi::{Abi, AbiParser, Token};
use ethers::types::{Address, Bytes, U256};

fn wallet_abi() -> Result<Abi> {
    AbiParser::default()
        .parse(&[
            "function withdrawETH(address to, uint256 amount)",
            "function withdrawERC20(address token, address to, uint256 amount)",
        ])
        .context("failed to parse wallet ABI")
}

fn encode_call(name: &str, args: &[Token]) -> Result<Bytes> {
    let abi = wallet_abi()?;
    let data = abi
        .function(name)?
        .encode_input(args)
        .with_context(|| format!("failed to encode {name} calldata"))?;
    Ok(Bytes::from(data))
}

/// `withdrawETH(to, amount)`
pub fn withdraw_eth(to: Address, amount: U256) -> Result<Bytes> {
    encode_call("withdrawETH", &[Token::Address(to), Token::Uint(amount)])
}

/// `withdrawERC20(token, to, amount)`
pub fn withdraw_erc20(token: Address, to: Address, amount: U256) -> Result<Bytes> {
    encode_call(
        "withdrawERC20",
        &[Token::Address(token), Token::Address(to), Token::Uint(amount)],
    )
}
