use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers_core::types::{Address, TransactionRequest, TxHash, U256, U64};
use ethers_providers::{Http, Middleware, Provider, ProviderError};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::executor::{ChainClient, ChainSwitcher, ClientError, WalletProvider};

/// Wallet reached over an EIP-1193 style JSON-RPC endpoint (e.g. a local
/// wallet bridge) that holds the keys and prompts the user for each request.
#[derive(Clone)]
pub struct RpcWallet {
    provider: Provider<Http>,
    confirmations: usize,
}

impl RpcWallet {
    pub fn new(rpc_url: &str, confirmations: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(rpc_url).context("invalid WALLET_RPC_URL")?;
        let transport = Http::new_with_client(url, client);
        let provider = Provider::new(transport);
        Ok(Self {
            provider,
            confirmations,
        })
    }

    async fn current_chain(&self) -> Result<u64, ClientError> {
        let chain_id = self.provider.get_chainid().await?;
        u256_to_u64(chain_id)
            .ok_or_else(|| ClientError::Rpc(format!("chain id {} out of range", chain_id)))
    }
}

impl From<ProviderError> for ClientError {
    fn from(err: ProviderError) -> Self {
        ClientError::Rpc(err.to_string())
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn active_account(&self) -> Result<Option<Address>, ClientError> {
        let accounts = self.provider.get_accounts().await.map_err(|err| {
            warn!("failed to query wallet accounts: {}", err);
            ClientError::from(err)
        })?;
        Ok(accounts.into_iter().next())
    }
}

#[async_trait]
impl ChainSwitcher for RpcWallet {
    async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError> {
        if self.current_chain().await? == chain_id {
            return Ok(());
        }

        info!("asking wallet to switch to chain {}", chain_id);
        let params = [json!({ "chainId": format!("0x{:x}", chain_id) })];
        self.provider
            .request::<_, serde_json::Value>("wallet_switchEthereumChain", params)
            .await
            .map_err(|err| ClientError::Rejected(err.to_string()))?;

        let actual = self.current_chain().await?;
        if actual != chain_id {
            return Err(ClientError::ChainMismatch {
                expected: chain_id,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for RpcWallet {
    async fn submit(&self, request: TransactionRequest) -> Result<TxHash, ClientError> {
        let pending = self.provider.send_transaction(request, None).await?;
        let tx_hash = pending.tx_hash();
        info!("submitted {:?}, awaiting {} confirmation(s)", tx_hash, self.confirmations);

        let receipt = pending.confirmations(self.confirmations).await?;
        match receipt {
            None => Err(ClientError::Dropped(tx_hash)),
            Some(receipt) if receipt.status == Some(U64::zero()) => {
                Err(ClientError::Reverted(receipt.transaction_hash))
            }
            Some(receipt) => Ok(receipt.transaction_hash),
        }
    }
}

fn u256_to_u64(value: U256) -> Option<u64> {
    (value <= U256::from(u64::MAX)).then(|| value.as_u64())
}
