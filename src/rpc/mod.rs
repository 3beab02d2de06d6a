use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::chain::{ChainClient, ChainError, Confirmation, TxHandle};
use crate::claims::{WALLET_ADDRESS_BYTES, validate_wallet_address};
use crate::config::{ChainConfig, DisbursementConfig};

/// `transfer(address,uint256)`
const ERC20_TRANSFER_SELECTOR: &str = "a9059cbb";

/// How long and how deep to wait for a receipt.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub confirmations: u64,
}

impl From<&DisbursementConfig> for ConfirmationPolicy {
    fn from(config: &DisbursementConfig) -> Self {
        Self {
            timeout: config.confirmation_timeout(),
            poll_interval: config.receipt_poll_interval(),
            confirmations: config.confirmations,
        }
    }
}

/// Ethereum JSON-RPC client sending ERC-20 transfers through a node or
/// signing proxy that holds the key for `sender`.
#[derive(Clone)]
pub struct RpcClient {
    inner: HttpClient,
    timeout: Duration,
    sender: String,
    token: String,
    policy: ConfirmationPolicy,
}

impl RpcClient {
    pub fn new(config: &ChainConfig, policy: ConfirmationPolicy) -> Result<Self> {
        assert!(!config.rpc_url.is_empty(), "RPC endpoint must be provided");
        assert!(policy.confirmations > 0, "Confirmation depth must be positive");
        let timeout = config.request_timeout();

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(&config.rpc_url)
            .with_context(|| format!("Failed to build RPC client for {}", config.rpc_url))?;

        Ok(Self {
            inner: client,
            timeout,
            sender: validate_wallet_address(&config.sender_address)?,
            token: validate_wallet_address(&config.token_address)?,
            policy,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch_chain_id(&self) -> Result<u64> {
        let response: String = self
            .inner
            .request("eth_chainId", rpc_params![])
            .await
            .context("RPC call eth_chainId failed")?;
        parse_quantity(&response).map_err(Into::into)
    }

    pub async fn fetch_latest_block_number(&self) -> Result<u64> {
        let response: String = self
            .inner
            .request("eth_blockNumber", rpc_params![])
            .await
            .context("RPC call eth_blockNumber failed")?;
        parse_quantity(&response).map_err(Into::into)
    }

    pub async fn fetch_receipt(&self, tx_hash: &str) -> Result<Option<ReceiptResponse>> {
        let response: Option<ReceiptResponse> = self
            .inner
            .request("eth_getTransactionReceipt", rpc_params![tx_hash])
            .await
            .context("RPC call eth_getTransactionReceipt failed")?;
        Ok(response)
    }

    async fn send_transfer(&self, to: &str, amount: u128) -> Result<TxHandle, ChainError> {
        let request = TransactionRequest {
            from: self.sender.clone(),
            to: self.token.clone(),
            data: encode_transfer_call(to, amount)?,
        };

        let tx_hash: String = self
            .inner
            .request("eth_sendTransaction", rpc_params![request])
            .await
            .map_err(classify_send_error)?;

        if tx_hash.is_empty() {
            return Err(ChainError::SubmissionUnknown(
                "eth_sendTransaction returned an empty hash".to_string(),
            ));
        }
        Ok(TxHandle::new(tx_hash))
    }

    /// Polls until the receipt is final at the configured depth. Transient
    /// RPC failures are retried; the caller bounds the total wait.
    async fn poll_until_final(&self, handle: &TxHandle) -> Confirmation {
        loop {
            match self.fetch_receipt(handle.as_str()).await {
                Ok(Some(receipt)) => match receipt.succeeded() {
                    Ok(false) => return Confirmation::Reverted,
                    Ok(true) => match self.has_depth(&receipt).await {
                        Ok(true) => return Confirmation::Confirmed,
                        Ok(false) => debug!(tx_hash = %handle, "Receipt below confirmation depth"),
                        Err(err) => warn!(tx_hash = %handle, "Depth check failed: {err:#}"),
                    },
                    Err(err) => warn!(tx_hash = %handle, "Unusable receipt: {err}"),
                },
                Ok(None) => debug!(tx_hash = %handle, "Transaction not yet mined"),
                Err(err) => warn!(tx_hash = %handle, "Receipt poll failed: {err:#}"),
            }
            sleep(self.policy.poll_interval).await;
        }
    }

    async fn has_depth(&self, receipt: &ReceiptResponse) -> Result<bool> {
        let mined_at = receipt
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .ok_or_else(|| anyhow!("Receipt is missing blockNumber"))?;
        let latest = self.fetch_latest_block_number().await?;
        Ok(latest.saturating_sub(mined_at) + 1 >= self.policy.confirmations)
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn submit(&self, to: &str, amount: u128) -> Result<TxHandle, ChainError> {
        self.send_transfer(to, amount).await
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> Confirmation {
        match timeout(self.policy.timeout, self.poll_until_final(handle)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    tx_hash = %handle,
                    timeout_ms = self.policy.timeout.as_millis() as u64,
                    "Confirmation wait elapsed"
                );
                Confirmation::TimedOut
            }
        }
    }

    async fn ping(&self) -> bool {
        match self.fetch_chain_id().await {
            Ok(_) => true,
            Err(err) => {
                debug!("Chain RPC unreachable: {err:#}");
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct TransactionRequest {
    from: String,
    to: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub transaction_hash: Option<String>,
    pub block_number: Option<String>,
    pub status: Option<String>,
}

impl ReceiptResponse {
    fn succeeded(&self) -> Result<bool, ChainError> {
        let status = self
            .status
            .as_deref()
            .ok_or_else(|| ChainError::InvalidResponse("receipt has no status".to_string()))?;
        Ok(parse_quantity(status)? == 1)
    }
}

/// Only an error object returned by the node is a definite rejection. Any
/// other failure happened after the request was sent, so the transfer may
/// have been broadcast.
fn classify_send_error(err: ClientError) -> ChainError {
    match err {
        ClientError::Call(object) => {
            ChainError::Submission(format!("eth_sendTransaction rejected: {object}"))
        }
        other => ChainError::SubmissionUnknown(format!("eth_sendTransaction: {other}")),
    }
}

/// ABI-encodes `transfer(to, amount)` as 0x-prefixed calldata.
fn encode_transfer_call(to: &str, amount: u128) -> Result<String, ChainError> {
    let address = validate_wallet_address(to)
        .map_err(|err| ChainError::Submission(format!("recipient {to:?}: {err}")))?;
    let address_hex = address[2..].to_ascii_lowercase();
    assert_eq!(
        address_hex.len(),
        WALLET_ADDRESS_BYTES * 2,
        "Validated address must be 20 bytes"
    );
    Ok(format!(
        "0x{ERC20_TRANSFER_SELECTOR}{:0>64}{:064x}",
        address_hex, amount
    ))
}

fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("quantity {value:?} lacks 0x")))?;
    if digits.is_empty() {
        return Err(ChainError::InvalidResponse("empty quantity".to_string()));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|err| ChainError::InvalidResponse(format!("quantity {value:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use jsonrpsee::types::ErrorObject;

    use super::*;

    #[test]
    fn transfer_calldata_layout() {
        let data = encode_transfer_call(
            "0x00000000000000000000000000000000000000AA",
            100 * 10u128.pow(18),
        )
        .unwrap();
        assert_eq!(data.len(), 2 + 8 + 64 + 64);
        assert!(data.starts_with("0xa9059cbb"));
        assert_eq!(
            &data[10..74],
            "00000000000000000000000000000000000000000000000000000000000000aa"
        );
        assert_eq!(
            &data[74..],
            "0000000000000000000000000000000000000000000000056bc75e2d63100000"
        );
    }

    #[test]
    fn transfer_calldata_rejects_bad_recipient() {
        let err = encode_transfer_call("0x1234", 1).unwrap_err();
        assert!(matches!(err, ChainError::Submission(_)));
    }

    #[test]
    fn node_rejection_is_a_definite_submission_failure() {
        let rejection = ClientError::Call(ErrorObject::owned(
            -32000,
            "insufficient funds for gas * price + value",
            None::<()>,
        ));
        match classify_send_error(rejection) {
            ChainError::Submission(message) => assert!(message.contains("insufficient funds")),
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn timeout_after_send_is_an_unknown_outcome() {
        assert!(matches!(
            classify_send_error(ClientError::RequestTimeout),
            ChainError::SubmissionUnknown(_)
        ));
        assert!(matches!(
            classify_send_error(ClientError::Custom("connection reset".to_string())),
            ChainError::SubmissionUnknown(_)
        ));
    }

    #[test]
    fn quantities_parse_as_hex() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn receipt_status_decodes() {
        let receipt: ReceiptResponse = serde_json::from_str(
            r#"{"transactionHash":"0x123","blockNumber":"0x10","status":"0x1"}"#,
        )
        .unwrap();
        assert!(receipt.succeeded().unwrap());

        let reverted: ReceiptResponse =
            serde_json::from_str(r#"{"blockNumber":"0x10","status":"0x0"}"#).unwrap();
        assert!(!reverted.succeeded().unwrap());

        let legacy: ReceiptResponse = serde_json::from_str(r#"{"blockNumber":"0x10"}"#).unwrap();
        assert!(legacy.succeeded().is_err());
    }
}
