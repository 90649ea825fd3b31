//! Ethereum JSON-RPC implementation of [`Ledger`].
//!
//! ## Signing
//!
//! With a local key, each call is signed in-process as a legacy EIP-155
//! transaction and broadcast with `eth_sendRawTransaction`. Without one the
//! node signs: `eth_sendTransaction`, or `personal_sendTransaction` when the
//! signer needs a passphrase.
//!
//! ## Confirmation
//!
//! After broadcasting, `eth_getTransactionReceipt` is polled until the
//! transaction is mined or the configured deadline passes.
//!
//! ## Resilience
//!
//! * A locally signed transaction has its hash before it is sent, and
//!   resending it is harmless, so any transport failure is retried. If every
//!   attempt fails after one may have been delivered, the hash is reported
//!   as [`LedgerError::Indeterminate`] so it can be polled later.
//! * A node-signed send is retried only when the node could not be reached
//!   or rate-limited us. Any other failure may have broadcast the
//!   transaction without telling us its hash, and is reported as
//!   indeterminate with no hash.
//! * Once a hash exists, transport errors while polling are logged and the
//!   poll continues until the deadline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::abi;
use crate::config::LedgerConfig;
use crate::ledger::{
    Ledger, LedgerError, OnChainImage, SubmissionReceipt, SubmitProjectCall, TxReceipt,
};
use crate::signer::{LegacyTx, LocalSigner, SignedTx};

const MAX_BACKOFF_SECS: u64 = 8;
const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_SEND_ATTEMPTS: u32 = 4;
/// Nonce, gas price and gas estimate, fetched before signing locally.
const PREPARE_CALLS: u32 = 3;
const GAS_HEADROOM_PERCENT: u64 = 20;

/// Longest one write can take end to end: every preparing call and send
/// attempt running into the request timeout, the back-off between sends,
/// the confirmation deadline and the last receipt poll.
pub fn max_write_duration(config: &LedgerConfig) -> Duration {
    let mut backoff_secs = 0;
    let mut backoff = INITIAL_BACKOFF_SECS;
    for _ in 1..MAX_SEND_ATTEMPTS {
        backoff_secs += backoff;
        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }
    config.request_timeout * (PREPARE_CALLS + MAX_SEND_ATTEMPTS + 1)
        + Duration::from_secs(backoff_secs)
        + config.confirm_timeout
        + config.poll_interval
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// The node already holds this exact transaction.
    fn is_already_known(&self) -> bool {
        let message = self.message.to_lowercase();
        message.contains("already known") || message.contains("known transaction")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: String,
    pub block_number: Option<String>,
    /// `0x1` on success, `0x0` on revert.
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

enum CallFailure {
    /// The request never reached a node that accepted it.
    Unreachable(String),
    Rpc(RpcError),
    Other(LedgerError),
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct RpcLedger {
    client: Client,
    config: LedgerConfig,
    chain_id: u64,
    /// `topics[0]` of the submission event.
    submission_topic: String,
    /// Held from nonce lookup until broadcast so local nonces never collide.
    send_lock: Mutex<()>,
}

impl RpcLedger {
    /// Connect to the node and confirm it answers before handing out the client.
    pub async fn init(client: Client, config: LedgerConfig) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            client,
            submission_topic: abi::event_topic(&config.submission_event),
            config,
            chain_id: 0,
            send_lock: Mutex::new(()),
        };
        let chain_id: String = ledger
            .call("eth_chainId", json!([]))
            .await
            .map_err(|f| ledger.failure_to_error(f))?
            .ok_or_else(|| LedgerError::Decode("empty eth_chainId result".into()))?;
        ledger.chain_id = abi::parse_quantity(&chain_id)?;
        info!(
            "Ledger ready: chain {}, contract {}, signer {} ({})",
            ledger.chain_id,
            ledger.config.contract_address,
            ledger.config.signer,
            if ledger.config.local_key.is_some() {
                "local key"
            } else {
                "node account"
            }
        );
        Ok(ledger)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, CallFailure> {
        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    CallFailure::Unreachable(e.to_string())
                } else {
                    CallFailure::Other(LedgerError::Transport(e.to_string()))
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallFailure::Unreachable("rate-limited by RPC".into()));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| CallFailure::Other(LedgerError::Decode(e.to_string())))?;

        if let Some(err) = body.error {
            return Err(CallFailure::Rpc(err));
        }
        Ok(body.result)
    }

    fn failure_to_error(&self, failure: CallFailure) -> LedgerError {
        match failure {
            CallFailure::Unreachable(msg) => LedgerError::Transport(msg),
            CallFailure::Rpc(err) => LedgerError::Rejected(format!("{} {}", err.code, err.message)),
            CallFailure::Other(err) => err,
        }
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u64, LedgerError> {
        let value: String = self
            .call(method, params)
            .await
            .map_err(|f| self.failure_to_error(f))?
            .ok_or_else(|| LedgerError::Decode(format!("empty {method} result")))?;
        abi::parse_quantity(&value)
    }

    /// Broadcast a contract call and return its hash.
    async fn send_transaction(&self, data: String) -> Result<String, LedgerError> {
        match &self.config.local_key {
            Some(key) => self.send_signed(key, &data).await,
            None => self.send_via_node(data).await,
        }
    }

    async fn send_via_node(&self, data: String) -> Result<String, LedgerError> {
        let tx = json!({
            "from": self.config.signer,
            "to": self.config.contract_address,
            "data": data,
        });
        let (method, params) = match &self.config.signer_passphrase {
            Some(passphrase) => ("personal_sendTransaction", json!([tx, passphrase])),
            None => ("eth_sendTransaction", json!([tx])),
        };

        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;
        loop {
            match self.call::<String>(method, params.clone()).await {
                Ok(Some(tx_hash)) => {
                    debug!("Broadcast {tx_hash}");
                    return Ok(tx_hash);
                }
                Ok(None) => {
                    return Err(LedgerError::Decode(format!("empty {method} result")));
                }
                Err(CallFailure::Unreachable(msg)) if attempt < MAX_SEND_ATTEMPTS => {
                    warn!("Ledger node unreachable (attempt {attempt}, retry in {backoff}s): {msg}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    attempt += 1;
                }
                Err(CallFailure::Other(err)) => {
                    return Err(LedgerError::Indeterminate {
                        tx_hash: None,
                        reason: err.to_string(),
                    });
                }
                Err(failure) => return Err(self.failure_to_error(failure)),
            }
        }
    }

    async fn send_signed(&self, key: &LocalSigner, data: &str) -> Result<String, LedgerError> {
        let _guard = self.send_lock.lock().await;
        let signed = self.sign_call(key, data).await?;
        let params = json!([signed.raw]);

        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;
        let mut maybe_delivered = false;
        loop {
            let failure = match self
                .call::<String>("eth_sendRawTransaction", params.clone())
                .await
            {
                Ok(returned) => {
                    if let Some(other) = returned.filter(|h| !h.eq_ignore_ascii_case(&signed.hash)) {
                        warn!("Node reported hash {other} for {}", signed.hash);
                    }
                    debug!("Broadcast {}", signed.hash);
                    return Ok(signed.hash);
                }
                Err(CallFailure::Rpc(err)) if err.is_already_known() => return Ok(signed.hash),
                Err(CallFailure::Rpc(err)) if maybe_delivered => {
                    return Err(LedgerError::Indeterminate {
                        tx_hash: Some(signed.hash),
                        reason: format!("{} {}", err.code, err.message),
                    });
                }
                Err(CallFailure::Rpc(err)) => {
                    return Err(LedgerError::Rejected(format!("{} {}", err.code, err.message)));
                }
                Err(CallFailure::Unreachable(msg)) => msg,
                Err(CallFailure::Other(err)) => {
                    maybe_delivered = true;
                    err.to_string()
                }
            };

            if attempt >= MAX_SEND_ATTEMPTS {
                return Err(if maybe_delivered {
                    LedgerError::Indeterminate {
                        tx_hash: Some(signed.hash),
                        reason: failure,
                    }
                } else {
                    LedgerError::Transport(failure)
                });
            }
            warn!(
                "Broadcast of {} failed (attempt {attempt}, retry in {backoff}s): {failure}",
                signed.hash
            );
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            attempt += 1;
        }
    }

    /// Sign a call to the contract at the account's next pending nonce.
    async fn sign_call(&self, key: &LocalSigner, data: &str) -> Result<SignedTx, LedgerError> {
        let from = key.address();
        let contract = &self.config.contract_address;
        let nonce = self
            .quantity("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let estimate = self
            .quantity(
                "eth_estimateGas",
                json!([{ "from": from, "to": contract, "data": data }]),
            )
            .await?;

        let call_data = hex::decode(data.strip_prefix("0x").unwrap_or(data))
            .map_err(|e| LedgerError::Decode(format!("bad call data: {e}")))?;
        let tx = LegacyTx {
            nonce,
            gas_price,
            gas: estimate + estimate * GAS_HEADROOM_PERCENT / 100,
            to: contract.clone(),
            value: 0,
            data: call_data,
        };
        key.sign(&tx, self.chain_id)
            .map_err(|e| LedgerError::Rejected(format!("signing failed: {e}")))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<RawReceipt>, LedgerError> {
        self.call::<RawReceipt>("eth_getTransactionReceipt", json!([tx_hash]))
            .await
            .map_err(|f| self.failure_to_error(f))
    }

    /// Poll until `tx_hash` is mined. Reverted transactions are errors.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<RawReceipt, LedgerError> {
        let deadline = Instant::now() + self.config.confirm_timeout;
        loop {
            match self.receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    ensure_success(&receipt)?;
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => warn!("Receipt poll for {tx_hash} failed: {e}"),
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(LedgerError::Timeout {
                    tx_hash: tx_hash.to_string(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn transact(&self, data: String) -> Result<TxReceipt, LedgerError> {
        let tx_hash = self.send_transaction(data).await?;
        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let block_number = block_number(&receipt);
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number,
        })
    }

    fn submission_receipt(&self, receipt: &RawReceipt) -> Result<SubmissionReceipt, LedgerError> {
        let submission_id = submission_id_from_logs(
            &receipt.logs,
            &self.config.contract_address,
            &self.submission_topic,
        )?
        .ok_or_else(|| LedgerError::MissingEvent {
            tx_hash: receipt.transaction_hash.clone(),
        })?;
        Ok(SubmissionReceipt {
            submission_id,
            tx_hash: receipt.transaction_hash.clone(),
            block_number: block_number(receipt),
        })
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    fn contract_address(&self) -> &str {
        &self.config.contract_address
    }

    async fn submit_project(
        &self,
        call: &SubmitProjectCall,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let tx_hash = self.send_transaction(abi::submit_project_data(call)).await?;
        let receipt = self.wait_for_receipt(&tx_hash).await?;
        self.submission_receipt(&receipt)
    }

    async fn approve_image(
        &self,
        submission_id: u64,
        image_index: u64,
        credits: u64,
    ) -> Result<TxReceipt, LedgerError> {
        self.transact(abi::approve_image_data(submission_id, image_index, credits))
            .await
    }

    async fn approve_submission(&self, submission_id: u64) -> Result<TxReceipt, LedgerError> {
        self.transact(abi::approve_submission_data(submission_id))
            .await
    }

    async fn find_submission(
        &self,
        tx_hash: &str,
    ) -> Result<Option<SubmissionReceipt>, LedgerError> {
        match self.receipt(tx_hash).await? {
            None => Ok(None),
            Some(receipt) => {
                ensure_success(&receipt)?;
                self.submission_receipt(&receipt).map(Some)
            }
        }
    }

    async fn get_image(
        &self,
        submission_id: u64,
        image_index: u64,
    ) -> Result<OnChainImage, LedgerError> {
        let call = json!({
            "to": self.config.contract_address,
            "data": abi::get_image_data(submission_id, image_index),
        });
        let raw: String = self
            .call("eth_call", json!([call, "latest"]))
            .await
            .map_err(|f| self.failure_to_error(f))?
            .ok_or_else(|| LedgerError::Decode("empty eth_call result".into()))?;
        let words = abi::split_words(&raw)?;
        if words.is_empty() {
            return Err(LedgerError::Decode(format!(
                "no image {image_index} in submission {submission_id}"
            )));
        }
        Ok(OnChainImage {
            submission_id,
            image_index,
            raw,
            words,
        })
    }

    async fn shutdown(&self) {
        info!("Ledger client for {} shut down", self.config.contract_address);
    }
}

// ─────────────────────────────────────────────────────────
// Receipt decoding
// ─────────────────────────────────────────────────────────

fn ensure_success(receipt: &RawReceipt) -> Result<(), LedgerError> {
    match receipt.status.as_deref() {
        Some("0x0") => Err(LedgerError::Reverted {
            tx_hash: receipt.transaction_hash.clone(),
        }),
        _ => Ok(()),
    }
}

fn block_number(receipt: &RawReceipt) -> Option<u64> {
    receipt
        .block_number
        .as_deref()
        .and_then(|b| abi::parse_quantity(b).ok())
}

/// The submission id from the contract's submission event: the first
/// argument, indexed in `topics[1]` or otherwise the first word of `data`.
/// Logs from other contracts or with another `topics[0]` are ignored.
fn submission_id_from_logs(
    logs: &[RawLog],
    contract: &str,
    topic: &str,
) -> Result<Option<u64>, LedgerError> {
    let Some(log) = logs.iter().find(|l| {
        l.address.eq_ignore_ascii_case(contract)
            && l.topics.first().is_some_and(|t| t.eq_ignore_ascii_case(topic))
    }) else {
        return Ok(None);
    };
    if let Some(id) = log.topics.get(1) {
        return abi::decode_u64_word(id).map(Some);
    }
    let data = log.data.strip_prefix("0x").unwrap_or(&log.data);
    if data.len() < 64 {
        return Ok(None);
    }
    abi::decode_u64_word(&data[..64]).map(Some)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
