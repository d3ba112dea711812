//! Sequential submission of a normalized quote: chain switch, optional
//! approval, then the main transaction.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, TransactionRequest, TxHash, U256};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::models::{ApprovalPayload, CanonicalRecord, TxPayload};

const STATUS_BUFFER: usize = 32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("wallet reports chain {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },
    #[error("transaction {0:?} reverted")]
    Reverted(TxHash),
    #[error("transaction {0:?} was dropped before confirmation")]
    Dropped(TxHash),
    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("no wallet account is connected")]
    WalletNotConnected,
    #[error("wallet is unreachable: {0}")]
    WalletUnavailable(#[source] ClientError),
    #[error("another execution is already in progress")]
    AlreadyInProgress,
    #[error("chain switch failed: {0}")]
    ChainSwitchFailed(#[source] ClientError),
    #[error("approval transaction failed: {0}")]
    ApprovalFailed(#[source] ClientError),
    #[error("main transaction failed: {0}")]
    MainTxFailed(#[source] ClientError),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::WalletNotConnected => "wallet_not_connected",
            ExecutionError::WalletUnavailable(_) => "wallet_unavailable",
            ExecutionError::AlreadyInProgress => "already_in_progress",
            ExecutionError::ChainSwitchFailed(_) => "chain_switch_failed",
            ExecutionError::ApprovalFailed(_) => "approval_failed",
            ExecutionError::MainTxFailed(_) => "main_tx_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    SwitchingChain { chain_id: u64 },
    Approving,
    SubmittingMain,
    Confirmed { tx_hash: String },
    Failed { kind: &'static str, reason: String },
}

/// Source of the account that signs submitted transactions.
///
/// `Ok(None)` means the wallet answered but has no connected account; an
/// unreachable wallet is an error.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn active_account(&self) -> Result<Option<Address>, ClientError>;
}

#[async_trait]
pub trait ChainSwitcher: Send + Sync {
    async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError>;
}

/// Signs, broadcasts and waits for confirmation of a single transaction.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn submit(&self, request: TransactionRequest) -> Result<TxHash, ClientError>;
}

pub struct Orchestrator {
    wallet: Arc<dyn WalletProvider>,
    switcher: Arc<dyn ChainSwitcher>,
    client: Arc<dyn ChainClient>,
    in_flight: AtomicBool,
    events: broadcast::Sender<ExecutionStatus>,
    current: watch::Sender<ExecutionStatus>,
}

impl Orchestrator {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        switcher: Arc<dyn ChainSwitcher>,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        let (events, _) = broadcast::channel(STATUS_BUFFER);
        let (current, _) = watch::channel(ExecutionStatus::Idle);
        Self {
            wallet,
            switcher,
            client,
            in_flight: AtomicBool::new(false),
            events,
            current,
        }
    }

    /// Builds an orchestrator whose three collaborators are the same backend.
    pub fn with_backend<B>(backend: Arc<B>) -> Self
    where
        B: WalletProvider + ChainSwitcher + ChainClient + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    /// Receives every status transition published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionStatus> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.current.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one attempt. A second call while an attempt is outstanding is
    /// rejected without touching any collaborator.
    pub async fn execute(&self, record: &CanonicalRecord) -> Result<TxHash, ExecutionError> {
        let mut guard = InFlight::acquire(self)?;

        let outcome = self.run(record).await;
        guard.finished = true;
        match &outcome {
            Ok(hash) => self.emit(ExecutionStatus::Confirmed {
                tx_hash: format!("{:?}", hash),
            }),
            Err(err) => {
                warn!("execution on chain {} failed: {}", record.chain_id, err);
                self.emit(ExecutionStatus::Failed {
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
        }
        outcome
    }

    async fn run(&self, record: &CanonicalRecord) -> Result<TxHash, ExecutionError> {
        let account = self
            .wallet
            .active_account()
            .await
            .map_err(ExecutionError::WalletUnavailable)?
            .ok_or(ExecutionError::WalletNotConnected)?;

        self.emit(ExecutionStatus::SwitchingChain {
            chain_id: record.chain_id,
        });
        self.switcher
            .switch_chain(record.chain_id)
            .await
            .map_err(ExecutionError::ChainSwitchFailed)?;

        if let Some(approval) = &record.approve_tx {
            self.emit(ExecutionStatus::Approving);
            let request = approval_request(approval, account, record.chain_id)
                .map_err(ExecutionError::ApprovalFailed)?;
            let hash = self
                .client
                .submit(request)
                .await
                .map_err(ExecutionError::ApprovalFailed)?;
            info!("approval confirmed: {:?}", hash);
        }

        self.emit(ExecutionStatus::SubmittingMain);
        let request = main_request(&record.tx, account, record.chain_id)
            .map_err(ExecutionError::MainTxFailed)?;
        let hash = self
            .client
            .submit(request)
            .await
            .map_err(ExecutionError::MainTxFailed)?;
        info!("main transaction confirmed: {:?}", hash);
        Ok(hash)
    }

    fn emit(&self, status: ExecutionStatus) {
        info!("execution status: {:?}", status);
        self.current.send_replace(status.clone());
        // No subscribers is fine.
        let _ = self.events.send(status);
    }
}

/// Holds the in-flight flag for one attempt. An attempt dropped before it
/// finished (its task aborted) is reported as failed so the status never
/// stays on an intermediate step.
struct InFlight<'a> {
    orchestrator: &'a Orchestrator,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn acquire(orchestrator: &'a Orchestrator) -> Result<Self, ExecutionError> {
        orchestrator
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExecutionError::AlreadyInProgress)?;
        Ok(Self {
            orchestrator,
            finished: false,
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("execution was cancelled before it finished");
            self.orchestrator.emit(ExecutionStatus::Failed {
                kind: "cancelled",
                reason: "execution was cancelled before it finished; check the wallet for submitted transactions".to_string(),
            });
        }
        self.orchestrator.in_flight.store(false, Ordering::Release);
    }
}

pub fn main_request(
    tx: &TxPayload,
    account: Address,
    chain_id: u64,
) -> Result<TransactionRequest, ClientError> {
    let request = base_request(
        account,
        chain_id,
        &tx.from,
        &tx.to,
        &tx.data,
        &tx.gas,
        &tx.gas_price,
    )?;
    Ok(request.value(parse_quantity("value", &tx.value)?))
}

pub fn approval_request(
    approval: &ApprovalPayload,
    account: Address,
    chain_id: u64,
) -> Result<TransactionRequest, ClientError> {
    base_request(
        account,
        chain_id,
        &approval.from,
        &approval.to,
        &approval.data,
        &approval.gas,
        &approval.gas_price,
    )
}

fn base_request(
    account: Address,
    chain_id: u64,
    quoted_from: &str,
    to: &str,
    data: &str,
    gas: &str,
    gas_price: &str,
) -> Result<TransactionRequest, ClientError> {
    match Address::from_str(quoted_from) {
        Ok(from) if from == account => {}
        _ => warn!(
            "quote was built for sender {} but wallet account is {:?}; signing with the wallet account",
            quoted_from, account
        ),
    }

    let to = Address::from_str(to).map_err(|err| ClientError::InvalidField {
        field: "to",
        reason: err.to_string(),
    })?;
    let data = Bytes::from_str(data).map_err(|err| ClientError::InvalidField {
        field: "data",
        reason: err.to_string(),
    })?;

    Ok(TransactionRequest::new()
        .from(account)
        .to(to)
        .data(data)
        .gas(parse_quantity("gas", gas)?)
        .gas_price(parse_quantity("gasPrice", gas_price)?)
        .chain_id(chain_id))
}

/// Quantities arrive as decimal strings; hex with a `0x` prefix is also accepted.
fn parse_quantity(field: &'static str, raw: &str) -> Result<U256, ClientError> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|err| err.to_string()),
        None if raw.is_empty() => Err("empty quantity".to_string()),
        None => U256::from_dec_str(raw).map_err(|err| err.to_string()),
    };
    parsed.map_err(|reason| ClientError::InvalidField { field, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Asset, Quote};
    use ethers_core::types::{NameOrAddress, H256};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const ACCOUNT: &str = "0x1111111111111111111111111111111111111111";
    const ROUTER: &str = "0x2222222222222222222222222222222222222222";
    const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct MockWallet {
        account: Option<Address>,
        unreachable: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WalletProvider for MockWallet {
        async fn active_account(&self) -> Result<Option<Address>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(ClientError::Rpc("connection refused".into()));
            }
            Ok(self.account)
        }
    }

    struct MockSwitcher {
        fail: bool,
        log: CallLog,
    }

    #[async_trait]
    impl ChainSwitcher for MockSwitcher {
        async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError> {
            self.log.lock().unwrap().push(format!("switch:{}", chain_id));
            if self.fail {
                Err(ClientError::Rejected("user rejected the request".into()))
            } else {
                Ok(())
            }
        }
    }

    struct MockClient {
        /// Zero-based index of the submission that should fail.
        fail_at: Option<usize>,
        log: CallLog,
        submitted: Mutex<Vec<TransactionRequest>>,
    }

    #[async_trait]
    impl ChainClient for MockClient {
        async fn submit(&self, request: TransactionRequest) -> Result<TxHash, ClientError> {
            let index = {
                let mut submitted = self.submitted.lock().unwrap();
                submitted.push(request.clone());
                submitted.len() - 1
            };
            let to = match request.to {
                Some(NameOrAddress::Address(addr)) => format!("{:?}", addr),
                _ => "none".to_string(),
            };
            self.log.lock().unwrap().push(format!("submit:{}", to));
            if self.fail_at == Some(index) {
                return Err(ClientError::Reverted(H256::from_low_u64_be(index as u64 + 1)));
            }
            Ok(H256::from_low_u64_be(0xabc0 + index as u64))
        }
    }

    struct Harness {
        wallet: Arc<MockWallet>,
        client: Arc<MockClient>,
        log: CallLog,
        orchestrator: Orchestrator,
    }

    fn harness(connected: bool, switch_fails: bool, fail_at: Option<usize>) -> Harness {
        let log: CallLog = Arc::default();
        let wallet = Arc::new(MockWallet {
            account: connected.then(|| ACCOUNT.parse().unwrap()),
            unreachable: false,
            calls: AtomicUsize::new(0),
        });
        let switcher = Arc::new(MockSwitcher {
            fail: switch_fails,
            log: log.clone(),
        });
        let client = Arc::new(MockClient {
            fail_at,
            log: log.clone(),
            submitted: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(wallet.clone(), switcher, client.clone());
        Harness {
            wallet,
            client,
            log,
            orchestrator,
        }
    }

    fn record(with_approval: bool) -> CanonicalRecord {
        let asset = |code: &str, decimals| Asset {
            name: code.to_string(),
            currency_code: code.to_string(),
            address: TOKEN.to_string(),
            decimals,
        };
        CanonicalRecord {
            tx: TxPayload {
                data: "0x12aa3caf".into(),
                gas: "250000".into(),
                gas_price: "30000000000".into(),
                from: ACCOUNT.into(),
                to: ROUTER.into(),
                value: "1500000000000000000".into(),
            },
            quote: Quote {
                from_asset: asset("ETH", 18),
                to_asset: asset("USDC", 6),
                from_amount: "1500000000000000000".into(),
                to_amount: "4012345678".into(),
                warning: None,
            },
            approve_tx: with_approval.then(|| ApprovalPayload {
                data: "0x095ea7b3".into(),
                gas: "60000".into(),
                gas_price: "30000000000".into(),
                from: ACCOUNT.into(),
                to: TOKEN.into(),
            }),
            chain_id: 137,
            warning: None,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ExecutionStatus>) -> Vec<ExecutionStatus> {
        let mut statuses = Vec::new();
        while let Ok(status) = rx.try_recv() {
            statuses.push(status);
        }
        statuses
    }

    #[tokio::test]
    async fn disconnected_wallet_makes_no_calls() {
        let h = harness(false, false, None);
        let mut rx = h.orchestrator.subscribe();

        let err = h.orchestrator.execute(&record(true)).await.unwrap_err();

        assert_eq!(err, ExecutionError::WalletNotConnected);
        assert_eq!(h.wallet.calls.load(Ordering::SeqCst), 1);
        assert!(h.log.lock().unwrap().is_empty());
        assert!(h.client.submitted.lock().unwrap().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![ExecutionStatus::Failed {
                kind: "wallet_not_connected",
                reason: "no wallet account is connected".into(),
            }]
        );
    }

    #[tokio::test]
    async fn chain_switch_failure_submits_nothing() {
        let h = harness(true, true, None);
        let err = h.orchestrator.execute(&record(true)).await.unwrap_err();

        assert!(matches!(err, ExecutionError::ChainSwitchFailed(_)));
        assert_eq!(*h.log.lock().unwrap(), vec!["switch:137".to_string()]);
        assert!(h.client.submitted.lock().unwrap().is_empty());
        assert_eq!(h.orchestrator.status(), ExecutionStatus::Failed {
            kind: "chain_switch_failed",
            reason: "chain switch failed: request rejected: user rejected the request".into(),
        });
    }

    #[tokio::test]
    async fn approval_failure_stops_before_main() {
        let h = harness(true, false, Some(0));
        let mut rx = h.orchestrator.subscribe();

        let err = h.orchestrator.execute(&record(true)).await.unwrap_err();

        assert_eq!(
            err,
            ExecutionError::ApprovalFailed(ClientError::Reverted(H256::from_low_u64_be(1)))
        );
        assert_eq!(h.client.submitted.lock().unwrap().len(), 1);

        let statuses = drain(&mut rx);
        assert_eq!(statuses[0], ExecutionStatus::SwitchingChain { chain_id: 137 });
        assert_eq!(statuses[1], ExecutionStatus::Approving);
        assert!(matches!(
            statuses.last(),
            Some(ExecutionStatus::Failed { kind: "approval_failed", .. })
        ));
        assert!(!statuses.contains(&ExecutionStatus::SubmittingMain));
    }

    #[tokio::test]
    async fn approval_is_submitted_before_main() {
        let h = harness(true, false, None);
        let hash = h.orchestrator.execute(&record(true)).await.unwrap();

        assert_eq!(hash, H256::from_low_u64_be(0xabc1));
        assert_eq!(
            *h.log.lock().unwrap(),
            vec![
                "switch:137".to_string(),
                format!("submit:{}", TOKEN),
                format!("submit:{}", ROUTER),
            ]
        );

        let submitted = h.client.submitted.lock().unwrap();
        assert_eq!(submitted[0].value, None);
        assert_eq!(
            submitted[1].value,
            Some(U256::from_dec_str("1500000000000000000").unwrap())
        );
    }

    #[tokio::test]
    async fn main_only_flow_skips_approval() {
        let h = harness(true, false, None);
        let mut rx = h.orchestrator.subscribe();

        let hash = h.orchestrator.execute(&record(false)).await.unwrap();

        assert_eq!(hash, H256::from_low_u64_be(0xabc0));
        assert_eq!(h.client.submitted.lock().unwrap().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                ExecutionStatus::SwitchingChain { chain_id: 137 },
                ExecutionStatus::SubmittingMain,
                ExecutionStatus::Confirmed {
                    tx_hash: format!("{:?}", H256::from_low_u64_be(0xabc0)),
                },
            ]
        );
        assert!(!h.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn main_failure_reports_main_tx_failed() {
        let h = harness(true, false, Some(1));
        let err = h.orchestrator.execute(&record(true)).await.unwrap_err();
        assert_eq!(err.kind(), "main_tx_failed");
        assert_eq!(h.client.submitted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_main_field_fails_without_submitting() {
        let h = harness(true, false, None);
        let mut bad = record(false);
        bad.tx.gas = "lots".into();

        let err = h.orchestrator.execute(&bad).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::MainTxFailed(ClientError::InvalidField { field: "gas", .. })
        ));
        assert!(h.client.submitted.lock().unwrap().is_empty());
    }

    struct GatedClient {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChainClient for GatedClient {
        async fn submit(&self, _request: TransactionRequest) -> Result<TxHash, ClientError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(H256::from_low_u64_be(7))
        }
    }

    #[tokio::test]
    async fn concurrent_execution_is_rejected() {
        let wallet = Arc::new(MockWallet {
            account: Some(ACCOUNT.parse().unwrap()),
            unreachable: false,
            calls: AtomicUsize::new(0),
        });
        let switcher = Arc::new(MockSwitcher {
            fail: false,
            log: Arc::default(),
        });
        let client = Arc::new(GatedClient {
            started: Notify::new(),
            release: Notify::new(),
        });
        let orchestrator = Arc::new(Orchestrator::new(wallet.clone(), switcher, client.clone()));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.execute(&record(false)).await })
        };
        client.started.notified().await;
        assert!(orchestrator.is_busy());

        let second = orchestrator.execute(&record(false)).await;
        assert_eq!(second, Err(ExecutionError::AlreadyInProgress));
        assert_eq!(wallet.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.status(), ExecutionStatus::SubmittingMain);

        client.release.notify_one();
        assert_eq!(first.await.unwrap(), Ok(H256::from_low_u64_be(7)));
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn aborted_attempt_reports_cancelled_and_releases_flag() {
        let wallet = Arc::new(MockWallet {
            account: Some(ACCOUNT.parse().unwrap()),
            unreachable: false,
            calls: AtomicUsize::new(0),
        });
        let switcher = Arc::new(MockSwitcher {
            fail: false,
            log: Arc::default(),
        });
        let client = Arc::new(GatedClient {
            started: Notify::new(),
            release: Notify::new(),
        });
        let orchestrator = Arc::new(Orchestrator::new(wallet, switcher, client.clone()));
        let mut rx = orchestrator.subscribe();

        let attempt = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.execute(&record(true)).await })
        };
        client.started.notified().await;
        assert_eq!(orchestrator.status(), ExecutionStatus::Approving);

        attempt.abort();
        assert!(attempt.await.unwrap_err().is_cancelled());

        assert!(!orchestrator.is_busy());
        assert!(matches!(
            orchestrator.status(),
            ExecutionStatus::Failed { kind: "cancelled", .. }
        ));
        let statuses = drain(&mut rx);
        assert!(matches!(
            statuses.last(),
            Some(ExecutionStatus::Failed { kind: "cancelled", .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_wallet_is_not_reported_as_disconnected() {
        let log: CallLog = Arc::default();
        let wallet = Arc::new(MockWallet {
            account: None,
            unreachable: true,
            calls: AtomicUsize::new(0),
        });
        let switcher = Arc::new(MockSwitcher {
            fail: false,
            log: log.clone(),
        });
        let client = Arc::new(MockClient {
            fail_at: None,
            log: log.clone(),
            submitted: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(wallet, switcher, client);

        let err = orchestrator.execute(&record(false)).await.unwrap_err();

        assert_eq!(
            err,
            ExecutionError::WalletUnavailable(ClientError::Rpc("connection refused".into()))
        );
        assert_eq!(err.kind(), "wallet_unavailable");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn requests_use_wallet_account_and_chain() {
        let other: Address = "0x9999999999999999999999999999999999999999".parse().unwrap();
        let request = main_request(&record(false).tx, other, 137).unwrap();

        assert_eq!(request.from, Some(other));
        assert_eq!(request.chain_id, Some(137u64.into()));
        assert_eq!(request.gas, Some(U256::from(250_000u64)));
        assert_eq!(request.gas_price, Some(U256::from(30_000_000_000u64)));
        assert_eq!(
            request.data,
            Some(Bytes::from(vec![0x12, 0xaa, 0x3c, 0xaf]))
        );
    }

    #[test]
    fn quantities_accept_hex() {
        assert_eq!(parse_quantity("gas", "0x5208").unwrap(), U256::from(21_000u64));
        assert!(parse_quantity("gas", "").is_err());
        assert!(parse_quantity("gas", "1.5").is_err());
    }
}
