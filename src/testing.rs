//! Shared test doubles

use crate::contract::{Assembler, CompiledArtifact, SandboxedCompiler};
use crate::ledger::{
    GatewayError, GlobalStateEntry, LedgerGateway, NetworkParameters, PendingStatus,
};
use crate::transaction::{
    Credential, LocalSigner, SignedTransaction, SigningError, TransactionBuilder,
    TransactionSigner, UnsignedTransaction,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn fresh_params() -> NetworkParameters {
    NetworkParameters {
        fee: 0,
        min_fee: 1000,
        first_valid: 10,
        last_valid: 1010,
        genesis_id: "testnet-v1".to_string(),
        genesis_hash: "ab".repeat(32),
        fetched_at: Utc::now(),
    }
}

/// A signed no-op call into `app_id` from a fresh account
pub(crate) fn signed_call(app_id: u64) -> SignedTransaction {
    let signer = LocalSigner::new(Credential::generate());
    let sender = signer.address().unwrap();
    let unsigned = TransactionBuilder::default()
        .build_call(app_id, &sender, vec![b"hello".to_vec()], &fresh_params())
        .unwrap();
    signer.sign(unsigned).unwrap()
}

/// A signed creation of a trivially approving application
pub(crate) fn signed_create() -> SignedTransaction {
    let signer = LocalSigner::new(Credential::generate());
    let sender = signer.address().unwrap();
    let artifact: CompiledArtifact = SandboxedCompiler::new()
        .compile("approval = Approve()\nclear = Approve()")
        .unwrap();
    let unsigned = TransactionBuilder::default()
        .build_create(&artifact, &sender, &fresh_params())
        .unwrap();
    signer.sign(unsigned).unwrap()
}

/// Gateway whose answers are scripted per transaction.
///
/// Each transaction stays pending until its `n`th status poll, which
/// confirms it (or rejects it when configured to).
pub(crate) struct ScriptedGateway {
    confirm_on: Option<u32>,
    application_id: u64,
    rejection: Option<String>,
    poll_delay: Option<Duration>,
    global_state: Option<Vec<GlobalStateEntry>>,
    broadcast_failure: Option<GatewayError>,
    polls_by_tx: Mutex<HashMap<String, u32>>,
    broadcasts: Mutex<Vec<SignedTransaction>>,
    params_calls: AtomicUsize,
    compile_calls: AtomicUsize,
    broadcast_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    state_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn confirming_on(poll: u32) -> Self {
        Self::scripted(Some(poll))
    }

    pub fn never_confirming() -> Self {
        Self::scripted(None)
    }

    fn scripted(confirm_on: Option<u32>) -> Self {
        Self {
            confirm_on,
            application_id: 1,
            rejection: None,
            poll_delay: None,
            global_state: None,
            broadcast_failure: None,
            polls_by_tx: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            params_calls: AtomicUsize::new(0),
            compile_calls: AtomicUsize::new(0),
            broadcast_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            state_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_application_id(mut self, id: u64) -> Self {
        self.application_id = id;
        self
    }

    /// Report a rejection instead of a confirmation
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_string());
        self
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    /// Serve `entries` for every application id
    pub fn with_global_state(mut self, entries: Vec<GlobalStateEntry>) -> Self {
        self.global_state = Some(entries);
        self
    }

    /// Fail every broadcast with `err`
    pub fn failing_broadcast(mut self, err: GatewayError) -> Self {
        self.broadcast_failure = Some(err);
        self
    }

    pub fn params_calls(&self) -> usize {
        self.params_calls.load(Ordering::SeqCst)
    }

    pub fn compile_calls(&self) -> usize {
        self.compile_calls.load(Ordering::SeqCst)
    }

    pub fn broadcast_calls(&self) -> usize {
        self.broadcast_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.params_calls()
            + self.compile_calls()
            + self.broadcast_calls()
            + self.poll_calls()
            + self.state_calls()
    }

    pub fn broadcasts(&self) -> Vec<SignedTransaction> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerGateway for ScriptedGateway {
    async fn suggested_params(&self) -> Result<NetworkParameters, GatewayError> {
        self.params_calls.fetch_add(1, Ordering::SeqCst);
        Ok(fresh_params())
    }

    async fn compile_bytecode(&self, source: &str) -> Result<Vec<u8>, GatewayError> {
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        Assembler::new()
            .assemble(source)
            .map_err(|e| GatewayError::Status {
                status: 400,
                message: e.to_string(),
            })
    }

    async fn broadcast(&self, signed: &SignedTransaction) -> Result<String, GatewayError> {
        self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.broadcast_failure {
            return Err(err.clone());
        }
        self.broadcasts.lock().unwrap().push(signed.clone());
        Ok(signed.id())
    }

    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingStatus, GatewayError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.poll_delay {
            tokio::time::sleep(delay).await;
        }

        let polls = {
            let mut by_tx = self.polls_by_tx.lock().unwrap();
            let count = by_tx.entry(tx_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let Some(confirm_on) = self.confirm_on else {
            return Ok(PendingStatus::Pending);
        };
        if polls < confirm_on {
            return Ok(PendingStatus::Pending);
        }
        if let Some(reason) = &self.rejection {
            return Ok(PendingStatus::Rejected(reason.clone()));
        }

        let is_create = self
            .broadcasts
            .lock()
            .unwrap()
            .iter()
            .any(|signed| signed.id() == tx_id && signed.transaction.is_create());
        Ok(PendingStatus::Confirmed {
            round: u64::from(polls),
            application_id: is_create.then_some(self.application_id),
        })
    }

    async fn application_global_state(
        &self,
        app_id: u64,
    ) -> Result<Vec<GlobalStateEntry>, GatewayError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        self.global_state
            .clone()
            .ok_or(GatewayError::ApplicationNotFound(app_id))
    }
}

/// Signer that counts how often it is used
pub(crate) struct SpySigner {
    inner: LocalSigner,
    address_calls: AtomicUsize,
    sign_calls: AtomicUsize,
}

impl SpySigner {
    pub fn new() -> Self {
        Self::wrapping(LocalSigner::new(Credential::generate()))
    }

    pub fn wrapping(inner: LocalSigner) -> Self {
        Self {
            inner,
            address_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
        }
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Total calls of either method
    pub fn calls(&self) -> usize {
        self.address_calls.load(Ordering::SeqCst) + self.sign_calls()
    }
}

impl TransactionSigner for SpySigner {
    fn address(&self) -> Result<String, SigningError> {
        self.address_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.address()
    }

    fn sign(&self, unsigned: UnsignedTransaction) -> Result<SignedTransaction, SigningError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(unsigned)
    }
}
