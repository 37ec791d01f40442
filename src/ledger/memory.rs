//! In-process ledger
//!
//! Accepts signed application transactions, confirms them after a fixed
//! number of status polls and executes their programs on the local VM.
//! Used for local development (`--memory-ledger`) and end-to-end tests.

use super::gateway::{
    GatewayError, GlobalStateEntry, LedgerGateway, NetworkParameters, PendingStatus, StateValue,
};
use super::http::VALIDITY_WINDOW;
use crate::contract::{Assembler, CallContext, StackValue, VmError, DEFAULT_COST_BUDGET, PROGRAM_VERSION, VM};
use crate::crypto::sha256_hex;
use crate::transaction::{OnComplete, SignedTransaction, StateSchema, TransactionKind};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Genesis identifier of the in-process network
pub const GENESIS_ID: &str = "memnet-v1";

/// Minimum transaction fee
pub const MIN_FEE: u64 = 1000;

#[derive(Debug, Clone)]
pub struct MemoryLedgerConfig {
    /// Status polls before a pending transaction is included
    pub confirm_after_polls: u32,
    /// Id given to the first created application
    pub first_application_id: u64,
    /// Cost budget for each program evaluation
    pub cost_budget: u64,
    /// Rounds a suggested transaction stays valid for
    pub validity_window: u64,
}

impl Default for MemoryLedgerConfig {
    fn default() -> Self {
        Self {
            confirm_after_polls: 1,
            first_application_id: 1000,
            cost_budget: DEFAULT_COST_BUDGET,
            validity_window: VALIDITY_WINDOW,
        }
    }
}

/// A deployed application
#[derive(Debug, Clone)]
pub struct Application {
    pub id: u64,
    pub creator: String,
    pub approval_program: Vec<u8>,
    pub clear_program: Vec<u8>,
    pub global_schema: StateSchema,
    pub global_state: BTreeMap<Vec<u8>, StackValue>,
    pub created_round: u64,
}

struct PendingEntry {
    transaction: SignedTransaction,
    polls: u32,
    outcome: Option<PendingStatus>,
}

struct LedgerState {
    round: u64,
    next_application_id: u64,
    applications: BTreeMap<u64, Application>,
    pool: HashMap<String, PendingEntry>,
}

/// Ledger gateway backed by process memory
pub struct MemoryLedger {
    config: MemoryLedgerConfig,
    genesis_hash: String,
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new(config: MemoryLedgerConfig) -> Self {
        let state = LedgerState {
            round: 1,
            next_application_id: config.first_application_id,
            applications: BTreeMap::new(),
            pool: HashMap::new(),
        };
        Self {
            config,
            genesis_hash: sha256_hex(GENESIS_ID.as_bytes()),
            state: RwLock::new(state),
        }
    }

    /// Current round
    pub async fn round(&self) -> u64 {
        self.state.read().await.round
    }

    /// Snapshot of a deployed application
    pub async fn application(&self, id: u64) -> Option<Application> {
        self.state.read().await.applications.get(&id).cloned()
    }

    /// Number of deployed applications
    pub async fn application_count(&self) -> usize {
        self.state.read().await.applications.len()
    }

    /// Number of transactions held in the pool
    pub async fn pool_len(&self) -> usize {
        self.state.read().await.pool.len()
    }

    /// Drop decided transactions whose validity window has passed.
    /// Admission already refuses them, so duplicate detection is unaffected.
    fn prune_pool(state: &mut LedgerState) {
        let round = state.round;
        let before = state.pool.len();
        state
            .pool
            .retain(|_, entry| entry.outcome.is_none() || entry.transaction.transaction.last_valid >= round);
        let pruned = before - state.pool.len();
        if pruned > 0 {
            log::debug!("Pruned {} expired transactions from the pool", pruned);
        }
    }

    fn check_admission(
        &self,
        state: &LedgerState,
        signed: &SignedTransaction,
    ) -> Result<(), String> {
        let tx = &signed.transaction;
        match signed.verify() {
            Ok(true) => {}
            Ok(false) => return Err("invalid signature".to_string()),
            Err(e) => return Err(format!("invalid signature: {}", e)),
        }
        if tx.genesis_id != GENESIS_ID || tx.genesis_hash != self.genesis_hash {
            return Err(format!("wrong network: {}", tx.genesis_id));
        }
        if state.round < tx.first_valid || state.round > tx.last_valid {
            return Err(format!(
                "round {} outside validity window {}..{}",
                state.round, tx.first_valid, tx.last_valid
            ));
        }
        if tx.fee < MIN_FEE {
            return Err(format!("fee {} below minimum {}", tx.fee, MIN_FEE));
        }
        if let TransactionKind::ApplicationCreate {
            approval_program,
            clear_program,
            ..
        } = &tx.kind
        {
            for program in [approval_program, clear_program] {
                if program.first() != Some(&PROGRAM_VERSION) {
                    return Err("program has no supported version header".to_string());
                }
            }
        }
        Ok(())
    }

    /// Include a transaction in the next round and return its outcome
    fn include(&self, state: &mut LedgerState, signed: &SignedTransaction) -> PendingStatus {
        state.round += 1;
        let round = state.round;
        let tx = &signed.transaction;

        match &tx.kind {
            TransactionKind::ApplicationCreate {
                approval_program,
                clear_program,
                global_schema,
                on_complete,
                ..
            } => {
                let context = CallContext {
                    sender: tx.sender.clone(),
                    application_id: 0,
                    on_completion: on_complete.code(),
                    args: Vec::new(),
                };
                let empty = BTreeMap::new();
                let global_state =
                    match self.evaluate(approval_program, &empty, &context, global_schema) {
                        Ok(state) => state,
                        Err(reason) => return PendingStatus::Rejected(reason),
                    };

                let id = state.next_application_id;
                state.next_application_id += 1;
                state.applications.insert(
                    id,
                    Application {
                        id,
                        creator: tx.sender.clone(),
                        approval_program: approval_program.clone(),
                        clear_program: clear_program.clone(),
                        global_schema: *global_schema,
                        global_state,
                        created_round: round,
                    },
                );
                log::info!("Application {} created in round {}", id, round);
                PendingStatus::Confirmed {
                    round,
                    application_id: Some(id),
                }
            }
            TransactionKind::ApplicationCall {
                application_id,
                args,
                on_complete,
            } => {
                let Some(app) = state.applications.get(application_id) else {
                    return PendingStatus::Rejected(format!(
                        "application {} does not exist",
                        application_id
                    ));
                };
                let program = if *on_complete == OnComplete::ClearState {
                    &app.clear_program
                } else {
                    &app.approval_program
                };
                let context = CallContext {
                    sender: tx.sender.clone(),
                    application_id: *application_id,
                    on_completion: on_complete.code(),
                    args: args.clone(),
                };
                match self.evaluate(program, &app.global_state, &context, &app.global_schema) {
                    Ok(global_state) => {
                        if *on_complete == OnComplete::DeleteApplication {
                            state.applications.remove(application_id);
                        } else if let Some(app) = state.applications.get_mut(application_id) {
                            app.global_state = global_state;
                        }
                        PendingStatus::Confirmed {
                            round,
                            application_id: None,
                        }
                    }
                    Err(reason) => PendingStatus::Rejected(reason),
                }
            }
        }
    }

    /// Run a program and return the resulting global state
    fn evaluate(
        &self,
        program: &[u8],
        state: &BTreeMap<Vec<u8>, StackValue>,
        context: &CallContext,
        schema: &StateSchema,
    ) -> Result<BTreeMap<Vec<u8>, StackValue>, String> {
        let result = VM::with_budget(program, state, context, self.config.cost_budget)
            .execute()
            .map_err(|e: VmError| format!("logic eval error: {}", e))?;
        if !result.approved {
            return Err("transaction rejected by approval program".to_string());
        }

        let mut next = state.clone();
        for (key, value) in result.state_changes {
            match value {
                Some(value) => next.insert(key, value),
                None => next.remove(&key),
            };
        }

        let uints = next.values().filter(|v| matches!(v, StackValue::Uint(_))).count() as u64;
        let byte_slices = next.len() as u64 - uints;
        if uints > schema.num_uint || byte_slices > schema.num_byte_slice {
            return Err(format!(
                "global state needs {} uints and {} byte slices, schema allows {} and {}",
                uints, byte_slices, schema.num_uint, schema.num_byte_slice
            ));
        }
        Ok(next)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(MemoryLedgerConfig::default())
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn suggested_params(&self) -> Result<NetworkParameters, GatewayError> {
        let round = self.round().await;
        Ok(NetworkParameters {
            fee: 0,
            min_fee: MIN_FEE,
            first_valid: round,
            last_valid: round.saturating_add(self.config.validity_window),
            genesis_id: GENESIS_ID.to_string(),
            genesis_hash: self.genesis_hash.clone(),
            fetched_at: Utc::now(),
        })
    }

    async fn compile_bytecode(&self, source: &str) -> Result<Vec<u8>, GatewayError> {
        Assembler::new()
            .assemble(source)
            .map_err(|e| GatewayError::Status {
                status: 400,
                message: e.to_string(),
            })
    }

    async fn broadcast(&self, signed: &SignedTransaction) -> Result<String, GatewayError> {
        let mut state = self.state.write().await;
        Self::prune_pool(&mut state);
        let tx_id = signed.id();
        if state.pool.contains_key(&tx_id) {
            return Err(GatewayError::Rejected(format!(
                "transaction {} already submitted",
                tx_id
            )));
        }
        self.check_admission(&state, signed)
            .map_err(GatewayError::Rejected)?;

        state.pool.insert(
            tx_id.clone(),
            PendingEntry {
                transaction: signed.clone(),
                polls: 0,
                outcome: None,
            },
        );
        log::debug!("Accepted transaction {} into the pool", tx_id);
        Ok(tx_id)
    }

    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingStatus, GatewayError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let entry = state
            .pool
            .get_mut(tx_id)
            .ok_or_else(|| GatewayError::TransactionNotFound(tx_id.to_string()))?;
        if let Some(outcome) = &entry.outcome {
            return Ok(outcome.clone());
        }
        entry.polls += 1;
        if entry.polls < self.config.confirm_after_polls {
            return Ok(PendingStatus::Pending);
        }

        let transaction = entry.transaction.clone();
        let outcome = self.include(state, &transaction);
        if let Some(entry) = state.pool.get_mut(tx_id) {
            entry.outcome = Some(outcome.clone());
        }
        Ok(outcome)
    }

    async fn application_global_state(
        &self,
        app_id: u64,
    ) -> Result<Vec<GlobalStateEntry>, GatewayError> {
        let state = self.state.read().await;
        let app = state
            .applications
            .get(&app_id)
            .ok_or(GatewayError::ApplicationNotFound(app_id))?;
        Ok(app
            .global_state
            .iter()
            .map(|(key, value)| GlobalStateEntry {
                key: key.clone(),
                value: match value {
                    StackValue::Bytes(b) => StateValue::Bytes(b.clone()),
                    StackValue::Uint(n) => StateValue::Uint(*n),
                },
            })
            .collect())
    }
}
