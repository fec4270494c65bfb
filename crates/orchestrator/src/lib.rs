use anyhow::{Context, Result, anyhow};
use engine::{StepContext, Thresholds, Trading, TradingConfigUpdate, TradingState};
use futures::future::join_all;
use notify::{Notification, NotificationSink};
use serde::Serialize;
use shared::config::{AppConfig, ControllerConfig};
use shared::metrics::HealthMetrics;
use shared::symbols::SymbolRegistry;
use shared::types::Contract;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use store::{ControllerRecord, Store, WalletRecord};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use venue::{VenueClient, Wallet};

mod sink;

pub use sink::RecordingSink;

/// Owns every market-making controller: connects wallets at startup,
/// restores persisted controllers, and drives one reconciliation step
/// per controller per tick. The registry is keyed by controller id and
/// each entry sits behind its own mutex so at most one step runs per
/// controller at a time.
pub struct Orchestrator {
    venue: VenueClient,
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
    symbols: SymbolRegistry,
    thresholds: Thresholds,
    tick_interval: Duration,
    metrics: Arc<HealthMetrics>,
    contracts: HashMap<String, Contract>,
    wallets: Vec<Wallet>,
    controllers: Mutex<HashMap<String, Arc<Mutex<Trading>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSummary {
    pub id: String,
    pub pair: String,
    pub contract: String,
    pub wallet: String,
    pub state: String,
    pub offsets: Vec<f64>,
    pub target_rate: Option<f64>,
    pub order_min: f64,
}

impl Orchestrator {
    pub async fn bootstrap(
        config: &AppConfig,
        venue: VenueClient,
        store: Arc<dyn Store>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<HealthMetrics>,
    ) -> Result<Arc<Self>> {
        let mut wallets = Vec::with_capacity(config.wallets.len());
        for wallet_config in &config.wallets {
            let endpoint = wallet_config
                .endpoint
                .as_deref()
                .context("wallet endpoint is required")?;
            let wallet = venue
                .connect(endpoint, &wallet_config.credential_env)
                .await?;
            wallets.push(wallet);
        }
        anyhow::ensure!(!wallets.is_empty(), "at least one wallet must be configured");

        let records: Vec<WalletRecord> = wallets
            .iter()
            .map(|wallet| WalletRecord {
                address: wallet.address.clone(),
                endpoint: wallet.endpoint.clone(),
            })
            .collect();
        store.replace_wallets(&records).await?;

        let contracts: HashMap<String, Contract> = config
            .contracts
            .iter()
            .map(|contract| (contract.address.clone(), contract.clone()))
            .collect();

        let orchestrator = Self {
            venue,
            store,
            sink,
            symbols: SymbolRegistry::new(config.symbols.clone()),
            thresholds: Thresholds {
                fulfilled_fraction: config.engine.fulfilled_fraction(),
                gap_threshold: config.engine.gap_threshold(),
            },
            tick_interval: Duration::from_millis(config.engine.tick_interval_ms()),
            metrics,
            contracts,
            wallets,
            controllers: Mutex::new(HashMap::new()),
        };
        orchestrator.restore_controllers(config).await?;
        Ok(Arc::new(orchestrator))
    }

    async fn restore_controllers(&self, config: &AppConfig) -> Result<()> {
        let mut existing_pairs: HashSet<(String, String)> = HashSet::new();
        let records = self.store.list_controllers().await?;
        {
            let mut controllers = self.controllers.lock().await;
            for record in records {
                let trading = self.trading_from_record(&record)?;
                existing_pairs.insert((record.wallet.clone(), record.contract.clone()));
                info!(id = %record.id, state = %trading.state, "restored controller");
                controllers.insert(record.id, Arc::new(Mutex::new(trading)));
            }
        }

        for controller_config in &config.controllers {
            let wallet = self.resolve_wallet(&controller_config.wallet)?;
            let key = (wallet.address.clone(), controller_config.contract.clone());
            if existing_pairs.contains(&key) {
                continue;
            }
            self.add(controller_config).await?;
        }
        Ok(())
    }

    fn trading_from_record(&self, record: &ControllerRecord) -> Result<Trading> {
        let wallet = self
            .wallets
            .iter()
            .find(|wallet| wallet.address == record.wallet)
            .ok_or_else(|| anyhow!("no connected wallet for address {}", record.wallet))?
            .clone();
        let contract = self.resolve_contract(&record.contract)?;
        let mut trading = Trading::new(
            record.id.clone(),
            wallet,
            contract,
            record.offsets.clone(),
            record.target_rate,
            record.order_min,
        )?;
        // Any phase short of Stop must re-observe the market after a
        // restart.
        let persisted: TradingState = record.state.parse()?;
        if persisted == TradingState::Stop {
            trading.state = TradingState::Stop;
        }
        Ok(trading)
    }

    fn resolve_contract(&self, address: &str) -> Result<Contract> {
        self.contracts
            .get(address)
            .cloned()
            .ok_or_else(|| anyhow!("unknown contract address {address}"))
    }

    fn resolve_wallet(&self, address: &str) -> Result<&Wallet> {
        if address.is_empty() {
            return self
                .wallets
                .first()
                .ok_or_else(|| anyhow!("no wallets connected"));
        }
        self.wallets
            .iter()
            .find(|wallet| wallet.address == address)
            .ok_or_else(|| anyhow!("no connected wallet for address {address}"))
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn spawn(self: Arc<Self>) -> OrchestratorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let orchestrator = Arc::clone(&self);
        let join = tokio::spawn(async move {
            let mut timer = interval(orchestrator.tick_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = orchestrator.tick_interval.as_millis() as u64, "orchestrator started");
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        orchestrator.tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_ok() && *shutdown_rx.borrow() {
                            info!("orchestrator received shutdown signal");
                            break;
                        }
                    }
                }
            }
        });
        OrchestratorHandle { shutdown_tx, join }
    }

    /// One reconciliation pass: every controller steps concurrently on
    /// its own task. The pass waits at most one tick interval; an
    /// overrunning step is abandoned here but keeps running and still
    /// holds its controller lock, so the next pass skips it.
    pub async fn tick(self: &Arc<Self>) {
        let snapshot: Vec<(String, Arc<Mutex<Trading>>)> = {
            let controllers = self.controllers.lock().await;
            controllers
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(snapshot.len());
        for (id, slot) in snapshot {
            let orchestrator = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                orchestrator.step_controller(id, slot).await;
            }));
        }
        if timeout(self.tick_interval, join_all(tasks)).await.is_err() {
            warn!("tick overran its interval, abandoning the wait");
        }
        self.update_metrics().await;
    }

    async fn step_controller(&self, id: String, slot: Arc<Mutex<Trading>>) {
        let Ok(mut trading) = slot.try_lock() else {
            debug!(id = %id, "previous step still in flight, skipping");
            return;
        };
        if trading.state == TradingState::Stop {
            return;
        }

        let sink = RecordingSink::new(id.clone(), Arc::clone(&self.store), Arc::clone(&self.sink));
        let ctx = StepContext {
            venue: &self.venue,
            sink: &sink,
            symbols: &self.symbols,
            thresholds: self.thresholds,
        };
        match engine::step(&mut trading, &ctx).await {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                error!(id = %id, error = %err, "fatal configuration error, stopping controller");
                trading.state = TradingState::Stop;
                let pair = self.symbols.pair_label(&trading.contract.denoms);
                self.sink
                    .notify(Notification::ControllerStopped {
                        id: id.clone(),
                        pair,
                        reason: err.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                warn!(id = %id, error = %err, "step failed, retrying next tick");
            }
        }
        self.persist(&trading).await;
    }

    async fn persist(&self, trading: &Trading) {
        let record = ControllerRecord {
            id: trading.id.clone(),
            wallet: trading.wallet.address.clone(),
            contract: trading.contract.address.clone(),
            offsets: trading.offsets().to_vec(),
            target_rate: trading.target_rate(),
            order_min: trading.order_min(),
            state: trading.state.to_string(),
        };
        if let Err(err) = self.store.put_controller(record).await {
            warn!(id = %trading.id, error = %err, "failed to persist controller record");
        }
    }

    async fn update_metrics(&self) {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let controllers = self.controllers.lock().await;
        for slot in controllers.values() {
            let label = match slot.try_lock() {
                Ok(trading) => trading.state.to_string(),
                Err(_) => "InFlight".to_string(),
            };
            *counts.entry(label).or_insert(0) += 1;
        }
        drop(controllers);
        self.metrics.note_tick(SystemTime::now(), counts).await;
    }

    fn summary_of(trading: &Trading, pair: String) -> ControllerSummary {
        ControllerSummary {
            id: trading.id.clone(),
            pair,
            contract: trading.contract.address.clone(),
            wallet: trading.wallet.address.clone(),
            state: trading.state.to_string(),
            offsets: trading.offsets().to_vec(),
            target_rate: trading.target_rate(),
            order_min: trading.order_min(),
        }
    }

    pub async fn list(&self) -> Vec<ControllerSummary> {
        let snapshot: Vec<Arc<Mutex<Trading>>> = {
            let controllers = self.controllers.lock().await;
            controllers.values().cloned().collect()
        };
        let mut summaries = Vec::with_capacity(snapshot.len());
        for slot in snapshot {
            let trading = slot.lock().await;
            let pair = self.symbols.pair_label(&trading.contract.denoms);
            summaries.push(Self::summary_of(&trading, pair));
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn get(&self, id: &str) -> Option<ControllerSummary> {
        let slot = self.slot(id).await?;
        let trading = slot.lock().await;
        let pair = self.symbols.pair_label(&trading.contract.denoms);
        Some(Self::summary_of(&trading, pair))
    }

    async fn slot(&self, id: &str) -> Option<Arc<Mutex<Trading>>> {
        let controllers = self.controllers.lock().await;
        controllers.get(id).cloned()
    }

    pub async fn add(&self, config: &ControllerConfig) -> Result<ControllerSummary> {
        let wallet = self.resolve_wallet(&config.wallet)?.clone();
        let contract = self.resolve_contract(&config.contract)?;
        let trading = Trading::new(
            Uuid::new_v4().to_string(),
            wallet,
            contract,
            config.offsets.clone(),
            config.target_rate,
            config.order_min,
        )?;
        let pair = self.symbols.pair_label(&trading.contract.denoms);
        let summary = Self::summary_of(&trading, pair);
        self.persist(&trading).await;
        info!(id = %trading.id, pair = %summary.pair, "controller added");
        let mut controllers = self.controllers.lock().await;
        controllers.insert(trading.id.clone(), Arc::new(Mutex::new(trading)));
        Ok(summary)
    }

    pub async fn update(&self, id: &str, update: TradingConfigUpdate) -> Result<Vec<String>> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| anyhow!("unknown controller {id}"))?;
        let mut trading = slot.lock().await;
        let changes = trading.apply_config(update)?;
        if !changes.is_empty() {
            self.persist(&trading).await;
            self.sink
                .notify(Notification::ConfigChanged {
                    id: id.to_string(),
                    changes: changes.clone(),
                })
                .await;
        }
        Ok(changes)
    }

    /// Requests a graceful stop: the next steps close the book, then
    /// the controller parks in the terminal phase.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| anyhow!("unknown controller {id}"))?;
        let mut trading = slot.lock().await;
        if trading.state != TradingState::Stop {
            trading.state = TradingState::CloseForStop;
            self.persist(&trading).await;
        }
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| anyhow!("unknown controller {id}"))?;
        let mut trading = slot.lock().await;
        trading.state = TradingState::Initialize;
        trading.prepared.clear();
        trading.fulfilled_ids.clear();
        trading.last_price = None;
        self.persist(&trading).await;
        Ok(())
    }

    /// Removes the controller. The entry lock is taken first, so a step
    /// already running finishes before the controller disappears.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| anyhow!("unknown controller {id}"))?;
        let _guard = slot.lock().await;
        {
            let mut controllers = self.controllers.lock().await;
            controllers.remove(id);
        }
        self.store.delete_controller(id).await?;
        info!(id = %id, "controller deleted");
        Ok(())
    }

    /// Moves every live controller into the closing-for-stop phase; the
    /// following ticks unwind their books.
    pub async fn begin_stop_all(&self) {
        let snapshot: Vec<Arc<Mutex<Trading>>> = {
            let controllers = self.controllers.lock().await;
            controllers.values().cloned().collect()
        };
        for slot in snapshot {
            let mut trading = slot.lock().await;
            if trading.state != TradingState::Stop {
                trading.state = TradingState::CloseForStop;
                self.persist(&trading).await;
            }
        }
    }

    pub async fn all_stopped(&self) -> bool {
        let snapshot: Vec<Arc<Mutex<Trading>>> = {
            let controllers = self.controllers.lock().await;
            controllers.values().cloned().collect()
        };
        for slot in snapshot {
            let trading = slot.lock().await;
            if trading.state != TradingState::Stop {
                return false;
            }
        }
        true
    }
}

pub struct OrchestratorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join
            .await
            .map_err(|err| anyhow!("orchestrator task join error: {err}"))
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::MemorySink;
    use shared::config::{EngineConfig, WalletConfig};
    use shared::types::{Coin, Denoms};
    use store::MemoryStore;
    use venue::InMemoryVenue;

    fn test_config() -> AppConfig {
        AppConfig {
            wallets: vec![WalletConfig {
                endpoint: Some("mem://venue".to_string()),
                credential_env: "TEST_CREDENTIAL".to_string(),
            }],
            contracts: vec![Contract {
                address: "kujira1pair".to_string(),
                denoms: Denoms {
                    base: "ukuji".to_string(),
                    quote: "uusk".to_string(),
                },
                price_decimals: 3,
                decimal_delta: 0,
                is_bootstrapping: false,
                owner: String::new(),
            }],
            controllers: vec![ControllerConfig {
                contract: "kujira1pair".to_string(),
                wallet: String::new(),
                offsets: vec![-0.01, 0.01],
                target_rate: Some(0.5),
                order_min: 0.0,
            }],
            engine: EngineConfig::default(),
            ..AppConfig::default()
        }
    }

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        venue: Arc<InMemoryVenue>,
        store: Arc<MemoryStore>,
        sink: MemorySink,
    }

    async fn fixture_with_store(store: Arc<MemoryStore>) -> Fixture {
        let (client, venue) = VenueClient::in_memory();
        venue.set_market_price("kujira1pair", 1.0).await;
        venue
            .set_balances(
                "mem-TEST_CREDENTIAL",
                vec![
                    Coin {
                        denom: "ukuji".to_string(),
                        amount: "10000000".to_string(),
                    },
                    Coin {
                        denom: "uusk".to_string(),
                        amount: "10000000".to_string(),
                    },
                ],
            )
            .await;
        let sink = MemorySink::default();
        let orchestrator = Orchestrator::bootstrap(
            &test_config(),
            client,
            store.clone(),
            Arc::new(sink.clone()),
            HealthMetrics::new(),
        )
        .await
        .expect("bootstrap");
        Fixture {
            orchestrator,
            venue,
            store,
            sink,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryStore::new())).await
    }

    #[tokio::test]
    async fn bootstrap_seeds_controllers_and_wallets() {
        let fixture = fixture().await;
        let listed = fixture.orchestrator.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, "Initialize");
        assert_eq!(listed[0].pair, "KUJI/USK");
        assert_eq!(listed[0].wallet, "mem-TEST_CREDENTIAL");

        assert_eq!(fixture.store.list_controllers().await.expect("records").len(), 1);
        let wallets = fixture.store.list_wallets().await.expect("wallets");
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].address, "mem-TEST_CREDENTIAL");
    }

    #[tokio::test]
    async fn ticks_drive_the_state_machine() {
        let fixture = fixture().await;
        fixture.orchestrator.tick().await;
        let listed = fixture.orchestrator.list().await;
        assert_eq!(listed[0].state, "Order");

        fixture.orchestrator.tick().await;
        let listed = fixture.orchestrator.list().await;
        assert_eq!(listed[0].state, "OrderCheck");
        assert_eq!(fixture.venue.submitted_batches().await.len(), 1);

        // The persisted record follows the live phase.
        let record = fixture
            .store
            .get_controller(&listed[0].id)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.state, "OrderCheck");
        // Statistics were recorded on the way.
        assert_eq!(fixture.store.stats().await.len(), 1);
    }

    #[tokio::test]
    async fn restart_restores_without_duplicating() {
        let store = Arc::new(MemoryStore::new());
        let first = fixture_with_store(store.clone()).await;
        first.orchestrator.tick().await;
        let id = first.orchestrator.list().await[0].id.clone();
        drop(first);

        let second = fixture_with_store(store).await;
        let listed = second.orchestrator.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        // A live phase restarts from re-initialization.
        assert_eq!(listed[0].state, "Initialize");
    }

    #[tokio::test]
    async fn in_flight_controller_is_skipped() {
        let fixture = fixture().await;
        let id = fixture.orchestrator.list().await[0].id.clone();
        let slot = fixture.orchestrator.slot(&id).await.expect("slot");
        let guard = slot.lock().await;

        fixture.orchestrator.tick().await;
        assert_eq!(fixture.venue.write_calls(), 0);
        drop(guard);

        // With the lock released the controller advances again.
        fixture.orchestrator.tick().await;
        assert_eq!(fixture.orchestrator.list().await[0].state, "Order");
    }

    #[tokio::test]
    async fn stop_resume_delete_lifecycle() {
        let fixture = fixture().await;
        let id = fixture.orchestrator.list().await[0].id.clone();

        fixture.orchestrator.stop(&id).await.expect("stop");
        assert_eq!(fixture.orchestrator.list().await[0].state, "CloseForStop");
        fixture.orchestrator.tick().await;
        assert_eq!(fixture.orchestrator.list().await[0].state, "Stop");
        assert!(fixture.orchestrator.all_stopped().await);

        // Stopped controllers are skipped entirely.
        fixture.orchestrator.tick().await;
        assert_eq!(fixture.orchestrator.list().await[0].state, "Stop");

        fixture.orchestrator.resume(&id).await.expect("resume");
        assert_eq!(fixture.orchestrator.list().await[0].state, "Initialize");

        fixture.orchestrator.delete(&id).await.expect("delete");
        assert!(fixture.orchestrator.list().await.is_empty());
        assert!(fixture
            .store
            .get_controller(&id)
            .await
            .expect("get")
            .is_none());
        assert!(fixture.orchestrator.stop(&id).await.is_err());
    }

    #[tokio::test]
    async fn update_persists_and_notifies() {
        let fixture = fixture().await;
        let id = fixture.orchestrator.list().await[0].id.clone();

        let changes = fixture
            .orchestrator
            .update(
                &id,
                TradingConfigUpdate {
                    offsets: Some(vec![-0.02, 0.02]),
                    target_rate: None,
                    order_min: Some(0.5),
                },
            )
            .await
            .expect("update");
        assert_eq!(changes.len(), 2);

        let record = fixture
            .store
            .get_controller(&id)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.offsets, vec![-0.02, 0.02]);
        assert_eq!(record.order_min, 0.5);

        let notifications = fixture.sink.take().await;
        assert!(notifications
            .iter()
            .any(|notification| matches!(notification, Notification::ConfigChanged { .. })));

        // No-op updates stay silent.
        let changes = fixture
            .orchestrator
            .update(&id, TradingConfigUpdate::default())
            .await
            .expect("noop update");
        assert!(changes.is_empty());
        assert!(fixture.sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn fatal_config_error_stops_and_notifies() {
        let fixture = fixture().await;
        let id = fixture.orchestrator.list().await[0].id.clone();
        // Pull the target far away from the observed 50% rate.
        fixture
            .orchestrator
            .update(
                &id,
                TradingConfigUpdate {
                    offsets: None,
                    target_rate: Some(0.9),
                    order_min: None,
                },
            )
            .await
            .expect("update");
        fixture.sink.take().await;

        fixture.orchestrator.tick().await;
        assert_eq!(fixture.orchestrator.list().await[0].state, "Stop");
        let notifications = fixture.sink.take().await;
        assert!(notifications.iter().any(|notification| matches!(
            notification,
            Notification::ControllerStopped { reason, .. } if reason.contains("deviates")
        )));
        let record = fixture
            .store
            .get_controller(&id)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.state, "Stop");
    }
}
