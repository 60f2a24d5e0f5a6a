use flow::stubs::{DoubleBigTask, DoubleTask, ScaleParams, ScaledProductTask};
use flow::{map_reduce, mapping, FlowEngine, FlowEngineConfig, FlowTaskWorker, LocalTaskQueue, LocalTaskQueueConfig,
           PairingInput, PairingMapReduceFlow, TaskQueue};
use state_cache::{AsyncStateService, CachedMerkleTreeStore, CachedStateService, InMemoryAsyncMerkleTreeStore,
                  InMemoryAsyncStateService, NodeHash, RollupMerkleTree, StateKey};
use std::error::Error;
use std::sync::Arc;

mod config;

use config::{EngineConfig, QueueKind};

const QUEUE_NAME: &str = "sequencer";

/// Demo de un bloque: se simulan `batch` transferencias sobre cachés del
/// estado y del árbol, se agregan sus "pruebas" con un flujo de
/// emparejamiento y, sólo si el flujo resuelve, las cachés se confirman en
/// los stores base.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = EngineConfig::from_env()?;
    log::info!("configuración: {:?}", config);

    let queue: Arc<dyn TaskQueue> = match config.queue {
        QueueKind::Local => Arc::new(LocalTaskQueue::new(LocalTaskQueueConfig::from_env())),
        QueueKind::Durable => Arc::new(queue_persistence::new_from_env()?),
    };
    let mut tasks = vec![mapping(Arc::new(DoubleTask)), mapping(Arc::new(DoubleBigTask))];
    tasks.extend(map_reduce(Arc::new(ScaledProductTask)));
    let worker = FlowTaskWorker::new(tasks)?;
    worker.start(queue.as_ref(), QUEUE_NAME).await?;
    let engine = FlowEngine::new(Arc::clone(&queue), FlowEngineConfig::default());

    // stores base con algunas cuentas
    let accounts: Vec<StateKey> = (0..config.batch as u64).map(|i| format!("account-{}", i).into_bytes()).collect();
    let base_state = Arc::new(InMemoryAsyncStateService::with_values(accounts.iter()
                                                                             .map(|k| (k.clone(), b"100".to_vec()))));
    let base_tree = Arc::new(InMemoryAsyncMerkleTreeStore::new());

    let state = CachedStateService::new(Some(base_state.clone()));
    let nodes = Arc::new(CachedMerkleTreeStore::new(base_tree.clone(), config.tree_height)?);
    let tree = RollupMerkleTree::new(Arc::clone(&nodes), config.tree_height)?;

    let indices: Vec<u64> = (0..config.batch as u64).collect();
    state.preload_keys(&accounts).await?;
    nodes.preload_keys(&indices).await?;
    let root_before = tree.root();

    let mut inputs = Vec::with_capacity(config.batch);
    for (i, key) in accounts.iter().enumerate() {
        let balance: i64 = match state.get(key).await? {
            Some(raw) => String::from_utf8(raw)?.parse()?,
            None => 0,
        };
        let updated = balance + i as i64 + 1;
        state.set(key.clone(), Some(updated.to_string().into_bytes()))?;
        tree.set_leaf(i as u64, NodeHash::leaf(updated.to_string().as_bytes()))?;
        inputs.push(PairingInput { task_id: format!("tx-{}", i),
                                   input1: updated,
                                   input2: (i as u128) + 1,
                                   params: ScaleParams { scale: 1 } });
    }

    let pairing = PairingMapReduceFlow::new(Arc::clone(&engine),
                                            QUEUE_NAME,
                                            Arc::new(DoubleTask),
                                            Arc::new(DoubleBigTask),
                                            Arc::new(ScaledProductTask));
    match pairing.execute(FlowEngine::new_flow_id(), inputs).await {
        Ok(aggregate) => {
            state.merge_into_parent().await?;
            nodes.merge_into_parent().await?;
            log::info!("bloque confirmado: agregado={} raíz {} -> {}", aggregate, root_before, tree.root());
            let first = base_state.get(&accounts[0]).await?;
            log::info!("account-0 en el store base: {:?}",
                       first.map(|v| String::from_utf8_lossy(&v).into_owned()));
        }
        Err(e) => {
            // las cachés se descartan: el store base no cambia
            log::warn!("bloque descartado: {}", e);
        }
    }

    worker.close().await?;
    engine.close().await?;
    Ok(())
}
