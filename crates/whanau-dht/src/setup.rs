//! Setup: rebuild a node's db, layer ids, fingers and successor tables
//!
//! Every table is built from independent random-walk samples. A sample
//! that cannot be collected is retried a bounded number of times and then
//! dropped; setup never aborts because some peers are unreachable.

use crate::node::{stable_name, WhanauNode};
use crate::routing::RoutingTables;
use crate::{rpc, DhtError, Result};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::future::Future;
use whanau_core::{sort_fingers, sort_records, Finger, Key, Record, Transport};

/// Outcome of one setup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    /// Records in the fresh db
    pub db_records: usize,
    /// Finger table size per layer
    pub fingers: Vec<usize>,
    /// Successor table size per layer
    pub successors: Vec<usize>,
    /// Sample slots given up on during this pass
    pub dropped_samples: u64,
}

impl<T: Transport> WhanauNode<T> {
    /// Rebuild all routing state from scratch.
    ///
    /// Fails only when the node has no neighbors or its parameters are
    /// invalid; otherwise always leaves a complete (possibly sparse) set of
    /// `nlayers` layers.
    pub async fn setup(&self) -> Result<SetupReport> {
        self.config.validate()?;
        if self.neighbors.is_empty() {
            return Err(DhtError::NoNeighbors);
        }

        let config = self.config.clone();
        let dropped_before = self.dropped_samples();
        tracing::debug!("Setup of {} ({} layers)", self.address, config.nlayers);

        let db = self.sample_records(config.rd, config.w).await;
        let mut report = SetupReport {
            db_records: db.len(),
            ..SetupReport::default()
        };
        self.store.replace_db(db);

        let mut staging = RoutingTables::default();
        self.publish(&staging);

        for layer in 0..config.nlayers {
            let id = self.choose_id(layer);
            staging.push_id(id.clone());
            self.publish(&staging);

            let mut fingers = self.construct_fingers(layer, config.rf, config.w).await;
            sort_fingers(&mut fingers);

            let mut succ = self
                .successors_following(&id, config.w, config.rs, config.t)
                .await;
            sort_records(&mut succ);

            report.fingers.push(fingers.len());
            report.successors.push(succ.len());
            staging.push_tables(fingers, succ);
            self.publish(&staging);
        }

        report.dropped_samples = self.dropped_samples() - dropped_before;
        tracing::info!(
            "Setup of {} done: db {}, fingers {:?}, successors {:?}, dropped {}",
            self.address,
            report.db_records,
            report.fingers,
            report.successors,
            report.dropped_samples
        );
        Ok(report)
    }

    /// Draw `rd` records, each held by the end of an independent walk
    pub async fn sample_records(&self, rd: usize, w: u32) -> Vec<Record> {
        let mut db = Vec::with_capacity(rd);
        for _ in 0..rd {
            let sampled = self
                .with_retries("record sample", || self.record_sample(w))
                .await;
            db.extend(sampled);
        }
        db
    }

    /// Pick the id for `layer`.
    ///
    /// Layer 0 takes the key of a random db record, falling back to a local
    /// record and then to a name derived from the address. Higher layers
    /// copy the id of a random finger one layer down, so each layer's ids
    /// follow the key distribution of the layer beneath it.
    pub fn choose_id(&self, layer: usize) -> Key {
        let tables = self.tables();
        if layer == 0 {
            let db = self.db();
            return self.with_rng(|rng| {
                if let Some(record) = db.choose(rng) {
                    return record.key.clone();
                }
                self.store
                    .sample_local(rng)
                    .map(|record| record.key)
                    .unwrap_or_else(|| stable_name(&self.address))
            });
        }

        let below = layer - 1;
        self.with_rng(|rng| tables.fingers(below).choose(rng).map(|f| f.id.clone()))
            .or_else(|| tables.id(below).cloned())
            .unwrap_or_else(|| stable_name(&self.address))
    }

    /// Sample `rf` walk ends and label each with its id at `layer`.
    /// The result is unsorted.
    pub async fn construct_fingers(&self, layer: usize, rf: usize, w: u32) -> Vec<Finger> {
        let mut fingers = Vec::with_capacity(rf);
        for _ in 0..rf {
            let finger = self
                .with_retries("finger", || self.finger_sample(layer, w))
                .await;
            fingers.extend(finger);
        }
        fingers
    }

    /// Sample `rs` walk ends and collect from each up to `t` db records
    /// following this node's id at `layer`. Duplicates are kept; the result
    /// is unsorted.
    pub async fn successors(&self, layer: usize, w: u32, rs: usize, t: usize) -> Result<Vec<Record>> {
        let id = self.get_id(layer)?;
        Ok(self.successors_following(&id, w, rs, t).await)
    }

    async fn successors_following(&self, id: &Key, w: u32, rs: usize, t: usize) -> Vec<Record> {
        let mut succ = Vec::with_capacity(rs * t);
        for _ in 0..rs {
            let records = self
                .with_retries("successor sample", || self.successor_sample(id, w, t))
                .await;
            succ.extend(records.into_iter().flatten());
        }
        succ
    }

    async fn record_sample(&self, w: u32) -> Result<Record> {
        let end = self.random_walk(w).await?;
        rpc::sample_record(&self.transport, &end).await
    }

    async fn finger_sample(&self, layer: usize, w: u32) -> Result<Finger> {
        let server = self.random_walk(w).await?;
        let id = rpc::get_id(&self.transport, &server, layer).await?;
        Ok(Finger::new(id, server))
    }

    async fn successor_sample(&self, id: &Key, w: u32, t: usize) -> Result<Vec<Record>> {
        let end = self.random_walk(w).await?;
        rpc::successors(&self.transport, &end, id, t).await
    }

    /// Run `op` once plus up to `sample_retries` more times, dropping the
    /// sample if every attempt fails
    async fn with_retries<X, F, Fut>(&self, what: &str, mut op: F) -> Option<X>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<X>>,
    {
        for attempt in 0..=self.config.sample_retries {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::debug!(
                        "{}: {} attempt {} failed: {}",
                        self.address,
                        what,
                        attempt + 1,
                        e
                    );
                }
            }
        }
        self.note_dropped();
        None
    }
}
