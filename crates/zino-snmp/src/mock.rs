// ── In-memory SNMP backend ──
//
// Serves GET / GET-NEXT / GET-BULK from a sorted varbind table. Used by
// the test-suite to script device behavior, and selectable at runtime
// via `[snmp] backend = "mock"` for protocol-only deployments.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::client::SnmpClient;
use crate::error::SnmpError;
use crate::oid::Oid;
use crate::value::{SnmpValue, VarBind};

#[derive(Default)]
pub struct MockSnmp {
    vars: Mutex<BTreeMap<Oid, SnmpValue>>,
    unreachable: AtomicBool,
}

impl MockSnmp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace one object instance.
    pub fn set(&self, oid: impl Into<Oid>, value: SnmpValue) {
        if let Ok(mut vars) = self.vars.lock() {
            vars.insert(oid.into(), value);
        }
    }

    /// Remove one object instance, e.g. a table row that disappeared.
    pub fn remove(&self, oid: &Oid) {
        if let Ok(mut vars) = self.vars.lock() {
            vars.remove(oid);
        }
    }

    /// Drop every object under `prefix`.
    pub fn remove_subtree(&self, prefix: &[u32]) {
        if let Ok(mut vars) = self.vars.lock() {
            vars.retain(|oid, _| !oid.starts_with(prefix));
        }
    }

    /// While unreachable, every request times out.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), SnmpError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(SnmpError::Timeout)
        } else {
            Ok(())
        }
    }

    fn successors(&self, oid: &Oid, count: usize) -> Vec<VarBind> {
        let Ok(vars) = self.vars.lock() else {
            return Vec::new();
        };
        vars.range::<Oid, _>((Bound::Excluded(oid), Bound::Unbounded))
            .take(count)
            .map(|(k, v)| VarBind::new(k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl SnmpClient for MockSnmp {
    async fn get(&self, oid: &Oid) -> Result<SnmpValue, SnmpError> {
        self.check_reachable()?;
        let value = self
            .vars
            .lock()
            .map_err(|_| SnmpError::Network("mock table poisoned".into()))?
            .get(oid)
            .cloned();
        value.ok_or_else(|| SnmpError::NoSuchObject(oid.clone()))
    }

    async fn get_next(&self, oid: &Oid) -> Result<VarBind, SnmpError> {
        self.check_reachable()?;
        Ok(self
            .successors(oid, 1)
            .into_iter()
            .next()
            .unwrap_or_else(|| VarBind::new(oid.clone(), SnmpValue::EndOfMibView)))
    }

    async fn get_bulk(
        &self,
        oid: &Oid,
        max_repetitions: u32,
    ) -> Result<Vec<VarBind>, SnmpError> {
        self.check_reachable()?;
        let mut chunk = self.successors(oid, max_repetitions.max(1) as usize);
        if chunk.is_empty() {
            chunk.push(VarBind::new(oid.clone(), SnmpValue::EndOfMibView));
        }
        Ok(chunk)
    }
}
