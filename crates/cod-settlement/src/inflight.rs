//! Single-writer guard for settlements running in this process

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::Mutex;

use cod_types::{CodError, Result};

/// Keys of the batches and payouts currently being settled
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Releases its key when dropped
pub(crate) struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlight {
    /// Claim `entity`/`id`; a second claim fails until the first guard drops.
    pub fn enter(&self, entity: &str, id: &impl Display) -> Result<InFlightGuard> {
        let key = format!("{}:{}", entity, id);
        if !self.keys.lock().insert(key.clone()) {
            return Err(CodError::ConcurrentModification {
                entity: entity.to_string(),
                id: id.to_string(),
            });
        }
        Ok(InFlightGuard {
            keys: self.keys.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cod_types::BatchId;

    #[test]
    fn test_second_claim_waits_for_release() {
        let in_flight = InFlight::default();
        let id = BatchId::new();

        let guard = in_flight.enter("Batch", &id).unwrap();
        let shared = in_flight.clone();
        assert!(matches!(
            shared.enter("Batch", &id),
            Err(CodError::ConcurrentModification { .. })
        ));
        // other ids are unaffected
        assert!(in_flight.enter("Batch", &BatchId::new()).is_ok());

        drop(guard);
        assert!(shared.enter("Batch", &id).is_ok());
    }
}
