use crate::domain::payment::{Payment, PaymentId, PaymentState};
use crate::domain::ports::{PaymentStore, Transition};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Options, TransactionDB, TransactionDBOptions,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping external references to payment ids.
pub const CF_REFERENCES: &str = "references";

/// A persistent payment store on a RocksDB `TransactionDB`.
///
/// Writes go through pessimistic transactions: `get_for_update` takes a
/// per-key lock that is held until commit, so the reference uniqueness check
/// and the conditional transition are both atomic read-check-write sequences
/// that lock only the keys they touch.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<TransactionDB>`).
#[derive(Clone)]
pub struct RocksDbPaymentStore {
    db: Arc<TransactionDB>,
}

impl RocksDbPaymentStore {
    /// Opens or creates a database at `path` with the required column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let cf_references = ColumnFamilyDescriptor::new(CF_REFERENCES, Options::default());

        let db = TransactionDB::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            vec![cf_payments, cf_references],
        )?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::StorageError(format!("Column family '{name}' not found")))
    }

    fn load(&self, id: PaymentId) -> Result<Payment> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, id.as_uuid().as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(PaymentError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl PaymentStore for RocksDbPaymentStore {
    async fn create(&self, payment: Payment) -> Result<()> {
        let payments = self.cf(CF_PAYMENTS)?;
        let references = self.cf(CF_REFERENCES)?;
        let key = payment.id.as_uuid().into_bytes();
        let value = serde_json::to_vec(&payment)?;

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(references, payment.reference.as_bytes(), true)?
            .is_some()
        {
            return Err(PaymentError::AlreadyExists(payment.reference));
        }
        if txn.get_for_update_cf(payments, key, true)?.is_some() {
            return Err(PaymentError::AlreadyExists(payment.id.to_string()));
        }
        txn.put_cf(references, payment.reference.as_bytes(), key)?;
        txn.put_cf(payments, key, value)?;
        txn.commit()?;

        Ok(())
    }

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment> {
        self.load(id)
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Payment> {
        let references = self.cf(CF_REFERENCES)?;
        let id_bytes = self
            .db
            .get_cf(references, reference.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(reference.to_string()))?;
        let uuid = uuid::Uuid::from_slice(&id_bytes).map_err(|e| {
            PaymentError::StorageError(format!("Corrupt reference index for '{reference}': {e}"))
        })?;
        self.load(PaymentId::from(uuid))
    }

    async fn conditional_transition(
        &self,
        id: PaymentId,
        from: PaymentState,
        to: PaymentState,
    ) -> Result<Transition> {
        let payments = self.cf(CF_PAYMENTS)?;
        let key = id.as_uuid().into_bytes();

        let txn = self.db.transaction();
        let bytes = txn
            .get_for_update_cf(payments, key, true)?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        let mut payment: Payment = serde_json::from_slice(&bytes)?;

        if !payment.transition(from, to, Utc::now()) {
            debug!(payment_id = %id, current = %payment.state, "Transition not applied");
            txn.rollback()?;
            return Ok(Transition {
                applied: false,
                state: payment.state,
            });
        }

        txn.put_cf(payments, key, serde_json::to_vec(&payment)?)?;
        txn.commit()?;

        Ok(Transition {
            applied: true,
            state: payment.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Amount, Currency, NewPayment};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn pending(reference: &str) -> Payment {
        let request = NewPayment::new(Amount::new(dec!(100.0)).unwrap(), Currency::Etb, reference)
            .with_bank_code("AWASH");
        Payment::pending(request, Utc::now())
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDbPaymentStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_PAYMENTS).is_some());
        assert!(store.db.cf_handle(CF_REFERENCES).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_create_and_read() {
        let dir = tempdir().unwrap();
        let store = RocksDbPaymentStore::open(dir.path()).unwrap();
        let payment = pending("REF-0001");

        store.create(payment.clone()).await.unwrap();
        assert_eq!(store.get_by_id(payment.id).await.unwrap(), payment);
        assert_eq!(store.get_by_reference("REF-0001").await.unwrap(), payment);

        assert!(matches!(
            store.create(pending("REF-0001")).await,
            Err(PaymentError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get_by_id(PaymentId::generate()).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_conditional_transition() {
        let dir = tempdir().unwrap();
        let store = RocksDbPaymentStore::open(dir.path()).unwrap();
        let payment = pending("REF-0001");
        store.create(payment.clone()).await.unwrap();

        let first = store
            .conditional_transition(payment.id, PaymentState::Pending, PaymentState::SettledSuccess)
            .await
            .unwrap();
        assert!(first.applied);

        let second = store
            .conditional_transition(payment.id, PaymentState::Pending, PaymentState::SettledFailed)
            .await
            .unwrap();
        assert_eq!(
            second,
            Transition {
                applied: false,
                state: PaymentState::SettledSuccess
            }
        );
    }

    #[tokio::test]
    async fn test_rocksdb_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let payment = pending("REF-0001");
        {
            let store = RocksDbPaymentStore::open(dir.path()).unwrap();
            store.create(payment.clone()).await.unwrap();
            store
                .conditional_transition(
                    payment.id,
                    PaymentState::Pending,
                    PaymentState::SettledFailed,
                )
                .await
                .unwrap();
        }

        let store = RocksDbPaymentStore::open(dir.path()).unwrap();
        let stored = store.get_by_reference("REF-0001").await.unwrap();
        assert_eq!(stored.id, payment.id);
        assert_eq!(stored.state, PaymentState::SettledFailed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rocksdb_competing_transitions_first_wins() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RocksDbPaymentStore::open(dir.path()).unwrap());
        let payment = pending("REF-0001");
        store.create(payment.clone()).await.unwrap();
        let id = payment.id;

        let racers: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let to = if i % 2 == 0 {
                    PaymentState::SettledSuccess
                } else {
                    PaymentState::SettledFailed
                };
                tokio::spawn(async move {
                    let result = store
                        .conditional_transition(id, PaymentState::Pending, to)
                        .await;
                    (to, result)
                })
            })
            .collect();

        let mut winners = Vec::new();
        let mut busy = 0;
        for racer in racers {
            match racer.await.unwrap() {
                (to, Ok(Transition { applied: true, .. })) => winners.push(to),
                (_, Ok(Transition { applied: false, state })) => assert!(state.is_terminal()),
                (_, Err(e)) => {
                    assert!(e.is_transient(), "unexpected error: {e}");
                    busy += 1;
                }
            }
        }

        let stored = store.get_by_id(id).await.unwrap();
        if busy == 0 {
            assert_eq!(winners.len(), 1);
        }
        assert!(winners.len() <= 1);
        if let Some(winner) = winners.first() {
            assert_eq!(stored.state, *winner);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rocksdb_concurrent_duplicate_reference() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RocksDbPaymentStore::open(dir.path()).unwrap());

        let creators: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create(pending("REF-0001")).await })
            })
            .collect();

        let mut created = 0;
        let mut busy = 0;
        for creator in creators {
            match creator.await.unwrap() {
                Ok(()) => created += 1,
                Err(PaymentError::AlreadyExists(reference)) => assert_eq!(reference, "REF-0001"),
                Err(e) => {
                    assert!(e.is_transient(), "unexpected error: {e}");
                    busy += 1;
                }
            }
        }

        if busy == 0 {
            assert_eq!(created, 1);
        }
        assert!(created <= 1);
        if created == 1 {
            assert!(store.get_by_reference("REF-0001").await.is_ok());
        }
    }
}
