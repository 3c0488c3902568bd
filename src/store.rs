//! sled-backed persistence for agreements, processes and routes
//!
//! Every entity is CBOR encoded and kept in the default tree under a typed key
//! prefix. Writes are staged in a [`UnitOfWork`] and applied as a single
//! batch, so an operation is either fully stored or not at all.
//!
//! A unit of work also carries the bytes its documents were read from. The
//! batch is applied inside a sled transaction that first compares those
//! bytes against the tree, so two writers (even two services sharing one
//! `Db`) that both read the same version cannot both commit.
use crate::agreement::Agreement;
use crate::error::StoreError;
use crate::process::AgreementProcess;
use crate::route::RouteRef;
use crate::types::RecordRef;
use sled::transaction::{ConflictableTransactionResult, TransactionError, abort};
use sled::{Batch, IVec};
use std::ops::Deref;
use std::sync::Arc;

const AGREEMENT_PREFIX: &str = "agreement/";
const PROCESS_PREFIX: &str = "process/";
const ROUTE_PREFIX: &str = "route/";
const RECORD_PREFIX: &str = "record/";

fn agreement_key(id: &str) -> String {
    format!("{AGREEMENT_PREFIX}{id}")
}
fn process_key(id: &str) -> String {
    format!("{PROCESS_PREFIX}{id}")
}
fn route_key(id: &str) -> String {
    format!("{ROUTE_PREFIX}{id}")
}
fn record_key(record: &RecordRef) -> String {
    format!("{RECORD_PREFIX}{}/{}", record.model, record.id)
}

fn encode<T: minicbor::Encode<()>>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|err| StoreError::Encode {
        key: key.to_string(),
        message: err.to_string(),
    })
}

fn decode<T>(key: &str, bytes: &[u8]) -> Result<T, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct AgreementStore {
    instance: Arc<sled::Db>,
    flush_on_commit: bool,
}

/// A decoded document together with the version it was read at.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    value: T,
    key: String,
    raw: IVec,
}

impl<T> Loaded<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Loaded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Writes staged by one operation, and the versions they were based on.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    batch: Batch,
    writes: usize,
    expected: Vec<(String, Option<IVec>)>,
}

impl UnitOfWork {
    /// Commit only if `loaded` is still the stored version.
    pub fn expect_unchanged<T>(&mut self, loaded: &Loaded<T>) {
        self.expected
            .push((loaded.key.clone(), Some(loaded.raw.clone())));
    }
    /// Commit only if no agreement has been created for `record` meanwhile.
    pub fn expect_no_agreement(&mut self, record: &RecordRef) {
        self.expected.push((record_key(record), None));
    }
    pub fn put_agreement(&mut self, agreement: &Agreement) -> Result<(), StoreError> {
        let key = agreement_key(&agreement.id);
        let value = encode(&key, agreement)?;
        self.batch.insert(key.as_bytes(), value);
        // the record index always follows the agreement it points at
        self.batch
            .insert(record_key(&agreement.related_record).as_bytes(), agreement.id.as_bytes());
        self.writes += 1;
        Ok(())
    }
    pub fn put_process(&mut self, process: &AgreementProcess) -> Result<(), StoreError> {
        let key = process_key(&process.id);
        let value = encode(&key, process)?;
        self.batch.insert(key.as_bytes(), value);
        self.writes += 1;
        Ok(())
    }
    pub fn put_route(&mut self, route: &RouteRef) -> Result<(), StoreError> {
        let key = route_key(&route.id);
        let value = encode(&key, route)?;
        self.batch.insert(key.as_bytes(), value);
        self.writes += 1;
        Ok(())
    }
    /// Removing the process document removes its steps, tasks and record
    /// agreements with it.
    pub fn remove_process(&mut self, process_id: &str) {
        self.batch.remove(process_key(process_id).as_bytes());
        self.writes += 1;
    }
    pub fn is_empty(&self) -> bool {
        self.writes == 0
    }
}

impl AgreementStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self {
            instance,
            flush_on_commit: false,
        }
    }
    pub fn set_flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }

    fn load<T>(&self, key: String) -> Result<Option<Loaded<T>>, StoreError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.instance.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Loaded {
                value: decode(&key, &raw)?,
                key,
                raw,
            })),
            None => Ok(None),
        }
    }

    fn get<T>(&self, key: String) -> Result<Option<T>, StoreError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        Ok(self.load(key)?.map(Loaded::into_inner))
    }

    pub fn agreement(&self, id: &str) -> Result<Option<Agreement>, StoreError> {
        self.get(agreement_key(id))
    }

    pub fn load_agreement(&self, id: &str) -> Result<Option<Loaded<Agreement>>, StoreError> {
        self.load(agreement_key(id))
    }

    /// The agreement attached to a business record, if one was ever created.
    pub fn load_agreement_for(
        &self,
        record: &RecordRef,
    ) -> Result<Option<Loaded<Agreement>>, StoreError> {
        match self.instance.get(record_key(record).as_bytes())? {
            Some(id) => self.load_agreement(&String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn agreement_for(&self, record: &RecordRef) -> Result<Option<Agreement>, StoreError> {
        Ok(self.load_agreement_for(record)?.map(Loaded::into_inner))
    }

    pub fn process(&self, id: &str) -> Result<Option<AgreementProcess>, StoreError> {
        self.get(process_key(id))
    }

    pub fn load_process(&self, id: &str) -> Result<Option<Loaded<AgreementProcess>>, StoreError> {
        self.load(process_key(id))
    }

    pub fn route(&self, id: &str) -> Result<Option<RouteRef>, StoreError> {
        self.get(route_key(id))
    }

    pub fn routes(&self) -> Result<Vec<RouteRef>, StoreError> {
        let mut routes = vec![];
        for entry in self.instance.scan_prefix(ROUTE_PREFIX.as_bytes()) {
            let (key, value) = entry?;
            routes.push(decode(&String::from_utf8_lossy(&key), &value)?);
        }
        Ok(routes)
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::default()
    }

    /// Fails with [`StoreError::Stale`] if a document the work was based on
    /// has been changed by another writer. Nothing is written.
    pub fn verify(&self, work: &UnitOfWork) -> Result<(), StoreError> {
        for (key, raw) in &work.expected {
            if self.instance.get(key.as_bytes())? != *raw {
                return Err(StoreError::Stale { key: key.clone() });
            }
        }
        Ok(())
    }

    pub fn commit(&self, work: UnitOfWork) -> Result<(), StoreError> {
        if work.is_empty() {
            return Ok(());
        }
        log::debug!(
            "committing {} staged write(s) against {} read(s)",
            work.writes,
            work.expected.len()
        );
        let UnitOfWork {
            batch, expected, ..
        } = work;
        self.instance
            .transaction(|tx| -> ConflictableTransactionResult<(), StoreError> {
                for (key, raw) in &expected {
                    if tx.get(key.as_bytes())? != *raw {
                        return abort(StoreError::Stale { key: key.clone() });
                    }
                }
                tx.apply_batch(&batch)?;
                Ok(())
            })
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => StoreError::Sled(err),
            })?;
        if self.flush_on_commit {
            self.instance.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn store() -> AgreementStore {
        AgreementStore::new(Arc::new(StoreConfig::temporary().open().unwrap()))
    }

    #[test]
    fn agreement_is_indexed_by_record() {
        let store = store();
        let record = RecordRef::new("payment.request", "12");
        let agreement = Agreement::new(record.clone(), Some("lines".into())).unwrap();

        let mut work = store.begin();
        work.put_agreement(&agreement).unwrap();
        store.commit(work).unwrap();

        assert_eq!(store.agreement_for(&record).unwrap(), Some(agreement));
        assert_eq!(
            store.agreement_for(&RecordRef::new("payment.request", "13")).unwrap(),
            None
        );
    }

    #[test]
    fn uncommitted_work_is_not_visible() {
        let store = store();
        let process = AgreementProcess::new("agr_x".into()).unwrap();

        let mut work = store.begin();
        work.put_process(&process).unwrap();
        drop(work);

        assert_eq!(store.process(&process.id).unwrap(), None);
    }

    #[test]
    fn removed_process_is_gone() {
        let store = store();
        let process = AgreementProcess::new("agr_x".into()).unwrap();

        let mut work = store.begin();
        work.put_process(&process).unwrap();
        store.commit(work).unwrap();
        assert_eq!(store.process(&process.id).unwrap(), Some(process.clone()));

        let mut work = store.begin();
        work.remove_process(&process.id);
        store.commit(work).unwrap();
        assert_eq!(store.process(&process.id).unwrap(), None);
    }

    #[test]
    fn routes_are_listed() {
        let store = store();
        let route = RouteRef::new("default", true, vec![(1, vec!["alice".into()])]).unwrap();

        let mut work = store.begin();
        work.put_route(&route).unwrap();
        store.commit(work).unwrap();

        assert_eq!(store.routes().unwrap(), vec![route]);
    }

    #[test]
    fn stale_process_is_not_committed() {
        let store = store();
        let process = AgreementProcess::new("agr_x".into()).unwrap();
        let mut work = store.begin();
        work.put_process(&process).unwrap();
        store.commit(work).unwrap();

        let first = store.load_process(&process.id).unwrap().unwrap();
        let second = store.load_process(&process.id).unwrap().unwrap();

        let mut work = store.begin();
        work.expect_unchanged(&first);
        let mut updated = first.clone().into_inner();
        updated.current_step = 1;
        work.put_process(&updated).unwrap();
        store.commit(work).unwrap();

        let mut work = store.begin();
        work.expect_unchanged(&second);
        let mut lost = second.clone().into_inner();
        lost.current_step = 7;
        work.put_process(&lost).unwrap();
        assert!(matches!(store.verify(&work), Err(StoreError::Stale { .. })));
        let err = store.commit(work).unwrap_err();
        assert!(matches!(err, StoreError::Stale { .. }));

        assert_eq!(store.process(&process.id).unwrap().unwrap().current_step, 1);
    }

    #[test]
    fn second_agreement_for_a_record_is_rejected() {
        let store = store();
        let record = RecordRef::new("payment.request", "14");
        let first = Agreement::new(record.clone(), None).unwrap();
        let second = Agreement::new(record.clone(), None).unwrap();

        let mut work = store.begin();
        work.expect_no_agreement(&record);
        work.put_agreement(&first).unwrap();
        store.commit(work).unwrap();

        let mut work = store.begin();
        work.expect_no_agreement(&record);
        work.put_agreement(&second).unwrap();
        assert!(matches!(store.commit(work), Err(StoreError::Stale { .. })));

        assert_eq!(store.agreement_for(&record).unwrap(), Some(first));
    }
}
