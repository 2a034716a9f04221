// src/workitem.rs
//
// The operation variants a workqueue is made of. Each variant knows how to
// prepare its preconditions, perform the measured operation and clean up
// after itself.

use anyhow::{bail, Result};
use rand::RngCore;

use crate::s3::ObjectBackend;
use crate::stats::Method;

/// One unit of benchmarked work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// GET of an object uploaded during preparation.
    Read { bucket: String, key: String, size: u64 },
    /// GET of an object that existed before the benchmark; never prepared
    /// and never cleaned.
    ExistingRead { bucket: String, key: String, size: u64 },
    /// PUT with a fresh random body per execution.
    Write { bucket: String, key: String, size: u64 },
    /// Paginated listing of the bucket under the object's key as prefix.
    List { bucket: String, key: String, size: u64 },
    /// DELETE of an object uploaded during preparation.
    Delete { bucket: String, key: String, size: u64 },
    /// Poison pill that stops a parallel client in ops-bounded runs.
    Stopper,
}

/// Byte counts moved by one executed operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transfer {
    pub uploaded: u64,
    pub downloaded: u64,
}

impl WorkItem {
    /// The S3 method label the operation is recorded under, or None for the
    /// stopper.
    pub fn method(&self) -> Option<Method> {
        match self {
            WorkItem::Read { .. } | WorkItem::ExistingRead { .. } => Some(Method::Get),
            WorkItem::Write { .. } => Some(Method::Put),
            WorkItem::List { .. } => Some(Method::List),
            WorkItem::Delete { .. } => Some(Method::Delete),
            WorkItem::Stopper => None,
        }
    }

    pub fn is_stopper(&self) -> bool {
        matches!(self, WorkItem::Stopper)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, WorkItem::Delete { .. })
    }

    /// Establishes whatever the measured operation needs to find: reads,
    /// lists and deletes upload their target object first.
    pub async fn prepare(&self, housekeeping: &dyn ObjectBackend) -> Result<()> {
        match self {
            WorkItem::Read { bucket, key, size }
            | WorkItem::List { bucket, key, size }
            | WorkItem::Delete { bucket, key, size } => {
                housekeeping.put_object(bucket, key, random_body(*size)).await
            }
            WorkItem::ExistingRead { .. } | WorkItem::Write { .. } | WorkItem::Stopper => Ok(()),
        }
    }

    /// Performs the measured operation and reports the bytes moved.
    pub async fn execute(&self, svc: &dyn ObjectBackend) -> Result<Transfer> {
        match self {
            WorkItem::Read { bucket, key, size }
            | WorkItem::ExistingRead { bucket, key, size } => {
                let received = svc.get_object(bucket, key).await?;
                if received != *size {
                    bail!(
                        "expected object length {} is not matched to actual object length {} \
                         for {}/{}",
                        size,
                        received,
                        bucket,
                        key
                    );
                }
                Ok(Transfer {
                    downloaded: received,
                    ..Transfer::default()
                })
            }
            WorkItem::Write { bucket, key, size } => {
                svc.put_object(bucket, key, random_body(*size)).await?;
                Ok(Transfer {
                    uploaded: *size,
                    ..Transfer::default()
                })
            }
            WorkItem::List { bucket, key, .. } => {
                svc.list_objects(bucket, key).await?;
                Ok(Transfer::default())
            }
            WorkItem::Delete { bucket, key, .. } => {
                svc.delete_object(bucket, key).await?;
                Ok(Transfer::default())
            }
            WorkItem::Stopper => Ok(Transfer::default()),
        }
    }

    /// Removes the objects the operation left behind.
    pub async fn clean(&self, housekeeping: &dyn ObjectBackend) -> Result<()> {
        match self {
            WorkItem::Read { bucket, key, .. }
            | WorkItem::Write { bucket, key, .. }
            | WorkItem::List { bucket, key, .. } => housekeeping.delete_object(bucket, key).await,
            WorkItem::ExistingRead { .. } | WorkItem::Delete { .. } | WorkItem::Stopper => Ok(()),
        }
    }
}

/// Fresh random payload; regenerated on every call so repeated writes are
/// independent.
fn random_body(size: u64) -> Vec<u8> {
    let mut body = vec![0u8; size as usize];
    rand::rng().fill_bytes(&mut body);
    body
}
