// src/queue.rs
//
// Builds the per-worker workqueue: an ordered list of work items whose
// operation kinds realise the configured weight ratio.

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::TestCaseConfiguration;
use crate::distribution::evaluate;
use crate::s3::{ObjectBackend, ObjectInfo};
use crate::workitem::WorkItem;

/// The operation kinds a queue can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    ExistingRead,
    Write,
    List,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Read => "read",
            OpKind::ExistingRead => "existing_read",
            OpKind::Write => "write",
            OpKind::List => "list",
            OpKind::Delete => "delete",
        }
    }
}

/// A worker-local workqueue: the materialised item list plus the running
/// progress value per enabled operation kind.
pub struct Workqueue {
    pub items: Vec<WorkItem>,
    operation_values: Vec<(OpKind, f64)>,
}

impl Workqueue {
    /// Seeds one progress entry per enabled weight, in a fixed order that
    /// also serves as the tie-break on equal progress.
    pub fn new(test: &TestCaseConfiguration) -> Self {
        let mut operation_values = Vec::new();
        if test.read_weight > 0 {
            operation_values.push((OpKind::Read, 0.0));
        }
        if test.existing_read_weight > 0 {
            operation_values.push((OpKind::ExistingRead, 0.0));
        }
        if test.write_weight > 0 {
            operation_values.push((OpKind::Write, 0.0));
        }
        if test.list_weight > 0 {
            operation_values.push((OpKind::List, 0.0));
        }
        if test.delete_weight > 0 {
            operation_values.push((OpKind::Delete, 0.0));
        }
        Workqueue {
            items: Vec::new(),
            operation_values,
        }
    }

    /// The kind with the lowest accumulated progress; the first-seeded kind
    /// wins ties.
    pub fn next_operation(&self) -> Option<OpKind> {
        let mut best: Option<(OpKind, f64)> = None;
        for &(kind, value) in &self.operation_values {
            match best {
                Some((_, lowest)) if value >= lowest => {}
                _ => best = Some((kind, value)),
            }
        }
        best.map(|(kind, _)| kind)
    }

    fn increase_operation_value(&mut self, operation: OpKind, weight: u64) {
        for (kind, value) in &mut self.operation_values {
            if *kind == operation {
                *value += 1.0 / weight as f64;
                return;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Bucket name for the given index. Workers prefix their ID unless the test
/// shares buckets across the fleet.
pub fn bucket_name(prefix: &str, worker_id: &str, index: u64, shared: bool) -> String {
    if shared {
        format!("{prefix}{index}")
    } else {
        format!("{worker_id}{prefix}{index}")
    }
}

// Accumulators for the sequential distributions, one per configurable field.
#[derive(Default)]
struct DistState {
    buckets_last: u64,
    number_last: u64,
    size_last: u64,
}

/// Materialises the workqueue for one worker: creates the buckets, discovers
/// preexisting objects where needed and appends one item per planned object,
/// choosing each item's kind so the weight ratios are realised.
pub async fn fill_workqueue(
    test: &TestCaseConfiguration,
    housekeeping: &dyn ObjectBackend,
    worker_id: &str,
    share_bucket_name: bool,
) -> Result<Workqueue> {
    let mut queue = Workqueue::new(test);
    let mut state = DistState::default();

    let bucket_count = evaluate(
        test.buckets.number_min,
        test.buckets.number_max,
        &mut state.buckets_last,
        1,
        test.buckets.number_distribution,
    );
    for bucket in 0..bucket_count {
        let bucket_name = bucket_name(&test.bucket_prefix, worker_id, bucket, share_bucket_name);
        if let Err(err) = housekeeping.create_bucket(&bucket_name).await {
            warn!(bucket = %bucket_name, "error when creating bucket: {err:#}");
        }

        let mut preexisting: Vec<ObjectInfo> = Vec::new();
        if test.existing_read_weight > 0 {
            match housekeeping.list_objects(&bucket_name, "").await {
                Ok(contents) if contents.is_empty() => {
                    warn!(bucket = %bucket_name, "no preexisting objects found - skipping bucket");
                    continue;
                }
                Ok(contents) => {
                    debug!(bucket = %bucket_name, "found {} preexisting objects", contents.len());
                    preexisting = contents;
                }
                Err(err) => {
                    warn!(bucket = %bucket_name, "could not list bucket contents - skipping bucket: {err:#}");
                    continue;
                }
            }
        }

        let object_count = evaluate(
            test.objects.number_min,
            test.objects.number_max,
            &mut state.number_last,
            1,
            test.objects.number_distribution,
        );
        for object in 0..object_count {
            let object_size = evaluate(
                test.objects.size_min,
                test.objects.size_max,
                &mut state.size_last,
                1,
                test.objects.size_distribution,
            );
            let Some(next_operation) = queue.next_operation() else {
                break;
            };
            let key = format!("{worker_id}{}{object}", test.object_prefix);
            let item = match next_operation {
                OpKind::Read => {
                    queue.increase_operation_value(next_operation, test.read_weight);
                    WorkItem::Read {
                        bucket: bucket_name.clone(),
                        key,
                        size: object_size,
                    }
                }
                OpKind::ExistingRead => {
                    queue.increase_operation_value(next_operation, test.existing_read_weight);
                    let found = &preexisting[object as usize % preexisting.len()];
                    WorkItem::ExistingRead {
                        bucket: bucket_name.clone(),
                        key: found.key.clone(),
                        size: found.size,
                    }
                }
                OpKind::Write => {
                    queue.increase_operation_value(next_operation, test.write_weight);
                    WorkItem::Write {
                        bucket: bucket_name.clone(),
                        key,
                        size: object_size,
                    }
                }
                OpKind::List => {
                    queue.increase_operation_value(next_operation, test.list_weight);
                    WorkItem::List {
                        bucket: bucket_name.clone(),
                        key,
                        size: object_size,
                    }
                }
                OpKind::Delete => {
                    queue.increase_operation_value(next_operation, test.delete_weight);
                    WorkItem::Delete {
                        bucket: bucket_name.clone(),
                        key,
                        size: object_size,
                    }
                }
            };
            queue.items.push(item);
        }
    }
    debug!(worker = worker_id, "workqueue holds {} items", queue.len());
    Ok(queue)
}
