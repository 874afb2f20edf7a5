//! Status and queue maintenance commands.

use fieldcrypt_core::{EncryptedTypesRegistry, ReconciliationQueue, StoredQueue};
use fieldcrypt_storage::{FileStore, KeyValueStore};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Engine state summary.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// State directory.
    pub path: String,
    /// Record types carrying the blob field.
    pub encrypted_types: BTreeSet<String>,
    /// Registry write counter.
    pub registry_version: u64,
    /// Items waiting in the reconciliation queue, claimed ones included.
    pub pending: usize,
}

impl StatusReport {
    /// Collects the summary from an opened store.
    pub fn collect(path: &Path, store: Arc<dyn KeyValueStore>) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = EncryptedTypesRegistry::new(Arc::clone(&store));
        let queue = StoredQueue::new(store);
        Ok(Self {
            path: path.display().to_string(),
            encrypted_types: registry.get()?,
            registry_version: registry.version()?,
            pending: queue.number_of_items()?,
        })
    }

    fn pending_message(&self) -> String {
        match self.pending {
            1 => "There is one record queued for updating to use the latest field encryption settings."
                .to_string(),
            n => format!("There are {n} records queued for updating to use the latest field encryption settings."),
        }
    }
}

fn open_existing(path: &Path) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No engine state found at {}", path.display()).into());
    }
    Ok(Arc::new(FileStore::open(path)?))
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let report = StatusReport::collect(path, store)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print_text(&report),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("Engine state: {}", report.path);
    println!();
    println!("Encrypted record types (registry version {}):", report.registry_version);
    if report.encrypted_types.is_empty() {
        println!("  (none)");
    }
    for record_type in &report.encrypted_types {
        println!("  {record_type}");
    }
    println!();
    println!("{}", report.pending_message());
}

/// Drops every queued item. Records that were waiting keep their current
/// stored form until they are saved again.
pub fn purge_queue(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err("Refusing to purge the queue without --yes".into());
    }
    let store = open_existing(path)?;
    let queue = StoredQueue::new(store);
    let pending = queue.number_of_items()?;
    queue.delete_queue()?;
    tracing::info!(pending, "reconciliation queue purged");
    println!("Removed {pending} queued items.");
    Ok(())
}
