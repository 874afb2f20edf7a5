//! Queue draining, failure handling and cleanup.

use fieldcrypt_core::queue::{BatchContext, ClaimedItem, CANNOT_CLAIM};
use fieldcrypt_core::{PropertyMap, ReconciliationQueue, RecordStorage, SchemaManager};
use fieldcrypt_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn host_with_secrets(count: usize) -> (TestHost, Vec<RecordId>) {
    let host = TestHost::new();
    host.encrypt_field("page", "field_secret", &["value"]);
    let ids = (0..count)
        .map(|n| {
            let mut record = Record::new("page", "en").with_field("field_secret", vec![item("value", format!("secret {n}"))]);
            host.save(&mut record);
            record.id.unwrap()
        })
        .collect();
    (host, ids)
}

fn disable_secret(host: &TestHost) -> usize {
    host.manager
        .decrypt_field("page", "field_secret", false)
        .unwrap()
        .queued
}

/// During the next save, lets the lease of the item being processed run out
/// and claims it again, the way a second worker would.
fn take_over_first_claim(host: &TestHost) -> Arc<Mutex<Option<ClaimedItem>>> {
    let queue = Arc::clone(&host.queue);
    let clock = Arc::clone(&host.clock);
    let lease = host.config.read().claim_lease();
    let taken = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&taken);
    host.storage.on_save(move |_| {
        let mut slot = slot.lock();
        if slot.is_none() {
            clock.advance(lease + Duration::from_secs(1));
            *slot = queue.claim_item(lease).unwrap();
        }
    });
    taken
}

#[test]
fn status_messages() {
    let (host, _) = host_with_secrets(2);
    let status = host.runner.status().unwrap();
    assert_eq!(status.pending, 0);

    disable_secret(&host);
    let status = host.runner.status().unwrap();
    assert_eq!(status.pending, 2);
    assert_eq!(
        status.message,
        "There are 2 records queued for updating to use the latest field encryption settings."
    );

    let (host, _) = host_with_secrets(1);
    disable_secret(&host);
    assert_eq!(
        host.runner.status().unwrap().message,
        "There is one record queued for updating to use the latest field encryption settings."
    );
}

#[test]
fn passes_report_fractional_progress() {
    let (host, ids) = host_with_secrets(5);
    host.config.write().batch_size = 2;
    assert_eq!(disable_secret(&host), 5);

    let mut context = BatchContext::new();
    host.runner.process_updates(&mut context).unwrap();
    assert_eq!(context.max, Some(5));
    assert!((context.finished - 0.4).abs() < f64::EPSILON);
    assert_eq!(
        context.message.as_deref(),
        Some("Updating Page with ID 2 to use the latest field encryption settings")
    );

    host.runner.process_updates(&mut context).unwrap();
    assert!((context.finished - 0.8).abs() < f64::EPSILON);
    host.runner.process_updates(&mut context).unwrap();
    assert!(context.is_finished());
    assert_eq!(context.results.items.len(), 5);

    // Cleanup waits for the finish callback.
    assert!(host.schema.blob_field_installed("page"));
    let report = host.runner.finish_batch(true, &context.results).unwrap();
    assert_eq!(report.messages, vec!["5 records updated.".to_string()]);
    assert!(!host.schema.blob_field_installed("page"));

    for (n, id) in ids.iter().enumerate() {
        assert_eq!(
            host.stored("page", id).property("field_secret", 0, "value"),
            Some(&Value::from(format!("secret {n}")))
        );
    }
}

#[test]
fn transient_failures_are_retried() {
    let (host, ids) = host_with_secrets(1);
    disable_secret(&host);
    host.storage.inject_failures([InjectedFailure::Transient]);

    let report = host.run_queue();
    assert!(report.errors.is_empty());
    assert_eq!(report.messages, vec!["One record updated.".to_string()]);
    assert_eq!(
        host.stored("page", &ids[0]).property("field_secret", 0, "value"),
        Some(&Value::from("secret 0"))
    );
}

#[test]
fn permanent_failures_are_reported_and_block_cleanup() {
    let (host, _) = host_with_secrets(1);
    disable_secret(&host);
    host.storage.inject_failures([InjectedFailure::Permanent]);

    let report = host.run_queue();
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].contains("record storage rejected the write"));
    assert_eq!(report.errors[1], CANNOT_CLAIM);
    assert!(report.cleanup.is_none());

    // The claimed item still counts, so the blob field stays.
    assert_eq!(host.queue.number_of_items().unwrap(), 1);
    let plan = host.state.cleanup().unwrap();
    assert!(plan.deferred.contains("page"));
    assert!(host.schema.blob_field_installed("page"));
}

#[test]
fn vanished_records_count_as_converged() {
    let (host, ids) = host_with_secrets(2);
    disable_secret(&host);
    assert!(host.storage.delete("page", &ids[0]));

    let report = host.run_queue();
    assert!(report.errors.is_empty());
    assert_eq!(report.messages, vec!["2 records updated.".to_string()]);
}

#[test]
fn vanished_record_types_count_as_converged() {
    let (host, _) = host_with_secrets(1);
    disable_secret(&host);
    host.record_types.remove("page");

    let report = host.run_queue();
    assert!(report.errors.is_empty());
    assert_eq!(host.queue.number_of_items().unwrap(), 0);
}

#[test]
fn cron_drains_then_cleans_up() {
    let (host, ids) = host_with_secrets(3);
    disable_secret(&host);

    let report = host.runner.cron(Duration::from_secs(15)).unwrap();
    assert_eq!(report.processed, 3);
    assert!(!report.suspended);
    assert!(report.cleanup.uninstall.contains("page"));
    assert!(host.storage.load("page", &ids[2]).unwrap().is_some());
    assert!(!host.registry.contains("page").unwrap());
}

#[test]
fn cron_stops_on_retryable_error() {
    let (host, _) = host_with_secrets(2);
    disable_secret(&host);
    host.storage.inject_failures([InjectedFailure::Transient]);

    let report = host.runner.cron(Duration::from_secs(15)).unwrap();
    assert!(report.suspended);
    assert_eq!(report.processed, 0);
    assert!(report.cleanup.deferred.contains("page"));
    assert_eq!(host.queue.number_of_items().unwrap(), 2);
}

#[test]
fn lost_claim_is_reported_and_the_pass_continues() {
    let (host, ids) = host_with_secrets(3);
    disable_secret(&host);
    let taken = take_over_first_claim(&host);

    let mut context = BatchContext::new();
    host.runner.process_updates(&mut context).unwrap();

    assert_eq!(context.results.errors.len(), 1);
    assert!(context.results.errors[0].contains("is no longer held"));
    assert_eq!(context.results.items.len(), 3);
    assert!(context.is_finished());
    for (n, id) in ids.iter().enumerate() {
        assert_eq!(
            host.stored("page", id).property("field_secret", 0, "value"),
            Some(&Value::from(format!("secret {n}")))
        );
    }

    // The other worker still holds the item and settles it.
    assert_eq!(host.queue.number_of_items().unwrap(), 1);
    let other = taken.lock().take().unwrap();
    assert_eq!(other.data.record_id, ids[0]);
    host.queue.delete_item(&other).unwrap();
    assert_eq!(host.queue.number_of_items().unwrap(), 0);
}

#[test]
fn lost_claim_on_release_is_reported() {
    let (host, _) = host_with_secrets(2);
    disable_secret(&host);
    let taken = take_over_first_claim(&host);
    host.storage.inject_failures([InjectedFailure::Transient]);

    let mut context = BatchContext::new();
    host.runner.process_updates(&mut context).unwrap();

    assert_eq!(context.results.errors.len(), 1);
    assert!(context.results.errors[0].contains("is no longer held"));
    assert_eq!(context.results.items.len(), 1);
    assert!(taken.lock().is_some());
}

#[test]
fn cron_counts_lost_claims_and_keeps_going() {
    let (host, _) = host_with_secrets(3);
    disable_secret(&host);
    let taken = take_over_first_claim(&host);

    let report = host.runner.cron(Duration::from_secs(15)).unwrap();
    assert_eq!(report.lost_claims, 1);
    assert_eq!(report.processed, 2);
    assert!(!report.suspended);
    assert!(report.cleanup.deferred.contains("page"));

    let other = taken.lock().take().unwrap();
    host.queue.delete_item(&other).unwrap();
    let plan = host.state.cleanup().unwrap();
    assert!(plan.uninstall.contains("page"));
}

#[test]
fn every_revision_is_reconciled() {
    let host = TestHost::new();
    host.encrypt_field("article", "field_secret", &["value"]);

    let mut record = Record::new("article", "en").with_field("field_secret", vec![item("value", "first")]);
    host.save(&mut record);
    let id = record.id.clone().unwrap();

    record.new_revision = true;
    record
        .translation_mut("en")
        .fields
        .insert("field_secret".to_string(), vec![item("value", "second")]);
    host.save(&mut record);

    let revisions = host.storage.revision_ids("article", &id);
    assert_eq!(revisions.len(), 2);

    let outcome = host.manager.decrypt_field("article", "field_secret", false).unwrap();
    assert_eq!(outcome.queued, 2);
    host.run_queue();

    let first = host.storage.stored_revision("article", &revisions[0]).unwrap();
    let second = host.storage.stored_revision("article", &revisions[1]).unwrap();
    assert_eq!(first.property("field_secret", 0, "value"), Some(&Value::from("first")));
    assert_eq!(second.property("field_secret", 0, "value"), Some(&Value::from("second")));
    assert_eq!(host.storage.revision_ids("article", &id).len(), 2);
}

#[test]
fn changed_properties_are_reconciled() {
    let host = TestHost::new();
    host.encrypt_field("article", "body", &["value"]);
    let mut body = PropertyMap::new();
    body.insert("value".to_string(), Value::from("Long text"));
    body.insert("summary".to_string(), Value::from("Short"));
    let mut record = Record::new("article", "en").with_field("body", vec![body]);
    host.save(&mut record);
    let id = record.id.clone().unwrap();

    host.encrypt_field("article", "body", &["summary"]);
    host.run_queue();

    let stored = host.stored("article", &id);
    assert_eq!(stored.property("body", 0, "value"), Some(&Value::from("Long text")));
    assert_eq!(stored.property("body", 0, "summary"), Some(&Value::from(ENCRYPTED_VALUE)));
    let loaded = host.load("article", &id);
    assert_eq!(loaded.property("body", 0, "summary"), Some(&Value::from("Short")));
}
