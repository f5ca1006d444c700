//! Structured observability hooks for deployment and watcher events.
//!
//! This module provides:
//! - Region- and watch-scoped spans (`region_span`, `watch_span`) for async
//!   work, plus the `RegionSpan` RAII guard for synchronous sections
//! - Emission functions for stack, bucket, region, watch and layer events
//!
//! Events are emitted at `info!` level unless noted (filter via
//! `ACCRETION_LOG`).

use accretion_state::{StackId, StackSlot};
use tracing::{info, warn, Span};

/// Span for all work done in one region.
pub fn region_span(operation: &str, region: &str) -> Span {
    tracing::info_span!("accretion.region", operation = %operation, region = %region)
}

/// Span for one watch instance, tagged with the triggering key.
pub fn watch_span(region: &str, key: &str) -> Span {
    tracing::info_span!("accretion.watch", region = %region, key = %key)
}

/// RAII guard that enters a region span on the current thread.
///
/// Not `Send`; async workers attach [`region_span`] with `Instrument`
/// instead.
pub struct RegionSpan {
    _span: tracing::span::EnteredSpan,
}

impl RegionSpan {
    pub fn enter(operation: &str, region: &str) -> Self {
        Self {
            _span: region_span(operation, region).entered(),
        }
    }
}

pub fn emit_stack_created(region: &str, slot: Option<StackSlot>, stack_id: &StackId) {
    info!(
        event = "stack.created",
        region = %region,
        slot = ?slot,
        stack_id = %stack_id,
    );
}

pub fn emit_stack_updated(region: &str, slot: Option<StackSlot>, stack_id: &StackId) {
    info!(
        event = "stack.updated",
        region = %region,
        slot = ?slot,
        stack_id = %stack_id,
    );
}

/// The control plane found nothing to change.
pub fn emit_stack_unchanged(region: &str, slot: Option<StackSlot>, stack_id: &StackId) {
    info!(
        event = "stack.unchanged",
        region = %region,
        slot = ?slot,
        stack_id = %stack_id,
    );
}

pub fn emit_stack_destroyed(region: &str, stack_id: &StackId) {
    info!(event = "stack.destroyed", region = %region, stack_id = %stack_id);
}

/// Emit event: bucket emptied, with versions deleted and listing passes.
pub fn emit_bucket_emptied(region: &str, bucket: &str, deleted: usize, passes: u32) {
    info!(
        event = "bucket.emptied",
        region = %region,
        bucket = %bucket,
        deleted = deleted,
        passes = passes,
    );
}

/// Emit event: region skipped because a prerequisite slot is unset (warning level).
pub fn emit_region_skipped(operation: &str, region: &str, reason: &str) {
    warn!(
        event = "region.skipped",
        operation = %operation,
        region = %region,
        reason = %reason,
    );
}

/// Emit event: region operation failed (warning level).
pub fn emit_region_failed(operation: &str, region: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "region.failed",
        operation = %operation,
        region = %region,
        error = %error,
    );
}

pub fn emit_watch_transition(key: &str, from: &str, to: &str, attempt: u32) {
    info!(
        event = "watch.transition",
        key = %key,
        from = %from,
        to = %to,
        attempt = attempt,
    );
}

pub fn emit_layer_published(region: &str, layer_arn: &str, version: u64) {
    info!(
        event = "layer.published",
        region = %region,
        layer = %layer_arn,
        version = version,
    );
}

/// Emit event: a layer manifest for this artifact already exists (warning
/// level when a publish had already happened).
pub fn emit_layer_duplicate_detected(region: &str, manifest_key: &str, after_publish: bool) {
    if after_publish {
        warn!(
            event = "layer.duplicate_detected",
            region = %region,
            manifest = %manifest_key,
            after_publish = true,
        );
    } else {
        info!(
            event = "layer.duplicate_detected",
            region = %region,
            manifest = %manifest_key,
            after_publish = false,
        );
    }
}
