//! Headless tag field controller.
//!
//! A [`TagField`] owns one field instance on one host document: its
//! selection, the option groups filled by its feeds, and the coordinator
//! that decides when the selection is reconciled against the canonical
//! documents. It is driven by one task through `&mut self` methods; feeds
//! and sweeps run elsewhere and report back over channels, which
//! [`TagField::process_next`] drains.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use tagsync_core::defaults;
use tagsync_core::logging::{component, subsystem};
use tagsync_core::path::get_in;
use tagsync_core::{
    create_reference_document, default_check_valid, document_id, document_to_tag, is_dangling,
    prepare_tags, reconcile, revert_tags, ConfigAdvisory, CreationHook, DocumentQuery,
    DocumentStore, Error, FieldConfig, PathsHook, Patch, RawTag, RefinedTag, Result,
    SchemaRegistry, TagPaths, Tags, Transaction,
};
use tagsync_jobs::{JobStatus, SchedulerEvent, SchedulerHandle, SweepRequest};

use crate::coordinator::{Coordinator, CoordinatorState};
use crate::feeds::{spawn_feed, FeedHandle, FeedKind, FeedSource, FeedUpdate};

const FEED_CHANNEL_CAPACITY: usize = 32;

/// Where a field instance lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldContext {
    pub document_id: String,
    pub document_type: String,
    /// Dotted path of the field on the host document.
    pub field_path: String,
}

impl FieldContext {
    pub fn new(
        document_id: impl Into<String>,
        document_type: impl Into<String>,
        field_path: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            document_type: document_type.into(),
            field_path: field_path.into(),
        }
    }
}

/// Validity predicate for new free-text options: input, then every current
/// option and selected tag.
pub type CheckValid = Arc<dyn Fn(&str, &[RefinedTag]) -> bool + Send + Sync>;

/// Caller-supplied hooks. Unset hooks fall back to the input text at both
/// the label and value paths.
#[derive(Clone, Default)]
pub struct FieldHooks {
    pub on_create: Option<Arc<dyn CreationHook>>,
    pub on_create_reference: Option<Arc<dyn CreationHook>>,
    pub check_valid: Option<CheckValid>,
}

impl FieldHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_create(mut self, hook: Arc<dyn CreationHook>) -> Self {
        self.on_create = Some(hook);
        self
    }

    pub fn with_on_create_reference(mut self, hook: Arc<dyn CreationHook>) -> Self {
        self.on_create_reference = Some(hook);
        self
    }

    pub fn with_check_valid(
        mut self,
        check: impl Fn(&str, &[RefinedTag]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.check_valid = Some(Arc::new(check));
        self
    }
}

fn hook_or_default(hook: &Option<Arc<dyn CreationHook>>, paths: &TagPaths) -> Arc<dyn CreationHook> {
    match hook {
        Some(hook) => hook.clone(),
        None => Arc::new(PathsHook::new(paths.clone())),
    }
}

/// A stored field value without the `_key`/`_type` entries that the sweep
/// and other editors do not write.
fn without_bookkeeping(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(without_bookkeeping).collect()),
        Value::Object(mut map) => {
            map.remove("_key");
            map.remove("_type");
            Value::Object(map)
        }
        other => other,
    }
}

/// Schema used when the caller supplies none: no field is a slug.
struct PlainSchema;

impl SchemaRegistry for PlainSchema {
    fn field_type(&self, _doc_type: &str, _field: &str) -> Option<String> {
        None
    }
}

/// How an option is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub label: String,
    /// The option points at a canonical document that no longer exists.
    pub deleted: bool,
}

/// What one [`TagField::process_next`] call handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldActivity {
    FeedLoaded { kind: FeedKind, count: usize },
    FeedFailed { kind: FeedKind },
    SweepSettled { job_id: Uuid, succeeded: bool },
}

/// Builder for a [`TagField`]; [`mount`](TagFieldBuilder::mount) starts it.
pub struct TagFieldBuilder {
    store: Arc<dyn DocumentStore>,
    scheduler: SchedulerHandle,
    context: FieldContext,
    config: FieldConfig,
    schema: Option<Arc<dyn SchemaRegistry>>,
    hooks: FieldHooks,
}

impl TagFieldBuilder {
    pub fn config(mut self, config: FieldConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(mut self, schema: Arc<dyn SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn hooks(mut self, hooks: FieldHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Start the field's feeds with the stored field value and, when a
    /// reference source is configured, submit the initial sweep.
    pub fn mount(self, initial: Option<Value>) -> TagField {
        let paths = self.config.paths();
        for advisory in self.config.advisories() {
            warn!(
                subsystem = subsystem::FIELD,
                component = component::FIELD,
                document_type = %self.context.document_type,
                field_path = %self.context.field_path,
                advisory = %advisory,
                "Field configuration advisory"
            );
        }

        let mut sources = vec![FeedSource::Selected(initial)];
        if let Some(predefined) = self.config.predefined_tags() {
            sources.push(FeedSource::Predefined(predefined.to_vec()));
        }
        if let Some(reference_type) = self.config.reference_type() {
            sources.push(FeedSource::Reference {
                reference_type: reference_type.to_string(),
            });
        }
        if let Some(field) = self.config.related_field() {
            sources.push(FeedSource::Related {
                document_type: self.context.document_type.clone(),
                field: field.to_string(),
            });
        }

        // subscribe before the first submission so no settlement is missed
        let scheduler_events = self.scheduler.events();
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let loading = sources.iter().map(FeedSource::kind).collect();
        let feeds = sources
            .into_iter()
            .map(|source| spawn_feed(source, self.store.clone(), paths.clone(), feed_tx.clone()))
            .collect();

        debug!(
            subsystem = subsystem::FIELD,
            component = component::FIELD,
            document_id = %self.context.document_id,
            field_path = %self.context.field_path,
            "Mounted tag field"
        );

        let schema: Arc<dyn SchemaRegistry> = match self.schema {
            Some(schema) => schema,
            None => Arc::new(PlainSchema),
        };
        let mut field = TagField {
            store: self.store,
            schema,
            scheduler: self.scheduler,
            context: self.context,
            config: self.config,
            paths,
            hooks: self.hooks,
            selected: None,
            predefined: Vec::new(),
            reference: Vec::new(),
            related: Vec::new(),
            loading,
            creating: false,
            reference_loads: 0,
            reference_failed: false,
            feeds,
            feed_rx,
            feeds_closed: false,
            scheduler_events,
            coordinator: Coordinator::new(),
        };
        field.submit_sweep();
        field
    }
}

/// One mounted tag field.
pub struct TagField {
    store: Arc<dyn DocumentStore>,
    schema: Arc<dyn SchemaRegistry>,
    scheduler: SchedulerHandle,
    context: FieldContext,
    config: FieldConfig,
    paths: TagPaths,
    hooks: FieldHooks,
    selected: Option<Tags<RefinedTag>>,
    predefined: Vec<RefinedTag>,
    reference: Vec<RefinedTag>,
    related: Vec<RefinedTag>,
    loading: HashSet<FeedKind>,
    creating: bool,
    reference_loads: usize,
    reference_failed: bool,
    feeds: Vec<FeedHandle>,
    feed_rx: mpsc::Receiver<FeedUpdate>,
    feeds_closed: bool,
    scheduler_events: broadcast::Receiver<SchedulerEvent>,
    coordinator: Coordinator,
}

impl TagField {
    pub fn builder(
        store: Arc<dyn DocumentStore>,
        scheduler: SchedulerHandle,
        context: FieldContext,
    ) -> TagFieldBuilder {
        TagFieldBuilder {
            store,
            scheduler,
            context,
            config: FieldConfig::default(),
            schema: None,
            hooks: FieldHooks::default(),
        }
    }

    pub fn context(&self) -> &FieldContext {
        &self.context
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn paths(&self) -> &TagPaths {
        &self.paths
    }

    pub fn selected(&self) -> Option<&Tags<RefinedTag>> {
        self.selected.as_ref()
    }

    fn selected_list(&self) -> Vec<RefinedTag> {
        self.selected
            .as_ref()
            .map(|tags| tags.as_slice().to_vec())
            .unwrap_or_default()
    }

    /// Selectable options: predefined, then reference, then related tags,
    /// first occurrence of each key kept.
    pub fn options(&self) -> Vec<RefinedTag> {
        let mut seen = HashSet::new();
        self.predefined
            .iter()
            .chain(&self.reference)
            .chain(&self.related)
            .filter(|tag| seen.insert(tag.key.as_str()))
            .cloned()
            .collect()
    }

    /// Canonical tags from the reference feed.
    pub fn reference_options(&self) -> &[RefinedTag] {
        &self.reference
    }

    fn reference_ready(&self) -> bool {
        self.reference_loads > 0
            && !self.reference_failed
            && !self.loading.contains(&FeedKind::Reference)
    }

    pub fn describe(&self, tag: &RefinedTag) -> OptionView {
        OptionView {
            label: tag.label_text(),
            deleted: self.config.reference_type().is_some()
                && self.reference_ready()
                && is_dangling(tag, &self.reference),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.creating || !self.loading.is_empty()
    }

    pub fn is_disabled(&self, read_only: bool) -> bool {
        read_only || self.is_loading()
    }

    pub fn advisories(&self) -> Vec<ConfigAdvisory> {
        self.config.advisories()
    }

    pub fn coordinator_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    /// Feeds that are still running.
    pub fn active_feeds(&self) -> usize {
        self.feeds.iter().filter(|feed| !feed.is_finished()).count()
    }

    /// No feed is loading, no creation is pending, and no sweep is in flight.
    pub fn is_settled(&self) -> bool {
        !self.is_loading() && !self.coordinator.is_sweep_in_flight()
    }

    pub fn is_valid_new_option(&self, input: &str) -> bool {
        if !self.config.allow_create() {
            return false;
        }
        let mut existing = self.options();
        existing.extend(self.selected_list());
        match &self.hooks.check_valid {
            Some(check) => check(input, &existing),
            None => default_check_valid(input, &existing),
        }
    }

    /// Replace the selection and write it to the host document.
    #[instrument(
        skip(self, tags),
        fields(subsystem = subsystem::FIELD, component = component::FIELD, document_id = %self.context.document_id)
    )]
    pub async fn handle_change(&mut self, tags: Option<Tags<RefinedTag>>) -> Result<()> {
        self.selected = tags;
        let reverted = revert_tags(
            self.selected.clone(),
            &self.paths,
            self.config.is_multi,
            self.config.is_reference,
        );
        self.write(reverted.map(Tags::into_value)).await?;
        self.maybe_reconcile().await;
        Ok(())
    }

    /// Create a tag from free text and add it to the selection.
    ///
    /// With a reference source a canonical document is created and the
    /// reference feed refreshed; otherwise the `on_create` hook builds the
    /// tag. A multi selection grows by the new tag; a single one is replaced.
    #[instrument(
        skip(self),
        fields(subsystem = subsystem::FIELD, component = component::FIELD, document_id = %self.context.document_id)
    )]
    pub async fn handle_create(&mut self, input: &str) -> Result<()> {
        self.creating = true;
        let created = self.create_tag(input).await;
        self.creating = false;
        let tag = created?;

        let next = match self.selected.take() {
            Some(Tags::Many(mut items)) => {
                items.push(tag);
                Tags::Many(items)
            }
            _ if self.config.is_multi => Tags::Many(vec![tag]),
            _ => Tags::One(tag),
        };
        self.handle_change(Some(next)).await
    }

    async fn create_tag(&mut self, input: &str) -> Result<RefinedTag> {
        let Some(reference_type) = self.config.reference_type().map(String::from) else {
            let hook = hook_or_default(&self.hooks.on_create, &self.paths);
            let proposed = hook.propose(input, None).await.map_err(|e| {
                error!(
                    subsystem = subsystem::FIELD,
                    component = component::FIELD,
                    error = %e,
                    "Creation hook failed"
                );
                Error::Creation(format!("creation hook failed: {e}"))
            })?;
            let raw = RawTag::from_value(Value::Object(proposed)).map(Tags::One);
            return prepare_tags(self.store.as_ref(), raw, &self.paths)
                .await?
                .and_then(|tags| tags.into_vec().into_iter().next())
                .ok_or_else(|| Error::Creation(format!("created tag '{input}' did not resolve")));
        };

        let hook = hook_or_default(&self.hooks.on_create_reference, &self.paths);
        let created = create_reference_document(
            self.store.as_ref(),
            self.schema.as_ref(),
            hook.as_ref(),
            input,
            &reference_type,
            &self.paths,
        )
        .await?;

        let resolved = match (self.config.is_reference, document_id(&created)) {
            (true, Some(id)) => {
                let raw = Some(Tags::One(RawTag::reference(id)));
                prepare_tags(self.store.as_ref(), raw, &self.paths)
                    .await?
                    .and_then(|tags| tags.into_vec().into_iter().next())
            }
            _ => None,
        };
        let tag = resolved.unwrap_or_else(|| document_to_tag(&created, &self.paths));

        self.refresh_reference();
        Ok(tag)
    }

    /// Ask the reference feed to reload now.
    pub fn refresh_reference(&mut self) {
        let refreshed = self
            .feeds
            .iter()
            .filter(|feed| feed.kind() == FeedKind::Reference)
            .any(FeedHandle::refresh);
        if refreshed {
            self.loading.insert(FeedKind::Reference);
        }
    }

    fn submit_sweep(&mut self) {
        let Some(reference_type) = self.config.reference_type().map(String::from) else {
            return;
        };
        let request = SweepRequest::new(
            self.context.document_type.clone(),
            self.context.field_path.clone(),
            reference_type,
        )
        .with_reference_field(self.config.is_reference)
        .with_paths(self.paths.clone());
        let key = request.key();

        match self.scheduler.submit(request) {
            Ok(job_id) => {
                debug!(
                    subsystem = subsystem::FIELD,
                    component = component::COORDINATOR,
                    %job_id,
                    sweep = %key,
                    "Sweep submitted"
                );
                self.coordinator.begin(job_id);
            }
            Err(e) => warn!(
                subsystem = subsystem::FIELD,
                component = component::COORDINATOR,
                sweep = %key,
                error = %e,
                "Could not submit sweep, reconciling locally only"
            ),
        }
    }

    /// Wait for the next feed update or settlement of one of this field's
    /// sweeps and apply it.
    ///
    /// Returns `None` once nothing can report any more: every feed has
    /// stopped and no sweep is in flight. Live feeds never stop on their
    /// own, so with a reference or related source this waits for the next
    /// change.
    pub async fn process_next(&mut self) -> Option<FieldActivity> {
        loop {
            let listen_feeds = !self.feeds_closed;
            let listen_sweeps = self.coordinator.is_sweep_in_flight();
            if !listen_feeds && !listen_sweeps {
                return None;
            }

            tokio::select! {
                update = self.feed_rx.recv(), if listen_feeds => match update {
                    Some(update) => return Some(self.apply_feed_update(update).await),
                    None => self.feeds_closed = true,
                },
                event = self.scheduler_events.recv(), if listen_sweeps => {
                    if let Some(activity) = self.apply_scheduler_event(event).await {
                        return Some(activity);
                    }
                }
                else => return None,
            }
        }
    }

    /// Process until [`is_settled`](Self::is_settled), for at most the
    /// default settle timeout.
    pub async fn settle(&mut self) -> Result<()> {
        self.settle_within(Duration::from_millis(defaults::FIELD_SETTLE_TIMEOUT_MS))
            .await
    }

    pub async fn settle_within(&mut self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_settled() {
            match tokio::time::timeout_at(deadline, self.process_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    return Err(Error::Internal(format!(
                        "field did not settle within {}ms",
                        timeout.as_millis()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Stop every feed. Sweeps already submitted keep running in the
    /// scheduler.
    pub fn teardown(&mut self) {
        for feed in self.feeds.drain(..) {
            feed.cancel();
        }
        self.loading.clear();
        debug!(
            subsystem = subsystem::FIELD,
            component = component::FIELD,
            document_id = %self.context.document_id,
            field_path = %self.context.field_path,
            "Tore down tag field"
        );
    }

    async fn apply_feed_update(&mut self, update: FeedUpdate) -> FieldActivity {
        let kind = update.kind();
        self.loading.remove(&kind);

        let tags = match update {
            FeedUpdate::Loaded { tags, .. } => tags,
            FeedUpdate::Failed { .. } => {
                match kind {
                    FeedKind::Selected => {}
                    FeedKind::Predefined => self.predefined.clear(),
                    FeedKind::Reference => {
                        self.reference.clear();
                        self.reference_failed = true;
                    }
                    FeedKind::Related => self.related.clear(),
                }
                return FieldActivity::FeedFailed { kind };
            }
        };
        let count = tags.len();

        match kind {
            FeedKind::Selected => {
                self.selected = self.shape(tags);
                self.maybe_reconcile().await;
            }
            FeedKind::Predefined => self.predefined = tags,
            FeedKind::Related => self.related = tags,
            FeedKind::Reference => {
                self.reference = tags;
                self.reference_failed = false;
                self.reference_loads += 1;
                // label drift under unchanged ids must still reconcile
                self.coordinator.invalidate();
                if self.reference_loads > 1 {
                    self.submit_sweep();
                }
                self.maybe_reconcile().await;
            }
        }

        FieldActivity::FeedLoaded { kind, count }
    }

    async fn apply_scheduler_event(
        &mut self,
        event: std::result::Result<SchedulerEvent, broadcast::error::RecvError>,
    ) -> Option<FieldActivity> {
        match event {
            Ok(SchedulerEvent::SweepCompleted { job_id, outcome, .. })
                if self.coordinator.tracks(job_id) =>
            {
                debug!(
                    subsystem = subsystem::FIELD,
                    component = component::COORDINATOR,
                    %job_id,
                    patched = outcome.patched,
                    examined = outcome.examined,
                    "Sweep settled"
                );
                Some(self.settle_job(job_id, true).await)
            }
            Ok(SchedulerEvent::SweepFailed { job_id, error, .. })
                if self.coordinator.tracks(job_id) =>
            {
                warn!(
                    subsystem = subsystem::FIELD,
                    component = component::COORDINATOR,
                    %job_id,
                    error = %error,
                    "Sweep failed, resuming local reconciliation"
                );
                Some(self.settle_job(job_id, false).await)
            }
            Ok(_) => None,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    subsystem = subsystem::FIELD,
                    component = component::COORDINATOR,
                    skipped,
                    "Scheduler events lagged, checking job status"
                );
                self.recheck_in_flight().await
            }
            Err(broadcast::error::RecvError::Closed) => {
                let jobs: Vec<Uuid> = self.coordinator.in_flight().collect();
                let mut last = None;
                for job_id in jobs {
                    last = Some(self.settle_job(job_id, false).await);
                }
                last
            }
        }
    }

    async fn recheck_in_flight(&mut self) -> Option<FieldActivity> {
        let jobs: Vec<Uuid> = self.coordinator.in_flight().collect();
        let mut last = None;
        for job_id in jobs {
            let succeeded = match self.scheduler.status(job_id) {
                Some(JobStatus::Queued | JobStatus::Running) => continue,
                Some(JobStatus::Completed { .. }) => true,
                // failed, or expired from the status table
                Some(JobStatus::Failed { .. }) | None => false,
            };
            last = Some(self.settle_job(job_id, succeeded).await);
        }
        last
    }

    async fn settle_job(&mut self, job_id: Uuid, succeeded: bool) -> FieldActivity {
        if self.coordinator.settle(job_id) {
            self.maybe_reconcile().await;
        }
        FieldActivity::SweepSettled { job_id, succeeded }
    }

    fn shape(&self, tags: Vec<RefinedTag>) -> Option<Tags<RefinedTag>> {
        if self.config.is_multi {
            Some(Tags::Many(tags))
        } else {
            tags.into_iter().next().map(Tags::One)
        }
    }

    /// Reconcile the selection against the reference feed when the
    /// coordinator allows it, and write the result back if it changed.
    async fn maybe_reconcile(&mut self) {
        if self.config.reference_type().is_none()
            || self.loading.contains(&FeedKind::Selected)
            || self.loading.contains(&FeedKind::Reference)
        {
            return;
        }

        let selected = self.selected_list();
        if !self.coordinator.should_reconcile(&selected, &self.reference) {
            return;
        }
        let reconciled = reconcile(&selected, &self.reference);
        if !reconciled.changed {
            return;
        }

        info!(
            subsystem = subsystem::FIELD,
            component = component::COORDINATOR,
            document_id = %self.context.document_id,
            field_path = %self.context.field_path,
            before = selected.len(),
            after = reconciled.tags.len(),
            "Reconciled selection against canonical tags"
        );
        self.selected = self.shape(reconciled.tags);
        if let Err(e) = self.write_reconciled().await {
            warn!(
                subsystem = subsystem::FIELD,
                component = component::COORDINATOR,
                document_id = %self.context.document_id,
                error = %e,
                "Failed to write reconciled selection"
            );
        }
    }

    async fn write_reconciled(&self) -> Result<()> {
        let reverted = revert_tags(
            self.selected.clone(),
            &self.paths,
            self.config.is_multi,
            self.config.is_reference,
        )
        .map(Tags::into_value);

        let stored = self.stored_value().await?.map(without_bookkeeping);
        if stored == reverted.clone().map(without_bookkeeping) {
            debug!(
                subsystem = subsystem::FIELD,
                component = component::COORDINATOR,
                document_id = %self.context.document_id,
                "Stored value already reconciled, write skipped"
            );
            return Ok(());
        }
        self.write(reverted).await
    }

    async fn stored_value(&self) -> Result<Option<Value>> {
        let docs = self
            .store
            .fetch(DocumentQuery::ById(self.context.document_id.clone()))
            .await?;
        Ok(docs
            .first()
            .and_then(|doc| get_in(doc, &self.context.field_path))
            .filter(|value| !value.is_null())
            .cloned())
    }

    async fn write(&self, value: Option<Value>) -> Result<()> {
        let patch = match value {
            Some(value) => Patch::set(self.context.field_path.clone(), value),
            None => Patch::unset(self.context.field_path.clone()),
        };
        self.store
            .commit(Transaction::new().patch(self.context.document_id.clone(), patch))
            .await
    }
}
