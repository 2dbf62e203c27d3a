use std::{collections::BTreeMap, sync::Arc, time::Duration};

use record_engine_sdk::{PresignedUrl, Record, SearchQuery, SortSpec, TransitionRequest, WriteOptions};
use recordkit_db::{Condition, DbProvider, OrderBy, PRIMARY_KEY, Page, SecureTx, SortDirection};
use recordkit_security::{AccessScope, SecurityContext};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::error::DomainError;
use super::model::{ModelDescriptor, NAME_FIELD, ObjectStoreField, is_system_field};
use super::permissions::{FieldPermissions, resolve_field_permissions, resolve_row_filter};
use super::pipeline::{Pipeline, WriteMode};
use super::plugins::{HookContext, LifecycleHook, Named};
use super::ports::ObjectStorePort;
use super::registry::ModelRegistry;

/// Whether permission rules apply to a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Enforcement {
    #[default]
    Enforced,
    /// System call: no row filter, every field read-write, no field guard.
    Bypass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paging {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Paging {
    fn limit(self, requested: Option<u64>) -> u64 {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            default_limit: 25,
            max_limit: 100,
        }
    }
}

#[derive(Clone)]
pub struct ObjectStoreHandle {
    pub port: Arc<dyn ObjectStorePort>,
    pub ttl: Duration,
}

impl std::fmt::Debug for ObjectStoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreHandle")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// What a caller may see and change.
struct Access {
    scope: AccessScope,
    perms: FieldPermissions,
}

/// A relation value that must exist before a write commits.
struct RelationCheck {
    field: String,
    target: Arc<ModelDescriptor>,
    condition: Condition,
    value: Value,
}

/// Governed operations on the records of one model.
#[derive(Clone, Debug)]
pub struct Collection {
    model: Arc<ModelDescriptor>,
    registry: Arc<ModelRegistry>,
    db: DbProvider,
    stores: Arc<BTreeMap<String, ObjectStoreHandle>>,
    paging: Paging,
    enforcement: Enforcement,
}

impl Collection {
    #[must_use]
    pub fn new(
        model: Arc<ModelDescriptor>,
        registry: Arc<ModelRegistry>,
        db: DbProvider,
        stores: Arc<BTreeMap<String, ObjectStoreHandle>>,
        paging: Paging,
    ) -> Self {
        Self {
            model,
            registry,
            db,
            stores,
            paging,
            enforcement: Enforcement::Enforced,
        }
    }

    /// Same collection with a different enforcement mode.
    #[must_use]
    pub fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    #[must_use]
    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.model.name
    }

    fn enforced(&self) -> bool {
        self.enforcement == Enforcement::Enforced
    }

    fn access(&self, ctx: &SecurityContext) -> Access {
        match self.enforcement {
            Enforcement::Bypass => Access {
                scope: AccessScope::allow_all(),
                perms: FieldPermissions::all_read_write(self.model.all_field_names()),
            },
            Enforcement::Enforced => Access {
                scope: resolve_row_filter(ctx.identities(), &self.model.rules),
                perms: resolve_field_permissions(
                    ctx.identities(),
                    &self.model.rules,
                    self.model.default_permission,
                    self.model.all_field_names(),
                ),
            },
        }
    }

    fn hook_context<'a>(&'a self, ctx: &'a SecurityContext) -> HookContext<'a> {
        HookContext {
            model: &self.model.name,
            security: ctx,
        }
    }

    fn not_found(&self, identifier: &str) -> DomainError {
        DomainError::not_found(format!("{} '{identifier}' not found", self.model.name))
    }

    fn identifier_condition(&self, identifier: &str) -> Result<Condition, DomainError> {
        if self.model.addressed_by_name() {
            return Ok(Condition::eq(NAME_FIELD, identifier));
        }
        identifier
            .parse::<i64>()
            .map(|id| Condition::eq(PRIMARY_KEY, id))
            .map_err(|_| self.not_found(identifier))
    }

    async fn read_one(
        &self,
        scope: &AccessScope,
        condition: Condition,
    ) -> Result<Option<Record>, DomainError> {
        let model = Arc::clone(&self.model);
        let scope = scope.clone();
        self.db
            .in_transaction_mapped(DomainError::from, move |tx| {
                Box::pin(async move {
                    let row = tx.find_one(&model.table, &scope, &condition).await?;
                    Ok::<_, DomainError>(row)
                })
            })
            .await
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// # Errors
    /// [`DomainError::NotFound`] when the record is missing or hidden by the row filter.
    #[instrument(skip_all, fields(collection = %self.model.name, identifier = %identifier))]
    pub async fn get(&self, ctx: &SecurityContext, identifier: &str) -> Result<Record, DomainError> {
        let access = self.access(ctx);
        let condition = self.identifier_condition(identifier)?;
        let row = self
            .read_one(&access.scope, condition)
            .await?
            .ok_or_else(|| self.not_found(identifier))?;
        Pipeline::new(&self.model, self.hook_context(ctx), &access.perms, self.enforced())
            .render(row)
            .await
    }

    /// # Errors
    /// [`DomainError::Validation`] for an invalid filter or sort specification.
    #[instrument(skip_all, fields(collection = %self.model.name))]
    pub async fn search(
        &self,
        ctx: &SecurityContext,
        query: SearchQuery,
    ) -> Result<Vec<Record>, DomainError> {
        let access = self.access(ctx);
        let order = self.order_by(&query.order_by, &access.perms)?;
        self.check_filter(&query.filter, &access.perms)?;
        let page = Page {
            offset: query.offset,
            limit: Some(self.paging.limit(query.limit)),
        };

        let model = Arc::clone(&self.model);
        let scope = access.scope;
        let filter = query.filter;
        let rows = self
            .db
            .in_transaction_mapped(DomainError::from, move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .find_many(&model.table, &scope, &filter, &order, page)
                        .await?;
                    Ok::<_, DomainError>(rows)
                })
            })
            .await?;
        debug!(rows = rows.len(), "search completed");

        let pipeline = Pipeline::new(&self.model, self.hook_context(ctx), &access.perms, self.enforced());
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(pipeline.render(row).await?);
        }
        Ok(out)
    }

    /// # Errors
    /// [`DomainError::Validation`] when the filter names an unknown or restricted field.
    #[instrument(skip_all, fields(collection = %self.model.name))]
    pub async fn count(&self, ctx: &SecurityContext, filter: Condition) -> Result<u64, DomainError> {
        let access = self.access(ctx);
        self.check_filter(&filter, &access.perms)?;

        let model = Arc::clone(&self.model);
        let scope = access.scope;
        self.db
            .in_transaction_mapped(DomainError::from, move |tx| {
                Box::pin(async move {
                    let n = tx.count(&model.table, &scope, &filter).await?;
                    Ok::<_, DomainError>(n)
                })
            })
            .await
    }

    fn order_by(
        &self,
        specs: &[SortSpec],
        perms: &FieldPermissions,
    ) -> Result<Vec<OrderBy>, DomainError> {
        specs
            .iter()
            .map(|s| {
                if !self.model.is_known_field(&s.field) || !perms.is_visible(&s.field) {
                    return Err(DomainError::validation(
                        "order_by",
                        format!("Invalid sort field '{}'", s.field),
                    ));
                }
                let direction = SortDirection::parse(&s.direction).ok_or_else(|| {
                    DomainError::validation(
                        "order_by",
                        format!("Invalid sort direction '{}'", s.direction),
                    )
                })?;
                Ok(OrderBy {
                    field: s.field.clone(),
                    direction,
                })
            })
            .collect()
    }

    fn check_filter(&self, filter: &Condition, perms: &FieldPermissions) -> Result<(), DomainError> {
        let invalid = filter
            .fields()
            .into_iter()
            .find(|f| !self.model.is_known_field(f) || !perms.is_visible(f));
        if let Some(f) = invalid {
            return Err(DomainError::validation(f, format!("Invalid filter field '{f}'")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// # Errors
    /// - [`DomainError::Validation`] for a rejected payload or protected field
    /// - [`DomainError::Conflict`] on a unique field
    /// - [`DomainError::Forbidden`] when the stored record is outside the caller's row filter
    /// - any error raised by a before or after hook
    #[instrument(skip_all, fields(collection = %self.model.name))]
    pub async fn create(
        &self,
        ctx: &SecurityContext,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, DomainError> {
        let access = self.access(ctx);
        let hook = self.hook_context(ctx);
        let pipeline = Pipeline::new(&self.model, hook, &access.perms, self.enforced());

        let row = pipeline.prepare(WriteMode::Create, payload, options).await?;
        run_hooks(&hook, &self.model.hooks.before_create).run(&row).await?;
        let checks = self.relation_checks(&row)?;

        let model = Arc::clone(&self.model);
        let scope = access.scope;
        let (id, stored) = self
            .db
            .in_transaction_mapped(DomainError::from, move |tx| {
                Box::pin(async move {
                    for check in &checks {
                        check.verify(tx).await?;
                    }
                    let id = tx.insert(&model.table, row).await?;
                    let stored = tx.find_by_id(&model.table, &scope, id).await?;
                    Ok::<_, DomainError>((id, stored))
                })
            })
            .await?;

        let Some(stored) = stored else {
            warn!(id, "created record is outside the caller's row filter");
            return Err(DomainError::forbidden("You are not allowed to create this object"));
        };
        info!(id, "record created");

        run_hooks(&hook, &self.model.hooks.after_create)
            .after_commit()
            .run(&stored)
            .await?;
        pipeline.render(stored).await
    }

    /// # Errors
    /// As [`create`](Self::create), plus [`DomainError::NotFound`] for a
    /// missing or hidden record.
    #[instrument(skip_all, fields(collection = %self.model.name, identifier = %identifier))]
    pub async fn update(
        &self,
        ctx: &SecurityContext,
        identifier: &str,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, DomainError> {
        self.apply_update(ctx, identifier, payload, options, Condition::True, Record::new())
            .await
    }

    /// Update path shared by plain updates and transitions.
    ///
    /// `guard` is AND-ed into the update condition; when it filters the row
    /// out the call fails with a conflict. `system_changes` skip validation and
    /// the field guard; they are only sealed before being merged.
    async fn apply_update(
        &self,
        ctx: &SecurityContext,
        identifier: &str,
        payload: Value,
        options: WriteOptions,
        guard: Condition,
        system_changes: Record,
    ) -> Result<Record, DomainError> {
        let access = self.access(ctx);
        let hook = self.hook_context(ctx);
        let pipeline = Pipeline::new(&self.model, hook, &access.perms, self.enforced());

        let mut patch = pipeline.prepare(WriteMode::Update, payload, options).await?;
        patch.extend(pipeline.seal(system_changes)?);
        run_hooks(&hook, &self.model.hooks.before_update).run(&patch).await?;
        let checks = self.relation_checks(&patch)?;
        let condition = self.identifier_condition(identifier)?;

        let model = Arc::clone(&self.model);
        let scope = access.scope;
        let missing = self.not_found(identifier);
        let guarded = guard != Condition::True;
        let (id, stored) = self
            .db
            .in_transaction_mapped(DomainError::from, move |tx| {
                Box::pin(async move {
                    let Some(current) = tx.find_one(&model.table, &scope, &condition).await? else {
                        return Err(missing);
                    };
                    let id = row_id(&current)?;
                    for check in &checks {
                        check.verify(tx).await?;
                    }
                    let target = Condition::eq(PRIMARY_KEY, id).and(guard);
                    let affected = tx.update_many(&model.table, &scope, &target, &patch).await?;
                    if affected == 0 {
                        return Err(if guarded {
                            DomainError::conflict(format!(
                                "{} {id} was changed by another request",
                                model.name
                            ))
                        } else {
                            missing
                        });
                    }
                    let stored = tx.find_by_id(&model.table, &scope, id).await?;
                    Ok::<_, DomainError>((id, stored))
                })
            })
            .await?;

        let Some(stored) = stored else {
            warn!(id, "updated record is outside the caller's row filter");
            return Err(DomainError::forbidden("You are not allowed to update this object"));
        };
        info!(id, "record updated");

        run_hooks(&hook, &self.model.hooks.after_update)
            .after_commit()
            .run(&stored)
            .await?;
        pipeline.render(stored).await
    }

    /// # Errors
    /// [`DomainError::NotFound`] for a missing or hidden record, or any error
    /// raised by a before or after hook.
    #[instrument(skip_all, fields(collection = %self.model.name, identifier = %identifier))]
    pub async fn delete(&self, ctx: &SecurityContext, identifier: &str) -> Result<(), DomainError> {
        let access = self.access(ctx);
        let hook = self.hook_context(ctx);
        let condition = self.identifier_condition(identifier)?;
        let current = self
            .read_one(&access.scope, condition)
            .await?
            .ok_or_else(|| self.not_found(identifier))?;
        let id = row_id(&current)?;

        run_hooks(&hook, &self.model.hooks.before_delete).run(&current).await?;

        let model = Arc::clone(&self.model);
        let scope = access.scope;
        let missing = self.not_found(identifier);
        self.db
            .in_transaction_mapped(DomainError::from, move |tx| {
                Box::pin(async move {
                    let affected = tx
                        .delete_many(&model.table, &scope, &Condition::eq(PRIMARY_KEY, id))
                        .await?;
                    if affected == 0 {
                        return Err(missing);
                    }
                    Ok::<_, DomainError>(())
                })
            })
            .await?;
        info!(id, "record deleted");

        run_hooks(&hook, &self.model.hooks.after_delete)
            .after_commit()
            .run(&current)
            .await
    }

    /// Fire a workflow trigger and persist the new state.
    ///
    /// The update only applies while the record is still in the source
    /// state; a concurrent transition makes this call fail with a conflict.
    ///
    /// # Errors
    /// - [`DomainError::StateMachine`] for an unknown or invalid trigger
    /// - [`DomainError::Conflict`] when the state changed concurrently
    /// - the errors of [`update`](Self::update)
    #[instrument(
        skip_all,
        fields(collection = %self.model.name, identifier = %identifier, trigger = %request.trigger)
    )]
    pub async fn transition(
        &self,
        ctx: &SecurityContext,
        identifier: &str,
        request: TransitionRequest,
    ) -> Result<Record, DomainError> {
        let Some(sm) = &self.model.state_machine else {
            return Err(DomainError::StateMachine {
                message: format!("{} has no workflow", self.model.name),
                valid_triggers: Vec::new(),
            });
        };
        let payload = match request.payload {
            Value::Object(map) => map,
            Value::Null => Record::new(),
            _ => {
                return Err(DomainError::validation(
                    "payload",
                    "Input should be a valid dictionary",
                ));
            }
        };

        let access = self.access(ctx);
        let condition = self.identifier_condition(identifier)?;
        let current = self
            .read_one(&access.scope, condition)
            .await?
            .ok_or_else(|| self.not_found(identifier))?;

        let outcome = sm
            .trigger(&self.hook_context(ctx), &current, &request.trigger, &payload)
            .await?;
        debug!(source = %outcome.source, dest = %outcome.dest, "trigger accepted");

        let wf = sm.field();
        let hook_changes: Record = outcome
            .record
            .iter()
            .filter(|(k, v)| {
                k.as_str() != wf
                    && !is_system_field(k)
                    && !payload.contains_key(k.as_str())
                    && self.model.field(k).is_some()
                    && current.get(k.as_str()) != Some(*v)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut patch = payload;
        patch.insert(wf.to_owned(), Value::String(outcome.dest));

        let in_source = Condition::eq(wf, outcome.source.as_str());
        let guard = if current.get(wf).is_some_and(|v| v.as_str().is_some_and(|s| !s.is_empty())) {
            in_source
        } else {
            Condition::Any {
                conditions: vec![Condition::is_null(wf), Condition::eq(wf, ""), in_source],
            }
        };

        self.apply_update(
            ctx,
            identifier,
            Value::Object(patch),
            WriteOptions::default().with_workflow_status(),
            guard,
            hook_changes,
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Object store
    // ------------------------------------------------------------------------

    fn object_store_field(&self, field: &str) -> Result<(&ObjectStoreField, &ObjectStoreHandle), DomainError> {
        let Some(os) = self.model.object_store.get(field) else {
            return Err(DomainError::validation(
                field,
                format!("Field {field} is not an object store field"),
            ));
        };
        let handle = self.stores.get(&os.store).ok_or_else(|| {
            DomainError::internal(format!("object store '{}' is not available", os.store))
        })?;
        Ok((os, handle))
    }

    /// URL for uploading the object of `field`. A storage key is generated
    /// and saved on the record the first time.
    ///
    /// # Errors
    /// - [`DomainError::Validation`] when `field` is not an object-store field
    ///   or is not writable by the caller
    /// - [`DomainError::NotFound`] for a missing or hidden record
    #[instrument(skip_all, fields(collection = %self.model.name, identifier = %identifier, field = %field))]
    pub async fn presigned_upload_url(
        &self,
        ctx: &SecurityContext,
        identifier: &str,
        field: &str,
    ) -> Result<PresignedUrl, DomainError> {
        let (os, handle) = self.object_store_field(field)?;
        let access = self.access(ctx);
        if self.enforced() && !access.perms.is_writable(field) {
            return Err(DomainError::protected(field));
        }

        let condition = self.identifier_condition(identifier)?;
        let current = self
            .read_one(&access.scope, condition)
            .await?
            .ok_or_else(|| self.not_found(identifier))?;

        let key = match current.get(field) {
            Some(Value::String(key)) if !key.is_empty() => key.clone(),
            _ => {
                let key = format!(
                    "{}/{}/{field}/{}",
                    self.model.name,
                    row_id(&current)?,
                    Uuid::new_v4()
                );
                let mut patch = Record::new();
                patch.insert(field.to_owned(), Value::String(key.clone()));
                self.update(
                    ctx,
                    identifier,
                    Value::Object(patch),
                    WriteOptions::default().with_object_store_fields(),
                )
                .await?;
                debug!(%key, "storage key assigned");
                key
            }
        };

        handle.port.presigned_upload_url(&os.bucket, &key, handle.ttl).await
    }

    /// URL for downloading the object of `field`.
    ///
    /// # Errors
    /// - [`DomainError::Validation`] when `field` is not an object-store field
    /// - [`DomainError::Forbidden`] when the field is restricted for the caller
    /// - [`DomainError::NotFound`] for a missing record or an empty field
    #[instrument(skip_all, fields(collection = %self.model.name, identifier = %identifier, field = %field))]
    pub async fn presigned_download_url(
        &self,
        ctx: &SecurityContext,
        identifier: &str,
        field: &str,
    ) -> Result<PresignedUrl, DomainError> {
        let (os, handle) = self.object_store_field(field)?;
        let access = self.access(ctx);
        if !access.perms.is_visible(field) {
            return Err(DomainError::forbidden(format!("Field {field} is restricted")));
        }

        let condition = self.identifier_condition(identifier)?;
        let current = self
            .read_one(&access.scope, condition)
            .await?
            .ok_or_else(|| self.not_found(identifier))?;

        match current.get(field) {
            Some(Value::String(key)) if !key.is_empty() => {
                handle.port.presigned_download_url(&os.bucket, key, handle.ttl).await
            }
            _ => Err(DomainError::not_found(format!(
                "No object stored in field '{field}'"
            ))),
        }
    }

    // ------------------------------------------------------------------------

    fn relation_checks(&self, row: &Record) -> Result<Vec<RelationCheck>, DomainError> {
        let mut checks = Vec::new();
        for field in &self.model.fields {
            let Some(rel) = field.relation.as_ref().filter(|r| r.constraint) else {
                continue;
            };
            let Some(value) = row.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let target = self.registry.get(&rel.model).ok_or_else(|| {
                DomainError::internal(format!("related model '{}' is not registered", rel.model))
            })?;
            checks.push(RelationCheck {
                field: field.name.clone(),
                target: Arc::clone(target),
                condition: Condition::eq(&rel.field, value.clone()),
                value: value.clone(),
            });
        }
        Ok(checks)
    }
}

impl RelationCheck {
    async fn verify(&self, tx: &mut SecureTx) -> Result<(), DomainError> {
        let found = tx
            .find_one(&self.target.table, &AccessScope::allow_all(), &self.condition)
            .await?;
        if found.is_none() {
            return Err(DomainError::validation(
                &self.field,
                format!("Related {} '{}' does not exist", self.target.name, display(&self.value)),
            ));
        }
        Ok(())
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_id(row: &Record) -> Result<i64, DomainError> {
    row.get(PRIMARY_KEY)
        .and_then(Value::as_i64)
        .ok_or_else(|| DomainError::internal("stored row has no id"))
}

/// Runs a list of lifecycle hooks in declaration order.
struct HookRun<'h, 'c> {
    ctx: &'h HookContext<'c>,
    hooks: &'h [Named<dyn LifecycleHook>],
    after_commit: bool,
}

fn run_hooks<'h, 'c>(ctx: &'h HookContext<'c>, hooks: &'h [Named<dyn LifecycleHook>]) -> HookRun<'h, 'c> {
    HookRun {
        ctx,
        hooks,
        after_commit: false,
    }
}

impl HookRun<'_, '_> {
    /// Errors are logged; the committed change stands.
    #[must_use]
    fn after_commit(mut self) -> Self {
        self.after_commit = true;
        self
    }

    async fn run(self, record: &Record) -> Result<(), DomainError> {
        for hook in self.hooks {
            debug!(hook = %hook.name, "running lifecycle hook");
            if let Err(e) = hook.run(self.ctx, record).await {
                if self.after_commit {
                    error!(hook = %hook.name, error = %e, "hook failed after commit");
                }
                return Err(e);
            }
        }
        Ok(())
    }
}
