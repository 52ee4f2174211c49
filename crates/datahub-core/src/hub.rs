//! The hub facade: resource lifecycle, routing, and the push pipeline.
//!
//! All state lives in one cooperative domain; there is no locking. Push
//! handlers run synchronously on the acceptance path and may re-enter the
//! hub (including removing themselves), which is why handler callbacks are
//! taken out of their slots for the duration of their own invocation.

use crate::backup;
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::resource::{
    HandlerSlot, ObservationConfig, ObservationState, Resource, Variant,
};
use crate::sample::{NOW, Sample, SampleType, SharedSample, Value, extract_json, wall_clock};
use crate::tree::{DeferredOp, EntryId, Tree};
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// Opaque reference to a push-handler subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A push-handler callback. Receives the hub itself so handlers can cascade
/// admin or push operations.
pub type PushHandler = Box<dyn FnMut(&mut DataHub, &SharedSample)>;

/// A flat view of one resource, for listing and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub path: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared: Option<SampleType>,
    pub units: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub deleted: bool,
}

/// The in-process Data Hub.
pub struct DataHub {
    tree: Tree,
    config: HubConfig,
    handler_index: HashMap<HandlerId, EntryId>,
    next_handler: u64,
    snapshot_active: bool,
}

impl Default for DataHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl DataHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            tree: Tree::new(),
            config,
            handler_index: HashMap::new(),
            next_handler: 1,
            snapshot_active: false,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    // -----------------------------------------------------------------
    // Resource lifecycle
    // -----------------------------------------------------------------

    pub fn create_input(&mut self, path: &str, ty: SampleType, units: &str) -> Result<EntryId> {
        self.attach_resource(path, Variant::Input { declared: ty }, units)
    }

    pub fn create_output(&mut self, path: &str, ty: SampleType, units: &str) -> Result<EntryId> {
        self.attach_resource(path, Variant::Output { declared: ty }, units)
    }

    /// Create an Observation (admin interface only).
    pub fn create_observation(&mut self, path: &str, cfg: ObservationConfig) -> Result<EntryId> {
        let id = self.attach_resource(
            path,
            Variant::Observation(ObservationState {
                config: cfg,
                ..ObservationState::default()
            }),
            "",
        )?;
        // Re-creation is idempotent for the shape; the parameters still win.
        if let Some(obs) = self.admin_resource_mut(id).observation_mut() {
            obs.config = cfg;
        }
        Ok(id)
    }

    fn attach_resource(&mut self, path: &str, variant: Variant, units: &str) -> Result<EntryId> {
        let id = self.tree.resolve(path)?;
        self.tree.unmark_deleted(id);

        let entry = self.tree.node_mut(id);
        match &mut entry.resource {
            None => {
                entry.resource = Some(Resource::new(variant, units));
                entry.new = true;
                self.tree.touch_structural(id);
                Ok(id)
            }
            Some(res) if res.variant.is_placeholder() => {
                // Upgrade in place, keeping the admin settings already applied.
                res.variant = variant;
                res.units = units.to_string();
                entry.new = true;
                self.tree.touch_structural(id);
                Ok(id)
            }
            Some(res) => {
                let same_shape = res.variant.kind_name() == variant.kind_name()
                    && res.variant.declared_type() == variant.declared_type()
                    && res.units == units;
                if same_shape {
                    Ok(id)
                } else {
                    Err(HubError::Duplicate(format!(
                        "{path} already exists as {} ({:?}, units {:?})",
                        res.variant.kind_name(),
                        res.variant.declared_type(),
                        res.units
                    )))
                }
            }
        }
    }

    /// Remove the Resource at `path`. The entry demotes to a Placeholder if
    /// admin settings survive, otherwise it (and any newly empty ancestors)
    /// is released. With deletion tracking enabled the entry is retained as
    /// a deletion record instead.
    pub fn delete_resource(&mut self, path: &str) -> Result<()> {
        if self.tree.paused() {
            self.tree.defer(DeferredOp::Delete(path.to_string()));
            return Ok(());
        }
        let id = self
            .tree
            .find(path)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        if self.tree.node(id).resource.is_none() {
            return Err(HubError::NotFound(path.to_string()));
        }

        self.drop_handlers(id);

        if self.tree.track_deletions() {
            self.tree.mark_deleted(id);
            return Ok(());
        }

        let res = self.tree.node_mut(id).resource.take().unwrap_or_else(|| {
            panic!("resource vanished during delete of {path}")
        });
        if res.has_admin_settings() {
            let mut ph = Resource::placeholder();
            ph.source = res.source;
            ph.destinations = res.destinations;
            ph.override_value = res.override_value;
            ph.default_value = res.default_value;
            ph.json_extraction = res.json_extraction;
            self.tree.node_mut(id).resource = Some(ph);
            self.tree.touch_structural(id);
        } else {
            self.unlink_routes(id, &res);
            self.tree.try_release(id);
        }
        Ok(())
    }

    fn drop_handlers(&mut self, id: EntryId) {
        if let Some(res) = self.tree.resource_mut(id) {
            let ids: Vec<HandlerId> = res.handlers.iter().map(|s| s.id).collect();
            res.handlers.clear();
            for hid in ids {
                self.handler_index.remove(&hid);
            }
        }
    }

    /// Detach a physically released resource from its neighbours.
    fn unlink_routes(&mut self, id: EntryId, res: &Resource) {
        if let Some(src) = res.source
            && let Some(src_res) = self.tree.resource_mut(src)
        {
            src_res.destinations.retain(|&d| d != id);
        }
        for &dest in &res.destinations {
            if let Some(dest_res) = self.tree.resource_mut(dest)
                && dest_res.source == Some(id)
            {
                dest_res.source = None;
            }
        }
    }

    /// Resolve `path` for an admin operation, attaching a Placeholder when
    /// no concrete resource exists yet.
    fn ensure_admin_entry(&mut self, path: &str) -> Result<EntryId> {
        let id = self.tree.resolve(path)?;
        if self.tree.node(id).resource.is_none() {
            self.tree.node_mut(id).resource = Some(Resource::placeholder());
            self.tree.touch_structural(id);
        }
        Ok(id)
    }

    fn admin_resource_mut(&mut self, id: EntryId) -> &mut Resource {
        match self.tree.resource_mut(id) {
            Some(res) => res,
            None => panic!("admin entry lost its resource"),
        }
    }

    // -----------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------

    /// Set or clear the source route of `dst`.
    ///
    /// Refuses with `Duplicate` any edge that would close a cycle; walking
    /// upstream from `src` via source pointers must never reach `dst`.
    /// Adding an already-present edge is a no-op.
    pub fn set_source(&mut self, dst_path: &str, src_path: Option<&str>) -> Result<()> {
        let dst = self.ensure_admin_entry(dst_path)?;
        let Some(src_path) = src_path else {
            if let Some(old) = self.admin_resource_mut(dst).source.take()
                && let Some(old_res) = self.tree.resource_mut(old)
            {
                old_res.destinations.retain(|&d| d != dst);
            }
            self.tree.touch_structural(dst);
            return Ok(());
        };

        let src = self.ensure_admin_entry(src_path)?;
        if self.admin_resource_mut(dst).source == Some(src) {
            return Ok(());
        }

        let mut cur = Some(src);
        while let Some(c) = cur {
            if c == dst {
                return Err(HubError::Duplicate(format!(
                    "route {src_path} -> {dst_path} would close a cycle"
                )));
            }
            cur = self.tree.resource(c).and_then(|r| r.source);
        }

        if let Some(old) = self.admin_resource_mut(dst).source.take()
            && let Some(old_res) = self.tree.resource_mut(old)
        {
            old_res.destinations.retain(|&d| d != dst);
        }
        self.admin_resource_mut(dst).source = Some(src);
        self.admin_resource_mut(src).destinations.push(dst);
        self.tree.touch_structural(dst);
        self.tree.touch_structural(src);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Admin settings
    // -----------------------------------------------------------------

    pub fn set_override(&mut self, path: &str, value: Value) -> Result<()> {
        self.check_size(&value)?;
        let id = self.ensure_admin_entry(path)?;
        self.admin_resource_mut(id).override_value = Some((value.sample_type(), value));
        self.tree.touch_structural(id);
        Ok(())
    }

    pub fn clear_override(&mut self, path: &str) -> Result<()> {
        let id = self.ensure_admin_entry(path)?;
        self.admin_resource_mut(id).override_value = None;
        self.tree.touch_structural(id);
        Ok(())
    }

    pub fn set_default(&mut self, path: &str, value: Value) -> Result<()> {
        self.check_size(&value)?;
        let id = self.ensure_admin_entry(path)?;
        self.admin_resource_mut(id).default_value = Some((value.sample_type(), value));
        self.tree.touch_structural(id);
        Ok(())
    }

    pub fn clear_default(&mut self, path: &str) -> Result<()> {
        let id = self.ensure_admin_entry(path)?;
        self.admin_resource_mut(id).default_value = None;
        self.tree.touch_structural(id);
        Ok(())
    }

    pub fn set_json_extraction(&mut self, path: &str, spec: &str) -> Result<()> {
        if spec.is_empty() {
            return Err(HubError::BadParameter("empty extraction spec".to_string()));
        }
        let id = self.ensure_admin_entry(path)?;
        self.admin_resource_mut(id).json_extraction = Some(spec.to_string());
        self.tree.touch_structural(id);
        Ok(())
    }

    pub fn clear_json_extraction(&mut self, path: &str) -> Result<()> {
        let id = self.ensure_admin_entry(path)?;
        self.admin_resource_mut(id).json_extraction = None;
        self.tree.touch_structural(id);
        Ok(())
    }

    /// Update an existing Observation's parameters.
    pub fn configure_observation(&mut self, path: &str, cfg: ObservationConfig) -> Result<()> {
        let id = self
            .tree
            .find(path)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        let res = self
            .tree
            .resource_mut(id)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        match res.observation_mut() {
            Some(obs) => {
                obs.config = cfg;
                self.tree.touch_structural(id);
                Ok(())
            }
            None => Err(HubError::BadParameter(format!(
                "{path} is not an observation"
            ))),
        }
    }

    /// Set the units of an Observation. Input/Output units are fixed at
    /// creation and participate in the duplicate-shape check instead.
    pub fn set_units(&mut self, path: &str, units: &str) -> Result<()> {
        let id = self
            .tree
            .find(path)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        let res = self
            .tree
            .resource_mut(id)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        if !res.variant.is_observation() {
            return Err(HubError::BadParameter(format!(
                "units of {path} are fixed at creation"
            )));
        }
        res.units = units.to_string();
        self.tree.touch_structural(id);
        Ok(())
    }

    pub fn set_deletion_tracking(&mut self, on: bool) {
        if on {
            self.tree.set_track_deletions(true);
        } else if self.tree.paused() {
            self.tree.defer(DeferredOp::DisableTracking);
        } else {
            self.tree.set_track_deletions(false);
            self.tree.flush_deletions();
        }
    }

    // -----------------------------------------------------------------
    // Push handlers
    // -----------------------------------------------------------------

    /// Register a push handler for samples of `ty` accepted at `path`.
    ///
    /// If the resource has no current value but a type-matching active
    /// default, the default is emitted to the new handler as a synthetic
    /// push stamped "now".
    pub fn add_push_handler(
        &mut self,
        path: &str,
        ty: SampleType,
        cb: PushHandler,
    ) -> Result<HandlerId> {
        let id = self
            .tree
            .find(path)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        let res = self
            .tree
            .resource_mut(id)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;

        let hid = HandlerId(self.next_handler);
        self.next_handler += 1;
        res.handlers.push(HandlerSlot {
            id: hid,
            ty,
            cb: Some(cb),
        });

        let default = if res.current.is_none() {
            res.active_default().cloned()
        } else {
            None
        };
        self.handler_index.insert(hid, id);

        if let Some(value) = default
            && value.sample_type() == ty
        {
            let sample = Rc::new(Sample::new(NOW, value).stamped());
            if let Some(mut cb) = self.take_handler(id, hid) {
                cb(self, &sample);
                self.restore_handler(id, hid, cb);
            }
        }
        Ok(hid)
    }

    /// Remove a subscription. Safe to call from within the handler's own
    /// invocation: the callback is out of its slot while it runs, so the
    /// slot simply never gets restored.
    pub fn remove_push_handler(&mut self, hid: HandlerId) {
        let Some(id) = self.handler_index.remove(&hid) else {
            return;
        };
        if let Some(res) = self.tree.resource_mut(id) {
            res.handlers.retain(|s| s.id != hid);
        }
    }

    fn take_handler(&mut self, id: EntryId, hid: HandlerId) -> Option<PushHandler> {
        let res = self.tree.resource_mut(id)?;
        res.handlers.iter_mut().find(|s| s.id == hid)?.cb.take()
    }

    fn restore_handler(&mut self, id: EntryId, hid: HandlerId, cb: PushHandler) {
        if let Some(res) = self.tree.resource_mut(id)
            && let Some(slot) = res.handlers.iter_mut().find(|s| s.id == hid)
            && slot.cb.is_none()
        {
            slot.cb = Some(cb);
        }
    }

    // -----------------------------------------------------------------
    // Push pipeline
    // -----------------------------------------------------------------

    /// Push a sample into the resource at `path`.
    ///
    /// Filter rejection is not an error: the push succeeds and the sample is
    /// silently not propagated. Errors cover the caller-visible failures
    /// (unknown path, oversized payload).
    pub fn push(&mut self, path: &str, units_hint: &str, sample: Sample) -> Result<()> {
        self.check_size(sample.value())?;
        let id = self
            .tree
            .find(path)
            .ok_or_else(|| HubError::NotFound(path.to_string()))?;
        let entry = self.tree.node(id);
        if entry.deleted || entry.resource.is_none() {
            return Err(HubError::NotFound(path.to_string()));
        }
        let sample = Rc::new(sample.stamped());
        self.deliver(id, units_hint, sample);
        Ok(())
    }

    fn check_size(&self, value: &Value) -> Result<()> {
        let size = value.payload_len();
        let max = self.config.limits.max_string_bytes;
        if size > max {
            return Err(HubError::Overflow { size, max });
        }
        Ok(())
    }

    /// One hop of the delivery graph: filter the sample against the
    /// resource at `id` and, if accepted, dispatch to handlers and recurse
    /// into the destinations.
    fn deliver(&mut self, id: EntryId, units_hint: &str, sample: SharedSample) {
        let Some(entry) = self.tree.entry(id) else {
            return;
        };
        if entry.deleted {
            return;
        }
        let Some(res) = entry.resource.as_ref() else {
            return;
        };

        let declared = res.variant.declared_type();
        let extraction = res.json_extraction.clone();
        let res_units = res.units.clone();
        let is_obs = res.variant.is_observation();
        let obs_cfg = res.observation().map(|o| o.config);
        let prev_pushed = res.pushed.clone();
        let prev_current = res.current.clone();
        let override_value = res.active_override().cloned();
        let dests = res.destinations.clone();

        // 1. Extraction, then coercion against the declared type.
        let mut working = sample;
        if let Some(spec) = &extraction
            && matches!(working.value(), Value::Json(_))
        {
            match extract_json(&working, spec) {
                Ok(extracted) => working = Rc::new(extracted),
                Err(err) => {
                    debug!("drop at {}: extraction failed: {err}", self.tree.path_of(id));
                    return;
                }
            }
        }
        if let Some(decl) = declared
            && working.sample_type() != decl
        {
            match coerce_value(working.value(), decl) {
                Some(v) => working = Rc::new(working.with_value(v)),
                None => {
                    debug!(
                        "drop at {}: cannot coerce {:?} to {:?}",
                        self.tree.path_of(id),
                        working.sample_type(),
                        decl
                    );
                    return;
                }
            }
        }

        // 2. Units gate (Input/Output only).
        if declared.is_some() && !units_hint.is_empty() && units_hint != res_units {
            debug!(
                "drop at {}: units {:?} != {:?}",
                self.tree.path_of(id),
                units_hint,
                res_units
            );
            return;
        }

        // 3. Override substitution; the timestamp stays the push's.
        if let Some(value) = override_value {
            working = Rc::new(working.with_value(value));
        }

        // 4. Observation filters. The pushed sample is recorded whether or
        //    not it is accepted; changeBy measures against it.
        let accept = match &obs_cfg {
            Some(cfg) => observation_accepts(
                cfg,
                &working,
                prev_current.as_deref(),
                prev_pushed.as_deref(),
            ),
            None => true,
        };
        if let Some(res) = self.tree.resource_mut(id) {
            res.pushed = Some(working.clone());
        }
        if !accept {
            debug!("drop at {}: observation filter", self.tree.path_of(id));
            return;
        }

        // 5. Accept: update the current value, then handlers, then routes.
        if let Some(res) = self.tree.resource_mut(id) {
            res.current = Some(working.clone());
        }
        self.tree.touch_value(id, working.timestamp());
        self.dispatch_handlers(id, &working);
        for dest in dests {
            self.deliver(dest, &res_units, working.clone());
        }

        // 6. Observation buffering and backup scheduling.
        if is_obs {
            self.buffer_accepted(id, &working);
        }
    }

    /// Invoke every matching handler in registration order. Each callback
    /// is taken out of its slot around the call, so a handler may remove
    /// itself (or any other handler) without invalidating the iteration.
    fn dispatch_handlers(&mut self, id: EntryId, sample: &SharedSample) {
        let ty = sample.sample_type();
        let matching: Vec<HandlerId> = match self.tree.resource(id) {
            Some(res) => res
                .handlers
                .iter()
                .filter(|s| s.ty == ty)
                .map(|s| s.id)
                .collect(),
            None => return,
        };
        for hid in matching {
            let Some(mut cb) = self.take_handler(id, hid) else {
                continue;
            };
            cb(self, sample);
            self.restore_handler(id, hid, cb);
        }
    }

    fn buffer_accepted(&mut self, id: EntryId, sample: &SharedSample) {
        let pending_backup = {
            let Some(res) = self.tree.resource_mut(id) else {
                return;
            };
            let units = res.units.clone();
            let Some(obs) = res.observation_mut() else {
                return;
            };
            let cfg = obs.config;
            if cfg.buffer_max_count == 0 {
                return;
            }
            while obs.buffer.len() >= cfg.buffer_max_count {
                obs.buffer.pop_front();
            }
            obs.buffer.push_back(sample.clone());

            if cfg.buffer_backup_period > 0.0 {
                let now = wall_clock();
                if now - obs.last_backup >= cfg.buffer_backup_period {
                    obs.last_backup = now;
                    let window: Vec<SharedSample> = obs.buffer.iter().cloned().collect();
                    Some((units, window))
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some((units, window)) = pending_backup {
            let path = self.tree.path_of(id);
            if let Err(err) = backup::write(&self.config.backup, &path, &units, &window) {
                warn!("observation backup failed for {path}: {err:#}");
            }
        }
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    pub fn current(&self, path: &str) -> Option<SharedSample> {
        let id = self.tree.find(path)?;
        self.tree.resource(id)?.current.clone()
    }

    pub fn inspect(&self, path: &str) -> Option<ResourceInfo> {
        let id = self.tree.find(path)?;
        self.info_for(id)
    }

    fn info_for(&self, id: EntryId) -> Option<ResourceInfo> {
        let entry = self.tree.entry(id)?;
        let res = entry.resource.as_ref()?;
        Some(ResourceInfo {
            path: self.tree.path_of(id),
            kind: res.variant.kind_name(),
            declared: res.variant.declared_type(),
            units: res.units.clone(),
            timestamp: res.current.as_ref().map(|s| s.timestamp()),
            value: res.current.as_ref().map(|s| s.value().clone()),
            deleted: entry.deleted,
        })
    }

    /// Depth-first, insertion-ordered listing of every resource.
    pub fn list(&self, include_deleted: bool) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        let mut stack = vec![self.tree.root()];
        while let Some(id) = stack.pop() {
            if let Some(info) = self.info_for(id) {
                out.push(info);
            }
            let mut children: Vec<EntryId> = Vec::new();
            let mut cur = self.tree.first_child(id, include_deleted);
            while let Some(c) = cur {
                children.push(c);
                cur = self.tree.next_sibling(c, include_deleted);
            }
            // reversed so the stack pops in insertion order
            for c in children.into_iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    // -----------------------------------------------------------------
    // Snapshot coordination
    // -----------------------------------------------------------------

    /// Claim the snapshot slot and pause structural mutation.
    pub fn try_begin_snapshot(&mut self) -> Result<()> {
        if self.snapshot_active {
            return Err(HubError::Busy);
        }
        self.snapshot_active = true;
        self.tree.start_update();
        Ok(())
    }

    /// Release the snapshot slot: clear `new` on the traversed entries,
    /// resume structural mutation (applying deferred operations), and
    /// optionally flush deletion records.
    pub fn finish_snapshot(&mut self, visited: &[EntryId], flush_deletions: bool) {
        for &id in visited {
            if let Some(entry) = self.tree.entry_mut(id) {
                entry.new = false;
            }
        }
        self.end_update();
        if flush_deletions {
            self.tree.flush_deletions();
        }
        self.snapshot_active = false;
    }

    pub fn snapshot_active(&self) -> bool {
        self.snapshot_active
    }

    pub fn start_update(&mut self) {
        self.tree.start_update();
    }

    /// Resume structural mutation and apply the operations deferred while
    /// paused.
    pub fn end_update(&mut self) {
        for op in self.tree.end_update() {
            match op {
                DeferredOp::Delete(path) => {
                    if let Err(err) = self.delete_resource(&path) {
                        debug!("deferred delete of {path} failed: {err}");
                    }
                }
                DeferredOp::FlushDeletions => self.tree.flush_deletions(),
                DeferredOp::DisableTracking => {
                    self.tree.set_track_deletions(false);
                    self.tree.flush_deletions();
                }
            }
        }
    }
}

/// Coerce a value to a declared type. `None` means the push is dropped.
///
/// Accepted conversions: identity; Numeric↔String via the textual form;
/// String←Boolean; anything→Trigger (value discarded); anything→JSON via
/// the JSON text form. JSON→scalar happens only through a configured
/// extraction spec, upstream of this function.
fn coerce_value(value: &Value, declared: SampleType) -> Option<Value> {
    if value.sample_type() == declared {
        return Some(value.clone());
    }
    match declared {
        SampleType::Trigger => Some(Value::Trigger),
        SampleType::Json => Some(Value::Json(value.to_json_text())),
        SampleType::Numeric => match value {
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::Numeric),
            _ => None,
        },
        SampleType::String => match value {
            Value::Numeric(_) | Value::Boolean(_) => {
                Some(Value::String(value.to_display_string()))
            }
            _ => None,
        },
        SampleType::Boolean => match value {
            Value::String(s) => match s.trim() {
                "true" => Some(Value::Boolean(true)),
                "false" => Some(Value::Boolean(false)),
                _ => None,
            },
            _ => None,
        },
    }
}

/// Observation acceptance predicate.
///
/// minPeriod measures against the last *accepted* sample; changeBy measures
/// against the last *pushed* sample, which updates even on rejection. The
/// range check reads booleans as 0/1; a NaN limit is unset.
fn observation_accepts(
    cfg: &ObservationConfig,
    incoming: &Sample,
    current: Option<&Sample>,
    pushed: Option<&Sample>,
) -> bool {
    if cfg.min_period > 0.0
        && let Some(cur) = current
        && incoming.timestamp() - cur.timestamp() < cfg.min_period
    {
        return false;
    }

    let as_numeric = match incoming.value() {
        Value::Numeric(n) => Some(*n),
        Value::Boolean(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    };
    if let Some(n) = as_numeric {
        if !cfg.low_limit.is_nan() && n < cfg.low_limit {
            return false;
        }
        if !cfg.high_limit.is_nan() && n > cfg.high_limit {
            return false;
        }
    }

    if cfg.change_by != 0.0
        && !matches!(incoming.value(), Value::Trigger)
        && let Some(prev) = pushed
    {
        match (incoming.value(), prev.value()) {
            (Value::Numeric(a), Value::Numeric(b)) => {
                if (a - b).abs() < cfg.change_by {
                    return false;
                }
            }
            (a, b) => {
                if a == b {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_identity_and_textual() {
        assert_eq!(
            coerce_value(&Value::Numeric(1.5), SampleType::Numeric),
            Some(Value::Numeric(1.5))
        );
        assert_eq!(
            coerce_value(&Value::String(" 2.5 ".into()), SampleType::Numeric),
            Some(Value::Numeric(2.5))
        );
        assert_eq!(
            coerce_value(&Value::Numeric(3.0), SampleType::String),
            Some(Value::String("3".into()))
        );
        assert_eq!(
            coerce_value(&Value::Boolean(true), SampleType::String),
            Some(Value::String("true".into()))
        );
    }

    #[test]
    fn test_coerce_to_trigger_and_json() {
        assert_eq!(
            coerce_value(&Value::Numeric(9.0), SampleType::Trigger),
            Some(Value::Trigger)
        );
        assert_eq!(
            coerce_value(&Value::String("hi".into()), SampleType::Json),
            Some(Value::Json("\"hi\"".into()))
        );
    }

    #[test]
    fn test_coerce_rejects_the_rest() {
        assert_eq!(coerce_value(&Value::Trigger, SampleType::Numeric), None);
        assert_eq!(
            coerce_value(&Value::Json("{}".into()), SampleType::Numeric),
            None
        );
        assert_eq!(
            coerce_value(&Value::String("maybe".into()), SampleType::Boolean),
            None
        );
    }

    #[test]
    fn test_observation_range_reads_booleans_as_bits() {
        let cfg = ObservationConfig {
            low_limit: 1.0,
            ..ObservationConfig::default()
        };
        let yes = Sample::boolean(1.0, true);
        let no = Sample::boolean(2.0, false);
        assert!(observation_accepts(&cfg, &yes, None, None));
        assert!(!observation_accepts(&cfg, &no, None, None));
    }

    #[test]
    fn test_observation_change_by_non_numeric_drops_equal() {
        let cfg = ObservationConfig {
            change_by: 1.0,
            ..ObservationConfig::default()
        };
        let prev = Sample::string(1.0, "same");
        let dup = Sample::string(2.0, "same");
        let diff = Sample::string(3.0, "other");
        assert!(!observation_accepts(&cfg, &dup, Some(&prev), Some(&prev)));
        assert!(observation_accepts(&cfg, &diff, Some(&prev), Some(&prev)));
    }
}
