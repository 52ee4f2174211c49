//! Resource payloads attached to tree entries.
//!
//! A [`Resource`] is a shared base record (units, values, routes, override,
//! default, extraction, handlers) with a [`Variant`] tag. Inputs and Outputs
//! carry a fixed declared type; Observations carry filter configuration and
//! a sample buffer; a Placeholder holds admin settings for a path that has
//! no concrete producer or consumer yet.

use crate::hub::{HandlerId, PushHandler};
use crate::sample::{SampleType, SharedSample, Value};
use crate::tree::EntryId;
use std::collections::VecDeque;
use std::fmt;

/// The variant tag of a resource.
pub enum Variant {
    Input { declared: SampleType },
    Output { declared: SampleType },
    Observation(ObservationState),
    Placeholder,
}

impl Variant {
    /// Declared type for Input/Output; Observations and Placeholders have
    /// none (their current type tracks accepted samples).
    pub fn declared_type(&self) -> Option<SampleType> {
        match self {
            Variant::Input { declared } | Variant::Output { declared } => Some(*declared),
            _ => None,
        }
    }

    pub fn is_observation(&self) -> bool {
        matches!(self, Variant::Observation(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Variant::Placeholder)
    }

    /// Whether this resource is owned by a producer/consumer app. Reported
    /// as the `mandatory` field of snapshot output.
    pub fn is_io(&self) -> bool {
        matches!(self, Variant::Input { .. } | Variant::Output { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Variant::Input { .. } => "input",
            Variant::Output { .. } => "output",
            Variant::Observation(_) => "observation",
            Variant::Placeholder => "placeholder",
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Input { declared } => write!(f, "Input({declared:?})"),
            Variant::Output { declared } => write!(f, "Output({declared:?})"),
            Variant::Observation(state) => write!(f, "Observation({:?})", state.config),
            Variant::Placeholder => write!(f, "Placeholder"),
        }
    }
}

/// Filter and buffering configuration of an Observation.
///
/// Zero disables a period or change threshold; NaN means an unset limit.
#[derive(Debug, Clone, Copy)]
pub struct ObservationConfig {
    /// Minimum seconds between accepted samples.
    pub min_period: f64,
    /// Lower acceptance bound for numeric/boolean samples.
    pub low_limit: f64,
    /// Upper acceptance bound for numeric/boolean samples.
    pub high_limit: f64,
    /// Minimum magnitude of change against the last pushed sample.
    pub change_by: f64,
    /// FIFO buffer capacity; zero disables buffering.
    pub buffer_max_count: usize,
    /// Minimum seconds between backups of the buffer; zero disables them.
    pub buffer_backup_period: f64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            min_period: 0.0,
            low_limit: f64::NAN,
            high_limit: f64::NAN,
            change_by: 0.0,
            buffer_max_count: 0,
            buffer_backup_period: 0.0,
        }
    }
}

/// Live state of an Observation: its configuration plus the sample ring.
#[derive(Debug, Default)]
pub struct ObservationState {
    pub config: ObservationConfig,
    /// FIFO ring of accepted samples; drop-oldest at capacity.
    pub buffer: VecDeque<SharedSample>,
    /// Wall-clock time of the last buffer backup.
    pub last_backup: f64,
}

/// One registered push handler subscription.
///
/// The callback slot is taken out for the duration of its own invocation;
/// an empty slot therefore marks a handler that is currently running (or
/// was removed mid-dispatch).
pub struct HandlerSlot {
    pub id: HandlerId,
    pub ty: SampleType,
    pub cb: Option<PushHandler>,
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("id", &self.id)
            .field("ty", &self.ty)
            .field("active", &self.cb.is_some())
            .finish()
    }
}

/// The value-carrying payload of an Entry.
#[derive(Debug)]
pub struct Resource {
    pub variant: Variant,
    /// Opaque units string; empty means unit-less. Never normalized.
    pub units: String,
    /// Most recently accepted sample.
    pub current: Option<SharedSample>,
    /// Most recently pushed sample, recorded whether or not it was accepted.
    pub pushed: Option<SharedSample>,
    /// Upstream route; at most one.
    pub source: Option<EntryId>,
    /// Downstream routes. Weak references by id: routes never own the
    /// target entry.
    pub destinations: Vec<EntryId>,
    /// Administrative override; active only when type-compatible.
    pub override_value: Option<(SampleType, Value)>,
    /// Default emitted to a newly connected consumer with no current value.
    pub default_value: Option<(SampleType, Value)>,
    /// Dotted/indexed extraction applied to incoming JSON samples.
    pub json_extraction: Option<String>,
    pub handlers: Vec<HandlerSlot>,
}

impl Resource {
    pub fn new(variant: Variant, units: impl Into<String>) -> Self {
        Self {
            variant,
            units: units.into(),
            current: None,
            pushed: None,
            source: None,
            destinations: Vec::new(),
            override_value: None,
            default_value: None,
            json_extraction: None,
            handlers: Vec::new(),
        }
    }

    pub fn placeholder() -> Self {
        Self::new(Variant::Placeholder, "")
    }

    /// Current type: the declared type for Input/Output, otherwise the type
    /// of the most recently accepted sample.
    pub fn current_type(&self) -> Option<SampleType> {
        match self.variant.declared_type() {
            Some(declared) => Some(declared),
            None => self.current.as_ref().map(|s| s.sample_type()),
        }
    }

    /// Whether the override is in effect. For Input/Output it must match
    /// the declared type; Observations and Placeholders have no declared
    /// type to mismatch.
    pub fn active_override(&self) -> Option<&Value> {
        let (ty, value) = self.override_value.as_ref()?;
        match self.variant.declared_type() {
            Some(declared) if declared != *ty => None,
            _ => Some(value),
        }
    }

    /// Whether the default is in effect (same type rule as the override).
    pub fn active_default(&self) -> Option<&Value> {
        let (ty, value) = self.default_value.as_ref()?;
        match self.variant.declared_type() {
            Some(declared) if declared != *ty => None,
            _ => Some(value),
        }
    }

    /// Whether admin settings survive the removal of the concrete resource.
    /// Determines demotion to Placeholder instead of release.
    pub fn has_admin_settings(&self) -> bool {
        self.source.is_some()
            || !self.destinations.is_empty()
            || self.override_value.is_some()
            || self.default_value.is_some()
            || self.json_extraction.is_some()
    }

    pub fn observation(&self) -> Option<&ObservationState> {
        match &self.variant {
            Variant::Observation(state) => Some(state),
            _ => None,
        }
    }

    pub fn observation_mut(&mut self) -> Option<&mut ObservationState> {
        match &mut self.variant {
            Variant::Observation(state) => Some(state),
            _ => None,
        }
    }
}
