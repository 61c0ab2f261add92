//! Replay runtime: recorded event logs as an event source
//!
//! A replay log is a JSON document describing the types of a traced program
//! and the entry/exit events it produced, including hostile behaviour such
//! as redefined `name` methods, values that raise when their type is
//! queried, and types whose metadata is broken.
//!
//! ```json
//! {
//!   "types": {
//!     "Cart": { "members": { "total": "Cart" } },
//!     "Integer": {}
//!   },
//!   "events": [
//!     { "kind": "call", "caller": { "path": "main.rb", "line": 1 },
//!       "callee": { "path": "app/cart.rb", "line": 4 },
//!       "receiver": { "instance": "Cart" }, "member": "total",
//!       "locals": [ { "name": "qty", "value": { "instance": "Integer" } } ] },
//!     { "kind": "return", "caller": { "path": "main.rb", "line": 1 },
//!       "callee": { "path": "app/cart.rb", "line": 6 },
//!       "receiver": { "instance": "Cart" }, "member": "total",
//!       "return_value": { "instance": "Integer" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::debug;

use crate::error::{IntrospectionError, TracerError};
use crate::event::{dispatch, Event, EventHandler, EventKind, EventSource, SourceSite};
use crate::runtime::{Scope, TypeKind, TypeMetadata, TypeObject, TypeRef, Value, ValueRef};

/// Errors loading a replay log
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read replay log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed replay log: {0}")]
    Json(#[from] serde_json::Error),
}

/// Description of one type in a replay log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeRecord {
    pub kind: TypeKind,
    /// Registered name; defaults to the type's key. `null` marks an anonymous type
    #[serde(with = "explicit_null")]
    pub name: Option<Option<String>>,
    /// Default textual form used when the type is anonymous
    pub description: Option<String>,
    /// Value returned by a user-level redefinition of `name`
    pub renamed_to: Option<String>,
    /// Failure kind raised whenever the metadata is read
    pub broken: Option<String>,
    /// Member name -> key of the type that defines it
    pub members: BTreeMap<String, String>,
    /// Key of the singleton type searched for class-level members
    pub singleton: Option<String>,
    /// Failure kind raised by member owner lookups
    pub lookup_error: Option<String>,
}

/// A runtime value in a replay log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRecord {
    /// Instance of the named type
    Instance(String),
    /// The named type itself
    Type(String),
    /// Querying the value's type raises this failure kind
    Raises(String),
    /// Reading the variable raises this failure kind
    Unreadable(String),
}

impl Default for ValueRecord {
    fn default() -> Self {
        ValueRecord::Instance("Object".to_string())
    }
}

/// A bound local in a replay log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub name: String,
    pub value: ValueRecord,
}

/// One recorded event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRecord {
    pub kind: EventKind,
    #[serde(default)]
    pub caller: SourceSite,
    pub callee: SourceSite,
    #[serde(default)]
    pub receiver: ValueRecord,
    #[serde(default)]
    pub defined_type: Option<String>,
    #[serde(default)]
    pub member: Option<String>,
    #[serde(default)]
    pub locals: Vec<LocalRecord>,
    #[serde(default)]
    pub return_value: Option<ValueRecord>,
    /// Failure kind raised when the scope's bindings are enumerated
    #[serde(default)]
    pub broken_scope: Option<String>,
}

/// A complete replay log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayLog {
    #[serde(default)]
    pub types: BTreeMap<String, TypeRecord>,
    pub events: Vec<EventRecord>,
}

impl ReplayLog {
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let json = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// `Option<Option<T>>` that tells a missing field apart from an explicit `null`
mod explicit_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Option<String>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            None => serializer.serialize_none(),
            Some(inner) => inner.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<String>>, D::Error> {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

/// Types of a replay log, shared by all of its values and scopes
struct World {
    types: HashMap<String, Arc<ReplayType>>,
}

impl World {
    fn build(records: &BTreeMap<String, TypeRecord>) -> Arc<World> {
        let mut records = records.clone();
        for builtin in ["Object", "Class", "Module"] {
            records.entry(builtin.to_string()).or_default();
        }

        Arc::new_cyclic(|world: &Weak<World>| World {
            types: records
                .into_iter()
                .map(|(key, record)| {
                    let ty = ReplayType {
                        key: key.clone(),
                        record,
                        world: world.clone(),
                    };
                    (key, Arc::new(ty))
                })
                .collect(),
        })
    }

    fn get(&self, key: &str) -> Result<TypeRef, IntrospectionError> {
        self.types
            .get(key)
            .map(|ty| ty.clone() as TypeRef)
            .ok_or_else(|| IntrospectionError::new("NameError", format!("uninitialized constant {}", key)))
    }

    fn record(&self, key: &str) -> Option<&TypeRecord> {
        self.types.get(key).map(|ty| &ty.record)
    }
}

struct ReplayType {
    key: String,
    record: TypeRecord,
    world: Weak<World>,
}

impl ReplayType {
    fn world(&self) -> Result<Arc<World>, IntrospectionError> {
        self.world
            .upgrade()
            .ok_or_else(|| IntrospectionError::new("RuntimeError", "replay runtime torn down"))
    }
}

impl TypeObject for ReplayType {
    fn metadata(&self) -> Result<TypeMetadata, IntrospectionError> {
        if let Some(kind) = &self.record.broken {
            return Err(IntrospectionError::new(
                kind.clone(),
                format!("metadata of {} is inconsistent", self.key),
            ));
        }
        let name = match &self.record.name {
            None => Some(self.key.clone()),
            Some(explicit) => explicit.clone(),
        };
        let description = match (&self.record.description, &name) {
            (Some(description), _) => description.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => format!("#<{}:0x{:016x}>", self.record.kind, anonymous_address(&self.key)),
        };
        Ok(TypeMetadata {
            kind: self.record.kind,
            name,
            description,
        })
    }

    fn name(&self) -> Result<Option<String>, IntrospectionError> {
        match &self.record.renamed_to {
            Some(renamed) => Ok(Some(renamed.clone())),
            None => self.metadata().map(|meta| meta.name),
        }
    }

    fn owner_of(&self, member: &str) -> Result<Option<TypeRef>, IntrospectionError> {
        if let Some(kind) = &self.record.lookup_error {
            return Err(IntrospectionError::new(
                kind.clone(),
                format!("lookup of {} failed", member),
            ));
        }
        match self.record.members.get(member) {
            Some(owner) => self.world()?.get(owner).map(Some),
            None => Ok(None),
        }
    }
}

/// Stable fake address for an anonymous type
fn anonymous_address(key: &str) -> u64 {
    key.bytes().fold(0x7f00_0000_0000u64, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(u64::from(b))
    }) | 0x1000_0000_0000_0000
}

struct ReplayValue {
    record: ValueRecord,
    world: Arc<World>,
}

impl Value for ReplayValue {
    fn type_of(&self) -> Result<TypeRef, IntrospectionError> {
        match &self.record {
            ValueRecord::Instance(key) => self.world.get(key),
            ValueRecord::Type(key) => {
                let kind = self.world.record(key).map(|r| r.kind).unwrap_or_default();
                self.world.get(&kind.to_string())
            }
            ValueRecord::Raises(kind) | ValueRecord::Unreadable(kind) => Err(
                IntrospectionError::new(kind.clone(), "raised while querying the value's class"),
            ),
        }
    }

    fn as_type(&self) -> Option<TypeRef> {
        match &self.record {
            ValueRecord::Type(key) => self.world.get(key).ok(),
            _ => None,
        }
    }

    fn dispatch_type(&self) -> Result<TypeRef, IntrospectionError> {
        match &self.record {
            ValueRecord::Type(key) => match self.world.record(key).and_then(|r| r.singleton.as_deref()) {
                Some(singleton) => self.world.get(singleton),
                None => self.type_of(),
            },
            _ => self.type_of(),
        }
    }
}

struct ReplayScope {
    receiver: ValueRecord,
    locals: Vec<LocalRecord>,
    broken: Option<String>,
    world: Arc<World>,
}

impl ReplayScope {
    fn value(&self, record: &ValueRecord) -> Result<ValueRef, IntrospectionError> {
        if let ValueRecord::Unreadable(kind) = record {
            return Err(IntrospectionError::new(kind.clone(), "variable could not be read"));
        }
        Ok(Arc::new(ReplayValue {
            record: record.clone(),
            world: self.world.clone(),
        }))
    }
}

impl Scope for ReplayScope {
    fn local_names(&self) -> Result<Vec<String>, IntrospectionError> {
        if let Some(kind) = &self.broken {
            return Err(IntrospectionError::new(kind.clone(), "binding unavailable"));
        }
        Ok(self.locals.iter().map(|local| local.name.clone()).collect())
    }

    fn local(&self, name: &str) -> Result<ValueRef, IntrospectionError> {
        let local = self
            .locals
            .iter()
            .find(|local| local.name == name)
            .ok_or_else(|| {
                IntrospectionError::new("NameError", format!("undefined local variable {}", name))
            })?;
        self.value(&local.value)
    }

    fn receiver(&self) -> Result<ValueRef, IntrospectionError> {
        self.value(&self.receiver)
    }
}

/// Event source replaying a [`ReplayLog`]
pub struct ReplaySource {
    events: Vec<Event>,
    handler: Option<Arc<dyn EventHandler>>,
    enabled: bool,
    // Keeps the types alive for as long as events can reference them
    _world: Arc<World>,
}

impl ReplaySource {
    pub fn new(log: &ReplayLog) -> Self {
        let world = World::build(&log.types);
        let events = log
            .events
            .iter()
            .map(|record| Self::materialize(record, &world))
            .collect();
        Self {
            events,
            handler: None,
            enabled: false,
            _world: world,
        }
    }

    fn materialize(record: &EventRecord, world: &Arc<World>) -> Event {
        let scope = ReplayScope {
            receiver: record.receiver.clone(),
            locals: record.locals.clone(),
            broken: record.broken_scope.clone(),
            world: world.clone(),
        };
        let return_value = record.return_value.as_ref().map(|value| {
            Arc::new(ReplayValue {
                record: value.clone(),
                world: world.clone(),
            }) as ValueRef
        });
        Event {
            kind: record.kind,
            caller: record.caller.clone(),
            callee: record.callee.clone(),
            scope: Arc::new(scope),
            defined_type: record
                .defined_type
                .as_deref()
                .and_then(|key| world.get(key).ok()),
            member: record.member.clone(),
            return_value,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deliver every recorded event; returns the number delivered
    pub fn run(&self) -> Result<usize, TracerError> {
        self.run_first(self.events.len())
    }

    /// Deliver the first `count` recorded events
    ///
    /// Nothing is delivered while the source is disabled or has no
    /// subscriber. The first handler error stops the replay.
    pub fn run_first(&self, count: usize) -> Result<usize, TracerError> {
        let handler = match (&self.handler, self.enabled) {
            (Some(handler), true) => handler,
            _ => {
                debug!("replay source idle; no events delivered");
                return Ok(0);
            }
        };

        let mut delivered = 0;
        for event in self.events.iter().take(count) {
            dispatch(handler.as_ref(), event)?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

impl EventSource for ReplaySource {
    fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.handler = Some(handler);
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}
