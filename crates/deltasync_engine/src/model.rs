//! Observable models that turn property changes into deltas.

use crate::repo::OperationRepo;
use deltasync_protocol::{Delta, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// A single property change on a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChangedArgs {
    /// Id of the changed model.
    pub model_id: String,
    /// Model-class tag.
    pub model_type: String,
    /// Property path that changed.
    pub property: String,
    /// Value before the change.
    pub old_value: Value,
    /// Value after the change.
    pub new_value: Value,
}

/// Receives model changes synchronously, before `set` returns.
pub trait ModelChangeObserver: Send + Sync {
    /// Called once per property change.
    fn on_changed(&self, args: &ModelChangedArgs);
}

/// A model with named properties.
///
/// Setting a property to the value it already holds does not notify.
/// Concurrent `set` calls are serialized from the write through the last
/// observer, so observers see changes in the order the values were written.
/// An observer must not call `set` on the model that notified it.
pub struct Model {
    model_id: String,
    model_type: String,
    properties: RwLock<BTreeMap<String, Value>>,
    observers: RwLock<Vec<Arc<dyn ModelChangeObserver>>>,
    /// Held from the property write until every observer has returned.
    notify: Mutex<()>,
}

impl Model {
    /// Creates an empty model.
    pub fn new(model_id: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            model_type: model_type.into(),
            properties: RwLock::new(BTreeMap::new()),
            observers: RwLock::new(Vec::new()),
            notify: Mutex::new(()),
        }
    }

    /// The model id.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The model-class tag.
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// Adds an observer.
    pub fn subscribe(&self, observer: Arc<dyn ModelChangeObserver>) {
        self.observers.write().push(observer);
    }

    /// Current value of a property, `Null` if unset.
    pub fn get(&self, property: &str) -> Value {
        self.properties
            .read()
            .get(property)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Sets a property and notifies observers of the change.
    pub fn set(&self, property: &str, value: impl Into<Value>) {
        let new_value = value.into();
        let _notifying = self.notify.lock();
        let old_value = {
            let mut properties = self.properties.write();
            let old = properties
                .insert(property.to_string(), new_value.clone())
                .unwrap_or(Value::Null);
            if old == new_value {
                return;
            }
            old
        };

        let args = ModelChangedArgs {
            model_id: self.model_id.clone(),
            model_type: self.model_type.clone(),
            property: property.to_string(),
            old_value,
            new_value,
        };
        // Observers run outside the property lock so they may read the model.
        // The notify lock keeps another write from overtaking this one.
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_changed(&args);
        }
    }
}

/// Records every model change as a delta in an [`OperationRepo`].
pub struct DeltaRecorder {
    repo: Arc<OperationRepo>,
}

impl DeltaRecorder {
    /// Creates a recorder feeding `repo`.
    pub fn new(repo: Arc<OperationRepo>) -> Self {
        Self { repo }
    }
}

impl ModelChangeObserver for DeltaRecorder {
    fn on_changed(&self, args: &ModelChangedArgs) {
        let delta = Delta::new(
            args.model_id.clone(),
            args.model_type.clone(),
            args.property.clone(),
            args.new_value.clone(),
        );
        if let Err(err) = self.repo.enqueue(delta) {
            warn!(
                identifier = %args.model_id,
                property = %args.property,
                error = %err,
                "failed to record model change"
            );
        }
    }
}
