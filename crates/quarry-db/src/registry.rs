//! Per-tenant model registry.
//!
//! A model is compiled (its DDL applied) exactly once per tenant, on first
//! registration or first lazy access. Registering the same name twice is
//! an error; lazy access through [`ModelRegistry::model`] is not.

use std::collections::HashMap;
use std::sync::Arc;

use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::descriptor::{Model, ModelDescriptor};
use tokio::sync::RwLock;
use tracing::info;

use crate::accessor::SurrealRecordAccessor;
use crate::connection::ConnectionHandle;
use crate::schema;

/// A compiled model bound to the tenant connection it was compiled on.
#[derive(Debug)]
pub struct RegisteredModel {
    descriptor: ModelDescriptor,
    handle: ConnectionHandle,
}

impl RegisteredModel {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn accessor(self: &Arc<Self>) -> SurrealRecordAccessor {
        SurrealRecordAccessor::new(Arc::clone(self))
    }
}

pub struct ModelRegistry {
    handle: ConnectionHandle,
    models: RwLock<HashMap<String, Arc<RegisteredModel>>>,
}

impl ModelRegistry {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Compile and register `descriptor` under its name.
    ///
    /// Fails with [`QuarryError::MissingSchema`] for a descriptor without
    /// fields and with [`QuarryError::DuplicateModel`] if the name is
    /// already registered on this tenant.
    pub async fn register(&self, descriptor: ModelDescriptor) -> QuarryResult<Arc<RegisteredModel>> {
        descriptor.check()?;

        let mut models = self.models.write().await;
        if models.contains_key(descriptor.name()) {
            return Err(QuarryError::DuplicateModel {
                name: descriptor.name().to_string(),
            });
        }
        self.compile(&mut models, descriptor).await
    }

    /// Register the model type `M`.
    pub async fn register_model<M: Model>(&self) -> QuarryResult<Arc<RegisteredModel>> {
        self.register(M::descriptor()).await
    }

    /// The registered model `M`, compiling it on first access.
    pub async fn model<M: Model>(&self) -> QuarryResult<Arc<RegisteredModel>> {
        let descriptor = M::descriptor();
        if let Some(model) = self.models.read().await.get(descriptor.name()) {
            return Ok(Arc::clone(model));
        }

        descriptor.check()?;
        let mut models = self.models.write().await;
        // Another task may have compiled it while we waited for the lock.
        if let Some(model) = models.get(descriptor.name()) {
            return Ok(Arc::clone(model));
        }
        self.compile(&mut models, descriptor).await
    }

    pub async fn get(&self, name: &str) -> Option<Arc<RegisteredModel>> {
        self.models.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.models.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget a model. Its table and data are left in the store.
    pub async fn deregister(&self, name: &str) -> bool {
        self.models.write().await.remove(name).is_some()
    }

    async fn compile(
        &self,
        models: &mut HashMap<String, Arc<RegisteredModel>>,
        descriptor: ModelDescriptor,
    ) -> QuarryResult<Arc<RegisteredModel>> {
        let client = self.handle.client()?;
        schema::define_model(&client, &descriptor).await?;

        info!(
            model = descriptor.name(),
            fields = descriptor.fields().len(),
            connection = %self.handle.id(),
            "Model registered"
        );

        let model = Arc::new(RegisteredModel {
            descriptor,
            handle: self.handle.clone(),
        });
        models.insert(model.name().to_string(), Arc::clone(&model));
        Ok(model)
    }
}
