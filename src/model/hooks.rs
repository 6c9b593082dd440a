use crate::{engine::Engine, error::Result, model::Model};

/// Per-model behaviour layered over the generic CRUD protocol.
///
/// Every method has a default. `create`, `update` and `delete` delegate to
/// the storage routines on [`Model`]; override them for models whose data
/// does not live at a plain config path. They run only after validation
/// succeeds.
pub trait ModelHooks: Send + Sync {
    /// Model-wide checks run after every field validated.
    fn validate_extra(&self, _model: &Model, _engine: &Engine) -> Result<()> {
        Ok(())
    }

    fn create(&self, model: &mut Model, engine: &Engine) -> Result<()> {
        model.default_create(engine)
    }

    fn update(&self, model: &mut Model, engine: &Engine) -> Result<()> {
        model.default_update(engine)
    }

    fn delete(&self, model: &mut Model, engine: &Engine) -> Result<()> {
        model.default_delete(engine)
    }

    /// Post-commit side effects such as reloading a service.
    fn apply(&self, _model: &Model, _engine: &Engine) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ModelHooks for DefaultHooks {}
