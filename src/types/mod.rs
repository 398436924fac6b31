//! Core domain types shared across the pipeline.

mod envelope;
mod ids;

pub use envelope::WebhookEnvelope;
pub use ids::{MissingTenant, Tenant, WebhookId};
