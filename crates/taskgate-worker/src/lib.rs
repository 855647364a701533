#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **taskgate-worker** – ingress, the background LM call driver,
//! cancellation and health checks for the task gateway.
//!
//! [`TaskService`] is the single facade the gateway binary talks to: it
//! wires a storage [`taskgate_store_core::Backend`], the per-task
//! [`taskgate_store_sqlite::TaskSerializer`], the [`taskgate_sse::SseHub`]
//! and a [`taskgate_llm::FallbackManager`] together, and exposes the
//! operations behind `/api/message`, `/api/tasks`, `/api/tasks/{id}/cancel`
//! and `/api/stream/task/{id}`.

pub mod cancel;
pub mod driver;
pub mod health;
pub mod ingress;
pub mod service;

pub use cancel::CancelError;
pub use health::{ReadinessProfile, ReadinessReport};
pub use ingress::IngressError;
pub use service::{ServiceError, TaskDetail, TaskService};
