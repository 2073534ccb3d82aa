use async_trait::async_trait;
use crate::catalog::Service;
use crate::errors::BreachlineError;
use crate::session::{LogSnapshot, SessionId};

/// The remote service that performs exploitation attempts.
///
/// Calls carry no timeouts of their own; adapters configure them.
#[async_trait]
pub trait ExploitBackend: Send + Sync {
    /// Begin an attempt against `service`, returning a fresh session token.
    async fn start(&self, service: &Service) -> Result<SessionId, BreachlineError>;

    async fn stop(&self, session_id: &SessionId) -> Result<(), BreachlineError>;

    /// Full cumulative log for the session. Delta computation is the caller's job.
    async fn get_logs(&self, session_id: &SessionId) -> Result<LogSnapshot, BreachlineError>;

    /// Deliver an operator command; callers treat this as fire-and-forget.
    async fn send_command(&self, session_id: &SessionId, command: &str) -> Result<(), BreachlineError>;

    /// Backend name for logging
    fn backend_name(&self) -> &str;
}
