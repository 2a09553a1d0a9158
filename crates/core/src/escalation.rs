//! Escalation procedures and handlers.

use crate::cause::Cause;
use crate::type_key::TypeKey;

/// One declared `(cause kind, handler)` entry.
#[derive(Debug, Clone)]
pub struct Escalation<F> {
    /// Kind of cause this entry handles, including subtypes.
    pub kind: TypeKey,

    /// What handles it (a flow, in the engine).
    pub handler: F,
}

/// Ordered table of escalations.
///
/// Lookup is first-match-wins in declaration order: an entry for a
/// supertype declared before an entry for its subtype shadows the subtype
/// entry.
#[derive(Debug, Clone)]
pub struct EscalationProcedure<F> {
    escalations: Vec<Escalation<F>>,
}

impl<F> EscalationProcedure<F> {
    /// Create an empty procedure.
    pub fn new() -> Self {
        Self {
            escalations: Vec::new(),
        }
    }

    /// Create from entries in declaration order.
    pub fn from_entries(escalations: Vec<Escalation<F>>) -> Self {
        Self { escalations }
    }

    /// Append an entry.
    pub fn push(&mut self, kind: impl Into<TypeKey>, handler: F) {
        self.escalations.push(Escalation {
            kind: kind.into(),
            handler,
        });
    }

    /// First entry whose kind is a supertype of the cause's kind.
    ///
    /// `None` tells the caller to propagate to the next scope.
    pub fn get_escalation(&self, cause: &Cause) -> Option<&Escalation<F>> {
        self.escalations.iter().find(|e| cause.is_a(&e.kind))
    }

    /// Entries in declaration order.
    pub fn escalations(&self) -> &[Escalation<F>] {
        &self.escalations
    }

    /// Whether no entries are declared.
    pub fn is_empty(&self) -> bool {
        self.escalations.is_empty()
    }
}

impl<F> Default for EscalationProcedure<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler bound to a ProcessState at creation.
///
/// Returning `Err` passes the (possibly replaced) cause on to the
/// platform handler.
pub trait EscalationHandler: Send + Sync {
    /// Handle an escalation that no flow-level procedure matched.
    fn handle_escalation(&self, cause: &Cause) -> Result<(), Cause>;
}

impl<F> EscalationHandler for F
where
    F: Fn(&Cause) -> Result<(), Cause> + Send + Sync,
{
    fn handle_escalation(&self, cause: &Cause) -> Result<(), Cause> {
        self(cause)
    }
}

/// Terminal platform-level handler. Must not fail.
pub trait PlatformEscalationHandler: Send + Sync {
    /// Handle an escalation that reached the platform boundary.
    fn handle_platform_escalation(&self, cause: &Cause);
}

/// Default platform handler: logs the cause.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEscalationHandler;

impl PlatformEscalationHandler for LoggingEscalationHandler {
    fn handle_platform_escalation(&self, cause: &Cause) {
        tracing::error!(
            kind = %cause.kind(),
            root = %cause.root(),
            "Unhandled escalation reached the platform: {}",
            cause.message()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins_over_specificity() {
        let mut procedure = EscalationProcedure::new();
        procedure.push("io", "io-handler");
        procedure.push("io.timeout", "timeout-handler");

        let cause = Cause::new("io.timeout", "slow");
        let escalation = procedure.get_escalation(&cause).unwrap();
        assert_eq!(escalation.handler, "io-handler");
    }

    #[test]
    fn test_subtype_declared_first_is_used() {
        let mut procedure = EscalationProcedure::new();
        procedure.push("io.timeout", "timeout-handler");
        procedure.push("io", "io-handler");

        let timeout = Cause::new("io.timeout", "slow");
        let closed = Cause::new("io.closed", "eof");
        assert_eq!(procedure.get_escalation(&timeout).unwrap().handler, "timeout-handler");
        assert_eq!(procedure.get_escalation(&closed).unwrap().handler, "io-handler");
    }

    #[test]
    fn test_no_match_propagates() {
        let mut procedure = EscalationProcedure::new();
        procedure.push("io", ());
        assert!(procedure.get_escalation(&Cause::new("parse", "bad")).is_none());
        assert!(EscalationProcedure::<()>::new()
            .get_escalation(&Cause::new("io", "x"))
            .is_none());
    }

    #[test]
    fn test_closure_handler() {
        let handler = |cause: &Cause| {
            if cause.is_a(&TypeKey::new("io")) {
                Ok(())
            } else {
                Err(cause.clone())
            }
        };
        assert!(handler.handle_escalation(&Cause::new("io.closed", "x")).is_ok());
        assert!(handler.handle_escalation(&Cause::new("parse", "x")).is_err());
    }
}
