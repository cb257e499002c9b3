use crate::error::AuthFlowError;
use crate::models::SessionMechanism;
use crate::utils::logging::LoggingHelper;

/// Stages of a single login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    Authorizing,
    CallbackReceived,
    TokenExchanged,
    IdentityVerified,
    ProfileResolved,
    MemberResolved,
    SessionEstablished(SessionMechanism),
    SessionDegraded,
    /// Carries the stable error code of the failure
    Failed(&'static str),
}

impl FlowStage {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Authorizing => 1,
            Self::CallbackReceived => 2,
            Self::TokenExchanged => 3,
            Self::IdentityVerified => 4,
            Self::ProfileResolved => 5,
            Self::MemberResolved => 6,
            Self::SessionEstablished(_) | Self::SessionDegraded => 7,
            Self::Failed(_) => u8::MAX,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SessionEstablished(_) | Self::SessionDegraded | Self::Failed(_)
        )
    }

    /// Whether `next` is a legal successor of `self`
    ///
    /// Each stage only moves to its immediate successor; any non-terminal
    /// stage may fail.
    #[must_use]
    pub fn can_advance_to(self, next: FlowStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed(_) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Authorizing => "Authorizing",
            Self::CallbackReceived => "CallbackReceived",
            Self::TokenExchanged => "TokenExchanged",
            Self::IdentityVerified => "IdentityVerified",
            Self::ProfileResolved => "ProfileResolved",
            Self::MemberResolved => "MemberResolved",
            Self::SessionEstablished(_) => "SessionEstablished",
            Self::SessionDegraded => "SessionDegraded",
            Self::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionEstablished(mechanism) => write!(f, "SessionEstablished({mechanism})"),
            Self::Failed(code) => write!(f, "Failed({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// A login attempt that stopped before establishing a session
#[derive(Debug)]
pub struct FlowFailure {
    pub correlation_id: String,
    /// Last stage reached before the failure
    pub stage: FlowStage,
    pub error: AuthFlowError,
}

/// Forward-only progress of one login attempt
#[derive(Debug, Clone)]
pub struct FlowProgress {
    correlation_id: String,
    history: Vec<FlowStage>,
}

impl FlowProgress {
    #[must_use]
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            history: vec![FlowStage::Idle],
        }
    }

    /// Progress of a callback: the transaction it carries proves the
    /// attempt already went through `Authorizing`
    #[must_use]
    pub fn resume(correlation_id: impl Into<String>) -> Self {
        let mut progress = Self::new(correlation_id);
        progress.history.push(FlowStage::Authorizing);
        progress
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub fn stage(&self) -> FlowStage {
        self.history.last().copied().unwrap_or(FlowStage::Idle)
    }

    #[must_use]
    pub fn history(&self) -> &[FlowStage] {
        &self.history
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns `Internal` for a transition that skips or revisits a stage
    pub fn advance(&mut self, next: FlowStage) -> Result<(), AuthFlowError> {
        let current = self.stage();
        if !current.can_advance_to(next) {
            return Err(AuthFlowError::Internal(format!(
                "illegal login flow transition {current} -> {next}"
            )));
        }
        LoggingHelper::log_stage_transition(
            &self.correlation_id,
            &current.to_string(),
            &next.to_string(),
        );
        self.history.push(next);
        Ok(())
    }

    /// Record `error` as the terminal failure of this attempt
    #[must_use]
    pub fn fail(mut self, error: AuthFlowError) -> FlowFailure {
        let stage = self.stage();
        LoggingHelper::log_flow_failed(
            &self.correlation_id,
            stage.name(),
            error.code(),
            &error.to_string(),
        );
        if !stage.is_terminal() {
            self.history.push(FlowStage::Failed(error.code()));
        }
        FlowFailure {
            correlation_id: self.correlation_id,
            stage,
            error,
        }
    }
}
