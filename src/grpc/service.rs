//! Admission service implementation.

use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::turnstile::admission::v1::{
    admission_request::Action,
    admission_response::{Code, PolicyKind as ProtoPolicyKind},
    admission_service_server::AdmissionService,
    AdmissionRequest, AdmissionResponse,
};

use crate::ratelimit::{Decision, PolicyKind, PolicyRegistry};

/// Implementation of the `AdmissionService` gRPC interface.
pub struct AdmissionServiceImpl {
    /// The policies requests are evaluated against
    registry: Arc<PolicyRegistry>,
}

impl AdmissionServiceImpl {
    /// Create a new AdmissionServiceImpl over the given registry.
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry }
    }
}

fn to_proto_duration(duration: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

impl From<PolicyKind> for ProtoPolicyKind {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::SlidingWindow => ProtoPolicyKind::SlidingWindow,
            PolicyKind::IntervalThrottle => ProtoPolicyKind::IntervalThrottle,
        }
    }
}

#[tonic::async_trait]
impl AdmissionService for AdmissionServiceImpl {
    /// Decide whether a request from an identity is admitted.
    ///
    /// `RECORD` commits an admitted request; `CHECK` only reports what
    /// `RECORD` would decide right now.
    #[instrument(
        skip(self, request),
        fields(
            policy = %request.get_ref().policy,
            user_id = %request.get_ref().user_id
        )
    )]
    async fn should_admit(
        &self,
        request: Request<AdmissionRequest>,
    ) -> Result<Response<AdmissionResponse>, Status> {
        let req = request.into_inner();

        // The generated getter maps unknown values to RECORD, which commits
        let action = Action::try_from(req.action).map_err(|_| {
            warn!(action = req.action, "Received admission request with unknown action");
            Status::invalid_argument("unknown action")
        })?;

        debug!(action = ?action, "Processing admission request");

        if req.policy.is_empty() {
            warn!("Received admission request with empty policy");
            return Err(Status::invalid_argument("policy is required"));
        }

        if req.user_id.is_empty() {
            warn!("Received admission request with empty user_id");
            return Err(Status::invalid_argument("user_id is required"));
        }

        let policy = self.registry.get(&req.policy).ok_or_else(|| {
            warn!("Received admission request for unknown policy");
            Status::not_found(format!("unknown policy: {}", req.policy))
        })?;

        let Decision {
            allowed,
            retry_after,
        } = match action {
            Action::Record => policy.decide(&req.user_id),
            Action::Check => policy.peek(&req.user_id),
        };

        let code = if allowed { Code::Ok } else { Code::OverLimit };

        info!(
            action = ?action,
            code = ?code,
            retry_after_ms = retry_after.as_millis() as u64,
            "Admission decision made"
        );

        Ok(Response::new(AdmissionResponse {
            code: code.into(),
            retry_after: Some(to_proto_duration(retry_after)),
            policy_kind: ProtoPolicyKind::from(policy.kind()).into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{default_policies, ManualClock};

    fn service() -> (AdmissionServiceImpl, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let registry = PolicyRegistry::from_config(&default_policies(), clock.clone()).unwrap();
        (AdmissionServiceImpl::new(Arc::new(registry)), clock)
    }

    fn request(policy: &str, user_id: &str, action: Action) -> Request<AdmissionRequest> {
        Request::new(AdmissionRequest {
            policy: policy.to_string(),
            user_id: user_id.to_string(),
            action: action.into(),
        })
    }

    #[tokio::test]
    async fn test_empty_policy_rejected() {
        let (service, _clock) = service();

        let result = service.should_admit(request("", "user", Action::Record)).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_empty_user_rejected() {
        let (service, _clock) = service();

        let result = service
            .should_admit(request("throttle", "", Action::Record))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_policy_not_found() {
        let (service, _clock) = service();

        let result = service
            .should_admit(request("missing", "user", Action::Record))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_action_rejected_without_commit() {
        let (service, _clock) = service();

        let result = service
            .should_admit(Request::new(AdmissionRequest {
                policy: "throttle".to_string(),
                user_id: "user".to_string(),
                action: 7,
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);

        let throttle = service.registry.get("throttle").unwrap();
        assert_eq!(throttle.tracked_users(), 0);
        assert!(throttle.can_send("user"));
    }

    #[tokio::test]
    async fn test_check_on_interval_edge_is_consistent() {
        let (service, clock) = service();

        service
            .should_admit(request("throttle", "user", Action::Record))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        let response = service
            .should_admit(request("throttle", "user", Action::Check))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::Ok);
        assert_eq!(response.retry_after, Some(to_proto_duration(Duration::ZERO)));
    }

    #[tokio::test]
    async fn test_record_then_over_limit() {
        let (service, clock) = service();

        let response = service
            .should_admit(request("sliding_window", "1", Action::Record))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::Ok);
        assert_eq!(response.policy_kind(), ProtoPolicyKind::SlidingWindow);

        clock.advance(Duration::from_secs(5));
        let response = service
            .should_admit(request("sliding_window", "1", Action::Record))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::OverLimit);
        assert_eq!(
            response.retry_after,
            Some(to_proto_duration(Duration::from_secs(5)))
        );
    }

    #[tokio::test]
    async fn test_check_does_not_commit() {
        let (service, _clock) = service();

        for _ in 0..3 {
            let response = service
                .should_admit(request("throttle", "user", Action::Check))
                .await
                .unwrap()
                .into_inner();
            assert_eq!(response.code(), Code::Ok);
            assert_eq!(response.policy_kind(), ProtoPolicyKind::IntervalThrottle);
        }

        let response = service
            .should_admit(request("throttle", "user", Action::Record))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::Ok);

        let response = service
            .should_admit(request("throttle", "user", Action::Check))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::OverLimit);
        assert_eq!(
            response.retry_after,
            Some(to_proto_duration(Duration::from_secs(10)))
        );
    }

    #[test]
    fn test_to_proto_duration() {
        let duration = to_proto_duration(Duration::from_millis(2_500));
        assert_eq!(duration.seconds, 2);
        assert_eq!(duration.nanos, 500_000_000);
    }
}
