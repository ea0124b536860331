//! Auth and billing are named collaborators in the external-interfaces
//! section but have no implementation to ground here, so — the way the
//! teacher models an optional out-of-process collaborator as
//! `Option<QueryGenerator>` rather than hand-rolling a fake service — both
//! are traits with a permissive default, swappable by whatever deployment
//! wires this crate up.

use async_trait::async_trait;

use agentrun_core::{EngineResult, ThreadId};

#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn verify_thread_access(&self, thread_id: ThreadId, user_id: Option<&str>) -> EngineResult<()>;
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn check_billing_status(&self, user_id: Option<&str>) -> EngineResult<()>;
}

pub struct PermissiveAuthGateway;

#[async_trait]
impl AuthGateway for PermissiveAuthGateway {
    async fn verify_thread_access(&self, _thread_id: ThreadId, _user_id: Option<&str>) -> EngineResult<()> {
        Ok(())
    }
}

pub struct PermissiveBillingGateway;

#[async_trait]
impl BillingGateway for PermissiveBillingGateway {
    async fn check_billing_status(&self, _user_id: Option<&str>) -> EngineResult<()> {
        Ok(())
    }
}
