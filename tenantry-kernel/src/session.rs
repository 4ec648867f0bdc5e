//! Session management
//!
//! Sessions bind an authenticated experimenter to a current context group.
//! The session manager is the only component that changes which group a
//! session works in; every other component receives immutable
//! [`SecurityContext`] values.

use crate::context::{ContextGroup, SecurityContext, SessionId};
use crate::principal::Principal;
use crate::registry::GroupRegistry;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tenantry_core::{
    group_violation, not_found_error, security_violation, CredentialVerifier, GroupId,
    SessionConfig, TenantryResult, UserId,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Public view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user: UserId,
    pub username: String,
    pub group: ContextGroup,
    /// Administrator that opened this session through sudo
    pub sudo_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub timeout_secs: u64,
}

impl SessionInfo {
    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_access > Duration::seconds(self.timeout_secs as i64)
    }

    fn context(&self) -> SecurityContext {
        SecurityContext::new(self.user, self.group, self.id)
    }
}

pub struct SessionManager {
    registry: Arc<GroupRegistry>,
    verifier: Arc<dyn CredentialVerifier>,
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
    /// Session behind [`crate::Kernel::root_context`], valid for root only
    bootstrap: SessionId,
}

impl SessionManager {
    pub fn new(
        registry: Arc<GroupRegistry>,
        verifier: Arc<dyn CredentialVerifier>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            verifier,
            config,
            sessions: RwLock::new(HashMap::new()),
            bootstrap: SessionId::new(),
        }
    }

    /// The in-process session root works in before anyone logs in.
    ///
    /// It never expires and cannot be logged out.
    pub fn bootstrap_session(&self) -> SessionId {
        self.bootstrap
    }

    /// Check that `context` was issued by a live session of its user,
    /// refreshing the session's idle timer
    pub async fn validate(&self, context: &SecurityContext) -> TenantryResult<()> {
        self.validate_at(context, Utc::now()).await
    }

    pub async fn validate_at(&self, context: &SecurityContext, now: DateTime<Utc>) -> TenantryResult<()> {
        if context.session == self.bootstrap && context.user == self.registry.root() {
            return Ok(());
        }

        let mut sessions = self.sessions.write().await;
        let Some(info) = sessions.get_mut(&context.session) else {
            let err = security_violation!(
                format!("session {} is not active", context.session),
                "session"
            );
            err.log();
            return Err(err);
        };

        if info.user != context.user {
            let err = security_violation!(
                format!("session {} does not belong to {}", context.session, context.user),
                "session"
            );
            err.log();
            return Err(err);
        }

        if info.expired_at(now) {
            sessions.remove(&context.session);
            let err = security_violation!(format!("session {} expired", context.session), "session");
            err.log();
            return Err(err);
        }

        info.last_access = now;
        Ok(())
    }

    /// Authenticate and open a session in the experimenter's default group
    pub async fn login(&self, username: &str, password: &str) -> TenantryResult<SecurityContext> {
        // Unknown users and wrong passwords are indistinguishable to the caller
        let verified = self.verifier.verify(username, password).await?;
        let experimenter = match self.registry.experimenter_by_name(username).await {
            Some(experimenter) if verified => experimenter,
            _ => {
                let err = security_violation!(
                    format!("authentication failed for '{}'", username),
                    "session"
                );
                err.log();
                return Err(err);
            }
        };

        let principal = self.registry.principal(experimenter.id).await?;
        let session = self
            .open(&principal, None, self.config.idle_timeout_secs)
            .await;

        info!(user = %principal.user_id, session = %session.session, group = %session.group, "Logged in");
        Ok(session)
    }

    /// Open a session as `username` on behalf of an administrator session
    pub async fn sudo(&self, session: SessionId, username: &str) -> TenantryResult<SecurityContext> {
        let admin_context = self.context(session).await?;
        let admin = self.registry.principal(admin_context.user).await?;
        if !admin.is_administrator() {
            let err = security_violation!(
                format!("{} may not act as '{}'", admin, username),
                "session"
            );
            err.log();
            return Err(err);
        }

        let target = self
            .registry
            .experimenter_by_name(username)
            .await
            .ok_or_else(|| not_found_error!(username, "session"))?;
        let principal = self.registry.principal(target.id).await?;
        let context = self
            .open(&principal, Some(admin.user_id), self.config.sudo_timeout_secs)
            .await;

        warn!(
            target: "audit",
            admin = %admin.user_id,
            user = %principal.user_id,
            session = %context.session,
            "Sudo session opened"
        );
        Ok(context)
    }

    async fn open(&self, principal: &Principal, sudo_by: Option<UserId>, timeout_secs: u64) -> SecurityContext {
        let now = Utc::now();
        let info = SessionInfo {
            id: SessionId::new(),
            user: principal.user_id,
            username: principal.username.clone(),
            group: ContextGroup::Group(self.default_group(principal)),
            sudo_by,
            created_at: now,
            last_access: now,
            timeout_secs,
        };
        let context = info.context();
        self.sessions.write().await.insert(info.id, info);
        context
    }

    /// First regular group, else the system group for administrators, else
    /// the user group
    fn default_group(&self, principal: &Principal) -> GroupId {
        let reserved = self.registry.reserved();
        principal
            .groups()
            .find(|g| !reserved.is_reserved(*g))
            .unwrap_or(if principal.is_administrator() {
                reserved.system
            } else {
                reserved.user
            })
    }

    /// The session's current context, refreshing its idle timer
    pub async fn context(&self, session: SessionId) -> TenantryResult<SecurityContext> {
        self.context_at(session, Utc::now()).await
    }

    pub async fn context_at(&self, session: SessionId, now: DateTime<Utc>) -> TenantryResult<SecurityContext> {
        let mut sessions = self.sessions.write().await;
        let info = sessions
            .get_mut(&session)
            .ok_or_else(|| not_found_error!(session, "session"))?;

        if info.expired_at(now) {
            sessions.remove(&session);
            let err = security_violation!(format!("session {} expired", session), "session");
            err.log();
            return Err(err);
        }

        info.last_access = now;
        Ok(info.context())
    }

    /// Context for one call. A `context-group` header value overrides the
    /// session's group for this call only.
    pub async fn context_for(&self, session: SessionId, header: Option<&str>) -> TenantryResult<SecurityContext> {
        let context = self.context(session).await?;
        let Some(value) = header else {
            return Ok(context);
        };

        let group = ContextGroup::parse_header(value)?;
        self.check_group(context.user, group).await?;
        Ok(context.with_group(group))
    }

    /// Switch the session's current group
    pub async fn use_group(&self, session: SessionId, group: ContextGroup) -> TenantryResult<SecurityContext> {
        let context = self.context(session).await?;
        self.check_group(context.user, group).await?;

        let mut sessions = self.sessions.write().await;
        let info = sessions
            .get_mut(&session)
            .ok_or_else(|| not_found_error!(session, "session"))?;
        info.group = group;

        debug!(session = %session, group = %group, "Switched group");
        Ok(info.context())
    }

    async fn check_group(&self, user: UserId, group: ContextGroup) -> TenantryResult<()> {
        let ContextGroup::Group(id) = group else {
            return Ok(());
        };

        self.registry.group(id).await?;
        let principal = self.registry.principal(user).await?;
        if principal.is_administrator() || principal.is_member_of(id) {
            return Ok(());
        }

        let err = group_violation!(
            format!("{} is not a member of {}", principal, id),
            "session"
        );
        err.log();
        Err(err)
    }

    pub async fn session_info(&self, session: SessionId) -> TenantryResult<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(&session)
            .cloned()
            .ok_or_else(|| not_found_error!(session, "session"))
    }

    pub async fn logout(&self, session: SessionId) -> TenantryResult<()> {
        match self.sessions.write().await.remove(&session) {
            Some(info) => {
                info!(user = %info.user, session = %session, "Logged out");
                Ok(())
            }
            None => Err(not_found_error!(session, "session")),
        }
    }

    /// Drop every session idle past its timeout at `now`
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, info| !info.expired_at(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Expired sessions swept");
        }
        removed
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}
