//! Notification delivery.
//!
//! Provides an abstraction for sending mail notices so the workflow
//! services stay independent of the transport. Delivery is best-effort
//! from the caller's perspective: services log failures and move on.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::debug;

use scoutreg_common::{AppError, AppResult, Config, MailConfig};
use scoutreg_db::entities::{group, user};

/// A single outgoing notice. Recipient fields hold login email addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon copy, typically the subject's manager chain.
    pub cc: Vec<String>,
    /// Blind copy, typically the superuser set.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Trait for notice delivery.
///
/// This allows the core services to send notices without directly
/// depending on a mail transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notice to its recipients.
    async fn deliver(&self, notice: Notice) -> AppResult<()>;
}

/// A no-op implementation of Notifier for testing or when mail is disabled.
#[derive(Clone, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn deliver(&self, _notice: Notice) -> AppResult<()> {
        Ok(())
    }
}

/// Type alias for a shared notifier.
pub type NotifierService = Arc<dyn Notifier>;

/// SMTP-backed notifier.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    enabled: bool,
}

impl SmtpNotifier {
    /// Build a notifier from the mail section of the configuration.
    pub fn from_config(instance_name: &str, config: &MailConfig) -> AppResult<Self> {
        let from = format!("{instance_name} <{}>", config.from_address)
            .parse::<Mailbox>()
            .map_err(|e| AppError::Mail(format!("Invalid from address: {e}")))?;

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::Mail(format!("Invalid SMTP host: {e}")))?
                .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            enabled: config.enabled,
        })
    }

    fn mailbox(addr: &str) -> AppResult<Mailbox> {
        addr.parse()
            .map_err(|e| AppError::Mail(format!("Invalid recipient address {addr}: {e}")))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn deliver(&self, notice: Notice) -> AppResult<()> {
        if !self.enabled {
            debug!(subject = %notice.subject, "mail disabled, dropping notice");
            return Ok(());
        }
        if notice.to.is_empty() && notice.cc.is_empty() && notice.bcc.is_empty() {
            debug!(subject = %notice.subject, "notice has no recipients, dropping");
            return Ok(());
        }

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&notice.subject);
        for addr in &notice.to {
            builder = builder.to(Self::mailbox(addr)?);
        }
        for addr in &notice.cc {
            builder = builder.cc(Self::mailbox(addr)?);
        }
        for addr in &notice.bcc {
            builder = builder.bcc(Self::mailbox(addr)?);
        }
        let message = builder
            .body(notice.body.clone())
            .map_err(|e| AppError::Mail(format!("Failed to build mail: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Mail(format!("Failed to send mail: {e}")))?;
        debug!(subject = %notice.subject, "notice delivered");
        Ok(())
    }
}

/// Builds the standard notices from instance settings.
#[derive(Debug, Clone)]
pub struct NoticeBuilder {
    instance_name: String,
    base_url: String,
}

impl NoticeBuilder {
    /// Create a builder with explicit values.
    pub fn new(instance_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            base_url: base_url.into(),
        }
    }

    /// Create a builder from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.app.instance_name, &config.app.base_url)
    }

    fn subject(&self, text: &str) -> String {
        format!("[{}] {text}", self.instance_name)
    }

    /// Greeting for a freshly registered account. The manager chain is
    /// copied in so the approvers know a request may be waiting.
    #[must_use]
    pub fn welcome(&self, user: &user::Model, cc: Vec<String>, bcc: Vec<String>) -> Notice {
        Notice {
            to: vec![user.id.clone()],
            cc,
            bcc,
            subject: self.subject("Welcome"),
            body: format!(
                "Hello {},\n\n\
                 your account {} has been created on {}.\n\n\
                 If you requested management access to a group, the responsible\n\
                 coordinators have been notified and will approve your request.\n\n\
                 {}",
                user.name, user.id, self.instance_name, self.base_url
            ),
        }
    }

    /// Sent to the users entitled to approve a pending request.
    #[must_use]
    pub fn permission_requested(
        &self,
        subject_user: &user::Model,
        group: &group::Model,
        to: Vec<String>,
    ) -> Notice {
        Notice {
            to,
            cc: vec![],
            bcc: vec![],
            subject: self.subject("Permission requested"),
            body: format!(
                "{} ({}) has requested management access to {}.\n\n\
                 You can review and approve the request here:\n\
                 {}/auth/users",
                subject_user.name,
                subject_user.id,
                group.display_name(),
                self.base_url
            ),
        }
    }

    /// Sent to the subject after a request was approved.
    #[must_use]
    pub fn permission_granted(
        &self,
        subject_user: &user::Model,
        group: &group::Model,
        cc: Vec<String>,
        bcc: Vec<String>,
    ) -> Notice {
        Notice {
            to: vec![subject_user.id.clone()],
            cc,
            bcc,
            subject: self.subject("Permissions updated"),
            body: format!(
                "Hello {},\n\n\
                 your management access to {} has been approved.\n\n\
                 You can now manage the group and its events:\n\
                 {}/admin/groups",
                subject_user.name,
                group.display_name(),
                self.base_url
            ),
        }
    }

    /// Sent to the subject after a permission was removed. Takes the group
    /// name as text since the group itself may be gone by now.
    #[must_use]
    pub fn permission_revoked(
        &self,
        subject_user: &user::Model,
        group_name: &str,
        cc: Vec<String>,
        bcc: Vec<String>,
    ) -> Notice {
        Notice {
            to: vec![subject_user.id.clone()],
            cc,
            bcc,
            subject: self.subject("Permissions updated"),
            body: format!(
                "Hello {},\n\n\
                 your management access to {group_name} has been removed.\n\n\
                 If you believe this is an error, contact your coordinators.",
                subject_user.name
            ),
        }
    }

    /// Sent to the subject when an account-level flag changes, e.g. a
    /// coordinator role or superuser access.
    #[must_use]
    pub fn account_flags_changed(
        &self,
        subject_user: &user::Model,
        description: &str,
        cc: Vec<String>,
        bcc: Vec<String>,
    ) -> Notice {
        Notice {
            to: vec![subject_user.id.clone()],
            cc,
            bcc,
            subject: self.subject("Permissions updated"),
            body: format!(
                "Hello {},\n\n\
                 your account permissions have changed: {description}.\n\n\
                 You can review your current roles here:\n\
                 {}/auth/users",
                subject_user.name, self.base_url
            ),
        }
    }

    /// Password reset link with a short-lived token.
    #[must_use]
    pub fn password_reset(&self, user: &user::Model, token: &str) -> Notice {
        Notice {
            to: vec![user.id.clone()],
            cc: vec![],
            bcc: vec![],
            subject: self.subject("Password reset"),
            body: format!(
                "Hello {},\n\n\
                 a password reset was requested for your account.\n\
                 Use the link below to set a new password:\n\n\
                 {}/auth/reset/{}?token={token}\n\n\
                 If you did not request this, you can ignore this mail.",
                user.name, self.base_url, user.id
            ),
        }
    }
}
