//! Member notifications: checkout confirmations and overdue reminders

use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::str::FromStr;

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

/// Everything a notification needs about one loan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanNotice {
    pub loan_id: i32,
    pub member_name: String,
    pub member_email: String,
    pub book_title: String,
    pub due_date: NaiveDate,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn loan_created(&self, notice: &LoanNotice) -> AppResult<()>;
    async fn overdue_reminder(&self, notice: &LoanNotice) -> AppResult<()>;
}

fn loan_created_message(notice: &LoanNotice) -> (String, String) {
    let subject = format!("Loan confirmation: {}", notice.book_title);
    let body = format!(
        r#"
Dear {name},

You have borrowed "{title}".

Please return it by {due}.
"#,
        name = notice.member_name,
        title = notice.book_title,
        due = notice.due_date.format("%Y-%m-%d"),
    );
    (subject, body)
}

fn overdue_message(notice: &LoanNotice) -> (String, String) {
    let subject = format!("Overdue: {}", notice.book_title);
    let body = format!(
        r#"
Dear {name},

"{title}" was due on {due} and has not been returned yet.

Please bring it back as soon as possible.
"#,
        name = notice.member_name,
        title = notice.book_title,
        due = notice.due_date.format("%Y-%m-%d"),
    );
    (subject, body)
}

/// SMTP notifier
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> AppResult<Message> {
        let from_name = self
            .config
            .smtp_from_name
            .as_deref()
            .unwrap_or("Lending Desk");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(format!(
                                r#"<html><body><pre>{}</pre></body></html>"#,
                                body.replace('\n', "<br>")
                            )),
                    ),
            )
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))
    }

    fn mailer(&self) -> AppResult<SmtpTransport> {
        let mailer_builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer_builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        Ok(mailer_builder.build())
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let email = self.build_message(to, subject, body)?;
        let mailer = self.mailer()?;

        // The SMTP transport blocks
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::Internal(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn loan_created(&self, notice: &LoanNotice) -> AppResult<()> {
        let (subject, body) = loan_created_message(notice);
        self.send_email(&notice.member_email, &subject, &body).await
    }

    async fn overdue_reminder(&self, notice: &LoanNotice) -> AppResult<()> {
        let (subject, body) = overdue_message(notice);
        self.send_email(&notice.member_email, &subject, &body).await
    }
}

/// Notifier used when mail delivery is switched off
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn loan_created(&self, notice: &LoanNotice) -> AppResult<()> {
        tracing::info!(
            loan_id = notice.loan_id,
            to = %notice.member_email,
            due_date = %notice.due_date,
            "Loan confirmation (mail disabled)"
        );
        Ok(())
    }

    async fn overdue_reminder(&self, notice: &LoanNotice) -> AppResult<()> {
        tracing::info!(
            loan_id = notice.loan_id,
            to = %notice.member_email,
            due_date = %notice.due_date,
            "Overdue reminder (mail disabled)"
        );
        Ok(())
    }
}
