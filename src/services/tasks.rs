//! Background notification tasks
//!
//! Lending transitions enqueue tasks after commit; a single worker drains
//! the queue and hands each task to the [`Notifier`]. Delivery is
//! at-most-once per attempt with a bounded number of retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::task::JoinHandle;

use super::email::{LoanNotice, Notifier};
use crate::{
    config::NotificationsConfig,
    error::{AppError, AppResult},
    repository::Repository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    LoanCreated { loan_id: i32 },
    OverdueReminder { loan_id: i32 },
}

impl Task {
    pub fn loan_id(&self) -> i32 {
        match self {
            Task::LoanCreated { loan_id } | Task::OverdueReminder { loan_id } => *loan_id,
        }
    }
}

/// Fire-and-forget task submission
#[cfg_attr(test, mockall::automock)]
pub trait TaskQueue: Send + Sync {
    /// Never waits; fails when the queue cannot take the task right now
    fn enqueue(&self, task: Task) -> AppResult<()>;
}

/// Bounded in-process queue
#[derive(Clone)]
pub struct ChannelQueue {
    sender: Sender<Task>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, Receiver<Task>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl TaskQueue for ChannelQueue {
    fn enqueue(&self, task: Task) -> AppResult<()> {
        self.sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Queue("task queue is full".to_string()),
            TrySendError::Closed(_) => AppError::Queue("task queue is closed".to_string()),
        })
    }
}

pub struct TaskWorker {
    repository: Repository,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl TaskWorker {
    pub fn new(repository: Repository, notifier: Arc<dyn Notifier>, config: &NotificationsConfig) -> Self {
        Self {
            repository,
            notifier,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn spawn(self, receiver: Receiver<Task>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Process tasks until every sender is dropped
    pub async fn run(self, mut receiver: Receiver<Task>) {
        tracing::info!("Notification worker started");
        while let Some(task) = receiver.recv().await {
            self.process(task).await;
        }
        tracing::info!("Notification worker stopped");
    }

    /// Run one task with retries, returns whether it eventually succeeded
    pub async fn process(&self, task: Task) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.handle(task).await {
                Ok(()) => {
                    tracing::debug!(?task, attempt, "Task delivered");
                    return true;
                }
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(?task, attempt, error = %e, "Task failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(?task, attempts = attempt, error = %e, "Task dropped after final attempt");
                }
            }
        }
        false
    }

    async fn handle(&self, task: Task) -> AppResult<()> {
        let notice = self.notice(task.loan_id()).await?;
        match task {
            Task::LoanCreated { .. } => self.notifier.loan_created(&notice).await,
            Task::OverdueReminder { .. } => self.notifier.overdue_reminder(&notice).await,
        }
    }

    async fn notice(&self, loan_id: i32) -> AppResult<LoanNotice> {
        let loan = self.repository.loans.get_loan(loan_id).await?;
        let book = self.repository.catalog.get_book(loan.book_id).await?;
        let member = self.repository.catalog.get_member(loan.member_id).await?;

        Ok(LoanNotice {
            loan_id,
            member_name: member.full_name(),
            member_email: member.email,
            book_title: book.title,
            due_date: loan.due_date,
        })
    }
}
