//! Notifier trait: reports run outcomes to the user.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{TaskCompletion, TaskFailure};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify_task_complete(&self, completion: &TaskCompletion) -> Result<()>;

    async fn notify_task_failed(&self, failure: &TaskFailure) -> Result<()>;
}
