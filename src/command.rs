//! Command Queue
//!
//! User commands run one at a time, in submission order, on a single
//! worker task. A failing command does not stop the queue.

use crate::error::{format_arm_error, ArmResult};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

/// FIFO queue of user commands
#[derive(Clone)]
pub struct CommandQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl CommandQueue {
    /// Create the queue and spawn its worker. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
            tracing::debug!("Command queue closed");
        });

        Self { sender }
    }

    /// Enqueue a command.
    ///
    /// Failures are reported as `"{context}. {error}"`, logged, and sent back
    /// through the returned receiver.
    pub fn submit<T, F>(
        &self,
        context: impl Into<String>,
        task: F,
    ) -> oneshot::Receiver<Result<T, String>>
    where
        T: Send + 'static,
        F: Future<Output = ArmResult<T>> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let context = context.into();
        tracing::debug!("Queued: {}", context);

        let job = async move {
            let outcome = task.await.map_err(|err| {
                let message = format!("{}. {}", context, format_arm_error(&err));
                tracing::error!("{}", message);
                message
            });
            // Submitter may have stopped waiting
            let _ = reply.send(outcome);
        }
        .boxed();

        if self.sender.send(job).is_err() {
            tracing::error!("Command queue is closed, command dropped");
        }

        receiver
    }

    /// Enqueue a command and wait for its outcome
    pub async fn run<T, F>(&self, context: impl Into<String>, task: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: Future<Output = ArmResult<T>> + Send + 'static,
    {
        self.submit(context, task)
            .await
            .unwrap_or_else(|_| Err("Command was dropped".to_string()))
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArmError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_commands_run_in_submission_order() {
        let queue = CommandQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for (i, delay) in [30u64, 10, 0].into_iter().enumerate() {
            let order = order.clone();
            receivers.push(queue.submit(format!("job {}", i), async move {
                order.lock().unwrap().push(format!("start {}", i));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                order.lock().unwrap().push(format!("end {}", i));
                Ok::<_, ArmError>(i)
            }));
        }

        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), Ok(i));
        }

        assert_eq!(
            *order.lock().unwrap(),
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn test_failure_is_formatted_and_queue_continues() {
        let queue = CommandQueue::new();

        let failed: Result<(), String> = queue
            .run("Error showing ARM resource", async {
                Err(ArmError::MalformedResourceId("/bad".to_string()))
            })
            .await;
        assert_eq!(
            failed.unwrap_err(),
            "Error showing ARM resource. Incorrect resourceId: /bad"
        );

        let ok = queue.run("next", async { Ok::<_, ArmError>("done") }).await;
        assert_eq!(ok, Ok("done"));
    }
}
